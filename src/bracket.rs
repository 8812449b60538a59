//! Bracketing and bisection on a scalar residual.
//!
//! The residual is assumed to increase across the bracket: negative at the lower end, positive at
//! the upper end. This holds for the implicit cooling equation `u - u_0 - Δu(u)` as long as the
//! cooling rate does not change faster than the energy itself.

use thiserror::Error;

/// Ways in which a bracket search can fail
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum BracketError {
    /// No sign change was found after scaling the bracket the maximum number of times
    #[error("no sign change found after {iterations} expansions while {direction}")]
    ExpansionExhausted {
        /// Direction the bracket was moved in
        direction: Direction,
        /// Number of expansions performed
        iterations: usize,
    },
    /// The bracket did not shrink to the requested tolerance
    #[error("bisection did not converge in {iterations} iterations")]
    NotConverged {
        /// Number of bisections performed
        iterations: usize,
    },
    /// The residual evaluated to NaN or infinity at `x`
    #[error("residual is not finite at {x}")]
    NonFinite {
        /// Trial point
        x: f64,
    },
}

/// Direction in which a bracket is moved to find the sign change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards lower values, when the residual is positive at the start
    Down,
    /// Towards higher values, when the residual is negative at the start
    Up,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Down => write!(f, "cooling"),
            Direction::Up => write!(f, "heating"),
        }
    }
}

/// Interval expected to contain a root
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    /// Lower end, residual non-positive
    pub lower: f64,
    /// Upper end, residual positive
    pub upper: f64,
}

/// Outcome of a successful search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketResult {
    /// Upper end of the final bracket
    pub root: f64,
    /// Number of residual evaluations
    pub evals: u64,
}

/// Finds a root inside a bracket
pub trait BracketSearcher {
    /// Shrink `bracket` around the root of `f`
    fn search<F: FnMut(f64) -> f64>(
        &self,
        bracket: Bracket,
        f: F,
    ) -> Result<BracketResult, BracketError>;
}

/// Plain bisection, with a relative tolerance on the bracket width
pub struct Bisection {
    /// Stop when `(upper - lower) / midpoint` falls below this
    pub rel_epsilon: f64,
    /// Maximum number of halvings
    pub max_iterations: usize,
}

impl BracketSearcher for Bisection {
    fn search<F: FnMut(f64) -> f64>(
        &self,
        Bracket {
            mut lower,
            mut upper,
        }: Bracket,
        mut f: F,
    ) -> Result<BracketResult, BracketError> {
        let mut evals = 0;

        for _ in 0..self.max_iterations {
            let x = 0.5 * (lower + upper);
            let residual = f(x);
            evals += 1;

            if !residual.is_finite() {
                return Err(BracketError::NonFinite { x });
            }

            if residual > 0. {
                upper = x;
            } else {
                lower = x;
            }

            if (upper - lower).abs() <= self.rel_epsilon * x {
                return Ok(BracketResult { root: upper, evals });
            }
        }

        Err(BracketError::NotConverged {
            iterations: self.max_iterations,
        })
    }
}

/// Geometric bracket expansion. Both ends are scaled together, so the moving end always keeps
/// the last point with the wrong sign as its partner.
pub struct Expansion {
    /// Scale applied per step, larger than one
    pub factor: f64,
    /// Maximum number of scalings
    pub max_iterations: usize,
}

impl Expansion {
    /// The initial bracket `[x / factor, x * factor]`
    pub fn around(&self, x: f64) -> Bracket {
        Bracket {
            lower: x / self.factor,
            upper: x * self.factor,
        }
    }

    /// Move `bracket` in `direction` until the residual at its leading end changes sign. A
    /// bracket that already encloses the sign change is returned unchanged.
    ///
    /// Returns the bracket and the number of residual evaluations.
    pub fn expand<F: FnMut(f64) -> f64>(
        &self,
        mut bracket: Bracket,
        direction: Direction,
        mut f: F,
    ) -> Result<(Bracket, u64), BracketError> {
        let leading = |bracket: &Bracket| match direction {
            Direction::Down => bracket.lower,
            Direction::Up => bracket.upper,
        };
        let wrong_sign = |residual: f64| match direction {
            Direction::Down => residual > 0.,
            Direction::Up => residual < 0.,
        };

        let mut residual = f(leading(&bracket));
        let mut evals = 1;
        let mut iterations = 0;

        loop {
            if !residual.is_finite() {
                return Err(BracketError::NonFinite {
                    x: leading(&bracket),
                });
            }

            if !wrong_sign(residual) {
                return Ok((bracket, evals));
            }

            if iterations >= self.max_iterations {
                return Err(BracketError::ExpansionExhausted {
                    direction,
                    iterations,
                });
            }

            match direction {
                Direction::Down => {
                    bracket.lower /= self.factor;
                    bracket.upper /= self.factor;
                }
                Direction::Up => {
                    bracket.lower *= self.factor;
                    bracket.upper *= self.factor;
                }
            }

            residual = f(leading(&bracket));
            evals += 1;
            iterations += 1;
        }
    }
}
