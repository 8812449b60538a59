//! Integration of the cooling equation over one step
//!
//! The energy at the end of the step solves the implicit equation
//!
//! ```text
//! u = u_0 + ratefact * (Λ_net(u) + H_reion / (dt * ratefact)) * dt
//! ```
//!
//! which is stiff whenever the cooling time is shorter than the step. It is solved by escalating
//! through an explicit update, Newton-Raphson in `ln u` (optional) and bracketed bisection in `u`.

use std::cell::Cell;

use thiserror::Error;
use tracing::debug;

use crate::bracket::{Bisection, BracketError, BracketSearcher, Direction, Expansion};
use crate::rate::{CoolingRate, NetRate};

/// Relative energy change below which the explicit update is accepted
pub const EXPLICIT_TOLERANCE: f64 = 0.05;
/// Convergence threshold on the Newton step in `ln u`
pub const NEWTON_TOLERANCE: f64 = 1e-4;
/// Maximum number of Newton iterations
pub const NEWTON_MAX_ITERATIONS: usize = 15;
/// Relative bracket width at which bisection stops
pub const BISECTION_TOLERANCE: f64 = 1e-6;
/// Maximum number of bracket expansions, and separately of bisections
pub const BISECTION_MAX_ITERATIONS: usize = 150;
/// Scale factor of a bracket expansion, `sqrt(1.1)`
pub const BRACKET_FACTOR: f64 = 1.0488088481701516;
/// Newton restart point, `ln(2e12)`. Close to the equilibrium energy of photo-ionised gas.
pub const NEWTON_LOG_U_GUESS: f64 = 28.3241683;

/// The implicit cooling equation of one particle. All quantities are CGS.
pub struct ImplicitEquation<'r, R> {
    rate: &'r R,
    u_0: f64,
    ratefact: f64,
    dt: f64,
    heat_rate: f64,
    evaluations: Cell<u64>,
}

impl<'r, R: CoolingRate> ImplicitEquation<'r, R> {
    /// Equation for a particle starting at `u_0` \[erg/g\] over a step `dt` \[s\].
    ///
    /// `ratefact` is `n_H X_H / m_p`, which turns `Λ_net` into a specific rate. `heat` is the
    /// energy injected over the step by other sources \[erg/g\].
    pub fn new(rate: &'r R, u_0: f64, ratefact: f64, dt: f64, heat: f64) -> Self {
        let scale = ratefact * dt;

        ImplicitEquation {
            rate,
            u_0,
            ratefact,
            dt,
            heat_rate: if scale > 0. { heat / scale } else { 0. },
            evaluations: Cell::new(0),
        }
    }

    /// Starting energy \[erg/g\]
    pub fn u_0(&self) -> f64 {
        self.u_0
    }

    /// Net rate at `log_u` including the extra heating
    pub fn net_rate(&self, log_u: f64, derivative: bool) -> NetRate {
        self.evaluations.set(self.evaluations.get() + 1);

        let rate = self.rate.net_rate(log_u, derivative);
        debug_assert!(
            rate.lambda.is_finite(),
            "net cooling rate {} at ln u = {log_u} is not finite",
            rate.lambda
        );

        NetRate {
            lambda: rate.lambda + self.heat_rate,
            dlambda_du: rate.dlambda_du,
        }
    }

    /// Energy change over the step at a constant net rate
    #[inline]
    pub fn energy_change(&self, lambda: f64) -> f64 {
        self.ratefact * lambda * self.dt
    }

    /// `u - u_0 - Δu(u)`, zero at the solution and increasing with `u`
    pub fn residual(&self, u: f64) -> f64 {
        u - self.u_0 - self.energy_change(self.net_rate(u.ln(), false).lambda)
    }

    /// Number of net rate evaluations so far
    pub fn evaluations(&self) -> u64 {
        self.evaluations.get()
    }
}

/// Supported integration schemes for stiff steps
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationScheme {
    /// Bracketed bisection only
    Bisection,
    /// Newton-Raphson, falling back to bisection
    Newton,
}

impl IntegrationScheme {
    /// Whether Newton-Raphson is tried before bisection
    pub fn newton_enabled(self) -> bool {
        self == IntegrationScheme::Newton
    }
}

/// Starting point of a Newton-Raphson run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonStart {
    /// The energy at the start of the step
    Initial,
    /// [NEWTON_LOG_U_GUESS]
    Guess,
}

/// How the final energy was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    /// Explicit update
    Explicit,
    /// Newton-Raphson from the given start
    Newton(NewtonStart),
    /// Bracketed bisection
    Bisection,
}

/// Integration scheme, in order of escalation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scheme {
    /// Try a single explicit step
    Explicit,
    /// Try Newton-Raphson
    Newton(NewtonStart),
    /// Bracket and bisect
    Bisection,
    /// Done
    Converged {
        /// Energy at the end of the step \[erg/g\]
        u: f64,
        /// Scheme that produced `u`
        path: Path,
    },
    /// Bisection failed as well
    Failed(BracketError),
}

/// Why a Newton-Raphson run was abandoned
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum NewtonError {
    /// The iterate left the range covered by the tables
    #[error("iterate {0} left the table range")]
    OutOfBounds(f64),
    /// The iterate became NaN or infinite
    #[error("iterate is not finite")]
    NonFinite,
    /// Still moving after [NEWTON_MAX_ITERATIONS] iterations
    #[error("no convergence within the iteration limit, last iterate {0}")]
    NotConverged(f64),
}

impl NewtonError {
    /// Last iterate before giving up
    pub fn last_iterate(&self) -> f64 {
        match *self {
            NewtonError::OutOfBounds(log_u) | NewtonError::NotConverged(log_u) => log_u,
            NewtonError::NonFinite => f64::NAN,
        }
    }
}

/// A successful integration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integration {
    /// Energy at the end of the step \[erg/g\]
    pub u_final: f64,
    /// Scheme that produced `u_final`
    pub path: Path,
    /// Number of net rate evaluations, over all schemes tried
    pub evaluations: u64,
}

/// Every scheme failed
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("cooling integration failed after {evaluations} rate evaluations")]
pub struct IntegrationFailure {
    /// Why the last resort failed
    #[source]
    pub reason: BracketError,
    /// Number of net rate evaluations
    pub evaluations: u64,
}

/// Newton-Raphson on `ln u`, starting from `log_u`. Returns the converged `ln u`.
pub fn newton<R: CoolingRate>(
    equation: &ImplicitEquation<R>,
    mut log_u: f64,
) -> Result<f64, NewtonError> {
    let (low, high) = equation.rate.log_u_bounds();
    let scale = equation.ratefact * equation.dt;
    let mut lambda_previous = 0.;

    for i in 0..NEWTON_MAX_ITERATIONS {
        let log_u_old = log_u;
        let NetRate { lambda, dlambda_du } = equation.net_rate(log_u_old, true);
        debug_assert!(dlambda_du.is_some(), "rate ignored the derivative request");
        let inverse_u = (-log_u_old).exp();

        log_u = log_u_old
            - (1. - equation.u_0 * inverse_u - lambda * scale * inverse_u)
                / (1. - dlambda_du.unwrap_or(0.) * scale);

        // The first step overshot the equilibrium
        if i == 1 && lambda_previous * lambda < 0. {
            log_u = NEWTON_LOG_U_GUESS;
        }
        lambda_previous = lambda;

        if !log_u.is_finite() {
            return Err(NewtonError::NonFinite);
        }

        if log_u > high || log_u < low {
            return Err(NewtonError::OutOfBounds(log_u));
        }

        if (log_u - log_u_old).abs() <= NEWTON_TOLERANCE {
            return Ok(log_u);
        }
    }

    Err(NewtonError::NotConverged(log_u))
}

/// Bracket the solution starting around `u_0`, then bisect. The sign of `lambda_0`, the net rate
/// at `u_0`, sets the direction of the bracket search.
pub fn bisection<R: CoolingRate>(
    equation: &ImplicitEquation<R>,
    lambda_0: f64,
) -> Result<f64, BracketError> {
    let direction = if lambda_0 < 0. {
        Direction::Down
    } else {
        Direction::Up
    };

    let expansion = Expansion {
        factor: BRACKET_FACTOR,
        max_iterations: BISECTION_MAX_ITERATIONS,
    };
    let (bracket, _) = expansion.expand(expansion.around(equation.u_0), direction, |u| {
        equation.residual(u)
    })?;

    let searcher = Bisection {
        rel_epsilon: BISECTION_TOLERANCE,
        max_iterations: BISECTION_MAX_ITERATIONS,
    };

    Ok(searcher.search(bracket, |u| equation.residual(u))?.root)
}

/// Run the escalation ladder until a scheme succeeds or bisection fails
pub fn solve<R: CoolingRate>(
    equation: &ImplicitEquation<R>,
    newton_enabled: bool,
) -> Result<Integration, IntegrationFailure> {
    let log_u_0 = equation.u_0.ln();
    let lambda_0 = equation.net_rate(log_u_0, false).lambda;
    let mut scheme = Scheme::Explicit;

    loop {
        scheme = match scheme {
            Scheme::Explicit => {
                let delta_u = equation.energy_change(lambda_0);

                if delta_u.abs() < EXPLICIT_TOLERANCE * equation.u_0 {
                    Scheme::Converged {
                        u: equation.u_0 + delta_u,
                        path: Path::Explicit,
                    }
                } else if newton_enabled {
                    Scheme::Newton(NewtonStart::Initial)
                } else {
                    Scheme::Bisection
                }
            }
            Scheme::Newton(start) => {
                let from = match start {
                    NewtonStart::Initial => log_u_0,
                    NewtonStart::Guess => NEWTON_LOG_U_GUESS,
                };
                let result = newton(equation, from);
                let last = match result {
                    Ok(log_u) => log_u,
                    Err(err) => err.last_iterate(),
                };
                let heats_while_cooling = lambda_0 < 0. && last > log_u_0;

                match result {
                    _ if heats_while_cooling && start == NewtonStart::Initial => {
                        debug!(log_u = last, "newton heated a cooling particle, restarting");
                        Scheme::Newton(NewtonStart::Guess)
                    }
                    Ok(log_u) if !heats_while_cooling => Scheme::Converged {
                        u: log_u.exp(),
                        path: Path::Newton(start),
                    },
                    Ok(_) => Scheme::Bisection,
                    Err(err) => {
                        debug!(%err, "newton failed, bisecting");
                        Scheme::Bisection
                    }
                }
            }
            Scheme::Bisection => match bisection(equation, lambda_0) {
                Ok(u) => Scheme::Converged {
                    u,
                    path: Path::Bisection,
                },
                Err(err) => Scheme::Failed(err),
            },
            Scheme::Converged { u, path } => {
                return Ok(Integration {
                    u_final: u,
                    path,
                    evaluations: equation.evaluations(),
                })
            }
            Scheme::Failed(reason) => {
                return Err(IntegrationFailure {
                    reason,
                    evaluations: equation.evaluations(),
                })
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::{
        bisection, newton, solve, ImplicitEquation, NewtonError, NewtonStart, Path,
        NEWTON_LOG_U_GUESS,
    };
    use crate::bracket::BracketError;
    use crate::rate::{CoolingRate, NetRate};

    /// `Λ = -k (u - u_eq)`, with ratefact and dt set to one so `k` is the stiffness
    struct LinearCooling {
        k: f64,
        u_eq: f64,
        // Derivative reported to Newton, `None` for the exact one
        reported_derivative: Option<f64>,
    }

    impl LinearCooling {
        fn new(k: f64, u_eq: f64) -> Self {
            LinearCooling {
                k,
                u_eq,
                reported_derivative: None,
            }
        }

        fn exact(&self, u_0: f64) -> f64 {
            (u_0 + self.k * self.u_eq) / (1. + self.k)
        }
    }

    impl CoolingRate for LinearCooling {
        fn net_rate(&self, log_u: f64, derivative: bool) -> NetRate {
            NetRate {
                lambda: -self.k * (log_u.exp() - self.u_eq),
                dlambda_du: derivative.then(|| self.reported_derivative.unwrap_or(-self.k)),
            }
        }

        fn log_u_bounds(&self) -> (f64, f64) {
            (1e10f64.ln(), 1e16f64.ln())
        }
    }

    struct Constant(f64);

    impl CoolingRate for Constant {
        fn net_rate(&self, _log_u: f64, derivative: bool) -> NetRate {
            NetRate {
                lambda: self.0,
                dlambda_du: derivative.then_some(0.),
            }
        }

        fn log_u_bounds(&self) -> (f64, f64) {
            (f64::NEG_INFINITY, f64::INFINITY)
        }
    }

    #[test]
    fn small_change_is_explicit() {
        let rate = Constant(0.01);
        let equation = ImplicitEquation::new(&rate, 1., 1., 1., 0.);

        let result = solve(&equation, false).unwrap();

        assert_eq!(result.path, Path::Explicit);
        assert!((result.u_final - 1.01).abs() < 1e-15);
        assert_eq!(result.evaluations, 1);
    }

    #[test]
    fn extra_heat_enters_the_rate() {
        let rate = Constant(0.);
        let equation = ImplicitEquation::new(&rate, 1., 2., 0.5, 0.02);

        let result = solve(&equation, false).unwrap();

        assert!((result.u_final - 1.02).abs() < 1e-15);
    }

    #[test]
    fn schemes_agree_in_the_explicit_regime() {
        let rate = LinearCooling::new(1e-3, 1e12);
        let u_0 = 1e14;
        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);

        let explicit = solve(&equation, false).unwrap();
        assert_eq!(explicit.path, Path::Explicit);

        let lambda_0 = equation.net_rate(u_0.ln(), false).lambda;
        let bisected = bisection(&equation, lambda_0).unwrap();
        let newton = newton(&equation, u_0.ln()).unwrap().exp();

        for u in [bisected, newton] {
            assert!((u - explicit.u_final).abs() / u_0 < 1e-5);
        }
    }

    #[test]
    fn stiff_cooling_bisects_to_the_implicit_solution() {
        let rate = LinearCooling::new(10., 1e12);
        let u_0 = 1e14;
        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);

        let result = solve(&equation, false).unwrap();
        let exact = rate.exact(u_0);

        assert_eq!(result.path, Path::Bisection);
        assert!((result.u_final - exact).abs() <= 1e-6 * result.u_final);
        assert!(result.u_final <= u_0);
    }

    #[test]
    fn stiff_heating_moves_up() {
        let rate = LinearCooling::new(10., 1e14);
        let u_0 = 1e12;
        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);

        let result = solve(&equation, false).unwrap();
        let exact = rate.exact(u_0);

        assert!(result.u_final >= u_0);
        assert!((result.u_final - exact).abs() <= 1e-6 * result.u_final);
    }

    #[test]
    fn newton_converges_with_an_exact_derivative() {
        let rate = LinearCooling::new(10., 1e12);
        let u_0 = 1e14;
        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);

        let result = solve(&equation, true).unwrap();
        let exact = rate.exact(u_0);

        assert_eq!(result.path, Path::Newton(NewtonStart::Initial));
        assert!((result.u_final - exact).abs() / exact < 1e-6);
    }

    #[test]
    fn newton_leaving_the_table_falls_back_to_bisection() {
        let mut rate = LinearCooling::new(10., 1e12);
        // No stiffness information, so the first step overshoots far below the table
        rate.reported_derivative = Some(0.);
        let u_0 = 1e14;

        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);
        assert!(matches!(
            newton(&equation, u_0.ln()),
            Err(NewtonError::OutOfBounds(log_u)) if log_u < u_0.ln()
        ));

        let with_newton = solve(&ImplicitEquation::new(&rate, u_0, 1., 1., 0.), true).unwrap();
        let without = solve(&ImplicitEquation::new(&rate, u_0, 1., 1., 0.), false).unwrap();

        assert_eq!(with_newton.path, Path::Bisection);
        assert_eq!(with_newton.u_final, without.u_final);
        assert!(with_newton.evaluations > without.evaluations);
    }

    #[test]
    fn newton_heating_a_cooling_particle_is_rejected() {
        let mut rate = LinearCooling::new(10., 1e12);
        // Wrong sign, so Newton walks away from the solution
        rate.reported_derivative = Some(2.);
        let u_0 = 1e14;

        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);
        let first = newton(&equation, u_0.ln()).unwrap_err();
        assert!(first.last_iterate() > u_0.ln());

        let result = solve(&ImplicitEquation::new(&rate, u_0, 1., 1., 0.), true).unwrap();

        assert_eq!(result.path, Path::Bisection);
        assert!((result.u_final - rate.exact(u_0)).abs() <= 1e-6 * result.u_final);
    }

    #[test]
    fn unbracketable_equation_fails() {
        // A constant cooling rate so strong that no positive energy solves the equation
        let rate = Constant(-1e30);
        let equation = ImplicitEquation::new(&rate, 1., 1., 1., 0.);

        let failure = solve(&equation, false).unwrap_err();

        assert!(matches!(
            failure.reason,
            BracketError::ExpansionExhausted { .. }
        ));
        assert!(failure.evaluations > 150);
    }

    /// Reports a too shallow slope on the first evaluation only, so the first Newton step
    /// overshoots the equilibrium
    struct ShallowFirstSlope {
        inner: LinearCooling,
        queried: RefCell<Vec<f64>>,
    }

    impl CoolingRate for ShallowFirstSlope {
        fn net_rate(&self, log_u: f64, derivative: bool) -> NetRate {
            let first = self.queried.borrow().is_empty();
            self.queried.borrow_mut().push(log_u);

            let mut rate = self.inner.net_rate(log_u, derivative);
            if first && derivative {
                rate.dlambda_du = Some(-0.5);
            }
            rate
        }

        fn log_u_bounds(&self) -> (f64, f64) {
            self.inner.log_u_bounds()
        }
    }

    #[test]
    fn overshooting_newton_restarts_from_the_guess() {
        let rate = ShallowFirstSlope {
            inner: LinearCooling::new(10., 1e12),
            queried: RefCell::new(Vec::new()),
        };
        let u_0 = 1e14;
        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);

        let log_u = newton(&equation, u_0.ln()).unwrap();
        let queried = rate.queried.borrow();

        // Second iterate lies below the equilibrium, third is the guess
        assert!(queried[1] < 1e12f64.ln());
        assert_eq!(queried[2], NEWTON_LOG_U_GUESS);
        assert!((log_u.exp() / rate.inner.exact(u_0) - 1.).abs() < 1e-6);
    }

    /// Reports a slope of the wrong sign above `threshold`, which sends Newton upwards when it
    /// starts from a hot particle
    struct WrongSlopeAbove {
        inner: LinearCooling,
        threshold: f64,
    }

    impl CoolingRate for WrongSlopeAbove {
        fn net_rate(&self, log_u: f64, derivative: bool) -> NetRate {
            let mut rate = self.inner.net_rate(log_u, derivative);
            if derivative && log_u.exp() > self.threshold {
                rate.dlambda_du = Some(2.);
            }
            rate
        }

        fn log_u_bounds(&self) -> (f64, f64) {
            self.inner.log_u_bounds()
        }
    }

    #[test]
    fn newton_retries_from_the_guess() {
        let rate = WrongSlopeAbove {
            inner: LinearCooling::new(10., 1e12),
            threshold: 5e13,
        };
        let u_0 = 1e14;
        let equation = ImplicitEquation::new(&rate, u_0, 1., 1., 0.);

        let first = newton(&equation, u_0.ln()).unwrap_err();
        assert!(first.last_iterate() > u_0.ln());

        let result = solve(&ImplicitEquation::new(&rate, u_0, 1., 1., 0.), true).unwrap();

        assert_eq!(result.path, Path::Newton(NewtonStart::Guess));
        assert!(result.u_final < u_0);
        assert!((result.u_final / rate.inner.exact(u_0) - 1.).abs() < 1e-6);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "net cooling rate")]
    fn non_finite_rate_is_fatal_in_debug_builds() {
        let rate = Constant(f64::NEG_INFINITY);
        let equation = ImplicitEquation::new(&rate, 1., 1., 1., 0.);

        let _ = solve(&equation, false);
    }
}
