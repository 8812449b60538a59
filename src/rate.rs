//! Net cooling rate of a single particle
//!
//! The net rate `Λ_net` is in erg cm^3 s^-1, normalised to `n_H^2`. Positive values heat the gas.
//! It is the sum of three channels: the primordial hydrogen-helium rate, inverse Compton
//! scattering off the CMB (only above the tabulated redshifts, where the tables leave it out),
//! and one channel per metal scaled by the particle's abundance relative to solar.

use std::f64::consts::LN_10;

use crate::abundance::{AbundanceRatios, TableElement};
use crate::constants::T_CMB_0;
use crate::tables::{index_1d, AxisIndex, CoolingTables};

/// Net cooling rate and, if requested, its derivative
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetRate {
    /// `Λ_net` \[erg cm^3 s^-1\]
    pub lambda: f64,
    /// `dΛ_net / du` with `u` in erg/g
    pub dlambda_du: Option<f64>,
}

/// Anything that provides a net cooling rate as a function of the internal energy. The
/// integrator only sees this.
pub trait CoolingRate {
    /// Net rate at natural log internal energy `log_u` \[erg/g\]. The derivative is only computed
    /// when `derivative` is set, and must then be `Some`. Newton-Raphson treats a missing
    /// derivative as zero, which degrades it to a fixed-slope iteration.
    fn net_rate(&self, log_u: f64, derivative: bool) -> NetRate;

    /// Range of natural log internal energy in which the rate can be trusted
    fn log_u_bounds(&self) -> (f64, f64);
}

/// A single term of the net cooling rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Primordial hydrogen and helium
    HPlusHe,
    /// Inverse Compton scattering off the CMB
    Compton,
    /// One of the metals with its own table
    Metal(TableElement),
}

/// Receiver for the individual terms of the net cooling rate
pub trait ContributionSink {
    /// Called once per evaluated channel
    fn record(&mut self, channel: Channel, lambda: f64);
}

/// Discards all contributions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContributions;

impl ContributionSink for NoContributions {
    #[inline(always)]
    fn record(&mut self, _channel: Channel, _lambda: f64) {}
}

impl ContributionSink for Vec<(Channel, f64)> {
    fn record(&mut self, channel: Channel, lambda: f64) {
        self.push((channel, lambda));
    }
}

// Internal energies this close to the table edge (in dex) are considered out of range
const TABLE_EDGE: f64 = 0.05;

/// Evaluates the net cooling rate of one particle. Density and helium fraction are located on
/// the table grids once, at construction.
#[derive(Debug, Clone)]
pub struct RateEvaluator<'a> {
    tables: &'a CoolingTables,
    n_h_index: AxisIndex,
    he_index: AxisIndex,
    n_h: f64,
    ratios: AbundanceRatios,
    redshift: f64,
    compton_rate: f64,
}

impl<'a> RateEvaluator<'a> {
    /// Set up the evaluator for a particle with hydrogen number density `n_h` \[cm^-3\] and
    /// helium fraction `X_He / (X_H + X_He)`.
    ///
    /// `compton_rate` is the Compton prefactor including `T_CMB_0^4`.
    pub fn new(
        tables: &'a CoolingTables,
        n_h: f64,
        he_frac: f64,
        ratios: AbundanceRatios,
        redshift: f64,
        compton_rate: f64,
    ) -> Self {
        RateEvaluator {
            tables,
            n_h_index: index_1d(tables.grids().log_n_h(), n_h.log10()),
            he_index: index_1d(tables.grids().he_frac(), he_frac),
            n_h,
            ratios,
            redshift,
            compton_rate,
        }
    }

    /// Hydrogen number density \[cm^-3\]
    pub fn n_h(&self) -> f64 {
        self.n_h
    }

    /// Net rate at `log_u`, reporting every channel to `sink`. Also computes the derivative.
    pub fn net_rate_with_contributions(
        &self,
        log_u: f64,
        sink: &mut impl ContributionSink,
    ) -> NetRate {
        self.evaluate(log_u, true, sink)
    }

    fn evaluate(
        &self,
        log_u: f64,
        derivative: bool,
        sink: &mut impl ContributionSink,
    ) -> NetRate {
        let (log_t, dt_du) =
            self.tables
                .log_temperature(log_u / LN_10, self.n_h_index, self.he_index, derivative);
        let grid = self.tables.grids().log_temperature();
        let temp = index_1d(grid, log_t);

        let lambda = self.channels(temp, 10f64.powf(log_t), sink);

        let dlambda_du = dt_du.map(|dt_du| {
            let t_low = 10f64.powf(grid[temp.index]);
            let t_high = 10f64.powf(grid[temp.index + 1]);

            let low = self.channels(temp.at(0.), t_low, &mut NoContributions);
            let high = self.channels(temp.at(1.), t_high, &mut NoContributions);

            (high - low) / (t_high - t_low) * dt_du
        });

        NetRate { lambda, dlambda_du }
    }

    /// Sum of all channels at table position `temp`. `temperature` is the physical temperature
    /// belonging to `temp`, used for the Compton term.
    fn channels(
        &self,
        temp: AxisIndex,
        temperature: f64,
        sink: &mut impl ContributionSink,
    ) -> f64 {
        let (h_plus_he, electron_abundance) =
            self.tables.h_plus_he(self.n_h_index, self.he_index, temp);
        sink.record(Channel::HPlusHe, h_plus_he);

        let mut lambda = h_plus_he;

        if self.tables.bracket().is_high_redshift() {
            let zp1 = 1. + self.redshift;
            let compton = -self.compton_rate * (temperature - T_CMB_0 * zp1) * zp1.powi(4)
                * electron_abundance
                / self.n_h;

            sink.record(Channel::Compton, compton);
            lambda += compton;
        }

        let electron_ratio =
            electron_abundance / self.tables.solar_electron_abundance(self.n_h_index, temp);

        for metal in 0..TableElement::METALS {
            let metal_lambda = self.tables.metal_heating(self.n_h_index, temp, metal)
                * electron_ratio
                * self.ratios.metal(metal);

            sink.record(Channel::Metal(TableElement::metal(metal)), metal_lambda);
            lambda += metal_lambda;
        }

        lambda
    }
}

impl CoolingRate for RateEvaluator<'_> {
    #[inline]
    fn net_rate(&self, log_u: f64, derivative: bool) -> NetRate {
        self.evaluate(log_u, derivative, &mut NoContributions)
    }

    fn log_u_bounds(&self) -> (f64, f64) {
        let grid = self.tables.grids().log_internal_energy();

        (
            (grid[0] + TABLE_EDGE) * LN_10,
            (grid[grid.len() - 1] - TABLE_EDGE) * LN_10,
        )
    }
}
