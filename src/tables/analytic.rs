use itertools::Itertools;
use ndarray::{Array3, Array4};

use super::{RateTables, TableError, TableGrids, TableLoader};
use crate::abundance::TableElement;
use crate::constants::{BOLTZMANN_K, PROTON_MASS};

fn linspace(lower: f64, upper: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|x| lower + (upper - lower) * (x as f64) / ((n - 1) as f64))
        .collect_vec()
}

/// Solar mass fractions in table element order, as used by the EAGLE tables
pub const SOLAR_ABUNDANCES: [f64; TableElement::COUNT] = [
    7.0649785e-01,
    2.8055534e-01,
    2.0665436e-03,
    8.3562563e-04,
    5.4926244e-03,
    1.4144605e-03,
    5.9070642e-04,
    6.8258739e-04,
    4.0898522e-04,
    6.4355081e-05,
    1.1032152e-03,
];

/// Cooling tables built from closed-form rates.
///
/// All channels vanish at `equilibrium_temperature`, heat below it and cool above it, with a
/// cooling rate growing as the square root of the temperature. The gas is fully described by a
/// constant mean molecular weight, so the internal energy is proportional to the temperature.
/// Hydrogen-helium heating grows slowly with redshift so that blending between slices matters.
#[derive(Debug, Clone)]
pub struct AnalyticTables {
    /// Tabulated redshifts
    pub redshifts: Vec<f64>,
    /// Temperature where heating and cooling balance \[K\]
    pub equilibrium_temperature: f64,
    /// Amplitude of the hydrogen-helium rate at redshift zero \[erg cm^3 s^-1\]
    pub h_plus_he_amplitude: f64,
    /// Amplitude of each metal's rate at solar abundance \[erg cm^3 s^-1\]
    pub metal_amplitude: f64,
    /// Electron abundance of fully ionised gas
    pub electron_abundance: f64,
    /// Mean molecular weight
    pub mu: f64,
    /// Number of temperature grid points between 10 and 10^9.5 K
    pub n_temperature: usize,
}

impl Default for AnalyticTables {
    fn default() -> Self {
        AnalyticTables {
            redshifts: linspace(0., 8., 9),
            equilibrium_temperature: 1e4,
            h_plus_he_amplitude: 1e-23,
            metal_amplitude: 2e-24,
            electron_abundance: 1.2,
            mu: 0.6,
            n_temperature: 171,
        }
    }
}

impl AnalyticTables {
    /// log10 of the temperature belonging to a specific internal energy of 1 erg/g
    pub fn log_temperature_offset(&self) -> f64 {
        (2. / 3. * self.mu * PROTON_MASS / BOLTZMANN_K).log10()
    }

    /// Shape of all channels, normalised to zero at equilibrium
    pub fn profile(&self, temperature: f64) -> f64 {
        1. - (temperature / self.equilibrium_temperature).sqrt()
    }

    /// Hydrogen-helium net heating at a redshift and temperature
    pub fn h_plus_he_heating(&self, redshift: f64, temperature: f64) -> f64 {
        self.h_plus_he_amplitude * (1. + 0.1 * redshift) * self.profile(temperature)
    }

    /// Electron abundance of the hydrogen-helium plasma
    pub fn h_plus_he_electron_abundance(&self, temperature: f64) -> f64 {
        self.electron_abundance * temperature / (temperature + self.equilibrium_temperature)
    }

    /// Electron abundance of the solar mixture, slightly above the primordial one
    pub fn solar_electron_abundance(&self, temperature: f64) -> f64 {
        1.05 * self.h_plus_he_electron_abundance(temperature)
    }

    /// Net heating of metal column `metal` at solar abundance. Heavier elements have larger
    /// amplitudes.
    pub fn metal_heating(&self, metal: usize, temperature: f64) -> f64 {
        self.metal_amplitude * (metal + 1) as f64 / TableElement::METALS as f64
            * self.profile(temperature)
    }

    fn tables_at(&self, grids: &TableGrids, redshifts: &[f64]) -> RateTables {
        let slices = redshifts.len();
        let n_h = grids.log_n_h().len();
        let he = grids.he_frac().len();
        let log_t = grids.log_temperature();
        let log_u = grids.log_internal_energy();
        let t = |idx: usize| 10f64.powf(log_t[idx]);
        let offset = self.log_temperature_offset();

        RateTables {
            h_plus_he_heating: Array4::from_shape_fn((slices, n_h, he, log_t.len()), |(z, _, _, i)| {
                self.h_plus_he_heating(redshifts[z], t(i))
            }),
            h_plus_he_electron_abundance: Array4::from_shape_fn(
                (slices, n_h, he, log_t.len()),
                |(_, _, _, i)| self.h_plus_he_electron_abundance(t(i)),
            ),
            temperature: Array4::from_shape_fn((slices, n_h, he, log_u.len()), |(_, _, _, i)| {
                log_u[i] + offset
            }),
            electron_abundance: Array3::from_shape_fn((slices, n_h, log_t.len()), |(_, _, i)| {
                self.solar_electron_abundance(t(i))
            }),
            metal_heating: Array4::from_shape_fn(
                (slices, n_h, log_t.len(), TableElement::METALS),
                |(_, _, i, metal)| self.metal_heating(metal, t(i)),
            ),
        }
    }
}

impl TableLoader for AnalyticTables {
    fn grids(&mut self) -> Result<TableGrids, TableError> {
        let offset = self.log_temperature_offset();

        TableGrids::new(
            self.redshifts.clone(),
            linspace(-8., 2., 11),
            linspace(0.2, 0.3, 3),
            linspace(1., 9.5, self.n_temperature),
            // Covers the same temperature range as the temperature grid
            linspace(1. - offset, 9.5 - offset, self.n_temperature),
            SOLAR_ABUNDANCES,
        )
    }

    fn high_redshift(&mut self, grids: &TableGrids) -> Result<RateTables, TableError> {
        Ok(self.tables_at(grids, &[grids.max_redshift()]))
    }

    fn redshift_slices(
        &mut self,
        grids: &TableGrids,
        index: usize,
    ) -> Result<RateTables, TableError> {
        Ok(self.tables_at(grids, &grids.redshifts()[index..index + 2]))
    }
}
