//! Cooling of gas particles over a time-step
//!
//! [CoolingData] holds everything that is shared between particles: parameters, unit conversions
//! and the cooling tables at the current redshift. Particles only ever borrow it immutably, so
//! any number of them can be cooled in parallel. Moving to a new redshift requires a mutable
//! borrow and therefore cannot overlap with cooling.

use std::f64::consts::SQRT_2;
use std::fmt::Display;

use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::abundance::{AbundanceRatios, ChemistryElement, ElementMassFractions};
use crate::constants::{compton_coefficient, ELECTRON_VOLT, PROTON_MASS, T_CMB_0};
use crate::integrator::{solve, ImplicitEquation, Integration, IntegrationFailure};
use crate::params::{CoolingParameters, Cosmology, HydroProperties, ParameterError, UnitSystem};
use crate::rate::{ContributionSink, NetRate, RateEvaluator};
use crate::tables::{CoolingTables, RedshiftBracket, TableError, TableLoader};

/// Safety margin on the energy floor of the drift prediction
const ROUNDING_TOLERANCE: f64 = 1e-4;

/// Errors when setting up or updating the cooling model
#[derive(Error, Debug)]
pub enum CoolingError {
    /// The cooling tables are malformed or could not be loaded
    #[error("Invalid cooling tables")]
    Table(#[from] TableError),
    /// The parameters are invalid
    #[error("Invalid cooling parameters")]
    Parameter(#[from] ParameterError),
}

/// The state of a gas particle the cooling needs. All quantities are physical, in internal
/// units.
#[derive(Debug, Clone, Copy)]
pub struct ParticleCoolingInput {
    /// Identifier, only used in diagnostics
    pub id: u64,
    /// Mass
    pub mass: f64,
    /// Density
    pub density: f64,
    /// Smoothed mass fractions of the tracked elements
    pub metal_mass_fractions: ElementMassFractions,
    /// Specific internal energy at the last kick
    pub u_start: f64,
    /// Rate of change of the specific internal energy due to hydrodynamics
    pub hydro_du_dt: f64,
}

/// Cooling data that persists on a particle between steps
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoolingXPart {
    radiated_energy: f64,
}

impl CoolingXPart {
    /// Total energy radiated by the particle so far, in internal units
    pub fn radiated_energy(&self) -> f64 {
        self.radiated_energy
    }
}

/// Outcome of cooling a particle over one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoolingResult {
    /// Rate of change of the specific internal energy due to cooling. Negative when the gas
    /// loses energy.
    pub du_dt: f64,
    /// Energy radiated away during the step, added to the particle's running total
    pub radiated_energy: f64,
}

/// The solution of the implicit equation for one particle, before limiting
#[derive(Debug, Clone, Copy)]
pub struct EnergyIntegration {
    /// Predicted energy at the end of the step without cooling, after the floor, in internal
    /// units
    pub u_0: f64,
    /// The solver's answer, in CGS
    pub outcome: Result<Integration, IntegrationFailure>,
}

/// Limit an energy change so that neither the next kick nor the drift prediction, each over up
/// to twice the current step, can leave the allowed range.
///
/// The end of the next half kick, plus a full kick, may not go below `u_min`. The drift
/// prediction, an extra step further, may not go negative.
pub fn limit_energy_change(u_start: f64, mut delta_u: f64, u_min: f64) -> f64 {
    if u_start + 1.5 * delta_u < u_min {
        delta_u = (u_min - u_start) / 1.5;
    }

    if u_start + 2.5 * delta_u < 0. {
        delta_u = -u_start / (2.5 + ROUNDING_TOLERANCE);
    }

    delta_u
}

/// Shared state of the EAGLE cooling model
#[derive(Debug)]
pub struct CoolingData {
    params: CoolingParameters,
    tables: CoolingTables,
    internal_energy_scale: f64,
    density_scale: f64,
    time_scale: f64,
    compton_rate: f64,
    he_reion_erg_per_g: f64,
}

impl CoolingData {
    /// Validate the parameters and read the tables for `redshift`
    pub fn new(
        params: CoolingParameters,
        units: UnitSystem,
        loader: &mut impl TableLoader,
        redshift: f64,
    ) -> Result<Self, CoolingError> {
        params.validate()?;
        units.validate()?;

        let tables = CoolingTables::load(loader, redshift, params.reionisation_redshift)?;

        Ok(CoolingData {
            internal_energy_scale: units.internal_energy(),
            density_scale: units.density(),
            time_scale: units.time,
            compton_rate: compton_coefficient() * T_CMB_0.powi(4),
            he_reion_erg_per_g: params.he_reion_ev_per_h * ELECTRON_VOLT / PROTON_MASS,
            params,
            tables,
        })
    }

    /// Move to `redshift`, reading new table slices if needed. Must be called between steps,
    /// while no particle is being cooled.
    pub fn update(
        &mut self,
        loader: &mut impl TableLoader,
        redshift: f64,
    ) -> Result<RedshiftBracket, CoolingError> {
        Ok(self
            .tables
            .update(loader, redshift, self.params.reionisation_redshift)?)
    }

    /// The run-time parameters
    pub fn parameters(&self) -> &CoolingParameters {
        &self.params
    }

    /// The tables at the current redshift
    pub fn tables(&self) -> &CoolingTables {
        &self.tables
    }

    /// Cooling does not limit the time-step
    pub fn timestep(&self) -> f64 {
        f64::MAX
    }

    /// Energy injected by helium reionisation over a step of `dt` internal time units \[erg/g\].
    ///
    /// Reionisation is modelled as a Gaussian in redshift, so this is the energy per unit mass
    /// times the fraction of the Gaussian's integral crossed during the step. The window is
    /// `[z - Δz, z]`, ending at the current redshift, so it sits one step later than in EAGLE,
    /// which integrates over `[z, z + Δz]`.
    pub fn helium_reionisation_heat(&self, cosmology: &Cosmology, dt: f64) -> f64 {
        let z = cosmology.redshift;
        let dz = cosmology.delta_redshift(dt);
        let width = SQRT_2 * self.params.he_reion_z_sigma;
        let center = self.params.he_reion_z_center;

        self.he_reion_erg_per_g
            * (libm::erf((z - center) / width) - libm::erf((z - dz - center) / width))
            / 2.
    }

    fn rate_evaluator(
        &self,
        input: &ParticleCoolingInput,
        cosmology: &Cosmology,
    ) -> (RateEvaluator<'_>, f64) {
        let fractions = &input.metal_mass_fractions;
        let x_h = fractions[ChemistryElement::H as usize];
        let x_he = fractions[ChemistryElement::He as usize];

        let n_h = input.density * self.density_scale * x_h / PROTON_MASS;
        let ratefact = n_h * x_h / PROTON_MASS;

        let ratios = AbundanceRatios::to_solar(
            fractions,
            self.tables.grids().solar_abundances(),
            self.params.sulphur_over_silicon,
            self.params.calcium_over_silicon,
        );

        let rate = RateEvaluator::new(
            &self.tables,
            n_h,
            x_he / (x_h + x_he),
            ratios,
            cosmology.redshift,
            self.compton_rate,
        );

        (rate, ratefact)
    }

    /// Solve for the energy at the end of a step of `dt`, with the hydro change predicted over
    /// `dt_therm`. No limits are applied to the result.
    pub fn integrate(
        &self,
        input: &ParticleCoolingInput,
        cosmology: &Cosmology,
        hydro: &HydroProperties,
        dt: f64,
        dt_therm: f64,
    ) -> EnergyIntegration {
        let u_0 = (input.u_start + input.hydro_du_dt * dt_therm).max(hydro.minimal_internal_energy);

        let (rate, ratefact) = self.rate_evaluator(input, cosmology);
        let equation = ImplicitEquation::new(
            &rate,
            u_0 * self.internal_energy_scale,
            ratefact,
            dt * self.time_scale,
            self.helium_reionisation_heat(cosmology, dt),
        );

        EnergyIntegration {
            u_0,
            outcome: solve(&equation, self.params.newton_integration),
        }
    }

    /// Compute the cooling rate of a particle over a step of `dt`, and add the radiated energy to
    /// `xpart`. Returns `None` for a zero step, in which case nothing changes.
    ///
    /// `dt_therm` is the step over which the hydro energy change is predicted, which differs
    /// from `dt` in cosmological runs.
    pub fn cool_part(
        &self,
        input: &ParticleCoolingInput,
        xpart: &mut CoolingXPart,
        cosmology: &Cosmology,
        hydro: &HydroProperties,
        dt: f64,
        dt_therm: f64,
    ) -> Option<CoolingResult> {
        if dt == 0. {
            return None;
        }

        debug_assert!(
            input.hydro_du_dt.is_finite(),
            "hydro du/dt of particle {} is not finite",
            input.id
        );

        let EnergyIntegration { u_0, outcome } =
            self.integrate(input, cosmology, hydro, dt, dt_therm);

        let u_final = match outcome {
            Ok(Integration { u_final, .. }) if u_final.is_finite() => {
                u_final / self.internal_energy_scale
            }
            Ok(Integration { u_final, path, .. }) => {
                warn!(
                    id = input.id,
                    u_final,
                    ?path,
                    "cooling produced a non-finite energy, assuming no cooling"
                );
                u_0
            }
            Err(failure) => {
                warn!(
                    id = input.id,
                    reason = %failure.reason,
                    "cooling failed to converge, assuming no cooling"
                );
                u_0
            }
        };

        let delta_u = limit_energy_change(
            input.u_start,
            u_final - input.u_start,
            hydro.minimal_internal_energy,
        );

        let du_dt = delta_u / dt_therm;
        let radiated_energy = -input.mass * du_dt * dt;
        xpart.radiated_energy += radiated_energy;

        Some(CoolingResult {
            du_dt,
            radiated_energy,
        })
    }

    /// Cool a batch of particles in parallel, all with the same step. `xparts` must be as long
    /// as `parts`.
    pub fn cool_parts(
        &self,
        parts: &[ParticleCoolingInput],
        xparts: &mut [CoolingXPart],
        cosmology: &Cosmology,
        hydro: &HydroProperties,
        dt: f64,
        dt_therm: f64,
    ) -> Vec<Option<CoolingResult>> {
        assert_eq!(parts.len(), xparts.len());

        parts
            .par_iter()
            .zip(xparts.par_iter_mut())
            .map(|(part, xpart)| self.cool_part(part, xpart, cosmology, hydro, dt, dt_therm))
            .collect()
    }

    /// Net rate of a particle at its current energy, with every channel reported to `sink`
    pub fn element_contributions(
        &self,
        input: &ParticleCoolingInput,
        cosmology: &Cosmology,
        sink: &mut impl ContributionSink,
    ) -> NetRate {
        let (rate, _) = self.rate_evaluator(input, cosmology);

        rate.net_rate_with_contributions((input.u_start * self.internal_energy_scale).ln(), sink)
    }
}

impl Display for CoolingData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.params.newton_integration {
            "newton-raphson, bisection fallback"
        } else {
            "bisection"
        };

        write!(f, "Cooling function is 'EAGLE' ({scheme})")
    }
}
