//! EAGLE radiative cooling
//!
//! Tabulated net cooling rates of gas with arbitrary metal content, and an integrator for the
//! resulting stiff energy equation over a hydrodynamical time-step.
#![warn(missing_docs)]

pub mod abundance;
pub mod bracket;
pub mod constants;
pub mod cooling;
pub mod integrator;
pub mod params;
pub mod rate;
pub mod tables;

pub use cooling::{CoolingData, CoolingError, CoolingResult, CoolingXPart, ParticleCoolingInput};
pub use params::{CoolingParameters, Cosmology, HydroProperties, UnitSystem};
