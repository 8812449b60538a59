//! Run-time configuration of the cooling model

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can be returned when reading or validating the cooling parameters
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ParameterError {
    /// Failed to read the parameter file.
    #[error("Could not read `{0}`")]
    Read(PathBuf, #[source] std::io::Error),
    /// The parameter file is not valid TOML or misses required keys.
    #[error("Could not parse cooling parameters")]
    Parse(#[from] toml::de::Error),
    /// A parameter is outside its physical range.
    ///
    /// The first parameter is the name of the offending option, the second its value.
    #[error("Parameter `{0}` has invalid value {1}")]
    OutOfRange(&'static str, f64),
}

/// Options recognised by the cooling model, as read from the `[cooling]` table of a parameter
/// file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoolingParameters {
    /// Directory holding the redshift-sliced cooling tables. Only the table loader interprets it.
    pub table_path: PathBuf,
    /// Redshift of hydrogen reionisation. Above it inverse Compton cooling is added by hand and
    /// the high-redshift table is used.
    pub reionisation_redshift: f64,
    /// Calcium to silicon mass ratio of the solar mixture, used to infer the calcium abundance
    pub calcium_over_silicon: f64,
    /// Sulphur to silicon mass ratio of the solar mixture, used to infer the sulphur abundance
    pub sulphur_over_silicon: f64,
    /// Centre of the Gaussian helium reionisation history
    pub he_reion_z_center: f64,
    /// Width of the Gaussian helium reionisation history
    pub he_reion_z_sigma: f64,
    /// Energy injected by helium reionisation \[eV per hydrogen atom\]
    pub he_reion_ev_per_h: f64,
    /// Try Newton-Raphson before falling back to bisection
    #[serde(default)]
    pub newton_integration: bool,
}

#[derive(Deserialize)]
struct ParameterFile {
    cooling: CoolingParameters,
}

impl Default for CoolingParameters {
    fn default() -> Self {
        // EAGLE reference model
        CoolingParameters {
            table_path: PathBuf::from("./coolingtables/"),
            reionisation_redshift: 11.5,
            calcium_over_silicon: 0.0941736,
            sulphur_over_silicon: 0.6054160,
            he_reion_z_center: 3.5,
            he_reion_z_sigma: 0.5,
            he_reion_ev_per_h: 2.0,
            newton_integration: false,
        }
    }
}

impl CoolingParameters {
    /// Parse the `[cooling]` table of a TOML document and validate it
    pub fn from_toml(input: &str) -> Result<Self, ParameterError> {
        let file: ParameterFile = toml::from_str(input)?;
        file.cooling.validate()?;

        Ok(file.cooling)
    }

    /// Read and validate a TOML parameter file
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self, ParameterError> {
        let input = std::fs::read_to_string(file.as_ref())
            .map_err(|err| ParameterError::Read(file.as_ref().to_owned(), err))?;

        Self::from_toml(&input)
    }

    /// Check that all options are physically meaningful
    pub fn validate(&self) -> Result<(), ParameterError> {
        let positive = [
            ("he_reion_z_sigma", self.he_reion_z_sigma),
            ("reionisation_redshift", self.reionisation_redshift),
        ];
        let non_negative = [
            ("calcium_over_silicon", self.calcium_over_silicon),
            ("sulphur_over_silicon", self.sulphur_over_silicon),
            ("he_reion_ev_per_h", self.he_reion_ev_per_h),
        ];

        for (name, value) in positive {
            if !(value > 0. && value.is_finite()) {
                return Err(ParameterError::OutOfRange(name, value));
            }
        }

        for (name, value) in non_negative {
            if !(value >= 0. && value.is_finite()) {
                return Err(ParameterError::OutOfRange(name, value));
            }
        }

        if !self.he_reion_z_center.is_finite() {
            return Err(ParameterError::OutOfRange(
                "he_reion_z_center",
                self.he_reion_z_center,
            ));
        }

        Ok(())
    }
}

/// Internal unit system, given as the CGS value of one internal unit of mass, length and time
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UnitSystem {
    /// \[g\]
    pub mass: f64,
    /// \[cm\]
    pub length: f64,
    /// \[s\]
    pub time: f64,
}

impl UnitSystem {
    /// Internal units are CGS
    pub fn cgs() -> Self {
        UnitSystem {
            mass: 1.,
            length: 1.,
            time: 1.,
        }
    }

    /// Conversion factor of specific energy to erg/g
    pub fn internal_energy(&self) -> f64 {
        (self.length / self.time).powi(2)
    }

    /// Conversion factor of mass density to g/cm^3
    pub fn density(&self) -> f64 {
        self.mass / self.length.powi(3)
    }

    pub(crate) fn validate(&self) -> Result<(), ParameterError> {
        for (name, value) in [
            ("units.mass", self.mass),
            ("units.length", self.length),
            ("units.time", self.time),
        ] {
            if !(value > 0. && value.is_finite()) {
                return Err(ParameterError::OutOfRange(name, value));
            }
        }

        Ok(())
    }
}

/// Properties of the hydro scheme the cooling needs to respect
#[derive(Debug, Clone, Copy)]
pub struct HydroProperties {
    /// Floor on the specific internal energy, in internal units
    pub minimal_internal_energy: f64,
}

/// The cosmological background at the current step
#[derive(Debug, Clone, Copy)]
pub struct Cosmology {
    /// Current redshift
    pub redshift: f64,
    /// Hubble rate at the current redshift, in inverse internal time units
    pub hubble: f64,
}

impl Cosmology {
    /// A static, non-expanding background at redshift zero
    pub fn non_cosmological() -> Self {
        Cosmology {
            redshift: 0.,
            hubble: 0.,
        }
    }

    /// Decrease in redshift over a step of `dt` internal time units, `dz = (1 + z) H dt`
    pub fn delta_redshift(&self, dt: f64) -> f64 {
        (1. + self.redshift) * self.hubble * dt
    }
}

#[cfg(test)]
mod tests {
    use super::{CoolingParameters, ParameterError};

    const PARAMS: &str = r#"
        [cooling]
        table_path = "/data/coolingtables/"
        reionisation_redshift = 8.989
        calcium_over_silicon = 0.0941736
        sulphur_over_silicon = 0.6054160
        he_reion_z_center = 3.5
        he_reion_z_sigma = 0.5
        he_reion_ev_per_h = 2.0
    "#;

    #[test]
    fn newton_defaults_to_off() {
        let params = CoolingParameters::from_toml(PARAMS).unwrap();

        assert!(!params.newton_integration);
        assert_eq!(params.reionisation_redshift, 8.989);
    }

    #[test]
    fn newton_can_be_enabled() {
        let params =
            CoolingParameters::from_toml(&format!("{PARAMS}newton_integration = true\n")).unwrap();

        assert!(params.newton_integration);
    }

    #[test]
    fn rejects_zero_width_reionisation() {
        let input = PARAMS.replace("he_reion_z_sigma = 0.5", "he_reion_z_sigma = 0.0");

        assert!(matches!(
            CoolingParameters::from_toml(&input),
            Err(ParameterError::OutOfRange("he_reion_z_sigma", _))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        let input = format!("{PARAMS}newton_flag = 1\n");

        assert!(matches!(
            CoolingParameters::from_toml(&input),
            Err(ParameterError::Parse(_))
        ));
    }
}
