//! Physical constants in CGS units

/// Proton mass \[g\]
pub const PROTON_MASS: f64 = 1.672_621_923_69e-24;
/// Electron mass \[g\]
pub const ELECTRON_MASS: f64 = 9.109_383_701_5e-28;
/// Boltzmann constant \[erg/K\]
pub const BOLTZMANN_K: f64 = 1.380_649e-16;
/// Speed of light \[cm/s\]
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e10;
/// Stefan-Boltzmann constant \[erg/(cm^2 s K^4)\]
pub const STEFAN_BOLTZMANN: f64 = 5.670_374_419e-5;
/// Thomson cross section \[cm^2\]
pub const THOMSON_CROSS_SECTION: f64 = 6.652_458_732_1e-25;
/// Electron volt \[erg\]
pub const ELECTRON_VOLT: f64 = 1.602_176_634e-12;
/// CMB temperature today \[K\]
pub const T_CMB_0: f64 = 2.7255;

/// Prefactor of the inverse Compton cooling rate, `4 a σ_T k_B / (m_e c)` with `a = 4σ/c`.
/// Close to 1.0178e-37 \[g cm^2 s^-3 K^-5\]
pub fn compton_coefficient() -> f64 {
    let radiation_constant = 4. * STEFAN_BOLTZMANN / SPEED_OF_LIGHT;

    4. * radiation_constant * THOMSON_CROSS_SECTION * BOLTZMANN_K / (ELECTRON_MASS * SPEED_OF_LIGHT)
}
