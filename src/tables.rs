//! Cooling tables: grids, redshift brackets and lookups
//!
//! The tables are indexed by redshift, log10 hydrogen number density, helium fraction and log10
//! temperature (or log10 internal energy for the temperature table). Only two redshift slices are
//! kept in memory at once, bracketing the current redshift. Above the tabulated range a single
//! high-redshift table is used instead.

use itertools::Itertools;
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use thiserror::Error;
use tracing::info;

use crate::abundance::TableElement;

use self::interpolate::{interpolate_2d, interpolate_3d, interpolate_4d};

/// Errors that indicate malformed cooling tables. These are never recoverable.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TableError {
    /// A grid is not strictly increasing. The parameter is the name of the grid.
    #[error("Grid `{0}` is not strictly increasing")]
    NonMonotonicGrid(&'static str),
    /// A grid has fewer than two points, so no bin can be formed.
    #[error("Grid `{0}` has {1} points, at least 2 are needed")]
    GridTooShort(&'static str, usize),
    /// The shape of a table does not match the grids.
    #[error("Table `{table}` has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Name of the table
        table: &'static str,
        /// Shape implied by the grids
        expected: Vec<usize>,
        /// Shape of the table
        got: Vec<usize>,
    },
    /// A table or grid contains NaN or infinities.
    #[error("`{0}` contains non-finite values")]
    NonFinite(&'static str),
    /// A quantity that is divided by is zero or negative.
    #[error("`{0}` must be strictly positive")]
    NonPositive(&'static str),
    /// The loader failed to provide the slices starting at the given redshift index.
    #[error("Could not load cooling tables for redshift index {0}")]
    Load(
        usize,
        #[source] Box<dyn std::error::Error + Send + Sync + 'static>,
    ),
}

/// The axes of the cooling tables and the solar reference mixture
#[derive(Debug, Clone)]
pub struct TableGrids {
    redshifts: Box<[f64]>,
    log_n_h: Box<[f64]>,
    he_frac: Box<[f64]>,
    log_temperature: Box<[f64]>,
    log_internal_energy: Box<[f64]>,
    solar_abundances: [f64; TableElement::COUNT],
}

fn check_grid(name: &'static str, grid: &[f64]) -> Result<(), TableError> {
    if grid.len() < 2 {
        return Err(TableError::GridTooShort(name, grid.len()));
    }

    if grid.iter().any(|x| !x.is_finite()) {
        return Err(TableError::NonFinite(name));
    }

    if !grid.iter().tuple_windows().all(|(a, b)| b > a) {
        return Err(TableError::NonMonotonicGrid(name));
    }

    Ok(())
}

impl TableGrids {
    /// Validate and bundle the table axes.
    ///
    /// Temperatures, internal energies and densities are given as log10 of their CGS values.
    /// `solar_abundances` are mass fractions in table element order.
    pub fn new(
        redshifts: Vec<f64>,
        log_n_h: Vec<f64>,
        he_frac: Vec<f64>,
        log_temperature: Vec<f64>,
        log_internal_energy: Vec<f64>,
        solar_abundances: [f64; TableElement::COUNT],
    ) -> Result<Self, TableError> {
        check_grid("redshifts", &redshifts)?;
        check_grid("log_n_h", &log_n_h)?;
        check_grid("he_frac", &he_frac)?;
        check_grid("log_temperature", &log_temperature)?;
        check_grid("log_internal_energy", &log_internal_energy)?;

        if solar_abundances.iter().any(|&x| !(x > 0. && x.is_finite())) {
            return Err(TableError::NonPositive("solar_abundances"));
        }

        Ok(TableGrids {
            redshifts: redshifts.into(),
            log_n_h: log_n_h.into(),
            he_frac: he_frac.into(),
            log_temperature: log_temperature.into(),
            log_internal_energy: log_internal_energy.into(),
            solar_abundances,
        })
    }

    /// Tabulated redshifts
    pub fn redshifts(&self) -> &[f64] {
        &self.redshifts
    }

    /// log10 hydrogen number density \[cm^-3\]
    pub fn log_n_h(&self) -> &[f64] {
        &self.log_n_h
    }

    /// Helium mass fraction `X_He / (X_H + X_He)`
    pub fn he_frac(&self) -> &[f64] {
        &self.he_frac
    }

    /// log10 temperature \[K\]
    pub fn log_temperature(&self) -> &[f64] {
        &self.log_temperature
    }

    /// log10 specific internal energy \[erg/g\]
    pub fn log_internal_energy(&self) -> &[f64] {
        &self.log_internal_energy
    }

    /// Solar mass fractions in table element order
    pub fn solar_abundances(&self) -> &[f64; TableElement::COUNT] {
        &self.solar_abundances
    }

    /// Highest tabulated redshift
    pub fn max_redshift(&self) -> f64 {
        self.redshifts[self.redshifts.len() - 1]
    }
}

/// Tabulated rates for one or two redshift slices. The first axis of every table runs over the
/// slices.
#[derive(Debug, Clone)]
pub struct RateTables {
    /// Net heating by hydrogen and helium, `[slice, n_h, he_frac, temperature]`
    /// \[erg cm^3 s^-1\]
    pub h_plus_he_heating: Array4<f64>,
    /// Electron abundance `n_e / n_H` of the hydrogen-helium plasma,
    /// `[slice, n_h, he_frac, temperature]`
    pub h_plus_he_electron_abundance: Array4<f64>,
    /// log10 temperature, `[slice, n_h, he_frac, internal_energy]`
    pub temperature: Array4<f64>,
    /// Electron abundance of the solar mixture, `[slice, n_h, temperature]`
    pub electron_abundance: Array3<f64>,
    /// Net heating by each metal at solar abundance, `[slice, n_h, temperature, metal]`
    pub metal_heating: Array4<f64>,
}

impl RateTables {
    /// Check the shape of all tables against the grids, and that the tables can be divided by
    /// where needed.
    pub fn validate(&self, grids: &TableGrids, slices: usize) -> Result<(), TableError> {
        let n_h = grids.log_n_h.len();
        let he = grids.he_frac.len();
        let temp = grids.log_temperature.len();
        let u = grids.log_internal_energy.len();

        let shapes: [(&'static str, &[usize], Vec<usize>); 5] = [
            (
                "h_plus_he_heating",
                self.h_plus_he_heating.shape(),
                vec![slices, n_h, he, temp],
            ),
            (
                "h_plus_he_electron_abundance",
                self.h_plus_he_electron_abundance.shape(),
                vec![slices, n_h, he, temp],
            ),
            ("temperature", self.temperature.shape(), vec![slices, n_h, he, u]),
            (
                "electron_abundance",
                self.electron_abundance.shape(),
                vec![slices, n_h, temp],
            ),
            (
                "metal_heating",
                self.metal_heating.shape(),
                vec![slices, n_h, temp, TableElement::METALS],
            ),
        ];

        for (table, got, expected) in shapes {
            if got != expected.as_slice() {
                return Err(TableError::ShapeMismatch {
                    table,
                    expected,
                    got: got.to_vec(),
                });
            }
        }

        let finite = [
            ("h_plus_he_heating", self.h_plus_he_heating.iter()),
            (
                "h_plus_he_electron_abundance",
                self.h_plus_he_electron_abundance.iter(),
            ),
            ("temperature", self.temperature.iter()),
            ("metal_heating", self.metal_heating.iter()),
        ];

        for (table, mut values) in finite {
            if values.any(|x| !x.is_finite()) {
                return Err(TableError::NonFinite(table));
            }
        }

        if self
            .electron_abundance
            .iter()
            .any(|&x| !(x > 0. && x.is_finite()))
        {
            return Err(TableError::NonPositive("electron_abundance"));
        }

        Ok(())
    }
}

/// Position on a table axis: the lower grid point and the fractional offset towards the next one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisIndex {
    /// Index of the grid point at or below the value
    pub index: usize,
    /// Fractional distance to the next grid point, in `[0, 1]`
    pub offset: f64,
}

impl AxisIndex {
    /// Same bin, moved to the lower (`0.0`) or upper (`1.0`) grid point
    #[inline]
    pub fn at(self, offset: f64) -> AxisIndex {
        AxisIndex {
            index: self.index,
            offset,
        }
    }
}

/// Locate `x` on a strictly increasing grid. Values outside the grid are clamped to the first or
/// last bin.
pub fn index_1d(grid: &[f64], x: f64) -> AxisIndex {
    let n = grid.len();

    // Also catches NaN
    if !(x > grid[0]) {
        AxisIndex {
            index: 0,
            offset: 0.,
        }
    } else if x >= grid[n - 1] {
        AxisIndex {
            index: n - 2,
            offset: 1.,
        }
    } else {
        let index = grid.partition_point(|&g| g <= x) - 1;

        AxisIndex {
            index,
            offset: (x - grid[index]) / (grid[index + 1] - grid[index]),
        }
    }
}

/// Where the current redshift sits with respect to the tables
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RedshiftBracket {
    /// Between tabulated slices `index` and `index + 1`
    Interpolated {
        /// Lower slice
        index: usize,
        /// Fractional position towards the upper slice
        offset: f64,
    },
    /// Before hydrogen reionisation
    AboveReionisation,
    /// Above the highest tabulated redshift, but after reionisation
    AboveTable,
}

impl RedshiftBracket {
    /// Place `redshift` on the table's redshift grid
    pub fn resolve(redshift: f64, reionisation_redshift: f64, grids: &TableGrids) -> Self {
        if redshift > reionisation_redshift {
            RedshiftBracket::AboveReionisation
        } else if redshift > grids.max_redshift() {
            RedshiftBracket::AboveTable
        } else {
            let AxisIndex { index, offset } = index_1d(&grids.redshifts, redshift);
            RedshiftBracket::Interpolated { index, offset }
        }
    }

    /// Whether the single high-redshift table is used. Inverse Compton cooling is then not part
    /// of the tables and has to be added analytically.
    pub fn is_high_redshift(&self) -> bool {
        !matches!(self, RedshiftBracket::Interpolated { .. })
    }
}

/// Source of cooling tables, typically a reader of redshift-sliced files on disk
pub trait TableLoader {
    /// Read the table axes
    fn grids(&mut self) -> Result<TableGrids, TableError>;

    /// Read the table used above the highest tabulated redshift. Must contain one slice.
    fn high_redshift(&mut self, grids: &TableGrids) -> Result<RateTables, TableError>;

    /// Read the slices at redshift index `index` and `index + 1`
    fn redshift_slices(&mut self, grids: &TableGrids, index: usize)
        -> Result<RateTables, TableError>;
}

#[derive(Debug, Clone)]
enum ActiveSlices {
    HighRedshift(RedshiftBracket),
    Interpolated {
        index: usize,
        offset: f64,
        slices: RateTables,
    },
}

/// The table grids together with the slices in use at the current redshift
#[derive(Debug, Clone)]
pub struct CoolingTables {
    grids: TableGrids,
    high_z: RateTables,
    active: ActiveSlices,
}

impl CoolingTables {
    /// Read grids and the high-redshift table, then position at `redshift`
    pub fn load(
        loader: &mut impl TableLoader,
        redshift: f64,
        reionisation_redshift: f64,
    ) -> Result<Self, TableError> {
        let grids = loader.grids()?;
        let high_z = loader.high_redshift(&grids)?;
        high_z.validate(&grids, 1)?;

        let mut tables = CoolingTables {
            grids,
            high_z,
            active: ActiveSlices::HighRedshift(RedshiftBracket::AboveTable),
        };

        tables.update(loader, redshift, reionisation_redshift)?;

        Ok(tables)
    }

    /// Move to a new redshift, loading new slices from `loader` when leaving the current bracket
    pub fn update(
        &mut self,
        loader: &mut impl TableLoader,
        redshift: f64,
        reionisation_redshift: f64,
    ) -> Result<RedshiftBracket, TableError> {
        let bracket = RedshiftBracket::resolve(redshift, reionisation_redshift, &self.grids);

        match bracket {
            RedshiftBracket::Interpolated { index, offset } => {
                if let ActiveSlices::Interpolated {
                    index: loaded,
                    offset: current,
                    ..
                } = &mut self.active
                {
                    if *loaded == index {
                        *current = offset;
                        return Ok(bracket);
                    }
                }

                let slices = loader.redshift_slices(&self.grids, index)?;
                slices.validate(&self.grids, 2)?;

                info!(
                    index,
                    lower = self.grids.redshifts[index],
                    upper = self.grids.redshifts[index + 1],
                    "loaded cooling tables"
                );

                self.active = ActiveSlices::Interpolated {
                    index,
                    offset,
                    slices,
                };
            }
            sentinel => self.active = ActiveSlices::HighRedshift(sentinel),
        }

        Ok(bracket)
    }

    /// The axes of the tables
    pub fn grids(&self) -> &TableGrids {
        &self.grids
    }

    /// Current position in redshift
    pub fn bracket(&self) -> RedshiftBracket {
        match self.active {
            ActiveSlices::HighRedshift(bracket) => bracket,
            ActiveSlices::Interpolated { index, offset, .. } => {
                RedshiftBracket::Interpolated { index, offset }
            }
        }
    }

    fn sample_4d<'a>(
        &'a self,
        table: impl Fn(&'a RateTables) -> ArrayView4<'a, f64>,
        [i, j, k]: [usize; 3],
        [di, dj, dk]: [f64; 3],
    ) -> f64 {
        match &self.active {
            ActiveSlices::Interpolated { offset, slices, .. } => {
                interpolate_4d(table(slices), [0, i, j, k], [*offset, di, dj, dk])
            }
            ActiveSlices::HighRedshift(_) => interpolate_3d(
                table(&self.high_z).index_axis_move(Axis(0), 0),
                [i, j, k],
                [di, dj, dk],
            ),
        }
    }

    fn sample_3d<'a>(
        &'a self,
        table: impl Fn(&'a RateTables) -> ArrayView3<'a, f64>,
        [i, j]: [usize; 2],
        [di, dj]: [f64; 2],
    ) -> f64 {
        match &self.active {
            ActiveSlices::Interpolated { offset, slices, .. } => {
                interpolate_3d(table(slices), [0, i, j], [*offset, di, dj])
            }
            ActiveSlices::HighRedshift(_) => interpolate_2d(
                table(&self.high_z).index_axis_move(Axis(0), 0),
                [i, j],
                [di, dj],
            ),
        }
    }

    /// Net heating and electron abundance of the hydrogen-helium plasma
    pub(crate) fn h_plus_he(
        &self,
        n_h: AxisIndex,
        he: AxisIndex,
        temp: AxisIndex,
    ) -> (f64, f64) {
        let idx = [n_h.index, he.index, temp.index];
        let d = [n_h.offset, he.offset, temp.offset];

        (
            self.sample_4d(|t| t.h_plus_he_heating.view(), idx, d),
            self.sample_4d(|t| t.h_plus_he_electron_abundance.view(), idx, d),
        )
    }

    /// Electron abundance of the solar mixture
    pub(crate) fn solar_electron_abundance(&self, n_h: AxisIndex, temp: AxisIndex) -> f64 {
        self.sample_3d(
            |t| t.electron_abundance.view(),
            [n_h.index, temp.index],
            [n_h.offset, temp.offset],
        )
    }

    /// Net heating of metal column `metal` at solar abundance
    pub(crate) fn metal_heating(&self, n_h: AxisIndex, temp: AxisIndex, metal: usize) -> f64 {
        self.sample_3d(
            |t| t.metal_heating.index_axis(Axis(3), metal),
            [n_h.index, temp.index],
            [n_h.offset, temp.offset],
        )
    }

    /// Convert log10 internal energy to log10 temperature. When `derivative` is set, also return
    /// `dT/du` from the bracketing internal energy grid points.
    pub(crate) fn log_temperature(
        &self,
        log10_u: f64,
        n_h: AxisIndex,
        he: AxisIndex,
        derivative: bool,
    ) -> (f64, Option<f64>) {
        let grid = &self.grids.log_internal_energy;
        let u = index_1d(grid, log10_u);
        let at = |u: AxisIndex| {
            self.sample_4d(
                |t| t.temperature.view(),
                [n_h.index, he.index, u.index],
                [n_h.offset, he.offset, u.offset],
            )
        };

        let log_t = at(u);

        let dt_du = derivative.then(|| {
            let t_low = 10f64.powf(at(u.at(0.)));
            let t_high = 10f64.powf(at(u.at(1.)));
            let delta_u = 10f64.powf(grid[u.index + 1]) - 10f64.powf(grid[u.index]);

            (t_high - t_low) / delta_u
        });

        (log_t, dt_du)
    }
}

/// Multilinear interpolation on tables
pub mod interpolate;

/// Cooling tables generated from closed-form rates
pub mod analytic;

#[cfg(test)]
mod tests {
    use super::{index_1d, AxisIndex, RedshiftBracket, TableError, TableGrids};

    fn grids() -> TableGrids {
        TableGrids::new(
            vec![0., 1., 2., 3.],
            vec![-4., -2., 0.],
            vec![0.2, 0.3],
            vec![2., 4., 6., 8.],
            vec![10., 12., 14., 16.],
            [1.; 11],
        )
        .unwrap()
    }

    #[test]
    fn index_inside_grid() {
        let idx = index_1d(&[0., 1., 3., 7.], 2.);

        assert_eq!(idx.index, 1);
        assert!((idx.offset - 0.5).abs() < 1e-15);
    }

    #[test]
    fn index_on_grid_point() {
        assert_eq!(
            index_1d(&[0., 1., 3., 7.], 3.),
            AxisIndex {
                index: 2,
                offset: 0.
            }
        );
    }

    #[test]
    fn index_clamps_outside_grid() {
        let grid = [0., 1., 3., 7.];

        assert_eq!(
            index_1d(&grid, -5.),
            AxisIndex {
                index: 0,
                offset: 0.
            }
        );
        assert_eq!(
            index_1d(&grid, 9.),
            AxisIndex {
                index: 2,
                offset: 1.
            }
        );
        assert_eq!(index_1d(&grid, f64::NAN).index, 0);
    }

    #[test]
    fn redshift_brackets() {
        let grids = grids();

        assert_eq!(
            RedshiftBracket::resolve(12., 11.5, &grids),
            RedshiftBracket::AboveReionisation
        );
        assert_eq!(
            RedshiftBracket::resolve(5., 11.5, &grids),
            RedshiftBracket::AboveTable
        );
        assert_eq!(
            RedshiftBracket::resolve(1.25, 11.5, &grids),
            RedshiftBracket::Interpolated {
                index: 1,
                offset: 0.25
            }
        );
        assert!(RedshiftBracket::AboveTable.is_high_redshift());
        assert!(!RedshiftBracket::resolve(0., 11.5, &grids).is_high_redshift());
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        let flat_bin = TableGrids::new(
            vec![0., 1.],
            vec![-4., 0.],
            vec![0.2, 0.3],
            vec![2., 4., 4., 8.],
            vec![10., 12.],
            [1.; 11],
        );
        assert!(matches!(
            flat_bin,
            Err(TableError::NonMonotonicGrid("log_temperature"))
        ));

        let single = TableGrids::new(
            vec![0.],
            vec![-4., 0.],
            vec![0.2, 0.3],
            vec![2., 4.],
            vec![10., 12.],
            [1.; 11],
        );
        assert!(matches!(single, Err(TableError::GridTooShort("redshifts", 1))));

        let mut solar = [1.; 11];
        solar[3] = 0.;
        let no_nitrogen = TableGrids::new(
            vec![0., 1.],
            vec![-4., 0.],
            vec![0.2, 0.3],
            vec![2., 4.],
            vec![10., 12.],
            solar,
        );
        assert!(matches!(
            no_nitrogen,
            Err(TableError::NonPositive("solar_abundances"))
        ));
    }
}
