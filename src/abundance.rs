//! Element bookkeeping and abundances relative to the solar mixture
//!
//! The chemistry tracks nine elements, while the cooling tables list eleven. Sulphur and calcium
//! are not tracked and are inferred from silicon, and iron sits at the end of the table list.

/// Elements tracked by the chemistry, in the order of [ElementMassFractions]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ChemistryElement {
    H,
    He,
    C,
    N,
    O,
    Ne,
    Mg,
    Si,
    Fe,
}

impl ChemistryElement {
    /// Number of tracked elements
    pub const COUNT: usize = 9;
}

/// Elements of the cooling tables, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TableElement {
    H,
    He,
    C,
    N,
    O,
    Ne,
    Mg,
    Si,
    S,
    Ca,
    Fe,
}

impl TableElement {
    /// Number of elements in the tables, including hydrogen and helium
    pub const COUNT: usize = ChemistryElement::COUNT + 2;
    /// Number of metals with their own cooling table
    pub const METALS: usize = Self::COUNT - 2;

    /// All table elements, in table order
    pub const ALL: [TableElement; Self::COUNT] = [
        TableElement::H,
        TableElement::He,
        TableElement::C,
        TableElement::N,
        TableElement::O,
        TableElement::Ne,
        TableElement::Mg,
        TableElement::Si,
        TableElement::S,
        TableElement::Ca,
        TableElement::Fe,
    ];

    /// The metal belonging to column `idx` of the metal cooling table
    pub fn metal(idx: usize) -> TableElement {
        Self::ALL[idx + 2]
    }
}

/// Mass fractions of the tracked elements
pub type ElementMassFractions = [f64; ChemistryElement::COUNT];

/// Ratio of particle to solar abundance for every element of the cooling tables, in table order
#[derive(Debug, Clone, Copy)]
pub struct AbundanceRatios(pub [f64; TableElement::COUNT]);

impl AbundanceRatios {
    /// Divide the particle's mass fractions by the solar ones. Sulphur and calcium follow silicon
    /// with the given solar mass ratios.
    pub fn to_solar(
        fractions: &ElementMassFractions,
        solar: &[f64; TableElement::COUNT],
        sulphur_over_silicon: f64,
        calcium_over_silicon: f64,
    ) -> Self {
        use ChemistryElement as C;
        use TableElement as T;

        let x = |elem: C| fractions[elem as usize];
        let mut ratios = [0.; TableElement::COUNT];

        for (chem, table) in [
            (C::H, T::H),
            (C::He, T::He),
            (C::C, T::C),
            (C::N, T::N),
            (C::O, T::O),
            (C::Ne, T::Ne),
            (C::Mg, T::Mg),
            (C::Si, T::Si),
            (C::Fe, T::Fe),
        ] {
            ratios[table as usize] = x(chem) / solar[table as usize];
        }

        ratios[T::S as usize] = x(C::Si) * sulphur_over_silicon / solar[T::S as usize];
        ratios[T::Ca as usize] = x(C::Si) * calcium_over_silicon / solar[T::Ca as usize];

        AbundanceRatios(ratios)
    }

    /// Ratio for the metal in column `idx` of the metal cooling table
    #[inline]
    pub fn metal(&self, idx: usize) -> f64 {
        self.0[idx + 2]
    }
}

#[cfg(test)]
mod tests {
    use super::{AbundanceRatios, ChemistryElement, TableElement};

    #[test]
    fn iron_sulphur_and_calcium_land_in_table_order() {
        let solar = [
            0.70, 0.28, 2.4e-3, 7.0e-4, 5.7e-3, 1.2e-3, 7.1e-4, 6.6e-4, 3.1e-4, 6.4e-5, 1.3e-3,
        ];
        let mut fractions = [0.; ChemistryElement::COUNT];
        fractions[ChemistryElement::H as usize] = 0.70;
        fractions[ChemistryElement::Si as usize] = 2. * 6.6e-4;
        fractions[ChemistryElement::Fe as usize] = 0.5 * 1.3e-3;

        let ratios = AbundanceRatios::to_solar(&fractions, &solar, 0.6, 0.1);

        assert!((ratios.0[TableElement::H as usize] - 1.).abs() < 1e-12);
        assert!((ratios.0[TableElement::Si as usize] - 2.).abs() < 1e-12);
        assert!((ratios.0[TableElement::Fe as usize] - 0.5).abs() < 1e-12);
        assert!((ratios.0[TableElement::S as usize] - 2. * 6.6e-4 * 0.6 / 3.1e-4).abs() < 1e-12);
        assert!((ratios.0[TableElement::Ca as usize] - 2. * 6.6e-4 * 0.1 / 6.4e-5).abs() < 1e-12);
        assert_eq!(ratios.0[TableElement::C as usize], 0.);
    }

    #[test]
    fn metal_columns_skip_hydrogen_and_helium() {
        assert_eq!(TableElement::metal(0), TableElement::C);
        assert_eq!(TableElement::metal(TableElement::METALS - 1), TableElement::Fe);
    }
}
