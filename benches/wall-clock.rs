use eagle_cooling::abundance::{AbundanceRatios, ChemistryElement};
use eagle_cooling::constants::{compton_coefficient, T_CMB_0};
use eagle_cooling::rate::{CoolingRate, RateEvaluator};
use eagle_cooling::tables::analytic::AnalyticTables;
use eagle_cooling::tables::CoolingTables;
use eagle_cooling::{
    CoolingData, CoolingParameters, CoolingXPart, Cosmology, HydroProperties,
    ParticleCoolingInput, UnitSystem,
};
use tango_bench::{benchmark_fn, tango_benchmarks, tango_main, IntoBenchmarks};

const HYDRO: HydroProperties = HydroProperties {
    minimal_internal_energy: 1e9,
};

pub fn cooling(redshift: f64, newton: bool) -> (CoolingData, AnalyticTables) {
    let mut tables = AnalyticTables::default();
    let params = CoolingParameters {
        newton_integration: newton,
        ..Default::default()
    };
    let data = CoolingData::new(params, UnitSystem::cgs(), &mut tables, redshift)
        .expect("analytic tables are valid");

    (data, tables)
}

pub fn particle(tables: &AnalyticTables, temperature: f64) -> ParticleCoolingInput {
    let mut fractions = [0.; ChemistryElement::COUNT];
    fractions[ChemistryElement::H as usize] = 0.70;
    fractions[ChemistryElement::He as usize] = 0.28;
    fractions[ChemistryElement::O as usize] = 0.01;
    fractions[ChemistryElement::Fe as usize] = 0.01;

    ParticleCoolingInput {
        id: 0,
        mass: 1.,
        density: 1e-25,
        metal_mass_fractions: fractions,
        u_start: temperature * 10f64.powf(-tables.log_temperature_offset()),
        hydro_du_dt: 0.,
    }
}

fn evaluator(tables: &CoolingTables, redshift: f64) -> RateEvaluator<'_> {
    RateEvaluator::new(
        tables,
        1e-2,
        0.25,
        AbundanceRatios([1.; 11]),
        redshift,
        compton_coefficient() * T_CMB_0.powi(4),
    )
}

fn tables_at(redshift: f64) -> (CoolingTables, f64) {
    let mut loader = AnalyticTables::default();
    let tables =
        CoolingTables::load(&mut loader, redshift, 11.5).expect("analytic tables are valid");
    let log_u = (6. - loader.log_temperature_offset()) * std::f64::consts::LN_10;

    (tables, log_u)
}

fn rate_benchmark() -> impl IntoBenchmarks {
    [
        benchmark_fn("net_rate", |b| {
            let (tables, log_u) = tables_at(0.5);
            b.iter(move || evaluator(&tables, 0.5).net_rate(log_u, false))
        }),
        benchmark_fn("net_rate_derivative", |b| {
            let (tables, log_u) = tables_at(0.5);
            b.iter(move || evaluator(&tables, 0.5).net_rate(log_u, true))
        }),
        benchmark_fn("net_rate_high_redshift", |b| {
            let (tables, log_u) = tables_at(10.);
            b.iter(move || evaluator(&tables, 10.).net_rate(log_u, false))
        }),
    ]
}

fn cool_part_benchmark() -> impl IntoBenchmarks {
    [
        benchmark_fn("cool_part_explicit", |b| {
            let (data, tables) = cooling(0., false);
            let part = particle(&tables, 1e6);
            b.iter(move || {
                data.cool_part(
                    &part,
                    &mut CoolingXPart::default(),
                    &Cosmology::non_cosmological(),
                    &HYDRO,
                    1e11,
                    1e11,
                )
            })
        }),
        benchmark_fn("cool_part_bisection", |b| {
            let (data, tables) = cooling(0., false);
            let part = particle(&tables, 1e6);
            b.iter(move || {
                data.cool_part(
                    &part,
                    &mut CoolingXPart::default(),
                    &Cosmology::non_cosmological(),
                    &HYDRO,
                    1e16,
                    1e16,
                )
            })
        }),
        benchmark_fn("cool_part_newton", |b| {
            let (data, tables) = cooling(0., true);
            let part = particle(&tables, 1e6);
            b.iter(move || {
                data.cool_part(
                    &part,
                    &mut CoolingXPart::default(),
                    &Cosmology::non_cosmological(),
                    &HYDRO,
                    1e16,
                    1e16,
                )
            })
        }),
    ]
}

tango_benchmarks!(rate_benchmark(), cool_part_benchmark());
tango_main!();
