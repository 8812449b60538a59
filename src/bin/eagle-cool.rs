use std::io::{self, BufRead};
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use eagle_cooling::abundance::{ChemistryElement, ElementMassFractions, TableElement};
use eagle_cooling::integrator::IntegrationScheme;
use eagle_cooling::tables::analytic::{AnalyticTables, SOLAR_ABUNDANCES};
use eagle_cooling::{
    CoolingData, CoolingParameters, CoolingXPart, Cosmology, HydroProperties,
    ParticleCoolingInput, UnitSystem,
};

/// Cool gas particles with the EAGLE model on analytic tables.
///
/// Reads commands from standard input, separated by newlines or `;`:
///
///   redshift <z> <hubble [1/s]>
///   cool <T [K]> <density [g/cm^3]> <metallicity [solar]> <dt [s]>
///   rates <T [K]> <density [g/cm^3]> <metallicity [solar]>
#[derive(Parser)]
#[command(verbatim_doc_comment)]
struct Args {
    /// TOML file with a `[cooling]` table, EAGLE defaults otherwise
    #[arg(long)]
    params: Option<PathBuf>,
    /// Integration scheme for stiff steps, overrides the parameter file
    #[arg(long, value_enum)]
    scheme: Option<IntegrationScheme>,
    /// Initial redshift
    #[arg(long, default_value_t = 0.)]
    redshift: f64,
    /// Internal energy floor [erg/g]
    #[arg(long, default_value_t = 0.)]
    u_min: f64,
}

fn mixture(metallicity: f64) -> ElementMassFractions {
    use ChemistryElement as C;
    use TableElement as T;

    let mut fractions = [0.; ChemistryElement::COUNT];

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
        let scale = if matches!(chem, C::H | C::He) {
            1.
        } else {
            metallicity
        };
        fractions[chem as usize] = scale * SOLAR_ABUNDANCES[table as usize];
    }

    fractions
}

fn particle(id: u64, args: &[&str], tables: &AnalyticTables) -> Result<ParticleCoolingInput> {
    if args.len() < 4 {
        return Err(eyre!("Expected temperature, density and metallicity"));
    }

    let temperature: f64 = args[1].parse().wrap_err("Invalid temperature")?;
    let density: f64 = args[2].parse().wrap_err("Invalid density")?;
    let metallicity: f64 = args[3].parse().wrap_err("Invalid metallicity")?;

    Ok(ParticleCoolingInput {
        id,
        mass: 1.,
        density,
        metal_mass_fractions: mixture(metallicity),
        u_start: temperature * 10f64.powf(-tables.log_temperature_offset()),
        hydro_du_dt: 0.,
    })
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut params = match &args.params {
        Some(file) => CoolingParameters::from_file(file)
            .wrap_err_with(|| format!("Failed to read {}", file.display()))?,
        None => CoolingParameters::default(),
    };
    if let Some(scheme) = args.scheme {
        params.newton_integration = scheme.newton_enabled();
    }

    let mut tables = AnalyticTables::default();
    let mut cooling = CoolingData::new(params, UnitSystem::cgs(), &mut tables, args.redshift)
        .wrap_err("Failed to set up cooling")?;
    let hydro = HydroProperties {
        minimal_internal_energy: args.u_min,
    };
    let mut cosmology = Cosmology {
        redshift: args.redshift,
        hubble: 0.,
    };

    eprintln!("{cooling}");

    let mut next_id = 0;

    for line in io::stdin().lock().lines() {
        let line = line?;

        for command in line.split(';') {
            let args: Vec<&str> = command.split_whitespace().collect();

            match args.first().copied() {
                None => continue,
                Some("redshift") => {
                    if args.len() < 3 {
                        return Err(eyre!("Expected redshift and Hubble rate"));
                    }

                    cosmology = Cosmology {
                        redshift: args[1].parse().wrap_err("Invalid redshift")?,
                        hubble: args[2].parse().wrap_err("Invalid Hubble rate")?,
                    };
                    let bracket = cooling.update(&mut tables, cosmology.redshift)?;

                    println!("redshift {} {bracket:?}", cosmology.redshift);
                }
                Some("cool") => {
                    let part = particle(next_id, &args, &tables)?;
                    let dt: f64 = args
                        .get(4)
                        .ok_or_else(|| eyre!("Expected time-step"))?
                        .parse()
                        .wrap_err("Invalid time-step")?;
                    next_id += 1;

                    let integration = cooling.integrate(&part, &cosmology, &hydro, dt, dt);
                    let mut xpart = CoolingXPart::default();
                    let Some(result) =
                        cooling.cool_part(&part, &mut xpart, &cosmology, &hydro, dt, dt)
                    else {
                        println!("{} no change", part.id);
                        continue;
                    };

                    match integration.outcome {
                        Ok(solution) => println!(
                            "{} u_0 {:e} u_final {:e} du_dt {:e} radiated {:e} path {:?} evaluations {}",
                            part.id,
                            integration.u_0,
                            solution.u_final,
                            result.du_dt,
                            result.radiated_energy,
                            solution.path,
                            solution.evaluations,
                        ),
                        Err(failure) => println!("{} failed: {failure}", part.id),
                    }
                }
                Some("rates") => {
                    let part = particle(next_id, &args, &tables)?;
                    next_id += 1;

                    let mut channels = Vec::new();
                    let total = cooling.element_contributions(&part, &cosmology, &mut channels);

                    for (channel, lambda) in channels {
                        println!("{} {channel:?} {lambda:e}", part.id);
                    }
                    println!(
                        "{} total {:e} derivative {:e}",
                        part.id,
                        total.lambda,
                        total.dlambda_du.unwrap_or(f64::NAN)
                    );
                }
                Some(arg) => return Err(eyre!("Unknown command '{arg}'")),
            }
        }
    }

    Ok(())
}
