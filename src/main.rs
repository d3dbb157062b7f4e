use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use factex::cli::{Cli, Command};
use factex::cohort::{Baseline, Cohort, CohortConfig};
use factex::effects::Effect;
use factex::factors::{
    Background, Boundaries, ContinuousBackground, Knowledge, Manipulation,
};
use factex::power::MinimalSizeExperiment;
use factex::study::{Study, StudyConfig};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Background variables of the demo study design.
fn demo_backgrounds() -> Result<Vec<Background>> {
    Ok(vec![
        Background::simulated(
            "prior computer experience",
            Knowledge::Known,
            Effect::Improvement(2.0 / 3.0),
            Effect::NoEffect,
            0.4,
        )?,
        Background::simulated(
            "works night shifts",
            Knowledge::Known,
            Effect::NoEffect,
            Effect::Deterioration(9.0 / 10.0),
            0.25,
        )?,
        // Hidden variance source; analysed by nothing, felt by everything.
        Background::simulated(
            "low motivation",
            Knowledge::Unknown,
            Effect::Deterioration(4.0 / 5.0),
            Effect::Deterioration(4.0 / 5.0),
            0.2,
        )?,
    ])
}

fn demo_continuous_backgrounds() -> Result<Vec<ContinuousBackground>> {
    Ok(vec![ContinuousBackground::simulated(
        "age",
        Arc::new(|rng: &mut StdRng| 20.0 + 45.0 * rng.gen::<f64>()),
        Arc::new(|competence, age| (competence - (age - 40.0) / 400.0).clamp(0.01, 0.99)),
        Arc::new(|competence, _age| competence),
    )?])
}

fn demo_manipulations() -> Result<Vec<Manipulation>> {
    Ok(vec![
        Manipulation::simulated("reminder messages", Effect::Improvement(4.0 / 5.0))?,
        Manipulation::simulated("shorter sessions", Effect::Improvement(2.0 / 3.0))?,
        Manipulation::simulated("goal setting", Effect::NoEffect)?,
    ])
}

fn demo_baseline() -> Baseline {
    Baseline::Sampled(Arc::new(|rng: &mut StdRng| 0.2 + 0.4 * rng.gen::<f64>()))
}

#[allow(clippy::too_many_arguments)]
fn run_simulate(
    participants: usize,
    sessions: usize,
    skills: usize,
    seed: u64,
    poor: f64,
    good: f64,
    min_difference: f64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = CohortConfig {
        n_participants: participants,
        n_sessions: sessions,
        n_skills: skills,
        baseline: demo_baseline(),
        backgrounds: demo_backgrounds()?,
        continuous_backgrounds: demo_continuous_backgrounds()?,
    };
    let mut cohort = Cohort::simulate(&config, &mut rng)?;
    cohort.assign_manipulations(demo_manipulations()?)?;
    cohort.run_simulation(Effect::Improvement(1.0 / 2.0), &mut rng)?;

    let boundaries = Boundaries::new(poor, good, min_difference)?;
    let study_config = StudyConfig {
        median_test_cutoff: min_difference,
        ..StudyConfig::default()
    };
    let study = Study::new("demo study", &cohort, Some(boundaries), study_config)?;

    print!("{}", cohort.describe());
    print!("{}", study.describe());
    println!();
    print!("{}", study.run_tests().summary());
    Ok(())
}

fn run_power(
    sizes: Vec<usize>,
    iterations: usize,
    sessions: usize,
    skills: usize,
    seed: u64,
    threshold: f64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let manipulations = demo_manipulations()?;
    let experiment = MinimalSizeExperiment {
        sizes,
        iterations,
        n_sessions: sessions,
        n_skills: skills,
        baseline: demo_baseline(),
        backgrounds: demo_backgrounds()?,
        continuous_backgrounds: demo_continuous_backgrounds()?,
        manipulations: manipulations.clone(),
        default_effect: Effect::Improvement(1.0 / 2.0),
        study_config: StudyConfig::default(),
    };
    let curve = experiment.run(&mut rng)?;

    print!("{}", curve.summary());
    println!();
    for manipulation in &manipulations {
        match curve.minimal_size(manipulation.name(), threshold) {
            Some(size) => println!(
                "'{}' resolves at {size} participants (median P(better) >= {threshold})",
                manipulation.name()
            ),
            None => println!(
                "'{}' does not resolve at any tried size",
                manipulation.name()
            ),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Simulate {
            participants,
            sessions,
            skills,
            seed,
            poor,
            good,
            min_difference,
        } => run_simulate(
            participants,
            sessions,
            skills,
            seed,
            poor,
            good,
            min_difference,
        ),
        Command::Power {
            sizes,
            iterations,
            sessions,
            skills,
            seed,
            threshold,
        } => run_power(sizes, iterations, sessions, skills, seed, threshold),
    }
}
