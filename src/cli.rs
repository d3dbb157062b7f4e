//! CLI argument parsing for factex

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "factex")]
#[command(version)]
#[command(about = "Factorial experiment simulator for training studies", long_about = None)]
pub struct Cli {
    /// Enable debug logging to stderr
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate one cohort through the demo study design and print the
    /// full evaluation battery
    Simulate {
        /// Number of participants
        #[arg(short = 'n', long, default_value = "200")]
        participants: usize,

        /// Number of training sessions
        #[arg(long, default_value = "10")]
        sessions: usize,

        /// Number of skills tested per session
        #[arg(long, default_value = "20")]
        skills: usize,

        /// RNG seed for reproducible runs
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Skill fraction below which a participant counts as poor
        #[arg(long, default_value = "0.5")]
        poor: f64,

        /// Skill fraction above which a participant counts as good
        #[arg(long, default_value = "0.75")]
        good: f64,

        /// Smallest practically significant quality difference
        #[arg(long = "min-difference", default_value = "0.1")]
        min_difference: f64,
    },

    /// Estimate the smallest cohort that resolves the demo study's
    /// effects, by repeated simulation over a ladder of sizes
    Power {
        /// Cohort sizes to try
        #[arg(long, value_delimiter = ',', default_value = "25,50,100,200,400")]
        sizes: Vec<usize>,

        /// Simulated studies per size
        #[arg(long, default_value = "20")]
        iterations: usize,

        /// Number of training sessions
        #[arg(long, default_value = "10")]
        sessions: usize,

        /// Number of skills tested per session
        #[arg(long, default_value = "20")]
        skills: usize,

        /// RNG seed for reproducible runs
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Median P(better) a factor must reach to count as resolved
        #[arg(long, default_value = "0.95")]
        threshold: f64,
    },
}
