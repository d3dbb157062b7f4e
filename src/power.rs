//! Cohort-size planning by repeated simulation
//!
//! Before committing to a study, the experimenters want the smallest
//! cohort that still resolves the effects they hope to see. The minimal
//! size experiment simulates the same study design over a ladder of
//! cohort sizes, many times per size, and reports the median evidence
//! strength at each rung. The median over iterations is what a typical
//! run of the real study would see, unlike the mean it is not dragged
//! around by the occasional freak cohort.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use tracing::info;

use crate::cohort::{Baseline, Cohort, CohortConfig};
use crate::effects::Effect;
use crate::factors::{Background, ConfigError, ContinuousBackground, Manipulation};
use crate::freq::median;
use crate::study::{Study, StudyConfig};

/// One study design evaluated across a ladder of cohort sizes.
#[derive(Debug, Clone)]
pub struct MinimalSizeExperiment {
    /// Cohort sizes to try, in the order they are reported.
    pub sizes: Vec<usize>,
    /// Simulated studies per size.
    pub iterations: usize,
    pub n_sessions: usize,
    pub n_skills: usize,
    pub baseline: Baseline,
    pub backgrounds: Vec<Background>,
    pub continuous_backgrounds: Vec<ContinuousBackground>,
    pub manipulations: Vec<Manipulation>,
    pub default_effect: Effect,
    pub study_config: StudyConfig,
}

/// Median evidence strength per factor across the size ladder.
#[derive(Debug, Clone)]
pub struct PowerCurve {
    pub sizes: Vec<usize>,
    /// Factor name to one median P(better) per size, parallel to `sizes`.
    /// Taken from the after-module median test.
    pub median_p_better: BTreeMap<String, Vec<f64>>,
}

impl MinimalSizeExperiment {
    /// Run the ladder. Every iteration draws a fresh cohort from the same
    /// design, so the curve reflects sampling noise at each size.
    pub fn run(&self, rng: &mut StdRng) -> Result<PowerCurve, ConfigError> {
        if self.sizes.is_empty() || self.iterations == 0 {
            return Err(ConfigError::EmptySizeLadder);
        }

        let mut median_p_better: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for &size in &self.sizes {
            info!(size, iterations = self.iterations, "simulating cohort size");
            let mut per_factor: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for _ in 0..self.iterations {
                let results = self.simulate_once(size, rng)?;
                for (name, p) in results {
                    per_factor.entry(name).or_default().push(p);
                }
            }
            for (name, samples) in per_factor {
                median_p_better
                    .entry(name)
                    .or_insert_with(|| Vec::with_capacity(self.sizes.len()))
                    .push(median(&samples));
            }
        }

        Ok(PowerCurve {
            sizes: self.sizes.clone(),
            median_p_better,
        })
    }

    /// One simulated study: after-module P(better) per analysed factor.
    fn simulate_once(
        &self,
        size: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<(String, f64)>, ConfigError> {
        let config = CohortConfig {
            n_participants: size,
            n_sessions: self.n_sessions,
            n_skills: self.n_skills,
            baseline: self.baseline.clone(),
            backgrounds: self.backgrounds.clone(),
            continuous_backgrounds: self.continuous_backgrounds.clone(),
        };
        let mut cohort = Cohort::simulate(&config, rng)?;
        cohort.assign_manipulations(self.manipulations.clone())?;
        cohort.run_simulation(self.default_effect, rng)?;

        let study = Study::new("size planning", &cohort, None, self.study_config)?;
        let results = study.run_tests();
        Ok(results
            .median_tests
            .iter()
            .filter_map(|(name, tests)| {
                tests
                    .after_module
                    .difference
                    .as_ref()
                    .map(|difference| (name.clone(), difference.p_better))
            })
            .collect())
    }
}

impl PowerCurve {
    /// Smallest tried size whose median P(better) for `factor` reaches
    /// `threshold`, or `None` when even the largest size falls short.
    pub fn minimal_size(&self, factor: &str, threshold: f64) -> Option<usize> {
        let curve = self.median_p_better.get(factor)?;
        self.sizes
            .iter()
            .zip(curve)
            .find(|(_, &p)| p >= threshold)
            .map(|(&size, _)| size)
    }

    /// Render the curve as a plain-text table.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "Median P(better) by cohort size:");
        for (name, curve) in &self.median_p_better {
            let _ = writeln!(out, "  factor '{name}':");
            for (size, p) in self.sizes.iter().zip(curve) {
                let _ = writeln!(out, "    {size:>6} participants: {p:.3}");
            }
        }
        out
    }
}
