//! Study orchestration: the full evaluation battery over a cohort
//!
//! A study wraps a cohort whose outcomes exist, either simulated or
//! loaded, and runs the same battery the experimenters would run on real
//! data: per-factor median tests before and after the module, boundary
//! tests against skill thresholds when thresholds are configured, and a
//! whole-cohort sign test. Results are plain serializable records; a
//! numerically degenerate posterior is logged and its entry skipped
//! rather than failing the battery.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::bayes::{DifferencePosterior, QualityGrid, QualityPosterior};
use crate::cohort::Cohort;
use crate::factors::{Boundaries, ConfigError};
use crate::freq::{mann_whitney_u, median, median_test, sign_test, TestStat};

/// Tunable constants of the evaluation battery.
#[derive(Debug, Clone, Copy)]
pub struct StudyConfig {
    /// Quality-grid samples per participant; more participants warrant a
    /// finer posterior grid.
    pub samples_per_participant: usize,
    /// Smallest practically significant quality difference for the
    /// median tests.
    pub median_test_cutoff: f64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            samples_per_participant: 10,
            median_test_cutoff: 0.1,
        }
    }
}

/// Frequentist cross-checks attached to one median test.
#[derive(Debug, Clone, Serialize)]
pub struct QuickTest {
    pub treatment_median: f64,
    pub control_median: f64,
    pub median_test: Option<TestStat>,
    pub mann_whitney: Option<TestStat>,
}

/// Whole-cohort before/after comparison.
#[derive(Debug, Clone, Serialize)]
pub struct CohortQuickTest {
    pub initial_median: f64,
    pub final_median: f64,
    pub improved: u64,
    pub worsened: u64,
    /// Two-sided sign test over participants who moved either way.
    pub sign_test_p: f64,
}

/// One group's standing against the combined median.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMedianTest {
    pub members: usize,
    pub above_median: u64,
    pub below_median: u64,
    pub on_median: u64,
    /// Posterior over the probability of a member landing strictly above
    /// the combined median.
    pub posterior: QualityPosterior,
}

/// Treatment against control around their combined median.
#[derive(Debug, Clone, Serialize)]
pub struct MedianTest {
    pub treatment: GroupMedianTest,
    pub control: GroupMedianTest,
    /// Missing when either group is empty: no evidence to compare.
    pub difference: Option<DifferencePosterior>,
    pub quick: QuickTest,
}

/// Median tests for one factor, before and after the module.
#[derive(Debug, Clone, Serialize)]
pub struct FactorMedianTests {
    pub before_module: MedianTest,
    pub after_module: MedianTest,
}

/// One group's movement across the skill boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct GroupBoundaryTest {
    pub members: usize,
    pub initially_poor: u64,
    pub initially_good: u64,
    pub finally_poor: u64,
    pub finally_good: u64,
    pub poor_to_good: u64,
    /// Observed fraction of poor starters who ended good; missing when
    /// nobody started poor.
    pub fraction: Option<f64>,
    /// Posterior over the probability that a poor starter ends good.
    pub posterior: QualityPosterior,
}

/// Treatment against control on poor-to-good conversion.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryComparison {
    pub treatment: GroupBoundaryTest,
    pub control: GroupBoundaryTest,
    /// Missing when either group had no poor starters.
    pub difference: Option<DifferencePosterior>,
}

/// Everything the battery produced, keyed by factor name.
#[derive(Debug, Clone, Serialize)]
pub struct StudyResults {
    pub study: String,
    pub participants: usize,
    pub cohort_quick: CohortQuickTest,
    /// Final against initial outcomes for the whole cohort.
    pub total_median: Option<MedianTest>,
    pub median_tests: BTreeMap<String, FactorMedianTests>,
    pub boundary_tests: BTreeMap<String, BoundaryComparison>,
    /// Whole-cohort boundary movement, present when boundaries are set.
    pub total_boundary: Option<GroupBoundaryTest>,
}

/// A named evaluation over a cohort with computed outcomes.
#[derive(Debug)]
pub struct Study<'a> {
    name: String,
    cohort: &'a Cohort,
    boundaries: Option<Boundaries>,
    config: StudyConfig,
    grid: QualityGrid,
}

impl<'a> Study<'a> {
    /// Wrap a cohort for evaluation.
    ///
    /// Fails with [`ConfigError::ResultsNotComputed`] when the cohort has
    /// no outcomes yet, so a study cannot exist in an unrunnable state.
    pub fn new(
        name: impl Into<String>,
        cohort: &'a Cohort,
        boundaries: Option<Boundaries>,
        config: StudyConfig,
    ) -> Result<Self, ConfigError> {
        if cohort.outcomes().is_none() {
            return Err(ConfigError::ResultsNotComputed);
        }
        let n_samples = (config.samples_per_participant * cohort.n_participants()).max(400);
        Ok(Self {
            name: name.into(),
            cohort,
            boundaries,
            config,
            grid: QualityGrid::new(n_samples),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn boundaries(&self) -> Option<Boundaries> {
        self.boundaries
    }

    /// Run the full battery. Pure with respect to the cohort; calling it
    /// twice yields identical results.
    pub fn run_tests(&self) -> StudyResults {
        // Study::new verified that outcomes exist.
        let outcomes = match self.cohort.outcomes() {
            Some(outcomes) => outcomes,
            None => unreachable!("study constructed without outcomes"),
        };
        info!(study = %self.name, grid = self.grid.len(), "running evaluation battery");

        let factor_names: Vec<&str> = self
            .cohort
            .manipulations()
            .iter()
            .map(|m| m.name())
            .chain(self.cohort.analysed_backgrounds().map(|b| b.name()))
            .collect();

        let mut median_tests = BTreeMap::new();
        let mut boundary_tests = BTreeMap::new();
        for name in factor_names {
            let flags = match self.cohort.factor_flags(name) {
                Some(flags) => flags,
                None => continue,
            };

            let before = self.median_comparison(name, outcomes.initial(), flags);
            let after = self.median_comparison(name, outcomes.ranking(), flags);
            if let (Some(before_module), Some(after_module)) = (before, after) {
                median_tests.insert(
                    name.to_string(),
                    FactorMedianTests {
                        before_module,
                        after_module,
                    },
                );
            }

            if let Some(boundaries) = self.boundaries {
                if let Some(comparison) =
                    self.boundary_comparison(name, outcomes, flags, boundaries)
                {
                    boundary_tests.insert(name.to_string(), comparison);
                }
            }
        }

        let total_boundary = self.boundaries.and_then(|boundaries| {
            let everyone = vec![true; self.cohort.n_participants()];
            self.group_boundary_test("total", outcomes, &everyone, boundaries)
        });

        StudyResults {
            study: self.name.clone(),
            participants: self.cohort.n_participants(),
            cohort_quick: self.cohort_quick_test(outcomes),
            total_median: self.median_comparison_groups(
                "total",
                outcomes.last(),
                outcomes.initial(),
            ),
            median_tests,
            boundary_tests,
            total_boundary,
        }
    }

    fn cohort_quick_test(&self, outcomes: &crate::cohort::Outcomes) -> CohortQuickTest {
        let mut improved = 0u64;
        let mut worsened = 0u64;
        for (first, last) in outcomes.initial().iter().zip(outcomes.last()) {
            if last > first {
                improved += 1;
            } else if last < first {
                worsened += 1;
            }
        }
        CohortQuickTest {
            initial_median: median(outcomes.initial()),
            final_median: median(outcomes.last()),
            improved,
            worsened,
            sign_test_p: sign_test(improved, improved + worsened),
        }
    }

    /// Compare flagged against unflagged participants around the combined
    /// median of `values`. A degenerate posterior is logged and skipped.
    fn median_comparison(
        &self,
        factor: &str,
        values: &[f64],
        flags: &[bool],
    ) -> Option<MedianTest> {
        let (treatment, control) = split_by_flags(values, flags);
        self.median_comparison_groups(factor, &treatment, &control)
    }

    fn median_comparison_groups(
        &self,
        factor: &str,
        treatment: &[f64],
        control: &[f64],
    ) -> Option<MedianTest> {
        let combined: Vec<f64> = treatment.iter().chain(control).copied().collect();
        let grand_median = median(&combined);

        let treatment_test = match self.group_median_test(&treatment, grand_median) {
            Ok(test) => test,
            Err(error) => {
                warn!(factor, %error, "treatment posterior degenerate, skipping median test");
                return None;
            }
        };
        let control_test = match self.group_median_test(&control, grand_median) {
            Ok(test) => test,
            Err(error) => {
                warn!(factor, %error, "control posterior degenerate, skipping median test");
                return None;
            }
        };

        let difference = if treatment.is_empty() || control.is_empty() {
            None
        } else {
            Some(DifferencePosterior::between(
                &treatment_test.posterior,
                &control_test.posterior,
                &self.grid,
                self.config.median_test_cutoff,
            ))
        };

        Some(MedianTest {
            quick: QuickTest {
                treatment_median: median(&treatment),
                control_median: median(&control),
                median_test: median_test(&treatment, &control),
                mann_whitney: mann_whitney_u(&treatment, &control),
            },
            treatment: treatment_test,
            control: control_test,
            difference,
        })
    }

    fn group_median_test(
        &self,
        group: &[f64],
        grand_median: f64,
    ) -> crate::bayes::Result<GroupMedianTest> {
        let above = group.iter().filter(|&&v| v > grand_median).count() as u64;
        let on = group.iter().filter(|&&v| v == grand_median).count() as u64;
        let below = group.len() as u64 - above - on;
        let posterior = QualityPosterior::from_counts(above, group.len() as u64, &self.grid)?;
        Ok(GroupMedianTest {
            members: group.len(),
            above_median: above,
            below_median: below,
            on_median: on,
            posterior,
        })
    }

    fn boundary_comparison(
        &self,
        factor: &str,
        outcomes: &crate::cohort::Outcomes,
        flags: &[bool],
        boundaries: Boundaries,
    ) -> Option<BoundaryComparison> {
        let inverted: Vec<bool> = flags.iter().map(|&f| !f).collect();
        let treatment = self.group_boundary_test(factor, outcomes, flags, boundaries)?;
        let control = self.group_boundary_test(factor, outcomes, &inverted, boundaries)?;

        let difference = if treatment.initially_poor == 0 || control.initially_poor == 0 {
            None
        } else {
            Some(DifferencePosterior::between(
                &treatment.posterior,
                &control.posterior,
                &self.grid,
                boundaries.minimum_quality_difference(),
            ))
        };

        Some(BoundaryComparison {
            treatment,
            control,
            difference,
        })
    }

    /// Count boundary crossings for the flagged members. Quality is the
    /// fraction of skills locked in, strictly below `poor` counts as poor
    /// and strictly above `good` as good.
    fn group_boundary_test(
        &self,
        factor: &str,
        outcomes: &crate::cohort::Outcomes,
        flags: &[bool],
        boundaries: Boundaries,
    ) -> Option<GroupBoundaryTest> {
        let n_skills = self.cohort.n_skills() as f64;
        let mut members = 0usize;
        let mut initially_poor = 0u64;
        let mut initially_good = 0u64;
        let mut finally_poor = 0u64;
        let mut finally_good = 0u64;
        let mut poor_to_good = 0u64;

        for (i, &flag) in flags.iter().enumerate() {
            if !flag {
                continue;
            }
            members += 1;
            let initial = outcomes.initial()[i] / n_skills;
            let final_quality = outcomes.last()[i] / n_skills;
            let started_poor = initial < boundaries.poor();
            let ended_good = final_quality > boundaries.good();
            if started_poor {
                initially_poor += 1;
            }
            if initial > boundaries.good() {
                initially_good += 1;
            }
            if final_quality < boundaries.poor() {
                finally_poor += 1;
            }
            if ended_good {
                finally_good += 1;
            }
            if started_poor && ended_good {
                poor_to_good += 1;
            }
        }

        let posterior = match QualityPosterior::from_counts(poor_to_good, initially_poor, &self.grid)
        {
            Ok(posterior) => posterior,
            Err(error) => {
                warn!(factor, %error, "boundary posterior degenerate, skipping");
                return None;
            }
        };
        let fraction = if initially_poor > 0 {
            Some(poor_to_good as f64 / initially_poor as f64)
        } else {
            None
        };

        Some(GroupBoundaryTest {
            members,
            initially_poor,
            initially_good,
            finally_poor,
            finally_good,
            poor_to_good,
            fraction,
            posterior,
        })
    }

    /// Human-readable description of the study setup.
    pub fn describe(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Study '{}' over {} participants",
            self.name,
            self.cohort.n_participants()
        );
        let _ = writeln!(
            out,
            "  {} sessions of {} skills each",
            self.cohort.n_sessions(),
            self.cohort.n_skills()
        );
        let _ = writeln!(out, "  quality grid: {} samples", self.grid.len());
        match self.boundaries {
            Some(b) => {
                let _ = writeln!(
                    out,
                    "  skill boundaries: poor below {:.2}, good above {:.2}, minimum difference {:.2}",
                    b.poor(),
                    b.good(),
                    b.minimum_quality_difference()
                );
            }
            None => {
                let _ = writeln!(out, "  no skill boundaries set, boundary tests skipped");
            }
        }
        out
    }
}

impl StudyResults {
    /// Render the battery as a plain-text report.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Results of study '{}' ({} participants)",
            self.study, self.participants
        );
        let _ = writeln!(
            out,
            "Whole cohort: median {} -> {}, {} improved, {} worsened, sign test p = {:.3}",
            self.cohort_quick.initial_median,
            self.cohort_quick.final_median,
            self.cohort_quick.improved,
            self.cohort_quick.worsened,
            self.cohort_quick.sign_test_p
        );
        if let Some(total) = &self.total_median {
            if let Some(difference) = &total.difference {
                let _ = writeln!(
                    out,
                    "Whole cohort final vs initial: P(better) = {:.3}, P(much better) = {:.3}",
                    difference.p_better, difference.p_much_better
                );
            }
        }
        if let Some(total) = &self.total_boundary {
            let _ = writeln!(
                out,
                "Whole cohort boundaries: {} of {} started poor, {} ended good, {} crossed poor to good",
                total.initially_poor, total.members, total.finally_good, total.poor_to_good
            );
        }

        for (name, tests) in &self.median_tests {
            let _ = writeln!(out, "Factor '{name}':");
            for (label, test) in [
                ("before module", &tests.before_module),
                ("after module", &tests.after_module),
            ] {
                match &test.difference {
                    Some(difference) => {
                        let _ = writeln!(
                            out,
                            "  {label}: P(better) = {:.3}, P(much better) = {:.3}, P(equivalent) = {:.3}",
                            difference.p_better, difference.p_much_better, difference.p_equivalent
                        );
                    }
                    None => {
                        let _ = writeln!(out, "  {label}: one group empty, no comparison");
                    }
                }
                if let Some(mw) = &test.quick.mann_whitney {
                    let _ = writeln!(
                        out,
                        "    rank test: U = {:.0}, p = {:.3}",
                        mw.statistic, mw.p_value
                    );
                }
            }
            if let Some(boundary) = self.boundary_tests.get(name) {
                let t = &boundary.treatment;
                let c = &boundary.control;
                let _ = writeln!(
                    out,
                    "  boundaries: treated {}/{} poor to good, untreated {}/{}",
                    t.poor_to_good, t.initially_poor, c.poor_to_good, c.initially_poor
                );
                if let Some(difference) = &boundary.difference {
                    let _ = writeln!(
                        out,
                        "    P(better) = {:.3}, P(much better) = {:.3}",
                        difference.p_better, difference.p_much_better
                    );
                }
            }
        }
        out
    }
}

/// Split values into (flagged, unflagged) samples.
fn split_by_flags(values: &[f64], flags: &[bool]) -> (Vec<f64>, Vec<f64>) {
    let mut treatment = Vec::new();
    let mut control = Vec::new();
    for (&value, &flag) in values.iter().zip(flags) {
        if flag {
            treatment.push(value);
        } else {
            control.push(value);
        }
    }
    (treatment, control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{Baseline, Cohort, CohortConfig};
    use crate::effects::Effect;
    use crate::factors::Manipulation;
    use crate::records::{ManipulationRecord, ParticipantRecord};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn simulated_cohort(
        n: usize,
        manipulation_effect: Effect,
        seed: u64,
    ) -> Cohort {
        let mut rng = StdRng::seed_from_u64(seed);
        let config = CohortConfig {
            n_participants: n,
            n_sessions: 6,
            n_skills: 10,
            baseline: Baseline::Fixed(0.3),
            backgrounds: vec![],
            continuous_backgrounds: vec![],
        };
        let mut cohort = Cohort::simulate(&config, &mut rng).unwrap();
        cohort
            .assign_manipulations(vec![Manipulation::simulated(
                "extra practice",
                manipulation_effect,
            )
            .unwrap()])
            .unwrap();
        cohort
            .run_simulation(Effect::Improvement(0.3), &mut rng)
            .unwrap();
        cohort
    }

    /// Four participants: two who go from nothing to everything, two who
    /// know everything from the start.
    fn observed_cohort() -> Cohort {
        let ids: Vec<String> = (0..4).map(|i| format!("p{i}")).collect();
        let matrix_learner = vec![vec![false, false], vec![true, true]];
        let matrix_master = vec![vec![true, true], vec![true, true]];
        let records: Vec<ParticipantRecord> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| ParticipantRecord {
                id: id.clone(),
                n_sessions: 2,
                n_skills: 2,
                results: if i < 2 {
                    matrix_learner.clone()
                } else {
                    matrix_master.clone()
                },
            })
            .collect();
        let mut flags = BTreeMap::new();
        flags.insert("reminders".to_string(), vec![true, false, true, false]);
        let manipulations = ManipulationRecord {
            ids: ids.clone(),
            manipulations: vec!["reminders".to_string()],
            flags,
        };
        Cohort::from_records(2, 2, ids, None, Some(&manipulations), records).unwrap()
    }

    #[test]
    fn test_new_rejects_cohort_without_outcomes() {
        let mut rng = StdRng::seed_from_u64(0);
        let config = CohortConfig {
            n_participants: 5,
            n_sessions: 2,
            n_skills: 2,
            baseline: Baseline::Fixed(0.5),
            backgrounds: vec![],
            continuous_backgrounds: vec![],
        };
        let cohort = Cohort::simulate(&config, &mut rng).unwrap();
        assert!(matches!(
            Study::new("premature", &cohort, None, StudyConfig::default()),
            Err(ConfigError::ResultsNotComputed)
        ));
    }

    #[test]
    fn test_strong_manipulation_is_detected() {
        // Risk factor 0.2 nearly eliminates wrong answers for the treated.
        let cohort = simulated_cohort(200, Effect::Improvement(0.2), 31);
        let study = Study::new("strong", &cohort, None, StudyConfig::default()).unwrap();
        let results = study.run_tests();

        let tests = &results.median_tests["extra practice"];
        let after = tests.after_module.difference.as_ref().unwrap();
        assert!(
            after.p_better > 0.95,
            "p_better = {} for a near-certain improvement",
            after.p_better
        );
    }

    #[test]
    fn test_null_manipulation_shows_no_effect() {
        let cohort = simulated_cohort(200, Effect::NoEffect, 77);
        let study = Study::new("null", &cohort, None, StudyConfig::default()).unwrap();
        let results = study.run_tests();

        let tests = &results.median_tests["extra practice"];
        let after = tests.after_module.difference.as_ref().unwrap();
        assert!(
            after.p_better > 0.01 && after.p_better < 0.99,
            "p_better = {} for a null effect",
            after.p_better
        );
    }

    #[test]
    fn test_median_test_counts_on_observed_cohort() {
        let cohort = observed_cohort();
        let study = Study::new("obs", &cohort, None, StudyConfig::default()).unwrap();
        let results = study.run_tests();

        // Initial counts are [0, 0, 2, 2], grand median 1. One learner and
        // one master in each arm.
        let before = &results.median_tests["reminders"].before_module;
        assert_eq!(before.treatment.members, 2);
        assert_eq!(before.treatment.above_median, 1);
        assert_eq!(before.control.above_median, 1);
        assert!(before.difference.is_some());
    }

    #[test]
    fn test_boundary_counts_on_observed_cohort() {
        let cohort = observed_cohort();
        let boundaries = Boundaries::new(0.25, 0.75, 0.1).unwrap();
        let study =
            Study::new("obs", &cohort, Some(boundaries), StudyConfig::default()).unwrap();
        let results = study.run_tests();

        let total = results.total_boundary.as_ref().unwrap();
        assert_eq!(total.members, 4);
        assert_eq!(total.initially_poor, 2);
        assert_eq!(total.initially_good, 2);
        assert_eq!(total.finally_good, 4);
        assert_eq!(total.poor_to_good, 2);
        assert_eq!(total.fraction, Some(1.0));

        // Each arm holds one learner who crossed.
        let comparison = &results.boundary_tests["reminders"];
        assert_eq!(comparison.treatment.poor_to_good, 1);
        assert_eq!(comparison.control.poor_to_good, 1);
        assert!(comparison.difference.is_some());
    }

    #[test]
    fn test_no_boundaries_skips_boundary_tests() {
        let cohort = observed_cohort();
        let study = Study::new("obs", &cohort, None, StudyConfig::default()).unwrap();
        let results = study.run_tests();
        assert!(results.boundary_tests.is_empty());
        assert!(results.total_boundary.is_none());
    }

    #[test]
    fn test_cohort_quick_test_counts_movement() {
        let cohort = observed_cohort();
        let study = Study::new("obs", &cohort, None, StudyConfig::default()).unwrap();
        let results = study.run_tests();

        // Two learners improved, two masters stayed level.
        assert_eq!(results.cohort_quick.improved, 2);
        assert_eq!(results.cohort_quick.worsened, 0);
        assert!(results.cohort_quick.sign_test_p <= 1.0);

        let total = results.total_median.as_ref().unwrap();
        assert_eq!(total.treatment.members, 4);
        assert_eq!(total.control.members, 4);
        assert!(total.difference.is_some());
    }

    #[test]
    fn test_run_tests_is_deterministic() {
        let cohort = simulated_cohort(60, Effect::Improvement(0.5), 5);
        let study = Study::new("twice", &cohort, None, StudyConfig::default()).unwrap();
        let first = study.run_tests();
        let second = study.run_tests();
        let a = &first.median_tests["extra practice"].after_module;
        let b = &second.median_tests["extra practice"].after_module;
        assert_eq!(
            a.difference.as_ref().unwrap().p_better,
            b.difference.as_ref().unwrap().p_better
        );
    }

    #[test]
    fn test_results_serialize_to_json() {
        let cohort = observed_cohort();
        let boundaries = Boundaries::new(0.25, 0.75, 0.1).unwrap();
        let study =
            Study::new("json", &cohort, Some(boundaries), StudyConfig::default()).unwrap();
        let results = study.run_tests();
        let json = serde_json::to_string(&results).unwrap();
        assert!(json.contains("reminders"));
        assert!(json.contains("p_better"));
    }

    #[test]
    fn test_summary_mentions_factors() {
        let cohort = observed_cohort();
        let study = Study::new("report", &cohort, None, StudyConfig::default()).unwrap();
        let summary = study.run_tests().summary();
        assert!(summary.contains("report"));
        assert!(summary.contains("reminders"));
    }

    #[test]
    fn test_describe_reports_setup() {
        let cohort = observed_cohort();
        let boundaries = Boundaries::new(0.3, 0.7, 0.05).unwrap();
        let study =
            Study::new("setup", &cohort, Some(boundaries), StudyConfig::default()).unwrap();
        let description = study.describe();
        assert!(description.contains("setup"));
        assert!(description.contains("4 participants"));
        assert!(description.contains("0.30"));
    }
}
