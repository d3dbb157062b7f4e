//! Property-based tests for the core invariants
//!
//! Covers the ordinal transform, the subgroup partition and manipulation
//! assignment, outcome statistics, and the numerical integrity of the
//! Bayesian posteriors, across randomised inputs.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use factex::bayes::{DifferencePosterior, QualityGrid, QualityPosterior, MASS_TOLERANCE};
use factex::cohort::{Baseline, Cohort, CohortConfig};
use factex::effects::Effect;
use factex::factors::{Background, Knowledge, Manipulation};
use factex::ordinal::ordinalise;
use factex::participant::{Competence, Participant};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_ordinalise_is_order_isomorphic(
        values in prop::collection::vec(-1000.0f64..1000.0, 1..40),
    ) {
        let ranks = ordinalise(&values);
        prop_assert_eq!(ranks.len(), values.len());
        for i in 0..values.len() {
            for j in 0..values.len() {
                prop_assert_eq!(
                    values[i] < values[j],
                    ranks[i] < ranks[j],
                    "order broken between {} and {}",
                    values[i],
                    values[j]
                );
                prop_assert_eq!(values[i] == values[j], ranks[i] == ranks[j]);
            }
        }
    }

    #[test]
    fn prop_ordinalise_ranks_are_dense(
        values in prop::collection::vec(-50.0f64..50.0, 1..40),
    ) {
        let ranks = ordinalise(&values);
        let max = ranks.iter().copied().max().unwrap_or(0);
        for r in 0..=max {
            prop_assert!(ranks.contains(&r), "rank {r} missing below max {max}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_subgroups_partition_and_splits_balance(
        n in 2usize..250,
        fraction in 0.0f64..1.0,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let config = CohortConfig {
            n_participants: n,
            n_sessions: 3,
            n_skills: 2,
            baseline: Baseline::Fixed(0.5),
            backgrounds: vec![Background::simulated(
                "trait",
                Knowledge::Known,
                Effect::NoEffect,
                Effect::NoEffect,
                fraction,
            )
            .unwrap()],
            continuous_backgrounds: vec![],
        };
        let mut cohort = Cohort::simulate(&config, &mut rng).unwrap();

        let mut seen = vec![false; n];
        for members in cohort.subgroups().values() {
            for &i in members {
                prop_assert!(!seen[i], "participant {i} in two subgroups");
                seen[i] = true;
            }
        }
        prop_assert!(seen.iter().all(|&s| s));

        cohort
            .assign_manipulations(vec![
                Manipulation::simulated("m", Effect::NoEffect).unwrap(),
            ])
            .unwrap();
        let flags = cohort.manipulation_flags("m").unwrap();
        for members in cohort.subgroups().values() {
            let treated = members.iter().filter(|&&i| flags[i]).count();
            let untreated = members.len() - treated;
            prop_assert!(treated.abs_diff(untreated) <= 1);
        }
    }

    #[test]
    fn prop_correct_onwards_monotone_and_bounded(
        pre in 0.0f64..1.0,
        post in 0.0f64..1.0,
        n_sessions in 1usize..15,
        n_skills in 1usize..12,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let participant = Participant::simulate(
            "p",
            Competence { pre, post },
            n_sessions,
            n_skills,
            &mut rng,
        );
        let counts = participant.correct_onwards();
        prop_assert_eq!(counts.len(), n_sessions);
        prop_assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(counts.iter().all(|&c| c as usize <= n_skills));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_posterior_mass_stays_normalised(
        (trials, successes) in (0u64..150).prop_flat_map(|t| (Just(t), 0..=t)),
    ) {
        let grid = QualityGrid::new(400);
        let posterior = QualityPosterior::from_counts(successes, trials, &grid).unwrap();
        let total: f64 = posterior.mass.iter().sum();
        prop_assert!(
            (total - 1.0).abs() <= MASS_TOLERANCE,
            "mass for {}/{} sums to {}",
            successes,
            trials,
            total
        );
        let values: Vec<f64> = posterior.percentiles.iter().map(|(_, v)| *v).collect();
        prop_assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn prop_self_difference_is_symmetric(
        (trials, successes) in (1u64..120).prop_flat_map(|t| (Just(t), 0..=t)),
    ) {
        let grid = QualityGrid::new(300);
        let q = QualityPosterior::from_counts(successes, trials, &grid).unwrap();
        let diff = DifferencePosterior::between(&q, &q, &grid, 0.1);
        prop_assert!((diff.p_better - diff.p_worse).abs() < 1e-9);
        prop_assert!((diff.p_much_better - diff.p_much_worse).abs() < 1e-9);
        let total: f64 = diff.mass.iter().sum();
        prop_assert!((total - 1.0).abs() <= MASS_TOLERANCE);
    }
}
