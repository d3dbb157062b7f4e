//! Participants and their per-session outcomes
//!
//! A participant answers one question per skill per session and only the
//! first attempt counts. Latent competence drives the simulation but is
//! never part of the observable record: what the analysis sees is the
//! boolean first-try matrix and the two statistics derived from it, the
//! last session each skill was still answered wrong and the number of
//! skills locked in from each session onwards.

use rand::rngs::StdRng;
use rand::Rng;

use crate::records::{MergeError, ParticipantRecord};

/// Sentinel in `last_wrong`: the skill was answered right from session one.
pub const NEVER_WRONG: i64 = -1;

/// Latent pre/post competence of a simulated participant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Competence {
    pub pre: f64,
    pub post: f64,
}

/// Where a participant's outcome matrix came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Origin {
    /// Simulated from latent competence; the latent values are kept for
    /// diagnostics but never consulted by the statistical tests.
    Simulated(Competence),
    /// Loaded from an external record.
    Observed,
}

/// One person taking the training module.
///
/// The outcome matrix and both derived statistics are computed once at
/// construction and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Participant {
    id: String,
    n_sessions: usize,
    n_skills: usize,
    /// Session-major: `results[session][skill]`.
    results: Vec<Vec<bool>>,
    /// Last session index at which each skill was answered wrong on the
    /// first try, or [`NEVER_WRONG`].
    last_wrong: Vec<i64>,
    /// Per session, how many skills were answered correctly from that
    /// session onwards. Non-decreasing, bounded by the skill count.
    correct_onwards: Vec<u32>,
    origin: Origin,
}

impl Participant {
    /// Simulate a participant's outcomes from latent competence.
    ///
    /// The per-session success probability is interpolated linearly from
    /// `competence.pre` at the first session to `competence.post` at the
    /// last. Skills within a session share the session's probability.
    pub fn simulate(
        id: impl Into<String>,
        competence: Competence,
        n_sessions: usize,
        n_skills: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut results = Vec::with_capacity(n_sessions);
        for session in 0..n_sessions {
            let t = if n_sessions > 1 {
                session as f64 / (n_sessions - 1) as f64
            } else {
                1.0
            };
            let p = competence.pre + (competence.post - competence.pre) * t;
            let row: Vec<bool> = (0..n_skills).map(|_| rng.gen::<f64>() < p).collect();
            results.push(row);
        }
        Self::from_matrix(id.into(), results, Origin::Simulated(competence))
    }

    /// Rebuild a participant from a loaded outcome record.
    pub fn from_record(record: ParticipantRecord) -> Result<Self, MergeError> {
        let rows = record.results.len();
        let cols = record.results.first().map_or(0, Vec::len);
        let rectangular = record.results.iter().all(|row| row.len() == cols);
        if rows != record.n_sessions || cols != record.n_skills || !rectangular {
            return Err(MergeError::MalformedResultMatrix {
                id: record.id,
                declared: record.n_sessions,
                skills: record.n_skills,
                rows,
                cols,
            });
        }
        Ok(Self::from_matrix(record.id, record.results, Origin::Observed))
    }

    fn from_matrix(id: String, results: Vec<Vec<bool>>, origin: Origin) -> Self {
        let n_sessions = results.len();
        let n_skills = results.first().map_or(0, Vec::len);

        let mut last_wrong = vec![NEVER_WRONG; n_skills];
        for (skill, entry) in last_wrong.iter_mut().enumerate() {
            for session in (0..n_sessions).rev() {
                if !results[session][skill] {
                    *entry = session as i64;
                    break;
                }
            }
        }

        let correct_onwards = (0..n_sessions)
            .map(|session| last_wrong.iter().filter(|&&lw| lw < session as i64).count() as u32)
            .collect();

        Self {
            id,
            n_sessions,
            n_skills,
            results,
            last_wrong,
            correct_onwards,
            origin,
        }
    }

    /// Export the observable outcomes as a serializable record.
    pub fn to_record(&self) -> ParticipantRecord {
        ParticipantRecord {
            id: self.id.clone(),
            n_sessions: self.n_sessions,
            n_skills: self.n_skills,
            results: self.results.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn n_sessions(&self) -> usize {
        self.n_sessions
    }

    pub fn n_skills(&self) -> usize {
        self.n_skills
    }

    pub fn results(&self) -> &[Vec<bool>] {
        &self.results
    }

    pub fn last_wrong(&self) -> &[i64] {
        &self.last_wrong
    }

    pub fn correct_onwards(&self) -> &[u32] {
        &self.correct_onwards
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn observed(matrix: Vec<Vec<bool>>) -> Participant {
        let record = ParticipantRecord {
            id: "t".to_string(),
            n_sessions: matrix.len(),
            n_skills: matrix.first().map_or(0, Vec::len),
            results: matrix,
        };
        Participant::from_record(record).unwrap()
    }

    #[test]
    fn test_last_wrong_all_correct() {
        let p = observed(vec![vec![true, true], vec![true, true]]);
        assert_eq!(p.last_wrong(), &[NEVER_WRONG, NEVER_WRONG]);
        assert_eq!(p.correct_onwards(), &[2, 2]);
    }

    #[test]
    fn test_last_wrong_all_wrong() {
        let p = observed(vec![vec![false], vec![false], vec![false]]);
        assert_eq!(p.last_wrong(), &[2]);
        assert_eq!(p.correct_onwards(), &[0, 0, 0]);
    }

    #[test]
    fn test_last_wrong_ideal_learner() {
        // Wrong everywhere in session one, right from session two onwards.
        let p = observed(vec![vec![false, false], vec![true, true], vec![true, true]]);
        assert_eq!(p.last_wrong(), &[0, 0]);
        assert_eq!(p.correct_onwards(), &[0, 2, 2]);
    }

    #[test]
    fn test_last_wrong_relapse_counts() {
        // Right in session two but wrong again in session three.
        let p = observed(vec![
            vec![false],
            vec![true],
            vec![false],
            vec![true],
        ]);
        assert_eq!(p.last_wrong(), &[2]);
        assert_eq!(p.correct_onwards(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_correct_onwards_is_monotone() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let p = Participant::simulate(
                "m",
                Competence {
                    pre: 0.3,
                    post: 0.9,
                },
                12,
                8,
                &mut rng,
            );
            let counts = p.correct_onwards();
            assert!(counts.windows(2).all(|w| w[0] <= w[1]));
            assert!(counts.iter().all(|&c| c <= 8));
        }
    }

    #[test]
    fn test_simulate_extreme_competence() {
        let mut rng = StdRng::seed_from_u64(1);
        let perfect = Participant::simulate(
            "hi",
            Competence {
                pre: 1.0,
                post: 1.0,
            },
            5,
            4,
            &mut rng,
        );
        assert_eq!(perfect.correct_onwards(), &[4, 4, 4, 4, 4]);

        let hopeless = Participant::simulate(
            "lo",
            Competence {
                pre: 0.0,
                post: 0.0,
            },
            5,
            4,
            &mut rng,
        );
        assert_eq!(hopeless.correct_onwards(), &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_from_record_rejects_ragged_matrix() {
        let record = ParticipantRecord {
            id: "bad".to_string(),
            n_sessions: 2,
            n_skills: 2,
            results: vec![vec![true, false], vec![true]],
        };
        assert!(matches!(
            Participant::from_record(record),
            Err(MergeError::MalformedResultMatrix { .. })
        ));
    }

    #[test]
    fn test_from_record_rejects_wrong_dimensions() {
        let record = ParticipantRecord {
            id: "bad".to_string(),
            n_sessions: 3,
            n_skills: 1,
            results: vec![vec![true], vec![false]],
        };
        assert!(Participant::from_record(record).is_err());
    }

    #[test]
    fn test_record_round_trip_preserves_derived_stats() {
        let mut rng = StdRng::seed_from_u64(99);
        let original = Participant::simulate(
            "r",
            Competence {
                pre: 0.4,
                post: 0.8,
            },
            6,
            5,
            &mut rng,
        );
        let reloaded = Participant::from_record(original.to_record()).unwrap();
        assert_eq!(reloaded.last_wrong(), original.last_wrong());
        assert_eq!(reloaded.correct_onwards(), original.correct_onwards());
        assert_eq!(reloaded.origin(), Origin::Observed);
    }
}
