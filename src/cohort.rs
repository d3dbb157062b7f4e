//! Cohort construction, subgrouping and manipulation assignment
//!
//! A cohort owns its participants, the per-factor membership flags, and
//! the partition of participant indices into subgroups of identical known
//! background. Simulated cohorts additionally carry latent competence.
//! Flags and subgroups are written once at construction and read-only
//! afterwards.
//!
//! Manipulation assignment is deterministic: for manipulation i each
//! subgroup's index-sorted member list is cut into 2^(i+1) near-equal
//! contiguous blocks and alternating blocks are flagged as treated. Every
//! manipulation splits against the same base partition, so the flags form
//! mutually independent binary partitions, each balanced within every
//! subgroup.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use crate::effects::Effect;
use crate::factors::{
    Background, BackgroundOrigin, ConfigError, ContinuousBackground, ContinuousOrigin, Knowledge,
    Manipulation, ManipulationOrigin, Sampler,
};
use crate::ordinal::ordinalise;
use crate::participant::{Competence, Participant};
use crate::records::{
    id_permutation, match_ids, BackgroundRecord, ManipulationRecord, MergeError,
    ParticipantRecord,
};

/// Subgroup key for participants affected by no known background.
pub const NO_BACKGROUND: &str = "none";

/// Baseline competence before any background effect is applied.
#[derive(Clone)]
pub enum Baseline {
    /// Every participant starts from the same competence.
    Fixed(f64),
    /// Per-participant draws from a supplied distribution.
    Sampled(Sampler),
}

impl std::fmt::Debug for Baseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Baseline::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Baseline::Sampled(_) => f.write_str("Sampled"),
        }
    }
}

/// Everything needed to synthesise a cohort.
#[derive(Debug, Clone)]
pub struct CohortConfig {
    pub n_participants: usize,
    pub n_sessions: usize,
    pub n_skills: usize,
    pub baseline: Baseline,
    pub backgrounds: Vec<Background>,
    pub continuous_backgrounds: Vec<ContinuousBackground>,
}

/// Observable cohort-level outcomes, derived once after simulation or load.
///
/// The canonical observable is the per-session locked-in skill count of
/// each participant, not the raw boolean matrix.
#[derive(Debug, Clone)]
pub struct Outcomes {
    /// `by_session[session][participant]`: skills locked in from that
    /// session onwards.
    by_session: Vec<Vec<f64>>,
    /// First-session counts per participant.
    initial: Vec<f64>,
    /// Last-session counts per participant.
    last: Vec<f64>,
    /// Combined ordinal ranking across sessions, later sessions dominant.
    ranking: Vec<f64>,
}

impl Outcomes {
    fn from_participants(participants: &[Participant], n_sessions: usize) -> Self {
        let n = participants.len();
        let mut by_session = vec![vec![0.0; n]; n_sessions];
        for (i, participant) in participants.iter().enumerate() {
            for (session, row) in by_session.iter_mut().enumerate() {
                row[i] = f64::from(participant.correct_onwards()[session]);
            }
        }
        let initial = by_session.first().cloned().unwrap_or_default();
        let last = by_session.last().cloned().unwrap_or_default();
        let ranking = Self::rank(&by_session, n);
        Self {
            by_session,
            initial,
            last,
            ranking,
        }
    }

    /// Collapse the per-session rankings into one total ordering, weighting
    /// each session by (n+1)^-i counted from the last session backwards so
    /// that later sessions dominate earlier ones.
    fn rank(by_session: &[Vec<f64>], n: usize) -> Vec<f64> {
        let n_sessions = by_session.len();
        let mut total = vec![0.0; n];
        for i in 0..n_sessions.saturating_sub(1) {
            let session_ranks = ordinalise(&by_session[n_sessions - 1 - i]);
            let weight = ((n + 1) as f64).powi(i as i32);
            for (t, rank) in total.iter_mut().zip(&session_ranks) {
                *t += *rank as f64 / weight;
            }
        }
        ordinalise(&total).into_iter().map(|r| r as f64).collect()
    }

    pub fn by_session(&self) -> &[Vec<f64>] {
        &self.by_session
    }

    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    pub fn last(&self) -> &[f64] {
        &self.last
    }

    pub fn ranking(&self) -> &[f64] {
        &self.ranking
    }
}

/// A cohort of participants with factor flags and the subgroup partition.
#[derive(Debug, Clone)]
pub struct Cohort {
    n_sessions: usize,
    n_skills: usize,
    ids: Vec<String>,
    participants: Vec<Participant>,
    backgrounds: Vec<Background>,
    continuous_backgrounds: Vec<ContinuousBackground>,
    background_flags: BTreeMap<String, Vec<bool>>,
    cbv_values: BTreeMap<String, Vec<f64>>,
    subgroups: BTreeMap<String, Vec<usize>>,
    manipulations: Vec<Manipulation>,
    manipulation_flags: BTreeMap<String, Vec<bool>>,
    pre_competence: Option<Vec<f64>>,
    post_competence: Option<Vec<f64>>,
    outcomes: Option<Outcomes>,
}

/// Partition participant indices by the sorted set of factor names that
/// flag them. Unflagged participants go to the [`NO_BACKGROUND`] group.
fn partition_by_flags(
    n: usize,
    factors: &[(&str, &[bool])],
) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let mut names: Vec<&str> = factors
            .iter()
            .filter(|(_, flags)| flags[i])
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        let key = if names.is_empty() {
            NO_BACKGROUND.to_string()
        } else {
            names.join(", ")
        };
        groups.entry(key).or_default().push(i);
    }
    groups
}

impl Cohort {
    /// Synthesise a cohort: draw factor memberships and compute every
    /// participant's pre-training competence.
    ///
    /// Background pre-effects are applied to their flagged subsets in the
    /// order the backgrounds appear in the config. Effects compose and do
    /// not commute in general, so that order is part of the contract.
    pub fn simulate(config: &CohortConfig, rng: &mut StdRng) -> Result<Self, ConfigError> {
        let n = config.n_participants;
        if n == 0 {
            return Err(ConfigError::EmptyCohort);
        }
        if config.n_sessions == 0 || config.n_skills == 0 {
            return Err(ConfigError::EmptySchedule);
        }
        Self::check_unique_names(
            config
                .backgrounds
                .iter()
                .map(Background::name)
                .chain(config.continuous_backgrounds.iter().map(ContinuousBackground::name)),
        )?;

        let ids: Vec<String> = (0..n).map(|i| i.to_string()).collect();

        let mut background_flags = BTreeMap::new();
        for background in &config.backgrounds {
            let fraction = match background.origin() {
                BackgroundOrigin::Simulated { fraction, .. } => *fraction,
                BackgroundOrigin::Observed => {
                    return Err(ConfigError::ObservedFactorInSimulation(
                        background.name().to_string(),
                    ))
                }
            };
            let flags: Vec<bool> = (0..n).map(|_| rng.gen::<f64>() < fraction).collect();
            background_flags.insert(background.name().to_string(), flags);
        }

        let mut cbv_values = BTreeMap::new();
        for cbv in &config.continuous_backgrounds {
            let sampler = match cbv.origin() {
                ContinuousOrigin::Simulated { sampler, .. } => sampler.clone(),
                ContinuousOrigin::Observed => {
                    return Err(ConfigError::ObservedFactorInSimulation(
                        cbv.name().to_string(),
                    ))
                }
            };
            let values: Vec<f64> = (0..n).map(|_| sampler(rng)).collect();
            cbv_values.insert(cbv.name().to_string(), values);
        }

        let mut pre = match &config.baseline {
            Baseline::Fixed(value) => vec![*value; n],
            Baseline::Sampled(sampler) => (0..n).map(|_| sampler(rng)).collect(),
        };
        for background in &config.backgrounds {
            if let BackgroundOrigin::Simulated { pre: effect, .. } = background.origin() {
                effect.apply_to_flagged(&mut pre, &background_flags[background.name()]);
            }
        }
        for cbv in &config.continuous_backgrounds {
            if let ContinuousOrigin::Simulated { pre: transform, .. } = cbv.origin() {
                let values = &cbv_values[cbv.name()];
                for (competence, &value) in pre.iter_mut().zip(values) {
                    *competence = transform(*competence, value);
                }
            }
        }

        let known: Vec<(&str, &[bool])> = config
            .backgrounds
            .iter()
            .filter(|b| b.knowledge() == Knowledge::Known)
            .map(|b| (b.name(), background_flags[b.name()].as_slice()))
            .collect();
        let subgroups = partition_by_flags(n, &known);
        debug!(
            participants = n,
            subgroups = subgroups.len(),
            "cohort synthesised"
        );

        Ok(Self {
            n_sessions: config.n_sessions,
            n_skills: config.n_skills,
            ids,
            participants: Vec::new(),
            backgrounds: config.backgrounds.clone(),
            continuous_backgrounds: config.continuous_backgrounds.clone(),
            background_flags,
            cbv_values,
            subgroups,
            manipulations: Vec::new(),
            manipulation_flags: BTreeMap::new(),
            pre_competence: Some(pre),
            post_competence: None,
            outcomes: None,
        })
    }

    /// Rebuild a cohort from externally loaded records.
    ///
    /// All record data is reordered into the order of `ids`; duplicate or
    /// unresolvable ids raise a [`MergeError`] without touching the cohort.
    pub fn from_records(
        n_sessions: usize,
        n_skills: usize,
        ids: Vec<String>,
        backgrounds: Option<&BackgroundRecord>,
        manipulations: Option<&ManipulationRecord>,
        participant_records: Vec<ParticipantRecord>,
    ) -> Result<Self, MergeError> {
        let n = ids.len();

        let record_ids: Vec<String> =
            participant_records.iter().map(|r| r.id.clone()).collect();
        let permutation = id_permutation(&ids, &record_ids)?;
        let mut participants = Vec::with_capacity(n);
        for &position in &permutation {
            let participant = Participant::from_record(participant_records[position].clone())?;
            // Extra sessions are tolerated and ignored; a skill-count
            // mismatch would skew every quality fraction, so it is rejected.
            if participant.n_sessions() < n_sessions || participant.n_skills() != n_skills {
                return Err(MergeError::MalformedResultMatrix {
                    id: participant.id().to_string(),
                    declared: n_sessions,
                    skills: n_skills,
                    rows: participant.n_sessions(),
                    cols: participant.n_skills(),
                });
            }
            participants.push(participant);
        }

        let mut cohort_backgrounds = Vec::new();
        let mut background_flags = BTreeMap::new();
        if let Some(record) = backgrounds {
            let permutation = id_permutation(&ids, &record.ids)?;
            for (names, knowledge) in [
                (&record.known, Knowledge::Known),
                (&record.discovered, Knowledge::Discovered),
            ] {
                for name in names {
                    let flags = record
                        .flags
                        .get(name)
                        .ok_or_else(|| MergeError::MissingFlags(name.clone()))?;
                    if flags.len() != n {
                        return Err(MergeError::FlagLengthMismatch {
                            factor: name.clone(),
                            expected: n,
                            actual: flags.len(),
                        });
                    }
                    let reordered: Vec<bool> = permutation.iter().map(|&p| flags[p]).collect();
                    background_flags.insert(name.clone(), reordered);
                    // Observed factors always validate: names were checked
                    // non-empty when the record was written.
                    if let Ok(background) = Background::observed(name.clone(), knowledge) {
                        cohort_backgrounds.push(background);
                    }
                }
            }
        }

        let mut cohort_manipulations = Vec::new();
        let mut manipulation_flags = BTreeMap::new();
        if let Some(record) = manipulations {
            let permutation = id_permutation(&ids, &record.ids)?;
            for name in &record.manipulations {
                let flags = record
                    .flags
                    .get(name)
                    .ok_or_else(|| MergeError::MissingFlags(name.clone()))?;
                if flags.len() != n {
                    return Err(MergeError::FlagLengthMismatch {
                        factor: name.clone(),
                        expected: n,
                        actual: flags.len(),
                    });
                }
                let reordered: Vec<bool> = permutation.iter().map(|&p| flags[p]).collect();
                manipulation_flags.insert(name.clone(), reordered);
                if let Ok(manipulation) = Manipulation::observed(name.clone()) {
                    cohort_manipulations.push(manipulation);
                }
            }
        }

        let known: Vec<(&str, &[bool])> = cohort_backgrounds
            .iter()
            .filter(|b| b.knowledge() == Knowledge::Known)
            .map(|b| (b.name(), background_flags[b.name()].as_slice()))
            .collect();
        let subgroups = partition_by_flags(n, &known);
        let outcomes = Outcomes::from_participants(&participants, n_sessions);

        Ok(Self {
            n_sessions,
            n_skills,
            ids,
            participants,
            backgrounds: cohort_backgrounds,
            continuous_backgrounds: Vec::new(),
            background_flags,
            cbv_values: BTreeMap::new(),
            subgroups,
            manipulations: cohort_manipulations,
            manipulation_flags,
            pre_competence: None,
            post_competence: None,
            outcomes: Some(outcomes),
        })
    }

    /// Attach externally observed continuous background values, reordered
    /// into cohort id order.
    ///
    /// The background must be freshly constructed (usually via
    /// [`ContinuousBackground::observed`]); attaching under a name that
    /// already carries values is rejected.
    pub fn attach_continuous_values(
        &mut self,
        background: ContinuousBackground,
        ids: &[String],
        values: &[f64],
    ) -> Result<(), MergeError> {
        if self.cbv_values.contains_key(background.name()) {
            return Err(MergeError::DuplicateFactor(background.name().to_string()));
        }
        let reordered = match_ids(&self.ids, ids, values)?;
        self.cbv_values
            .insert(background.name().to_string(), reordered);
        self.continuous_backgrounds.push(background);
        Ok(())
    }

    fn check_unique_names<'a>(
        names: impl Iterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for name in names {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateFactorName(name.to_string()));
            }
        }
        Ok(())
    }

    /// Assign manipulations by recursive halving of every subgroup.
    ///
    /// Manipulation i cuts each subgroup into 2^(i+1) blocks with
    /// breakpoints rounded to the nearest member, flagging alternating
    /// blocks. Tiny subgroups may produce empty blocks; the statistical
    /// routines treat the resulting empty slices as absent evidence.
    pub fn assign_manipulations(
        &mut self,
        manipulations: Vec<Manipulation>,
    ) -> Result<(), ConfigError> {
        Self::check_unique_names(
            self.backgrounds
                .iter()
                .map(Background::name)
                .chain(self.continuous_backgrounds.iter().map(ContinuousBackground::name))
                .chain(manipulations.iter().map(Manipulation::name)),
        )?;

        let n = self.ids.len();
        for (i, manipulation) in manipulations.iter().enumerate() {
            let n_blocks = 1usize << (i + 1);
            let mut flags = vec![false; n];
            for members in self.subgroups.values() {
                let len = members.len();
                let breakpoints: Vec<usize> = (0..=n_blocks)
                    .map(|j| ((j as f64 / n_blocks as f64) * len as f64).round() as usize)
                    .collect();
                for pair in 0..n_blocks / 2 {
                    for &index in &members[breakpoints[2 * pair]..breakpoints[2 * pair + 1]] {
                        flags[index] = true;
                    }
                }
            }
            self.manipulation_flags
                .insert(manipulation.name().to_string(), flags);
        }
        self.manipulations = manipulations;
        Ok(())
    }

    /// Simulate the training run: compute post-training competence and
    /// every participant's session outcomes.
    ///
    /// `default_effect` is what the unmanipulated module does to
    /// competence. Manipulation effects apply to their treated subsets,
    /// then background and continuous-background post-effects, in config
    /// order.
    pub fn run_simulation(
        &mut self,
        default_effect: Effect,
        rng: &mut StdRng,
    ) -> Result<(), ConfigError> {
        let pre = self
            .pre_competence
            .as_ref()
            .ok_or(ConfigError::ResultsNotComputed)?
            .clone();
        let mut post: Vec<f64> = pre.iter().map(|&x| default_effect.apply(x)).collect();

        for manipulation in &self.manipulations {
            match manipulation.origin() {
                ManipulationOrigin::Simulated { effect } => {
                    effect.apply_to_flagged(&mut post, &self.manipulation_flags[manipulation.name()]);
                }
                ManipulationOrigin::Observed => {
                    return Err(ConfigError::ObservedFactorInSimulation(
                        manipulation.name().to_string(),
                    ))
                }
            }
        }
        for background in &self.backgrounds {
            if let BackgroundOrigin::Simulated { post: effect, .. } = background.origin() {
                effect.apply_to_flagged(&mut post, &self.background_flags[background.name()]);
            }
        }
        for cbv in &self.continuous_backgrounds {
            if let ContinuousOrigin::Simulated { post: transform, .. } = cbv.origin() {
                let values = &self.cbv_values[cbv.name()];
                for (competence, &value) in post.iter_mut().zip(values) {
                    *competence = transform(*competence, value);
                }
            }
        }

        self.participants = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Participant::simulate(
                    id.clone(),
                    Competence {
                        pre: pre[i],
                        post: post[i],
                    },
                    self.n_sessions,
                    self.n_skills,
                    rng,
                )
            })
            .collect();
        self.outcomes = Some(Outcomes::from_participants(
            &self.participants,
            self.n_sessions,
        ));
        self.post_competence = Some(post);
        debug!(participants = self.ids.len(), "simulation run complete");
        Ok(())
    }

    pub fn n_participants(&self) -> usize {
        self.ids.len()
    }

    pub fn n_sessions(&self) -> usize {
        self.n_sessions
    }

    pub fn n_skills(&self) -> usize {
        self.n_skills
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn backgrounds(&self) -> &[Background] {
        &self.backgrounds
    }

    /// Backgrounds the experimenters can analyse: known and discovered,
    /// never the unknown ones driving hidden variance.
    pub fn analysed_backgrounds(&self) -> impl Iterator<Item = &Background> {
        self.backgrounds
            .iter()
            .filter(|b| b.knowledge() != Knowledge::Unknown)
    }

    pub fn continuous_backgrounds(&self) -> &[ContinuousBackground] {
        &self.continuous_backgrounds
    }

    pub fn manipulations(&self) -> &[Manipulation] {
        &self.manipulations
    }

    pub fn background_flags(&self, name: &str) -> Option<&[bool]> {
        self.background_flags.get(name).map(Vec::as_slice)
    }

    pub fn manipulation_flags(&self, name: &str) -> Option<&[bool]> {
        self.manipulation_flags.get(name).map(Vec::as_slice)
    }

    /// Flags for any factor, manipulation or background.
    pub fn factor_flags(&self, name: &str) -> Option<&[bool]> {
        self.manipulation_flags(name)
            .or_else(|| self.background_flags(name))
    }

    pub fn cbv_values(&self, name: &str) -> Option<&[f64]> {
        self.cbv_values.get(name).map(Vec::as_slice)
    }

    pub fn subgroups(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.subgroups
    }

    /// Partition of the cohort by manipulation-treatment signature.
    pub fn manipulation_groups(&self) -> BTreeMap<String, Vec<usize>> {
        let factors: Vec<(&str, &[bool])> = self
            .manipulations
            .iter()
            .map(|m| (m.name(), self.manipulation_flags[m.name()].as_slice()))
            .collect();
        partition_by_flags(self.ids.len(), &factors)
    }

    pub fn pre_competence(&self) -> Option<&[f64]> {
        self.pre_competence.as_deref()
    }

    pub fn post_competence(&self) -> Option<&[f64]> {
        self.post_competence.as_deref()
    }

    pub fn outcomes(&self) -> Option<&Outcomes> {
        self.outcomes.as_ref()
    }

    /// Export the observable outcome records for external persistence.
    pub fn to_participant_records(&self) -> Vec<ParticipantRecord> {
        self.participants.iter().map(Participant::to_record).collect()
    }

    /// Export background membership flags for external persistence.
    pub fn to_background_record(&self) -> BackgroundRecord {
        let mut known = Vec::new();
        let mut discovered = Vec::new();
        let mut flags = BTreeMap::new();
        for background in &self.backgrounds {
            match background.knowledge() {
                Knowledge::Known => known.push(background.name().to_string()),
                Knowledge::Discovered => discovered.push(background.name().to_string()),
                // Unknown backgrounds exist only inside the simulation and
                // are never written out.
                Knowledge::Unknown => continue,
            }
            flags.insert(
                background.name().to_string(),
                self.background_flags[background.name()].clone(),
            );
        }
        BackgroundRecord {
            ids: self.ids.clone(),
            known,
            discovered,
            flags,
        }
    }

    /// Export manipulation assignment flags for external persistence.
    pub fn to_manipulation_record(&self) -> ManipulationRecord {
        ManipulationRecord {
            ids: self.ids.clone(),
            manipulations: self
                .manipulations
                .iter()
                .map(|m| m.name().to_string())
                .collect(),
            flags: self.manipulation_flags.clone(),
        }
    }

    /// Human-readable description of the cohort composition.
    pub fn describe(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let n = self.ids.len();
        let _ = writeln!(out, "Cohort of {n} participants");

        for (label, knowledge) in [
            ("known", Knowledge::Known),
            ("discovered", Knowledge::Discovered),
            ("unknown", Knowledge::Unknown),
        ] {
            for background in self
                .backgrounds
                .iter()
                .filter(|b| b.knowledge() == knowledge)
            {
                let affected = self.background_flags[background.name()]
                    .iter()
                    .filter(|&&f| f)
                    .count();
                let _ = writeln!(
                    out,
                    "  {label} background '{}': {affected} affected ({:.2} of cohort)",
                    background.name(),
                    affected as f64 / n as f64
                );
            }
        }
        for cbv in &self.continuous_backgrounds {
            let values = &self.cbv_values[cbv.name()];
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let _ = writeln!(
                out,
                "  continuous background '{}': mean {mean:.2}, range {lo:.2}-{hi:.2}",
                cbv.name()
            );
        }

        let _ = writeln!(out, "Subgroups by known background:");
        for (name, members) in &self.subgroups {
            let _ = writeln!(out, "  '{name}': {} members", members.len());
        }
        if !self.manipulations.is_empty() {
            let _ = writeln!(out, "Manipulation groups:");
            for (name, members) in self.manipulation_groups() {
                let _ = writeln!(out, "  '{name}': {} members", members.len());
            }
        }
        out
    }
}
