//! Experimental factor descriptors
//!
//! A study crosses two kinds of factors: background variables, which the
//! participants bring with them, and manipulations, which the experimenters
//! randomise. Each descriptor comes in a simulated form, carrying the
//! generative model used to synthesise data, and an observed form, where
//! flags are loaded from outside and no model is available. The two forms
//! share a read interface but are separate data-construction paths.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::effects::Effect;

/// Configuration errors are fatal at construction time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("poor boundary {poor} lies above good boundary {good}")]
    BoundariesSwapped { poor: f64, good: f64 },

    #[error("boundary {value} lies outside [0, 1]")]
    BoundaryOutOfRange { value: f64 },

    #[error("minimum quality difference {0} is negative")]
    NegativeQualityDifference(f64),

    #[error("cohort needs at least one participant")]
    EmptyCohort,

    #[error("cohort needs at least one session and one skill")]
    EmptySchedule,

    #[error("size ladder needs at least one size and one iteration")]
    EmptySizeLadder,

    #[error("factor name must not be empty")]
    EmptyFactorName,

    #[error("duplicate factor name '{0}'")]
    DuplicateFactorName(String),

    #[error("background '{name}' has affected fraction {fraction} outside [0, 1]")]
    FractionOutOfRange { name: String, fraction: f64 },

    #[error("factor '{0}' is observed-only and cannot be simulated")]
    ObservedFactorInSimulation(String),

    #[error("cohort has no simulated outcomes to analyse")]
    ResultsNotComputed,
}

/// How much the experimenters know about a background variable.
///
/// Known backgrounds are available before the study starts and steer the
/// subgroup partition. Discovered backgrounds surface during the study and
/// are analysed but never balanced against. Unknown backgrounds only exist
/// inside the simulation, as a source of unexplained variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Knowledge {
    Known,
    Discovered,
    Unknown,
}

/// A binary background variable.
#[derive(Debug, Clone)]
pub struct Background {
    name: String,
    knowledge: Knowledge,
    origin: BackgroundOrigin,
}

/// Construction path of a background variable.
#[derive(Debug, Clone)]
pub enum BackgroundOrigin {
    /// Carries the generative model: membership probability and the
    /// effects on competence before and after training.
    Simulated {
        pre: Effect,
        post: Effect,
        fraction: f64,
    },
    /// Membership flags are loaded from external records.
    Observed,
}

impl Background {
    /// A background with a generative model, for simulated cohorts.
    pub fn simulated(
        name: impl Into<String>,
        knowledge: Knowledge,
        pre: Effect,
        post: Effect,
        fraction: f64,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyFactorName);
        }
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::FractionOutOfRange { name, fraction });
        }
        Ok(Self {
            name,
            knowledge,
            origin: BackgroundOrigin::Simulated {
                pre,
                post,
                fraction,
            },
        })
    }

    /// A background whose flags come from loaded data.
    pub fn observed(name: impl Into<String>, knowledge: Knowledge) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyFactorName);
        }
        Ok(Self {
            name,
            knowledge,
            origin: BackgroundOrigin::Observed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn knowledge(&self) -> Knowledge {
        self.knowledge
    }

    pub fn origin(&self) -> &BackgroundOrigin {
        &self.origin
    }
}

/// A sampling function drawing one continuous background value per call.
pub type Sampler = Arc<dyn Fn(&mut StdRng) -> f64 + Send + Sync>;

/// A transform `(competence, value) -> competence` for continuous backgrounds.
pub type ValueTransform = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// A continuous background variable, such as age.
#[derive(Clone)]
pub struct ContinuousBackground {
    name: String,
    origin: ContinuousOrigin,
}

/// Construction path of a continuous background variable.
#[derive(Clone)]
pub enum ContinuousOrigin {
    Simulated {
        sampler: Sampler,
        pre: ValueTransform,
        post: ValueTransform,
    },
    Observed,
}

impl ContinuousBackground {
    pub fn simulated(
        name: impl Into<String>,
        sampler: Sampler,
        pre: ValueTransform,
        post: ValueTransform,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyFactorName);
        }
        Ok(Self {
            name,
            origin: ContinuousOrigin::Simulated { sampler, pre, post },
        })
    }

    pub fn observed(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyFactorName);
        }
        Ok(Self {
            name,
            origin: ContinuousOrigin::Observed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &ContinuousOrigin {
        &self.origin
    }
}

impl fmt::Debug for ContinuousBackground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.origin {
            ContinuousOrigin::Simulated { .. } => "Simulated",
            ContinuousOrigin::Observed => "Observed",
        };
        f.debug_struct("ContinuousBackground")
            .field("name", &self.name)
            .field("origin", &kind)
            .finish()
    }
}

/// A randomised change to the training module.
///
/// Manipulations are always binary: applied or not applied. Assignment is
/// deterministic from the subgroup partition, see the cohort module.
#[derive(Debug, Clone)]
pub struct Manipulation {
    name: String,
    origin: ManipulationOrigin,
}

/// Construction path of a manipulation.
#[derive(Debug, Clone)]
pub enum ManipulationOrigin {
    /// Carries the post-training effect used when simulating.
    Simulated { effect: Effect },
    /// Flags are loaded from external records.
    Observed,
}

impl Manipulation {
    pub fn simulated(name: impl Into<String>, effect: Effect) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyFactorName);
        }
        Ok(Self {
            name,
            origin: ManipulationOrigin::Simulated { effect },
        })
    }

    pub fn observed(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyFactorName);
        }
        Ok(Self {
            name,
            origin: ManipulationOrigin::Observed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &ManipulationOrigin {
        &self.origin
    }
}

/// Skill thresholds for the boundary test.
///
/// Participants whose fraction of correct first-try answers lies below
/// `poor` are counted as having poor skills, those above `good` as having
/// good skills. Identical boundaries are allowed but reward modules that
/// nudge people from just below to just above a single line, so a gap is
/// usually wanted. The minimum quality difference is the smallest
/// difference between two posteriors considered practically significant.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Boundaries {
    poor: f64,
    good: f64,
    minimum_quality_difference: f64,
}

impl Boundaries {
    pub fn new(
        poor: f64,
        good: f64,
        minimum_quality_difference: f64,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&poor) {
            return Err(ConfigError::BoundaryOutOfRange { value: poor });
        }
        if !(0.0..=1.0).contains(&good) {
            return Err(ConfigError::BoundaryOutOfRange { value: good });
        }
        if poor > good {
            return Err(ConfigError::BoundariesSwapped { poor, good });
        }
        if minimum_quality_difference < 0.0 {
            return Err(ConfigError::NegativeQualityDifference(
                minimum_quality_difference,
            ));
        }
        Ok(Self {
            poor,
            good,
            minimum_quality_difference,
        })
    }

    pub fn poor(&self) -> f64 {
        self.poor
    }

    pub fn good(&self) -> f64 {
        self.good
    }

    pub fn minimum_quality_difference(&self) -> f64 {
        self.minimum_quality_difference
    }
}
