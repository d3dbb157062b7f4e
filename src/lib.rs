//! factex - Factorial experiment simulation and Bayesian evaluation
//!
//! This library simulates factorial field studies of a skills training
//! module and evaluates their outcomes. A cohort of participants, shaped
//! by background variables, is crossed with randomised manipulations of
//! the module; per-session first-try outcomes are simulated from latent
//! competence, and the evaluation battery reads off closed-form Bayesian
//! posteriors over the quality differences between treatment groups. The
//! same battery runs unchanged on externally observed outcome records.

pub mod bayes;
pub mod cli;
pub mod cohort;
pub mod effects;
pub mod factors;
pub mod freq;
pub mod ordinal;
pub mod participant;
pub mod power;
pub mod records;
pub mod study;
