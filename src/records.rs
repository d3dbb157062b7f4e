//! Serialized record types for externally stored data
//!
//! The core never touches files or the network. The ETL layer hands it
//! flat key/value records: one outcome record per participant and one
//! flag record per factor family, each carrying the participant id list
//! it was written against. Merging a record into a cohort goes through id
//! matching, and any mismatch raises a recoverable [`MergeError`] instead
//! of corrupting the merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when merging loaded records against a cohort.
///
/// These are recoverable at the call site: the caller decides whether to
/// abort the load or skip the malformed record.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("expected {expected} records, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("duplicate participant id '{0}'")]
    DuplicateId(String),

    #[error("participant id '{0}' does not match any cohort member")]
    UnknownId(String),

    #[error("no record found for participant '{0}'")]
    MissingRecord(String),

    #[error("flag vector for '{factor}' has length {actual}, expected {expected}")]
    FlagLengthMismatch {
        factor: String,
        expected: usize,
        actual: usize,
    },

    #[error("no flag vector stored for factor '{0}'")]
    MissingFlags(String),

    #[error("factor '{0}' already has values attached")]
    DuplicateFactor(String),

    #[error("record for '{id}' declares {declared} sessions x {skills} skills but stores a {rows}x{cols} matrix")]
    MalformedResultMatrix {
        id: String,
        declared: usize,
        skills: usize,
        rows: usize,
        cols: usize,
    },
}

/// First-try outcomes for one participant, as persisted by the ETL layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub n_sessions: usize,
    pub n_skills: usize,
    /// Session-major boolean matrix: `results[session][skill]` is true when
    /// the first answer attempt was correct.
    pub results: Vec<Vec<bool>>,
}

/// Background membership flags for a whole cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundRecord {
    pub ids: Vec<String>,
    pub known: Vec<String>,
    pub discovered: Vec<String>,
    /// Factor name to per-participant flags, parallel to `ids`.
    pub flags: BTreeMap<String, Vec<bool>>,
}

/// Manipulation assignment flags for a whole cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManipulationRecord {
    pub ids: Vec<String>,
    pub manipulations: Vec<String>,
    /// Manipulation name to per-participant flags, parallel to `ids`.
    pub flags: BTreeMap<String, Vec<bool>>,
}

/// Compute the permutation that reorders record data into reference order.
///
/// `permutation[i]` is the position in `ids` of `reference[i]`. Both lists
/// must be duplicate-free and contain exactly the same ids.
pub fn id_permutation(reference: &[String], ids: &[String]) -> Result<Vec<usize>, MergeError> {
    if reference.len() != ids.len() {
        return Err(MergeError::LengthMismatch {
            expected: reference.len(),
            actual: ids.len(),
        });
    }

    let mut positions: BTreeMap<&str, usize> = BTreeMap::new();
    for (position, id) in ids.iter().enumerate() {
        if positions.insert(id.as_str(), position).is_some() {
            return Err(MergeError::DuplicateId(id.clone()));
        }
    }

    let mut seen: BTreeMap<&str, ()> = BTreeMap::new();
    let mut permutation = Vec::with_capacity(reference.len());
    for id in reference {
        if seen.insert(id.as_str(), ()).is_some() {
            return Err(MergeError::DuplicateId(id.clone()));
        }
        match positions.get(id.as_str()) {
            Some(&position) => permutation.push(position),
            None => return Err(MergeError::UnknownId(id.clone())),
        }
    }
    Ok(permutation)
}

/// Reorder a data vector parallel to record ids into reference-id order.
pub fn match_ids<T: Clone>(
    reference: &[String],
    ids: &[String],
    data: &[T],
) -> Result<Vec<T>, MergeError> {
    if ids.len() != data.len() {
        return Err(MergeError::LengthMismatch {
            expected: ids.len(),
            actual: data.len(),
        });
    }
    let permutation = id_permutation(reference, ids)?;
    Ok(permutation.iter().map(|&p| data[p].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_match_ids_reorders_data() {
        let reference = ids(&["a", "b", "c"]);
        let loaded = ids(&["c", "a", "b"]);
        let data = vec![30, 10, 20];
        assert_eq!(match_ids(&reference, &loaded, &data).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_match_ids_identity_order() {
        let reference = ids(&["x", "y"]);
        let data = vec![true, false];
        assert_eq!(
            match_ids(&reference, &reference, &data).unwrap(),
            vec![true, false]
        );
    }

    #[test]
    fn test_match_ids_rejects_length_mismatch() {
        let reference = ids(&["a", "b"]);
        let loaded = ids(&["a"]);
        assert!(matches!(
            match_ids(&reference, &loaded, &[1]),
            Err(MergeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_match_ids_rejects_duplicate_ids() {
        let reference = ids(&["a", "b"]);
        let loaded = ids(&["a", "a"]);
        assert!(matches!(
            match_ids(&reference, &loaded, &[1, 2]),
            Err(MergeError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_match_ids_rejects_unknown_reference_id() {
        let reference = ids(&["a", "z"]);
        let loaded = ids(&["a", "b"]);
        assert!(matches!(
            match_ids(&reference, &loaded, &[1, 2]),
            Err(MergeError::UnknownId(_))
        ));
    }

    #[test]
    fn test_participant_record_json_round_trip() {
        let record = ParticipantRecord {
            id: "p17".to_string(),
            n_sessions: 2,
            n_skills: 3,
            results: vec![vec![true, false, false], vec![true, true, false]],
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ParticipantRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_background_record_json_round_trip() {
        let mut flags = BTreeMap::new();
        flags.insert("left handed".to_string(), vec![true, false]);
        let record = BackgroundRecord {
            ids: ids(&["p0", "p1"]),
            known: vec!["left handed".to_string()],
            discovered: vec![],
            flags,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: BackgroundRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
