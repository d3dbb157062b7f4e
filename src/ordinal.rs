//! Ordinal transform for observed outcomes
//!
//! The experimenter never sees latent competence, only counts and ranks.
//! Analyses that compare groups therefore work on a shared ordinal scale:
//! every distinct observed value maps to a dense integer rank, ties share
//! a rank, and several sequences can be ranked against their combined pool.

use std::cmp::Ordering;

/// Turn a numeric sequence into dense integer ranks.
///
/// Equal values receive equal ranks and ranks run from 0 to the number of
/// distinct values minus one, in ascending numeric order. Input order is
/// preserved in the output.
pub fn ordinalise(values: &[f64]) -> Vec<usize> {
    let mut distinct = values.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    distinct.dedup();

    values
        .iter()
        .map(|v| distinct.partition_point(|d| d < v))
        .collect()
}

/// Rank several sequences against their combined value pool.
///
/// The sequences may have different lengths. Each output sequence has the
/// same length as its input, and ranks are comparable across sequences
/// because they are computed over the union of all inputs.
pub fn ordinalise_many(sequences: &[&[f64]]) -> Vec<Vec<usize>> {
    let combined: Vec<f64> = sequences.iter().flat_map(|s| s.iter().copied()).collect();
    let ranks = ordinalise(&combined);

    let mut out = Vec::with_capacity(sequences.len());
    let mut cut = 0;
    for sequence in sequences {
        out.push(ranks[cut..cut + sequence.len()].to_vec());
        cut += sequence.len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinalise_sorted_input() {
        assert_eq!(ordinalise(&[1.0, 2.0, 3.0]), vec![0, 1, 2]);
    }

    #[test]
    fn test_ordinalise_unsorted_input() {
        assert_eq!(ordinalise(&[3.0, 1.0, 2.0]), vec![2, 0, 1]);
    }

    #[test]
    fn test_ordinalise_ties_share_rank() {
        assert_eq!(ordinalise(&[5.0, 5.0, 3.0]), vec![1, 1, 0]);
    }

    #[test]
    fn test_ordinalise_single_element() {
        assert_eq!(ordinalise(&[42.0]), vec![0]);
    }

    #[test]
    fn test_ordinalise_all_equal() {
        assert_eq!(ordinalise(&[7.0, 7.0, 7.0, 7.0]), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_ordinalise_ranks_are_dense() {
        let ranks = ordinalise(&[10.0, 200.0, 10.0, 3000.0]);
        assert_eq!(ranks, vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_ordinalise_many_combined_scale() {
        let ranked = ordinalise_many(&[&[5.0, 5.0, 3.0], &[7.0]]);
        assert_eq!(ranked, vec![vec![1, 1, 0], vec![2]]);
    }

    #[test]
    fn test_ordinalise_many_preserves_lengths() {
        let ranked = ordinalise_many(&[&[1.0], &[2.0, 0.0, 4.0], &[3.0, 3.0]]);
        assert_eq!(ranked[0].len(), 1);
        assert_eq!(ranked[1].len(), 3);
        assert_eq!(ranked[2].len(), 2);
        assert_eq!(ranked[0], vec![1]);
        assert_eq!(ranked[1], vec![2, 0, 4]);
        assert_eq!(ranked[2], vec![3, 3]);
    }

    #[test]
    fn test_ordinalise_many_single_sequence_matches_ordinalise() {
        let data = [0.3, 0.9, 0.3, 0.1];
        assert_eq!(ordinalise_many(&[&data]), vec![ordinalise(&data)]);
    }
}
