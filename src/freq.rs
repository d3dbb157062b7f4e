//! Frequentist companion tests
//!
//! Quick rank-based cross-checks run alongside the Bayesian battery:
//! Mood's median test, the Mann-Whitney U rank test, and a whole-cohort
//! sign test. They are informational sanity checks and never gate the
//! Bayesian results. Empty treatment or control slices yield `None`
//! rather than an error, so degenerate subgroups pass through harmlessly.

use serde::Serialize;

use crate::bayes::ln_gamma;

/// A test statistic with its two-sided p-value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestStat {
    pub statistic: f64,
    pub p_value: f64,
}

/// Median of a sample; NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Complementary error function, rational approximation with absolute
/// error below 1.2e-7 (Numerical Recipes erfcc).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
            .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Upper tail of the standard normal distribution.
fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Upper tail of the chi-squared distribution with one degree of freedom.
fn chi2_sf_1df(x: f64) -> f64 {
    erfc((x / 2.0).sqrt())
}

/// Mood's median test on two samples, ties counted above the median.
///
/// Returns the chi-squared statistic (one degree of freedom, Yates
/// continuity correction) and its p-value, or `None` when either sample
/// is empty.
pub fn median_test(treatment: &[f64], control: &[f64]) -> Option<TestStat> {
    if treatment.is_empty() || control.is_empty() {
        return None;
    }
    let combined: Vec<f64> = treatment.iter().chain(control).copied().collect();
    let grand_median = median(&combined);

    let above_t = treatment.iter().filter(|&&v| v >= grand_median).count() as f64;
    let below_t = treatment.len() as f64 - above_t;
    let above_c = control.iter().filter(|&&v| v >= grand_median).count() as f64;
    let below_c = control.len() as f64 - above_c;

    let n = above_t + below_t + above_c + below_c;
    let row_above = above_t + above_c;
    let row_below = below_t + below_c;
    let col_t = above_t + below_t;
    let col_c = above_c + below_c;
    if row_above == 0.0 || row_below == 0.0 {
        // Every observation landed on one side; no evidence either way.
        return Some(TestStat {
            statistic: 0.0,
            p_value: 1.0,
        });
    }

    let mut statistic = 0.0;
    for (observed, row, col) in [
        (above_t, row_above, col_t),
        (above_c, row_above, col_c),
        (below_t, row_below, col_t),
        (below_c, row_below, col_c),
    ] {
        let expected = row * col / n;
        let deviation = (observed - expected).abs() - 0.5;
        let deviation = deviation.max(0.0);
        statistic += deviation * deviation / expected;
    }

    Some(TestStat {
        statistic,
        p_value: chi2_sf_1df(statistic),
    })
}

/// Midranks (1-based, ties averaged) of the combined sample, plus the tie
/// correction term `sum(t^3 - t)` over tie groups.
fn midranks(combined: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..combined.len()).collect();
    order.sort_by(|&a, &b| {
        combined[a]
            .partial_cmp(&combined[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; combined.len()];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && combined[order[j + 1]] == combined[order[i]] {
            j += 1;
        }
        let tied = (j - i + 1) as f64;
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &index in &order[i..=j] {
            ranks[index] = rank;
        }
        tie_term += tied * tied * tied - tied;
        i = j + 1;
    }
    (ranks, tie_term)
}

/// Mann-Whitney U rank test, two-sided, normal approximation with tie
/// correction. Returns `None` when either sample is empty.
pub fn mann_whitney_u(treatment: &[f64], control: &[f64]) -> Option<TestStat> {
    let n1 = treatment.len() as f64;
    let n2 = control.len() as f64;
    if treatment.is_empty() || control.is_empty() {
        return None;
    }

    let combined: Vec<f64> = treatment.iter().chain(control).copied().collect();
    let (ranks, tie_term) = midranks(&combined);
    let rank_sum: f64 = ranks[..treatment.len()].iter().sum();
    let u = rank_sum - n1 * (n1 + 1.0) / 2.0;

    let n = n1 + n2;
    let mean = n1 * n2 / 2.0;
    let variance = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if variance <= 0.0 {
        // All observations tied; the test carries no information.
        return Some(TestStat {
            statistic: u,
            p_value: 1.0,
        });
    }

    // Continuity correction toward the mean.
    let z = (u - mean - 0.5 * (u - mean).signum()) / variance.sqrt();
    let p_value = (2.0 * normal_sf(z.abs())).min(1.0);
    Some(TestStat {
        statistic: u,
        p_value,
    })
}

/// Exact two-sided sign test: probability of an outcome at least as
/// unlikely as `successes` under Binomial(trials, 1/2).
pub fn sign_test(successes: u64, trials: u64) -> f64 {
    if trials == 0 {
        return 1.0;
    }
    let n = trials as f64;
    let ln_half_pow = n * 0.5_f64.ln();
    let ln_pmf = |k: f64| ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0) + ln_half_pow;

    let observed = ln_pmf(successes as f64);
    let mut p = 0.0;
    for k in 0..=trials {
        let lp = ln_pmf(k as f64);
        // Relative slack absorbs rounding in the log-space comparison.
        if lp <= observed + 1e-7 {
            p += lp.exp();
        }
    }
    p.min(1.0)
}
