//! Closed-form Bayesian quality estimation
//!
//! "Quality" is the latent success probability of a Beta-Binomial model:
//! the probability that a participant counted in some denominator ends up
//! in the numerator (poor starters becoming good, or group members landing
//! above a combined median). With `s` successes out of `t` trials the
//! posterior under a flat prior is Beta(s + 1, t - s + 1), evaluated here
//! on a fixed grid over [0, 1] using the log-Beta normalisation
//! `ln B(a, b) = lnGamma(a) + lnGamma(b) - lnGamma(a + b)`.
//!
//! Two quality posteriors combine through a discrete convolution into the
//! posterior over their difference on [-1, 1], from which the tail
//! probabilities reported to the experimenters are read off.

use serde::Serialize;
use thiserror::Error;

/// Numerical-integrity failures of a posterior computation.
///
/// These are surfaced as diagnostics: the orchestrator logs them and skips
/// the affected sub-test rather than aborting the whole battery.
#[derive(Error, Debug)]
pub enum DensityError {
    #[error("posterior needs successes <= trials, got {successes}/{trials}")]
    InvalidCounts { successes: u64, trials: u64 },

    #[error("{nan} of {total} posterior density samples are NaN")]
    NanSamples { nan: usize, total: usize },

    #[error("posterior mass sums to {mass:.4}, outside 1 +/- {tolerance}")]
    NotNormalised { mass: f64, tolerance: f64 },
}

/// Result type for posterior computations.
pub type Result<T> = std::result::Result<T, DensityError>;

/// Absolute tolerance on the Riemann sum of a posterior density.
pub const MASS_TOLERANCE: f64 = 0.01;

/// Percentiles reported for every posterior: the six-sigma ladder plus
/// quartiles.
pub const PERCENTILE_LADDER: [f64; 9] = [
    0.13, 2.28, 15.87, 25.0, 50.0, 75.0, 84.13, 97.72, 99.87,
];

/// Log-gamma via the Lanczos approximation (g = 7, 9 coefficients).
#[allow(clippy::excessive_precision)]
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    use std::f64::consts::PI;

    if x < 0.5 {
        // Reflection formula
        let lnpi_sin = (PI * x).sin().abs().ln();
        PI.ln() - lnpi_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = COEFFS[0];
        for (i, &c) in COEFFS[1..].iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// `ln B(a, b)`, the normalisation of the Beta-Binomial posterior.
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Sample grid over [0, 1] shared by all posteriors of one study.
#[derive(Debug, Clone)]
pub struct QualityGrid {
    values: Vec<f64>,
    width: f64,
}

impl QualityGrid {
    /// A grid with `n_samples` evenly spaced points from 0 to 1.
    pub fn new(n_samples: usize) -> Self {
        assert!(n_samples >= 3, "quality grid needs at least 3 samples");
        let step = 1.0 / (n_samples - 1) as f64;
        let values = (0..n_samples).map(|i| i as f64 * step).collect();
        Self {
            values,
            width: 1.0 / n_samples as f64,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Width assigned to each sample in Riemann sums.
    pub fn sample_width(&self) -> f64 {
        self.width
    }
}

/// Walk the mass vector once and read off every ladder percentile.
fn percentiles(range: &[f64], mass: &[f64]) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(PERCENTILE_LADDER.len());
    let mut cdf = 0.0;
    let mut next = 0;
    for (&x, &m) in range.iter().zip(mass) {
        cdf += m;
        while next < PERCENTILE_LADDER.len() && cdf > PERCENTILE_LADDER[next] / 100.0 {
            out.push((PERCENTILE_LADDER[next], x));
            next += 1;
        }
    }
    // Mass may fall a hair short of 1; pin the remaining percentiles to the
    // top of the range.
    let top = range.last().copied().unwrap_or(1.0);
    while next < PERCENTILE_LADDER.len() {
        out.push((PERCENTILE_LADDER[next], top));
        next += 1;
    }
    out
}

fn lookup_percentile(table: &[(f64, f64)], percentile: f64) -> f64 {
    table
        .iter()
        .find(|(p, _)| (*p - percentile).abs() < 1e-9)
        .map(|(_, v)| *v)
        .unwrap_or(f64::NAN)
}

/// Beta-Binomial posterior over a quality parameter on [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct QualityPosterior {
    pub successes: u64,
    pub trials: u64,
    /// Log-density at each grid sample.
    pub log_density: Vec<f64>,
    /// Density at each grid sample.
    pub density: Vec<f64>,
    /// Probability mass per sample (density times sample width).
    pub mass: Vec<f64>,
    /// Grid value with the highest density.
    pub peak: f64,
    /// (percentile, quality) pairs along [`PERCENTILE_LADDER`].
    pub percentiles: Vec<(f64, f64)>,
    pub median: f64,
}

impl QualityPosterior {
    /// Posterior over quality after observing `successes` out of `trials`.
    ///
    /// Zero trials are legal and yield the flat prior; the degenerate
    /// endpoint samples get explicit boundary mass instead of `ln(0)`.
    pub fn from_counts(successes: u64, trials: u64, grid: &QualityGrid) -> Result<Self> {
        if successes > trials {
            return Err(DensityError::InvalidCounts { successes, trials });
        }
        let s = successes as f64;
        let f = (trials - successes) as f64;
        let norm = ln_beta(s + 1.0, f + 1.0);

        let n = grid.len();
        let mut log_density = vec![0.0; n];
        for (i, &q) in grid.values().iter().enumerate().take(n - 1).skip(1) {
            log_density[i] = s * q.ln() + f * (1.0 - q).ln() - norm;
        }
        // Endpoints: a single failure pins q = 1 to zero probability and a
        // single success pins q = 0, otherwise the endpoint keeps the
        // normalised prior value.
        log_density[0] = if successes > 0 { f64::NEG_INFINITY } else { -norm };
        log_density[n - 1] = if trials - successes > 0 {
            f64::NEG_INFINITY
        } else {
            -norm
        };

        let density: Vec<f64> = log_density.iter().map(|&l| l.exp()).collect();
        let nan = density.iter().filter(|d| d.is_nan()).count();
        if nan > 0 {
            return Err(DensityError::NanSamples { nan, total: n });
        }

        let mass: Vec<f64> = density.iter().map(|d| d * grid.sample_width()).collect();
        let total: f64 = mass.iter().sum();
        if (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(DensityError::NotNormalised {
                mass: total,
                tolerance: MASS_TOLERANCE,
            });
        }

        let peak_index = density
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let percentiles = percentiles(grid.values(), &mass);
        let median = lookup_percentile(&percentiles, 50.0);

        Ok(Self {
            successes,
            trials,
            log_density,
            density,
            mass,
            peak: grid.values()[peak_index],
            percentiles,
            median,
        })
    }

    pub fn percentile(&self, percentile: f64) -> f64 {
        lookup_percentile(&self.percentiles, percentile)
    }
}

/// Posterior over the difference in quality between two groups, on [-1, 1].
#[derive(Debug, Clone, Serialize)]
pub struct DifferencePosterior {
    /// Difference grid, `2m - 1` points from -1 to 1.
    pub range: Vec<f64>,
    /// Probability mass at each difference sample.
    pub mass: Vec<f64>,
    pub peak: f64,
    pub percentiles: Vec<(f64, f64)>,
    pub median: f64,
    /// P(D > 0): treatment does better than control.
    pub p_better: f64,
    /// P(D < 0): treatment does worse than control.
    pub p_worse: f64,
    /// P(D > cutoff): treatment does much better.
    pub p_much_better: f64,
    /// P(D < -cutoff): treatment does much worse.
    pub p_much_worse: f64,
    /// P(|D| <= cutoff): the groups are practically equivalent.
    pub p_equivalent: f64,
}

impl DifferencePosterior {
    /// Convolve two quality posteriors into the posterior over
    /// `treatment - control`.
    ///
    /// `cutoff` is the minimum practically significant difference; it is
    /// rounded to whole grid samples.
    pub fn between(
        treatment: &QualityPosterior,
        control: &QualityPosterior,
        grid: &QualityGrid,
        cutoff: f64,
    ) -> Self {
        let m = grid.len();
        debug_assert_eq!(treatment.mass.len(), m);
        debug_assert_eq!(control.mass.len(), m);

        // dk[j] = sum_i P(Qt = i) * P(Qc = i - (j - (m-1))), i.e. the mass
        // of treatment minus control landing j - (m-1) samples above zero.
        let len = 2 * m - 1;
        let mut mass = vec![0.0; len];
        for (i, &t) in treatment.mass.iter().enumerate() {
            if t == 0.0 {
                continue;
            }
            for (j, &c) in control.mass.iter().enumerate() {
                mass[i + (m - 1) - j] += t * c;
            }
        }

        let step = 2.0 / (len - 1) as f64;
        let range: Vec<f64> = (0..len).map(|i| -1.0 + i as f64 * step).collect();

        let center = m - 1;
        let p_worse: f64 = mass[..center].iter().sum();
        let p_better: f64 = mass[center + 1..].iter().sum();

        let cutoff_samples = (cutoff / grid.sample_width()).round() as usize;
        let low = center.saturating_sub(cutoff_samples);
        let high = (center + cutoff_samples).min(len - 1);
        let p_much_worse: f64 = mass[..low].iter().sum();
        let p_equivalent: f64 = mass[low..=high].iter().sum();
        let p_much_better: f64 = mass[high + 1..].iter().sum();

        let peak_index = mass
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let percentiles = percentiles(&range, &mass);
        let median = lookup_percentile(&percentiles, 50.0);

        Self {
            peak: range[peak_index],
            range,
            mass,
            percentiles,
            median,
            p_better,
            p_worse,
            p_much_better,
            p_much_worse,
            p_equivalent,
        }
    }

    pub fn percentile(&self, percentile: f64) -> f64 {
        lookup_percentile(&self.percentiles, percentile)
    }
}
