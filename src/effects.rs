//! Competence effect library
//!
//! Backgrounds and manipulations change latent competence through a closed
//! set of named transformations. The `Improvement` and `Deterioration`
//! forms act on the probability domain (0, 1): an improvement by factor f
//! shrinks the risk of a wrong answer to f times its old value, a
//! deterioration shrinks the success probability the same way. `Shift`
//! acts on an unconstrained score instead. The two domains are not
//! interchangeable; a caller picks one per use site and stays with it.

/// A named transformation of latent competence.
///
/// All variants are pure functions. Behaviour outside the documented
/// domain (probabilities for `Improvement`/`Deterioration`) is unspecified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Identity: competence is unchanged.
    NoEffect,
    /// Additive shift on an unconstrained competence score.
    Shift(f64),
    /// `1 - f * (1 - x)`: the risk of a wrong answer is multiplied by f.
    Improvement(f64),
    /// `f * x`: the success probability is multiplied by f.
    Deterioration(f64),
}

impl Effect {
    /// Apply the transformation to a single competence value.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Effect::NoEffect => x,
            Effect::Shift(delta) => x + delta,
            Effect::Improvement(factor) => 1.0 - factor * (1.0 - x),
            Effect::Deterioration(factor) => factor * x,
        }
    }

    /// Apply the transformation in place to the flagged subset of a cohort.
    ///
    /// `values` and `flags` run over the same participant indices.
    pub fn apply_to_flagged(self, values: &mut [f64], flags: &[bool]) {
        debug_assert_eq!(values.len(), flags.len());
        for (value, &flagged) in values.iter_mut().zip(flags) {
            if flagged {
                *value = self.apply(*value);
            }
        }
    }

    /// Look up one of the standard named transformations.
    ///
    /// The registry covers improvements and deteriorations at the four
    /// stock severity factors (1/2, 2/3, 4/5, 9/10) plus the identity.
    pub fn named(name: &str) -> Option<Effect> {
        let effect = match name {
            "large improvement" => Effect::Improvement(1.0 / 2.0),
            "moderate improvement" => Effect::Improvement(2.0 / 3.0),
            "slight improvement" => Effect::Improvement(4.0 / 5.0),
            "minimal improvement" => Effect::Improvement(9.0 / 10.0),
            "large deterioration" => Effect::Deterioration(1.0 / 2.0),
            "moderate deterioration" => Effect::Deterioration(2.0 / 3.0),
            "slight deterioration" => Effect::Deterioration(4.0 / 5.0),
            "minimal deterioration" => Effect::Deterioration(9.0 / 10.0),
            "no effect" => Effect::NoEffect,
            _ => return None,
        };
        Some(effect)
    }

    /// Names accepted by [`Effect::named`], in registry order.
    pub fn standard_names() -> &'static [&'static str] {
        &[
            "large improvement",
            "moderate improvement",
            "slight improvement",
            "minimal improvement",
            "large deterioration",
            "moderate deterioration",
            "slight deterioration",
            "minimal deterioration",
            "no effect",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_effect_is_identity() {
        assert_eq!(Effect::NoEffect.apply(0.42), 0.42);
    }

    #[test]
    fn test_shift_moves_score() {
        assert_eq!(Effect::Shift(0.25).apply(1.0), 1.25);
        assert_eq!(Effect::Shift(-0.5).apply(1.0), 0.5);
    }

    #[test]
    fn test_improvement_halves_risk() {
        // Risk of a wrong answer drops from 0.6 to 0.3.
        let improved = Effect::Improvement(0.5).apply(0.4);
        assert!((improved - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_deterioration_scales_success() {
        let worsened = Effect::Deterioration(0.5).apply(0.8);
        assert!((worsened - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_improvement_keeps_probability_domain() {
        for &x in &[0.01, 0.25, 0.5, 0.75, 0.99] {
            for &f in &[0.5, 2.0 / 3.0, 0.8, 0.9] {
                let y = Effect::Improvement(f).apply(x);
                assert!(y > x && y < 1.0, "improvement({f}) at {x} gave {y}");
                let z = Effect::Deterioration(f).apply(x);
                assert!(z < x && z > 0.0, "deterioration({f}) at {x} gave {z}");
            }
        }
    }

    #[test]
    fn test_apply_to_flagged_only_touches_flagged() {
        let mut values = vec![0.5, 0.5, 0.5, 0.5];
        Effect::Deterioration(0.5).apply_to_flagged(&mut values, &[true, false, true, false]);
        assert_eq!(values, vec![0.25, 0.5, 0.25, 0.5]);
    }

    #[test]
    fn test_named_registry_round_trip() {
        for name in Effect::standard_names() {
            assert!(Effect::named(name).is_some(), "missing registry entry {name}");
        }
        assert_eq!(Effect::named("no effect"), Some(Effect::NoEffect));
        assert_eq!(Effect::named("something else"), None);
    }

    #[test]
    fn test_effects_compose_noncommutatively() {
        // Application order matters for mixed improvement/deterioration.
        let a = Effect::Improvement(0.5);
        let b = Effect::Deterioration(0.5);
        let ab = b.apply(a.apply(0.4));
        let ba = a.apply(b.apply(0.4));
        assert!((ab - ba).abs() > 1e-12);
    }
}
