//! Boundary constraints for normalized coordinates
//!
//! All hyperparameter arithmetic happens on a coordinate in `[0, 1]`.
//! These are the pure functions that keep that coordinate inside its
//! window after any operation: an affine `translate` between ranges,
//! a saturating `clip` and a mirroring `reflect`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Affine mapping of `value` from the range `[a_min, a_max]` into
/// `[b_min, b_max]`, preserving fractions.
pub fn translate(value: f64, a_min: f64, a_max: f64, b_min: f64, b_max: f64) -> f64 {
    let a_span = a_max - a_min;
    let b_span = b_max - b_min;
    if a_span == 0.0 {
        return b_min;
    }
    let fraction = (value - a_min) / a_span;
    b_min + fraction * b_span
}

/// Saturate `value` into `[lo, hi]`.
pub fn clip(value: f64, lo: f64, hi: f64) -> f64 {
    if value <= lo {
        lo
    } else if value >= hi {
        hi
    } else {
        value
    }
}

/// Mirror `value` back into `[lo, hi]`, reflecting repeatedly when the
/// amplitude exceeds the window. Closed-form over the folded period, so
/// any finite input lands in range regardless of how far out it is.
pub fn reflect(value: f64, lo: f64, hi: f64) -> f64 {
    let span = hi - lo;
    if span == 0.0 {
        return lo;
    }
    let folded = (value - lo).rem_euclid(2.0 * span);
    if folded > span {
        hi - (folded - span)
    } else {
        lo + folded
    }
}

/// Boundary policy applied after every mutation of a normalized coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Constraint {
    #[default]
    Clip,
    Reflect,
}

impl Constraint {
    /// Constrain `value` into `[lo, hi]`. Non-finite inputs saturate
    /// (infinities clip to the nearest bound, NaN is mapped to `lo`);
    /// callers that care about finiteness reject it before getting here.
    pub fn apply(self, value: f64, lo: f64, hi: f64) -> f64 {
        if value.is_nan() {
            return lo;
        }
        if !value.is_finite() {
            return clip(value, lo, hi);
        }
        match self {
            Constraint::Clip => clip(value, lo, hi),
            Constraint::Reflect => reflect(value, lo, hi),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Clip => write!(f, "clip"),
            Constraint::Reflect => write!(f, "reflect"),
        }
    }
}

impl FromStr for Constraint {
    type Err = crate::error::PbtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clip" => Ok(Constraint::Clip),
            "reflect" => Ok(Constraint::Reflect),
            other => Err(crate::error::PbtError::Configuration(format!(
                "no constraint matches '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_preserves_fractions() {
        assert_eq!(translate(0.5, 0.0, 1.0, 0.0, 10.0), 5.0);
        assert_eq!(translate(5.0, 0.0, 10.0, 0.0, 1.0), 0.5);
        assert_eq!(translate(0.25, 0.0, 1.0, -1.0, 1.0), -0.5);
    }

    #[test]
    fn translate_degenerate_range() {
        assert_eq!(translate(3.0, 2.0, 2.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn clip_saturates() {
        assert_eq!(clip(1.5, 0.0, 1.0), 1.0);
        assert_eq!(clip(-0.5, 0.0, 1.0), 0.0);
        assert_eq!(clip(0.3, 0.0, 1.0), 0.3);
    }

    #[test]
    fn reflect_mirrors_overshoot() {
        assert!((reflect(1.25, 0.0, 1.0) - 0.75).abs() < 1e-12);
        assert!((reflect(-0.25, 0.0, 1.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn reflect_folds_large_amplitudes() {
        // 2.3 bounces off 1.0 down to -0.3, then off 0.0 back to 0.3
        assert!((reflect(2.3, 0.0, 1.0) - 0.3).abs() < 1e-12);
        assert!((reflect(-3.6, 0.0, 1.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn constraints_are_idempotent() {
        for v in [-2.7, -0.1, 0.0, 0.42, 1.0, 1.8, 13.0] {
            let c = clip(v, 0.0, 1.0);
            assert_eq!(clip(c, 0.0, 1.0), c);
            let r = reflect(v, 0.0, 1.0);
            assert!((reflect(r, 0.0, 1.0) - r).abs() < 1e-12);
        }
    }

    #[test]
    fn apply_handles_non_finite() {
        assert_eq!(Constraint::Clip.apply(f64::INFINITY, 0.0, 1.0), 1.0);
        assert_eq!(Constraint::Reflect.apply(f64::NEG_INFINITY, 0.0, 1.0), 0.0);
        assert_eq!(Constraint::Reflect.apply(f64::NAN, 0.0, 1.0), 0.0);
    }

    #[test]
    fn constraint_round_trips_through_str() {
        assert_eq!("clip".parse::<Constraint>().unwrap(), Constraint::Clip);
        assert_eq!("reflect".parse::<Constraint>().unwrap(), Constraint::Reflect);
        assert!("bounce".parse::<Constraint>().is_err());
    }
}
