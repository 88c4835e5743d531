//! Log-space probability type for numerically stable computation.
//!
//! [`LogProb`] represents probabilities as natural logarithms. Proposal
//! densities travel through the Metropolis–Hastings machinery in this form so
//! that a zero forward density (a forced rejection) is representable without
//! special-casing.

use crate::{ParalogyError, Result};

/// Natural logarithm of a probability or proposal density.
///
/// `0.0` is certainty and `-inf` is impossibility. Densities built with
/// [`from_density`](LogProb::from_density) may be positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogProb(pub f64);

impl LogProb {
    /// Create a [`LogProb`] from a raw probability in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `p` is not in `(0, 1]`.
    pub fn from_prob(p: f64) -> Result<Self> {
        if !(p > 0.0 && p <= 1.0) {
            return Err(ParalogyError::InvalidInput(format!(
                "probability must lie in (0, 1], got {}",
                p
            )));
        }
        Ok(Self(p.ln()))
    }

    /// Create a [`LogProb`] from a non-negative density, mapping zero to
    /// [`LogProb::impossible`].
    ///
    /// Unlike [`from_prob`](LogProb::from_prob) this accepts values above one,
    /// since proposal densities need not be probabilities.
    pub fn from_density(d: f64) -> Self {
        if d > 0.0 {
            Self(d.ln())
        } else {
            Self::impossible()
        }
    }

    /// Back to linear scale.
    pub fn to_prob(self) -> f64 {
        self.0.exp()
    }

    /// `ln(exp(self) + exp(other))`, stable for large magnitudes.
    pub fn ln_add(self, other: Self) -> Self {
        if self.0 == f64::NEG_INFINITY {
            return other;
        }
        if other.0 == f64::NEG_INFINITY {
            return self;
        }
        let (max, min) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        Self(max + (min - max).exp().ln_1p())
    }

    /// Product in log space.
    pub fn ln_mul(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// Quotient in log space; dividing by an impossible value gives `+inf`.
    pub fn ln_div(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }

    /// Whether this is the impossible event.
    pub fn is_impossible(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    /// `ln(1)`.
    pub const fn certain() -> Self {
        Self(0.0)
    }

    /// `ln(0)`.
    pub const fn impossible() -> Self {
        Self(f64::NEG_INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn logprob_from_prob_half() {
        let lp = LogProb::from_prob(0.5).unwrap();
        assert!((lp.0 - 0.5_f64.ln()).abs() < TOL);
    }

    #[test]
    fn logprob_invalid() {
        assert!(LogProb::from_prob(0.0).is_err());
        assert!(LogProb::from_prob(-0.5).is_err());
        assert!(LogProb::from_prob(1.5).is_err());
        assert!(LogProb::from_prob(f64::NAN).is_err());
    }

    #[test]
    fn logprob_from_density_zero_is_impossible() {
        assert!(LogProb::from_density(0.0).is_impossible());
        assert!((LogProb::from_density(0.7).to_prob() - 0.7).abs() < TOL);
    }

    #[test]
    fn logprob_certain_impossible() {
        assert_eq!(LogProb::certain().to_prob(), 1.0);
        assert_eq!(LogProb::impossible().to_prob(), 0.0);
    }

    #[test]
    fn logprob_ln_add() {
        let a = LogProb::from_prob(0.3).unwrap();
        let b = LogProb::from_prob(0.2).unwrap();
        assert!((a.ln_add(b).to_prob() - 0.5).abs() < TOL);
        assert!((a.ln_add(LogProb::impossible()).to_prob() - 0.3).abs() < TOL);
    }

    #[test]
    fn logprob_mul_div() {
        let a = LogProb::from_prob(0.5).unwrap();
        let b = LogProb::from_prob(0.25).unwrap();
        assert!((a.ln_mul(b).to_prob() - 0.125).abs() < TOL);
        assert!((b.ln_div(a).to_prob() - 0.5).abs() < TOL);
    }

    #[test]
    fn logprob_ordering_follows_probability() {
        let lo = LogProb::from_prob(0.1).unwrap();
        let hi = LogProb::from_prob(0.9).unwrap();
        assert!(lo < hi);
        assert!(LogProb::impossible() < lo);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn ln_add_matches_linear_sum(a in 1e-6f64..0.5, b in 1e-6f64..0.5) {
            let sum = LogProb::from_prob(a).unwrap().ln_add(LogProb::from_prob(b).unwrap());
            prop_assert!((sum.to_prob() - (a + b)).abs() < 1e-9);
        }

        #[test]
        fn hastings_ratio_round_trips(f in 1e-6f64..10.0, b in 1e-6f64..10.0) {
            let ratio = LogProb::from_density(b).ln_div(LogProb::from_density(f));
            prop_assert!((ratio.to_prob() * f / b - 1.0).abs() < 1e-9);
        }
    }
}
