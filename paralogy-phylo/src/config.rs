//! Configuration for discretisation, proposers, and retry ceilings.
//!
//! Every struct has a `Default` matching the usual chain settings and a
//! `validate` that fails fast on out-of-range values instead of clamping.

use paralogy_core::{ParalogyError, Result};

/// Host-tree arc discretisation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscretisationConfig {
    /// Minimum number of slices per non-degenerate arc (at least 2).
    pub nmin: usize,
    /// Maximum number of slices per arc.
    pub nmax: usize,
    /// Target slice width. Ignored when `nmin == nmax`.
    pub deltat: f64,
    /// Fixed slice count for the stem arc above the root.
    pub nroot: Option<usize>,
}

impl Default for DiscretisationConfig {
    fn default() -> Self {
        Self {
            nmin: 3,
            nmax: 10,
            deltat: 0.05,
            nroot: None,
        }
    }
}

impl DiscretisationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nmin <= 1 || self.nmax < self.nmin {
            return Err(ParalogyError::InvalidInput(format!(
                "invalid discretisation bounds nmin={}, nmax={}",
                self.nmin, self.nmax
            )));
        }
        if self.nmin != self.nmax && !(self.deltat > 0.0) {
            return Err(ParalogyError::InvalidInput(format!(
                "invalid discretisation timestep {}",
                self.deltat
            )));
        }
        if self.nroot == Some(0) {
            return Err(ParalogyError::InvalidInput(
                "stem slice count must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Slice width actually used: unbounded when the count is fixed.
    pub fn effective_deltat(&self) -> f64 {
        if self.nmin == self.nmax {
            f64::INFINITY
        } else {
            self.deltat
        }
    }
}

/// Relative weights of the three branch-swapping moves.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationWeights {
    pub nni: f64,
    pub spr: f64,
    pub reroot: f64,
}

impl Default for OperationWeights {
    fn default() -> Self {
        Self {
            nni: 0.5,
            spr: 0.3,
            reroot: 0.2,
        }
    }
}

impl OperationWeights {
    pub fn validate(&self) -> Result<()> {
        let ws = [self.nni, self.spr, self.reroot];
        if ws.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
            return Err(ParalogyError::InvalidInput(
                "operation weights must be finite and non-negative".into(),
            ));
        }
        if self.total() <= 0.0 {
            return Err(ParalogyError::InvalidInput(
                "at least one operation weight must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.nni + self.spr + self.reroot
    }
}

/// Bounded-retry ceilings for legality searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryLimits {
    /// Attempts at producing a legal topology before forcing a reject.
    pub max_limit: usize,
}

/// Default legality retry ceiling.
pub const MAX_LIMIT: usize = 10;

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_limit: MAX_LIMIT,
        }
    }
}

impl RetryLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 {
            return Err(ParalogyError::InvalidInput(
                "retry ceiling must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Default number of biased perturbation attempts.
pub const MAX_ATTEMPTS: usize = 20;
/// Default size of the acceptance-transition table.
pub const MAX_TRACKED_PARSIMONY_SCORE: usize = 100;
/// Default additive safety margin on empirical odds.
pub const PSEUDO_ODDS: f64 = 0.05;

/// Parsimony-biased proposer settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BiasConfig {
    /// Probability that a proposal goes through the biased loop.
    pub bias_prob: f64,
    pub dup_weight: f64,
    pub loss_weight: f64,
    pub max_attempts: usize,
    pub max_tracked_score: usize,
    pub pseudo_odds: f64,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            bias_prob: 0.5,
            dup_weight: 1.0,
            loss_weight: 1.0,
            max_attempts: MAX_ATTEMPTS,
            max_tracked_score: MAX_TRACKED_PARSIMONY_SCORE,
            pseudo_odds: PSEUDO_ODDS,
        }
    }
}

impl BiasConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.bias_prob) {
            return Err(ParalogyError::InvalidInput(format!(
                "invalid proportion of biased moves: {}",
                self.bias_prob
            )));
        }
        if !(self.dup_weight >= 0.0) || !(self.loss_weight >= 0.0) {
            return Err(ParalogyError::InvalidInput(
                "duplication and loss weights must be non-negative".into(),
            ));
        }
        if self.max_attempts == 0 || self.max_tracked_score == 0 {
            return Err(ParalogyError::InvalidInput(
                "attempt ceiling and tracked score ceiling must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pseudo_odds) {
            return Err(ParalogyError::InvalidInput(format!(
                "pseudo odds must lie in [0, 1], got {}",
                self.pseudo_odds
            )));
        }
        Ok(())
    }
}

/// Tree-pool resampling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Draw uniformly over distinct topologies instead of by prevalence.
    pub equal_topology_chance: bool,
    /// Also replace branch lengths with one of the entry's length sets.
    pub sample_lengths: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        DiscretisationConfig::default().validate().unwrap();
        OperationWeights::default().validate().unwrap();
        RetryLimits::default().validate().unwrap();
        BiasConfig::default().validate().unwrap();
    }

    #[test]
    fn discretisation_bounds() {
        let bad = DiscretisationConfig { nmin: 1, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = DiscretisationConfig { nmin: 5, nmax: 4, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = DiscretisationConfig { deltat: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = DiscretisationConfig { nroot: Some(0), ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn fixed_slice_count_ignores_deltat() {
        let cfg = DiscretisationConfig { nmin: 4, nmax: 4, deltat: -1.0, nroot: None };
        cfg.validate().unwrap();
        assert!(cfg.effective_deltat().is_infinite());
    }

    #[test]
    fn negative_weights_rejected() {
        let w = OperationWeights { nni: -0.1, ..Default::default() };
        assert!(w.validate().is_err());
        let w = OperationWeights { nni: 0.0, spr: 0.0, reroot: 0.0 };
        assert!(w.validate().is_err());
    }

    #[test]
    fn bias_prob_out_of_range() {
        let c = BiasConfig { bias_prob: 1.5, ..Default::default() };
        assert!(c.validate().is_err());
        let c = BiasConfig { bias_prob: -0.01, ..Default::default() };
        assert!(c.validate().is_err());
        let c = BiasConfig { bias_prob: 1.0, ..Default::default() };
        c.validate().unwrap();
    }

    #[cfg(feature = "serde")]
    #[test]
    fn bias_config_json_roundtrip() {
        let c = BiasConfig { bias_prob: 0.25, ..Default::default() };
        let json = serde_json::to_string(&c).unwrap();
        let back: BiasConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
