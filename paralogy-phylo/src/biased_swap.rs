//! Parsimony-biased branch swapping.
//!
//! Wraps [`TopologyProposer`] and prefers proposals whose duplication/loss
//! score the chain has historically been willing to accept. The bias is
//! learned: every accept or reject decided by the chain is recorded in an
//! [`AcceptanceTable`] indexed by `(old score, new score)`, and the smoothed
//! acceptance ratio around that cell becomes the odds of keeping a candidate.
//! Forward and backward densities carry those odds so the chain stays
//! reversible.

use paralogy_core::{Cached, LogProb, Result};
use rand::{Rng, RngCore};
use tracing::{debug, trace};

use crate::branch_swap::{MoveKind, TopologyProposer};
use crate::config::BiasConfig;
use crate::proposal::{
    note_changes, ChangeInfos, Proposal, ProposalOutcome, Proposer, ProposerStatistics,
};
use crate::reconciliation::MprMap;
use crate::state::GuestState;
use crate::tree::BinaryTree;

/// 5×5 Gaussian smoothing kernel, entries summing to one.
pub const GAUSSIAN_5_KERNEL: [[f64; 5]; 5] = [
    [1.0 / 273.0, 4.0 / 273.0, 7.0 / 273.0, 4.0 / 273.0, 1.0 / 273.0],
    [4.0 / 273.0, 16.0 / 273.0, 26.0 / 273.0, 16.0 / 273.0, 4.0 / 273.0],
    [7.0 / 273.0, 26.0 / 273.0, 41.0 / 273.0, 26.0 / 273.0, 7.0 / 273.0],
    [4.0 / 273.0, 16.0 / 273.0, 26.0 / 273.0, 16.0 / 273.0, 4.0 / 273.0],
    [1.0 / 273.0, 4.0 / 273.0, 7.0 / 273.0, 4.0 / 273.0, 1.0 / 273.0],
];

/// Square table of `(accepted, total)` counts per score transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceTable {
    size: usize,
    cells: Vec<Option<(u64, u64)>>,
}

impl AcceptanceTable {
    /// Scores `0..size` are tracked on both axes.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![None; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Counts for `from -> to`, or `None` if never observed or out of range.
    pub fn get(&self, from: usize, to: usize) -> Option<(u64, u64)> {
        if from >= self.size || to >= self.size {
            return None;
        }
        self.cells[from * self.size + to]
    }

    /// Record one chain decision. Transitions outside the table are dropped.
    pub fn record(&mut self, from: usize, to: usize, accepted: bool) {
        if from >= self.size || to >= self.size {
            trace!(from, to, "score transition outside acceptance table");
            return;
        }
        let cell = self.cells[from * self.size + to].get_or_insert((0, 0));
        cell.1 += 1;
        if accepted {
            cell.0 += 1;
        }
    }

    /// Smoothed empirical odds of moving from score `v` to score `w`.
    ///
    /// Returns 1 if `v` exceeds the tracked ceiling, 0 if `w` does, and 0.5
    /// when no cell in the 5×5 neighbourhood has been observed. Otherwise the
    /// kernel-weighted mean acceptance ratio over observed cells, plus
    /// `pseudo_odds`, capped at 1.
    pub fn empirical_odds(&self, v: usize, w: usize, pseudo_odds: f64) -> f64 {
        if v > self.size {
            return 1.0;
        }
        if w > self.size {
            return 0.0;
        }
        let mut p = 0.0;
        let mut norm = 0.0;
        for (di, row) in GAUSSIAN_5_KERNEL.iter().enumerate() {
            let Some(i) = (v + di).checked_sub(2) else {
                continue;
            };
            for (dj, &weight) in row.iter().enumerate() {
                let Some(j) = (w + dj).checked_sub(2) else {
                    continue;
                };
                if let Some((acc, tot)) = self.get(i, j) {
                    norm += weight;
                    p += weight * acc as f64 / tot as f64;
                }
            }
        }
        if norm == 0.0 {
            return 0.5;
        }
        (p / norm + pseudo_odds).min(1.0)
    }
}

/// Branch swapper biased towards parsimonious reconciliations.
#[derive(Debug, Clone)]
pub struct BiasedTopologyProposer {
    inner: TopologyProposer,
    mpr: MprMap,
    config: BiasConfig,
    table: AcceptanceTable,
    old_score: usize,
    new_score: usize,
}

impl BiasedTopologyProposer {
    /// # Errors
    ///
    /// Returns an error if `config` is out of range.
    pub fn new(inner: TopologyProposer, mpr: MprMap, config: BiasConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            mpr,
            table: AcceptanceTable::new(config.max_tracked_score),
            config,
            old_score: 0,
            new_score: 0,
        })
    }

    pub fn config(&self) -> &BiasConfig {
        &self.config
    }

    pub fn table(&self) -> &AcceptanceTable {
        &self.table
    }

    /// `(old, new)` parsimony scores of the latest proposal.
    pub fn last_scores(&self) -> (usize, usize) {
        (self.old_score, self.new_score)
    }

    pub fn empirical_odds(&self, v: usize, w: usize) -> f64 {
        self.table.empirical_odds(v, w, self.config.pseudo_odds)
    }

    /// Weighted duplication plus loss count of `tree`, rounded.
    pub fn parsimony_score(&mut self, tree: &BinaryTree) -> usize {
        self.mpr.force_update(tree);
        let dups = self.mpr.total_duplications(tree) as f64;
        let losses = self.mpr.total_losses(tree) as f64;
        (dups * self.config.dup_weight + losses * self.config.loss_weight).round() as usize
    }
}

impl Proposer for BiasedTopologyProposer {
    fn name(&self) -> &str {
        "biased branch swapper"
    }

    fn cache_and_perturb(
        &mut self,
        state: &mut GuestState,
        rng: &mut dyn RngCore,
        changes: &mut ChangeInfos,
    ) -> ProposalOutcome {
        self.old_score = self.parsimony_score(&state.tree);
        state.cache();

        let legal;
        let forward;
        if rng.gen::<f64>() > self.config.bias_prob {
            legal = self.inner.perturb_legally(state, rng);
            self.new_score = self.parsimony_score(&state.tree);
            forward = self.empirical_odds(self.old_score, self.new_score);
        } else {
            let mut attempt = 1;
            loop {
                let ok = self.inner.perturb_legally(state, rng);
                self.new_score = self.parsimony_score(&state.tree);
                let odds = self.empirical_odds(self.old_score, self.new_score);
                if attempt == self.config.max_attempts || odds > rng.gen::<f64>() {
                    if attempt == self.config.max_attempts {
                        debug!(attempts = attempt, "bias attempts exhausted, keeping last candidate");
                    }
                    legal = ok;
                    forward = odds;
                    break;
                }
                state.restore_cache();
                state.cache();
                attempt += 1;
            }
        }
        let backward = self.empirical_odds(self.new_score, self.old_score);
        trace!(
            old = self.old_score,
            new = self.new_score,
            forward,
            backward,
            "biased topology proposal"
        );

        let description = format!(
            "Perturbed by biased {}",
            self.inner.last_operation().map_or("branch swapper", MoveKind::name)
        );
        let (affected, no) = note_changes(state, true, &description, changes);
        let proposal = Proposal {
            forward: LogProb::from_density(forward),
            backward: LogProb::from_density(backward),
            affected,
            sub_parameters: no,
        };
        if legal {
            ProposalOutcome::Accepted(proposal)
        } else {
            ProposalOutcome::ForcedReject(proposal)
        }
    }

    fn clear_cache(&mut self, state: &mut GuestState) {
        self.inner.clear_cache(state);
        self.table.record(self.old_score, self.new_score, true);
    }

    fn restore_cache(&mut self, state: &mut GuestState) {
        self.inner.restore_cache(state);
        self.table.record(self.old_score, self.new_score, false);
    }

    fn statistics(&self) -> &ProposerStatistics {
        self.inner.statistics()
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.inner.set_enabled(enabled);
    }
}
