//! Metropolis–Hastings proposal records and the proposer interface.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use paralogy_core::{LogProb, Summarizable};
use rand::RngCore;

use crate::state::GuestState;
use crate::tree::VertexId;

/// State parameters a proposal may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parameter {
    Tree,
    Lengths,
    Times,
    Switches,
    EdgeModels,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parameter::Tree => "tree",
            Parameter::Lengths => "lengths",
            Parameter::Times => "times",
            Parameter::Switches => "switches",
            Parameter::EdgeModels => "edge models",
        };
        f.write_str(s)
    }
}

/// What changed in one parameter. `affected == None` means "everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeInfo {
    pub description: Option<String>,
    pub affected: Option<Vec<VertexId>>,
}

impl ChangeInfo {
    pub fn all() -> Self {
        Self::default()
    }

    /// Change to everything, with a human-readable cause.
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            affected: None,
        }
    }
}

/// Per-parameter change descriptions handed to dependent computations.
pub type ChangeInfos = BTreeMap<Parameter, ChangeInfo>;

/// Forward and backward proposal densities of one perturbation.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub forward: LogProb,
    pub backward: LogProb,
    pub affected: Vec<Parameter>,
    /// Number of scalar sub-parameters touched.
    pub sub_parameters: usize,
}

impl Proposal {
    /// Symmetric proposal with unit densities.
    pub fn symmetric(affected: Vec<Parameter>, sub_parameters: usize) -> Self {
        Self {
            forward: LogProb::certain(),
            backward: LogProb::certain(),
            affected,
            sub_parameters,
        }
    }

    /// `backward / forward` in log space.
    pub fn hastings_ratio(&self) -> LogProb {
        self.backward.ln_div(self.forward)
    }

    /// A proposal with zero forward density can never be accepted.
    pub fn is_valid(&self) -> bool {
        !self.forward.is_impossible()
    }
}

/// Result of [`Proposer::cache_and_perturb`].
///
/// `ForcedReject` is returned when no legal state could be produced within
/// the retry ceiling. The state has been left as it was and the caller should
/// reject without evaluating it.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    Accepted(Proposal),
    ForcedReject(Proposal),
}

impl ProposalOutcome {
    pub fn proposal(&self) -> &Proposal {
        match self {
            ProposalOutcome::Accepted(p) | ProposalOutcome::ForcedReject(p) => p,
        }
    }

    pub fn is_forced_reject(&self) -> bool {
        matches!(self, ProposalOutcome::ForcedReject(_))
    }
}

/// Accepted/total counts, overall and per named operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposerStatistics {
    accepted: usize,
    total: usize,
    per_operation: HashMap<String, (usize, usize)>,
}

impl ProposerStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, accepted: bool, operation: Option<&str>) {
        self.total += 1;
        if accepted {
            self.accepted += 1;
        }
        if let Some(op) = operation {
            let e = self.per_operation.entry(op.to_string()).or_insert((0, 0));
            e.1 += 1;
            if accepted {
                e.0 += 1;
            }
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Overall acceptance ratio; zero before the first proposal.
    pub fn acceptance_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.accepted as f64 / self.total as f64
        }
    }

    /// `(accepted, total)` for one operation, if it was ever recorded.
    pub fn operation(&self, name: &str) -> Option<(usize, usize)> {
        self.per_operation.get(name).copied()
    }
}

impl Summarizable for ProposerStatistics {
    fn summary(&self) -> String {
        let mut ops: Vec<_> = self.per_operation.iter().collect();
        ops.sort_by(|a, b| a.0.cmp(b.0));
        let mut s = format!(
            "accepted {} of {} ({:.4})",
            self.accepted,
            self.total,
            self.acceptance_ratio()
        );
        for (name, (acc, tot)) in ops {
            s.push_str(&format!("; {}: {}/{}", name, acc, tot));
        }
        s
    }
}

/// A Metropolis–Hastings proposer over a [`GuestState`].
///
/// One proposal is `cache_and_perturb` followed by exactly one of
/// `clear_cache` (the chain accepted) or `restore_cache` (it rejected).
pub trait Proposer {
    fn name(&self) -> &str;

    /// Snapshot `state`, perturb it, and record what changed in `changes`.
    fn cache_and_perturb(
        &mut self,
        state: &mut GuestState,
        rng: &mut dyn RngCore,
        changes: &mut ChangeInfos,
    ) -> ProposalOutcome;

    fn clear_cache(&mut self, state: &mut GuestState);

    fn restore_cache(&mut self, state: &mut GuestState);

    fn statistics(&self) -> &ProposerStatistics;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);
}

/// Record every attached part of `state` as changed and return the affected
/// parameters with their sub-parameter count.
pub(crate) fn note_changes(
    state: &GuestState,
    include_times: bool,
    description: &str,
    changes: &mut ChangeInfos,
) -> (Vec<Parameter>, usize) {
    let mut affected = vec![Parameter::Tree];
    let mut no = 1;
    changes.insert(Parameter::Tree, ChangeInfo::described(description));
    if let Some(l) = state.lengths.as_ref() {
        changes.insert(Parameter::Lengths, ChangeInfo::all());
        affected.push(Parameter::Lengths);
        no += l.len();
    }
    if include_times {
        if let Some(t) = state.times.as_ref() {
            changes.insert(Parameter::Times, ChangeInfo::all());
            affected.push(Parameter::Times);
            no += t.len();
        }
    }
    if let Some(pg) = state.pseudogenes.as_ref() {
        changes.insert(Parameter::Switches, ChangeInfo::all());
        changes.insert(Parameter::EdgeModels, ChangeInfo::all());
        affected.push(Parameter::Switches);
        affected.push(Parameter::EdgeModels);
        no += pg.switches().len() + pg.edge_models().len();
    }
    (affected, no)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::DoubleMap;
    use crate::tree::fixtures::balanced4;

    #[test]
    fn hastings_ratio_is_backward_over_forward() {
        let p = Proposal {
            forward: LogProb::from_prob(0.7).unwrap(),
            backward: LogProb::from_prob(0.35).unwrap(),
            affected: vec![Parameter::Tree],
            sub_parameters: 1,
        };
        assert!((p.hastings_ratio().to_prob() - 0.5).abs() < 1e-12);
        assert!(p.is_valid());
    }

    #[test]
    fn zero_forward_is_invalid() {
        let p = Proposal {
            forward: LogProb::impossible(),
            backward: LogProb::certain(),
            affected: vec![],
            sub_parameters: 0,
        };
        assert!(!p.is_valid());
        let out = ProposalOutcome::ForcedReject(p);
        assert!(out.is_forced_reject());
        assert!(!out.proposal().is_valid());
    }

    #[test]
    fn statistics_track_operations() {
        let mut stats = ProposerStatistics::new();
        stats.increment(true, Some("NNI"));
        stats.increment(false, Some("NNI"));
        stats.increment(true, Some("SPR"));
        stats.increment(false, None);
        assert_eq!(stats.total(), 4);
        assert_eq!(stats.accepted(), 2);
        assert_eq!(stats.operation("NNI"), Some((1, 2)));
        assert_eq!(stats.operation("SPR"), Some((1, 1)));
        assert_eq!(stats.operation("Reroot"), None);
        assert_eq!(stats.summary(), "accepted 2 of 4 (0.5000); NNI: 1/2; SPR: 1/1");
    }

    #[test]
    fn note_changes_lists_attached_parts() {
        let state = GuestState::new(balanced4()).with_lengths(DoubleMap::filled("l", 7, 0.1));
        let mut changes = ChangeInfos::new();
        let (affected, no) = note_changes(&state, true, "Perturbed by NNI", &mut changes);
        assert_eq!(affected, vec![Parameter::Tree, Parameter::Lengths]);
        assert_eq!(no, 8);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[&Parameter::Tree].description.as_deref(), Some("Perturbed by NNI"));
        assert_eq!(changes[&Parameter::Tree].affected, None);
        assert_eq!(changes[&Parameter::Lengths], ChangeInfo::all());
    }
}
