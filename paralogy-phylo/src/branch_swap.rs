//! Branch-swapping topology proposer: NNI, SPR and rerooting.
//!
//! Each move rewrites parent/child relations in place and, when times or
//! lengths are attached, adjusts them with simple heuristics so that the
//! perturbed state stays close to the current one. The root vertex id never
//! changes; rerooting rotates vertices around it instead.

use paralogy_core::{Cached, ParalogyError, Result};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::{debug, trace};

use crate::config::{OperationWeights, RetryLimits};
use crate::maps::{DoubleMap, TimesMap};
use crate::names::NamesMap;
use crate::proposal::{
    note_changes, ChangeInfos, Proposal, ProposalOutcome, Proposer, ProposerStatistics,
};
use crate::state::GuestState;
use crate::tree::{BinaryTree, VertexId};

/// The three topology moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    Nni,
    Spr,
    Reroot,
}

impl MoveKind {
    /// Name used as the statistics key.
    pub fn name(self) -> &'static str {
        match self {
            MoveKind::Nni => "NNI",
            MoveKind::Spr => "SPR",
            MoveKind::Reroot => "Reroot",
        }
    }
}

/// Proposer drawing one of NNI, SPR or reroot per proposal, retrying until
/// the pseudogenization (if any) is legal.
#[derive(Debug, Clone)]
pub struct TopologyProposer {
    weights: OperationWeights,
    limits: RetryLimits,
    stats: ProposerStatistics,
    last_operation: Option<MoveKind>,
    enabled: bool,
}

impl Default for TopologyProposer {
    fn default() -> Self {
        Self {
            weights: OperationWeights::default(),
            limits: RetryLimits::default(),
            stats: ProposerStatistics::new(),
            last_operation: None,
            enabled: true,
        }
    }
}

impl TopologyProposer {
    /// Proposer with default move weights and retry limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Proposer with custom retry limits.
    ///
    /// # Errors
    ///
    /// Returns an error if `limits` is invalid.
    pub fn with_limits(limits: RetryLimits) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            limits,
            ..Self::default()
        })
    }

    /// # Errors
    ///
    /// Returns an error for negative, non-finite or all-zero weights.
    pub fn set_operation_weights(&mut self, weights: OperationWeights) -> Result<()> {
        weights.validate()?;
        self.weights = weights;
        Ok(())
    }

    pub fn operation_weights(&self) -> &OperationWeights {
        &self.weights
    }

    /// Retry limits for the legality loop.
    pub fn limits(&self) -> &RetryLimits {
        &self.limits
    }

    /// Move applied by the most recent perturbation, if any.
    pub fn last_operation(&self) -> Option<MoveKind> {
        self.last_operation
    }

    fn choose_move(&self, rng: &mut dyn RngCore) -> MoveKind {
        let w = rng.gen::<f64>() * self.weights.total();
        if w < self.weights.nni {
            MoveKind::Nni
        } else if w < self.weights.nni + self.weights.spr {
            MoveKind::Spr
        } else {
            MoveKind::Reroot
        }
    }

    /// Apply one move of a freshly drawn kind to an already cached `state`,
    /// retrying from the snapshot until the result is legal.
    ///
    /// Returns `false` when the retry ceiling is hit; `state` is then back at
    /// its snapshot and still cached.
    pub(crate) fn perturb_legally(&mut self, state: &mut GuestState, rng: &mut dyn RngCore) -> bool {
        debug_assert!(state.is_cached(), "perturb without cache()");
        let kind = self.choose_move(rng);
        self.last_operation = Some(kind);
        for attempt in 1..=self.limits.max_limit {
            let applied = match kind {
                MoveKind::Nni => nni(&mut state.tree, state.times.as_mut(), rng),
                MoveKind::Spr => spr(
                    &mut state.tree,
                    state.lengths.as_mut(),
                    state.times.as_mut(),
                    rng,
                ),
                MoveKind::Reroot => reroot(
                    &mut state.tree,
                    state.lengths.as_mut(),
                    state.times.as_mut(),
                    rng,
                ),
            };
            debug_assert!(state.tree.check_bifurcating());
            if applied && state.is_legal() {
                trace!(operation = kind.name(), attempt, "topology perturbed");
                if let Some(pg) = state.pseudogenes.as_mut() {
                    pg.make_consistent(&state.tree);
                }
                return true;
            }
            state.restore_cache();
            state.cache();
        }
        debug!(
            operation = kind.name(),
            max_limit = self.limits.max_limit,
            "no legal topology found, forcing reject"
        );
        false
    }
}

impl Proposer for TopologyProposer {
    fn name(&self) -> &str {
        "branch swapper"
    }

    fn cache_and_perturb(
        &mut self,
        state: &mut GuestState,
        rng: &mut dyn RngCore,
        changes: &mut ChangeInfos,
    ) -> ProposalOutcome {
        state.cache();
        let legal = self.perturb_legally(state, rng);
        let description = format!(
            "Perturbed by {}",
            self.last_operation.map_or("branch swapper", MoveKind::name)
        );
        let (affected, no) = note_changes(state, true, &description, changes);
        let proposal = Proposal::symmetric(affected, no);
        if legal {
            ProposalOutcome::Accepted(proposal)
        } else {
            ProposalOutcome::ForcedReject(proposal)
        }
    }

    fn clear_cache(&mut self, state: &mut GuestState) {
        self.stats
            .increment(true, self.last_operation.map(MoveKind::name));
        state.clear_cache();
    }

    fn restore_cache(&mut self, state: &mut GuestState) {
        self.stats
            .increment(false, self.last_operation.map(MoveKind::name));
        state.restore_cache();
    }

    fn statistics(&self) -> &ProposerStatistics {
        &self.stats
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Set the arc time of `x` from its parent's vertex time. The stem is left
/// alone.
fn refresh_arc_time(tree: &BinaryTree, times: &mut TimesMap, x: VertexId) {
    if let Some(p) = tree.parent(x) {
        times.set_arc_time(x, times.vertex_time(p) - times.vertex_time(x));
    }
}

/// Detach the subtrees at `v` and `w` and reattach each at the other's parent.
///
/// Neither may be the root and they must not be siblings.
pub fn swap(tree: &mut BinaryTree, v: VertexId, w: VertexId) {
    debug_assert!(v != w && !tree.is_root(v) && !tree.is_root(w));
    let (Some(vp), Some(wp), Some(vs), Some(ws)) =
        (tree.parent(v), tree.parent(w), tree.sibling(v), tree.sibling(w))
    else {
        return;
    };
    debug_assert!(vp != wp, "swap of siblings {} and {}", v, w);
    tree.set_parent_and_children(vp, vs, w);
    tree.set_parent_and_children(wp, ws, v);
}

/// Nearest-neighbour interchange on a random vertex at depth three or more,
/// swapping it with its parent's sibling. Returns `false` if no such vertex
/// exists.
pub fn nni(tree: &mut BinaryTree, times: Option<&mut TimesMap>, rng: &mut dyn RngCore) -> bool {
    let candidates: Vec<VertexId> = (0..tree.vertex_count())
        .filter(|&v| tree.depth(v) >= 3)
        .collect();
    match candidates.choose(rng) {
        Some(&v) => nni_at(tree, times, v),
        None => false,
    }
}

pub(crate) fn nni_at(tree: &mut BinaryTree, times: Option<&mut TimesMap>, v: VertexId) -> bool {
    let (Some(vp), Some(vs)) = (tree.parent(v), tree.sibling(v)) else {
        return false;
    };
    let (Some(wp), Some(w)) = (tree.parent(vp), tree.sibling(vp)) else {
        return false;
    };
    let Some(wpp) = tree.parent(wp) else {
        return false;
    };

    // Keep vp and wp at the same relative heights within [max child, wpp].
    let heuristic = times.as_deref().map(|t| {
        let top = t.vertex_time(wpp);
        let span = top - t.vertex_time(v).max(t.vertex_time(vs));
        (top, t.arc_time(vp) / span, t.arc_time(wp) / span)
    });

    swap(tree, v, w);

    if let (Some(t), Some((top, kvp, kwp))) = (times, heuristic) {
        let span = top - t.vertex_time(w).max(t.vertex_time(vs)).max(t.vertex_time(v));
        let wp_time = kwp * span;
        let vp_time = kvp * span;
        t.set_vertex_time(wp, top - wp_time);
        t.set_vertex_time(vp, top - wp_time - vp_time);
        for x in [wp, vp, v, w, vs] {
            refresh_arc_time(tree, t, x);
        }
    }
    true
}

/// Subtree prune and regraft: cut a random subtree whose parent is not the
/// root and hang it on a random arc outside it.
pub fn spr(
    tree: &mut BinaryTree,
    lengths: Option<&mut DoubleMap>,
    times: Option<&mut TimesMap>,
    rng: &mut dyn RngCore,
) -> bool {
    let prunable: Vec<VertexId> = (0..tree.vertex_count())
        .filter(|&v| tree.depth(v) >= 2)
        .collect();
    let Some(&u_c) = prunable.choose(rng) else {
        return false;
    };
    let Some(u) = tree.parent(u_c) else {
        return false;
    };
    let targets: Vec<VertexId> = (0..tree.vertex_count())
        .filter(|&x| !tree.is_root(x) && !tree.is_ancestor(u, x))
        .collect();
    match targets.choose(rng) {
        Some(&u_c_new) => spr_at(tree, lengths, times, u_c, u_c_new),
        None => false,
    }
}

/// Move the subtree at `u_c` (together with its parent `u`) onto the arc
/// above `u_c_new`.
pub(crate) fn spr_at(
    tree: &mut BinaryTree,
    lengths: Option<&mut DoubleMap>,
    times: Option<&mut TimesMap>,
    u_c: VertexId,
    u_c_new: VertexId,
) -> bool {
    let Some(u) = tree.parent(u_c) else {
        return false;
    };
    let (Some(u_p), Some(u_s), Some(u_oc)) = (tree.parent(u), tree.sibling(u), tree.sibling(u_c))
    else {
        return false;
    };
    if tree.is_root(u_c_new) || tree.is_ancestor(u, u_c_new) {
        return false;
    }

    // u keeps the ratio between its own arc and the arc through u_oc.
    let heuristic = times.as_deref().map(|t| {
        let a = t.arc_time(u);
        let k = (t.arc_time(u_oc) + a) / a;
        let b_new = t.arc_time(u_c_new);
        (t.vertex_time(u), b_new, b_new / k)
    });

    tree.set_parent_and_children(u_p, u_oc, u_s);
    // Must follow the prune: u_c_new may be u_s.
    let (Some(u_c_new_p), Some(u_c_new_s)) = (tree.parent(u_c_new), tree.sibling(u_c_new)) else {
        return false;
    };
    tree.set_parent_and_children(u, u_c, u_c_new);
    tree.set_parent_and_children(u_c_new_p, u_c_new_s, u);

    if let (Some(t), Some((before, b_new, a_new))) = (times, heuristic) {
        let after = t.vertex_time(u_c_new) + b_new - a_new;
        t.set_vertex_time(u, after);
        for x in [u, u_c_new, u_oc] {
            refresh_arc_time(tree, t, x);
        }
        recursive_time_scaling(tree, t, u_c, after / before);
    }

    if let Some(l) = lengths {
        let (a, b, c) = (l.get(u), l.get(u_oc), l.get(u_c_new));
        let x = if a + b > 0.0 { a * c / (a + b) } else { 0.0 };
        l.set(u, x);
        l.set(u_oc, a + b);
        l.set(u_c_new, c - x);
    }
    true
}

/// Move the root onto a random arc not already adjacent to it.
pub fn reroot(
    tree: &mut BinaryTree,
    lengths: Option<&mut DoubleMap>,
    times: Option<&mut TimesMap>,
    rng: &mut dyn RngCore,
) -> bool {
    let candidates: Vec<VertexId> = (0..tree.vertex_count())
        .filter(|&v| tree.depth(v) >= 2)
        .collect();
    let Some(&v) = candidates.choose(rng) else {
        return false;
    };
    match tree.parent(v) {
        Some(p) => {
            rotate(tree, p, v, lengths, times);
            true
        }
        None => false,
    }
}

/// Rotate the tree so that `v_child` becomes a child of the root and `v` is
/// re-hung below it, recursing upwards until `v` is a child of the root.
///
/// `v` must not be the root and `v_child` must be a child of `v`.
pub fn rotate(
    tree: &mut BinaryTree,
    v: VertexId,
    v_child: VertexId,
    mut lengths: Option<&mut DoubleMap>,
    mut times: Option<&mut TimesMap>,
) {
    debug_assert_eq!(tree.parent(v_child), Some(v));
    let Some(mut v_parent) = tree.parent(v) else {
        debug_assert!(false, "cannot rotate at the root");
        return;
    };
    if !tree.is_root(v_parent) {
        rotate(
            tree,
            v_parent,
            v,
            lengths.as_deref_mut(),
            times.as_deref_mut(),
        );
        match tree.parent(v) {
            Some(p) => v_parent = p,
            None => return,
        }
    }
    let (Some(v_other), Some(v_sibling)) = (tree.sibling(v_child), tree.sibling(v)) else {
        return;
    };

    // Relative position of v between its children and the root.
    let heuristic = times.as_deref().map(|t| {
        let root_time = t.vertex_time(v_parent);
        let lower = t.vertex_time(v_child).max(t.vertex_time(v_other));
        (root_time, t.arc_time(v) / (root_time - lower))
    });
    let old_lengths = lengths
        .as_deref()
        .map(|l| (l.get(v_child), l.get(v), l.get(v_sibling)));

    tree.set_parent_and_children(v, v_other, v_sibling);
    tree.set_parent_and_children(v_parent, v_child, v);

    if let (Some(t), Some((root_time, k))) = (times, heuristic) {
        let lower = t.vertex_time(v_other).max(t.vertex_time(v_sibling));
        t.set_vertex_time(v, root_time - k * (root_time - lower));
        for x in [v, v_other, v_sibling, v_child] {
            refresh_arc_time(tree, t, x);
        }
    }

    if let (Some(l), Some((a, b, c))) = (lengths, old_lengths) {
        let split = if b + c > 0.0 { b / (b + c) } else { 0.5 };
        l.set(v_child, (1.0 - split) * a);
        l.set(v, split * a);
        l.set(v_sibling, b + c);
    }
}

/// Scale vertex times of the subtree at `v` by `factor` (clamped at zero) and
/// refresh the arc times below and above it.
pub fn recursive_time_scaling(tree: &BinaryTree, times: &mut TimesMap, v: VertexId, factor: f64) {
    for x in tree.descendants(v, false) {
        times.set_vertex_time(x, (times.vertex_time(x) * factor).max(0.0));
        refresh_arc_time(tree, times, x);
    }
}

/// Reroot so that the named outgroup leaves hang directly below the root.
///
/// Lengths and times are not adjusted.
pub fn root_at_outgroup(tree: &mut BinaryTree, names: &NamesMap, outgroup: &[&str]) -> Result<()> {
    let mut lca: Option<VertexId> = None;
    for name in outgroup {
        let v = names
            .vertex(name)
            .ok_or_else(|| ParalogyError::InvalidInput(format!("unknown outgroup leaf '{}'", name)))?;
        lca = Some(match lca {
            Some(a) => tree.lca(a, v),
            None => v,
        });
    }
    let lca = lca.ok_or_else(|| ParalogyError::InvalidInput("empty outgroup".into()))?;
    match tree.parent(lca) {
        Some(p) if !tree.is_root(p) => rotate(tree, p, lca, None, None),
        _ => {}
    }
    Ok(())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::tree::fixtures::caterpillar;
    use proptest::prelude::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    proptest! {
        #[test]
        fn random_moves_keep_tree_bifurcating(
            leaves in 3usize..12,
            seed in any::<u64>(),
            accept in proptest::collection::vec(any::<bool>(), 1..40),
        ) {
            let tree = caterpillar(leaves);
            let n = tree.vertex_count();
            let mut vt = vec![0.0f64; n];
            for v in tree.postorder() {
                if let Some((l, r)) = tree.children(v) {
                    vt[v] = vt[l].max(vt[r]) + 1.0;
                }
            }
            let times = TimesMap::from_vertex_times(&tree, vt, 1.0).unwrap();
            let mut state = GuestState::new(tree)
                .with_lengths(DoubleMap::filled("lengths", n, 0.1))
                .with_times(times);
            let mut proposer = TopologyProposer::new();
            let mut rng = SmallRng::seed_from_u64(seed);
            for keep in accept {
                let before = state.tree.clone();
                let mut changes = ChangeInfos::new();
                proposer.cache_and_perturb(&mut state, &mut rng, &mut changes);
                prop_assert!(state.tree.check_bifurcating());
                prop_assert_eq!(state.tree.leaf_count(), leaves);
                if keep {
                    proposer.clear_cache(&mut state);
                } else {
                    proposer.restore_cache(&mut state);
                    prop_assert_eq!(&state.tree, &before);
                }
            }
        }
    }
}
