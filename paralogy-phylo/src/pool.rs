//! Resampling topologies from a pool of previously observed trees.
//!
//! A [`TreePool`] holds distinct topologies with their observation counts,
//! most prevalent first. [`PoolResamplingProposer`] replaces the current guest
//! topology with a pool draw and corrects the Metropolis–Hastings ratio with
//! the pool prevalences.

use std::collections::HashMap;

use paralogy_core::{Cached, LogProb, ParalogyError, Result, Summarizable};
use rand::seq::SliceRandom;
use rand::RngCore;
use tracing::{debug, trace};

use crate::config::{PoolConfig, RetryLimits};
use crate::names::NamesMap;
use crate::newick;
use crate::proposal::{note_changes, ChangeInfos, Proposal, ProposalOutcome, Proposer, ProposerStatistics};
use crate::state::GuestState;
use crate::tree::BinaryTree;

/// One distinct topology of the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEntry {
    pub tree: BinaryTree,
    pub count: usize,
    /// Observed branch-length sets, one per instance that carried lengths.
    pub lengths: Vec<Vec<f64>>,
}

impl PoolEntry {
    /// Entry without observed lengths.
    pub fn new(tree: BinaryTree, count: usize) -> Self {
        Self {
            tree,
            count,
            lengths: Vec::new(),
        }
    }
}

/// Distinct topologies with observation counts, sorted by descending count.
#[derive(Debug, Clone)]
pub struct TreePool {
    entries: Vec<PoolEntry>,
    total: usize,
}

impl TreePool {
    /// # Errors
    ///
    /// Returns an error for an empty pool, a zero count, trees of differing
    /// size, or a length set that does not cover every vertex.
    pub fn new(mut entries: Vec<PoolEntry>) -> Result<Self> {
        let first = entries
            .first()
            .ok_or_else(|| ParalogyError::InvalidInput("empty tree pool".into()))?;
        let n = first.tree.vertex_count();
        for (i, e) in entries.iter().enumerate() {
            if e.count == 0 {
                return Err(ParalogyError::InvalidInput(format!(
                    "pool entry {} has zero count",
                    i
                )));
            }
            if e.tree.vertex_count() != n {
                return Err(ParalogyError::InvalidInput(format!(
                    "pool entry {} has {} vertices, expected {}",
                    i,
                    e.tree.vertex_count(),
                    n
                )));
            }
            if let Some(l) = e.lengths.iter().find(|l| l.len() != n) {
                return Err(ParalogyError::InvalidInput(format!(
                    "pool entry {} has a length set of size {}, expected {}",
                    i,
                    l.len(),
                    n
                )));
            }
        }
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        let total = entries.iter().map(|e| e.count).sum();
        Ok(Self { entries, total })
    }

    /// Group sampled trees by rooted topology. Length sets are kept per
    /// topology in sampling order.
    pub fn from_samples<I>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (BinaryTree, Option<Vec<f64>>)>,
    {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut entries: Vec<PoolEntry> = Vec::new();
        for (tree, lengths) in samples {
            let key = tree.canonical_form();
            let i = match index.get(&key) {
                Some(&i) => {
                    entries[i].count += 1;
                    i
                }
                None => {
                    index.insert(key, entries.len());
                    entries.push(PoolEntry::new(tree, 1));
                    entries.len() - 1
                }
            };
            if let Some(l) = lengths {
                entries[i].lengths.push(l);
            }
        }
        Self::new(entries)
    }

    /// Read one Newick tree per line (the last tab-separated column), drop
    /// the leading `burn_in` fraction of lines, then drop the least prevalent
    /// topologies while their coverage is below `min_coverage`.
    ///
    /// Blank lines and lines starting with `#` are skipped. Returns the pool
    /// and the names of the first kept tree; all trees must share its leaf set.
    pub fn parse(input: &str, burn_in: f64, min_coverage: f64) -> Result<(Self, NamesMap)> {
        if !(0.0..=1.0).contains(&burn_in) {
            return Err(ParalogyError::InvalidInput(format!(
                "burn-in proportion must be in [0, 1], got {}",
                burn_in
            )));
        }
        if !(0.0..=1.0).contains(&min_coverage) {
            return Err(ParalogyError::InvalidInput(format!(
                "minimum coverage must be in [0, 1], got {}",
                min_coverage
            )));
        }
        let lines: Vec<&str> = input
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        let skip = (lines.len() as f64 * burn_in).round() as usize;
        let mut template: Option<NamesMap> = None;
        let mut samples = Vec::with_capacity(lines.len() - skip);
        for (no, line) in lines.iter().enumerate().skip(skip) {
            let column = line.rsplit('\t').next().unwrap_or(*line);
            let nw = newick::parse(column).map_err(|e| {
                ParalogyError::Parse(format!("tree sample {}: {}", no + 1, e))
            })?;
            match template.as_ref() {
                None => template = Some(nw.names.clone()),
                Some(t) => check_same_leaves(t, &nw.names, &nw.tree, no + 1)?,
            }
            let lengths = nw.lengths.map(|l| l.values().to_vec());
            samples.push((nw.tree, lengths));
        }
        let names = template
            .ok_or_else(|| ParalogyError::InvalidInput("no trees left after burn-in".into()))?;
        let mut pool = Self::from_samples(samples)?;
        pool.prune_below(min_coverage)?;
        debug!(
            distinct = pool.len(),
            total = pool.total_count(),
            "tree pool loaded"
        );
        Ok((pool, names))
    }

    /// Remove least prevalent entries while their coverage is below
    /// `min_coverage`. Coverage is recomputed against the remaining total
    /// after each removal.
    ///
    /// # Errors
    ///
    /// Returns an error if `min_coverage` is not in `[0, 1]` or if no entry
    /// would remain. The pool is left unchanged on error.
    pub fn prune_below(&mut self, min_coverage: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&min_coverage) {
            return Err(ParalogyError::InvalidInput(format!(
                "minimum coverage must be in [0, 1], got {}",
                min_coverage
            )));
        }
        let mut keep = self.entries.len();
        let mut total = self.total;
        while keep > 0 {
            let count = self.entries[keep - 1].count;
            if count as f64 / total as f64 >= min_coverage {
                break;
            }
            total -= count;
            keep -= 1;
        }
        if keep == 0 {
            return Err(ParalogyError::InvalidInput(format!(
                "no topology reaches coverage {}",
                min_coverage
            )));
        }
        self.entries.truncate(keep);
        self.total = total;
        Ok(())
    }

    /// Number of distinct topologies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false` for a constructed pool.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in descending count order.
    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// Entry `i`; 0 is the most prevalent.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn entry(&self, i: usize) -> &PoolEntry {
        &self.entries[i]
    }

    /// Sum of all entry counts.
    pub fn total_count(&self) -> usize {
        self.total
    }

    /// Whether any entry carries observed branch lengths.
    pub fn has_lengths(&self) -> bool {
        self.entries.iter().any(|e| !e.lengths.is_empty())
    }

    /// Fraction of all observed trees that have topology `i`.
    pub fn coverage(&self, i: usize) -> f64 {
        self.entries[i].count as f64 / self.total as f64
    }

    /// Coverage of the first entry.
    pub fn most_prevalent_coverage(&self) -> f64 {
        self.coverage(0)
    }

    /// Coverage of the last entry.
    pub fn least_prevalent_coverage(&self) -> f64 {
        self.coverage(self.entries.len() - 1)
    }
}

fn check_same_leaves(template: &NamesMap, names: &NamesMap, tree: &BinaryTree, sample: usize) -> Result<()> {
    let same = tree.leaf_count() * 2 - 1 == template.len()
        && tree.leaves().into_iter().all(|l| names.get(l) == template.get(l));
    if same {
        Ok(())
    } else {
        Err(ParalogyError::InvalidInput(format!(
            "tree sample {} has a different leaf set",
            sample
        )))
    }
}

impl Summarizable for TreePool {
    fn summary(&self) -> String {
        format!(
            "{} distinct of {} trees; coverage {:.4} to {:.4}",
            self.len(),
            self.total,
            self.most_prevalent_coverage(),
            self.least_prevalent_coverage()
        )
    }
}

/// Proposer that swaps in a topology drawn from a [`TreePool`].
///
/// The current topology's pool count is tracked so the backward density is
/// known; before the first accepted draw it is 1.
#[derive(Debug, Clone)]
pub struct PoolResamplingProposer {
    pool: TreePool,
    config: PoolConfig,
    limits: RetryLimits,
    sample_indices: Vec<usize>,
    count: usize,
    count_cache: Option<usize>,
    stats: ProposerStatistics,
    enabled: bool,
}

impl PoolResamplingProposer {
    /// Proposer over `pool` for a guest tree of the same size as `guest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool trees are not the size of `guest`.
    pub fn new(pool: TreePool, config: PoolConfig, guest: &BinaryTree) -> Result<Self> {
        let n = guest.vertex_count();
        if pool.entry(0).tree.vertex_count() != n {
            return Err(ParalogyError::InvalidInput(format!(
                "pool trees have {} vertices, guest tree has {}",
                pool.entry(0).tree.vertex_count(),
                n
            )));
        }
        let sample_indices = if config.equal_topology_chance {
            (0..pool.len()).collect()
        } else {
            pool.entries()
                .iter()
                .enumerate()
                .flat_map(|(i, e)| std::iter::repeat(i).take(e.count))
                .collect()
        };
        Ok(Self {
            pool,
            config,
            limits: RetryLimits::default(),
            sample_indices,
            count: 1,
            count_cache: None,
            stats: ProposerStatistics::new(),
            enabled: true,
        })
    }

    /// Replace the retry limits of the legality loop.
    ///
    /// # Errors
    ///
    /// Returns an error if `limits` is invalid.
    pub fn with_limits(mut self, limits: RetryLimits) -> Result<Self> {
        limits.validate()?;
        self.limits = limits;
        Ok(self)
    }

    /// The pool draws come from.
    pub fn pool(&self) -> &TreePool {
        &self.pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool count of the current topology; zero after an exhausted draw.
    pub fn current_count(&self) -> usize {
        self.count
    }

    fn draw_legal(&self, state: &GuestState, rng: &mut dyn RngCore) -> Option<usize> {
        for attempt in 1..=self.limits.max_limit {
            let &idx = self.sample_indices.choose(rng)?;
            let legal = state
                .pseudogenes
                .as_ref()
                .map_or(true, |pg| pg.is_legal(&self.pool.entries[idx].tree));
            if legal {
                trace!(entry = idx, attempt, "pool topology drawn");
                return Some(idx);
            }
        }
        None
    }
}

impl Summarizable for PoolResamplingProposer {
    fn summary(&self) -> String {
        format!("{}; {}", self.pool.summary(), self.stats.summary())
    }
}

impl Proposer for PoolResamplingProposer {
    fn name(&self) -> &str {
        "tree pool sampler"
    }

    fn cache_and_perturb(
        &mut self,
        state: &mut GuestState,
        rng: &mut dyn RngCore,
        changes: &mut ChangeInfos,
    ) -> ProposalOutcome {
        state.cache();
        self.count_cache = Some(self.count);

        match self.draw_legal(state, rng) {
            Some(idx) => {
                let entry = &self.pool.entries[idx];
                state.tree.set_topology(&entry.tree);
                self.count = entry.count;
                if let Some(pg) = state.pseudogenes.as_mut() {
                    pg.make_consistent(&state.tree);
                }
                if self.config.sample_lengths {
                    if let (Some(l), Some(set)) = (state.lengths.as_mut(), entry.lengths.choose(rng)) {
                        l.copy_from_slice(set);
                    }
                }
            }
            None => {
                debug!(
                    max_limit = self.limits.max_limit,
                    "no legal pool topology found, forcing reject"
                );
                self.count = 0;
            }
        }

        let (affected, no) = note_changes(state, false, "Perturbed by pool resampling", changes);
        let prev = self.count_cache.unwrap_or(self.count);
        let (forward, backward) = if self.config.equal_topology_chance {
            let p = 1.0 / self.pool.len() as f64;
            (if self.count == 0 { 0.0 } else { p }, p)
        } else {
            let total = self.pool.total_count() as f64;
            (self.count as f64 / total, prev as f64 / total)
        };
        let proposal = Proposal {
            forward: LogProb::from_density(forward),
            backward: LogProb::from_density(backward),
            affected,
            sub_parameters: no,
        };
        if self.count == 0 {
            ProposalOutcome::ForcedReject(proposal)
        } else {
            ProposalOutcome::Accepted(proposal)
        }
    }

    fn clear_cache(&mut self, state: &mut GuestState) {
        self.stats.increment(true, None);
        state.clear_cache();
        self.count_cache = None;
    }

    fn restore_cache(&mut self, state: &mut GuestState) {
        self.stats.increment(false, None);
        state.restore_cache();
        if let Some(c) = self.count_cache.take() {
            self.count = c;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::DoubleMap;
    use crate::pseudogene::fixtures::all_gene;
    use crate::tree::fixtures::{balanced4, caterpillar4};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// ((1,2)4,(0,3)5)6
    fn split_13() -> BinaryTree {
        BinaryTree::from_children(vec![None, None, None, None, Some((1, 2)), Some((0, 3)), Some((4, 5))])
            .unwrap()
    }

    fn pool_7_3() -> TreePool {
        TreePool::new(vec![PoolEntry::new(caterpillar4(), 3), PoolEntry::new(balanced4(), 7)]).unwrap()
    }

    fn densities(outcome: &ProposalOutcome) -> (f64, f64) {
        let p = outcome.proposal();
        (p.forward.to_prob(), p.backward.to_prob())
    }

    #[test]
    fn entries_sorted_by_prevalence() {
        let pool = pool_7_3();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.total_count(), 10);
        assert_eq!(pool.entry(0).tree, balanced4());
        assert!((pool.most_prevalent_coverage() - 0.7).abs() < 1e-12);
        assert!((pool.least_prevalent_coverage() - 0.3).abs() < 1e-12);
        assert_eq!(pool.summary(), "2 distinct of 10 trees; coverage 0.7000 to 0.3000");
    }

    #[test]
    fn invalid_pools_are_rejected() {
        assert!(TreePool::new(vec![]).is_err());
        assert!(TreePool::new(vec![PoolEntry::new(balanced4(), 0)]).is_err());
        let mut e = PoolEntry::new(balanced4(), 1);
        e.lengths.push(vec![0.1; 3]);
        assert!(TreePool::new(vec![e]).is_err());
    }

    #[test]
    fn samples_group_by_topology() {
        // Same rooted topology as balanced4 with children listed the other way.
        let mirrored = BinaryTree::from_children(vec![
            None,
            None,
            None,
            None,
            Some((1, 0)),
            Some((3, 2)),
            Some((5, 4)),
        ])
        .unwrap();
        let pool = TreePool::from_samples(vec![
            (caterpillar4(), Some(vec![0.2; 7])),
            (balanced4(), Some(vec![0.1; 7])),
            (mirrored, None),
        ])
        .unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.entry(0).count, 2);
        assert_eq!(pool.entry(0).lengths, vec![vec![0.1; 7]]);
        assert_eq!(pool.entry(1).tree, caterpillar4());
        assert!(pool.has_lengths());
    }

    #[test]
    fn parse_applies_burn_in_and_coverage() {
        let input = "\
# sample\ttree
0\t(((a,b),c),d);
1\t((a,b),(c,d));
2\t((a,b),(c,d));
3\t((b,a),(d,c));
4\t(((a,b),c),d);
5\t((a,c),(b,d));
";
        let (pool, names) = TreePool::parse(input, 1.0 / 6.0, 0.0).unwrap();
        assert_eq!(pool.total_count(), 5);
        assert_eq!(pool.entry(0).count, 3);
        assert_eq!(names.vertex("a"), Some(0));

        let (pool, _) = TreePool::parse(input, 1.0 / 6.0, 0.3).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total_count(), 3);

        assert!(TreePool::parse(input, 1.5, 0.0).is_err());
        assert!(TreePool::parse("((a,b),c);\n((a,b),d);\n", 0.0, 0.0).is_err());
        assert!(TreePool::parse("((a,b),c);\n", 1.0, 0.0).is_err());
    }

    #[test]
    fn prune_keeps_pool_intact_on_error() {
        let mut pool = TreePool::from_samples(vec![
            (balanced4(), None),
            (balanced4(), None),
            (caterpillar4(), None),
        ])
        .unwrap();
        assert!(pool.prune_below(1.5).is_err());
        assert!(pool.prune_below(f64::NAN).is_err());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.total_count(), 3);
        assert_eq!(pool.summary(), "2 distinct of 3 trees; coverage 0.6667 to 0.3333");

        pool.prune_below(0.5).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total_count(), 2);
        assert_eq!(pool.least_prevalent_coverage(), 1.0);
    }

    #[test]
    fn weighted_densities_follow_counts() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut state = GuestState::new(balanced4());
        let mut p = PoolResamplingProposer::new(pool_7_3(), PoolConfig::default(), &state.tree).unwrap();
        let mut changes = ChangeInfos::new();

        let out = p.cache_and_perturb(&mut state, &mut rng, &mut changes);
        let (fwd, bwd) = densities(&out);
        let expected = if state.tree == balanced4() { 0.7 } else { 0.3 };
        assert!((fwd - expected).abs() < 1e-12);
        assert!((bwd - 0.1).abs() < 1e-12);
        p.clear_cache(&mut state);

        for _ in 0..20 {
            let out = p.cache_and_perturb(&mut state, &mut rng, &mut changes);
            let (fwd, bwd) = densities(&out);
            assert!((bwd - expected).abs() < 1e-12);
            let now = if state.tree == balanced4() { 0.7 } else { 0.3 };
            assert!((fwd - now).abs() < 1e-12);
            p.restore_cache(&mut state);
        }
    }

    #[test]
    fn equal_chance_ignores_counts() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut state = GuestState::new(caterpillar4());
        let config = PoolConfig {
            equal_topology_chance: true,
            sample_lengths: false,
        };
        let mut p = PoolResamplingProposer::new(pool_7_3(), config, &state.tree).unwrap();
        let mut changes = ChangeInfos::new();
        for _ in 0..10 {
            let out = p.cache_and_perturb(&mut state, &mut rng, &mut changes);
            assert!(!out.is_forced_reject());
            let (fwd, bwd) = densities(&out);
            assert!((fwd - 0.5).abs() < 1e-12);
            assert!((bwd - 0.5).abs() < 1e-12);
            p.clear_cache(&mut state);
        }
    }

    #[test]
    fn weighted_draws_match_prevalence() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut state = GuestState::new(caterpillar4());
        let mut p = PoolResamplingProposer::new(pool_7_3(), PoolConfig::default(), &state.tree).unwrap();
        let mut changes = ChangeInfos::new();
        let n = 2000;
        let mut hits = 0;
        for _ in 0..n {
            p.cache_and_perturb(&mut state, &mut rng, &mut changes);
            if state.tree == balanced4() {
                hits += 1;
            }
            p.restore_cache(&mut state);
        }
        let freq = hits as f64 / n as f64;
        assert!((freq - 0.7).abs() < 0.05, "frequency {}", freq);
        assert_eq!(state.tree, caterpillar4());
        assert_eq!(p.statistics().total(), n);
        assert_eq!(p.statistics().accepted(), 0);
    }

    #[test]
    fn exhaustion_forces_reject() {
        let mut rng = SmallRng::seed_from_u64(5);
        let tree = balanced4();
        // Leaf 0 is a pseudogene whose switch sits on vertex 4; in split_13
        // leaf 0 hangs below 5 and sees no switch.
        let mut pg = all_gene(&tree, &[0]);
        pg.set_switch(4, 0.5);
        let mut state = GuestState::new(tree.clone()).with_pseudogenes(pg);
        assert!(state.is_legal());

        let pool = TreePool::new(vec![PoolEntry::new(split_13(), 4)]).unwrap();
        let mut p = PoolResamplingProposer::new(pool, PoolConfig::default(), &tree).unwrap();
        let mut changes = ChangeInfos::new();
        let out = p.cache_and_perturb(&mut state, &mut rng, &mut changes);
        assert!(out.is_forced_reject());
        assert!(!out.proposal().is_valid());
        assert_eq!(p.current_count(), 0);
        assert_eq!(state.tree, tree);
        p.restore_cache(&mut state);
        assert_eq!(p.current_count(), 1);
        assert!(state.is_legal());
    }

    #[test]
    fn lengths_come_from_the_entry() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut entry = PoolEntry::new(balanced4(), 2);
        entry.lengths.push(vec![0.1; 7]);
        entry.lengths.push(vec![0.2; 7]);
        let pool = TreePool::new(vec![entry]).unwrap();
        let config = PoolConfig {
            equal_topology_chance: false,
            sample_lengths: true,
        };
        let mut state = GuestState::new(caterpillar4()).with_lengths(DoubleMap::filled("lengths", 7, 1.0));
        let mut p = PoolResamplingProposer::new(pool, config, &state.tree).unwrap();
        let mut changes = ChangeInfos::new();
        p.cache_and_perturb(&mut state, &mut rng, &mut changes);
        let l = state.lengths.as_ref().unwrap().get(3);
        assert!(l == 0.1 || l == 0.2);
        assert!(changes.contains_key(&crate::proposal::Parameter::Lengths));
        p.restore_cache(&mut state);
        assert_eq!(state.lengths.as_ref().unwrap().get(3), 1.0);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let pool = TreePool::new(vec![PoolEntry::new(balanced4(), 1)]).unwrap();
        let small = BinaryTree::from_children(vec![None, None, Some((0, 1))]).unwrap();
        assert!(PoolResamplingProposer::new(pool, PoolConfig::default(), &small).is_err());
    }
}
