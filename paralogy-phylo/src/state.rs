//! The guest-tree state a proposer perturbs.

use paralogy_core::Cached;

use crate::maps::{DoubleMap, TimesMap};
use crate::pseudogene::Pseudogenization;
use crate::tree::BinaryTree;

/// Guest topology plus the parameter maps that move with it.
///
/// Caching acts on every attached part at once, so a proposer can snapshot
/// and roll back the whole state with one call.
#[derive(Debug, Clone)]
pub struct GuestState {
    pub tree: BinaryTree,
    pub lengths: Option<DoubleMap>,
    pub times: Option<TimesMap>,
    pub pseudogenes: Option<Pseudogenization>,
}

impl GuestState {
    pub fn new(tree: BinaryTree) -> Self {
        Self {
            tree,
            lengths: None,
            times: None,
            pseudogenes: None,
        }
    }

    pub fn with_lengths(mut self, lengths: DoubleMap) -> Self {
        self.lengths = Some(lengths);
        self
    }

    pub fn with_times(mut self, times: TimesMap) -> Self {
        self.times = Some(times);
        self
    }

    pub fn with_pseudogenes(mut self, pseudogenes: Pseudogenization) -> Self {
        self.pseudogenes = Some(pseudogenes);
        self
    }

    /// True when no pseudogenization is attached or the attached one is legal
    /// on the current topology.
    pub fn is_legal(&self) -> bool {
        self.pseudogenes
            .as_ref()
            .map_or(true, |pg| pg.is_legal(&self.tree))
    }
}

impl Cached for GuestState {
    fn cache(&mut self) {
        self.tree.cache();
        if let Some(l) = self.lengths.as_mut() {
            l.cache();
        }
        if let Some(t) = self.times.as_mut() {
            t.cache();
        }
        if let Some(pg) = self.pseudogenes.as_mut() {
            pg.cache();
        }
    }

    fn clear_cache(&mut self) {
        self.tree.clear_cache();
        if let Some(l) = self.lengths.as_mut() {
            l.clear_cache();
        }
        if let Some(t) = self.times.as_mut() {
            t.clear_cache();
        }
        if let Some(pg) = self.pseudogenes.as_mut() {
            pg.clear_cache();
        }
    }

    fn restore_cache(&mut self) {
        self.tree.restore_cache();
        if let Some(l) = self.lengths.as_mut() {
            l.restore_cache();
        }
        if let Some(t) = self.times.as_mut() {
            t.restore_cache();
        }
        if let Some(pg) = self.pseudogenes.as_mut() {
            pg.restore_cache();
        }
    }

    fn is_cached(&self) -> bool {
        self.tree.is_cached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudogene::fixtures::all_gene;
    use crate::tree::fixtures::{balanced4, caterpillar4};

    #[test]
    fn restore_rolls_back_every_part() {
        let tree = balanced4();
        let pg = all_gene(&tree, &[0]);
        let mut state = GuestState::new(tree.clone())
            .with_lengths(DoubleMap::filled("lengths", 7, 0.1))
            .with_pseudogenes(pg);
        state.cache();
        state.tree.set_topology(&caterpillar4());
        if let Some(l) = state.lengths.as_mut() {
            l.set(0, 2.0);
        }
        if let Some(pg) = state.pseudogenes.as_mut() {
            pg.set_switch(0, 0.5);
        }
        state.restore_cache();
        assert_eq!(state.tree, tree);
        assert_eq!(state.lengths.as_ref().unwrap().get(0), 0.1);
        assert_eq!(state.pseudogenes.as_ref().unwrap().switch(0), 1.0);
        assert!(!state.is_cached());
    }

    #[test]
    fn legality_without_pseudogenes() {
        let state = GuestState::new(balanced4());
        assert!(state.is_legal());
        let tree = balanced4();
        let state = GuestState::new(tree.clone()).with_pseudogenes(all_gene(&tree, &[1]));
        assert!(!state.is_legal());
    }
}
