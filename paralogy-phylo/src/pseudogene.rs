//! Pseudogenization switches on guest-tree edges.
//!
//! Each guest vertex carries a switch position on the edge above it (`1.0`
//! means no switch) and an [`EdgeModel`]. A configuration is legal when every
//! pseudogene leaf has exactly one switch on its path to the root.

use paralogy_core::{Cached, ParalogyError, Result};
use tracing::warn;

use crate::maps::{DoubleMap, EdgeModel, VertexMap};
use crate::names::{LeafKinds, NamesMap};
use crate::tree::{BinaryTree, VertexId};

/// Switch value meaning "no switch on this edge".
pub const NO_SWITCH: f64 = 1.0;

/// Switch position assigned when consistency repair introduces a switch.
pub const DEFAULT_SWITCH_POSITION: f64 = 0.5;

/// Switch and edge-model maps together with the pseudogene leaf set.
#[derive(Debug, Clone)]
pub struct Pseudogenization {
    switches: DoubleMap,
    edge_models: VertexMap<EdgeModel>,
    pseudogene_leaves: Vec<bool>,
}

impl Pseudogenization {
    /// # Errors
    ///
    /// Returns an error if the maps do not cover every guest vertex or a guest
    /// leaf is unnamed or has no gene/pseudogene status.
    pub fn new(
        guest: &BinaryTree,
        names: &NamesMap,
        kinds: &LeafKinds,
        switches: DoubleMap,
        edge_models: VertexMap<EdgeModel>,
    ) -> Result<Self> {
        let n = guest.vertex_count();
        if switches.len() != n || edge_models.len() != n {
            return Err(ParalogyError::InvalidInput(format!(
                "pseudogenization maps cover {} and {} vertices, guest tree has {}",
                switches.len(),
                edge_models.len(),
                n
            )));
        }
        let mut pseudogene_leaves = vec![false; n];
        for x in guest.leaves() {
            let name = names.get(x).ok_or_else(|| {
                ParalogyError::InvalidInput(format!("guest leaf {} has no name", x))
            })?;
            pseudogene_leaves[x] = kinds.is_pseudogene(name).ok_or_else(|| {
                ParalogyError::InvalidInput(format!(
                    "no gene/pseudogene status for leaf '{}'",
                    name
                ))
            })?;
        }
        Ok(Self {
            switches,
            edge_models,
            pseudogene_leaves,
        })
    }

    pub fn switches(&self) -> &DoubleMap {
        &self.switches
    }

    pub fn edge_models(&self) -> &VertexMap<EdgeModel> {
        &self.edge_models
    }

    pub fn switch(&self, v: VertexId) -> f64 {
        self.switches.get(v)
    }

    pub fn edge_model(&self, v: VertexId) -> EdgeModel {
        self.edge_models.get(v)
    }

    pub fn set_switch(&mut self, v: VertexId, switch: f64) {
        self.switches.set(v, switch);
    }

    pub fn set_edge_model(&mut self, v: VertexId, model: EdgeModel) {
        self.edge_models.set(v, model);
    }

    pub fn is_pseudogene_leaf(&self, v: VertexId) -> bool {
        self.pseudogene_leaves.get(v).copied().unwrap_or(false)
    }

    /// True if every pseudogene leaf of `tree` sees exactly one switch on its
    /// root path under the current switch map.
    pub fn is_legal(&self, tree: &BinaryTree) -> bool {
        tree.leaves()
            .into_iter()
            .filter(|&l| self.is_pseudogene_leaf(l))
            .all(|l| switches_on_root_path(tree, &self.switches, l) == 1)
    }

    /// Repair edge models on `tree` after a structural change.
    ///
    /// A no-switch pseudogene edge below a gene edge gets a switch, and every
    /// switch strictly below another switch is removed.
    pub fn make_consistent(&mut self, tree: &BinaryTree) {
        self.repair(tree, tree.root());
    }

    fn repair(&mut self, tree: &BinaryTree, v: VertexId) {
        if self.edge_models.get(v) == EdgeModel::PseudogeneNoSwitch {
            let parent_is_gene = tree
                .parent(v)
                .map_or(false, |p| self.edge_models.get(p) == EdgeModel::Gene);
            if parent_is_gene {
                self.edge_models.set(v, EdgeModel::PseudogeneWithSwitch);
                self.switches.set(v, DEFAULT_SWITCH_POSITION);
            }
        }
        if tree.is_leaf(v) {
            return;
        }
        match self.edge_models.get(v) {
            EdgeModel::PseudogeneWithSwitch => self.remove_nested_switches(tree, v),
            EdgeModel::Gene => {
                if let Some((l, r)) = tree.children(v) {
                    self.repair(tree, l);
                    self.repair(tree, r);
                }
            }
            EdgeModel::PseudogeneNoSwitch => {}
        }
    }

    fn remove_nested_switches(&mut self, tree: &BinaryTree, v: VertexId) {
        for d in tree.descendants(v, true) {
            match self.edge_models.get(d) {
                EdgeModel::PseudogeneWithSwitch => {
                    self.edge_models.set(d, EdgeModel::PseudogeneNoSwitch);
                    self.switches.set(d, NO_SWITCH);
                }
                EdgeModel::Gene => {
                    warn!(vertex = d, below = v, "gene edge below a pseudogenization switch");
                }
                EdgeModel::PseudogeneNoSwitch => {}
            }
        }
    }
}

/// Number of vertices with a switch on the path from `leaf` up to and
/// including the root.
pub fn switches_on_root_path(tree: &BinaryTree, switches: &DoubleMap, leaf: VertexId) -> usize {
    let mut cnt = 0;
    let mut cur = Some(leaf);
    while let Some(v) = cur {
        if switches.get(v) != NO_SWITCH {
            cnt += 1;
        }
        cur = tree.parent(v);
    }
    cnt
}

impl Cached for Pseudogenization {
    fn cache(&mut self) {
        self.switches.cache();
        self.edge_models.cache();
    }

    fn clear_cache(&mut self) {
        self.switches.clear_cache();
        self.edge_models.clear_cache();
    }

    fn restore_cache(&mut self) {
        self.switches.restore_cache();
        self.edge_models.restore_cache();
    }

    fn is_cached(&self) -> bool {
        self.switches.is_cached()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::tree::fixtures::balanced4;

    #[test]
    fn exactly_one_switch_is_legal() {
        // ((0,1)4,(2,3)5)6 with leaf 0 a pseudogene.
        let tree = balanced4();
        let mut pg = all_gene(&tree, &[0]);
        assert!(!pg.is_legal(&tree));

        pg.set_switch(0, 0.3);
        assert!(pg.is_legal(&tree));

        pg.set_switch(4, 0.6);
        assert!(!pg.is_legal(&tree));

        pg.set_switch(0, NO_SWITCH);
        assert!(pg.is_legal(&tree));

        pg.set_switch(4, NO_SWITCH);
        pg.set_switch(6, 0.2);
        assert!(pg.is_legal(&tree));
    }

    #[test]
    fn switch_off_the_path_is_illegal() {
        let tree = balanced4();
        let mut pg = all_gene(&tree, &[0]);
        pg.set_switch(2, 0.5);
        assert!(!pg.is_legal(&tree));
        assert_eq!(switches_on_root_path(&tree, pg.switches(), 2), 1);
        assert_eq!(switches_on_root_path(&tree, pg.switches(), 0), 0);
    }

    #[test]
    fn no_pseudogenes_is_always_legal() {
        let tree = balanced4();
        let mut pg = all_gene(&tree, &[]);
        pg.set_switch(4, 0.5);
        pg.set_switch(0, 0.5);
        assert!(pg.is_legal(&tree));
    }

    #[test]
    fn repair_adds_switch_below_gene() {
        let tree = balanced4();
        let mut pg = all_gene(&tree, &[0]);
        pg.set_edge_model(0, EdgeModel::PseudogeneNoSwitch);
        pg.make_consistent(&tree);
        assert_eq!(pg.edge_model(0), EdgeModel::PseudogeneWithSwitch);
        assert_eq!(pg.switch(0), DEFAULT_SWITCH_POSITION);
        assert!(pg.is_legal(&tree));
    }

    #[test]
    fn repair_removes_nested_switches() {
        let tree = balanced4();
        let mut pg = all_gene(&tree, &[0, 1]);
        pg.set_edge_model(4, EdgeModel::PseudogeneWithSwitch);
        pg.set_switch(4, 0.3);
        pg.set_edge_model(0, EdgeModel::PseudogeneWithSwitch);
        pg.set_switch(0, 0.5);
        pg.set_edge_model(1, EdgeModel::PseudogeneNoSwitch);
        pg.make_consistent(&tree);
        assert_eq!(pg.edge_model(4), EdgeModel::PseudogeneWithSwitch);
        assert_eq!(pg.edge_model(0), EdgeModel::PseudogeneNoSwitch);
        assert_eq!(pg.switch(0), NO_SWITCH);
        assert_eq!(pg.edge_model(1), EdgeModel::PseudogeneNoSwitch);
        assert!(pg.is_legal(&tree));
    }

    #[test]
    fn cache_restores_both_maps() {
        let tree = balanced4();
        let mut pg = all_gene(&tree, &[0]);
        pg.cache();
        pg.set_edge_model(0, EdgeModel::PseudogeneWithSwitch);
        pg.set_switch(0, 0.5);
        pg.restore_cache();
        assert_eq!(pg.edge_model(0), EdgeModel::Gene);
        assert_eq!(pg.switch(0), NO_SWITCH);
        assert!(!pg.is_cached());
    }

    #[test]
    fn unknown_leaf_status_fails() {
        let tree = balanced4();
        let names = leaf_names(&tree);
        let kinds = LeafKinds::from_pairs([("g0", true), ("g1", false)]);
        let res = Pseudogenization::new(
            &tree,
            &names,
            &kinds,
            DoubleMap::filled("switches", 7, NO_SWITCH),
            VertexMap::filled("edge models", 7, EdgeModel::Gene),
        );
        assert!(res.is_err());
    }
}
