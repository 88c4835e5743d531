//! Most-parsimonious reconciliation of a guest tree with a host tree.
//!
//! `sigma(x)` is the lowest host vertex that can hold guest vertex `x` when
//! only duplications and losses are allowed: a guest leaf maps to its
//! associated host leaf, an internal guest vertex to the LCA of its children's
//! images.

use std::sync::Arc;

use paralogy_core::{Cached, ParalogyError, Result};

use crate::names::{GuestHostMap, NamesMap};
use crate::tree::{BinaryTree, VertexId};

/// Sigma map from guest vertices to host vertices, with duplication and loss
/// counts derived from it.
#[derive(Debug, Clone)]
pub struct MprMap {
    gs_map: Arc<GuestHostMap>,
    host: Arc<BinaryTree>,
    sigma: Vec<VertexId>,
    cache: Option<Vec<VertexId>>,
}

impl MprMap {
    /// Build the map and compute sigma for the current guest topology.
    ///
    /// # Errors
    ///
    /// Returns an error if a guest leaf is unnamed, missing from the
    /// association, associated with an unknown host leaf, or if the
    /// association covers a different number of leaves than the guest tree.
    pub fn new(
        gs_map: Arc<GuestHostMap>,
        guest: &BinaryTree,
        guest_names: &NamesMap,
        host: Arc<BinaryTree>,
        host_names: &NamesMap,
    ) -> Result<Self> {
        let leaves = guest.leaves();
        if leaves.len() != gs_map.len() {
            return Err(ParalogyError::InvalidInput(format!(
                "guest tree has {} leaves but the leaf association has {}",
                leaves.len(),
                gs_map.len()
            )));
        }
        let mut sigma = vec![0; guest.vertex_count()];
        for x in leaves {
            let gname = guest_names.get(x).ok_or_else(|| {
                ParalogyError::InvalidInput(format!("guest leaf {} has no name", x))
            })?;
            let hname = gs_map.host_leaf(gname).ok_or_else(|| {
                ParalogyError::InvalidInput(format!("guest leaf '{}' has no host leaf", gname))
            })?;
            let s = host_names
                .vertex(hname)
                .filter(|&s| host.is_leaf(s))
                .ok_or_else(|| {
                    ParalogyError::InvalidInput(format!(
                        "host leaf '{}' of guest leaf '{}' not found",
                        hname, gname
                    ))
                })?;
            sigma[x] = s;
        }
        let mut map = Self {
            gs_map,
            host,
            sigma,
            cache: None,
        };
        map.force_update(guest);
        Ok(map)
    }

    /// A second map over the same association and host tree, starting from
    /// `other`'s current sigma.
    pub fn from_existing(other: &MprMap) -> Self {
        Self {
            gs_map: Arc::clone(&other.gs_map),
            host: Arc::clone(&other.host),
            sigma: other.sigma.clone(),
            cache: None,
        }
    }

    /// Recompute sigma for internal guest vertices after a topology change.
    /// Leaf images never change.
    /// Recompute every internal guest image from the leaf images up.
    pub fn force_update(&mut self, guest: &BinaryTree) {
        for x in guest.postorder() {
            if let Some((l, r)) = guest.children(x) {
                self.sigma[x] = self.host.lca(self.sigma[l], self.sigma[r]);
            }
        }
    }

    /// Host vertex that guest vertex `x` maps to.
    pub fn sigma(&self, x: VertexId) -> VertexId {
        self.sigma[x]
    }

    /// True if `x` shares its host image with one of its children.
    pub fn is_duplication(&self, guest: &BinaryTree, x: VertexId) -> bool {
        match guest.children(x) {
            Some((l, r)) => self.sigma[x] == self.sigma[l] || self.sigma[x] == self.sigma[r],
            None => false,
        }
    }

    /// Losses implied on the guest arc above `x`: host vertices strictly
    /// between `sigma(x)` and `sigma(parent(x))`. For the guest root the walk
    /// runs off the top of the host tree.
    pub fn losses_of_arc(&self, guest: &BinaryTree, x: VertexId) -> usize {
        let target = guest.parent(x).map(|p| self.sigma[p]);
        let mut cur = Some(self.sigma[x]);
        if cur == target {
            return 0;
        }
        let mut steps = 0;
        while cur != target {
            match cur {
                Some(s) => {
                    steps += 1;
                    cur = self.host.parent(s);
                }
                None => break,
            }
        }
        steps - 1
    }

    /// Number of guest vertices that are duplications.
    pub fn total_duplications(&self, guest: &BinaryTree) -> usize {
        (0..guest.vertex_count())
            .filter(|&x| self.is_duplication(guest, x))
            .count()
    }

    /// Sum of [`losses_of_arc`](Self::losses_of_arc) over every guest arc.
    pub fn total_losses(&self, guest: &BinaryTree) -> usize {
        (0..guest.vertex_count())
            .map(|x| self.losses_of_arc(guest, x))
            .sum()
    }

    /// Guest leaf to host leaf association.
    pub fn guest_host_map(&self) -> &GuestHostMap {
        &self.gs_map
    }

    /// The host tree.
    pub fn host(&self) -> &BinaryTree {
        &self.host
    }
}

impl Cached for MprMap {
    fn cache(&mut self) {
        debug_assert!(self.cache.is_none(), "sigma cached twice");
        self.cache = Some(self.sigma.clone());
    }

    fn clear_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "sigma cleared without cache()");
        self.cache = None;
    }

    fn restore_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "sigma restored without cache()");
        if let Some(saved) = self.cache.take() {
            self.sigma = saved;
        }
    }

    fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}
