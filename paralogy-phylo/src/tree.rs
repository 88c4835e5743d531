//! Rooted, strictly bifurcating tree topology.
//!
//! Uses arena-style storage: parent and child relations live in flat vectors
//! indexed by `VertexId` (a dense `usize` in `[0, n)`). The whole topology can
//! be snapshotted and rolled back through the [`Cached`] protocol, which is a
//! copy of three flat vectors and the root id.

use paralogy_core::{Cached, ParalogyError, Result, Summarizable};

/// Index into the tree's vertex arena.
pub type VertexId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Topology {
    parents: Vec<Option<VertexId>>,
    children: Vec<Option<(VertexId, VertexId)>>,
    root: VertexId,
}

/// A rooted binary tree over vertices `0..n`.
///
/// Every internal vertex has exactly two children and every vertex except the
/// root has exactly one parent. Absence of a relation (the root's parent, a
/// leaf's children) is `None`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryTree {
    topology: Topology,
    #[cfg_attr(feature = "serde", serde(skip))]
    cache: Option<Topology>,
}

impl PartialEq for BinaryTree {
    /// Structural equality on parent/child arrays and root; the cache is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.topology == other.topology
    }
}

impl Eq for BinaryTree {}

impl BinaryTree {
    /// Build a tree from per-vertex child pairs (`None` for leaves).
    ///
    /// The root is the single vertex that is nobody's child.
    pub fn from_children(children: Vec<Option<(VertexId, VertexId)>>) -> Result<Self> {
        let n = children.len();
        if n == 0 {
            return Err(ParalogyError::InvalidInput("empty vertex list".into()));
        }
        let mut parents: Vec<Option<VertexId>> = vec![None; n];
        for (v, pair) in children.iter().enumerate() {
            if let Some((l, r)) = *pair {
                for c in [l, r] {
                    if c >= n {
                        return Err(ParalogyError::InvalidInput(format!(
                            "child index {} of vertex {} out of range ({})",
                            c, v, n
                        )));
                    }
                    if c == v {
                        return Err(ParalogyError::InvalidInput(format!(
                            "vertex {} is its own child",
                            v
                        )));
                    }
                    if parents[c].is_some() {
                        return Err(ParalogyError::InvalidInput(format!(
                            "vertex {} has more than one parent",
                            c
                        )));
                    }
                    parents[c] = Some(v);
                }
                if l == r {
                    return Err(ParalogyError::InvalidInput(format!(
                        "vertex {} has the same child twice",
                        v
                    )));
                }
            }
        }
        let roots: Vec<VertexId> = (0..n).filter(|&v| parents[v].is_none()).collect();
        if roots.len() != 1 {
            return Err(ParalogyError::InvalidInput(format!(
                "expected exactly one root, found {}",
                roots.len()
            )));
        }
        let tree = Self {
            topology: Topology {
                parents,
                children,
                root: roots[0],
            },
            cache: None,
        };
        // A cycle detached from the root would leave vertices unreachable.
        if tree.iter_preorder().count() != n {
            return Err(ParalogyError::InvalidInput(
                "not all vertices are reachable from the root".into(),
            ));
        }
        Ok(tree)
    }

    /// The root vertex id.
    pub fn root(&self) -> VertexId {
        self.topology.root
    }

    /// Total number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.topology.parents.len()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.topology.children.iter().filter(|c| c.is_none()).count()
    }

    /// Parent of `v`, or `None` for the root.
    pub fn parent(&self, v: VertexId) -> Option<VertexId> {
        self.topology.parents[v]
    }

    /// Left and right child of `v`, or `None` for a leaf.
    pub fn children(&self, v: VertexId) -> Option<(VertexId, VertexId)> {
        self.topology.children[v]
    }

    /// Left child of `v`, or `None` for a leaf.
    pub fn left_child(&self, v: VertexId) -> Option<VertexId> {
        self.topology.children[v].map(|(l, _)| l)
    }

    /// Right child of `v`, or `None` for a leaf.
    pub fn right_child(&self, v: VertexId) -> Option<VertexId> {
        self.topology.children[v].map(|(_, r)| r)
    }

    /// The other child of `v`'s parent, or `None` for the root.
    pub fn sibling(&self, v: VertexId) -> Option<VertexId> {
        let (l, r) = self.children(self.parent(v)?)?;
        Some(if l == v { r } else { l })
    }

    /// True if `v` has no children.
    pub fn is_leaf(&self, v: VertexId) -> bool {
        self.topology.children[v].is_none()
    }

    /// True if `v` has no parent.
    pub fn is_root(&self, v: VertexId) -> bool {
        self.topology.root == v
    }

    /// All leaf ids in increasing order.
    pub fn leaves(&self) -> Vec<VertexId> {
        (0..self.vertex_count()).filter(|&v| self.is_leaf(v)).collect()
    }

    /// Vertices of the subtree rooted at `v`, in pre-order.
    ///
    /// With `proper` set, `v` itself is excluded.
    pub fn descendants(&self, v: VertexId, proper: bool) -> Vec<VertexId> {
        let mut out = Vec::new();
        let mut stack = vec![v];
        while let Some(x) = stack.pop() {
            if x != v || !proper {
                out.push(x);
            }
            if let Some((l, r)) = self.children(x) {
                stack.push(r);
                stack.push(l);
            }
        }
        out
    }

    /// Leaves of the subtree rooted at `v`.
    pub fn descendant_leaves(&self, v: VertexId) -> Vec<VertexId> {
        self.descendants(v, false)
            .into_iter()
            .filter(|&x| self.is_leaf(x))
            .collect()
    }

    /// True if `anc` lies on the path from `v` to the root (inclusive).
    pub fn is_ancestor(&self, anc: VertexId, v: VertexId) -> bool {
        let mut cur = Some(v);
        while let Some(x) = cur {
            if x == anc {
                return true;
            }
            cur = self.parent(x);
        }
        false
    }

    /// Number of arcs between `v` and the root.
    pub fn depth(&self, v: VertexId) -> usize {
        let mut d = 0;
        let mut cur = v;
        while let Some(p) = self.parent(cur) {
            d += 1;
            cur = p;
        }
        d
    }

    /// Lowest common ancestor of two vertices.
    pub fn lca(&self, a: VertexId, b: VertexId) -> VertexId {
        let (mut a, mut b) = (a, b);
        let (mut da, mut db) = (self.depth(a), self.depth(b));
        while da > db {
            a = self.topology.parents[a].unwrap_or(a);
            da -= 1;
        }
        while db > da {
            b = self.topology.parents[b].unwrap_or(b);
            db -= 1;
        }
        while a != b {
            match (self.parent(a), self.parent(b)) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                _ => return self.root(),
            }
        }
        a
    }

    /// Vertices ordered root to leaves, level by level.
    ///
    /// Every vertex appears after its parent.
    pub fn topological_order(&self) -> Vec<VertexId> {
        let mut out = Vec::with_capacity(self.vertex_count());
        out.push(self.root());
        let mut i = 0;
        while i < out.len() {
            if let Some((l, r)) = self.children(out[i]) {
                out.push(l);
                out.push(r);
            }
            i += 1;
        }
        out
    }

    /// Pre-order (parent before children) traversal yielding vertex ids.
    pub fn iter_preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            tree: self,
            stack: vec![self.root()],
            remaining: self.vertex_count(),
        }
    }

    /// Post-order (children before parent) sequence of vertex ids.
    pub fn postorder(&self) -> Vec<VertexId> {
        let mut result = Vec::with_capacity(self.vertex_count());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            result.push(id);
            if let Some((l, r)) = self.children(id) {
                stack.push(l);
                stack.push(r);
            }
        }
        result.reverse();
        result
    }

    /// Make `l` and `r` the children of `p`.
    ///
    /// Only the three named relations are rewritten; callers moving whole
    /// subtrees must issue one call per affected parent so the bifurcating
    /// invariant holds once they are done. The root id never changes here.
    pub fn set_parent_and_children(&mut self, p: VertexId, l: VertexId, r: VertexId) {
        debug_assert!(p != l && p != r && l != r, "degenerate relation {}:{},{}", p, l, r);
        self.topology.children[p] = Some((l, r));
        self.topology.parents[l] = Some(p);
        self.topology.parents[r] = Some(p);
    }

    /// Copy the structure of `other` into `self`. Both trees must have the
    /// same number of vertices.
    ///
    /// Any outstanding cache is kept, so a proposer can seed the working copy
    /// and still roll back.
    pub fn set_topology(&mut self, other: &BinaryTree) {
        debug_assert_eq!(self.vertex_count(), other.vertex_count());
        self.topology.clone_from(&other.topology);
    }

    /// True if the root is unique, every non-root vertex has one parent that
    /// lists it as a child, and every internal vertex has two distinct children.
    pub fn check_bifurcating(&self) -> bool {
        let n = self.vertex_count();
        let mut roots = 0;
        for v in 0..n {
            match self.parent(v) {
                None => roots += 1,
                Some(p) => match self.children(p) {
                    Some((l, r)) if (l == v) != (r == v) => {}
                    _ => return false,
                },
            }
            if let Some((l, r)) = self.children(v) {
                if l == r || self.parent(l) != Some(v) || self.parent(r) != Some(v) {
                    return false;
                }
            }
        }
        roots == 1 && self.parent(self.root()).is_none() && self.iter_preorder().count() == n
    }

    /// Order-independent key for the topology: equal keys mean the same
    /// rooted topology with the same leaf ids.
    pub fn canonical_form(&self) -> String {
        fn visit(tree: &BinaryTree, v: VertexId) -> String {
            match tree.children(v) {
                None => v.to_string(),
                Some((l, r)) => {
                    let (a, b) = (visit(tree, l), visit(tree, r));
                    if a <= b {
                        format!("({},{})", a, b)
                    } else {
                        format!("({},{})", b, a)
                    }
                }
            }
        }
        visit(self, self.root())
    }
}

impl Cached for BinaryTree {
    fn cache(&mut self) {
        debug_assert!(self.cache.is_none(), "tree topology cached twice");
        self.cache = Some(self.topology.clone());
    }

    fn clear_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "tree cache cleared without cache()");
        self.cache = None;
    }

    fn restore_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "tree cache restored without cache()");
        if let Some(saved) = self.cache.take() {
            self.topology = saved;
        }
    }

    fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}

impl Summarizable for BinaryTree {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        format!(
            "BinaryTree: {} vertices ({} leaves, {} internal), root {}",
            self.vertex_count(),
            leaves,
            self.vertex_count() - leaves,
            self.root()
        )
    }
}

/// Pre-order iterator over vertex ids.
pub struct PreorderIter<'a> {
    tree: &'a BinaryTree,
    stack: Vec<VertexId>,
    remaining: usize,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = VertexId;

    fn next(&mut self) -> Option<Self::Item> {
        // Bounded by the vertex count so a corrupted relation cannot loop forever.
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let id = self.stack.pop()?;
        // Right pushed first so the left child is visited first.
        if let Some((l, r)) = self.tree.children(id) {
            self.stack.push(r);
            self.stack.push(l);
        }
        Some(id)
    }
}
