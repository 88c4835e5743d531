//! Per-vertex parameter maps with single-level caching.
//!
//! Branch lengths, pseudogenization switches, and edge models are dense
//! arrays indexed by [`VertexId`]. Each map carries its own snapshot that
//! mirrors the topology's [`Cached`] protocol.

use paralogy_core::{Cached, ParalogyError, Result};

use crate::tree::{BinaryTree, VertexId};

/// A named, dense per-vertex map.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VertexMap<T> {
    name: String,
    values: Vec<T>,
    #[cfg_attr(feature = "serde", serde(skip))]
    cache: Option<Vec<T>>,
}

impl<T: Copy> VertexMap<T> {
    /// Create a map from explicit values.
    pub fn new(name: impl Into<String>, values: Vec<T>) -> Self {
        Self {
            name: name.into(),
            values,
            cache: None,
        }
    }

    /// Create a map with `n` copies of `value`.
    pub fn filled(name: impl Into<String>, n: usize, value: T) -> Self {
        Self::new(name, vec![value; n])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, v: VertexId) -> T {
        self.values[v]
    }

    pub fn set(&mut self, v: VertexId, value: T) {
        self.values[v] = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Overwrite every value from `src`, which must have the same length.
    pub fn copy_from_slice(&mut self, src: &[T]) {
        self.values.copy_from_slice(src);
    }
}

impl<T: Clone> Cached for VertexMap<T> {
    fn cache(&mut self) {
        debug_assert!(self.cache.is_none(), "map {} cached twice", self.name);
        self.cache = Some(self.values.clone());
    }

    fn clear_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "map {} cleared without cache()", self.name);
        self.cache = None;
    }

    fn restore_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "map {} restored without cache()", self.name);
        if let Some(saved) = self.cache.take() {
            self.values = saved;
        }
    }

    fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}

/// Branch lengths (expected substitutions per site).
pub type DoubleMap = VertexMap<f64>;

/// Evolutionary state of the edge above a gene-tree vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeModel {
    /// Already a pseudogene along the whole edge.
    PseudogeneNoSwitch,
    /// Functional gene along the whole edge.
    Gene,
    /// Switches from gene to pseudogene somewhere along the edge.
    PseudogeneWithSwitch,
}

impl EdgeModel {
    /// Integer code used in sample files: 0, 1, 2 in declaration order.
    pub fn code(self) -> u8 {
        match self {
            EdgeModel::PseudogeneNoSwitch => 0,
            EdgeModel::Gene => 1,
            EdgeModel::PseudogeneWithSwitch => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(EdgeModel::PseudogeneNoSwitch),
            1 => Ok(EdgeModel::Gene),
            2 => Ok(EdgeModel::PseudogeneWithSwitch),
            other => Err(ParalogyError::InvalidInput(format!(
                "unknown edge model code {}",
                other
            ))),
        }
    }
}

/// Vertex times and arc times of a dated tree.
///
/// Times grow towards the root: leaves sit at (or near) zero. The arc time of
/// a vertex is the span of the arc above it; for the root it is the stem span.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimesMap {
    vertex_times: Vec<f64>,
    arc_times: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    cache: Option<(Vec<f64>, Vec<f64>)>,
}

impl TimesMap {
    /// Create from explicit vertex and arc times.
    pub fn new(vertex_times: Vec<f64>, arc_times: Vec<f64>) -> Result<Self> {
        if vertex_times.len() != arc_times.len() {
            return Err(ParalogyError::InvalidInput(format!(
                "vertex/arc time length mismatch: {} vs {}",
                vertex_times.len(),
                arc_times.len()
            )));
        }
        Ok(Self {
            vertex_times,
            arc_times,
            cache: None,
        })
    }

    /// Derive arc times from vertex times on `tree`, with `stem` as the root's
    /// arc time.
    pub fn from_vertex_times(tree: &BinaryTree, vertex_times: Vec<f64>, stem: f64) -> Result<Self> {
        if vertex_times.len() != tree.vertex_count() {
            return Err(ParalogyError::InvalidInput(format!(
                "expected {} vertex times, got {}",
                tree.vertex_count(),
                vertex_times.len()
            )));
        }
        let arc_times = (0..tree.vertex_count())
            .map(|v| match tree.parent(v) {
                Some(p) => vertex_times[p] - vertex_times[v],
                None => stem,
            })
            .collect();
        Self::new(vertex_times, arc_times)
    }

    pub fn vertex_time(&self, v: VertexId) -> f64 {
        self.vertex_times[v]
    }

    pub fn arc_time(&self, v: VertexId) -> f64 {
        self.arc_times[v]
    }

    pub fn set_vertex_time(&mut self, v: VertexId, t: f64) {
        self.vertex_times[v] = t;
    }

    pub fn set_arc_time(&mut self, v: VertexId, t: f64) {
        self.arc_times[v] = t;
    }

    pub fn vertex_times(&self) -> &[f64] {
        &self.vertex_times
    }

    pub fn arc_times(&self) -> &[f64] {
        &self.arc_times
    }

    pub fn len(&self) -> usize {
        self.vertex_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_times.is_empty()
    }

    /// Time of the tip of the stem arc above the root.
    pub fn tree_top_time(&self, tree: &BinaryTree) -> f64 {
        let r = tree.root();
        self.vertex_times[r] + self.arc_times[r]
    }
}

impl Cached for TimesMap {
    fn cache(&mut self) {
        debug_assert!(self.cache.is_none(), "times cached twice");
        self.cache = Some((self.vertex_times.clone(), self.arc_times.clone()));
    }

    fn clear_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "times cleared without cache()");
        self.cache = None;
    }

    fn restore_cache(&mut self) {
        debug_assert!(self.cache.is_some(), "times restored without cache()");
        if let Some((vt, at)) = self.cache.take() {
            self.vertex_times = vt;
            self.arc_times = at;
        }
    }

    fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}
