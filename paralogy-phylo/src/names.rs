//! Vertex names and leaf associations.
//!
//! - [`NamesMap`] labels vertices of one tree.
//! - [`GuestHostMap`] associates guest (gene) leaf names with host (species)
//!   leaf names.
//! - [`LeafKinds`] flags guest leaves as functional genes or pseudogenes.

use std::collections::{BTreeSet, HashMap};

use paralogy_core::{ParalogyError, Result};

use crate::tree::VertexId;

/// Vertex labels with reverse lookup. Unnamed vertices are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamesMap {
    names: Vec<Option<String>>,
    index: HashMap<String, VertexId>,
}

impl NamesMap {
    /// Build a names map; duplicate names are rejected.
    pub fn new(names: Vec<Option<String>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(names.len());
        for (v, name) in names.iter().enumerate() {
            if let Some(name) = name {
                if index.insert(name.clone(), v).is_some() {
                    return Err(ParalogyError::InvalidInput(format!(
                        "duplicate vertex name '{}'",
                        name
                    )));
                }
            }
        }
        Ok(Self { names, index })
    }

    /// Name of vertex `v`, if any.
    pub fn get(&self, v: VertexId) -> Option<&str> {
        self.names.get(v).and_then(|n| n.as_deref())
    }

    /// Vertex carrying `name`, if any.
    pub fn vertex(&self, name: &str) -> Option<VertexId> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Guest-leaf to host-leaf association.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestHostMap {
    guest_to_host: HashMap<String, String>,
}

impl GuestHostMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(guest, host)` pairs.
    pub fn from_pairs<G, H>(pairs: impl IntoIterator<Item = (G, H)>) -> Result<Self>
    where
        G: Into<String>,
        H: Into<String>,
    {
        let mut map = Self::new();
        for (g, h) in pairs {
            map.add(g, h)?;
        }
        Ok(map)
    }

    /// Parse whitespace-separated `guest host` lines. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse(input: &str) -> Result<Self> {
        let mut map = Self::new();
        for (lineno, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(g), Some(h), None) => map.add(g, h)?,
                _ => {
                    return Err(ParalogyError::Parse(format!(
                        "line {}: expected 'guest host', got '{}'",
                        lineno + 1,
                        line
                    )))
                }
            }
        }
        Ok(map)
    }

    /// Associate a guest leaf with a host leaf.
    pub fn add(&mut self, guest: impl Into<String>, host: impl Into<String>) -> Result<()> {
        let guest = guest.into();
        if self.guest_to_host.contains_key(&guest) {
            return Err(ParalogyError::InvalidInput(format!(
                "guest leaf '{}' mapped twice",
                guest
            )));
        }
        self.guest_to_host.insert(guest, host.into());
        Ok(())
    }

    /// Host leaf name associated with `guest`.
    pub fn host_leaf(&self, guest: &str) -> Option<&str> {
        self.guest_to_host.get(guest).map(String::as_str)
    }

    /// All guest leaf names, sorted.
    pub fn guest_leaves(&self) -> BTreeSet<&str> {
        self.guest_to_host.keys().map(String::as_str).collect()
    }

    /// Number of guest leaves in the map.
    pub fn len(&self) -> usize {
        self.guest_to_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guest_to_host.is_empty()
    }
}

/// Gene/pseudogene status of guest leaves, keyed by leaf name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafKinds {
    pseudogene: HashMap<String, bool>,
}

impl LeafKinds {
    /// Build from `(leaf, is_pseudogene)` pairs.
    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, bool)>) -> Self {
        Self {
            pseudogene: pairs.into_iter().map(|(n, p)| (n.into(), p)).collect(),
        }
    }

    /// `Some(true)` for a pseudogene leaf, `Some(false)` for a gene leaf,
    /// `None` if the leaf is unknown.
    pub fn is_pseudogene(&self, leaf: &str) -> Option<bool> {
        self.pseudogene.get(leaf).copied()
    }

    pub fn len(&self) -> usize {
        self.pseudogene.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pseudogene.is_empty()
    }
}
