//! Newick reader and writer for binary trees.
//!
//! Supports the standard Newick grammar, restricted to bifurcating trees:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' subtree ',' subtree ')' label | label
//! label    = name? (':' length)? comment?
//! comment  = '[' any* ']'
//! ```
//!
//! Leaves are numbered `0..k` in sorted-name order, so trees over the same
//! leaf set agree on leaf ids. Internal vertices follow in post-order and the
//! root gets the highest id.

use paralogy_core::{ParalogyError, Result};

use crate::maps::{DoubleMap, TimesMap};
use crate::names::NamesMap;
use crate::tree::{BinaryTree, VertexId};

/// A parsed binary tree with its labels and optional branch lengths.
#[derive(Debug, Clone)]
pub struct NewickTree {
    pub tree: BinaryTree,
    pub names: NamesMap,
    /// Present when every non-root vertex carries a length; the root length
    /// defaults to zero.
    pub lengths: Option<DoubleMap>,
}

impl NewickTree {
    /// Vertex times for an ultrametric reading of the branch lengths: leaves
    /// at zero, each internal vertex at the larger of its children's tip
    /// heights. The root's own length becomes the stem.
    pub fn times(&self) -> Result<TimesMap> {
        let lengths = self.lengths.as_ref().ok_or_else(|| {
            ParalogyError::InvalidInput("tree has no branch lengths to derive times from".into())
        })?;
        let mut vt = vec![0.0f64; self.tree.vertex_count()];
        for v in self.tree.postorder() {
            if let Some((l, r)) = self.tree.children(v) {
                vt[v] = (vt[l] + lengths.get(l)).max(vt[r] + lengths.get(r));
            }
        }
        TimesMap::from_vertex_times(&self.tree, vt, lengths.get(self.tree.root()))
    }
}

/// Parse a Newick string into a binary tree.
pub fn parse(input: &str) -> Result<NewickTree> {
    let mut parser = Parser::new(input.as_bytes());
    let (nodes, root) = parser.parse_tree()?;
    build(nodes, root)
}

/// Serialize with names and, if given, branch lengths.
pub fn write(tree: &BinaryTree, names: &NamesMap, lengths: Option<&DoubleMap>) -> String {
    write_annotated(tree, |v| {
        let mut label = names.get(v).unwrap_or_default().to_string();
        if let Some(lengths) = lengths {
            label.push(':');
            label.push_str(&format_length(lengths.get(v)));
        }
        label
    })
}

/// Serialize with a caller-supplied label (name, length, comment) per vertex.
pub fn write_annotated<F>(tree: &BinaryTree, mut label: F) -> String
where
    F: FnMut(VertexId) -> String,
{
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut label, &mut buf);
    buf.push(';');
    buf
}

fn write_subtree<F>(tree: &BinaryTree, v: VertexId, label: &mut F, buf: &mut String)
where
    F: FnMut(VertexId) -> String,
{
    if let Some((l, r)) = tree.children(v) {
        buf.push('(');
        write_subtree(tree, l, label, buf);
        buf.push(',');
        write_subtree(tree, r, label, buf);
        buf.push(')');
    }
    buf.push_str(&label(v));
}

/// Use enough precision but strip trailing zeros.
pub(crate) fn format_length(len: f64) -> String {
    let s = format!("{:.10}", len);
    let s = s.trim_end_matches('0');
    let s = s.trim_end_matches('.');
    s.to_string()
}

struct RawNode {
    children: Vec<usize>,
    name: Option<String>,
    length: Option<f64>,
}

fn build(nodes: Vec<RawNode>, root: usize) -> Result<NewickTree> {
    for node in &nodes {
        if !node.children.is_empty() && node.children.len() != 2 {
            return Err(ParalogyError::Parse(format!(
                "vertex with {} children; only bifurcating trees are supported",
                node.children.len()
            )));
        }
    }

    // Post-order over the raw nodes.
    let mut post = Vec::with_capacity(nodes.len());
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        post.push(id);
        stack.extend(nodes[id].children.iter().copied());
    }
    post.reverse();

    let mut leaves: Vec<usize> = post
        .iter()
        .copied()
        .filter(|&id| nodes[id].children.is_empty())
        .collect();
    for &id in &leaves {
        if nodes[id].name.is_none() {
            return Err(ParalogyError::Parse("unnamed leaf in Newick string".into()));
        }
    }
    leaves.sort_by(|&a, &b| nodes[a].name.cmp(&nodes[b].name));

    let mut ids = vec![0; nodes.len()];
    for (i, &id) in leaves.iter().enumerate() {
        ids[id] = i;
    }
    let mut next = leaves.len();
    for &id in &post {
        if !nodes[id].children.is_empty() {
            ids[id] = next;
            next += 1;
        }
    }

    let n = nodes.len();
    let mut children = vec![None; n];
    let mut names = vec![None; n];
    let mut lengths = vec![0.0; n];
    let mut all_lengths = true;
    for (raw, node) in nodes.into_iter().enumerate() {
        let v = ids[raw];
        if let &[l, r] = node.children.as_slice() {
            children[v] = Some((ids[l], ids[r]));
        }
        match node.length {
            Some(len) => lengths[v] = len,
            None if raw != root => all_lengths = false,
            None => {}
        }
        names[v] = node.name;
    }

    Ok(NewickTree {
        tree: BinaryTree::from_children(children)?,
        names: NamesMap::new(names)?,
        lengths: all_lengths.then(|| DoubleMap::new("Lengths", lengths)),
    })
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<RawNode>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<(Vec<RawNode>, usize)> {
        self.skip_whitespace();
        let root = self.parse_subtree(0)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(ParalogyError::Parse(
                "expected ';' at end of Newick string".into(),
            ));
        }
        self.pos += 1;
        Ok((std::mem::take(&mut self.nodes), root))
    }

    fn parse_subtree(&mut self, depth: usize) -> Result<usize> {
        if depth > 10_000 {
            return Err(ParalogyError::Parse("Newick nesting too deep".into()));
        }
        self.skip_whitespace();
        let id = self.alloc_node();

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let first = self.parse_subtree(depth + 1)?;
            self.nodes[id].children.push(first);
            loop {
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    let child = self.parse_subtree(depth + 1)?;
                    self.nodes[id].children.push(child);
                } else {
                    break;
                }
            }
            self.skip_whitespace();
            if self.peek() != Some(b')') {
                return Err(ParalogyError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1;
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: usize) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(ParalogyError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                ParalogyError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            self.nodes[id].length = Some(len);
        }
        self.skip_whitespace();
        if self.peek() == Some(b'[') {
            self.skip_comment()?;
        }
        Ok(())
    }

    fn skip_comment(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b']' {
                return Ok(());
            }
        }
        Err(ParalogyError::Parse("unterminated '[' comment".into()))
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' | b'[' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self) -> usize {
        let id = self.nodes.len();
        self.nodes.push(RawNode {
            children: Vec::new(),
            name: None,
            length: None,
        });
        id
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numbers_leaves_by_name() {
        let nw = parse("((c,a),(d,b));").unwrap();
        assert_eq!(nw.names.get(0), Some("a"));
        assert_eq!(nw.names.get(3), Some("d"));
        assert_eq!(nw.tree.vertex_count(), 7);
        assert_eq!(nw.tree.root(), 6);
        // (c,a) is visited first in post-order.
        assert_eq!(nw.tree.children(4), Some((2, 0)));
        assert_eq!(nw.tree.children(5), Some((3, 1)));
        assert!(nw.lengths.is_none());
    }

    #[test]
    fn parse_with_branch_lengths() {
        let nw = parse("((A:0.1,B:0.2):0.3,C:0.5):0.0;").unwrap();
        let lengths = nw.lengths.unwrap();
        assert_eq!(lengths.get(0), 0.1);
        assert_eq!(lengths.get(2), 0.5);
        assert_eq!(lengths.get(3), 0.3);
        assert_eq!(lengths.get(4), 0.0);
    }

    #[test]
    fn root_length_optional() {
        let nw = parse("(A:1,B:1);").unwrap();
        assert_eq!(nw.lengths.unwrap().get(2), 0.0);
    }

    #[test]
    fn ultrametric_times() {
        let nw = parse("((A:1,B:1):1,C:2):0.5;").unwrap();
        let times = nw.times().unwrap();
        assert_eq!(times.vertex_time(0), 0.0);
        assert_eq!(times.vertex_time(3), 1.0);
        assert_eq!(times.vertex_time(4), 2.0);
        assert_eq!(times.arc_time(3), 1.0);
        assert_eq!(times.arc_time(4), 0.5);
    }

    #[test]
    fn comments_are_skipped() {
        let nw = parse("(A:1[&&PRIME ID=0],B:1[x])[root];").unwrap();
        assert_eq!(nw.tree.leaf_count(), 2);
    }

    #[test]
    fn parse_errors() {
        assert!(parse("((A,B);").is_err());
        assert!(parse("(A,B)").is_err());
        assert!(parse("(A:abc,B);").is_err());
        assert!(parse("(A,B,C);").is_err());
        assert!(parse("((A),B);").is_err());
        assert!(parse("(A,);").is_err());
        assert!(parse("(A,A);").is_err());
        assert!(parse("(A[x,B);").is_err());
    }

    #[test]
    fn write_roundtrip() {
        let input = "((A:0.1,B:0.2):0.3,C:0.5):0;";
        let nw = parse(input).unwrap();
        let out = write(&nw.tree, &nw.names, nw.lengths.as_ref());
        assert_eq!(out, input);
    }

    #[test]
    fn write_annotated_labels() {
        let nw = parse("(A,B);").unwrap();
        let out = write_annotated(&nw.tree, |v| format!("v{}", v));
        assert_eq!(out, "(v0,v1)v2;");
    }
}
