//! Discretised time on the arcs of a dated host tree.
//!
//! Each arc `x` (from vertex `x` up to its parent) is split into `k` equal
//! slices. The stored points are `[head, mid_1, ..., mid_k, tail]` where
//! `head` is the vertex time of `x`, `tail` the time of its parent (or the top
//! of the stem for the root), and `mid_i` the midpoint of slice `i`. A
//! [`DiscretePoint`] with slice 0 is the speciation (or leaf) at `x`; slice
//! `i > 0` is a duplication point strictly inside the arc.

use std::fmt;

use paralogy_core::{ParalogyError, Result, Summarizable};

use crate::config::DiscretisationConfig;
use crate::maps::TimesMap;
use crate::newick::{format_length, write_annotated};
use crate::tree::{BinaryTree, VertexId};

/// Arcs shorter than this get no slices.
pub const EPS: f64 = 1e-10;

/// Stem arcs at or below this span ignore the `nroot` override.
const STEM_EPS: f64 = 1e-8;

/// A point on the discretised host tree: an arc and a slice index on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscretePoint {
    pub arc: VertexId,
    pub slice: usize,
}

impl DiscretePoint {
    pub fn new(arc: VertexId, slice: usize) -> Self {
        Self { arc, slice }
    }

    /// Interior points are duplication points; slice 0 is a speciation or leaf.
    pub fn is_duplication(self) -> bool {
        self.slice > 0
    }
}

impl fmt::Display for DiscretePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.arc, self.slice)
    }
}

/// Slice boundaries and midpoints for every arc of a fixed host tree.
#[derive(Debug, Clone)]
pub struct ArcDiscretiser {
    host: BinaryTree,
    times: TimesMap,
    config: DiscretisationConfig,
    disc_times: Vec<Vec<f64>>,
}

impl ArcDiscretiser {
    /// Discretise every arc of `host` according to `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or `times` does not
    /// cover every host vertex.
    pub fn new(host: &BinaryTree, times: &TimesMap, config: DiscretisationConfig) -> Result<Self> {
        config.validate()?;
        if times.len() != host.vertex_count() {
            return Err(ParalogyError::InvalidInput(format!(
                "times cover {} vertices, host tree has {}",
                times.len(),
                host.vertex_count()
            )));
        }
        let mut disc = Self {
            host: host.clone(),
            times: times.clone(),
            config,
            disc_times: Vec::with_capacity(host.vertex_count()),
        };
        disc.update();
        Ok(disc)
    }

    fn update(&mut self) {
        let deltat = self.config.effective_deltat();
        self.disc_times = (0..self.host.vertex_count())
            .map(|x| {
                let at = self.times.arc_time(x);
                let k = if at > EPS {
                    ((at / deltat).ceil() as usize).clamp(self.config.nmin, self.config.nmax)
                } else {
                    0
                };
                arc_points(self.times.vertex_time(x), at, k)
            })
            .collect();

        let root = self.host.root();
        let at = self.times.arc_time(root);
        if let Some(nroot) = self.config.nroot {
            if at > STEM_EPS {
                self.disc_times[root] = arc_points(self.times.vertex_time(root), at, nroot);
            }
        }
    }

    /// Replace the stem arc above the root with a new span and slice count.
    ///
    /// Used when guest-tree duplications must be accommodated above the host
    /// root. A span below [`EPS`] yields zero slices regardless of `slices`.
    pub fn rediscretise_stem(&mut self, arc_time: f64, slices: usize) -> Result<()> {
        if !arc_time.is_finite() || arc_time < 0.0 {
            return Err(ParalogyError::InvalidInput(format!(
                "invalid stem span {}",
                arc_time
            )));
        }
        if slices == 0 && arc_time > EPS {
            return Err(ParalogyError::InvalidInput(
                "a stem of positive span needs at least one slice".into(),
            ));
        }
        let root = self.host.root();
        self.times.set_arc_time(root, arc_time);
        let k = if arc_time > EPS { slices } else { 0 };
        self.disc_times[root] = arc_points(self.times.vertex_time(root), arc_time, k);
        tracing::debug!(stem = arc_time, slices = k, "rediscretised stem arc");
        Ok(())
    }

    /// Number of interior slices on arc `x`.
    pub fn slice_count(&self, x: VertexId) -> usize {
        self.disc_times[x].len() - 2
    }

    /// Number of points on arc `x`, endpoints included.
    pub fn point_count(&self, x: VertexId) -> usize {
        self.disc_times[x].len()
    }

    /// Absolute time of point `i` on arc `x` (0 = head, `slice_count + 1` = tail).
    pub fn discretisation_time(&self, x: VertexId, i: usize) -> f64 {
        self.disc_times[x][i]
    }

    /// Absolute time of a discretised point.
    pub fn point_time(&self, p: DiscretePoint) -> f64 {
        self.disc_times[p.arc][p.slice]
    }

    /// All points on arc `x`.
    pub fn discretisation_times(&self, x: VertexId) -> &[f64] {
        &self.disc_times[x]
    }

    /// Width of one slice on arc `x`; zero for an arc without slices.
    pub fn slice_time(&self, x: VertexId) -> f64 {
        match self.slice_count(x) {
            0 => 0.0,
            k => self.times.arc_time(x) / k as f64,
        }
    }

    /// Total slices on the path from arc `x` up to and including the stem.
    pub fn slices_for_root_path(&self, x: VertexId) -> usize {
        let mut cnt = 0;
        let mut cur = Some(x);
        while let Some(v) = cur {
            cnt += self.slice_count(v);
            cur = self.host.parent(v);
        }
        cnt
    }

    /// Largest number of slices on any leaf-to-root path.
    pub fn max_slice_height(&self) -> usize {
        let mut mx = vec![0; self.host.vertex_count()];
        for x in self.host.postorder() {
            let below = match self.host.children(x) {
                Some((l, r)) => mx[l].max(mx[r]),
                None => 0,
            };
            mx[x] = below + self.slice_count(x);
        }
        mx[self.host.root()]
    }

    pub fn root(&self) -> VertexId {
        self.host.root()
    }

    pub fn host(&self) -> &BinaryTree {
        &self.host
    }

    pub fn times(&self) -> &TimesMap {
        &self.times
    }

    pub fn config(&self) -> &DiscretisationConfig {
        &self.config
    }

    pub fn vertex_time(&self, x: VertexId) -> f64 {
        self.times.vertex_time(x)
    }

    pub fn arc_time(&self, x: VertexId) -> f64 {
        self.times.arc_time(x)
    }
}

fn arc_points(vt: f64, at: f64, k: usize) -> Vec<f64> {
    let at = if at.is_nan() { 0.0 } else { at };
    let mut pts = Vec::with_capacity(k + 2);
    pts.push(vt);
    if k > 0 {
        let step = at / k as f64;
        pts.extend((1..=k).map(|i| vt + step * (i as f64 - 0.5)));
    }
    pts.push(vt + at);
    pts
}

impl Summarizable for ArcDiscretiser {
    /// Host tree in Newick form with vertex ids as names, arc times as
    /// lengths, and per-arc slice counts.
    fn summary(&self) -> String {
        write_annotated(&self.host, |x| {
            format!(
                "{}:{}[&&PRIME NSLICES={}]",
                x,
                format_length(self.times.arc_time(x)),
                self.slice_count(x)
            )
        })
    }
}

impl fmt::Display for ArcDiscretiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::host3;
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn slice_counts_follow_clamp() {
        let (disc, _) = host3();
        assert_eq!(disc.slice_count(0), 4);
        assert_eq!(disc.slice_count(2), 4);
        assert_eq!(disc.slice_count(3), 4);
        assert_eq!(disc.slice_count(4), 2);
        assert_eq!(disc.point_count(4), 4);
    }

    #[test]
    fn midpoints_and_endpoints() {
        let (disc, _) = host3();
        let pts = disc.discretisation_times(0);
        let expected = [0.0, 0.125, 0.375, 0.625, 0.875, 1.0];
        assert_eq!(pts.len(), expected.len());
        for (a, b) in pts.iter().zip(expected) {
            assert!((a - b).abs() < TOL);
        }
        assert!((disc.discretisation_time(4, 0) - 2.0).abs() < TOL);
        assert!((disc.discretisation_time(4, 3) - 2.5).abs() < TOL);
        assert!((disc.point_time(DiscretePoint::new(3, 1)) - 1.125).abs() < TOL);
    }

    #[test]
    fn slice_time_and_heights() {
        let (disc, _) = host3();
        assert!((disc.slice_time(2) - 0.5).abs() < TOL);
        assert!((disc.slice_time(4) - 0.25).abs() < TOL);
        assert_eq!(disc.slices_for_root_path(0), 10);
        assert_eq!(disc.slices_for_root_path(2), 6);
        assert_eq!(disc.max_slice_height(), 10);
    }

    #[test]
    fn fixed_count_uses_nmin() {
        let nw = crate::newick::parse("((A:1,B:1):1,C:2):0.5;").unwrap();
        let times = nw.times().unwrap();
        let cfg = DiscretisationConfig { nmin: 3, nmax: 3, deltat: 0.0, nroot: None };
        let disc = ArcDiscretiser::new(&nw.tree, &times, cfg).unwrap();
        for x in 0..5 {
            assert_eq!(disc.slice_count(x), 3);
        }
    }

    #[test]
    fn zero_length_arcs_have_no_slices() {
        let tree = BinaryTree::from_children(vec![None, None, Some((0, 1))]).unwrap();
        let times = TimesMap::new(vec![0.0, 0.0, 1.0], vec![1.0, 1.0, 0.0]).unwrap();
        let disc = ArcDiscretiser::new(&tree, &times, DiscretisationConfig::default()).unwrap();
        assert_eq!(disc.slice_count(2), 0);
        assert_eq!(disc.discretisation_times(2), &[1.0, 1.0]);
        assert_eq!(disc.slice_time(2), 0.0);
        assert!(disc.slice_count(0) >= 3);
    }

    #[test]
    fn stem_override() {
        let nw = crate::newick::parse("((A:1,B:1):1,C:2):0.5;").unwrap();
        let times = nw.times().unwrap();
        let cfg = DiscretisationConfig { nmin: 2, nmax: 4, deltat: 0.3, nroot: Some(7) };
        let disc = ArcDiscretiser::new(&nw.tree, &times, cfg).unwrap();
        assert_eq!(disc.slice_count(4), 7);
        assert_eq!(disc.slice_count(0), 4);
    }

    #[test]
    fn rediscretise_stem_replaces_root_arc() {
        let (mut disc, _) = host3();
        disc.rediscretise_stem(1.0, 5).unwrap();
        assert_eq!(disc.slice_count(4), 5);
        assert!((disc.discretisation_time(4, 6) - 3.0).abs() < TOL);
        assert!((disc.arc_time(4) - 1.0).abs() < TOL);
        disc.rediscretise_stem(0.0, 5).unwrap();
        assert_eq!(disc.slice_count(4), 0);
        assert!(disc.rediscretise_stem(-1.0, 2).is_err());
        assert!(disc.rediscretise_stem(1.0, 0).is_err());
    }

    #[test]
    fn invalid_configuration_fails() {
        let nw = crate::newick::parse("(A:1,B:1);").unwrap();
        let times = nw.times().unwrap();
        let cfg = DiscretisationConfig { nmin: 1, ..Default::default() };
        assert!(ArcDiscretiser::new(&nw.tree, &times, cfg).is_err());
        let cfg = DiscretisationConfig { deltat: -0.5, ..Default::default() };
        assert!(ArcDiscretiser::new(&nw.tree, &times, cfg).is_err());
    }

    #[test]
    fn summary_lists_slices() {
        let (disc, _) = host3();
        let s = disc.summary();
        assert!(s.starts_with("((0:1[&&PRIME NSLICES=4],1:1[&&PRIME NSLICES=4])3:1"));
        assert!(s.ends_with("4:0.5[&&PRIME NSLICES=2];"));
    }

    #[test]
    fn point_display() {
        assert_eq!(DiscretePoint::new(3, 1).to_string(), "(3,1)");
        assert!(DiscretePoint::new(3, 1).is_duplication());
        assert!(!DiscretePoint::new(3, 0).is_duplication());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::tree::fixtures::caterpillar;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn points_increase_from_head_to_tail(
            nmin in 2usize..6,
            extra in 0usize..6,
            deltat in 0.01f64..1.0,
            spans in proptest::collection::vec(0.0f64..3.0, 6),
        ) {
            let tree = caterpillar(4);
            // Vertex times built bottom-up from the sampled spans.
            let mut vt = vec![0.0f64; tree.vertex_count()];
            for v in tree.postorder() {
                if let Some((l, r)) = tree.children(v) {
                    vt[v] = vt[l].max(vt[r]) + spans[v % spans.len()] + 1e-3;
                }
            }
            let times = TimesMap::from_vertex_times(&tree, vt, spans[0]).unwrap();
            let cfg = DiscretisationConfig { nmin, nmax: nmin + extra, deltat, nroot: None };
            let disc = ArcDiscretiser::new(&tree, &times, cfg).unwrap();
            for x in 0..tree.vertex_count() {
                let pts = disc.discretisation_times(x);
                let at = times.arc_time(x);
                prop_assert!((pts[0] - times.vertex_time(x)).abs() < 1e-9);
                prop_assert!((pts[pts.len() - 1] - (times.vertex_time(x) + at)).abs() < 1e-9);
                if at > EPS {
                    let k = disc.slice_count(x);
                    prop_assert!(k >= nmin && k <= nmin + extra);
                    for w in pts.windows(2) {
                        prop_assert!(w[0] < w[1]);
                    }
                    prop_assert!((disc.slice_time(x) * k as f64 - at).abs() < 1e-9);
                } else {
                    prop_assert_eq!(disc.slice_count(x), 0);
                }
            }
        }
    }
}
