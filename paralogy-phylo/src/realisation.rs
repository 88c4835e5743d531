//! Dated embeddings of the guest tree in the discretised host tree.
//!
//! Guest vertices are visited root first. Each internal vertex is placed at a
//! discretisation point strictly below its parent's placement and at or above
//! its precomputed lower limit; leaves sit at their lower limit. Candidate
//! points are weighted by
//!
//! ```text
//! rate_density(length / (t(x) - t(y))) * P11(x, y) * ats[i]
//! ```
//!
//! where `x` is the parent's placement and `ats[i]` the subtree probability
//! of the `i`th point walked upwards from the lower limit.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use paralogy_core::{ParalogyError, Result, Summarizable};
use rand::{Rng, RngCore};
use tracing::{debug, info_span, instrument, trace};

use crate::density::{DupLossProbs, RateDensity};
use crate::discretiser::{ArcDiscretiser, DiscretePoint};
use crate::maps::DoubleMap;
use crate::names::NamesMap;
use crate::newick::{format_length, write_annotated};
use crate::pseudogene::NO_SWITCH;
use crate::tree::{BinaryTree, VertexId};

/// Below this total candidate weight the draw is uniform.
pub const NEGLIGIBLE_TOTAL: f64 = 1e-256;

const HALF_BITS: u32 = 16;
const HALF_MASK: u32 = (1 << HALF_BITS) - 1;

/// A lower placement limit packed as `arc | slice << 16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LowerLimit(u32);

impl LowerLimit {
    /// # Errors
    ///
    /// Returns an error if the arc or slice does not fit in 16 bits.
    pub fn new(point: DiscretePoint) -> Result<Self> {
        if point.arc > HALF_MASK as usize || point.slice > HALF_MASK as usize {
            return Err(ParalogyError::InvalidInput(format!(
                "lower limit {} does not fit the packed form",
                point
            )));
        }
        Ok(Self(point.arc as u32 | (point.slice as u32) << HALF_BITS))
    }

    pub fn from_packed(packed: u32) -> Self {
        Self(packed)
    }

    pub fn packed(self) -> u32 {
        self.0
    }

    pub fn point(self) -> DiscretePoint {
        DiscretePoint::new((self.0 & HALF_MASK) as usize, (self.0 >> HALF_BITS) as usize)
    }
}

impl From<LowerLimit> for DiscretePoint {
    fn from(l: LowerLimit) -> Self {
        l.point()
    }
}

/// Event type of a placed guest vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VertexType {
    Leaf,
    Speciation,
    Duplication,
}

impl VertexType {
    pub fn name(self) -> &'static str {
        match self {
            VertexType::Leaf => "Leaf",
            VertexType::Speciation => "Speciation",
            VertexType::Duplication => "Duplication",
        }
    }
}

/// Everything one realisation draw reads. All per-vertex slices are indexed
/// by guest vertex id.
pub struct RealisationInputs<'a, P: ?Sized, D: ?Sized> {
    pub guest: &'a BinaryTree,
    pub names: &'a NamesMap,
    pub disc: &'a ArcDiscretiser,
    pub lower_limits: &'a [LowerLimit],
    /// Subtree probabilities at successive points above each lower limit.
    pub ats: &'a [Vec<f64>],
    pub p11: &'a P,
    pub rate_density: &'a D,
    pub lengths: &'a DoubleMap,
    pub switches: Option<&'a DoubleMap>,
}

impl<'a, P, D> RealisationInputs<'a, P, D>
where
    P: DupLossProbs + ?Sized,
    D: RateDensity + ?Sized,
{
    /// # Errors
    ///
    /// Returns an error if a per-vertex input does not cover the guest tree
    /// or a lower limit lies outside the discretisation.
    pub fn validate(&self) -> Result<()> {
        let n = self.guest.vertex_count();
        let sizes = [
            ("lower limits", self.lower_limits.len()),
            ("subtree probabilities", self.ats.len()),
            ("lengths", self.lengths.len()),
            ("switches", self.switches.map_or(n, |s| s.len())),
        ];
        for (what, len) in sizes {
            if len != n {
                return Err(ParalogyError::InvalidInput(format!(
                    "{} cover {} vertices, guest tree has {}",
                    what, len, n
                )));
            }
        }
        let host_n = self.disc.host().vertex_count();
        for (v, l) in self.lower_limits.iter().enumerate() {
            let p = l.point();
            if p.arc >= host_n || p.slice >= self.disc.point_count(p.arc) {
                return Err(ParalogyError::InvalidInput(format!(
                    "lower limit {} of guest vertex {} outside the discretisation",
                    p, v
                )));
            }
        }
        Ok(())
    }

    /// Candidate points for `v` below `x` with their relative weights.
    fn candidates(&self, v: VertexId, x: DiscretePoint) -> (Vec<DiscretePoint>, Vec<f64>) {
        let ats = &self.ats[v];
        let host = self.disc.host();
        let xt = self.disc.point_time(x);
        let length = self.lengths.get(v);
        let mut ys = Vec::with_capacity(ats.len());
        let mut weights = Vec::with_capacity(ats.len());
        let mut y = self.lower_limits[v].point();
        let mut i = 0;
        while i < ats.len()
            && y.slice < self.disc.point_count(y.arc)
            && !(x.arc == y.arc && x.slice <= y.slice)
        {
            let span = xt - self.disc.point_time(y);
            // Coincident points admit no rate.
            let w = if span > 0.0 {
                self.rate_density.pdf(length / span) * self.p11.p11(x, y) * ats[i]
            } else {
                0.0
            };
            ys.push(y);
            weights.push(w);
            i += 1;
            if y.slice == self.disc.slice_count(y.arc) {
                match host.parent(y.arc) {
                    Some(p) => y = DiscretePoint::new(p, 1),
                    None => break,
                }
            } else {
                y.slice += 1;
            }
        }
        (ys, weights)
    }

    fn realise<F>(&self, mut pick: F) -> Result<Realisation>
    where
        F: FnMut(&[f64]) -> usize,
    {
        self.validate()?;
        let n = self.guest.vertex_count();
        let root = self.disc.root();
        let top = DiscretePoint::new(root, self.disc.slice_count(root) + 1);

        let mut placements = vec![top; n];
        let mut times = vec![0.0; n];
        let mut arc_times = vec![0.0; n];
        let mut types = vec![VertexType::Leaf; n];
        for v in self.guest.topological_order() {
            let x = self.guest.parent(v).map_or(top, |p| placements[p]);
            let y = if self.guest.is_leaf(v) {
                self.lower_limits[v].point()
            } else {
                let (ys, weights) = self.candidates(v, x);
                if ys.is_empty() {
                    return Err(ParalogyError::Other(format!(
                        "no valid placement for guest vertex {} below {}",
                        v, x
                    )));
                }
                let y = ys[pick(&weights).min(ys.len() - 1)];
                trace!(vertex = v, candidates = ys.len(), point = %y, "placed");
                y
            };
            placements[v] = y;
            times[v] = self.disc.point_time(y);
            arc_times[v] = self.disc.point_time(x) - times[v];
            types[v] = if self.guest.is_leaf(v) {
                VertexType::Leaf
            } else if y.is_duplication() {
                VertexType::Duplication
            } else {
                VertexType::Speciation
            };
        }
        Ok(Realisation {
            tree: self.guest.clone(),
            names: self.names.clone(),
            placements,
            times,
            arc_times,
            types,
            switches: self.switches.map(|s| s.values().to_vec()),
        })
    }
}

/// Draw one realisation.
///
/// Candidates are drawn in proportion to their weights, or uniformly when the
/// total weight is below [`NEGLIGIBLE_TOTAL`].
///
/// # Errors
///
/// Returns an error for inconsistent inputs or an internal vertex without
/// any candidate point.
pub fn sample_realisation<P, D>(
    inputs: &RealisationInputs<'_, P, D>,
    rng: &mut dyn RngCore,
) -> Result<Realisation>
where
    P: DupLossProbs + ?Sized,
    D: RateDensity + ?Sized,
{
    inputs.realise(|weights| {
        let tot: f64 = weights.iter().sum();
        if tot < NEGLIGIBLE_TOTAL {
            return rng.gen_range(0..weights.len());
        }
        let rnd = rng.gen::<f64>() * tot;
        let mut cum = 0.0;
        weights
            .iter()
            .position(|&w| {
                cum += w;
                cum >= rnd
            })
            .unwrap_or(weights.len() - 1)
    })
}

/// Greedily place every internal vertex, root first, at its highest-weight
/// candidate given the parent's placement.
///
/// # Errors
///
/// As for [`sample_realisation`].
pub fn max_probability_realisation<P, D>(inputs: &RealisationInputs<'_, P, D>) -> Result<Realisation>
where
    P: DupLossProbs + ?Sized,
    D: RateDensity + ?Sized,
{
    inputs.realise(|weights| {
        let mut best = 0;
        let mut max = f64::MIN;
        for (i, &w) in weights.iter().enumerate() {
            if w > max {
                max = w;
                best = i;
            }
        }
        best
    })
}

/// One dated embedding of the guest tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Realisation {
    tree: BinaryTree,
    names: NamesMap,
    placements: Vec<DiscretePoint>,
    times: Vec<f64>,
    arc_times: Vec<f64>,
    types: Vec<VertexType>,
    switches: Option<Vec<f64>>,
}

impl Realisation {
    pub fn tree(&self) -> &BinaryTree {
        &self.tree
    }

    pub fn placement(&self, v: VertexId) -> DiscretePoint {
        self.placements[v]
    }

    pub fn placements(&self) -> &[DiscretePoint] {
        &self.placements
    }

    /// Absolute time of `v`.
    pub fn time(&self, v: VertexId) -> f64 {
        self.times[v]
    }

    /// Time from the parent's placement (the host top for the root) down to `v`.
    pub fn arc_time(&self, v: VertexId) -> f64 {
        self.arc_times[v]
    }

    pub fn vertex_type(&self, v: VertexId) -> VertexType {
        self.types[v]
    }

    pub fn is_duplication(&self, v: VertexId) -> bool {
        self.types[v] == VertexType::Duplication
    }
}

impl fmt::Display for Realisation {
    /// Newick with arc times as lengths and a
    /// `[&&PRIME VERTEXTYPE=.. DISCPT=(a,s)]` comment per vertex, plus
    /// `PGSWITCH=..` on vertices carrying a pseudogenization switch.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nw = write_annotated(&self.tree, |v| {
            let mut label = format!(
                "{}:{}[&&PRIME VERTEXTYPE={} DISCPT={}",
                self.names.get(v).unwrap_or_default(),
                format_length(self.arc_times[v]),
                self.types[v].name(),
                self.placements[v]
            );
            if let Some(sw) = self.switches.as_ref() {
                if sw[v] != NO_SWITCH {
                    label.push_str(" PGSWITCH=");
                    label.push_str(&format_length(sw[v]));
                }
            }
            label.push(']');
            label
        });
        f.write_str(&nw)
    }
}

/// Writes realisation samples as `RealisationID<TAB>Subsample<TAB>Realisation`
/// lines after a one-line host-tree header.
#[derive(Debug)]
pub struct RealisationSampler<W: Write> {
    out: W,
    per_sample: usize,
}

impl RealisationSampler<BufWriter<File>> {
    /// Create (truncating) the output file at `path`.
    pub fn create(path: impl AsRef<Path>, disc: &ArcDiscretiser, per_sample: usize) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), disc, per_sample)
    }
}

impl<W: Write> RealisationSampler<W> {
    /// Write the header to `out`. The column line is only written when
    /// `per_sample > 0`.
    pub fn new(mut out: W, disc: &ArcDiscretiser, per_sample: usize) -> Result<Self> {
        writeln!(out, "# Host tree: {}", disc.summary())?;
        if per_sample > 0 {
            writeln!(out, "RealisationID\tSubsample\tRealisation")?;
        }
        Ok(Self { out, per_sample })
    }

    /// Realisations drawn per call to [`write_samples`](Self::write_samples).
    pub fn per_sample(&self) -> usize {
        self.per_sample
    }

    /// Draw and write `per_sample` realisations tagged with `id`.
    #[instrument(level = "debug", skip_all, fields(id = id))]
    pub fn write_samples<P, D>(
        &mut self,
        id: u64,
        inputs: &RealisationInputs<'_, P, D>,
        rng: &mut dyn RngCore,
    ) -> Result<()>
    where
        P: DupLossProbs + ?Sized,
        D: RateDensity + ?Sized,
    {
        for i in 0..self.per_sample {
            let real = info_span!("realisation", subsample = i)
                .in_scope(|| sample_realisation(inputs, &mut *rng))?;
            writeln!(self.out, "{}\t{}\t{}", id, i, real)?;
        }
        debug!(count = self.per_sample, "realisations written");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn close(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
