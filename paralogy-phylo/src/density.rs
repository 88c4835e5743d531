//! Densities and transition tables consumed by realisation sampling.
//!
//! - [`RateDensity`] is the substitution-rate density evaluated at
//!   `length / elapsed time`. [`GammaRateDensity`] is the usual choice.
//! - [`DupLossProbs`] gives the one-to-one lineage probability `P11(x, y)`
//!   between two discretisation points, `x` above `y`. [`P11Table`] stores
//!   it densely over every point pair of an [`ArcDiscretiser`].
//!
//! Plain closures implement both traits, which keeps tests and callers that
//! already have the numbers in some other form free of adapters.

use core::f64::consts::PI;

use paralogy_core::{ParalogyError, Result};

use crate::discretiser::{ArcDiscretiser, DiscretePoint};

/// A density over positive rates.
pub trait RateDensity {
    fn pdf(&self, rate: f64) -> f64;
}

impl<F> RateDensity for F
where
    F: Fn(f64) -> f64,
{
    fn pdf(&self, rate: f64) -> f64 {
        self(rate)
    }
}

/// Gamma density parameterised by mean and coefficient of variation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GammaRateDensity {
    mean: f64,
    cv: f64,
    shape: f64,
    scale: f64,
    ln_norm: f64,
}

impl GammaRateDensity {
    /// # Errors
    ///
    /// Returns an error unless both `mean` and `cv` are positive and finite.
    pub fn new(mean: f64, cv: f64) -> Result<Self> {
        if !(mean.is_finite() && mean > 0.0) {
            return Err(ParalogyError::InvalidInput(format!(
                "gamma mean must be positive, got {}",
                mean
            )));
        }
        if !(cv.is_finite() && cv > 0.0) {
            return Err(ParalogyError::InvalidInput(format!(
                "gamma CV must be positive, got {}",
                cv
            )));
        }
        let shape = 1.0 / (cv * cv);
        let scale = mean * cv * cv;
        Ok(Self {
            mean,
            cv,
            shape,
            scale,
            ln_norm: -ln_gamma(shape) - shape * scale.ln(),
        })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn cv(&self) -> f64 {
        self.cv
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Log density; `-inf` outside the support.
    pub fn ln_pdf(&self, x: f64) -> f64 {
        if x <= 0.0 || !x.is_finite() {
            return f64::NEG_INFINITY;
        }
        self.ln_norm + (self.shape - 1.0) * x.ln() - x / self.scale
    }
}

impl RateDensity for GammaRateDensity {
    fn pdf(&self, rate: f64) -> f64 {
        self.ln_pdf(rate).exp()
    }
}

/// Lanczos approximation (g = 7) of `ln Γ(x)`.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let t = x + 7.5;
        let ag = COEFFS
            .iter()
            .enumerate()
            .fold(0.99999999999980993_f64, |acc, (i, &c)| acc + c / (x + i as f64 + 1.0));
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// Probability that a single lineage at point `x` has exactly one
/// descendant lineage at the lower point `y`.
pub trait DupLossProbs {
    fn p11(&self, x: DiscretePoint, y: DiscretePoint) -> f64;
}

impl<F> DupLossProbs for F
where
    F: Fn(DiscretePoint, DiscretePoint) -> f64,
{
    fn p11(&self, x: DiscretePoint, y: DiscretePoint) -> f64 {
        self(x, y)
    }
}

/// Dense `P11` values over all point pairs of one discretisation.
///
/// Unset pairs and points outside the discretisation read as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct P11Table {
    offsets: Vec<usize>,
    counts: Vec<usize>,
    size: usize,
    values: Vec<f64>,
}

impl P11Table {
    pub fn new(disc: &ArcDiscretiser) -> Self {
        let n = disc.host().vertex_count();
        let counts: Vec<usize> = (0..n).map(|x| disc.point_count(x)).collect();
        let mut offsets = Vec::with_capacity(n);
        let mut size = 0;
        for &c in &counts {
            offsets.push(size);
            size += c;
        }
        Self {
            offsets,
            counts,
            size,
            values: vec![0.0; size * size],
        }
    }

    /// Fill every pair with `f(x, y)`.
    pub fn from_fn<F>(disc: &ArcDiscretiser, f: F) -> Self
    where
        F: Fn(DiscretePoint, DiscretePoint) -> f64,
    {
        let mut table = Self::new(disc);
        let points = table.points();
        for (i, &x) in points.iter().enumerate() {
            for (j, &y) in points.iter().enumerate() {
                table.values[i * table.size + j] = f(x, y);
            }
        }
        table
    }

    /// Every point of the discretisation, arc by arc.
    pub fn points(&self) -> Vec<DiscretePoint> {
        self.counts
            .iter()
            .enumerate()
            .flat_map(|(arc, &c)| (0..c).map(move |s| DiscretePoint::new(arc, s)))
            .collect()
    }

    fn index(&self, p: DiscretePoint) -> Option<usize> {
        let c = *self.counts.get(p.arc)?;
        (p.slice < c).then(|| self.offsets[p.arc] + p.slice)
    }

    /// # Errors
    ///
    /// Returns an error if either point lies outside the discretisation.
    pub fn set(&mut self, x: DiscretePoint, y: DiscretePoint, p: f64) -> Result<()> {
        match (self.index(x), self.index(y)) {
            (Some(i), Some(j)) => {
                self.values[i * self.size + j] = p;
                Ok(())
            }
            _ => Err(ParalogyError::InvalidInput(format!(
                "point pair {} {} outside the discretisation",
                x, y
            ))),
        }
    }

    pub fn get(&self, x: DiscretePoint, y: DiscretePoint) -> f64 {
        match (self.index(x), self.index(y)) {
            (Some(i), Some(j)) => self.values[i * self.size + j],
            _ => 0.0,
        }
    }
}

impl DupLossProbs for P11Table {
    fn p11(&self, x: DiscretePoint, y: DiscretePoint) -> f64 {
        self.get(x, y)
    }
}
