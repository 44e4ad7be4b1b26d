//! Signed element measures and metric-space edge lengths.
//!
//! Signed area/volume is measured relative to a reference orientation
//! captured from the first live element of the input mesh, so "positive"
//! means "same handedness as the input" rather than a fixed global
//! convention. The metric length of an edge is `√(eᵀ·M·e)` for a
//! symmetric positive-definite tensor `M` stored row-major.

use crate::error::RefineError;

/// Signed area/volume evaluator with a captured reference orientation.
#[derive(Clone, Copy, Debug)]
pub struct ElementGeometry {
    dim: usize,
    orientation: f64,
}

impl ElementGeometry {
    /// Evaluator for a `dim`-dimensional mesh with the default (positive)
    /// reference orientation.
    pub fn new(dim: usize) -> Result<Self, RefineError> {
        if dim != 2 && dim != 3 {
            return Err(RefineError::UnsupportedDimension(dim));
        }
        Ok(Self {
            dim,
            orientation: 1.0,
        })
    }

    /// Evaluator whose orientation is the sign of the given reference
    /// element, so that element measures positive.
    pub fn from_reference(dim: usize, vertices: &[&[f64]]) -> Result<Self, RefineError> {
        let mut geometry = Self::new(dim)?;
        let raw = geometry.signed_measure(vertices);
        if raw < 0.0 {
            geometry.orientation = -1.0;
        }
        Ok(geometry)
    }

    /// Spatial dimension this evaluator was built for.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Signed area of the triangle `(x0, x1, x2)` relative to the
    /// reference orientation.
    #[inline]
    pub fn signed_area(&self, x0: &[f64], x1: &[f64], x2: &[f64]) -> f64 {
        let a = (x1[0] - x0[0]) * (x2[1] - x0[1]) - (x2[0] - x0[0]) * (x1[1] - x0[1]);
        self.orientation * 0.5 * a
    }

    /// Signed volume of the tetrahedron `(x0, x1, x2, x3)` relative to the
    /// reference orientation.
    pub fn signed_volume(&self, x0: &[f64], x1: &[f64], x2: &[f64], x3: &[f64]) -> f64 {
        let a = sub(x1, x0);
        let b = sub(x2, x0);
        let c = sub(x3, x0);
        self.orientation * det3(a, b, c) / 6.0
    }

    /// Signed measure of a `(dim + 1)`-vertex simplex: area in 2D, volume
    /// in 3D.
    pub fn signed_measure(&self, vertices: &[&[f64]]) -> f64 {
        match self.dim {
            2 => self.signed_area(vertices[0], vertices[1], vertices[2]),
            _ => self.signed_volume(vertices[0], vertices[1], vertices[2], vertices[3]),
        }
    }
}

/// Metric-space length of the edge `x0 → x1` under the tensor `m`
/// (row-major `d×d`, `d` inferred from the coordinate slices).
pub fn metric_length(x0: &[f64], x1: &[f64], m: &[f64]) -> f64 {
    let d = x0.len();
    debug_assert_eq!(x1.len(), d);
    debug_assert_eq!(m.len(), d * d);
    let mut q = 0.0;
    for i in 0..d {
        let ei = x1[i] - x0[i];
        for j in 0..d {
            q += ei * m[i * d + j] * (x1[j] - x0[j]);
        }
    }
    q.max(0.0).sqrt()
}

#[inline]
fn sub(a: &[f64], b: &[f64]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn det3(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> f64 {
    a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
        + a[2] * (b[0] * c[1] - b[1] * c[0])
}
