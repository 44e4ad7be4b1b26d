//! Geometric measures for simplicial elements.

mod element;

pub use element::{metric_length, ElementGeometry};
