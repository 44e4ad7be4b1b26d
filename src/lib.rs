//! # metric-refine
//!
//! metric-refine performs parallel anisotropic refinement of unstructured
//! simplicial meshes in two and three dimensions. Vertices carry a
//! symmetric positive-definite metric tensor; one call to
//! [`refine::Refine::refine`] splits every edge whose metric length
//! exceeds a caller threshold at its metric-weighted midpoint and retiles
//! the affected elements from a fixed template family, producing a
//! conforming, orientation-consistent mesh.
//!
//! ## Features
//! - Deterministic edge selection across partitions via a global vertex
//!   numbering (shared edges reach the same split decision everywhere)
//! - 3D edge-refinement closure so every tetrahedron matches a template
//! - Fork-join thread parallelism with thread-local minting, prefix-sum
//!   offsets, and single-writer array growth
//! - Halo reconciliation: ownership of new vertices and amended
//!   send/recv exchange lists
//! - Pluggable communication backends (serial, thread-per-rank, MPI)
//!
//! ## Usage
//! Add `metric-refine` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! metric-refine = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! A single-partition pass:
//!
//! ```rust
//! use metric_refine::prelude::*;
//!
//! # fn main() -> Result<(), metric_refine::error::RefineError> {
//! let coords = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
//! let metric = vec![
//!     1.0, 0.0, 0.0, 1.0,
//!     1.0, 0.0, 0.0, 1.0,
//!     1.0, 0.0, 0.0, 1.0,
//! ];
//! let mut mesh = SimplexMesh::new_2d(coords, metric, vec![0, 1, 2])?;
//! Refine::new(&mut mesh, &NoComm)?.refine(0.9, &mut NullSurface)?;
//! assert_eq!(mesh.num_nodes(), 6);
//! # Ok(())
//! # }
//! ```

pub mod comm;
pub mod error;
pub mod geometry;
pub mod invariants;
pub mod mesh;
pub mod refine;
pub mod surface;

/// A convenient prelude importing the most-used types.
pub mod prelude {
    pub use crate::comm::{CommTag, Communicator, NoComm, RayonComm, RefineCommTags};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::error::RefineError;
    pub use crate::geometry::ElementGeometry;
    pub use crate::mesh::SimplexMesh;
    pub use crate::refine::edge_table::{DirectedEdge, EdgeMark, RefinedEdgeTable};
    pub use crate::refine::numbering::GlobalNumbering;
    pub use crate::refine::Refine;
    pub use crate::surface::{NullSurface, SurfaceRefinement};
}
