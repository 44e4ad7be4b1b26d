//! `RefineError`: unified error type for the metric-refine public APIs.
//!
//! Precondition violations and suspend-point failures are reported through
//! this enum; violated internal invariants (programmer bugs, not runtime
//! conditions) panic instead, see [`crate::invariants`].

use thiserror::Error;

/// Unified error type for refinement operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RefineError {
    /// The caller supplied a non-positive refinement threshold.
    #[error("refinement threshold must be positive, got {0}")]
    NonPositiveThreshold(f64),
    /// Meshes must be two- or three-dimensional.
    #[error("unsupported mesh dimension {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),
    /// A flat storage buffer does not tile into per-vertex or per-element records.
    #[error("{what} has length {len}, not a multiple of {stride}")]
    StorageSizeMismatch {
        /// Name of the offending buffer.
        what: &'static str,
        /// Observed buffer length.
        len: usize,
        /// Required record stride.
        stride: usize,
    },
    /// An element references a vertex outside the coordinate storage.
    #[error("element {element} references vertex {vertex}, but the mesh has {nnodes} vertices")]
    VertexOutOfRange {
        /// Offending element index.
        element: usize,
        /// Referenced vertex id.
        vertex: i32,
        /// Number of vertices in the mesh.
        nnodes: usize,
    },
    /// Two vertices are joined by an element but missing from each other's
    /// neighbour lists.
    #[error("vertices {0} and {1} share an element but are absent from the adjacency lists")]
    AdjacencyMismatch(i32, i32),
    /// A halo vertex was left without a global number after the exchange.
    #[error("halo vertex {0} has no global number after the halo exchange")]
    UnnumberedHaloVertex(i32),
    /// A vertex appearing in a child element has no recorded owner.
    #[error("vertex {0} has no owner during halo reconciliation")]
    MissingOwner(i32),
    /// A refined-edge slot was still marked or pending after the vertex
    /// append phase.
    #[error("edge slot ({row}, {pos}) left unresolved after vertex append")]
    UnresolvedEdge {
        /// Table row (vertex) of the slot.
        row: usize,
        /// Neighbour position within the row.
        pos: usize,
    },
    /// A point-to-point exchange did not complete.
    #[error("communication with rank {rank} failed during {phase}")]
    CommFailure {
        /// Peer rank of the failed exchange.
        rank: usize,
        /// Phase in which the failure occurred.
        phase: &'static str,
    },
    /// The surface collaborator rejected the refined-edge handoff.
    #[error("surface refinement failed: {0}")]
    Surface(String),
}
