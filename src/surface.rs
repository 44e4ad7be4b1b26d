//! Boundary-refinement seam.
//!
//! Surface tracking is a collaborator, not part of the core: after a pass
//! the driver hands over the refined-edge table and the local-to-global
//! map verbatim, and the surface module reinterprets them for its own
//! facets. Meshes without tracked boundaries use [`NullSurface`].

use crate::error::RefineError;
use crate::refine::edge_table::RefinedEdgeTable;

/// Consumer of the refined-edge table for boundary refinement.
pub trait SurfaceRefinement {
    /// Refine the tracked boundary against the split edges of the pass
    /// that just completed. `lnn2gnn` covers the pre-refinement vertices.
    fn refine(&mut self, edges: &RefinedEdgeTable, lnn2gnn: &[i32]) -> Result<(), RefineError>;
}

/// No-op surface for meshes without tracked boundaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSurface;

impl SurfaceRefinement for NullSurface {
    fn refine(&mut self, _edges: &RefinedEdgeTable, _lnn2gnn: &[i32]) -> Result<(), RefineError> {
        Ok(())
    }
}
