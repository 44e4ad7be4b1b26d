//! Global vertex numbering and node ownership across partitions.
//!
//! Edge decisions must be identical on every partition holding an edge,
//! so a total order over vertices is established first: each rank takes an
//! exclusive-scan offset over local vertex counts, numbers its vertices
//! contiguously from it, then overwrites halo copies with the owners'
//! numbers. The locally assigned numbers of halo slots become unused gaps;
//! uniqueness across ranks is what matters, density is not.
//!
//! Ownership starts as "everything local", then every vertex listed in a
//! recv exchange list is attributed to its sending rank. Midpoints minted
//! during refinement enter with no owner and are attributed during halo
//! reconciliation.

use crate::comm::collectives::exclusive_scan_sum;
use crate::comm::{Communicator, RefineCommTags};
use crate::error::RefineError;
use crate::mesh::SimplexMesh;
use rayon::prelude::*;

/// Bidirectional local/global vertex numbering plus per-vertex owner ranks.
pub struct GlobalNumbering {
    lnn2gnn: Vec<i32>,
    gnn2lnn: hashbrown::HashMap<i32, i32>,
    node_owner: Vec<i32>,
}

impl GlobalNumbering {
    /// Number the mesh's vertices across all partitions and record their
    /// owners. Fails if a halo vertex is left unnumbered by the exchange.
    pub fn establish<C: Communicator>(
        mesh: &SimplexMesh,
        comm: &C,
        tags: &RefineCommTags,
    ) -> Result<Self, RefineError> {
        let nnodes = mesh.num_nodes();
        let offset = exclusive_scan_sum(comm, nnodes as u64, tags.scan)? as usize;

        let mut lnn2gnn: Vec<i32> = (0..nnodes)
            .into_par_iter()
            .map(|i| (offset + i) as i32)
            .collect();

        if comm.size() > 1 {
            for rv in mesh.recv_lists() {
                for &v in rv {
                    lnn2gnn[v as usize] = -1;
                }
            }
            mesh.halo_update(comm, tags.halo, &mut lnn2gnn, 1)?;
            for rv in mesh.recv_lists() {
                for &v in rv {
                    if lnn2gnn[v as usize] < 0 {
                        return Err(RefineError::UnnumberedHaloVertex(v));
                    }
                }
            }
        }

        let mut gnn2lnn = hashbrown::HashMap::with_capacity(nnodes);
        for (i, &g) in lnn2gnn.iter().enumerate() {
            gnn2lnn.insert(g, i as i32);
        }

        let mut node_owner = vec![comm.rank() as i32; nnodes];
        for (p, rv) in mesh.recv_lists().iter().enumerate() {
            for &v in rv {
                node_owner[v as usize] = p as i32;
            }
        }

        Ok(Self {
            lnn2gnn,
            gnn2lnn,
            node_owner,
        })
    }

    /// Global number of local vertex `v`, or `-1` for vertices minted
    /// after numbering (midpoints carry no global number within a pass and
    /// order below every numbered vertex).
    #[inline]
    pub fn gnn(&self, v: i32) -> i32 {
        self.lnn2gnn.get(v as usize).copied().unwrap_or(-1)
    }

    /// Local vertex holding global number `gnn`, if present on this rank.
    #[inline]
    pub fn lnn(&self, gnn: i32) -> Option<i32> {
        self.gnn2lnn.get(&gnn).copied()
    }

    /// The full local-to-global map, sized for the pre-refinement mesh.
    #[inline]
    pub fn lnn2gnn(&self) -> &[i32] {
        &self.lnn2gnn
    }

    /// Owner rank of vertex `v`; `-1` for a new vertex not yet attributed.
    #[inline]
    pub fn owner(&self, v: i32) -> i32 {
        self.node_owner[v as usize]
    }

    /// Attribute vertex `v` to `rank`.
    #[inline]
    pub(crate) fn set_owner(&mut self, v: i32, rank: i32) {
        self.node_owner[v as usize] = rank;
    }

    /// Extend the owner array to cover newly appended vertices, which
    /// start unattributed.
    pub(crate) fn grow_owners(&mut self, nnodes: usize) {
        self.node_owner.resize(nnodes, -1);
    }
}
