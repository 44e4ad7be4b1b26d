//! Halo reconciliation after a refinement pass.
//!
//! New midpoints on shared edges exist on every partition holding the
//! edge, so ownership and the exchange lists must be agreed without
//! communication: the owner is the smaller of the endpoint owners, and
//! both sides append their exchange-list additions ordered by the gnn
//! edge key, which is identical on every rank. Children whose vertices
//! all belong to other ranks are erased; they exist in full on their
//! owners.

use crate::error::RefineError;
use crate::mesh::SimplexMesh;
use crate::refine::edge_table::DirectedEdge;
use crate::refine::numbering::GlobalNumbering;
use crate::refine::VertexBuffer;
use std::collections::BTreeSet;

/// Attribute owners to the minted midpoints, erase children foreign to
/// this rank, and amend the send/recv exchange lists.
pub(crate) fn reconcile(
    mesh: &mut SimplexMesh,
    numbering: &mut GlobalNumbering,
    minted: &[VertexBuffer],
    orig_nnodes: usize,
    orig_nelements: usize,
    rank: i32,
    nranks: usize,
) -> Result<(), RefineError> {
    // Merge the per-thread mint records into an id-keyed lookup and
    // attribute each midpoint to the smaller endpoint owner.
    let mut lut: hashbrown::HashMap<i32, DirectedEdge> = hashbrown::HashMap::new();
    for buf in minted {
        for edge in &buf.edges {
            let a = numbering.lnn(edge.first).expect("minted endpoint is local");
            let b = numbering
                .lnn(edge.second)
                .expect("minted endpoint is local");
            let owner = numbering.owner(a).min(numbering.owner(b));
            numbering.set_owner(edge.id, owner);
            let previous = lut.insert(edge.id, *edge);
            debug_assert!(previous.is_none());
        }
    }

    let mut send_additional: Vec<BTreeSet<DirectedEdge>> = vec![BTreeSet::new(); nranks];
    let mut recv_additional: Vec<BTreeSet<DirectedEdge>> = vec![BTreeSet::new(); nranks];

    for e in orig_nelements..mesh.num_elements() {
        let n = mesh.element(e).to_vec();
        if n[0] < 0 {
            continue;
        }
        let mut touching = BTreeSet::new();
        for &v in &n {
            let owner = numbering.owner(v);
            if owner < 0 {
                return Err(RefineError::MissingOwner(v));
            }
            touching.insert(owner);
        }

        // A child with no local vertex lives entirely on other ranks.
        if !touching.contains(&rank) {
            mesh.erase_element(e);
            continue;
        }
        if touching.len() == 1 {
            continue;
        }

        // The child straddles a halo: route each of its new vertices.
        for &v in &n {
            if (v as usize) < orig_nnodes {
                continue;
            }
            let record = lut[&v];
            if numbering.owner(v) == rank {
                for &p in &touching {
                    if p != rank {
                        send_additional[p as usize].insert(record);
                    }
                }
            } else {
                recv_additional[numbering.owner(v) as usize].insert(record);
            }
        }
    }

    for (p, set) in send_additional.iter().enumerate() {
        for edge in set {
            mesh.push_send(p, edge.id);
        }
    }
    for (p, set) in recv_additional.iter().enumerate() {
        for edge in set {
            mesh.push_recv(p, edge.id);
        }
    }
    Ok(())
}
