//! Split-edge bookkeeping shared by every refinement phase.
//!
//! [`RefinedEdgeTable`] keeps one slot per directed adjacency entry: row
//! `i` is aligned with the neighbour list of vertex `i`, and the slot for
//! neighbour position `k` describes the state of edge
//! `(i, NNList(i)[k])`. Only the canonical direction (lesser global
//! number first) is ever populated, so each physical edge has exactly one
//! authoritative slot.
//!
//! Slots are `AtomicI64`s holding an encoded [`EdgeMark`]. Marking an edge
//! during the closure loop is a compare-and-swap from `Unsplit` to
//! `Marked`; concurrent writers race benignly and exactly one of them
//! observes the transition, which gives the closure loop an exact count of
//! new marks. The refinement phases are separated by fork-join barriers,
//! so relaxed ordering suffices for every access.

use crate::error::RefineError;
use crate::invariants::DebugInvariants;
use rayon::prelude::*;
use std::sync::atomic::{AtomicI64, Ordering};

const UNSPLIT: i64 = -1;
const MARKED: i64 = -2;
const PENDING_BIT: i64 = 1 << 62;

/// State of one (canonical) edge slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeMark {
    /// The edge is not selected for refinement.
    Unsplit,
    /// Selected by the closure loop; midpoint not yet minted.
    Marked,
    /// Midpoint minted into thread `tid`'s buffer at position `slot`;
    /// global position not yet known.
    Pending {
        /// Position within the minting thread's buffer.
        slot: u32,
        /// Logical id of the minting thread.
        tid: u32,
    },
    /// Midpoint installed in the mesh under this local vertex id.
    Vertex(i32),
}

impl EdgeMark {
    /// Whether the edge participates in refinement (marked, pending, or minted).
    #[inline]
    pub fn is_split(self) -> bool {
        !matches!(self, EdgeMark::Unsplit)
    }

    /// The installed midpoint id, if this edge has one.
    #[inline]
    pub fn vertex(self) -> Option<i32> {
        match self {
            EdgeMark::Vertex(id) => Some(id),
            _ => None,
        }
    }

    fn encode(self) -> i64 {
        match self {
            EdgeMark::Unsplit => UNSPLIT,
            EdgeMark::Marked => MARKED,
            EdgeMark::Pending { slot, tid } => {
                PENDING_BIT | ((tid as i64) << 32) | slot as i64
            }
            EdgeMark::Vertex(id) => id as i64,
        }
    }

    fn decode(raw: i64) -> Self {
        match raw {
            UNSPLIT => EdgeMark::Unsplit,
            MARKED => EdgeMark::Marked,
            _ if raw & PENDING_BIT != 0 => EdgeMark::Pending {
                slot: (raw & 0xffff_ffff) as u32,
                tid: ((raw >> 32) & 0x3fff_ffff) as u32,
            },
            _ => EdgeMark::Vertex(raw as i32),
        }
    }
}

/// A refined edge keyed by its gnn-ordered endpoints, plus the local id of
/// the midpoint once installed.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct DirectedEdge {
    /// Lesser global number of the two endpoints.
    pub first: i32,
    /// Greater global number of the two endpoints.
    pub second: i32,
    /// Local id of the minted midpoint; `-1` until the append phase runs.
    pub id: i32,
}

impl DirectedEdge {
    /// Build the canonical record for the edge joining global numbers
    /// `g0` and `g1`.
    #[inline]
    pub fn new(g0: i32, g1: i32) -> Self {
        debug_assert_ne!(g0, g1);
        Self {
            first: g0.min(g1),
            second: g0.max(g1),
            id: -1,
        }
    }
}

/// Per-vertex table of split-edge slots, aligned with the neighbour lists.
pub struct RefinedEdgeTable {
    rows: Vec<Vec<AtomicI64>>,
}

impl RefinedEdgeTable {
    /// Pre-allocate one slot per adjacency entry so concurrent writers of
    /// different rows never race on resizing.
    pub fn for_adjacency(nnlist: &[Vec<i32>]) -> Self {
        let rows = nnlist
            .iter()
            .map(|nn| (0..nn.len()).map(|_| AtomicI64::new(UNSPLIT)).collect())
            .collect();
        Self { rows }
    }

    /// Number of vertex rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of slots in `row` (the vertex's neighbour count).
    #[inline]
    pub fn row_len(&self, row: usize) -> usize {
        self.rows[row].len()
    }

    /// Read the state of the slot at `(row, pos)`.
    #[inline]
    pub fn get(&self, row: usize, pos: usize) -> EdgeMark {
        EdgeMark::decode(self.rows[row][pos].load(Ordering::Relaxed))
    }

    /// Mark the slot for minting. Returns true iff this call performed the
    /// `Unsplit` → `Marked` transition; an already marked, pending, or
    /// minted slot is left untouched.
    #[inline]
    pub fn mark(&self, row: usize, pos: usize) -> bool {
        self.rows[row][pos]
            .compare_exchange(UNSPLIT, MARKED, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Record that thread `tid` minted the midpoint at buffer position `slot`.
    #[inline]
    pub fn set_pending(&self, row: usize, pos: usize, slot: u32, tid: u32) {
        self.rows[row][pos].store(
            EdgeMark::Pending { slot, tid }.encode(),
            Ordering::Relaxed,
        );
    }

    /// Rewrite every pending slot to its absolute local vertex id, given
    /// the append offset of each thread's buffer.
    pub fn resolve(&mut self, thread_offsets: &[usize]) {
        self.rows.par_iter_mut().for_each(|row| {
            for slot in row.iter_mut() {
                let raw = *slot.get_mut();
                if let EdgeMark::Pending { slot: s, tid } = EdgeMark::decode(raw) {
                    let id = (thread_offsets[tid as usize] + s as usize) as i32;
                    *slot.get_mut() = EdgeMark::Vertex(id).encode();
                }
            }
        });
    }
}

impl DebugInvariants for RefinedEdgeTable {
    fn debug_assert_invariants(&self) {
        crate::refine_invariants!(self.validate_invariants(), "refined-edge table");
    }

    /// After the append phase every populated slot must hold an installed
    /// vertex id.
    fn validate_invariants(&self) -> Result<(), RefineError> {
        for (row, slots) in self.rows.iter().enumerate() {
            for (pos, slot) in slots.iter().enumerate() {
                match EdgeMark::decode(slot.load(Ordering::Relaxed)) {
                    EdgeMark::Unsplit | EdgeMark::Vertex(_) => {}
                    EdgeMark::Marked | EdgeMark::Pending { .. } => {
                        return Err(RefineError::UnresolvedEdge { row, pos });
                    }
                }
            }
        }
        Ok(())
    }
}
