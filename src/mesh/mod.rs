//! Simplicial mesh container with flat storage and halo exchange lists.
//!
//! `SimplexMesh` is the adjacency service the refinement driver operates
//! on: vertex coordinates and metric tensors in flat arrays, the
//! element-node list with a `-1` erase sentinel in slot 0, vertex-vertex
//! and vertex-element incidence lists, and per-rank send/recv exchange
//! lists for multi-partition meshes. Erased elements keep their storage
//! slot and never allocate new ids.
//!
//! The container performs no refinement itself; it exposes the reads used
//! during marking and template application, the single-writer resize and
//! disjoint-slice append used by the installation phases, and the halo
//! exchange used to synchronise per-vertex payloads across partitions.

use crate::comm::{CommTag, Communicator, Wait};
use crate::error::RefineError;
use crate::geometry::metric_length;
use crate::refine::edge_table::{EdgeMark, RefinedEdgeTable};
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Unstructured simplicial mesh in two or three dimensions.
#[derive(Debug)]
pub struct SimplexMesh {
    dim: usize,
    nloc: usize,
    coords: Vec<f64>,
    metric: Vec<f64>,
    enlist: Vec<i32>,
    nnlist: Vec<Vec<i32>>,
    nelist: Vec<Vec<usize>>,
    send: Vec<Vec<i32>>,
    recv: Vec<Vec<i32>>,
    send_halo: BTreeSet<i32>,
    recv_halo: BTreeSet<i32>,
}

impl SimplexMesh {
    /// Build a triangle mesh from flat coordinate, metric, and
    /// element-node storage.
    pub fn new_2d(
        coords: Vec<f64>,
        metric: Vec<f64>,
        enlist: Vec<i32>,
    ) -> Result<Self, RefineError> {
        Self::new(2, coords, metric, enlist)
    }

    /// Build a tetrahedral mesh from flat coordinate, metric, and
    /// element-node storage.
    pub fn new_3d(
        coords: Vec<f64>,
        metric: Vec<f64>,
        enlist: Vec<i32>,
    ) -> Result<Self, RefineError> {
        Self::new(3, coords, metric, enlist)
    }

    fn new(
        dim: usize,
        coords: Vec<f64>,
        metric: Vec<f64>,
        enlist: Vec<i32>,
    ) -> Result<Self, RefineError> {
        if dim != 2 && dim != 3 {
            return Err(RefineError::UnsupportedDimension(dim));
        }
        let nloc = dim + 1;
        if coords.len() % dim != 0 {
            return Err(RefineError::StorageSizeMismatch {
                what: "coordinate storage",
                len: coords.len(),
                stride: dim,
            });
        }
        let nnodes = coords.len() / dim;
        if metric.len() != dim * dim * nnodes {
            return Err(RefineError::StorageSizeMismatch {
                what: "metric storage",
                len: metric.len(),
                stride: dim * dim,
            });
        }
        if enlist.len() % nloc != 0 {
            return Err(RefineError::StorageSizeMismatch {
                what: "element-node storage",
                len: enlist.len(),
                stride: nloc,
            });
        }
        for (e, elem) in enlist.chunks_exact(nloc).enumerate() {
            if elem[0] < 0 {
                continue;
            }
            for &v in elem {
                if v < 0 || v as usize >= nnodes {
                    return Err(RefineError::VertexOutOfRange {
                        element: e,
                        vertex: v,
                        nnodes,
                    });
                }
            }
        }
        let mut mesh = Self {
            dim,
            nloc,
            coords,
            metric,
            enlist,
            nnlist: Vec::new(),
            nelist: Vec::new(),
            send: Vec::new(),
            recv: Vec::new(),
            send_halo: BTreeSet::new(),
            recv_halo: BTreeSet::new(),
        };
        mesh.create_adjacency();
        Ok(mesh)
    }

    /// Install the per-rank exchange lists of a partitioned mesh. `send[p]`
    /// holds owned vertices whose values rank `p` reads; `recv[p]` holds
    /// local copies owned by rank `p`. The two lists of a rank pair must
    /// be ordered consistently on both sides.
    pub fn with_halo(mut self, send: Vec<Vec<i32>>, recv: Vec<Vec<i32>>) -> Self {
        self.send_halo = send.iter().flatten().copied().collect();
        self.recv_halo = recv.iter().flatten().copied().collect();
        self.send = send;
        self.recv = recv;
        self
    }

    /// Spatial dimension (2 or 3).
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Vertices per element (`dim + 1`).
    #[inline]
    pub fn nloc(&self) -> usize {
        self.nloc
    }

    /// Number of vertices, including halo copies.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.coords.len() / self.dim
    }

    /// Number of element slots, including erased ones.
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.enlist.len() / self.nloc
    }

    /// Connectivity of element `e`; `[0] < 0` means erased.
    #[inline]
    pub fn element(&self, e: usize) -> &[i32] {
        &self.enlist[e * self.nloc..(e + 1) * self.nloc]
    }

    /// Coordinates of vertex `v`.
    #[inline]
    pub fn coords_of(&self, v: i32) -> &[f64] {
        let v = v as usize;
        &self.coords[v * self.dim..(v + 1) * self.dim]
    }

    /// Row-major metric tensor of vertex `v`.
    #[inline]
    pub fn metric_of(&self, v: i32) -> &[f64] {
        let stride = self.dim * self.dim;
        let v = v as usize;
        &self.metric[v * stride..(v + 1) * stride]
    }

    /// Sorted vertex neighbour lists; row `i` is the column axis of the
    /// refined-edge table.
    #[inline]
    pub fn nnlist(&self) -> &[Vec<i32>] {
        &self.nnlist
    }

    /// Elements incident to vertex `v`.
    #[inline]
    pub fn elements_around(&self, v: i32) -> &[usize] {
        &self.nelist[v as usize]
    }

    /// Position of `v` in the neighbour list of `u`, if adjacent.
    #[inline]
    pub fn neighbour_position(&self, u: i32, v: i32) -> Option<usize> {
        self.nnlist[u as usize].binary_search(&v).ok()
    }

    /// Metric-space length of edge `(u, v)` under the averaged endpoint
    /// tensors. Mathematically symmetric, but not guaranteed bit-exact
    /// under argument swap; callers order arguments by global number when
    /// partitions must agree.
    pub fn calc_edge_length(&self, u: i32, v: i32) -> f64 {
        let stride = self.dim * self.dim;
        let m0 = self.metric_of(u);
        let m1 = self.metric_of(v);
        let mut m = [0.0f64; 9];
        for i in 0..stride {
            m[i] = 0.5 * (m0[i] + m1[i]);
        }
        metric_length(self.coords_of(u), self.coords_of(v), &m[..stride])
    }

    /// State of edge `(u, v)` in the refined-edge table, read through the
    /// canonical (lesser-gnn-first) direction.
    pub fn edge_mark(
        &self,
        u: i32,
        v: i32,
        table: &RefinedEdgeTable,
        lnn2gnn: &[i32],
    ) -> EdgeMark {
        let (a, b) = if lnn2gnn[u as usize] < lnn2gnn[v as usize] {
            (u, v)
        } else {
            (v, u)
        };
        match self.neighbour_position(a, b) {
            Some(pos) => table.get(a as usize, pos),
            None => EdgeMark::Unsplit,
        }
    }

    /// Local id of the midpoint of edge `(u, v)`, or `-1` if the edge has
    /// no installed midpoint.
    pub fn get_new_vertex(
        &self,
        u: i32,
        v: i32,
        table: &RefinedEdgeTable,
        lnn2gnn: &[i32],
    ) -> i32 {
        self.edge_mark(u, v, table, lnn2gnn).vertex().unwrap_or(-1)
    }

    /// Erase element `e` by writing the sentinel into its first slot. The
    /// slot is kept; ids are never reused.
    #[inline]
    pub fn erase_element(&mut self, e: usize) {
        self.enlist[e * self.nloc] = -1;
    }

    /// Rebuild the vertex-vertex and vertex-element incidence lists from
    /// the element-node list. Erased elements contribute nothing.
    pub fn create_adjacency(&mut self) {
        let nnodes = self.num_nodes();
        let mut nnlist = vec![Vec::new(); nnodes];
        let mut nelist = vec![Vec::new(); nnodes];
        for (e, elem) in self.enlist.chunks_exact(self.nloc).enumerate() {
            if elem[0] < 0 {
                continue;
            }
            for &a in elem {
                nelist[a as usize].push(e);
                for &b in elem {
                    if b != a {
                        nnlist[a as usize].push(b);
                    }
                }
            }
        }
        for nn in &mut nnlist {
            nn.sort_unstable();
            nn.dedup();
        }
        self.nnlist = nnlist;
        self.nelist = nelist;
    }

    /// Check that every element edge appears in both endpoints' neighbour
    /// lists.
    pub fn validate_adjacency(&self) -> Result<(), RefineError> {
        for elem in self.enlist.chunks_exact(self.nloc) {
            if elem[0] < 0 {
                continue;
            }
            for (j, &a) in elem.iter().enumerate() {
                for &b in &elem[j + 1..] {
                    if self.neighbour_position(a, b).is_none()
                        || self.neighbour_position(b, a).is_none()
                    {
                        return Err(RefineError::AdjacencyMismatch(a, b));
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-rank recv exchange lists.
    #[inline]
    pub fn recv_lists(&self) -> &[Vec<i32>] {
        &self.recv
    }

    /// Per-rank send exchange lists.
    #[inline]
    pub fn send_lists(&self) -> &[Vec<i32>] {
        &self.send
    }

    /// Deduplicated set of all sent vertices.
    #[inline]
    pub fn send_halo(&self) -> &BTreeSet<i32> {
        &self.send_halo
    }

    /// Deduplicated set of all received vertices.
    #[inline]
    pub fn recv_halo(&self) -> &BTreeSet<i32> {
        &self.recv_halo
    }

    /// Synchronise `block` values per halo vertex across partitions:
    /// owned values are gathered from `send[p]` positions and scattered
    /// into the peers' `recv` positions.
    pub fn halo_update<C: Communicator, T: bytemuck::Pod>(
        &self,
        comm: &C,
        tag: CommTag,
        buf: &mut [T],
        block: usize,
    ) -> Result<(), RefineError> {
        if comm.size() <= 1 {
            return Ok(());
        }
        let mut pending = Vec::new();
        for (p, rv) in self.recv.iter().enumerate() {
            if rv.is_empty() {
                continue;
            }
            let mut scratch = vec![0u8; rv.len() * block * std::mem::size_of::<T>()];
            pending.push((p, comm.irecv(p, tag.as_u16(), &mut scratch)));
        }
        for (p, sv) in self.send.iter().enumerate() {
            if sv.is_empty() {
                continue;
            }
            let mut packed = Vec::with_capacity(sv.len() * block);
            for &v in sv {
                let v = v as usize;
                packed.extend_from_slice(&buf[v * block..(v + 1) * block]);
            }
            comm.isend(p, tag.as_u16(), bytemuck::cast_slice(&packed));
        }
        for (p, h) in pending {
            let data = h.wait().ok_or(RefineError::CommFailure {
                rank: p,
                phase: "halo update",
            })?;
            let vals: Vec<T> = bytemuck::pod_collect_to_vec(&data);
            for (k, &v) in self.recv[p].iter().enumerate() {
                let v = v as usize;
                buf[v * block..(v + 1) * block].copy_from_slice(&vals[k * block..(k + 1) * block]);
            }
        }
        Ok(())
    }

    // --- append plumbing used by the refinement driver ---

    /// Grow the exchange lists to cover `nranks` peers.
    pub(crate) fn ensure_rank_capacity(&mut self, nranks: usize) {
        if self.send.len() < nranks {
            self.send.resize(nranks, Vec::new());
        }
        if self.recv.len() < nranks {
            self.recv.resize(nranks, Vec::new());
        }
    }

    /// Single-writer resize of the per-vertex storage to `new_nnodes`.
    pub(crate) fn resize_vertex_storage(&mut self, new_nnodes: usize) {
        self.coords.resize(self.dim * new_nnodes, 0.0);
        self.metric.resize(self.dim * self.dim * new_nnodes, 0.0);
        self.nnlist.resize(new_nnodes, Vec::new());
        self.nelist.resize(new_nnodes, Vec::new());
    }

    /// Copy each thread's minted coordinates and metrics into its reserved
    /// slice of the freshly resized storage.
    pub(crate) fn scatter_new_vertices(
        &mut self,
        orig_nnodes: usize,
        coord_parts: &[Vec<f64>],
        metric_parts: &[Vec<f64>],
    ) {
        scatter_parts(&mut self.coords[self.dim * orig_nnodes..], coord_parts);
        scatter_parts(
            &mut self.metric[self.dim * self.dim * orig_nnodes..],
            metric_parts,
        );
    }

    /// Append each thread's child connectivity to the element-node list:
    /// one resize, then disjoint slice copies.
    pub(crate) fn append_elements(&mut self, parts: &[Vec<i32>]) {
        let orig = self.enlist.len();
        let added: usize = parts.iter().map(Vec::len).sum();
        self.enlist.resize(orig + added, 0);
        scatter_parts(&mut self.enlist[orig..], parts);
    }

    /// Mutable connectivity from element `from` onward, paired with the
    /// coordinate storage (for the orientation pass).
    pub(crate) fn connectivity_tail_and_coords(
        &mut self,
        from: usize,
    ) -> (&mut [i32], &[f64]) {
        let start = from * self.nloc;
        (&mut self.enlist[start..], &self.coords)
    }

    /// Record that `id` is sent to rank `p`.
    pub(crate) fn push_send(&mut self, p: usize, id: i32) {
        self.send[p].push(id);
        self.send_halo.insert(id);
    }

    /// Record that `id` is received from its owner `p`.
    pub(crate) fn push_recv(&mut self, p: usize, id: i32) {
        self.recv[p].push(id);
        self.recv_halo.insert(id);
    }
}

/// Partition `tail` into consecutive slices sized like `parts` and copy
/// each part in parallel. The split precedes the copies, so writers touch
/// disjoint memory.
fn scatter_parts<T: Copy + Send + Sync>(tail: &mut [T], parts: &[Vec<T>]) {
    let mut slices = Vec::with_capacity(parts.len());
    let mut rest = tail;
    for part in parts {
        let (head, remainder) = std::mem::take(&mut rest).split_at_mut(part.len());
        slices.push(head);
        rest = remainder;
    }
    slices
        .into_par_iter()
        .zip(parts.par_iter())
        .for_each(|(dst, src)| dst.copy_from_slice(src));
}
