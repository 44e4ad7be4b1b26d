//! One level of parallel anisotropic mesh refinement.
//!
//! Given a threshold `l_max`, the driver splits every edge whose metric
//! length exceeds it and retiles the affected elements from the template
//! family in [`templates`]. A pass runs as a sequence of fork-join
//! phases over a static worker pool:
//!
//! 1. global numbering and node ownership ([`numbering`]);
//! 2. edge marking over gnn-canonical edges, minting midpoints into
//!    thread-local buffers;
//! 3. in 3D, the closure loop: extra edges are marked until every
//!    tetrahedron matches a template, with an all-reduce termination
//!    vote per iteration;
//! 4. vertex installation: exclusive offsets over per-thread counts, a
//!    single-writer resize, then disjoint-slice copies;
//! 5. element retiling and installation through the same two-phase
//!    append, erasing parents as children are emitted;
//! 6. halo reconciliation of new-vertex ownership and exchange lists;
//! 7. orientation correction of the appended children;
//! 8. surface handoff and adjacency rebuild.
//!
//! Refinement is monotone: vertices and elements are only created, never
//! moved, and erased elements keep their slots.
//!
//! Templates follow R. Biswas and R. C. Strawn, "A new procedure for
//! dynamic adaption of three-dimensional unstructured grids", Appl.
//! Numer. Math. 13 (1994); midpoint placement follows eq. 16 of X. Li et
//! al., Comp. Methods Appl. Mech. Engrg. 194 (2005).

pub mod edge_table;
mod halo;
pub mod numbering;
mod templates;

use crate::comm::collectives::allreduce_sum;
use crate::comm::{Communicator, RefineCommTags};
use crate::error::RefineError;
use crate::geometry::{metric_length, ElementGeometry};
use crate::invariants::DebugInvariants;
use crate::mesh::SimplexMesh;
use crate::surface::SurfaceRefinement;
use edge_table::{DirectedEdge, EdgeMark, RefinedEdgeTable};
use numbering::GlobalNumbering;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::ops::Range;

/// Thread-local mint records: one directed edge plus the coordinate and
/// metric payload per midpoint, in slot order.
#[derive(Default)]
pub(crate) struct VertexBuffer {
    pub(crate) edges: Vec<DirectedEdge>,
    pub(crate) coords: Vec<f64>,
    pub(crate) metric: Vec<f64>,
}

/// Thread-local child connectivity plus the parents it replaces.
#[derive(Default)]
struct ElementBuffer {
    enlist: Vec<i32>,
    erased: Vec<usize>,
}

/// Refinement driver bound to a mesh and a communicator.
pub struct Refine<'a, C: Communicator> {
    mesh: &'a mut SimplexMesh,
    comm: &'a C,
    tags: RefineCommTags,
    geometry: ElementGeometry,
    nthreads: usize,
}

impl<'a, C: Communicator> Refine<'a, C> {
    /// Bind a driver to `mesh`, capturing the reference orientation from
    /// its first live element.
    pub fn new(mesh: &'a mut SimplexMesh, comm: &'a C) -> Result<Self, RefineError> {
        let dim = mesh.dim();
        let mut geometry = ElementGeometry::new(dim)?;
        for e in 0..mesh.num_elements() {
            let n = mesh.element(e);
            if n[0] < 0 {
                continue;
            }
            let vertices: Vec<&[f64]> = n.iter().map(|&v| mesh.coords_of(v)).collect();
            geometry = ElementGeometry::from_reference(dim, &vertices)?;
            break;
        }
        Ok(Self {
            mesh,
            comm,
            tags: RefineCommTags::default(),
            geometry,
            nthreads: rayon::current_num_threads(),
        })
    }

    /// Override the communication tags (for callers running several
    /// communicating jobs over one backend).
    pub fn with_tags(mut self, tags: RefineCommTags) -> Self {
        self.tags = tags;
        self
    }

    /// Perform one level of refinement: split every edge longer than
    /// `l_max` in metric space and retile the affected elements.
    pub fn refine<S: SurfaceRefinement>(
        &mut self,
        l_max: f64,
        surface: &mut S,
    ) -> Result<(), RefineError> {
        if !(l_max > 0.0) {
            return Err(RefineError::NonPositiveThreshold(l_max));
        }
        self.mesh.validate_adjacency()?;

        let orig_nnodes = self.mesh.num_nodes();
        let orig_nelements = self.mesh.num_elements();
        let nranks = self.comm.size();
        if nranks > 1 {
            self.mesh.ensure_rank_capacity(nranks);
        }

        let mut numbering = GlobalNumbering::establish(self.mesh, self.comm, &self.tags)?;
        let mut table = RefinedEdgeTable::for_adjacency(self.mesh.nnlist());

        let vertex_chunks = chunk_ranges(orig_nnodes, self.nthreads);
        let mut bufs = self.mark_long_edges(&table, &numbering, &vertex_chunks, l_max);

        if self.mesh.dim() == 3 {
            self.close_refinement(
                &table,
                &numbering,
                &vertex_chunks,
                orig_nelements,
                &mut bufs,
            )?;
        }

        // Install the minted vertices.
        let counts: Vec<usize> = bufs.iter().map(|b| b.edges.len()).collect();
        let offsets = exclusive_offsets(&counts, orig_nnodes);
        let new_nnodes = orig_nnodes + counts.iter().sum::<usize>();
        self.mesh.resize_vertex_storage(new_nnodes);
        let coord_parts: Vec<Vec<f64>> =
            bufs.iter_mut().map(|b| std::mem::take(&mut b.coords)).collect();
        let metric_parts: Vec<Vec<f64>> =
            bufs.iter_mut().map(|b| std::mem::take(&mut b.metric)).collect();
        self.mesh
            .scatter_new_vertices(orig_nnodes, &coord_parts, &metric_parts);
        bufs.par_iter_mut().enumerate().for_each(|(tid, buf)| {
            for (k, edge) in buf.edges.iter_mut().enumerate() {
                edge.id = (offsets[tid] + k) as i32;
            }
        });
        numbering.grow_owners(new_nnodes);
        table.resolve(&offsets);
        table.debug_assert_invariants();

        // Retile and install the elements.
        let element_chunks = chunk_ranges(orig_nelements, self.nthreads);
        let ebufs = self.refine_elements(&table, &numbering, &element_chunks);
        for ebuf in &ebufs {
            for &e in &ebuf.erased {
                self.mesh.erase_element(e);
            }
        }
        let enlist_parts: Vec<Vec<i32>> = ebufs.into_iter().map(|b| b.enlist).collect();
        self.mesh.append_elements(&enlist_parts);

        if nranks > 1 {
            halo::reconcile(
                self.mesh,
                &mut numbering,
                &bufs,
                orig_nnodes,
                orig_nelements,
                self.comm.rank() as i32,
                nranks,
            )?;
        }

        self.fix_orientation(orig_nelements);

        surface.refine(&table, numbering.lnn2gnn())?;
        self.mesh.create_adjacency();
        Ok(())
    }

    /// Select every gnn-canonical edge longer than `l_max` and mint its
    /// midpoint into the visiting thread's buffer. Rows of the table
    /// belong to the thread owning the vertex chunk, so writers never
    /// race.
    fn mark_long_edges(
        &self,
        table: &RefinedEdgeTable,
        numbering: &GlobalNumbering,
        vertex_chunks: &[Range<usize>],
        l_max: f64,
    ) -> Vec<VertexBuffer> {
        let mesh = &*self.mesh;
        vertex_chunks
            .par_iter()
            .enumerate()
            .map(|(tid, range)| {
                let mut buf = VertexBuffer::default();
                for i in range.clone() {
                    let gi = numbering.gnn(i as i32);
                    for (pos, &j) in mesh.nnlist()[i].iter().enumerate() {
                        // Canonical direction: visit each edge once, and
                        // compute the length with identically ordered
                        // operands on every partition holding it.
                        if gi < numbering.gnn(j) && mesh.calc_edge_length(i as i32, j) > l_max {
                            let slot = buf.edges.len() as u32;
                            table.set_pending(i, pos, slot, tid as u32);
                            mint_vertex(mesh, numbering, i as i32, j, &mut buf);
                        }
                    }
                }
                buf
            })
            .collect()
    }

    /// Grow the marked-edge set until every tetrahedron matches a
    /// template, minting newly marked edges after each global vote.
    fn close_refinement(
        &self,
        table: &RefinedEdgeTable,
        numbering: &GlobalNumbering,
        vertex_chunks: &[Range<usize>],
        orig_nelements: usize,
        bufs: &mut [VertexBuffer],
    ) -> Result<(), RefineError> {
        let mesh = &*self.mesh;
        let element_chunks = chunk_ranges(orig_nelements, self.nthreads);
        loop {
            let new_marks: u64 = element_chunks
                .par_iter()
                .map(|range| {
                    let mut marked = 0u64;
                    for e in range.clone() {
                        let n = mesh.element(e);
                        if n[0] < 0 {
                            continue;
                        }
                        marked += close_element(mesh, numbering, table, n);
                    }
                    marked
                })
                .sum();

            if allreduce_sum(self.comm, new_marks, self.tags.reduce)? == 0 {
                return Ok(());
            }

            // Mint every marked edge; marks live in the canonical row, so
            // the row's owner thread appends to its own buffer.
            bufs.par_iter_mut().enumerate().for_each(|(tid, buf)| {
                for i in vertex_chunks[tid].clone() {
                    for (pos, &j) in mesh.nnlist()[i].iter().enumerate() {
                        if table.get(i, pos) == EdgeMark::Marked {
                            let slot = buf.edges.len() as u32;
                            table.set_pending(i, pos, slot, tid as u32);
                            mint_vertex(mesh, numbering, i as i32, j, buf);
                        }
                    }
                }
            });
        }
    }

    /// Apply the subdivision templates, erasing each parent that emitted
    /// children.
    fn refine_elements(
        &self,
        table: &RefinedEdgeTable,
        numbering: &GlobalNumbering,
        element_chunks: &[Range<usize>],
    ) -> Vec<ElementBuffer> {
        let mesh = &*self.mesh;
        element_chunks
            .par_iter()
            .map(|range| {
                let mut buf = ElementBuffer::default();
                for e in range.clone() {
                    let n = mesh.element(e);
                    if n[0] < 0 {
                        continue;
                    }
                    let emitted = if mesh.dim() == 2 {
                        templates::refine_triangle(
                            mesh,
                            numbering,
                            table,
                            [n[0], n[1], n[2]],
                            &mut buf.enlist,
                        )
                    } else {
                        templates::refine_tetrahedron(
                            mesh,
                            numbering,
                            table,
                            [n[0], n[1], n[2], n[3]],
                            &mut buf.enlist,
                        )
                    };
                    if emitted > 0 {
                        buf.erased.push(e);
                    }
                }
                buf
            })
            .collect()
    }

    /// Flip any appended child whose signed measure is negative relative
    /// to the reference orientation.
    fn fix_orientation(&mut self, from_element: usize) {
        let dim = self.mesh.dim();
        let nloc = self.mesh.nloc();
        let geometry = self.geometry;
        let (tail, coords) = self.mesh.connectivity_tail_and_coords(from_element);
        tail.par_chunks_exact_mut(nloc).for_each(|n| {
            if n[0] < 0 {
                return;
            }
            let at = |v: i32| &coords[v as usize * dim..(v as usize + 1) * dim];
            let measure = if dim == 2 {
                geometry.signed_area(at(n[0]), at(n[1]), at(n[2]))
            } else {
                geometry.signed_volume(at(n[0]), at(n[1]), at(n[2]), at(n[3]))
            };
            if measure < 0.0 {
                n.swap(0, 1);
            }
        });
    }
}

/// Closure dispatch for one tetrahedron; returns the number of marks this
/// call newly performed.
fn close_element(
    mesh: &SimplexMesh,
    numbering: &GlobalNumbering,
    table: &RefinedEdgeTable,
    n: &[i32],
) -> u64 {
    let lnn2gnn = numbering.lnn2gnn();
    let mut split = Vec::with_capacity(6);
    for j in 0..4 {
        for k in j + 1..4 {
            if mesh.edge_mark(n[j], n[k], table, lnn2gnn).is_split() {
                split.push(templates::Edge::new(n[j], n[k]));
            }
        }
    }

    match split.len() {
        // Counts 0, 1, and 6 match a template as they stand.
        0 | 1 | 6 => 0,
        2 => {
            // Touching split edges would produce a non-conforming 1:3;
            // close the triangle they span. Opposite edges are a clean
            // 1:4 and stay.
            match split[0].connected(&split[1]) {
                Some(shared) => {
                    let a = split[0].other(shared);
                    let b = split[1].other(shared);
                    mark_edge(mesh, numbering, table, a, b) as u64
                }
                None => 0,
            }
        }
        3 => {
            // Only three split edges meeting pairwise in three distinct
            // vertices (a face triangle) subdivide cleanly; anything else
            // promotes towards the uniform template.
            let mut shared = BTreeSet::new();
            for j in 0..3 {
                for k in j + 1..3 {
                    if let Some(v) = split[j].connected(&split[k]) {
                        shared.insert(v);
                    }
                }
            }
            if shared.len() == 3 {
                0
            } else {
                mark_all_edges(mesh, numbering, table, n)
            }
        }
        // Counts 4 and 5 always promote to the uniform split.
        _ => mark_all_edges(mesh, numbering, table, n),
    }
}

/// Attempt to mark all six edges of a tetrahedron; already split edges
/// are untouched. Returns the number of new marks.
fn mark_all_edges(
    mesh: &SimplexMesh,
    numbering: &GlobalNumbering,
    table: &RefinedEdgeTable,
    n: &[i32],
) -> u64 {
    let mut marked = 0;
    for j in 0..4 {
        for k in j + 1..4 {
            marked += mark_edge(mesh, numbering, table, n[j], n[k]) as u64;
        }
    }
    marked
}

/// CAS-mark the canonical slot of edge `(n0, n1)`. Concurrent markers
/// race benignly; exactly one caller observes the transition.
fn mark_edge(
    mesh: &SimplexMesh,
    numbering: &GlobalNumbering,
    table: &RefinedEdgeTable,
    n0: i32,
    n1: i32,
) -> bool {
    let (a, b) = if numbering.gnn(n0) < numbering.gnn(n1) {
        (n0, n1)
    } else {
        (n1, n0)
    };
    let pos = mesh
        .neighbour_position(a, b)
        .expect("adjacency validated before refinement");
    table.mark(a as usize, pos)
}

/// Mint the metric-weighted midpoint of edge `(n0, n1)` into `buf`.
fn mint_vertex(
    mesh: &SimplexMesh,
    numbering: &GlobalNumbering,
    n0: i32,
    n1: i32,
    buf: &mut VertexBuffer,
) {
    // Lesser gnn first, so the weight is measured from the same endpoint
    // on every partition.
    let (n0, n1) = if numbering.gnn(n0) > numbering.gnn(n1) {
        (n1, n0)
    } else {
        (n0, n1)
    };
    buf.edges
        .push(DirectedEdge::new(numbering.gnn(n0), numbering.gnn(n1)));

    let dim = mesh.dim();
    let x0 = mesh.coords_of(n0);
    let x1 = mesh.coords_of(n1);
    let m0 = mesh.metric_of(n0);
    let m1 = mesh.metric_of(n1);

    let weight = 1.0 / (1.0 + (metric_length(x0, x1, m0) / metric_length(x0, x1, m1)).sqrt());

    for i in 0..dim {
        buf.coords.push(x0[i] + weight * (x1[i] - x0[i]));
    }
    for i in 0..dim * dim {
        let m = m0[i] + weight * (m1[i] - m0[i]);
        if m.is_nan() {
            eprintln!(
                "[refine] interpolated metric component is NaN: m0={} m1={} weight={}",
                m0[i], m1[i], weight
            );
        }
        buf.metric.push(m);
    }
}

/// Near-equal contiguous ranges, one per worker; deterministic thread
/// ids follow from the chunk index.
fn chunk_ranges(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = n / parts;
    let rem = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for p in 0..parts {
        let len = base + usize::from(p < rem);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Exclusive prefix offsets over per-thread counts, based at the
/// pre-append array length.
fn exclusive_offsets(counts: &[usize], base: usize) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut acc = base;
    for &c in counts {
        offsets.push(acc);
        acc += c;
    }
    offsets
}
