//! Subdivision templates for triangles and tetrahedra.
//!
//! Every parent element with at least one split edge is replaced by the
//! children of a fixed template keyed on the number and topology of its
//! split edges: 1:2, 1:3 (shorter-diagonal), and 1:4 for triangles; 1:2,
//! opposite-pair 1:4, face-triple 1:4, and uniform 1:8 for tetrahedra.
//! Counts 4 and 5 cannot survive the closure loop; hitting one here is a
//! closure bug.
//!
//! Child emission order follows the template definitions; the orientation
//! pass afterwards flips any child with negative signed measure, so
//! templates are free to emit in the label order that makes their
//! structure obvious.

use crate::mesh::SimplexMesh;
use crate::refine::edge_table::RefinedEdgeTable;
use crate::refine::numbering::GlobalNumbering;

/// Unordered element-local edge, kept in the orientation it was
/// enumerated in.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Edge {
    pub a: i32,
    pub b: i32,
}

impl Edge {
    #[inline]
    pub fn new(a: i32, b: i32) -> Self {
        Self { a, b }
    }

    /// Whether `v` is one of the endpoints.
    #[inline]
    pub fn contains(&self, v: i32) -> bool {
        self.a == v || self.b == v
    }

    /// The endpoint shared with `other`, if the edges touch.
    #[inline]
    pub fn connected(&self, other: &Edge) -> Option<i32> {
        if other.contains(self.a) {
            Some(self.a)
        } else if other.contains(self.b) {
            Some(self.b)
        } else {
            None
        }
    }

    /// The endpoint that is not `v`.
    #[inline]
    pub fn other(&self, v: i32) -> i32 {
        debug_assert!(self.contains(v));
        if self.a == v {
            self.b
        } else {
            self.a
        }
    }
}

/// Length of edge `(u, v)` with operands ordered by global number, so
/// every partition holding the edge computes the identical value.
/// Midpoints minted this pass order below all numbered vertices.
fn ordered_edge_length(mesh: &SimplexMesh, numbering: &GlobalNumbering, u: i32, v: i32) -> f64 {
    if numbering.gnn(u) < numbering.gnn(v) {
        mesh.calc_edge_length(u, v)
    } else {
        mesh.calc_edge_length(v, u)
    }
}

/// Retile a triangle whose split edges have installed midpoints. Child
/// connectivity is appended to `out`; returns the number of children (0
/// if the element is untouched).
pub(crate) fn refine_triangle(
    mesh: &SimplexMesh,
    numbering: &GlobalNumbering,
    table: &RefinedEdgeTable,
    n: [i32; 3],
    out: &mut Vec<i32>,
) -> usize {
    let lnn2gnn = numbering.lnn2gnn();
    // The i'th midpoint sits on the edge opposite the i'th vertex.
    let m = [
        mesh.get_new_vertex(n[1], n[2], table, lnn2gnn),
        mesh.get_new_vertex(n[2], n[0], table, lnn2gnn),
        mesh.get_new_vertex(n[0], n[1], table, lnn2gnn),
    ];
    let refine_cnt = m.iter().filter(|&&v| v >= 0).count();

    match refine_cnt {
        0 => 0,
        1 => {
            // Rotate so the split edge lies opposite r[0].
            let j = (0..3).find(|&j| m[j] >= 0).unwrap_or(0);
            let mid = m[j];
            let r = [n[j], n[(j + 1) % 3], n[(j + 2) % 3]];
            out.extend_from_slice(&[r[0], r[1], mid]);
            out.extend_from_slice(&[r[0], mid, r[2]]);
            2
        }
        2 => {
            // Rotate so the unsplit edge lies opposite r[0]; v[0] and v[1]
            // are the midpoints opposite r[1] and r[2].
            let j = (0..3).find(|&j| m[j] < 0).unwrap_or(0);
            let v = [m[(j + 1) % 3], m[(j + 2) % 3]];
            let r = [n[j], n[(j + 1) % 3], n[(j + 2) % 3]];
            // Cut along the shorter of the two candidate diagonals.
            let ldiag0 = ordered_edge_length(mesh, numbering, v[0], r[1]);
            let ldiag1 = ordered_edge_length(mesh, numbering, v[1], r[2]);
            let offset = usize::from(ldiag0 >= ldiag1);
            out.extend_from_slice(&[r[0], v[1], v[0]]);
            out.extend_from_slice(&[v[offset], r[1], r[2]]);
            out.extend_from_slice(&[v[0], v[1], r[offset + 1]]);
            3
        }
        _ => {
            // Uniform 1:4 with the centre triangle of midpoints.
            out.extend_from_slice(&[n[0], m[2], m[1]]);
            out.extend_from_slice(&[n[1], m[0], m[2]]);
            out.extend_from_slice(&[n[2], m[1], m[0]]);
            out.extend_from_slice(&[m[0], m[1], m[2]]);
            4
        }
    }
}

/// Retile a tetrahedron whose split edges have installed midpoints.
/// Returns the number of children appended to `out`.
pub(crate) fn refine_tetrahedron(
    mesh: &SimplexMesh,
    numbering: &GlobalNumbering,
    table: &RefinedEdgeTable,
    n: [i32; 4],
    out: &mut Vec<i32>,
) -> usize {
    let lnn2gnn = numbering.lnn2gnn();
    let mut new_vertex = Vec::with_capacity(6);
    let mut split_edges = Vec::with_capacity(6);
    for j in 0..4 {
        for k in j + 1..4 {
            let id = mesh.get_new_vertex(n[j], n[k], table, lnn2gnn);
            if id >= 0 {
                new_vertex.push(id);
                split_edges.push(Edge::new(n[j], n[k]));
            }
        }
    }

    match new_vertex.len() {
        0 => 0,
        1 => {
            // The split edge defines two children sharing the face spanned
            // by the midpoint and the two off-edge vertices.
            let e = split_edges[0];
            let mid = new_vertex[0];
            let mut oe = [0i32; 2];
            let mut pos = 0;
            for &v in &n {
                if !e.contains(v) {
                    oe[pos] = v;
                    pos += 1;
                }
            }
            out.extend_from_slice(&[e.a, mid, oe[0], oe[1]]);
            out.extend_from_slice(&[e.b, mid, oe[0], oe[1]]);
            2
        }
        2 => {
            // Two opposite split edges (the closure loop promotes the
            // touching configuration), giving a clean 1:4.
            debug_assert!(split_edges[0].connected(&split_edges[1]).is_none());
            let (e0, e1) = (split_edges[0], split_edges[1]);
            let (m0, m1) = (new_vertex[0], new_vertex[1]);
            out.extend_from_slice(&[e0.a, m0, e1.a, m1]);
            out.extend_from_slice(&[e0.a, m0, e1.b, m1]);
            out.extend_from_slice(&[e0.b, m0, e1.a, m1]);
            out.extend_from_slice(&[e0.b, m0, e1.b, m1]);
            4
        }
        3 => {
            // Face triple: the three split edges close a triangle. Walk
            // the cycle corner-midpoint-corner-... into the seven-label
            // chain; the off-face vertex is the shared apex.
            let mut m = [-1i32; 7];
            m[0] = split_edges[0].a;
            m[1] = new_vertex[0];
            m[2] = split_edges[0].b;
            if split_edges[1].contains(m[2]) {
                m[3] = new_vertex[1];
                m[4] = split_edges[1].other(m[2]);
                m[5] = new_vertex[2];
            } else {
                m[3] = new_vertex[2];
                m[4] = split_edges[2].other(m[2]);
                m[5] = new_vertex[1];
            }
            for &v in &n {
                if v != m[0] && v != m[2] && v != m[4] {
                    m[6] = v;
                    break;
                }
            }
            out.extend_from_slice(&[m[0], m[1], m[5], m[6]]);
            out.extend_from_slice(&[m[1], m[2], m[3], m[6]]);
            out.extend_from_slice(&[m[5], m[3], m[4], m[6]]);
            out.extend_from_slice(&[m[1], m[3], m[5], m[6]]);
            4
        }
        6 => {
            // Uniform 1:8: four corner children and a central octahedron
            // cut into four.
            let v = &new_vertex;
            out.extend_from_slice(&[n[0], v[0], v[1], v[2]]);
            out.extend_from_slice(&[n[1], v[3], v[0], v[4]]);
            out.extend_from_slice(&[n[2], v[1], v[3], v[5]]);
            out.extend_from_slice(&[v[0], v[3], v[1], v[4]]);
            out.extend_from_slice(&[v[0], v[4], v[1], v[2]]);
            out.extend_from_slice(&[v[1], v[3], v[5], v[4]]);
            out.extend_from_slice(&[v[1], v[4], v[5], v[2]]);
            out.extend_from_slice(&[v[2], v[4], v[5], n[3]]);
            8
        }
        cnt => unreachable!("tetrahedron left with {cnt} split edges after closure"),
    }
}
