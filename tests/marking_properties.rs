//! Property tests for the marking decision: the backend length is not
//! required to be bit-exact under argument swap, but the decision reached
//! through the canonical ordering must not depend on how callers hand the
//! edge over, and a whole pass must be reproducible.

use metric_refine::comm::NoComm;
use metric_refine::mesh::SimplexMesh;
use metric_refine::refine::Refine;
use metric_refine::surface::NullSurface;
use proptest::prelude::*;

/// A random SPD 2x2 tensor built as `LLᵀ + εI` from a lower-triangular
/// factor.
fn spd_metric_2d() -> impl Strategy<Value = [f64; 4]> {
    (0.2f64..3.0, -1.0f64..1.0, 0.2f64..3.0).prop_map(|(a, b, c)| {
        let m00 = a * a + 1e-3;
        let m01 = a * b;
        let m11 = b * b + c * c + 1e-3;
        [m00, m01, m01, m11]
    })
}

fn triangle_mesh(coords: &[(f64, f64)], metrics: &[[f64; 4]]) -> SimplexMesh {
    let flat_coords: Vec<f64> = coords.iter().flat_map(|&(x, y)| [x, y]).collect();
    let flat_metric: Vec<f64> = metrics.iter().flatten().copied().collect();
    SimplexMesh::new_2d(flat_coords, flat_metric, vec![0, 1, 2]).unwrap()
}

proptest! {
    /// Swapping the operands of the length wrapper never changes the
    /// split decision.
    #[test]
    fn length_decision_is_order_invariant(
        coords in proptest::collection::vec((-5.0f64..5.0, -5.0f64..5.0), 3),
        metrics in proptest::collection::vec(spd_metric_2d(), 3),
        l_max in 0.1f64..10.0,
    ) {
        // Reject degenerate triangles.
        let area = (coords[1].0 - coords[0].0) * (coords[2].1 - coords[0].1)
            - (coords[2].0 - coords[0].0) * (coords[1].1 - coords[0].1);
        prop_assume!(area.abs() > 1e-6);

        let mesh = triangle_mesh(&coords, &metrics);
        for u in 0..3i32 {
            for v in (u + 1)..3 {
                let forward = mesh.calc_edge_length(u, v);
                let backward = mesh.calc_edge_length(v, u);
                prop_assert_eq!(forward > l_max, backward > l_max);
            }
        }
    }

    /// A full pass is a deterministic function of the input mesh.
    #[test]
    fn refinement_is_reproducible(
        coords in proptest::collection::vec((-5.0f64..5.0, -5.0f64..5.0), 3),
        metrics in proptest::collection::vec(spd_metric_2d(), 3),
        l_max in 0.5f64..4.0,
    ) {
        let area = (coords[1].0 - coords[0].0) * (coords[2].1 - coords[0].1)
            - (coords[2].0 - coords[0].0) * (coords[1].1 - coords[0].1);
        prop_assume!(area.abs() > 1e-6);

        let run = || {
            let mut mesh = triangle_mesh(&coords, &metrics);
            Refine::new(&mut mesh, &NoComm)
                .unwrap()
                .refine(l_max, &mut NullSurface)
                .unwrap();
            let elements: Vec<Vec<i32>> = (0..mesh.num_elements())
                .map(|e| mesh.element(e).to_vec())
                .collect();
            let nodes: Vec<Vec<f64>> = (0..mesh.num_nodes())
                .map(|v| mesh.coords_of(v as i32).to_vec())
                .collect();
            (elements, nodes)
        };
        prop_assert_eq!(run(), run());
    }

    /// The element count never decreases across a pass.
    #[test]
    fn element_count_is_monotone(
        coords in proptest::collection::vec((-5.0f64..5.0, -5.0f64..5.0), 3),
        metrics in proptest::collection::vec(spd_metric_2d(), 3),
        l_max in 0.5f64..4.0,
    ) {
        let area = (coords[1].0 - coords[0].0) * (coords[2].1 - coords[0].1)
            - (coords[2].0 - coords[0].0) * (coords[1].1 - coords[0].1);
        prop_assume!(area.abs() > 1e-6);

        let mut mesh = triangle_mesh(&coords, &metrics);
        let before = mesh.num_elements();
        Refine::new(&mut mesh, &NoComm)
            .unwrap()
            .refine(l_max, &mut NullSurface)
            .unwrap();
        prop_assert!(mesh.num_elements() >= before);
    }
}
