use metric_refine::comm::NoComm;
use metric_refine::geometry::ElementGeometry;
use metric_refine::mesh::SimplexMesh;
use metric_refine::refine::Refine;
use metric_refine::surface::NullSurface;

fn identity_metric_3d(n: usize) -> Vec<f64> {
    let mut m = Vec::with_capacity(9 * n);
    for _ in 0..n {
        m.extend_from_slice(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    }
    m
}

fn live_elements(mesh: &SimplexMesh) -> Vec<Vec<i32>> {
    (0..mesh.num_elements())
        .map(|e| mesh.element(e).to_vec())
        .filter(|n| n[0] >= 0)
        .collect()
}

fn volumes(mesh: &SimplexMesh) -> Vec<f64> {
    let g = ElementGeometry::new(3).unwrap();
    live_elements(mesh)
        .iter()
        .map(|n| {
            g.signed_volume(
                mesh.coords_of(n[0]),
                mesh.coords_of(n[1]),
                mesh.coords_of(n[2]),
                mesh.coords_of(n[3]),
            )
        })
        .collect()
}

fn assert_positive_volumes(mesh: &SimplexMesh) {
    let g = ElementGeometry::new(3).unwrap();
    // Positive relative to the input mesh's handedness.
    let reference = {
        let n = live_elements(mesh);
        let n = &n[0];
        g.signed_volume(
            mesh.coords_of(n[0]),
            mesh.coords_of(n[1]),
            mesh.coords_of(n[2]),
            mesh.coords_of(n[3]),
        )
        .signum()
    };
    for (i, v) in volumes(mesh).iter().enumerate() {
        assert!(v * reference > 0.0, "child {i} has signed volume {v}");
    }
}

#[test]
fn single_long_edge_splits_one_to_two() {
    let coords = vec![
        0.0, 0.0, 0.0, //
        2.0, 0.0, 0.0, //
        1.0, 0.6, 0.0, //
        1.0, 0.3, 0.6,
    ];
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(4), enlist).unwrap();
    let parent_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(1.5, &mut NullSurface)
        .unwrap();

    assert_eq!(mesh.num_nodes(), 5);
    let live = live_elements(&mesh);
    assert_eq!(live.len(), 2);
    // Both children share the face spanned by the midpoint and the two
    // off-edge vertices.
    for n in &live {
        assert!(n.contains(&4));
        assert!(n.contains(&2));
        assert!(n.contains(&3));
    }
    let child_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((child_volume - parent_volume).abs() < 1e-12);
    assert_positive_volumes(&mesh);
}

#[test]
fn opposite_edges_split_one_to_four() {
    // Edges (0)-(1) and (2)-(3) measure 2, the four connecting edges 1.5:
    // the split pair is opposite, so the closure loop accepts the
    // configuration without marking anything else.
    let coords = vec![
        -1.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, -1.0, 0.5, //
        0.0, 1.0, 0.5,
    ];
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(4), enlist).unwrap();
    let parent_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(1.8, &mut NullSurface)
        .unwrap();

    // Exactly the two midpoints; no closure growth.
    assert_eq!(mesh.num_nodes(), 6);
    let live = live_elements(&mesh);
    assert_eq!(live.len(), 4);
    // Every child contains both midpoints and one endpoint of each split
    // edge.
    for n in &live {
        assert!(n.contains(&4) && n.contains(&5), "child {n:?}");
        assert_eq!(n.iter().filter(|&&v| v == 0 || v == 1).count(), 1);
        assert_eq!(n.iter().filter(|&&v| v == 2 || v == 3).count(), 1);
    }
    let child_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((child_volume - parent_volume).abs() < 1e-12);
    assert_positive_volumes(&mesh);
}

#[test]
fn face_triple_refines_one_to_four() {
    // The three base edges exceed the threshold and close a face; the
    // apex edges stay short. The closure loop keeps the count at three
    // and the face template applies.
    let coords = vec![
        0.0, 0.0, 0.0, //
        2.2, 0.0, 0.0, //
        1.1, 1.905, 0.0, //
        1.1, 0.635, 0.8,
    ];
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(4), enlist).unwrap();
    let parent_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(2.0, &mut NullSurface)
        .unwrap();

    // Exactly three midpoints: the closure marked nothing further.
    assert_eq!(mesh.num_nodes(), 7);
    let live = live_elements(&mesh);
    assert_eq!(live.len(), 4);
    // The apex belongs to every child; the centre child also carries all
    // three midpoints.
    for n in &live {
        assert!(n.contains(&3), "child {n:?} misses the apex");
    }
    assert!(
        live.iter()
            .any(|n| n.contains(&4) && n.contains(&5) && n.contains(&6)),
        "no centre child in {live:?}"
    );
    let child_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((child_volume - parent_volume).abs() < 1e-12);
    assert_positive_volumes(&mesh);
}

#[test]
fn vertex_star_promotes_to_uniform() {
    // Three long edges share vertex 0; the closure loop cannot retile
    // that, so it marks the remaining edges and the uniform template
    // applies.
    let coords = vec![
        0.0, 0.0, 0.0, //
        3.0, 0.0, 0.0, //
        3.0, 1.0, 0.0, //
        3.0, 0.0, 1.0,
    ];
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(4), enlist).unwrap();
    let parent_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(2.5, &mut NullSurface)
        .unwrap();

    // All six edges end up split.
    assert_eq!(mesh.num_nodes(), 10);
    assert_eq!(live_elements(&mesh).len(), 8);
    let child_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((child_volume - parent_volume).abs() < 1e-12);
    assert_positive_volumes(&mesh);
}

#[test]
fn uniform_tetrahedron_splits_one_to_eight() {
    let coords = vec![
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0,
    ];
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(4), enlist).unwrap();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(0.9, &mut NullSurface)
        .unwrap();

    assert_eq!(mesh.num_nodes(), 10);
    let live = live_elements(&mesh);
    assert_eq!(live.len(), 8);
    // Each original vertex survives in exactly one corner child.
    for v in 0..4 {
        assert_eq!(live.iter().filter(|n| n.contains(&v)).count(), 1);
    }
    let child_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((child_volume - 1.0 / 6.0).abs() < 1e-10);
    assert_positive_volumes(&mesh);
}

#[test]
fn shared_face_neighbours_stay_conforming() {
    // Two tetrahedra share the face (0, 1, 2); only edge (0)-(1) is long.
    // Both parents split 1:2 through the same midpoint.
    let coords = vec![
        0.0, 0.0, 0.0, //
        2.0, 0.0, 0.0, //
        1.0, 1.0, 0.0, //
        1.0, 0.4, 0.8, //
        1.0, 0.4, -0.8,
    ];
    let enlist = vec![0, 1, 2, 3, 0, 1, 4, 2];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(5), enlist).unwrap();
    let parent_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(1.5, &mut NullSurface)
        .unwrap();

    assert_eq!(mesh.num_nodes(), 6);
    let live = live_elements(&mesh);
    assert_eq!(live.len(), 4);
    for n in &live {
        assert!(n.contains(&5), "child {n:?} misses the shared midpoint");
        assert_eq!(n.iter().filter(|&&v| v == 0 || v == 1).count(), 1);
    }
    let child_volume: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((child_volume - parent_volume).abs() < 1e-12);
    assert_positive_volumes(&mesh);
}

#[test]
fn midpoint_weighting_in_three_dimensions() {
    // Stretch the metric at vertex 0 along x: the midpoint of the long
    // edge (0)-(1) shifts towards the denser end.
    let coords = vec![
        0.0, 0.0, 0.0, //
        2.0, 0.0, 0.0, //
        1.0, 0.6, 0.0, //
        1.0, 0.3, 0.6,
    ];
    let mut metric = identity_metric_3d(4);
    metric[0] = 4.0; // m00 at vertex 0
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, metric, enlist).unwrap();

    Refine::new(&mut mesh, &NoComm)
        .unwrap()
        .refine(2.0, &mut NullSurface)
        .unwrap();

    // Only the stretched edge exceeds the threshold.
    assert_eq!(mesh.num_nodes(), 5);

    // weight = 1 / (1 + sqrt(l(m0)/l(m1))) with l(m0) = 4, l(m1) = 2.
    let weight = 1.0 / (1.0 + (4.0f64 / 2.0).sqrt());
    let got = mesh.coords_of(4);
    assert!((got[0] - weight * 2.0).abs() < 1e-12);
    assert!(got[1].abs() < 1e-12 && got[2].abs() < 1e-12);
    let m = mesh.metric_of(4);
    assert!((m[0] - (4.0 + weight * (1.0 - 4.0))).abs() < 1e-12);
    assert!((m[4] - 1.0).abs() < 1e-12);
    assert_positive_volumes(&mesh);
}

#[test]
fn repeated_uniform_passes_conserve_volume() {
    let coords = vec![
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0,
    ];
    let enlist = vec![0, 1, 2, 3];
    let mut mesh = SimplexMesh::new_3d(coords, identity_metric_3d(4), enlist).unwrap();

    let mut previous_live = 1;
    for l_max in [0.9, 0.45] {
        Refine::new(&mut mesh, &NoComm)
            .unwrap()
            .refine(l_max, &mut NullSurface)
            .unwrap();
        let live = live_elements(&mesh).len();
        assert!(live > previous_live);
        previous_live = live;
    }

    let total: f64 = volumes(&mesh).iter().map(|v| v.abs()).sum();
    assert!((total - 1.0 / 6.0).abs() < 1e-10);
    assert_positive_volumes(&mesh);
}
