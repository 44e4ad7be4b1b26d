use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use metric_refine::comm::NoComm;
use metric_refine::mesh::SimplexMesh;
use metric_refine::refine::Refine;
use metric_refine::surface::NullSurface;

/// Structured n x n grid of unit-metric triangles over [0, n] x [0, n].
fn grid_mesh(n: usize) -> SimplexMesh {
    let side = n + 1;
    let mut coords = Vec::with_capacity(2 * side * side);
    let mut metric = Vec::with_capacity(4 * side * side);
    for j in 0..side {
        for i in 0..side {
            coords.push(i as f64);
            coords.push(j as f64);
            metric.extend_from_slice(&[1.0, 0.0, 0.0, 1.0]);
        }
    }
    let mut enlist = Vec::with_capacity(6 * n * n);
    for j in 0..n {
        for i in 0..n {
            let v = (j * side + i) as i32;
            let s = side as i32;
            enlist.extend_from_slice(&[v, v + 1, v + s]);
            enlist.extend_from_slice(&[v + 1, v + s + 1, v + s]);
        }
    }
    SimplexMesh::new_2d(coords, metric, enlist).unwrap()
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("refine");
    for n in [8usize, 16, 32] {
        group.bench_function(format!("uniform_grid_{n}x{n}"), |b| {
            b.iter_batched(
                || grid_mesh(n),
                |mut mesh| {
                    Refine::new(&mut mesh, &NoComm)
                        .unwrap()
                        .refine(0.9, &mut NullSurface)
                        .unwrap();
                    mesh
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_refine);
criterion_main!(benches);
