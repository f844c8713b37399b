use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use cgbench_core::backend::SingleWorker;
use cgbench_core::cg::{conjugate_gradient, CgOptions, CgWorkspace};
use cgbench_core::geometry::{generate_geometry, Geometry, GeometryParams};
use cgbench_core::halo::NoTransport;
use cgbench_core::preconditioner::{JacobiPreconditioner, Preconditioner};
use cgbench_core::problem::{generate_problem, GeneratedProblem, ProblemOutputs};

fn single_geometry(n: usize) -> Geometry {
    generate_geometry(&GeometryParams {
        size: 1,
        rank: 0,
        num_threads: 1,
        pz: 0,
        zl: 0,
        zu: 0,
        nx: n,
        ny: n,
        nz: n,
        npx: 1,
        npy: 1,
        npz: 1,
    })
    .expect("geometry")
}

fn generate(backend: &SingleWorker, n: usize) -> GeneratedProblem {
    let geom = single_geometry(n);
    generate_problem(backend, &geom, ProblemOutputs::default()).expect("generation")
}

fn bench_generate(c: &mut Criterion) {
    let backend = SingleWorker::new(1).expect("backend");
    let mut group = c.benchmark_group("generate_problem");
    for n in [16usize, 24] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, &n| {
            bench.iter(|| black_box(generate(&backend, n)));
        });
    }
    group.finish();
}

fn bench_solve(c: &mut Criterion) {
    let backend = SingleWorker::new(1).expect("backend");
    let problem = generate(&backend, 16);
    let a = problem.matrix;
    let b = problem.rhs.expect("rhs");
    let jacobi = JacobiPreconditioner::from_matrix(&a);

    c.bench_function("cg_16_25_iters", |bench| {
        bench.iter(|| {
            let mut x = problem.initial_guess.clone().expect("initial guess");
            let mut data = CgWorkspace::new(&a);
            let result = conjugate_gradient(
                &backend,
                &a,
                &mut NoTransport,
                &mut data,
                &b,
                &mut x,
                CgOptions {
                    max_iter: 25,
                    tolerance: 0.0,
                },
                Some(&jacobi as &dyn Preconditioner),
            );
            black_box(result.final_residual)
        });
    });
}

criterion_group!(benches, bench_generate, bench_solve);
criterion_main!(benches);
