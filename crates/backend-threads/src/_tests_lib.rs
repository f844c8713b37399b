#![cfg(test)]

use cgbench_core::backend::{ExecutionBackend, PendingReduction};
use cgbench_core::benchmark::{self, RunReport, Verbosity};
use cgbench_core::cg::{conjugate_gradient, CgOptions, CgWorkspace};
use cgbench_core::geometry::{generate_geometry, GeometryParams};
use cgbench_core::halo::{HaloExchange, NoTransport};
use cgbench_core::io::{
    DecompositionConfig, GridConfig, JobConfig, PreconditionerKind, SolverAlgorithm, SolverConfig,
};
use cgbench_core::metrics::MetricsConfig;
use cgbench_core::ops;
use cgbench_core::preconditioner::{JacobiPreconditioner, Preconditioner};
use cgbench_core::problem::{generate_problem, ProblemOutputs};
use cgbench_core::vector::Vector;

use super::run_workers;

#[test]
fn blocking_sum_is_deterministic_across_workers() {
    let sums = run_workers(4, 1, |context| {
        context.backend.allreduce_sum(context.backend.rank() as f64 + 0.5)
    })
    .expect("cluster");
    assert_eq!(sums, vec![8.0; 4]);
}

#[test]
fn u64_and_logical_collectives_agree() {
    let results = run_workers(3, 1, |context| {
        let total = context.backend.allreduce_sum_u64(context.backend.rank() as u64 + 1);
        let all = context.backend.allreduce_and(true);
        let none = context.backend.allreduce_and(context.backend.rank() != 1);
        (total, all, none)
    })
    .expect("cluster");
    assert_eq!(results, vec![(6, true, false); 3]);
}

#[test]
fn nonblocking_sum_overlaps_local_work() {
    let results = run_workers(4, 1, |context| {
        let rank = context.backend.rank();
        let pending = context.backend.allreduce_sum_start(rank as f64);
        // Independent local work while the reduction is in flight.
        let local: f64 = (0..1000).map(|i| (i as f64).sqrt()).sum();
        let reduced = pending.wait();
        (reduced, local > 0.0)
    })
    .expect("cluster");
    for (reduced, worked) in results {
        assert_eq!(reduced, 6.0);
        assert!(worked);
    }
}

#[test]
fn repeated_collectives_reuse_the_ring_safely() {
    let results = run_workers(2, 1, |context| {
        let mut acc = 0.0;
        for round in 0..100 {
            acc += context.backend.allreduce_sum(round as f64);
        }
        acc
    })
    .expect("cluster");
    // Each round sums the same value from both workers: 2 * 0..100.
    assert_eq!(results, vec![9900.0; 2]);
}

fn job(nx: usize, workers: usize, np: usize) -> JobConfig {
    JobConfig {
        grid: GridConfig {
            nx,
            ny: nx,
            nz: nx,
        },
        decomposition: DecompositionConfig {
            workers,
            threads: 1,
            npx: np,
            npy: np,
            npz: np,
            pz: 0,
            zl: 0,
            zu: 0,
        },
        solver: SolverConfig {
            max_iter: 200,
            tolerance: 1e-8,
            preconditioner: PreconditionerKind::Jacobi,
            algorithm: SolverAlgorithm::Overlapped,
        },
        metrics: MetricsConfig::default(),
    }
}

fn run_single(nx: usize) -> RunReport {
    let backend = cgbench_core::backend::SingleWorker::new(1).expect("backend");
    let config = job(nx, 1, 1);
    benchmark::run(&backend, &mut NoTransport, &config, Verbosity::Quiet, None).expect("run")
}

#[test]
fn halo_exchange_reconstructs_the_exact_residual() {
    // b - A*ones must vanish globally even when most stencil neighbors
    // live on other workers.
    let norms = run_workers(8, 1, |mut context| {
        let geom = generate_geometry(&GeometryParams {
            size: 8,
            rank: context.backend.rank(),
            num_threads: 1,
            pz: 0,
            zl: 0,
            zu: 0,
            nx: 4,
            ny: 4,
            nz: 4,
            npx: 2,
            npy: 2,
            npz: 2,
        })
        .expect("geometry");
        let problem =
            generate_problem(&context.backend, &geom, ProblemOutputs::default()).expect("generation");
        let mut a = problem.matrix;
        let b = problem.rhs.expect("rhs");
        context.transport.setup(&mut a);

        let mut p = Vector::zeros(a.local_cols);
        let ones = problem.exact_solution.expect("exact solution");
        ops::copy(&ones, &mut p);
        let mut ax = Vector::zeros(a.local_rows);
        ops::spmv(&a, &mut context.transport, &mut p, &mut ax);
        let mut r = Vector::zeros(a.local_rows);
        let local = ops::initial_residual(&b, &ax, &mut r);
        context.backend.allreduce_sum(local)
    })
    .expect("cluster");
    for norm_sq in norms {
        assert!(norm_sq < 1e-18, "global residual should vanish, got {norm_sq}");
    }
}

#[test]
fn eight_workers_match_the_single_worker_solve() {
    let single = run_single(8);

    let config = job(4, 8, 2);
    let reports = run_workers(8, 1, |mut context| {
        benchmark::run(
            &context.backend,
            &mut context.transport,
            &config,
            Verbosity::Quiet,
            None,
        )
        .expect("run")
    })
    .expect("cluster");

    for report in &reports {
        assert_eq!(report.total_rows, single.total_rows);
        assert_eq!(report.total_nonzeros, single.total_nonzeros);
        assert_eq!(
            report.iterations, single.iterations,
            "iteration counts must agree across decompositions"
        );
        let scale = single.initial_residual;
        assert!(
            (report.initial_residual - single.initial_residual).abs() <= 1e-9 * scale,
            "initial residuals diverged: {} vs {}",
            report.initial_residual,
            single.initial_residual
        );
        assert!(
            (report.final_residual - single.final_residual).abs()
                <= 1e-6 * scale.max(single.final_residual),
            "final residuals diverged: {} vs {}",
            report.final_residual,
            single.final_residual
        );
    }
}

#[test]
fn slab_decomposition_solves_end_to_end() {
    // Four z-planes split into two slabs of heights 3 and 5: a 4x4x16
    // global grid with boundaries that do not align with the plane index.
    let config = JobConfig {
        grid: GridConfig {
            nx: 4,
            ny: 4,
            nz: 4,
        },
        decomposition: DecompositionConfig {
            workers: 4,
            threads: 1,
            npx: 1,
            npy: 1,
            npz: 4,
            pz: 2,
            zl: 3,
            zu: 5,
        },
        solver: SolverConfig {
            max_iter: 100,
            tolerance: 1e-6,
            preconditioner: PreconditionerKind::Jacobi,
            algorithm: SolverAlgorithm::Overlapped,
        },
        metrics: MetricsConfig::default(),
    };
    let reports = run_workers(4, 1, |mut context| {
        benchmark::run(
            &context.backend,
            &mut context.transport,
            &config,
            Verbosity::Quiet,
            None,
        )
        .expect("run")
    })
    .expect("cluster");

    let first = &reports[0];
    assert_eq!(first.total_rows, 4 * 4 * 16);
    assert!(first.converged, "slab run should converge");
    for report in &reports {
        assert_eq!(report.iterations, first.iterations);
        assert_eq!(report.total_nonzeros, first.total_nonzeros);
    }
    // Low-slab workers hold 4*4*3 rows, high-slab workers 4*4*5.
    assert_eq!(reports[0].local_rows, 48);
    assert_eq!(reports[3].local_rows, 80);
}

#[test]
fn direct_cg_runs_under_a_cluster_backend() {
    // Drive the solver without the orchestration layer to pin the collective
    // call pattern: every worker issues the same sequence.
    let results = run_workers(2, 2, |mut context| {
        let geom = generate_geometry(&GeometryParams {
            size: 2,
            rank: context.backend.rank(),
            num_threads: 2,
            pz: 0,
            zl: 0,
            zu: 0,
            nx: 4,
            ny: 4,
            nz: 4,
            npx: 2,
            npy: 1,
            npz: 1,
        })
        .expect("geometry");
        let problem =
            generate_problem(&context.backend, &geom, ProblemOutputs::default()).expect("generation");
        let mut a = problem.matrix;
        let b = problem.rhs.expect("rhs");
        let mut x = problem.initial_guess.expect("initial guess");
        context.transport.setup(&mut a);
        let mut data = CgWorkspace::new(&a);
        let jacobi = JacobiPreconditioner::from_matrix(&a);
        let backend = &context.backend;
        let result = backend.install(|| {
            conjugate_gradient(
                backend,
                &a,
                &mut context.transport,
                &mut data,
                &b,
                &mut x,
                CgOptions {
                    max_iter: 100,
                    tolerance: 1e-8,
                },
                Some(&jacobi as &dyn Preconditioner),
            )
        });
        (result.iterations, result.final_residual)
    })
    .expect("cluster");

    assert_eq!(results[0].0, results[1].0);
    assert!((results[0].1 - results[1].1).abs() <= f64::EPSILON * results[0].1.abs().max(1.0));
}
