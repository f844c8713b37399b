//! High-level benchmark orchestration: geometry, problem generation, halo
//! setup, solve, report.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::backend::ExecutionBackend;
use crate::cg::{self, CgOptions, CgTimings, CgWorkspace};
use crate::geometry::{generate_geometry, GeometryError};
use crate::halo::HaloExchange;
use crate::io::{JobConfig, PreconditionerKind, SolverAlgorithm};
use crate::metrics::{MetricsEvent, MetricsRecorder};
use crate::preconditioner::{JacobiPreconditioner, Preconditioner};
use crate::problem::{generate_problem, ProblemError, ProblemOutputs};
use crate::reference;

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Problem(#[from] ProblemError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Verbose,
}

impl Verbosity {
    fn enabled(self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

/// Result of one benchmark run on one worker. Global quantities (totals,
/// residual norms, iteration count) agree across workers by construction.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workers: usize,
    pub rank: usize,
    pub threads: usize,
    pub grid_nx: usize,
    pub grid_ny: usize,
    pub grid_nz: usize,
    pub npx: usize,
    pub npy: usize,
    pub npz: usize,
    pub total_rows: i64,
    pub total_nonzeros: i64,
    pub local_rows: usize,
    pub local_nonzeros: u64,
    pub boundary_rows: usize,
    pub neighbors: usize,
    pub halo_columns: usize,
    pub algorithm: String,
    pub preconditioned: bool,
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub converged: bool,
    pub timings: CgTimings,
    pub residual_history: Vec<f64>,
    pub generation_seconds: f64,
    pub setup_seconds: f64,
    pub solve_seconds: f64,
    pub total_seconds: f64,
}

/// Run the full benchmark pipeline on this worker inside its thread pool.
pub fn run<B, T>(
    backend: &B,
    transport: &mut T,
    job: &JobConfig,
    verbosity: Verbosity,
    metrics: Option<&MetricsRecorder>,
) -> Result<RunReport, BenchmarkError>
where
    B: ExecutionBackend + Sync,
    T: HaloExchange + Send,
{
    backend.install(|| run_inner(backend, transport, job, verbosity, metrics))
}

fn run_inner<B, T>(
    backend: &B,
    transport: &mut T,
    job: &JobConfig,
    verbosity: Verbosity,
    metrics: Option<&MetricsRecorder>,
) -> Result<RunReport, BenchmarkError>
where
    B: ExecutionBackend,
    T: HaloExchange,
{
    let run_start = Instant::now();
    let params = job.geometry_params(backend.size(), backend.rank(), backend.num_threads());
    let geom = generate_geometry(&params)?;

    let preconditioned = job.solver.preconditioner == PreconditionerKind::Jacobi;
    if verbosity.enabled() && geom.rank == 0 {
        eprintln!(
            "[setup] workers={} threads={} local={}x{}x{} procs={}x{}x{} global={}x{}x{} \
             algorithm={} preconditioned={}",
            geom.size,
            geom.num_threads,
            geom.nx,
            geom.ny,
            geom.nz,
            geom.npx,
            geom.npy,
            geom.npz,
            geom.gnx,
            geom.gny,
            geom.gnz,
            job.solver.algorithm.name(),
            preconditioned,
        );
    }
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::RunStart {
            workers: geom.size,
            threads: geom.num_threads,
            grid_nx: geom.nx,
            grid_ny: geom.ny,
            grid_nz: geom.nz,
            npx: geom.npx,
            npy: geom.npy,
            npz: geom.npz,
            max_iter: job.solver.max_iter,
            tolerance: job.solver.tolerance,
            algorithm: job.solver.algorithm.name(),
            preconditioned,
        });
    }

    let gen_start = Instant::now();
    let generated = generate_problem(backend, &geom, ProblemOutputs::default())?;
    let generation_seconds = gen_start.elapsed().as_secs_f64();
    let mut matrix = generated.matrix;
    let b = generated.rhs.expect("rhs requested from the generator");
    let mut x = generated
        .initial_guess
        .expect("initial guess requested from the generator");

    if verbosity.enabled() && geom.rank == 0 {
        eprintln!(
            "[generate] rows={} nonzeros={} boundary_rows={} neighbors={} elapsed={:.3}s",
            matrix.local_rows,
            matrix.local_nonzeros,
            matrix.boundary_rows.len(),
            matrix.num_neighbors,
            generation_seconds,
        );
    }
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::ProblemGenerated {
            local_rows: matrix.local_rows,
            local_nonzeros: matrix.local_nonzeros,
            total_nonzeros: matrix.total_nonzeros,
            boundary_rows: matrix.boundary_rows.len(),
            neighbors: matrix.num_neighbors,
            duration_ms: generation_seconds * 1000.0,
        });
    }

    let setup_start = Instant::now();
    transport.setup(&mut matrix);
    let setup_seconds = setup_start.elapsed().as_secs_f64();
    let halo_columns = matrix.local_cols - matrix.local_rows;
    if verbosity.enabled() && geom.rank == 0 && geom.size > 1 {
        eprintln!(
            "[halo] halo_columns={} neighbors={} elapsed={:.3}s",
            halo_columns, matrix.num_neighbors, setup_seconds,
        );
    }
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::HaloReady {
            halo_columns,
            neighbors: matrix.num_neighbors,
            duration_ms: setup_seconds * 1000.0,
        });
    }

    let mut workspace = CgWorkspace::new(&matrix);
    let jacobi = preconditioned.then(|| JacobiPreconditioner::from_matrix(&matrix));
    let preconditioner = jacobi.as_ref().map(|m| m as &dyn Preconditioner);
    let opts = CgOptions {
        max_iter: job.solver.max_iter,
        tolerance: job.solver.tolerance,
    };

    let solve_start = Instant::now();
    let result = match job.solver.algorithm {
        SolverAlgorithm::Overlapped => cg::conjugate_gradient(
            backend,
            &matrix,
            transport,
            &mut workspace,
            &b,
            &mut x,
            opts,
            preconditioner,
        ),
        SolverAlgorithm::Reference => reference::conjugate_gradient_ref(
            backend,
            &matrix,
            transport,
            &mut workspace,
            &b,
            &mut x,
            opts,
            preconditioner,
        ),
    };
    let solve_seconds = solve_start.elapsed().as_secs_f64();
    let converged = result.final_residual <= opts.tolerance * result.initial_residual;

    if verbosity.enabled() && geom.rank == 0 {
        eprintln!(
            "[solve] iterations={} normr0={:.6e} normr={:.6e} converged={} elapsed={:.3}s",
            result.iterations, result.initial_residual, result.final_residual, converged,
            solve_seconds,
        );
    }
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::SolveDone {
            iterations: result.iterations,
            initial_residual: result.initial_residual,
            final_residual: result.final_residual,
            converged,
            duration_ms: solve_seconds * 1000.0,
            time_dot: result.timings.dot,
            time_vector_update: result.timings.vector_update,
            time_spmv: result.timings.spmv,
            time_allreduce: result.timings.allreduce,
            time_preconditioner: result.timings.preconditioner,
        });
    }

    let total_seconds = run_start.elapsed().as_secs_f64();
    if verbosity.enabled() && geom.rank == 0 {
        eprintln!("[done] total={:.3}s", total_seconds);
    }
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::RunDone {
            duration_ms: total_seconds * 1000.0,
        });
    }

    Ok(RunReport {
        workers: geom.size,
        rank: geom.rank,
        threads: geom.num_threads,
        grid_nx: geom.nx,
        grid_ny: geom.ny,
        grid_nz: geom.nz,
        npx: geom.npx,
        npy: geom.npy,
        npz: geom.npz,
        total_rows: matrix.total_rows,
        total_nonzeros: matrix.total_nonzeros,
        local_rows: matrix.local_rows,
        local_nonzeros: matrix.local_nonzeros,
        boundary_rows: matrix.boundary_rows.len(),
        neighbors: matrix.num_neighbors,
        halo_columns,
        algorithm: job.solver.algorithm.name().to_string(),
        preconditioned,
        iterations: result.iterations,
        initial_residual: result.initial_residual,
        final_residual: result.final_residual,
        converged,
        timings: result.timings,
        residual_history: result.residual_history,
        generation_seconds,
        setup_seconds,
        solve_seconds,
        total_seconds,
    })
}
