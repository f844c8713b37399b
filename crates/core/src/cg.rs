//! Preconditioned conjugate gradient with communication/computation
//! overlap.
//!
//! One non-blocking reduction per iteration carries the residual norm; the
//! solution update runs while it is in flight, since that work does not
//! depend on the reduction's result. The convergence decision always comes
//! from the globally reduced norm, so every worker makes the identical
//! decision and the collective call counts stay in lockstep.

use std::time::Instant;

use log::warn;
use serde::Serialize;

use crate::backend::{ExecutionBackend, PendingReduction};
use crate::halo::HaloExchange;
use crate::matrix::SparseMatrix;
use crate::ops;
use crate::preconditioner::Preconditioner;
use crate::vector::Vector;

/// Hard cap on the iteration count once the tolerance has been met,
/// independent of `max_iter`: the solver confirms convergence is stable
/// instead of stopping at the first crossing.
const CONFIRMATION_CAP: usize = 50;

/// Slack accepted on the initial convergence check: six significant digits
/// of the tolerance.
const TOLERANCE_SLACK: f64 = 1e-6;

/// Solver work vectors, allocated once per solve and reused across
/// iterations. The direction vector spans the column extent so the halo
/// exchange has somewhere to land.
pub struct CgWorkspace {
    pub r: Vector,
    pub z: Vector,
    pub p: Vector,
    pub ap: Vector,
}

impl CgWorkspace {
    pub fn new(a: &SparseMatrix) -> Self {
        Self {
            r: Vector::zeros(a.local_rows),
            z: Vector::zeros(a.local_rows),
            p: Vector::zeros(a.local_cols),
            ap: Vector::zeros(a.local_rows),
        }
    }
}

/// Elapsed seconds per computational phase.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CgTimings {
    pub total: f64,
    pub dot: f64,
    pub vector_update: f64,
    pub spmv: f64,
    pub allreduce: f64,
    pub preconditioner: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CgOptions {
    pub max_iter: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CgResult {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub timings: CgTimings,
    /// Residual norm after each iteration.
    pub residual_history: Vec<f64>,
}

/// Iteratively refine `x` in place toward the solution of `A x = b`.
#[allow(clippy::too_many_arguments)]
pub fn conjugate_gradient<B, T>(
    backend: &B,
    a: &SparseMatrix,
    transport: &mut T,
    data: &mut CgWorkspace,
    b: &Vector,
    x: &mut Vector,
    opts: CgOptions,
    preconditioner: Option<&dyn Preconditioner>,
) -> CgResult
where
    B: ExecutionBackend,
    T: HaloExchange,
{
    let t_begin = Instant::now();
    let mut t = CgTimings::default();

    if preconditioner.is_none() && a.geom.rank == 0 {
        warn!("performing unpreconditioned iterations");
    }

    let mut history = Vec::new();

    // r = b - A*x0. For the usual all-zero initial guess this is exactly
    // r = b, at the cost of one extra product.
    let t0 = Instant::now();
    ops::copy(x, &mut data.p);
    t.vector_update += seconds(t0);
    let t0 = Instant::now();
    ops::spmv(a, transport, &mut data.p, &mut data.ap);
    t.spmv += seconds(t0);
    let t0 = Instant::now();
    let local = ops::initial_residual(b, &data.ap, &mut data.r);
    t.vector_update += seconds(t0);

    let t0 = Instant::now();
    let mut normr = backend.allreduce_sum(local).sqrt();
    let normr0 = normr;
    let mut stop = normr / normr0 - opts.tolerance * (1.0 + TOLERANCE_SLACK);
    t.allreduce += seconds(t0);

    let mut converged = stop <= 0.0;
    let mut rtz = 0.0;
    let mut iterations = 0;

    let mut k = 1;
    while (k <= opts.max_iter && stop >= f64::EPSILON) || (converged && k <= CONFIRMATION_CAP) {
        let t0 = Instant::now();
        match preconditioner {
            Some(m) => m.apply(a, &data.r, &mut data.z),
            None => ops::copy(&data.r, &mut data.z),
        }
        t.preconditioner += seconds(t0);

        if k == 1 {
            let t0 = Instant::now();
            let local = ops::seed_direction(&data.z, &data.r, &mut data.p);
            t.vector_update += seconds(t0);
            let t0 = Instant::now();
            rtz = backend.allreduce_sum(local);
            t.allreduce += seconds(t0);
        } else {
            let t0 = Instant::now();
            let local = ops::dot_local(&data.r, &data.z);
            t.dot += seconds(t0);
            let t0 = Instant::now();
            let oldrtz = rtz;
            rtz = backend.allreduce_sum(local);
            let beta = rtz / oldrtz;
            t.allreduce += seconds(t0);
            let t0 = Instant::now();
            ops::xpby(&data.z, beta, &mut data.p);
            t.vector_update += seconds(t0);
        }

        let t0 = Instant::now();
        let local = ops::spmv_dot(a, transport, &mut data.p, &mut data.ap);
        t.spmv += seconds(t0);
        let t0 = Instant::now();
        let pap = backend.allreduce_sum(local);
        t.allreduce += seconds(t0);

        let alpha = rtz / pap;

        let t0 = Instant::now();
        let local = ops::update_residual(alpha, &data.ap, &mut data.r);
        t.vector_update += seconds(t0);

        // Start the norm reduction, update x while it is in flight, then
        // wait: the update is independent of the reduction's result.
        let t0 = Instant::now();
        let pending = backend.allreduce_sum_start(local);
        ops::axpy(alpha, &data.p, x);
        normr = pending.wait().sqrt();
        stop = normr / normr0 - opts.tolerance;
        if stop <= 0.0 {
            converged = true;
        }
        iterations = k;
        history.push(normr);
        t.allreduce += seconds(t0);

        k += 1;
    }

    t.total = t_begin.elapsed().as_secs_f64();
    CgResult {
        iterations,
        initial_residual: normr0,
        final_residual: normr,
        timings: t,
        residual_history: history,
    }
}

fn seconds(t0: Instant) -> f64 {
    t0.elapsed().as_secs_f64()
}
