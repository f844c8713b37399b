//! Reference conjugate gradient: same convergence semantics as the
//! optimized solver, without the latency-hiding overlap or fused kernels.
//! Selected by configuration, not by a runtime error.

use std::time::Instant;

use log::warn;

use crate::backend::ExecutionBackend;
use crate::cg::{CgOptions, CgResult, CgTimings, CgWorkspace};
use crate::halo::HaloExchange;
use crate::matrix::SparseMatrix;
use crate::ops;
use crate::preconditioner::Preconditioner;
use crate::vector::Vector;

const CONFIRMATION_CAP: usize = 50;
const TOLERANCE_SLACK: f64 = 1e-6;

#[allow(clippy::too_many_arguments)]
pub fn conjugate_gradient_ref<B, T>(
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
            ops::copy(&data.z, &mut data.p);
            t.vector_update += seconds(t0);
            let t0 = Instant::now();
            let local = ops::dot_local(&data.r, &data.z);
            t.dot += seconds(t0);
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
        ops::spmv(a, transport, &mut data.p, &mut data.ap);
        t.spmv += seconds(t0);
        let t0 = Instant::now();
        let local = ops::dot_local(&data.p, &data.ap);
        t.dot += seconds(t0);
        let t0 = Instant::now();
        let pap = backend.allreduce_sum(local);
        t.allreduce += seconds(t0);

        let alpha = rtz / pap;

        let t0 = Instant::now();
        ops::axpy(alpha, &data.p, x);
        ops::axpy(-alpha, &data.ap, &mut data.r);
        t.vector_update += seconds(t0);

        let t0 = Instant::now();
        let local = ops::dot_local(&data.r, &data.r);
        t.dot += seconds(t0);
        let t0 = Instant::now();
        normr = backend.allreduce_sum(local).sqrt();
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
