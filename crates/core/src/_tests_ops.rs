#![cfg(test)]

use super::backend::{ExecutionBackend, ReadySum};
use super::geometry::{generate_geometry, GeometryParams};
use super::halo::NoTransport;
use super::ops;
use super::problem::{generate_problem, GeneratedProblem, ProblemOutputs};
use super::vector::Vector;

struct Solo;

impl ExecutionBackend for Solo {
    type Pending = ReadySum;

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn num_threads(&self) -> usize {
        1
    }

    fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        op()
    }

    fn allreduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn allreduce_sum_u64(&self, value: u64) -> u64 {
        value
    }

    fn allreduce_and(&self, value: bool) -> bool {
        value
    }

    fn allreduce_sum_start(&self, value: f64) -> ReadySum {
        ReadySum(value)
    }
}

fn generate(nx: usize, size: usize, rank: usize, np: usize) -> GeneratedProblem {
    let geom = generate_geometry(&GeometryParams {
        size,
        rank,
        num_threads: 1,
        pz: 0,
        zl: 0,
        zu: 0,
        nx,
        ny: nx,
        nz: nx,
        npx: np,
        npy: np,
        npz: np,
    })
    .expect("geometry");
    generate_problem(&Solo, &geom, ProblemOutputs::default()).expect("generation")
}

#[test]
fn dot_and_axpy_basics() {
    let x = Vector::from_vec(vec![1.0, 2.0, 3.0]);
    let y = Vector::from_vec(vec![4.0, 5.0, 6.0]);
    assert_eq!(ops::dot_local(&x, &y), 32.0);

    let mut y = y;
    ops::axpy(2.0, &x, &mut y);
    assert_eq!(y.as_slice(), &[6.0, 9.0, 12.0]);

    ops::xpby(&x, 0.5, &mut y);
    assert_eq!(y.as_slice(), &[4.0, 6.5, 9.0]);
}

#[test]
fn fused_kernels_report_their_partials() {
    let z = Vector::from_vec(vec![1.0, -2.0]);
    let r = Vector::from_vec(vec![3.0, 4.0]);
    let mut p = Vector::zeros(2);
    let rtz = ops::seed_direction(&z, &r, &mut p);
    assert_eq!(p.as_slice(), z.as_slice());
    assert_eq!(rtz, 1.0 * 3.0 + (-2.0) * 4.0);

    let ap = Vector::from_vec(vec![1.0, 1.0]);
    let mut r = Vector::from_vec(vec![2.0, 3.0]);
    let norm_sq = ops::update_residual(1.0, &ap, &mut r);
    assert_eq!(r.as_slice(), &[1.0, 2.0]);
    assert_eq!(norm_sq, 5.0);

    let b = Vector::from_vec(vec![5.0, 5.0]);
    let ax = Vector::from_vec(vec![2.0, 1.0]);
    let mut res = Vector::zeros(2);
    let norm_sq = ops::initial_residual(&b, &ax, &mut res);
    assert_eq!(res.as_slice(), &[3.0, 4.0]);
    assert_eq!(norm_sq, 25.0);
}

#[test]
fn spmv_annihilates_the_exact_solution_residual() {
    let problem = generate(4, 1, 0, 1);
    let a = &problem.matrix;
    let b = problem.rhs.expect("rhs");
    let ones = problem.exact_solution.expect("exact solution");

    let mut p = Vector::zeros(a.local_cols);
    ops::copy(&ones, &mut p);
    let mut ax = Vector::zeros(a.local_rows);
    ops::spmv(a, &mut NoTransport, &mut p, &mut ax);

    let mut r = Vector::zeros(a.local_rows);
    let norm_sq = ops::initial_residual(&b, &ax, &mut r);
    assert!(norm_sq < 1e-20, "b - A*ones should vanish, got {norm_sq}");
}

#[test]
fn fused_spmv_dot_matches_the_separate_kernels() {
    let problem = generate(4, 1, 0, 1);
    let a = &problem.matrix;
    let mut p = Vector::zeros(a.local_cols);
    for (i, v) in p.as_mut_slice().iter_mut().enumerate() {
        *v = (i as f64 * 0.37).sin();
    }
    let mut ap_fused = Vector::zeros(a.local_rows);
    let mut p2 = p.clone();
    let fused = ops::spmv_dot(a, &mut NoTransport, &mut p, &mut ap_fused);

    let mut ap_plain = Vector::zeros(a.local_rows);
    ops::spmv(a, &mut NoTransport, &mut p2, &mut ap_plain);
    let plain = ops::dot_local(&p2, &ap_plain);

    assert_eq!(ap_fused.as_slice(), ap_plain.as_slice());
    assert!((fused - plain).abs() < 1e-9 * plain.abs().max(1.0));
}

#[test]
#[should_panic(expected = "unresolved column")]
fn spmv_refuses_unresolved_remote_columns() {
    // One worker's partition of an 8-worker run, applied without any halo
    // setup: the remote references must trip the guard.
    let problem = generate(2, 8, 0, 2);
    let a = &problem.matrix;
    let mut p = Vector::zeros(a.local_cols);
    p.fill(1.0);
    let mut ap = Vector::zeros(a.local_rows);
    ops::spmv(a, &mut NoTransport, &mut p, &mut ap);
}
