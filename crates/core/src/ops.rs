//! Local vector and sparse-matrix kernels shared by both CG solvers.
//!
//! Every kernel runs data-parallel over disjoint row ranges inside the
//! caller's installed thread pool. Kernels returning an `f64` produce this
//! worker's partial value of a global accumulation; the caller reduces it
//! across workers.

use rayon::prelude::*;

use crate::halo::HaloExchange;
use crate::matrix::{ColumnRef, SparseMatrix};
use crate::vector::Vector;

/// dst = src over the source extent; halo slots of a longer dst are kept.
pub fn copy(src: &Vector, dst: &mut Vector) {
    let n = src.len();
    dst.as_mut_slice()[..n].copy_from_slice(src.as_slice());
}

/// Local partial of the dot product over the shorter extent.
pub fn dot_local(x: &Vector, y: &Vector) -> f64 {
    let n = x.len().min(y.len());
    x.as_slice()[..n]
        .par_iter()
        .zip(y.as_slice()[..n].par_iter())
        .map(|(a, b)| a * b)
        .sum()
}

/// y += alpha * x over the extent of y.
pub fn axpy(alpha: f64, x: &Vector, y: &mut Vector) {
    let n = y.len();
    y.as_mut_slice()
        .par_iter_mut()
        .zip(x.as_slice()[..n].par_iter())
        .for_each(|(y, x)| *y += alpha * x);
}

/// y = beta * y + x over the extent of x.
pub fn xpby(x: &Vector, beta: f64, y: &mut Vector) {
    let n = x.len();
    y.as_mut_slice()[..n]
        .par_iter_mut()
        .zip(x.as_slice().par_iter())
        .for_each(|(y, x)| *y = beta * *y + x);
}

/// p = z fused with the local partial of <r,z> (first CG iteration).
pub fn seed_direction(z: &Vector, r: &Vector, p: &mut Vector) -> f64 {
    let n = z.len();
    p.as_mut_slice()[..n]
        .par_iter_mut()
        .zip(z.as_slice().par_iter().zip(r.as_slice().par_iter()))
        .map(|(p, (z, r))| {
            *p = *z;
            r * z
        })
        .sum()
}

/// r = b - ax fused with the local partial of the residual norm squared.
pub fn initial_residual(b: &Vector, ax: &Vector, r: &mut Vector) -> f64 {
    r.as_mut_slice()
        .par_iter_mut()
        .zip(b.as_slice().par_iter().zip(ax.as_slice().par_iter()))
        .map(|(r, (b, ax))| {
            *r = b - ax;
            *r * *r
        })
        .sum()
}

/// r -= alpha * ap fused with the local partial of the new norm squared.
pub fn update_residual(alpha: f64, ap: &Vector, r: &mut Vector) -> f64 {
    r.as_mut_slice()
        .par_iter_mut()
        .zip(ap.as_slice().par_iter())
        .map(|(r, ap)| {
            *r -= alpha * ap;
            *r * *r
        })
        .sum()
}

/// ap = A * p. Runs the halo exchange first; resolving remote values is the
/// product's concern, not the solver loop's.
pub fn spmv<T: HaloExchange>(a: &SparseMatrix, transport: &mut T, p: &mut Vector, ap: &mut Vector) {
    transport.exchange(p);
    let p = p.as_slice();
    ap.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(row, out)| *out = apply_row(a, row, p));
}

/// ap = A * p fused with the local partial of <p, A p>.
pub fn spmv_dot<T: HaloExchange>(
    a: &SparseMatrix,
    transport: &mut T,
    p: &mut Vector,
    ap: &mut Vector,
) -> f64 {
    transport.exchange(p);
    let p = p.as_slice();
    ap.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .map(|(row, out)| {
            let sum = apply_row(a, row, p);
            *out = sum;
            sum * p[row]
        })
        .sum()
}

#[inline]
fn apply_row(a: &SparseMatrix, row: usize, p: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (col, value) in a.row_cols(row).iter().zip(a.row_values(row)) {
        match *col {
            ColumnRef::Local(j) => sum += value * p[j as usize],
            ColumnRef::Remote(owner) => unresolved_column(owner),
        }
    }
    sum
}

#[cold]
fn unresolved_column(owner: u32) -> ! {
    panic!("unresolved column owned by worker {owner}; halo setup must run before the matrix is applied")
}
