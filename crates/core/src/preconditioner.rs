//! Preconditioner contract and the diagonal-scaling implementation.

use rayon::prelude::*;

use crate::matrix::SparseMatrix;
use crate::vector::Vector;

/// Linear, symmetric positive-definite approximation of the inverse
/// operator, applied to the residual each iteration. Implementations must
/// be deterministic for a given matrix and input.
pub trait Preconditioner {
    fn apply(&self, a: &SparseMatrix, r: &Vector, z: &mut Vector);
}

/// Jacobi preconditioner: z_i = r_i / a_ii.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inverse_diagonal: Vec<f64>,
}

impl JacobiPreconditioner {
    pub fn from_matrix(a: &SparseMatrix) -> Self {
        Self {
            inverse_diagonal: (0..a.local_rows).map(|row| 1.0 / a.diagonal_value(row)).collect(),
        }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, _a: &SparseMatrix, r: &Vector, z: &mut Vector) {
        z.as_mut_slice()
            .par_iter_mut()
            .zip(r.as_slice().par_iter().zip(self.inverse_diagonal.par_iter()))
            .for_each(|(z, (r, scale))| *z = r * scale);
    }
}
