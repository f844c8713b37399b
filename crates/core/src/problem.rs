//! Parallel generation of the 27-point stencil system on this worker's
//! sub-grid.
//!
//! Interior rows (full stencil contained in the local box) take an
//! unconditional fast path: all 27 offsets in closed form, no clipping and
//! no ownership lookups. Boundary rows clip the stencil to the global grid
//! and resolve each surviving column's owner; columns owned elsewhere are
//! recorded as tagged remote references for a halo transport to resolve.

use std::collections::HashMap;

use log::error;
use rayon::prelude::*;
use thiserror::Error;

use crate::backend::ExecutionBackend;
use crate::geometry::{rank_of_global_row, Geometry, GlobalIndex};
use crate::matrix::{ColumnRef, SparseMatrix, LOCAL_INDEX_LIMIT, STENCIL_POINTS};
use crate::vector::Vector;

#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("a worker's nonzero count overflows the 32-bit local index width")]
    IndexOverflow,

    #[error("global row count overflows the global index width")]
    GlobalRowOverflow,

    #[error("total nonzero count is non-positive ({0}), global index overflow")]
    NonPositiveNonzeros(GlobalIndex),
}

/// Which vectors to produce alongside the matrix.
#[derive(Debug, Clone, Copy)]
pub struct ProblemOutputs {
    pub rhs: bool,
    pub initial_guess: bool,
    pub exact_solution: bool,
}

impl Default for ProblemOutputs {
    fn default() -> Self {
        Self {
            rhs: true,
            initial_guess: true,
            exact_solution: true,
        }
    }
}

pub struct GeneratedProblem {
    pub matrix: SparseMatrix,
    /// b, chosen so that A multiplied by the all-ones vector equals b.
    pub rhs: Option<Vector>,
    /// All-zero starting point for the solver.
    pub initial_guess: Option<Vector>,
    /// The all-ones exact solution.
    pub exact_solution: Option<Vector>,
}

pub fn generate_problem<B: ExecutionBackend>(
    backend: &B,
    geom: &Geometry,
    outputs: ProblemOutputs,
) -> Result<GeneratedProblem, ProblemError> {
    let (nx, ny, nz) = (geom.nx, geom.ny, geom.nz);
    let local_rows = nx * ny * nz;

    let total_rows = geom
        .gnx
        .checked_mul(geom.gny)
        .and_then(|v| v.checked_mul(geom.gnz))
        .filter(|v| *v > 0)
        .ok_or(ProblemError::GlobalRowOverflow)?;

    // Agree on the local index budget across all workers before anything is
    // allocated; continuing with inconsistent matrix shapes anywhere would
    // be unsafe, so every worker takes the same error path.
    let nnz_budget = (STENCIL_POINTS as u64) * (local_rows as u64);
    let local_ok = local_rows > 0 && nnz_budget <= LOCAL_INDEX_LIMIT;
    if !backend.allreduce_and(local_ok) {
        if backend.rank() == 0 {
            error!(
                "a worker overflowed its local nonzero count; the problem is too large for \
                 32-bit local indices"
            );
        }
        return Err(ProblemError::IndexOverflow);
    }

    let arena = local_rows * STENCIL_POINTS;
    let mut nnz_in_row = vec![0u8; local_rows];
    let mut diag_offset = vec![0u8; local_rows];
    let mut local_to_global = vec![0 as GlobalIndex; local_rows];
    let mut cols_local = vec![ColumnRef::Local(0); arena];
    let mut cols_global = vec![0 as GlobalIndex; arena];
    let mut values = vec![0.0f64; arena];

    let boundary_rows = enumerate_boundary_rows(nx, ny, nz);

    // Fill every row in parallel; each execution unit owns a disjoint set of
    // rows, so only the nonzero counter needs reduction semantics.
    values
        .par_chunks_mut(STENCIL_POINTS)
        .zip(cols_local.par_chunks_mut(STENCIL_POINTS))
        .zip(cols_global.par_chunks_mut(STENCIL_POINTS))
        .zip(nnz_in_row.par_iter_mut())
        .zip(diag_offset.par_iter_mut())
        .zip(local_to_global.par_iter_mut())
        .enumerate()
        .for_each(|(row, (((((vals, cl), cg), nnz), diag), l2g))| {
            let ix = row % nx;
            let iy = row / nx % ny;
            let iz = row / (nx * ny);
            let gix = geom.gix0 + ix as GlobalIndex;
            let giy = geom.giy0 + iy as GlobalIndex;
            let giz = geom.giz0 + iz as GlobalIndex;
            let global_row = giz * geom.gnx * geom.gny + giy * geom.gnx + gix;
            *l2g = global_row;

            let interior = ix > 0
                && ix < nx - 1
                && iy > 0
                && iy < ny - 1
                && iz > 0
                && iz < nz - 1;
            if interior {
                fill_interior_row(row, global_row, geom, vals, cl, cg, nnz, diag);
            } else {
                fill_boundary_row(row, global_row, gix, giy, giz, geom, vals, cl, cg, nnz, diag);
            }
        });

    let local_nonzeros: u64 = nnz_in_row.par_iter().map(|&n| n as u64).sum();

    // Remote bookkeeping and the boundary-only inverse row map, off the
    // finished boundary rows.
    let mut remote_ref_counts = vec![0u64; geom.size];
    let mut global_to_local = HashMap::with_capacity(boundary_rows.len());
    for &row in &boundary_rows {
        let base = row * STENCIL_POINTS;
        for k in 0..nnz_in_row[row] as usize {
            if let ColumnRef::Remote(owner) = cols_local[base + k] {
                remote_ref_counts[owner as usize] += 1;
            }
        }
        global_to_local.insert(local_to_global[row], row);
    }
    let num_neighbors = remote_ref_counts.iter().filter(|&&count| count > 0).count();

    // Grand total over all workers; a non-positive sum signals overflow.
    let total_nonzeros = backend.allreduce_sum_u64(local_nonzeros) as GlobalIndex;
    if total_nonzeros <= 0 {
        return Err(ProblemError::NonPositiveNonzeros(total_nonzeros));
    }

    let matrix = SparseMatrix {
        geom: geom.clone(),
        total_rows,
        total_nonzeros,
        local_rows,
        local_cols: local_rows,
        local_nonzeros,
        nnz_in_row,
        cols_local,
        cols_global,
        values,
        diag_offset,
        local_to_global,
        global_to_local,
        boundary_rows,
        remote_ref_counts,
        num_neighbors,
    };

    // The right-hand side makes the all-ones vector the exact solution
    // regardless of how many stencil points were clipped per row.
    let rhs = outputs.rhs.then(|| {
        let mut b = Vector::zeros(local_rows);
        b.as_mut_slice()
            .par_iter_mut()
            .zip(matrix.nnz_in_row.par_iter())
            .for_each(|(b, &nnz)| *b = 26.0 - (nnz as f64 - 1.0));
        b
    });
    let initial_guess = outputs.initial_guess.then(|| Vector::zeros(local_rows));
    let exact_solution = outputs.exact_solution.then(|| {
        let mut ones = Vector::zeros(local_rows);
        ones.fill(1.0);
        ones
    });

    Ok(GeneratedProblem {
        matrix,
        rhs,
        initial_guess,
        exact_solution,
    })
}

/// Surface of the nx-by-ny-by-nz box, each cell exactly once: bottom plane,
/// one ring per intermediate plane, top plane. Degenerate extents (any
/// dimension of 1 or 2) leave no interior and must not underflow.
fn enumerate_boundary_rows(nx: usize, ny: usize, nz: usize) -> Vec<usize> {
    let interior =
        nx.saturating_sub(2) * ny.saturating_sub(2) * nz.saturating_sub(2);
    let mut rows = Vec::with_capacity(nx * ny * nz - interior);
    let plane = nx * ny;

    for y in 0..ny {
        for x in 0..nx {
            rows.push(y * nx + x);
        }
    }
    for z in 1..nz.saturating_sub(1) {
        let base = z * plane;
        for x in 0..nx {
            rows.push(base + x);
        }
        for y in 1..ny - 1 {
            rows.push(base + y * nx);
            if nx > 1 {
                rows.push(base + y * nx + nx - 1);
            }
        }
        if ny > 1 {
            for x in 0..nx {
                rows.push(base + (ny - 1) * nx + x);
            }
        }
    }
    if nz > 1 {
        for y in 0..ny {
            for x in 0..nx {
                rows.push((nz - 1) * plane + y * nx + x);
            }
        }
    }
    rows
}

/// Interior rows carry the full stencil: all 26 neighbors are present
/// locally by definition, so no clipping and no ownership lookups.
#[allow(clippy::too_many_arguments)]
fn fill_interior_row(
    row: usize,
    global_row: GlobalIndex,
    geom: &Geometry,
    vals: &mut [f64],
    cl: &mut [ColumnRef],
    cg: &mut [GlobalIndex],
    nnz: &mut u8,
    diag: &mut u8,
) {
    let local_plane = (geom.nx * geom.ny) as GlobalIndex;
    let global_plane = geom.gnx * geom.gny;
    let mut k = 0;
    for sz in -1..=1 {
        for sy in -1..=1 {
            for sx in -1..=1 {
                let offset = sz * local_plane + sy * geom.nx as GlobalIndex + sx;
                cl[k] = ColumnRef::Local((row as GlobalIndex + offset) as u32);
                cg[k] = global_row + sz * global_plane + sy * geom.gnx + sx;
                vals[k] = -1.0;
                k += 1;
            }
        }
    }
    vals[13] = 26.0;
    *diag = 13;
    *nnz = STENCIL_POINTS as u8;
}

/// Boundary rows clip the stencil to the global grid; a corner of the
/// domain keeps as few as 8 entries. The diagonal is present regardless of
/// clipping, matching the interior convention.
#[allow(clippy::too_many_arguments)]
fn fill_boundary_row(
    row: usize,
    global_row: GlobalIndex,
    gix: GlobalIndex,
    giy: GlobalIndex,
    giz: GlobalIndex,
    geom: &Geometry,
    vals: &mut [f64],
    cl: &mut [ColumnRef],
    cg: &mut [GlobalIndex],
    nnz: &mut u8,
    diag: &mut u8,
) {
    let local_plane = (geom.nx * geom.ny) as GlobalIndex;
    let global_plane = geom.gnx * geom.gny;

    let sz_begin = (-1).max(-giz);
    let sz_end = 1.min(geom.gnz - giz - 1);
    let sy_begin = (-1).max(-giy);
    let sy_end = 1.min(geom.gny - giy - 1);
    let sx_begin = (-1).max(-gix);
    let sx_end = 1.min(geom.gnx - gix - 1);

    let mut k = 0;
    for sz in sz_begin..=sz_end {
        for sy in sy_begin..=sy_end {
            for sx in sx_begin..=sx_end {
                let global_col = global_row + sz * global_plane + sy * geom.gnx + sx;
                if global_col == global_row {
                    *diag = k as u8;
                    vals[k] = 26.0;
                } else {
                    vals[k] = -1.0;
                }
                cg[k] = global_col;
                let owner = rank_of_global_row(geom, global_col);
                if owner == geom.rank {
                    let local_col =
                        row as GlobalIndex + sz * local_plane + sy * geom.nx as GlobalIndex + sx;
                    cl[k] = ColumnRef::Local(local_col as u32);
                } else {
                    cl[k] = ColumnRef::Remote(owner as u32);
                }
                k += 1;
            }
        }
    }
    *nnz = k as u8;
}
