#![cfg(test)]

use super::backend::{ExecutionBackend, ReadySum};
use super::geometry::{generate_geometry, Geometry, GeometryParams};
use super::matrix::{ColumnRef, STENCIL_POINTS};
use super::problem::{generate_problem, GeneratedProblem, ProblemError, ProblemOutputs};

/// Identity-collective backend standing in for one worker of a larger run,
/// so a single test can inspect that worker's local partition.
struct FakeWorker {
    rank: usize,
    size: usize,
}

impl ExecutionBackend for FakeWorker {
    type Pending = ReadySum;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
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

fn single_geometry(nx: usize, ny: usize, nz: usize) -> Geometry {
    generate_geometry(&GeometryParams {
        size: 1,
        rank: 0,
        num_threads: 1,
        pz: 0,
        zl: 0,
        zu: 0,
        nx,
        ny,
        nz,
        npx: 1,
        npy: 1,
        npz: 1,
    })
    .expect("geometry")
}

fn generate_single(nx: usize, ny: usize, nz: usize) -> GeneratedProblem {
    let backend = FakeWorker { rank: 0, size: 1 };
    let geom = single_geometry(nx, ny, nz);
    generate_problem(&backend, &geom, ProblemOutputs::default()).expect("generation")
}

#[test]
fn boundary_and_interior_counts() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    assert_eq!(a.local_rows, 64);
    assert_eq!(a.boundary_rows.len(), 56);
    let interior = (0..a.local_rows)
        .filter(|&row| a.row_nnz(row) == STENCIL_POINTS)
        .count();
    assert_eq!(interior, 8);
}

#[test]
fn interior_rows_carry_the_full_stencil() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    for iz in 1..3 {
        for iy in 1..3 {
            for ix in 1..3 {
                let row = iz * 16 + iy * 4 + ix;
                assert_eq!(a.row_nnz(row), 27);
                assert_eq!(a.diagonal_value(row), 26.0);
                let values = a.row_values(row);
                let offdiag = values.iter().filter(|&&v| v == -1.0).count();
                assert_eq!(offdiag, 26, "row {row} off-diagonals");
                match a.row_cols(row)[13] {
                    ColumnRef::Local(center) => assert_eq!(center as usize, row),
                    ColumnRef::Remote(_) => panic!("interior row {row} cannot be remote"),
                }
            }
        }
    }
}

#[test]
fn boundary_rows_clip_without_losing_the_diagonal() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    for &row in &a.boundary_rows {
        let nnz = a.row_nnz(row);
        assert!((8..27).contains(&nnz), "row {row} has {nnz} nonzeros");
        assert_eq!(a.diagonal_value(row), 26.0, "row {row} diagonal");
    }
    // Corners keep exactly 2x2x2 entries.
    assert_eq!(a.row_nnz(0), 8);
    assert_eq!(a.row_nnz(63), 8);
}

#[test]
fn rhs_matches_row_degree() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    let b = problem.rhs.expect("rhs");
    for (row, &bv) in b.as_slice().iter().enumerate() {
        assert_eq!(bv, 26.0 - (a.row_nnz(row) as f64 - 1.0), "rhs of row {row}");
    }
    let x0 = problem.initial_guess.expect("initial guess");
    assert!(x0.as_slice().iter().all(|&v| v == 0.0));
    let ones = problem.exact_solution.expect("exact solution");
    assert!(ones.as_slice().iter().all(|&v| v == 1.0));
}

#[test]
fn outputs_can_be_skipped() {
    let backend = FakeWorker { rank: 0, size: 1 };
    let geom = single_geometry(3, 3, 3);
    let problem = generate_problem(
        &backend,
        &geom,
        ProblemOutputs {
            rhs: true,
            initial_guess: false,
            exact_solution: false,
        },
    )
    .expect("generation");
    assert!(problem.rhs.is_some());
    assert!(problem.initial_guess.is_none());
    assert!(problem.exact_solution.is_none());
}

#[test]
fn global_to_local_covers_exactly_the_boundary() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    assert_eq!(a.global_to_local.len(), a.boundary_rows.len());
    for &row in &a.boundary_rows {
        assert_eq!(a.global_to_local[&a.local_to_global[row]], row);
    }
    // Interior rows are never referenced from outside this worker.
    let center = 1 * 16 + 1 * 4 + 1;
    assert!(!a.global_to_local.contains_key(&a.local_to_global[center]));
}

#[test]
fn degenerate_extents_do_not_underflow() {
    let problem = generate_single(2, 2, 2);
    let a = &problem.matrix;
    assert_eq!(a.boundary_rows.len(), 8);
    for row in 0..8 {
        assert_eq!(a.row_nnz(row), 8);
        assert_eq!(a.diagonal_value(row), 26.0);
    }
    let b = problem.rhs.expect("rhs");
    assert!(b.as_slice().iter().all(|&v| v == 19.0));

    let tiny = generate_single(1, 1, 1);
    assert_eq!(tiny.matrix.boundary_rows.len(), 1);
    assert_eq!(tiny.matrix.row_nnz(0), 1);
    assert_eq!(tiny.matrix.diagonal_value(0), 26.0);
}

#[test]
fn nonzero_totals_are_consistent() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    let per_row: u64 = (0..a.local_rows).map(|row| a.row_nnz(row) as u64).sum();
    assert_eq!(a.local_nonzeros, per_row);
    assert_eq!(a.total_nonzeros, per_row as i64);
    assert_eq!(a.total_rows, 64);
    assert_eq!(a.num_neighbors, 0);
    assert!(a.remote_ref_counts.iter().all(|&c| c == 0));
}

#[test]
fn corner_worker_sees_seven_neighbors() {
    // Rank 0 of a 2x2x2 decomposition of the global 4^3 grid: every local
    // row is boundary, and the worker references all seven other octants.
    let backend = FakeWorker { rank: 0, size: 8 };
    let geom = generate_geometry(&GeometryParams {
        size: 8,
        rank: 0,
        num_threads: 1,
        pz: 0,
        zl: 0,
        zu: 0,
        nx: 2,
        ny: 2,
        nz: 2,
        npx: 2,
        npy: 2,
        npz: 2,
    })
    .expect("geometry");
    let problem = generate_problem(&backend, &geom, ProblemOutputs::default()).expect("generation");
    let a = &problem.matrix;

    assert_eq!(a.boundary_rows.len(), 8);
    assert_eq!(a.num_neighbors, 7);
    assert_eq!(a.remote_ref_counts[0], 0);
    for owner in 1..8 {
        assert!(a.remote_ref_counts[owner] > 0, "neighbor {owner} referenced");
    }

    // The far corner of the local box touches all eight octants: its full
    // stencil survives clipping and most entries live elsewhere.
    let far_corner = 7;
    assert_eq!(a.row_nnz(far_corner), 27);
    let remote = a
        .row_cols(far_corner)
        .iter()
        .filter(|c| matches!(c, ColumnRef::Remote(_)))
        .count();
    assert_eq!(remote, 19);
}

#[test]
fn global_columns_are_strictly_increasing_per_row() {
    let problem = generate_single(4, 4, 4);
    let a = &problem.matrix;
    for row in 0..a.local_rows {
        let cols = a.row_cols_global(row);
        for pair in cols.windows(2) {
            assert!(pair[0] < pair[1], "row {row} columns out of order");
        }
        assert!(cols.contains(&a.local_to_global[row]), "row {row} diagonal column");
    }
}

#[test]
fn oversized_problem_is_rejected_before_allocation() {
    // 431^3 rows push 27 * rows beyond the 32-bit index budget.
    let backend = FakeWorker { rank: 0, size: 1 };
    let geom = single_geometry(431, 431, 431);
    let result = generate_problem(&backend, &geom, ProblemOutputs::default());
    assert!(matches!(result, Err(ProblemError::IndexOverflow)));
}
