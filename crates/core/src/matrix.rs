//! Distributed sparse matrix storage for the 27-point stencil.
//!
//! Rows live in fixed-stride arenas ([`STENCIL_POINTS`] slots per row) with
//! an explicit per-row nonzero count; accessors hand out the populated
//! prefix of each row. Column references are tagged rather than sentinel
//! encoded: a column is either a resolved local id or a row owned by a
//! remote worker that a halo transport must resolve before the matrix can
//! be applied.

use std::collections::HashMap;

use crate::geometry::{Geometry, GlobalIndex};

/// Maximum nonzeros per row: the full 3x3x3 stencil.
pub const STENCIL_POINTS: usize = 27;

/// Budget of the 32-bit local column index width; generation refuses
/// problems whose per-worker nonzero count would exceed it.
pub(crate) const LOCAL_INDEX_LIMIT: u64 = i32::MAX as u64;

/// A single column entry of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef {
    /// Local row id, or a halo slot id once a transport has run setup.
    Local(u32),
    /// Column owned by the given worker; unusable until resolved.
    Remote(u32),
}

/// Local partition of the global stencil matrix. Allocated once by the
/// problem generator and reused across solves.
#[derive(Debug)]
pub struct SparseMatrix {
    pub geom: Geometry,
    pub total_rows: GlobalIndex,
    pub total_nonzeros: GlobalIndex,
    pub local_rows: usize,
    /// Row extent, widened by halo slots after transport setup.
    pub local_cols: usize,
    pub local_nonzeros: u64,
    pub(crate) nnz_in_row: Vec<u8>,
    pub(crate) cols_local: Vec<ColumnRef>,
    pub(crate) cols_global: Vec<GlobalIndex>,
    pub(crate) values: Vec<f64>,
    pub(crate) diag_offset: Vec<u8>,
    /// Global row id of every local row.
    pub local_to_global: Vec<GlobalIndex>,
    /// Inverse mapping for boundary rows only; interior rows are never
    /// referenced from another worker, keeping the map small.
    pub global_to_local: HashMap<GlobalIndex, usize>,
    /// Local ids of the rows on the surface of this worker's sub-grid.
    pub boundary_rows: Vec<usize>,
    /// Per-rank count of references into that worker's rows.
    pub remote_ref_counts: Vec<u64>,
    /// Workers with at least one referenced column.
    pub num_neighbors: usize,
}

impl SparseMatrix {
    pub fn row_nnz(&self, row: usize) -> usize {
        self.nnz_in_row[row] as usize
    }

    pub fn row_values(&self, row: usize) -> &[f64] {
        let base = row * STENCIL_POINTS;
        &self.values[base..base + self.row_nnz(row)]
    }

    pub fn row_cols(&self, row: usize) -> &[ColumnRef] {
        let base = row * STENCIL_POINTS;
        &self.cols_local[base..base + self.row_nnz(row)]
    }

    pub fn row_cols_global(&self, row: usize) -> &[GlobalIndex] {
        let base = row * STENCIL_POINTS;
        &self.cols_global[base..base + self.row_nnz(row)]
    }

    pub fn diagonal_value(&self, row: usize) -> f64 {
        self.values[row * STENCIL_POINTS + self.diag_offset[row] as usize]
    }

    /// Visit every remote column reference as (owner rank, global column).
    /// Only boundary rows can hold remote references.
    pub fn for_each_remote_column(&self, mut visit: impl FnMut(u32, GlobalIndex)) {
        for &row in &self.boundary_rows {
            let base = row * STENCIL_POINTS;
            for k in 0..self.nnz_in_row[row] as usize {
                if let ColumnRef::Remote(owner) = self.cols_local[base + k] {
                    visit(owner, self.cols_global[base + k]);
                }
            }
        }
    }

    /// Rewrite every remote reference to the halo slot chosen by `resolve`
    /// and widen the column extent to `cols`. Called by halo transports
    /// once their receive lists are built.
    pub fn resolve_remote_columns(
        &mut self,
        cols: usize,
        mut resolve: impl FnMut(u32, GlobalIndex) -> u32,
    ) {
        for &row in &self.boundary_rows {
            let base = row * STENCIL_POINTS;
            for k in 0..self.nnz_in_row[row] as usize {
                if let ColumnRef::Remote(owner) = self.cols_local[base + k] {
                    let slot = resolve(owner, self.cols_global[base + k]);
                    debug_assert!((slot as usize) >= self.local_rows && (slot as usize) < cols);
                    self.cols_local[base + k] = ColumnRef::Local(slot);
                }
            }
        }
        self.local_cols = cols;
    }
}
