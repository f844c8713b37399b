//! Halo exchange contract between the solver and a transport.

use crate::matrix::SparseMatrix;
use crate::vector::Vector;

/// Moves boundary-row values between neighboring workers. `setup` resolves
/// the matrix's remote column references onto halo slots; `exchange` fills
/// those slots before each matrix-vector product. The wire representation
/// is the transport's concern, not the solver's.
pub trait HaloExchange {
    fn setup(&mut self, a: &mut SparseMatrix);

    /// Fill the halo slots of `x` (indices at and above the row extent)
    /// with the owning workers' current values.
    fn exchange(&mut self, x: &mut Vector);
}

/// Single-worker transport: nothing to move.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransport;

impl HaloExchange for NoTransport {
    fn setup(&mut self, a: &mut SparseMatrix) {
        debug_assert_eq!(
            a.num_neighbors, 0,
            "single-worker matrix must not reference remote columns"
        );
        let _ = a;
    }

    fn exchange(&mut self, _x: &mut Vector) {}
}
