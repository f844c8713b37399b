//! Job configuration types.
//!
//! The main type is `JobConfig`, designed for parsing from TOML files by
//! the CLI. All sections except `[grid]` have defaults.
//!
//! # File Format
//!
//! ```toml
//! [grid]
//! nx = 16
//! ny = 16
//! nz = 16
//!
//! [decomposition]
//! workers = 8
//! threads = 2
//! # npx/npy/npz = 0 selects a near-cubic shape automatically
//! npx = 0
//! npy = 0
//! npz = 0
//! # pz != 0 splits the z planes into two slabs of heights zl and zu
//! pz = 0
//!
//! [solver]
//! max_iter = 50
//! tolerance = 0.0
//! preconditioner = "jacobi"
//! algorithm = "overlapped"
//!
//! [metrics]
//! enabled = false
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::GeometryParams;
use crate::metrics::MetricsConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub grid: GridConfig,
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    pub workers: usize,
    /// Execution units per worker; 0 divides the physical cores evenly.
    pub threads: usize,
    /// Process-grid shape; a zero product selects a near-cubic shape.
    pub npx: usize,
    pub npy: usize,
    pub npz: usize,
    /// First z-plane rank of the second slab; 0 keeps slabs uniform.
    pub pz: usize,
    pub zl: usize,
    pub zu: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            threads: 0,
            npx: 0,
            npy: 0,
            npz: 0,
            pz: 0,
            zl: 0,
            zu: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iter: usize,
    pub tolerance: f64,
    pub preconditioner: PreconditionerKind,
    pub algorithm: SolverAlgorithm,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tolerance: 0.0,
            preconditioner: PreconditionerKind::Jacobi,
            algorithm: SolverAlgorithm::Overlapped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreconditionerKind {
    None,
    Jacobi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverAlgorithm {
    /// Fused kernels with the non-blocking norm reduction.
    Overlapped,
    /// Plain kernels, blocking reductions only.
    Reference,
}

impl SolverAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            SolverAlgorithm::Overlapped => "overlapped",
            SolverAlgorithm::Reference => "reference",
        }
    }
}

impl JobConfig {
    /// Per-worker geometry inputs for the given rank.
    pub fn geometry_params(&self, size: usize, rank: usize, threads: usize) -> GeometryParams {
        GeometryParams {
            size,
            rank,
            num_threads: threads,
            pz: self.decomposition.pz,
            zl: self.decomposition.zl,
            zu: self.decomposition.zu,
            nx: self.grid.nx,
            ny: self.grid.ny,
            nz: self.grid.nz,
            npx: self.decomposition.npx,
            npy: self.decomposition.npy,
            npz: self.decomposition.npz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: JobConfig =
            serde_json::from_str(r#"{"grid": {"nx": 8, "ny": 8, "nz": 8}}"#).expect("parse");
        assert_eq!(config.decomposition.workers, 1);
        assert_eq!(config.solver.max_iter, 50);
        assert_eq!(config.solver.tolerance, 0.0);
        assert_eq!(config.solver.preconditioner, PreconditionerKind::Jacobi);
        assert_eq!(config.solver.algorithm, SolverAlgorithm::Overlapped);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn solver_enums_parse_lowercase() {
        let config: JobConfig = serde_json::from_str(
            r#"{
                "grid": {"nx": 4, "ny": 4, "nz": 4},
                "solver": {"preconditioner": "none", "algorithm": "reference"}
            }"#,
        )
        .expect("parse");
        assert_eq!(config.solver.preconditioner, PreconditionerKind::None);
        assert_eq!(config.solver.algorithm, SolverAlgorithm::Reference);
    }

    #[test]
    fn geometry_params_carry_the_slab_split() {
        let config: JobConfig = serde_json::from_str(
            r#"{
                "grid": {"nx": 4, "ny": 4, "nz": 4},
                "decomposition": {"workers": 4, "npx": 1, "npy": 1, "npz": 4,
                                  "pz": 2, "zl": 3, "zu": 5}
            }"#,
        )
        .expect("parse");
        let params = config.geometry_params(4, 3, 1);
        assert_eq!(params.pz, 2);
        assert_eq!(params.zl, 3);
        assert_eq!(params.zu, 5);
        assert_eq!(params.rank, 3);
    }
}
