//! 3D process-grid decomposition and per-worker index origins.

use serde::Serialize;
use thiserror::Error;

/// Global grid coordinates and row ids. Signed so stencil clipping can form
/// negative candidate offsets near the domain faces.
pub type GlobalIndex = i64;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("grid extents must all be positive, got {nx}x{ny}x{nz}")]
    EmptyGrid { nx: usize, ny: usize, nz: usize },

    #[error("rank {rank} is out of range for {size} workers")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("z slab boundaries must be strictly increasing, got {0} then {1}")]
    ZPartitionOrder(usize, usize),
}

/// Inputs to [`generate_geometry`]. A zero (or over-committed) `npx*npy*npz`
/// product requests automatic shape selection; `pz == 0` requests a single
/// uniform z slab.
#[derive(Debug, Clone, Copy)]
pub struct GeometryParams {
    pub size: usize,
    pub rank: usize,
    pub num_threads: usize,
    /// First z-plane rank of the second slab (0 = uniform slabs).
    pub pz: usize,
    /// Slab height for planes below `pz`.
    pub zl: usize,
    /// Slab height for planes at or above `pz`.
    pub zu: usize,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub npx: usize,
    pub npy: usize,
    pub npz: usize,
}

/// Immutable per-worker descriptor of the global grid decomposition.
/// Created once per run and read-only thereafter.
#[derive(Debug, Clone, Serialize)]
pub struct Geometry {
    pub size: usize,
    pub rank: usize,
    pub num_threads: usize,
    /// Local grid extents; `nz` is slab-adjusted for this worker.
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Process-grid shape.
    pub npx: usize,
    pub npy: usize,
    pub npz: usize,
    pub pz: usize,
    /// Last z-plane rank (exclusive) of each slab; the final entry is `npz`.
    pub partz_ids: Vec<usize>,
    /// Local nz of each slab, parallel to `partz_ids`.
    pub partz_nz: Vec<usize>,
    /// This worker's coordinate in the process grid.
    pub ipx: usize,
    pub ipy: usize,
    pub ipz: usize,
    /// Global grid extents.
    pub gnx: GlobalIndex,
    pub gny: GlobalIndex,
    pub gnz: GlobalIndex,
    /// This worker's global index origin.
    pub gix0: GlobalIndex,
    pub giy0: GlobalIndex,
    pub giz0: GlobalIndex,
}

/// Factor `size` workers into a near-cubic process grid and derive this
/// worker's coordinate and global origin.
pub fn generate_geometry(params: &GeometryParams) -> Result<Geometry, GeometryError> {
    let GeometryParams {
        size,
        rank,
        num_threads,
        pz,
        zl,
        zu,
        nx,
        ny,
        nz,
        ..
    } = *params;

    if nx == 0 || ny == 0 || nz == 0 {
        return Err(GeometryError::EmptyGrid { nx, ny, nz });
    }
    if rank >= size {
        return Err(GeometryError::RankOutOfRange { rank, size });
    }

    let explicit = params.npx * params.npy * params.npz;
    let (npx, npy, npz) = if explicit == 0 || explicit > size {
        optimal_shape(size)
    } else {
        (params.npx, params.npy, params.npz)
    };

    // One uniform slab, or exactly two with the split at plane `pz`.
    let (partz_ids, partz_nz) = if pz == 0 {
        (vec![npz], vec![nz])
    } else {
        (vec![pz, npz], vec![zl, zu])
    };
    for pair in partz_ids.windows(2) {
        if pair[0] >= pair[1] {
            return Err(GeometryError::ZPartitionOrder(pair[0], pair[1]));
        }
    }

    let ipz = rank / (npx * npy);
    let ipy = (rank - ipz * npx * npy) / npx;
    let ipx = rank % npx;

    // Slab-adjusted local nz for this worker's z plane.
    let mut local_nz = nz;
    if partz_ids.len() > 1 {
        for (&last, &height) in partz_ids.iter().zip(&partz_nz) {
            if ipz < last {
                local_nz = height;
                break;
            }
        }
    }

    let gnx = (npx * nx) as GlobalIndex;
    let gny = (npy * ny) as GlobalIndex;

    // Global z extent and this worker's z origin accumulate slab heights
    // times the number of planes each slab covers; the split need not align
    // with ipz, so the origin walk stops partway through a slab.
    let mut gnz: GlobalIndex = 0;
    let mut prev = 0usize;
    for (&last, &height) in partz_ids.iter().zip(&partz_nz) {
        gnz += ((last - prev) * height) as GlobalIndex;
        prev = last;
    }
    let mut giz0: GlobalIndex = 0;
    let mut prev = 0usize;
    for (&last, &height) in partz_ids.iter().zip(&partz_nz) {
        if ipz < last {
            giz0 += ((ipz - prev) * height) as GlobalIndex;
            break;
        }
        giz0 += ((last - prev) * height) as GlobalIndex;
        prev = last;
    }

    let gix0 = (ipx * nx) as GlobalIndex;
    let giy0 = (ipy * ny) as GlobalIndex;

    Ok(Geometry {
        size,
        rank,
        num_threads,
        nx,
        ny,
        nz: local_nz,
        npx,
        npy,
        npz,
        pz,
        partz_ids,
        partz_nz,
        ipx,
        ipy,
        ipz,
        gnx,
        gny,
        gnz,
        gix0,
        giy0,
        giz0,
    })
}

/// Near-cubic factorization of the worker count: the largest divisor at most
/// the cube root becomes `npz`, then the largest divisor of the remainder at
/// most its square root becomes `npy`, the rest is `npx`.
pub fn optimal_shape(size: usize) -> (usize, usize, usize) {
    let npz = (1..=size)
        .filter(|d| size % d == 0 && d * d * d <= size)
        .max()
        .unwrap_or(1);
    let rest = size / npz;
    let npy = (1..=rest)
        .filter(|d| rest % d == 0 && d * d <= rest)
        .max()
        .unwrap_or(1);
    (rest / npy, npy, npz)
}

/// Owner of a global row: invert the row-major global id into grid
/// coordinates, then map each axis back onto the process grid, walking the
/// z slabs where local heights vary.
pub fn rank_of_global_row(geom: &Geometry, global_row: GlobalIndex) -> usize {
    debug_assert!(
        global_row >= 0 && global_row < geom.gnx * geom.gny * geom.gnz,
        "global row {global_row} outside the grid"
    );
    let plane = geom.gnx * geom.gny;
    let mut iz = global_row / plane;
    let iy = (global_row % plane) / geom.gnx;
    let ix = global_row % geom.gnx;

    let ipx = ix as usize / geom.nx;
    let ipy = iy as usize / geom.ny;
    let mut ipz = 0usize;
    let mut prev = 0usize;
    for (&last, &height) in geom.partz_ids.iter().zip(&geom.partz_nz) {
        let planes = last - prev;
        let span = (planes * height) as GlobalIndex;
        if iz < span {
            ipz += iz as usize / height;
            break;
        }
        iz -= span;
        ipz += planes;
        prev = last;
    }

    ipx + ipy * geom.npx + ipz * geom.npx * geom.npy
}
