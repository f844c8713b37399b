#![cfg(test)]

use super::geometry::{
    generate_geometry, optimal_shape, rank_of_global_row, GeometryError, GeometryParams,
};

fn params(size: usize, rank: usize, n: usize) -> GeometryParams {
    GeometryParams {
        size,
        rank,
        num_threads: 1,
        pz: 0,
        zl: 0,
        zu: 0,
        nx: n,
        ny: n,
        nz: n,
        npx: 0,
        npy: 0,
        npz: 0,
    }
}

#[test]
fn optimal_shape_factors_exactly() {
    for size in [1, 2, 3, 4, 5, 6, 8, 12, 16, 24, 27, 36, 64, 100, 125] {
        let (npx, npy, npz) = optimal_shape(size);
        assert_eq!(npx * npy * npz, size, "shape must factor {size} exactly");
        assert!(npx >= npy && npy >= npz, "factors sorted for {size}");
    }
}

#[test]
fn optimal_shape_finds_cubes() {
    assert_eq!(optimal_shape(8), (2, 2, 2));
    assert_eq!(optimal_shape(27), (3, 3, 3));
    assert_eq!(optimal_shape(64), (4, 4, 4));
    assert_eq!(optimal_shape(1), (1, 1, 1));
}

#[test]
fn optimal_shape_near_cubic_for_mixed_counts() {
    assert_eq!(optimal_shape(12), (3, 2, 2));
    assert_eq!(optimal_shape(24), (4, 3, 2));
    assert_eq!(optimal_shape(5), (5, 1, 1));
}

#[test]
fn explicit_shape_is_used_unmodified() {
    let mut p = params(8, 0, 4);
    p.npx = 1;
    p.npy = 2;
    p.npz = 4;
    let geom = generate_geometry(&p).expect("geometry");
    assert_eq!((geom.npx, geom.npy, geom.npz), (1, 2, 4));
}

#[test]
fn overcommitted_shape_falls_back_to_auto() {
    let mut p = params(8, 0, 4);
    p.npx = 3;
    p.npy = 3;
    p.npz = 3;
    let geom = generate_geometry(&p).expect("geometry");
    assert_eq!((geom.npx, geom.npy, geom.npz), (2, 2, 2));
}

#[test]
fn worker_coordinates_and_origins() {
    let geom = generate_geometry(&params(8, 5, 4)).expect("geometry");
    assert_eq!((geom.npx, geom.npy, geom.npz), (2, 2, 2));
    assert_eq!((geom.ipx, geom.ipy, geom.ipz), (1, 0, 1));
    assert_eq!((geom.gnx, geom.gny, geom.gnz), (8, 8, 8));
    assert_eq!((geom.gix0, geom.giy0, geom.giz0), (4, 0, 4));
}

#[test]
fn uniform_slab_covers_all_planes() {
    let geom = generate_geometry(&params(8, 0, 4)).expect("geometry");
    assert_eq!(geom.partz_ids, vec![2]);
    assert_eq!(geom.partz_nz, vec![4]);
    assert_eq!(geom.gnz, 8);
}

fn slab_params(rank: usize) -> GeometryParams {
    let mut p = params(4, rank, 2);
    p.npx = 1;
    p.npy = 1;
    p.npz = 4;
    p.pz = 2;
    p.zl = 3;
    p.zu = 5;
    p
}

#[test]
fn two_slabs_adjust_local_heights() {
    for rank in 0..2 {
        let geom = generate_geometry(&slab_params(rank)).expect("geometry");
        assert_eq!(geom.nz, 3, "rank {rank} sits in the low slab");
    }
    for rank in 2..4 {
        let geom = generate_geometry(&slab_params(rank)).expect("geometry");
        assert_eq!(geom.nz, 5, "rank {rank} sits in the high slab");
    }
}

#[test]
fn two_slab_origins_cross_the_split() {
    // Slab heights 3,3,5,5: origins 0, 3, 6, 11 and a global extent of 16.
    let expected = [0, 3, 6, 11];
    for (rank, &giz0) in expected.iter().enumerate() {
        let geom = generate_geometry(&slab_params(rank)).expect("geometry");
        assert_eq!(geom.giz0, giz0, "origin for rank {rank}");
        assert_eq!(geom.gnz, 16);
    }
}

#[test]
fn invalid_slab_order_is_fatal() {
    let mut p = slab_params(0);
    p.pz = 4; // equal to npz: boundaries no longer strictly increasing
    assert!(matches!(
        generate_geometry(&p),
        Err(GeometryError::ZPartitionOrder(4, 4))
    ));
    p.pz = 7;
    assert!(matches!(
        generate_geometry(&p),
        Err(GeometryError::ZPartitionOrder(7, 4))
    ));
}

#[test]
fn rank_out_of_range_is_rejected() {
    assert!(matches!(
        generate_geometry(&params(4, 4, 2)),
        Err(GeometryError::RankOutOfRange { rank: 4, size: 4 })
    ));
}

#[test]
fn empty_grid_is_rejected() {
    let mut p = params(1, 0, 2);
    p.ny = 0;
    assert!(matches!(
        generate_geometry(&p),
        Err(GeometryError::EmptyGrid { .. })
    ));
}

#[test]
fn row_ownership_is_consistent_uniform() {
    for rank in 0..8 {
        let geom = generate_geometry(&params(8, rank, 3)).expect("geometry");
        for iz in 0..geom.nz {
            for iy in 0..geom.ny {
                for ix in 0..geom.nx {
                    let gid = (geom.giz0 + iz as i64) * geom.gnx * geom.gny
                        + (geom.giy0 + iy as i64) * geom.gnx
                        + (geom.gix0 + ix as i64);
                    assert_eq!(
                        rank_of_global_row(&geom, gid),
                        rank,
                        "cell ({ix},{iy},{iz}) of rank {rank}"
                    );
                }
            }
        }
    }
}

#[test]
fn row_ownership_is_consistent_across_slabs() {
    for rank in 0..4 {
        let geom = generate_geometry(&slab_params(rank)).expect("geometry");
        for iz in 0..geom.nz {
            for iy in 0..geom.ny {
                for ix in 0..geom.nx {
                    let gid = (geom.giz0 + iz as i64) * geom.gnx * geom.gny
                        + (geom.giy0 + iy as i64) * geom.gnx
                        + (geom.gix0 + ix as i64);
                    assert_eq!(
                        rank_of_global_row(&geom, gid),
                        rank,
                        "cell ({ix},{iy},{iz}) of rank {rank} in slab partition"
                    );
                }
            }
        }
    }
}
