#![cfg(test)]

use super::backend::{ExecutionBackend, PendingReduction, SingleWorker};

#[test]
fn single_worker_collectives_are_identities() {
    let backend = SingleWorker::new(1).expect("backend");
    assert_eq!(backend.rank(), 0);
    assert_eq!(backend.size(), 1);
    assert_eq!(backend.allreduce_sum(3.25), 3.25);
    assert_eq!(backend.allreduce_sum_u64(17), 17);
    assert!(backend.allreduce_and(true));
    assert!(!backend.allreduce_and(false));
    assert_eq!(backend.allreduce_sum_start(1.5).wait(), 1.5);
}

#[test]
fn install_runs_inside_the_configured_pool() {
    let backend = SingleWorker::new(3).expect("backend");
    assert_eq!(backend.num_threads(), 3);
    let observed = backend.install(rayon::current_num_threads);
    assert_eq!(observed, 3);
}

#[test]
fn zero_threads_clamps_to_one() {
    let backend = SingleWorker::new(0).expect("backend");
    assert_eq!(backend.num_threads(), 1);
    let observed = backend.install(rayon::current_num_threads);
    assert_eq!(observed, 1);
}
