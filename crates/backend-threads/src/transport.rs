//! Channel-based halo transport between in-process workers.
//!
//! Setup is collective: every worker tells every peer which of its global
//! rows it needs (an empty list keeps the pattern uniform), resolves the
//! incoming requests through its boundary-row map, and remaps its matrix's
//! remote column references onto freshly assigned halo slots. A steady-state
//! exchange then moves one value payload per neighbor pair.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{Receiver, Sender};

use cgbench_core::geometry::GlobalIndex;
use cgbench_core::halo::HaloExchange;
use cgbench_core::matrix::SparseMatrix;
use cgbench_core::vector::Vector;

pub struct ChannelTransport {
    rank: usize,
    size: usize,
    setup_tx: Vec<Sender<Vec<GlobalIndex>>>,
    setup_rx: Vec<Receiver<Vec<GlobalIndex>>>,
    data_tx: Vec<Sender<Vec<f64>>>,
    data_rx: Vec<Receiver<Vec<f64>>>,
    /// (peer, local rows to gather) in peer-rank order.
    send_rows: Vec<(usize, Vec<usize>)>,
    /// (peer, first halo slot, count) in peer-rank order.
    recv_slots: Vec<(usize, usize, usize)>,
}

impl ChannelTransport {
    pub(crate) fn new(
        rank: usize,
        size: usize,
        setup_tx: Vec<Sender<Vec<GlobalIndex>>>,
        setup_rx: Vec<Receiver<Vec<GlobalIndex>>>,
        data_tx: Vec<Sender<Vec<f64>>>,
        data_rx: Vec<Receiver<Vec<f64>>>,
    ) -> Self {
        Self {
            rank,
            size,
            setup_tx,
            setup_rx,
            data_tx,
            data_rx,
            send_rows: Vec::new(),
            recv_slots: Vec::new(),
        }
    }
}

impl HaloExchange for ChannelTransport {
    fn setup(&mut self, a: &mut SparseMatrix) {
        // Global columns needed from each owner, deduplicated and sorted so
        // both sides of every pair agree on the payload order.
        let mut wanted: BTreeMap<usize, Vec<GlobalIndex>> = BTreeMap::new();
        a.for_each_remote_column(|owner, column| {
            wanted.entry(owner as usize).or_default().push(column);
        });
        for columns in wanted.values_mut() {
            columns.sort_unstable();
            columns.dedup();
        }

        // Halo slots in peer-rank order, directly after the local rows.
        let mut next_slot = a.local_rows;
        let mut slot_of: HashMap<GlobalIndex, usize> = HashMap::new();
        self.recv_slots.clear();
        for (&owner, columns) in &wanted {
            self.recv_slots.push((owner, next_slot, columns.len()));
            for &column in columns {
                slot_of.insert(column, next_slot);
                next_slot += 1;
            }
        }

        // Send every peer its request list, then resolve the incoming ones
        // against the boundary-row map. Unbounded sends cannot deadlock.
        for peer in 0..self.size {
            if peer == self.rank {
                continue;
            }
            let columns = wanted.get(&peer).cloned().unwrap_or_default();
            self.setup_tx[peer]
                .send(columns)
                .expect("peer hung up during halo setup");
        }
        self.send_rows.clear();
        for peer in 0..self.size {
            if peer == self.rank {
                continue;
            }
            let requested = self.setup_rx[peer]
                .recv()
                .expect("peer hung up during halo setup");
            if requested.is_empty() {
                continue;
            }
            let rows = requested
                .iter()
                .map(|column| {
                    *a.global_to_local
                        .get(column)
                        .expect("peer requested a column that is not a local boundary row")
                })
                .collect();
            self.send_rows.push((peer, rows));
        }

        a.resolve_remote_columns(next_slot, |_owner, column| slot_of[&column] as u32);
    }

    fn exchange(&mut self, x: &mut Vector) {
        for (peer, rows) in &self.send_rows {
            let payload: Vec<f64> = rows.iter().map(|&row| x.as_slice()[row]).collect();
            self.data_tx[*peer]
                .send(payload)
                .expect("peer hung up during halo exchange");
        }
        for &(peer, first, count) in &self.recv_slots {
            let payload = self.data_rx[peer]
                .recv()
                .expect("peer hung up during halo exchange");
            debug_assert_eq!(payload.len(), count, "halo payload size from worker {peer}");
            x.as_mut_slice()[first..first + count].copy_from_slice(&payload);
        }
    }
}
