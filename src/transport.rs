//! `PartitionTransport`: the single seam between the simulation driver and whatever
//! distributed-memory substrate a deployment uses. One trait, with a no-op serial impl and an
//! MPI-like parallel impl.
//!
//! The wire format is explicitly out of scope; this module specifies only the
//! *interchange pattern* — matched sparse ghost exchange per sector, plus the two collective
//! reductions the driver needs (height sync, `t_stop` sync). [`SerialTransport`] is the no-op
//! single-rank implementation; [`ChannelTransport`] is an in-process, thread-and-channel-backed
//! stand-in for a real MPI deployment, wired for the row (1-D Cartesian) decomposition that the
//! parallel test scenario exercises.

use crate::cell_inds::CellInds;
use crate::lattice::geometry::ParallelDecomp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};

/// One of the (up to 8) Cartesian neighbor directions a rank may exchange ghosts with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NeighborDir {
    /// Neighbor across the `+i` boundary.
    PlusI,
    /// Neighbor across the `-i` boundary.
    MinusI,
    /// Neighbor across the `+j` boundary (compact decomposition only).
    PlusJ,
    /// Neighbor across the `-j` boundary (compact decomposition only).
    MinusJ,
    /// Diagonal neighbor across `+i,+j` (compact decomposition only).
    PlusIPlusJ,
    /// Diagonal neighbor across `+i,-j` (compact decomposition only).
    PlusIMinusJ,
    /// Diagonal neighbor across `-i,+j` (compact decomposition only).
    MinusIPlusJ,
    /// Diagonal neighbor across `-i,-j` (compact decomposition only).
    MinusIMinusJ,
}

impl NeighborDir {
    /// The direction a neighbor sees this exchange from, i.e. the matching recv side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::PlusI => Self::MinusI,
            Self::MinusI => Self::PlusI,
            Self::PlusJ => Self::MinusJ,
            Self::MinusJ => Self::PlusJ,
            Self::PlusIPlusJ => Self::MinusIMinusJ,
            Self::MinusIMinusJ => Self::PlusIPlusJ,
            Self::PlusIMinusJ => Self::MinusIPlusJ,
            Self::MinusIPlusJ => Self::PlusIMinusJ,
        }
    }
}

/// Sparse inds+values payload exchanged for one buffer direction per quantum (conceptually a
/// size prefix, a `CellInds` blob, an int payload, and a float payload). Modeled as one value
/// rather than four wire messages, since the wire format itself is out of scope.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GhostPayload {
    /// Cells carried by this payload, in the order their values follow.
    pub cells: Vec<CellInds>,
    /// `nInt`-wide integer payload, concatenated per cell in `cells` order.
    pub ints: Vec<i32>,
    /// `nFloat`-wide float payload, concatenated per cell in `cells` order.
    pub floats: Vec<f64>,
}

impl GhostPayload {
    /// Whether this payload carries no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// The collaborator the simulation driver is polymorphic over for collective reductions and
/// boundary ghost exchange. Out of scope: the real wire format and the choice of underlying
/// message-passing substrate (MPI, sockets, ...).
pub trait PartitionTransport: Send {
    /// This process's rank, `0..num_ranks()`.
    fn rank(&self) -> usize;
    /// Total number of cooperating ranks.
    fn num_ranks(&self) -> usize;
    /// The decomposition this transport was wired for.
    fn decomp(&self) -> ParallelDecomp;
    /// Neighbor directions this rank has a live peer for.
    fn neighbor_dirs(&self) -> &[NeighborDir];
    /// Collective maximum over all ranks' `local` values, observed identically by every rank.
    fn allreduce_max_u32(&self, local: u32) -> u32;
    /// Collective maximum over all ranks' `local` values, observed identically by every rank.
    fn allreduce_max_f64(&self, local: f64) -> f64;
    /// Blocking matched exchange: sends `out` to the neighbor in `dir`, returns what that
    /// neighbor sent along the opposite direction in the same call.
    fn exchange(&self, dir: NeighborDir, out: GhostPayload) -> GhostPayload;
}

/// No-op transport for a single, unpartitioned rank.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialTransport;

impl PartitionTransport for SerialTransport {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn decomp(&self) -> ParallelDecomp {
        ParallelDecomp::Serial
    }

    fn neighbor_dirs(&self) -> &[NeighborDir] {
        &[]
    }

    fn allreduce_max_u32(&self, local: u32) -> u32 {
        local
    }

    fn allreduce_max_f64(&self, local: f64) -> f64 {
        local
    }

    fn exchange(&self, _dir: NeighborDir, _out: GhostPayload) -> GhostPayload {
        GhostPayload::default()
    }
}

/// Shared rendezvous point used to emulate `Allreduce(MAX)` across in-process "ranks" (separate
/// OS threads), one per deployment, reused by every [`ChannelTransport`] built from the same
/// factory call.
struct AllreduceHub<T> {
    num_ranks: usize,
    state: Mutex<HubState<T>>,
    cvar: Condvar,
}

struct HubState<T> {
    contributions: Vec<Option<T>>,
    generation: u64,
    readers_remaining: usize,
}

impl<T: Copy + PartialOrd> AllreduceHub<T> {
    fn new(num_ranks: usize) -> Self {
        Self {
            num_ranks,
            state: Mutex::new(HubState {
                contributions: vec![None; num_ranks],
                generation: 0,
                readers_remaining: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Rendezvous all ranks' contributions then return their max, observed identically by every
    /// caller. A two-phase barrier: contributions are not cleared for the next round until every
    /// rank has read this round's result, so a fast rank looping back can never race a slow
    /// rank still reading the previous round.
    fn allreduce_max(&self, rank: usize, local: T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let my_generation = guard.generation;
        guard.contributions[rank] = Some(local);
        if guard.contributions.iter().all(Option::is_some) {
            guard.generation += 1;
            guard.readers_remaining = self.num_ranks;
            self.cvar.notify_all();
        } else {
            while guard.generation == my_generation {
                guard = self.cvar.wait(guard).unwrap_or_else(|e| e.into_inner());
            }
        }
        let max = guard
            .contributions
            .iter()
            .filter_map(|c| *c)
            .fold(local, |acc, v| if v > acc { v } else { acc });
        guard.readers_remaining -= 1;
        if guard.readers_remaining == 0 {
            guard.contributions.fill(None);
        }
        max
    }
}

/// In-process, channel-backed stand-in for an MPI-like parallel transport. Emulates the row
/// (1-D Cartesian, periodic) decomposition's exchange pattern: each rank has a `+i` and a `-i`
/// neighbor link, wired into a ring by [`ChannelTransport::new_row_ring`].
pub struct ChannelTransport {
    rank: usize,
    num_ranks: usize,
    dirs: Vec<NeighborDir>,
    links: HashMap<NeighborDir, (Sender<GhostPayload>, Receiver<GhostPayload>)>,
    u32_hub: Arc<AllreduceHub<u32>>,
    f64_hub: Arc<AllreduceHub<OrdF64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
struct OrdF64(f64);

impl ChannelTransport {
    /// Builds `num_ranks` transports wired into a periodic ring along `i`, one per rank, for the
    /// row decomposition. `num_ranks >= 2`; with exactly 2 ranks each rank's `+i` and `-i`
    /// neighbor is the other rank, connected by two independent channel pairs.
    ///
    /// # Panics
    /// Panics if `num_ranks < 2`.
    #[must_use]
    pub fn new_row_ring(num_ranks: usize) -> Vec<Self> {
        assert!(num_ranks >= 2, "a ring transport needs at least 2 ranks");
        let mut plus_links: Vec<Option<(Sender<GhostPayload>, Receiver<GhostPayload>)>> =
            (0..num_ranks).map(|_| None).collect();
        let mut minus_links: Vec<Option<(Sender<GhostPayload>, Receiver<GhostPayload>)>> =
            (0..num_ranks).map(|_| None).collect();

        for r in 0..num_ranks {
            let next = (r + 1) % num_ranks;
            let (tx_fwd, rx_fwd) = mpsc::channel();
            let (tx_bwd, rx_bwd) = mpsc::channel();
            plus_links[r] = Some((tx_fwd, rx_bwd));
            minus_links[next] = Some((tx_bwd, rx_fwd));
        }

        let u32_hub = Arc::new(AllreduceHub::new(num_ranks));
        let f64_hub = Arc::new(AllreduceHub::new(num_ranks));

        (0..num_ranks)
            .map(|r| {
                let mut links = HashMap::new();
                links.insert(NeighborDir::PlusI, plus_links[r].take().expect("wired"));
                links.insert(NeighborDir::MinusI, minus_links[r].take().expect("wired"));
                Self {
                    rank: r,
                    num_ranks,
                    dirs: vec![NeighborDir::PlusI, NeighborDir::MinusI],
                    links,
                    u32_hub: Arc::clone(&u32_hub),
                    f64_hub: Arc::clone(&f64_hub),
                }
            })
            .collect()
    }
}

impl PartitionTransport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn decomp(&self) -> ParallelDecomp {
        ParallelDecomp::Row
    }

    fn neighbor_dirs(&self) -> &[NeighborDir] {
        &self.dirs
    }

    fn allreduce_max_u32(&self, local: u32) -> u32 {
        self.u32_hub.allreduce_max(self.rank, local)
    }

    fn allreduce_max_f64(&self, local: f64) -> f64 {
        self.f64_hub.allreduce_max(self.rank, OrdF64(local)).0
    }

    fn exchange(&self, dir: NeighborDir, out: GhostPayload) -> GhostPayload {
        let (tx, rx) = self
            .links
            .get(&dir)
            .unwrap_or_else(|| panic!("no live link for {dir:?} on rank {}", self.rank));
        tx.send(out).expect("neighbor rank dropped its end of the link");
        rx.recv().expect("neighbor rank dropped its end of the link")
    }
}
