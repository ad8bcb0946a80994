//! Integration tests for the row-decomposition parallel path: two in-process "ranks" connected by
//! [`ChannelTransport::new_row_ring`] exchanging real ghost data through [`Lattice::send_ghosts`]/
//! [`Lattice::recv_ghosts`], the full-refresh path a from-scratch rebuild uses, plus a pair of
//! tests driving a full two-rank [`Simulation::run`] rather than raw lattice primitives.

use kmc_thinfilm::cell_inds::{CellInds, Offset};
use kmc_thinfilm::executor::{EventExecutorGroup, EventKind, Executor, OffsetSet, PendingWrite};
use kmc_thinfilm::lattice::geometry::{sector_of, ParallelDecomp};
use kmc_thinfilm::lattice::{Lattice, LatticeConfig, LatticeParams};
use kmc_thinfilm::rng::Pcg64RandNumGen;
use kmc_thinfilm::simulation::Simulation;
use kmc_thinfilm::solver::{GroupedMapSolver, SolverEnum};
use kmc_thinfilm::time_incr::TimeIncrScheme;
use kmc_thinfilm::transport::{ChannelTransport, PartitionTransport};

fn lattice_for(transport: &ChannelTransport) -> Lattice {
    Lattice::new(
        LatticeParams {
            config: LatticeConfig {
                global_dims: (8, 4),
                ghost_extent: (1, 0),
                n_int: 1,
                n_float: 0,
                num_planes_to_reserve: 1,
                decomp: ParallelDecomp::Row,
                no_adding_planes_during_simulation: false,
            },
            lat_init: None,
            set_empty_cell_vals: None,
        },
        transport,
    )
}

#[test]
fn row_decomposition_ghost_exchange_carries_the_neighbors_boundary_value() {
    let mut ranks = ChannelTransport::new_row_ring(2);
    let t1 = ranks.pop().unwrap();
    let t0 = ranks.pop().unwrap();

    let h0 = std::thread::spawn(move || {
        let mut lat = lattice_for(&t0);
        let owned = lat.get_local_planar_bbox(false);
        let boundary = CellInds::new(owned.imax_p1 - 1, 0, 0);
        lat.set_int(boundary, 0, 77);
        for s in 0..lat.decomp().num_sectors() {
            lat.send_ghosts(s, &t0);
        }
        for s in 0..lat.decomp().num_sectors() {
            lat.recv_ghosts(s);
        }
        lat.get_int(CellInds::new(owned.imax_p1, 0, 0), 0)
    });
    let h1 = std::thread::spawn(move || {
        let mut lat = lattice_for(&t1);
        let owned = lat.get_local_planar_bbox(false);
        let boundary = CellInds::new(owned.imin, 0, 0);
        lat.set_int(boundary, 0, 55);
        for s in 0..lat.decomp().num_sectors() {
            lat.send_ghosts(s, &t1);
        }
        for s in 0..lat.decomp().num_sectors() {
            lat.recv_ghosts(s);
        }
        lat.get_int(CellInds::new(owned.imin - 1, 0, 0), 0)
    });

    let ghost_seen_by_rank0 = h0.join().unwrap();
    let ghost_seen_by_rank1 = h1.join().unwrap();
    assert_eq!(ghost_seen_by_rank0, 55, "rank 0's +i ghost must mirror rank 1's boundary write");
    assert_eq!(ghost_seen_by_rank1, 77, "rank 1's -i ghost must mirror rank 0's boundary write");
}

#[test]
fn allreduce_max_observes_the_same_value_on_every_rank() {
    let ranks = ChannelTransport::new_row_ring(4);
    let handles: Vec<_> = ranks
        .into_iter()
        .enumerate()
        .map(|(i, r)| std::thread::spawn(move || r.allreduce_max_f64(f64::from(i as i32) * 1.5)))
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().all(|&v| (v - 4.5).abs() < 1e-12));
}

#[test]
fn sparse_ghost_update_only_carries_cells_marked_since_the_last_call() {
    let mut ranks = ChannelTransport::new_row_ring(2);
    let t1 = ranks.pop().unwrap();
    let t0 = ranks.pop().unwrap();

    let h0 = std::thread::spawn(move || {
        let mut lat = lattice_for(&t0);
        let owned = lat.get_local_planar_bbox(false);
        let boundary = CellInds::new(owned.imax_p1 - 1, 0, 0);
        lat.set_int(boundary, 0, 9);
        lat.add_to_export_buffer_if_needed(boundary);
        let sector = sector_of(boundary.i, boundary.j, owned, lat.decomp());
        lat.send_ghosts_update(sector, &t0);
        lat.recv_ghosts_update(sector);
        lat.get_int(CellInds::new(owned.imax_p1, 0, 0), 0)
    });
    let h1 = std::thread::spawn(move || {
        let mut lat = lattice_for(&t1);
        let owned = lat.get_local_planar_bbox(false);
        let boundary = CellInds::new(owned.imin, 0, 0);
        lat.set_int(boundary, 0, 13);
        lat.add_to_export_buffer_if_needed(boundary);
        let sector = sector_of(boundary.i, boundary.j, owned, lat.decomp());
        lat.send_ghosts_update(sector, &t1);
        lat.recv_ghosts_update(sector);
        lat.get_int(CellInds::new(owned.imin - 1, 0, 0), 0)
    });

    assert_eq!(h0.join().unwrap(), 13);
    assert_eq!(h1.join().unwrap(), 9);
}

fn row_sim_params() -> LatticeParams {
    LatticeParams {
        config: LatticeConfig {
            global_dims: (8, 4),
            ghost_extent: (1, 0),
            n_int: 1,
            n_float: 0,
            num_planes_to_reserve: 1,
            decomp: ParallelDecomp::Row,
            no_adding_planes_during_simulation: false,
        },
        lat_init: None,
        set_empty_cell_vals: None,
    }
}

/// Registers a cell-centered event, present identically on every rank, whose trigger cell sits
/// away from whatever dynamics a test cares about and always has positive propensity. Keeps
/// `Simulation::run`'s outer loop from ever observing every sector dry on one rank before the
/// other: since `allreduce_max_u32`/`update_tstop`'s reduction is collective and rank-symmetric,
/// a rank that exited the quantum loop early (because its own solver went dry first) would leave
/// its neighbor's next collective call waiting forever. With this registered, both ranks run the
/// identical, RNG-independent number of quanta determined purely by `duration / tstop`.
fn register_keepalive(sim: &mut Simulation, rate: f64) {
    let trigger = {
        let owned = sim.lattice().get_local_planar_bbox(false);
        CellInds::new(owned.imin, owned.jmax_p1 - 1, 0)
    };
    sim.registry_mut().add_event_group(EventExecutorGroup {
        propensity: Box::new(move |cell, _lattice| vec![if cell == trigger { rate } else { 0.0 }]),
        kinds: vec![EventKind {
            executor: Executor::AutoTrack(Box::new(move |cell, _, lattice| {
                let v = lattice.get_int(cell, 0);
                lattice.set_int(cell, 0, 1 - v);
            })),
            read_offsets: OffsetSet::from_iter([Offset::zero()]),
        }],
    });
}

/// One particle hops one cell at a time toward the rank's shared boundary with its row-ring
/// neighbor, where the propensity guard stops it: a hop can only fire while the destination lies
/// strictly inside the owned box, so the event never writes into a ghost cell it doesn't own.
/// `dir = 1` seeds at `imin` and walks toward `imax_p1 - 1`; `dir = -1` seeds at `imax_p1 - 1` and
/// walks toward `imin`, so a pair of ranks can be made to park their particles on the two cells
/// that directly mirror each other's ghost.
fn register_hop(sim: &mut Simulation, rate: f64, dir: i32) {
    let owned = sim.lattice().get_local_planar_bbox(false);
    let seed = if dir > 0 { owned.imin } else { owned.imax_p1 - 1 };
    sim.lattice_mut().set_int(CellInds::new(seed, 0, 0), 0, 1);
    sim.registry_mut().add_event_group(EventExecutorGroup {
        propensity: Box::new(move |cell, lattice| {
            let in_range = if dir > 0 { cell.i < owned.imax_p1 - 1 } else { cell.i > owned.imin };
            let can_hop = cell.j == 0
                && in_range
                && lattice.get_int(cell, 0) == 1
                && lattice.get_int(cell + Offset::new(dir, 0, 0), 0) == 0;
            vec![if can_hop { rate } else { 0.0 }]
        }),
        kinds: vec![EventKind {
            executor: Executor::SemiManual {
                run: Box::new(|_cell, _, _lattice, writes| {
                    writes.push(PendingWrite::Int { offset_idx: 0, slot: 0, val: 0 });
                    writes.push(PendingWrite::Int { offset_idx: 1, slot: 0, val: 1 });
                }),
                change_offsets: vec![Offset::zero(), Offset::new(dir, 0, 0)],
            },
            read_offsets: OffsetSet::from_iter([Offset::zero(), Offset::new(dir, 0, 0)]),
        }],
    });
}

fn build_sim(transport: ChannelTransport, seed: u64) -> Simulation {
    Simulation::new(
        row_sim_params(),
        Box::new(transport),
        SolverEnum::GroupedMapSolver(GroupedMapSolver::new()),
        Box::new(Pcg64RandNumGen::from_seed(seed)),
        TimeIncrScheme::FixedValue { tstop: 1.0 },
    )
}

/// S5-equivalent: two-rank row decomposition, one hop-type event with semi-manual tracking, run
/// through the full driver rather than raw `Lattice`/`ChannelTransport` primitives. Rank 0's
/// particle walks toward its own `imax_p1 - 1`; rank 1's walks the other way, toward its own
/// `imin` — the two cells that directly mirror each other's ghost across the shared boundary.
/// After the run, each rank's ghost of that boundary cell must carry the same value its owner
/// parked there, including the write a semi-manual hop made mid-run.
#[test]
fn parallel_simulation_keeps_ghost_cells_consistent_after_hops() {
    let mut ranks = ChannelTransport::new_row_ring(2);
    let t1 = ranks.pop().unwrap();
    let t0 = ranks.pop().unwrap();

    let h0 = std::thread::spawn(move || {
        let mut sim = build_sim(t0, 1);
        register_hop(&mut sim, 5.0, 1);
        register_keepalive(&mut sim, 2.0);
        sim.run(50.0).unwrap();
        let owned = sim.lattice().get_local_planar_bbox(false);
        let parked = sim.lattice().get_int(CellInds::new(owned.imax_p1 - 1, 0, 0), 0);
        let ghost_of_neighbor = sim.lattice().get_int(CellInds::new(owned.imax_p1, 0, 0), 0);
        (parked, ghost_of_neighbor)
    });
    let h1 = std::thread::spawn(move || {
        let mut sim = build_sim(t1, 2);
        register_hop(&mut sim, 5.0, -1);
        register_keepalive(&mut sim, 2.0);
        sim.run(50.0).unwrap();
        let owned = sim.lattice().get_local_planar_bbox(false);
        let parked = sim.lattice().get_int(CellInds::new(owned.imin, 0, 0), 0);
        let ghost_of_neighbor = sim.lattice().get_int(CellInds::new(owned.imin - 1, 0, 0), 0);
        (parked, ghost_of_neighbor)
    });

    let (rank0_parked, rank0_ghost_of_rank1) = h0.join().unwrap();
    let (rank1_parked, rank1_ghost_of_rank0) = h1.join().unwrap();

    assert_eq!(rank0_parked, 1, "rank 0's particle must have reached its boundary column");
    assert_eq!(rank1_parked, 1, "rank 1's particle must have reached its boundary column");
    assert_eq!(rank1_ghost_of_rank0, rank0_parked, "rank 1's ghost must mirror rank 0's parked value");
    assert_eq!(rank0_ghost_of_rank1, rank1_parked, "rank 0's ghost must mirror rank 1's parked value");
}

/// `add_planes` called from inside a registered (`AutoTrack`) executor, on a parallel transport:
/// the collective height sync must bring every rank's local height back into agreement even
/// though only this rank's own executor ever calls `add_planes`.
#[test]
fn height_grown_from_inside_an_executor_stays_synced_across_ranks() {
    let mut ranks = ChannelTransport::new_row_ring(2);
    let t1 = ranks.pop().unwrap();
    let t0 = ranks.pop().unwrap();

    let h0 = std::thread::spawn(move || {
        let mut sim = build_sim(t0, 3);
        register_keepalive(&mut sim, 2.0);
        let trigger = {
            let owned = sim.lattice().get_local_planar_bbox(false);
            CellInds::new(owned.imin, 0, 0)
        };
        sim.registry_mut().add_event_group(EventExecutorGroup {
            propensity: Box::new(move |cell, lattice| {
                vec![if cell == trigger && lattice.get_int(cell, 0) == 0 { 1000.0 } else { 0.0 }]
            }),
            kinds: vec![EventKind {
                executor: Executor::AutoTrack(Box::new(|cell, _, lattice| {
                    lattice.set_int(cell, 0, 1);
                    lattice.add_planes(1);
                })),
                read_offsets: OffsetSet::from_iter([Offset::zero()]),
            }],
        });
        sim.run(20.0).unwrap();
        // Flush: `sync_height`'s per-quantum collective only catches growth from the *previous*
        // quantum, so an `add_planes` in the run's final quantum isn't synced until this call's own
        // preamble reduction runs.
        sim.run(0.0).unwrap();
        sim.lattice().current_height()
    });
    let h1 = std::thread::spawn(move || {
        let mut sim = build_sim(t1, 4);
        register_keepalive(&mut sim, 2.0);
        sim.run(20.0).unwrap();
        sim.run(0.0).unwrap();
        sim.lattice().current_height()
    });

    let rank0_height = h0.join().unwrap();
    let rank1_height = h1.join().unwrap();
    assert!(rank0_height > 1, "rank 0's executor must have grown the lattice at least once");
    assert_eq!(rank0_height, rank1_height, "rank 1 must catch up even though it never called add_planes itself");
}
