//! The simulation driver: owns the lattice, solver, RNG and time-increment scheme, and runs the
//! synchronous-sublattice outer loop. One owning struct delegating to focused collaborators, a
//! stateful, re-enterable event loop rather than a single-pass pipeline.

use crate::cell_inds::CellInds;
use crate::error::{Error, Result};
use crate::event_id::{EventId, IdCtx};
use crate::executor::{Executor, PendingWrite};
use crate::lattice::change_log::TrackType;
use crate::lattice::geometry::sector_of;
use crate::lattice::{Lattice, LatticeParams};
use crate::registry::IdRegistry;
use crate::rng::EventRng;
use crate::solver::{Solver, SolverEnum};
use crate::state::SimulationState;
use crate::time_incr::{SectorPropensitySummary, TimeIncrScheme};
use crate::transport::PartitionTransport;
use std::collections::BTreeSet;

/// Owns every collaborator a run needs and drives the synchronous-sublattice outer loop.
/// Registration (`registry_mut`) is only valid before the first [`Self::run`] call: the
/// flattening [`IdCtx`] freezes then.
pub struct Simulation {
    lattice: Lattice,
    transport: Box<dyn PartitionTransport>,
    solver: SolverEnum,
    rng: Box<dyn EventRng>,
    time_incr: TimeIncrScheme,
    registry: IdRegistry,
    state: SimulationState,
    ctx: Option<IdCtx>,
    needs_rebuild: bool,
}

impl Simulation {
    /// Builds a simulation. The lattice is constructed immediately (running its `lat_init`); the
    /// solver is populated lazily on the first [`Self::run`] call.
    pub fn new(
        lattice_params: LatticeParams,
        transport: Box<dyn PartitionTransport>,
        solver: SolverEnum,
        rng: Box<dyn EventRng>,
        time_incr: TimeIncrScheme,
    ) -> Self {
        let mut lattice = Lattice::new(lattice_params, transport.as_ref());
        sync_height(&mut lattice, transport.as_ref());
        Self {
            lattice,
            transport,
            solver,
            rng,
            time_incr,
            registry: IdRegistry::new(),
            state: SimulationState::new(0.0),
            ctx: None,
            needs_rebuild: true,
        }
    }

    /// Mutable access to the event/periodic-action registry. Registrations made after the first
    /// [`Self::run`] call still take effect (a rebuild is forced on the next run), but the
    /// flattening context itself will not change: the bounding box is fixed for the run.
    pub fn registry_mut(&mut self) -> &mut IdRegistry {
        self.needs_rebuild = true;
        &mut self.registry
    }

    /// Read-only view of the lattice, e.g. for a caller to snapshot or export results.
    #[must_use]
    pub const fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Mutable access to the lattice (e.g. to call [`Lattice::add_planes`] between runs). Forces
    /// a solver rebuild on the next [`Self::run`].
    pub fn lattice_mut(&mut self) -> &mut Lattice {
        self.needs_rebuild = true;
        &mut self.lattice
    }

    /// The current simulation state (elapsed time, counters).
    #[must_use]
    pub const fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Rebuilds the solver from scratch by scanning every owned cell of every plane and every
    /// sector's over-lattice events. Ghosts are fully refreshed first so propensities that read
    /// neighbor cells see up-to-date data.
    pub fn rebuild(&mut self) {
        let ctx = self.registry.ctx(&self.lattice);
        self.ctx = Some(ctx);
        let num_sectors = self.lattice.decomp().num_sectors();
        for s in 0..num_sectors {
            self.lattice.send_ghosts(s, self.transport.as_ref());
        }
        for s in 0..num_sectors {
            self.lattice.recv_ghosts(s);
        }

        self.solver.begin_build(ctx, num_sectors, self.registry.num_over_lattice(), 0);
        let owned = self.lattice.get_local_planar_bbox(false);
        for k in 0..self.lattice.current_height() {
            for i in owned.imin..owned.imax_p1 {
                for j in owned.jmin..owned.jmax_p1 {
                    let cell = CellInds::new(i, j, k as i32);
                    let sector = sector_of(i, j, owned, self.lattice.decomp());
                    for g_idx in 0..self.registry.groups().len() {
                        let kind_offset = self.registry.kind_offset(g_idx);
                        let props = (self.registry.groups()[g_idx].propensity)(cell, &self.lattice);
                        for (k_idx, &p) in props.iter().enumerate() {
                            if p > 0.0 {
                                let eid = EventId::cell_centered(&ctx, cell, kind_offset + k_idx);
                                self.solver.add_cell_centered(eid, p, sector);
                            }
                        }
                    }
                }
            }
        }
        for sector in 0..num_sectors {
            let area = self.lattice.get_sector_planar_bbox(sector).area();
            for (idx, ev) in self.registry.over_lattice_events().iter().enumerate() {
                let p = ev.propensity(area);
                if p > 0.0 {
                    self.solver.add_over_lattice(EventId::over_lattice(idx, sector), p, sector);
                }
            }
        }
        self.solver.end_build();
        self.needs_rebuild = false;
    }

    /// Advances the simulation by up to `duration` of simulated time: the preamble/rebuild if
    /// needed, then the outer sector loop until `duration` is exhausted or every sector runs dry.
    ///
    /// # Errors
    /// Returns [`Error::General`] if `duration` is negative.
    pub fn run(&mut self, duration: f64) -> Result<()> {
        if duration < 0.0 {
            return Err(Error::General(format!("run: duration must be non-negative, got {duration}")));
        }
        self.state.set_max_time(self.state.elapsed_time() + duration);
        self.lattice.set_during_simulation(true);
        // Ahead of a rebuild in particular: `lattice_mut()` may have grown this rank's height
        // asymmetrically between runs, and the solver rebuild below must see the synced height.
        sync_height(&mut self.lattice, self.transport.as_ref());
        if self.needs_rebuild {
            self.rebuild();
        }

        let target = self.state.max_time();
        let num_sectors = self.lattice.decomp().num_sectors();
        while self.state.elapsed_time() < target {
            // Collective and rank-symmetric, like `update_tstop` just below: every rank calls this
            // once per quantum regardless of whether its own `add_planes` grew anything, so a rank
            // whose registered executors never touch the height still participates in the reduction
            // instead of leaving a grown neighbor's `allreduce_max_u32` call waiting forever.
            sync_height(&mut self.lattice, self.transport.as_ref());
            let summaries: Vec<SectorPropensitySummary> =
                (0..num_sectors).map(|s| self.solver.sector_summary(s)).collect();
            let remaining = target - self.state.elapsed_time();
            let t_stop = self.time_incr.update_tstop(&summaries, self.transport.as_ref()).min(remaining);
            self.state.set_t_stop(t_stop);

            if (0..num_sectors).all(|s| self.solver.no_more_events(s)) {
                break;
            }

            for sector in 0..num_sectors {
                self.run_sector(sector, t_stop);
            }

            self.state.set_t_sector(t_stop);
            self.state.commit_sector();
            self.state.record_global_step();

            for i in 0..self.registry.periodic_actions_mut().len() {
                let state = self.state;
                self.registry.periodic_actions_mut()[i].run_if_due(&state, &mut self.lattice);
            }
        }
        self.lattice.set_during_simulation(false);
        for i in 0..self.registry.periodic_actions_mut().len() {
            let state = self.state;
            self.registry.periodic_actions_mut()[i].run_at_end_of_run(&state, &mut self.lattice);
        }
        Ok(())
    }

    fn run_sector(&mut self, sector: usize, t_stop: f64) {
        self.state.set_t_sector(0.0);
        let received = self.lattice.recv_ghosts_update(sector);
        self.reconcile_ghost_cells(&received);
        loop {
            if self.solver.no_more_events(sector) {
                break;
            }
            let Some((eid, dt)) = self.solver.choose_and_advance(sector, self.rng.as_mut()) else {
                break;
            };
            let next_t = self.state.t_sector() + dt;
            if next_t > t_stop {
                break;
            }
            self.state.set_t_sector(next_t);
            self.execute(eid, sector);
            self.state.record_local_event();
        }
        self.lattice.send_ghosts_update(sector, self.transport.as_ref());
        // `send_ghosts_update`'s exchange is a blocking round-trip: by the time it returns, this
        // rank's neighbor has already sent back whatever it owed us. Draining and reconciling that
        // now, rather than waiting for the next sector's step (a), keeps propensities for cells
        // that now belong to other sectors on this rank from going stale for a whole quantum.
        let received_on_send = self.lattice.recv_ghosts_update(sector);
        self.reconcile_ghost_cells(&received_on_send);
    }

    fn execute(&mut self, eid: EventId, sector: usize) {
        self.lattice.begin_tracking(TrackType::ChangedSet);
        if eid.is_over_lattice() {
            let (idx, _) = eid.over_lattice_info();
            let bbox = self.lattice.get_sector_planar_bbox(sector);
            let width = bbox.width().max(1);
            let height = bbox.height().max(1);
            let i = bbox.imin + (self.rng.next_uniform_open01() * f64::from(width)) as i32;
            let j = bbox.jmin + (self.rng.next_uniform_open01() * f64::from(height)) as i32;
            let k = self.lattice.current_height() as i32 - 1;
            let cell = CellInds::new(i.min(bbox.imax_p1 - 1), j.min(bbox.jmax_p1 - 1), k.max(0));
            let state = self.state;
            (self.registry.over_lattice_events()[idx].deposit)(cell, &state, &mut self.lattice);
        } else {
            let ctx = self.ctx.expect("ctx is frozen by the time any event executes");
            let (cell, kind) = eid.cell_centered_info(&ctx);
            let (g_idx, local_kind) = self.group_and_local_kind(kind);
            let state = self.state;
            match &self.registry.groups()[g_idx].kinds[local_kind].executor {
                Executor::AutoTrack(run) => run(cell, &state, &mut self.lattice),
                Executor::SemiManual { run, change_offsets } => {
                    let mut writes = Vec::new();
                    run(cell, &state, &self.lattice, &mut writes);
                    let mut entry = crate::executor::CellsToChange::new(&mut self.lattice, change_offsets);
                    entry.set_center(cell);
                    for w in writes {
                        match w {
                            PendingWrite::Int { offset_idx, slot, val } => entry.set_int(offset_idx, slot, val),
                            PendingWrite::Float { offset_idx, slot, val } => entry.set_float(offset_idx, slot, val),
                        }
                    }
                }
            }
        }
        let changed: BTreeSet<CellInds> = self.lattice.changed_cells().clone();
        let other: BTreeSet<CellInds> = self.lattice.other_cells().iter().copied().collect();
        self.reconcile_changes(&changed);
        self.reconcile_other_cells(&other);
    }

    fn group_and_local_kind(&self, kind: usize) -> (usize, usize) {
        let mut remaining = kind;
        for (g_idx, group) in self.registry.groups().iter().enumerate() {
            if remaining < group.len() {
                return (g_idx, remaining);
            }
            remaining -= group.len();
        }
        unreachable!("event kind index out of range of registered groups")
    }

    /// Recomputes propensities for every cell whose registered `read_offsets` could have been
    /// invalidated by a write to any cell in `changed` (reversed-offset reconciliation), and marks
    /// the changed cells themselves for ghost export.
    fn reconcile_changes(&mut self, changed: &BTreeSet<CellInds>) {
        self.reconcile(changed, true);
    }

    /// Reversed-offset reconciliation for cells materialized by `add_planes` mid-event (the
    /// auto-track "other" list): affected neighbors get their propensities recomputed, same as
    /// `reconcile_changes`, but the cells themselves need no self-update or export marking since
    /// they were never written through the change log.
    fn reconcile_other_cells(&mut self, other: &BTreeSet<CellInds>) {
        self.reconcile(other, false);
    }

    /// Reversed-offset reconciliation for cells this rank just received as ghost updates. The
    /// recomputed owned neighbors are re-inserted into their owning sector's export buffer (rather
    /// than the ghost cell itself, which isn't ours to export) so a later `send_ghosts_update`
    /// still propagates them even if that sector already ran this quantum.
    fn reconcile_ghost_cells(&mut self, touched: &BTreeSet<CellInds>) {
        self.reconcile(touched, false);
    }

    /// Shared reversed-offset sweep: for every `seed` and every registered `read_offset` `r` of
    /// every event kind, the cell at `seed + (-r)` has its propensities recomputed if it lies in
    /// this rank's owned domain. When `export_seeds` is set, each seed is also marked for export;
    /// otherwise each recomputed cell is (seeds here were never directly written, so exporting them
    /// verbatim would be wrong, but the cells whose propensities now differ still need to reach
    /// neighbor ranks).
    fn reconcile(&mut self, seeds: &BTreeSet<CellInds>, export_seeds: bool) {
        if seeds.is_empty() {
            return;
        }
        let ctx = self.ctx.expect("ctx is frozen by the time any event executes");
        let owned = self.lattice.get_local_planar_bbox(false);
        let height = self.lattice.current_height() as i32;
        let mut to_recompute: BTreeSet<(usize, CellInds)> = BTreeSet::new();
        for &c in seeds {
            if export_seeds {
                self.lattice.add_to_export_buffer_if_needed(c);
            }
            for (g_idx, group) in self.registry.groups().iter().enumerate() {
                for kind in &group.kinds {
                    for &r in kind.read_offsets.iter() {
                        let center = c + (-r);
                        if owned.contains(center.i, center.j) && (0..height).contains(&center.k) {
                            to_recompute.insert((g_idx, center));
                        }
                    }
                }
            }
        }
        for (g_idx, center) in to_recompute {
            if !export_seeds {
                self.lattice.add_to_export_buffer_if_needed(center);
            }
            let sector = sector_of(center.i, center.j, owned, self.lattice.decomp());
            let kind_offset = self.registry.kind_offset(g_idx);
            let props = (self.registry.groups()[g_idx].propensity)(center, &self.lattice);
            for (k_idx, &p) in props.iter().enumerate() {
                let eid = EventId::cell_centered(&ctx, center, kind_offset + k_idx);
                self.solver.add_or_update_cell_centered(eid, p, sector);
            }
        }
    }
}

/// Brings this rank's lattice height in line with the collective maximum. `add_planes` has no
/// transport to reach across ranks with (it may be called from inside a registered executor, which
/// only ever sees `&mut Lattice`), so the driver performs the reduction here instead, at points every
/// rank reaches symmetrically regardless of whether its own height happened to grow: once at
/// construction and once per quantum, before that quantum's ghost exchanges. A rank whose executors
/// grew the lattice mid-quantum is caught up by its neighbors at the start of the next quantum rather
/// than immediately, but since `allreduce_max_u32` must be called the same number of times by every
/// rank to avoid one rank waiting on a collective the others never issue, it cannot be called only on
/// the ranks that happened to grow.
fn sync_height(lattice: &mut Lattice, transport: &dyn PartitionTransport) {
    let local = lattice.current_height() as u32;
    let global = transport.allreduce_max_u32(local);
    if global > local {
        lattice.add_planes((global - local) as usize);
    }
}
