//! Event and periodic-action registry: accumulates [`EventExecutorGroup`]s and
//! [`OverLatticeEvent`]s during setup, then freezes into an [`IdCtx`] once a
//! [`crate::simulation::Simulation`] first runs. The flattening constants are fixed for the life
//! of the run, derived from the local bounding box and kind count known only once registration is
//! closed.

use crate::executor::{EventExecutorGroup, OverLatticeEvent};
use crate::event_id::IdCtx;
use crate::lattice::Lattice;
use crate::state::SimulationState;

/// When a periodic action fires.
#[derive(Clone, Copy, Debug)]
pub enum PeriodicTrigger {
    /// Every `n` locally-executed events.
    EveryNLocalEvents(u64),
    /// Every `n` completed outer-loop quanta (global steps).
    EveryNGlobalSteps(u64),
    /// Whenever elapsed simulated time has advanced by at least `dt` since this action last fired.
    EveryElapsedTime(f64),
}

/// A user callback invoked between sectors once its trigger condition is met. `do_at_end` marks an
/// action to also fire once more when the run ends, whether or not its trigger was due at that
/// moment.
pub struct PeriodicAction {
    trigger: PeriodicTrigger,
    action: Box<dyn FnMut(&SimulationState, &mut Lattice)>,
    do_at_end: bool,
    last_fired_events: u64,
    last_fired_steps: u64,
    last_fired_time: f64,
}

impl PeriodicAction {
    /// Builds a periodic action firing per `trigger`. Use [`Self::fire_at_end_of_run`] to also
    /// mark it `doAtEnd`.
    pub fn new(trigger: PeriodicTrigger, action: Box<dyn FnMut(&SimulationState, &mut Lattice)>) -> Self {
        Self {
            trigger,
            action,
            do_at_end: false,
            last_fired_events: 0,
            last_fired_steps: 0,
            last_fired_time: 0.0,
        }
    }

    /// Marks this action to also fire unconditionally when [`crate::simulation::Simulation::run`]
    /// finishes.
    #[must_use]
    pub const fn fire_at_end_of_run(mut self) -> Self {
        self.do_at_end = true;
        self
    }

    fn due(&self, state: &SimulationState) -> bool {
        match self.trigger {
            PeriodicTrigger::EveryNLocalEvents(n) => state.num_local_events() >= self.last_fired_events + n,
            PeriodicTrigger::EveryNGlobalSteps(n) => state.num_global_steps() >= self.last_fired_steps + n,
            PeriodicTrigger::EveryElapsedTime(dt) => state.elapsed_time() >= self.last_fired_time + dt,
        }
    }

    fn fire(&mut self, state: &SimulationState, lattice: &mut Lattice) {
        (self.action)(state, lattice);
        self.last_fired_events = state.num_local_events();
        self.last_fired_steps = state.num_global_steps();
        self.last_fired_time = state.elapsed_time();
    }

    /// Runs the action if due, updating its bookkeeping regardless.
    pub fn run_if_due(&mut self, state: &SimulationState, lattice: &mut Lattice) {
        if self.due(state) {
            self.fire(state, lattice);
        }
    }

    /// Unconditionally fires the action if it was registered with
    /// [`Self::fire_at_end_of_run`]; called once by the driver as a run concludes.
    pub fn run_at_end_of_run(&mut self, state: &SimulationState, lattice: &mut Lattice) {
        if self.do_at_end {
            self.fire(state, lattice);
        }
    }
}

/// Accumulates registered event groups, over-lattice events, and periodic actions for one
/// [`crate::simulation::Simulation`].
#[derive(Default)]
pub struct IdRegistry {
    groups: Vec<EventExecutorGroup>,
    over_lattice: Vec<OverLatticeEvent>,
    periodic_actions: Vec<PeriodicAction>,
    ctx: Option<IdCtx>,
}

impl IdRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cell-centered event group, returning its group index.
    pub fn add_event_group(&mut self, group: EventExecutorGroup) -> usize {
        self.groups.push(group);
        self.groups.len() - 1
    }

    /// Registers an over-lattice event, returning its index (used to build its [`crate::event_id::EventId`]).
    pub fn add_over_lattice_event(&mut self, ev: OverLatticeEvent) -> usize {
        self.over_lattice.push(ev);
        self.over_lattice.len() - 1
    }

    /// Registers a periodic action.
    pub fn add_periodic_action(&mut self, action: PeriodicAction) {
        self.periodic_actions.push(action);
    }

    /// Registered cell-centered event groups, in registration order.
    #[must_use]
    pub fn groups(&self) -> &[EventExecutorGroup] {
        &self.groups
    }

    /// Registered over-lattice events, in registration order.
    #[must_use]
    pub fn over_lattice_events(&self) -> &[OverLatticeEvent] {
        &self.over_lattice
    }

    /// Mutable access to periodic actions, for the driver to poll after each sector.
    pub fn periodic_actions_mut(&mut self) -> &mut [PeriodicAction] {
        &mut self.periodic_actions
    }

    /// Total number of distinct cell-centered event kinds across every registered group: the
    /// `numKinds` term of the [`IdCtx`] flattening.
    #[must_use]
    pub fn num_cell_centered_kinds(&self) -> usize {
        self.groups.iter().map(EventExecutorGroup::len).sum()
    }

    /// Number of registered over-lattice events.
    #[must_use]
    pub fn num_over_lattice(&self) -> usize {
        self.over_lattice.len()
    }

    /// The kind index of the `group_idx`-th group's first event kind, i.e. the running offset
    /// used so each group's `propensity` output maps onto disjoint event-kind slots.
    #[must_use]
    pub fn kind_offset(&self, group_idx: usize) -> usize {
        self.groups[..group_idx].iter().map(EventExecutorGroup::len).sum()
    }

    /// Freezes (or returns the already-frozen) [`IdCtx`] for this registry, derived from the
    /// lattice's owned bounding box and the registered kind count. Never changes once set: the
    /// owned bounding box is assumed fixed for the life of the run.
    pub fn ctx(&mut self, lattice: &Lattice) -> IdCtx {
        *self.ctx.get_or_insert_with(|| {
            let bbox = lattice.get_local_planar_bbox(false);
            IdCtx::new(bbox.width(), bbox.height(), self.num_cell_centered_kinds().max(1), bbox.imin, bbox.jmin)
        })
    }
}
