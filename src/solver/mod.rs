//! Solver: the per-sector structure that picks the next event to fire and the `Δt` by which the
//! sector's clock advances. Two interchangeable strategies are offered behind one trait: a caller
//! picks a concrete struct at construction time and the driver only ever sees [`SolverEnum`]
//! through the [`Solver`] trait.

mod grouped;
mod tree;

pub use grouped::GroupedMapSolver;
pub use tree::BinaryTreeSolver;

use crate::event_id::{EventId, IdCtx};
use crate::rng::EventRng;
use crate::time_incr::SectorPropensitySummary;
use enum_dispatch::enum_dispatch;

/// Picks the next event to fire within a sector and the `Δt` by which its clock advances. Every
/// method is sector-scoped: a solver owns independent bookkeeping per sector so that sectors may
/// be processed (and reconciled) without cross-talk.
#[enum_dispatch]
pub trait Solver {
    /// Resets all sectors to empty and reserves storage for `num_over_lattice` over-lattice event
    /// slots per sector plus room for roughly `num_reserved_events` cell-centered events. `ctx` is
    /// the process-wide flattening context, fixed for the run and remembered internally so later
    /// calls need not repeat it. Must be followed by zero or more
    /// `add_cell_centered`/`add_over_lattice` calls and a closing `end_build` before the solver is
    /// queried.
    fn begin_build(&mut self, ctx: IdCtx, num_sectors: usize, num_over_lattice: usize, num_reserved_events: usize);

    /// Registers a cell-centered event's initial propensity during a bulk rebuild.
    ///
    /// # Panics
    /// May panic if `propensity <= 0.0`; zero-propensity events are never stored.
    fn add_cell_centered(&mut self, eid: EventId, propensity: f64, sector: usize);

    /// Registers an over-lattice event's initial propensity during a bulk rebuild.
    ///
    /// # Panics
    /// May panic if `propensity <= 0.0`.
    fn add_over_lattice(&mut self, eid: EventId, propensity: f64, sector: usize);

    /// Closes a `begin_build`/`add_*` bracket. A no-op for both current implementations; exists
    /// so a future implementation may defer bulk index construction to this point.
    fn end_build(&mut self);

    /// Adds, updates, or (if `propensity <= 0.0`) removes a single cell-centered event's
    /// propensity. The steady-state entry point used outside of a rebuild.
    fn add_or_update_cell_centered(&mut self, eid: EventId, propensity: f64, sector: usize);

    /// Samples the next event to fire in `sector` and the `Δt` by which its clock should advance,
    /// drawing two independent uniforms from `rng`. Returns `None` if the
    /// sector currently holds no events with positive propensity.
    fn choose_and_advance(&mut self, sector: usize, rng: &mut dyn EventRng) -> Option<(EventId, f64)>;

    /// Whether `sector` currently holds no events at all (cell-centered or over-lattice).
    fn no_more_events(&self, sector: usize) -> bool;

    /// Whether `sector` currently holds no cell-centered events (over-lattice events may remain).
    /// Used by the driver to decide whether a sector can still make local progress.
    fn no_cell_centered_events(&self, sector: usize) -> bool;

    /// Snapshot of `sector`'s current propensities, consumed by a [`crate::time_incr::TimeIncrScheme`]
    /// to compute the next quantum bound.
    fn sector_summary(&self, sector: usize) -> SectorPropensitySummary;

    /// Number of sectors this solver is currently built for.
    fn num_sectors(&self) -> usize;
}

/// The concrete solver a [`crate::simulation::Simulation`] is configured with. Never matched on
/// directly outside this module; callers only see the [`Solver`] trait.
#[enum_dispatch(Solver)]
pub enum SolverEnum {
    /// Groups events by propensity value in a `BTreeMap`, trading a linear-in-group-size
    /// selection scan for simple, exact accounting.
    GroupedMapSolver,
    /// Maintains an implicit binary sum-tree (propensities at the leaves, subtree sums at
    /// internal nodes) for logarithmic update and selection.
    BinaryTreeSolver,
}
