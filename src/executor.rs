//! Event executor abstraction: per-event callbacks in two contracts plus over-lattice events,
//! implemented as a sum type plus a visitor rather than an inheritance hierarchy.

use crate::cell_inds::{CellInds, Offset};
use crate::lattice::Lattice;
use crate::state::SimulationState;
use std::collections::BTreeSet;

/// An ordered, deduplicated set of [`Offset`]s. Ordered rather than hashed so iteration order
/// (and therefore reconciliation order) is deterministic.
#[derive(Clone, Debug, Default)]
pub struct OffsetSet(BTreeSet<Offset>);

impl OffsetSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `o`; returns `false` if it was already present.
    pub fn insert(&mut self, o: Offset) -> bool {
        self.0.insert(o)
    }

    /// Iterates offsets in ascending lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &Offset> {
        self.0.iter()
    }

    /// Number of distinct offsets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this set has no offsets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Offset> for OffsetSet {
    fn from_iter<T: IntoIterator<Item = Offset>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A short-lived handle the driver constructs per semi-manual-tracked event, binding a mutable
/// borrow of the lattice to the event kind's pre-registered change offsets. Created and discarded
/// per event; no long-lived references escape.
pub struct CellsToChange<'a> {
    lattice: &'a mut Lattice,
    change_offsets: &'a [Offset],
    center: Option<CellInds>,
}

impl<'a> CellsToChange<'a> {
    /// Builds a handle bound to `lattice` and the event kind's registered `change_offsets`.
    pub fn new(lattice: &'a mut Lattice, change_offsets: &'a [Offset]) -> Self {
        Self {
            lattice,
            change_offsets,
            center: None,
        }
    }

    /// Declares that subsequent `set_int`/`set_float` calls on this entry are anchored at `ci`.
    pub fn set_center(&mut self, ci: CellInds) {
        self.center = Some(ci);
    }

    /// The declared center, if any.
    #[must_use]
    pub fn center(&self) -> Option<CellInds> {
        self.center
    }

    /// Writes integer slot `which_slot` of the cell at `change_offsets[which_offset]` relative to
    /// the declared center.
    ///
    /// # Panics
    /// Panics if [`Self::set_center`] has not been called yet.
    pub fn set_int(&mut self, which_offset: usize, which_slot: usize, val: i32) {
        let center = self.center.expect("CellsToChange::set_center must be called before set_int");
        self.lattice.set_int(center + self.change_offsets[which_offset], which_slot, val);
    }

    /// Float counterpart of [`Self::set_int`].
    ///
    /// # Panics
    /// Panics if [`Self::set_center`] has not been called yet.
    pub fn set_float(&mut self, which_offset: usize, which_slot: usize, val: f64) {
        let center = self.center.expect("CellsToChange::set_center must be called before set_float");
        self.lattice.set_float(center + self.change_offsets[which_offset], which_slot, val);
    }
}

/// One write a [`Executor::SemiManual`] callback declares, to be applied by the driver after the
/// callback returns. Keeps the callback's `&Lattice` read borrow and the driver's later
/// `&mut Lattice` write borrow (via [`CellsToChange`]) from overlapping.
#[derive(Clone, Copy, Debug)]
pub enum PendingWrite {
    /// Write integer slot `slot` of the cell at `change_offsets[offset_idx]` (relative to the
    /// event's center) to `val`.
    Int {
        /// Index into the event kind's registered `change_offsets`.
        offset_idx: usize,
        /// Which integer slot to write.
        slot: usize,
        /// The value to write.
        val: i32,
    },
    /// Float counterpart of [`Self::Int`].
    Float {
        /// Index into the event kind's registered `change_offsets`.
        offset_idx: usize,
        /// Which float slot to write.
        slot: usize,
        /// The value to write.
        val: f64,
    },
}

/// A cell-centered event's execution contract.
pub enum Executor {
    /// The callback mutates the lattice directly; the driver installs `ChangedSet` tracking
    /// beforehand and reconciles from the resulting change log afterwards.
    AutoTrack(Box<dyn Fn(CellInds, &SimulationState, &mut Lattice)>),
    /// The callback only reads the lattice and declares its writes as [`PendingWrite`]s against
    /// pre-registered offsets; the driver applies them afterwards through a short-lived
    /// [`CellsToChange`]. Required for correctness in parallel mode: only declared offsets can be
    /// mapped to ghost export buffers.
    SemiManual {
        /// The callback itself.
        run: Box<dyn Fn(CellInds, &SimulationState, &Lattice, &mut Vec<PendingWrite>)>,
        /// Offsets a [`PendingWrite`]'s `offset_idx` may address, in registration order
        /// (positional, unlike [`OffsetSet`]).
        change_offsets: Vec<Offset>,
    },
}

impl Executor {
    /// Whether this executor is semi-manual (parallel-safe) rather than auto-track.
    #[must_use]
    pub const fn is_semi_manual(&self) -> bool {
        matches!(self, Self::SemiManual { .. })
    }
}

/// One registered cell-centered event kind: its executor plus the offsets the group's shared
/// propensity function reads for it (used to compute reversed-offset reconciliation
/// dependencies).
pub struct EventKind {
    /// How the event executes.
    pub executor: Executor,
    /// Offsets the shared propensity function reads to compute this kind's rate.
    pub read_offsets: OffsetSet,
}

/// An ordered group of `K` cell-centered event kinds sharing one propensity function. Mixed
/// auto-track/semi-manual registrations within one group are legal.
pub struct EventExecutorGroup {
    /// Shared propensity function: given a cell and the lattice, returns one propensity per
    /// registered kind, indexed the same way as `kinds`.
    pub propensity: Box<dyn Fn(CellInds, &Lattice) -> Vec<f64>>,
    /// The group's event kinds, in registration order.
    pub kinds: Vec<EventKind>,
}

impl EventExecutorGroup {
    /// Number of event kinds `K` registered in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether this group has no registered kinds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// An over-lattice event: fires uniformly over a sector's area rather than at a specific cell.
/// On execution the driver samples a uniform `(i, j)` inside the firing sector, sets
/// `k = height - 1`, then invokes `deposit`.
pub struct OverLatticeEvent {
    /// Scalar rate per unit horizontal area.
    pub rate: f64,
    /// Invoked with the sampled cell once the driver has chosen it.
    pub deposit: Box<dyn Fn(CellInds, &SimulationState, &mut Lattice)>,
}

impl OverLatticeEvent {
    /// Propensity this event contributes in a sector of the given area: `rate * sector_area`.
    #[must_use]
    pub fn propensity(&self, sector_area: i64) -> f64 {
        self.rate * sector_area as f64
    }
}
