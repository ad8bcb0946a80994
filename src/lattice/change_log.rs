//! `TrackType` and `ChangeLog`: the per-run-phase change-tracking modes a [`super::Lattice`]
//! records writes under.

use crate::cell_inds::CellInds;
use std::collections::BTreeSet;

/// Selects how [`super::Lattice::set_int`]/[`super::Lattice::set_float`] record writes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TrackType {
    /// No tracking; writes are direct.
    #[default]
    None,
    /// Set a dirty flag on any write, without recording which cells changed.
    PresenceOnly,
    /// Accumulate the ordered set of changed cells, for deterministic replay.
    ChangedSet,
    /// Track only "other" cells reported by plane appends, not individual writes.
    OtherOnly,
}

/// The log accumulated while a [`TrackType`] other than `None` is active.
///
/// `changed` is a `BTreeSet`, never a hash set: reconciliation must iterate changed cells in
/// `(i, j, k)` lexicographic order for trajectories to be reproducible across runs with the same
/// seed.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    track: TrackType,
    dirty: bool,
    changed: BTreeSet<CellInds>,
    other: Vec<CellInds>,
}

impl ChangeLog {
    /// Starts a fresh log under the given tracking mode, discarding any prior contents.
    pub fn begin(&mut self, track: TrackType) {
        self.track = track;
        self.dirty = false;
        self.changed.clear();
        self.other.clear();
    }

    /// Current tracking mode.
    #[must_use]
    pub const fn track_type(&self) -> TrackType {
        self.track
    }

    /// Records a write to `ci`, per the active tracking mode.
    pub fn record_write(&mut self, ci: CellInds) {
        match self.track {
            TrackType::None => {}
            TrackType::PresenceOnly | TrackType::OtherOnly => self.dirty = true,
            TrackType::ChangedSet => {
                self.dirty = true;
                self.changed.insert(ci);
            }
        }
    }

    /// Records an "other" cell reported by a plane append. Populated under both
    /// [`TrackType::OtherOnly`] and [`TrackType::ChangedSet`]: a cell materialized by `add_planes`
    /// mid-event is neither a direct write nor absent, so auto-track executors drain it alongside
    /// `changed_cells` rather than lose it.
    pub fn record_other(&mut self, ci: CellInds) {
        if matches!(self.track, TrackType::ChangedSet | TrackType::OtherOnly) {
            self.dirty = true;
            self.other.push(ci);
        }
    }

    /// Whether any write was recorded since [`Self::begin`].
    #[must_use]
    pub const fn has_changed(&self) -> bool {
        self.dirty
    }

    /// The ordered set of distinct changed cells (only populated under [`TrackType::ChangedSet`]).
    #[must_use]
    pub const fn changed_cells(&self) -> &BTreeSet<CellInds> {
        &self.changed
    }

    /// The "other" cells recorded under [`TrackType::OtherOnly`] or [`TrackType::ChangedSet`], in
    /// report order.
    #[must_use]
    pub fn other_cells(&self) -> &[CellInds] {
        &self.other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_mode_never_sets_dirty() {
        let mut log = ChangeLog::default();
        log.begin(TrackType::None);
        log.record_write(CellInds::new(0, 0, 0));
        assert!(!log.has_changed());
    }

    #[test]
    fn presence_only_does_not_record_cells() {
        let mut log = ChangeLog::default();
        log.begin(TrackType::PresenceOnly);
        log.record_write(CellInds::new(1, 2, 3));
        assert!(log.has_changed());
        assert!(log.changed_cells().is_empty());
    }

    #[test]
    fn changed_set_dedups_and_orders() {
        let mut log = ChangeLog::default();
        log.begin(TrackType::ChangedSet);
        log.record_write(CellInds::new(1, 0, 0));
        log.record_write(CellInds::new(0, 0, 0));
        log.record_write(CellInds::new(1, 0, 0));
        let v: Vec<_> = log.changed_cells().iter().copied().collect();
        assert_eq!(v, vec![CellInds::new(0, 0, 0), CellInds::new(1, 0, 0)]);
    }

    #[test]
    fn changed_set_also_records_other_cells() {
        let mut log = ChangeLog::default();
        log.begin(TrackType::ChangedSet);
        log.record_write(CellInds::new(1, 0, 0));
        log.record_other(CellInds::new(5, 5, 1));
        assert!(log.changed_cells().contains(&CellInds::new(1, 0, 0)));
        assert_eq!(log.other_cells(), &[CellInds::new(5, 5, 1)]);
    }

    #[test]
    fn other_only_ignores_plain_writes() {
        let mut log = ChangeLog::default();
        log.begin(TrackType::OtherOnly);
        log.record_write(CellInds::new(0, 0, 0));
        assert!(!log.has_changed());
        log.record_other(CellInds::new(2, 2, 2));
        assert!(log.has_changed());
        assert_eq!(log.other_cells(), &[CellInds::new(2, 2, 2)]);
    }

    #[test]
    fn begin_resets_state() {
        let mut log = ChangeLog::default();
        log.begin(TrackType::ChangedSet);
        log.record_write(CellInds::new(0, 0, 0));
        log.begin(TrackType::ChangedSet);
        assert!(!log.has_changed());
        assert!(log.changed_cells().is_empty());
    }
}
