//! Grouped-map solver: events are bucketed by propensity value in a `BTreeMap`,
//! selection walks buckets in ascending-propensity order accumulating a running sum until it
//! crosses the sampled threshold. Simple and exact; selection cost is linear in the number of
//! distinct propensity values times average bucket size rather than logarithmic, a deliberate
//! trade against the binary-tree solver's [`super::BinaryTreeSolver`] (see `DESIGN.md`).

use super::{Solver, SolverEnum};
use crate::event_id::{EventId, IdCtx};
use crate::event_id_map::EventIdMap;
use crate::rng::EventRng;
use crate::time_incr::SectorPropensitySummary;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

/// A propensity value usable as a `BTreeMap` key. Valid only for finite, non-negative values
/// (every propensity in this engine is): for that restricted domain, comparing the raw IEEE-754
/// bit pattern agrees with numeric comparison, so no `f64: Ord` wrapper crate is needed.
#[derive(Clone, Copy, Debug, PartialEq)]
struct PropKey(f64);

impl Eq for PropKey {}

impl PartialOrd for PropKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.to_bits().cmp(&other.0.to_bits())
    }
}

#[derive(Default)]
struct Bucket {
    ids: VecDeque<EventId>,
}

#[derive(Default)]
struct GroupedSector {
    groups: BTreeMap<PropKey, Bucket>,
    over_lattice_total: f64,
    cell_centered_total: f64,
    num_cell_centered: usize,
    max_cell_centered_leaf: f64,
}

impl GroupedSector {
    fn total(&self) -> f64 {
        self.over_lattice_total + self.cell_centered_total
    }

    fn insert(&mut self, eid: EventId, propensity: f64) {
        self.groups.entry(PropKey(propensity)).or_default().ids.push_back(eid);
        if eid.is_over_lattice() {
            self.over_lattice_total += propensity;
        } else {
            self.cell_centered_total += propensity;
            self.num_cell_centered += 1;
            self.max_cell_centered_leaf = self.max_cell_centered_leaf.max(propensity);
        }
    }

    /// Removes one occurrence of `eid` known to have propensity `old`. The bucket's `VecDeque` is
    /// scanned linearly (buckets are typically small: identical propensities are the common case
    /// this solver optimizes for, not a pathological one).
    fn remove(&mut self, eid: EventId, old: f64) {
        let key = PropKey(old);
        if let Some(bucket) = self.groups.get_mut(&key) {
            if let Some(pos) = bucket.ids.iter().position(|&e| e == eid) {
                bucket.ids.remove(pos);
            }
            if bucket.ids.is_empty() {
                self.groups.remove(&key);
            }
        }
        if eid.is_over_lattice() {
            self.over_lattice_total -= old;
        } else {
            self.cell_centered_total -= old;
            self.num_cell_centered = self.num_cell_centered.saturating_sub(1);
            self.max_cell_centered_leaf = self.recompute_max_cell_centered();
        }
    }

    fn recompute_max_cell_centered(&self) -> f64 {
        self.groups
            .keys()
            .rev()
            .find_map(|key| {
                let bucket = &self.groups[key];
                bucket.ids.iter().any(|e| !e.is_over_lattice()).then_some(key.0)
            })
            .unwrap_or(0.0)
    }
}

/// Groups events by propensity value. See the module doc comment for the
/// selection-cost trade-off against [`super::BinaryTreeSolver`].
#[derive(Default)]
pub struct GroupedMapSolver {
    ctx: Option<IdCtx>,
    sectors: Vec<GroupedSector>,
    locations: EventIdMap<Option<PropKey>>,
}

impl GroupedMapSolver {
    /// An empty solver; call [`Solver::begin_build`] before use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: None,
            sectors: Vec::new(),
            locations: EventIdMap::new(0, 0, 0),
        }
    }

    fn ctx(&self) -> &IdCtx {
        self.ctx.as_ref().expect("GroupedMapSolver::begin_build must be called before use")
    }

    fn insert_or_update(&mut self, eid: EventId, propensity: f64, sector: usize) {
        let ctx = *self.ctx();
        let existing = self.locations.get_mut(eid, &ctx).and_then(|slot| *slot);
        if let Some(old_key) = existing {
            self.sectors[sector].remove(eid, old_key.0);
        }
        if propensity > 0.0 {
            self.sectors[sector].insert(eid, propensity);
            self.locations.add_or_update(eid, Some(PropKey(propensity)), &ctx);
        } else {
            self.locations.add_or_update(eid, None, &ctx);
        }
    }
}

impl Solver for GroupedMapSolver {
    fn begin_build(&mut self, ctx: IdCtx, num_sectors: usize, num_over_lattice: usize, num_reserved_events: usize) {
        self.ctx = Some(ctx);
        self.sectors = (0..num_sectors).map(|_| GroupedSector::default()).collect();
        let slots_per_plane = (ctx.w * ctx.h * ctx.num_kinds).max(0) as usize;
        self.locations = EventIdMap::new(num_sectors, num_over_lattice, slots_per_plane);
        let _ = num_reserved_events; // no pre-sizing benefit for a BTreeMap-backed structure.
    }

    fn add_cell_centered(&mut self, eid: EventId, propensity: f64, sector: usize) {
        debug_assert!(propensity > 0.0, "add_cell_centered requires a positive propensity");
        self.insert_or_update(eid, propensity, sector);
    }

    fn add_over_lattice(&mut self, eid: EventId, propensity: f64, sector: usize) {
        debug_assert!(propensity > 0.0, "add_over_lattice requires a positive propensity");
        self.insert_or_update(eid, propensity, sector);
    }

    fn end_build(&mut self) {}

    fn add_or_update_cell_centered(&mut self, eid: EventId, propensity: f64, sector: usize) {
        self.insert_or_update(eid, propensity, sector);
    }

    fn choose_and_advance(&mut self, sector: usize, rng: &mut dyn EventRng) -> Option<(EventId, f64)> {
        let total = self.sectors[sector].total();
        if total <= 0.0 {
            return None;
        }
        let r = rng.next_uniform_open01() * total;
        let mut acc = 0.0;
        let mut chosen = None;
        'outer: for (key, bucket) in &self.sectors[sector].groups {
            for &eid in &bucket.ids {
                acc += key.0;
                if acc >= r {
                    chosen = Some(eid);
                    break 'outer;
                }
            }
        }
        let chosen = chosen.or_else(|| {
            self.sectors[sector].groups.values().next_back().and_then(|b| b.ids.back().copied())
        })?;
        let dt = -rng.next_uniform_open01().ln() / total;
        Some((chosen, dt))
    }

    fn no_more_events(&self, sector: usize) -> bool {
        self.sectors[sector].total() <= 0.0
    }

    fn no_cell_centered_events(&self, sector: usize) -> bool {
        self.sectors[sector].num_cell_centered == 0
    }

    fn sector_summary(&self, sector: usize) -> SectorPropensitySummary {
        let s = &self.sectors[sector];
        SectorPropensitySummary {
            total_propensity: s.total(),
            over_lattice_propensity: s.over_lattice_total,
            num_cell_centered_events: s.num_cell_centered,
            max_cell_centered_leaf: s.max_cell_centered_leaf,
        }
    }

    fn num_sectors(&self) -> usize {
        self.sectors.len()
    }
}

impl From<GroupedMapSolver> for SolverEnum {
    fn from(s: GroupedMapSolver) -> Self {
        Self::GroupedMapSolver(s)
    }
}
