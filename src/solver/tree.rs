//! Binary-tree solver: each sector maintains an implicit binary sum-tree — leaves
//! hold propensities, every internal node holds its subtree's total — stored as one flat,
//! 1-indexed array (`nodes[1]` is the root; node `i`'s children are `2*i` and `2*i + 1`). Update
//! and selection are both logarithmic in the number of leaves, trading the grouped-map solver's
//! simplicity ([`super::GroupedMapSolver`]) for better asymptotic behavior on event populations
//! with many distinct propensity values.
//!
//! An alternative growth scheme would append new leaves one at a time via an explicit tail-append/
//! ring-rotation shuffle; this implementation instead doubles the array's leaf capacity on
//! overflow (the same amortized-growth trick used by `Vec` itself) and recycles vacated leaf slots
//! through a freelist. Both give the same amortized O(log n) bounds and the same observable
//! contract; see `DESIGN.md` for the trade-off.

use super::{Solver, SolverEnum};
use crate::event_id::{EventId, IdCtx};
use crate::event_id_map::EventIdMap;
use crate::rng::EventRng;
use crate::time_incr::SectorPropensitySummary;

struct TreeSector {
    /// `nodes[1..2*cap]`; index 0 is unused. Leaves occupy `[cap, 2*cap)`.
    nodes: Vec<f64>,
    cap: usize,
    /// `id_at[slot]` names the event occupying leaf `cap + slot`, if any.
    id_at: Vec<Option<EventId>>,
    free_slots: Vec<usize>,
    next_slot: usize,
    over_lattice_total: f64,
    num_cell_centered: usize,
    cell_centered_total: f64,
}

impl TreeSector {
    fn new() -> Self {
        Self {
            nodes: vec![0.0; 2],
            cap: 1,
            id_at: vec![None],
            free_slots: Vec::new(),
            next_slot: 0,
            over_lattice_total: 0.0,
            num_cell_centered: 0,
            cell_centered_total: 0.0,
        }
    }

    fn root(&self) -> f64 {
        self.nodes[1]
    }

    fn grow(&mut self, new_cap: usize) {
        let mut nodes = vec![0.0; 2 * new_cap];
        nodes[new_cap..new_cap + self.cap].copy_from_slice(&self.nodes[self.cap..2 * self.cap]);
        for i in (1..new_cap).rev() {
            nodes[i] = nodes[2 * i] + nodes[2 * i + 1];
        }
        self.nodes = nodes;
        self.id_at.resize(new_cap, None);
        self.cap = new_cap;
    }

    fn allocate_slot(&mut self) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            return slot;
        }
        if self.next_slot == self.cap {
            self.grow((self.cap * 2).max(1));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn set_leaf(&mut self, slot: usize, eid: EventId, val: f64) {
        let idx = self.cap + slot;
        let old = self.nodes[idx];
        self.nodes[idx] = val;
        if eid.is_over_lattice() {
            self.over_lattice_total += val - old;
        } else {
            self.cell_centered_total += val - old;
            if old == 0.0 && val != 0.0 {
                self.num_cell_centered += 1;
            } else if old != 0.0 && val == 0.0 {
                self.num_cell_centered -= 1;
            }
        }
        let mut i = idx;
        while i > 1 {
            i /= 2;
            self.nodes[i] = self.nodes[2 * i] + self.nodes[2 * i + 1];
        }
    }

    fn remove(&mut self, slot: usize) {
        let eid = self.id_at[slot].expect("remove called on an empty slot");
        self.set_leaf(slot, eid, 0.0);
        self.id_at[slot] = None;
        self.free_slots.push(slot);
    }

    fn max_cell_centered_leaf(&self) -> f64 {
        (0..self.next_slot)
            .filter(|&s| matches!(self.id_at[s], Some(e) if !e.is_over_lattice()))
            .map(|s| self.nodes[self.cap + s])
            .fold(0.0, f64::max)
    }

    /// Descends from the root following the cumulative-sum threshold `r`, returning the leaf slot
    /// it lands in.
    fn select(&self, mut r: f64) -> usize {
        let mut i = 1;
        while i < self.cap {
            let left = 2 * i;
            if r < self.nodes[left] {
                i = left;
            } else {
                r -= self.nodes[left];
                i = left + 1;
            }
        }
        i - self.cap
    }
}

/// Implicit binary sum-tree solver; see the module doc comment for the growth strategy.
pub struct BinaryTreeSolver {
    ctx: Option<IdCtx>,
    sectors: Vec<TreeSector>,
    locations: EventIdMap<Option<usize>>,
}

impl Default for BinaryTreeSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryTreeSolver {
    /// An empty solver; call [`Solver::begin_build`] before use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: None,
            sectors: Vec::new(),
            locations: EventIdMap::new(0, 0, 0),
        }
    }

    fn ctx(&self) -> IdCtx {
        *self.ctx.as_ref().expect("BinaryTreeSolver::begin_build must be called before use")
    }

    fn insert_or_update(&mut self, eid: EventId, propensity: f64, sector: usize) {
        let ctx = self.ctx();
        let existing = self.locations.get_mut(eid, &ctx).and_then(|slot| *slot);
        match (existing, propensity > 0.0) {
            (Some(slot), true) => self.sectors[sector].set_leaf(slot, eid, propensity),
            (Some(slot), false) => {
                self.sectors[sector].remove(slot);
                self.locations.add_or_update(eid, None, &ctx);
            }
            (None, true) => {
                let slot = self.sectors[sector].allocate_slot();
                self.sectors[sector].id_at[slot] = Some(eid);
                self.sectors[sector].set_leaf(slot, eid, propensity);
                self.locations.add_or_update(eid, Some(slot), &ctx);
            }
            (None, false) => {}
        }
    }
}

impl Solver for BinaryTreeSolver {
    fn begin_build(&mut self, ctx: IdCtx, num_sectors: usize, num_over_lattice: usize, num_reserved_events: usize) {
        self.ctx = Some(ctx);
        self.sectors = (0..num_sectors).map(|_| TreeSector::new()).collect();
        let slots_per_plane = (ctx.w * ctx.h * ctx.num_kinds).max(0) as usize;
        self.locations = EventIdMap::new(num_sectors, num_over_lattice, slots_per_plane);
        let _ = num_reserved_events; // capacity grows by doubling; no separate reservation path.
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
        let sec = &self.sectors[sector];
        let total = sec.root();
        if total <= 0.0 {
            return None;
        }
        let r = rng.next_uniform_open01() * total;
        let slot = sec.select(r);
        let eid = sec.id_at[slot]?;
        let dt = -rng.next_uniform_open01().ln() / total;
        Some((eid, dt))
    }

    fn no_more_events(&self, sector: usize) -> bool {
        self.sectors[sector].root() <= 0.0
    }

    fn no_cell_centered_events(&self, sector: usize) -> bool {
        self.sectors[sector].num_cell_centered == 0
    }

    fn sector_summary(&self, sector: usize) -> SectorPropensitySummary {
        let s = &self.sectors[sector];
        SectorPropensitySummary {
            total_propensity: s.root(),
            over_lattice_propensity: s.over_lattice_total,
            num_cell_centered_events: s.num_cell_centered,
            max_cell_centered_leaf: s.max_cell_centered_leaf(),
        }
    }

    fn num_sectors(&self) -> usize {
        self.sectors.len()
    }
}

impl From<BinaryTreeSolver> for SolverEnum {
    fn from(s: BinaryTreeSolver) -> Self {
        Self::BinaryTreeSolver(s)
    }
}
