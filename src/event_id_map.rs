//! Module containing `EventIdMap`, a dense two-level index from an [`EventId`] to a caller-chosen
//! payload `T`.
//!
//! Unlike a hash map, every index is computed in O(1) straight from the id's packed integers —
//! no hashing, no collisions — exploiting the bounded extent of both the over-lattice slot space
//! (fixed at construction) and the cell-centered slot space, which grows only by appending
//! planes: every cell-centered slot that could exist in a materialized plane is allocated, there
//! is no sparsity to exploit the way a general sparse array would.

use crate::event_id::{EventId, IdCtx};

/// Dense two-level indirection from [`EventId`] to `T`.
///
/// * `over_lattice[sector][idx]` is allocated once, up front, for the fixed number of
///   over-lattice event kinds.
/// * `cell_centered[k]` is a per-plane flat vector of length `w * h * num_kinds`, pushed lazily
///   as [`EventIdMap::extend_to_height`] is called when the lattice grows.
#[derive(Clone, Debug)]
pub struct EventIdMap<T> {
    over_lattice: Vec<Vec<T>>,
    cell_centered: Vec<Vec<T>>,
    slots_per_plane: usize,
}

impl<T: Clone + Default> EventIdMap<T> {
    /// Builds a map with `num_over_lattice` pre-allocated over-lattice slots per sector and no
    /// cell-centered planes yet (call [`Self::extend_to_height`] before use).
    #[must_use]
    pub fn new(num_sectors: usize, num_over_lattice: usize, slots_per_plane: usize) -> Self {
        Self {
            over_lattice: vec![vec![T::default(); num_over_lattice]; num_sectors],
            cell_centered: Vec::new(),
            slots_per_plane,
        }
    }

    /// Ensures the cell-centered storage covers planes `0..height`, pushing freshly
    /// `T::default()`-filled planes as needed. Idempotent if already covered.
    pub fn extend_to_height(&mut self, height: usize) {
        while self.cell_centered.len() < height {
            self.cell_centered.push(vec![T::default(); self.slots_per_plane]);
        }
    }

    /// Number of planes currently materialized.
    #[must_use]
    pub fn materialized_height(&self) -> usize {
        self.cell_centered.len()
    }

    /// Returns a mutable reference to the slot addressed by `eid`, or `None` if it is
    /// cell-centered and its plane `k` has not yet been materialized via
    /// [`Self::extend_to_height`].
    pub fn get_mut(&mut self, eid: EventId, ctx: &IdCtx) -> Option<&mut T> {
        if eid.is_over_lattice() {
            let (idx, sector) = eid.over_lattice_info();
            self.over_lattice.get_mut(sector).and_then(|s| s.get_mut(idx))
        } else {
            let (ci, kind) = eid.cell_centered_info(ctx);
            let k = ci.k as usize;
            let flat = flat_slot_index(ctx, ci, kind);
            self.cell_centered.get_mut(k).and_then(|p| p.get_mut(flat))
        }
    }

    /// Returns a shared reference to the slot addressed by `eid`. Precondition: the slot has
    /// already been materialized (i.e. [`Self::get_mut`] with the same id would be `Some`).
    ///
    /// # Panics
    /// Panics if the slot has not been materialized.
    #[must_use]
    pub fn get(&self, eid: EventId, ctx: &IdCtx) -> &T {
        if eid.is_over_lattice() {
            let (idx, sector) = eid.over_lattice_info();
            &self.over_lattice[sector][idx]
        } else {
            let (ci, kind) = eid.cell_centered_info(ctx);
            let k = ci.k as usize;
            let flat = flat_slot_index(ctx, ci, kind);
            &self.cell_centered[k][flat]
        }
    }

    /// Writes `val` into the slot addressed by `eid`, extending cell-centered storage as needed
    /// to cover plane `k`.
    pub fn add_or_update(&mut self, eid: EventId, val: T, ctx: &IdCtx) {
        if !eid.is_over_lattice() {
            let (ci, _) = eid.cell_centered_info(ctx);
            self.extend_to_height((ci.k as usize) + 1);
        }
        if let Some(slot) = self.get_mut(eid, ctx) {
            *slot = val;
        }
    }
}

/// Flat index of `(ci, kind)` within one plane's slot vector; `ctx.w * ctx.h * kind_count` wide.
fn flat_slot_index(ctx: &IdCtx, ci: CellIndsLite, kind: usize) -> usize {
    let i = i64::from(ci.i - ctx.i_min);
    let j = i64::from(ci.j - ctx.j_min);
    (i + ctx.w * (j + ctx.h * (kind as i64))) as usize
}

// Local alias to avoid importing `crate::cell_inds::CellInds` just for field access clarity in
// `flat_slot_index`'s signature.
use crate::cell_inds::CellInds as CellIndsLite;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_inds::CellInds;

    fn ctx() -> IdCtx {
        IdCtx::new(4, 4, 2, 0, 0)
    }

    #[test]
    fn over_lattice_slots_are_preallocated() {
        let ctx = ctx();
        let mut map: EventIdMap<f64> = EventIdMap::new(2, 3, 4 * 4 * 2);
        let eid = EventId::over_lattice(1, 0);
        assert_eq!(*map.get(eid, &ctx), 0.0);
        map.add_or_update(eid, 5.0, &ctx);
        assert_eq!(*map.get(eid, &ctx), 5.0);
    }

    #[test]
    fn cell_centered_materializes_lazily() {
        let ctx = ctx();
        let mut map: EventIdMap<f64> = EventIdMap::new(1, 0, 4 * 4 * 2);
        let eid = EventId::cell_centered(&ctx, CellInds::new(1, 2, 0), 1);
        assert!(map.get_mut(eid, &ctx).is_none());
        map.add_or_update(eid, 9.0, &ctx);
        assert_eq!(*map.get(eid, &ctx), 9.0);
        assert_eq!(map.materialized_height(), 1);
    }

    #[test]
    fn extend_to_height_is_idempotent() {
        let mut map: EventIdMap<f64> = EventIdMap::new(1, 0, 16);
        map.extend_to_height(3);
        map.extend_to_height(3);
        map.extend_to_height(2);
        assert_eq!(map.materialized_height(), 3);
    }

    #[test]
    fn distinct_cells_and_kinds_do_not_alias() {
        let ctx = ctx();
        let mut map: EventIdMap<f64> = EventIdMap::new(1, 0, 4 * 4 * 2);
        let a = EventId::cell_centered(&ctx, CellInds::new(0, 0, 0), 0);
        let b = EventId::cell_centered(&ctx, CellInds::new(0, 0, 0), 1);
        map.add_or_update(a, 1.0, &ctx);
        map.add_or_update(b, 2.0, &ctx);
        assert_eq!(*map.get(a, &ctx), 1.0);
        assert_eq!(*map.get(b, &ctx), 2.0);
    }
}
