//! Module containing `EventId` and the process-wide flattening constants (`IdCtx`) used to
//! encode/decode it.
//!
//! An event id is one of two disjoint shapes:
//!
//! * an *over-lattice* event `(overLatticeIndex, sector)`, encoded with `e2 < 0`;
//! * a *cell-centered* event `(cell, eventKind)`, encoded with `e2 = k >= 0`.
//!
//! The process-wide flattening constants are modeled as the owned `IdCtx` value below rather than
//! mutable globals: cell-centered encode/decode take it explicitly.

use crate::cell_inds::CellInds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The flattening constants used to pack a `CellInds` + event-kind pair into `EventId::e1`.
///
/// Set once, during the first simulation run's preamble, from the local bounding box and the
/// number of registered cell-centered event kinds. Never reconfigured afterwards: the local
/// bounding box is assumed fixed for the whole run, so no cell ever migrates between ranks.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IdCtx {
    /// Width of the owned (non-ghost) horizontal bounding box, i.e. `W` in `flat(i,j,kind)`.
    pub w: i64,
    /// Height of the owned (non-ghost) horizontal bounding box, i.e. `H` in `flat(i,j,kind)`.
    pub h: i64,
    /// Number of registered cell-centered event kinds.
    pub num_kinds: i64,
    /// Minimum owned `i` index.
    pub i_min: i32,
    /// Minimum owned `j` index.
    pub j_min: i32,
}

impl IdCtx {
    /// Constructor from the local bounding box extent and kind count.
    #[must_use]
    pub const fn new(w: i32, h: i32, num_kinds: usize, i_min: i32, j_min: i32) -> Self {
        Self {
            w: w as i64,
            h: h as i64,
            num_kinds: num_kinds as i64,
            i_min,
            j_min,
        }
    }

    fn flatten(&self, ci: CellInds, kind: usize) -> i64 {
        let i = i64::from(ci.i - self.i_min);
        let j = i64::from(ci.j - self.j_min);
        i + self.w * (j + self.h * (kind as i64))
    }

    fn unflatten(&self, e1: i64) -> (CellInds, usize) {
        // Reversing the column-major flattening; deliberate use of truncating integer division.
        let r0 = e1.div_euclid(self.w);
        let r1 = r0.div_euclid(self.h);
        let i = (e1 - self.w * r0) as i32 + self.i_min;
        let j = (r0 - self.h * r1) as i32 + self.j_min;
        (CellInds::new(i, j, 0), r1 as usize)
    }
}

/// Compact identifier distinguishing cell-centered vs over-lattice events; packs `(cell, kind,
/// sector)` into two integers with a disjoint encoding.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct EventId {
    e1: i64,
    e2: i64,
}

impl EventId {
    /// Builds the id of a cell-centered event of kind `kind` anchored at `ci`.
    #[must_use]
    pub fn cell_centered(ctx: &IdCtx, ci: CellInds, kind: usize) -> Self {
        Self {
            e1: ctx.flatten(ci, kind),
            e2: i64::from(ci.k),
        }
    }

    /// Builds the id of an over-lattice event `idx` drawn within `sector`.
    #[must_use]
    pub const fn over_lattice(idx: usize, sector: usize) -> Self {
        Self {
            e1: idx as i64,
            e2: -((sector as i64) + 1),
        }
    }

    /// Whether this id addresses an over-lattice event.
    #[must_use]
    pub const fn is_over_lattice(&self) -> bool {
        self.e2 < 0
    }

    /// Decodes an over-lattice id into `(index, sector)`. Caller must check
    /// [`Self::is_over_lattice`] first.
    ///
    /// # Panics
    /// Panics if this id is cell-centered.
    #[must_use]
    pub fn over_lattice_info(&self) -> (usize, usize) {
        assert!(self.is_over_lattice(), "EventId is not an over-lattice id");
        (self.e1 as usize, (-(self.e2 + 1)) as usize)
    }

    /// Decodes a cell-centered id into `(cell, kind)`. Caller must check
    /// [`Self::is_over_lattice`] first.
    ///
    /// # Panics
    /// Panics if this id is for an over-lattice event.
    #[must_use]
    pub fn cell_centered_info(&self, ctx: &IdCtx) -> (CellInds, usize) {
        assert!(!self.is_over_lattice(), "EventId is not a cell-centered id");
        let (mut ci, kind) = ctx.unflatten(self.e1);
        ci.k = self.e2 as i32;
        (ci, kind)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_over_lattice() {
            let (idx, sector) = self.over_lattice_info();
            write!(f, "OverLatticeEvent(Sector={sector}; EventIndex={idx})")
        } else {
            write!(f, "CellCenteredEvent(e1={}; k={})", self.e1, self.e2)
        }
    }
}
