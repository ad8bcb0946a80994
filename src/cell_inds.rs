//! Module containing `CellInds`, `Offset` and the horizontal-periodicity helpers shared by
//! [`crate::lattice::Lattice`] and [`crate::event_id::EventId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg};

/// Indices of a single lattice cell: `i` and `j` are horizontal (periodic), `k` is vertical and
/// bounded above by the current lattice height.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CellInds {
    /// Horizontal index along the first periodic axis.
    pub i: i32,
    /// Horizontal index along the second periodic axis.
    pub j: i32,
    /// Vertical (plane) index. Never negative.
    pub k: i32,
}

impl CellInds {
    /// Constructor.
    #[must_use]
    pub const fn new(i: i32, j: i32, k: i32) -> Self {
        Self { i, j, k }
    }
}

impl fmt::Display for CellInds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{}]", self.i, self.j, self.k)
    }
}

impl Add<Offset> for CellInds {
    type Output = Self;

    fn add(self, rhs: Offset) -> Self {
        Self::new(self.i + rhs.di, self.j + rhs.dj, self.k + rhs.dk)
    }
}

/// A fixed displacement `(di, dj, dk)` used to describe neighbor access patterns; see
/// `crate::executor` for how offsets are registered against event kinds.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Offset {
    /// Displacement along the first horizontal axis.
    pub di: i32,
    /// Displacement along the second horizontal axis.
    pub dj: i32,
    /// Displacement along the vertical axis.
    pub dk: i32,
}

impl Offset {
    /// Constructor.
    #[must_use]
    pub const fn new(di: i32, dj: i32, dk: i32) -> Self {
        Self { di, dj, dk }
    }

    /// The zero offset, i.e. "the cell itself".
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }
}

impl Neg for Offset {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.di, -self.dj, -self.dk)
    }
}

impl Add for Offset {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.di + rhs.di, self.dj + rhs.dj, self.dk + rhs.dk)
    }
}

/// Wraps a single horizontal coordinate into `[0, dim)` using mathematical modulo (never
/// negative), matching C++'s lack of a true modulo operator for negative operands.
#[must_use]
pub fn wrap_coord(x: i32, dim: i32) -> i32 {
    debug_assert!(dim > 0, "periodic dimension must be positive");
    let r = x % dim;
    if r < 0 {
        r + dim
    } else {
        r
    }
}

/// Wraps the horizontal components of `ci` into `[0, w) x [0, h)`; `k` passes through unchanged.
#[must_use]
pub fn wrap(ci: CellInds, w: i32, h: i32) -> CellInds {
    CellInds::new(wrap_coord(ci.i, w), wrap_coord(ci.j, h), ci.k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_handles_negative_and_large_indices() {
        assert_eq!(wrap_coord(-1, 10), 9);
        assert_eq!(wrap_coord(-11, 10), 9);
        assert_eq!(wrap_coord(10, 10), 0);
        assert_eq!(wrap_coord(23, 10), 3);
        assert_eq!(wrap_coord(0, 10), 0);
    }

    #[test]
    fn wrap_cell_only_touches_horizontal_axes() {
        let ci = CellInds::new(-1, 17, 4);
        assert_eq!(wrap(ci, 10, 10), CellInds::new(9, 7, 4));
    }

    #[test]
    fn offset_negation_and_sum() {
        let o = Offset::new(1, -2, 0);
        assert_eq!(-o, Offset::new(-1, 2, 0));
        assert_eq!(o + Offset::new(1, 1, 1), Offset::new(2, -1, 1));
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = CellInds::new(0, 0, 0);
        let b = CellInds::new(0, 0, 1);
        let c = CellInds::new(0, 1, 0);
        let d = CellInds::new(1, 0, 0);
        let mut v = vec![d, c, b, a];
        v.sort();
        assert_eq!(v, vec![a, b, c, d]);
    }

    #[test]
    fn display_matches_original_bracket_form() {
        assert_eq!(CellInds::new(1, 2, 3).to_string(), "[1,2,3]");
    }
}
