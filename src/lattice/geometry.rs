//! Planar bounding boxes, parallel decomposition, and the per-cell `ExportFlags` tag used to
//! route boundary cells to the right ghost-export buffer.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Bounding box of in-plane cell coordinates: `[imin, imax_p1) x [jmin, jmax_p1)`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PlanarBBox {
    /// Minimum `i`.
    pub imin: i32,
    /// One more than the maximum `i`.
    pub imax_p1: i32,
    /// Minimum `j`.
    pub jmin: i32,
    /// One more than the maximum `j`.
    pub jmax_p1: i32,
}

impl PlanarBBox {
    /// Constructor.
    #[must_use]
    pub const fn new(imin: i32, imax_p1: i32, jmin: i32, jmax_p1: i32) -> Self {
        Self {
            imin,
            imax_p1,
            jmin,
            jmax_p1,
        }
    }

    /// Width along `i`.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.imax_p1 - self.imin
    }

    /// Width along `j`.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.jmax_p1 - self.jmin
    }

    /// Area (number of cells) of one plane of this box.
    #[must_use]
    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    /// Whether `(i, j)` lies inside this box.
    #[must_use]
    pub fn contains(&self, i: i32, j: i32) -> bool {
        (self.imin..self.imax_p1).contains(&i) && (self.jmin..self.jmax_p1).contains(&j)
    }

    /// Grows the box by `g` cells on every side.
    #[must_use]
    pub const fn grown(&self, g: i32) -> Self {
        Self::new(self.imin - g, self.imax_p1 + g, self.jmin - g, self.jmax_p1 + g)
    }
}

/// Method of parallel decomposition.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ParallelDecomp {
    /// The lattice is decomposed so that the perimeter owned by each rank is minimized: a 2-D
    /// Cartesian split, 4 within-rank sectors.
    Compact,
    /// The lattice is decomposed into strips along the first horizontal axis: a 1-D Cartesian
    /// split, 2 within-rank sectors.
    #[default]
    Row,
    /// No decomposition: a single rank, a single sector.
    Serial,
}

impl ParallelDecomp {
    /// Number of within-rank sectors used by the synchronous-sublattice algorithm.
    #[must_use]
    pub const fn num_sectors(&self) -> usize {
        match self {
            Self::Compact => 4,
            Self::Row => 2,
            Self::Serial => 1,
        }
    }
}

bitflags! {
    /// Tags which boundary export buffer(s) a cell belongs to. A cell straddling two sector
    /// boundaries (row + column) carries both bits plus `CORNER`.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
    pub struct ExportFlags: u8 {
        /// The cell must be exported across the row-direction (first horizontal axis) boundary.
        const ROW = 0b001;
        /// The cell must be exported across the column-direction (second horizontal axis) boundary.
        const COL = 0b010;
        /// The cell must be exported across a diagonal (corner) neighbor boundary.
        const CORNER = 0b100;
    }
}

/// Computes the sector a non-ghost cell at local `(i, j)` belongs to, given the rank's owned
/// (ghost-free) bounding box and the decomposition in effect.
///
/// `Compact` splits the box into NW/NE/SW/SE quadrants (sectors 0..=3); `Row`/`Serial` split
/// along `i` only (or not at all).
#[must_use]
pub fn sector_of(i: i32, j: i32, owned: PlanarBBox, decomp: ParallelDecomp) -> usize {
    let imid = owned.imin + owned.width() / 2;
    let jmid = owned.jmin + owned.height() / 2;
    match decomp {
        ParallelDecomp::Serial => 0,
        ParallelDecomp::Row => usize::from(i >= imid),
        ParallelDecomp::Compact => {
            let hi = usize::from(i >= imid);
            let hj = usize::from(j >= jmid);
            hj * 2 + hi
        }
    }
}

/// Planar bbox of sector `s` within the rank's owned (ghost-free) bounding box.
#[must_use]
pub fn sector_bbox(s: usize, owned: PlanarBBox, decomp: ParallelDecomp) -> PlanarBBox {
    let imid = owned.imin + owned.width() / 2;
    let jmid = owned.jmin + owned.height() / 2;
    match decomp {
        ParallelDecomp::Serial => owned,
        ParallelDecomp::Row => {
            if s == 0 {
                PlanarBBox::new(owned.imin, imid, owned.jmin, owned.jmax_p1)
            } else {
                PlanarBBox::new(imid, owned.imax_p1, owned.jmin, owned.jmax_p1)
            }
        }
        ParallelDecomp::Compact => {
            let (i_lo, i_hi) = if s % 2 == 0 {
                (owned.imin, imid)
            } else {
                (imid, owned.imax_p1)
            };
            let (j_lo, j_hi) = if s / 2 == 0 {
                (owned.jmin, jmid)
            } else {
                (jmid, owned.jmax_p1)
            };
            PlanarBBox::new(i_lo, i_hi, j_lo, j_hi)
        }
    }
}

/// Export-buffer membership of local cell `(i, j)`, given ghost extent `g` (per-axis) and the
/// rank's owned bounding box. Cells are tagged `ROW`/`COL` within `g` cells of the axis along
/// which ranks are partitioned, and `CORNER` when tagged with both under `Compact`.
#[must_use]
pub fn export_flags(i: i32, j: i32, owned: PlanarBBox, gx: i32, gy: i32, decomp: ParallelDecomp) -> ExportFlags {
    if decomp == ParallelDecomp::Serial {
        return ExportFlags::empty();
    }
    let near_i_edge =
        gx > 0 && (i < owned.imin + gx || i >= owned.imax_p1 - gx);
    let near_j_edge = matches!(decomp, ParallelDecomp::Compact)
        && gy > 0
        && (j < owned.jmin + gy || j >= owned.jmax_p1 - gy);

    let mut flags = ExportFlags::empty();
    if near_i_edge {
        flags |= ExportFlags::ROW;
    }
    if near_j_edge {
        flags |= ExportFlags::COL;
    }
    if near_i_edge && near_j_edge {
        flags |= ExportFlags::CORNER;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_splits_into_four_quadrants() {
        let owned = PlanarBBox::new(0, 10, 0, 10);
        assert_eq!(sector_of(2, 2, owned, ParallelDecomp::Compact), 0);
        assert_eq!(sector_of(8, 2, owned, ParallelDecomp::Compact), 1);
        assert_eq!(sector_of(2, 8, owned, ParallelDecomp::Compact), 2);
        assert_eq!(sector_of(8, 8, owned, ParallelDecomp::Compact), 3);
    }

    #[test]
    fn row_splits_into_two_halves() {
        let owned = PlanarBBox::new(0, 10, 0, 10);
        assert_eq!(sector_of(2, 9, owned, ParallelDecomp::Row), 0);
        assert_eq!(sector_of(8, 0, owned, ParallelDecomp::Row), 1);
    }

    #[test]
    fn serial_is_always_sector_zero() {
        let owned = PlanarBBox::new(0, 10, 0, 10);
        assert_eq!(sector_of(5, 5, owned, ParallelDecomp::Serial), 0);
        assert!(export_flags(0, 0, owned, 2, 2, ParallelDecomp::Serial).is_empty());
    }

    #[test]
    fn sector_bboxes_tile_the_owned_box_without_gaps() {
        let owned = PlanarBBox::new(0, 10, 0, 10);
        for s in 0..4 {
            let b = sector_bbox(s, owned, ParallelDecomp::Compact);
            assert!(b.imin >= owned.imin && b.imax_p1 <= owned.imax_p1);
        }
    }

    #[test]
    fn export_flags_mark_boundary_cells_under_compact() {
        let owned = PlanarBBox::new(0, 10, 0, 10);
        let corner = export_flags(0, 0, owned, 2, 2, ParallelDecomp::Compact);
        assert!(corner.contains(ExportFlags::ROW | ExportFlags::COL | ExportFlags::CORNER));

        let interior = export_flags(5, 5, owned, 2, 2, ParallelDecomp::Compact);
        assert!(interior.is_empty());
    }

    #[test]
    fn export_flags_under_row_never_set_col_or_corner() {
        let owned = PlanarBBox::new(0, 10, 0, 10);
        let edge = export_flags(0, 0, owned, 2, 2, ParallelDecomp::Row);
        assert_eq!(edge, ExportFlags::ROW);
    }
}
