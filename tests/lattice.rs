//! Integration tests for `Lattice` exercised through its public API only: wrap-around reads and
//! writes, plane growth, change tracking, and serial export-buffer behavior across a build path
//! close to what an embedder would actually write (no direct field access, unlike the unit tests
//! colocated in `src/lattice/mod.rs`).

use kmc_thinfilm::cell_inds::CellInds;
use kmc_thinfilm::lattice::change_log::TrackType;
use kmc_thinfilm::lattice::geometry::ParallelDecomp;
use kmc_thinfilm::lattice::{Lattice, LatticeConfig, LatticeParams};
use kmc_thinfilm::transport::SerialTransport;

fn lattice(w: i32, h: i32, n_int: usize, n_float: usize) -> Lattice {
    Lattice::new(
        LatticeParams {
            config: LatticeConfig {
                global_dims: (w, h),
                ghost_extent: (0, 0),
                n_int,
                n_float,
                num_planes_to_reserve: 2,
                decomp: ParallelDecomp::Serial,
                no_adding_planes_during_simulation: false,
            },
            lat_init: None,
            set_empty_cell_vals: None,
        },
        &SerialTransport,
    )
}

#[test]
fn writes_are_visible_through_every_periodic_image_of_a_cell() {
    let mut lat = lattice(8, 8, 1, 1);
    lat.set_int(CellInds::new(3, 3, 0), 0, 11);
    lat.set_float(CellInds::new(3, 3, 0), 0, 2.5);
    for (di, dj) in [(8, 0), (0, 8), (-8, 0), (0, -8), (16, -16)] {
        let ci = CellInds::new(3 + di, 3 + dj, 0);
        assert_eq!(lat.get_int(ci, 0), 11);
        assert!((lat.get_float(ci, 0) - 2.5).abs() < 1e-12);
    }
}

#[test]
fn appended_planes_start_zeroed_and_grow_height_monotonically() {
    let mut lat = lattice(4, 4, 2, 0);
    assert_eq!(lat.current_height(), 1);
    lat.add_planes(2);
    assert_eq!(lat.current_height(), 3);
    assert_eq!(lat.get_int(CellInds::new(0, 0, 2), 0), 0);
    assert_eq!(lat.get_int(CellInds::new(0, 0, 2), 1), 0);
}

#[test]
fn set_empty_cell_vals_seeds_every_newly_materialized_cell_not_just_the_owned_ones() {
    let mut params = LatticeParams {
        config: LatticeConfig {
            global_dims: (4, 4),
            ghost_extent: (0, 0),
            n_int: 1,
            n_float: 1,
            num_planes_to_reserve: 1,
            decomp: ParallelDecomp::Serial,
            no_adding_planes_during_simulation: false,
        },
        lat_init: None,
        set_empty_cell_vals: None,
    };
    params.set_empty_cell_vals = Some(Box::new(|ci, ints, floats| {
        ints[0] = ci.i * 10 + ci.j;
        floats[0] = f64::from(ci.k);
    }));
    let lat = Lattice::new(params, &SerialTransport);
    assert_eq!(lat.get_int(CellInds::new(2, 1, 0), 0), 21);
    assert!((lat.get_float(CellInds::new(2, 1, 0), 0) - 0.0).abs() < 1e-12);
}

#[test]
fn changed_set_tracking_reports_exactly_the_written_cells_in_order() {
    let mut lat = lattice(6, 6, 1, 0);
    lat.begin_tracking(TrackType::ChangedSet);
    lat.set_int(CellInds::new(2, 0, 0), 0, 1);
    lat.set_int(CellInds::new(0, 0, 0), 0, 1);
    lat.set_int(CellInds::new(2, 0, 0), 0, 2);
    let changed: Vec<_> = lat.changed_cells().iter().copied().collect();
    assert_eq!(changed, vec![CellInds::new(0, 0, 0), CellInds::new(2, 0, 0)]);
}

#[test]
fn serial_lattices_never_populate_the_export_buffer() {
    let mut lat = lattice(6, 6, 1, 0);
    assert!(!lat.add_to_export_buffer_if_needed(CellInds::new(0, 0, 0)));
    assert!(!lat.add_to_export_buffer_if_needed(CellInds::new(5, 5, 0)));
}

#[test]
fn sector_bboxes_partition_the_owned_region_for_every_decomposition() {
    for decomp in [ParallelDecomp::Serial, ParallelDecomp::Row] {
        let lat = Lattice::new(
            LatticeParams {
                config: LatticeConfig {
                    global_dims: (8, 8),
                    ghost_extent: (0, 0),
                    n_int: 1,
                    n_float: 0,
                    num_planes_to_reserve: 1,
                    decomp,
                    no_adding_planes_during_simulation: false,
                },
                lat_init: None,
                set_empty_cell_vals: None,
            },
            &SerialTransport,
        );
        let owned = lat.get_local_planar_bbox(false);
        let total_area: i64 = (0..decomp.num_sectors()).map(|s| lat.get_sector_planar_bbox(s).area()).sum();
        assert_eq!(total_area, owned.area());
    }
}
