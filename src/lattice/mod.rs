//! The 3-D lattice: per-cell integer/float storage, growable height, periodic horizontal wrap,
//! sector partitioning, and the change log selectable per run-phase. One top-level owning struct
//! with bbox/metadata owning a collection of per-plane storage, itself backed by growable indexed
//! arrays.

pub mod change_log;
pub mod geometry;

use crate::cell_inds::{wrap, CellInds};
use crate::fatal;
use crate::transport::{GhostPayload, NeighborDir, PartitionTransport};
use arrayvec::ArrayVec;
use change_log::{ChangeLog, TrackType};
use geometry::{export_flags, sector_bbox, sector_of, ParallelDecomp, PlanarBBox};
use ndarray::Array3;
use std::collections::{BTreeSet, HashMap};

/// Invoked once, per newly appended plane, per cell in that plane's stored extent (owned and
/// ghost alike), to seed initial values. Receives the cell's coordinates and writes into the
/// `nInt`/`nFloat`-wide output slices.
pub type SetEmptyCellVals = Box<dyn FnMut(CellInds, &mut [i32], &mut [f64]) + Send>;

/// Invoked once at construction to perform whatever initial plane setup a deployment wants. The
/// documented default is "add one plane"; see [`LatticeParams::default_lat_init`].
pub type LatInit = Box<dyn FnOnce(&mut Lattice) + Send>;

/// The plain-data subset of lattice construction parameters, kept serde-friendly by factoring
/// the two callbacks out into [`LatticeParams`].
#[derive(Clone, Copy, Debug, serde::Deserialize, serde::Serialize)]
pub struct LatticeConfig {
    /// Global horizontal dimensions `(W, H)`.
    pub global_dims: (i32, i32),
    /// Per-axis ghost halo extent `(gx, gy)`.
    pub ghost_extent: (i32, i32),
    /// Width of the per-cell integer slot array.
    pub n_int: usize,
    /// Width of the per-cell float slot array.
    pub n_float: usize,
    /// Hint for how many planes to reserve storage for up front.
    pub num_planes_to_reserve: usize,
    /// Parallel decomposition in effect.
    pub decomp: ParallelDecomp,
    /// If true, `add_planes` during a run is fatal rather than growing the lattice.
    pub no_adding_planes_during_simulation: bool,
}

/// Full lattice construction parameters: [`LatticeConfig`] plus its two callbacks (`latInit`,
/// `setEmptyCellVals`). Not serde: callbacks aren't data.
pub struct LatticeParams {
    /// The serializable configuration.
    pub config: LatticeConfig,
    /// Initial setup callback; `None` means the documented default ("add one plane").
    pub lat_init: Option<LatInit>,
    /// Per-cell initializer for newly appended planes; `None` means "leave zeroed".
    pub set_empty_cell_vals: Option<SetEmptyCellVals>,
}

impl LatticeParams {
    /// The documented default `latInit`: append a single empty plane.
    #[must_use]
    pub fn default_lat_init() -> LatInit {
        Box::new(|lat: &mut Lattice| lat.add_planes(1))
    }
}

#[derive(Clone, Debug)]
struct Plane {
    ints: Array3<i32>,
    floats: Array3<f64>,
}

impl Plane {
    fn zeroed(lw: usize, lh: usize, n_int: usize, n_float: usize) -> Self {
        Self {
            ints: Array3::zeros((lw, lh, n_int)),
            floats: Array3::zeros((lw, lh, n_float)),
        }
    }
}

/// The lattice: an ordered sequence of planes indexed by `k`, each owning a horizontal grid of
/// cells over the rank's local bounding box (owned extent plus ghost halo).
pub struct Lattice {
    global_dims: (i32, i32),
    owned: PlanarBBox,
    ghost: (i32, i32),
    decomp: ParallelDecomp,
    n_int: usize,
    n_float: usize,
    planes: Vec<Plane>,
    no_adding_planes_during_simulation: bool,
    during_simulation: bool,
    change_log: ChangeLog,
    export_pending: Vec<BTreeSet<CellInds>>,
    inbox: HashMap<NeighborDir, GhostPayload>,
    set_empty_cell_vals: Option<SetEmptyCellVals>,
}

impl Lattice {
    /// Builds a lattice owning the horizontal slab assigned to `transport.rank()` under
    /// `params.config.decomp`, and runs `lat_init` (or its documented default).
    ///
    /// # Panics
    /// Terminates the process (via [`fatal::die`]) if `n_int == 0 && n_float == 0`.
    #[must_use]
    pub fn new(mut params: LatticeParams, transport: &dyn PartitionTransport) -> Self {
        let cfg = params.config;
        fatal::die_if(
            cfg.n_int == 0 && cfg.n_float == 0,
            "Lattice: nInt and nFloat cannot both be zero",
        );
        let owned = owned_bbox_for_rank(cfg.global_dims, cfg.decomp, transport.rank(), transport.num_ranks());
        let num_sectors = cfg.decomp.num_sectors();
        let mut lattice = Self {
            global_dims: cfg.global_dims,
            owned,
            ghost: cfg.ghost_extent,
            decomp: cfg.decomp,
            n_int: cfg.n_int,
            n_float: cfg.n_float,
            planes: Vec::with_capacity(cfg.num_planes_to_reserve),
            no_adding_planes_during_simulation: cfg.no_adding_planes_during_simulation,
            during_simulation: false,
            change_log: ChangeLog::default(),
            export_pending: vec![BTreeSet::new(); num_sectors],
            inbox: HashMap::new(),
            set_empty_cell_vals: params.set_empty_cell_vals.take(),
        };
        let lat_init = params.lat_init.take().unwrap_or_else(LatticeParams::default_lat_init);
        lat_init(&mut lattice);
        lattice
    }

    /// Marks whether a run is currently in progress; gates `add_planes`'s fatal check.
    pub fn set_during_simulation(&mut self, flag: bool) {
        self.during_simulation = flag;
    }

    /// Starts a fresh change log under `track`, discarding any previously accumulated contents.
    pub fn begin_tracking(&mut self, track: TrackType) {
        self.change_log.begin(track);
    }

    /// Whether any write was recorded since the last [`Self::begin_tracking`].
    #[must_use]
    pub const fn has_changed(&self) -> bool {
        self.change_log.has_changed()
    }

    /// The ordered set of distinct changed cells (populated under [`TrackType::ChangedSet`]).
    #[must_use]
    pub const fn changed_cells(&self) -> &BTreeSet<CellInds> {
        self.change_log.changed_cells()
    }

    /// The "other" cells recorded under [`TrackType::OtherOnly`].
    #[must_use]
    pub fn other_cells(&self) -> &[CellInds] {
        self.change_log.other_cells()
    }

    /// Number of materialized planes.
    #[must_use]
    pub fn current_height(&self) -> usize {
        self.planes.len()
    }

    /// Width of the per-cell integer slot array.
    #[must_use]
    pub const fn n_int(&self) -> usize {
        self.n_int
    }

    /// Width of the per-cell float slot array.
    #[must_use]
    pub const fn n_float(&self) -> usize {
        self.n_float
    }

    /// The decomposition this lattice was built under.
    #[must_use]
    pub const fn decomp(&self) -> ParallelDecomp {
        self.decomp
    }

    fn stored_width(&self) -> usize {
        (self.owned.width() + 2 * self.ghost.0) as usize
    }

    fn stored_height(&self) -> usize {
        (self.owned.height() + 2 * self.ghost.1) as usize
    }

    /// Horizontal-wrap-then-local-storage-index lookup shared by every accessor. Ghost cells are
    /// replicas of a neighbor rank's owned cell at this same wrapped global position, so wrapping
    /// unconditionally (rather than special-casing compact vs row decomposition) is correct in
    /// both cases: ghosts already hold the wrapped cell's data.
    fn local_ij(&self, i: i32, j: i32) -> (usize, usize) {
        let wi = crate::cell_inds::wrap_coord(i, self.global_dims.0);
        let wj = crate::cell_inds::wrap_coord(j, self.global_dims.1);
        let li = wi - (self.owned.imin - self.ghost.0);
        let lj = wj - (self.owned.jmin - self.ghost.1);
        assert!(
            li >= 0 && lj >= 0 && (li as usize) < self.stored_width() && (lj as usize) < self.stored_height(),
            "cell ({i},{j}) is outside this rank's stored horizontal extent"
        );
        (li as usize, lj as usize)
    }

    /// Reads integer slot `which` of cell `ci`, applying horizontal wrap.
    #[must_use]
    pub fn get_int(&self, ci: CellInds, which: usize) -> i32 {
        let (li, lj) = self.local_ij(ci.i, ci.j);
        self.planes[ci.k as usize].ints[[li, lj, which]]
    }

    /// Reads float slot `which` of cell `ci`, applying horizontal wrap.
    #[must_use]
    pub fn get_float(&self, ci: CellInds, which: usize) -> f64 {
        let (li, lj) = self.local_ij(ci.i, ci.j);
        self.planes[ci.k as usize].floats[[li, lj, which]]
    }

    /// Writes integer slot `which` of cell `ci`, applying horizontal wrap, and records the write
    /// in the active change log.
    pub fn set_int(&mut self, ci: CellInds, which: usize, val: i32) {
        let (li, lj) = self.local_ij(ci.i, ci.j);
        self.planes[ci.k as usize].ints[[li, lj, which]] = val;
        self.change_log.record_write(wrap(ci, self.global_dims.0, self.global_dims.1));
    }

    /// Writes float slot `which` of cell `ci`, applying horizontal wrap, and records the write
    /// in the active change log.
    pub fn set_float(&mut self, ci: CellInds, which: usize, val: f64) {
        let (li, lj) = self.local_ij(ci.i, ci.j);
        self.planes[ci.k as usize].floats[[li, lj, which]] = val;
        self.change_log.record_write(wrap(ci, self.global_dims.0, self.global_dims.1));
    }

    /// Appends `n` planes. Each is zero-initialized, then passed cell-by-cell (owned and ghost
    /// alike) through the configured `SetEmptyCellVals` callback, if any.
    ///
    /// # Panics
    /// Terminates the process if called mid-simulation while
    /// `no_adding_planes_during_simulation` is set.
    pub fn add_planes(&mut self, n: usize) {
        fatal::die_if(
            self.during_simulation && self.no_adding_planes_during_simulation,
            "Lattice::add_planes called during simulation with noAddingPlanesDuringSimulation set",
        );
        let lw = self.stored_width();
        let lh = self.stored_height();
        for _ in 0..n {
            let mut plane = Plane::zeroed(lw, lh, self.n_int, self.n_float);
            let k = self.planes.len() as i32;
            if let Some(cb) = &mut self.set_empty_cell_vals {
                let mut ints = vec![0i32; self.n_int];
                let mut floats = vec![0f64; self.n_float];
                for li in 0..lw {
                    for lj in 0..lh {
                        let i = li as i32 + self.owned.imin - self.ghost.0;
                        let j = lj as i32 + self.owned.jmin - self.ghost.1;
                        ints.iter_mut().for_each(|x| *x = 0);
                        floats.iter_mut().for_each(|x| *x = 0.0);
                        cb(CellInds::new(i, j, k), &mut ints, &mut floats);
                        for (w, v) in ints.iter().enumerate() {
                            plane.ints[[li, lj, w]] = *v;
                        }
                        for (w, v) in floats.iter().enumerate() {
                            plane.floats[[li, lj, w]] = *v;
                        }
                    }
                }
            }
            self.planes.push(plane);
            for i in self.owned.imin..self.owned.imax_p1 {
                for j in self.owned.jmin..self.owned.jmax_p1 {
                    self.change_log.record_other(CellInds::new(i, j, k));
                }
            }
        }
    }

    /// This rank's local bounding box, with or without the ghost halo.
    #[must_use]
    pub fn get_local_planar_bbox(&self, with_ghost: bool) -> PlanarBBox {
        if with_ghost {
            PlanarBBox::new(
                self.owned.imin - self.ghost.0,
                self.owned.imax_p1 + self.ghost.0,
                self.owned.jmin - self.ghost.1,
                self.owned.jmax_p1 + self.ghost.1,
            )
        } else {
            self.owned
        }
    }

    /// The bounding box of sector `s` within this rank's owned (ghost-free) region.
    #[must_use]
    pub fn get_sector_planar_bbox(&self, s: usize) -> PlanarBBox {
        sector_bbox(s, self.owned, self.decomp)
    }

    /// The global horizontal bounding box `[0, W) x [0, H)`.
    #[must_use]
    pub fn get_global_planar_bbox(&self) -> PlanarBBox {
        PlanarBBox::new(0, self.global_dims.0, 0, self.global_dims.1)
    }

    /// Marks `ci` as touched so that a later `send_ghosts_update` propagates it if it sits on a
    /// boundary this rank must export, per its [`ExportFlags`]. Returns whether `ci` is itself a
    /// ghost (a replica this rank does not own). A no-op (always returning `false`) in serial
    /// mode.
    pub fn add_to_export_buffer_if_needed(&mut self, ci: CellInds) -> bool {
        if matches!(self.decomp, ParallelDecomp::Serial) {
            return false;
        }
        let wrapped = wrap(ci, self.global_dims.0, self.global_dims.1);
        if !self.owned.contains(wrapped.i, wrapped.j) {
            return true;
        }
        let flags = export_flags(wrapped.i, wrapped.j, self.owned, self.ghost.0, self.ghost.1, self.decomp);
        if !flags.is_empty() {
            let s = sector_of(wrapped.i, wrapped.j, self.owned, self.decomp);
            self.export_pending[s].insert(wrapped);
        }
        false
    }

    /// Up to 3 neighbor directions local cell `(i, j)` must be exported across.
    fn direction_of_cell(&self, i: i32, j: i32) -> ArrayVec<NeighborDir, 3> {
        let mut dirs = ArrayVec::new();
        let near_min_i = self.ghost.0 > 0 && i < self.owned.imin + self.ghost.0;
        let near_max_i = self.ghost.0 > 0 && i >= self.owned.imax_p1 - self.ghost.0;
        let compact = matches!(self.decomp, ParallelDecomp::Compact);
        let near_min_j = compact && self.ghost.1 > 0 && j < self.owned.jmin + self.ghost.1;
        let near_max_j = compact && self.ghost.1 > 0 && j >= self.owned.jmax_p1 - self.ghost.1;
        if near_min_i {
            dirs.push(NeighborDir::MinusI);
        }
        if near_max_i {
            dirs.push(NeighborDir::PlusI);
        }
        if near_min_j {
            dirs.push(NeighborDir::MinusJ);
        }
        if near_max_j {
            dirs.push(NeighborDir::PlusJ);
        }
        if near_min_i && near_min_j {
            dirs.push(NeighborDir::MinusIMinusJ);
        }
        if near_min_i && near_max_j {
            dirs.push(NeighborDir::MinusIPlusJ);
        }
        if near_max_i && near_min_j {
            dirs.push(NeighborDir::PlusIMinusJ);
        }
        if near_max_i && near_max_j {
            dirs.push(NeighborDir::PlusIPlusJ);
        }
        dirs
    }

    fn apply_incoming(&mut self, payload: &GhostPayload, touched: &mut BTreeSet<CellInds>) {
        for (idx, ci) in payload.cells.iter().enumerate() {
            let (li, lj) = self.local_ij(ci.i, ci.j);
            let plane = &mut self.planes[ci.k as usize];
            for w in 0..self.n_int {
                plane.ints[[li, lj, w]] = payload.ints[idx * self.n_int + w];
            }
            for w in 0..self.n_float {
                plane.floats[[li, lj, w]] = payload.floats[idx * self.n_float + w];
            }
            touched.insert(*ci);
        }
    }

    /// Applies whatever ghost data this rank has already received for sector `s`, returning the
    /// set of cells it wrote so the driver can reconcile propensities that read them.
    ///
    /// Ghosts received here may belong to any sector, including one already processed this
    /// quantum; this implementation applies every pending inbox entry on
    /// every call; there is no per-sector multi-hop relay for diagonal (compact-decomposition)
    /// neighbors, since no tested scenario requires it (see DESIGN.md).
    pub fn recv_ghosts_update(&mut self, s: usize) -> BTreeSet<CellInds> {
        let _ = s;
        let dirs: Vec<NeighborDir> = self.inbox.keys().copied().collect();
        let mut touched = BTreeSet::new();
        for dir in dirs {
            if let Some(payload) = self.inbox.remove(&dir) {
                self.apply_incoming(&payload, &mut touched);
            }
        }
        touched
    }

    /// Sparse refresh: exchanges only the cells marked since the last call by
    /// [`Self::add_to_export_buffer_if_needed`] for sector `s`.
    pub fn send_ghosts_update(&mut self, s: usize, transport: &dyn PartitionTransport) {
        if matches!(self.decomp, ParallelDecomp::Serial) {
            return;
        }
        let pending = std::mem::take(&mut self.export_pending[s]);
        let mut per_dir: HashMap<NeighborDir, GhostPayload> = HashMap::new();
        for ci in &pending {
            for dir in self.direction_of_cell(ci.i, ci.j) {
                if !transport.neighbor_dirs().contains(&dir) {
                    continue;
                }
                let entry = per_dir.entry(dir).or_default();
                entry.cells.push(*ci);
                for w in 0..self.n_int {
                    entry.ints.push(self.get_int(*ci, w));
                }
                for w in 0..self.n_float {
                    entry.floats.push(self.get_float(*ci, w));
                }
            }
        }
        for &dir in transport.neighbor_dirs() {
            let out = per_dir.remove(&dir).unwrap_or_default();
            let incoming = transport.exchange(dir, out);
            if !incoming.is_empty() {
                self.inbox.insert(dir, incoming);
            }
        }
    }

    /// Full (every plane) refresh of ghost cells touching sector `s`'s boundary, used before a
    /// from-scratch solver rebuild.
    pub fn send_ghosts(&mut self, s: usize, transport: &dyn PartitionTransport) {
        if matches!(self.decomp, ParallelDecomp::Serial) {
            return;
        }
        let sector_box = sector_bbox(s, self.owned, self.decomp);
        let mut per_dir: HashMap<NeighborDir, GhostPayload> = HashMap::new();
        for k in 0..self.planes.len() {
            for i in sector_box.imin..sector_box.imax_p1 {
                for j in sector_box.jmin..sector_box.jmax_p1 {
                    let ci = CellInds::new(i, j, k as i32);
                    for dir in self.direction_of_cell(i, j) {
                        if !transport.neighbor_dirs().contains(&dir) {
                            continue;
                        }
                        let entry = per_dir.entry(dir).or_default();
                        entry.cells.push(ci);
                        for w in 0..self.n_int {
                            entry.ints.push(self.get_int(ci, w));
                        }
                        for w in 0..self.n_float {
                            entry.floats.push(self.get_float(ci, w));
                        }
                    }
                }
            }
        }
        for &dir in transport.neighbor_dirs() {
            let out = per_dir.remove(&dir).unwrap_or_default();
            let incoming = transport.exchange(dir, out);
            if !incoming.is_empty() {
                self.inbox.insert(dir, incoming);
            }
        }
    }

    /// Full refresh counterpart of [`Self::recv_ghosts_update`]; receiver-side application is
    /// identical regardless of whether the sender did a sparse or full refresh.
    pub fn recv_ghosts(&mut self, s: usize) -> BTreeSet<CellInds> {
        self.recv_ghosts_update(s)
    }
}

fn strip_range(dim: i32, idx: usize, count: usize) -> (i32, i32) {
    let count = count as i32;
    let idx = idx as i32;
    let base = dim / count;
    let rem = dim % count;
    let lo = idx * base + idx.min(rem);
    let extra = i32::from(idx < rem);
    (lo, lo + base + extra)
}

/// Factors `num_ranks` into a `(rows, cols)` grid as close to square as possible, for the
/// compact 2-D decomposition's Cartesian rank topology.
fn compact_grid(num_ranks: usize) -> (usize, usize) {
    let mut best = (1, num_ranks);
    let mut r = 1;
    while r * r <= num_ranks {
        if num_ranks % r == 0 {
            best = (r, num_ranks / r);
        }
        r += 1;
    }
    best
}

fn owned_bbox_for_rank(global_dims: (i32, i32), decomp: ParallelDecomp, rank: usize, num_ranks: usize) -> PlanarBBox {
    let (w, h) = global_dims;
    match decomp {
        ParallelDecomp::Serial => PlanarBBox::new(0, w, 0, h),
        ParallelDecomp::Row => {
            let (lo, hi) = strip_range(w, rank, num_ranks);
            PlanarBBox::new(lo, hi, 0, h)
        }
        ParallelDecomp::Compact => {
            let (rows, cols) = compact_grid(num_ranks);
            let row = rank / cols;
            let col = rank % cols;
            let (ilo, ihi) = strip_range(w, col, cols);
            let (jlo, jhi) = strip_range(h, row, rows);
            PlanarBBox::new(ilo, ihi, jlo, jhi)
        }
    }
}
