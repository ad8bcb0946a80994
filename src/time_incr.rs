//! Time-increment scheme: the adaptive or fixed global quantum bounding how far each sector's
//! clock may run before synchronization. Parallel-only; serial mode uses the per-event `Δt`
//! directly.

use crate::transport::PartitionTransport;

/// Per-sector propensity totals the solver exposes so a [`TimeIncrScheme`] can compute its
/// locally-reduced quantity before the collective `Allreduce(MAX)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectorPropensitySummary {
    /// Sum of every propensity currently stored for this sector.
    pub total_propensity: f64,
    /// Sum of over-lattice event propensities within `total_propensity`.
    pub over_lattice_propensity: f64,
    /// Number of cell-centered events currently stored for this sector.
    pub num_cell_centered_events: usize,
    /// The largest single cell-centered (non-over-lattice) leaf propensity.
    pub max_cell_centered_leaf: f64,
}

/// One of three ways to bound a quantum's global time step.
#[derive(Clone, Copy, Debug)]
pub enum TimeIncrScheme {
    /// `t_stop = min(TSTOP_MAX, NSTOP / max_sectors((Σp - Σp_over_lattice) / #cell-centered))`.
    MaxAvgPropensityPerPossEvent {
        /// Numerator of the adaptive formula.
        n_stop: f64,
        /// Upper bound on `t_stop`.
        tstop_max: f64,
    },
    /// `t_stop = min(TSTOP_MAX, NSTOP / max_sectors(max_leaf_propensity))`.
    MaxSinglePropensity {
        /// Numerator of the adaptive formula.
        n_stop: f64,
        /// Upper bound on `t_stop`.
        tstop_max: f64,
    },
    /// A constant `t_stop`, no reduction performed.
    FixedValue {
        /// The constant value.
        tstop: f64,
    },
}

impl TimeIncrScheme {
    /// Computes this quantum's `t_stop`. For the adaptive schemes this is a collective
    /// `Allreduce(MAX)` of a locally computed quantity; `FixedValue` is a pure local assignment.
    #[must_use]
    pub fn update_tstop(&self, summaries: &[SectorPropensitySummary], transport: &dyn PartitionTransport) -> f64 {
        match self {
            Self::FixedValue { tstop } => *tstop,
            Self::MaxAvgPropensityPerPossEvent { n_stop, tstop_max } => {
                let local_max = summaries
                    .iter()
                    .map(|s| {
                        if s.num_cell_centered_events == 0 {
                            0.0
                        } else {
                            (s.total_propensity - s.over_lattice_propensity) / s.num_cell_centered_events as f64
                        }
                    })
                    .fold(0.0_f64, f64::max);
                Self::bounded(transport.allreduce_max_f64(local_max), *n_stop, *tstop_max)
            }
            Self::MaxSinglePropensity { n_stop, tstop_max } => {
                let local_max = summaries
                    .iter()
                    .map(|s| s.max_cell_centered_leaf)
                    .fold(0.0_f64, f64::max);
                Self::bounded(transport.allreduce_max_f64(local_max), *n_stop, *tstop_max)
            }
        }
    }

    fn bounded(global_max: f64, n_stop: f64, tstop_max: f64) -> f64 {
        if global_max <= 0.0 {
            tstop_max
        } else {
            (n_stop / global_max).min(tstop_max)
        }
    }
}
