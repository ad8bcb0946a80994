//! RNG abstraction: produces doubles strictly in `(0, 1)`. The concrete generator is an external
//! collaborator; this module specifies only the contract plus an optional reference
//! implementation.

/// Produces uniform doubles strictly within `(0, 1)` — exclusive of both endpoints, since the
/// solver divides by draws and takes their logarithm.
pub trait EventRng {
    /// Returns the next draw, strictly in `(0, 1)`.
    fn next_uniform_open01(&mut self) -> f64;
}

/// Perturbs `x` by one ULP away from `0.0`/`1.0` if it landed exactly on either boundary.
/// Cheaper than redrawing, and matches the `nextafter`-based rejection a Mersenne-Twister-backed
/// generator typically uses to keep draws strictly open.
#[must_use]
pub fn jitter_open01(x: f64) -> f64 {
    if x <= 0.0 {
        f64::MIN_POSITIVE
    } else if x >= 1.0 {
        1.0 - f64::EPSILON / 2.0
    } else {
        x
    }
}

#[cfg(feature = "reference-rng")]
mod reference {
    use super::{jitter_open01, EventRng};
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64Mcg;

    /// A ready-to-use [`EventRng`] for embedders who don't want to wire up their own generator,
    /// backed by `rand_pcg`'s `Pcg64Mcg`.
    pub struct Pcg64RandNumGen {
        rng: Pcg64Mcg,
    }

    impl Pcg64RandNumGen {
        /// Builds a generator seeded deterministically from `seed`.
        #[must_use]
        pub fn from_seed(seed: u64) -> Self {
            Self {
                rng: Pcg64Mcg::seed_from_u64(seed),
            }
        }
    }

    impl EventRng for Pcg64RandNumGen {
        fn next_uniform_open01(&mut self) -> f64 {
            jitter_open01(self.rng.gen::<f64>())
        }
    }
}

#[cfg(feature = "reference-rng")]
pub use reference::Pcg64RandNumGen;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_leaves_interior_values_untouched() {
        assert!((jitter_open01(0.5) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn jitter_pulls_zero_and_one_strictly_inside() {
        assert!(jitter_open01(0.0) > 0.0);
        assert!(jitter_open01(1.0) < 1.0);
        assert!(jitter_open01(-3.0) > 0.0);
        assert!(jitter_open01(7.0) < 1.0);
    }

    #[cfg(feature = "reference-rng")]
    #[test]
    fn reference_rng_draws_are_reproducible_for_a_fixed_seed() {
        let mut a = Pcg64RandNumGen::from_seed(42);
        let mut b = Pcg64RandNumGen::from_seed(42);
        for _ in 0..100 {
            let (x, y) = (a.next_uniform_open01(), b.next_uniform_open01());
            assert!(x > 0.0 && x < 1.0);
            assert_eq!(x, y);
        }
    }
}
