//! Perturbation configuration.
//!
//! [`PerturbationConfig`] selects one of the two [`Strategy`] variants and
//! carries the flags shared by both. A configuration is immutable once a
//! job starts; every entry point validates it before touching any pixels
//! or files.
//!
//! # Example
//!
//! ```
//! use obscura::PerturbationConfig;
//!
//! let sparse = PerturbationConfig::sparse(0.02).with_seed(7);
//! assert!(sparse.validate().is_ok());
//!
//! let invalid = PerturbationConfig::block(0, 0.1, 0.2);
//! assert!(invalid.validate().is_err());
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::error::ObscuraError;

/// Default per-pixel selection probability for the sparse-pixel strategy.
pub const DEFAULT_PERTURB_PROBABILITY: f64 = 0.01;

/// Default edge length, in pixels, of blocks for the block strategy.
pub const DEFAULT_BLOCK_SIZE: u32 = 16;

/// Default probability that a full block is selected.
pub const DEFAULT_REPLACEMENT_PROBABILITY: f64 = 0.1;

/// Default fraction of a selected block's pixels that receive noise.
pub const DEFAULT_PIXEL_RATIO: f64 = 0.1;

/// Pixel-mutation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    /// Nudge one channel of `⌊probability × width × height⌋` distinct
    /// pixels by ±1..3.
    SparsePixel {
        /// Fraction of pixels to touch, in `[0, 1]`.
        probability: f64,
    },
    /// Add ±20 noise to a fraction of the pixels inside randomly chosen,
    /// non-overlapping square blocks.
    Block {
        /// Block edge length in pixels. Must be positive.
        block_size: u32,
        /// Probability that each full block is selected, in `[0, 1]`.
        replacement_probability: f64,
        /// Fraction of a selected block's pixels to perturb, in `[0, 1]`.
        /// At least one pixel is always perturbed.
        pixel_ratio: f64,
    },
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::SparsePixel {
            probability: DEFAULT_PERTURB_PROBABILITY,
        }
    }
}

/// Configuration for one perturbation request.
///
/// Construct with [`sparse`](PerturbationConfig::sparse) or
/// [`block`](PerturbationConfig::block) and refine with the `with_*`
/// builder methods.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerturbationConfig {
    /// Which algorithm to run, with its parameters.
    #[serde(flatten)]
    pub strategy: Strategy,
    /// Paint markers over perturbed positions for visual inspection.
    #[serde(default)]
    pub visual_debug: bool,
    /// Seed for the random source. `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PerturbationConfig {
    /// Sparse-pixel strategy with the given selection probability.
    pub fn sparse(probability: f64) -> Self {
        Self {
            strategy: Strategy::SparsePixel { probability },
            ..Self::default()
        }
    }

    /// Block strategy with the given block size, block selection
    /// probability and per-block pixel ratio.
    pub fn block(block_size: u32, replacement_probability: f64, pixel_ratio: f64) -> Self {
        Self {
            strategy: Strategy::Block {
                block_size,
                replacement_probability,
                pixel_ratio,
            },
            ..Self::default()
        }
    }

    /// Enable or disable visual debug markers.
    ///
    /// The numeric perturbation always runs. Markers are painted
    /// afterwards, on top of it, in bright red: for the sparse-pixel
    /// strategy each selected pixel is painted, for the block strategy a
    /// one-pixel border is drawn around each selected block.
    #[must_use]
    pub fn with_visual_debug(mut self, enabled: bool) -> Self {
        self.visual_debug = enabled;
        self
    }

    /// Make the random source reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every parameter against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::InvalidConfiguration`] naming the first
    /// offending parameter.
    pub fn validate(&self) -> Result<(), ObscuraError> {
        match self.strategy {
            Strategy::SparsePixel { probability } => check_unit_interval("probability", probability),
            Strategy::Block {
                block_size,
                replacement_probability,
                pixel_ratio,
            } => {
                if block_size == 0 {
                    return Err(ObscuraError::InvalidConfiguration {
                        parameter: "block_size",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                check_unit_interval("replacement_probability", replacement_probability)?;
                check_unit_interval("pixel_ratio", pixel_ratio)
            }
        }
    }

    /// Random source for a single image.
    pub(crate) fn rng(&self) -> ChaCha20Rng {
        match self.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        }
    }

    /// Random source for one item of a batch, salted by the item name so
    /// seeded batches stay reproducible regardless of completion order.
    pub(crate) fn rng_for(&self, item: &str) -> ChaCha20Rng {
        match self.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed ^ fnv1a(item.as_bytes())),
            None => ChaCha20Rng::from_entropy(),
        }
    }
}

fn check_unit_interval(parameter: &'static str, value: f64) -> Result<(), ObscuraError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ObscuraError::InvalidConfiguration {
            parameter,
            reason: format!("{value} is outside [0, 1]"),
        })
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn nan_probability_is_rejected() {
        assert!(PerturbationConfig::sparse(f64::NAN).validate().is_err());
    }

    #[test]
    fn salted_rngs_differ_per_item() {
        let config = PerturbationConfig::sparse(0.5).with_seed(11);
        let first: u64 = config.rng_for("frame_000001.jpg").gen_range(0..u64::MAX);
        let again: u64 = config.rng_for("frame_000001.jpg").gen_range(0..u64::MAX);
        let other: u64 = config.rng_for("frame_000002.jpg").gen_range(0..u64::MAX);
        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}
