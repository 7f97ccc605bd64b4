//! Pixel perturbation engine.
//!
//! [`perturb`] applies the configured [`Strategy`] to a copy of an image and
//! returns the copy; the input is never modified and the output always has
//! the input's dimensions.
//!
//! Both strategies operate on the three colour channels of 8-bit RGB or
//! RGBA buffers. Alpha is left untouched. Images in any other colour model
//! are converted to 8-bit RGB first.
//!
//! # Example
//!
//! ```
//! use image::{DynamicImage, RgbImage};
//! use obscura::{PerturbationConfig, perturb};
//!
//! let image = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
//! let config = PerturbationConfig::sparse(0.05).with_seed(1);
//! let perturbed = perturb(&image, &config)?;
//! assert_eq!(perturbed.width(), 64);
//! # Ok::<(), obscura::ObscuraError>(())
//! ```

use image::{DynamicImage, ImageBuffer, Pixel};
use rand::Rng;
use rand::seq::index;

use crate::configuration::{PerturbationConfig, Strategy};
use crate::error::ObscuraError;

/// Signed deltas applied by the sparse-pixel strategy.
const SPARSE_DELTAS: [i16; 6] = [-3, -2, -1, 1, 2, 3];

/// Largest absolute delta applied by the block strategy.
const BLOCK_DELTA: i16 = 20;

/// Number of colour channels perturbed per pixel.
const COLOR_CHANNELS: usize = 3;

/// Colour painted over perturbed positions in visual debug mode.
const MARKER: [u8; 3] = [255, 0, 0];

/// Perturb `image` according to `config`.
///
/// Randomness comes from `config.seed` when set, otherwise from OS entropy.
///
/// RGB8 and RGBA8 images keep their layout, and alpha is left untouched.
/// Any other colour model is converted to RGB8 first and returned as RGB8.
///
/// # Errors
///
/// Returns [`ObscuraError::InvalidConfiguration`] if `config` fails
/// [`validate`](PerturbationConfig::validate).
pub fn perturb(image: &DynamicImage, config: &PerturbationConfig) -> Result<DynamicImage, ObscuraError> {
    let mut rng = config.rng();
    perturb_with_rng(image, config, &mut rng)
}

/// Perturb `image` drawing randomness from `rng`.
///
/// `config.seed` is ignored; the caller owns the random source. The colour
/// model is handled as in [`perturb`].
///
/// # Errors
///
/// Returns [`ObscuraError::InvalidConfiguration`] if `config` fails
/// [`validate`](PerturbationConfig::validate).
pub fn perturb_with_rng<R: Rng + ?Sized>(
    image: &DynamicImage,
    config: &PerturbationConfig,
    rng: &mut R,
) -> Result<DynamicImage, ObscuraError> {
    config.validate()?;

    let perturbed = match image {
        DynamicImage::ImageRgb8(buffer) => {
            let mut output = buffer.clone();
            apply(&mut output, config, rng);
            DynamicImage::ImageRgb8(output)
        }
        DynamicImage::ImageRgba8(buffer) => {
            let mut output = buffer.clone();
            apply(&mut output, config, rng);
            DynamicImage::ImageRgba8(output)
        }
        other => {
            let mut output = other.to_rgb8();
            apply(&mut output, config, rng);
            DynamicImage::ImageRgb8(output)
        }
    };

    Ok(perturbed)
}

/// Geometry of a packed 8-bit buffer.
#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    channels: usize,
}

impl Layout {
    fn offset(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * self.channels
    }
}

fn apply<P, R>(buffer: &mut ImageBuffer<P, Vec<u8>>, config: &PerturbationConfig, rng: &mut R)
where
    P: Pixel<Subpixel = u8>,
    R: Rng + ?Sized,
{
    let layout = Layout {
        width: buffer.width() as usize,
        height: buffer.height() as usize,
        channels: usize::from(P::CHANNEL_COUNT),
    };
    let pixels: &mut [u8] = buffer;

    match config.strategy {
        Strategy::SparsePixel { probability } => {
            let touched = sparse_pixels(pixels, layout, probability, config.visual_debug, rng);
            log::trace!("Sparse perturbation touched {touched} pixels");
        }
        Strategy::Block {
            block_size,
            replacement_probability,
            pixel_ratio,
        } => {
            let blocks = blocks(
                pixels,
                layout,
                block_size as usize,
                replacement_probability,
                pixel_ratio,
                config.visual_debug,
                rng,
            );
            log::trace!("Block perturbation selected {blocks} blocks");
        }
    }
}

/// Returns the number of selected pixels.
fn sparse_pixels<R: Rng + ?Sized>(
    pixels: &mut [u8],
    layout: Layout,
    probability: f64,
    visual_debug: bool,
    rng: &mut R,
) -> usize {
    let total = layout.width * layout.height;
    let count = ((probability * total as f64).floor() as usize).min(total);
    if count == 0 {
        return 0;
    }

    let selected = index::sample(rng, total, count);
    for position in selected.iter() {
        let channel = rng.gen_range(0..COLOR_CHANNELS);
        let delta = SPARSE_DELTAS[rng.gen_range(0..SPARSE_DELTAS.len())];
        let offset = position * layout.channels + channel;
        pixels[offset] = shift(pixels[offset], delta);
    }

    if visual_debug {
        for position in selected.iter() {
            paint(pixels, position * layout.channels);
        }
    }

    count
}

/// Returns the number of selected blocks.
fn blocks<R: Rng + ?Sized>(
    pixels: &mut [u8],
    layout: Layout,
    block_size: usize,
    replacement_probability: f64,
    pixel_ratio: f64,
    visual_debug: bool,
    rng: &mut R,
) -> usize {
    let area = block_size * block_size;
    let per_block = ((pixel_ratio * area as f64).floor() as usize).clamp(1, area);
    let mut selected_blocks = Vec::new();

    // Partial blocks at the right and bottom edges are never visited.
    for block_y in 0..layout.height / block_size {
        for block_x in 0..layout.width / block_size {
            if !rng.gen_bool(replacement_probability) {
                continue;
            }
            let origin_x = block_x * block_size;
            let origin_y = block_y * block_size;

            for local in index::sample(rng, area, per_block).iter() {
                let x = origin_x + local % block_size;
                let y = origin_y + local / block_size;
                let offset = layout.offset(x, y);
                for channel in 0..COLOR_CHANNELS {
                    let delta = rng.gen_range(-BLOCK_DELTA..=BLOCK_DELTA);
                    pixels[offset + channel] = shift(pixels[offset + channel], delta);
                }
            }
            selected_blocks.push((origin_x, origin_y));
        }
    }

    if visual_debug {
        for &(origin_x, origin_y) in &selected_blocks {
            paint_border(pixels, layout, origin_x, origin_y, block_size);
        }
    }

    selected_blocks.len()
}

fn shift(value: u8, delta: i16) -> u8 {
    (i16::from(value) + delta).clamp(0, 255) as u8
}

fn paint(pixels: &mut [u8], offset: usize) {
    pixels[offset..offset + COLOR_CHANNELS].copy_from_slice(&MARKER);
}

fn paint_border(pixels: &mut [u8], layout: Layout, origin_x: usize, origin_y: usize, size: usize) {
    let last = size - 1;
    for step in 0..size {
        paint(pixels, layout.offset(origin_x + step, origin_y));
        paint(pixels, layout.offset(origin_x + step, origin_y + last));
        paint(pixels, layout.offset(origin_x, origin_y + step));
        paint(pixels, layout.offset(origin_x + last, origin_y + step));
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn gray(width: usize, height: usize) -> Vec<u8> {
        vec![128; width * height * 3]
    }

    #[test]
    fn shift_clamps_to_byte_range() {
        assert_eq!(shift(254, 3), 255);
        assert_eq!(shift(1, -3), 0);
        assert_eq!(shift(100, -20), 80);
    }

    #[test]
    fn sparse_selection_count_is_floored() {
        let layout = Layout {
            width: 10,
            height: 10,
            channels: 3,
        };
        let mut pixels = gray(10, 10);
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        assert_eq!(sparse_pixels(&mut pixels, layout, 0.055, false, &mut rng), 5);
        assert_eq!(sparse_pixels(&mut pixels, layout, 0.009, false, &mut rng), 0);
    }

    #[test]
    fn border_covers_block_perimeter_only() {
        let layout = Layout {
            width: 4,
            height: 4,
            channels: 3,
        };
        let mut pixels = gray(4, 4);
        paint_border(&mut pixels, layout, 0, 0, 4);

        let painted = pixels.chunks(3).filter(|pixel| *pixel == MARKER).count();
        assert_eq!(painted, 12);
        assert_eq!(&pixels[layout.offset(1, 1)..layout.offset(1, 1) + 3], &[128, 128, 128]);
    }
}
