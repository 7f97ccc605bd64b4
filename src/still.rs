//! Single-image helpers.
//!
//! Reading, perturbing and writing one image, either between files (used by
//! the batch scheduler for every frame) or fully in memory (used for
//! uploaded images that never touch the disk).

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::configuration::PerturbationConfig;
use crate::error::ObscuraError;
use crate::perturb::perturb_with_rng;

/// JPEG quality for frames written between pipeline stages.
pub const FRAME_JPEG_QUALITY: u8 = 95;

/// JPEG quality for in-memory image responses.
pub const RESPONSE_JPEG_QUALITY: u8 = 90;

/// A perturbed image encoded for delivery.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Encoded file contents.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes` (`image/jpeg` or `image/png`).
    pub media_type: &'static str,
    /// Suggested download name.
    pub file_name: String,
}

/// Open `input`, perturb it, and save the result to `output`.
///
/// The output format follows the extension of `output`.
///
/// # Errors
///
/// Returns [`ObscuraError::ImageError`] if the input cannot be decoded or the
/// output cannot be encoded, and [`ObscuraError::InvalidConfiguration`] for
/// an invalid `config`.
pub fn perturb_file(input: &Path, output: &Path, config: &PerturbationConfig) -> Result<(), ObscuraError> {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let image = image::open(input)?;
    let mut rng = config.rng_for(&name);
    let perturbed = perturb_with_rng(&image, config, &mut rng)?;
    save_image(&perturbed, output)
}

/// Decode an in-memory upload, perturb it, and re-encode it.
///
/// Names ending in `.jpg`/`.jpeg` are re-encoded as JPEG, everything else
/// as PNG.
///
/// # Errors
///
/// Returns [`ObscuraError::ImageError`] if `bytes` is not a decodable image.
pub fn perturb_encoded(
    bytes: &[u8],
    file_name: &str,
    config: &PerturbationConfig,
) -> Result<EncodedImage, ObscuraError> {
    config.validate()?;
    let image = image::load_from_memory(bytes)?;
    let mut rng = config.rng();
    let perturbed = perturb_with_rng(&image, config, &mut rng)?;

    let mut encoded = Vec::new();
    let media_type = if is_jpeg_name(file_name) {
        let encoder = JpegEncoder::new_with_quality(&mut encoded, RESPONSE_JPEG_QUALITY);
        DynamicImage::ImageRgb8(perturbed.to_rgb8()).write_with_encoder(encoder)?;
        "image/jpeg"
    } else {
        perturbed.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;
        "image/png"
    };

    Ok(EncodedImage {
        bytes: encoded,
        media_type,
        file_name: format!("processed_{file_name}"),
    })
}

/// Save `image` to `path`, writing JPEG at [`FRAME_JPEG_QUALITY`].
pub(crate) fn save_image(image: &DynamicImage, path: &Path) -> Result<(), ObscuraError> {
    if is_jpeg_name(&path.to_string_lossy()) {
        let writer = BufWriter::new(File::create(path)?);
        let encoder = JpegEncoder::new_with_quality(writer, FRAME_JPEG_QUALITY);
        DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
    } else {
        image.save(path)?;
    }
    Ok(())
}

fn is_jpeg_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}
