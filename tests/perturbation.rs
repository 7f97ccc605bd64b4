//! Perturbation engine integration tests.

mod common;

use std::io::Cursor;

use common::{gradient, gray};
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use obscura::{PerturbationConfig, perturb, perturb_encoded};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn changed_entries(before: &[u8], after: &[u8]) -> Vec<(usize, i16)> {
    before
        .iter()
        .zip(after)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(index, (a, b))| (index, i16::from(*b) - i16::from(*a)))
        .collect()
}

#[test]
fn sparse_modifies_exactly_floor_p_w_h_entries() {
    let source = DynamicImage::ImageRgb8(gray(40, 25));
    for (probability, expected) in [(0.1, 100), (0.0137, 13), (0.0, 0), (1.0, 1000)] {
        let output = perturb(&source, &PerturbationConfig::sparse(probability)).unwrap();
        let changes = changed_entries(source.as_bytes(), output.as_bytes());
        assert_eq!(changes.len(), expected, "probability {probability}");
        assert!(changes.iter().all(|(_, delta)| (1..=3).contains(&delta.abs())));
    }
}

#[test]
fn sparse_touches_each_pixel_at_most_once() {
    let source = DynamicImage::ImageRgb8(gray(30, 30));
    let output = perturb(&source, &PerturbationConfig::sparse(0.5).with_seed(11)).unwrap();
    let changes = changed_entries(source.as_bytes(), output.as_bytes());

    let mut pixels: Vec<usize> = changes.iter().map(|(index, _)| index / 3).collect();
    pixels.dedup();
    assert_eq!(pixels.len(), changes.len());
}

#[test]
fn block_never_touches_partial_edge_blocks() {
    let source = DynamicImage::ImageRgb8(gray(37, 21));
    let config = PerturbationConfig::block(8, 1.0, 1.0).with_seed(5);
    let output = perturb(&source, &config).unwrap();

    let (width, height) = source.dimensions();
    let mut touched_inside = 0;
    for y in 0..height {
        for x in 0..width {
            let before = source.get_pixel(x, y);
            let after = output.get_pixel(x, y);
            if x >= 32 || y >= 16 {
                assert_eq!(before, after, "pixel ({x}, {y}) outside full blocks changed");
            } else if before != after {
                touched_inside += 1;
                for channel in 0..3 {
                    let delta = i16::from(after[channel]) - i16::from(before[channel]);
                    assert!(delta.abs() <= 20);
                }
            }
        }
    }
    assert!(touched_inside > 0);
}

#[test]
fn block_with_zero_probability_changes_nothing() {
    let source = DynamicImage::ImageRgb8(gradient(64, 64));
    let output = perturb(&source, &PerturbationConfig::block(16, 0.0, 1.0)).unwrap();
    assert_eq!(source.as_bytes(), output.as_bytes());
}

#[test]
fn block_perturbs_at_least_one_pixel_per_selected_block() {
    let source = DynamicImage::ImageRgb8(gray(16, 16));
    let mut changed_blocks = 0;
    for seed in 0..20 {
        let output = perturb(&source, &PerturbationConfig::block(16, 1.0, 0.0).with_seed(seed)).unwrap();
        if source.as_bytes() != output.as_bytes() {
            changed_blocks += 1;
        }
    }
    // A single pixel can draw a zero delta on all three channels, but not
    // for every seed.
    assert!(changed_blocks > 15);
}

#[test]
fn visual_debug_paints_markers_over_selected_pixels() {
    let source = DynamicImage::ImageRgb8(gray(20, 10));
    let output = perturb(&source, &PerturbationConfig::sparse(0.1).with_visual_debug(true)).unwrap();
    let red = output
        .to_rgb8()
        .pixels()
        .filter(|pixel| pixel.0 == [255, 0, 0])
        .count();
    assert_eq!(red, 20);
}

#[test]
fn visual_debug_draws_block_borders() {
    let source = DynamicImage::ImageRgb8(gray(8, 8));
    let output = perturb(
        &source,
        &PerturbationConfig::block(8, 1.0, 0.1).with_visual_debug(true).with_seed(2),
    )
    .unwrap()
    .to_rgb8();

    for step in 0..8 {
        for (x, y) in [(step, 0), (step, 7), (0, step), (7, step)] {
            assert_eq!(output.get_pixel(x, y).0, [255, 0, 0]);
        }
    }
}

#[test]
fn alpha_channel_is_preserved() {
    let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([100, 100, 100, 77])));
    let output = perturb(&source, &PerturbationConfig::sparse(1.0)).unwrap();
    assert!(matches!(output, DynamicImage::ImageRgba8(_)));
    assert!(output.to_rgba8().pixels().all(|pixel| pixel[3] == 77));
}

#[test]
fn grayscale_input_is_widened_to_rgb() {
    let source = DynamicImage::ImageLuma8(GrayImage::from_pixel(6, 6, Luma([90])));
    let output = perturb(&source, &PerturbationConfig::sparse(0.5)).unwrap();
    assert!(matches!(output, DynamicImage::ImageRgb8(_)));
    assert_eq!(output.dimensions(), (6, 6));
}

#[test]
fn sixteen_bit_input_is_narrowed_to_rgb8() {
    let source = DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(5, 4, image::Rgb([30_000u16, 30_000, 30_000])));
    let output = perturb(&source, &PerturbationConfig::sparse(0.5)).unwrap();
    assert!(matches!(output, DynamicImage::ImageRgb8(_)));
    assert_eq!(output.dimensions(), (5, 4));
}

#[test]
fn seeds_make_output_reproducible() {
    let source = DynamicImage::ImageRgb8(gradient(50, 40));
    let config = PerturbationConfig::block(10, 0.5, 0.3).with_seed(42);
    let first = perturb(&source, &config).unwrap();
    let second = perturb(&source, &config).unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());

    let mut rng = ChaCha20Rng::seed_from_u64(42);
    let third = obscura::perturb_with_rng(&source, &PerturbationConfig::block(10, 0.5, 0.3), &mut rng).unwrap();
    assert_eq!(first.as_bytes(), third.as_bytes());
}

#[test]
fn invalid_configurations_are_rejected() {
    let source = DynamicImage::ImageRgb8(gray(4, 4));
    for config in [
        PerturbationConfig::sparse(-0.01),
        PerturbationConfig::sparse(1.01),
        PerturbationConfig::block(0, 0.5, 0.5),
        PerturbationConfig::block(4, 1.5, 0.5),
        PerturbationConfig::block(4, 0.5, f64::INFINITY),
    ] {
        assert!(perturb(&source, &config).unwrap_err().is_configuration_error());
    }
}

#[test]
fn encoded_uploads_keep_their_kind() {
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(gradient(24, 24))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let encoded = perturb_encoded(&png, "scan.png", &PerturbationConfig::sparse(0.05)).unwrap();
    assert_eq!(encoded.media_type, "image/png");
    assert_eq!(encoded.file_name, "processed_scan.png");
    let decoded = image::load_from_memory(&encoded.bytes).unwrap();
    assert_eq!(decoded.dimensions(), (24, 24));

    let encoded = perturb_encoded(&png, "scan.jpeg", &PerturbationConfig::sparse(0.05)).unwrap();
    assert_eq!(encoded.media_type, "image/jpeg");
    assert_eq!(image::guess_format(&encoded.bytes).unwrap(), ImageFormat::Jpeg);
}

#[test]
fn undecodable_upload_is_an_image_error() {
    let result = perturb_encoded(b"garbage", "x.png", &PerturbationConfig::default());
    assert!(matches!(result, Err(obscura::ObscuraError::ImageError(_))));
}
