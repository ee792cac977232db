//! Post-processing that turns a generated picture into a printable coloring page.
//!
//! Every file-level transform reads its source and writes a sibling PNG with a
//! suffix (`_enhanced`, `_outline`, `_padded`); the source file is never touched.

use std::path::{Path, PathBuf};

use image::{
    DynamicImage, GrayImage, ImageError, ImageFormat, ImageReader, Luma, Rgb, RgbImage, imageops,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::page_geometry;

/// Multiplier applied around the image mean before thresholding.
pub const CONTRAST_FACTOR: f32 = 2.0;
/// Samples at or above this value become white, everything else black.
pub const WHITE_THRESHOLD: u8 = 200;
pub const CANNY_LOW_THRESHOLD: f32 = 50.0;
pub const CANNY_HIGH_THRESHOLD: f32 = 150.0;

pub const ENHANCED_SUFFIX: &str = "_enhanced";
pub const OUTLINE_SUFFIX: &str = "_outline";
pub const PADDED_SUFFIX: &str = "_padded";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to decode image '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode image '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
}

/// `dir/name.png` + `_enhanced` -> `dir/name_enhanced.png`.
pub fn derived_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    path.with_file_name(format!("{stem}{suffix}.png"))
}

pub fn enhance_for_coloring(path: &Path) -> Result<PathBuf, ProcessError> {
    let source = load_image(path)?;
    let output_path = derived_path(path, ENHANCED_SUFFIX);
    save_image(&DynamicImage::ImageLuma8(enhance_image(&source)), &output_path)?;
    info!(path = %output_path.display(), "Enhanced image saved");
    Ok(output_path)
}

pub fn create_outline_version(path: &Path) -> Result<PathBuf, ProcessError> {
    let source = load_image(path)?;
    let output_path = derived_path(path, OUTLINE_SUFFIX);
    save_image(&DynamicImage::ImageLuma8(outline_image(&source)), &output_path)?;
    info!(path = %output_path.display(), "Outline version saved");
    Ok(output_path)
}

pub fn pad_to_page_aspect(path: &Path, page_size: &str) -> Result<PathBuf, ProcessError> {
    let ratio = page_geometry::target_aspect_ratio(page_size);
    let source = load_image(path)?;
    let output_path = derived_path(path, PADDED_SUFFIX);
    save_image(&DynamicImage::ImageRgb8(pad_image(&source, ratio)), &output_path)?;
    info!(path = %output_path.display(), page_size, "Padded image saved");
    Ok(output_path)
}

/// Grayscale, contrast boost, then a hard cut at [`WHITE_THRESHOLD`].
/// The result only ever holds 0 and 255.
pub fn enhance_image(image: &DynamicImage) -> GrayImage {
    let gray = to_gray(image);
    let contrasted = boost_contrast(&gray, CONTRAST_FACTOR);
    threshold(&contrasted, WHITE_THRESHOLD)
}

/// Canny edges inverted to dark lines on a white page.
pub fn outline_image(image: &DynamicImage) -> GrayImage {
    let gray = to_gray(image);
    let mut edges = imageproc::edges::canny(&gray, CANNY_LOW_THRESHOLD, CANNY_HIGH_THRESHOLD);
    imageops::invert(&mut edges);
    edges
}

/// Rec. 601 luma (299/587/114) in 16-bit fixed point. Alpha is dropped.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma =
            (u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16;
        Luma([luma as u8])
    })
}

/// Stretch each sample away from the rounded image mean by `factor`,
/// truncating toward zero and clamping to the channel range.
pub fn boost_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let count = u64::from(width) * u64::from(height);
    if count == 0 {
        return image.clone();
    }
    let sum: u64 = image.pixels().map(|pixel| u64::from(pixel.0[0])).sum();
    let mean = (sum as f64 / count as f64 + 0.5).floor() as f32;
    debug!(width, height, mean, factor, "Boosting contrast");

    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let value = f32::from(pixel.0[0]);
        let stretched = (mean + factor * (value - mean)) as i32;
        output.put_pixel(x, y, Luma([stretched.clamp(0, 255) as u8]));
    }
    output
}

pub fn threshold(image: &GrayImage, cutoff: u8) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let value = if pixel.0[0] >= cutoff { 255 } else { 0 };
        output.put_pixel(x, y, Luma([value]));
    }
    output
}

/// Canvas height for a page of `ratio` (width / height) at the given width.
pub fn padded_height(width: u32, ratio: f64) -> u32 {
    ((f64::from(width) / ratio).round() as u32).max(1)
}

/// Keeps the width, sets the height from `ratio` and pastes the source
/// vertically centered on white. When the page is shorter than the source the
/// offset goes negative and the top and bottom rows are cut off evenly.
pub fn pad_image(image: &DynamicImage, ratio: f64) -> RgbImage {
    let source = image.to_rgb8();
    let (width, height) = source.dimensions();
    let new_height = padded_height(width, ratio);
    let offset_y = (i64::from(new_height) - i64::from(height)).div_euclid(2);
    debug!(width, height, new_height, offset_y, "Padding to page aspect");

    let mut canvas = RgbImage::from_pixel(width, new_height, Rgb([255, 255, 255]));
    imageops::overlay(&mut canvas, &source, 0, offset_y);
    canvas
}

/// Decodes by content, not extension: generated files are always named
/// `.png` whatever the upstream service sent.
fn load_image(path: &Path) -> Result<DynamicImage, ProcessError> {
    let io_error = |source| ProcessError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = ImageReader::open(path)
        .map_err(io_error)?
        .with_guessed_format()
        .map_err(io_error)?;
    reader.decode().map_err(|err| match err {
        ImageError::IoError(source) => ProcessError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => ProcessError::Decode {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn save_image(image: &DynamicImage, path: &Path) -> Result<(), ProcessError> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|err| match err {
            ImageError::IoError(source) => ProcessError::Io {
                path: path.to_path_buf(),
                source,
            },
            source => ProcessError::Encode {
                path: path.to_path_buf(),
                source,
            },
        })
}
