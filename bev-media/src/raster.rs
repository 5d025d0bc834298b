//! Single-channel integer rasters: packed occupancy labels and binary planes.

use ::image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use anyhow::{Context, Result};
use log::debug;
use ndarray::{Array2, ArrayView2};
use std::fs;
use std::path::Path;

/// A raster as stored on disk, widened to 16 bits.
#[derive(Debug, Clone)]
pub struct RasterFile {
    pub channels: u8,
    pub bit_depth: u32,
    /// `(height, width)`.
    pub data: Array2<u16>,
}

pub fn read_packed_raster(path: impl AsRef<Path>) -> Result<RasterFile> {
    let path = path.as_ref();
    let image = ::image::open(path)
        .with_context(|| format!("Failed to open label raster {}", path.display()))?;

    let color = image.color();
    let channels = color.channel_count();
    let bit_depth = (color.bits_per_pixel() / channels as u16) as u32;
    let (width, height) = (image.width() as usize, image.height() as usize);

    let raw = match image {
        DynamicImage::ImageLuma16(buffer) => buffer.into_raw(),
        DynamicImage::ImageLuma8(buffer) => buffer.into_raw().into_iter().map(u16::from).collect(),
        other => other.into_luma16().into_raw(),
    };
    let data = Array2::from_shape_vec((height, width), raw)?;
    debug!(
        "Read raster {} ({}x{}, {} channel(s) of {} bits)",
        path.display(),
        width,
        height,
        channels,
        bit_depth
    );

    Ok(RasterFile {
        channels,
        bit_depth,
        data,
    })
}

/// Writes a 16-bit grayscale PNG.
pub fn write_packed_raster(path: impl AsRef<Path>, raster: ArrayView2<u16>) -> Result<()> {
    let path = path.as_ref();
    let (height, width) = raster.dim();
    let raw = raster.iter().copied().collect::<Vec<_>>();
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(width as u32, height as u32, raw)
            .context("Raster buffer does not match its dimensions")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    buffer
        .save(path)
        .with_context(|| format!("Failed to save label raster {}", path.display()))?;

    Ok(())
}

/// Any non-zero pixel reads as `true`.
pub fn read_binary_plane(path: impl AsRef<Path>) -> Result<Array2<bool>> {
    let raster = read_packed_raster(path)?;
    Ok(raster.data.mapv(|value| value != 0))
}

/// Writes `true` as 255 and `false` as 0 in an 8-bit grayscale PNG.
pub fn write_binary_plane(path: impl AsRef<Path>, plane: ArrayView2<bool>) -> Result<()> {
    let path = path.as_ref();
    let (height, width) = plane.dim();
    let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if plane[[y as usize, x as usize]] { 255 } else { 0 }])
    });

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .with_context(|| format!("Failed to save plane {}", path.display()))?;

    Ok(())
}
