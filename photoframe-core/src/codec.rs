//! Decoding and encoding of raster images.
//!
//! Everything is composited in sRGB: embedded ICC profiles are converted on
//! decode, and outputs carry the configured print density.

use std::io::Cursor;

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use moxcms::{ColorProfile, Layout, TransformOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Encoded output format, chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless, for re-editing.
    Png,
    /// Lossy, for sharing.
    Jpeg { quality: u8 },
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Png
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg { .. } => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

/// Decode bytes to sRGB RGBA8, applying EXIF orientation when present.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, image::ImageError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let icc = decoder.icc_profile()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let mut rgba = img.to_rgba8();
    if let Some(icc) = icc {
        convert_to_srgb(&mut rgba, &icc);
    }
    Ok(rgba)
}

/// Re-express pixels tagged with `icc` in sRGB. A profile that cannot be
/// parsed or applied leaves the pixels as decoded.
pub fn convert_to_srgb(img: &mut RgbaImage, icc: &[u8]) {
    let srgb = ColorProfile::new_srgb();
    let converted = ColorProfile::new_from_slice(icc)
        .and_then(|source| {
            source.create_transform_8bit(Layout::Rgba, &srgb, Layout::Rgba, TransformOptions::default())
        })
        .and_then(|transform| {
            let mut out = vec![0u8; img.as_raw().len()];
            transform.transform(img.as_raw(), &mut out)?;
            Ok(out)
        });

    match converted {
        Ok(out) => {
            img.copy_from_slice(&out);
            debug!(profile_bytes = icc.len(), "converted embedded profile to sRGB");
        }
        Err(e) => warn!(error = %e, "ignoring unusable ICC profile"),
    }
}

/// Dots per inch to pixels per metre, as PNG `pHYs` stores density.
fn dpi_to_ppm(dpi: u16) -> u32 {
    ((u32::from(dpi) * 10_000 + 127) / 254).max(1)
}

pub fn decode_template(bytes: &[u8]) -> EngineResult<RgbaImage> {
    let img = decode_rgba(bytes).map_err(|e| EngineError::invalid_template(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(EngineError::invalid_template("template has empty dimensions"));
    }
    Ok(img)
}

pub fn decode_photo(slot: u8, bytes: &[u8]) -> EngineResult<RgbaImage> {
    let img = decode_rgba(bytes).map_err(|e| EngineError::invalid_photo(slot, e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(EngineError::invalid_photo(slot, "photo has empty dimensions"));
    }
    Ok(img)
}

/// Encode an opaque raster. Alpha is dropped; the engine only emits flattened output.
pub fn encode(img: &RgbaImage, format: OutputFormat, dpi: u16) -> EngineResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut buf = Vec::new();

    match format {
        OutputFormat::Png => {
            let ppm = dpi_to_ppm(dpi);
            let mut encoder = png::Encoder::new(&mut buf, w, h);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_pixel_dims(Some(png::PixelDimensions {
                xppu: ppm,
                yppu: ppm,
                unit: png::Unit::Meter,
            }));
            let png_err = |e: png::EncodingError| EngineError::internal(format!("png encode: {e}"));
            let mut writer = encoder.write_header().map_err(png_err)?;
            writer.write_image_data(rgb.as_raw()).map_err(png_err)?;
            writer.finish().map_err(png_err)?;
        }
        OutputFormat::Jpeg { quality } => {
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            encoder.set_pixel_density(PixelDensity::dpi(dpi));
            encoder
                .encode_image(&rgb)
                .map_err(|e| EngineError::internal(format!("jpeg encode: {e}")))?;
        }
    }

    Ok(buf)
}

#[cfg(test)]
pub(crate) fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}
