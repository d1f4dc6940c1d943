//! Photo Fitter - Center-Crop Fill
//!
//! The crop window always has the slot's aspect ratio and is centred on the
//! photo, so resampling it to the slot size never distorts.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::slots::{Rect, Slot};

/// Resampling filter used for both downscaling and upscaling.
pub const FIT_FILTER: FilterType = FilterType::Lanczos3;

/// Crop window in photo coordinates plus the output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitTransform {
    pub crop: Rect,
    pub target_width: u32,
    pub target_height: u32,
}

impl FitTransform {
    /// True when the crop window is smaller than the target in either axis.
    pub fn upscales(&self) -> bool {
        self.crop.width < self.target_width || self.crop.height < self.target_height
    }

    pub fn needs_resample(&self) -> bool {
        self.crop.width != self.target_width || self.crop.height != self.target_height
    }
}

/// Compute the centred crop matching `target_width / target_height`.
pub fn plan_fit(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
) -> Option<FitTransform> {
    if source_width == 0 || source_height == 0 || target_width == 0 || target_height == 0 {
        return None;
    }

    let (sw, sh) = (source_width as u64, source_height as u64);
    let (tw, th) = (target_width as u64, target_height as u64);

    let crop = if sw * th == sh * tw {
        Rect::new(0, 0, source_width, source_height)
    } else if sw * th > sh * tw {
        // Wider than the slot: keep full height, trim left and right.
        let w = ((sh * tw + th / 2) / th).clamp(1, sw) as u32;
        Rect::new((source_width - w) / 2, 0, w, source_height)
    } else {
        // Taller than the slot: keep full width, trim top and bottom.
        let h = ((sw * th + tw / 2) / tw).clamp(1, sh) as u32;
        Rect::new(0, (source_height - h) / 2, source_width, h)
    };

    Some(FitTransform {
        crop,
        target_width,
        target_height,
    })
}

/// Fill `slot` with `photo`, trimming the excess. Small photos are upscaled.
pub fn fit(photo: &RgbaImage, slot: &Slot) -> EngineResult<RgbaImage> {
    let (w, h) = photo.dimensions();
    let transform = plan_fit(w, h, slot.rect.width, slot.rect.height)
        .ok_or_else(|| EngineError::invalid_photo(slot.ordinal, format!("photo has empty dimensions {w}x{h}")))?;
    Ok(apply(photo, &transform))
}

pub fn apply(photo: &RgbaImage, transform: &FitTransform) -> RgbaImage {
    let c = transform.crop;
    let cropped = imageops::crop_imm(photo, c.x, c.y, c.width, c.height).to_image();
    if !transform.needs_resample() {
        return cropped;
    }
    imageops::resize(
        &cropped,
        transform.target_width,
        transform.target_height,
        FIT_FILTER,
    )
}
