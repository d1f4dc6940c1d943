//! Sheet Tiler - Print Layouts
//!
//! Lays identical copies of a composite side by side for printing strips.

use image::imageops;
use image::{Rgba, RgbaImage};
use serde::Serialize;

use crate::compose::Composite;
use crate::error::{EngineError, EngineResult};

pub const MIN_COPIES: u32 = 1;
pub const MAX_COPIES: u32 = 5;

/// Widest sheet the encoders accept (JPEG caps both axes at 65535).
pub const MAX_SHEET_WIDTH: u32 = 65_535;

/// Gap colour between copies.
pub const SHEET_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Validated tiling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSpec {
    copy_count: u32,
    margin: u32,
}

impl SheetSpec {
    /// Rejects copy counts outside `[1, 5]` and margins that alone exceed
    /// the widest sheet.
    pub fn new(copy_count: u32, margin: u32) -> EngineResult<Self> {
        if !(MIN_COPIES..=MAX_COPIES).contains(&copy_count) {
            return Err(EngineError::InvalidCopyCount(copy_count));
        }
        let gaps = (copy_count - 1)
            .checked_mul(margin)
            .filter(|g| *g <= MAX_SHEET_WIDTH);
        if gaps.is_none() {
            return Err(EngineError::InvalidTiling(format!(
                "margin {margin} too large for {copy_count} copies (sheet limit {MAX_SHEET_WIDTH} px)"
            )));
        }
        Ok(Self { copy_count, margin })
    }

    pub fn copy_count(&self) -> u32 {
        self.copy_count
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    /// Width of a sheet built from a composite `width` pixels wide:
    /// `k * width + (k - 1) * margin`, never above [`MAX_SHEET_WIDTH`].
    pub fn sheet_width(&self, width: u32) -> EngineResult<u32> {
        let total = u64::from(self.copy_count) * u64::from(width)
            + u64::from(self.copy_count - 1) * u64::from(self.margin);
        if total > u64::from(MAX_SHEET_WIDTH) {
            return Err(EngineError::InvalidTiling(format!(
                "{} copies of a {width} px composite with margin {} need {total} px (limit {MAX_SHEET_WIDTH})",
                self.copy_count, self.margin
            )));
        }
        Ok(total as u32)
    }
}

/// Replicate `composite` horizontally. One copy returns the input unchanged.
pub fn tile(composite: &RgbaImage, spec: &SheetSpec, fill: Rgba<u8>) -> EngineResult<RgbaImage> {
    if spec.copy_count == 1 {
        return Ok(composite.clone());
    }

    let (w, h) = composite.dimensions();
    let mut sheet = RgbaImage::from_pixel(spec.sheet_width(w)?, h, fill);
    let stride = i64::from(w) + i64::from(spec.margin);
    for i in 0..i64::from(spec.copy_count) {
        imageops::replace(&mut sheet, composite, i * stride, 0);
    }
    Ok(sheet)
}

/// Convenience for callers holding a [`Composite`].
pub fn tile_composite(composite: &Composite, copy_count: u32, margin: u32) -> EngineResult<RgbaImage> {
    let spec = SheetSpec::new(copy_count, margin)?;
    tile(&composite.image, &spec, SHEET_FILL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(10, 4, Rgba([5, 6, 7, 255]));
        img.put_pixel(0, 0, Rgba([1, 1, 1, 255]));
        img
    }

    #[test]
    fn one_copy_is_identity() {
        let img = sample();
        let spec = SheetSpec::new(1, 25).unwrap();
        assert_eq!(tile(&img, &spec, SHEET_FILL).unwrap(), img);
    }

    #[test]
    fn width_includes_margins() {
        let img = sample();
        for k in 2..=5 {
            let spec = SheetSpec::new(k, 3).unwrap();
            let sheet = tile(&img, &spec, SHEET_FILL).unwrap();
            assert_eq!(sheet.width(), k * 10 + (k - 1) * 3);
            assert_eq!(sheet.height(), 4);
        }
    }

    #[test]
    fn copies_and_gaps_are_placed() {
        let img = sample();
        let spec = SheetSpec::new(3, 2).unwrap();
        let sheet = tile(&img, &spec, SHEET_FILL).unwrap();
        assert_eq!(*sheet.get_pixel(0, 0), Rgba([1, 1, 1, 255]));
        assert_eq!(*sheet.get_pixel(12, 0), Rgba([1, 1, 1, 255]));
        assert_eq!(*sheet.get_pixel(24, 0), Rgba([1, 1, 1, 255]));
        assert_eq!(*sheet.get_pixel(10, 1), SHEET_FILL);
        assert_eq!(*sheet.get_pixel(11, 3), SHEET_FILL);
        assert_eq!(*sheet.get_pixel(33, 3), Rgba([5, 6, 7, 255]));
    }

    #[test]
    fn tile_composite_validates_then_tiles() {
        let composite = Composite { image: sample(), filled: vec![1] };
        assert_eq!(tile_composite(&composite, 2, 0).unwrap().width(), 20);
        assert!(matches!(
            tile_composite(&composite, 6, 0),
            Err(EngineError::InvalidCopyCount(6))
        ));
    }

    #[test]
    fn huge_margin_is_rejected_not_wrapped() {
        let err = SheetSpec::new(5, u32::MAX / 4).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTiling(_)));
        assert!(SheetSpec::new(1, u32::MAX).is_ok());
    }

    #[test]
    fn sheet_over_limit_is_rejected() {
        let spec = SheetSpec::new(5, 1000).unwrap();
        assert_eq!(spec.sheet_width(10).unwrap(), 4050);
        assert!(matches!(spec.sheet_width(u32::MAX), Err(EngineError::InvalidTiling(_))));

        let wide = RgbaImage::new(MAX_SHEET_WIDTH / 2, 1);
        let spec = SheetSpec::new(3, 0).unwrap();
        assert!(matches!(tile(&wide, &spec, SHEET_FILL), Err(EngineError::InvalidTiling(_))));
    }

    #[test]
    fn copy_count_bounds() {
        assert!(matches!(SheetSpec::new(0, 0), Err(EngineError::InvalidCopyCount(0))));
        assert!(matches!(SheetSpec::new(6, 0), Err(EngineError::InvalidCopyCount(6))));
        assert!(SheetSpec::new(5, 0).is_ok());
    }
}
