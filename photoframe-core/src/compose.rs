//! Compositor - Photos Under Template Art
//!
//! Fitted photos are pasted into their slots *beneath* the template: slot
//! pixels show the photo, any other template pixel inside the slot rectangle
//! (frame borders, overlays, soft edges) is blended over it. The result is
//! flattened onto an opaque background.

use std::collections::BTreeMap;

use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::slots::{Slot, SlotPredicate};

/// Flattened output raster, same size as its template.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub image: RgbaImage,
    /// Ordinals that received a photo, ascending.
    pub filled: Vec<u8>,
}

impl Composite {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Paste `assignments` (ordinal -> fitted pixels) into `template`.
///
/// `template` is never written to; the composite starts from a copy.
pub fn compose<P: SlotPredicate + ?Sized>(
    template: &RgbaImage,
    slots: &[Slot],
    assignments: &BTreeMap<u8, RgbaImage>,
    marker: &P,
    background: Rgba<u8>,
) -> EngineResult<Composite> {
    for ordinal in assignments.keys() {
        if !slots.iter().any(|s| s.ordinal == *ordinal) {
            return Err(EngineError::SlotOutOfRange {
                slot: *ordinal,
                available: slots.len(),
            });
        }
    }

    let mut canvas = template.clone();
    let mut filled = Vec::with_capacity(assignments.len());

    for slot in slots {
        let Some(photo) = assignments.get(&slot.ordinal) else {
            continue;
        };
        let r = slot.rect;
        if photo.dimensions() != (r.width, r.height) {
            return Err(EngineError::internal(format!(
                "fitted photo for slot {} is {}x{}, slot is {}x{}",
                slot.ordinal,
                photo.width(),
                photo.height(),
                r.width,
                r.height
            )));
        }
        if !r.fits_within(template.width(), template.height()) {
            return Err(EngineError::invalid_template(format!(
                "slot {} lies outside the template bounds",
                slot.ordinal
            )));
        }

        for (px, py, photo_px) in photo.enumerate_pixels() {
            let (x, y) = (r.x + px, r.y + py);
            let art = *template.get_pixel(x, y);
            let out = if marker.is_slot_pixel(&art) {
                *photo_px
            } else {
                over(art, *photo_px)
            };
            canvas.put_pixel(x, y, out);
        }
        filled.push(slot.ordinal);
    }

    flatten(&mut canvas, background);
    debug!(filled = ?filled, "composed template");

    Ok(Composite {
        image: canvas,
        filled,
    })
}

/// Composite every pixel over an opaque `background`, leaving alpha at 255.
pub fn flatten(img: &mut RgbaImage, background: Rgba<u8>) {
    let bg = Rgba([background[0], background[1], background[2], 255]);
    for px in img.pixels_mut() {
        *px = over(*px, bg);
    }
}

/// Straight-alpha source-over.
pub fn over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as u32;
    if sa == 255 {
        return src;
    }
    let da = dst[3] as u32;
    if sa == 0 {
        return dst;
    }

    let out_a = sa * 255 + da * (255 - sa);
    if out_a == 0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = src[i] as u32 * sa * 255 + dst[i] as u32 * da * (255 - sa);
        out[i] = ((c + out_a / 2) / out_a).min(255) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    Rgba(out)
}
