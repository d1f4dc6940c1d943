//! Slot Locator - Connected-Component Segmentation
//!
//! A template marks the places where photos go with "slot pixels": fully
//! transparent pixels by default, or a configured marker colour. Slots are the
//! bounding boxes of the connected marker regions, in reading order.

use std::collections::VecDeque;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static LOCATE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_locate_call_count() -> u32 {
    LOCATE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_locate_call_count() {
    LOCATE_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Templates never expose more than this many slots.
pub const MAX_SLOTS: usize = 4;

/// Regions smaller than this (in pixels) are treated as noise.
pub const DEFAULT_MIN_SLOT_AREA: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

/// A photo slot: 1-based ordinal in reading order plus its rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub ordinal: u8,
    #[serde(flatten)]
    pub rect: Rect,
}

/// Decides whether a template pixel belongs to a slot.
pub trait SlotPredicate: Sync {
    fn is_slot_pixel(&self, px: &Rgba<u8>) -> bool;
}

impl<F> SlotPredicate for F
where
    F: Fn(&Rgba<u8>) -> bool + Sync,
{
    fn is_slot_pixel(&self, px: &Rgba<u8>) -> bool {
        self(px)
    }
}

/// Built-in slot marker conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SlotMarker {
    /// Pixels with alpha at or below `max_alpha`.
    #[serde(rename_all = "camelCase")]
    Transparent {
        #[serde(default)]
        max_alpha: u8,
    },
    /// Opaque pixels within `tolerance` of `rgb` on every channel.
    Color {
        rgb: [u8; 3],
        #[serde(default)]
        tolerance: u8,
    },
}

impl Default for SlotMarker {
    fn default() -> Self {
        Self::Transparent { max_alpha: 0 }
    }
}

impl SlotPredicate for SlotMarker {
    fn is_slot_pixel(&self, px: &Rgba<u8>) -> bool {
        match *self {
            SlotMarker::Transparent { max_alpha } => px[3] <= max_alpha,
            SlotMarker::Color { rgb, tolerance } => {
                px[3] == 255
                    && rgb
                        .iter()
                        .zip(px.0.iter())
                        .all(|(want, got)| want.abs_diff(*got) <= tolerance)
            }
        }
    }
}

/// Locator settings; also the slot cache key alongside the template fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorSettings {
    #[serde(default)]
    pub marker: SlotMarker,
    #[serde(default = "default_min_area")]
    pub min_area: u32,
}

fn default_min_area() -> u32 {
    DEFAULT_MIN_SLOT_AREA
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            marker: SlotMarker::default(),
            min_area: DEFAULT_MIN_SLOT_AREA,
        }
    }
}

impl LocatorSettings {
    pub fn locate(&self, template: &RgbaImage) -> Vec<Slot> {
        locate(template, &self.marker, self.min_area)
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    bounds: Rect,
    area: u64,
}

/// Derive the slots of a template. Pure function of the pixels.
pub fn locate<P: SlotPredicate + ?Sized>(template: &RgbaImage, marker: &P, min_area: u32) -> Vec<Slot> {
    #[cfg(feature = "test-hooks")]
    LOCATE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    let (width, height) = template.dimensions();
    let mask: Vec<bool> = template.pixels().map(|px| marker.is_slot_pixel(px)).collect();

    let mut regions: Vec<Region> = segment(&mask, width as usize, height as usize)
        .into_iter()
        .filter(|r| r.area >= min_area as u64)
        .collect();

    merge_overlapping(&mut regions);
    regions.sort_by(|a, b| {
        a.bounds
            .y
            .cmp(&b.bounds.y)
            .then(a.bounds.x.cmp(&b.bounds.x))
    });

    if regions.len() > MAX_SLOTS {
        warn!(
            found = regions.len(),
            kept = MAX_SLOTS,
            "template has more slot regions than supported, extra regions ignored"
        );
        regions.truncate(MAX_SLOTS);
    }

    let slots: Vec<Slot> = regions
        .iter()
        .enumerate()
        .map(|(i, r)| Slot {
            ordinal: (i + 1) as u8,
            rect: r.bounds,
        })
        .collect();

    debug!(width, height, slots = slots.len(), "located template slots");
    slots
}

/// 4-connected flood fill over the marker mask.
fn segment(mask: &[bool], width: usize, height: usize) -> Vec<Region> {
    let mut visited = vec![false; mask.len()];
    let mut regions = Vec::new();
    let mut queue = VecDeque::<usize>::new();

    for start in 0..mask.len() {
        if visited[start] || !mask[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let mut min_x = width;
        let mut min_y = height;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut area = 0u64;

        while let Some(idx) = queue.pop_front() {
            let x = idx % width;
            let y = idx / width;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            area += 1;

            let mut visit = |n: usize| {
                if !visited[n] && mask[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }

        regions.push(Region {
            bounds: Rect::new(
                min_x as u32,
                min_y as u32,
                (max_x + 1 - min_x) as u32,
                (max_y + 1 - min_y) as u32,
            ),
            area,
        });
    }

    regions
}

/// Regions whose bounding boxes intersect become one slot.
fn merge_overlapping(regions: &mut Vec<Region>) {
    'restart: loop {
        for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                if regions[i].bounds.overlaps(&regions[j].bounds) {
                    let other = regions.swap_remove(j);
                    regions[i].bounds = regions[i].bounds.union(&other.bounds);
                    regions[i].area += other.area;
                    continue 'restart;
                }
            }
        }
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPAQUE: Rgba<u8> = Rgba([40, 40, 40, 255]);
    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

    fn template_with_holes(w: u32, h: u32, holes: &[Rect]) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(w, h, OPAQUE);
        for r in holes {
            for y in r.y..r.bottom() {
                for x in r.x..r.right() {
                    img.put_pixel(x, y, CLEAR);
                }
            }
        }
        img
    }

    #[test]
    fn finds_slots_in_reading_order() {
        let holes = [
            Rect::new(60, 50, 30, 20),
            Rect::new(5, 5, 30, 20),
            Rect::new(5, 50, 30, 20),
            Rect::new(60, 5, 30, 20),
        ];
        let img = template_with_holes(100, 80, &holes);
        let slots = locate(&img, &SlotMarker::default(), 16);

        let rects: Vec<_> = slots.iter().map(|s| s.rect).collect();
        assert_eq!(
            rects,
            vec![holes[1], holes[3], holes[2], holes[0]]
        );
        let ordinals: Vec<_> = slots.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
    }

    #[test]
    fn discards_noise_below_min_area() {
        let holes = [Rect::new(2, 2, 2, 2), Rect::new(10, 10, 20, 20)];
        let img = template_with_holes(40, 40, &holes);
        let slots = locate(&img, &SlotMarker::default(), 16);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].rect, holes[1]);
    }

    #[test]
    fn opaque_template_has_no_slots() {
        let img = RgbaImage::from_pixel(20, 20, OPAQUE);
        assert!(locate(&img, &SlotMarker::default(), 1).is_empty());
    }

    #[test]
    fn overlapping_bounding_boxes_are_merged() {
        // An L-shaped region whose box contains a separate small square.
        let mut img = RgbaImage::from_pixel(30, 30, OPAQUE);
        for i in 0..20 {
            img.put_pixel(i, 0, CLEAR);
            img.put_pixel(0, i, CLEAR);
        }
        for y in 8..12 {
            for x in 8..12 {
                img.put_pixel(x, y, CLEAR);
            }
        }
        let slots = locate(&img, &SlotMarker::default(), 1);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].rect, Rect::new(0, 0, 20, 20));
    }

    #[test]
    fn more_than_four_regions_are_truncated() {
        let holes: Vec<_> = (0..6).map(|i| Rect::new(2 + i * 10, 2, 6, 6)).collect();
        let img = template_with_holes(70, 10, &holes);
        let slots = locate(&img, &SlotMarker::default(), 4);
        assert_eq!(slots.len(), MAX_SLOTS);
        assert_eq!(slots[3].rect, holes[3]);
    }

    #[test]
    fn colour_marker_with_tolerance() {
        let mut img = RgbaImage::from_pixel(20, 20, OPAQUE);
        for y in 4..10 {
            for x in 4..12 {
                img.put_pixel(x, y, Rgba([250, 2, 252, 255]));
            }
        }
        let marker = SlotMarker::Color { rgb: [255, 0, 255], tolerance: 5 };
        let slots = locate(&img, &marker, 1);
        assert_eq!(slots, vec![Slot { ordinal: 1, rect: Rect::new(4, 4, 8, 6) }]);

        let strict = SlotMarker::Color { rgb: [255, 0, 255], tolerance: 0 };
        assert!(locate(&img, &strict, 1).is_empty());
    }

    #[test]
    fn closure_predicate_is_accepted() {
        let img = template_with_holes(20, 20, &[Rect::new(3, 3, 5, 5)]);
        let slots = locate(&img, &|px: &Rgba<u8>| px[3] < 128, 1);
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let img = template_with_holes(50, 50, &[Rect::new(1, 1, 10, 10), Rect::new(20, 30, 15, 5)]);
        let settings = LocatorSettings::default();
        assert_eq!(settings.locate(&img), settings.locate(&img));
    }

    #[test]
    fn marker_deserializes_from_tagged_json() {
        let marker: SlotMarker =
            serde_json::from_str(r#"{"kind":"color","rgb":[0,255,0],"tolerance":8}"#).unwrap();
        assert_eq!(marker, SlotMarker::Color { rgb: [0, 255, 0], tolerance: 8 });

        let marker: SlotMarker = serde_json::from_str(r#"{"kind":"transparent","maxAlpha":10}"#).unwrap();
        assert_eq!(marker, SlotMarker::Transparent { max_alpha: 10 });
    }
}
