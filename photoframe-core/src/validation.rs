//! Share Policy - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! The render mode decides whether any of them blocks the request.

use serde::{Deserialize, Serialize};

use crate::fit::plan_fit;
use crate::slots::Slot;

pub const TEMPLATE_HAS_SLOTS: &str = "template_has_slots";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Partial photo sets render whatever is filled. Never blocks.
    #[default]
    Preview,
    /// Final output meant for sharing. Errors block.
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyReport {
    pub passed: bool,
    pub mode: RenderMode,
    pub violations: Vec<PolicyViolation>,
}

impl PolicyReport {
    pub fn has_errors(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error)
    }

    /// True when the report failed and `rule` raised one of the errors.
    pub fn blocked_by(&self, rule: &str) -> bool {
        !self.passed
            && self
                .violations
                .iter()
                .any(|v| v.rule == rule && v.severity == ViolationSeverity::Error)
    }

    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Decoded size of a supplied photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoDims {
    pub slot: u8,
    pub width: u32,
    pub height: u32,
}

/// What a request is about to render.
#[derive(Debug, Clone)]
pub struct RenderPlan<'a> {
    pub slots: &'a [Slot],
    pub photos: Vec<PhotoDims>,
}

impl RenderPlan<'_> {
    fn has_photo(&self, ordinal: u8) -> bool {
        self.photos.iter().any(|p| p.slot == ordinal)
    }
}

pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, plan: &RenderPlan<'_>, mode: RenderMode) -> Vec<PolicyViolation>;
}

// --- Concrete Rules ---

pub struct AllSlotsFilledRule;

impl PolicyRule for AllSlotsFilledRule {
    fn name(&self) -> &'static str {
        "all_slots_filled"
    }

    fn check(&self, plan: &RenderPlan<'_>, mode: RenderMode) -> Vec<PolicyViolation> {
        let missing: Vec<String> = plan
            .slots
            .iter()
            .filter(|s| !plan.has_photo(s.ordinal))
            .map(|s| s.ordinal.to_string())
            .collect();
        if missing.is_empty() {
            return vec![];
        }

        vec![PolicyViolation {
            rule: self.name().to_string(),
            severity: match mode {
                RenderMode::Share => ViolationSeverity::Error,
                RenderMode::Preview => ViolationSeverity::Info,
            },
            message: format!("slots without a photo: {}", missing.join(", ")),
            expected: Some(format!("{} photos", plan.slots.len())),
            actual: Some(format!("{} photos", plan.photos.len())),
        }]
    }
}

pub struct TemplateHasSlotsRule;

impl PolicyRule for TemplateHasSlotsRule {
    fn name(&self) -> &'static str {
        TEMPLATE_HAS_SLOTS
    }

    fn check(&self, plan: &RenderPlan<'_>, mode: RenderMode) -> Vec<PolicyViolation> {
        if !plan.slots.is_empty() {
            return vec![];
        }
        vec![PolicyViolation {
            rule: self.name().to_string(),
            severity: match mode {
                RenderMode::Share => ViolationSeverity::Error,
                RenderMode::Preview => ViolationSeverity::Warning,
            },
            message: "template has no photo slots".to_string(),
            expected: Some("at least 1 slot".to_string()),
            actual: Some("0 slots".to_string()),
        }]
    }
}

pub struct PhotoResolutionRule;

impl PolicyRule for PhotoResolutionRule {
    fn name(&self) -> &'static str {
        "photo_resolution"
    }

    fn check(&self, plan: &RenderPlan<'_>, _mode: RenderMode) -> Vec<PolicyViolation> {
        plan.photos
            .iter()
            .filter_map(|p| {
                let slot = plan.slots.iter().find(|s| s.ordinal == p.slot)?;
                let r = slot.rect;
                if !plan_fit(p.width, p.height, r.width, r.height)?.upscales() {
                    return None;
                }
                Some(PolicyViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Warning,
                    message: format!("photo for slot {} will be upscaled", p.slot),
                    expected: Some(format!("{}x{} minimum", r.width, r.height)),
                    actual: Some(format!("{}x{}", p.width, p.height)),
                })
            })
            .collect()
    }
}

/// Runs every rule and applies the mode's blocking policy.
pub struct SharePolicy {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl SharePolicy {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(TemplateHasSlotsRule),
                Box::new(AllSlotsFilledRule),
                Box::new(PhotoResolutionRule),
            ],
        }
    }

    pub fn evaluate(&self, plan: &RenderPlan<'_>, mode: RenderMode) -> PolicyReport {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(plan, mode))
            .collect();
        let mut report = PolicyReport {
            passed: true,
            mode,
            violations,
        };
        report.passed = mode == RenderMode::Preview || !report.has_errors();
        report
    }
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::Rect;

    fn slots() -> Vec<Slot> {
        (1..=4)
            .map(|i| Slot { ordinal: i, rect: Rect::new(17, 17 + 200 * (i as u32 - 1), 266, 178) })
            .collect()
    }

    fn photo(slot: u8) -> PhotoDims {
        PhotoDims { slot, width: 1200, height: 800 }
    }

    #[test]
    fn preview_with_partial_photos_passes() {
        let slots = slots();
        let plan = RenderPlan { slots: &slots, photos: vec![photo(1), photo(3)] };
        let report = SharePolicy::new().evaluate(&plan, RenderMode::Preview);
        assert!(report.passed);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].severity, ViolationSeverity::Info);
    }

    #[test]
    fn share_requires_every_slot() {
        let slots = slots();
        let plan = RenderPlan { slots: &slots, photos: vec![photo(1), photo(3)] };
        let report = SharePolicy::new().evaluate(&plan, RenderMode::Share);
        assert!(!report.passed);
        assert!(report.summary().contains("slots without a photo: 2, 4"));
    }

    #[test]
    fn share_with_all_slots_passes() {
        let slots = slots();
        let plan = RenderPlan { slots: &slots, photos: (1..=4).map(photo).collect() };
        let report = SharePolicy::new().evaluate(&plan, RenderMode::Share);
        assert!(report.passed);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn small_photo_warns_but_never_blocks() {
        let slots = slots();
        let mut photos: Vec<_> = (1..=4).map(photo).collect();
        photos[2] = PhotoDims { slot: 3, width: 100, height: 100 };
        let report = SharePolicy::new().evaluate(&RenderPlan { slots: &slots, photos }, RenderMode::Share);
        assert!(report.passed);
        assert_eq!(report.violations[0].rule, "photo_resolution");
        assert_eq!(report.violations[0].actual.as_deref(), Some("100x100"));
    }

    #[test]
    fn slotless_template_blocks_share_only() {
        let plan = RenderPlan { slots: &[], photos: vec![] };
        assert!(SharePolicy::new().evaluate(&plan, RenderMode::Preview).passed);
        let share = SharePolicy::new().evaluate(&plan, RenderMode::Share);
        assert!(!share.passed);
        assert!(share.blocked_by(TEMPLATE_HAS_SLOTS));
        assert!(!share.blocked_by("all_slots_filled"));
    }

    #[test]
    fn resolution_follows_crop_window() {
        let slots = slots();
        let wide = |slot, width, height| PhotoDims { slot, width, height };
        // 2000x178 crops to 266x178 exactly; 2000x170 has to be upscaled.
        let photos = vec![wide(1, 2000, 178), wide(2, 2000, 170), photo(3), photo(4)];
        let report = SharePolicy::new().evaluate(&RenderPlan { slots: &slots, photos }, RenderMode::Share);
        let flagged: Vec<_> = report.violations.iter().map(|v| v.message.as_str()).collect();
        assert_eq!(flagged, vec!["photo for slot 2 will be upscaled"]);
    }
}
