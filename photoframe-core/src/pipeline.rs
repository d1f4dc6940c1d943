//! Composition Pipeline - Single Entry Point
//!
//! locate -> fit (parallel) -> policy -> compose -> tile -> encode.
//! Deadline and cancellation are checked between stages and before each fit;
//! a request either returns complete output or a typed error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::codec::{decode_photo, encode, OutputFormat};
use crate::compose::compose;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fit::fit;
use crate::hashing::{compute_job_hash, sha256_hex};
use crate::sheet::{tile, SheetSpec};
use crate::slots::{LocatorSettings, Slot};
use crate::templates::{Template, TemplateCatalog};
use crate::validation::{
    PhotoDims, PolicyReport, RenderMode, RenderPlan, SharePolicy, TEMPLATE_HAS_SLOTS,
};
use crate::ENGINE_VERSION;

/// Where the template comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Catalog entry by name.
    Named(String),
    /// Template bytes supplied with the request.
    Uploaded { name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct PhotoInput {
    /// 1-based slot ordinal; photo i goes to slot i.
    pub slot: u8,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilingRequest {
    pub copy_count: u32,
    #[serde(default)]
    pub margin: u32,
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template: TemplateSource,
    pub photos: Vec<PhotoInput>,
    pub format: OutputFormat,
    pub tiling: Option<TilingRequest>,
    pub mode: RenderMode,
}

impl RenderRequest {
    pub fn new(template: TemplateSource) -> Self {
        Self {
            template,
            photos: vec![],
            format: OutputFormat::default(),
            tiling: None,
            mode: RenderMode::default(),
        }
    }

    pub fn photo(mut self, slot: u8, bytes: Vec<u8>) -> Self {
        self.photos.push(PhotoInput { slot, bytes });
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn tiling(mut self, copy_count: u32, margin: u32) -> Self {
        self.tiling = Some(TilingRequest { copy_count, margin });
        self
    }

    pub fn mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Everything about a finished render except the pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub template_name: String,
    pub template_fingerprint: String,
    pub slots: Vec<Slot>,
    pub filled: Vec<u8>,
    pub format: OutputFormat,
    pub copies: u32,
    pub margin: u32,
    pub width: u32,
    pub height: u32,
    pub job_hash: String,
    pub output_sha256: String,
    pub policy: PolicyReport,
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub report: RenderReport,
    pub bytes: Vec<u8>,
}

/// Cooperative cancellation flag, cheap to clone across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Checkpoint<'a> {
    cancel: &'a CancelToken,
    started: Instant,
    limit: Duration,
}

impl Checkpoint<'_> {
    fn check(&self, stage: &str) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            debug!(stage, "render cancelled");
            return Err(EngineError::Cancelled);
        }
        if self.started.elapsed() >= self.limit {
            debug!(stage, "render deadline exceeded");
            return Err(EngineError::Timeout(self.limit.as_millis() as u64));
        }
        Ok(())
    }
}

struct FittedPhoto {
    dims: PhotoDims,
    pixels: RgbaImage,
    sha256: String,
}

/// The composition pipeline - single entry point for all render operations
pub struct CompositionPipeline {
    catalog: TemplateCatalog,
    config: EngineConfig,
    policy: SharePolicy,
    pool: rayon::ThreadPool,
}

impl CompositionPipeline {
    pub fn new(catalog: TemplateCatalog, config: EngineConfig) -> EngineResult<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("photo-fit-{i}"));
        if config.fit_threads > 0 {
            builder = builder.num_threads(config.fit_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| EngineError::internal(format!("fit thread pool: {e}")))?;

        Ok(Self {
            catalog,
            config,
            policy: SharePolicy::new(),
            pool,
        })
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a template and its slots.
    pub fn locate_slots(
        &self,
        source: &TemplateSource,
    ) -> EngineResult<(Arc<Template>, LocatorSettings, Arc<Vec<Slot>>)> {
        match source {
            TemplateSource::Named(name) => {
                let template = self.catalog.require(name)?;
                let settings = template.locator_settings(&self.config.locator);
                let slots = self.catalog.slots_for(&template, &settings);
                Ok((template, settings, slots))
            }
            TemplateSource::Uploaded { name, bytes } => {
                let template = Arc::new(Template::from_bytes(name.clone(), bytes)?);
                let settings = self.config.locator;
                let slots = Arc::new(settings.locate(template.image()));
                Ok((template, settings, slots))
            }
        }
    }

    pub fn render(&self, request: &RenderRequest) -> EngineResult<RenderOutput> {
        self.render_with_cancel(request, &CancelToken::new())
    }

    #[instrument(skip_all, fields(photos = request.photos.len(), mode = ?request.mode))]
    pub fn render_with_cancel(
        &self,
        request: &RenderRequest,
        cancel: &CancelToken,
    ) -> EngineResult<RenderOutput> {
        let checkpoint = Checkpoint {
            cancel,
            started: Instant::now(),
            limit: self.config.timeout(),
        };

        // Tiling parameters are rejected before any pixel work.
        let sheet = request
            .tiling
            .map(|t| SheetSpec::new(t.copy_count, t.margin))
            .transpose()?;

        checkpoint.check("locate")?;
        let (template, settings, slots) = self.locate_slots(&request.template)?;
        check_assignments(&request.photos, &slots)?;

        checkpoint.check("fit")?;
        let fitted = self.fit_photos(&request.photos, &slots, &checkpoint)?;
        checkpoint.check("policy")?;

        let plan = RenderPlan {
            slots: &slots,
            photos: fitted.iter().map(|f| f.dims).collect(),
        };
        let policy = self.policy.evaluate(&plan, request.mode);
        if policy.blocked_by(TEMPLATE_HAS_SLOTS) {
            return Err(EngineError::invalid_template(format!(
                "{} has no photo slots",
                template.name()
            )));
        }
        if !policy.passed {
            return Err(EngineError::PolicyRejected(policy.summary()));
        }

        let photo_hashes: Vec<_> = fitted
            .iter()
            .map(|f| json!({ "slot": f.dims.slot, "sha256": f.sha256 }))
            .collect();
        let assignments: BTreeMap<u8, RgbaImage> = fitted
            .into_iter()
            .map(|f| (f.dims.slot, f.pixels))
            .collect();

        checkpoint.check("compose")?;
        let composite = compose(
            template.image(),
            &slots,
            &assignments,
            &settings.marker,
            self.config.background_rgba(),
        )?;

        checkpoint.check("tile")?;
        let raster = match &sheet {
            Some(spec) => tile(&composite.image, spec, self.config.sheet_fill_rgba())?,
            None => composite.image.clone(),
        };

        checkpoint.check("encode")?;
        let bytes = encode(&raster, request.format, self.config.dpi)?;

        let params = json!({
            "photos": photo_hashes,
            "format": request.format,
            "tiling": request.tiling,
            "mode": request.mode,
            "locator": settings,
            "background": self.config.background,
        });
        let job_hash = compute_job_hash(template.fingerprint(), &params, ENGINE_VERSION)
            .map_err(|e| EngineError::internal(format!("job hash: {e}")))?;

        let report = RenderReport {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            template_name: template.name().to_string(),
            template_fingerprint: template.fingerprint().to_string(),
            slots: slots.to_vec(),
            filled: composite.filled,
            format: request.format,
            copies: sheet.map_or(1, |s| s.copy_count()),
            margin: sheet.map_or(0, |s| s.margin()),
            width: raster.width(),
            height: raster.height(),
            job_hash,
            output_sha256: sha256_hex(&bytes),
            policy,
        };

        info!(
            template = %report.template_name,
            filled = ?report.filled,
            copies = report.copies,
            bytes = bytes.len(),
            elapsed_ms = checkpoint.started.elapsed().as_millis() as u64,
            "render complete"
        );

        Ok(RenderOutput { report, bytes })
    }

    fn fit_photos(
        &self,
        photos: &[PhotoInput],
        slots: &[Slot],
        checkpoint: &Checkpoint<'_>,
    ) -> EngineResult<Vec<FittedPhoto>> {
        self.pool.install(|| {
            photos
                .par_iter()
                .map(|photo| -> EngineResult<FittedPhoto> {
                    checkpoint.check("fit photo")?;
                    let slot = slots
                        .iter()
                        .find(|s| s.ordinal == photo.slot)
                        .ok_or(EngineError::SlotOutOfRange {
                            slot: photo.slot,
                            available: slots.len(),
                        })?;
                    let decoded = decode_photo(photo.slot, &photo.bytes)?;
                    let dims = PhotoDims {
                        slot: photo.slot,
                        width: decoded.width(),
                        height: decoded.height(),
                    };
                    let pixels = fit(&decoded, slot)?;
                    debug!(slot = photo.slot, width = dims.width, height = dims.height, "fitted photo");
                    Ok(FittedPhoto {
                        dims,
                        pixels,
                        sha256: sha256_hex(&photo.bytes),
                    })
                })
                .collect()
        })
    }
}

/// Every photo must target an existing slot, at most once.
fn check_assignments(photos: &[PhotoInput], slots: &[Slot]) -> EngineResult<()> {
    let mut seen = BTreeSet::new();
    for photo in photos {
        if !slots.iter().any(|s| s.ordinal == photo.slot) {
            return Err(EngineError::SlotOutOfRange {
                slot: photo.slot,
                available: slots.len(),
            });
        }
        if !seen.insert(photo.slot) {
            return Err(EngineError::invalid_photo(photo.slot, "more than one photo for this slot"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::png_bytes;
    use image::Rgba;

    fn pipeline() -> CompositionPipeline {
        let mut img = RgbaImage::from_pixel(40, 20, Rgba([10, 10, 10, 255]));
        for y in 2..18 {
            for x in (2..18).chain(22..38) {
                img.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let mut catalog = TemplateCatalog::new();
        catalog.register(Template::from_image("duo.png", img));
        CompositionPipeline::new(catalog, EngineConfig::default()).unwrap()
    }

    fn red_photo() -> Vec<u8> {
        png_bytes(&RgbaImage::from_pixel(30, 30, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let request = RenderRequest::new(TemplateSource::Named("duo.png".into()))
            .photo(1, red_photo())
            .photo(1, red_photo());
        let err = pipeline().render(&request).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPhoto { slot: 1, .. }));
    }

    #[test]
    fn cancelled_token_aborts() {
        let token = CancelToken::new();
        token.cancel();
        let request = RenderRequest::new(TemplateSource::Named("duo.png".into())).photo(1, red_photo());
        let err = pipeline().render_with_cancel(&request, &token).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn zero_timeout_times_out() {
        let config = EngineConfig { timeout_ms: 0, ..EngineConfig::default() };
        let p = CompositionPipeline::new(TemplateCatalog::new(), config).unwrap();
        let request = RenderRequest::new(TemplateSource::Uploaded {
            name: "up.png".into(),
            bytes: red_photo(),
        });
        match p.render(&request) {
            Err(EngineError::Timeout(0)) => {}
            other => panic!("expected timeout, got {:?}", other.map(|o| o.report)),
        }
    }

    #[test]
    fn report_describes_render() {
        let request = RenderRequest::new(TemplateSource::Named("duo.png".into()))
            .photo(2, red_photo())
            .tiling(2, 4);
        let out = pipeline().render(&request).unwrap();
        assert_eq!(out.report.filled, vec![2]);
        assert_eq!(out.report.copies, 2);
        assert_eq!((out.report.width, out.report.height), (84, 20));
        assert_eq!(out.report.output_sha256, sha256_hex(&out.bytes));
        assert!(out.report.policy.passed);
    }
}
