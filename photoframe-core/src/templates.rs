//! Template Catalog - Read-Only Registry
//!
//! Templates are decoded once, wrapped in `Arc` and shared by every request.
//! Located slots are cached per template fingerprint and locator settings.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::decode_template;
use crate::error::{CollaboratorError, EngineError, EngineResult};
use crate::hashing::template_fingerprint;
use crate::slots::{LocatorSettings, Slot};
use crate::ENGINE_VERSION;

const TEMPLATE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Optional `<stem>.json` sidecar next to a template image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub engine_min_version: Option<String>,
    #[serde(default)]
    pub locator: Option<LocatorSettings>,
}

#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    display_name: String,
    image: Arc<RgbaImage>,
    fingerprint: String,
    locator: Option<LocatorSettings>,
}

impl Template {
    pub fn from_image(name: impl Into<String>, image: RgbaImage) -> Self {
        let name = name.into();
        let fingerprint = template_fingerprint(&image);
        Self {
            display_name: name.clone(),
            name,
            image: Arc::new(image),
            fingerprint,
            locator: None,
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> EngineResult<Self> {
        Ok(Self::from_image(name, decode_template(bytes)?))
    }

    pub fn with_manifest(mut self, manifest: TemplateManifest) -> Self {
        if let Some(display_name) = manifest.display_name {
            self.display_name = display_name;
        }
        self.locator = manifest.locator;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Template-specific settings win over the engine defaults.
    pub fn locator_settings(&self, defaults: &LocatorSettings) -> LocatorSettings {
        self.locator.unwrap_or(*defaults)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub name: String,
    pub display_name: String,
    pub width: u32,
    pub height: u32,
    pub slot_count: usize,
}

type SlotCacheKey = (String, LocatorSettings);

/// Template registry - loads templates and caches their slots
pub struct TemplateCatalog {
    templates: HashMap<String, Arc<Template>>,
    slot_cache: RwLock<HashMap<SlotCacheKey, Arc<Vec<Slot>>>>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            slot_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register every template image in `dir`. Unreadable templates are skipped.
    pub fn load_from_dir(dir: &Path) -> Result<Self, CollaboratorError> {
        let mut catalog = Self::new();
        if !dir.exists() {
            warn!(dir = %dir.display(), "template directory does not exist");
            return Ok(catalog);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_template = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| TEMPLATE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !is_template {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };

            let manifest = match read_manifest(&path.with_extension("json")) {
                Ok(m) => m.unwrap_or_default(),
                Err(e) => {
                    warn!(template = %name, error = %e, "ignoring unreadable template manifest");
                    TemplateManifest::default()
                }
            };
            if !engine_supports(&manifest) {
                warn!(template = %name, required = ?manifest.engine_min_version, "template requires a newer engine, skipped");
                continue;
            }

            let bytes = fs::read(&path)?;
            match Template::from_bytes(name.clone(), &bytes) {
                Ok(t) => catalog.register(t.with_manifest(manifest)),
                Err(e) => warn!(template = %name, error = %e, "skipping undecodable template"),
            }
        }

        info!(count = catalog.templates.len(), dir = %dir.display(), "loaded template catalog");
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> EngineResult<Arc<Template>> {
        self.get(name)
            .ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))
    }

    pub fn register(&mut self, template: Template) {
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
    }

    /// Summaries sorted by name.
    pub fn list(&self, defaults: &LocatorSettings) -> Vec<TemplateSummary> {
        let mut out: Vec<_> = self
            .templates
            .values()
            .map(|t| TemplateSummary {
                name: t.name().to_string(),
                display_name: t.display_name().to_string(),
                width: t.width(),
                height: t.height(),
                slot_count: self.slots_for(t, &t.locator_settings(defaults)).len(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Slots of `template`, located once per fingerprint and settings.
    pub fn slots_for(&self, template: &Template, settings: &LocatorSettings) -> Arc<Vec<Slot>> {
        let key = (template.fingerprint().to_string(), *settings);
        if let Some(hit) = self
            .slot_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(hit);
        }

        let slots = Arc::new(settings.locate(template.image()));
        debug!(template = template.name(), slots = slots.len(), "caching located slots");
        self.slot_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| Arc::clone(&slots))
            .clone()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn read_manifest(path: &Path) -> Result<Option<TemplateManifest>, CollaboratorError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn engine_supports(manifest: &TemplateManifest) -> bool {
    let Some(min) = &manifest.engine_min_version else {
        return true;
    };
    match (
        semver::Version::parse(ENGINE_VERSION),
        semver::Version::parse(min),
    ) {
        (Ok(engine), Ok(min)) => engine >= min,
        _ => false,
    }
}
