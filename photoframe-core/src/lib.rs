//! Photo Frame Core - Template Slot Compositing Engine
//!
//! # Guarantees
//! 1. Slots are a pure function of template pixels
//! 2. Photos fill their slot exactly, never distorted
//! 3. Template art stays above the photos
//! 4. Templates are shared read-only, never mutated
//! 5. Output is complete or the request fails with a typed error

pub mod codec;
pub mod collaborators;
pub mod compose;
pub mod config;
pub mod error;
pub mod fit;
pub mod hashing;
pub mod pipeline;
pub mod sheet;
pub mod slots;
pub mod templates;
pub mod validation;

pub use codec::OutputFormat;
pub use collaborators::{Archive, GofileHost, LocalArchive, UploadHost};
pub use compose::{compose, Composite};
pub use config::EngineConfig;
pub use error::{CollaboratorError, EngineError, EngineResult, ErrorKind, ErrorReport};
pub use fit::{fit, plan_fit, FitTransform};
pub use pipeline::{
    CancelToken, CompositionPipeline, PhotoInput, RenderOutput, RenderReport, RenderRequest,
    TemplateSource, TilingRequest,
};
pub use sheet::{tile, SheetSpec};
pub use slots::{locate, LocatorSettings, Rect, Slot, SlotMarker, SlotPredicate};
pub use templates::{Template, TemplateCatalog, TemplateSummary};
pub use validation::{PolicyReport, RenderMode, SharePolicy};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
