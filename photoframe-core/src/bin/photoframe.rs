//! Photo Frame CLI - bridge interface for the web frontend
//!
//! Commands: templates, slots, compose
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on engine errors, 1 on setup failures

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use base64::Engine as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use photoframe_core::{
    collaborators::GOFILE_BASE_URL, Archive, CompositionPipeline, EngineConfig, EngineError,
    GofileHost, LocalArchive, OutputFormat, RenderMode, RenderRequest, TemplateCatalog,
    TemplateSource, UploadHost,
};

#[derive(Parser)]
#[command(name = "photoframe")]
#[command(about = "Photo Frame CLI - composite photos into template slots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(long, default_value = "templates", global = true)]
    templates_dir: PathBuf,

    /// Engine config (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct TemplateArgs {
    /// Catalog template name
    #[arg(short, long, conflicts_with = "template_file", required_unless_present = "template_file")]
    template: Option<String>,

    /// Template image file, bypassing the catalog
    #[arg(long)]
    template_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Png,
    Jpeg,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Preview,
    Share,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Show the slots detected in a template
    Slots {
        #[command(flatten)]
        template: TemplateArgs,
    },

    /// Composite photos into a template
    Compose {
        #[command(flatten)]
        template: TemplateArgs,

        /// Photo for a slot, as SLOT=PATH (slot 1-4); repeatable
        #[arg(short, long = "photo", value_parser = parse_photo)]
        photos: Vec<(u8, PathBuf)>,

        #[arg(short, long, value_enum, default_value = "png")]
        format: FormatArg,

        /// JPEG quality (1-100); defaults to the engine config
        #[arg(short, long)]
        quality: Option<u8>,

        /// Tile this many copies side by side (1-5)
        #[arg(long)]
        copies: Option<u32>,

        /// Gap between tiled copies, in pixels
        #[arg(long, default_value_t = 0)]
        margin: u32,

        #[arg(short, long, value_enum, default_value = "preview")]
        mode: ModeArg,

        /// Write the image here instead of embedding it as base64
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Archive the result under this directory
        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// Archive grouping tag
        #[arg(long, requires = "archive_dir")]
        tag: Option<String>,

        /// Upload the result for sharing and print the link
        #[arg(long)]
        upload: bool,

        #[arg(long, default_value = GOFILE_BASE_URL)]
        upload_url: String,
    },
}

fn parse_photo(s: &str) -> Result<(u8, PathBuf), String> {
    let (slot, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=PATH, got '{s}'"))?;
    let slot: u8 = slot
        .trim()
        .parse()
        .map_err(|_| format!("invalid slot '{slot}'"))?;
    Ok((slot, PathBuf::from(path)))
}

fn init_logger(verbose: bool) {
    let default = if verbose {
        "photoframe_core=debug,photoframe=debug,info"
    } else {
        "photoframe_core=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

fn template_source(args: TemplateArgs) -> Result<TemplateSource, String> {
    match (args.template, args.template_file) {
        (Some(name), _) => Ok(TemplateSource::Named(name)),
        (None, Some(path)) => {
            let bytes = fs::read(&path).map_err(|e| format!("read {}: {e}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "uploaded".to_string());
            Ok(TemplateSource::Uploaded { name, bytes })
        }
        (None, None) => Err("a template is required".to_string()),
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

fn setup_failure(message: String) -> ExitCode {
    print_json(&json!({ "success": false, "error": { "kind": "setup", "message": message } }));
    ExitCode::FAILURE
}

fn engine_failure(err: &EngineError) -> ExitCode {
    error!(error = %err, "request failed");
    print_json(&json!({ "success": false, "error": err.report() }));
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => return setup_failure(format!("Failed to load config: {e}")),
        },
        None => EngineConfig::default(),
    };

    let catalog = match TemplateCatalog::load_from_dir(&cli.templates_dir) {
        Ok(c) => c,
        Err(e) => return setup_failure(format!("Failed to load templates: {e}")),
    };

    let pipeline = match CompositionPipeline::new(catalog, config) {
        Ok(p) => p,
        Err(e) => return engine_failure(&e),
    };

    match cli.command {
        Commands::Templates => {
            let templates = pipeline.catalog().list(&pipeline.config().locator);
            print_json(&json!({ "success": true, "templates": templates }));
            ExitCode::SUCCESS
        }

        Commands::Slots { template } => {
            let source = match template_source(template) {
                Ok(s) => s,
                Err(e) => return setup_failure(e),
            };
            match pipeline.locate_slots(&source) {
                Ok((template, settings, slots)) => {
                    print_json(&json!({
                        "success": true,
                        "template": template.name(),
                        "width": template.width(),
                        "height": template.height(),
                        "locator": settings,
                        "slots": *slots,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => engine_failure(&e),
            }
        }

        Commands::Compose {
            template,
            photos,
            format,
            quality,
            copies,
            margin,
            mode,
            out,
            archive_dir,
            tag,
            upload,
            upload_url,
        } => {
            let source = match template_source(template) {
                Ok(s) => s,
                Err(e) => return setup_failure(e),
            };

            let format = match format {
                FormatArg::Png => OutputFormat::Png,
                FormatArg::Jpeg => OutputFormat::Jpeg {
                    quality: quality.unwrap_or(pipeline.config().jpeg_quality),
                },
            };
            let mode = match mode {
                ModeArg::Preview => RenderMode::Preview,
                ModeArg::Share => RenderMode::Share,
            };

            let mut request = RenderRequest::new(source).format(format).mode(mode);
            if let Some(copies) = copies {
                request = request.tiling(copies, margin);
            }
            for (slot, path) in photos {
                match fs::read(&path) {
                    Ok(bytes) => request = request.photo(slot, bytes),
                    Err(e) => return setup_failure(format!("read {}: {e}", path.display())),
                }
            }

            let output = match pipeline.render(&request) {
                Ok(o) => o,
                Err(e) => return engine_failure(&e),
            };

            // From here on the render stands; collaborator failures are only reported.
            let mut collaborator_errors = vec![];

            let written = match &out {
                Some(path) => match fs::write(path, &output.bytes) {
                    Ok(()) => Some(path.display().to_string()),
                    Err(e) => {
                        collaborator_errors.push(format!("write {}: {e}", path.display()));
                        None
                    }
                },
                None => None,
            };

            let archived = archive_dir.and_then(|dir| {
                match LocalArchive::new(dir).store(&output, tag.as_deref()) {
                    Ok(path) => Some(path.display().to_string()),
                    Err(e) => {
                        collaborator_errors.push(format!("archive: {e}"));
                        None
                    }
                }
            });

            let share_url = if upload {
                let filename = format!("frame.{}", output.report.format.extension());
                let result = GofileHost::new(upload_url, Duration::from_secs(60)).and_then(|host| {
                    host.upload(&filename, output.report.format.mime_type(), output.bytes.clone())
                });
                match result {
                    Ok(url) => Some(url),
                    Err(e) => {
                        collaborator_errors.push(format!("upload: {e}"));
                        None
                    }
                }
            } else {
                None
            };

            let data_base64 = out
                .is_none()
                .then(|| base64::engine::general_purpose::STANDARD.encode(&output.bytes));

            print_json(&json!({
                "success": true,
                "report": output.report,
                "output": written,
                "archived": archived,
                "shareUrl": share_url,
                "dataBase64": data_base64,
                "collaboratorErrors": collaborator_errors,
            }));
            ExitCode::SUCCESS
        }
    }
}
