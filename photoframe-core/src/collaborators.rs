//! Post-render collaborators: local archive and transient upload host.
//!
//! These run only after the engine has produced output. Their failures are
//! reported to the caller but never touch the rendered bytes.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::CollaboratorError;
use crate::pipeline::RenderOutput;

/// Persists a finished render and returns where it went.
pub trait Archive {
    fn store(&self, output: &RenderOutput, tag: Option<&str>) -> Result<PathBuf, CollaboratorError>;
}

/// Publishes bytes for ephemeral sharing and returns a public URL.
pub trait UploadHost {
    fn upload(&self, filename: &str, mime: &str, bytes: Vec<u8>) -> Result<String, CollaboratorError>;
}

/// Flat-file archive: `<root>/<tag>/frame_<timestamp>_<id>.<ext>` plus a JSON report.
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Archive for LocalArchive {
    fn store(&self, output: &RenderOutput, tag: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        let dir = match tag.and_then(sanitize_tag) {
            Some(tag) => self.root.join(tag),
            None => self.root.clone(),
        };
        fs::create_dir_all(&dir)?;

        let report = &output.report;
        let short_id: String = report.id.chars().take(8).collect();
        let stem = format!(
            "frame_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            short_id
        );
        let path = dir.join(format!("{}.{}", stem, report.format.extension()));

        fs::write(&path, &output.bytes)?;
        fs::write(
            dir.join(format!("{stem}.json")),
            serde_json::to_string_pretty(report)?,
        )?;

        info!(path = %path.display(), "archived render");
        Ok(path)
    }
}

/// Reduce a caller tag to one safe path component.
fn sanitize_tag(tag: &str) -> Option<String> {
    let cleaned: String = tag
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

pub const GOFILE_BASE_URL: &str = "https://upload.gofile.io";

#[derive(Debug, Deserialize)]
struct GofileResponse {
    status: String,
    #[serde(default)]
    data: Option<GofileData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GofileData {
    download_page: Option<String>,
}

/// gofile.io anonymous upload.
pub struct GofileHost {
    client: Client,
    base_url: String,
}

impl GofileHost {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl UploadHost for GofileHost {
    fn upload(&self, filename: &str, mime: &str, bytes: Vec<u8>) -> Result<String, CollaboratorError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/uploadfile", self.base_url))
            .multipart(form)
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            warn!(%status, "upload host rejected file");
            return Err(CollaboratorError::Upload(format!("HTTP {status}: {body}")));
        }

        let parsed: GofileResponse = serde_json::from_str(&body)?;
        match parsed {
            GofileResponse {
                status,
                data: Some(GofileData { download_page: Some(link) }),
            } if status == "ok" => {
                info!(%link, "uploaded render");
                Ok(link)
            }
            _ => Err(CollaboratorError::Upload(format!("unexpected response: {body}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OutputFormat;
    use crate::pipeline::RenderReport;
    use crate::validation::{PolicyReport, RenderMode};
    use httpmock::prelude::*;
    use serde_json::json;

    fn output() -> RenderOutput {
        RenderOutput {
            report: RenderReport {
                id: "0123456789abcdef".to_string(),
                created_at: Utc::now(),
                engine_version: "1.0.0".to_string(),
                template_name: "card.png".to_string(),
                template_fingerprint: "fp".to_string(),
                slots: vec![],
                filled: vec![],
                format: OutputFormat::Png,
                copies: 1,
                margin: 0,
                width: 1,
                height: 1,
                job_hash: "job".to_string(),
                output_sha256: "sha".to_string(),
                policy: PolicyReport { passed: true, mode: RenderMode::Preview, violations: vec![] },
            },
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn sanitize_tag_keeps_single_component() {
        assert_eq!(sanitize_tag("wedding-2024"), Some("wedding-2024".to_string()));
        assert_eq!(sanitize_tag("../../etc"), Some("etc".to_string()));
        assert_eq!(sanitize_tag("a/b c"), Some("a_b_c".to_string()));
        assert_eq!(sanitize_tag("  "), None);
    }

    #[test]
    fn archive_writes_image_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LocalArchive::new(dir.path());
        let path = archive.store(&output(), Some("party")).unwrap();

        assert!(path.starts_with(dir.path().join("party")));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);

        let report = fs::read_to_string(path.with_extension("json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(value["templateName"], "card.png");
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_01234567.png"));
    }

    #[test]
    fn gofile_success_returns_download_page() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/uploadfile");
            then.status(200).json_body(json!({
                "status": "ok",
                "data": { "downloadPage": "https://gofile.io/d/abc123" }
            }));
        });

        let host = GofileHost::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let link = host.upload("frame.png", "image/png", vec![0u8; 16]).unwrap();
        mock.assert();
        assert_eq!(link, "https://gofile.io/d/abc123");
    }

    #[test]
    fn gofile_error_status_is_upload_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/uploadfile");
            then.status(200).json_body(json!({ "status": "error-rateLimit" }));
        });

        let host = GofileHost::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let err = host.upload("frame.png", "image/png", vec![1]).unwrap_err();
        assert!(matches!(err, CollaboratorError::Upload(_)));
    }

    #[test]
    fn gofile_http_failure_is_upload_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/uploadfile");
            then.status(503).body("busy");
        });

        let host = GofileHost::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let err = host.upload("frame.png", "image/png", vec![1]).unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
