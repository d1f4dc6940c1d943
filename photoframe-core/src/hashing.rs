//! Hashing - Fingerprints and Job Hashes
//!
//! Template fingerprints key the slot cache; job hashes identify a render
//! request in archive manifests.

use image::RgbaImage;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint of decoded template pixels (dimensions included).
pub fn template_fingerprint(img: &RgbaImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(img.width().to_be_bytes());
    hasher.update(img.height().to_be_bytes());
    hasher.update(img.as_raw());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys in lexicographic order at every depth,
/// whether or not serde_json's `preserve_order` feature is unified in.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut v = serde_json::to_value(value)?;
    v.sort_all_objects();
    serde_json::to_string(&v)
}

/// Identity of a render request: the template pixels, every output-affecting
/// parameter and the engine version, fed to one digest.
pub fn compute_job_hash(
    template_fingerprint: &str,
    params: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let params = canonical_json(params)?;
    let mut hasher = Sha256::new();
    for part in [template_fingerprint, params.as_str(), engine_version] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}
