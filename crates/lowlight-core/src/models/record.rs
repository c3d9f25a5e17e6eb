use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An enhanced image the client is tracking.
///
/// Persisted as camelCase JSON, in upload order, under the owning user's
/// records key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementRecord {
    pub id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Where the source bytes live on this machine. Never exists server-side.
    pub original_ref: String,
    /// Absolute URL of the enhanced image; valid while the server keeps it.
    pub enhanced_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Successful response body of `POST /enhance`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnhanceResponse {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub original_filename: Option<String>,
    pub download_url: String,
    #[serde(default)]
    pub model_used: Option<String>,
}

/// An entry of `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementModel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A source image ready to be sent to the enhancement service.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub local_ref: Option<String>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
            local_ref: None,
        }
    }

    /// Read an image from disk, inferring the mime type from its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image file: {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mime_type = mime_from_extension(path).to_string();

        Ok(Self {
            file_name,
            mime_type,
            bytes,
            local_ref: Some(path.display().to_string()),
        })
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Map a file extension to its mime type. Unknown extensions are reported as
/// opaque binary so the image check rejects them.
fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
