//! Input resolution: turn a user-supplied path or URL into a [`ScannedFile`].
//!
//! Uploads are sniffed by magic bytes, never by extension: PNG and JPEG are
//! used as their own preview, PDF is rasterised (page 1) when the `pdf`
//! feature is on. Anything else is rejected before it reaches the queue.

use crate::error::FieldScanError;
use crate::queue::{Preview, ScannedFile};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a local path or URL as a pending, unsynced file.
pub async fn load_file(
    input: &str,
    max_preview_pixels: u32,
    timeout_secs: u64,
) -> Result<ScannedFile, FieldScanError> {
    let (name, bytes) = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    Ok(scanned_file_from_bytes(name, bytes, max_preview_pixels)
        .await?
        .with_source(input))
}

/// Load several inputs in order, stopping at the first failure.
pub async fn load_files(
    inputs: &[String],
    max_preview_pixels: u32,
    timeout_secs: u64,
) -> Result<Vec<ScannedFile>, FieldScanError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        files.push(load_file(input, max_preview_pixels, timeout_secs).await?);
    }
    Ok(files)
}

/// Build a file from raw upload bytes.
pub async fn scanned_file_from_bytes(
    name: impl Into<String>,
    bytes: Vec<u8>,
    max_preview_pixels: u32,
) -> Result<ScannedFile, FieldScanError> {
    let name = name.into();
    let preview = preview_for(&name, bytes, max_preview_pixels).await?;
    debug!("Queued '{}' ({:?})", name, preview);
    Ok(ScannedFile::new(name, preview))
}

async fn preview_for(
    name: &str,
    bytes: Vec<u8>,
    max_preview_pixels: u32,
) -> Result<Preview, FieldScanError> {
    if bytes.starts_with(b"%PDF") {
        return pdf_preview(name, bytes, max_preview_pixels).await;
    }
    let magic = magic_of(&bytes);
    Preview::from_bytes(bytes).ok_or_else(|| FieldScanError::UnsupportedFormat {
        name: name.to_string(),
        magic,
    })
}

#[cfg(feature = "pdf")]
async fn pdf_preview(
    name: &str,
    bytes: Vec<u8>,
    max_preview_pixels: u32,
) -> Result<Preview, FieldScanError> {
    let png = super::render::render_first_page(name, bytes, max_preview_pixels).await?;
    Preview::from_bytes(png).ok_or_else(|| FieldScanError::PreviewFailed {
        name: name.to_string(),
        detail: "renderer produced no PNG".to_string(),
    })
}

#[cfg(not(feature = "pdf"))]
async fn pdf_preview(
    name: &str,
    bytes: Vec<u8>,
    _max_preview_pixels: u32,
) -> Result<Preview, FieldScanError> {
    Err(FieldScanError::UnsupportedFormat {
        name: name.to_string(),
        magic: magic_of(&bytes),
    })
}

fn magic_of(bytes: &[u8]) -> [u8; 4] {
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    magic
}

async fn read_local(path_str: &str) -> Result<(String, Vec<u8>), FieldScanError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => FieldScanError::PermissionDenied { path: path.clone() },
        _ => FieldScanError::FileNotFound { path: path.clone() },
    })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok((display_name(&path), bytes))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<(String, Vec<u8>), FieldScanError> {
    info!("Downloading: {}", url);
    let failed = |reason: String| FieldScanError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok((filename_from_url(url), bytes.to_vec()))
}

/// Last path segment of the URL, or a generic name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}
