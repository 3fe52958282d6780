//! Input handling: upload validation and CLI input resolution.
//!
//! Documents never reach the pipeline as paths. Uploads arrive as bytes via
//! the API, and the CLI reads a local file or downloads a URL into memory;
//! either way the bytes are checked for the PDF magic (`%PDF`) before they
//! are stored, so a bad upload is rejected synchronously and never becomes
//! a pipeline failure.

use crate::error::UnderwriteError;
use std::path::Path;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Longest accepted upload filename, after sanitising.
const MAX_FILENAME_LEN: usize = 200;

/// A CLI input loaded into memory.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Validate and sanitise an upload filename.
///
/// Directory components are dropped, characters outside
/// `[A-Za-z0-9._-]` become `_`, and the result must end in `.pdf`
/// (any case).
pub fn validate_upload_filename(raw: &str) -> Result<String, UnderwriteError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UnderwriteError::MissingField("filename"));
    }

    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .trim();

    let mut safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.len() > MAX_FILENAME_LEN {
        safe = safe.split_off(safe.len() - MAX_FILENAME_LEN);
    }

    let is_pdf = Path::new(&safe)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    let has_stem = safe.len() > ".pdf".len();

    if !is_pdf || !has_stem {
        return Err(UnderwriteError::UnsupportedFileType {
            filename: raw.to_string(),
        });
    }
    Ok(safe)
}

/// Reject bytes that do not start with the PDF magic.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), UnderwriteError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    Err(UnderwriteError::NotAPdf {
        magic: bytes.iter().take(8).copied().collect(),
    })
}

/// Load the CLI input (local file or HTTP/HTTPS URL) into memory.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, UnderwriteError> {
    let resolved = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_pdf_magic(&resolved.bytes)?;
    Ok(resolved)
}

async fn read_local(path_str: &str) -> Result<ResolvedInput, UnderwriteError> {
    let path = Path::new(path_str);
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => UnderwriteError::InputNotFound {
            input: path_str.to_string(),
        },
        _ => UnderwriteError::Storage(format!("{}: {}", path.display(), e)),
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { filename, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, UnderwriteError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| UnderwriteError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            UnderwriteError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            UnderwriteError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(UnderwriteError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| UnderwriteError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(ResolvedInput {
        filename: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of the URL when it looks like a filename.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
