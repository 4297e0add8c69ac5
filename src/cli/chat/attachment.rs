use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;

/// Largest file accepted as an attachment.
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment is {size} bytes, the limit is {limit} bytes (5 MiB)")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A user-supplied file, encoded for inclusion in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    /// Base64 (standard alphabet, padded) of the file bytes.
    pub data: String,
    pub size: u64,
}

impl Attachment {
    /// Human-readable marker spliced into the draft question.
    pub fn marker(&self) -> String {
        format!("[Attached: {}]", self.filename)
    }
}

/// Resolve `~` and relative paths against the home and current directory.
pub fn sanitize_path(path: &str) -> PathBuf {
    let path = path.trim();

    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    let path_buf = Path::new(path);
    if path_buf.is_relative() {
        if let Ok(current_dir) = std::env::current_dir() {
            return current_dir.join(path_buf);
        }
    }

    path_buf.to_path_buf()
}

/// Read and encode the file at `path`.
///
/// The size is checked from metadata first so oversized files are never
/// loaded into memory.
pub async fn encode_file(path: &str) -> Result<Attachment, AttachmentError> {
    let path = sanitize_path(path);
    let io_err = |source: std::io::Error| AttachmentError::Io {
        path: path.clone(),
        source,
    };

    let metadata = tokio::fs::metadata(&path).await.map_err(io_err)?;
    if !metadata.is_file() {
        return Err(io_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    check_size(metadata.len())?;

    let bytes = tokio::fs::read(&path).await.map_err(io_err)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    encode_bytes(&filename, &bytes)
}

pub fn encode_bytes(filename: &str, bytes: &[u8]) -> Result<Attachment, AttachmentError> {
    let size = bytes.len() as u64;
    check_size(size)?;

    let mime_type = mime_guess::from_path(filename)
        .first_or_octet_stream()
        .to_string();
    debug!("Encoded attachment {} ({}, {} bytes)", filename, mime_type, size);

    Ok(Attachment {
        filename: filename.to_string(),
        mime_type,
        data: STANDARD.encode(bytes),
        size,
    })
}

fn check_size(size: u64) -> Result<(), AttachmentError> {
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentError::SizeLimitExceeded {
            size,
            limit: MAX_ATTACHMENT_BYTES,
        });
    }
    Ok(())
}
