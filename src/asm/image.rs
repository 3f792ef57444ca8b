//! Raw program images.
//!
//! An image is nothing but the program bytes, loaded verbatim at a
//! caller-chosen `segment:offset`. There is no header.

use std::path::Path;
use thiserror::Error;

/// Load a raw image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, ImageError> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| ImageError::IoError(e.to_string()))?;

    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }

    tracing::debug!(path = %path.as_ref().display(), bytes = bytes.len(), "image loaded");
    Ok(bytes)
}

/// Write a raw image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), bytes)
        .map_err(|e| ImageError::IoError(e.to_string()))
}

/// Errors that can occur during image I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("program image is empty")]
    Empty,
}
