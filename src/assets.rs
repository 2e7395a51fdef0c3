//! Asset destination paths and persistence.
//!
//! An asset's path is derived only from `(category, image_number,
//! resolution)`, so a file already present at that path is proof that the
//! asset was downloaded before. Writes go through a `.part` sibling and a
//! rename, so that path only ever holds complete files.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Extension given to every persisted asset.
pub const ASSET_EXTENSION: &str = "jpg";

/// Errors writing an asset to disk.
#[derive(Debug, Error)]
pub enum AssetError {
    /// File system error while creating directories or writing the file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Returns `root/category/image_number/resolution.jpg`.
#[must_use]
pub fn asset_path(root: &Path, category: &str, image_number: &str, resolution: &str) -> PathBuf {
    root.join(category)
        .join(image_number)
        .join(format!("{resolution}.{ASSET_EXTENSION}"))
}

/// Suffix appended to an asset's file name while it is being written.
pub const PARTIAL_SUFFIX: &str = "part";

/// Returns true if a finished asset exists at `path`.
pub async fn asset_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

/// Returns the sibling path an asset is written to before it is renamed
/// into place, e.g. `800x600.jpg.part`.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// Writes `bytes` to `path`, creating parent directories first.
///
/// The bytes go to [`partial_path`] first, are synced, and the file is then
/// renamed onto `path`. A write that fails or is cancelled never leaves a
/// file at `path`.
///
/// # Errors
///
/// Returns [`AssetError::Io`] if a directory or the file cannot be written.
pub async fn write_asset(path: &Path, bytes: &[u8]) -> Result<(), AssetError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AssetError::io(parent, e))?;
    }

    let partial = partial_path(path);
    if let Err(e) = write_partial(&partial, bytes).await {
        discard_partial(&partial).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        discard_partial(&partial).await;
        return Err(AssetError::io(path, e));
    }

    debug!(path = %path.display(), bytes = bytes.len(), "asset written");
    info!(path = %path.display(), "downloaded");
    Ok(())
}

async fn write_partial(partial: &Path, bytes: &[u8]) -> Result<(), AssetError> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| AssetError::io(partial, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| AssetError::io(partial, e))?;
    file.flush().await.map_err(|e| AssetError::io(partial, e))?;
    file.sync_all()
        .await
        .map_err(|e| AssetError::io(partial, e))
}

async fn discard_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(path = %partial.display(), error = %e, "failed to remove partial asset");
        }
        _ => {}
    }
}
