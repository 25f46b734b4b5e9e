//! Shared JSON file persistence helpers.
//!
//! Every durable store in the crate (FSM task store, Project Registry, PR
//! store, Inbox Store) persists plain JSON files under a configured data
//! root (§6). This module centralizes the two policies every store needs:
//!
//! - **Atomic writes**: write to a sibling temp file, then rename, so a
//!   crash mid-write never leaves a half-written record (§4.5 durability).
//! - **Corruption isolation**: a record that fails to parse is logged and
//!   skipped rather than aborting the whole load (§7 persistence
//!   corruption policy) — callers get `Ok(None)` from [`read_json_lenient`]
//!   and decide whether "missing" and "corrupt" should be distinguished.

use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The record could not be parsed as the expected JSON shape.
    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An I/O failure occurred reading or writing the record.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Writes `value` to `path` as pretty JSON, atomically.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] if the temp file cannot be written,
/// flushed, or renamed into place.
pub async fn write_json_atomic<T: Serialize + Sync>(
    path: &Path,
    value: &T,
) -> Result<(), PersistenceError> {
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let body = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Corrupt {
        path: path.display().to_string(),
        source,
    })?;

    let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    {
        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
        file.write_all(&body).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
    }
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;

    Ok(())
}

/// Reads and parses a JSON record at `path`.
///
/// Returns `Ok(None)` if the file does not exist. A parse failure is
/// logged and also reported as `Ok(None)` so a single corrupt record never
/// blocks the caller from loading the rest of the store (§7); callers that
/// need to distinguish "missing" from "corrupt" should use
/// [`read_json_strict`] instead.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] for failures other than "file not
/// found".
pub async fn read_json_lenient<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistenceError> {
    match read_json_strict(path).await {
        Ok(value) => Ok(value),
        Err(PersistenceError::Corrupt { path, source }) => {
            warn!(%path, error = %source, "skipping corrupt persisted record");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Reads and parses a JSON record at `path`, surfacing corruption as an
/// error rather than silently skipping it.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] if the file exists but cannot be read,
/// or [`PersistenceError::Corrupt`] if its contents do not parse.
pub async fn read_json_strict<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let value = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
        path: path.display().to_string(),
        source,
    })?;

    Ok(Some(value))
}

/// Lists the files directly inside `dir` with the given extension,
/// returning an empty vec if the directory does not exist yet.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] for failures other than "directory not
/// found".
pub async fn list_files_with_extension(
    dir: &Path,
    extension: &str,
) -> Result<Vec<std::path::PathBuf>, PersistenceError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: dir.display().to_string(),
                source,
            });
        }
    };

    let mut paths = Vec::new();
    loop {
        let entry = entries.next_entry().await.map_err(|source| PersistenceError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let Some(entry) = entry else { break };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
