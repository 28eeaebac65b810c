use std::io;

use reqwest::Method;
use thiserror::Error;

/// An error reading, enumerating or deleting storage regions.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The region name cannot be used as a directory name.
    #[error("invalid region name `{0}`")]
    InvalidName(String),
    /// An entry file exists but could not be parsed.
    ///
    /// Entries are written atomically, so this points to outside tampering or a disk problem.
    #[error("malformed cache entry: {0}")]
    Malformed(String),
    /// Any other file system error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// An error persisting a response into a storage region.
///
/// Outside of install, these are never surfaced: every write on the request path is
/// best-effort and its failure is logged and dropped at the call site.
#[derive(Debug, Error)]
pub enum CacheWriteError {
    /// Only `GET` requests can be used as keys.
    #[error("request method `{0}` is unsupported")]
    UnsupportedMethod(Method),
    /// `206 Partial Content` responses are never stored.
    #[error("partial responses cannot be cached")]
    PartialContent,
    /// The region was deleted, usually by the activation of a newer generation.
    #[error("region `{0}` no longer exists")]
    RegionGone(String),
    /// The region could not be opened.
    #[error("failed to open region")]
    Region(#[from] CacheError),
    /// The entry header could not be serialized.
    #[error("failed to serialize cache entry")]
    Serialize(#[from] serde_json::Error),
    /// Writing or moving the entry file failed.
    #[error("failed to write cache entry")]
    Io(#[from] io::Error),
}

/// Runs `f`, mapping a "not found" IO error to `Ok(None)`.
///
/// Entries and regions can disappear at any moment when a stale region is purged, so a
/// missing file is always treated as a cache miss.
pub(super) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    not_found_to_none(f())
}

pub(super) fn not_found_to_none<R>(result: io::Result<R>) -> io::Result<Option<R>> {
    match result {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
