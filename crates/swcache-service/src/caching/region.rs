use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use reqwest::{Method, StatusCode};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::types::{Request, Response};

use super::cache_error::{catch_not_found, not_found_to_none};
use super::{CacheError, CacheWriteError, CachedEntry, RequestKey};

/// File name of the marker identifying a region directory.
pub(super) const REGION_MARKER: &str = ".region";

/// A handle to one named storage region.
///
/// Handles are cheap and hold no state besides paths: concurrent writers for the same key
/// race, and the last atomic rename wins.
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl Region {
    pub(super) fn new(name: String, dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self { name, dir, tmp_dir }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.dir.join(key.relative_path())
    }

    /// Stores `response` as the entry for `request`, replacing any previous entry.
    ///
    /// Fails with [`CacheWriteError::RegionGone`] once the region has been deleted, a late
    /// write never brings a purged region back.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheWriteError> {
        if request.method != Method::GET {
            return Err(CacheWriteError::UnsupportedMethod(request.method.clone()));
        }
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(CacheWriteError::PartialContent);
        }

        let key = RequestKey::from_request(request);
        let path = self.entry_path(&key);
        let contents = CachedEntry::new(key, response.clone()).encode()?;
        let tmp_dir = self.tmp_dir.clone();
        let dir = self.dir.clone();

        let written =
            tokio::task::spawn_blocking(move || write_atomically(&tmp_dir, &dir, &path, &contents))
                .await
                .map_err(io::Error::other)?;
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheWriteError::RegionGone(self.name.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::trace!(region = %self.name, url = %request.url, "Stored cache entry");
        metric!(histogram("caches.entry.size") = response.body.len() as u64);
        Ok(())
    }

    /// Looks up the entry stored for `request`.
    ///
    /// Only `GET` requests can ever match.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let entry = self.get(&RequestKey::from_request(request)).await?;
        Ok(entry.map(CachedEntry::into_response))
    }

    /// Reads the entry stored under `key`.
    pub async fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError> {
        let Some(bytes) = not_found_to_none(tokio::fs::read(self.entry_path(key)).await)? else {
            return Ok(None);
        };
        let entry = CachedEntry::decode(bytes.into())?;
        Ok((entry.key() == key).then_some(entry))
    }

    /// Deletes the entry stored for `request`, returning whether there was one.
    pub async fn delete(&self, request: &Request) -> Result<bool, CacheError> {
        let path = self.entry_path(&RequestKey::from_request(request));
        Ok(not_found_to_none(tokio::fs::remove_file(path).await)?.is_some())
    }

    /// Enumerates the keys of all entries in this region, in no particular order.
    pub async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || collect_keys(&dir))
            .await
            .map_err(io::Error::other)?
    }
}

/// Writes `contents` into a temporary file and moves it to `path` once complete.
///
/// Readers thus never observe a partially written entry. Fails with `NotFound` if
/// `region_dir` or its marker are missing.
fn write_atomically(
    tmp_dir: &Path,
    region_dir: &Path,
    path: &Path,
    contents: &[u8],
) -> io::Result<()> {
    std::fs::metadata(region_dir.join(REGION_MARKER))?;

    std::fs::create_dir_all(tmp_dir)?;
    let mut file = tempfile::Builder::new().prefix("entry").tempfile_in(tmp_dir)?;
    file.write_all(contents)?;
    file.as_file().sync_data()?;

    if let Some(parent) = path.parent() {
        create_dirs_below(region_dir, parent)?;
    }
    persist(file, path)
}

/// Creates `dir` and its missing ancestors, stopping at `base` which has to exist.
fn create_dirs_below(base: &Path, dir: &Path) -> io::Result<()> {
    let relative = dir
        .strip_prefix(base)
        .map_err(|_| io::Error::other("entry path outside of its region"))?;

    let mut current = base.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match std::fs::create_dir(&current) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            result => result?,
        }
    }
    Ok(())
}

fn persist(file: NamedTempFile, path: &Path) -> io::Result<()> {
    file.persist(path).map(drop).map_err(|e| e.error)
}

fn collect_keys(dir: &Path) -> Result<Vec<RequestKey>, CacheError> {
    let mut keys = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            // the region was deleted while we were walking it
            Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                continue;
            }
            Err(e) => return Err(io::Error::from(e).into()),
        };
        if !entry.file_type().is_file() || entry.file_name() == REGION_MARKER {
            continue;
        }

        let Some(header_line) = catch_not_found(|| read_header_line(entry.path()))? else {
            continue;
        };
        match CachedEntry::decode_key(&header_line) {
            Ok(key) => keys.push(key),
            Err(e) => {
                tracing::warn!(
                    path = %entry.path().display(),
                    error = &e as &dyn std::error::Error,
                    "Skipping malformed cache entry"
                );
            }
        }
    }
    Ok(keys)
}

fn read_header_line(path: &Path) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    BufReader::new(File::open(path)?).read_until(b'\n', &mut line)?;
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(line)
}
