use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::types::{Request, Response};

use super::cache_error::{catch_not_found, not_found_to_none};
use super::region::REGION_MARKER;
use super::{CacheError, Region};

/// The versioned name of a storage region, such as `turnos-static-v1`.
///
/// Region names double as directory names, so they are restricted to ASCII alphanumerics,
/// `.`, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionName(Arc<str>);

impl RegionName {
    pub fn new(name: impl Into<String>) -> Result<Self, CacheError> {
        let name = name.into();
        let valid_chars = name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if name.is_empty() || name == "." || name == ".." || !valid_chars {
            return Err(CacheError::InvalidName(name));
        }
        Ok(Self(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RegionName {
    type Error = CacheError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<RegionName> for String {
    fn from(name: RegionName) -> Self {
        name.0.as_ref().to_owned()
    }
}

impl AsRef<str> for RegionName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for RegionName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

/// Contents of the [`REGION_MARKER`] file.
#[derive(Debug, Serialize, Deserialize)]
struct RegionMarker {
    name: String,
    time_created: SystemTime,
}

#[derive(Debug)]
struct StoragePaths {
    root: PathBuf,
    regions: PathBuf,
    tmp: PathBuf,
}

/// The set of all storage regions below one cache directory.
///
/// Layout: `<root>/regions/<region name>/...` holds the entries, `<root>/tmp` holds entries
/// that are being written.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    paths: Arc<StoragePaths>,
}

impl CacheStorage {
    /// Opens the storage rooted at `root`, creating the directory layout if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let paths = StoragePaths {
            regions: root.join("regions"),
            tmp: root.join("tmp"),
            root,
        };
        std::fs::create_dir_all(&paths.regions)?;
        std::fs::create_dir_all(&paths.tmp)?;

        Ok(Self {
            paths: Arc::new(paths),
        })
    }

    pub fn from_config(config: &Config) -> io::Result<Self> {
        Self::new(&config.cache_dir)
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Clear the temporary files.
    ///
    /// We need to do this on startup to avoid accidentally leaving temporary files which
    /// survive a hard crash.
    pub fn clear_tmp(&self) -> io::Result<()> {
        let tmp = &self.paths.tmp;
        if tmp.exists() {
            std::fs::remove_dir_all(tmp)?;
        }
        std::fs::create_dir_all(tmp)
    }

    fn region_unchecked(&self, name: &str) -> Region {
        Region::new(
            name.to_owned(),
            self.paths.regions.join(name),
            self.paths.tmp.clone(),
        )
    }

    /// Opens the region called `name`, creating it if it does not exist yet.
    pub async fn open(&self, name: &RegionName) -> Result<Region, CacheError> {
        let region = self.region_unchecked(name.as_str());
        let marker_path = region.dir().join(REGION_MARKER);
        if tokio::fs::try_exists(&marker_path).await? {
            return Ok(region);
        }

        tokio::fs::create_dir_all(region.dir()).await?;
        let marker = RegionMarker {
            name: name.to_string(),
            time_created: SystemTime::now(),
        };
        tokio::fs::write(&marker_path, serde_json::to_vec(&marker)?).await?;
        tracing::debug!(region = %name, "Created storage region");

        Ok(region)
    }

    /// Returns the region called `name` if it exists, without creating anything.
    pub async fn get(&self, name: &RegionName) -> Result<Option<Region>, CacheError> {
        let region = self.region_unchecked(name.as_str());
        let exists = tokio::fs::try_exists(region.dir()).await?;
        Ok(exists.then_some(region))
    }

    /// Whether a region called `name` exists.
    pub async fn has(&self, name: &str) -> Result<bool, CacheError> {
        if RegionName::new(name).is_err() {
            return Ok(false);
        }
        let dir = self.paths.regions.join(name);
        Ok(tokio::fs::try_exists(dir).await?)
    }

    /// Deletes the region called `name` with all its entries, returning whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if RegionName::new(name).is_err() {
            return Ok(false);
        }
        let dir = self.paths.regions.join(name);
        let deleted = not_found_to_none(tokio::fs::remove_dir_all(&dir).await)?.is_some();
        if deleted {
            tracing::debug!(region = name, "Deleted storage region");
        }
        Ok(deleted)
    }

    /// Enumerates the names of all regions, in the order they were created.
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let regions = self.paths.regions.clone();
        tokio::task::spawn_blocking(move || list_regions(&regions))
            .await
            .map_err(io::Error::other)?
    }

    /// Looks `request` up in every region, in creation order, returning the first hit.
    ///
    /// A region that fails to answer is logged and skipped, so one broken entry never hides a
    /// good copy in another region.
    pub async fn match_any(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        for name in self.keys().await? {
            let region = self.region_unchecked(&name);
            match region.match_request(request).await {
                Ok(Some(response)) => return Ok(Some(response)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        region = %name,
                        url = %request.url,
                        error = &e as &dyn std::error::Error,
                        "Failed to read cache entry"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Deletes every region whose name is not in `live`, returning the deleted names.
    ///
    /// If `dry_run` is `true`, nothing is deleted, but the names that would be are returned.
    pub async fn retain(
        &self,
        live: &[&RegionName],
        dry_run: bool,
    ) -> Result<Vec<String>, CacheError> {
        let mut purged = Vec::new();
        for name in self.keys().await? {
            if live.iter().any(|live| **live == *name) {
                continue;
            }
            if dry_run || self.delete(&name).await? {
                purged.push(name);
            }
        }
        Ok(purged)
    }
}

fn list_regions(regions: &Path) -> Result<Vec<String>, CacheError> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(regions)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        // Regions that lost their marker (or never had one) sort first.
        let created = catch_not_found(|| std::fs::read(entry.path().join(REGION_MARKER)))?
            .and_then(|bytes| serde_json::from_slice::<RegionMarker>(&bytes).ok())
            .map(|marker| marker.time_created);
        found.push((created, name));
    }
    found.sort();
    Ok(found.into_iter().map(|(_, name)| name).collect())
}
