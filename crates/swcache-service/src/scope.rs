//! The origin and URL rules a worker generation is scoped to.

use url::Url;

use crate::config::WorkerConfig;

/// Errors resolving a [`WorkerConfig`] into a [`Scope`].
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("core asset `{path}` is not a valid URL relative to the scope")]
    InvalidCoreAsset {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("core asset `{0}` is outside the worker's origin")]
    ForeignCoreAsset(Url),
}

/// The URL rules a worker generation applies to requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    url: Url,
    allowlist: Vec<String>,
    core_assets: Vec<Url>,
}

impl Scope {
    /// Creates a scope, resolving every core asset path against `url`.
    pub fn new(
        url: Url,
        allowlist: Vec<String>,
        core_assets: &[String],
    ) -> Result<Self, ScopeError> {
        let core_assets = core_assets
            .iter()
            .map(|path| {
                let asset = url.join(path).map_err(|source| ScopeError::InvalidCoreAsset {
                    path: path.clone(),
                    source,
                })?;
                if asset.origin() != url.origin() {
                    return Err(ScopeError::ForeignCoreAsset(asset));
                }
                Ok(asset)
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            url,
            allowlist,
            core_assets,
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, ScopeError> {
        Self::new(
            config.scope.clone(),
            config.allowlist.clone(),
            &config.core_assets,
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The absolute URLs of the core assets, in configuration order.
    pub fn core_assets(&self) -> &[Url] {
        &self.core_assets
    }

    /// Whether `url` has the same origin (scheme, host and port) as the worker.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.url.origin()
    }

    /// Whether `url` begins with one of the allowlisted prefixes.
    ///
    /// This is a plain string prefix test: `https://cdn.example.com` also admits
    /// `https://cdn.example.com.evil.test/`, so allowlist entries should end with `/` where that
    /// matters.
    pub fn is_allowlisted(&self, url: &Url) -> bool {
        self.allowlist
            .iter()
            .any(|prefix| url.as_str().starts_with(prefix.as_str()))
    }

    /// Whether `url` names one of the core assets.
    ///
    /// Both sides are absolute: configured paths such as `./icons/icon-192.png` were resolved
    /// against the scope URL, so this is an exact comparison of origin and path. Query and
    /// fragment are ignored, paths are compared case-sensitively, and no other normalization
    /// is applied (`/icons/icon-192.png/` is not a core asset).
    pub fn is_core_asset(&self, url: &Url) -> bool {
        self.is_same_origin(url)
            && self
                .core_assets
                .iter()
                .any(|asset| asset.path() == url.path())
    }
}
