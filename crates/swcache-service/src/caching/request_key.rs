use std::fmt::{self, Write};
use std::sync::Arc;

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::types::Request;

/// The key of a cached entry: the request method and its URL without fragment.
///
/// Two keys are equal iff their SHA-256 hashes are, and the hash also determines where the
/// entry lives inside its region directory.
#[derive(Debug, Clone, Eq)]
pub struct RequestKey {
    method: Method,
    url: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for RequestKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl RequestKey {
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        let url: Arc<str> = url.as_str().into();

        let digest = Sha256::digest(format!("{method} {url}").as_bytes());
        let mut hash = [0; 32];
        hash.copy_from_slice(&digest);

        Self { method, url, hash }
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(request.method.clone(), &request.url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the path of this entry relative to its region directory.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so:
    /// `aa/bbccdd/eeff...`
    pub fn relative_path(&self) -> String {
        let mut path = format!("{:02x}/", self.hash[0]);
        for b in &self.hash[1..4] {
            let _ = write!(path, "{b:02x}");
        }
        path.push('/');
        for b in &self.hash[4..] {
            let _ = write!(path, "{b:02x}");
        }
        path
    }
}
