use std::time::SystemTime;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::Response;

use super::{CacheError, RequestKey};

/// The JSON header line at the start of every entry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EntryHeader {
    method: String,
    url: String,
    status: u16,
    /// Header values are kept as raw bytes, they are not required to be UTF-8.
    headers: Vec<(String, Vec<u8>)>,
    time_created: SystemTime,
}

/// An immutable snapshot of a response, keyed by the request it answered.
///
/// On disk, an entry is a single line of JSON metadata followed by the raw body bytes.
/// The JSON serializer escapes newlines, so the first `\n` always ends the header.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    key: RequestKey,
    response: Response,
    time_created: SystemTime,
}

impl CachedEntry {
    /// Captures `response` for storage under `key`.
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            time_created: SystemTime::now(),
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn time_created(&self) -> SystemTime {
        self.time_created
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    pub(super) fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let headers = self
            .response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect();

        let header = EntryHeader {
            method: self.key.method().to_string(),
            url: self.key.url().to_owned(),
            status: self.response.status.as_u16(),
            headers,
            time_created: self.time_created,
        };

        let mut buf = serde_json::to_vec(&header)?;
        buf.push(b'\n');
        buf.extend_from_slice(&self.response.body);
        Ok(buf)
    }

    pub(super) fn decode(bytes: Bytes) -> Result<Self, CacheError> {
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CacheError::Malformed("missing entry header".into()))?;
        let header: EntryHeader = serde_json::from_slice(&bytes[..split])?;
        let key = decode_key(&header.method, &header.url)?;

        let status = StatusCode::from_u16(header.status)
            .map_err(|_| CacheError::Malformed(format!("invalid status {}", header.status)))?;

        let mut headers = HeaderMap::with_capacity(header.headers.len());
        for (name, value) in &header.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) else {
                return Err(CacheError::Malformed(format!("invalid header `{name}`")));
            };
            headers.append(name, value);
        }

        Ok(Self {
            key,
            response: Response::new(status, headers, bytes.slice(split + 1..)),
            time_created: header.time_created,
        })
    }

    /// Decodes only the key from the header line of an entry file.
    pub(super) fn decode_key(header_line: &[u8]) -> Result<RequestKey, CacheError> {
        let header: EntryHeader = serde_json::from_slice(header_line)?;
        decode_key(&header.method, &header.url)
    }
}

fn decode_key(method: &str, url: &str) -> Result<RequestKey, CacheError> {
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| CacheError::Malformed(format!("invalid method `{method}`")))?;
    let url = Url::parse(url).map_err(|e| CacheError::Malformed(e.to_string()))?;
    Ok(RequestKey::new(method, &url))
}
