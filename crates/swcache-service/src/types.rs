//! Request and response types flowing between the classifier, the dispatcher, the storage
//! regions and the network.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

/// Body of the placeholder page served to navigations that can neither reach the network nor
/// be answered from a storage region.
pub const OFFLINE_PAGE: &str = "<h1>Sin conexión</h1><p>Vuelve a intentar.</p>";

/// Content type of [`OFFLINE_PAGE`].
pub const OFFLINE_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// How the requesting client view issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
    /// A full page navigation.
    Navigate,
    /// Any other request: scripts, styles, images, beacons, API calls.
    #[default]
    Subresource,
}

/// An intercepted outbound request of a client view.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub body: Bytes,
}

impl Request {
    /// Creates a plain `GET` subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            mode: RequestMode::Subresource,
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` navigation request, as issued by a client view loading a page.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Adds a header to this request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Whether any `Accept` header of this request mentions `text/html`.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .any(|value| String::from_utf8_lossy(value.as_bytes()).contains("text/html"))
    }
}

/// An HTTP-shaped response, either fetched from the network, read from a storage region or
/// synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A `200 OK` response with the given body and no headers.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body)
    }

    /// The placeholder page for navigations while offline.
    pub fn offline_page() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(OFFLINE_CONTENT_TYPE),
        );
        Self::new(StatusCode::OK, headers, OFFLINE_PAGE)
    }

    /// An empty `504 Gateway Timeout`, used when neither network nor cache can answer.
    pub fn gateway_timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, HeaderMap::new(), Bytes::new())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE)?.to_str().ok()
    }
}
