use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use swcache_service::types::{self, RequestMode};
use url::Url;

use super::AppState;

/// Upper limit of request bodies handed to the worker.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Resolves the request target into an absolute URL.
///
/// Proxy-style absolute targets are taken as is; origin-form targets belong to the origin the
/// server stands in for.
fn request_url(origin: &Url, uri: &Uri) -> Option<Url> {
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string()).ok();
    }
    let path = uri.path_and_query().map_or("/", |path| path.as_str());
    origin.join(path).ok()
}

/// Whether the client view is loading a page, as told by `Sec-Fetch-Mode`.
fn request_mode(headers: &header::HeaderMap) -> RequestMode {
    match headers.get("sec-fetch-mode") {
        Some(mode) if mode.as_bytes().eq_ignore_ascii_case(b"navigate") => RequestMode::Navigate,
        _ => RequestMode::Subresource,
    }
}

/// Answers any request not addressed to the control endpoints through the worker.
pub async fn fetch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let Some(url) = request_url(&state.origin, &parts.uri) else {
        return (StatusCode::BAD_REQUEST, "invalid request target").into_response();
    };
    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let request = types::Request {
        method: parts.method,
        mode: request_mode(&parts.headers),
        headers: parts.headers,
        url,
        body,
    };
    into_response(state.worker.fetch(request).await)
}

fn into_response(response: types::Response) -> Response {
    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = response.status;
    *http.headers_mut() = response.headers;
    http
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_request_url() {
        let origin = Url::parse("http://app.test/").unwrap();

        let uri: Uri = "/icons/icon-192.png?v=2".parse().unwrap();
        assert_eq!(
            request_url(&origin, &uri).unwrap().as_str(),
            "http://app.test/icons/icon-192.png?v=2"
        );

        let uri: Uri = "https://cdn.tailwindcss.com/3.4.1".parse().unwrap();
        assert_eq!(
            request_url(&origin, &uri).unwrap().as_str(),
            "https://cdn.tailwindcss.com/3.4.1"
        );
    }

    #[test]
    fn test_request_mode() {
        let mut headers = header::HeaderMap::new();
        assert_eq!(request_mode(&headers), RequestMode::Subresource);

        headers.insert("sec-fetch-mode", HeaderValue::from_static("no-cors"));
        assert_eq!(request_mode(&headers), RequestMode::Subresource);

        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        assert_eq!(request_mode(&headers), RequestMode::Navigate);
    }
}
