use reqwest::StatusCode;
use reqwest::header::{self, HeaderValue};
use swcache_service::caching::RegionName;
use swcache_service::types::{OFFLINE_PAGE, Request};
use swcache_test as test;

use crate::{body, get, navigate, read_fixture, setup_service, url};

#[tokio::test]
async fn test_navigation_offline() {
    let service = setup_service(|_| {});
    service.activate().await;

    let response = service.navigate("/index.html").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], &read_fixture("site/index.html")[..]);
    service.worker.settle().await;

    let offline = service.offline().await;

    // The copy stored while online is served when the network is gone.
    let response = navigate(&offline, "/index.html").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], &read_fixture("site/index.html")[..]);

    // Pages never visited get the offline page instead.
    let response = navigate(&offline, "/turnos").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(body(&response), OFFLINE_PAGE);
}

#[tokio::test]
async fn test_html_accepting_request_is_network_first() {
    let service = setup_service(|_| {});
    service.activate().await;

    let request = Request::get(url("/index.html"))
        .with_header(header::ACCEPT, HeaderValue::from_static("text/html"));
    service.worker.fetch(request.clone()).await;
    service.worker.fetch(request).await;

    // Unlike cache-first assets, every load goes to the network.
    assert_eq!(service.server.hits("/index.html"), 2);
}

#[tokio::test]
async fn test_allowlisted_stale_while_revalidate() {
    let service = setup_service(|_| {});
    service.activate().await;

    // Nothing cached yet: the first request waits for the network.
    let response = service.get("/versioned/tailwind.js").await;
    assert_eq!(body(&response), "version 1");
    service.worker.settle().await;

    // From now on, the cached copy is served and refreshed in the background.
    let response = service.get("/versioned/tailwind.js").await;
    assert_eq!(body(&response), "version 1");
    service.worker.settle().await;

    let response = service.get("/versioned/tailwind.js").await;
    assert_eq!(body(&response), "version 2");
    service.worker.settle().await;

    assert_eq!(service.server.hits("/versioned/tailwind.js"), 3);

    let offline = service.offline().await;
    let response = get(&offline, "/versioned/tailwind.js").await;
    assert_eq!(body(&response), "version 3");
}

#[tokio::test]
async fn test_core_assets_served_offline() {
    let service = setup_service(|_| {});
    let report = service.activate().await;
    assert!(report.purged.is_empty());

    let offline = service.offline().await;

    for (path, fixture) in [
        ("/manifest.webmanifest", "site/manifest.webmanifest"),
        ("/icons/icon-192.png", "site/icons/icon-192.png"),
        ("/icons/icon-512.png", "site/icons/icon-512.png"),
    ] {
        let response = get(&offline, path).await;
        assert_eq!(response.status, StatusCode::OK, "{path}");
        assert_eq!(&response.body[..], &read_fixture(fixture)[..], "{path}");
    }

    // Never requested while online, so there is nothing to fall back to.
    let response = get(&offline, "/app.css").await;
    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_cache_first_write_through() {
    let service = setup_service(|_| {});
    service.activate().await;
    service.server.accesses();

    let first = service.get("/app.css").await;
    assert_eq!(&first.body[..], &read_fixture("site/app.css")[..]);
    let second = service.get("/app.css").await;
    assert_eq!(first, second);

    assert_eq!(service.server.hits("/app.css"), 1);

    // Runtime assets land in the runtime region, not next to the core assets.
    let runtime_region = RegionName::new("turnos-runtime-v1").unwrap();
    let runtime = service.worker.storage().open(&runtime_region).await.unwrap();
    let stored = runtime
        .match_request(&Request::get(url("/app.css")))
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), Some(&first));

    let static_region = RegionName::new("turnos-static-v1").unwrap();
    let precached = service.worker.storage().open(&static_region).await.unwrap();
    assert_eq!(precached.keys().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_error_status_is_served() {
    let service = setup_service(|_| {});
    service.activate().await;

    let response = service.get("/respond_statuscode/500/broken.js").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cross_origin_network_with_fallback() {
    let service = setup_service(|_| {});
    service.activate().await;

    // The test server is a different origin than the worker's scope.
    let request = Request::get(service.server.url("/app.css"));
    let response = service.worker.fetch(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], &read_fixture("site/app.css")[..]);

    let request = Request::get(test::unreachable_url().join("app.css").unwrap());
    let response = service.worker.fetch(request).await;
    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_passthrough_without_active_generation() {
    let service = setup_service(|_| {});

    let response = service.get("/app.css").await;
    assert_eq!(response.status, StatusCode::OK);
    service.worker.settle().await;

    assert!(service.worker.storage().keys().await.unwrap().is_empty());
}
