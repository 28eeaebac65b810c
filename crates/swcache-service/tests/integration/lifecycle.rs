use reqwest::StatusCode;
use serde_json::json;
use swcache_service::caching::RegionName;
use swcache_service::config::{Config, WorkerConfig};
use swcache_service::control::ControlMessage;
use swcache_service::lifecycle::{Generation, PrecacheError};
use swcache_service::service::{LifecycleError, ServiceWorker};

use crate::{HitCounter, get, read_fixture, setup_service, url};

fn bumped(worker: &WorkerConfig, version: u32) -> WorkerConfig {
    WorkerConfig {
        static_region: RegionName::new(format!("turnos-static-v{version}")).unwrap(),
        runtime_region: RegionName::new(format!("turnos-runtime-v{version}")).unwrap(),
        ..worker.clone()
    }
}

#[tokio::test]
async fn test_install_fails_on_missing_core_asset() {
    let service = setup_service(|config| {
        config.worker.core_assets.push("./missing.js".into());
    });

    let generation = Generation::from_config(service.config.worker.clone()).unwrap();
    let error = service.worker.update(generation).await.unwrap_err();
    match error {
        LifecycleError::Precache(PrecacheError::Status { url: failed, status }) => {
            assert_eq!(failed, url("/missing.js"));
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        error => panic!("unexpected error: {error:?}"),
    }

    assert!(service.worker.active().is_none());
    assert!(service.worker.waiting().is_none());

    // Nothing was precached, not even the assets that could be fetched.
    let static_region = RegionName::new("turnos-static-v1").unwrap();
    let region = service.worker.storage().open(&static_region).await.unwrap();
    assert!(region.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_upgrade_keeps_serving() {
    let service = setup_service(|_| {});
    let v1 = service.activate().await;

    let mut v2 = bumped(&service.config.worker, 2);
    v2.core_assets.push("./missing.js".into());
    let generation = Generation::from_config(v2).unwrap();
    assert!(service.worker.update(generation).await.is_err());

    let active = service.worker.active().unwrap();
    assert_eq!(active.id(), v1.generation);

    let response = service.get("/manifest.webmanifest").await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_upgrade() {
    let service = setup_service(|_| {});
    let v1 = service.activate().await;

    let mut view = service.worker.open_client();
    assert_eq!(view.controller(), Some(v1.generation));
    assert_eq!(view.try_recv(), None);

    service.get("/app.css").await;
    assert_eq!(service.server.hits("/app.css"), 1);

    let generation = Generation::from_config(bumped(&service.config.worker, 2)).unwrap();
    let v2 = service.worker.update(generation).await.unwrap().unwrap();

    assert_eq!(v2.purged, ["turnos-static-v1", "turnos-runtime-v1"]);
    assert_eq!(v2.claimed, 1);
    assert_eq!((v2.notified, v2.failed), (1, 0));

    assert_eq!(view.controller(), Some(v2.generation));
    assert_eq!(view.try_recv(), Some(ControlMessage::SwActivated));
    assert_eq!(view.try_recv(), None);

    assert_eq!(
        service.worker.storage().keys().await.unwrap(),
        ["turnos-static-v2", "turnos-runtime-v2"]
    );

    // The runtime copy went away with its region.
    service.get("/app.css").await;
    assert_eq!(service.server.hits("/app.css"), 2);
}

#[tokio::test]
async fn test_waiting_generation_skips_waiting_on_message() {
    let service = setup_service(|config| {
        config.worker.skip_waiting_on_install = false;
    });
    let v1 = service.activate().await;
    let mut view = service.worker.open_client();

    let generation = Generation::from_config(bumped(&service.config.worker, 2)).unwrap();
    assert_eq!(service.worker.update(generation).await.unwrap(), None);

    let waiting = service.worker.waiting().unwrap();
    assert_eq!(service.worker.active().unwrap().id(), v1.generation);

    // Both generations' regions exist while the new one is waiting.
    assert_eq!(service.worker.storage().keys().await.unwrap().len(), 4);

    // Unrecognized messages do nothing.
    let report = service.worker.message(&json!({"type": "PING"})).await.unwrap();
    assert_eq!(report, None);

    let report = service
        .worker
        .message(&json!({"kind": "SKIP_WAITING"}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.generation, waiting.id());
    assert_eq!(view.try_recv(), Some(ControlMessage::SwActivated));
    assert_eq!(service.worker.storage().keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_from_config_file() {
    swcache_test::setup();
    let server = HitCounter::new();
    let cache_dir = swcache_test::tempdir();

    let config_path = cache_dir.path().join("config.yml");
    let yaml = format!(
        r#"
        cache_dir: {cache_dir}
        upstream: {upstream}
        fetch_timeout: 5s
        worker:
          scope: http://app.test/
          static_region: turnos-static-v7
          runtime_region: turnos-runtime-v7
        "#,
        cache_dir = cache_dir.path().join("data").display(),
        upstream = server.url("/"),
    );
    std::fs::write(&config_path, yaml).unwrap();

    let config = Config::get(Some(&config_path)).unwrap();
    let worker = ServiceWorker::from_config(&config).unwrap();
    let generation = Generation::from_config(config.worker.clone()).unwrap();
    worker.update(generation).await.unwrap().unwrap();

    assert_eq!(
        worker.storage().keys().await.unwrap(),
        ["turnos-static-v7", "turnos-runtime-v7"]
    );
    let response = get(&worker, "/manifest.webmanifest").await;
    assert_eq!(&response.body[..], &read_fixture("site/manifest.webmanifest")[..]);
    assert_eq!(server.hits("/manifest.webmanifest"), 1);
}
