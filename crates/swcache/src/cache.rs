//! The region maintenance commands.

use anyhow::{Context, Result};
use swcache_service::caching::{CacheStorage, RegionName};
use swcache_service::config::Config;
use swcache_service::lifecycle::{Generation, load_registration};
use swcache_service::service::ServiceWorker;

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Entry function for the install command.
///
/// Precaches the configured generation and activates it. Without open client views, a new
/// generation never has to wait.
pub fn install(config: Config) -> Result<()> {
    runtime()?.block_on(async {
        let worker = ServiceWorker::from_config(&config)?;
        worker.restore().await?;

        let generation = Generation::from_config(config.worker.clone())?;
        let report = worker
            .update(generation)
            .await?
            .context("the new generation is still waiting")?;

        println!("activated generation {}", report.generation);
        for name in &report.purged {
            println!("purged {name}");
        }
        Ok(())
    })
}

/// Entry function for the cleanup command.
///
/// Deletes every region not named by the configured generation. If `dry_run` is `true`, the
/// regions are only listed.
pub fn cleanup(config: Config, dry_run: bool) -> Result<()> {
    runtime()?.block_on(async {
        let storage = CacheStorage::from_config(&config)?;
        storage.clear_tmp()?;

        let live = [&config.worker.static_region, &config.worker.runtime_region];
        let purged = storage.retain(&live, dry_run).await?;

        let verb = if dry_run { "would delete" } else { "deleted" };
        for name in &purged {
            println!("{verb} {name}");
        }
        tracing::info!(purged = purged.len(), dry_run, "Cleaned up storage regions");
        Ok(())
    })
}

/// One line of the regions listing.
#[derive(Debug, PartialEq, Eq)]
struct RegionSummary {
    name: String,
    entries: usize,
    live: bool,
}

/// Summarizes all regions in lookup order without creating or touching any of them.
///
/// Directories that are not valid region names are skipped.
async fn summarize_regions(
    storage: &CacheStorage,
    active: Option<&Generation>,
) -> Result<Vec<RegionSummary>> {
    let mut summaries = Vec::new();
    for name in storage.keys().await? {
        let region_name = match RegionName::new(name.clone()) {
            Ok(region_name) => region_name,
            Err(error) => {
                tracing::warn!(error = &error as &dyn std::error::Error, "Skipping region");
                continue;
            }
        };
        // deleted while listing
        let Some(region) = storage.get(&region_name).await? else {
            continue;
        };

        let live = active.is_some_and(|generation| {
            *generation.static_region() == region_name
                || *generation.runtime_region() == region_name
        });
        summaries.push(RegionSummary {
            name,
            entries: region.keys().await?.len(),
            live,
        });
    }
    Ok(summaries)
}

/// Entry function for the regions command.
///
/// Lists all regions in lookup order with their number of entries, marking those of the
/// active generation.
pub fn regions(config: Config) -> Result<()> {
    runtime()?.block_on(async {
        let storage = CacheStorage::from_config(&config)?;
        let active = load_registration(storage.root())
            .await
            .context("failed to read the active generation")?;

        match &active {
            Some(generation) => println!("active generation: {}", generation.id()),
            None => println!("active generation: none"),
        }
        for summary in summarize_regions(&storage, active.as_ref()).await? {
            let marker = if summary.live { "*" } else { " " };
            println!("{marker} {} ({} entries)", summary.name, summary.entries);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use swcache_service::config::WorkerConfig;
    use swcache_service::types::{Request, Response};
    use swcache_test as test;

    use super::*;

    #[tokio::test]
    async fn test_summarize_regions_is_read_only() {
        test::setup();
        let cache_dir = test::tempdir();
        let storage = CacheStorage::new(cache_dir.path()).unwrap();
        let generation = Generation::from_config(WorkerConfig::default()).unwrap();

        let runtime = storage.open(generation.runtime_region()).await.unwrap();
        let request = Request::get("http://localhost:3030/app.js".parse().unwrap());
        runtime.put(&request, &Response::ok("js")).await.unwrap();

        let regions = cache_dir.path().join("regions");
        fs::create_dir(regions.join("leftover-v0")).unwrap();
        fs::create_dir(regions.join("not a region")).unwrap();

        let summaries = summarize_regions(&storage, Some(&generation))
            .await
            .unwrap();
        assert_eq!(
            summaries,
            [
                RegionSummary {
                    name: "leftover-v0".into(),
                    entries: 0,
                    live: false,
                },
                RegionSummary {
                    name: "turnos-runtime-v1".into(),
                    entries: 1,
                    live: true,
                },
            ]
        );

        // listing neither adds markers nor changes the lookup order
        assert!(fs::metadata(regions.join("leftover-v0/.region")).is_err());
        assert!(fs::metadata(regions.join("not a region/.region")).is_err());
        assert_eq!(
            storage.keys().await.unwrap(),
            ["leftover-v0", "not a region", "turnos-runtime-v1"]
        );
    }
}
