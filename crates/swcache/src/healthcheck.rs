use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use swcache_service::config::Config;

use crate::endpoints::StatusResponse;

fn get(client: &Client, url: String) -> reqwest::Result<String> {
    tracing::debug!("Sending request to: {url}");
    client.get(url).send()?.error_for_status()?.text()
}

/// Checks that the server bound to `addr` is up, and reports the generation it serves.
///
/// A server without an active generation is healthy: it passes every request through to the
/// network.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config.bind.parse().context("invalid bind address")?,
    };
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    if let Err(error) = get(&client, format!("http://{addr}/healthcheck")) {
        println!("ERROR");
        return Err(error).with_context(|| format!("swcache ({addr}) is unhealthy"));
    }

    let status = get(&client, format!("http://{addr}/_swcache/status"))
        .context("failed to query status")?;
    let status: StatusResponse =
        serde_json::from_str(&status).context("failed to parse status")?;
    match status.active {
        Some(active) => println!("OK (generation {})", active.id),
        None => println!("OK (no active generation)"),
    }
    Ok(())
}
