//! The core of `swcache`: an offline-capable asset cache.
//!
//! Inbound requests are classified ([`classify`]), mapped to a caching strategy and executed by
//! the [`strategy::Dispatcher`] against the durable [`caching`] regions and the network.
//! Versioned storage regions are created, activated and pruned by the [`lifecycle`] of a
//! [`service::ServiceWorker`], which also notifies open [`clients`] over the [`control`] channel.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod classify;
pub mod clients;
pub mod config;
pub mod control;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod scope;
pub mod service;
pub mod strategy;
pub mod types;
