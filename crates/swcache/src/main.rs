//! swcache.
//!
//! swcache is an offline-capable asset cache for a single web application. It sits between the
//! application's client views and the network, answers every request with one of four caching
//! strategies, and keeps the precached core assets in versioned storage regions so the
//! application keeps loading while the network is gone.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cache;
mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
