//! # Storage regions
//!
//! All durable state of `swcache` lives in named *storage regions*: on-disk mappings from a
//! [`RequestKey`] (method + URL) to a [`CachedEntry`] (status, headers and body of a response).
//!
//! ## Regions and generations
//!
//! Region names are versioned identifiers, like `turnos-static-v1`. A generation of the worker
//! owns exactly two of them:
//!
//! - the *static* region, populated on install with the core assets, and
//! - the *runtime* region, filled lazily by the caching strategies.
//!
//! Bumping either name in the configuration is how a new generation marks the previous ones as
//! stale. On activation, every region that is not one of the two live names is deleted as a
//! whole, see [`CacheStorage::retain`]. Entries are never expired individually.
//!
//! ## File system layout
//!
//! ```text
//! <cache_dir>/
//!   tmp/                         entries being written
//!   regions/
//!     turnos-static-v1/
//!       .region                  marker with the creation time
//!       23/52bbad/77664e38...    one file per entry
//! ```
//!
//! An entry path is derived from the SHA-256 hash of its key, see
//! [`RequestKey::relative_path`]. Entry files consist of one line of JSON metadata followed
//! by the raw body. They are written to `tmp/` first and then atomically renamed into place,
//! so readers see either the previous or the new entry, never a torn one. Concurrent writes
//! for the same key are not coordinated: the last rename wins.
//!
//! ## [`CacheError`] / [`CacheWriteError`]
//!
//! Reading a region fails with a [`CacheError`], writing into one with a
//! [`CacheWriteError`]. On the request path, callers treat read failures as misses and drop
//! write failures after logging them. Only the install step of a generation lets a write
//! failure surface.

mod cache_error;
mod entry;
mod region;
mod request_key;
mod storage;

pub use cache_error::{CacheError, CacheWriteError};
pub use entry::CachedEntry;
pub use region::Region;
pub use request_key::RequestKey;
pub use storage::{CacheStorage, RegionName};
