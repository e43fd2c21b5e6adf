//! The client-facing half of ossfe.
//!
//! Terminates HTTP from clients, resolves the `Host` header against the shared
//! routing cache, signs and dispatches a GET to the backing object store, and
//! shapes the response (SPA fallback, custom error pages, cache headers). The
//! cache itself is fed by the watcher process through a loopback ingestion API
//! gated on a shared random key.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod apikey;
mod args;
mod cache_control;
mod handler;
mod ingest;
mod server;
mod telemetry;
mod upstream;

pub use self::args::Args;
