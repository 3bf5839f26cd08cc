//! Control plane for k6 load-test sessions.
//!
//! The crate starts and supervises engine processes, folds their streaming
//! JSON output into per-session aggregates, and fans those aggregates out to
//! WebSocket subscribers. The `loadctl` binary wires these pieces behind a
//! small JSON control API; the library types are usable on their own.
pub mod args;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod report;
pub mod scripts;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod shutdown_handlers;

mod entry;
mod logger;

#[cfg(test)]
mod test_support;

pub use entry::run;
