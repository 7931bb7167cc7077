//! Library exports for the `imgrecon` binary and integration tests.
/// Application directory resolution.
pub mod app_dirs;
/// TOML configuration with defaults.
pub mod config;
/// Within-user dedup and cross-user collision resolution.
pub mod dedup;
/// Streaming SHA-1 with a per-run cache.
pub mod digest;
/// In-memory planning snapshot of the image store.
pub mod gallery;
pub(crate) mod http_client;
/// Tracing subscriber setup.
pub mod logging;
/// Content-addressable copies into the media store.
pub mod mirror;
/// Shared record types.
pub mod model;
/// Source normalization into image references.
pub mod normalize;
/// Command orchestration.
pub mod pipeline;
/// CSV audit reports.
pub mod report;
/// Token to uploads-file resolution.
pub mod resolve;
/// Contiguous positions and primary-image sync.
pub mod slots;
/// SQLite persistence.
pub mod store;
