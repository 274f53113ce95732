//! Collect configuration and operational state from Cisco APIC fabrics into
//! zip archives for offline analysis.
//!
//! # Module Structure
//!
//! - [`apic`] - Authenticated session against one controller
//! - [`resource`] - Catalog, fetch-with-retry, pagination and wave scheduling
//! - [`archive`] - Zip output and multi-fabric aggregation
//! - [`collector`] - Per-fabric pipeline and multi-fabric orchestration
//! - [`config`] - YAML configuration and per-fabric resolution
//! - [`error`] - Error types

pub mod apic;
pub mod archive;
pub mod collector;
pub mod config;
pub mod error;
pub mod resource;

pub use error::{ArchiveError, CollectError};

/// Version injected at compile time via ACI_COLLECTOR_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("ACI_COLLECTOR_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
