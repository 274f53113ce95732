//! Resource collection
//!
//! # Architecture
//!
//! - [`registry`] - The embedded catalog of classes to collect
//! - [`fetcher`] - Single-class fetch with retry, plus the pagination fallback
//! - [`scheduler`] - Wave-based driver that pushes the catalog through the fetcher
//!
//! # Example
//!
//! ```ignore
//! use aci_collector::resource::{collect_catalog, get_catalog};
//!
//! async fn collect(client: &ApicClient, sink: &dyn ArchiveSink) {
//!     let report = collect_catalog(client, get_catalog(), &RunConfig::default(), sink).await;
//!     println!("{} resources stored", report.succeeded());
//! }
//! ```

mod fetcher;
mod registry;
mod scheduler;

pub use fetcher::{fetch_page, fetch_resource, page_count, paginate, total_count};
pub use registry::*;
pub use scheduler::{
    collect_catalog, collect_resource, run_in_waves, BatchReport, Collected, ResourceFailure,
};
