//! Multi-fabric collection
//!
//! Runs the full pipeline (login, catalog waves, archive) once per fabric,
//! all fabrics concurrently, then optionally merges their archives.

use crate::apic::ApicClient;
use crate::archive::{merge_archives, ArchiveSink, MergeReport, ZipArchiveWriter};
use crate::config::FabricTarget;
use crate::error::{ArchiveError, CollectError};
use crate::resource::{collect_catalog, resolve_catalog, BatchReport, ResourceDescriptor};
use futures::future::join_all;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::Instrument;

/// Archive entry describing the run itself
pub const META_ENTRY: &str = "meta.json";

/// How a fabric's pipeline ended
#[derive(Debug)]
pub enum FabricStatus {
    /// Every resource was stored
    Complete,
    /// The archive was written but some resources are missing
    Partial { failed: usize, first_error: String },
    /// Nothing usable was produced (login failed, archive not writable, ...)
    Failed(CollectError),
}

/// Result of one fabric's pipeline
#[derive(Debug)]
pub struct FabricOutcome {
    pub name: String,
    pub output: PathBuf,
    pub status: FabricStatus,
    /// Resources stored; zero when the pipeline failed
    pub collected: usize,
}

impl FabricOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, FabricStatus::Complete)
    }

    /// True when an archive exists for this fabric
    pub fn has_output(&self) -> bool {
        !matches!(self.status, FabricStatus::Failed(_))
    }

    /// Error to surface to the operator, if any
    pub fn error_message(&self) -> Option<String> {
        match &self.status {
            FabricStatus::Complete => None,
            FabricStatus::Partial { first_error, .. } => Some(first_error.clone()),
            FabricStatus::Failed(err) => Some(err.to_string()),
        }
    }
}

/// First error across all fabrics, prefixed with the fabric name
pub fn first_error(outcomes: &[FabricOutcome]) -> Option<String> {
    outcomes
        .iter()
        .find_map(|o| o.error_message().map(|e| format!("{}: {}", o.name, e)))
}

/// Login, collect, write metadata, close. Any error here is fatal to the fabric.
async fn run_pipeline(
    target: &FabricTarget,
    catalog: &[ResourceDescriptor],
) -> Result<BatchReport, CollectError> {
    let client = ApicClient::new(&target.url, target.credentials.clone())?;
    client.authenticate().await?;

    // No archive is created for a fabric we cannot log in to
    let sink = ZipArchiveWriter::create(&target.output)?;
    let report = collect_catalog(&client, catalog, &target.run, &sink).await;

    // Close even if the metadata could not be written, so the archive stays readable
    let meta = write_metadata(&sink, target, &report);
    let closed = sink.close();
    meta?;
    closed?;

    Ok(report)
}

fn write_metadata(
    sink: &dyn ArchiveSink,
    target: &FabricTarget,
    report: &BatchReport,
) -> Result<(), ArchiveError> {
    let failed: Vec<&str> = report.failures.iter().map(|f| f.resource.as_str()).collect();
    let meta = json!({
        "collectorVersion": crate::VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "fabric": target.name,
        "resources": report.succeeded(),
        "failed": failed,
    });

    let content = serde_json::to_vec_pretty(&meta).map_err(std::io::Error::from)?;
    sink.add(META_ENTRY, &content)
}

/// Run one fabric's pipeline against the given catalog
pub async fn collect_fabric(target: &FabricTarget, catalog: &[ResourceDescriptor]) -> FabricOutcome {
    tracing::info!(url = %target.url, output = %target.output.display(), "starting collection");

    let (status, collected) = match run_pipeline(target, catalog).await {
        Ok(report) if report.is_complete() => {
            tracing::info!(resources = report.succeeded(), "collection complete");
            (FabricStatus::Complete, report.succeeded())
        }
        Ok(report) => {
            let first_error = report
                .first_error()
                .map(|f| f.error.to_string())
                .unwrap_or_default();
            tracing::warn!(
                resources = report.succeeded(),
                failed = report.failures.len(),
                "collection finished with errors"
            );
            (
                FabricStatus::Partial {
                    failed: report.failures.len(),
                    first_error,
                },
                report.succeeded(),
            )
        }
        Err(err) => {
            tracing::error!("collection failed: {}", err);
            (FabricStatus::Failed(err), 0)
        }
    };

    FabricOutcome {
        name: target.name.clone(),
        output: target.output.clone(),
        status,
        collected,
    }
}

/// Collect from every fabric concurrently. One fabric failing never stops
/// the others; outcomes come back in input order.
pub async fn collect_fabrics(targets: &[FabricTarget]) -> Vec<FabricOutcome> {
    let runs = targets.iter().map(|target| {
        let catalog = resolve_catalog(&target.class, &target.query);
        let span = tracing::info_span!("fabric", name = %target.name);
        async move { collect_fabric(target, &catalog).await }.instrument(span)
    });

    join_all(runs).await
}

/// Merge every fabric archive that exists into `dest`.
///
/// Fabrics whose archive is missing are logged and skipped.
pub fn aggregate(outcomes: &[FabricOutcome], dest: &Path) -> Result<MergeReport, ArchiveError> {
    let sources: Vec<PathBuf> = outcomes.iter().map(|o| o.output.clone()).collect();
    let report = merge_archives(&sources, dest)?;

    tracing::info!(
        entries = report.added,
        duplicates = report.skipped.len(),
        missing = report.missing.len(),
        output = %dest.display(),
        "aggregate archive written"
    );
    Ok(report)
}
