//! Resource Fetcher
//!
//! Fetches one catalog entry with bounded retry, and falls back to
//! page-by-page collection when the controller refuses the full result.

use super::registry::ResourceDescriptor;
use super::scheduler::run_in_waves;
use crate::apic::{ApicClient, RawResponse};
use crate::archive::ArchiveSink;
use crate::config::RunConfig;
use crate::error::CollectError;
use serde_json::Value;
use std::future::Future;

/// Run `attempt` until it succeeds or the retry budget is spent.
///
/// The delay is fixed: a handful of retries against a single controller does
/// not need backoff.
async fn with_retry<F, Fut>(
    resource: &str,
    run: &RunConfig,
    retry_oversized: bool,
    mut attempt: F,
) -> Result<Vec<u8>, CollectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RawResponse, CollectError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let err = match attempt().await {
            Ok(res) => return Ok(res.body),
            Err(err) => err,
        };

        if err.is_oversized() && !retry_oversized {
            return Err(CollectError::Oversized {
                resource: resource.to_string(),
            });
        }

        if attempts > run.request_retry_count {
            return Err(CollectError::RetriesExhausted {
                resource: resource.to_string(),
                attempts,
                source: Box::new(err),
            });
        }

        tracing::warn!(
            resource,
            attempt = attempts,
            "request failed: {}. Retrying after {} seconds.",
            err,
            run.retry_delay.as_secs()
        );
        tokio::time::sleep(run.retry_delay).await;
    }
}

/// Fetch a whole class in one response.
///
/// An oversized result comes back as [`CollectError::Oversized`] straight
/// away; retrying it would only fail the same way.
pub async fn fetch_resource(
    client: &ApicClient,
    desc: &ResourceDescriptor,
    run: &RunConfig,
) -> Result<Vec<u8>, CollectError> {
    let query = desc.query_pairs();
    let (class, query) = (desc.class.as_str(), query.as_slice());
    with_retry(desc.alias(), run, false, move || client.get_class(class, query)).await
}

/// Fetch one page of a class. Every failure is retried.
pub async fn fetch_page(
    client: &ApicClient,
    desc: &ResourceDescriptor,
    run: &RunConfig,
    page: u64,
) -> Result<Vec<u8>, CollectError> {
    let mut query = desc.query_pairs();
    query.push(("page".to_string(), page.to_string()));
    query.push(("page-size".to_string(), run.page_size.to_string()));

    let resource = format!("{} page {}", desc.alias(), page);
    let (class, query) = (desc.class.as_str(), query.as_slice());
    with_retry(&resource, run, true, move || client.get_class(class, query)).await
}

/// Read `totalCount` from a class response. The APIC sends it as a string.
pub fn total_count(body: &[u8]) -> Result<u64, CollectError> {
    let value: Value = serde_json::from_slice(body)?;
    match value.get("totalCount") {
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| CollectError::Decode(format!("invalid totalCount {:?}", s))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| CollectError::Decode(format!("invalid totalCount {}", n))),
        _ => Err(CollectError::Decode("response has no totalCount".to_string())),
    }
}

/// Pages needed to cover `total` objects. Rounds up; page 0 always exists.
pub fn page_count(total: u64, page_size: u64) -> u64 {
    total.div_ceil(page_size.max(1)).max(1)
}

/// Collect a class page by page, writing each page as its own entry.
///
/// Page 0 doubles as the probe for `totalCount`. Remaining pages go out in
/// waves of `batch_size`; a failed page does not stop its siblings, and the
/// first failure is returned once every wave has finished.
pub async fn paginate(
    client: &ApicClient,
    desc: &ResourceDescriptor,
    run: &RunConfig,
    sink: &dyn ArchiveSink,
) -> Result<u64, CollectError> {
    let probe = fetch_page(client, desc, run, 0).await?;
    let total = total_count(&probe)?;
    let pages = page_count(total, run.page_size);

    tracing::info!(
        resource = desc.alias(),
        total,
        pages,
        page_size = run.page_size,
        "paginating"
    );
    sink.add(&desc.page_file_name(0), &probe)?;

    let remaining: Vec<u64> = (1..pages).collect();
    let results = run_in_waves(&remaining, run.batch_size, move |&page| async move {
        let body = fetch_page(client, desc, run, page).await?;
        sink.add(&desc.page_file_name(page), &body)?;
        tracing::debug!(resource = desc.alias(), page, "page complete");
        Ok::<(), CollectError>(())
    })
    .await;

    let mut first_error = None;
    for err in results.into_iter().filter_map(Result::err) {
        tracing::warn!(resource = desc.alias(), "page failed: {}", err);
        first_error.get_or_insert(err);
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(pages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_count_string_and_number() {
        assert_eq!(total_count(br#"{"totalCount":"25","imdata":[]}"#).unwrap(), 25);
        assert_eq!(total_count(br#"{"totalCount":7,"imdata":[]}"#).unwrap(), 7);
    }

    #[test]
    fn test_total_count_missing() {
        assert!(matches!(
            total_count(br#"{"imdata":[]}"#),
            Err(CollectError::Decode(_))
        ));
        assert!(total_count(br#"{"totalCount":"lots"}"#).is_err());
    }

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(30, 10), 3);
        assert_eq!(page_count(31, 10), 4);
        assert_eq!(page_count(1, 1000), 1);
    }

    #[test]
    fn test_page_count_never_zero() {
        assert_eq!(page_count(0, 10), 1);
        assert_eq!(page_count(5, 0), 5);
    }

    #[tokio::test]
    async fn test_with_retry_counts_attempts() {
        let run = RunConfig {
            request_retry_count: 2,
            retry_delay: std::time::Duration::ZERO,
            ..RunConfig::default()
        };
        let mut calls = 0;
        let err = with_retry("fvBD", &run, false, || {
            calls += 1;
            async {
                Err::<RawResponse, _>(CollectError::Decode("boom".to_string()))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 3);
        assert!(matches!(err, CollectError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_oversized() {
        let run = RunConfig {
            retry_delay: std::time::Duration::ZERO,
            ..RunConfig::default()
        };
        let mut calls = 0;
        let err = with_retry("bigClass", &run, false, || {
            calls += 1;
            async {
                Err::<RawResponse, _>(CollectError::Oversized {
                    resource: "/api/class/bigClass".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, CollectError::Oversized { resource } if resource == "bigClass"));
    }
}
