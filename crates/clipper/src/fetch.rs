//! Segment Fetch Pipeline: concurrent download with indexed write-back.
//!
//! Every segment gets its own task; a semaphore caps how many are on the wire.
//! The aggregator below is the only place results land, so ordering comes from
//! the slot index and the first failure is picked deterministically.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::FetchConfig;
use crate::error::ClipError;
use crate::http::HttpFetcher;
use crate::playlist::SegmentRef;

pub struct SegmentFetchPipeline {
    fetcher: Arc<dyn HttpFetcher>,
    max_concurrent: usize,
}

impl SegmentFetchPipeline {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: &FetchConfig) -> Self {
        Self {
            fetcher,
            max_concurrent: config.max_concurrent,
        }
    }

    /// Download every segment and return the payloads in `segments` order.
    ///
    /// The first failure cancels the siblings that have not finished yet and
    /// is returned as [`ClipError::SegmentFetch`]. Cancelling `token` aborts
    /// the whole batch with [`ClipError::Cancelled`].
    pub async fn fetch_all(
        &self,
        segments: &[SegmentRef],
        token: &CancellationToken,
    ) -> Result<Vec<Bytes>, ClipError> {
        let started = Instant::now();
        let abort = token.child_token();
        let limit = if self.max_concurrent == 0 {
            segments.len().max(1)
        } else {
            self.max_concurrent
        };
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut tasks = JoinSet::new();
        for (slot, segment) in segments.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let abort = abort.clone();
            let segment = segment.clone();

            tasks.spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = abort.cancelled() => Err(ClipError::Cancelled),
                    result = fetch_segment(fetcher.as_ref(), &semaphore, &segment) => result,
                };
                (slot, segment.index, result)
            });
        }

        let mut slots: Vec<Option<Bytes>> = vec![None; segments.len()];
        let mut first_error: Option<ClipError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (slot, index, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    if first_error.is_none() {
                        abort.cancel();
                        first_error = Some(ClipError::Internal {
                            reason: format!("segment task failed: {e}"),
                        });
                    }
                    continue;
                }
            };

            match result {
                Ok(body) => {
                    if first_error.is_none() {
                        trace!(index, bytes = body.len(), "Segment downloaded");
                        slots[slot] = Some(body);
                    }
                }
                Err(ClipError::Cancelled) if first_error.is_some() => {}
                Err(e) => {
                    if first_error.is_none() {
                        warn!(index, error = %e, "Segment fetch failed, abandoning clip");
                        abort.cancel();
                        first_error = Some(match e {
                            ClipError::Cancelled => e,
                            e => ClipError::SegmentFetch {
                                index,
                                source: Box::new(e),
                            },
                        });
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let payloads = slots
            .into_iter()
            .enumerate()
            .map(|(slot, body)| {
                body.ok_or_else(|| ClipError::Internal {
                    reason: format!("segment slot {slot} was never filled"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            segments = payloads.len(),
            bytes = payloads.iter().map(Bytes::len).sum::<usize>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched all segments"
        );
        Ok(payloads)
    }
}

async fn fetch_segment(
    fetcher: &dyn HttpFetcher,
    semaphore: &Semaphore,
    segment: &SegmentRef,
) -> Result<Bytes, ClipError> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| ClipError::Cancelled)?;
    let response = fetcher.get(&segment.uri).await?;
    if !response.is_success() {
        return Err(ClipError::upstream_status(
            response.status,
            segment.uri.as_str(),
            "segment fetch",
        ));
    }
    Ok(response.body)
}
