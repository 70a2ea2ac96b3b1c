//! Merge queue processor.
//!
//! One pass looks at every integration target independently: pick the best
//! ready merge request, claim it with a guarded status update, run the
//! attempt through the adapter, then finalize. Losing any compare-and-set
//! along the way is not an error; another actor simply got there first and
//! the next pass will see the result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterError, SourceControlAdapter};
use crate::error::Result;
use crate::request::MergeRequest;
use crate::ticket::{CloseOutcome, RawStatus, StoreError, TicketPatch, TicketQuery, TicketStore};

/// What happened to one claimed merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Synced, submitted and closed as merged.
    Merged,
    /// The attempt failed and the detail was recorded on the ticket.
    Failed { detail: String },
    /// Another actor won a compare-and-set first; their outcome stands.
    Lost,
}

/// Counters for one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Targets with at least one current merge request.
    pub targets: usize,
    pub claimed: usize,
    pub merged: usize,
    pub failed: usize,
    /// Targets passed over: already busy, lost races, or errored.
    pub skipped: usize,
}

enum TargetOutcome {
    /// Nothing ready on this target.
    Idle,
    /// An in-progress merge request already holds the target.
    Busy,
    Attempted(AttemptOutcome),
}

/// Drives merge attempts across all targets.
pub struct MergeQueueProcessor {
    store: Arc<dyn TicketStore>,
    adapter: Arc<dyn SourceControlAdapter>,
}

impl MergeQueueProcessor {
    pub fn new(store: Arc<dyn TicketStore>, adapter: Arc<dyn SourceControlAdapter>) -> Self {
        Self { store, adapter }
    }

    /// One pass: at most one claim per target, targets handled
    /// concurrently.
    ///
    /// # Errors
    ///
    /// Returns an error only when the queue snapshot itself cannot be
    /// read. Failures on individual targets are logged, recorded on the
    /// ticket where applicable, and counted as skips.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let tickets = self.store.list(&TicketQuery::merge_requests()).await?;

        let mut by_target: BTreeMap<String, Vec<MergeRequest>> = BTreeMap::new();
        for ticket in &tickets {
            let blockers = self.store.blockers(&ticket.id).await?;
            if let Some(mr) = MergeRequest::from_ticket(ticket, &blockers) {
                by_target.entry(mr.target.clone()).or_default().push(mr);
            }
        }

        let mut summary = PassSummary {
            targets: by_target.len(),
            ..PassSummary::default()
        };

        let attempts = by_target.into_iter().map(|(target, mrs)| {
            let store = Arc::clone(&self.store);
            let adapter = Arc::clone(&self.adapter);
            async move {
                let outcome = process_target(&store, &adapter, &mrs).await;
                (target, outcome)
            }
        });

        for (target, outcome) in join_all(attempts).await {
            match outcome {
                Ok(TargetOutcome::Idle) => {}
                Ok(TargetOutcome::Busy) => {
                    debug!(target, "target busy, skipping");
                    summary.skipped += 1;
                }
                Ok(TargetOutcome::Attempted(AttemptOutcome::Merged)) => {
                    summary.claimed += 1;
                    summary.merged += 1;
                }
                Ok(TargetOutcome::Attempted(AttemptOutcome::Failed { .. })) => {
                    summary.claimed += 1;
                    summary.failed += 1;
                }
                Ok(TargetOutcome::Attempted(AttemptOutcome::Lost)) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!(target, error = %e, "target pass failed");
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Run passes until ctrl-c.
    ///
    /// # Errors
    ///
    /// Currently infallible at the loop level; pass failures are logged
    /// and the loop keeps going.
    pub async fn run(&self, interval: Duration) -> Result<()> {
        info!(interval_secs = interval.as_secs(), "merge queue processor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_pass().await {
                        Ok(summary) if summary.claimed > 0 => {
                            info!(
                                merged = summary.merged,
                                failed = summary.failed,
                                skipped = summary.skipped,
                                "pass complete"
                            );
                        }
                        Ok(summary) => {
                            debug!(targets = summary.targets, skipped = summary.skipped, "pass complete");
                        }
                        Err(e) => error!(error = %e, "pass failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn process_target(
    store: &Arc<dyn TicketStore>,
    adapter: &Arc<dyn SourceControlAdapter>,
    mrs: &[MergeRequest],
) -> Result<TargetOutcome> {
    if mrs.iter().any(|mr| mr.raw_status == RawStatus::InProgress) {
        return Ok(TargetOutcome::Busy);
    }
    let next = mrs
        .iter()
        .filter(|mr| mr.is_ready())
        .min_by(|a, b| a.queue_cmp(b));
    let Some(next) = next else {
        return Ok(TargetOutcome::Idle);
    };
    let outcome = claim_and_attempt(store, adapter, next).await?;
    Ok(TargetOutcome::Attempted(outcome))
}

/// Claim a ready merge request, run the attempt, finalize.
///
/// Shared by the processor pass and the manager's immediate retry, so both
/// paths claim and finalize with exactly the same guards.
pub(crate) async fn claim_and_attempt(
    store: &Arc<dyn TicketStore>,
    adapter: &Arc<dyn SourceControlAdapter>,
    mr: &MergeRequest,
) -> Result<AttemptOutcome> {
    let claim = store
        .update(
            &mr.id,
            TicketPatch::new().with_status(RawStatus::InProgress),
            Some(RawStatus::Open),
        )
        .await;
    match claim {
        Ok(_) => {}
        Err(StoreError::Conflict(_)) => {
            debug!(id = %mr.id, target = %mr.target, "lost claim");
            return Ok(AttemptOutcome::Lost);
        }
        Err(e) => return Err(e.into()),
    }
    info!(id = %mr.id, target = %mr.target, branch = %mr.branch, "claimed merge request");

    match run_attempt(adapter.as_ref(), mr).await {
        Ok(()) => {
            let close = store
                .close(&mr.id, CloseOutcome::Merged, None, Some(RawStatus::InProgress))
                .await;
            match close {
                Ok(_) => {
                    info!(id = %mr.id, target = %mr.target, "merged");
                    Ok(AttemptOutcome::Merged)
                }
                Err(StoreError::Conflict(_)) => {
                    warn!(id = %mr.id, "ticket moved during merge, leaving its outcome in place");
                    Ok(AttemptOutcome::Lost)
                }
                Err(e) => Err(e.into()),
            }
        }
        Err(adapter_err) => {
            let detail = adapter_err.to_string();
            warn!(id = %mr.id, error = %detail, "merge attempt failed");
            let record = store
                .update(
                    &mr.id,
                    TicketPatch::new()
                        .with_status(RawStatus::Open)
                        .with_error(detail.clone()),
                    Some(RawStatus::InProgress),
                )
                .await;
            match record {
                Ok(_) => Ok(AttemptOutcome::Failed { detail }),
                Err(StoreError::Conflict(_)) => {
                    warn!(id = %mr.id, "ticket moved during merge, leaving its outcome in place");
                    Ok(AttemptOutcome::Lost)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Activate, sync, submit, then best-effort deactivate.
async fn run_attempt(
    adapter: &dyn SourceControlAdapter,
    mr: &MergeRequest,
) -> std::result::Result<(), AdapterError> {
    adapter.worker_activate(&mr.worker).await?;
    let result = async {
        adapter.sync(&mr.worker).await?;
        adapter.submit(&mr.worker, &mr.branch, &mr.target).await
    }
    .await;
    if let Err(e) = adapter.worker_deactivate(&mr.worker).await {
        warn!(worker = %mr.worker, error = %e, "deactivate after attempt failed");
    }
    result
}
