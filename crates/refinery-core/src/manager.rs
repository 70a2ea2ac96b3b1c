//! Refinery manager: the operator verbs over the merge queue.
//!
//! Everything here works on derived state. The manager never trusts a
//! status it computed earlier; retry and reject re-read the ticket and let
//! the store's guarded writes arbitrate races.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapter::SourceControlAdapter;
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::processor::{claim_and_attempt, AttemptOutcome};
use crate::request::{MergeRequest, MergeStatus};
use crate::ticket::{
    CloseOutcome, RawStatus, StoreError, Ticket, TicketId, TicketKind, TicketPatch, TicketQuery,
    TicketStore,
};

/// Filter for queue listings.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    /// Keep only merge requests whose derived status is ready.
    pub ready_only: bool,
    /// Keep only merge requests with this derived status.
    pub status: Option<MergeStatus>,
    /// Keep only merge requests from this worker.
    pub worker: Option<String>,
    /// Keep only merge requests for this integration target.
    pub target: Option<String>,
    /// Shorthand for the epic's integration branch.
    pub epic: Option<String>,
}

impl QueueFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ready() -> Self {
        Self {
            ready_only: true,
            ..Self::default()
        }
    }

    /// The target to filter on: an explicit target wins, otherwise an epic
    /// maps to its `integration/<epic>` branch.
    #[must_use]
    pub fn resolved_target(&self) -> Option<String> {
        self.target
            .clone()
            .or_else(|| self.epic.as_ref().map(|epic| format!("integration/{epic}")))
    }
}

/// Result of a retry.
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    /// The merge request after the clear (and attempt, when one ran).
    pub mr: MergeRequest,
    /// Outcome of the immediate attempt; `None` when none was requested,
    /// the merge request was not ready after the clear, or another merge
    /// request already held the target.
    pub attempt: Option<AttemptOutcome>,
}

/// Result of a reject.
#[derive(Debug, Clone, Serialize)]
pub struct RejectOutcome {
    pub id: TicketId,
    pub branch: String,
    pub worker: String,
    /// Linked work item, deliberately left open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<TicketId>,
    pub notified: bool,
}

/// Query and mutation API for operators.
pub struct RefineryManager {
    store: Arc<dyn TicketStore>,
    adapter: Arc<dyn SourceControlAdapter>,
    notifier: Arc<dyn Notifier>,
}

impl RefineryManager {
    pub fn new(
        store: Arc<dyn TicketStore>,
        adapter: Arc<dyn SourceControlAdapter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            adapter,
            notifier,
        }
    }

    /// Fetch one merge request with derived status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id is missing or names a ticket that is
    /// not a merge request.
    pub async fn get_mr(&self, id: &TicketId) -> Result<MergeRequest> {
        let ticket = match self.store.get(id).await {
            Ok(ticket) => ticket,
            Err(StoreError::NotFound(_)) => return Err(Error::not_found(id.as_str())),
            Err(e) => return Err(e.into()),
        };
        self.view(&ticket)
            .await?
            .ok_or_else(|| Error::not_found(id.as_str()))
    }

    /// List merge requests matching the filter, queue-ordered.
    ///
    /// # Errors
    ///
    /// Returns `Store` on backend failure.
    pub async fn list(&self, filter: &QueueFilter) -> Result<Vec<MergeRequest>> {
        let mut query = TicketQuery::merge_requests();
        if let Some(target) = filter.resolved_target() {
            query = query.with_target(target);
        }
        if let Some(worker) = &filter.worker {
            query = query.with_worker(worker.clone());
        }
        if filter.status == Some(MergeStatus::Closed) {
            query = query.with_closed().with_status(RawStatus::Closed);
        }

        let tickets = self.store.list(&query).await?;
        let mut mrs = Vec::with_capacity(tickets.len());
        for ticket in &tickets {
            if let Some(mr) = self.view(ticket).await? {
                mrs.push(mr);
            }
        }

        if filter.ready_only {
            mrs.retain(MergeRequest::is_ready);
        }
        if let Some(status) = filter.status {
            mrs.retain(|mr| mr.status == status);
        }
        mrs.sort_by(MergeRequest::queue_cmp);
        Ok(mrs)
    }

    /// Merge requests eligible for the next pass, queue-ordered.
    ///
    /// # Errors
    ///
    /// Returns `Store` on backend failure.
    pub async fn ready(&self) -> Result<Vec<MergeRequest>> {
        self.list(&QueueFilter::ready()).await
    }

    /// Clear a failed merge request's error so the queue picks it up
    /// again. With `now`, also run one merge attempt synchronously when
    /// the clear leaves it ready and no other merge request already
    /// holds its target.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `NotFailed` when the
    /// derived status is anything but failed. A clear that loses its
    /// guarded write re-reads the ticket, so a concurrently claimed or
    /// closed request also reports `NotFailed` with the status the race
    /// winner left behind.
    pub async fn retry(&self, id: &TicketId, now: bool) -> Result<RetryOutcome> {
        loop {
            let mr = self.get_mr(id).await?;
            if !mr.is_failed() {
                return Err(Error::NotFailed {
                    id: id.clone(),
                    status: mr.status,
                });
            }

            let cleared = self
                .store
                .update(id, TicketPatch::new().clear_error(), Some(RawStatus::Open))
                .await;
            match cleared {
                Ok(_) => break,
                Err(StoreError::Conflict(_)) => {
                    debug!(id = %id, "clear lost a race, re-reading");
                }
                Err(StoreError::NotFound(_)) => return Err(Error::not_found(id.as_str())),
                Err(e) => return Err(e.into()),
            }
        }
        info!(id = %id, "cleared merge error for retry");

        let mut mr = self.get_mr(id).await?;
        let mut attempt = None;
        if now {
            if !mr.is_ready() {
                debug!(id = %id, status = %mr.status, "retry cleared but not ready, skipping attempt");
            } else if self.target_claimed(&mr.target).await? {
                debug!(id = %id, target = %mr.target, "target already claimed, leaving the retry to the queue");
            } else {
                attempt = Some(claim_and_attempt(&self.store, &self.adapter, &mr).await?);
                mr = self.get_mr(id).await?;
            }
        }

        Ok(RetryOutcome { mr, attempt })
    }

    /// Whether any current merge request on `target` holds the claim.
    async fn target_claimed(&self, target: &str) -> Result<bool> {
        let holding = self
            .store
            .list(
                &TicketQuery::merge_requests()
                    .with_target(target)
                    .with_status(RawStatus::InProgress),
            )
            .await?;
        Ok(!holding.is_empty())
    }

    /// Close a merge request as rejected, recording the reason. The
    /// selector is an id or an exact branch name among current merge
    /// requests. The linked issue stays open; the worker is messaged when
    /// `notify` is set and delivery failure never fails the reject.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing current matches the selector.
    pub async fn reject(&self, selector: &str, reason: &str, notify: bool) -> Result<RejectOutcome> {
        let ticket = self.resolve_current(selector).await?;
        let closed = self
            .store
            .close(&ticket.id, CloseOutcome::Rejected, Some(reason), None)
            .await?;

        let branch = closed.branch.clone().unwrap_or_default();
        let worker = closed.worker.clone().unwrap_or_default();
        info!(id = %closed.id, branch = %branch, "rejected merge request");

        let mut notified = false;
        if notify && !worker.is_empty() {
            let body = format!(
                "merge request {} (branch {}) was rejected: {}",
                closed.id, branch, reason
            );
            match self
                .notifier
                .notify(&worker, "merge request rejected", &body)
                .await
            {
                Ok(()) => notified = true,
                Err(e) => warn!(worker = %worker, error = %e, "reject notification failed"),
            }
        }

        Ok(RejectOutcome {
            id: closed.id,
            branch,
            worker,
            issue_id: closed.issue_id,
            notified,
        })
    }

    async fn view(&self, ticket: &Ticket) -> Result<Option<MergeRequest>> {
        if ticket.kind != TicketKind::MergeRequest {
            return Ok(None);
        }
        let blockers = self.store.blockers(&ticket.id).await?;
        Ok(MergeRequest::from_ticket(ticket, &blockers))
    }

    /// Resolve a selector to a current merge request ticket: id match
    /// first, then exact branch among current merge requests. Closed
    /// tickets are never addressable, so a merged outcome cannot be
    /// rewritten by a late reject.
    async fn resolve_current(&self, selector: &str) -> Result<Ticket> {
        match self.store.get(&TicketId::from(selector)).await {
            Ok(ticket)
                if ticket.kind == TicketKind::MergeRequest && !ticket.status.is_closed() =>
            {
                return Ok(ticket);
            }
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let current = self.store.list(&TicketQuery::merge_requests()).await?;
        current
            .into_iter()
            .find(|ticket| ticket.branch.as_deref() == Some(selector))
            .ok_or_else(|| Error::not_found(selector))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::adapter::{AdapterError, AdapterKind, AdapterResult};
    use crate::notify::NotifyError;
    use crate::ticket::memory::MemoryTicketStore;
    use crate::ticket::{Blocker, NewTicket, StoreResult};

    #[derive(Default)]
    struct StubAdapter {
        fail_submit: AtomicBool,
        submits: AtomicUsize,
    }

    #[async_trait]
    impl SourceControlAdapter for StubAdapter {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Git
        }
        async fn rig_init(&self) -> AdapterResult<()> {
            Ok(())
        }
        async fn worker_create(&self, worker: &str) -> AdapterResult<PathBuf> {
            Ok(PathBuf::from(worker))
        }
        async fn worker_activate(&self, _worker: &str) -> AdapterResult<()> {
            Ok(())
        }
        async fn worker_deactivate(&self, _worker: &str) -> AdapterResult<()> {
            Ok(())
        }
        fn build_root(&self, worker: &str) -> PathBuf {
            PathBuf::from(worker)
        }
        async fn sync(&self, _worker: &str) -> AdapterResult<()> {
            Ok(())
        }
        async fn submit(&self, worker: &str, _branch: &str, _target: &str) -> AdapterResult<()> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.fail_submit.load(Ordering::SeqCst) {
                Err(AdapterError::new("submit", worker, "remote rejected"))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct StubNotifier {
        fail: AtomicBool,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for StubNotifier {
        async fn notify(
            &self,
            worker: &str,
            _subject: &str,
            _body: &str,
        ) -> std::result::Result<(), NotifyError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotifyError::new(worker, "mailbox unwritable"));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Passes through to a memory store until armed, then claims the
    /// ticket just ahead of the next guarded update.
    struct RacingStore {
        inner: MemoryTicketStore,
        armed: AtomicBool,
    }

    impl RacingStore {
        fn new() -> Self {
            Self {
                inner: MemoryTicketStore::new(),
                armed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl TicketStore for RacingStore {
        async fn create(&self, new: NewTicket) -> StoreResult<Ticket> {
            self.inner.create(new).await
        }
        async fn get(&self, id: &TicketId) -> StoreResult<Ticket> {
            self.inner.get(id).await
        }
        async fn update(
            &self,
            id: &TicketId,
            patch: TicketPatch,
            expect: Option<RawStatus>,
        ) -> StoreResult<Ticket> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.inner
                    .update(
                        id,
                        TicketPatch::new().with_status(RawStatus::InProgress),
                        Some(RawStatus::Open),
                    )
                    .await?;
            }
            self.inner.update(id, patch, expect).await
        }
        async fn close(
            &self,
            id: &TicketId,
            outcome: CloseOutcome,
            reason: Option<&str>,
            expect: Option<RawStatus>,
        ) -> StoreResult<Ticket> {
            self.inner.close(id, outcome, reason, expect).await
        }
        async fn list(&self, query: &TicketQuery) -> StoreResult<Vec<Ticket>> {
            self.inner.list(query).await
        }
        async fn blockers(&self, id: &TicketId) -> StoreResult<Vec<Blocker>> {
            self.inner.blockers(id).await
        }
    }

    struct Fixture {
        store: Arc<MemoryTicketStore>,
        adapter: Arc<StubAdapter>,
        notifier: Arc<StubNotifier>,
        manager: RefineryManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryTicketStore::new());
        let adapter = Arc::new(StubAdapter::default());
        let notifier = Arc::new(StubNotifier::default());
        let store_dyn: Arc<dyn TicketStore> = store.clone();
        let adapter_dyn: Arc<dyn SourceControlAdapter> = adapter.clone();
        let notifier_dyn: Arc<dyn Notifier> = notifier.clone();
        let manager = RefineryManager::new(store_dyn, adapter_dyn, notifier_dyn);
        Fixture {
            store,
            adapter,
            notifier,
            manager,
        }
    }

    async fn seed_failed(fx: &Fixture, id: &str) {
        fx.store
            .create(
                NewTicket::merge_request("fix flaky test", format!("fix/{id}"), "main", "nux")
                    .with_id(id)
                    .with_issue("issue-1"),
            )
            .await
            .unwrap();
        fx.store
            .update(
                &TicketId::from(id),
                TicketPatch::new().with_error("rebase conflict"),
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_mr_rejects_non_merge_tickets() {
        let fx = fixture();
        fx.store
            .create(NewTicket::issue("just an issue").with_id("issue-7"))
            .await
            .unwrap();

        let err = fx.manager.get_mr(&"issue-7".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        let err = fx.manager.get_mr(&"mr-ghost".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_epic_target() {
        let fx = fixture();
        fx.store
            .create(
                NewTicket::merge_request("a", "b1", "integration/search", "nux").with_id("mr-a"),
            )
            .await
            .unwrap();
        fx.store
            .create(NewTicket::merge_request("b", "b2", "main", "slit").with_id("mr-b"))
            .await
            .unwrap();

        let filter = QueueFilter {
            epic: Some("search".into()),
            ..QueueFilter::default()
        };
        let mrs = fx.manager.list(&filter).await.unwrap();
        assert_eq!(mrs.len(), 1);
        assert_eq!(mrs[0].id.as_str(), "mr-a");
    }

    #[tokio::test]
    async fn ready_excludes_blocked_and_failed() {
        let fx = fixture();
        fx.store
            .create(NewTicket::merge_request("ok", "b1", "main", "w1").with_id("mr-ok"))
            .await
            .unwrap();
        fx.store
            .create(
                NewTicket::merge_request("stuck", "b2", "main", "w2")
                    .with_id("mr-stuck")
                    .blocked_by("issue-open"),
            )
            .await
            .unwrap();
        fx.store
            .create(NewTicket::issue("dep").with_id("issue-open"))
            .await
            .unwrap();
        seed_failed(&fx, "mr-broken").await;

        let ready = fx.manager.ready().await.unwrap();
        let ids: Vec<&str> = ready.iter().map(|mr| mr.id.as_str()).collect();
        assert_eq!(ids, vec!["mr-ok"]);
    }

    #[tokio::test]
    async fn retry_requires_failed_status() {
        let fx = fixture();
        fx.store
            .create(NewTicket::merge_request("fine", "b1", "main", "w").with_id("mr-fine"))
            .await
            .unwrap();
        fx.store
            .create(NewTicket::issue("dep").with_id("issue-dep"))
            .await
            .unwrap();
        fx.store
            .create(
                NewTicket::merge_request("waiting", "b2", "main", "w")
                    .with_id("mr-waiting")
                    .blocked_by("issue-dep"),
            )
            .await
            .unwrap();
        fx.store
            .create(NewTicket::merge_request("claimed", "b3", "main", "w").with_id("mr-claimed"))
            .await
            .unwrap();
        fx.store
            .update(
                &"mr-claimed".into(),
                TicketPatch::new().with_status(RawStatus::InProgress),
                Some(RawStatus::Open),
            )
            .await
            .unwrap();
        fx.store
            .create(NewTicket::merge_request("landed", "b4", "main", "w").with_id("mr-landed"))
            .await
            .unwrap();
        fx.store
            .close(&"mr-landed".into(), CloseOutcome::Merged, None, None)
            .await
            .unwrap();

        for (id, expected) in [
            ("mr-fine", MergeStatus::Ready),
            ("mr-waiting", MergeStatus::Blocked),
            ("mr-claimed", MergeStatus::InProgress),
            ("mr-landed", MergeStatus::Closed),
        ] {
            let err = fx.manager.retry(&id.into(), false).await.unwrap_err();
            assert!(
                matches!(err, Error::NotFailed { status, .. } if status == expected),
                "retry of {id} should report NotFailed with {expected}"
            );
        }
        assert_eq!(fx.adapter.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_clears_the_error() {
        let fx = fixture();
        seed_failed(&fx, "mr-1").await;

        let outcome = fx.manager.retry(&"mr-1".into(), false).await.unwrap();
        assert_eq!(outcome.mr.status, MergeStatus::Ready);
        assert_eq!(outcome.mr.error, None);
        assert!(outcome.attempt.is_none());
        assert_eq!(fx.adapter.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_now_merges_when_the_attempt_succeeds() {
        let fx = fixture();
        seed_failed(&fx, "mr-1").await;

        let outcome = fx.manager.retry(&"mr-1".into(), true).await.unwrap();
        assert_eq!(outcome.attempt, Some(AttemptOutcome::Merged));
        assert_eq!(outcome.mr.status, MergeStatus::Closed);
        assert_eq!(fx.adapter.submits.load(Ordering::SeqCst), 1);

        let ticket = fx.store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(ticket.close_outcome.as_deref(), Some("merged"));
    }

    #[tokio::test]
    async fn retry_now_defers_while_another_holds_the_target() {
        let fx = fixture();
        fx.store
            .create(
                NewTicket::merge_request("holder", "work/held", "main", "slit")
                    .with_id("mr-held"),
            )
            .await
            .unwrap();
        fx.store
            .update(
                &"mr-held".into(),
                TicketPatch::new().with_status(RawStatus::InProgress),
                Some(RawStatus::Open),
            )
            .await
            .unwrap();
        seed_failed(&fx, "mr-1").await;

        let outcome = fx.manager.retry(&"mr-1".into(), true).await.unwrap();
        assert_eq!(outcome.mr.status, MergeStatus::Ready);
        assert!(outcome.attempt.is_none());
        assert_eq!(fx.adapter.submits.load(Ordering::SeqCst), 0);

        let retried = fx.store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(retried.status, RawStatus::Open);
        let holder = fx.store.get(&"mr-held".into()).await.unwrap();
        assert_eq!(holder.status, RawStatus::InProgress);
    }

    #[tokio::test]
    async fn retry_now_records_a_second_failure() {
        let fx = fixture();
        seed_failed(&fx, "mr-1").await;
        fx.adapter.fail_submit.store(true, Ordering::SeqCst);

        let outcome = fx.manager.retry(&"mr-1".into(), true).await.unwrap();
        assert!(matches!(outcome.attempt, Some(AttemptOutcome::Failed { .. })));
        assert_eq!(outcome.mr.status, MergeStatus::Failed);
        assert!(outcome.mr.error.as_deref().unwrap().contains("remote rejected"));
    }

    #[tokio::test]
    async fn retry_now_skips_the_attempt_when_still_blocked() {
        let fx = fixture();
        fx.store
            .create(NewTicket::issue("dep").with_id("issue-dep"))
            .await
            .unwrap();
        fx.store
            .create(
                NewTicket::merge_request("t", "b", "main", "w")
                    .with_id("mr-1")
                    .blocked_by("issue-dep"),
            )
            .await
            .unwrap();
        fx.store
            .update(
                &"mr-1".into(),
                TicketPatch::new().with_error("flaky"),
                None,
            )
            .await
            .unwrap();

        let outcome = fx.manager.retry(&"mr-1".into(), true).await.unwrap();
        assert_eq!(outcome.mr.status, MergeStatus::Blocked);
        assert!(outcome.attempt.is_none());
        assert_eq!(fx.adapter.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_reports_not_failed_when_the_clear_loses_a_race() {
        let store = Arc::new(RacingStore::new());
        let store_dyn: Arc<dyn TicketStore> = store.clone();
        let adapter_dyn: Arc<dyn SourceControlAdapter> = Arc::new(StubAdapter::default());
        let notifier_dyn: Arc<dyn Notifier> = Arc::new(StubNotifier::default());
        let manager = RefineryManager::new(store_dyn, adapter_dyn, notifier_dyn);

        store
            .create(
                NewTicket::merge_request("fix flaky test", "fix/mr-1", "main", "nux")
                    .with_id("mr-1"),
            )
            .await
            .unwrap();
        store
            .update(
                &"mr-1".into(),
                TicketPatch::new().with_error("rebase conflict"),
                None,
            )
            .await
            .unwrap();
        store.armed.store(true, Ordering::SeqCst);

        let err = manager.retry(&"mr-1".into(), false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotFailed {
                status: MergeStatus::InProgress,
                ..
            }
        ));

        let ticket = store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(ticket.status, RawStatus::InProgress);
        assert_eq!(ticket.error.as_deref(), Some("rebase conflict"));
    }

    #[tokio::test]
    async fn reject_resolves_by_branch_and_leaves_the_issue_open() {
        let fx = fixture();
        fx.store
            .create(NewTicket::issue("the work").with_id("issue-1"))
            .await
            .unwrap();
        fx.store
            .create(
                NewTicket::merge_request("t", "feat/lexer", "main", "nux")
                    .with_id("mr-1")
                    .with_issue("issue-1"),
            )
            .await
            .unwrap();

        let outcome = fx
            .manager
            .reject("feat/lexer", "superseded by mr-2", true)
            .await
            .unwrap();
        assert_eq!(outcome.id.as_str(), "mr-1");
        assert_eq!(outcome.branch, "feat/lexer");
        assert_eq!(outcome.worker, "nux");
        assert_eq!(outcome.issue_id, Some(TicketId::from("issue-1")));
        assert!(outcome.notified);
        assert_eq!(fx.notifier.sent.load(Ordering::SeqCst), 1);

        let mr_ticket = fx.store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(mr_ticket.status, RawStatus::Closed);
        assert_eq!(mr_ticket.close_outcome.as_deref(), Some("rejected"));
        assert_eq!(mr_ticket.close_reason.as_deref(), Some("superseded by mr-2"));

        let issue = fx.store.get(&"issue-1".into()).await.unwrap();
        assert_eq!(issue.status, RawStatus::Open);
    }

    #[tokio::test]
    async fn reject_succeeds_even_when_notification_fails() {
        let fx = fixture();
        fx.store
            .create(NewTicket::merge_request("t", "b", "main", "nux").with_id("mr-1"))
            .await
            .unwrap();
        fx.notifier.fail.store(true, Ordering::SeqCst);

        let outcome = fx.manager.reject("mr-1", "bad build", true).await.unwrap();
        assert!(!outcome.notified);

        let ticket = fx.store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(ticket.status, RawStatus::Closed);
    }

    #[tokio::test]
    async fn reject_closes_unconditionally_even_in_progress() {
        let fx = fixture();
        fx.store
            .create(NewTicket::merge_request("t", "b", "main", "nux").with_id("mr-1"))
            .await
            .unwrap();
        fx.store
            .update(
                &"mr-1".into(),
                TicketPatch::new().with_status(RawStatus::InProgress),
                Some(RawStatus::Open),
            )
            .await
            .unwrap();

        let outcome = fx.manager.reject("mr-1", "emergency stop", false).await.unwrap();
        assert!(!outcome.notified);
        let ticket = fx.store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(ticket.close_outcome.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn reject_never_rewrites_a_closed_outcome() {
        let fx = fixture();
        fx.store
            .create(NewTicket::merge_request("t", "feat/x", "main", "nux").with_id("mr-1"))
            .await
            .unwrap();
        fx.store
            .close(&"mr-1".into(), CloseOutcome::Merged, None, None)
            .await
            .unwrap();

        let by_id = fx.manager.reject("mr-1", "too late", false).await;
        assert!(matches!(by_id, Err(Error::NotFound { .. })));
        let by_branch = fx.manager.reject("feat/x", "too late", false).await;
        assert!(matches!(by_branch, Err(Error::NotFound { .. })));

        let ticket = fx.store.get(&"mr-1".into()).await.unwrap();
        assert_eq!(ticket.close_outcome.as_deref(), Some("merged"));
    }
}
