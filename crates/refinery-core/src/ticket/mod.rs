//! Ticket store port and the shared ticket types.
//!
//! Tickets are the persistence unit: plain issues and merge requests both
//! live in the same store. Merge request state beyond the raw status is
//! derived, never stored (see [`crate::request`]).

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Priority assigned when the caller does not pick one. Lower runs sooner.
pub const DEFAULT_PRIORITY: i64 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Unique ticket identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Create an id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for the given kind, `mr-<stamp>` style.
    #[must_use]
    pub fn generate(kind: TicketKind) -> Self {
        Self(format!("{}-{}", kind.id_prefix(), next_id_stamp()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TicketId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Millisecond stamp that is strictly monotonic within this process, so
/// ids generated back to back never collide.
fn next_id_stamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(last.max(now - 1) + 1)
    });
    match prev {
        Ok(last) => last.max(now - 1) + 1,
        Err(_) => now,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// What a ticket represents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TicketKind {
    Issue,
    MergeRequest,
}

impl TicketKind {
    const fn id_prefix(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::MergeRequest => "mr",
        }
    }
}

/// Stored ticket status. Everything richer is derived.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RawStatus {
    Open,
    InProgress,
    Closed,
}

impl RawStatus {
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Recorded close outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CloseOutcome {
    Merged,
    Rejected,
}

// ─────────────────────────────────────────────────────────────────────────────
// Ticket record
// ─────────────────────────────────────────────────────────────────────────────

/// A persisted ticket. Merge request fields are `None` for plain issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub kind: TicketKind,
    pub status: RawStatus,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<TicketId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

impl Ticket {
    /// Error field treated as absent when empty.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Payload for creating a ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Option<TicketId>,
    pub kind: TicketKind,
    pub title: String,
    pub branch: Option<String>,
    pub target: Option<String>,
    pub worker: Option<String>,
    pub issue_id: Option<TicketId>,
    pub priority: i64,
    pub blocked_by: Vec<String>,
}

impl NewTicket {
    /// A plain issue ticket.
    pub fn issue(title: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: TicketKind::Issue,
            title: title.into(),
            branch: None,
            target: None,
            worker: None,
            issue_id: None,
            priority: DEFAULT_PRIORITY,
            blocked_by: Vec::new(),
        }
    }

    /// A merge request ticket for `branch` landing on `target`.
    pub fn merge_request(
        title: impl Into<String>,
        branch: impl Into<String>,
        target: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: TicketKind::MergeRequest,
            title: title.into(),
            branch: Some(branch.into()),
            target: Some(target.into()),
            worker: Some(worker.into()),
            issue_id: None,
            priority: DEFAULT_PRIORITY,
            blocked_by: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<TicketId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_issue(mut self, issue_id: impl Into<TicketId>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    /// Add a blocker reference. The reference may name a ticket that does
    /// not exist in this store; such edges still block.
    #[must_use]
    pub fn blocked_by(mut self, reference: impl Into<String>) -> Self {
        self.blocked_by.push(reference.into());
        self
    }

    /// Shared structural checks, run by every backend before inserting.
    pub(crate) fn validate(&self) -> StoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(StoreError::InvalidInput("title must not be empty".into()));
        }
        if self.kind == TicketKind::MergeRequest {
            for (field, value) in [
                ("branch", &self.branch),
                ("target", &self.target),
                ("worker", &self.worker),
            ] {
                if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    return Err(StoreError::InvalidInput(format!(
                        "merge request requires a {field}"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Updates and queries
// ─────────────────────────────────────────────────────────────────────────────

/// Tri-state patch for the error field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPatch {
    Set(String),
    Clear,
}

/// Partial update applied through [`TicketStore::update`]. Unset fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct TicketPatch {
    pub status: Option<RawStatus>,
    pub title: Option<String>,
    pub priority: Option<i64>,
    pub error: Option<ErrorPatch>,
}

impl TicketPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(mut self, status: RawStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(ErrorPatch::Set(detail.into()));
        self
    }

    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.error = Some(ErrorPatch::Clear);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.title.is_none()
            && self.priority.is_none()
            && self.error.is_none()
    }
}

/// Filter for [`TicketStore::list`]. Closed tickets are excluded unless
/// `include_closed` is set.
#[derive(Debug, Clone, Default)]
pub struct TicketQuery {
    pub kind: Option<TicketKind>,
    pub status: Option<RawStatus>,
    pub target: Option<String>,
    pub worker: Option<String>,
    pub include_closed: bool,
}

impl TicketQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn merge_requests() -> Self {
        Self {
            kind: Some(TicketKind::MergeRequest),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RawStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    #[must_use]
    pub fn with_closed(mut self) -> Self {
        self.include_closed = true;
        self
    }

    /// Whether a ticket satisfies this query. Backends that filter in
    /// storage must match these semantics exactly.
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if !self.include_closed && ticket.status.is_closed() {
            return false;
        }
        if self.kind.is_some_and(|k| k != ticket.kind) {
            return false;
        }
        if self.status.is_some_and(|s| s != ticket.status) {
            return false;
        }
        if self
            .target
            .as_deref()
            .is_some_and(|t| ticket.target.as_deref() != Some(t))
        {
            return false;
        }
        if self
            .worker
            .as_deref()
            .is_some_and(|w| ticket.worker.as_deref() != Some(w))
        {
            return false;
        }
        true
    }
}

/// One dependency edge as seen from the blocked ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    /// The raw reference recorded on the edge.
    pub reference: String,
    /// Status of the referenced ticket, `None` when it does not exist in
    /// this store.
    pub status: Option<RawStatus>,
}

impl Blocker {
    /// An edge stops blocking only once it resolves to a closed ticket.
    /// Dangling references keep blocking.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        !matches!(self.status, Some(RawStatus::Closed))
    }

    /// Id of the referenced ticket when it exists and still blocks.
    #[must_use]
    pub fn blocking_id(&self) -> Option<TicketId> {
        match self.status {
            Some(status) if !status.is_closed() => Some(TicketId::new(self.reference.clone())),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store port
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced by ticket store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ticket not found: {0}")]
    NotFound(TicketId),

    #[error("conflict on ticket {0}")]
    Conflict(TicketId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage backend: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence port shared by the manager and the processor.
///
/// The compare-and-set shape of [`update`](TicketStore::update) and
/// [`close`](TicketStore::close) is the only exclusivity mechanism in the
/// system: callers that pass an expected status get [`StoreError::Conflict`]
/// when another actor moved the ticket first.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a ticket and its blocker edges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when required fields are missing, `Conflict`
    /// when the id is taken or another current merge request already uses
    /// the branch.
    async fn create(&self, new: NewTicket) -> StoreResult<Ticket>;

    /// Fetch a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no ticket has the id.
    async fn get(&self, id: &TicketId) -> StoreResult<Ticket>;

    /// Apply a partial update. When `expect` is set the update only goes
    /// through if the stored status still matches.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticket is missing, `Conflict` when
    /// `expect` was given and did not match.
    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
        expect: Option<RawStatus>,
    ) -> StoreResult<Ticket>;

    /// Close a ticket, recording the outcome and optional reason. Same
    /// `expect` semantics as [`update`](TicketStore::update); passing
    /// `None` closes unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticket is missing, `Conflict` when
    /// `expect` did not match.
    async fn close(
        &self,
        id: &TicketId,
        outcome: CloseOutcome,
        reason: Option<&str>,
        expect: Option<RawStatus>,
    ) -> StoreResult<Ticket>;

    /// List tickets matching the query, ordered by created_at then id.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on storage failure.
    async fn list(&self, query: &TicketQuery) -> StoreResult<Vec<Ticket>>;

    /// All dependency edges of a ticket, dangling references included.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the ticket is missing.
    async fn blockers(&self, id: &TicketId) -> StoreResult<Vec<Blocker>>;
}
