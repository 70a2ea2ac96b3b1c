//! Merge requests and their derived status.
//!
//! The store only persists `open` / `in_progress` / `closed` plus an error
//! field and dependency edges. Everything the queue acts on is derived here,
//! in one place, so the manager, the processor and the CLI can never
//! disagree about what "ready" means.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ticket::{Blocker, RawStatus, Ticket, TicketId, TicketKind};

/// Status of a merge request as the queue sees it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergeStatus {
    /// Eligible for the next pass.
    Ready,
    /// Waiting on at least one unresolved blocker.
    Blocked,
    /// Last merge attempt failed; holds until retried.
    Failed,
    /// Claimed by a processor right now.
    InProgress,
    /// Merged or rejected.
    Closed,
}

impl MergeStatus {
    /// Derive the queue status from stored state.
    ///
    /// Precedence is strict: a closed ticket is closed no matter what the
    /// error field says, a claimed ticket is in progress even when blockers
    /// appeared after the claim, and an error outranks blockers so a failed
    /// merge is never silently reported as merely waiting.
    #[must_use]
    pub fn derive(raw: RawStatus, error: Option<&str>, unresolved_blockers: usize) -> Self {
        match raw {
            RawStatus::Closed => Self::Closed,
            RawStatus::InProgress => Self::InProgress,
            RawStatus::Open => {
                if error.is_some_and(|e| !e.is_empty()) {
                    Self::Failed
                } else if unresolved_blockers > 0 {
                    Self::Blocked
                } else {
                    Self::Ready
                }
            }
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A merge request with its derived status and blocker view.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRequest {
    pub id: TicketId,
    pub title: String,
    pub branch: String,
    pub target: String,
    pub worker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<TicketId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub priority: i64,
    pub status: MergeStatus,
    pub raw_status: RawStatus,
    /// Blockers that resolve to current tickets in this store.
    pub blocked_by: Vec<TicketId>,
    /// All unresolved edges, dangling references included, so this count
    /// may exceed `blocked_by.len()`.
    pub blocked_by_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeRequest {
    /// Build the derived view from a stored ticket and its edges. Returns
    /// `None` for tickets that are not merge requests.
    #[must_use]
    pub fn from_ticket(ticket: &Ticket, blockers: &[Blocker]) -> Option<Self> {
        if ticket.kind != TicketKind::MergeRequest {
            return None;
        }

        let blocked_by: Vec<TicketId> = blockers.iter().filter_map(Blocker::blocking_id).collect();
        let blocked_by_count = blockers.iter().filter(|b| b.is_blocking()).count();
        let status = MergeStatus::derive(ticket.status, ticket.error_detail(), blocked_by_count);

        Some(Self {
            id: ticket.id.clone(),
            title: ticket.title.clone(),
            branch: ticket.branch.clone().unwrap_or_default(),
            target: ticket.target.clone().unwrap_or_default(),
            worker: ticket.worker.clone().unwrap_or_default(),
            issue_id: ticket.issue_id.clone(),
            error: ticket.error_detail().map(ToString::to_string),
            priority: ticket.priority,
            status,
            raw_status: ticket.status,
            blocked_by,
            blocked_by_count,
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
        })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == MergeStatus::Ready
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == MergeStatus::Failed
    }

    /// Queue order within a target: lower priority number first, then
    /// oldest, then id so the order is total.
    #[must_use]
    pub fn queue_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}
