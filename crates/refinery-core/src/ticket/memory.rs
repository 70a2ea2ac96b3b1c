//! In-memory ticket store.
//!
//! Reference backend for tests and single-process runs. One mutex guards
//! tickets and edges together, which is what makes the compare-and-set
//! update atomic here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    Blocker, CloseOutcome, ErrorPatch, NewTicket, RawStatus, StoreError, StoreResult, Ticket,
    TicketId, TicketKind, TicketPatch, TicketQuery, TicketStore,
};

#[derive(Default)]
struct Inner {
    tickets: HashMap<TicketId, Ticket>,
    edges: HashMap<TicketId, Vec<String>>,
}

/// Mutex-backed store, cheap to construct per test.
#[derive(Default)]
pub struct MemoryTicketStore {
    inner: Mutex<Inner>,
}

impl MemoryTicketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(ticket: &mut Ticket, patch: TicketPatch) {
    if let Some(status) = patch.status {
        ticket.status = status;
        if status.is_closed() {
            ticket.closed_at = Some(Utc::now());
        } else {
            ticket.closed_at = None;
        }
    }
    if let Some(title) = patch.title {
        ticket.title = title;
    }
    if let Some(priority) = patch.priority {
        ticket.priority = priority;
    }
    match patch.error {
        Some(ErrorPatch::Set(detail)) => ticket.error = Some(detail),
        Some(ErrorPatch::Clear) => ticket.error = None,
        None => {}
    }
    ticket.updated_at = Utc::now();
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn create(&self, new: NewTicket) -> StoreResult<Ticket> {
        new.validate()?;
        let mut inner = self.inner.lock().await;

        let id = new
            .id
            .clone()
            .unwrap_or_else(|| TicketId::generate(new.kind));
        if inner.tickets.contains_key(&id) {
            return Err(StoreError::Conflict(id));
        }
        if new.kind == TicketKind::MergeRequest {
            let duplicate = inner.tickets.values().find(|t| {
                t.kind == TicketKind::MergeRequest
                    && !t.status.is_closed()
                    && t.branch == new.branch
            });
            if let Some(existing) = duplicate {
                return Err(StoreError::Conflict(existing.id.clone()));
            }
        }

        let now = Utc::now();
        let ticket = Ticket {
            id: id.clone(),
            kind: new.kind,
            status: RawStatus::Open,
            title: new.title,
            branch: new.branch,
            target: new.target,
            worker: new.worker,
            issue_id: new.issue_id,
            error: None,
            priority: new.priority,
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_outcome: None,
            close_reason: None,
        };
        inner.tickets.insert(id.clone(), ticket.clone());
        if !new.blocked_by.is_empty() {
            inner.edges.insert(id, new.blocked_by);
        }
        Ok(ticket)
    }

    async fn get(&self, id: &TicketId) -> StoreResult<Ticket> {
        let inner = self.inner.lock().await;
        inner
            .tickets
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
        expect: Option<RawStatus>,
    ) -> StoreResult<Ticket> {
        let mut inner = self.inner.lock().await;
        let ticket = inner
            .tickets
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if expect.is_some_and(|status| status != ticket.status) {
            return Err(StoreError::Conflict(id.clone()));
        }
        apply_patch(ticket, patch);
        Ok(ticket.clone())
    }

    async fn close(
        &self,
        id: &TicketId,
        outcome: CloseOutcome,
        reason: Option<&str>,
        expect: Option<RawStatus>,
    ) -> StoreResult<Ticket> {
        let mut inner = self.inner.lock().await;
        let ticket = inner
            .tickets
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if expect.is_some_and(|status| status != ticket.status) {
            return Err(StoreError::Conflict(id.clone()));
        }
        let now = Utc::now();
        ticket.status = RawStatus::Closed;
        ticket.closed_at = Some(now);
        ticket.updated_at = now;
        ticket.close_outcome = Some(outcome.to_string());
        ticket.close_reason = reason.map(ToString::to_string);
        Ok(ticket.clone())
    }

    async fn list(&self, query: &TicketQuery) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tickets)
    }

    async fn blockers(&self, id: &TicketId) -> StoreResult<Vec<Blocker>> {
        let inner = self.inner.lock().await;
        if !inner.tickets.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let blockers = inner
            .edges
            .get(id)
            .map(|refs| {
                refs.iter()
                    .map(|reference| Blocker {
                        reference: reference.clone(),
                        status: inner
                            .tickets
                            .get(&TicketId::new(reference.clone()))
                            .map(|t| t.status),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(blockers)
    }
}
