//! Shared test doubles for integration tests.
//!
//! Not every test file uses every helper here.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use refinery_core::adapter::AdapterResult;
use refinery_core::ticket::TicketStore;
use refinery_core::{
    AdapterError, AdapterKind, NewTicket, Notifier, NotifyError, SourceControlAdapter, Ticket,
};

/// Call record for `submit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCall {
    pub worker: String,
    pub branch: String,
    pub target: String,
}

/// Call record for `notify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyCall {
    pub worker: String,
    pub subject: String,
    pub body: String,
}

/// Scripted source control adapter.
///
/// Implements [`SourceControlAdapter`] by hand so tests can track every
/// call and inject failures per operation. All state sits behind plain
/// mutexes; the async methods never await anything.
#[derive(Default)]
pub struct ScriptedAdapter {
    sync_calls: Mutex<Vec<String>>,
    activate_calls: Mutex<Vec<String>>,
    deactivate_calls: Mutex<Vec<String>>,
    submit_calls: Mutex<Vec<SubmitCall>>,
    error_on_sync: Mutex<Option<String>>,
    error_on_submit: Mutex<Option<String>>,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `sync` fail with the given detail until cleared.
    pub fn fail_sync(&self, detail: &str) {
        *self.error_on_sync.lock().unwrap() = Some(detail.to_string());
    }

    /// Make `submit` fail with the given detail until cleared.
    pub fn fail_submit(&self, detail: &str) {
        *self.error_on_submit.lock().unwrap() = Some(detail.to_string());
    }

    /// Let subsequent attempts succeed again.
    pub fn heal(&self) {
        *self.error_on_sync.lock().unwrap() = None;
        *self.error_on_submit.lock().unwrap() = None;
    }

    pub fn sync_calls(&self) -> Vec<String> {
        self.sync_calls.lock().unwrap().clone()
    }

    pub fn submit_calls(&self) -> Vec<SubmitCall> {
        self.submit_calls.lock().unwrap().clone()
    }

    pub fn activate_calls(&self) -> Vec<String> {
        self.activate_calls.lock().unwrap().clone()
    }

    pub fn deactivate_calls(&self) -> Vec<String> {
        self.deactivate_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControlAdapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Git
    }

    async fn rig_init(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn worker_create(&self, worker: &str) -> AdapterResult<PathBuf> {
        Ok(PathBuf::from(format!("/tmp/rig/workers/{worker}")))
    }

    async fn worker_activate(&self, worker: &str) -> AdapterResult<()> {
        self.activate_calls.lock().unwrap().push(worker.to_string());
        Ok(())
    }

    async fn worker_deactivate(&self, worker: &str) -> AdapterResult<()> {
        self.deactivate_calls
            .lock()
            .unwrap()
            .push(worker.to_string());
        Ok(())
    }

    fn build_root(&self, worker: &str) -> PathBuf {
        PathBuf::from(format!("/tmp/rig/workers/{worker}"))
    }

    async fn sync(&self, worker: &str) -> AdapterResult<()> {
        self.sync_calls.lock().unwrap().push(worker.to_string());
        if let Some(detail) = self.error_on_sync.lock().unwrap().clone() {
            return Err(AdapterError::new("sync", worker, detail));
        }
        Ok(())
    }

    async fn submit(&self, worker: &str, branch: &str, target: &str) -> AdapterResult<()> {
        self.submit_calls.lock().unwrap().push(SubmitCall {
            worker: worker.to_string(),
            branch: branch.to_string(),
            target: target.to_string(),
        });
        if let Some(detail) = self.error_on_submit.lock().unwrap().clone() {
            return Err(AdapterError::new("submit", worker, detail));
        }
        Ok(())
    }
}

/// Notifier that records deliveries instead of writing mailbox files.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifyCall>>,
    error: Mutex<Option<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every delivery fail with the given detail.
    pub fn fail_with(&self, detail: &str) {
        *self.error.lock().unwrap() = Some(detail.to_string());
    }

    pub fn calls(&self) -> Vec<NotifyCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, worker: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(NotifyCall {
            worker: worker.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        if let Some(detail) = self.error.lock().unwrap().clone() {
            return Err(NotifyError {
                worker: worker.to_string(),
                detail,
            });
        }
        Ok(())
    }
}

/// Insert a merge request with the given id and priority, open and
/// unblocked, targeting `target`.
pub async fn seed_mr(
    store: &dyn TicketStore,
    id: &str,
    target: &str,
    worker: &str,
    priority: i64,
) -> Ticket {
    store
        .create(
            NewTicket::merge_request(format!("change {id}"), format!("work/{id}"), target, worker)
                .with_id(id)
                .with_priority(priority),
        )
        .await
        .unwrap()
}

/// Insert an open issue ticket usable as a blocker.
pub async fn seed_issue(store: &dyn TicketStore, id: &str) -> Ticket {
    store
        .create(NewTicket::issue(format!("issue {id}")).with_id(id))
        .await
        .unwrap()
}
