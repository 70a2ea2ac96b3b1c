//! Worker notification port.
//!
//! Callers treat delivery as best effort: a reject still succeeds when the
//! notice cannot be written, so implementations only need to report the
//! failure, not retry it.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// A notification that could not be delivered.
#[derive(Debug, Error)]
#[error("notifying {worker}: {detail}")]
pub struct NotifyError {
    pub worker: String,
    pub detail: String,
}

impl NotifyError {
    pub fn new(worker: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            detail: detail.into(),
        }
    }
}

/// Delivery port for messages to workers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message to a worker.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` when the message could not be handed off.
    async fn notify(&self, worker: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct MailboxMessage<'a> {
    at: DateTime<Utc>,
    subject: &'a str,
    body: &'a str,
}

/// Appends one JSON line per message to `<dir>/<worker>.jsonl`.
pub struct MailboxNotifier {
    dir: PathBuf,
}

impl MailboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn mailbox_path(&self, worker: &str) -> PathBuf {
        self.dir.join(format!("{worker}.jsonl"))
    }
}

#[async_trait]
impl Notifier for MailboxNotifier {
    async fn notify(&self, worker: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| NotifyError::new(worker, format!("creating mailbox dir: {e}")))?;

        let message = MailboxMessage {
            at: Utc::now(),
            subject,
            body,
        };
        let mut line = serde_json::to_string(&message)
            .map_err(|e| NotifyError::new(worker, format!("encoding message: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.mailbox_path(worker))
            .await
            .map_err(|e| NotifyError::new(worker, e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| NotifyError::new(worker, e.to_string()))?;
        Ok(())
    }
}
