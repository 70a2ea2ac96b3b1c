//! Refinery core - merge queue coordination over a shared ticket store.
//!
//! This crate provides:
//! - Ticket store port with memory and `SQLite` backends
//! - Derived merge request state (`ready` / `blocked` / `failed` / ...)
//! - The refinery manager (list / retry / reject verbs)
//! - The merge queue processor (claim, attempt, finalize)
//! - Source control adapter and worker notification ports

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod manager;
pub mod notify;
pub mod output;
pub mod processor;
pub mod request;
pub mod ticket;

pub use adapter::{AdapterError, AdapterKind, SourceControlAdapter, WorkerMode};
pub use config::RigConfig;
pub use error::{Error, Result};
pub use manager::{QueueFilter, RefineryManager, RejectOutcome, RetryOutcome};
pub use notify::{MailboxNotifier, Notifier, NotifyError};
pub use processor::{AttemptOutcome, MergeQueueProcessor, PassSummary};
pub use request::{MergeRequest, MergeStatus};
pub use ticket::memory::MemoryTicketStore;
pub use ticket::sqlite::SqliteTicketStore;
pub use ticket::{
    Blocker, CloseOutcome, ErrorPatch, NewTicket, RawStatus, StoreError, StoreResult, Ticket,
    TicketId, TicketKind, TicketPatch, TicketQuery, TicketStore,
};
