//! Merge queue operator commands: list, show, retry, reject, submit.
//!
//! Each command loads the rig services, drives the manager, and renders
//! either human-readable text or JSON. Derivation and ordering live in
//! `refinery-core`; this module only presents them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use refinery_core::output::{format_age, render_table};
use refinery_core::ticket::NewTicket;
use refinery_core::{
    AttemptOutcome, MergeRequest, MergeStatus, QueueFilter, RejectOutcome, RigConfig, TicketId,
};

use crate::commands::Services;

/// Options for `mq list`.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub ready: bool,
    pub status: Option<MergeStatus>,
    pub worker: Option<String>,
    pub target: Option<String>,
    pub epic: Option<String>,
    pub json: bool,
}

/// Options for `mq show`.
#[derive(Debug, Clone)]
pub struct ShowOptions {
    pub id: String,
    pub json: bool,
}

/// Options for `mq retry`.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub id: String,
    pub now: bool,
}

/// Options for `mq reject`.
#[derive(Debug, Clone)]
pub struct RejectOptions {
    pub selector: String,
    pub reason: String,
    pub notify: bool,
}

/// Options for `mq submit`.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub branch: String,
    pub target: String,
    pub worker: String,
    pub title: Option<String>,
    pub issue: Option<String>,
    pub priority: Option<i64>,
    pub blocked_by: Vec<String>,
}

pub async fn list(config: &RigConfig, options: &ListOptions) -> Result<()> {
    let services = Services::connect(config).await?;
    let filter = QueueFilter {
        ready_only: options.ready,
        status: options.status,
        worker: options.worker.clone(),
        target: options.target.clone(),
        epic: options.epic.clone(),
    };
    let mrs = services.manager().list(&filter).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&mrs)?);
        return Ok(());
    }
    if mrs.is_empty() {
        println!("Merge queue is empty.");
        return Ok(());
    }
    print!("{}", render_table(&mrs, Utc::now()));
    Ok(())
}

pub async fn show(config: &RigConfig, options: &ShowOptions) -> Result<()> {
    let services = Services::connect(config).await?;
    let mr = services
        .manager()
        .get_mr(&TicketId::from(options.id.as_str()))
        .await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&mr)?);
    } else {
        print!("{}", show_text(&mr, Utc::now()));
    }
    Ok(())
}

pub async fn retry(config: &RigConfig, options: &RetryOptions) -> Result<()> {
    let services = Services::connect(config).await?;
    let manager = services.manager();
    let id = TicketId::from(options.id.as_str());

    let before = manager.get_mr(&id).await?;
    println!("Retrying merge request: {id}");
    println!("  Branch: {}", before.branch);
    println!("  Worker: {}", before.worker);
    if let Some(error) = &before.error {
        println!("  Previous error: {error}");
    }

    let outcome = manager.retry(&id, options.now).await?;
    match outcome.attempt {
        Some(AttemptOutcome::Merged) => println!("✓ Merge request merged"),
        Some(AttemptOutcome::Failed { detail }) => {
            println!("✗ Merge attempt failed");
            println!("  {detail}");
        }
        Some(AttemptOutcome::Lost) => {
            println!("Another actor moved the merge request; leaving their outcome in place");
        }
        None if options.now && outcome.mr.is_ready() => {
            println!("✓ Error cleared (ready)");
            println!("  Target already claimed; will be processed on a later cycle");
        }
        None if options.now => println!(
            "✓ Error cleared ({}, {} unresolved blockers)",
            outcome.mr.status, outcome.mr.blocked_by_count
        ),
        None => {
            println!("✓ Merge request queued for retry");
            println!("  Will be processed on next refinery cycle");
        }
    }
    Ok(())
}

pub async fn reject(config: &RigConfig, options: &RejectOptions) -> Result<()> {
    let services = Services::connect(config).await?;
    let outcome = services
        .manager()
        .reject(&options.selector, &options.reason, options.notify)
        .await?;
    print!("{}", reject_text(&outcome, &options.reason));
    Ok(())
}

pub async fn submit(config: &RigConfig, options: &SubmitOptions) -> Result<()> {
    let services = Services::connect(config).await?;

    let title = options
        .title
        .clone()
        .unwrap_or_else(|| options.branch.clone());
    let mut ticket = NewTicket::merge_request(
        title,
        options.branch.as_str(),
        options.target.as_str(),
        options.worker.as_str(),
    );
    if let Some(issue) = &options.issue {
        ticket = ticket.with_issue(issue.clone());
    }
    if let Some(priority) = options.priority {
        ticket = ticket.with_priority(priority);
    }
    for blocker in &options.blocked_by {
        ticket = ticket.blocked_by(blocker.clone());
    }

    let created = services.store.create(ticket).await?;
    println!("✓ Submitted: {}", created.id);
    println!("  Branch:  {} -> {}", options.branch, options.target);
    println!("  Worker:  {}", options.worker);
    println!("  Priority: P{}", created.priority);

    let queue = services
        .manager()
        .list(&QueueFilter {
            target: Some(options.target.clone()),
            ..QueueFilter::new()
        })
        .await?;
    if let Some(index) = queue.iter().position(|mr| mr.id == created.id) {
        println!(
            "  Queue position: {} of {} for {}",
            index + 1,
            queue.len(),
            options.target
        );
    }
    Ok(())
}

fn show_text(mr: &MergeRequest, now: DateTime<Utc>) -> String {
    let mut out = format!("{}  {}  P{}\n", mr.id, mr.status, mr.priority);
    out.push_str(&format!("  Title:   {}\n", mr.title));
    out.push_str(&format!("  Branch:  {} -> {}\n", mr.branch, mr.target));
    out.push_str(&format!("  Worker:  {}\n", mr.worker));
    if let Some(issue) = &mr.issue_id {
        out.push_str(&format!("  Issue:   {issue}\n"));
    }
    if let Some(error) = &mr.error {
        out.push_str(&format!("  Error:   {error}\n"));
    }
    if mr.blocked_by_count > 0 {
        let names = if mr.blocked_by.is_empty() {
            "external dependency".to_string()
        } else {
            mr.blocked_by
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.push_str(&format!(
            "  Blocked by: {names} ({} unresolved)\n",
            mr.blocked_by_count
        ));
    }
    out.push_str(&format!("  Created: {} ago\n", format_age(mr.created_at, now)));
    out
}

fn reject_text(outcome: &RejectOutcome, reason: &str) -> String {
    let mut out = format!("✗ Rejected: {}\n", outcome.branch);
    out.push_str(&format!("  Worker: {}\n", outcome.worker));
    out.push_str(&format!("  Reason: {reason}\n"));
    if let Some(issue) = &outcome.issue_id {
        out.push_str(&format!("  Issue:  {issue} (not closed - work not done)\n"));
    }
    if outcome.notified {
        out.push_str("  Worker notified via mail\n");
    }
    out
}
