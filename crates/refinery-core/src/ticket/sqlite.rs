//! `SQLite` ticket store.
//!
//! The compare-and-set contract is implemented as a guarded `UPDATE`: the
//! expected status rides in the `WHERE` clause and `rows_affected` tells us
//! whether we won. Zero rows then means either the ticket is gone or
//! another actor moved it, which a follow-up `SELECT` distinguishes.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::{
    Blocker, CloseOutcome, ErrorPatch, NewTicket, RawStatus, StoreError, StoreResult, Ticket,
    TicketId, TicketKind, TicketPatch, TicketQuery, TicketStore,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tickets (
    id            TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    status        TEXT NOT NULL,
    title         TEXT NOT NULL,
    branch        TEXT,
    target        TEXT,
    worker        TEXT,
    issue_id      TEXT,
    error         TEXT,
    priority      INTEGER NOT NULL DEFAULT 2,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    closed_at     TEXT,
    close_outcome TEXT,
    close_reason  TEXT
);
CREATE INDEX IF NOT EXISTS idx_tickets_kind_status ON tickets(kind, status);
CREATE INDEX IF NOT EXISTS idx_tickets_branch ON tickets(branch);
CREATE TABLE IF NOT EXISTS ticket_deps (
    ticket_id   TEXT NOT NULL,
    blocker_ref TEXT NOT NULL,
    PRIMARY KEY (ticket_id, blocker_ref)
);
";

const TICKET_COLUMNS: &str = "id, kind, status, title, branch, target, worker, issue_id, \
     error, priority, created_at, updated_at, closed_at, close_outcome, close_reason";

/// Ticket store backed by a `SQLite` database file.
#[derive(Clone)]
pub struct SqliteTicketStore {
    pool: SqlitePool,
}

impl SqliteTicketStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns `Backend` when the file cannot be opened or the schema
    /// cannot be applied.
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Backend(format!("creating {}: {e}", parent.display())))?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;

        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    async fn fetch(&self, id: &TicketId) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1");
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn require(&self, id: &TicketId) -> StoreResult<Ticket> {
        self.fetch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Map a zero-row guarded write to the right error.
    async fn explain_missed_write(&self, id: &TicketId) -> StoreError {
        match self.fetch(id).await {
            Ok(Some(_)) => StoreError::Conflict(id.clone()),
            Ok(None) => StoreError::NotFound(id.clone()),
            Err(e) => e,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {text:?}: {e}")))
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    kind: String,
    status: String,
    title: String,
    branch: Option<String>,
    target: Option<String>,
    worker: Option<String>,
    issue_id: Option<String>,
    error: Option<String>,
    priority: i64,
    created_at: String,
    updated_at: String,
    closed_at: Option<String>,
    close_outcome: Option<String>,
    close_reason: Option<String>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        let kind = TicketKind::from_str(&row.kind)
            .map_err(|_| StoreError::Backend(format!("unknown ticket kind {:?}", row.kind)))?;
        let status = RawStatus::from_str(&row.status)
            .map_err(|_| StoreError::Backend(format!("unknown ticket status {:?}", row.status)))?;
        Ok(Self {
            id: TicketId::new(row.id),
            kind,
            status,
            title: row.title,
            branch: row.branch,
            target: row.target,
            worker: row.worker,
            issue_id: row.issue_id.map(TicketId::new),
            error: row.error,
            priority: row.priority,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            closed_at: row.closed_at.as_deref().map(parse_ts).transpose()?,
            close_outcome: row.close_outcome,
            close_reason: row.close_reason,
        })
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn create(&self, new: NewTicket) -> StoreResult<Ticket> {
        new.validate()?;
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| TicketId::generate(new.kind));
        let now = fmt_ts(Utc::now());

        let mut tx = self.pool.begin().await?;

        if new.kind == TicketKind::MergeRequest {
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM tickets \
                 WHERE kind = 'merge-request' AND status != 'closed' AND branch = ?1",
            )
            .bind(new.branch.as_deref())
            .fetch_optional(&mut *tx)
            .await?;
            if let Some((existing_id,)) = existing {
                return Err(StoreError::Conflict(TicketId::new(existing_id)));
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO tickets \
             (id, kind, status, title, branch, target, worker, issue_id, priority, created_at, updated_at) \
             VALUES (?1, ?2, 'open', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        )
        .bind(id.as_str())
        .bind(new.kind.to_string())
        .bind(&new.title)
        .bind(new.branch.as_deref())
        .bind(new.target.as_deref())
        .bind(new.worker.as_deref())
        .bind(new.issue_id.as_ref().map(TicketId::as_str))
        .bind(new.priority)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let unique = e
                .as_database_error()
                .is_some_and(sqlx::error::DatabaseError::is_unique_violation);
            return Err(if unique {
                StoreError::Conflict(id)
            } else {
                e.into()
            });
        }

        for reference in &new.blocked_by {
            sqlx::query(
                "INSERT OR IGNORE INTO ticket_deps (ticket_id, blocker_ref) VALUES (?1, ?2)",
            )
            .bind(id.as_str())
            .bind(reference)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.require(&id).await
    }

    async fn get(&self, id: &TicketId) -> StoreResult<Ticket> {
        self.require(id).await
    }

    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
        expect: Option<RawStatus>,
    ) -> StoreResult<Ticket> {
        let mut sql = String::from("UPDATE tickets SET updated_at = ?");
        if patch.status.is_some() {
            sql.push_str(", status = ?, closed_at = ?");
        }
        if patch.title.is_some() {
            sql.push_str(", title = ?");
        }
        if patch.priority.is_some() {
            sql.push_str(", priority = ?");
        }
        match patch.error {
            Some(ErrorPatch::Set(_)) => sql.push_str(", error = ?"),
            Some(ErrorPatch::Clear) => sql.push_str(", error = NULL"),
            None => {}
        }
        sql.push_str(" WHERE id = ?");
        if expect.is_some() {
            sql.push_str(" AND status = ?");
        }

        let now = Utc::now();
        let mut query = sqlx::query(&sql).bind(fmt_ts(now));
        if let Some(status) = patch.status {
            let closed_at = status.is_closed().then(|| fmt_ts(now));
            query = query.bind(status.to_string()).bind(closed_at);
        }
        if let Some(title) = &patch.title {
            query = query.bind(title);
        }
        if let Some(priority) = patch.priority {
            query = query.bind(priority);
        }
        if let Some(ErrorPatch::Set(detail)) = &patch.error {
            query = query.bind(detail);
        }
        query = query.bind(id.as_str());
        if let Some(status) = expect {
            query = query.bind(status.to_string());
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.explain_missed_write(id).await);
        }
        self.require(id).await
    }

    async fn close(
        &self,
        id: &TicketId,
        outcome: CloseOutcome,
        reason: Option<&str>,
        expect: Option<RawStatus>,
    ) -> StoreResult<Ticket> {
        let mut sql = String::from(
            "UPDATE tickets SET status = 'closed', closed_at = ?1, updated_at = ?1, \
             close_outcome = ?2, close_reason = ?3 WHERE id = ?4",
        );
        if expect.is_some() {
            sql.push_str(" AND status = ?5");
        }

        let now = fmt_ts(Utc::now());
        let mut query = sqlx::query(&sql)
            .bind(&now)
            .bind(outcome.to_string())
            .bind(reason)
            .bind(id.as_str());
        if let Some(status) = expect {
            query = query.bind(status.to_string());
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.explain_missed_write(id).await);
        }
        self.require(id).await
    }

    async fn list(&self, query: &TicketQuery) -> StoreResult<Vec<Ticket>> {
        let mut sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE 1 = 1");
        if !query.include_closed {
            sql.push_str(" AND status != 'closed'");
        }
        if query.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.target.is_some() {
            sql.push_str(" AND target = ?");
        }
        if query.worker.is_some() {
            sql.push_str(" AND worker = ?");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut q = sqlx::query_as::<_, TicketRow>(&sql);
        if let Some(kind) = query.kind {
            q = q.bind(kind.to_string());
        }
        if let Some(status) = query.status {
            q = q.bind(status.to_string());
        }
        if let Some(target) = &query.target {
            q = q.bind(target.clone());
        }
        if let Some(worker) = &query.worker {
            q = q.bind(worker.clone());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn blockers(&self, id: &TicketId) -> StoreResult<Vec<Blocker>> {
        self.require(id).await?;

        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT d.blocker_ref, t.status FROM ticket_deps d \
             LEFT JOIN tickets t ON t.id = d.blocker_ref \
             WHERE d.ticket_id = ?1 ORDER BY d.rowid",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(reference, status)| {
                let status = status
                    .as_deref()
                    .map(|s| {
                        RawStatus::from_str(s).map_err(|_| {
                            StoreError::Backend(format!("unknown ticket status {s:?}"))
                        })
                    })
                    .transpose()?;
                Ok(Blocker { reference, status })
            })
            .collect()
    }
}
