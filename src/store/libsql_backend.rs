//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All uniqueness guarantees
//! (ledger rows, account prefixes, automated job dedupe) live in the schema,
//! not in application code; this backend only translates constraint
//! violations into `DatabaseError::Constraint` so callers can branch on them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::model::{
    Account, Classification, EventType, Job, JobSource, JobStatus, Notification,
    NotificationKind, ProcessedEmail, ReviewReason,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a libsql error, surfacing uniqueness violations as `Constraint`.
fn map_sql_err(e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(msg)
    } else {
        DatabaseError::Query(msg)
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Cutoff timestamp for retention sweeps, as the stored RFC 3339 format.
fn retention_cutoff(older_than: Duration) -> String {
    let delta =
        chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::days(36_500));
    (Utc::now() - delta).to_rfc3339()
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Escape LIKE wildcards in user-derived match text.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

const ACCOUNT_COLUMNS: &str = "id, name, email, inbound_prefix, created_at, updated_at";

fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        inbound_prefix: row.get(3)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const JOB_COLUMNS: &str = "id, account_id, title, company, location, status, source, \
                           source_id, source_url, applied_at, created_at, updated_at";

fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let status: String = row.get(5)?;
    let source: String = row.get(6)?;
    let applied: String = row.get(9)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;
    Ok(Job {
        id: row.get(0)?,
        account_id: row.get(1)?,
        title: row.get(2)?,
        company: row.get::<String>(3).ok(),
        location: row.get::<String>(4).ok(),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Applied),
        source: JobSource::parse(&source).unwrap_or(JobSource::Manual),
        source_id: row.get::<String>(7).ok(),
        source_url: row.get::<String>(8).ok(),
        applied_at: parse_datetime(&applied),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const LEDGER_COLUMNS: &str = "id, account_id, email_id, email_hash, from_addr, subject, \
                              event_type, needs_review, review_reason, snippet, \
                              cached_classification, created_at, updated_at";

fn row_to_processed_email(row: &libsql::Row) -> Result<ProcessedEmail, libsql::Error> {
    let needs_review: i64 = row.get(7)?;
    let created: String = row.get(11)?;
    let updated: String = row.get(12)?;
    Ok(ProcessedEmail {
        id: row.get(0)?,
        account_id: row.get(1)?,
        email_id: row.get(2)?,
        email_hash: row.get::<String>(3).ok(),
        from_addr: row.get::<String>(4).ok(),
        subject: row.get::<String>(5).ok(),
        event_type: row
            .get::<String>(6)
            .ok()
            .and_then(|s| parse_event_type(&s)),
        needs_review: needs_review != 0,
        review_reason: row.get::<String>(8).ok().and_then(|s| ReviewReason::parse(&s)),
        snippet: row.get::<String>(9).ok(),
        cached_classification: row
            .get::<String>(10)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn parse_event_type(s: &str) -> Option<EventType> {
    match s {
        "application_confirmed" => Some(EventType::ApplicationConfirmed),
        "interview" => Some(EventType::Interview),
        "offer" => Some(EventType::Offer),
        "rejection" => Some(EventType::Rejection),
        "other" => Some(EventType::Other),
        _ => None,
    }
}

const NOTIFICATION_COLUMNS: &str = "id, account_id, message, link, kind, read, created_at";

fn row_to_notification(row: &libsql::Row) -> Result<Notification, libsql::Error> {
    let kind: String = row.get(4)?;
    let read: i64 = row.get(5)?;
    let created: String = row.get(6)?;
    Ok(Notification {
        id: row.get(0)?,
        account_id: row.get(1)?,
        message: row.get(2)?,
        link: row.get::<String>(3).ok(),
        kind: NotificationKind::parse(&kind).unwrap_or(NotificationKind::System),
        read: read != 0,
        created_at: parse_datetime(&created),
    })
}

/// Read at most one mapped row from a query result.
async fn fetch_optional<T>(
    mut rows: libsql::Rows,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await.map_err(map_sql_err)? {
        Some(row) => Ok(Some(map(&row).map_err(map_sql_err)?)),
        None => Ok(None),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO accounts (id, name, email, inbound_prefix, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    account.id.as_str(),
                    account.name.as_str(),
                    account.email.as_str(),
                    account.inbound_prefix.as_str(),
                    account.created_at.to_rfc3339(),
                    account.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        debug!(account_id = %account.id, "Account inserted");
        Ok(())
    }

    async fn account_by_inbound_prefix(
        &self,
        prefixes: &[String],
    ) -> Result<Option<Account>, DatabaseError> {
        for prefix in prefixes {
            let rows = self
                .conn()
                .query(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE inbound_prefix = ?1"),
                    params![prefix.as_str()],
                )
                .await
                .map_err(map_sql_err)?;
            if let Some(account) = fetch_optional(rows, row_to_account).await? {
                return Ok(Some(account));
            }
        }
        Ok(None)
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = LOWER(?1)"),
                params![email],
            )
            .await
            .map_err(map_sql_err)?;
        fetch_optional(rows, row_to_account).await
    }

    // ── Idempotency ledger ──────────────────────────────────────────

    async fn processed_email(
        &self,
        account_id: &str,
        email_id: &str,
    ) -> Result<Option<ProcessedEmail>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM processed_emails
                     WHERE account_id = ?1 AND email_id = ?2"
                ),
                params![account_id, email_id],
            )
            .await
            .map_err(map_sql_err)?;
        fetch_optional(rows, row_to_processed_email).await
    }

    async fn insert_processed_email(
        &self,
        account_id: &str,
        email_id: &str,
        email_hash: Option<&str>,
        from_addr: &str,
        subject: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO processed_emails
                     (id, account_id, email_id, email_hash, from_addr, subject,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    account_id,
                    email_id,
                    opt_text(email_hash),
                    from_addr,
                    subject,
                    now,
                ],
            )
            .await
            .map_err(map_sql_err)?;
        debug!(account_id, email_id, "Ledger entry created");
        Ok(())
    }

    async fn cached_classification(
        &self,
        account_id: &str,
        email_hash: &str,
    ) -> Result<Option<Classification>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT cached_classification FROM processed_emails
                 WHERE account_id = ?1 AND email_hash = ?2
                   AND cached_classification IS NOT NULL
                 ORDER BY created_at DESC LIMIT 1",
                params![account_id, email_hash],
            )
            .await
            .map_err(map_sql_err)?;

        match rows.next().await.map_err(map_sql_err)? {
            Some(row) => {
                let json: String = row.get(0).map_err(map_sql_err)?;
                Ok(serde_json::from_str(&json).ok())
            }
            None => Ok(None),
        }
    }

    async fn store_classification(
        &self,
        account_id: &str,
        email_id: &str,
        classification: &Classification,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(classification)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "UPDATE processed_emails
                 SET cached_classification = ?3, event_type = ?4, updated_at = ?5
                 WHERE account_id = ?1 AND email_id = ?2",
                params![
                    account_id,
                    email_id,
                    json,
                    classification.event_type.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(())
    }

    async fn mark_needs_review(
        &self,
        account_id: &str,
        email_id: &str,
        reason: ReviewReason,
        event_type: Option<EventType>,
        snippet: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE processed_emails
                 SET needs_review = 1, review_reason = ?3, event_type = ?4,
                     snippet = ?5, updated_at = ?6
                 WHERE account_id = ?1 AND email_id = ?2",
                params![
                    account_id,
                    email_id,
                    reason.as_str(),
                    opt_text(event_type.map(EventType::as_str)),
                    snippet,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        debug!(account_id, email_id, reason = reason.as_str(), "Ledger entry flagged for review");
        Ok(())
    }

    async fn prune_processed_emails(&self, older_than: Duration) -> Result<usize, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM processed_emails WHERE created_at < ?1",
                params![retention_cutoff(older_than)],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(removed as usize)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO jobs (id, account_id, title, company, location, status, source,
                                   source_id, source_url, applied_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    job.id.as_str(),
                    job.account_id.as_str(),
                    job.title.as_str(),
                    opt_text(job.company.as_deref()),
                    opt_text(job.location.as_deref()),
                    job.status.as_str(),
                    job.source.as_str(),
                    opt_text(job.source_id.as_deref()),
                    opt_text(job.source_url.as_deref()),
                    job.applied_at.to_rfc3339(),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        debug!(job_id = %job.id, title = %job.title, "Job inserted");
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE jobs
                 SET title = ?3, company = ?4, location = ?5, status = ?6,
                     source_url = ?7, updated_at = ?8
                 WHERE account_id = ?1 AND id = ?2",
                params![
                    job.account_id.as_str(),
                    job.id.as_str(),
                    job.title.as_str(),
                    opt_text(job.company.as_deref()),
                    opt_text(job.location.as_deref()),
                    job.status.as_str(),
                    opt_text(job.source_url.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(())
    }

    async fn get_job(
        &self,
        account_id: &str,
        job_id: &str,
    ) -> Result<Option<Job>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE account_id = ?1 AND id = ?2"),
                params![account_id, job_id],
            )
            .await
            .map_err(map_sql_err)?;
        fetch_optional(rows, row_to_job).await
    }

    async fn jobs_for_account(&self, account_id: &str) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE account_id = ?1 ORDER BY created_at DESC"
                ),
                params![account_id],
            )
            .await
            .map_err(map_sql_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql_err)? {
            jobs.push(row_to_job(&row).map_err(map_sql_err)?);
        }
        Ok(jobs)
    }

    async fn job_by_source_url(
        &self,
        account_id: &str,
        url: &str,
    ) -> Result<Option<Job>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE account_id = ?1 AND source_url = ?2
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![account_id, url],
            )
            .await
            .map_err(map_sql_err)?;
        fetch_optional(rows, row_to_job).await
    }

    async fn job_by_company_title(
        &self,
        account_id: &str,
        company: &str,
        title: &str,
    ) -> Result<Option<Job>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE account_id = ?1
                       AND company IS NOT NULL AND LOWER(company) = LOWER(?2)
                       AND LOWER(title) LIKE '%' || ?3 || '%' ESCAPE '\\'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![account_id, company, escape_like(&title.to_lowercase())],
            )
            .await
            .map_err(map_sql_err)?;
        fetch_optional(rows, row_to_job).await
    }

    async fn job_by_company(
        &self,
        account_id: &str,
        company: &str,
        open_only: bool,
    ) -> Result<Option<Job>, DatabaseError> {
        let status_filter = if open_only {
            "AND status IN ('applied', 'interview')"
        } else {
            ""
        };
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE account_id = ?1
                       AND company IS NOT NULL
                       AND LOWER(company) LIKE '%' || ?2 || '%' ESCAPE '\\'
                       {status_filter}
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![account_id, escape_like(&company.to_lowercase())],
            )
            .await
            .map_err(map_sql_err)?;
        fetch_optional(rows, row_to_job).await
    }

    // ── Notifications ───────────────────────────────────────────────

    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO notifications (id, account_id, message, link, kind, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    notification.id.as_str(),
                    notification.account_id.as_str(),
                    notification.message.as_str(),
                    opt_text(notification.link.as_deref()),
                    notification.kind.as_str(),
                    notification.read as i64,
                    notification.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(())
    }

    async fn notifications_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Notification>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                     WHERE account_id = ?1 ORDER BY created_at DESC"
                ),
                params![account_id],
            )
            .await
            .map_err(map_sql_err)?;

        let mut notifications = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql_err)? {
            notifications.push(row_to_notification(&row).map_err(map_sql_err)?);
        }
        Ok(notifications)
    }

    async fn prune_notifications(&self, older_than: Duration) -> Result<usize, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM notifications WHERE created_at < ?1",
                params![retention_cutoff(older_than)],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(removed as usize)
    }
}
