//! Backend-agnostic `Database` trait — single async interface for all
//! persistence: accounts, jobs, the idempotency ledger and notifications.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{
    Account, Classification, EventType, Job, Notification, ProcessedEmail, ReviewReason,
};

#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    /// Insert a new account. Fails with `Constraint` on a duplicate email
    /// or inbound prefix.
    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError>;

    /// Look up an account whose inbound prefix matches any of `prefixes`.
    async fn account_by_inbound_prefix(
        &self,
        prefixes: &[String],
    ) -> Result<Option<Account>, DatabaseError>;

    /// Look up an account by its (lowercased) email address.
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError>;

    // ── Idempotency ledger ──────────────────────────────────────────

    /// Look up the ledger row for `(account_id, email_id)`.
    async fn processed_email(
        &self,
        account_id: &str,
        email_id: &str,
    ) -> Result<Option<ProcessedEmail>, DatabaseError>;

    /// Record that an external message is being processed.
    ///
    /// Returns `Constraint` when the row already exists; callers treat
    /// that identically to a lookup hit (the race-safe half of the
    /// idempotency guard).
    async fn insert_processed_email(
        &self,
        account_id: &str,
        email_id: &str,
        email_hash: Option<&str>,
        from_addr: &str,
        subject: &str,
    ) -> Result<(), DatabaseError>;

    /// Look up a cached classification for `(account_id, email_hash)`.
    ///
    /// May hit a *different* message's ledger row with the same content
    /// hash; that is the point of the cache.
    async fn cached_classification(
        &self,
        account_id: &str,
        email_hash: &str,
    ) -> Result<Option<Classification>, DatabaseError>;

    /// Attach a classification snapshot to a ledger row (cache write).
    async fn store_classification(
        &self,
        account_id: &str,
        email_id: &str,
        classification: &Classification,
    ) -> Result<(), DatabaseError>;

    /// Flag a ledger row for human review.
    async fn mark_needs_review(
        &self,
        account_id: &str,
        email_id: &str,
        reason: ReviewReason,
        event_type: Option<EventType>,
        snippet: &str,
    ) -> Result<(), DatabaseError>;

    /// Delete ledger rows older than the retention window. Returns the
    /// number of rows removed. Storage hygiene only, not correctness.
    async fn prune_processed_emails(&self, older_than: Duration) -> Result<usize, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new job. Fails with `Constraint` when `(account, source,
    /// source_id)` already exists for an automated source.
    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Persist changed fields of an existing job.
    async fn update_job(&self, job: &Job) -> Result<(), DatabaseError>;

    async fn get_job(&self, account_id: &str, job_id: &str)
    -> Result<Option<Job>, DatabaseError>;

    /// All jobs for an account, most recent first.
    async fn jobs_for_account(&self, account_id: &str) -> Result<Vec<Job>, DatabaseError>;

    /// Exact source-URL match, most recent first.
    async fn job_by_source_url(
        &self,
        account_id: &str,
        url: &str,
    ) -> Result<Option<Job>, DatabaseError>;

    /// Company exact (case-insensitive) AND title contains
    /// (case-insensitive), most recent first.
    async fn job_by_company_title(
        &self,
        account_id: &str,
        company: &str,
        title: &str,
    ) -> Result<Option<Job>, DatabaseError>;

    /// Company contains (case-insensitive), most recent first. With
    /// `open_only`, restricted to `applied`/`interview` status.
    async fn job_by_company(
        &self,
        account_id: &str,
        company: &str,
        open_only: bool,
    ) -> Result<Option<Job>, DatabaseError>;

    // ── Notifications ───────────────────────────────────────────────

    async fn insert_notification(&self, notification: &Notification)
    -> Result<(), DatabaseError>;

    /// All notifications for an account, newest first.
    async fn notifications_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Notification>, DatabaseError>;

    /// Delete notifications older than the retention window.
    async fn prune_notifications(&self, older_than: Duration) -> Result<usize, DatabaseError>;
}
