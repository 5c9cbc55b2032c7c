//! Domain types shared across the pipeline.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Job status ──────────────────────────────────────────────────────

/// Lifecycle status of a tracked job application.
///
/// `Applied < Interview < Offer` form a ranked chain; `Rejected` is a
/// terminal state outside the chain, reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Applied,
    Interview,
    Offer,
    Rejected,
}

impl JobStatus {
    /// Position in the ranked chain, `None` for the terminal state.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Applied => Some(1),
            Self::Interview => Some(2),
            Self::Offer => Some(3),
            Self::Rejected => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Interview => "interview",
            Self::Offer => "offer",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "interview" => Some(Self::Interview),
            "offer" => Some(Self::Offer),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

// ── Classification ──────────────────────────────────────────────────

/// What kind of job event an email describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ApplicationConfirmed,
    Interview,
    Offer,
    Rejection,
    Other,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApplicationConfirmed => "application_confirmed",
            Self::Interview => "interview",
            Self::Offer => "offer",
            Self::Rejection => "rejection",
            Self::Other => "other",
        }
    }

    /// Update-type events mutate an existing job rather than create one.
    pub fn is_update(self) -> bool {
        !matches!(self, Self::ApplicationConfirmed)
    }
}

/// Structured result of classifying one email.
///
/// This is the closed internal shape for both template and AI results;
/// anything the model returns that does not fit is nulled out at the parse
/// boundary rather than propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub is_job_related: bool,
    pub event_type: EventType,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub next_status: Option<JobStatus>,
    #[serde(default)]
    pub job_url: Option<String>,
    pub confidence: f32,
    /// Which rule or backend produced this result. Diagnostic only.
    pub provider: String,
}

// ── Account ─────────────────────────────────────────────────────────

/// Length of the generated inbound routing token.
const INBOUND_PREFIX_LEN: usize = 8;

/// An owning account for jobs, notifications and ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Unique routing token; the local part of the account's inbound
    /// address. Immutable once assigned.
    pub inbound_prefix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with a freshly generated inbound prefix.
    pub fn new(name: &str, email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_lowercase(),
            inbound_prefix: generate_inbound_prefix(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Generate a random lowercase alphanumeric routing token.
fn generate_inbound_prefix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..INBOUND_PREFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

// ── Job ─────────────────────────────────────────────────────────────

/// Where a job record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Manual,
    Linkedin,
    Email,
}

impl JobSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Linkedin => "linkedin",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "linkedin" => Some(Self::Linkedin),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// A tracked job application.
///
/// `company` is nullable: a confirmed application with a valid title but an
/// unextractable company still gets tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub status: JobStatus,
    pub source: JobSource,
    /// External message id for automated sources; backs the storage-level
    /// duplicate-creation guard.
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Idempotency ledger ──────────────────────────────────────────────

/// Why a ledger entry was deferred to human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    NoMatchingJobForUpdateEvent,
    MissingCompanyAndTitleOnCreate,
    RegressiveStatusTransition,
}

impl ReviewReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoMatchingJobForUpdateEvent => "no_matching_job_for_update_event",
            Self::MissingCompanyAndTitleOnCreate => "missing_company_and_title_on_create",
            Self::RegressiveStatusTransition => "regressive_status_transition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_matching_job_for_update_event" => Some(Self::NoMatchingJobForUpdateEvent),
            "missing_company_and_title_on_create" => Some(Self::MissingCompanyAndTitleOnCreate),
            "regressive_status_transition" => Some(Self::RegressiveStatusTransition),
            _ => None,
        }
    }
}

/// One row of the idempotency ledger: exactly one per delivered external
/// message per account, enforced by a unique constraint.
#[derive(Debug, Clone)]
pub struct ProcessedEmail {
    pub id: String,
    pub account_id: String,
    pub email_id: String,
    /// Content hash of the clipped normalized subject+body; keys the
    /// classification cache.
    pub email_hash: Option<String>,
    pub from_addr: Option<String>,
    pub subject: Option<String>,
    pub event_type: Option<EventType>,
    pub needs_review: bool,
    pub review_reason: Option<ReviewReason>,
    pub snippet: Option<String>,
    pub cached_classification: Option<Classification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    System,
    Job,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Job => "job",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "job" => Some(Self::Job),
            _ => None,
        }
    }
}

/// A persisted, fire-and-forget notification consumed by the delivery
/// channel. Subject to TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub account_id: String,
    pub message: String,
    pub link: Option<String>,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// The wire payload pushed to live notification subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub kind: NotificationKind,
}
