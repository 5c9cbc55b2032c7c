//! Email pipeline — orchestrates one webhook event end to end.
//!
//! Flow (strictly sequential within one run):
//! 1. fetch content (or synthesize for simulated events)
//! 2. normalize text
//! 3. resolve owning account (no match → no-op success)
//! 4. Gmail forwarding verification short-circuit
//! 5. idempotency guard: ledger lookup, then atomic insert (a unique
//!    violation from a racing delivery is a duplicate, not an error)
//! 6. classify: templates → content-hash cache → AI fallback
//! 7. confidence gate
//! 8. resolve target job
//! 9. guarded transition: create / update / defer to review
//! 10. side effects: persist, notify (push is best-effort)
//!
//! Classification failures never fail the webhook; only fetch and storage
//! errors propagate.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::clean::{is_valid_company, is_valid_title};
use crate::classify::{AiClassifier, TemplateClassifier};
use crate::config::PipelineConfig;
use crate::error::{NotifyError, PipelineError};
use crate::fetch::{FetchedEmail, MailFetcher};
use crate::llm::LlmProvider;
use crate::model::{
    Account, Classification, EventType, Job, JobSource, JobStatus, Notification,
    NotificationKind, NotificationPayload, ReviewReason,
};
use crate::normalize::{
    clip_text, content_hash, extract_email, normalize_whitespace, strip_html, strip_noise_blocks,
};
use crate::notify::NotificationChannel;
use crate::pipeline::account::resolve_account;
use crate::pipeline::jobmatch::find_target_job;
use crate::pipeline::transition::{StatusDecision, decide_status};
use crate::store::Database;

/// External ids with this prefix skip the upstream fetch and use canned
/// LinkedIn-style content. Used by smoke tests.
const SIMULATED_ID_PREFIX: &str = "test_sim_";

static GMAIL_FORWARDING_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://mail(?:-settings)?\.google\.com/mail/v[fu]-[^\s>"]+"#).unwrap()
});

/// One inbound webhook event, already validated by the handler.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub email_id: String,
    pub test_email: Option<String>,
}

/// Business outcome of one pipeline run. Every variant maps to a 200
/// response with a discriminating payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No account owns this message. Expected for spam/misdirected mail.
    NoAccountMatch,
    /// Gmail forwarding-confirmation mail; notification raised.
    ForwardingVerification,
    /// This external message was already processed.
    Duplicate,
    /// Recorded on the ledger but caused no further side effects.
    Ignored { confidence: f32 },
    /// Deferred to human review; ledger flagged, notification raised.
    NeedsReview {
        reason: ReviewReason,
        event_type: Option<EventType>,
    },
    /// A new job was created.
    Created { job_id: String },
    /// An existing job was found; `changed` says whether anything was
    /// actually written.
    Updated { job_id: String, changed: bool },
}

impl PipelineOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoAccountMatch => "no_account_match",
            Self::ForwardingVerification => "forwarding_verification",
            Self::Duplicate => "duplicate",
            Self::Ignored { .. } => "ignored",
            Self::NeedsReview { .. } => "needs_review",
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
        }
    }
}

/// The email processing pipeline.
///
/// Holds trait-object ports for storage, mail fetch, LLM and notification
/// delivery; tests substitute all four.
pub struct EmailPipeline {
    db: Arc<dyn Database>,
    fetcher: Arc<dyn MailFetcher>,
    notifier: Arc<dyn NotificationChannel>,
    templates: TemplateClassifier,
    ai: AiClassifier,
    config: PipelineConfig,
}

impl EmailPipeline {
    pub fn new(
        db: Arc<dyn Database>,
        fetcher: Arc<dyn MailFetcher>,
        notifier: Arc<dyn NotificationChannel>,
        llm: Arc<dyn LlmProvider>,
        config: PipelineConfig,
    ) -> Self {
        let ai = AiClassifier::new(llm, config.ai_timeout);
        Self {
            db,
            fetcher,
            notifier,
            templates: TemplateClassifier::new(),
            ai,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a single webhook event through the full pipeline.
    pub async fn process(&self, event: &WebhookEvent) -> Result<PipelineOutcome, PipelineError> {
        let email = if event.email_id.starts_with(SIMULATED_ID_PREFIX) {
            simulated_email(event)
        } else {
            self.fetcher.fetch(&event.email_id).await?
        };

        let raw_text = match email.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => strip_html(email.html.as_deref().unwrap_or_default()),
        };
        let text = strip_noise_blocks(&raw_text);
        let subject = email.subject.clone();
        let from = extract_email(&email.from);

        let Some(account) = resolve_account(self.db.as_ref(), &email).await? else {
            info!(
                email_id = %event.email_id,
                from = %from,
                "No account matched inbound email"
            );
            return Ok(PipelineOutcome::NoAccountMatch);
        };

        if self.handle_gmail_forwarding(&account, &from, &text).await? {
            return Ok(PipelineOutcome::ForwardingVerification);
        }

        // Idempotency guard: lookup first (cheap), then the atomic insert.
        // The unique constraint is the real guard; the lookup is only an
        // optimization.
        if self
            .db
            .processed_email(&account.id, &event.email_id)
            .await?
            .is_some()
        {
            info!(email_id = %event.email_id, account_id = %account.id, "Duplicate email event");
            return Ok(PipelineOutcome::Duplicate);
        }

        let email_hash = content_hash(&subject, &text, self.config.hash_clip_chars);
        match self
            .db
            .insert_processed_email(&account.id, &event.email_id, Some(&email_hash), &from, &subject)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                info!(
                    email_id = %event.email_id,
                    account_id = %account.id,
                    "Concurrent duplicate delivery lost the insert race"
                );
                return Ok(PipelineOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        let clipped = clip_text(&text, self.config.clip_chars);
        let Some(classification) = self
            .classify(&account, &event.email_id, &subject, clipped, &from, &email_hash)
            .await?
        else {
            return Ok(PipelineOutcome::Ignored { confidence: 0.0 });
        };

        let confidence = classification.confidence;
        if !classification.is_job_related || confidence < self.config.ignore_threshold {
            debug!(
                email_id = %event.email_id,
                confidence,
                is_job_related = classification.is_job_related,
                "Classification below ignore threshold"
            );
            return Ok(PipelineOutcome::Ignored { confidence });
        }

        let job = find_target_job(self.db.as_ref(), &account.id, &classification).await?;
        let outcome = self
            .apply_transition(&account, event, &classification, job, &text)
            .await?;

        info!(
            email_id = %event.email_id,
            account_id = %account.id,
            outcome = outcome.label(),
            provider = %classification.provider,
            confidence,
            "Email event processed"
        );
        Ok(outcome)
    }

    /// Template rules, then the content-hash cache, then the AI fallback.
    /// AI failures are absorbed: the event is recorded and ignored.
    async fn classify(
        &self,
        account: &Account,
        email_id: &str,
        subject: &str,
        clipped_text: &str,
        from: &str,
        email_hash: &str,
    ) -> Result<Option<Classification>, PipelineError> {
        if let Some(c) = self.templates.classify(subject, clipped_text, from) {
            return Ok(Some(c));
        }

        if let Some(cached) = self.db.cached_classification(&account.id, email_hash).await? {
            debug!(email_id, "Classification cache hit");
            return Ok(Some(cached));
        }

        match self.ai.classify(subject, clipped_text).await {
            Ok(c) => {
                self.db
                    .store_classification(&account.id, email_id, &c)
                    .await?;
                Ok(Some(c))
            }
            Err(e) => {
                warn!(email_id, error = %e, "AI classification failed; ignoring event");
                Ok(None)
            }
        }
    }

    /// Decide and apply create-vs-update-vs-review.
    async fn apply_transition(
        &self,
        account: &Account,
        event: &WebhookEvent,
        classification: &Classification,
        job: Option<Job>,
        text: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        let should_create = classification.event_type == EventType::ApplicationConfirmed;

        let Some(mut job) = job else {
            if !should_create {
                // An update-type event with nothing to update.
                return self
                    .defer_to_review(
                        account,
                        event,
                        classification,
                        ReviewReason::NoMatchingJobForUpdateEvent,
                        text,
                        format!(
                            "Action needed: we detected a {} email but couldn't match it to an existing job.",
                            classification.event_type.as_str()
                        ),
                    )
                    .await;
            }

            if classification.confidence < self.config.create_threshold {
                debug!(
                    email_id = %event.email_id,
                    confidence = classification.confidence,
                    "Confirmed application below creation threshold"
                );
                return Ok(PipelineOutcome::Ignored {
                    confidence: classification.confidence,
                });
            }

            let ok_company = is_valid_company(classification.company.as_deref());
            let ok_title = is_valid_title(classification.job_title.as_deref());
            if !ok_company && !ok_title {
                return self
                    .defer_to_review(
                        account,
                        event,
                        classification,
                        ReviewReason::MissingCompanyAndTitleOnCreate,
                        text,
                        "Action needed: we detected a job application email but couldn't \
                         confidently extract the company or title."
                            .to_string(),
                    )
                    .await;
            }

            return self.create_job(account, event, classification, ok_company).await;
        };

        if classification.confidence < self.config.mutate_threshold {
            debug!(
                email_id = %event.email_id,
                job_id = %job.id,
                confidence = classification.confidence,
                "Update below mutation threshold"
            );
            return Ok(PipelineOutcome::Ignored {
                confidence: classification.confidence,
            });
        }

        // Fill only previously-null fields; never overwrite user data.
        let mut changed = false;
        if job.location.is_none()
            && let Some(ref location) = classification.location
        {
            job.location = Some(location.clone());
            changed = true;
        }
        if job.source_url.is_none()
            && let Some(ref url) = classification.job_url
        {
            job.source_url = Some(url.clone());
            changed = true;
        }

        let decision = decide_status(job.status, classification.next_status);
        if let StatusDecision::Advance(next) = decision {
            job.status = next;
            changed = true;
        }

        if changed {
            self.db.update_job(&job).await?;
        }

        if let StatusDecision::Regressive(proposed) = decision {
            self.db
                .mark_needs_review(
                    &account.id,
                    &event.email_id,
                    ReviewReason::RegressiveStatusTransition,
                    Some(classification.event_type),
                    clip_text(text, self.config.snippet_chars),
                )
                .await?;
            self.notify(
                account,
                format!(
                    "Action needed: an email suggests moving \"{}\" back to {}; confirm to apply.",
                    job.title,
                    proposed.as_str()
                ),
                Some(review_link(&event.email_id)),
                NotificationKind::System,
            )
            .await?;
            return Ok(PipelineOutcome::NeedsReview {
                reason: ReviewReason::RegressiveStatusTransition,
                event_type: Some(classification.event_type),
            });
        }

        if changed {
            let company = job.company.as_deref().unwrap_or("unknown company");
            self.notify(
                account,
                format!(
                    "Update: {} for {} at {}",
                    classification.event_type.as_str(),
                    job.title,
                    company
                ),
                None,
                NotificationKind::Job,
            )
            .await?;
        }

        Ok(PipelineOutcome::Updated {
            job_id: job.id.clone(),
            changed,
        })
    }

    async fn create_job(
        &self,
        account: &Account,
        event: &WebhookEvent,
        classification: &Classification,
        ok_company: bool,
    ) -> Result<PipelineOutcome, PipelineError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            title: classification
                .job_title
                .clone()
                .unwrap_or_else(|| "Job Application".to_string()),
            company: ok_company.then(|| classification.company.clone()).flatten(),
            location: classification.location.clone(),
            status: classification.next_status.unwrap_or(JobStatus::Applied),
            source: JobSource::Email,
            source_id: Some(event.email_id.clone()),
            source_url: classification.job_url.clone(),
            applied_at: now,
            created_at: now,
            updated_at: now,
        };

        match self.db.insert_job(&job).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                // Second line of defense: the (account, source, source_id)
                // index caught a duplicate that slipped past the ledger.
                info!(email_id = %event.email_id, "Job already created for this source event");
                return Ok(PipelineOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        let suffix = job
            .company
            .as_deref()
            .map(|c| format!(" at {c}"))
            .unwrap_or_default();
        self.notify(
            account,
            format!("New Application Tracked: {}{}", job.title, suffix),
            None,
            NotificationKind::Job,
        )
        .await?;

        info!(job_id = %job.id, title = %job.title, "Job created from email");
        Ok(PipelineOutcome::Created { job_id: job.id })
    }

    /// Flag the ledger row, raise a system notification, respond
    /// success-but-ignored. Explicitly not an error path.
    async fn defer_to_review(
        &self,
        account: &Account,
        event: &WebhookEvent,
        classification: &Classification,
        reason: ReviewReason,
        text: &str,
        message: String,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.db
            .mark_needs_review(
                &account.id,
                &event.email_id,
                reason,
                Some(classification.event_type),
                clip_text(text, self.config.snippet_chars),
            )
            .await?;
        self.notify(
            account,
            message,
            Some(review_link(&event.email_id)),
            NotificationKind::System,
        )
        .await?;
        Ok(PipelineOutcome::NeedsReview {
            reason,
            event_type: Some(classification.event_type),
        })
    }

    /// Gmail sends a confirmation mail with an approval link when a user
    /// sets up forwarding to their inbound address. Surface it as a system
    /// notification before the idempotency guard ever sees the message.
    async fn handle_gmail_forwarding(
        &self,
        account: &Account,
        from: &str,
        text: &str,
    ) -> Result<bool, PipelineError> {
        if !from.to_lowercase().ends_with("@google.com") {
            return Ok(false);
        }
        let flat = normalize_whitespace(text);
        let Some(link) = GMAIL_FORWARDING_LINK.find(&flat) else {
            return Ok(false);
        };

        self.notify(
            account,
            "Action Required: Approve Gmail Forwarding".to_string(),
            Some(link.as_str().to_string()),
            NotificationKind::System,
        )
        .await?;
        info!(account_id = %account.id, "Gmail forwarding verification surfaced");
        Ok(true)
    }

    /// Persist a notification row, then push to live subscribers.
    /// The push is best-effort: a delivery failure is logged, never
    /// surfaced.
    async fn notify(
        &self,
        account: &Account,
        message: String,
        link: Option<String>,
        kind: NotificationKind,
    ) -> Result<(), PipelineError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            message,
            link,
            kind,
            read: false,
            created_at: Utc::now(),
        };
        self.db.insert_notification(&notification).await?;

        let payload = NotificationPayload {
            message: notification.message.clone(),
            link: notification.link.clone(),
            kind: notification.kind,
        };
        match self.notifier.notify(&account.id, &payload).await {
            Ok(()) => {}
            Err(NotifyError::NoSubscriber { .. }) => {
                debug!(account_id = %account.id, "No live subscriber for notification");
            }
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Notification push failed");
            }
        }
        Ok(())
    }
}

fn review_link(email_id: &str) -> String {
    format!("/inbox/review?emailId={email_id}")
}

/// Canned content for `test_sim_` events.
fn simulated_email(event: &WebhookEvent) -> FetchedEmail {
    let to = event
        .test_email
        .clone()
        .unwrap_or_else(|| "demo@inbound.jobtrail.dev".to_string());
    FetchedEmail {
        subject: "Your application was sent to Apptoza Inc.".to_string(),
        text: Some(
            "Your application was sent to Apptoza Inc. Frontend Developer at Apptoza Inc."
                .to_string(),
        ),
        html: None,
        from: "jobs-noreply@linkedin.com".to_string(),
        to: vec![to],
        headers: std::collections::HashMap::new(),
    }
}
