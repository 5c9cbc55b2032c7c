//! Pipeline configuration.

use std::time::Duration;

/// Tunables for the email processing pipeline.
///
/// The three confidence thresholds are deliberately independent: dropping an
/// event costs nothing, creating a job is cheap to undo, mutating an existing
/// job rewrites user-visible state. They can each be overridden from the
/// environment without touching the others.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Classifications below this confidence are recorded and ignored.
    pub ignore_threshold: f32,
    /// Minimum confidence to create a new job from a confirmed application.
    pub create_threshold: f32,
    /// Minimum confidence to mutate an existing job.
    pub mutate_threshold: f32,
    /// Hard budget for the AI fallback call; the in-flight request is
    /// cancelled on expiry.
    pub ai_timeout: Duration,
    /// Character budget for classifier input.
    pub clip_chars: usize,
    /// Character budget for the content-hash input.
    pub hash_clip_chars: usize,
    /// Character budget for the review snippet stored on the ledger.
    pub snippet_chars: usize,
    /// Idempotency-ledger retention window.
    pub ledger_retention: Duration,
    /// Notification retention window.
    pub notification_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ignore_threshold: 0.60,
            create_threshold: 0.70,
            mutate_threshold: 0.75,
            ai_timeout: Duration::from_secs(9),
            clip_chars: 16_000,
            hash_clip_chars: 20_000,
            snippet_chars: 400,
            ledger_retention: Duration::from_secs(60 * 60 * 24 * 90),
            notification_retention: Duration::from_secs(60 * 60 * 24),
        }
    }
}

impl PipelineConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ignore_threshold: env_f32("JOBTRAIL_IGNORE_THRESHOLD", defaults.ignore_threshold),
            create_threshold: env_f32("JOBTRAIL_CREATE_THRESHOLD", defaults.create_threshold),
            mutate_threshold: env_f32("JOBTRAIL_MUTATE_THRESHOLD", defaults.mutate_threshold),
            ai_timeout: Duration::from_millis(env_u64(
                "JOBTRAIL_AI_TIMEOUT_MS",
                defaults.ai_timeout.as_millis() as u64,
            )),
            ledger_retention: Duration::from_secs(
                env_u64(
                    "JOBTRAIL_LEDGER_RETENTION_DAYS",
                    defaults.ledger_retention.as_secs() / 86_400,
                ) * 86_400,
            ),
            ..defaults
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
