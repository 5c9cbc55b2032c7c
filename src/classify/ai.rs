//! AI fallback classifier.
//!
//! Invoked only when the template rules and the content-hash cache both
//! miss. The call runs under a hard timeout and its output goes through a
//! strict parse/validate step: anything that does not fit the closed
//! [`Classification`] shape is nulled out rather than propagated.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::classify::clean::{clean_company_name, clean_job_title, normalize_url};
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::{Classification, EventType, JobStatus};

/// Max tokens for the classification call. Runs on every uncached miss, so
/// kept tight.
const CLASSIFY_MAX_TOKENS: u32 = 512;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// LLM-backed email classifier with a hard timeout.
pub struct AiClassifier {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl AiClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Classify one email. The in-flight request is cancelled when the
    /// timeout budget expires.
    pub async fn classify(&self, subject: &str, body: &str) -> Result<Classification, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(format!("Subject: {subject}\n\n{body}")),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
        .with_json_response();

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                timeout: self.timeout,
            })??;

        debug!(
            model = self.provider.model_name(),
            output_tokens = response.output_tokens,
            "AI classification response received"
        );

        parse_classification(&response.content)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You parse job-related emails.\n\n\
     Return JSON:\n\
     {\n\
       \"is_job_related\": boolean,\n\
       \"event_type\": \"application_confirmed\"|\"interview\"|\"offer\"|\"rejection\"|\"other\",\n\
       \"company\": string|null,\n\
       \"job_title\": string|null,\n\
       \"location\": string|null,\n\
       \"next_status\": \"applied\"|\"interview\"|\"offer\"|\"rejected\"|null,\n\
       \"job_url\": string|null,\n\
       \"confidence\": number\n\
     }\n\n\
     Rules:\n\
     - \"application_confirmed\" means an application was sent or received.\n\
     - \"rejection\" => next_status rejected\n\
     - \"interview\" => next_status interview\n\
     - \"offer\" => next_status offer\n\
     - If not sure => event_type other, next_status null\n\
     - confidence is 0..1\n\
     - If a field is missing or ambiguous, use null. Never guess."
        .to_string()
}

// ── Response parsing ────────────────────────────────────────────────

/// Lenient deserialization target for whatever the model sends back.
#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    is_job_related: bool,
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    job_title: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    next_status: Option<String>,
    #[serde(default)]
    job_url: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Parse model output into a validated [`Classification`].
///
/// Unknown enum strings become `Other`/`None`, confidence is clamped, and
/// extracted fields run through the same cleaners as template results.
pub fn parse_classification(raw: &str) -> Result<Classification, LlmError> {
    let json_str = extract_json_object(raw);
    let parsed: RawClassification =
        serde_json::from_str(&json_str).map_err(|e| LlmError::InvalidResponse {
            provider: "openai".into(),
            reason: format!("JSON parse error: {e}"),
        })?;

    let event_type = match parsed.event_type.as_str() {
        "application_confirmed" => EventType::ApplicationConfirmed,
        "interview" => EventType::Interview,
        "offer" => EventType::Offer,
        "rejection" => EventType::Rejection,
        _ => EventType::Other,
    };

    Ok(Classification {
        is_job_related: parsed.is_job_related,
        event_type,
        company: parsed.company.as_deref().and_then(clean_company_name),
        job_title: parsed.job_title.as_deref().and_then(clean_job_title),
        location: parsed
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        next_status: parsed.next_status.as_deref().and_then(JobStatus::parse),
        job_url: parsed.job_url.as_deref().and_then(normalize_url),
        confidence: parsed.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        provider: "ai".into(),
    })
}

/// Extract a JSON object from model output (handles markdown fencing and
/// surrounding prose).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::llm::{CompletionResponse, FinishReason};

    struct StubLlm {
        response: String,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 100,
                output_tokens: 50,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn classifier(response: &str) -> AiClassifier {
        AiClassifier::new(
            Arc::new(StubLlm {
                response: response.to_string(),
                delay: None,
            }),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn classifies_valid_response() {
        let c = classifier(
            r#"{"is_job_related": true, "event_type": "interview",
                "company": "Acme Inc. | Careers", "job_title": "Backend Engineer",
                "next_status": "interview", "confidence": 0.82}"#,
        )
        .classify("Interview invite", "Let's talk next week")
        .await
        .unwrap();

        assert!(c.is_job_related);
        assert_eq!(c.event_type, EventType::Interview);
        assert_eq!(c.next_status, Some(JobStatus::Interview));
        // Cleaners run on AI output too
        assert_eq!(c.company.as_deref(), Some("Acme Inc."));
        assert!((c.confidence - 0.82).abs() < 0.01);
        assert_eq!(c.provider, "ai");
    }

    #[tokio::test]
    async fn timeout_cancels_slow_call() {
        let classifier = AiClassifier::new(
            Arc::new(StubLlm {
                response: "{}".into(),
                delay: Some(Duration::from_secs(30)),
            }),
            Duration::from_millis(50),
        );

        let err = classifier.classify("s", "b").await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout { .. }));
    }

    #[test]
    fn unknown_event_type_becomes_other() {
        let c = parse_classification(
            r#"{"is_job_related": true, "event_type": "escalation", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(c.event_type, EventType::Other);
    }

    #[test]
    fn unknown_next_status_becomes_none() {
        let c = parse_classification(
            r#"{"is_job_related": true, "event_type": "other", "next_status": "ghosted",
                "confidence": 0.5}"#,
        )
        .unwrap();
        assert_eq!(c.next_status, None);
    }

    #[test]
    fn confidence_clamped_and_defaulted() {
        let high = parse_classification(
            r#"{"is_job_related": true, "event_type": "offer", "confidence": 1.7}"#,
        )
        .unwrap();
        assert!((high.confidence - 1.0).abs() < f32::EPSILON);

        let missing =
            parse_classification(r#"{"is_job_related": false, "event_type": "other"}"#).unwrap();
        assert!((missing.confidence - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_url_nulled_out() {
        let c = parse_classification(
            r#"{"is_job_related": true, "event_type": "other",
                "job_url": "javascript:alert(1)", "confidence": 0.4}"#,
        )
        .unwrap();
        assert_eq!(c.job_url, None);
    }

    #[test]
    fn parses_markdown_wrapped_response() {
        let raw = "Here is the result:\n```json\n{\"is_job_related\": true, \"event_type\": \"rejection\", \"confidence\": 0.8}\n```";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.event_type, EventType::Rejection);
    }

    #[test]
    fn parses_response_with_surrounding_text() {
        let raw = "Assessment: {\"is_job_related\": false, \"event_type\": \"other\", \"confidence\": 0.2} done.";
        let c = parse_classification(raw).unwrap();
        assert!(!c.is_job_related);
    }

    #[test]
    fn garbage_response_is_an_error() {
        assert!(parse_classification("I could not parse this email.").is_err());
    }
}
