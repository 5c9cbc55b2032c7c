//! Provider template classifier — deterministic rules, no LLM.
//!
//! An ordered list of provider-specific patterns over (subject, body,
//! sender). Evaluation order is priority by specificity and is part of the
//! contract: the first matching rule wins and nothing after it runs.
//!
//! 1. LinkedIn application receipt (most specific phrasing)
//! 2. Generic "<Title> position at <Company>" extraction
//! 3. Greenhouse subject template
//! 4. Greenhouse sender/domain + interview keywords
//! 5. Lever "thanks for applying"
//! 6. Workday received-application phrasing
//! 7. Generic rejection keywords
//! 8. Generic interview keywords
//! 9. Generic offer keywords
//!
//! Returns `None` when nothing matches; the caller falls through to the
//! cache and then the AI classifier.

use regex::Regex;
use tracing::debug;

use crate::classify::clean::{clean_company_name, clean_job_title};
use crate::model::{Classification, EventType, JobStatus};

// Fixed per-rule confidences, calibrated by specificity.
const CONF_LINKEDIN_RECEIPT: f32 = 0.95;
const CONF_POSITION_AT_REJECTION: f32 = 0.90;
const CONF_POSITION_AT_UPDATE: f32 = 0.85;
const CONF_POSITION_AT_OTHER: f32 = 0.78;
const CONF_GREENHOUSE_SUBJECT: f32 = 0.90;
const CONF_GREENHOUSE_INTERVIEW: f32 = 0.78;
const CONF_LEVER_THANKS: f32 = 0.88;
const CONF_WORKDAY_CONFIRM: f32 = 0.72;
const CONF_GENERIC_REJECTION: f32 = 0.85;
const CONF_GENERIC_INTERVIEW: f32 = 0.75;
const CONF_GENERIC_OFFER: f32 = 0.75;

/// Template classifier with all rule patterns compiled once.
pub struct TemplateClassifier {
    linkedin_receipt: Regex,
    position_at: Regex,
    greenhouse_subject: Regex,
    greenhouse_domain: Regex,
    lever_thanks: Regex,
    workday: Regex,
    workday_confirm: Regex,
    rejection_keywords: Regex,
    interview_keywords: Regex,
    offer_keywords: Regex,
}

impl TemplateClassifier {
    pub fn new() -> Self {
        Self {
            linkedin_receipt: Regex::new(
                r"(?i)your application was sent to\s+([^.\n\r]+?)(?:\.|\n|$)",
            )
            .unwrap(),
            position_at: Regex::new(r"(?i)interest in (?:the )?(.+?) position at (.+?)(?:\.|\n|$)")
                .unwrap(),
            greenhouse_subject: Regex::new(r"(?i)your application to\s+(.+?)\s+for\s+(.+)")
                .unwrap(),
            greenhouse_domain: Regex::new(r"(?i)greenhouse\.io").unwrap(),
            lever_thanks: Regex::new(r"(?i)thanks for applying to\s+([^\n\r]+?)(?:\.|\n|$)")
                .unwrap(),
            workday: Regex::new(r"(?i)workday").unwrap(),
            workday_confirm: Regex::new(
                r"(?i)(?:application received|thank you for applying|we received your application)",
            )
            .unwrap(),
            rejection_keywords: Regex::new(
                r"(?i)(?:regret to inform|not moving forward|unfortunately|we have decided|we will not be proceeding|declined)",
            )
            .unwrap(),
            interview_keywords: Regex::new(
                r"(?i)(?:interview|phone screen|schedule a call|schedule|availability|calendar invite|video interview)",
            )
            .unwrap(),
            offer_keywords: Regex::new(
                r"(?i)(?:employment offer|offer|compensation|salary|contract|congratulations)",
            )
            .unwrap(),
        }
    }

    /// Run the rule list over one message. First match wins.
    pub fn classify(&self, subject: &str, body: &str, sender: &str) -> Option<Classification> {
        let combined = format!("{subject}\n{body}");

        let result = self
            .linkedin(&combined)
            .or_else(|| self.position_at_company(&combined))
            .or_else(|| self.greenhouse(subject, &combined, sender))
            .or_else(|| self.lever(&combined))
            .or_else(|| self.workday_receipt(&combined))
            .or_else(|| self.generic_keywords(&combined));

        if let Some(ref c) = result {
            debug!(
                provider = %c.provider,
                event_type = c.event_type.as_str(),
                confidence = c.confidence,
                "Template rule matched"
            );
        }
        result
    }

    // Rule 1: LinkedIn "Your application was sent to <Company>".
    fn linkedin(&self, combined: &str) -> Option<Classification> {
        let caps = self.linkedin_receipt.captures(combined)?;
        Some(Classification {
            is_job_related: true,
            event_type: EventType::ApplicationConfirmed,
            next_status: Some(JobStatus::Applied),
            company: clean_company_name(caps[1].trim()),
            job_title: None,
            location: None,
            job_url: None,
            confidence: CONF_LINKEDIN_RECEIPT,
            provider: "linkedin".into(),
        })
    }

    // Rule 2: "interest in (the) <Title> position at <Company>", common to
    // many ATS confirmation, rejection and interview emails. The event type
    // comes from keyword signals in the surrounding text.
    fn position_at_company(&self, combined: &str) -> Option<Classification> {
        let caps = self.position_at.captures(combined)?;
        let job_title = clean_job_title(&caps[1]);
        let company = clean_company_name(&caps[2]);

        let (event_type, next_status, confidence) = if self.rejection_keywords.is_match(combined) {
            (
                EventType::Rejection,
                Some(JobStatus::Rejected),
                CONF_POSITION_AT_REJECTION,
            )
        } else if self.interview_keywords.is_match(combined) {
            (
                EventType::Interview,
                Some(JobStatus::Interview),
                CONF_POSITION_AT_UPDATE,
            )
        } else if self.offer_keywords.is_match(combined) {
            (
                EventType::Offer,
                Some(JobStatus::Offer),
                CONF_POSITION_AT_UPDATE,
            )
        } else {
            (EventType::Other, None, CONF_POSITION_AT_OTHER)
        };

        Some(Classification {
            is_job_related: true,
            event_type,
            next_status,
            company,
            job_title,
            location: None,
            job_url: None,
            confidence,
            provider: "generic_position_at_company".into(),
        })
    }

    // Rules 3+4: Greenhouse subject template, then domain + interview signal.
    fn greenhouse(&self, subject: &str, combined: &str, sender: &str) -> Option<Classification> {
        if let Some(caps) = self.greenhouse_subject.captures(subject) {
            return Some(Classification {
                is_job_related: true,
                event_type: EventType::ApplicationConfirmed,
                next_status: Some(JobStatus::Applied),
                company: clean_company_name(&caps[1]),
                job_title: clean_job_title(&caps[2]),
                location: None,
                job_url: None,
                confidence: CONF_GREENHOUSE_SUBJECT,
                provider: "greenhouse".into(),
            });
        }

        if (self.greenhouse_domain.is_match(combined) || self.greenhouse_domain.is_match(sender))
            && self.interview_keywords.is_match(combined)
        {
            return Some(Classification {
                is_job_related: true,
                event_type: EventType::Interview,
                next_status: Some(JobStatus::Interview),
                company: None,
                job_title: None,
                location: None,
                job_url: None,
                confidence: CONF_GREENHOUSE_INTERVIEW,
                provider: "greenhouse".into(),
            });
        }

        None
    }

    // Rule 5: Lever "Thanks for applying to <Company>".
    fn lever(&self, combined: &str) -> Option<Classification> {
        let caps = self.lever_thanks.captures(combined)?;
        Some(Classification {
            is_job_related: true,
            event_type: EventType::ApplicationConfirmed,
            next_status: Some(JobStatus::Applied),
            company: clean_company_name(caps[1].trim()),
            job_title: None,
            location: None,
            job_url: None,
            confidence: CONF_LEVER_THANKS,
            provider: "lever".into(),
        })
    }

    // Rule 6: Workday mention + received-application phrasing. Workday
    // templates are too variable to extract fields from.
    fn workday_receipt(&self, combined: &str) -> Option<Classification> {
        if self.workday.is_match(combined) && self.workday_confirm.is_match(combined) {
            return Some(Classification {
                is_job_related: true,
                event_type: EventType::ApplicationConfirmed,
                next_status: Some(JobStatus::Applied),
                company: None,
                job_title: None,
                location: None,
                job_url: None,
                confidence: CONF_WORKDAY_CONFIRM,
                provider: "workday".into(),
            });
        }
        None
    }

    // Rules 7-9: bare keyword fallbacks, lowest priority.
    fn generic_keywords(&self, combined: &str) -> Option<Classification> {
        let (event_type, next_status, confidence) = if self.rejection_keywords.is_match(combined) {
            (
                EventType::Rejection,
                Some(JobStatus::Rejected),
                CONF_GENERIC_REJECTION,
            )
        } else if self.interview_keywords.is_match(combined) {
            (
                EventType::Interview,
                Some(JobStatus::Interview),
                CONF_GENERIC_INTERVIEW,
            )
        } else if self.offer_keywords.is_match(combined) {
            (EventType::Offer, Some(JobStatus::Offer), CONF_GENERIC_OFFER)
        } else {
            return None;
        };

        Some(Classification {
            is_job_related: true,
            event_type,
            next_status,
            company: None,
            job_title: None,
            location: None,
            job_url: None,
            confidence,
            provider: "generic".into(),
        })
    }
}

impl Default for TemplateClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TemplateClassifier {
        TemplateClassifier::new()
    }

    #[test]
    fn linkedin_receipt_extracts_company() {
        let c = classifier()
            .classify(
                "Fenil, your application was sent to Apptoza Inc.",
                "Your application was sent to Apptoza Inc. Frontend Developer.",
                "jobs-noreply@linkedin.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::ApplicationConfirmed);
        assert_eq!(c.next_status, Some(JobStatus::Applied));
        assert_eq!(c.company.as_deref(), Some("Apptoza Inc"));
        assert!((c.confidence - 0.95).abs() < f32::EPSILON);
        assert_eq!(c.provider, "linkedin");
    }

    #[test]
    fn linkedin_rule_beats_generic_rejection() {
        // Both the LinkedIn receipt pattern and a generic rejection keyword
        // are present; the LinkedIn rule is evaluated first and wins.
        let c = classifier()
            .classify(
                "Your application was sent to Acme",
                "Your application was sent to Acme. Unfortunately our offices are closed this week.",
                "jobs-noreply@linkedin.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::ApplicationConfirmed);
        assert!((c.confidence - 0.95).abs() < f32::EPSILON);
        assert_eq!(c.provider, "linkedin");
    }

    #[test]
    fn position_at_company_rejection() {
        let c = classifier()
            .classify(
                "Update on your application",
                "Thank you for your interest in the Backend Engineer position at Globex Corp. \
                 Unfortunately we will not be proceeding with your application.",
                "no-reply@globex.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Rejection);
        assert_eq!(c.next_status, Some(JobStatus::Rejected));
        assert_eq!(c.company.as_deref(), Some("Globex Corp"));
        assert_eq!(c.job_title.as_deref(), Some("Backend Engineer"));
        assert!((c.confidence - 0.90).abs() < f32::EPSILON);
    }

    #[test]
    fn position_at_company_interview() {
        let c = classifier()
            .classify(
                "Next steps",
                "Regarding your interest in the Data Scientist position at Initech. \
                 Please share your availability for a phone screen.",
                "recruiting@initech.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Interview);
        assert!((c.confidence - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn position_at_company_without_signals_is_other() {
        let c = classifier()
            .classify(
                "Your application",
                "Thank you for your interest in the Designer position at Hooli. We got it.",
                "jobs@hooli.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Other);
        assert_eq!(c.next_status, None);
        assert!((c.confidence - 0.78).abs() < f32::EPSILON);
    }

    #[test]
    fn greenhouse_subject_template() {
        let c = classifier()
            .classify(
                "Your application to Stripe for Platform Engineer",
                "We have received your application and will be in touch.",
                "no-reply@greenhouse.io",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::ApplicationConfirmed);
        assert_eq!(c.company.as_deref(), Some("Stripe"));
        assert_eq!(c.job_title.as_deref(), Some("Platform Engineer"));
        assert!((c.confidence - 0.90).abs() < f32::EPSILON);
        assert_eq!(c.provider, "greenhouse");
    }

    #[test]
    fn greenhouse_domain_interview_signal() {
        let c = classifier()
            .classify(
                "Scheduling next steps",
                "Please pick a slot for your video interview via greenhouse.io.",
                "scheduling@greenhouse.io",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Interview);
        assert!((c.confidence - 0.78).abs() < f32::EPSILON);
    }

    #[test]
    fn lever_thanks_for_applying() {
        let c = classifier()
            .classify(
                "Thanks for applying to Plaid",
                "Thanks for applying to Plaid. Our team will review your application.",
                "no-reply@hire.lever.co",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::ApplicationConfirmed);
        assert_eq!(c.company.as_deref(), Some("Plaid"));
        assert!((c.confidence - 0.88).abs() < f32::EPSILON);
        assert_eq!(c.provider, "lever");
    }

    #[test]
    fn workday_receipt_low_confidence() {
        let c = classifier()
            .classify(
                "Application received",
                "Thank you for applying. This mail was sent via Workday.",
                "noreply@myworkday.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::ApplicationConfirmed);
        assert!((c.confidence - 0.72).abs() < f32::EPSILON);
        assert_eq!(c.provider, "workday");
    }

    #[test]
    fn generic_rejection_keywords() {
        let c = classifier()
            .classify(
                "Your application",
                "We regret to inform you that we have decided to move forward with other candidates.",
                "hr@somewhere.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Rejection);
        assert!((c.confidence - 0.85).abs() < f32::EPSILON);
        assert_eq!(c.provider, "generic");
    }

    #[test]
    fn generic_interview_keywords() {
        let c = classifier()
            .classify(
                "Quick chat?",
                "We'd love to schedule a call. What is your availability this week?",
                "recruiter@somewhere.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Interview);
        assert!((c.confidence - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn generic_offer_keywords() {
        let c = classifier()
            .classify(
                "Good news",
                "Congratulations! Please find your compensation details attached.",
                "hr@somewhere.com",
            )
            .unwrap();
        assert_eq!(c.event_type, EventType::Offer);
        assert!((c.confidence - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn unrelated_mail_matches_nothing() {
        let result = classifier().classify(
            "Lunch on Friday?",
            "Want to grab lunch at the new place on Friday?",
            "friend@example.com",
        );
        assert!(result.is_none());
    }
}
