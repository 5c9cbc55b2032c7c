//! Email classification.
//!
//! Two stages share one output shape ([`crate::model::Classification`]):
//! 1. [`template::TemplateClassifier`]: ordered provider rules, no LLM
//! 2. [`ai::AiClassifier`]: LLM fallback behind a hard timeout
//!
//! The content-hash cache between them lives in the idempotency ledger, not
//! here (see the store).

pub mod ai;
pub mod clean;
pub mod template;

pub use ai::AiClassifier;
pub use template::TemplateClassifier;
