//! The email processing pipeline.
//!
//! One [`processor::EmailPipeline`] run per inbound webhook event, strictly
//! sequential inside a run, concurrent and independent across runs. The
//! only cross-run synchronization is the storage-level unique constraint
//! behind the idempotency guard.

pub mod account;
pub mod jobmatch;
pub mod processor;
pub mod transition;

pub use processor::{EmailPipeline, PipelineOutcome, WebhookEvent};
