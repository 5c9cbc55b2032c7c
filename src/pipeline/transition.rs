//! Status transition rules.
//!
//! Pure decisions over the job-status state machine; the processor applies
//! them. Rank order `applied(1) < interview(2) < offer(3)`; `rejected` is
//! terminal, reachable from any state and never left automatically. A
//! rank-decreasing proposal is never applied; it is surfaced for review.

use crate::model::JobStatus;

/// What to do with a proposed status for an existing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDecision {
    /// No proposal, or proposal equals the current status.
    Unchanged,
    /// Apply the proposed status.
    Advance(JobStatus),
    /// Rank would decrease (or leave the terminal state): do not apply,
    /// flag for review.
    Regressive(JobStatus),
}

/// Decide whether `proposed` may replace `current`.
pub fn decide_status(current: JobStatus, proposed: Option<JobStatus>) -> StatusDecision {
    let Some(proposed) = proposed else {
        return StatusDecision::Unchanged;
    };
    if proposed == current {
        return StatusDecision::Unchanged;
    }
    // Rejection is reachable from any state.
    if proposed == JobStatus::Rejected {
        return StatusDecision::Advance(proposed);
    }
    match (current.rank(), proposed.rank()) {
        // Leaving the terminal state requires a human.
        (None, Some(_)) => StatusDecision::Regressive(proposed),
        (Some(current_rank), Some(proposed_rank)) if proposed_rank >= current_rank => {
            StatusDecision::Advance(proposed)
        }
        _ => StatusDecision::Regressive(proposed),
    }
}
