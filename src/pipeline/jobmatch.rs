//! Job resolution — fuzzy-matches a classification to an existing job.
//!
//! Tried in order, first match wins:
//! 1. exact `source_url`
//! 2. company exact + title contains (both case-insensitive)
//! 3. company contains, most recent, when a title is known or the event is
//!    a confirmed application
//! 4. company contains restricted to open (`applied`/`interview`) jobs,
//!    when the title is unknown and the event is an update type, so an
//!    update can never resurrect a closed job

use crate::error::DatabaseError;
use crate::model::{Classification, Job};
use crate::store::Database;

/// Find the existing job a classification refers to, or `None`.
pub async fn find_target_job(
    db: &dyn Database,
    account_id: &str,
    classification: &Classification,
) -> Result<Option<Job>, DatabaseError> {
    if let Some(url) = classification.job_url.as_deref()
        && let Some(job) = db.job_by_source_url(account_id, url).await?
    {
        return Ok(Some(job));
    }

    let company = classification.company.as_deref();
    let title = classification.job_title.as_deref();

    if let (Some(company), Some(title)) = (company, title)
        && let Some(job) = db.job_by_company_title(account_id, company, title).await?
    {
        return Ok(Some(job));
    }

    let Some(company) = company else {
        return Ok(None);
    };

    let open_only = title.is_none() && classification.event_type.is_update();
    db.job_by_company(account_id, company, open_only).await
}
