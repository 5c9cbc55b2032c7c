//! Account resolution — maps an inbound message to its owning account.
//!
//! Primary: routing prefixes derived from the first recipient address and
//! the `Delivered-To` header. Fallback: the sender's address, which covers
//! verification/confirmation loops where the forwarding chain makes the
//! account itself the apparent sender.
//!
//! No match is a normal outcome (spam, misdirected mail), never an error.

use crate::error::DatabaseError;
use crate::fetch::FetchedEmail;
use crate::model::Account;
use crate::normalize::{email_prefix, extract_email};
use crate::store::Database;

/// Resolve the owning account for an inbound email, or `None`.
pub async fn resolve_account(
    db: &dyn Database,
    email: &FetchedEmail,
) -> Result<Option<Account>, DatabaseError> {
    let mut prefixes: Vec<String> = Vec::with_capacity(2);

    if let Some(to) = email.first_to() {
        let prefix = email_prefix(&extract_email(to));
        if !prefix.is_empty() {
            prefixes.push(prefix);
        }
    }
    if let Some(delivered_to) = header_ci(email, "delivered-to") {
        let prefix = email_prefix(&extract_email(delivered_to));
        if !prefix.is_empty() && !prefixes.contains(&prefix) {
            prefixes.push(prefix);
        }
    }

    if !prefixes.is_empty()
        && let Some(account) = db.account_by_inbound_prefix(&prefixes).await?
    {
        return Ok(Some(account));
    }

    let from = extract_email(&email.from);
    if from.is_empty() {
        return Ok(None);
    }
    db.account_by_email(&from.to_lowercase()).await
}

/// Case-insensitive header lookup.
fn header_ci<'a>(email: &'a FetchedEmail, name: &str) -> Option<&'a str> {
    email
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
