//! Field cleaning for extracted company names, job titles and URLs.
//!
//! Template captures and model output both carry template boilerplate
//! ("Acme Inc. | Careers", "Frontend Engineer - Application"). The cleaners
//! cut the boilerplate while keeping legitimate legal suffixes, and are
//! idempotent so template and AI paths can share them freely.

use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::normalize_whitespace;

static LEGAL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\b(inc\.?|ltd\.?|llc|corp\.?|corporation)\s*$").unwrap()
});
static COMPANY_BOILERPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[|•·–—-]\s*(?:careers|jobs|job board|applicants|application)(?s:.*)$")
        .unwrap()
});
static TITLE_BOILERPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[|•·–—-]\s*(?:application|applied|candidate|careers)(?s:.*)$").unwrap()
});
static UNKNOWN_COMPANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^unknown company$").unwrap());

/// Clean a company name: collapse whitespace, cut trailing template
/// boilerplate, normalize spacing around a legal suffix without removing it.
pub fn clean_company_name(company: &str) -> Option<String> {
    let c = normalize_whitespace(company);
    let c = LEGAL_SUFFIX.replace(&c, |caps: &regex::Captures| format!(" {}", &caps[1]));
    let c = COMPANY_BOILERPLATE.replace(&c, "");
    let c = c.trim();
    if c.is_empty() { None } else { Some(c.to_string()) }
}

/// Clean a job title: collapse whitespace, cut trailing template boilerplate.
pub fn clean_job_title(title: &str) -> Option<String> {
    let t = normalize_whitespace(title);
    let t = TITLE_BOILERPLATE.replace(&t, "");
    let t = t.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

/// Accept only absolute http(s) URLs.
pub fn normalize_url(url: &str) -> Option<String> {
    let u = url.trim();
    let lower = u.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(u.to_string())
    } else {
        None
    }
}

/// A company name good enough to create a job from: non-empty after
/// cleaning, not a known placeholder, at least two characters.
pub fn is_valid_company(company: Option<&str>) -> bool {
    match company.and_then(|c| clean_company_name(c)) {
        Some(c) => !UNKNOWN_COMPANY.is_match(&c) && c.len() >= 2,
        None => false,
    }
}

/// A job title good enough to create a job from.
pub fn is_valid_title(title: Option<&str>) -> bool {
    match title.and_then(|t| clean_job_title(t)) {
        Some(t) => t.len() >= 2,
        None => false,
    }
}
