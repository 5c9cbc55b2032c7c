//! Text normalization for inbound email bodies.
//!
//! Turns raw provider payloads (often HTML) into clipped plain text the
//! classifiers can work with:
//! - strip markup, decode common entities
//! - truncate trailing noise (quoted replies, signatures, legal footers)
//! - clip to a character budget
//!
//! Every pass is idempotent: normalizing already-normalized text is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style.*?</style>").unwrap());
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script.*?</script>").unwrap());
static BLOCK_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(?:p|div|li|h\d|tr|table)>|<br\s*/?>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACE_BEFORE_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").unwrap());
static SPACE_AFTER_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]+").unwrap());
static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static NEWLINE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Trailing-noise patterns. Each truncates the rest of the text from its
/// first match; evaluated in this order.
static NOISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // signature / divider rules
        r"\n-{2,}[ \t]*\n(?s:.*)$",
        r"\n_{2,}[ \t]*\n(?s:.*)$",
        // quoted reply attribution
        r"\nOn [^\n]*wrote:[ \t]*\n?(?s:.*)$",
        // unsubscribe / preferences / legal boilerplate
        r"(?i)unsubscribe(?s:.*)$",
        r"(?i)manage your (?:email )?preferences(?s:.*)$",
        r"(?i)privacy policy(?s:.*)$",
        r"(?i)terms of service(?s:.*)$",
        r"(?i)this message(?: and any attachments)? is intended only(?s:.*)$",
        r"(?i)confidentiality notice(?s:.*)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static ANGLE_ADDR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^>]+)>").unwrap());

/// Strip HTML down to plain text.
///
/// Style/script blocks are dropped wholesale, block-level boundaries become
/// newlines, remaining tags become spaces, then whitespace is tightened.
/// Plain text without markup passes through unchanged apart from whitespace.
pub fn strip_html(html: &str) -> String {
    let text = STYLE_BLOCK.replace_all(html, "");
    let text = SCRIPT_BLOCK.replace_all(&text, "");
    let text = BLOCK_CLOSE.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = SPACE_BEFORE_NEWLINE.replace_all(&text, "\n");
    let text = SPACE_AFTER_NEWLINE.replace_all(&text, "\n");
    let text = SPACE_RUN.replace_all(&text, " ");
    text.trim().to_string()
}

/// Decode the handful of entities that show up in marketing email.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Truncate trailing noise blocks: quoted replies, signature rules, and
/// unsubscribe/legal footers. First match wins per pattern, in listed order.
pub fn strip_noise_blocks(raw: &str) -> String {
    let mut text = raw.to_string();
    for pattern in NOISE_PATTERNS.iter() {
        if let Some(m) = pattern.find(&text) {
            let start = m.start();
            text.truncate(start);
            // dividers leave a newline so later line-anchored patterns
            // still see a boundary
            text.push('\n');
        }
    }
    let text = NEWLINE_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Collapse all whitespace runs to single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clip to at most `max_chars` characters, on a char boundary. Content past
/// the budget is dropped, never an error.
pub fn clip_text(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Hex SHA-256 of the clipped subject+body; keys the classification cache.
pub fn content_hash(subject: &str, body: &str, max_chars: usize) -> String {
    let combined = format!("{subject}\n\n{body}");
    let clipped = clip_text(&combined, max_chars);
    format!("{:x}", Sha256::digest(clipped.as_bytes()))
}

/// Pull the bare address out of a `Display Name <addr@host>` form.
pub fn extract_email(raw: &str) -> String {
    ANGLE_ADDR
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Routing prefix of an address: local part before `+` and `@`, lowercased.
pub fn email_prefix(addr: &str) -> String {
    addr.split('@')
        .next()
        .unwrap_or("")
        .split('+')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}
