//! Safety layer: content sanitisation before text leaves the process.
//!
//! Message text is forwarded to an external model and may end up in logs,
//! so credentials are redacted and size is bounded here.

use std::sync::LazyLock;

use regex::Regex;

const REDACTED: &str = "[REDACTED]";

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)(?:api[_-]?key|apikey|secret|token|password|passwd|pwd|auth|credential)s?\s*[=:]\s*['"]?[^'"\s]{8,}['"]?"#,
        r"(?i)(?:bearer|basic)\s+[a-zA-Z0-9._-]{20,}",
        r"(?:ghp|gho|ghu|ghs|ghr)_[a-zA-Z0-9]{36,}",
        r"sk-[a-zA-Z0-9]{32,}",
        r"AIza[a-zA-Z0-9_-]{35}",
        r"[a-zA-Z0-9]{24}\.[a-zA-Z0-9_-]{6}\.[a-zA-Z0-9_-]{27}",
        r"-----BEGIN\s+(?:RSA\s+)?PRIVATE\s+KEY-----",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static secret pattern"))
    .collect()
});

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s<>'")\]]+"#).expect("static URL pattern"));

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static newline pattern"));

/// Replace anything that looks like a credential with `[REDACTED]`.
pub fn redact_secrets(text: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, re| re.replace_all(&acc, REDACTED).into_owned())
}

/// Cap `text` at `max_len` characters, ending in `...` when cut.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Unique `http(s)://` URLs in first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let url = m.as_str();
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// Redact, normalise blank lines, trim, and cap message text.
pub fn sanitize_message_content(content: &str, max_len: usize) -> String {
    let redacted = redact_secrets(content);
    let collapsed = EXCESS_NEWLINES.replace_all(&redacted, "\n\n");
    truncate_text(collapsed.trim(), max_len)
}
