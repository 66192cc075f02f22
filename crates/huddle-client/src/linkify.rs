use std::sync::LazyLock;

use regex::Regex;

const URL_PATTERN: &str = r"(?i)\b(?:https?|ftp|file)://[-A-Z0-9+&@#/%?=~_|!:,.;]*[-A-Z0-9+&@#/%=~_|]";

static URL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(URL_PATTERN).ok());

/// A run of message text, either plain or a clickable link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSpan {
    Text(String),
    Link(String),
}

/// Split a message body into text and link spans. Recognises `http`, `https`,
/// `ftp` and `file` URLs.
pub fn linkify(text: &str) -> Vec<TextSpan> {
    if text.is_empty() {
        return Vec::new();
    }
    let Some(url) = URL.as_ref() else {
        return vec![TextSpan::Text(text.to_string())];
    };

    let mut spans = Vec::new();
    let mut last = 0;
    for m in url.find_iter(text) {
        if m.start() > last {
            spans.push(TextSpan::Text(text[last..m.start()].to_string()));
        }
        spans.push(TextSpan::Link(m.as_str().to_string()));
        last = m.end();
    }
    if last < text.len() {
        spans.push(TextSpan::Text(text[last..].to_string()));
    }
    spans
}
