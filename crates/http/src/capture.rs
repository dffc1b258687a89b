use std::collections::BTreeMap;

use serde::Serialize;

/// Bodies longer than this are truncated in captures.
pub const MAX_CAPTURED_BODY_BYTES: usize = 5 * 1024;

/// Header names whose values are truncated before capture.
pub const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
];

/// Request as it was sent, safe to log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Response as it was received, safe to log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
}

/// Keep only the last four characters of a sensitive value.
pub fn mask_header_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "...".to_owned();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("...{tail}")
}

/// Copy `headers`, masking sensitive values.
pub fn sanitize_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(name, value)| {
            let value = if is_sensitive_header(name) {
                mask_header_value(value)
            } else {
                value.to_owned()
            };
            (name.to_owned(), value)
        })
        .collect()
}

/// Truncate to [`MAX_CAPTURED_BODY_BYTES`] on a char boundary, noting the
/// original size.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_CAPTURED_BODY_BYTES {
        return body.to_owned();
    }
    let mut end = MAX_CAPTURED_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, total: {} bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_headers_keep_last_four() {
        let headers = sanitize_headers([
            ("Authorization", "Bearer abcdef123456"),
            ("X-Api-Key", "key"),
            ("Content-Type", "application/json"),
        ]);
        assert_eq!(headers["Authorization"], "...3456");
        assert_eq!(headers["X-Api-Key"], "...");
        assert_eq!(headers["Content-Type"], "application/json");
    }

    #[test]
    fn body_truncation_marks_total() {
        assert_eq!(truncate_body("short"), "short");

        let long = "é".repeat(4000);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("... (truncated, total: 8000 bytes)"));
        assert!(truncated.len() < long.len());
    }
}
