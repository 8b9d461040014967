//! Unwrapping of callback-style (JSONP) response bodies.
//!
//! The statistics endpoints answer either with plain JSON or with
//! `someCallback({...});`. The callback name varies between endpoints, so
//! unwrapping only looks at the outermost parentheses.

use crate::client::{ApiError, ApiResult};
use serde_json::Value;

const SNIPPET_CHARS: usize = 200;

/// Parse a response body, stripping any callback wrapper.
pub fn parse(raw: &str) -> ApiResult<Value> {
    serde_json::from_str(payload(raw)).map_err(|e| ApiError::Parse {
        message: e.to_string(),
        snippet: snippet(raw),
    })
}

/// The JSON part of a body. Bodies that already start like JSON are taken
/// whole, so parentheses inside string values are never mistaken for a
/// wrapper.
fn payload(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find('('), trimmed.rfind(')')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    }
}

pub(crate) fn snippet(raw: &str) -> String {
    raw.chars().take(SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_any_callback_name() {
        let body = r#"{"data":[[1,"J. Doe"]]}"#;
        for name in ["externalStatisticsCallback", "cb", "jQuery3310_1700000000"] {
            let wrapped = format!("{name}({body});");
            assert_eq!(parse(&wrapped).unwrap(), parse(body).unwrap(), "callback {name}");
        }
    }

    #[test]
    fn plain_json_is_parsed_directly() {
        assert_eq!(parse(r#"{"rows":[]}"#).unwrap(), json!({"rows": []}));
        assert_eq!(parse("  [1, 2]\n").unwrap(), json!([1, 2]));
    }

    #[test]
    fn plain_json_with_parentheses_in_strings_is_not_unwrapped() {
        let body = r#"{"phase":"Playoffs (Final)"}"#;
        assert_eq!(parse(body).unwrap(), json!({"phase": "Playoffs (Final)"}));
    }

    #[test]
    fn wrapped_payload_keeps_inner_parentheses() {
        let body = r#"cb({"phase":"Playoffs (Final)"})"#;
        assert_eq!(parse(body).unwrap(), json!({"phase": "Playoffs (Final)"}));
    }

    #[test]
    fn malformed_body_is_a_parse_error_with_snippet() {
        let body = format!("<html>{}</html>", "x".repeat(500));
        match parse(&body) {
            Err(ApiError::Parse { snippet, .. }) => {
                assert_eq!(snippet.chars().count(), 200);
                assert!(snippet.starts_with("<html>"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn broken_wrapped_payload_is_a_parse_error() {
        assert!(matches!(parse("cb({not json})"), Err(ApiError::Parse { .. })));
        assert!(matches!(parse(""), Err(ApiError::Parse { .. })));
    }
}
