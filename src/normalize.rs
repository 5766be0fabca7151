use reqwest::header::{HeaderMap, CONTENT_TYPE, WARNING};

use crate::{RequestParams, ResponseBody, Result, Serializer};

/// Collects every `Warning` header entry.
pub(crate) fn parse_warnings(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(WARNING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(split_warning)
        .collect()
}

/// Splits a `Warning` header value on commas that sit outside double quotes.
pub(crate) fn split_warning(value: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            escaped = false;
        } else if in_quotes && ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == ',' && !in_quotes {
            push_trimmed(&mut warnings, &current);
            current.clear();
            continue;
        }
        current.push(ch);
    }
    push_trimmed(&mut warnings, &current);
    warnings
}

fn push_trimmed(warnings: &mut Vec<String>, warning: &str) {
    let trimmed = warning.trim();
    if !trimmed.is_empty() {
        warnings.push(trimmed.to_owned());
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

/// Turns a buffered body into its normalized form.
///
/// HEAD requests never decode: the body only says whether the resource exists.
pub(crate) fn normalize_body(
    serializer: &dyn Serializer,
    params: &RequestParams,
    status: u16,
    headers: &HeaderMap,
    text: String,
) -> Result<ResponseBody> {
    if params.is_head() {
        return Ok(ResponseBody::Exists(status != 404));
    }
    if is_json(headers) && !text.is_empty() {
        return serializer.deserialize(&text).map(ResponseBody::Json);
    }
    Ok(ResponseBody::Text(text))
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, WARNING};
    use serde_json::json;

    use super::{normalize_body, parse_warnings, split_warning};
    use crate::{JsonSerializer, RequestParams, ResponseBody, Result, TransportError};

    fn normalize(
        params: &RequestParams,
        status: u16,
        headers: &HeaderMap,
        text: &str,
    ) -> Result<ResponseBody> {
        normalize_body(&JsonSerializer, params, status, headers, text.to_owned())
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        headers
    }

    #[test]
    fn quoted_commas_do_not_split() {
        assert_eq!(
            split_warning(r#"299 - "msg, with, commas""#),
            vec![r#"299 - "msg, with, commas""#.to_owned()]
        );
    }

    #[test]
    fn unquoted_commas_split() {
        let warnings = split_warning(concat!(
            r#"299 Elasticsearch-7.0.0 "first, one", "#,
            r#"299 Elasticsearch-7.0.0 "second \"quoted\", one""#,
        ));
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0], r#"299 Elasticsearch-7.0.0 "first, one""#);
        assert!(warnings[1].starts_with("299 Elasticsearch-7.0.0 \"second"));
    }

    #[test]
    fn warnings_from_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append(WARNING, HeaderValue::from_static(r#"299 - "a""#));
        headers.append(WARNING, HeaderValue::from_static(r#"299 - "b", 299 - "c""#));
        assert_eq!(parse_warnings(&headers).len(), 3);
        assert!(parse_warnings(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn head_body_reflects_existence() {
        let head = RequestParams::head("/idx");
        let found = normalize(&head, 200, &json_headers(), "").unwrap();
        let missing = normalize(&head, 404, &json_headers(), "").unwrap();
        assert_eq!(found.as_bool(), Some(true));
        assert_eq!(missing.as_bool(), Some(false));
    }

    #[test]
    fn json_body_is_decoded_only_when_non_empty() {
        let get = RequestParams::get("/idx/_doc/1");
        let body = normalize(&get, 200, &json_headers(), r#"{"found":true}"#).unwrap();
        assert_eq!(body.as_json(), Some(&json!({ "found": true })));

        let empty = normalize(&get, 200, &json_headers(), "").unwrap();
        assert_eq!(empty.as_text(), Some(""));
    }

    #[test]
    fn non_json_body_stays_text() {
        let get = RequestParams::get("/_cat/indices");
        let body = normalize(&get, 200, &HeaderMap::new(), "green open idx").unwrap();
        assert!(matches!(body, ResponseBody::Text(ref text) if text == "green open idx"));
    }

    #[test]
    fn broken_json_is_a_deserialization_error() {
        let get = RequestParams::get("/idx/_doc/1");
        let err = normalize(&get, 200, &json_headers(), "{oops").expect_err("must fail");
        assert!(matches!(err, TransportError::Deserialization { .. }));
    }
}
