use serde_json::Value;

use crate::{Result, TransportError};

/// Encodes request bodies and query strings, decodes response bodies.
pub trait Serializer: Send + Sync {
    /// Encodes a single JSON document.
    fn serialize(&self, document: &Value) -> Result<String>;

    /// Encodes documents as newline-delimited JSON with a trailing newline.
    fn ndserialize(&self, documents: &[Value]) -> Result<String>;

    /// Encodes query parameters without the leading `?`.
    fn qserialize(&self, query: &[(String, String)]) -> Result<String>;

    /// Decodes a JSON response body.
    fn deserialize(&self, text: &str) -> Result<Value>;
}

/// [`Serializer`] backed by `serde_json` and `serde_urlencoded`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, document: &Value) -> Result<String> {
        serde_json::to_string(document)
            .map_err(|err| TransportError::Serialization(err.to_string()))
    }

    fn ndserialize(&self, documents: &[Value]) -> Result<String> {
        let mut out = String::new();
        for document in documents {
            // Pre-encoded lines go through untouched.
            match document {
                Value::String(line) => out.push_str(line),
                other => out.push_str(&self.serialize(other)?),
            }
            out.push('\n');
        }
        Ok(out)
    }

    fn qserialize(&self, query: &[(String, String)]) -> Result<String> {
        serde_urlencoded::to_string(query)
            .map_err(|err| TransportError::Serialization(format!("invalid query string: {err}")))
    }

    fn deserialize(&self, text: &str) -> Result<Value> {
        serde_json::from_str(text).map_err(|err| TransportError::Deserialization {
            message: err.to_string(),
            body: text.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{JsonSerializer, Serializer};
    use crate::TransportError;

    #[test]
    fn ndserialize_appends_newlines_and_keeps_raw_lines() {
        let encoded = JsonSerializer
            .ndserialize(&[
                json!({ "index": { "_id": "1" } }),
                json!(r#"{"title":"raw"}"#),
            ])
            .expect("must encode");

        assert_eq!(encoded, "{\"index\":{\"_id\":\"1\"}}\n{\"title\":\"raw\"}\n");
    }

    #[test]
    fn qserialize_escapes_values() {
        let query = vec![
            ("q".to_owned(), "title:hello world".to_owned()),
            ("size".to_owned(), "5".to_owned()),
        ];
        let encoded = JsonSerializer.qserialize(&query).expect("must encode");
        assert_eq!(encoded, "q=title%3Ahello+world&size=5");
    }

    #[test]
    fn deserialize_reports_body_on_failure() {
        let err = JsonSerializer.deserialize("{not json").expect_err("must fail");
        match err {
            TransportError::Deserialization { body, .. } => assert_eq!(body, "{not json"),
            other => panic!("expected deserialization error, got {other:?}"),
        }
    }
}
