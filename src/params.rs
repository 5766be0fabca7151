use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;

/// Produces a fresh streaming body for every attempt of a request.
///
/// A stream can only be consumed once, so retries call the factory again.
#[derive(Clone)]
pub struct StreamFactory(Arc<dyn Fn() -> reqwest::Body + Send + Sync>);

impl StreamFactory {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> reqwest::Body + Send + Sync + 'static,
    {
        Self(Arc::new(factory))
    }

    pub(crate) fn open(&self) -> reqwest::Body {
        (self.0)()
    }
}

impl fmt::Debug for StreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamFactory(..)")
    }
}

/// Single-document request body.
#[derive(Clone, Debug)]
pub enum Body {
    /// Serialized with [`Serializer::serialize`](crate::Serializer::serialize).
    Json(Value),
    /// Already-encoded payload, sent as is.
    Raw(Bytes),
    /// Streamed payload; no `Content-Length` is set.
    Stream(StreamFactory),
}

/// Newline-delimited bulk body.
#[derive(Clone, Debug)]
pub enum BulkBody {
    /// Serialized with [`Serializer::ndserialize`](crate::Serializer::ndserialize).
    Documents(Vec<Value>),
    /// Already-encoded NDJSON payload.
    Raw(Bytes),
    /// Streamed NDJSON payload.
    Stream(StreamFactory),
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Raw(Bytes::from(value))
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Self::Raw(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<Value>> for BulkBody {
    fn from(values: Vec<Value>) -> Self {
        Self::Documents(values)
    }
}

impl From<String> for BulkBody {
    fn from(value: String) -> Self {
        Self::Raw(Bytes::from(value))
    }
}

/// One logical call against the cluster.
#[derive(Clone, Debug)]
pub struct RequestParams {
    pub method: Method,
    /// Path relative to the node URL, with or without a leading `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    pub bulk_body: Option<BulkBody>,
    pub headers: Vec<(String, String)>,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
    /// Status codes that must not be reported as errors.
    pub ignore: Vec<u16>,
    /// Overrides the transport's default retry budget.
    pub max_retries: Option<usize>,
    /// Hand back the response body unbuffered.
    pub as_stream: bool,
}

impl RequestParams {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bulk_body: None,
            headers: Vec::new(),
            timeout: None,
            ignore: Vec::new(),
            max_retries: None,
            as_stream: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Appends a list-valued query parameter, joined with commas.
    pub fn query_list<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let joined = values
            .into_iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.query.push((key.into(), joined));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn bulk_body(mut self, body: impl Into<BulkBody>) -> Self {
        self.bulk_body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Treats `status` as a non-error outcome.
    pub fn ignore(mut self, status: u16) -> Self {
        self.ignore.push(status);
        self
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn as_stream(mut self) -> Self {
        self.as_stream = true;
        self
    }

    pub(crate) fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use crate::{Body, BulkBody, RequestParams};

    #[test]
    fn builder_collects_query_and_flags() {
        let params = RequestParams::get("/idx/_search")
            .query("size", 10)
            .query_list("_source", ["title", "tags"])
            .ignore(404)
            .max_retries(1)
            .as_stream();

        assert_eq!(params.method, Method::GET);
        assert_eq!(
            params.query,
            vec![
                ("size".to_owned(), "10".to_owned()),
                ("_source".to_owned(), "title,tags".to_owned()),
            ]
        );
        assert_eq!(params.ignore, vec![404]);
        assert_eq!(params.max_retries, Some(1));
        assert!(params.as_stream);
    }

    #[test]
    fn body_conversions() {
        let params = RequestParams::post("/idx/_doc")
            .body(json!({ "title": "hello" }))
            .bulk_body(vec![json!({ "index": {} })]);

        assert!(matches!(params.body, Some(Body::Json(_))));
        assert!(matches!(params.bulk_body, Some(BulkBody::Documents(ref docs)) if docs.len() == 1));
        assert!(RequestParams::head("/idx").is_head());
    }
}
