use reqwest::header::HeaderMap;
use serde_json::Value;

/// Normalized outcome of a completed exchange.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Entries of the `Warning` header(s), in order.
    pub warnings: Vec<String>,
}

impl Response {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the first value of header `name` as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug)]
pub enum ResponseBody {
    /// Decoded `application/json` body.
    Json(Value),
    /// Any other buffered body, including an empty one.
    Text(String),
    /// Result of a HEAD request: `false` when the resource returned 404.
    Exists(bool),
    /// Unbuffered response, handed back in stream mode.
    Stream(reqwest::Response),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Exists(exists) => Some(*exists),
            _ => None,
        }
    }

    /// Takes the raw response out of a stream-mode body.
    pub fn into_stream(self) -> Option<reqwest::Response> {
        match self {
            Self::Stream(response) => Some(response),
            _ => None,
        }
    }
}
