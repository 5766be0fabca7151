use crate::{RequestParams, Response};

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Caller misuse: malformed request parameters or transport settings.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network-level failure after the retry budget was spent.
    #[error("connection error: {message}")]
    Connection {
        /// Message of the underlying network error.
        message: String,
        /// The request that failed.
        request: Box<RequestParams>,
    },
    /// The request exceeded its timeout on the last allowed attempt.
    #[error("request timed out: {message}")]
    Timeout {
        message: String,
        request: Box<RequestParams>,
    },
    /// The pool had no connection to hand out.
    #[error("there are no living connections")]
    NoLivingConnections,
    /// Completed exchange whose status is an application-level failure.
    #[error("response error: status {}", .0.status)]
    Response(Box<Response>),
    /// Request body or query string could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Response body claimed to be JSON but could not be decoded.
    #[error("deserialization error: {message}")]
    Deserialization {
        message: String,
        /// Raw body text as received.
        body: String,
    },
    /// The request was cancelled through its abort handle.
    #[error("request aborted")]
    Aborted,
}

impl TransportError {
    /// Returns the HTTP status when this is a [`TransportError::Response`].
    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    /// Returns the normalized response carried by a [`TransportError::Response`].
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Returns the request carried by connection and timeout errors.
    pub fn request(&self) -> Option<&RequestParams> {
        match self {
            Self::Connection { request, .. } | Self::Timeout { request, .. } => Some(request),
            _ => None,
        }
    }

    /// True for [`TransportError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
