//! Optional hooks for request telemetry.

use crate::{Connection, RequestParams, Response, TransportError};

/// Where a reported error came from.
#[derive(Clone, Copy, Debug)]
pub enum ErrorOrigin<'a> {
    /// A caller's request, or an internal request issued on its behalf.
    Request(&'a RequestParams),
    /// A sniff run.
    Sniff,
}

/// Receives transport events.
///
/// All methods default to no-ops; the transport behaves the same with or
/// without observers attached. Methods are called inline on the request path
/// and should return quickly.
pub trait TransportObserver: Send + Sync {
    /// Called right before each attempt is dispatched.
    fn on_request(&self, _connection: &Connection, _params: &RequestParams) {}

    /// Called for every completed exchange, including application errors.
    fn on_response(&self, _connection: &Connection, _params: &RequestParams, _response: &Response) {
    }

    /// Called once for every terminal error.
    fn on_error(
        &self,
        _error: &TransportError,
        _connection: Option<&Connection>,
        _origin: ErrorOrigin<'_>,
    ) {
    }
}
