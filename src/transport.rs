use std::{
    error::Error as _,
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Instant,
};

use bytes::Bytes;
use futures::future::{AbortHandle, Abortable, Aborted, BoxFuture};
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
};

use crate::{
    connection::{Payload, PreparedRequest},
    normalize,
    observer::{ErrorOrigin, TransportObserver},
    options::parse_duration,
    Body, BulkBody, ClusterPool, Connection, ConnectionPool, JsonSerializer, RequestParams,
    Response, ResponseBody, Result, Serializer, TransportError, TransportOptions,
};

/// Dispatches requests across a cluster with retries, node health tracking
/// and sniffing.
///
/// Cloning is cheap; clones share the pool, the HTTP client and sniff state.
#[derive(Clone)]
pub struct Transport {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) http: reqwest::Client,
    pub(crate) pool: Arc<dyn ConnectionPool>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) observers: Vec<Arc<dyn TransportObserver>>,
    pub(crate) options: TransportOptions,
    pub(crate) next_sniff: Mutex<Option<Instant>>,
    pub(crate) sniffing: AtomicBool,
    /// Set when `sniff_on_start` could not spawn at build time; the first
    /// request starts the sniff instead.
    pub(crate) start_sniff_pending: AtomicBool,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("options", &self.inner.options)
            .field("observers", &self.inner.observers.len())
            .field("next_sniff", &*self.inner.next_sniff.lock())
            .finish()
    }
}

/// Builds a [`Transport`].
pub struct TransportBuilder {
    pool: Arc<dyn ConnectionPool>,
    options: TransportOptions,
    serializer: Arc<dyn Serializer>,
    observers: Vec<Arc<dyn TransportObserver>>,
}

impl TransportBuilder {
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            options: TransportOptions::default(),
            serializer: Arc::new(JsonSerializer),
            observers: Vec::new(),
        }
    }

    pub fn options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the default [`JsonSerializer`].
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Builds the transport. With `sniff_on_start` a sniff is started right
    /// away on the current tokio runtime, or on the first request when built
    /// outside of one.
    pub fn build(self) -> Result<Transport> {
        let compression = self.options.suggest_compression;
        let http = reqwest::Client::builder()
            .gzip(compression)
            .deflate(compression)
            .brotli(false)
            .build()
            .map_err(|err| {
                TransportError::Configuration(format!("failed to build http client: {err}"))
            })?;

        let next_sniff = self
            .options
            .sniff_interval
            .map(|interval| Instant::now() + interval);
        let sniff_on_start = self.options.sniff_on_start;

        let transport = Transport {
            inner: Arc::new(Inner {
                http,
                pool: self.pool,
                serializer: self.serializer,
                observers: self.observers,
                options: self.options,
                next_sniff: Mutex::new(next_sniff),
                sniffing: AtomicBool::new(false),
                start_sniff_pending: AtomicBool::new(false),
            }),
        };

        if sniff_on_start && !transport.spawn_sniff() {
            transport.inner.start_sniff_pending.store(true, Ordering::Release);
        }
        Ok(transport)
    }
}

impl Transport {
    pub fn builder(pool: Arc<dyn ConnectionPool>) -> TransportBuilder {
        TransportBuilder::new(pool)
    }

    /// Creates a transport over seed URLs with the given options.
    pub fn from_urls<I, S>(urls: I, options: TransportOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pool = ClusterPool::from_urls(urls)?;
        Self::builder(Arc::new(pool)).options(options).build()
    }

    /// Creates a transport from environment variables.
    ///
    /// Reads:
    /// - `SEARCH_TRANSPORT_NODES`: comma-separated node URLs (required)
    /// - `SEARCH_TRANSPORT_MAX_RETRIES`: default retry budget
    /// - `SEARCH_TRANSPORT_REQUEST_TIMEOUT`: e.g. `30s` or `1500`
    pub fn from_env() -> Result<Self> {
        let nodes = std::env::var("SEARCH_TRANSPORT_NODES").map_err(|_| {
            TransportError::Configuration(
                "missing SEARCH_TRANSPORT_NODES environment variable".to_owned(),
            )
        })?;

        let mut options = TransportOptions::default();
        if let Ok(value) = std::env::var("SEARCH_TRANSPORT_MAX_RETRIES") {
            options.max_retries = value.trim().parse().map_err(|err| {
                TransportError::Configuration(format!(
                    "invalid SEARCH_TRANSPORT_MAX_RETRIES '{value}': {err}"
                ))
            })?;
        }
        if let Ok(value) = std::env::var("SEARCH_TRANSPORT_REQUEST_TIMEOUT") {
            options.request_timeout = parse_duration(&value)?;
        }

        Self::from_urls(
            nodes.split(',').filter(|url| !url.trim().is_empty()),
            options,
        )
    }

    pub fn options(&self) -> &TransportOptions {
        &self.inner.options
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.inner.pool
    }

    /// Starts a request. The returned future resolves once, after retries,
    /// and can be cancelled through [`PendingRequest::abort`].
    pub fn request(&self, params: RequestParams) -> PendingRequest {
        let transport = self.clone();
        PendingRequest::new(Box::pin(async move { transport.execute(params).await }))
    }

    pub(crate) async fn execute(&self, params: RequestParams) -> Result<Response> {
        let prepared = match self.prepare(&params) {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.fail(err, None, &params)),
        };
        let mut remaining = params.max_retries.unwrap_or(self.inner.options.max_retries);

        loop {
            let Some(connection) = self.get_connection() else {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    method = %params.method,
                    path = %params.path,
                    "no living connections"
                );
                return Err(self.fail(TransportError::NoLivingConnections, None, &params));
            };

            self.emit(|observer| observer.on_request(&connection, &params));

            let response = match connection.request(&self.inner.http, &prepared).await {
                Ok(response) => response,
                Err(err) => {
                    self.inner.pool.mark_dead(&connection);
                    if self.inner.options.sniff_on_connection_fault {
                        self.spawn_sniff();
                    }
                    if remaining > 0 {
                        remaining -= 1;
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            connection = %connection.id(),
                            remaining,
                            "request failed, retrying: {}",
                            error_message(&err)
                        );
                        continue;
                    }
                    let error = classify_network_error(&err, &params);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(connection = %connection.id(), "request failed: {error}");
                    return Err(self.fail(error, Some(&connection), &params));
                }
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let warnings = normalize::parse_warnings(&headers);

            if params.as_stream {
                let response = Response {
                    status,
                    headers,
                    body: ResponseBody::Stream(response),
                    warnings,
                };
                self.emit(|observer| observer.on_response(&connection, &params, &response));
                return Ok(response);
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    let error = classify_network_error(&err, &params);
                    return Err(self.fail(error, Some(&connection), &params));
                }
            };

            let ignored =
                params.ignore.contains(&status) || (params.is_head() && status == 404);
            let unavailable = !ignored && is_retryable_status(status);
            if unavailable {
                self.inner.pool.mark_dead(&connection);
                if remaining > 0 {
                    remaining -= 1;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        connection = %connection.id(),
                        status,
                        remaining,
                        "node unavailable, retrying"
                    );
                    continue;
                }
            }

            let body = match normalize::normalize_body(
                self.inner.serializer.as_ref(),
                &params,
                status,
                &headers,
                text,
            ) {
                Ok(body) => body,
                Err(err) => return Err(self.fail(err, Some(&connection), &params)),
            };
            if !unavailable {
                self.inner.pool.mark_alive(&connection);
            }
            let response = Response {
                status,
                headers,
                body,
                warnings,
            };
            self.emit(|observer| observer.on_response(&connection, &params, &response));

            if !ignored && status >= 400 {
                let error = TransportError::Response(Box::new(response));
                return Err(self.fail(error, Some(&connection), &params));
            }
            return Ok(response);
        }
    }

    /// Encodes body, query string and headers once for all attempts.
    fn prepare(&self, params: &RequestParams) -> Result<PreparedRequest> {
        if params.body.is_some() && params.bulk_body.is_some() {
            return Err(TransportError::Configuration(
                "a request cannot carry both a body and a bulk body".to_owned(),
            ));
        }

        let mut headers = HeaderMap::with_capacity(params.headers.len() + 3);
        for (name, value) in &params.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                TransportError::Configuration(format!("invalid header name '{name}': {err}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|err| {
                TransportError::Configuration(format!("invalid value for header '{name}': {err}"))
            })?;
            headers.append(header_name, header_value);
        }

        let serializer = self.inner.serializer.as_ref();
        let payload = match (&params.body, &params.bulk_body) {
            (Some(body), _) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(match body {
                    Body::Json(document) => {
                        Payload::Bytes(Bytes::from(serializer.serialize(document)?))
                    }
                    Body::Raw(bytes) => Payload::Bytes(bytes.clone()),
                    Body::Stream(factory) => Payload::Stream(factory.clone()),
                })
            }
            (None, Some(bulk)) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
                Some(match bulk {
                    BulkBody::Documents(documents) => {
                        Payload::Bytes(Bytes::from(serializer.ndserialize(documents)?))
                    }
                    BulkBody::Raw(bytes) => Payload::Bytes(bytes.clone()),
                    BulkBody::Stream(factory) => Payload::Stream(factory.clone()),
                })
            }
            (None, None) => None,
        };
        if let Some(Payload::Bytes(bytes)) = &payload {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }

        if self.inner.options.suggest_compression {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip,deflate"));
        }

        Ok(PreparedRequest {
            method: params.method.clone(),
            path: params.path.clone(),
            query: serializer.qserialize(&params.query)?,
            headers,
            payload,
            timeout: params.timeout.unwrap_or(self.inner.options.request_timeout),
        })
    }

    /// Picks the connection for the next attempt, starting a background
    /// sniff first when one is due.
    fn get_connection(&self) -> Option<Arc<Connection>> {
        let now = Instant::now();
        let start_pending = self.inner.start_sniff_pending.swap(false, Ordering::AcqRel);
        let sniff_due = matches!(*self.inner.next_sniff.lock(), Some(next) if now > next);
        if start_pending || sniff_due {
            let spawned = self.spawn_sniff();
            if start_pending && !spawned {
                self.inner.start_sniff_pending.store(true, Ordering::Release);
            }
        }
        self.inner.pool.resurrect(now);
        self.inner.pool.get_connection()
    }

    pub(crate) fn emit(&self, event: impl Fn(&dyn TransportObserver)) {
        for observer in &self.inner.observers {
            event(observer.as_ref());
        }
    }

    /// Reports a terminal request error to observers and hands it back.
    fn fail(
        &self,
        error: TransportError,
        connection: Option<&Connection>,
        params: &RequestParams,
    ) -> TransportError {
        self.emit(|observer| observer.on_error(&error, connection, ErrorOrigin::Request(params)));
        error
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 502..=504)
}

fn classify_network_error(err: &reqwest::Error, params: &RequestParams) -> TransportError {
    let message = error_message(err);
    let request = Box::new(params.clone());
    if err.is_timeout() {
        TransportError::Timeout { message, request }
    } else {
        TransportError::Connection { message, request }
    }
}

/// Joins an error with its sources, e.g. `error sending request: connection refused`.
fn error_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// In-flight request returned by [`Transport::request`].
///
/// Resolves to the final [`Response`] or error. Aborting cancels the attempt
/// in flight and resolves the future with [`TransportError::Aborted`]; no
/// further retries are started.
#[must_use = "requests do nothing unless awaited"]
pub struct PendingRequest {
    inner: Abortable<BoxFuture<'static, Result<Response>>>,
    handle: AbortHandle,
}

impl PendingRequest {
    fn new(future: BoxFuture<'static, Result<Response>>) -> Self {
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            inner: Abortable::new(future, registration),
            handle,
        }
    }

    pub fn abort(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("request aborted");
        self.handle.abort();
    }

    /// Handle that can abort the request from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }
}

impl Future for PendingRequest {
    type Output = Result<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(Aborted)) => Poll::Ready(Err(TransportError::Aborted)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{error_message, is_retryable_status, Transport};
    use crate::{
        connection::Payload, BulkBody, ClusterPool, RequestParams, TransportError,
        TransportOptions,
    };

    fn transport(options: TransportOptions) -> Transport {
        let pool = ClusterPool::from_urls(["http://localhost:9200"]).unwrap();
        Transport::builder(Arc::new(pool)).options(options).build().unwrap()
    }

    #[test]
    fn only_gateway_statuses_are_retryable() {
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(504));
        assert!(!is_retryable_status(500));
        assert!(!is_retryable_status(429));
    }

    #[tokio::test]
    async fn prepare_sets_json_headers() {
        let transport = transport(TransportOptions::default());
        let prepared = transport
            .prepare(
                &RequestParams::post("/idx/_doc")
                    .body(json!({ "a": 1 }))
                    .query("refresh", true),
            )
            .unwrap();

        assert_eq!(prepared.headers["content-type"], "application/json");
        assert_eq!(prepared.headers["content-length"], "7");
        assert_eq!(prepared.query, "refresh=true");
        assert!(prepared.headers.get("accept-encoding").is_none());
        assert!(matches!(
            prepared.payload,
            Some(Payload::Bytes(ref bytes)) if bytes.as_ref() == br#"{"a":1}"#
        ));
    }

    #[tokio::test]
    async fn prepare_encodes_bulk_as_ndjson() {
        let transport = transport(TransportOptions::default());
        let prepared = transport
            .prepare(&RequestParams::post("/_bulk").bulk_body(BulkBody::Documents(vec![
                json!({ "index": { "_index": "idx" } }),
                json!({ "a": 1 }),
            ])))
            .unwrap();

        assert_eq!(prepared.headers["content-type"], "application/x-ndjson");
        assert!(matches!(
            prepared.payload,
            Some(Payload::Bytes(ref bytes))
                if bytes.as_ref() == b"{\"index\":{\"_index\":\"idx\"}}\n{\"a\":1}\n"
        ));
    }

    #[tokio::test]
    async fn prepare_advertises_compression() {
        let options = TransportOptions {
            suggest_compression: true,
            ..TransportOptions::default()
        };
        let prepared = transport(options).prepare(&RequestParams::get("/")).unwrap();
        assert_eq!(prepared.headers["accept-encoding"], "gzip,deflate");
    }

    #[tokio::test]
    async fn prepare_rejects_body_and_bulk_body_together() {
        let err = transport(TransportOptions::default())
            .prepare(&RequestParams::post("/_bulk").body(json!({})).bulk_body(vec![json!({})]))
            .expect_err("must reject");
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[tokio::test]
    async fn prepare_rejects_invalid_headers() {
        let err = transport(TransportOptions::default())
            .prepare(&RequestParams::get("/").header("bad header", "x"))
            .expect_err("must reject");
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn from_env_reads_nodes_and_overrides() {
        std::env::remove_var("SEARCH_TRANSPORT_NODES");
        assert!(matches!(
            Transport::from_env(),
            Err(TransportError::Configuration(_))
        ));

        std::env::set_var("SEARCH_TRANSPORT_NODES", "http://a:9200, ,http://b:9200");
        std::env::set_var("SEARCH_TRANSPORT_MAX_RETRIES", "7");
        std::env::set_var("SEARCH_TRANSPORT_REQUEST_TIMEOUT", "1500ms");
        let transport = Transport::from_env().unwrap();
        assert_eq!(transport.options().max_retries, 7);
        assert_eq!(transport.options().request_timeout, std::time::Duration::from_millis(1500));

        std::env::set_var("SEARCH_TRANSPORT_MAX_RETRIES", "many");
        assert!(matches!(
            Transport::from_env(),
            Err(TransportError::Configuration(_))
        ));

        std::env::remove_var("SEARCH_TRANSPORT_NODES");
        std::env::remove_var("SEARCH_TRANSPORT_MAX_RETRIES");
        std::env::remove_var("SEARCH_TRANSPORT_REQUEST_TIMEOUT");
    }

    #[tokio::test]
    async fn error_message_includes_sources() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .expect_err("port 1 must refuse connections");
        let message = error_message(&err);
        assert!(message.starts_with(&err.to_string()));
        assert!(message.len() > err.to_string().len());
    }
}
