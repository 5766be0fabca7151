use std::{fmt, time::Duration};

use bytes::Bytes;
use reqwest::{header::HeaderMap, Method};
use url::Url;

use crate::{params::StreamFactory, Result, TransportError};

/// Descriptor of a cluster node, as configured or discovered by sniffing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Host {
    /// Node id; seed hosts use their URL without credentials.
    pub id: String,
    pub url: Url,
    pub roles: Vec<String>,
}

impl Host {
    /// Builds a seed host from a URL such as `http://localhost:9200`.
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url.trim())
            .map_err(|err| {
                TransportError::Configuration(format!("invalid node url '{url}': {err}"))
            })?;
        let mut id = url.clone();
        let _ = id.set_username("");
        let _ = id.set_password(None);
        Ok(Self {
            id: id.to_string(),
            url,
            roles: Vec::new(),
        })
    }
}

/// Endpoint of one cluster node.
pub struct Connection {
    host: Host,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.host.id)
            .field("url", &redacted_url(&self.host.url))
            .finish()
    }
}

impl Connection {
    pub fn new(host: Host) -> Self {
        Self { host }
    }

    pub fn id(&self) -> &str {
        &self.host.id
    }

    pub fn url(&self) -> &Url {
        &self.host.url
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Resolves `path` and an encoded query string against the node URL.
    pub(crate) fn endpoint(&self, path: &str, query: &str) -> Url {
        let mut url = self.host.url.clone();
        let base = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        url.set_query((!query.is_empty()).then_some(query));
        url
    }

    /// Issues one HTTP call. The response head is returned as soon as it
    /// arrives; the body is left unread.
    pub(crate) async fn request(
        &self,
        http: &reqwest::Client,
        request: &PreparedRequest,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut builder = http
            .request(request.method.clone(), self.endpoint(&request.path, &request.query))
            .headers(request.headers.clone())
            .timeout(request.timeout);

        match &request.payload {
            Some(Payload::Bytes(bytes)) => builder = builder.body(bytes.clone()),
            Some(Payload::Stream(factory)) => builder = builder.body(factory.open()),
            None => {}
        }

        builder.send().await
    }
}

/// Encoded request payload, ready to be sent on any attempt.
#[derive(Clone, Debug)]
pub(crate) enum Payload {
    Bytes(Bytes),
    Stream(StreamFactory),
}

/// A request with its body, query string and headers already encoded.
#[derive(Debug)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub payload: Option<Payload>,
    pub timeout: Duration,
}

fn redacted_url(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let _ = redacted.set_password(Some("<redacted>"));
    redacted.to_string()
}
