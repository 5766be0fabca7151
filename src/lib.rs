//! `search-transport` is the cluster-aware HTTP layer of a search engine client.
//!
//! Endpoint wrappers describe a call with [`RequestParams`] and hand it to
//! [`Transport::request`], which:
//! - picks a node from the [`ConnectionPool`] and retries on other nodes when
//!   one fails at the network level or answers 502/503/504,
//! - marks nodes dead or alive according to each outcome,
//! - normalizes the reply into a [`Response`] (JSON decoding, HEAD existence
//!   checks, `Warning` header parsing),
//! - keeps the pool in sync with the cluster by sniffing its node list.
//!
//! ```no_run
//! use search_transport::{RequestParams, Transport, TransportOptions};
//!
//! # async fn run() -> search_transport::Result<()> {
//! let transport = Transport::from_urls(["http://localhost:9200"], TransportOptions::default())?;
//! let exists = transport.request(RequestParams::head("/books")).await?;
//! println!("index exists: {:?}", exists.body.as_bool());
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod normalize;
mod observer;
mod options;
mod params;
mod pool;
mod serializer;
mod sniff;
mod transport;
mod types;
mod wire;

pub use connection::{Connection, Host};
pub use error::TransportError;
pub use observer::{ErrorOrigin, TransportObserver};
pub use options::{parse_duration, TransportOptions};
pub use params::{Body, BulkBody, RequestParams, StreamFactory};
pub use pool::{ClusterPool, ConnectionPool};
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{PendingRequest, Transport, TransportBuilder};
pub use types::{Response, ResponseBody};

pub type Result<T> = std::result::Result<T, TransportError>;
