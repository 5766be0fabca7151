use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{wire, Connection, Host, Result, TransportError};

/// Tracks cluster membership and per-node health.
///
/// The transport only reads through [`get_connection`](Self::get_connection)
/// and reports outcomes through [`mark_dead`](Self::mark_dead) and
/// [`mark_alive`](Self::mark_alive).
pub trait ConnectionPool: Send + Sync {
    /// Picks a connection for the next attempt, or `None` when every node is
    /// dead or the pool is empty.
    fn get_connection(&self) -> Option<Arc<Connection>>;

    fn mark_dead(&self, connection: &Connection);

    fn mark_alive(&self, connection: &Connection);

    /// Gives dead connections whose back-off has expired another chance.
    fn resurrect(&self, now: Instant);

    /// Replaces the pool membership with `hosts`.
    fn update(&self, hosts: Vec<Host>);

    /// Translates the `nodes` object of a node-info response into hosts.
    fn nodes_to_hosts(&self, nodes: &Value) -> Vec<Host>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Health {
    Alive,
    Dead { until: Instant },
}

#[derive(Debug)]
struct Entry {
    connection: Arc<Connection>,
    health: Health,
    dead_count: u32,
}

impl Entry {
    fn new(host: Host) -> Self {
        Self {
            connection: Arc::new(Connection::new(host)),
            health: Health::Alive,
            dead_count: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<Entry>,
    cursor: usize,
}

/// Round-robin [`ConnectionPool`] with exponential dead-node back-off.
///
/// A connection marked dead is skipped until
/// `resurrect_timeout * 2^min(dead_count - 1, cutoff)` has elapsed, after which
/// [`resurrect`](ConnectionPool::resurrect) returns it to rotation without a
/// health probe. A pool holding a single connection never marks it dead.
#[derive(Debug)]
pub struct ClusterPool {
    state: Mutex<PoolState>,
    resurrect_timeout: Duration,
    resurrect_timeout_cutoff: u32,
    scheme: String,
}

impl ClusterPool {
    pub fn new(hosts: Vec<Host>) -> Self {
        let scheme = hosts
            .first()
            .map(|host| host.url.scheme().to_owned())
            .unwrap_or_else(|| "http".to_owned());
        Self {
            state: Mutex::new(PoolState {
                entries: hosts.into_iter().map(Entry::new).collect(),
                cursor: 0,
            }),
            resurrect_timeout: Duration::from_secs(60),
            resurrect_timeout_cutoff: 5,
            scheme,
        }
    }

    /// Builds a pool from seed URLs such as `http://localhost:9200`.
    pub fn from_urls<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = urls
            .into_iter()
            .map(|url| Host::parse(url.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(TransportError::Configuration(
                "at least one node url is required".to_owned(),
            ));
        }
        Ok(Self::new(hosts))
    }

    /// Base back-off before a dead connection may be resurrected.
    pub fn with_resurrect_timeout(mut self, timeout: Duration) -> Self {
        self.resurrect_timeout = timeout;
        self
    }

    /// Scheme used for sniffed addresses that carry none.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn alive_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.health == Health::Alive)
            .count()
    }

    /// Returns whether the connection with `id` is currently alive.
    pub fn is_alive(&self, id: &str) -> Option<bool> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|entry| entry.connection.id() == id)
            .map(|entry| entry.health == Health::Alive)
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.connection.host().clone())
            .collect()
    }

    fn dead_until(&self, now: Instant, dead_count: u32) -> Instant {
        let exponent = dead_count.saturating_sub(1).min(self.resurrect_timeout_cutoff);
        now + self.resurrect_timeout.saturating_mul(1u32 << exponent)
    }
}

impl ConnectionPool for ClusterPool {
    fn get_connection(&self) -> Option<Arc<Connection>> {
        let mut state = self.state.lock();
        let alive: Vec<&Arc<Connection>> = state
            .entries
            .iter()
            .filter(|entry| entry.health == Health::Alive)
            .map(|entry| &entry.connection)
            .collect();
        if alive.is_empty() {
            return None;
        }
        let picked = Arc::clone(alive[state.cursor % alive.len()]);
        state.cursor = state.cursor.wrapping_add(1);
        Some(picked)
    }

    fn mark_dead(&self, connection: &Connection) {
        let mut state = self.state.lock();
        if state.entries.len() == 1 {
            return;
        }
        let now = Instant::now();
        let Some(index) = state
            .entries
            .iter()
            .position(|entry| entry.connection.id() == connection.id())
        else {
            return;
        };
        let dead_count = state.entries[index].dead_count.saturating_add(1);
        let until = self.dead_until(now, dead_count);
        let entry = &mut state.entries[index];
        entry.dead_count = dead_count;
        entry.health = Health::Dead { until };

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %connection.id(), dead_count, "marked connection dead");
    }

    fn mark_alive(&self, connection: &Connection) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| entry.connection.id() == connection.id())
        {
            #[cfg(feature = "tracing")]
            if entry.health != Health::Alive {
                tracing::debug!(connection = %connection.id(), "marked connection alive");
            }
            entry.health = Health::Alive;
            entry.dead_count = 0;
        }
    }

    fn resurrect(&self, now: Instant) {
        let mut state = self.state.lock();
        for entry in &mut state.entries {
            if let Health::Dead { until } = entry.health {
                if until <= now {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(connection = %entry.connection.id(), "resurrecting connection");
                    entry.health = Health::Alive;
                }
            }
        }
    }

    fn update(&self, hosts: Vec<Host>) {
        let mut state = self.state.lock();
        let mut previous = std::mem::take(&mut state.entries);
        let mut next = Vec::with_capacity(hosts.len());

        for host in hosts {
            let existing = previous
                .iter()
                .position(|entry| {
                    entry.connection.id() == host.id || entry.connection.url() == &host.url
                });
            match existing {
                Some(index) => {
                    let mut entry = previous.swap_remove(index);
                    if entry.connection.host() != &host {
                        entry.connection = Arc::new(Connection::new(host));
                    }
                    entry.health = Health::Alive;
                    entry.dead_count = 0;
                    next.push(entry);
                }
                None => next.push(Entry::new(host)),
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            size = next.len(),
            removed = previous.len(),
            "updated connection pool"
        );

        state.entries = next;
        state.cursor = 0;
    }

    fn nodes_to_hosts(&self, nodes: &Value) -> Vec<Host> {
        wire::hosts_from_nodes(nodes, &self.scheme)
    }
}
