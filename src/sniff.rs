use std::{sync::atomic::Ordering, time::Instant};

use crate::{
    observer::ErrorOrigin,
    transport::{Inner, Transport},
    Host, RequestParams, Response, ResponseBody, Result, TransportError,
};

/// Clears the in-progress flag and schedules the next periodic sniff when a
/// run ends, whether it succeeded, failed or was dropped mid-flight.
struct SniffGuard<'a> {
    inner: &'a Inner,
}

impl Drop for SniffGuard<'_> {
    fn drop(&mut self) {
        if let Some(interval) = self.inner.options.sniff_interval {
            *self.inner.next_sniff.lock() = Some(Instant::now() + interval);
        }
        self.inner.sniffing.store(false, Ordering::Release);
    }
}

impl Transport {
    /// Refreshes the pool membership from the cluster's node list.
    ///
    /// Returns `Ok(None)` without doing anything when another sniff is
    /// already running, otherwise the hosts the pool was updated with.
    pub async fn sniff(&self) -> Result<Option<Vec<Host>>> {
        if self
            .inner
            .sniffing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }
        let _guard = SniffGuard { inner: &self.inner };

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.inner.options.sniff_endpoint, "started sniffing");

        let params = RequestParams::get(self.inner.options.sniff_endpoint.clone());
        let outcome = match self.execute(params).await {
            Ok(response) => self.apply_sniff(&response),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(hosts) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(hosts = hosts.len(), "sniffing finished");
                Ok(Some(hosts))
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("sniffing failed: {err}");
                self.emit(|observer| observer.on_error(&err, None, ErrorOrigin::Sniff));
                Err(err)
            }
        }
    }

    /// Next scheduled periodic sniff, if periodic sniffing is enabled.
    pub fn next_sniff(&self) -> Option<Instant> {
        *self.inner.next_sniff.lock()
    }

    pub fn is_sniffing(&self) -> bool {
        self.inner.sniffing.load(Ordering::Acquire)
    }

    /// Starts a sniff on the current tokio runtime without waiting for it.
    ///
    /// Returns `false` only when there is no runtime to run it on.
    pub(crate) fn spawn_sniff(&self) -> bool {
        if self.is_sniffing() {
            return true;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("no tokio runtime available, deferring sniff");
            return false;
        };
        let transport = self.clone();
        runtime.spawn(async move {
            // failures are already reported to observers and the log
            let _ = transport.sniff().await;
        });
        true
    }

    fn apply_sniff(&self, response: &Response) -> Result<Vec<Host>> {
        let nodes = response
            .body
            .as_json()
            .and_then(|body| body.get("nodes"))
            .ok_or_else(|| TransportError::Deserialization {
                message: "sniff response has no `nodes` object".to_owned(),
                body: body_text(&response.body),
            })?;

        let hosts = self.inner.pool.nodes_to_hosts(nodes);
        if hosts.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!("sniff returned no usable hosts, keeping current pool");
            return Ok(hosts);
        }
        self.inner.pool.update(hosts.clone());
        Ok(hosts)
    }
}

fn body_text(body: &ResponseBody) -> String {
    match body {
        ResponseBody::Json(value) => value.to_string(),
        ResponseBody::Text(text) => text.clone(),
        ResponseBody::Exists(_) | ResponseBody::Stream(_) => String::new(),
    }
}
