use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::Host;

/// One entry of the `nodes` object returned by the node-info endpoint.
#[derive(Debug, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub http: Option<HttpInfo>,
}

#[derive(Debug, Deserialize)]
pub struct HttpInfo {
    pub publish_address: String,
}

/// Translates a node-info `nodes` object into hosts.
///
/// Nodes without an HTTP publish address, or whose address does not form a
/// valid URL, are skipped.
pub(crate) fn hosts_from_nodes(nodes: &Value, scheme: &str) -> Vec<Host> {
    let Some(nodes) = nodes.as_object() else {
        return Vec::new();
    };

    let mut hosts = Vec::with_capacity(nodes.len());
    for (id, node) in nodes {
        let Ok(info) = NodeInfo::deserialize(node) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(node = %id, "skipping node with malformed info");
            continue;
        };
        let Some(http) = info.http else {
            continue;
        };

        let address = normalize_publish_address(&http.publish_address);
        let address = if address.starts_with("http") {
            address
        } else {
            format!("{scheme}://{address}")
        };

        match Url::parse(&address) {
            Ok(url) => hosts.push(Host {
                id: id.clone(),
                url,
                roles: info.roles,
            }),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    node = %id,
                    address = %address,
                    "skipping node with invalid address: {}",
                    _err
                );
            }
        }
    }
    hosts
}

/// Reduces `hostname/ip:port` to `hostname:port`.
fn normalize_publish_address(address: &str) -> String {
    match address.split_once('/') {
        Some((hostname, rest)) if !hostname.is_empty() => match rest.rsplit_once(':') {
            Some((_, port)) => format!("{hostname}:{port}"),
            None => hostname.to_owned(),
        },
        Some((_, rest)) => rest.to_owned(),
        None => address.to_owned(),
    }
}
