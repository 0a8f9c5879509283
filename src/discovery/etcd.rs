//! SkyDNS-compatible etcd backend.
//!
//! Registrations are written under a key prefix as JSON
//! `{"host": ..., "port": ...}` values with the announce TTL, the layout
//! SkyDNS serves its records from. Each (name, address) pair gets its own
//! leaf key, so the same service name announced from several containers
//! keeps one record per endpoint.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde_json::json;

use super::Discovery;
use crate::container::Address;

pub struct EtcdDiscovery {
    client: Client,
    endpoint: String,
    prefix: String,
}

impl EtcdDiscovery {
    /// `endpoint` is the etcd base URL, e.g. `http://127.0.0.1:2379`;
    /// `prefix` the key directory records live under, e.g.
    /// `/skydns/local/docker`.
    pub fn new(endpoint: impl Into<String>, prefix: impl Into<String>) -> Self {
        EtcdDiscovery {
            client: Client::new(),
            endpoint: endpoint.into(),
            prefix: prefix.into(),
        }
    }

    fn key_url(&self, name: &str, address: &Address) -> String {
        format!(
            "{}/v2/keys{}/{}/{}-{}-{}",
            self.endpoint.trim_end_matches('/'),
            self.prefix,
            name,
            address.hostname.replace(['.', ':'], "-"),
            address.port.number,
            address.port.protocol,
        )
    }
}

#[async_trait]
impl Discovery for EtcdDiscovery {
    async fn announce(&self, name: &str, address: &Address, ttl: Duration) -> Result<()> {
        let value = json!({
            "host": address.hostname,
            "port": address.port.number,
        })
        .to_string();
        let ttl = ttl.as_secs().to_string();
        let response = self
            .client
            .put(self.key_url(name, address))
            .form(&[("value", value.as_str()), ("ttl", ttl.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "etcd announce of {} failed: {}",
                name,
                response.status()
            ));
        }
        debug!("announced {} at {}", name, address);
        Ok(())
    }

    async fn shutdown(&self, name: &str, address: &Address) -> Result<()> {
        let response = self
            .client
            .delete(self.key_url(name, address))
            .send()
            .await?;
        // 404 means the record already expired or was never written.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(anyhow!(
                "etcd shutdown of {} failed: {}",
                name,
                response.status()
            ));
        }
        debug!("shut down {} at {}", name, address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_one_leaf_per_endpoint() {
        let discovery = EtcdDiscovery::new("http://127.0.0.1:2379/", "/skydns/local/docker");
        let address = Address::parse("10.1.1.100:49000/tcp").unwrap();
        assert_eq!(
            discovery.key_url("www", &address),
            "http://127.0.0.1:2379/v2/keys/skydns/local/docker/www/10-1-1-100-49000-tcp"
        );
    }

    #[test]
    fn key_layout_tolerates_hostnames() {
        let discovery = EtcdDiscovery::new("http://etcd:2379", "/skydns/local/docker");
        let address = Address::parse("node1.example.net:1643/udp").unwrap();
        assert_eq!(
            discovery.key_url("radius", &address),
            "http://etcd:2379/v2/keys/skydns/local/docker/radius/node1-example-net-1643-udp"
        );
    }
}
