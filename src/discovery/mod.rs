//! Discovery backends.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::container::Address;

pub mod etcd;
pub use etcd::EtcdDiscovery;

/// A store that serves announced endpoints to service consumers.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Register or refresh `name` at `address` for `ttl`. Announcing the
    /// same pair again is idempotent and resets the TTL.
    async fn announce(&self, name: &str, address: &Address, ttl: Duration) -> Result<()>;

    /// Withdraw the registration of `name` at `address`. Withdrawing a
    /// name that is not registered is not an error.
    async fn shutdown(&self, name: &str, address: &Address) -> Result<()>;
}
