//! The reconciliation engine.
//!
//! A [`Beacon`] fans lifecycle events from its listeners, heartbeat ticks,
//! and the close request into a single loop which is the only thing that
//! touches the registry or the discovery backend. Effects therefore reach
//! the backend in the order their inputs were consumed, without locking.

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::container::{Action, Container, Event};
use crate::discovery::Discovery;
use crate::extract::extract;
use crate::filter::Filter;
use crate::listener::Listener;
use crate::registry::{Registration, RegistrationKey, Registry, Upsert};

const EVENT_BUFFER: usize = 128;

/// Construction parameters for a [`Beacon`].
pub struct BeaconConfig {
    /// Interval between re-announcements of everything registered.
    pub heartbeat: Duration,
    /// Grace beyond the heartbeat; announcements carry a TTL of
    /// `heartbeat + ttl` so a single missed beat does not expire them.
    pub ttl: Duration,
    /// Environment variable containers declare their services in.
    pub env_var: String,
    /// Hostname announced in place of unroutable mapping bind addresses.
    pub hostname: String,
    /// Containers must match to be registered.
    pub filter: Filter,
}

/// Asks a running [`Beacon`] to shut down.
#[derive(Clone)]
pub struct CloseHandle {
    close: mpsc::Sender<oneshot::Sender<()>>,
}

impl CloseHandle {
    /// Stop the beacon. Listeners are stopped first, then every live
    /// registration is withdrawn. Resolves once the beacon has fully
    /// wound down; errors if it is not running.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.close
            .send(tx)
            .await
            .map_err(|_| anyhow!("beacon is not running"))?;
        rx.await
            .map_err(|_| anyhow!("beacon exited before confirming close"))?;
        Ok(())
    }
}

pub struct Beacon {
    heartbeat: Duration,
    ttl: Duration,
    env_var: String,
    hostname: String,
    filter: Filter,
    listeners: Vec<Box<dyn Listener>>,
    discovery: Box<dyn Discovery>,
    registry: Registry,
    close_tx: mpsc::Sender<oneshot::Sender<()>>,
    close_rx: Option<mpsc::Receiver<oneshot::Sender<()>>>,
}

impl Beacon {
    pub fn new(
        config: BeaconConfig,
        listeners: Vec<Box<dyn Listener>>,
        discovery: Box<dyn Discovery>,
    ) -> Result<Self> {
        if config.heartbeat.is_zero() {
            return Err(anyhow!("heartbeat must be greater than zero"));
        }
        if config.ttl.is_zero() {
            return Err(anyhow!("ttl must be greater than zero"));
        }
        if listeners.is_empty() {
            return Err(anyhow!("at least one listener is required"));
        }
        let (close_tx, close_rx) = mpsc::channel(1);
        Ok(Beacon {
            heartbeat: config.heartbeat,
            ttl: config.ttl,
            env_var: config.env_var,
            hostname: config.hostname,
            filter: config.filter,
            listeners,
            discovery,
            registry: Registry::new(),
            close_tx,
            close_rx: Some(close_rx),
        })
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            close: self.close_tx.clone(),
        }
    }

    /// Run until closed. Every listener is started with a sink into the
    /// reconciliation loop; the loop applies events as they arrive,
    /// re-announces everything on each heartbeat, and winds down when the
    /// close handle fires.
    pub async fn run(mut self) -> Result<()> {
        let mut close_rx = self
            .close_rx
            .take()
            .ok_or_else(|| anyhow!("beacon already ran"))?;

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
        for listener in &mut self.listeners {
            listener.start(event_tx.clone());
        }
        drop(event_tx);
        info!("beacon running with {} listeners", self.listeners.len());

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut events_open = true;
        let ack = loop {
            tokio::select! {
                Some(ack) = close_rx.recv() => break ack,
                event = event_rx.recv(), if events_open => match event {
                    Some(event) => self.apply(event).await,
                    None => {
                        warn!("all listeners stopped delivering events");
                        events_open = false;
                    }
                },
                _ = heartbeat.tick() => self.heartbeat().await,
            }
        };

        // Unblock any listener still waiting on channel capacity, then
        // stop each one and wait for it to confirm.
        drop(event_rx);
        for listener in &mut self.listeners {
            if let Err(e) = listener.stop().await {
                error!("listener failed to stop cleanly: {}", e);
            }
        }

        for entry in self.registry.drain() {
            if let Err(e) = self
                .discovery
                .shutdown(&entry.key.service, &entry.address)
                .await
            {
                warn!(
                    "shutdown of {} at {} failed: {}",
                    entry.key.service, entry.address, e
                );
            }
        }

        let _ = ack.send(());
        info!("beacon closed");
        Ok(())
    }

    async fn apply(&mut self, event: Event) {
        if !self.filter.matches(&event.container) {
            debug!("container {} does not match filter, ignoring", event.container.id);
            return;
        }
        match event.action {
            Action::Add => self.add(event.container).await,
            Action::Remove => self.remove(event.container).await,
        }
    }

    async fn add(&mut self, container: Container) {
        let services = match extract(&container, &self.env_var, &self.hostname) {
            Ok(services) => services,
            Err(e) => {
                warn!("bad service declaration on container {}: {}", container.id, e);
                return;
            }
        };

        let ttl = self.heartbeat + self.ttl;
        for service in services {
            let key = RegistrationKey::new(service.name.as_str(), container.id.as_str());
            if self.registry.upsert(key, service.address.clone(), ttl) == Upsert::Unchanged {
                debug!("{} already announced for {}", service.name, container.id);
                continue;
            }
            info!(
                "announcing {} at {} for container {}",
                service.name, service.address, container.id
            );
            if let Err(e) = self
                .discovery
                .announce(&service.name, &service.address, ttl)
                .await
            {
                // The registry keeps the intended state; the next
                // heartbeat retries the announcement.
                error!("announce of {} failed: {}", service.name, e);
            }
        }
    }

    async fn remove(&mut self, container: Container) {
        let mut removed = Vec::new();
        match extract(&container, &self.env_var, &self.hostname) {
            Ok(services) => {
                for service in services {
                    let key = RegistrationKey::new(service.name, container.id.as_str());
                    removed.extend(self.registry.remove(&key));
                }
            }
            Err(e) => warn!(
                "bad service declaration on removed container {}: {}",
                container.id, e
            ),
        }
        // Sweep whatever else the container still owns, e.g. services it
        // declared at add time but no longer does.
        removed.extend(self.registry.remove_container(&container.id));

        for entry in removed {
            info!(
                "withdrawing {} at {} for container {}",
                entry.key.service, entry.address, container.id
            );
            if let Err(e) = self
                .discovery
                .shutdown(&entry.key.service, &entry.address)
                .await
            {
                error!("shutdown of {} failed: {}", entry.key.service, e);
            }
        }
    }

    /// Re-announce everything so backend TTLs do not lapse. Entries whose
    /// announce previously failed get retried here.
    async fn heartbeat(&mut self) {
        let entries: Vec<Registration> = self.registry.all();
        debug!("heartbeat: re-announcing {} registrations", entries.len());
        for entry in entries {
            if let Err(e) = self
                .discovery
                .announce(&entry.key.service, &entry.address, entry.ttl)
                .await
            {
                error!("heartbeat announce of {} failed: {}", entry.key.service, e);
            }
        }
    }
}
