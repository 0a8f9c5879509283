//! Docker event source.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};

use super::Listener;
use crate::container::{Action, Address, Container, Event, Mapping, Port};

const CONNECT_RETRY: Duration = Duration::from_secs(5);
const STREAM_RETRY: Duration = Duration::from_secs(2);

/// Listens to the local Docker daemon for container lifecycle events.
///
/// The event stream is paired with a periodic poll of the container list
/// so transitions missed while the stream was down are still observed;
/// the initial poll seeds the beacon with everything already running.
pub struct DockerListener {
    poll_interval: Duration,
    worker: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl DockerListener {
    pub fn new(poll_interval: Duration) -> Self {
        DockerListener {
            poll_interval,
            worker: None,
        }
    }
}

#[async_trait]
impl Listener for DockerListener {
    fn start(&mut self, sink: mpsc::Sender<Event>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let poll_interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            Monitor {
                sink,
                stop: stop_rx,
                poll_interval,
                known: HashMap::new(),
            }
            .run()
            .await;
        });
        self.worker = Some((stop_tx, handle));
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(true);
            handle.await?;
        }
        Ok(())
    }
}

struct Monitor {
    sink: mpsc::Sender<Event>,
    stop: watch::Receiver<bool>,
    poll_interval: Duration,
    /// Containers we have emitted an Add for and not yet a Remove. Lets
    /// Removes carry the last-known container snapshot and keeps polls
    /// from re-adding what the event stream already delivered.
    known: HashMap<String, Container>,
}

impl Monitor {
    async fn run(&mut self) {
        info!("docker listener started");
        loop {
            let docker = match Docker::connect_with_local_defaults() {
                Ok(docker) => docker,
                Err(e) => {
                    error!("failed to connect to docker: {}, retrying in 5s", e);
                    if self.wait(CONNECT_RETRY).await {
                        break;
                    }
                    continue;
                }
            };
            if self.watch(&docker).await {
                break;
            }
            warn!("docker event stream ended, reconnecting in 2s");
            if self.wait(STREAM_RETRY).await {
                break;
            }
        }
        info!("docker listener stopped");
    }

    /// Sleep for `timeout`, returning true if stop was signalled first.
    async fn wait(&mut self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.stop.changed() => true,
            _ = sleep(timeout) => false,
        }
    }

    /// Consume the event stream until it breaks or stop is signalled.
    /// Returns true when the listener should stop for good.
    async fn watch(&mut self, docker: &Docker) -> bool {
        let opts = EventsOptions::<String> {
            filters: [
                ("type", ["container"].as_slice()),
                (
                    "event",
                    ["start", "unpause", "die", "kill", "stop", "pause"].as_slice(),
                ),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        };
        let mut stream = docker.events(Some(opts));

        // Subscribe first, then load the current containers, so nothing
        // that starts in between is missed.
        if self.poll(docker).await {
            return true;
        }

        let mut poll = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        info!("listening for docker events");
        loop {
            tokio::select! {
                _ = self.stop.changed() => return true,
                _ = poll.tick() => {
                    if self.poll(docker).await {
                        return true;
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(event)) => {
                        if self.dispatch(docker, event).await {
                            return true;
                        }
                    }
                    Some(Err(e)) => {
                        error!("docker event stream error: {}", e);
                        return false;
                    }
                    None => return false,
                },
            }
        }
    }

    async fn dispatch(&mut self, docker: &Docker, event: EventMessage) -> bool {
        let id = match event.actor.and_then(|actor| actor.id) {
            Some(id) => id,
            None => return false,
        };
        match event.action.as_deref() {
            Some("start") | Some("unpause") => self.add(docker, &id).await,
            Some("die") | Some("kill") | Some("stop") | Some("pause") => self.remove(&id).await,
            other => {
                debug!("ignoring docker event {:?} for {}", other, id);
                false
            }
        }
    }

    /// Emit an Add for `id` unless it is already known.
    async fn add(&mut self, docker: &Docker, id: &str) -> bool {
        if self.known.contains_key(id) {
            return false;
        }
        let container = match inspect(docker, id).await {
            Ok(container) => container,
            Err(e) => {
                warn!("docker inspect failed on {}: {}", id, e);
                return false;
            }
        };
        debug!("docker started container {}", id);
        self.known.insert(id.to_string(), container.clone());
        self.emit(Event {
            action: Action::Add,
            container,
        })
        .await
    }

    async fn remove(&mut self, id: &str) -> bool {
        if let Some(container) = self.known.remove(id) {
            debug!("docker stopped container {}", id);
            return self
                .emit(Event {
                    action: Action::Remove,
                    container,
                })
                .await;
        }
        false
    }

    /// Send an event to the beacon. Returns true when the listener should
    /// stop because the beacon is gone or stopping.
    async fn emit(&mut self, event: Event) -> bool {
        tokio::select! {
            _ = self.stop.changed() => true,
            sent = self.sink.send(event) => sent.is_err(),
        }
    }

    /// Reconcile the known set against the runtime's container list.
    async fn poll(&mut self, docker: &Docker) -> bool {
        debug!("docker poll started");
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let listed = match docker.list_containers(Some(opts)).await {
            Ok(listed) => listed,
            Err(e) => {
                error!("list containers failed: {}", e);
                return false;
            }
        };

        let mut running = HashSet::with_capacity(listed.len());
        for summary in listed {
            let id = match summary.id {
                Some(id) => id,
                None => continue,
            };
            running.insert(id.clone());
            if self.add(docker, &id).await {
                return true;
            }
        }

        let gone: Vec<String> = self
            .known
            .keys()
            .filter(|id| !running.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            if self.remove(&id).await {
                return true;
            }
        }
        debug!("docker poll complete");
        false
    }
}

/// Build a [`Container`] from a Docker inspect response.
async fn inspect(docker: &Docker, id: &str) -> Result<Container> {
    let detail = docker.inspect_container(id, None).await?;
    let config = detail.config.unwrap_or_default();
    let network = detail.network_settings.unwrap_or_default();

    let mut mappings = Vec::new();
    for (port, bindings) in network.ports.into_iter().flatten() {
        let container_port = Port::parse(&port)?;
        for binding in bindings.into_iter().flatten() {
            let number: u16 = binding.host_port.as_deref().unwrap_or_default().parse()?;
            mappings.push(Mapping {
                host_address: Address::new(
                    binding.host_ip.unwrap_or_default(),
                    Port {
                        number,
                        protocol: container_port.protocol,
                    },
                ),
                container_port,
            });
        }
    }

    Ok(Container {
        id: detail.id.unwrap_or_else(|| id.to_string()),
        environ: config.env.unwrap_or_default(),
        hostname: network.ip_address.unwrap_or_default(),
        mappings,
        labels: config.labels.unwrap_or_default(),
    })
}
