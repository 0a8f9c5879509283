//! Lifecycle event sources.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::container::Event;

pub mod docker;
pub use docker::DockerListener;

/// A source of container lifecycle events.
///
/// `start` must return promptly and deliver events into `sink` from its
/// own task. For a given container id the source delivers events in the
/// order they occurred, and it may emit repeated Adds without an
/// intervening Remove. `stop` asks the source to cease and resolves once
/// it has.
#[async_trait]
pub trait Listener: Send {
    fn start(&mut self, sink: mpsc::Sender<Event>);

    async fn stop(&mut self) -> Result<()>;
}
