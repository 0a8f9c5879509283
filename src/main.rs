//! Herald daemon entry point.

use std::time::Duration;

use log::{error, info};
use tokio::signal;

use herald::beacon::{Beacon, BeaconConfig};
use herald::config::Config;
use herald::discovery::EtcdDiscovery;
use herald::filter::Filter;
use herald::listener::{DockerListener, Listener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = Config::load()?;
    info!("starting herald with config: {:?}", cfg);

    let filter = Filter::parse(&cfg.filter)?;
    let listener = DockerListener::new(Duration::from_secs(cfg.poll_interval));
    let discovery = EtcdDiscovery::new(cfg.etcd_endpoint.clone(), cfg.etcd_prefix.clone());

    let beacon = Beacon::new(
        BeaconConfig {
            heartbeat: Duration::from_secs(cfg.heartbeat),
            ttl: Duration::from_secs(cfg.ttl),
            env_var: cfg.env_var.clone(),
            hostname: cfg.hostname.clone(),
            filter,
        },
        vec![Box::new(listener) as Box<dyn Listener>],
        Box::new(discovery),
    )?;
    let handle = beacon.close_handle();

    let run = tokio::spawn(beacon.run());

    match signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => error!("unable to listen for shutdown signal: {}", e),
    }

    handle.close().await?;
    run.await??;

    info!("shutdown complete");
    Ok(())
}
