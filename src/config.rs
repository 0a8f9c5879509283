use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Hostname announced for services whose mapping binds an empty or
    /// wildcard address.
    pub hostname: String,
    /// Seconds between heartbeat re-announcements.
    pub heartbeat: u64,
    /// Seconds of TTL grace beyond the heartbeat.
    pub ttl: u64,
    /// Environment variable listing a container's services.
    pub env_var: String,
    /// Label filter pattern, `label1=value1,...`. Empty matches every
    /// container.
    pub filter: String,
    /// Seconds between reconciling polls of the container list.
    pub poll_interval: u64,
    /// etcd endpoint announcements are written to.
    pub etcd_endpoint: String,
    /// Key prefix announcements are written under.
    pub etcd_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into()),
            heartbeat: 30,
            ttl: 30,
            env_var: "SERVICES".into(),
            filter: String::new(),
            poll_interval: 30,
            etcd_endpoint: "http://127.0.0.1:2379".into(),
            etcd_prefix: "/skydns/local/docker".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("herald.toml"))
            .merge(Json::file("herald.json"))
            .merge(Env::prefixed("HERALD_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat == 0 {
            anyhow::bail!("heartbeat must be greater than zero");
        }
        if self.ttl == 0 {
            anyhow::bail!("ttl must be greater than zero");
        }
        if self.poll_interval == 0 {
            anyhow::bail!("poll_interval must be greater than zero");
        }
        if self.hostname.is_empty() {
            anyhow::bail!("hostname must not be empty");
        }
        Ok(())
    }
}
