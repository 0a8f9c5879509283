//! Container model shared by listeners and the beacon.
//!
//! Ports and addresses use the same textual forms Docker reports them in:
//! a port is `number[/protocol]` and an address is
//! `hostname:number[/protocol]`. The parsers here serve both the runtime
//! listeners translating inspect output and the declared-services
//! extractor.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid protocol: {0}")]
    Protocol(String),
    #[error("invalid port: {0}")]
    Port(String),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("invalid service: {0}")]
    Service(String),
}

/// Transport protocol of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(ParseError::Protocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        })
    }
}

/// A network port. The number is never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Port {
    pub number: u16,
    pub protocol: Protocol,
}

impl Port {
    /// Parse a port from `number[/protocol]`. The protocol defaults to tcp.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (number, protocol) = match s.split_once('/') {
            Some((number, protocol)) => (number, protocol.parse()?),
            None => (s, Protocol::Tcp),
        };
        let number: u16 = number
            .parse()
            .map_err(|_| ParseError::Port(s.to_string()))?;
        if number == 0 {
            return Err(ParseError::Port(s.to_string()));
        }
        Ok(Port { number, protocol })
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// A host endpoint. The hostname may be empty or a wildcard when the
/// runtime bound the port on all interfaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub hostname: String,
    pub port: Port,
}

impl Address {
    pub fn new(hostname: impl Into<String>, port: Port) -> Self {
        Address {
            hostname: hostname.into(),
            port,
        }
    }

    /// Parse an address from `hostname:number[/protocol]`. The hostname may
    /// be empty.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (hostname, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::Address(s.to_string()))?;
        Ok(Address {
            hostname: hostname.to_string(),
            port: Port::parse(port)?,
        })
    }

    /// Whether the hostname is reachable from outside the host. An empty
    /// hostname or the `0.0.0.0` wildcard is a bind address, not a
    /// routable one.
    pub fn is_routable(&self) -> bool {
        !self.hostname.is_empty() && self.hostname != "0.0.0.0"
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// One published port rule: `container_port` is reachable at
/// `host_address`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub host_address: Address,
    pub container_port: Port,
}

/// A running container as reported by a listener.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Container {
    /// Runtime identifier, stable for the container's lifetime.
    pub id: String,
    /// Environment as `KEY=VALUE` entries.
    pub environ: Vec<String>,
    /// The container's own network identity, used when a declared port has
    /// no published mapping.
    pub hostname: String,
    pub mappings: Vec<Mapping>,
    pub labels: HashMap<String, String>,
}

impl Container {
    /// Value of the environment variable `name`, if set.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environ.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| *key == name)
                .map(|(_, value)| value)
        })
    }

    /// First mapping whose container port equals `port`.
    pub fn mapping(&self, port: Port) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.container_port == port)
    }
}

/// Lifecycle transition of a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
}

/// A lifecycle event delivered by a listener.
#[derive(Clone, Debug)]
pub struct Event {
    pub action: Action,
    pub container: Container,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_defaults_to_tcp() {
        let port = Port::parse("80").unwrap();
        assert_eq!(port.number, 80);
        assert_eq!(port.protocol, Protocol::Tcp);
    }

    #[test]
    fn parse_port_with_protocol() {
        let port = Port::parse("1643/udp").unwrap();
        assert_eq!(port.number, 1643);
        assert_eq!(port.protocol, Protocol::Udp);
    }

    #[test]
    fn parse_port_rejects_garbage() {
        assert!(Port::parse("").is_err());
        assert!(Port::parse("0").is_err());
        assert!(Port::parse("65536").is_err());
        assert!(Port::parse("80/sctp").is_err());
        assert!(Port::parse("eighty").is_err());
        assert!(Port::parse("80/TCP").is_err());
    }

    #[test]
    fn parse_address() {
        let addr = Address::parse("10.1.1.100:49000/tcp").unwrap();
        assert_eq!(addr.hostname, "10.1.1.100");
        assert_eq!(addr.port, Port::parse("49000/tcp").unwrap());
        assert_eq!(addr.to_string(), "10.1.1.100:49000/tcp");
    }

    #[test]
    fn parse_address_empty_hostname() {
        let addr = Address::parse(":49000/tcp").unwrap();
        assert_eq!(addr.hostname, "");
        assert!(!addr.is_routable());
    }

    #[test]
    fn parse_address_rejects_missing_port() {
        assert!(Address::parse("10.1.1.100").is_err());
        assert!(Address::parse("10.1.1.100:").is_err());
    }

    #[test]
    fn wildcard_is_not_routable() {
        let addr = Address::parse("0.0.0.0:49001/tcp").unwrap();
        assert!(!addr.is_routable());
        let addr = Address::parse("10.1.1.100:49001/tcp").unwrap();
        assert!(addr.is_routable());
    }

    #[test]
    fn env_lookup() {
        let container = Container {
            environ: vec![
                "PATH=/bin".to_string(),
                "SERVICES=www:80".to_string(),
                "EMPTY=".to_string(),
            ],
            ..Container::default()
        };
        assert_eq!(container.env("SERVICES"), Some("www:80"));
        assert_eq!(container.env("EMPTY"), Some(""));
        assert_eq!(container.env("MISSING"), None);
    }

    #[test]
    fn mapping_lookup_matches_port_and_protocol() {
        let container = Container {
            mappings: vec![
                Mapping {
                    host_address: Address::parse("10.1.1.100:49000/udp").unwrap(),
                    container_port: Port::parse("80/udp").unwrap(),
                },
                Mapping {
                    host_address: Address::parse("10.1.1.100:49001/tcp").unwrap(),
                    container_port: Port::parse("80/tcp").unwrap(),
                },
            ],
            ..Container::default()
        };
        let hit = container.mapping(Port::parse("80").unwrap()).unwrap();
        assert_eq!(hit.host_address.port.number, 49001);
        assert!(container.mapping(Port::parse("443").unwrap()).is_none());
    }

    #[test]
    fn mapping_lookup_first_match_wins() {
        let container = Container {
            mappings: vec![
                Mapping {
                    host_address: Address::parse("10.1.1.100:49000/tcp").unwrap(),
                    container_port: Port::parse("80/tcp").unwrap(),
                },
                Mapping {
                    host_address: Address::parse("10.1.1.200:49009/tcp").unwrap(),
                    container_port: Port::parse("80/tcp").unwrap(),
                },
            ],
            ..Container::default()
        };
        let hit = container.mapping(Port::parse("80").unwrap()).unwrap();
        assert_eq!(hit.host_address.hostname, "10.1.1.100");
    }
}
