//! Declared-service extraction.
//!
//! A container opts into registration by setting an environment variable
//! (`SERVICES` by default) of the form `name1:port1[/proto1],name2:...`.
//! Each entry resolves to the address the service is reachable at from
//! outside the container: the published mapping for that port when one
//! exists, the container's own hostname otherwise. Mappings bound to an
//! empty or wildcard address keep their host port but take the configured
//! hostname of the machine the beacon runs on.

use crate::container::{Address, Container, ParseError, Port};

/// A named service endpoint extracted from a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub address: Address,
}

/// Extract the declared services of `container`. `env_var` names the
/// declaration variable and `hostname` stands in for unroutable bind
/// addresses. A container that does not set the variable, or sets it
/// empty, declares nothing.
pub fn extract(
    container: &Container,
    env_var: &str,
    hostname: &str,
) -> Result<Vec<Service>, ParseError> {
    let declared = match container.env(env_var) {
        Some(declared) if !declared.is_empty() => declared,
        _ => return Ok(Vec::new()),
    };

    let mut services = Vec::new();
    for entry in declared.split(',') {
        let (name, port) = entry
            .split_once(':')
            .ok_or_else(|| ParseError::Service(entry.to_string()))?;
        if name.is_empty() {
            return Err(ParseError::Service(entry.to_string()));
        }
        let port = Port::parse(port)?;

        let address = match container.mapping(port) {
            Some(mapping) if mapping.host_address.is_routable() => mapping.host_address.clone(),
            Some(mapping) => Address::new(hostname, mapping.host_address.port),
            None => Address::new(container.hostname.clone(), port),
        };
        services.push(Service {
            name: name.to_string(),
            address,
        });
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Mapping;

    const HOSTNAME: &str = "host.example.net";

    fn mapped(environ: &[&str], container_hostname: &str, mappings: &[(&str, &str)]) -> Container {
        Container {
            id: "c1".to_string(),
            environ: environ.iter().map(|s| s.to_string()).collect(),
            hostname: container_hostname.to_string(),
            mappings: mappings
                .iter()
                .map(|(host, port)| Mapping {
                    host_address: Address::parse(host).unwrap(),
                    container_port: Port::parse(port).unwrap(),
                })
                .collect(),
            ..Container::default()
        }
    }

    #[test]
    fn mapped_service_uses_host_address() {
        let container = mapped(
            &["SERVICES=www:80"],
            "172.16.0.10",
            &[("10.1.1.100:49000/tcp", "80/tcp")],
        );
        let services = extract(&container, "SERVICES", HOSTNAME).unwrap();
        assert_eq!(
            services,
            vec![Service {
                name: "www".to_string(),
                address: Address::parse("10.1.1.100:49000/tcp").unwrap(),
            }]
        );
    }

    #[test]
    fn absent_or_empty_variable_declares_nothing() {
        let container = mapped(&[], "172.16.0.10", &[("10.1.1.100:49000/tcp", "80/tcp")]);
        assert!(extract(&container, "SERVICES", HOSTNAME).unwrap().is_empty());

        let container = mapped(&["SERVICES="], "172.16.0.10", &[]);
        assert!(extract(&container, "SERVICES", HOSTNAME).unwrap().is_empty());
    }

    #[test]
    fn unroutable_bind_address_takes_fallback_hostname() {
        let container = mapped(
            &["SERVICES=www:80,www-ssl:443"],
            "172.16.0.10",
            &[(":49000/tcp", "80/tcp"), ("0.0.0.0:49001/tcp", "443/tcp")],
        );
        let services = extract(&container, "SERVICES", HOSTNAME).unwrap();
        assert_eq!(
            services[0].address,
            Address::parse(&format!("{HOSTNAME}:49000/tcp")).unwrap()
        );
        assert_eq!(
            services[1].address,
            Address::parse(&format!("{HOSTNAME}:49001/tcp")).unwrap()
        );
    }

    #[test]
    fn unmapped_service_uses_container_hostname() {
        let container = mapped(&["SERVICES=api:443/tcp"], "172.16.0.12", &[]);
        let services = extract(&container, "SERVICES", HOSTNAME).unwrap();
        assert_eq!(
            services,
            vec![Service {
                name: "api".to_string(),
                address: Address::parse("172.16.0.12:443/tcp").unwrap(),
            }]
        );
    }

    #[test]
    fn mapping_must_match_protocol() {
        // The only mapping is udp; the declared tcp port falls back to the
        // container hostname at the declared port.
        let container = mapped(
            &["SERVICES=www:80"],
            "172.16.0.10",
            &[("10.1.1.100:49000/udp", "80/udp")],
        );
        let services = extract(&container, "SERVICES", HOSTNAME).unwrap();
        assert_eq!(
            services[0].address,
            Address::parse("172.16.0.10:80/tcp").unwrap()
        );
    }

    #[test]
    fn udp_service_matches_udp_mapping() {
        let container = mapped(
            &["SERVICES=radius:1643/udp"],
            "172.16.0.11",
            &[("10.1.1.100:49001/udp", "1643/udp")],
        );
        let services = extract(&container, "SERVICES", HOSTNAME).unwrap();
        assert_eq!(
            services,
            vec![Service {
                name: "radius".to_string(),
                address: Address::parse("10.1.1.100:49001/udp").unwrap(),
            }]
        );
    }

    #[test]
    fn extraction_is_deterministic_under_mapping_reorder() {
        let a = mapped(
            &["SERVICES=www:80"],
            "172.16.0.10",
            &[
                ("10.1.1.100:49000/tcp", "80/tcp"),
                ("10.1.1.100:49001/tcp", "443/tcp"),
            ],
        );
        let b = mapped(
            &["SERVICES=www:80"],
            "172.16.0.10",
            &[
                ("10.1.1.100:49001/tcp", "443/tcp"),
                ("10.1.1.100:49000/tcp", "80/tcp"),
            ],
        );
        assert_eq!(
            extract(&a, "SERVICES", HOSTNAME).unwrap(),
            extract(&b, "SERVICES", HOSTNAME).unwrap()
        );
    }

    #[test]
    fn malformed_entries_are_errors() {
        for declared in [
            "SERVICES=www",
            "SERVICES=:80",
            "SERVICES=www:eighty",
            "SERVICES=www:80/sctp",
            "SERVICES=www:80,",
        ] {
            let container = mapped(&[declared], "172.16.0.10", &[]);
            assert!(
                extract(&container, "SERVICES", HOSTNAME).is_err(),
                "{declared} should not parse"
            );
        }
    }
}
