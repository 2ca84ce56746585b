//! Services and their backends, decoded once from YAML. Policy belongs to
//! the service; backend order is the slave index in the upstream table.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;
use udplb_common::{Strategy, TcAction};

use crate::error::DecodeError;

/// Upper bound on backends per service, fixed by the one-byte slave index.
pub const MAX_BACKENDS: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceOptions {
    pub tc_action: TcAction,
    pub strategy: Strategy,
}

/// A virtual service and its ordered backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    key: Endpoint,
    options: ServiceOptions,
    backends: Vec<Endpoint>,
}

impl Service {
    pub fn new(
        key: Endpoint,
        options: ServiceOptions,
        backends: Vec<Endpoint>,
    ) -> Result<Self, DecodeError> {
        if backends.len() > MAX_BACKENDS {
            return Err(DecodeError::TooManyBackends {
                service: key.to_string(),
                count: backends.len(),
            });
        }
        Ok(Self {
            key,
            options,
            backends,
        })
    }

    pub fn key(&self) -> Endpoint {
        self.key
    }

    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    pub fn backends(&self) -> &[Endpoint] {
        &self.backends
    }

    /// Number of backends, as stored in the master record.
    pub fn count(&self) -> u8 {
        // bounded by `Service::new`
        self.backends.len() as u8
    }
}

/// How to treat a backend address that does not resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendResolution {
    /// Fail the whole decode.
    #[default]
    Strict,
    /// Log the backend and leave it out of its service.
    SkipUnresolved,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub backend_resolution: BackendResolution,
}

/// The full, validated set of services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    services: Vec<Service>,
}

impl Config {
    pub fn new(services: Vec<Service>) -> Result<Self, DecodeError> {
        let mut seen = HashSet::with_capacity(services.len());
        for service in &services {
            if !seen.insert(service.key) {
                return Err(DecodeError::DuplicateService {
                    service: service.key,
                });
            }
        }
        Ok(Self { services })
    }

    pub fn load(path: &Path, opts: &DecodeOptions) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        Self::from_reader(file, opts)
    }

    pub fn from_reader<R: Read>(mut reader: R, opts: &DecodeOptions) -> Result<Self, DecodeError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents, opts)
    }

    pub fn from_yaml_str(contents: &str, opts: &DecodeOptions) -> Result<Self, DecodeError> {
        let raw: Vec<RawService> = serde_yaml::from_str(contents)?;
        let services = raw
            .into_iter()
            .map(|service| service.validate(opts))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(services)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Every backend of every service, in declaration order.
    pub fn backends(&self) -> impl Iterator<Item = &Endpoint> + '_ {
        self.services.iter().flat_map(|s| s.backends.iter())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    key: RawEndpoint,
    #[serde(default)]
    tc_action: String,
    #[serde(default)]
    strategy: String,
    #[serde(default, alias = "backends")]
    upstream: Vec<RawEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    address: String,
    port: u16,
}

impl fmt::Display for RawEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl RawEndpoint {
    fn resolve(&self) -> Result<Endpoint, DecodeError> {
        let address = resolve_ipv4(&self.address, self.port)?;
        if address.is_unspecified() || address.is_broadcast() || address.is_multicast() {
            return Err(DecodeError::NotHostAddress { address });
        }
        Ok(Endpoint::new(address, self.port))
    }
}

impl RawService {
    fn validate(self, opts: &DecodeOptions) -> Result<Service, DecodeError> {
        let name = self.key.to_string();
        let key = self.key.resolve()?;
        let options = ServiceOptions {
            tc_action: parse_tc_action(&name, &self.tc_action)?,
            strategy: parse_strategy(&name, &self.strategy)?,
        };

        let mut backends = Vec::with_capacity(self.upstream.len());
        for upstream in &self.upstream {
            match upstream.resolve() {
                Ok(backend) => backends.push(backend),
                Err(err @ DecodeError::Unresolvable { .. })
                    if opts.backend_resolution == BackendResolution::SkipUnresolved =>
                {
                    warn!("service {name}: skipping backend {upstream}: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        debug!("service {key}: {} backend(s)", backends.len());

        Service::new(key, options, backends)
    }
}

fn parse_tc_action(service: &str, value: &str) -> Result<TcAction, DecodeError> {
    match value {
        "" | "pass" => Ok(TcAction::Pass),
        "block" => Ok(TcAction::Drop),
        _ => Err(DecodeError::TcAction {
            service: service.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_strategy(service: &str, value: &str) -> Result<Strategy, DecodeError> {
    match value {
        "" | "src-port" => Ok(Strategy::SrcPort),
        "src-ip" => Ok(Strategy::SrcIp),
        "payload" => Err(DecodeError::UnsupportedStrategy {
            service: service.to_string(),
        }),
        _ => Err(DecodeError::Strategy {
            service: service.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Accepts a literal IPv4 address or a host name with at least one A record.
fn resolve_ipv4(host: &str, port: u16) -> Result<Ipv4Addr, DecodeError> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let unresolvable = || DecodeError::Unresolvable {
        address: host.to_string(),
    };
    if host.is_empty() || host.parse::<std::net::IpAddr>().is_ok() {
        return Err(unresolvable());
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|_| unresolvable())?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(unresolvable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEST_CONFIG_YAML: &str = r#"
- key:
    address: 127.0.0.1
    port: 8125
  tc_action: pass
  strategy: src-port
  upstream:
    - address: 172.17.0.2
      port: 8125
    - address: 172.17.0.3
      port: 8125
"#;

    fn decode(yaml: &str) -> Result<Config, DecodeError> {
        Config::from_yaml_str(yaml, &DecodeOptions::default())
    }

    #[test]
    fn decodes_services_in_order() {
        let cfg = decode(TEST_CONFIG_YAML).unwrap();
        assert_eq!(cfg.len(), 1);

        let service = &cfg.services()[0];
        assert_eq!(service.key(), Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 8125));
        assert_eq!(service.options(), ServiceOptions::default());
        assert_eq!(
            service.backends(),
            &[
                Endpoint::new(Ipv4Addr::new(172, 17, 0, 2), 8125),
                Endpoint::new(Ipv4Addr::new(172, 17, 0, 3), 8125),
            ]
        );
        assert_eq!(service.count(), 2);
    }

    #[test]
    fn policy_values_map_to_codes() {
        let yaml = r#"
- key: { address: 10.0.0.1, port: 53 }
  tc_action: block
  strategy: src-ip
  backends:
    - { address: 10.0.1.1, port: 53 }
- key: { address: 10.0.0.1, port: 54 }
"#;
        let cfg = decode(yaml).unwrap();
        assert_eq!(
            cfg.services()[0].options(),
            ServiceOptions {
                tc_action: TcAction::Drop,
                strategy: Strategy::SrcIp,
            }
        );
        assert_eq!(cfg.services()[1].options(), ServiceOptions::default());
        assert!(cfg.services()[1].backends().is_empty());
        assert_eq!(cfg.backends().count(), 1);
    }

    #[test]
    fn unknown_tc_action_is_rejected() {
        let yaml = TEST_CONFIG_YAML.replace("tc_action: pass", "tc_action: blocked");
        match decode(&yaml) {
            Err(DecodeError::TcAction { service, value }) => {
                assert_eq!(service, "127.0.0.1:8125");
                assert_eq!(value, "blocked");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn payload_strategy_is_unsupported() {
        let yaml = TEST_CONFIG_YAML.replace("strategy: src-port", "strategy: payload");
        assert!(matches!(
            decode(&yaml),
            Err(DecodeError::UnsupportedStrategy { .. })
        ));

        let yaml = TEST_CONFIG_YAML.replace("strategy: src-port", "strategy: round-robin");
        assert!(matches!(decode(&yaml), Err(DecodeError::Strategy { .. })));
    }

    #[test]
    fn per_backend_tc_action_is_rejected() {
        let yaml = r#"
- key: { address: 127.0.0.1, port: 8125 }
  upstream:
    - { address: 172.17.0.2, port: 8125, tc_action: block }
"#;
        assert!(matches!(decode(yaml), Err(DecodeError::Yaml(_))));
    }

    #[test]
    fn port_must_fit_in_sixteen_bits() {
        let yaml = TEST_CONFIG_YAML.replace("port: 8125\n  tc_action", "port: 70000\n  tc_action");
        assert!(matches!(decode(&yaml), Err(DecodeError::Yaml(_))));
    }

    #[test]
    fn non_host_addresses_are_rejected() {
        for address in ["0.0.0.0", "255.255.255.255", "239.1.1.1"] {
            let yaml = TEST_CONFIG_YAML.replace("172.17.0.3", address);
            assert!(
                matches!(decode(&yaml), Err(DecodeError::NotHostAddress { .. })),
                "{address}"
            );
        }
    }

    #[test]
    fn ipv6_addresses_are_rejected() {
        let yaml = TEST_CONFIG_YAML.replace("127.0.0.1", "\"::1\"");
        assert!(matches!(
            decode(&yaml),
            Err(DecodeError::Unresolvable { .. })
        ));
    }

    #[test]
    fn unresolved_backend_fails_strict_decode() {
        let yaml = TEST_CONFIG_YAML.replace("172.17.0.3", "\"\"");
        assert!(matches!(
            decode(&yaml),
            Err(DecodeError::Unresolvable { .. })
        ));
    }

    #[test]
    fn unresolved_backend_can_be_skipped() {
        let yaml = TEST_CONFIG_YAML.replace("172.17.0.3", "\"\"");
        let opts = DecodeOptions {
            backend_resolution: BackendResolution::SkipUnresolved,
        };
        let cfg = Config::from_yaml_str(&yaml, &opts).unwrap();
        assert_eq!(
            cfg.services()[0].backends(),
            &[Endpoint::new(Ipv4Addr::new(172, 17, 0, 2), 8125)]
        );
    }

    #[test]
    fn skipping_does_not_cover_non_host_backends() {
        let opts = DecodeOptions {
            backend_resolution: BackendResolution::SkipUnresolved,
        };
        for address in ["0.0.0.0", "255.255.255.255", "239.1.1.1"] {
            let yaml = TEST_CONFIG_YAML.replace("172.17.0.3", address);
            assert!(
                matches!(
                    Config::from_yaml_str(&yaml, &opts),
                    Err(DecodeError::NotHostAddress { .. })
                ),
                "{address}"
            );
        }
    }

    #[test]
    fn unresolved_service_address_is_always_fatal() {
        let yaml = TEST_CONFIG_YAML.replace("127.0.0.1", "\"\"");
        let opts = DecodeOptions {
            backend_resolution: BackendResolution::SkipUnresolved,
        };
        assert!(matches!(
            Config::from_yaml_str(&yaml, &opts),
            Err(DecodeError::Unresolvable { .. })
        ));
    }

    #[test]
    fn duplicate_services_are_rejected() {
        let yaml = r#"
- key: { address: 10.0.0.1, port: 53 }
- key: { address: 10.0.0.1, port: 53 }
"#;
        assert!(matches!(
            decode(yaml),
            Err(DecodeError::DuplicateService { .. })
        ));
    }

    #[test]
    fn backend_count_is_bounded() {
        let key = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 53);
        let backends = vec![Endpoint::new(Ipv4Addr::new(10, 0, 1, 1), 53); MAX_BACKENDS + 1];
        assert!(matches!(
            Service::new(key, ServiceOptions::default(), backends.clone()),
            Err(DecodeError::TooManyBackends { count: 256, .. })
        ));
        let service =
            Service::new(key, ServiceOptions::default(), backends[..MAX_BACKENDS].to_vec())
                .unwrap();
        assert_eq!(service.count(), 255);
    }

    #[test]
    fn reads_from_a_reader() {
        let cfg = Config::from_reader(TEST_CONFIG_YAML.as_bytes(), &DecodeOptions::default())
            .unwrap();
        assert_eq!(cfg.backends().count(), 2);
    }
}
