use crate::error::Error;
use crate::lease::{LeaseConfig, TtlConfig};
use crate::name;
use crate::server::AddressMode;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

/// Default UDP port range reserved for SRP.
const DEFAULT_PORT_MIN: u16 = 53535;
const DEFAULT_PORT_MAX: u16 = 53554;
/// Default time the service-update handler gets to acknowledge an update.
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Domain the server is authoritative for. A trailing dot is appended
    /// if missing.
    pub domain: String,
    /// Address the SRP UDP socket binds to; the port is picked from
    /// [`port_min`][Config::port_min]..=[`port_max`][Config::port_max].
    pub dns_bind_addr: IpAddr,
    pub port_min: u16,
    pub port_max: u16,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "handler_timeout_ms")]
    pub handler_timeout: Duration,
    pub address_mode: AddressMode,
    pub anycast_sequence_number: u8,
    pub lease: LeaseConfig,
    pub ttl: TtlConfig,
    /// Bind address of the read-only introspection API; omit to disable it.
    pub api_bind_addr: Option<SocketAddr>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub api_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            domain: name::DEFAULT_DOMAIN.to_string(),
            dns_bind_addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port_min: DEFAULT_PORT_MIN,
            port_max: DEFAULT_PORT_MAX,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            address_mode: AddressMode::Unicast,
            anycast_sequence_number: 0,
            lease: LeaseConfig::default(),
            ttl: TtlConfig::default(),
            api_bind_addr: None,
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file can't be read,
    /// [`Error::InvalidJson`] for malformed content, and
    /// [`Error::InvalidConfig`] for values that fail validation.
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.validate()?;
        Ok(conf)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !self.lease.is_valid() {
            return Err(Error::InvalidConfig("lease range minimum exceeds maximum"));
        }
        if !self.ttl.is_valid() {
            return Err(Error::InvalidConfig("TTL range minimum exceeds maximum"));
        }
        if self.port_min > self.port_max {
            return Err(Error::InvalidConfig("UDP port range minimum exceeds maximum"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.domain, "default.service.arpa.");
        assert_eq!(config.port_min, 53535);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "domain": "mesh.example.", "handler_timeout_ms": 750, "lease": { "max_lease": 3600 } }"#,
        )
        .unwrap();
        assert_eq!(config.domain, "mesh.example.");
        assert_eq!(config.handler_timeout, Duration::from_millis(750));
        assert_eq!(config.lease.max_lease, 3600);
        assert_eq!(config.lease.min_lease, LeaseConfig::default().min_lease);
        assert_eq!(config.api_timeout, DEFAULT_API_TIMEOUT);
    }
}
