use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest host name label accepted from a client (RFC 1035 §2.3.4).
const MAX_HOSTNAME_LENGTH: usize = 63;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// NAK requests this server cannot honor instead of staying silent.
    pub authoritative: bool,
    /// Addresses to bind on. Empty means the wildcard address.
    pub server_addresses: Vec<Ipv4Addr>,
    pub leases: LeaseConfig,
    pub write_to_disk: bool,
    pub persist_interval_seconds: u64,
    pub state_file: PathBuf,
    /// Messages kept per client by the in-memory history.
    pub history_size: usize,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaseConfig {
    pub pool: PoolConfig,
    /// Client id (or MAC address) to fixed address.
    #[serde(rename = "static")]
    pub static_assignments: BTreeMap<String, StaticAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub lease_seconds: u32,
    pub network_mask: Ipv4Addr,
    pub ranges: Vec<AddressRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAssignment {
    pub ip: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 86400,
            network_mask: Ipv4Addr::new(255, 255, 255, 0),
            ranges: vec![AddressRange {
                start: Ipv4Addr::new(192, 168, 1, 100),
                end: Ipv4Addr::new(192, 168, 1, 200),
            }],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authoritative: true,
            server_addresses: Vec::new(),
            leases: LeaseConfig::default(),
            write_to_disk: true,
            persist_interval_seconds: 300,
            state_file: PathBuf::from("status/dhcp.json"),
            history_size: 20,
            gateway: None,
            dns_servers: Vec::new(),
            domain_name: None,
        }
    }
}

impl Config {
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let pool = &self.leases.pool;

        for range in &pool.ranges {
            if u32::from(range.start) > u32::from(range.end) {
                return Err(Error::InvalidConfig(format!(
                    "range start {} must be less than or equal to end {}",
                    range.start, range.end
                )));
            }
        }

        if pool.lease_seconds == 0 {
            return Err(Error::InvalidConfig(
                "leaseSeconds must be greater than 0".to_string(),
            ));
        }

        let mask = u32::from(pool.network_mask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(Error::InvalidConfig(format!(
                "networkMask {} is not a contiguous prefix",
                pool.network_mask
            )));
        }

        let in_pool = |ip: Ipv4Addr| {
            pool.ranges
                .iter()
                .any(|range| (u32::from(range.start)..=u32::from(range.end)).contains(&u32::from(ip)))
        };

        for address in &self.server_addresses {
            if in_pool(*address) {
                return Err(Error::InvalidConfig(format!(
                    "server address {} must not be within a pool range",
                    address
                )));
            }
        }

        if let Some(gateway) = self.gateway
            && in_pool(gateway)
        {
            return Err(Error::InvalidConfig(format!(
                "gateway {} must not be within a pool range",
                gateway
            )));
        }

        for (client_id, assignment) in &self.leases.static_assignments {
            if assignment.ip.is_unspecified() || assignment.ip.is_broadcast() {
                return Err(Error::InvalidConfig(format!(
                    "static assignment for {} uses unusable address {}",
                    client_id, assignment.ip
                )));
            }
            if self.server_addresses.contains(&assignment.ip) || self.gateway == Some(assignment.ip) {
                return Err(Error::InvalidConfig(format!(
                    "static assignment for {} uses the server's own address {}",
                    client_id, assignment.ip
                )));
            }
        }

        if self.history_size == 0 {
            return Err(Error::InvalidConfig(
                "historySize must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn lease_seconds(&self) -> u32 {
        self.leases.pool.lease_seconds
    }

    pub fn network_mask(&self) -> Ipv4Addr {
        self.leases.pool.network_mask
    }
}

/// Reduces a client-supplied host name to a single lowercase DNS label.
///
/// Characters outside `[a-z0-9-]` become hyphens, leading/trailing hyphens
/// are dropped and the result is capped at 63 bytes. Anything after the
/// first dot is discarded since clients occasionally send an FQDN here.
pub fn sanitize_hostname(name: &str) -> String {
    let label = name.split('.').next().unwrap_or_default();
    let mapped: String = label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_matches('-');
    let mut result: String = trimmed.chars().take(MAX_HOSTNAME_LENGTH).collect();
    while result.ends_with('-') {
        result.pop();
    }
    result
}
