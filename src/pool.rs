//! Address pool membership.
//!
//! The dynamic pool is every address covered by a configured range minus
//! every statically assigned address. Static assignments are keyed by client
//! id or MAC address; keys are normalised so `AA-BB-CC-DD-EE-FF` and
//! `aa:bb:cc:dd:ee:ff` name the same client.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::config::{AddressRange, LeaseConfig, StaticAssignment};
use crate::options::ClientIdentifier;

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', ":")
}

/// Expands inclusive ranges into the addresses they cover, in ascending order.
///
/// Overlapping ranges contribute each address once.
pub fn expand_ranges(ranges: &[AddressRange]) -> BTreeSet<Ipv4Addr> {
    ranges
        .iter()
        .flat_map(|range| (u32::from(range.start)..=u32::from(range.end)).map(Ipv4Addr::from))
        .collect()
}

/// Operator-configured fixed addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticTable {
    entries: BTreeMap<String, StaticAssignment>,
}

impl StaticTable {
    pub fn new(assignments: &BTreeMap<String, StaticAssignment>) -> Self {
        let entries = assignments
            .iter()
            .map(|(key, assignment)| (normalize_key(key), assignment.clone()))
            .collect();
        Self { entries }
    }

    /// Looks a client up by unique id first, then by hardware address.
    pub fn lookup(&self, client: &ClientIdentifier) -> Option<&StaticAssignment> {
        self.entries
            .get(&normalize_key(&client.unique_id))
            .or_else(|| {
                client
                    .hardware_address
                    .as_deref()
                    .and_then(|mac| self.entries.get(&normalize_key(mac)))
            })
    }

    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        self.entries.values().any(|assignment| assignment.ip == ip)
    }

    pub fn addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.entries.values().map(|assignment| assignment.ip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The dynamically assignable addresses plus the static table.
#[derive(Debug, Clone)]
pub struct Pool {
    dynamic: BTreeSet<Ipv4Addr>,
    statics: StaticTable,
}

impl Pool {
    pub fn new(config: &LeaseConfig) -> Self {
        let statics = StaticTable::new(&config.static_assignments);
        let reserved = statics.addresses();
        let dynamic = expand_ranges(&config.pool.ranges)
            .into_iter()
            .filter(|ip| !reserved.contains(ip))
            .collect();
        Self { dynamic, statics }
    }

    /// Addresses available for dynamic allocation, ascending.
    pub fn dynamic(&self) -> &BTreeSet<Ipv4Addr> {
        &self.dynamic
    }

    pub fn statics(&self) -> &StaticTable {
        &self.statics
    }

    pub fn is_dynamic(&self, ip: Ipv4Addr) -> bool {
        self.dynamic.contains(&ip)
    }

    /// An address the lease store may track: in the pool or statically assigned.
    pub fn is_known(&self, ip: Ipv4Addr) -> bool {
        self.is_dynamic(ip) || self.statics.contains_ip(ip)
    }

    pub fn size(&self) -> usize {
        self.dynamic.len()
    }
}
