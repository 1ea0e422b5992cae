//! Lease state and the allocation engine.
//!
//! The store keeps two indexes over one set of leases:
//!
//! - `by_ip` has a slot for every tracked address. `None` means the address
//!   is in the pool and has never been handed out.
//! - `by_client_id` maps a client to the address of its *confirmed* lease.
//!
//! Every mutation happens synchronously under a [`std::sync::Mutex`] and the
//! guard is released before anything is awaited. Disk writes and name
//! registration are spawned afterwards and only observe the finished state.
//!
//! There is no expiry sweep. A lease whose expiration has passed stays in its
//! slot until an offer reclaims it.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{sanitize_hostname, Config};
use crate::error::{Error, Result};
use crate::packet::DhcpPacket;
use crate::persist::{lock, LeaseFile};
use crate::pool::Pool;
use crate::registrar::NameRegistrar;

/// How long an unanswered OFFER holds its address.
pub const TENTATIVE_OFFER_SECONDS: i64 = 30;

/// A binding between a client and an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip_address: Ipv4Addr,
    pub client_id: Option<String>,
    pub is_confirmed: bool,
    /// Set on first confirmation and kept across renewals.
    pub lease_start_time: Option<DateTime<Utc>>,
    pub lease_expiration: DateTime<Utc>,
    /// Host name sent by the client (option 12), sanitized.
    pub provided_hostname: Option<String>,
    /// Host name from the static assignment. Wins over `provided_hostname`.
    pub static_hostname: Option<String>,
    /// Name returned by the registrar after the last confirmation.
    pub hostname: Option<String>,
    /// `xid` of the request that last touched this lease.
    pub last_message_id: u32,
}

impl Lease {
    /// An unconfirmed offer that lapses after [`TENTATIVE_OFFER_SECONDS`].
    pub fn tentative(ip_address: Ipv4Addr, client_id: &str, now: DateTime<Utc>, xid: u32) -> Self {
        Self {
            ip_address,
            client_id: Some(client_id.to_string()),
            is_confirmed: false,
            lease_start_time: None,
            lease_expiration: now + TimeDelta::seconds(TENTATIVE_OFFER_SECONDS),
            provided_hostname: None,
            static_hostname: None,
            hostname: None,
            last_message_id: xid,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.lease_expiration
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds until expiration, or 0 once expired.
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> i64 {
        (self.lease_expiration - now).num_seconds().max(0)
    }

    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id.as_deref() == Some(client_id)
    }

    /// The static host name if one is configured, else the client's own.
    pub fn effective_hostname(&self) -> Option<&str> {
        self.static_hostname
            .as_deref()
            .or(self.provided_hostname.as_deref())
    }

    pub fn to_record(&self) -> LeaseRecord {
        LeaseRecord {
            ip_address: self.ip_address.to_string(),
            client_id: self.client_id.clone(),
            is_confirmed: self.is_confirmed,
            lease_start_time: self.lease_start_time,
            lease_expiration: self.lease_expiration,
            provided_hostname: self.provided_hostname.clone(),
            static_hostname: self.static_hostname.clone(),
            hostname: self.hostname.clone(),
            last_message_id: self.last_message_id,
        }
    }

    /// Validates a record read from disk.
    pub fn from_persisted(record: LeaseRecord) -> Result<Self> {
        let ip_address: Ipv4Addr = record.ip_address.parse().map_err(|_| {
            Error::InvalidLeaseRecord(format!("bad address {:?}", record.ip_address))
        })?;
        if record.is_confirmed && record.client_id.is_none() {
            return Err(Error::InvalidLeaseRecord(format!(
                "confirmed lease {} has no client",
                ip_address
            )));
        }

        Ok(Self {
            ip_address,
            client_id: record.client_id,
            is_confirmed: record.is_confirmed,
            lease_start_time: record.lease_start_time,
            lease_expiration: record.lease_expiration,
            provided_hostname: record.provided_hostname,
            static_hostname: record.static_hostname,
            hostname: record.hostname,
            last_message_id: record.last_message_id,
        })
    }
}

/// On-disk form of a [`Lease`]. Timestamps are milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub ip_address: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub lease_start_time: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub lease_expiration: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provided_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub last_message_id: u32,
}

/// The state file's shape: `{ byIp, byClientId }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStore {
    #[serde(default)]
    pub by_ip: BTreeMap<String, Option<LeaseRecord>>,
    #[serde(default)]
    pub by_client_id: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseStore {
    pub by_ip: BTreeMap<Ipv4Addr, Option<Lease>>,
    pub by_client_id: BTreeMap<String, Ipv4Addr>,
}

impl LeaseStore {
    /// Converts a loaded file into a store. Records that fail validation are
    /// dropped with a warning.
    pub fn from_persisted(persisted: PersistedStore) -> Self {
        let mut store = Self::default();

        for (key, record) in persisted.by_ip {
            let Ok(ip) = key.parse::<Ipv4Addr>() else {
                warn!("Dropping persisted lease with bad key {:?}", key);
                continue;
            };
            let lease = match record.map(Lease::from_persisted).transpose() {
                Ok(lease) => lease,
                Err(err) => {
                    warn!("Dropping persisted lease for {}: {}", ip, err);
                    continue;
                }
            };
            if let Some(lease) = &lease
                && lease.ip_address != ip
            {
                warn!(
                    "Dropping persisted lease keyed {} but recorded as {}",
                    ip, lease.ip_address
                );
                continue;
            }
            store.by_ip.insert(ip, lease);
        }

        for (client_id, ip) in persisted.by_client_id {
            match ip.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    store.by_client_id.insert(client_id, ip);
                }
                Err(_) => warn!("Dropping client index entry {} -> {:?}", client_id, ip),
            }
        }

        store
    }

    pub fn to_persisted(&self) -> PersistedStore {
        PersistedStore {
            by_ip: self
                .by_ip
                .iter()
                .map(|(ip, lease)| (ip.to_string(), lease.as_ref().map(Lease::to_record)))
                .collect(),
            by_client_id: self
                .by_client_id
                .iter()
                .map(|(client_id, ip)| (client_id.clone(), ip.to_string()))
                .collect(),
        }
    }

    /// Brings loaded state in line with the current pool.
    ///
    /// Addresses no longer in range (and not statically assigned) are
    /// dropped, new pool addresses get empty slots, and the client index is
    /// rebuilt so each client has at most one confirmed lease. A confirmed
    /// lease that loses that contest is downgraded to unconfirmed.
    pub fn reconcile(&mut self, pool: &Pool) {
        let before = self.by_ip.len();
        self.by_ip.retain(|ip, _| pool.is_known(*ip));
        let dropped = before - self.by_ip.len();
        if dropped > 0 {
            info!("Dropped {} leases outside the configured pool", dropped);
        }

        for ip in pool.dynamic() {
            self.by_ip.entry(*ip).or_insert(None);
        }

        let persisted = std::mem::take(&mut self.by_client_id);
        for (client_id, ip) in persisted {
            if matches!(
                self.by_ip.get(&ip),
                Some(Some(lease)) if lease.is_confirmed && lease.is_owned_by(&client_id)
            ) {
                self.by_client_id.insert(client_id, ip);
            }
        }

        for (ip, slot) in self.by_ip.iter_mut() {
            let Some(lease) = slot else { continue };
            if !lease.is_confirmed {
                continue;
            }
            let Some(client_id) = lease.client_id.clone() else {
                lease.is_confirmed = false;
                continue;
            };
            match self.by_client_id.get(&client_id) {
                Some(owned) if owned == ip => {}
                Some(owned) => {
                    warn!(
                        "Client {} also holds {}; downgrading lease on {}",
                        client_id, owned, ip
                    );
                    lease.is_confirmed = false;
                }
                None => {
                    self.by_client_id.insert(client_id, *ip);
                }
            }
        }
    }

    /// Writes `lease` into its slot and keeps the client index in step.
    ///
    /// Returns true when the slot changed in a way that must reach disk
    /// promptly: it was empty, or its owner or confirmation flag changed.
    pub fn put(&mut self, lease: Lease) -> bool {
        let ip = lease.ip_address;
        let client_id = lease.client_id.clone();
        let confirmed = lease.is_confirmed;
        let previous = self.by_ip.insert(ip, Some(lease)).flatten();

        if let Some(previous) = &previous
            && let Some(previous_client) = &previous.client_id
            && self.by_client_id.get(previous_client) == Some(&ip)
            && (client_id.as_ref() != Some(previous_client) || !confirmed)
        {
            self.by_client_id.remove(previous_client);
        }
        if confirmed && let Some(client_id) = &client_id {
            self.by_client_id.insert(client_id.clone(), ip);
        }

        previous.is_none_or(|previous| {
            previous.client_id != client_id || previous.is_confirmed != confirmed
        })
    }

    /// Empties the slot at `ip`. Returns true if it held a lease.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        let Some(slot) = self.by_ip.get_mut(&ip) else {
            return false;
        };
        let Some(previous) = slot.take() else {
            return false;
        };
        if let Some(client_id) = &previous.client_id
            && self.by_client_id.get(client_id) == Some(&ip)
        {
            self.by_client_id.remove(client_id);
        }
        true
    }

    pub fn confirmed_count(&self) -> usize {
        self.by_client_id.len()
    }

    pub fn free_count(&self) -> usize {
        self.by_ip.values().filter(|slot| slot.is_none()).count()
    }
}

/// The outcome of a successful confirmation.
#[derive(Debug)]
pub struct Confirmation {
    pub lease: Lease,
    /// Name registration running in the background. `None` when no runtime
    /// was available to run it.
    pub registration: Option<JoinHandle<()>>,
}

/// The address the client is asking for: option 50, else a non-zero `ciaddr`.
pub fn requested_address(request: &DhcpPacket) -> Option<Ipv4Addr> {
    request
        .requested_ip()
        .or_else(|| (!request.ciaddr.is_unspecified()).then_some(request.ciaddr))
}

/// Allocation engine over the shared lease store.
pub struct Leases {
    config: Arc<Config>,
    pool: Pool,
    state: Arc<Mutex<LeaseStore>>,
    file: Arc<LeaseFile>,
    registrar: Arc<dyn NameRegistrar>,
}

impl Leases {
    /// Loads persisted state and reconciles it with the configured pool.
    pub async fn new(config: Arc<Config>, registrar: Arc<dyn NameRegistrar>) -> Result<Self> {
        let file = LeaseFile::from_config(&config);
        let persisted = file.load().await?;
        Ok(Self::with_store(
            config,
            LeaseStore::from_persisted(persisted),
            file,
            registrar,
        ))
    }

    pub fn with_store(
        config: Arc<Config>,
        mut store: LeaseStore,
        file: LeaseFile,
        registrar: Arc<dyn NameRegistrar>,
    ) -> Self {
        let pool = Pool::new(&config.leases);
        store.reconcile(&pool);

        info!(
            "Lease store ready: {} dynamic addresses, {} static, {} confirmed leases",
            pool.size(),
            pool.statics().len(),
            store.confirmed_count()
        );

        Self {
            config,
            pool,
            state: Arc::new(Mutex::new(store)),
            file: Arc::new(file),
            registrar,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LeaseStore> {
        lock(&self.state)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn file(&self) -> &LeaseFile {
        &self.file
    }

    /// Copy of both indexes.
    pub fn snapshot(&self) -> LeaseStore {
        self.lock().clone()
    }

    pub fn lease(&self, ip: Ipv4Addr) -> Option<Lease> {
        self.lock().by_ip.get(&ip).cloned().flatten()
    }

    /// The client's confirmed lease, if it has one.
    pub fn lease_for_client(&self, client_id: &str) -> Option<Lease> {
        let store = self.lock();
        let ip = store.by_client_id.get(client_id)?;
        store.by_ip.get(ip).cloned().flatten()
    }

    pub fn offer(&self, request: &DhcpPacket) -> Result<Lease> {
        self.offer_at(request, Utc::now())
    }

    /// Picks an address for a DISCOVER and records a tentative lease on it.
    pub fn offer_at(&self, request: &DhcpPacket, now: DateTime<Utc>) -> Result<Lease> {
        let lease = {
            let mut store = self.lock();
            self.offer_locked(&mut store, request, now)?
        };
        self.persist();
        Ok(lease)
    }

    fn offer_locked(
        &self,
        store: &mut LeaseStore,
        request: &DhcpPacket,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        let client_id = request.client_id();
        let provided_hostname = request
            .hostname()
            .map(sanitize_hostname)
            .filter(|name| !name.is_empty());

        let (ip, static_hostname) = match self.pool.statics().lookup(&request.client_identifier) {
            Some(assignment) => (assignment.ip, assignment.hostname.clone()),
            None => (self.select_address(store, client_id, now)?, None),
        };

        if let Some(Some(existing)) = store.by_ip.get_mut(&ip)
            && existing.is_owned_by(client_id)
            && existing.is_confirmed
            && !existing.is_expired_at(now)
        {
            existing.last_message_id = request.xid;
            if provided_hostname.is_some() {
                existing.provided_hostname = provided_hostname;
            }
            existing.static_hostname = static_hostname;
            debug!("Re-offering confirmed lease {} to {}", ip, client_id);
            return Ok(existing.clone());
        }

        if let Some(Some(previous)) = store.by_ip.get(&ip)
            && !previous.is_owned_by(client_id)
        {
            info!(
                "Reclaiming {} from {} (expired {})",
                ip,
                previous.client_id.as_deref().unwrap_or("nobody"),
                previous.lease_expiration
            );
        }

        let stale: Vec<Ipv4Addr> = store
            .by_ip
            .iter()
            .filter_map(|(other, slot)| match slot {
                Some(lease) if *other != ip && !lease.is_confirmed && lease.is_owned_by(client_id) => {
                    Some(*other)
                }
                _ => None,
            })
            .collect();
        for other in stale {
            if store.release(other) {
                self.file.mark_dirty();
            }
        }

        let mut lease = Lease::tentative(ip, client_id, now, request.xid);
        lease.provided_hostname = provided_hostname;
        lease.static_hostname = static_hostname;
        if store.put(lease.clone()) {
            self.file.mark_dirty();
        }
        debug!("Offering {} to {}", ip, client_id);
        Ok(lease)
    }

    /// Dynamic address choice, in order of preference:
    ///
    /// 1. the client's confirmed address,
    /// 2. an offer already pending for the client,
    /// 3. the lowest never-used address,
    /// 4. the expired lease with the oldest expiration.
    fn select_address(
        &self,
        store: &LeaseStore,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Ipv4Addr> {
        if let Some(&ip) = store.by_client_id.get(client_id)
            && self.pool.is_dynamic(ip)
            && store.by_ip.get(&ip).is_some_and(|slot| {
                slot.as_ref().is_none_or(|lease| lease.is_owned_by(client_id))
            })
        {
            return Ok(ip);
        }

        let pending = store.by_ip.iter().find_map(|(ip, slot)| match slot {
            Some(lease)
                if !lease.is_confirmed
                    && lease.is_owned_by(client_id)
                    && self.pool.is_dynamic(*ip) =>
            {
                Some(*ip)
            }
            _ => None,
        });
        if let Some(ip) = pending {
            return Ok(ip);
        }

        let never_used = store
            .by_ip
            .iter()
            .find_map(|(ip, slot)| (slot.is_none() && self.pool.is_dynamic(*ip)).then_some(*ip));
        if let Some(ip) = never_used {
            return Ok(ip);
        }

        store
            .by_ip
            .iter()
            .filter_map(|(ip, slot)| match slot {
                Some(lease) if self.pool.is_dynamic(*ip) && lease.is_expired_at(now) => {
                    Some((lease.lease_expiration, *ip))
                }
                _ => None,
            })
            .min()
            .map(|(_, ip)| ip)
            .ok_or(Error::PoolExhausted)
    }

    /// True when the address the client asks for is recorded as its own.
    pub fn owns(&self, request: &DhcpPacket) -> bool {
        let Some(ip) = requested_address(request) else {
            return false;
        };
        matches!(
            self.lock().by_ip.get(&ip),
            Some(Some(lease)) if lease.is_owned_by(request.client_id())
        )
    }

    pub fn confirm(&self, request: &DhcpPacket) -> Result<Confirmation> {
        self.confirm_at(request, Utc::now())
    }

    /// Turns the lease at the requested address into a confirmed lease.
    ///
    /// Renewals keep the original start time and push the expiration out to
    /// `now + leaseSeconds`. Registration with the name service is spawned
    /// after the store has been updated.
    pub fn confirm_at(&self, request: &DhcpPacket, now: DateTime<Utc>) -> Result<Confirmation> {
        let ip = requested_address(request).ok_or(Error::NoRequestedAddress)?;
        let outcome = {
            let mut store = self.lock();
            self.confirm_locked(&mut store, request, ip, now)
        };

        if outcome.is_ok() || self.file.is_forced() {
            self.persist();
        }
        let lease = outcome?;

        info!(
            "Confirmed {} for {} until {}",
            lease.ip_address,
            request.client_id(),
            lease.lease_expiration
        );
        let registration = self.register(&lease, request.vendor_class_identifier());
        Ok(Confirmation {
            lease,
            registration,
        })
    }

    fn confirm_locked(
        &self,
        store: &mut LeaseStore,
        request: &DhcpPacket,
        ip: Ipv4Addr,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        let client_id = request.client_id();
        let mismatch = || Error::ClientMismatch {
            ip,
            client_id: client_id.to_string(),
        };

        let mut lease = match store.by_ip.get(&ip).cloned().flatten() {
            Some(lease) => lease,
            None if self.config.authoritative => {
                debug!("No lease on {}; offering to {} first", ip, client_id);
                self.offer_locked(store, request, now)?
            }
            None => return Err(Error::LeaseNotFound(ip)),
        };
        if lease.ip_address != ip || !lease.is_owned_by(client_id) {
            return Err(mismatch());
        }

        if let Some(&previous) = store.by_client_id.get(client_id)
            && previous != ip
            && store.release(previous)
        {
            debug!("{} moved from {} to {}", client_id, previous, ip);
            self.file.mark_dirty();
        }

        lease.is_confirmed = true;
        lease.lease_start_time.get_or_insert(now);
        lease.lease_expiration = now + TimeDelta::seconds(i64::from(self.config.lease_seconds()));
        lease.last_message_id = request.xid;
        if let Some(name) = request
            .hostname()
            .map(sanitize_hostname)
            .filter(|name| !name.is_empty())
        {
            lease.provided_hostname = Some(name);
        }
        if let Some(assignment) = self.pool.statics().lookup(&request.client_identifier)
            && assignment.ip == ip
        {
            lease.static_hostname = assignment.hostname.clone();
        }

        if store.put(lease.clone()) {
            self.file.mark_dirty();
        }
        Ok(lease)
    }

    fn register(&self, lease: &Lease, vendor_class_id: Option<&str>) -> Option<JoinHandle<()>> {
        let runtime = Handle::try_current().ok()?;
        let client_id = lease.client_id.clone()?;
        let hostname = lease.effective_hostname().map(str::to_string);
        let vendor_class_id = vendor_class_id.map(str::to_string);
        let ip = lease.ip_address;
        let lease_seconds = self.config.lease_seconds();
        let registrar = Arc::clone(&self.registrar);
        let state = Arc::clone(&self.state);
        let file = Arc::clone(&self.file);

        Some(runtime.spawn(async move {
            let registered = registrar
                .register_lease(
                    hostname.as_deref(),
                    ip,
                    &client_id,
                    vendor_class_id.as_deref(),
                    lease_seconds,
                )
                .await;

            let changed = {
                let mut store = lock(&state);
                match store.by_ip.get_mut(&ip) {
                    Some(Some(lease)) if lease.is_owned_by(&client_id) => {
                        let changed = lease.hostname != registered;
                        lease.hostname = registered;
                        changed
                    }
                    _ => {
                        debug!("{} changed hands before registration finished", ip);
                        false
                    }
                }
            };

            // A changed registered name forces a write.
            if changed {
                file.mark_dirty();
                file.save(&state);
            }
        }))
    }

    fn persist(&self) {
        self.file.save(&self.state);
    }

    /// Writes the store immediately. Called on shutdown.
    pub async fn flush(&self) -> Result<()> {
        self.file.flush(&self.state).await
    }
}
