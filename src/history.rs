//! Per-client message history and deregistration tracking.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::options::MessageType;
use crate::packet::DhcpPacket;
use crate::persist::lock;

/// How long a deregistration count is remembered without a new one.
pub const DEREGISTRATION_WINDOW: Duration = Duration::from_secs(60);

/// Deregistrations within one window before the client is reported as an error.
const DEREGISTRATION_ERROR_THRESHOLD: u32 = 5;

/// Clients whose messages are kept before the least recently heard one is dropped.
pub const DEFAULT_MAX_CLIENTS: usize = 4096;

/// Receives every message the server handles.
pub trait HistorySink: Send + Sync {
    /// Records a request and the reply sent for it, if any.
    fn record_message(&self, message: &DhcpPacket, reply: Option<&DhcpPacket>);

    /// Records a rejected REQUEST.
    fn record_deregistration(&self, message: &DhcpPacket);

    /// Messages seen from `client_id`, oldest first.
    fn for_client(&self, client_id: &str) -> Vec<HistoryEntry>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub received_at: DateTime<Utc>,
    pub message: DhcpPacket,
    pub reply: Option<DhcpPacket>,
}

#[derive(Debug, Default)]
struct Tracked {
    count: u32,
    generation: u64,
    cleanup: Option<JoinHandle<()>>,
}

/// Counts rejected REQUESTs per client.
///
/// Each deregistration restarts a cleanup timer for that client; when the
/// timer runs out the count is forgotten. A successful OFFER resets the count
/// straight away.
#[derive(Debug)]
pub struct DeregistrationTracker {
    entries: Arc<Mutex<HashMap<String, Tracked>>>,
    window: Duration,
}

impl Default for DeregistrationTracker {
    fn default() -> Self {
        Self::new(DEREGISTRATION_WINDOW)
    }
}

impl DeregistrationTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    /// Counts one deregistration and returns the running total.
    pub fn record(&self, client_id: &str) -> u32 {
        let count = {
            let mut entries = lock(&self.entries);
            let tracked = entries.entry(client_id.to_string()).or_default();
            tracked.count += 1;
            tracked.generation += 1;
            if let Some(previous) = tracked.cleanup.take() {
                previous.abort();
            }
            tracked.cleanup = self.schedule_cleanup(client_id, tracked.generation);
            tracked.count
        };

        if count >= DEREGISTRATION_ERROR_THRESHOLD {
            error!(
                "Client {} deregistered {} times within {:?}",
                client_id, count, self.window
            );
        } else if count > 1 {
            warn!("Client {} deregistered {} times", client_id, count);
        }
        count
    }

    fn schedule_cleanup(&self, client_id: &str, generation: u64) -> Option<JoinHandle<()>> {
        let runtime = Handle::try_current().ok()?;
        let entries = Arc::clone(&self.entries);
        let client_id = client_id.to_string();
        let window = self.window;

        Some(runtime.spawn(async move {
            tokio::time::sleep(window).await;
            let mut entries = lock(&entries);
            if entries
                .get(&client_id)
                .is_some_and(|tracked| tracked.generation == generation)
            {
                entries.remove(&client_id);
            }
        }))
    }

    pub fn reset(&self, client_id: &str) {
        if let Some(tracked) = lock(&self.entries).remove(client_id)
            && let Some(cleanup) = tracked.cleanup
        {
            cleanup.abort();
        }
    }

    pub fn count(&self, client_id: &str) -> u32 {
        lock(&self.entries)
            .get(client_id)
            .map_or(0, |tracked| tracked.count)
    }
}

/// Keeps the most recent messages for each client in memory.
///
/// Both the messages per client and the number of clients are bounded. When
/// a new client arrives at the client limit, the client heard from least
/// recently is forgotten.
#[derive(Debug)]
pub struct MessageHistory {
    capacity: usize,
    max_clients: usize,
    clients: Mutex<Clients>,
    deregistrations: DeregistrationTracker,
}

#[derive(Debug, Default)]
struct Clients {
    sequence: u64,
    by_id: HashMap<String, ClientHistory>,
}

#[derive(Debug, Default)]
struct ClientHistory {
    last_seen: u64,
    entries: VecDeque<HistoryEntry>,
}

impl Clients {
    fn evict_least_recent(&mut self) {
        let oldest = self
            .by_id
            .iter()
            .min_by_key(|(_, history)| history.last_seen)
            .map(|(client_id, _)| client_id.clone());
        if let Some(client_id) = oldest {
            debug!("Dropping message history for {}", client_id);
            self.by_id.remove(&client_id);
        }
    }
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        Self::with_client_limit(capacity, DEFAULT_MAX_CLIENTS)
    }

    pub fn with_client_limit(capacity: usize, max_clients: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            max_clients: max_clients.max(1),
            clients: Mutex::new(Clients::default()),
            deregistrations: DeregistrationTracker::default(),
        }
    }

    pub fn deregistrations(&self) -> &DeregistrationTracker {
        &self.deregistrations
    }

    /// Number of clients with recorded messages.
    pub fn client_count(&self) -> usize {
        lock(&self.clients).by_id.len()
    }
}

impl HistorySink for MessageHistory {
    fn record_message(&self, message: &DhcpPacket, reply: Option<&DhcpPacket>) {
        let client_id = message.client_id();
        if reply.and_then(DhcpPacket::message_type) == Some(MessageType::Offer) {
            self.deregistrations.reset(client_id);
        }

        let mut clients = lock(&self.clients);
        if !clients.by_id.contains_key(client_id) && clients.by_id.len() >= self.max_clients {
            clients.evict_least_recent();
        }
        clients.sequence += 1;
        let sequence = clients.sequence;

        let history = clients.by_id.entry(client_id.to_string()).or_default();
        history.last_seen = sequence;
        if history.entries.len() == self.capacity {
            history.entries.pop_front();
        }
        history.entries.push_back(HistoryEntry {
            received_at: Utc::now(),
            message: message.clone(),
            reply: reply.cloned(),
        });
    }

    fn record_deregistration(&self, message: &DhcpPacket) {
        self.deregistrations.record(message.client_id());
    }

    fn for_client(&self, client_id: &str) -> Vec<HistoryEntry> {
        lock(&self.clients)
            .by_id
            .get(client_id)
            .map(|history| history.entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}
