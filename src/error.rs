//! Error types for the lease-negotiation engine.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Only a handful of these ever reach
//! a DHCP client, and then only as a NAK or as silence.

use std::net::Ipv4Addr;

/// Errors that can occur while decoding, allocating or persisting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or lease state).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP message received.
    ///
    /// Covers buffers that are too short, a missing magic cookie, excessive
    /// hop counts and option lengths that run past the end of the buffer.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// The `htype` field names a hardware type other than Ethernet.
    #[error("Unsupported hardware type {0}")]
    UnsupportedHardwareType(u8),

    /// Neither a never-used nor a reclaimable address is left in the pool.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Binding to port 67 usually requires elevated privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// A REQUEST carried neither a requested-IP option nor a `ciaddr`.
    #[error("REQUEST names no address")]
    NoRequestedAddress,

    /// No lease is recorded for the requested address.
    #[error("No lease recorded for {0}")]
    LeaseNotFound(Ipv4Addr),

    /// The lease at the requested address belongs to another client.
    #[error("Lease for {ip} is not held by client {client_id}")]
    ClientMismatch { ip: Ipv4Addr, client_id: String },

    /// A persisted lease record could not be turned back into a lease.
    #[error("Invalid lease record: {0}")]
    InvalidLeaseRecord(String),
}

/// A specialized Result type for lease-engine operations.
pub type Result<T> = std::result::Result<T, Error>;
