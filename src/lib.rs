//! # leasehold
//!
//! A DHCP server core implementing the DISCOVER/OFFER/REQUEST/ACK exchange of
//! RFC 2131 with table-driven option decoding per RFC 2132.
//!
//! ## Features
//!
//! - Table-driven option codec that skips unknown options instead of failing
//! - Dynamic pools built from address ranges plus static assignments
//! - Tentative offers that lapse after 30 seconds
//! - Debounced lease persistence that still writes every ownership change
//! - Name registration hook run after each confirmation
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use leasehold::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> leasehold::Result<()> {
//!     let config = Config::load_or_create("config.json").await?;
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Pools, static assignments, persistence and reply options
//! - [`DhcpServer`] - Listens on UDP port 67 and dispatches messages
//! - [`Leases`] - Allocation engine over the shared lease store
//! - [`LeaseFile`] - Debounced JSON persistence of the store
//! - [`DhcpPacket`] - Message decoding and encoding
//! - [`OptionTable`] - Option declarations keyed by code and property name

pub mod config;
pub mod error;
pub mod history;
pub mod lease;
pub mod options;
pub mod packet;
pub mod persist;
pub mod pool;
pub mod registrar;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use history::{HistorySink, MessageHistory};
pub use lease::{Lease, LeaseStore, Leases};
pub use options::{ClientIdentifier, DhcpOption, MessageType, OptionTable};
pub use packet::DhcpPacket;
pub use persist::LeaseFile;
pub use registrar::{LocalNames, NameRegistrar};
pub use server::DhcpServer;
