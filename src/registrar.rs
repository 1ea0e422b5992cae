//! Hand-off of confirmed leases to the name service.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::debug;

/// Publishes a confirmed lease's host name.
///
/// Called once per successful confirmation, after the reply has been
/// computed. The returned name is recorded on the lease; `None` means the
/// lease has no published name. Implementations must not assume they are
/// awaited by the DHCP reply path.
#[async_trait]
pub trait NameRegistrar: Send + Sync {
    async fn register_lease(
        &self,
        hostname: Option<&str>,
        ip: Ipv4Addr,
        client_id: &str,
        vendor_class_id: Option<&str>,
        lease_seconds: u32,
    ) -> Option<String>;
}

/// Registrar for deployments without a companion DNS service.
///
/// Publishes nothing and hands back the effective host name unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalNames;

#[async_trait]
impl NameRegistrar for LocalNames {
    async fn register_lease(
        &self,
        hostname: Option<&str>,
        ip: Ipv4Addr,
        client_id: &str,
        _vendor_class_id: Option<&str>,
        lease_seconds: u32,
    ) -> Option<String> {
        debug!(
            "Registering {} for {} ({}s) as {:?}",
            ip, client_id, lease_seconds, hostname
        );
        hostname.map(str::to_string)
    }
}
