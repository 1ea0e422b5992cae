use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::history::{HistorySink, MessageHistory};
use crate::lease::{Lease, Leases};
use crate::options::{DhcpOption, MessageType, OptionCode, OptionTable, RequestedParameter};
use crate::packet::{BOOTREQUEST, DhcpPacket};
use crate::registrar::{LocalNames, NameRegistrar};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// Options sent whether or not the client asked for them.
const ALWAYS_SENT: [OptionCode; 5] = [
    OptionCode::MessageType,
    OptionCode::ServerIdentifier,
    OptionCode::LeaseTime,
    OptionCode::RenewalTime,
    OptionCode::RebindingTime,
];

/// A bound socket and the server identifier it answers as.
struct Listener {
    socket: Arc<UdpSocket>,
    server_ip: Ipv4Addr,
}

pub struct DhcpServer {
    config: Arc<Config>,
    leases: Arc<Leases>,
    history: Arc<dyn HistorySink>,
    table: Arc<OptionTable>,
    listeners: Vec<Listener>,
}

impl DhcpServer {
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_registrar(config, Arc::new(LocalNames)).await
    }

    pub async fn with_registrar(config: Config, registrar: Arc<dyn NameRegistrar>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let leases = Arc::new(Leases::new(Arc::clone(&config), registrar).await?);
        let history = Arc::new(MessageHistory::new(config.history_size));
        let listeners = Self::bind_all(&config)?;

        let pool = leases.pool();
        info!(
            "DHCP pool: {} dynamic addresses, {} static assignments, {}s leases",
            pool.size(),
            pool.statics().len(),
            config.lease_seconds()
        );

        Ok(Self {
            config,
            leases,
            history,
            table: Arc::new(OptionTable::new()),
            listeners,
        })
    }

    /// Binds every configured address. An address that fails to bind is
    /// logged and skipped; startup fails only when none could be bound.
    fn bind_all(config: &Config) -> Result<Vec<Listener>> {
        let addresses = if config.server_addresses.is_empty() {
            vec![Ipv4Addr::UNSPECIFIED]
        } else {
            config.server_addresses.clone()
        };

        let mut listeners = Vec::new();
        for address in addresses {
            let bind_addr = SocketAddrV4::new(address, DHCP_SERVER_PORT);
            match create_socket(bind_addr) {
                Ok(socket) => {
                    let server_ip = server_identifier_for(address, config);
                    info!("DHCP server listening on {} as {}", bind_addr, server_ip);
                    listeners.push(Listener {
                        socket: Arc::new(socket),
                        server_ip,
                    });
                }
                Err(error) => error!("Skipping {}: {}", bind_addr, error),
            }
        }

        if listeners.is_empty() {
            return Err(Error::Socket("no server address could be bound".to_string()));
        }
        Ok(listeners)
    }

    pub async fn run(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for listener in &self.listeners {
            let handler = Arc::new(PacketHandler {
                config: Arc::clone(&self.config),
                leases: Arc::clone(&self.leases),
                history: Arc::clone(&self.history),
                table: Arc::clone(&self.table),
                socket: Arc::clone(&listener.socket),
                server_ip: listener.server_ip,
            });
            tasks.spawn(handler.listen());
        }

        info!("DHCP server ready and listening");

        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                error!("Listener stopped: {}", error);
            }
        }
        Ok(())
    }

    /// Forces the lease store to disk.
    pub async fn save_leases(&self) -> Result<()> {
        self.leases.flush().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn leases(&self) -> &Leases {
        &self.leases
    }

    pub fn history(&self) -> &dyn HistorySink {
        self.history.as_ref()
    }
}

/// The identifier a listener puts in option 54.
///
/// A wildcard listener has no address of its own, so it answers as the
/// configured gateway when there is one.
fn server_identifier_for(address: Ipv4Addr, config: &Config) -> Ipv4Addr {
    if !address.is_unspecified() {
        return address;
    }
    match config.gateway {
        Some(gateway) => gateway,
        None => {
            warn!("Listening on the wildcard address without serverAddresses or gateway; replies carry server identifier 0.0.0.0");
            address
        }
    }
}

fn create_socket(bind_addr: SocketAddrV4) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

    socket
        .set_reuse_address(true)
        .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

    socket
        .set_broadcast(true)
        .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

    socket
        .set_nonblocking(true)
        .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

    socket
        .bind(&bind_addr.into())
        .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
        .map_err(|error| Error::Socket(format!("Failed to convert to tokio socket: {}", error)))
}

struct PacketHandler {
    config: Arc<Config>,
    leases: Arc<Leases>,
    history: Arc<dyn HistorySink>,
    table: Arc<OptionTable>,
    socket: Arc<UdpSocket>,
    server_ip: Ipv4Addr,
}

impl PacketHandler {
    async fn listen(self: Arc<Self>) {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = buffer[..size].to_vec();
                    let handler = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(error) = handler.handle_packet(&data, source).await {
                            warn!("Error handling packet from {}: {}", source, error);
                        }
                    });
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }

    async fn handle_packet(&self, data: &[u8], source: SocketAddr) -> Result<()> {
        let packet = DhcpPacket::parse(data, &self.table)?;

        if packet.op != BOOTREQUEST {
            return Err(Error::InvalidPacket("Expected BOOTREQUEST".to_string()));
        }

        let reply = self.respond(&packet, source);
        self.history.record_message(&packet, reply.as_ref());

        if let Some(reply) = reply
            && let Err(error) = self.send_reply(&reply).await
        {
            warn!(
                "Failed to send {} to {}: {}",
                reply
                    .message_type()
                    .map_or("reply", MessageType::symbol),
                packet.client_id(),
                error
            );
        }
        Ok(())
    }

    /// Applies `packet` to the lease store and builds the reply, if any.
    ///
    /// Runs to completion without suspending; anything slow is spawned by the
    /// lease engine.
    fn respond(&self, packet: &DhcpPacket, source: SocketAddr) -> Option<DhcpPacket> {
        let client = packet.client_id();

        let Some(message_type) = packet.message_type() else {
            info!("BOOTP request from {} ({}) ignored", client, source);
            return None;
        };
        info!("{} from {} ({})", message_type, client, source);

        match message_type {
            MessageType::Discover => self.handle_discover(packet),
            MessageType::Request => self.handle_request(packet),
            _ => {
                debug!("Ignoring {} from {}", message_type, client);
                None
            }
        }
    }

    fn handle_discover(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let lease = match self.leases.offer(packet) {
            Ok(lease) => lease,
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot offer an address to {}", packet.client_id());
                return None;
            }
            Err(error) => {
                warn!("Cannot offer an address to {}: {}", packet.client_id(), error);
                return None;
            }
        };

        info!("OFFER {} to {}", lease.ip_address, packet.client_id());
        Some(DhcpPacket::create_reply(
            packet,
            MessageType::Offer,
            lease.ip_address,
            self.server_ip,
            self.lease_options(&lease, packet.parameter_request_list()),
        ))
    }

    fn handle_request(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        match packet.server_identifier() {
            Some(server_id) if server_id != self.server_ip => {
                info!(
                    "REQUEST from {} is for different server {}",
                    packet.client_id(),
                    server_id
                );
                None
            }
            Some(_) => self.confirm(packet),
            None if self.leases.owns(packet) => self.confirm(packet),
            None => self.deregister(packet, "requested address is not leased to this client"),
        }
    }

    fn confirm(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let confirmation = match self.leases.confirm(packet) {
            Ok(confirmation) => confirmation,
            Err(error) => return self.deregister(packet, &error.to_string()),
        };

        let lease = confirmation.lease;
        info!(
            "ACK {} to {} (lease: {} seconds)",
            lease.ip_address,
            packet.client_id(),
            self.config.lease_seconds()
        );
        Some(DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            lease.ip_address,
            self.server_ip,
            self.lease_options(&lease, packet.parameter_request_list()),
        ))
    }

    /// Rejects a REQUEST: NAK when authoritative, silence otherwise.
    fn deregister(&self, packet: &DhcpPacket, reason: &str) -> Option<DhcpPacket> {
        if !self.config.authoritative {
            info!(
                "Ignoring REQUEST from {} (not authoritative): {}",
                packet.client_id(),
                reason
            );
            return None;
        }

        self.history.record_deregistration(packet);
        warn!("NAK to {}: {}", packet.client_id(), reason);
        Some(DhcpPacket::create_reply(
            packet,
            MessageType::Nak,
            Ipv4Addr::UNSPECIFIED,
            self.server_ip,
            vec![DhcpOption::server_identifier(self.server_ip)],
        ))
    }

    async fn send_reply(&self, reply: &DhcpPacket) -> Result<()> {
        let destination = SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT);
        self.socket.send_to(&reply.encode(), destination).await?;
        Ok(())
    }

    /// Options for OFFER and ACK, after the message type.
    fn lease_options(
        &self,
        lease: &Lease,
        parameter_request_list: Option<&[RequestedParameter]>,
    ) -> Vec<DhcpOption> {
        let lease_seconds = self.config.lease_seconds();
        let rebinding = u32::try_from(u64::from(lease_seconds) * 7 / 8).unwrap_or(lease_seconds);

        let mut options = vec![
            DhcpOption::server_identifier(self.server_ip),
            DhcpOption::lease_time(lease_seconds),
            DhcpOption::subnet_mask(self.config.network_mask()),
            DhcpOption::renewal_time(lease_seconds / 2),
            DhcpOption::rebinding_time(rebinding),
        ];

        if let Some(gateway) = self.config.gateway {
            options.push(DhcpOption::routers(vec![gateway]));
        }

        if !self.config.dns_servers.is_empty() {
            options.push(DhcpOption::dns_servers(self.config.dns_servers.clone()));
        }

        if let Some(ref domain) = self.config.domain_name {
            options.push(DhcpOption::domain_name(domain.clone()));
        }

        if let Some(hostname) = lease.effective_hostname() {
            options.push(DhcpOption::hostname(hostname));
        }

        filter_options_by_prl(options, parameter_request_list)
    }
}

fn filter_options_by_prl(
    options: Vec<DhcpOption>,
    parameter_request_list: Option<&[RequestedParameter]>,
) -> Vec<DhcpOption> {
    let Some(prl) = parameter_request_list else {
        return options;
    };

    options
        .into_iter()
        .filter(|option| {
            ALWAYS_SENT.iter().any(|code| *code as u8 == option.code)
                || prl.iter().any(|parameter| parameter.code == option.code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddressRange, StaticAssignment};
    use crate::lease::LeaseStore;
    use crate::options::OptionValue;
    use crate::persist::LeaseFile;
    use std::time::Duration;

    const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const CLIENT_A: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
    const CLIENT_B: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];

    fn source() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], DHCP_CLIENT_PORT))
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.leases.pool.ranges = vec![AddressRange {
            start: Ipv4Addr::new(10, 0, 0, 10),
            end: Ipv4Addr::new(10, 0, 0, 20),
        }];
        config.leases.pool.lease_seconds = 3600;
        config.gateway = Some(SERVER_IP);
        config.dns_servers = vec![Ipv4Addr::new(8, 8, 8, 8)];
        config.domain_name = Some("test.local".to_string());
        config.write_to_disk = false;
        config
    }

    struct TestServer {
        handler: PacketHandler,
        history: Arc<MessageHistory>,
    }

    async fn create_test_handler(config: Config) -> TestServer {
        let config = Arc::new(config);
        let leases = Arc::new(Leases::with_store(
            Arc::clone(&config),
            LeaseStore::default(),
            LeaseFile::new("unused.json", false, Duration::from_secs(300)),
            Arc::new(LocalNames),
        ));
        let history = Arc::new(MessageHistory::new(config.history_size));
        let socket = create_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();

        let handler = PacketHandler {
            config,
            leases,
            history: Arc::clone(&history) as Arc<dyn HistorySink>,
            table: Arc::new(OptionTable::new()),
            socket: Arc::new(socket),
            server_ip: SERVER_IP,
        };
        TestServer { handler, history }
    }

    fn discover(mac: [u8; 6]) -> DhcpPacket {
        DhcpPacket::client_request(MessageType::Discover, mac, 0x12345678, vec![])
    }

    fn request(mac: [u8; 6], address: Ipv4Addr, server_id: Option<Ipv4Addr>) -> DhcpPacket {
        let mut options = vec![DhcpOption::requested_ip(address)];
        if let Some(server_id) = server_id {
            options.push(DhcpOption::server_identifier(server_id));
        }
        DhcpPacket::client_request(MessageType::Request, mac, 0x12345679, options)
    }

    fn option_codes(packet: &DhcpPacket) -> Vec<u8> {
        packet.options.iter().map(|option| option.code).collect()
    }

    fn find(packet: &DhcpPacket, code: OptionCode) -> Option<&OptionValue> {
        packet
            .options
            .iter()
            .find(|option| option.code == code as u8)
            .map(|option| &option.value)
    }

    #[test]
    fn test_constants() {
        assert_eq!(DHCP_SERVER_PORT, 67);
        assert_eq!(DHCP_CLIENT_PORT, 68);
        assert_eq!(RECV_BUFFER_SIZE, 1500);
    }

    #[test]
    fn test_wildcard_server_identifier() {
        let config = test_config();
        assert_eq!(
            server_identifier_for(Ipv4Addr::new(10, 0, 0, 2), &config),
            Ipv4Addr::new(10, 0, 0, 2)
        );
        assert_eq!(server_identifier_for(Ipv4Addr::UNSPECIFIED, &config), SERVER_IP);

        let bare = Config::default();
        assert_eq!(
            server_identifier_for(Ipv4Addr::UNSPECIFIED, &bare),
            Ipv4Addr::UNSPECIFIED
        );
    }

    #[tokio::test]
    async fn test_handle_discover_offers_address() {
        let server = create_test_handler(test_config()).await;
        let offer = server.handler.respond(&discover(CLIENT_A), source()).unwrap();

        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(offer.siaddr, SERVER_IP);
        assert_eq!(offer.xid, 0x12345678);
        assert_eq!(offer.server_identifier(), Some(SERVER_IP));
        assert_eq!(find(&offer, OptionCode::LeaseTime), Some(&OptionValue::UInt32(3600)));
        assert_eq!(find(&offer, OptionCode::RenewalTime), Some(&OptionValue::UInt32(1800)));
        assert_eq!(find(&offer, OptionCode::RebindingTime), Some(&OptionValue::UInt32(3150)));
        assert_eq!(
            find(&offer, OptionCode::SubnetMask),
            Some(&OptionValue::IpAddress(Ipv4Addr::new(255, 255, 255, 0)))
        );
        assert_eq!(
            find(&offer, OptionCode::Router),
            Some(&OptionValue::IpAddressList(vec![SERVER_IP]))
        );
        assert_eq!(
            find(&offer, OptionCode::DomainName),
            Some(&OptionValue::String("test.local".to_string()))
        );
        assert_eq!(option_codes(&offer)[0], OptionCode::MessageType as u8);
    }

    #[tokio::test]
    async fn test_full_dora_flow() {
        let server = create_test_handler(test_config()).await;

        let offer = server.handler.respond(&discover(CLIENT_A), source()).unwrap();
        let ack = server
            .handler
            .respond(&request(CLIENT_A, offer.yiaddr, Some(SERVER_IP)), source())
            .unwrap();

        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, offer.yiaddr);
        let lease = server.handler.leases.lease(offer.yiaddr).unwrap();
        assert!(lease.is_confirmed);
        assert!(lease.is_owned_by("aa:bb:cc:dd:ee:01"));
    }

    #[tokio::test]
    async fn test_renewal_without_server_identifier() {
        let server = create_test_handler(test_config()).await;
        let offer = server.handler.respond(&discover(CLIENT_A), source()).unwrap();
        server
            .handler
            .respond(&request(CLIENT_A, offer.yiaddr, Some(SERVER_IP)), source())
            .unwrap();

        let mut renewal = DhcpPacket::client_request(MessageType::Request, CLIENT_A, 7, vec![]);
        renewal.ciaddr = offer.yiaddr;
        let ack = server.handler.respond(&renewal, source()).unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.xid, 7);
        assert_eq!(ack.ciaddr, offer.yiaddr);
    }

    #[tokio::test]
    async fn test_handle_request_different_server() {
        let server = create_test_handler(test_config()).await;
        let offer = server.handler.respond(&discover(CLIENT_A), source()).unwrap();

        let reply = server.handler.respond(
            &request(CLIENT_A, offer.yiaddr, Some(Ipv4Addr::new(10, 0, 0, 254))),
            source(),
        );
        assert!(reply.is_none());
        assert!(!server.handler.leases.lease(offer.yiaddr).unwrap().is_confirmed);
    }

    #[tokio::test]
    async fn test_request_for_another_clients_address_is_nakked() {
        let server = create_test_handler(test_config()).await;
        let address = Ipv4Addr::new(10, 0, 0, 10);
        server.handler.respond(&discover(CLIENT_A), source()).unwrap();
        server
            .handler
            .respond(&request(CLIENT_A, address, Some(SERVER_IP)), source())
            .unwrap();
        let before = server.handler.leases.snapshot();

        let nak = server
            .handler
            .respond(&request(CLIENT_B, address, None), source())
            .unwrap();

        assert_eq!(nak.message_type(), Some(MessageType::Nak));
        assert_eq!(nak.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.siaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.server_identifier(), Some(SERVER_IP));
        assert_eq!(
            option_codes(&nak),
            vec![
                OptionCode::MessageType as u8,
                OptionCode::ServerIdentifier as u8
            ]
        );
        assert_eq!(server.handler.leases.snapshot(), before);
        assert_eq!(
            server.history.deregistrations().count("aa:bb:cc:dd:ee:02"),
            1
        );
    }

    #[tokio::test]
    async fn test_directed_request_mismatch_is_nakked() {
        let server = create_test_handler(test_config()).await;
        let address = Ipv4Addr::new(10, 0, 0, 10);
        server.handler.respond(&discover(CLIENT_A), source()).unwrap();

        let nak = server
            .handler
            .respond(&request(CLIENT_B, address, Some(SERVER_IP)), source())
            .unwrap();
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
    }

    #[tokio::test]
    async fn test_non_authoritative_stays_silent() {
        let mut config = test_config();
        config.authoritative = false;
        let server = create_test_handler(config).await;

        let reply = server
            .handler
            .respond(&request(CLIENT_B, Ipv4Addr::new(10, 0, 0, 15), None), source());
        assert!(reply.is_none());
        assert_eq!(
            server.history.deregistrations().count("aa:bb:cc:dd:ee:02"),
            0
        );
    }

    #[tokio::test]
    async fn test_offer_resets_deregistration_count() {
        let server = create_test_handler(test_config()).await;
        let packet = request(CLIENT_B, Ipv4Addr::new(10, 0, 0, 15), None);
        let data = packet.encode();
        server.handler.handle_packet(&data, source()).await.unwrap();
        server.handler.handle_packet(&data, source()).await.unwrap();
        assert_eq!(server.history.deregistrations().count("aa:bb:cc:dd:ee:02"), 2);

        server
            .handler
            .handle_packet(&discover(CLIENT_B).encode(), source())
            .await
            .unwrap();
        assert_eq!(server.history.deregistrations().count("aa:bb:cc:dd:ee:02"), 0);
    }

    #[tokio::test]
    async fn test_filter_options_by_prl() {
        let mut config = test_config();
        config.leases.static_assignments.insert(
            "aa:bb:cc:dd:ee:01".to_string(),
            StaticAssignment {
                ip: Ipv4Addr::new(10, 0, 0, 50),
                hostname: Some("printer".to_string()),
            },
        );
        let server = create_test_handler(config).await;
        let table = OptionTable::new();

        let packet = DhcpPacket::client_request(
            MessageType::Discover,
            CLIENT_A,
            1,
            vec![DhcpOption::parameter_request_list(&table, &[1, 3])],
        );
        let offer = server.handler.respond(&packet, source()).unwrap();

        let codes = option_codes(&offer);
        for code in [53, 54, 51, 58, 59, 1, 3] {
            assert!(codes.contains(&code), "missing option {}", code);
        }
        assert!(!codes.contains(&6));
        assert!(!codes.contains(&15));
        assert!(!codes.contains(&12));
    }

    #[tokio::test]
    async fn test_static_hostname_in_ack() {
        let mut config = test_config();
        config.leases.static_assignments.insert(
            "AA-BB-CC-DD-EE-01".to_string(),
            StaticAssignment {
                ip: Ipv4Addr::new(10, 0, 0, 50),
                hostname: Some("printer".to_string()),
            },
        );
        let server = create_test_handler(config).await;

        let offer = server.handler.respond(&discover(CLIENT_A), source()).unwrap();
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 50));
        assert_eq!(offer.hostname(), Some("printer"));

        let ack = server
            .handler
            .respond(&request(CLIENT_A, offer.yiaddr, Some(SERVER_IP)), source())
            .unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.hostname(), Some("printer"));
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let mut config = test_config();
        config.leases.pool.ranges = vec![AddressRange {
            start: Ipv4Addr::new(10, 0, 0, 10),
            end: Ipv4Addr::new(10, 0, 0, 10),
        }];
        let server = create_test_handler(config).await;

        assert!(server.handler.respond(&discover(CLIENT_A), source()).is_some());
        assert!(server.handler.respond(&discover(CLIENT_B), source()).is_none());
    }

    #[tokio::test]
    async fn test_other_message_types_ignored() {
        let server = create_test_handler(test_config()).await;
        for message_type in [MessageType::Inform, MessageType::Release, MessageType::Decline] {
            let packet = DhcpPacket::client_request(message_type, CLIENT_A, 1, vec![]);
            assert!(server.handler.respond(&packet, source()).is_none());
        }
    }

    #[tokio::test]
    async fn test_bootp_request_ignored() {
        let server = create_test_handler(test_config()).await;
        let mut packet = discover(CLIENT_A);
        packet.options.clear();
        assert!(server.handler.respond(&packet, source()).is_none());
    }

    #[tokio::test]
    async fn test_handle_packet_rejects_bootreply() {
        let server = create_test_handler(test_config()).await;
        let offer = server.handler.respond(&discover(CLIENT_A), source()).unwrap();

        let result = server.handler.handle_packet(&offer.encode(), source()).await;
        assert!(matches!(result, Err(Error::InvalidPacket(_))));
    }

    #[tokio::test]
    async fn test_handle_packet_rejects_unsupported_hardware() {
        let server = create_test_handler(test_config()).await;
        let mut data = discover(CLIENT_A).encode();
        data[1] = 6;

        let result = server.handler.handle_packet(&data, source()).await;
        assert!(matches!(result, Err(Error::UnsupportedHardwareType(6))));
        assert!(server.history.for_client("aa:bb:cc:dd:ee:01").is_empty());
    }

    #[tokio::test]
    async fn test_handle_packet_records_history() {
        let server = create_test_handler(test_config()).await;
        server
            .handler
            .handle_packet(&discover(CLIENT_A).encode(), source())
            .await
            .unwrap();

        let entries = server.history.for_client("aa:bb:cc:dd:ee:01");
        assert_eq!(entries.len(), 1);
        let reply = entries[0].reply.as_ref().unwrap();
        assert_eq!(reply.message_type(), Some(MessageType::Offer));
    }

    #[test]
    fn test_filter_without_prl_keeps_everything() {
        let options = vec![
            DhcpOption::server_identifier(SERVER_IP),
            DhcpOption::domain_name("test.local"),
        ];
        assert_eq!(filter_options_by_prl(options.clone(), None), options);
    }

    #[tokio::test]
    async fn test_create_socket_binds_ephemeral_port() {
        let socket = create_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let local = socket.local_addr().unwrap();
        assert_eq!(local.ip(), std::net::IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(local.port(), 0);
    }
}
