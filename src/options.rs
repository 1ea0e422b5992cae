//! DHCP options as defined in RFC 2132.
//!
//! Every option the codec understands is declared once in a static table
//! keyed by option code. Each entry carries a human name, a property name
//! (camel-cased from the human name unless overridden), an [`OptionKind`]
//! describing its payload, and an optional value map for enumerated codes.
//! The [`OptionTable`] built from those declarations is immutable and can be
//! shared freely between listener tasks.
//!
//! Decoded options are a closed [`OptionValue`] enum, so everything
//! downstream of the codec matches on payload types rather than on names.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions

use std::collections::HashMap;
use std::fmt::Write;
use std::net::Ipv4Addr;

use tracing::warn;

/// Maximum number of IP addresses in list options such as Router (3).
///
/// Options have a 1-byte length field, so maximum data is 255 bytes.
/// With 4 bytes per IPv4 address, that's 63 addresses maximum.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

/// Maximum payload of a single option.
const MAX_OPTION_LENGTH: usize = 255;

/// Hardware type for Ethernet, the only type the codec implements.
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// Option codes the engine refers to directly.
///
/// The full registry lives in [`OptionTable`]; this enum only names the
/// codes that negotiation logic reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DnsServers = 6,
    Hostname = 12,
    DomainName = 15,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    RenewalTime = 58,
    RebindingTime = 59,
    VendorClassIdentifier = 60,
    ClientIdentifier = 61,
    End = 255,
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

/// Value map for Option 53.
const MESSAGE_TYPE_NAMES: &[(u8, &str)] = &[
    (1, "DHCPDISCOVER"),
    (2, "DHCPOFFER"),
    (3, "DHCPREQUEST"),
    (4, "DHCPDECLINE"),
    (5, "DHCPACK"),
    (6, "DHCPNAK"),
    (7, "DHCPRELEASE"),
    (8, "DHCPINFORM"),
];

/// Value map for Option 46.
const NETBIOS_NODE_TYPES: &[(u8, &str)] = &[(1, "B-node"), (2, "P-node"), (4, "M-node"), (8, "H-node")];

/// Value map for Option 52.
const OVERLOAD_FIELDS: &[(u8, &str)] = &[(1, "file"), (2, "sname"), (3, "both")];

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl MessageType {
    /// Symbolic name from the Option 53 value map, e.g. `DHCPDISCOVER`.
    pub fn symbol(self) -> &'static str {
        lookup_value(MESSAGE_TYPE_NAMES, self as u8).unwrap_or("DHCPUNKNOWN")
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// How an option's payload bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Pad and End: a bare code byte with no length.
    Marker,
    UInt8,
    UInt16,
    UInt32,
    IpAddress,
    IpAddressList,
    String,
    Bytes,
    /// Option 53, mapped through the message type value map.
    MessageType,
    /// Option 61: a type byte followed by the identifier bytes.
    ClientIdentifier,
    /// Option 55: a list of 1-byte option codes.
    ParameterRequestList,
}

#[derive(Debug, Clone, Copy)]
struct Declaration {
    code: u8,
    name: &'static str,
    property: Option<&'static str>,
    kind: OptionKind,
    values: &'static [(u8, &'static str)],
}

const fn declare(code: u8, name: &'static str, kind: OptionKind) -> Declaration {
    Declaration {
        code,
        name,
        property: None,
        kind,
        values: &[],
    }
}

impl Declaration {
    const fn property(self, property: &'static str) -> Self {
        Self {
            property: Some(property),
            ..self
        }
    }

    const fn values(self, values: &'static [(u8, &'static str)]) -> Self {
        Self { values, ..self }
    }
}

const DECLARATIONS: &[Declaration] = &[
    declare(0, "Pad", OptionKind::Marker),
    declare(1, "Subnet Mask", OptionKind::IpAddress),
    declare(2, "Time Offset", OptionKind::UInt32),
    declare(3, "Router", OptionKind::IpAddressList).property("routers"),
    declare(4, "Time Server", OptionKind::IpAddressList).property("timeServers"),
    declare(5, "Name Server", OptionKind::IpAddressList).property("nameServers"),
    declare(6, "Domain Name Server", OptionKind::IpAddressList).property("dnsServers"),
    declare(7, "Log Server", OptionKind::IpAddressList).property("logServers"),
    declare(12, "Host Name", OptionKind::String).property("hostname"),
    declare(13, "Boot File Size", OptionKind::UInt16),
    declare(15, "Domain Name", OptionKind::String),
    declare(17, "Root Path", OptionKind::String),
    declare(19, "IP Forwarding", OptionKind::UInt8),
    declare(23, "Default IP TTL", OptionKind::UInt8).property("defaultTtl"),
    declare(26, "Interface MTU", OptionKind::UInt16).property("interfaceMtu"),
    declare(28, "Broadcast Address", OptionKind::IpAddress),
    declare(35, "ARP Cache Timeout", OptionKind::UInt32),
    declare(42, "NTP Servers", OptionKind::IpAddressList),
    declare(43, "Vendor Specific Information", OptionKind::Bytes),
    declare(44, "NetBIOS Name Servers", OptionKind::IpAddressList),
    declare(46, "NetBIOS Node Type", OptionKind::UInt8).values(NETBIOS_NODE_TYPES),
    declare(50, "Requested IP Address", OptionKind::IpAddress),
    declare(51, "IP Address Lease Time", OptionKind::UInt32).property("leaseTime"),
    declare(52, "Option Overload", OptionKind::UInt8).values(OVERLOAD_FIELDS),
    declare(53, "DHCP Message Type", OptionKind::MessageType)
        .property("messageType")
        .values(MESSAGE_TYPE_NAMES),
    declare(54, "Server Identifier", OptionKind::IpAddress),
    declare(55, "Parameter Request List", OptionKind::ParameterRequestList),
    declare(56, "Message", OptionKind::String),
    declare(57, "Maximum DHCP Message Size", OptionKind::UInt16).property("maximumMessageSize"),
    declare(58, "Renewal (T1) Time Value", OptionKind::UInt32).property("renewalTime"),
    declare(59, "Rebinding (T2) Time Value", OptionKind::UInt32).property("rebindingTime"),
    declare(60, "Vendor Class Identifier", OptionKind::String),
    declare(61, "Client Identifier", OptionKind::ClientIdentifier),
    declare(66, "TFTP Server Name", OptionKind::String),
    declare(67, "Bootfile Name", OptionKind::String),
    declare(255, "End", OptionKind::Marker),
];

fn lookup_value(values: &[(u8, &'static str)], value: u8) -> Option<&'static str> {
    values
        .iter()
        .find(|(candidate, _)| *candidate == value)
        .map(|(_, name)| *name)
}

/// Camel-cases a human option name: `"Subnet Mask"` becomes `subnetMask`.
fn derive_property_name(name: &str) -> String {
    let mut property = String::with_capacity(name.len());
    for (index, word) in name
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .enumerate()
    {
        let lower = word.to_ascii_lowercase();
        if index == 0 {
            property.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                property.push(first.to_ascii_uppercase());
                property.push_str(chars.as_str());
            }
        }
    }
    property
}

/// A single entry of the option registry.
#[derive(Debug, Clone)]
pub struct OptionDefinition {
    pub code: u8,
    pub name: &'static str,
    pub property: String,
    pub kind: OptionKind,
    pub values: &'static [(u8, &'static str)],
}

impl OptionDefinition {
    pub fn is_pad(&self) -> bool {
        self.code == OptionCode::Pad as u8
    }

    pub fn is_end(&self) -> bool {
        self.code == OptionCode::End as u8
    }

    /// Pad and End are the only options written without a length byte.
    pub fn has_length(&self) -> bool {
        self.kind != OptionKind::Marker
    }

    /// Symbolic name for an enumerated value, if the option has a value map.
    pub fn symbol(&self, value: u8) -> Option<&'static str> {
        lookup_value(self.values, value)
    }
}

/// Immutable registry of option definitions, looked up by code or property.
#[derive(Debug, Clone)]
pub struct OptionTable {
    by_code: HashMap<u8, OptionDefinition>,
    by_property: HashMap<String, u8>,
}

impl Default for OptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionTable {
    pub fn new() -> Self {
        let mut by_code = HashMap::with_capacity(DECLARATIONS.len());
        let mut by_property = HashMap::with_capacity(DECLARATIONS.len());

        for declaration in DECLARATIONS {
            let property = declaration
                .property
                .map(str::to_string)
                .unwrap_or_else(|| derive_property_name(declaration.name));
            by_property.insert(property.clone(), declaration.code);
            by_code.insert(
                declaration.code,
                OptionDefinition {
                    code: declaration.code,
                    name: declaration.name,
                    property,
                    kind: declaration.kind,
                    values: declaration.values,
                },
            );
        }

        Self {
            by_code,
            by_property,
        }
    }

    pub fn get(&self, code: u8) -> Option<&OptionDefinition> {
        self.by_code.get(&code)
    }

    pub fn by_property(&self, property: &str) -> Option<&OptionDefinition> {
        self.by_property
            .get(property)
            .and_then(|code| self.by_code.get(code))
    }

    /// Human name for a code, or `"Unknown"` for unregistered codes.
    pub fn name_of(&self, code: u8) -> &'static str {
        self.get(code).map_or("Unknown", |definition| definition.name)
    }

    /// Decodes one option payload according to its registered kind.
    ///
    /// Unknown codes and payloads whose length does not fit the kind are
    /// logged and yield `None`; the caller has already consumed the bytes,
    /// so decoding continues with the next option.
    pub fn decode(&self, code: u8, data: &[u8]) -> Option<DhcpOption> {
        let Some(definition) = self.get(code) else {
            warn!(
                "Skipping unknown option {} ({} bytes)",
                code,
                data.len()
            );
            return None;
        };

        let value = match definition.kind {
            OptionKind::Marker => None,
            OptionKind::UInt8 => match data {
                [value] => Some(OptionValue::UInt8(*value)),
                _ => None,
            },
            OptionKind::UInt16 => <[u8; 2]>::try_from(data)
                .ok()
                .map(|bytes| OptionValue::UInt16(u16::from_be_bytes(bytes))),
            OptionKind::UInt32 => <[u8; 4]>::try_from(data)
                .ok()
                .map(|bytes| OptionValue::UInt32(u32::from_be_bytes(bytes))),
            OptionKind::IpAddress => <[u8; 4]>::try_from(data)
                .ok()
                .map(|bytes| OptionValue::IpAddress(Ipv4Addr::from(bytes))),
            OptionKind::IpAddressList => {
                if data.is_empty() || !data.len().is_multiple_of(4) {
                    None
                } else {
                    let addresses = data
                        .chunks_exact(4)
                        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
                        .collect();
                    Some(OptionValue::IpAddressList(addresses))
                }
            }
            OptionKind::String => {
                let trimmed = data.strip_suffix(&[0]).unwrap_or(data);
                Some(OptionValue::String(
                    String::from_utf8_lossy(trimmed).into_owned(),
                ))
            }
            OptionKind::Bytes => Some(OptionValue::Bytes(data.to_vec())),
            OptionKind::MessageType => match data {
                [value] => MessageType::try_from(*value)
                    .ok()
                    .map(OptionValue::MessageType),
                _ => None,
            },
            OptionKind::ClientIdentifier => match data {
                [id_type, id @ ..] if !id.is_empty() => Some(OptionValue::ClientIdentifier {
                    id_type: *id_type,
                    id: id.to_vec(),
                }),
                _ => None,
            },
            OptionKind::ParameterRequestList => Some(OptionValue::ParameterRequestList(
                data.iter()
                    .map(|code| RequestedParameter {
                        code: *code,
                        name: self.name_of(*code),
                    })
                    .collect(),
            )),
        };

        if value.is_none() {
            warn!(
                "Skipping malformed {} option ({} bytes)",
                definition.name,
                data.len()
            );
        }

        value.map(|value| DhcpOption { code, value })
    }
}

/// One entry of a decoded parameter request list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedParameter {
    pub code: u8,
    pub name: &'static str,
}

/// Decoded payload of a single option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    IpAddress(Ipv4Addr),
    IpAddressList(Vec<Ipv4Addr>),
    String(String),
    Bytes(Vec<u8>),
    MessageType(MessageType),
    ClientIdentifier { id_type: u8, id: Vec<u8> },
    ParameterRequestList(Vec<RequestedParameter>),
}

/// A decoded option: its code plus a typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub value: OptionValue,
}

impl DhcpOption {
    fn new(code: OptionCode, value: OptionValue) -> Self {
        Self {
            code: code as u8,
            value,
        }
    }

    pub fn message_type(message_type: MessageType) -> Self {
        Self::new(OptionCode::MessageType, OptionValue::MessageType(message_type))
    }

    pub fn server_identifier(ip: Ipv4Addr) -> Self {
        Self::new(OptionCode::ServerIdentifier, OptionValue::IpAddress(ip))
    }

    pub fn requested_ip(ip: Ipv4Addr) -> Self {
        Self::new(OptionCode::RequestedIpAddress, OptionValue::IpAddress(ip))
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(OptionCode::SubnetMask, OptionValue::IpAddress(mask))
    }

    pub fn routers(routers: Vec<Ipv4Addr>) -> Self {
        Self::new(OptionCode::Router, OptionValue::IpAddressList(routers))
    }

    pub fn dns_servers(servers: Vec<Ipv4Addr>) -> Self {
        Self::new(OptionCode::DnsServers, OptionValue::IpAddressList(servers))
    }

    pub fn hostname(name: impl Into<String>) -> Self {
        Self::new(OptionCode::Hostname, OptionValue::String(name.into()))
    }

    pub fn domain_name(name: impl Into<String>) -> Self {
        Self::new(OptionCode::DomainName, OptionValue::String(name.into()))
    }

    pub fn lease_time(seconds: u32) -> Self {
        Self::new(OptionCode::LeaseTime, OptionValue::UInt32(seconds))
    }

    pub fn renewal_time(seconds: u32) -> Self {
        Self::new(OptionCode::RenewalTime, OptionValue::UInt32(seconds))
    }

    pub fn rebinding_time(seconds: u32) -> Self {
        Self::new(OptionCode::RebindingTime, OptionValue::UInt32(seconds))
    }

    pub fn vendor_class_identifier(vendor: impl Into<String>) -> Self {
        Self::new(
            OptionCode::VendorClassIdentifier,
            OptionValue::String(vendor.into()),
        )
    }

    pub fn client_identifier(id_type: u8, id: Vec<u8>) -> Self {
        Self::new(
            OptionCode::ClientIdentifier,
            OptionValue::ClientIdentifier { id_type, id },
        )
    }

    pub fn parameter_request_list(table: &OptionTable, codes: &[u8]) -> Self {
        let parameters = codes
            .iter()
            .map(|code| RequestedParameter {
                code: *code,
                name: table.name_of(*code),
            })
            .collect();
        Self::new(
            OptionCode::ParameterRequestList,
            OptionValue::ParameterRequestList(parameters),
        )
    }

    /// Encodes the option to its wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        let mut data = match &self.value {
            OptionValue::UInt8(value) => vec![*value],
            OptionValue::UInt16(value) => value.to_be_bytes().to_vec(),
            OptionValue::UInt32(value) => value.to_be_bytes().to_vec(),
            OptionValue::IpAddress(addr) => addr.octets().to_vec(),
            OptionValue::IpAddressList(addrs) => addrs
                .iter()
                .take(MAX_ADDRESSES_PER_OPTION)
                .flat_map(|addr| addr.octets())
                .collect(),
            OptionValue::String(text) => text.as_bytes().to_vec(),
            OptionValue::Bytes(bytes) => bytes.clone(),
            OptionValue::MessageType(message_type) => vec![*message_type as u8],
            OptionValue::ClientIdentifier { id_type, id } => {
                let mut data = Vec::with_capacity(id.len() + 1);
                data.push(*id_type);
                data.extend_from_slice(id);
                data
            }
            OptionValue::ParameterRequestList(parameters) => {
                parameters.iter().map(|parameter| parameter.code).collect()
            }
        };
        data.truncate(MAX_OPTION_LENGTH);

        let mut result = Vec::with_capacity(data.len() + 2);
        result.push(self.code);
        result.push(data.len() as u8);
        result.extend_from_slice(&data);
        result
    }
}

/// The stable identity of a DHCP client.
///
/// Built from Option 61 when the client sends one, otherwise synthesized
/// from `htype`/`chaddr`. When a MAC address can be recovered it doubles as
/// the unique id, so a client is recognised whether or not it sends Option 61.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentifier {
    pub unique_id: String,
    pub hardware_type: Option<u8>,
    pub hardware_address: Option<String>,
}

impl ClientIdentifier {
    /// Identity from an Option 61 payload.
    pub fn from_option(id_type: u8, id: &[u8]) -> Self {
        let hardware_address = (id_type == HTYPE_ETHERNET && id.len() == HLEN_ETHERNET as usize)
            .then(|| format_hex(id));

        let unique_id = match &hardware_address {
            Some(mac) => mac.clone(),
            None => {
                let mut raw = Vec::with_capacity(id.len() + 1);
                raw.push(id_type);
                raw.extend_from_slice(id);
                format_hex(&raw)
            }
        };

        Self {
            unique_id,
            hardware_type: Some(id_type),
            hardware_address,
        }
    }

    /// Identity synthesized from an Ethernet hardware address.
    pub fn from_hardware(htype: u8, chaddr: &[u8]) -> Self {
        let mac = format_hex(chaddr);
        Self {
            unique_id: mac.clone(),
            hardware_type: Some(htype),
            hardware_address: Some(mac),
        }
    }
}

impl std::fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.unique_id)
    }
}

/// Formats bytes as lowercase colon-separated hex, e.g. `aa:bb:cc`.
pub fn format_hex(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            result.push(':');
        }
        let _ = write!(result, "{:02x}", byte);
    }
    result
}
