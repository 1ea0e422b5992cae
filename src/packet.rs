//! DHCP message decoding and encoding per RFC 2131.
//!
//! A DHCP message consists of a fixed 236-byte header followed by a 4-byte
//! magic cookie and a variable-length option section. Option bytes are
//! interpreted through an [`OptionTable`], so the codec itself knows only the
//! TLV framing and the fixed header layout.
//!
//! # Message Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```
//!
//! Encoded messages end with an End option followed by a single null byte;
//! they are not padded out to the BOOTP minimum.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{
    format_hex, ClientIdentifier, DhcpOption, MessageType, OptionCode, OptionTable, OptionValue,
    RequestedParameter, HLEN_ETHERNET, HTYPE_ETHERNET,
};

/// DHCP magic cookie that identifies DHCP messages (vs BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const CHADDR_OFFSET: usize = 28;
const CHADDR_SIZE: usize = 16;
const SNAME_OFFSET: usize = CHADDR_OFFSET + CHADDR_SIZE;
const SNAME_SIZE: usize = 64;
const FILE_OFFSET: usize = SNAME_OFFSET + SNAME_SIZE;
const FILE_SIZE: usize = 128;
const MAGIC_COOKIE_OFFSET: usize = FILE_OFFSET + FILE_SIZE;

/// Size of the fixed header portion including magic cookie.
pub const DHCP_FIXED_HEADER_SIZE: usize = MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Initial capacity for the encode buffer.
///
/// 576 bytes is the minimum datagram size all hosts must accept per RFC 791.
const DHCP_ENCODE_CAPACITY: usize = 576;

/// Maximum hop count before dropping the message.
///
/// Relay agents increment hops; RFC 2131 §4.1 has them discard messages
/// with excessive counts.
const MAX_HOPS: u8 = 16;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Bit 15 of `flags`: the client asks for broadcast replies.
const BROADCAST_FLAG: u16 = 0x8000;

/// A decoded DHCP message, either a client request or a server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID chosen by client, echoed in replies.
    pub xid: u32,
    pub secs: u16,
    /// Flags. Bit 15 (0x8000) = broadcast flag.
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    /// "Your" IP address - the address being assigned to the client.
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    /// Gateway IP address - set by relay agents.
    pub giaddr: Ipv4Addr,
    /// Client hardware address. Only the first `hlen` bytes are meaningful.
    pub chaddr: [u8; 16],
    /// Server host name, null-stripped.
    pub sname: String,
    /// Boot file name, null-stripped.
    pub file: String,
    /// Options in wire order. Pad, End and undecodable options are absent.
    pub options: Vec<DhcpOption>,
    /// The sender's identity: Option 61 when present, otherwise synthesized
    /// from `htype` and `chaddr`.
    pub client_identifier: ClientIdentifier,
}

fn read_ip(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

/// Reads a fixed-width text field up to its first null byte.
fn read_text(field: &[u8]) -> String {
    let end = field.iter().position(|byte| *byte == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn write_text(packet: &mut Vec<u8>, text: &str, size: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(size);
    packet.extend_from_slice(&bytes[..len]);
    packet.resize(packet.len() + size - len, 0);
}

impl DhcpPacket {
    /// Decodes a DHCP message from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if:
    /// - the buffer is shorter than 240 bytes (fixed header + magic cookie)
    /// - the magic cookie is not 99.130.83.99
    /// - the hop count exceeds 16
    /// - `hlen` is not 6 for an Ethernet message
    /// - an option's length runs past the end of the buffer
    ///
    /// Returns [`Error::UnsupportedHardwareType`] for any `htype` other than
    /// Ethernet.
    pub fn parse(data: &[u8], table: &OptionTable) -> Result<Self> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_FIXED_HEADER_SIZE
            )));
        }

        if data[MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE] != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "Hop count {} exceeds maximum {}",
                hops, MAX_HOPS
            )));
        }

        if htype != HTYPE_ETHERNET {
            return Err(Error::UnsupportedHardwareType(htype));
        }

        if hlen != HLEN_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "Invalid hlen {} for Ethernet (expected {})",
                hlen, HLEN_ETHERNET
            )));
        }

        let mut chaddr = [0u8; CHADDR_SIZE];
        chaddr.copy_from_slice(&data[CHADDR_OFFSET..SNAME_OFFSET]);

        let options = Self::parse_options(&data[DHCP_FIXED_HEADER_SIZE..], table)?;

        let client_identifier = options
            .iter()
            .find_map(|opt| match &opt.value {
                OptionValue::ClientIdentifier { id_type, id } => {
                    Some(ClientIdentifier::from_option(*id_type, id))
                }
                _ => None,
            })
            .unwrap_or_else(|| ClientIdentifier::from_hardware(htype, &chaddr[..hlen as usize]));

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: read_ip(data, 12),
            yiaddr: read_ip(data, 16),
            siaddr: read_ip(data, 20),
            giaddr: read_ip(data, 24),
            chaddr,
            sname: read_text(&data[SNAME_OFFSET..FILE_OFFSET]),
            file: read_text(&data[FILE_OFFSET..MAGIC_COOKIE_OFFSET]),
            options,
            client_identifier,
        })
    }

    fn parse_options(data: &[u8], table: &OptionTable) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::InvalidPacket(format!(
                    "Option {} length missing",
                    code
                )));
            }

            let length = data[index + 1] as usize;

            if index + 2 + length > data.len() {
                return Err(Error::InvalidPacket(format!(
                    "Option {} data truncated",
                    code
                )));
            }

            if let Some(option) = table.decode(code, &data[index + 2..index + 2 + length]) {
                options.push(option);
            }

            index += 2 + length;
        }

        Ok(options)
    }

    /// Encodes the message for transmission.
    ///
    /// Options are written in the order supplied, followed by an End option.
    /// Trailing zero bytes are trimmed and exactly one null terminator is
    /// appended.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DHCP_ENCODE_CAPACITY);

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());

        packet.extend_from_slice(&self.chaddr);
        write_text(&mut packet, &self.sname, SNAME_SIZE);
        write_text(&mut packet, &self.file, FILE_SIZE);

        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &self.options {
            packet.extend_from_slice(&option.encode());
        }

        packet.push(OptionCode::End as u8);

        while packet.last() == Some(&0) {
            packet.pop();
        }
        packet.push(0);

        packet
    }

    fn find_value<T>(&self, code: OptionCode, pick: impl Fn(&OptionValue) -> Option<T>) -> Option<T> {
        self.options
            .iter()
            .filter(|opt| opt.code == code as u8)
            .find_map(|opt| pick(&opt.value))
    }

    /// Returns the DHCP message type (Option 53) if present.
    ///
    /// Plain BOOTP messages carry no message type.
    pub fn message_type(&self) -> Option<MessageType> {
        self.find_value(OptionCode::MessageType, |value| match value {
            OptionValue::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    /// Returns the requested IP address (Option 50) if present.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.find_value(OptionCode::RequestedIpAddress, |value| match value {
            OptionValue::IpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Returns the server identifier (Option 54) if present.
    ///
    /// Clients include this in REQUEST to indicate which server's
    /// offer they are accepting.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.find_value(OptionCode::ServerIdentifier, |value| match value {
            OptionValue::IpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Returns the client hostname (Option 12) if present.
    pub fn hostname(&self) -> Option<&str> {
        self.options
            .iter()
            .filter(|opt| opt.code == OptionCode::Hostname as u8)
            .find_map(|opt| match &opt.value {
                OptionValue::String(name) => Some(name.as_str()),
                _ => None,
            })
    }

    pub fn vendor_class_identifier(&self) -> Option<&str> {
        self.options
            .iter()
            .filter(|opt| opt.code == OptionCode::VendorClassIdentifier as u8)
            .find_map(|opt| match &opt.value {
                OptionValue::String(vendor) => Some(vendor.as_str()),
                _ => None,
            })
    }

    /// Returns the parameter request list (Option 55) if present.
    pub fn parameter_request_list(&self) -> Option<&[RequestedParameter]> {
        self.options.iter().find_map(|opt| match &opt.value {
            OptionValue::ParameterRequestList(params) => Some(params.as_slice()),
            _ => None,
        })
    }

    /// Returns the client hardware address bytes (respecting hlen).
    pub fn chaddr_bytes(&self) -> &[u8] {
        &self.chaddr[..(self.hlen as usize).min(CHADDR_SIZE)]
    }

    /// Formats the client hardware address, e.g. "aa:bb:cc:dd:ee:ff".
    pub fn format_mac(&self) -> String {
        format_hex(self.chaddr_bytes())
    }

    /// The stable key for this client, see [`ClientIdentifier`].
    pub fn client_id(&self) -> &str {
        &self.client_identifier.unique_id
    }

    /// Returns true if the broadcast flag (bit 15) is set.
    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }

    /// Creates a reply to `request`.
    ///
    /// The message type is always the first option. `xid`, `flags`,
    /// `giaddr`, `chaddr`, `htype` and `hlen` are copied from the request.
    /// Following RFC 2131 table 3, only an ACK echoes the request's `ciaddr`
    /// and a NAK leaves `siaddr` zero.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![DhcpOption::message_type(message_type)];
        all_options.extend(options);

        let ciaddr = match message_type {
            MessageType::Ack => request.ciaddr,
            _ => Ipv4Addr::UNSPECIFIED,
        };
        let siaddr = match message_type {
            MessageType::Nak => Ipv4Addr::UNSPECIFIED,
            _ => server_ip,
        };

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr,
            yiaddr: your_ip,
            siaddr,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: String::new(),
            file: String::new(),
            options: all_options,
            client_identifier: request.client_identifier.clone(),
        }
    }
}

#[cfg(test)]
impl DhcpPacket {
    /// A broadcast client request from an Ethernet `mac`.
    pub(crate) fn client_request(
        message_type: MessageType,
        mac: [u8; 6],
        xid: u32,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);
        let mut all_options = vec![DhcpOption::message_type(message_type)];
        all_options.extend(options);

        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid,
            secs: 0,
            flags: BROADCAST_FLAG,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: String::new(),
            file: String::new(),
            options: all_options,
            client_identifier: ClientIdentifier::from_hardware(HTYPE_ETHERNET, &mac),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
    const XID: u32 = 0x0bad_cafe;

    /// A broadcast Ethernet request followed by the given raw options and End.
    fn request_bytes(options: &[&[u8]]) -> Vec<u8> {
        let mut data = vec![0u8; DHCP_FIXED_HEADER_SIZE];
        data[0] = BOOTREQUEST;
        data[1] = HTYPE_ETHERNET;
        data[2] = HLEN_ETHERNET;
        data[4..8].copy_from_slice(&XID.to_be_bytes());
        data[10..12].copy_from_slice(&BROADCAST_FLAG.to_be_bytes());
        data[28..34].copy_from_slice(&MAC);
        data[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        for option in options {
            data.extend_from_slice(option);
        }
        data.push(OptionCode::End as u8);
        data
    }

    fn parse(data: &[u8]) -> Result<DhcpPacket> {
        DhcpPacket::parse(data, &OptionTable::new())
    }

    const DISCOVER: &[u8] = &[53, 1, MessageType::Discover as u8];
    const REQUEST: &[u8] = &[53, 1, MessageType::Request as u8];

    #[test]
    fn test_header_fields() {
        let mut data = request_bytes(&[DISCOVER]);
        data[3] = 2;
        data[8..10].copy_from_slice(&7u16.to_be_bytes());
        data[12..16].copy_from_slice(&[172, 16, 0, 5]);
        data[16..20].copy_from_slice(&[172, 16, 0, 6]);
        data[20..24].copy_from_slice(&[172, 16, 0, 7]);
        data[24..28].copy_from_slice(&[172, 16, 0, 8]);

        let packet = parse(&data).unwrap();
        assert_eq!(packet.op, BOOTREQUEST);
        assert_eq!(packet.hops, 2);
        assert_eq!(packet.xid, XID);
        assert_eq!(packet.secs, 7);
        assert!(packet.is_broadcast());
        assert_eq!(packet.ciaddr, Ipv4Addr::new(172, 16, 0, 5));
        assert_eq!(packet.yiaddr, Ipv4Addr::new(172, 16, 0, 6));
        assert_eq!(packet.siaddr, Ipv4Addr::new(172, 16, 0, 7));
        assert_eq!(packet.giaddr, Ipv4Addr::new(172, 16, 0, 8));
        assert_eq!(packet.chaddr_bytes(), &MAC);
        assert_eq!(packet.format_mac(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(packet.message_type(), Some(MessageType::Discover));

        let encoded = packet.encode();
        assert_eq!(&encoded[..DHCP_FIXED_HEADER_SIZE], &data[..DHCP_FIXED_HEADER_SIZE]);
        assert_eq!(parse(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_encode_ends_with_end_and_one_null() {
        let packet = parse(&request_bytes(&[DISCOVER, &[0, 0, 0]])).unwrap();
        let encoded = packet.encode();

        assert_eq!(&encoded[240..243], DISCOVER);
        assert_eq!(&encoded[243..], &[OptionCode::End as u8, 0]);
    }

    #[test]
    fn test_no_options_at_all() {
        let data = &request_bytes(&[])[..DHCP_FIXED_HEADER_SIZE];
        let packet = parse(data).unwrap();
        assert!(packet.options.is_empty());
        assert_eq!(packet.message_type(), None);
    }

    #[test]
    fn test_reply_mirrors_request() {
        let mut data = request_bytes(&[DISCOVER]);
        data[24..28].copy_from_slice(&[10, 9, 0, 1]);
        let discover = parse(&data).unwrap();

        let offer = DhcpPacket::create_reply(
            &discover,
            MessageType::Offer,
            Ipv4Addr::new(10, 9, 0, 50),
            Ipv4Addr::new(10, 9, 0, 2),
            vec![DhcpOption::lease_time(600)],
        );

        assert_eq!(offer.op, BOOTREPLY);
        assert_eq!(offer.xid, XID);
        assert_eq!(offer.flags, BROADCAST_FLAG);
        assert_eq!(offer.giaddr, Ipv4Addr::new(10, 9, 0, 1));
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 9, 0, 50));
        assert_eq!(offer.siaddr, Ipv4Addr::new(10, 9, 0, 2));
        assert_eq!(offer.chaddr, discover.chaddr);
        assert_eq!(offer.options[0], DhcpOption::message_type(MessageType::Offer));
        assert_eq!(offer.options[1], DhcpOption::lease_time(600));
        assert_eq!(offer.client_id(), discover.client_id());

        let encoded = offer.encode();
        assert_eq!(encoded[0], BOOTREPLY);
        assert_eq!(&encoded[16..20], &[10, 9, 0, 50]);
        assert_eq!(&encoded[240..243], &[53, 1, MessageType::Offer as u8]);
    }

    #[test]
    fn test_ack_and_nak_address_fields() {
        let mut data = request_bytes(&[REQUEST]);
        data[12..16].copy_from_slice(&[10, 9, 0, 50]);
        let renewal = parse(&data).unwrap();
        let server = Ipv4Addr::new(10, 9, 0, 2);

        let ack = DhcpPacket::create_reply(&renewal, MessageType::Ack, renewal.ciaddr, server, vec![]);
        assert_eq!(ack.ciaddr, Ipv4Addr::new(10, 9, 0, 50));
        assert_eq!(ack.siaddr, server);

        let offer = DhcpPacket::create_reply(&renewal, MessageType::Offer, renewal.ciaddr, server, vec![]);
        assert_eq!(offer.ciaddr, Ipv4Addr::UNSPECIFIED);

        let nak = DhcpPacket::create_reply(
            &renewal,
            MessageType::Nak,
            Ipv4Addr::UNSPECIFIED,
            server,
            vec![DhcpOption::server_identifier(server)],
        );
        assert_eq!(nak.ciaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.siaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.server_identifier(), Some(server));
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert!(parse(&[0u8; 64]).is_err());
        assert!(parse(&request_bytes(&[])[..DHCP_FIXED_HEADER_SIZE - 1]).is_err());

        let mut bad_cookie = request_bytes(&[DISCOVER]);
        bad_cookie[239] ^= 0xff;
        assert!(matches!(parse(&bad_cookie), Err(Error::InvalidPacket(_))));

        let mut long_hlen = request_bytes(&[DISCOVER]);
        long_hlen[2] = 8;
        assert!(parse(&long_hlen).is_err());

        let mut token_ring = request_bytes(&[DISCOVER]);
        token_ring[1] = 6;
        assert!(matches!(
            parse(&token_ring),
            Err(Error::UnsupportedHardwareType(6))
        ));
    }

    #[test]
    fn test_hop_count_boundary() {
        let mut data = request_bytes(&[DISCOVER]);
        data[3] = MAX_HOPS;
        assert!(parse(&data).is_ok());
        data[3] = MAX_HOPS + 1;
        assert!(parse(&data).is_err());
    }

    #[test]
    fn test_typed_option_accessors() {
        let data = request_bytes(&[
            &[0, 0],
            REQUEST,
            &[50, 4, 10, 9, 0, 77],
            &[54, 4, 10, 9, 0, 2],
            &[12, 6, b'k', b'i', b'o', b's', b'k', b'1'],
            &[55, 3, 1, 3, 6],
        ]);
        let packet = parse(&data).unwrap();

        assert_eq!(packet.options.len(), 5);
        assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(10, 9, 0, 77)));
        assert_eq!(packet.server_identifier(), Some(Ipv4Addr::new(10, 9, 0, 2)));
        assert_eq!(packet.hostname(), Some("kiosk1"));

        let prl = packet.parameter_request_list().unwrap();
        let codes: Vec<u8> = prl.iter().map(|param| param.code).collect();
        assert_eq!(codes, vec![1, 3, 6]);
        assert_eq!(prl[0].name, "Subnet Mask");
    }

    #[test]
    fn test_unknown_and_misshapen_options_skipped() {
        let data = request_bytes(&[
            &[231, 2, 0xca, 0xfe],
            &[50, 3, 10, 9, 0],
            REQUEST,
        ]);
        let packet = parse(&data).unwrap();

        assert_eq!(packet.options.len(), 1);
        assert_eq!(packet.requested_ip(), None);
        assert_eq!(packet.message_type(), Some(MessageType::Request));
    }

    #[test]
    fn test_truncated_options_rejected() {
        let mut missing_length = request_bytes(&[]);
        *missing_length.last_mut().unwrap() = OptionCode::LeaseTime as u8;
        assert!(parse(&missing_length).is_err());

        let mut short_payload = request_bytes(&[]);
        short_payload.pop();
        short_payload.extend_from_slice(&[OptionCode::LeaseTime as u8, 4, 0, 0]);
        assert!(parse(&short_payload).is_err());
    }

    #[test]
    fn test_client_identifier_option_wins() {
        let data = request_bytes(&[DISCOVER, &[61, 7, 1, 0x02, 0x42, 0xac, 0x11, 0x00, 0x09]]);
        let packet = parse(&data).unwrap();

        assert_eq!(packet.client_id(), "02:42:ac:11:00:09");
        assert_eq!(
            packet.client_identifier.hardware_address.as_deref(),
            Some("02:42:ac:11:00:09")
        );
        assert_eq!(packet.format_mac(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_client_identifier_from_chaddr() {
        let packet = parse(&request_bytes(&[DISCOVER])).unwrap();

        assert_eq!(packet.client_id(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(packet.client_identifier.hardware_type, Some(HTYPE_ETHERNET));
        assert!(
            !packet
                .options
                .iter()
                .any(|opt| opt.code == OptionCode::ClientIdentifier as u8)
        );
    }

    #[test]
    fn test_unicast_request() {
        let mut data = request_bytes(&[DISCOVER]);
        data[10..12].fill(0);
        assert!(!parse(&data).unwrap().is_broadcast());
    }

    #[test]
    fn test_sname_and_file_are_nul_terminated_text() {
        let mut data = request_bytes(&[]);
        data[44..49].copy_from_slice(b"relay");
        data[108..118].copy_from_slice(b"pxelinux.0");
        let packet = parse(&data).unwrap();

        assert_eq!(packet.sname, "relay");
        assert_eq!(packet.file, "pxelinux.0");

        let encoded = packet.encode();
        assert_eq!(&encoded[44..50], b"relay\0");
        assert_eq!(&encoded[108..119], b"pxelinux.0\0");
    }
}
