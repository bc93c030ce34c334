//! JT/T808 message types: header, message, message ids, and APDU bodies.
//!
//! Header layout (big-endian):
//! ```text
//! [message_id:2][attribute:2][version:1][phone:10][sequence:2][total:2][index:2]?
//! ```
//! The trailing packet fields are present iff bit 13 of `attribute` is set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

// ── Message ids ───────────────────────────────────────────────────────────────

/// Message id constants.
pub mod ids {
    /// Generic terminal acknowledgement (terminal → platform).
    pub const TERMINAL_ACK: u16 = 0x0001;
    /// Heartbeat.
    pub const HEARTBEAT: u16 = 0x0002;
    /// Terminal unregistration.
    pub const UNREGISTER: u16 = 0x0003;
    /// Terminal registration.
    pub const REGISTER: u16 = 0x0100;
    /// Terminal login (authentication).
    pub const LOGIN: u16 = 0x0102;
    /// Location / GPS report.
    pub const GPS_INFO: u16 = 0x0200;
    /// Generic platform acknowledgement (platform → terminal).
    pub const PLATFORM_ACK: u16 = 0x8001;
    /// Registration acknowledgement.
    pub const REGISTER_ACK: u16 = 0x8100;
    /// Terminal control request.
    pub const CONTROL_REQUEST: u16 = 0x8105;
    /// Firmware update push (multi-packet).
    pub const FIRMWARE_UPDATE: u16 = 0x8108;
}

// ── Header constants ──────────────────────────────────────────────────────────

/// Length of the phone-number field.
pub const PHONE_LEN: usize = 10;

/// Header length without the multi-packet fields.
pub const BASE_HEADER_LEN: usize = 2 + 2 + 1 + PHONE_LEN + 2;

/// Length of the optional multi-packet fields.
pub const PACKET_INFO_LEN: usize = 4;

/// Largest body the 10-bit length field can describe.
pub const MAX_BODY_LEN: usize = 0x03FF;

/// Protocol version byte the platform writes into outbound headers.
pub const PLATFORM_PROTOCOL_VERSION: u8 = 1;

/// Result code: success.
pub const RESULT_OK: u8 = 0;

/// Result code: failure.
pub const RESULT_FAILED: u8 = 1;

const BODY_LEN_MASK: u16 = 0x03FF;
const ENCRYPTION_SHIFT: u16 = 10;
const ENCRYPTION_MASK: u16 = 0x0007;
const MULTI_PACKET_BIT: u16 = 1 << 13;
const VERSION_BIT: u16 = 1 << 14;

// ── Attribute word ────────────────────────────────────────────────────────────

/// Decoded form of the 16-bit attribute word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Bits 0–9.
    pub body_len: u16,
    /// Bits 10–12.
    pub encryption: u8,
    /// Bit 13.
    pub multi_packet: bool,
    /// Bit 14.
    pub versioned: bool,
}

impl Attribute {
    /// Splits a raw attribute word into its fields.
    pub fn from_bits(bits: u16) -> Self {
        Self {
            body_len: bits & BODY_LEN_MASK,
            encryption: ((bits >> ENCRYPTION_SHIFT) & ENCRYPTION_MASK) as u8,
            multi_packet: bits & MULTI_PACKET_BIT != 0,
            versioned: bits & VERSION_BIT != 0,
        }
    }

    /// Packs the fields back into a raw attribute word.
    ///
    /// `body_len` is masked to 10 bits and `encryption` to 3 bits.
    pub fn bits(&self) -> u16 {
        let mut bits = self.body_len & BODY_LEN_MASK;
        bits |= (u16::from(self.encryption) & ENCRYPTION_MASK) << ENCRYPTION_SHIFT;
        if self.multi_packet {
            bits |= MULTI_PACKET_BIT;
        }
        if self.versioned {
            bits |= VERSION_BIT;
        }
        bits
    }
}

// ── Phone number ──────────────────────────────────────────────────────────────

/// The 10-byte terminal identifier carried in every header.
///
/// Stored exactly as received; terminals send BCD digits left-padded with
/// zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PhoneNumber([u8; PHONE_LEN]);

impl PhoneNumber {
    /// Wraps raw header bytes.
    pub const fn from_bytes(bytes: [u8; PHONE_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses a BCD digit string, left-padding with zeros to 20 digits.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPhone`] when the string is longer than
    /// 20 characters or contains non-hex characters.
    pub fn from_digits(digits: &str) -> Result<Self, ProtocolError> {
        let digits = digits.trim();
        if digits.len() > PHONE_LEN * 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidPhone(digits.to_string()));
        }
        let padded = format!("{digits:0>20}");
        let mut bytes = [0u8; PHONE_LEN];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|_| ProtocolError::InvalidPhone(digits.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw bytes as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8; PHONE_LEN] {
        &self.0
    }

    /// Bytes with the leading zero padding removed.
    pub fn significant_bytes(&self) -> &[u8] {
        let first = self.0.iter().position(|&b| b != 0).unwrap_or(PHONE_LEN);
        &self.0[first..]
    }

    /// BCD digits of the significant bytes, e.g. `"017255111111"`.
    pub fn digits(&self) -> String {
        hex::encode(self.significant_bytes())
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits())
    }
}

// ── Header and message ────────────────────────────────────────────────────────

/// Segment coordinates of a multi-packet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    /// Total number of segments.
    pub total: u16,
    /// 1-based index of this segment.
    pub index: u16,
}

/// Message header.
///
/// The body length and the multi-packet bit are not stored: the encoder
/// derives them from the body and from [`Header::packet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub message_id: u16,
    /// Encryption mode (attribute bits 10–12).
    pub encryption: u8,
    /// Protocol-version flag (attribute bit 14).
    pub versioned: bool,
    pub protocol_version: u8,
    pub phone: PhoneNumber,
    pub sequence: u16,
    /// Present iff the message is one segment of a multi-packet message.
    pub packet: Option<PacketInfo>,
}

impl Header {
    /// A platform-originated header for `message_id` addressed to `phone`.
    pub fn platform(message_id: u16, phone: PhoneNumber, sequence: u16) -> Self {
        Self {
            message_id,
            encryption: 0,
            versioned: true,
            protocol_version: PLATFORM_PROTOCOL_VERSION,
            phone,
            sequence,
            packet: None,
        }
    }

    /// Attribute word for a body of `body_len` bytes.
    pub fn attribute(&self, body_len: usize) -> Attribute {
        Attribute {
            body_len: body_len as u16,
            encryption: self.encryption,
            multi_packet: self.packet.is_some(),
            versioned: self.versioned,
        }
    }
}

/// A header plus its opaque APDU body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Message {
    /// Platform reply to `phone`, echoing the terminal's `sequence`.
    pub fn platform(message_id: u16, phone: PhoneNumber, sequence: u16, body: Vec<u8>) -> Self {
        Self {
            header: Header::platform(message_id, phone, sequence),
            body,
        }
    }

    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }
}

// ── Inbound APDUs ─────────────────────────────────────────────────────────────

/// Generic terminal acknowledgement body (`0x0001`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalAck {
    /// Sequence number of the platform message being acknowledged.
    pub reply_sequence: u16,
    /// Message id of the platform message being acknowledged.
    pub reply_id: u16,
    pub result: u8,
}

/// Login body (`0x0102`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub auth_key: String,
    pub imei: String,
    /// Firmware version with trailing zero bytes stripped.
    pub firmware_version: String,
}

/// GPS report body (`0x0200`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationReport {
    pub warn_flags: u32,
    pub state_flags: u32,
    pub latitude: u32,
    pub longitude: u32,
    pub altitude: u16,
    pub speed: u16,
    pub heading: u16,
}

impl LocationReport {
    /// State bit 0.
    pub fn ignition_on(&self) -> bool {
        self.state_flags & 0x0000_0001 != 0
    }

    /// State bit 1.
    pub fn gps_valid(&self) -> bool {
        self.state_flags & 0x0000_0002 != 0
    }
}

/// Inbound APDU, selected by message id.
///
/// Ids the platform does not handle land in [`Apdu::Unrecognized`]; that is
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Apdu {
    TerminalAck(TerminalAck),
    Register,
    Login(LoginRequest),
    Heartbeat,
    Location(LocationReport),
    Unrecognized(u16),
}

impl Apdu {
    /// Interprets `message.body` according to its message id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedApdu`] when the body is too short for
    /// the fields its message id requires.
    pub fn parse(message: &Message) -> Result<Self, ProtocolError> {
        let body = message.body.as_slice();
        match message.message_id() {
            ids::TERMINAL_ACK => {
                require_len(body, 5, "TerminalAck")?;
                Ok(Apdu::TerminalAck(TerminalAck {
                    reply_sequence: read_u16(body, 0),
                    reply_id: read_u16(body, 2),
                    result: body[4],
                }))
            }
            ids::REGISTER => Ok(Apdu::Register),
            ids::LOGIN => parse_login(body).map(Apdu::Login),
            ids::HEARTBEAT => Ok(Apdu::Heartbeat),
            ids::GPS_INFO => parse_location(body).map(Apdu::Location),
            other => Ok(Apdu::Unrecognized(other)),
        }
    }
}

fn parse_login(p: &[u8]) -> Result<LoginRequest, ProtocolError> {
    // 1 (key len) + key + 15 (imei) + 20 (version)
    require_len(p, 1, "Login")?;
    let key_len = p[0] as usize;
    let imei_off = 1 + key_len;
    let version_off = imei_off + 15;
    require_len(p, version_off + 20, "Login")?;

    let auth_key = String::from_utf8_lossy(&p[1..imei_off]).into_owned();
    let imei = String::from_utf8_lossy(&p[imei_off..version_off]).into_owned();
    let version = &p[version_off..version_off + 20];
    let version_end = version.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let firmware_version = String::from_utf8_lossy(&version[..version_end]).into_owned();

    Ok(LoginRequest {
        auth_key,
        imei,
        firmware_version,
    })
}

fn parse_location(p: &[u8]) -> Result<LocationReport, ProtocolError> {
    // 4 * 4 + 3 * 2 = 22
    require_len(p, 22, "Location")?;
    Ok(LocationReport {
        warn_flags: read_u32(p, 0),
        state_flags: read_u32(p, 4),
        latitude: read_u32(p, 8),
        longitude: read_u32(p, 12),
        altitude: read_u16(p, 16),
        speed: read_u16(p, 18),
        heading: read_u16(p, 20),
    })
}

// ── Outbound APDUs ────────────────────────────────────────────────────────────

/// Generic platform acknowledgement body (`0x8001`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAck {
    pub reply_sequence: u16,
    pub reply_id: u16,
    pub result: u8,
}

impl PlatformAck {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.extend_from_slice(&self.reply_sequence.to_be_bytes());
        buf.extend_from_slice(&self.reply_id.to_be_bytes());
        buf.push(self.result);
        buf
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedApdu`] for bodies shorter than 5 bytes.
    pub fn decode(p: &[u8]) -> Result<Self, ProtocolError> {
        require_len(p, 5, "PlatformAck")?;
        Ok(Self {
            reply_sequence: read_u16(p, 0),
            reply_id: read_u16(p, 2),
            result: p[4],
        })
    }
}

/// Registration acknowledgement body (`0x8100`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub reply_sequence: u16,
    pub result: u8,
    pub auth_key: String,
}

impl RegisterAck {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.auth_key.len());
        buf.extend_from_slice(&self.reply_sequence.to_be_bytes());
        buf.push(self.result);
        buf.extend_from_slice(self.auth_key.as_bytes());
        buf
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedApdu`] for bodies shorter than 3 bytes.
    pub fn decode(p: &[u8]) -> Result<Self, ProtocolError> {
        require_len(p, 3, "RegisterAck")?;
        Ok(Self {
            reply_sequence: read_u16(p, 0),
            result: p[2],
            auth_key: String::from_utf8_lossy(&p[3..]).into_owned(),
        })
    }
}

/// Terminal control request body (`0x8105`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: u8,
    pub param: String,
}

impl ControlRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.param.len());
        buf.push(self.command);
        buf.extend_from_slice(self.param.as_bytes());
        buf
    }
}

/// Control preamble at the head of firmware segment 1 (`0x8108`).
///
/// ```text
/// [kind:1=0][reserved:5][version_len:1][version:N][payload_len:4]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePreamble {
    pub version: String,
    pub payload_len: u32,
}

impl UpdatePreamble {
    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + 5 + 1 + self.version_bytes().len() + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let version = self.version_bytes();
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(0);
        buf.extend_from_slice(&[0u8; 5]);
        buf.push(version.len() as u8);
        buf.extend_from_slice(version);
        buf.extend_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedApdu`] when `p` is shorter than the
    /// preamble it announces.
    pub fn decode(p: &[u8]) -> Result<Self, ProtocolError> {
        require_len(p, 7, "UpdatePreamble")?;
        let version_len = p[6] as usize;
        require_len(p, 7 + version_len + 4, "UpdatePreamble")?;
        Ok(Self {
            version: String::from_utf8_lossy(&p[7..7 + version_len]).into_owned(),
            payload_len: read_u32(p, 7 + version_len),
        })
    }

    // The length prefix is one byte.
    fn version_bytes(&self) -> &[u8] {
        let bytes = self.version.as_bytes();
        &bytes[..bytes.len().min(u8::MAX as usize)]
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedApdu(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn message(message_id: u16, body: Vec<u8>) -> Message {
        Message {
            header: Header {
                message_id,
                encryption: 0,
                versioned: false,
                protocol_version: 1,
                phone: PhoneNumber::default(),
                sequence: 7,
                packet: None,
            },
            body,
        }
    }

    fn login_body(key: &str, imei: &str, version: &str) -> Vec<u8> {
        let mut body = vec![key.len() as u8];
        body.extend_from_slice(key.as_bytes());
        body.extend_from_slice(imei.as_bytes());
        let mut ver = version.as_bytes().to_vec();
        ver.resize(20, 0);
        body.extend_from_slice(&ver);
        body
    }

    #[test]
    fn test_attribute_bit_layout() {
        let attr = Attribute::from_bits(0x63FF);
        assert_eq!(attr.body_len, 0x3FF);
        assert!(attr.multi_packet);
        assert!(attr.versioned);
        assert_eq!(attr.encryption, 0);

        let attr = Attribute::from_bits(0x0C05);
        assert_eq!(attr.body_len, 5);
        assert_eq!(attr.encryption, 0b011);
        assert!(!attr.multi_packet);
    }

    #[test]
    fn test_attribute_bits_round_trip() {
        let attr = Attribute {
            body_len: 300,
            encryption: 1,
            multi_packet: true,
            versioned: false,
        };
        assert_eq!(Attribute::from_bits(attr.bits()), attr);
    }

    #[test]
    fn test_attribute_masks_oversized_body_len() {
        let attr = Attribute {
            body_len: 0x0400 | 0x0005,
            encryption: 0,
            multi_packet: false,
            versioned: false,
        };
        assert_eq!(attr.bits(), 0x0005);
    }

    #[test]
    fn test_phone_from_digits_left_pads() {
        let phone = PhoneNumber::from_digits("17255111111").unwrap();
        assert_eq!(
            phone.as_bytes(),
            &[0x00, 0x00, 0x00, 0x00, 0x01, 0x72, 0x55, 0x11, 0x11, 0x11]
        );
        assert_eq!(phone.significant_bytes().len(), 6);
        assert_eq!(phone.digits(), "017255111111");
    }

    #[test]
    fn test_phone_from_digits_rejects_garbage() {
        assert!(PhoneNumber::from_digits("12ab-x").is_err());
        assert!(PhoneNumber::from_digits(&"1".repeat(21)).is_err());
    }

    #[test]
    fn test_parse_login() {
        let msg = message(ids::LOGIN, login_body("AB", "123456789012345", "1.0"));

        let apdu = Apdu::parse(&msg).unwrap();

        assert_eq!(
            apdu,
            Apdu::Login(LoginRequest {
                auth_key: "AB".to_string(),
                imei: "123456789012345".to_string(),
                firmware_version: "1.0".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_login_with_full_width_version() {
        let msg = message(ids::LOGIN, login_body("", "123456789012345", "V2.3.4-build-0000001"));
        let Apdu::Login(login) = Apdu::parse(&msg).unwrap() else {
            panic!("expected login");
        };
        assert_eq!(login.firmware_version, "V2.3.4-build-0000001");
        assert!(login.auth_key.is_empty());
    }

    #[test]
    fn test_parse_login_truncated_is_malformed() {
        let mut body = login_body("KEY", "123456789012345", "1.0");
        body.truncate(body.len() - 1);
        let msg = message(ids::LOGIN, body);
        assert!(matches!(Apdu::parse(&msg), Err(ProtocolError::MalformedApdu(_))));
    }

    #[test]
    fn test_parse_location_and_state_bits() {
        let mut body = Vec::new();
        body.extend_from_slice(&0x0000_0010u32.to_be_bytes());
        body.extend_from_slice(&0x0000_0003u32.to_be_bytes());
        body.extend_from_slice(&31_230_000u32.to_be_bytes());
        body.extend_from_slice(&121_470_000u32.to_be_bytes());
        body.extend_from_slice(&15u16.to_be_bytes());
        body.extend_from_slice(&600u16.to_be_bytes());
        body.extend_from_slice(&270u16.to_be_bytes());

        let Apdu::Location(report) = Apdu::parse(&message(ids::GPS_INFO, body)).unwrap() else {
            panic!("expected location");
        };

        assert_eq!(report.warn_flags, 0x10);
        assert_eq!(report.latitude, 31_230_000);
        assert_eq!(report.longitude, 121_470_000);
        assert_eq!(report.altitude, 15);
        assert_eq!(report.speed, 600);
        assert_eq!(report.heading, 270);
        assert!(report.ignition_on());
        assert!(report.gps_valid());
    }

    #[test]
    fn test_parse_terminal_ack() {
        let body = vec![0x00, 0x09, 0x81, 0x08, 0x00];
        let apdu = Apdu::parse(&message(ids::TERMINAL_ACK, body)).unwrap();
        assert_eq!(
            apdu,
            Apdu::TerminalAck(TerminalAck {
                reply_sequence: 9,
                reply_id: ids::FIRMWARE_UPDATE,
                result: 0,
            })
        );
    }

    #[test]
    fn test_unknown_id_is_unrecognized_not_error() {
        let apdu = Apdu::parse(&message(0x0704, vec![1, 2, 3])).unwrap();
        assert_eq!(apdu, Apdu::Unrecognized(0x0704));
    }

    #[test]
    fn test_platform_ack_layout() {
        let ack = PlatformAck {
            reply_sequence: 0x1234,
            reply_id: ids::LOGIN,
            result: RESULT_OK,
        };
        assert_eq!(ack.encode(), vec![0x12, 0x34, 0x01, 0x02, 0x00]);
        assert_eq!(PlatformAck::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn test_register_ack_layout() {
        let ack = RegisterAck {
            reply_sequence: 3,
            result: RESULT_OK,
            auth_key: "KEY1".to_string(),
        };
        assert_eq!(ack.encode(), vec![0x00, 0x03, 0x00, b'K', b'E', b'Y', b'1']);
    }

    #[test]
    fn test_update_preamble_layout() {
        let preamble = UpdatePreamble {
            version: "v1.0.0".to_string(),
            payload_len: 2000,
        };
        let bytes = preamble.encode();
        assert_eq!(bytes.len(), 17);
        assert_eq!(preamble.encoded_len(), 17);
        assert_eq!(&bytes[..7], &[0, 0, 0, 0, 0, 0, 6]);
        assert_eq!(&bytes[13..], &2000u32.to_be_bytes());
        assert_eq!(UpdatePreamble::decode(&bytes).unwrap(), preamble);
    }

    #[test]
    fn test_control_request_layout() {
        let req = ControlRequest {
            command: 4,
            param: "reset".to_string(),
        };
        assert_eq!(req.encode(), b"\x04reset".to_vec());
    }
}
