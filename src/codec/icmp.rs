//! Frame codec for the raw-echo (ICMP) tunnel.
//!
//! Payloads travel in the data field of ICMP echo request packets. The
//! identifier field carries the low 16 bits of the sending process id
//! so replies can be matched to this process, and the sequence number
//! increments per send, wrapping at the 16-bit boundary.
//!
//! Raw IPv4 sockets hand the receive path the full IP packet, so the
//! decoder first strips the variable-length IPv4 header before parsing
//! the echo frame.

use thiserror::Error;

/// Field sizes and offsets for echo frames.
pub mod sizes {
    /// Echo header: type, code, checksum, identifier, sequence.
    pub const ECHO_HEADER: usize = 8;
    /// Minimum IPv4 header length.
    pub const MIN_IPV4_HEADER: usize = 20;
}

/// ICMP type for echo request.
const ECHO_REQUEST: u8 = 8;
/// ICMP type for echo reply.
const ECHO_REPLY: u8 = 0;

/// Errors raised while framing or parsing echo packets.
#[derive(Debug, Error)]
pub enum EchoFrameError {
    /// Packet ended before the parser expected.
    #[error("packet truncated")]
    Truncated,

    /// Checksum over the received frame did not verify.
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame.
        expected: u16,
        /// Checksum carried by the frame.
        actual: u16,
    },

    /// The packet is neither an echo request nor an echo reply.
    #[error("unexpected icmp type {0}")]
    UnexpectedType(u8),

    /// The identifier does not belong to this process.
    #[error("identifier mismatch: expected {expected:#06x}, got {actual:#06x}")]
    IdentifierMismatch {
        /// Identifier of this process.
        expected: u16,
        /// Identifier carried by the frame.
        actual: u16,
    },
}

/// A decoded echo frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoFrame {
    /// ICMP type, echo request or echo reply.
    pub icmp_type: u8,
    /// Process identifier.
    pub identifier: u16,
    /// Per-send sequence number.
    pub sequence: u16,
    /// Tunneled payload bytes.
    pub payload: Vec<u8>,
}

impl EchoFrame {
    /// Build an echo request carrying `payload`.
    pub fn request(identifier: u16, sequence: u16, payload: &[u8]) -> Self {
        EchoFrame {
            icmp_type: ECHO_REQUEST,
            identifier,
            sequence,
            payload: payload.to_vec(),
        }
    }

    /// True for echo replies.
    pub fn is_reply(&self) -> bool {
        self.icmp_type == ECHO_REPLY
    }

    /// Serialize the frame with a freshly computed checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(sizes::ECHO_HEADER + self.payload.len());
        buf.push(self.icmp_type);
        buf.push(0); // code
        buf.extend_from_slice(&[0, 0]); // checksum placeholder
        buf.extend_from_slice(&self.identifier.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let checksum = internet_checksum(&buf);
        buf[2..4].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse a frame from a raw ICMP message, verifying the checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EchoFrameError> {
        if data.len() < sizes::ECHO_HEADER {
            return Err(EchoFrameError::Truncated);
        }

        let icmp_type = data[0];
        if icmp_type != ECHO_REQUEST && icmp_type != ECHO_REPLY {
            return Err(EchoFrameError::UnexpectedType(icmp_type));
        }

        let actual = u16::from_be_bytes([data[2], data[3]]);
        let mut zeroed = data.to_vec();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let expected = internet_checksum(&zeroed);
        if expected != actual {
            return Err(EchoFrameError::ChecksumMismatch { expected, actual });
        }

        Ok(EchoFrame {
            icmp_type,
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
            payload: data[sizes::ECHO_HEADER..].to_vec(),
        })
    }
}

/// Strip the IPv4 header from a raw socket read.
///
/// The header length comes from the IHL field; options extend it past
/// the 20-byte minimum.
pub fn strip_ipv4_header(packet: &[u8]) -> Result<&[u8], EchoFrameError> {
    if packet.len() < sizes::MIN_IPV4_HEADER {
        return Err(EchoFrameError::Truncated);
    }
    let header_len = ((packet[0] & 0x0F) as usize) * 4;
    if header_len < sizes::MIN_IPV4_HEADER || packet.len() < header_len {
        return Err(EchoFrameError::Truncated);
    }
    Ok(&packet[header_len..])
}

/// The identifier stamped on every frame this process sends.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xFFFF) as u16
}

/// Monotonic per-transport sequence counter, wrapping at 65536.
#[derive(Debug, Default)]
pub struct EchoSequence(u16);

impl EchoSequence {
    /// Start at zero.
    pub fn new() -> Self {
        EchoSequence(0)
    }

    /// Return the current value and advance, wrapping on overflow.
    pub fn next(&mut self) -> u16 {
        let current = self.0;
        self.0 = self.0.wrapping_add(1);
        current
    }
}

/// RFC 1071 internet checksum: one's-complement sum of 16-bit words.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut words = data.chunks_exact(2);
    for word in words.by_ref() {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = EchoFrame::request(0x1234, 7, b"covert payload");
        let bytes = frame.to_bytes();
        let parsed = EchoFrame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert!(!parsed.is_reply());
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let frame = EchoFrame::request(1, 0, b"");
        let parsed = EchoFrame::from_bytes(&frame.to_bytes()).unwrap();
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn test_odd_length_checksum() {
        // Odd payload exercises the trailing-byte checksum path.
        let frame = EchoFrame::request(2, 3, b"odd");
        assert!(EchoFrame::from_bytes(&frame.to_bytes()).is_ok());
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = EchoFrame::request(1, 1, b"payload").to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            EchoFrame::from_bytes(&bytes),
            Err(EchoFrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unexpected_type() {
        let mut bytes = EchoFrame::request(1, 1, b"x").to_bytes();
        bytes[0] = 3; // destination unreachable
        assert!(matches!(
            EchoFrame::from_bytes(&bytes),
            Err(EchoFrameError::UnexpectedType(3))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        assert!(matches!(
            EchoFrame::from_bytes(&[8, 0, 0]),
            Err(EchoFrameError::Truncated)
        ));
    }

    #[test]
    fn test_strip_ipv4_header_minimum() {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45; // version 4, IHL 5
        packet.extend_from_slice(b"icmp body");
        assert_eq!(strip_ipv4_header(&packet).unwrap(), b"icmp body");
    }

    #[test]
    fn test_strip_ipv4_header_with_options() {
        let mut packet = vec![0u8; 24];
        packet[0] = 0x46; // IHL 6: one option word
        packet.extend_from_slice(b"body");
        assert_eq!(strip_ipv4_header(&packet).unwrap(), b"body");
    }

    #[test]
    fn test_strip_ipv4_header_truncated() {
        assert!(strip_ipv4_header(&[0x45; 10]).is_err());
        let mut packet = vec![0u8; 20];
        packet[0] = 0x4F; // claims 60-byte header
        assert!(strip_ipv4_header(&packet).is_err());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut seq = EchoSequence(u16::MAX - 1);
        assert_eq!(seq.next(), u16::MAX - 1);
        assert_eq!(seq.next(), u16::MAX);
        assert_eq!(seq.next(), 0);
    }

    #[test]
    fn test_known_checksum() {
        // Worked example from RFC 1071 section 3.
        let data = [0x00u8, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
        assert_eq!(internet_checksum(&data), !0xDDF2);
    }
}
