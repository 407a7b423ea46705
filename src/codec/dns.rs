//! Wire codec for the name-query (DNS) tunnel.
//!
//! A logical payload is base64-encoded, split into fragments of at most
//! `max_data_size` characters, and shipped as one query per fragment.
//! Each query's question name carries a sequence marker label beneath
//! the tunnel domain, and the fragment itself rides in a TXT record in
//! the additional section:
//!
//! ```text
//! question:   c<index>of<total>.<domain>   TXT IN
//! additional: c<index>of<total>.<domain>   TXT IN 0  "<base64 fragment>"
//! ```
//!
//! The receive path polls `response.<domain>` with a plain TXT query,
//! concatenates every TXT character-string of the answer in response
//! order, and base64-decodes the result. Reassembly across multiple
//! responses is not supported: one response must carry the whole
//! payload.
//!
//! Message framing is implemented here directly; the layer deliberately
//! avoids a resolver library so the queries on the wire are exactly the
//! bytes this module produces.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Size limits from RFC 1035.
pub mod sizes {
    /// Fixed DNS message header size.
    pub const HEADER_SIZE: usize = 12;
    /// Maximum length of a single name label.
    pub const MAX_LABEL: usize = 63;
    /// Maximum encoded length of a full name.
    pub const MAX_NAME: usize = 255;
    /// Maximum length of one TXT character-string.
    pub const MAX_TXT_STRING: usize = 255;
}

/// QR bit: message is a response.
const FLAG_QR: u16 = 0x8000;
/// RD bit: recursion desired.
const FLAG_RD: u16 = 0x0100;
/// Internet class.
const CLASS_IN: u16 = 1;

/// Record types usable for tunnel queries.
///
/// TXT is the default and the only type the receive path can decode;
/// CNAME and NULL are accepted for the outbound question so operators
/// can blend with different resolver profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// TXT record (type 16).
    Txt,
    /// CNAME record (type 5).
    Cname,
    /// NULL record (type 10).
    Null,
}

impl RecordKind {
    /// The on-wire record type value.
    pub fn as_u16(self) -> u16 {
        match self {
            RecordKind::Txt => 16,
            RecordKind::Cname => 5,
            RecordKind::Null => 10,
        }
    }
}

/// One fragment of an encoded payload.
///
/// Chunks are created per send, consumed, and discarded; none survives
/// past the send that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based fragment index.
    pub index: u32,
    /// Total number of fragments for this payload.
    pub total: u32,
    /// The base64 fragment, at most `max_data_size` characters.
    pub data: String,
}

impl Chunk {
    /// The sequence marker label placed beneath the tunnel domain.
    pub fn label(&self) -> String {
        format!("c{}of{}", self.index, self.total)
    }
}

/// Errors raised while framing or parsing tunnel messages.
#[derive(Debug, Error)]
pub enum DnsWireError {
    /// Message ended before the parser expected.
    #[error("message truncated")]
    Truncated,

    /// A name label exceeds 63 bytes.
    #[error("label too long: {0} bytes (max 63)")]
    LabelTooLong(usize),

    /// The encoded name exceeds 255 bytes.
    #[error("name too long: {0} bytes (max 255)")]
    NameTooLong(usize),

    /// The response id does not match the query id.
    #[error("id mismatch: expected {expected:#06x}, got {actual:#06x}")]
    IdMismatch {
        /// Id sent with the query.
        expected: u16,
        /// Id carried by the response.
        actual: u16,
    },

    /// The QR bit is clear: this is a query, not a response.
    #[error("not a response")]
    NotAResponse,

    /// The resolver returned a non-zero response code.
    #[error("server returned rcode {0}")]
    Rcode(u8),

    /// The response carried no TXT strings to reassemble.
    #[error("response carried no TXT records")]
    NoTxtRecords,

    /// The reassembled text is not valid base64.
    #[error("payload decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The fragment limit is zero.
    #[error("max_data_size must be non-zero")]
    ZeroChunkSize,
}

/// Split a payload into labeled base64 fragments.
///
/// Chunk count equals `ceil(base64_len / max_data_size)`; an empty
/// payload yields no chunks.
pub fn encode_chunks(payload: &[u8], max_data_size: usize) -> Result<Vec<Chunk>, DnsWireError> {
    if max_data_size == 0 {
        return Err(DnsWireError::ZeroChunkSize);
    }

    let encoded = BASE64.encode(payload);
    if encoded.is_empty() {
        return Ok(Vec::new());
    }

    // Base64 output is ASCII, so byte chunking never splits a char.
    let fragments: Vec<&[u8]> = encoded.as_bytes().chunks(max_data_size).collect();
    let total = fragments.len() as u32;

    Ok(fragments
        .into_iter()
        .enumerate()
        .map(|(index, frag)| Chunk {
            index: index as u32,
            total,
            data: String::from_utf8_lossy(frag).into_owned(),
        })
        .collect())
}

/// Reassemble a payload from TXT strings, in response order.
pub fn reassemble(fragments: &[String]) -> Result<Vec<u8>, DnsWireError> {
    if fragments.is_empty() {
        return Err(DnsWireError::NoTxtRecords);
    }
    let joined: String = fragments.concat();
    Ok(BASE64.decode(joined.as_bytes())?)
}

/// Build the query carrying one chunk.
///
/// The question asks for `c<index>of<total>.<domain>` with the
/// configured record type; the chunk data rides in the additional
/// section as a TXT record so the controller can lift it without a
/// second round trip.
pub fn encode_chunk_query(
    id: u16,
    chunk: &Chunk,
    domain: &str,
    kind: RecordKind,
) -> Result<Vec<u8>, DnsWireError> {
    let name = format!("{}.{}", chunk.label(), domain);

    let mut buf = Vec::with_capacity(sizes::HEADER_SIZE + name.len() + chunk.data.len() + 32);
    write_header(&mut buf, id, FLAG_RD, 1, 0, 0, 1);

    // Question section.
    write_name(&mut buf, &name)?;
    buf.extend_from_slice(&kind.as_u16().to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());

    // Additional section: the fragment as a TXT record, TTL 0.
    write_name(&mut buf, &name)?;
    buf.extend_from_slice(&RecordKind::Txt.as_u16().to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes());

    let rdata = encode_txt_rdata(chunk.data.as_bytes());
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(&rdata);

    Ok(buf)
}

/// Build the plain TXT query used to poll `response.<domain>`.
pub fn encode_poll_query(id: u16, domain: &str) -> Result<Vec<u8>, DnsWireError> {
    let name = format!("{}.{}", crate::core::constants::RESPONSE_LABEL, domain);

    let mut buf = Vec::with_capacity(sizes::HEADER_SIZE + name.len() + 8);
    write_header(&mut buf, id, FLAG_RD, 1, 0, 0, 0);
    write_name(&mut buf, &name)?;
    buf.extend_from_slice(&RecordKind::Txt.as_u16().to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());

    Ok(buf)
}

/// A parsed response, reduced to what the tunnel needs.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    /// Message id.
    pub id: u16,
    /// TXT character-strings from the answer section, in order.
    pub txt_strings: Vec<String>,
}

/// Parse a response message, checking id, QR bit, and response code.
///
/// TXT strings are collected from the answer section in the order they
/// appear; all other record types are skipped.
pub fn parse_response(packet: &[u8], expected_id: u16) -> Result<DnsResponse, DnsWireError> {
    if packet.len() < sizes::HEADER_SIZE {
        return Err(DnsWireError::Truncated);
    }

    let id = read_u16(packet, 0)?;
    if id != expected_id {
        return Err(DnsWireError::IdMismatch {
            expected: expected_id,
            actual: id,
        });
    }

    let flags = read_u16(packet, 2)?;
    if flags & FLAG_QR == 0 {
        return Err(DnsWireError::NotAResponse);
    }
    let rcode = (flags & 0x000F) as u8;
    if rcode != 0 {
        return Err(DnsWireError::Rcode(rcode));
    }

    let qdcount = read_u16(packet, 4)?;
    let ancount = read_u16(packet, 6)?;

    let mut pos = sizes::HEADER_SIZE;
    for _ in 0..qdcount {
        pos = skip_name(packet, pos)?;
        pos = checked_advance(packet, pos, 4)?; // qtype + qclass
    }

    let mut txt_strings = Vec::new();
    for _ in 0..ancount {
        pos = skip_name(packet, pos)?;
        let rtype = read_u16(packet, pos)?;
        pos = checked_advance(packet, pos, 8)?; // type + class + ttl
        let rdlen = read_u16(packet, pos)? as usize;
        pos = checked_advance(packet, pos, 2)?;
        if packet.len() < pos + rdlen {
            return Err(DnsWireError::Truncated);
        }
        if rtype == RecordKind::Txt.as_u16() {
            parse_txt_rdata(&packet[pos..pos + rdlen], &mut txt_strings)?;
        }
        pos += rdlen;
    }

    Ok(DnsResponse { id, txt_strings })
}

/// Write the fixed 12-byte message header.
fn write_header(buf: &mut Vec<u8>, id: u16, flags: u16, qd: u16, an: u16, ns: u16, ar: u16) {
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&qd.to_be_bytes());
    buf.extend_from_slice(&an.to_be_bytes());
    buf.extend_from_slice(&ns.to_be_bytes());
    buf.extend_from_slice(&ar.to_be_bytes());
}

/// Encode a dotted name as length-prefixed labels plus the root label.
fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<(), DnsWireError> {
    let mut written = 0usize;
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        if label.len() > sizes::MAX_LABEL {
            return Err(DnsWireError::LabelTooLong(label.len()));
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
        written += 1 + label.len();
    }
    buf.push(0);
    written += 1;

    if written > sizes::MAX_NAME {
        return Err(DnsWireError::NameTooLong(written));
    }
    Ok(())
}

/// Encode TXT RDATA, splitting at the 255-byte character-string limit.
fn encode_txt_rdata(data: &[u8]) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(data.len() + data.len() / sizes::MAX_TXT_STRING + 1);
    if data.is_empty() {
        rdata.push(0);
        return rdata;
    }
    for piece in data.chunks(sizes::MAX_TXT_STRING) {
        rdata.push(piece.len() as u8);
        rdata.extend_from_slice(piece);
    }
    rdata
}

/// Append every character-string in a TXT RDATA blob, in order.
fn parse_txt_rdata(rdata: &[u8], out: &mut Vec<String>) -> Result<(), DnsWireError> {
    let mut pos = 0usize;
    while pos < rdata.len() {
        let len = rdata[pos] as usize;
        pos += 1;
        if rdata.len() < pos + len {
            return Err(DnsWireError::Truncated);
        }
        out.push(String::from_utf8_lossy(&rdata[pos..pos + len]).into_owned());
        pos += len;
    }
    Ok(())
}

/// Skip over an encoded name, handling compression pointers.
///
/// A pointer (top two bits set) terminates the name; the target is
/// never followed because the tunnel only needs record boundaries,
/// not the names themselves.
fn skip_name(packet: &[u8], mut pos: usize) -> Result<usize, DnsWireError> {
    loop {
        let len = *packet.get(pos).ok_or(DnsWireError::Truncated)? as usize;
        if len & 0xC0 == 0xC0 {
            return checked_advance(packet, pos, 2);
        }
        if len == 0 {
            return Ok(pos + 1);
        }
        pos = checked_advance(packet, pos, 1 + len)?;
    }
}

fn read_u16(packet: &[u8], pos: usize) -> Result<u16, DnsWireError> {
    if packet.len() < pos + 2 {
        return Err(DnsWireError::Truncated);
    }
    Ok(u16::from_be_bytes([packet[pos], packet[pos + 1]]))
}

fn checked_advance(packet: &[u8], pos: usize, by: usize) -> Result<usize, DnsWireError> {
    let next = pos + by;
    if next > packet.len() {
        return Err(DnsWireError::Truncated);
    }
    Ok(next)
}
