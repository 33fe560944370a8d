//! Git pkt-line framing and side-band-64k multiplexing.
//!
//! Every wire message is a sequence of packets: a 4-char lowercase hex
//! length prefix covering header plus payload, or one of the payload-less
//! specials `0000` (flush), `0001` (delim), `0002` (response-end).

use crate::{GitError, Result};

/// Maximum total packet size (header + payload).
pub const MAX_PKT_LEN: usize = 65_520;

/// Maximum payload of a data packet.
pub const MAX_PAYLOAD: usize = MAX_PKT_LEN - 4;

/// Maximum payload carried inside one side-band data packet (one byte goes
/// to the channel tag).
pub const MAX_SIDEBAND_PAYLOAD: usize = MAX_PAYLOAD - 1;

/// Side-band channel carrying pack data.
pub const BAND_DATA: u8 = 1;
/// Side-band channel carrying progress messages.
pub const BAND_PROGRESS: u8 = 2;
/// Side-band channel carrying a fatal error message.
pub const BAND_ERROR: u8 = 3;

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Flush packet (`0000`).
    Flush,
    /// Delimiter packet (`0001`).
    Delim,
    /// Response-end packet (`0002`).
    ResponseEnd,
    /// Data packet.
    Data(Vec<u8>),
    /// Data packet whose payload began with `ERR `.
    Error(String),
}

impl Packet {
    /// Returns the payload of a data packet.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the payload as text with a trailing newline trimmed.
    pub fn as_text(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }
}

/// Encodes one data packet.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(GitError::PayloadTooLarge(payload.len()));
    }
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    Ok(out)
}

/// The literal flush token.
pub fn encode_flush() -> [u8; 4] {
    *b"0000"
}

/// The literal delim token.
pub fn encode_delim() -> [u8; 4] {
    *b"0001"
}

/// The literal response-end token.
pub fn encode_response_end() -> [u8; 4] {
    *b"0002"
}

/// Decodes one packet from the front of `buf`.
///
/// Returns the packet and the number of bytes consumed (4 for specials,
/// the full hex length otherwise).
pub fn decode(buf: &[u8]) -> Result<(Packet, usize)> {
    if buf.len() < 4 {
        return Err(GitError::ShortBuffer {
            need: 4,
            have: buf.len(),
        });
    }
    let header = &buf[..4];
    match header {
        b"0000" => return Ok((Packet::Flush, 4)),
        b"0001" => return Ok((Packet::Delim, 4)),
        b"0002" => return Ok((Packet::ResponseEnd, 4)),
        _ => {}
    }

    let header_str = std::str::from_utf8(header)
        .map_err(|_| GitError::BadLength(format!("{:?}", header)))?;
    let len = usize::from_str_radix(header_str, 16)
        .map_err(|_| GitError::BadLength(header_str.to_string()))?;
    if !(4..=MAX_PKT_LEN).contains(&len) {
        return Err(GitError::BadLength(header_str.to_string()));
    }
    if buf.len() < len {
        return Err(GitError::ShortBuffer {
            need: len,
            have: buf.len(),
        });
    }

    let payload = &buf[4..len];
    if let Some(msg) = payload.strip_prefix(b"ERR ") {
        return Ok((
            Packet::Error(String::from_utf8_lossy(msg).trim_end().to_string()),
            len,
        ));
    }
    Ok((Packet::Data(payload.to_vec()), len))
}

/// Streaming reader over a byte buffer.
pub struct PktReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PktReader<'a> {
    /// Creates a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reads the next packet, or `None` at end of input.
    pub fn next(&mut self) -> Result<Option<Packet>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let (pkt, used) = decode(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(Some(pkt))
    }

    /// Bytes remaining after the packets read so far.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Buffered pkt-line writer used to assemble wire responses.
#[derive(Debug, Default)]
pub struct PktWriter {
    out: Vec<u8>,
}

impl PktWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one data packet.
    pub fn data(&mut self, payload: &[u8]) -> Result<()> {
        let encoded = encode(payload)?;
        self.out.extend_from_slice(&encoded);
        Ok(())
    }

    /// Appends a textual line, adding a trailing newline if missing.
    pub fn line(&mut self, text: &str) -> Result<()> {
        if text.ends_with('\n') {
            self.data(text.as_bytes())
        } else {
            let mut payload = text.as_bytes().to_vec();
            payload.push(b'\n');
            self.data(&payload)
        }
    }

    /// Appends a flush packet.
    pub fn flush(&mut self) {
        self.out.extend_from_slice(&encode_flush());
    }

    /// Appends a delim packet.
    pub fn delim(&mut self) {
        self.out.extend_from_slice(&encode_delim());
    }

    /// Appends a response-end packet.
    pub fn response_end(&mut self) {
        self.out.extend_from_slice(&encode_response_end());
    }

    /// Appends one side-band packet on `channel`.
    pub fn band(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_SIDEBAND_PAYLOAD {
            return Err(GitError::PayloadTooLarge(payload.len() + 1));
        }
        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.push(channel);
        framed.extend_from_slice(payload);
        self.data(&framed)
    }

    /// Streams `payload` over the data channel, chunked at the side-band
    /// maximum.
    pub fn band_stream(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        for chunk in payload.chunks(MAX_SIDEBAND_PAYLOAD) {
            self.band(channel, chunk)?;
        }
        Ok(())
    }

    /// Consumes the writer and returns the assembled bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_lines() {
        assert_eq!(encode(b"hello\n").unwrap(), b"000ahello\n");
        assert_eq!(&encode_flush(), b"0000");
        assert_eq!(&encode_delim(), b"0001");
        assert_eq!(&encode_response_end(), b"0002");
    }

    #[test]
    fn decode_roundtrip() {
        let encoded = encode(b"want abc\n").unwrap();
        let (pkt, used) = decode(&encoded).unwrap();
        assert_eq!(pkt, Packet::Data(b"want abc\n".to_vec()));
        assert_eq!(used, encoded.len());
    }

    #[test]
    fn decode_specials() {
        assert_eq!(decode(b"0000rest").unwrap(), (Packet::Flush, 4));
        assert_eq!(decode(b"0001").unwrap(), (Packet::Delim, 4));
        assert_eq!(decode(b"0002").unwrap(), (Packet::ResponseEnd, 4));
    }

    #[test]
    fn decode_err_payload() {
        let encoded = encode(b"ERR access denied\n").unwrap();
        let (pkt, _) = decode(&encoded).unwrap();
        assert_eq!(pkt, Packet::Error("access denied".to_string()));
    }

    #[test]
    fn payload_at_limit_roundtrips() {
        let payload = vec![b'x'; MAX_PAYLOAD];
        let encoded = encode(&payload).unwrap();
        assert_eq!(encoded.len(), MAX_PKT_LEN);
        let (pkt, used) = decode(&encoded).unwrap();
        assert_eq!(used, MAX_PKT_LEN);
        assert_eq!(pkt.data().unwrap().len(), MAX_PAYLOAD);
    }

    #[test]
    fn payload_over_limit_is_rejected() {
        let payload = vec![b'x'; MAX_PAYLOAD + 1];
        assert!(matches!(
            encode(&payload),
            Err(GitError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn bad_length_header() {
        assert!(matches!(
            decode(b"zzzz"),
            Err(GitError::BadLength(_))
        ));
        // 0003 is below the minimum data length of 4.
        assert!(matches!(
            decode(b"0003"),
            Err(GitError::BadLength(_))
        ));
    }

    #[test]
    fn short_buffer() {
        assert!(matches!(
            decode(b"00"),
            Err(GitError::ShortBuffer { need: 4, have: 2 })
        ));
        // Header says 10 bytes but only 6 present.
        assert!(matches!(
            decode(b"000ahe"),
            Err(GitError::ShortBuffer { need: 10, have: 6 })
        ));
    }

    #[test]
    fn reader_walks_packets_and_exposes_rest() {
        let mut writer = PktWriter::new();
        writer.line("one").unwrap();
        writer.line("two").unwrap();
        writer.flush();
        let mut buf = writer.into_bytes();
        buf.extend_from_slice(b"PACKDATA");

        let mut reader = PktReader::new(&buf);
        assert_eq!(reader.next().unwrap().unwrap().as_text(), Some("one"));
        assert_eq!(reader.next().unwrap().unwrap().as_text(), Some("two"));
        assert_eq!(reader.next().unwrap().unwrap(), Packet::Flush);
        assert_eq!(reader.rest(), b"PACKDATA");
    }

    #[test]
    fn band_stream_chunks_at_sideband_limit() {
        let payload = vec![0u8; MAX_SIDEBAND_PAYLOAD + 1];
        let mut writer = PktWriter::new();
        writer.band_stream(BAND_DATA, &payload).unwrap();
        let buf = writer.into_bytes();

        let mut reader = PktReader::new(&buf);
        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.data().unwrap().len(), MAX_SIDEBAND_PAYLOAD + 1);
        assert_eq!(first.data().unwrap()[0], BAND_DATA);
        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.data().unwrap(), &[BAND_DATA, 0]);
        assert!(reader.next().unwrap().is_none());
    }
}
