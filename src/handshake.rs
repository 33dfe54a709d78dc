//! # TLS ClientHello Parser
//!
//! Byte-exact validation of a single TLS record carrying a ClientHello, and
//! extraction of the SNI (`server_name`) extension. The parser is pure: it
//! takes the bytes read in one shot from a freshly accepted client socket
//! and either yields a [`ClientHello`] or a [`ParseError`] — it never
//! performs I/O itself, which keeps it trivially unit-testable against byte
//! fixtures.
//!
//! Every length is checked to exactly fill the declared record, rather
//! than merely fitting within the remaining buffer, and any violation
//! rejects the whole ClientHello rather than returning a partial match —
//! a proxy that forwards the client's bytes verbatim after dialing
//! cannot afford a parser that guesses.

const RECORD_HEADER_LEN: usize = 43;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const LEGACY_VERSION: [u8; 2] = [0x03, 0x01];
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_TYPE_SERVER_NAME: u16 = 0x0000;
const SERVER_NAME_TYPE_HOST_NAME: u8 = 0x00;

/// A successfully parsed ClientHello.
#[derive(Debug, Clone)]
pub struct ClientHello {
    /// `legacy_version` echoed from the record header, for the alert
    /// emitter to mirror back on a later failure in the same session.
    pub legacy_version: [u8; 2],
    /// The `server_name` extension's host name, if present. Absence is not
    /// itself a parse failure — a ClientHello with no SNI at all still
    /// dispatches, just to the `"default"` backend.
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed ClientHello")]
pub struct Malformed;

type Result<T> = std::result::Result<T, Malformed>;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Malformed);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_be(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a length-prefixed vector whose length field is `len_bytes`
    /// wide and returns its body, requiring the declared length to fit
    /// within what remains.
    fn length_prefixed(&mut self, len_bytes: usize) -> Result<&'a [u8]> {
        let len = match len_bytes {
            1 => self.u8()? as usize,
            2 => self.u16_be()? as usize,
            _ => unreachable!("length_prefixed only used with 1 or 2 byte lengths"),
        };
        self.take(len)
    }
}

/// Best-effort extraction of the record header's `legacy_version` for the
/// alert emitter to echo even when [`parse_client_hello`] rejects the rest
/// of the record — falling back to the record's own default when there
/// aren't even 3 bytes to read it from.
pub fn peek_legacy_version(buf: &[u8]) -> [u8; 2] {
    if buf.len() >= 3 {
        [buf[1], buf[2]]
    } else {
        LEGACY_VERSION
    }
}

/// Parses a single contiguous byte block read from the client immediately
/// after accept: content type, legacy version, and handshake type must
/// match a TLS 1.0-framed ClientHello exactly, and the record/handshake
/// length fields must exactly account for every byte in `buf` — no
/// trailing garbage, no short reads accepted as a parse failure instead of
/// "need more bytes".
pub fn parse_client_hello(buf: &[u8]) -> Result<ClientHello> {
    let l = buf.len();
    if l <= RECORD_HEADER_LEN {
        return Err(Malformed);
    }

    let mut c = Cursor { buf, pos: 0 };

    let content_type = c.u8()?;
    let legacy_version = [c.u8()?, c.u8()?];
    let record_len = c.u16_be()?;
    let handshake_type = c.u8()?;
    let handshake_len = {
        let b = c.take(3)?;
        ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
    };
    let _client_version = c.take(2)?;
    let _random = c.take(32)?;

    if content_type != CONTENT_TYPE_HANDSHAKE
        || legacy_version != LEGACY_VERSION
        || handshake_type != HANDSHAKE_TYPE_CLIENT_HELLO
    {
        return Err(Malformed);
    }
    if record_len as usize != l - 5 || handshake_len as usize != l - 5 - 4 {
        return Err(Malformed);
    }

    let _session_id = c.length_prefixed(1)?;
    let _cipher_suites = c.length_prefixed(2)?;
    let _compression_methods = c.length_prefixed(1)?;

    let extensions = c.length_prefixed(2)?;
    let server_name = parse_extensions(extensions)?;

    // The record and handshake bodies must exactly fill the packet; any
    // trailing bytes after the declared extensions block is a violation of
    // the "record/handshake bodies exactly fill the packet" rule.
    if c.remaining() != 0 {
        return Err(Malformed);
    }

    Ok(ClientHello { legacy_version, server_name })
}

fn parse_extensions(buf: &[u8]) -> Result<Option<String>> {
    let mut c = Cursor { buf, pos: 0 };
    let mut server_name = None;

    while c.remaining() > 0 {
        let ext_type = c.u16_be()?;
        let body = c.length_prefixed(2)?;

        if ext_type == EXTENSION_TYPE_SERVER_NAME {
            server_name = Some(parse_server_name_extension(body)?);
        }
    }

    Ok(server_name)
}

fn parse_server_name_extension(body: &[u8]) -> Result<String> {
    let body_len = body.len();
    if body_len < 5 {
        return Err(Malformed);
    }

    let mut c = Cursor { buf: body, pos: 0 };
    let server_name_list_length = c.u16_be()? as usize;
    if server_name_list_length != body_len - 2 {
        return Err(Malformed);
    }

    let name_type = c.u8()?;
    if name_type != SERVER_NAME_TYPE_HOST_NAME {
        return Err(Malformed);
    }

    let host_name_length = c.u16_be()? as usize;
    if host_name_length != body_len - 5 {
        return Err(Malformed);
    }

    let host_name = c.take(host_name_length)?;
    std::str::from_utf8(host_name)
        .map(str::to_owned)
        .map_err(|_| Malformed)
}
