//! # RESP2 Wire Protocol
//!
//! Encode and parse RESP2 frames. The request side parses pipelined arrays
//! of bulk strings out of a growing `BytesMut` buffer (as the donor's
//! `hkv-server::server::handle_connection` loop does); the response side
//! parses the small set of reply types a client needs to read back.
//!
//! ## Design Principles
//! 1. **Binary-Safe**: bulk strings are raw bytes, never assumed UTF-8.
//! 2. **Buffer Reuse**: the request parser consumes from the caller's buffer
//!    in place and leaves any unconsumed trailing bytes for the next read.
//! 3. **Fail Fast**: malformed framing returns a protocol error immediately.

use bytes::{Buf, Bytes, BytesMut};

/// A single RESP2 value, either a reply from the server or a reply the
/// client is decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK\r\n` style simple strings.
    Simple(Bytes),
    /// `-ERR message\r\n` style errors.
    Error(Bytes),
    /// `:123\r\n` integers.
    Integer(i64),
    /// `$len\r\n...\r\n` bulk strings, `None` for the null bulk (`$-1\r\n`).
    Bulk(Option<Bytes>),
    /// `*len\r\n...` arrays, `None` for the null array (`*-1\r\n`).
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn simple(s: impl Into<Bytes>) -> Self {
        RespValue::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(Bytes::from(s.into()))
    }

    pub fn bulk(b: impl Into<Bytes>) -> Self {
        RespValue::Bulk(Some(b.into()))
    }

    pub fn nil() -> Self {
        RespValue::Bulk(None)
    }

    pub fn nil_array() -> Self {
        RespValue::Array(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Encodes this value into `out`, appending RESP2 framing bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Bulk(Some(data)) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Convenience: encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Errors surfaced while parsing RESP frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    /// Framing was malformed (bad length, missing CRLF, wrong lead byte).
    Protocol,
}

/// Incremental parser for pipelined RESP2 command arrays.
///
/// The connection handler feeds bytes into a shared `BytesMut`; `parse`
/// consumes as many complete commands as are available and leaves a partial
/// trailing command in the buffer for the next read, mirroring the donor's
/// `hkv-server::protocol::RespParser`.
#[derive(Debug, Default)]
pub struct RespParser {
    _private: (),
}

impl RespParser {
    pub fn new() -> Self {
        RespParser { _private: () }
    }

    /// Attempts to parse one complete command (array of bulk strings) from
    /// the front of `buf`. Returns `Ok(None)` when more bytes are needed.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut cursor = Cursor::new(buf);
        match cursor.parse_command() {
            Ok(Some(args)) => {
                let consumed = cursor.pos;
                buf.advance(consumed);
                Ok(Some(args))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

struct Cursor<'a> {
    buf: &'a BytesMut,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a BytesMut) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn find_crlf(&self) -> Option<usize> {
        let data = self.remaining();
        data.windows(2).position(|w| w == b"\r\n")
    }

    fn take_line(&mut self) -> Result<Option<&'a [u8]>, RespError> {
        match self.find_crlf() {
            Some(idx) => {
                let start = self.pos;
                let line = &self.buf[start..start + idx];
                self.pos += idx + 2;
                Ok(Some(line))
            }
            None => Ok(None),
        }
    }

    fn parse_command(&mut self) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let header = match self.take_line()? {
            Some(line) => line,
            None => return Ok(None),
        };
        if header.is_empty() || header[0] != b'*' {
            return Err(RespError::Protocol);
        }
        let count = parse_i64(&header[1..])?;
        if count < 0 {
            return Ok(Some(Vec::new()));
        }
        let count = count as usize;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            match self.parse_bulk()? {
                Some(arg) => args.push(arg),
                None => return Ok(None),
            }
        }
        Ok(Some(args))
    }

    fn parse_bulk(&mut self) -> Result<Option<Vec<u8>>, RespError> {
        let header = match self.take_line()? {
            Some(line) => line,
            None => return Ok(None),
        };
        if header.is_empty() || header[0] != b'$' {
            return Err(RespError::Protocol);
        }
        let len = parse_i64(&header[1..])?;
        if len < 0 {
            return Ok(Some(Vec::new()));
        }
        let len = len as usize;
        if self.remaining().len() < len + 2 {
            // Not enough bytes yet; rewind to before the header so the next
            // read re-parses this command from scratch.
            return Ok(None);
        }
        let start = self.pos;
        let data = self.buf[start..start + len].to_vec();
        self.pos += len;
        let crlf = &self.buf[self.pos..self.pos + 2];
        if crlf != b"\r\n" {
            return Err(RespError::Protocol);
        }
        self.pos += 2;
        Ok(Some(data))
    }
}

fn parse_i64(data: &[u8]) -> Result<i64, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let (negative, digits) = if data[0] == b'-' {
        (true, &data[1..])
    } else {
        (false, data)
    };
    if digits.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or(RespError::Protocol)?;
    }
    Ok(if negative { -value } else { value })
}

/// Encodes a RESP2 command (array of bulk strings) for a request.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_pipelined_command() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n"[..]);
        let mut parser = RespParser::new();
        let args = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"foo".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn returns_none_on_partial_command() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfo"[..]);
        let mut parser = RespParser::new();
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn parses_two_pipelined_commands_leaving_the_second() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n"[..]);
        let mut parser = RespParser::new();
        let first = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(first, vec![b"PING".to_vec()]);
        let second = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(second, vec![b"PING".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_bad_framing() {
        let mut buf = BytesMut::from(&b"garbage\r\n"[..]);
        let mut parser = RespParser::new();
        assert_eq!(parser.parse(&mut buf), Err(RespError::Protocol));
    }

    #[test]
    fn encodes_reply_variants() {
        assert_eq!(RespValue::simple("OK").to_bytes(), b"+OK\r\n");
        assert_eq!(RespValue::Integer(42).to_bytes(), b":42\r\n");
        assert_eq!(RespValue::nil().to_bytes(), b"$-1\r\n");
        assert_eq!(RespValue::bulk(&b"hi"[..]).to_bytes(), b"$2\r\nhi\r\n");
        assert_eq!(
            RespValue::array(vec![RespValue::Integer(1), RespValue::Integer(2)]).to_bytes(),
            b"*2\r\n:1\r\n:2\r\n"
        );
    }
}
