//! Frame decoding.
//!
//! [`decode`] dispatches on the leading tag of a complete buffer and yields
//! one of three outcomes:
//!
//! - a terminal [`Response`],
//! - [`Decoded::Pending`] when a row-set chunk was absorbed and more chunks
//!   are expected,
//! - a [`Directive`] the session manager must act on (run a follow-up
//!   command, open the pub/sub transport, reconnect).
//!
//! Error frames fail the call with [`Error::Server`].

use scsp_core::Value;
use scsp_core::error::{Error, ProtocolError, ProtocolErrorKind, Result, ServerError};

use crate::protocol::compress;
use crate::protocol::reader::decode_value;
use crate::protocol::rowset::{self, RowSet, RowsetContext};
use crate::protocol::{FrameReader, OK_FRAME, scan_number, tag};

/// Maximum nesting of compressed frames and server-driven follow-up
/// commands.
pub const MAX_REDISPATCH_DEPTH: usize = 8;

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Literal `OK`
    Ok,
    /// NULL reply or unrecognized frame
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Blob(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    RowSet(RowSet),
}

impl Response {
    /// Check if this is the literal `OK` reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok)
    }

    /// Check if this is a NULL reply.
    pub fn is_null(&self) -> bool {
        matches!(self, Response::Null)
    }

    pub fn as_rowset(&self) -> Option<&RowSet> {
        match self {
            Response::RowSet(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn into_rowset(self) -> Option<RowSet> {
        match self {
            Response::RowSet(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Response::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Response::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Response::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert a scalar reply into a [`Value`].
    ///
    /// Returns `None` for `OK`, arrays and row sets.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Response::Null => Some(Value::Null),
            Response::Integer(v) => Some(Value::Integer(v)),
            Response::Float(v) => Some(Value::Float(v)),
            Response::String(s) => Some(Value::Text(s)),
            Response::Blob(b) => Some(Value::Blob(b)),
            Response::Json(j) => Some(Value::Json(j)),
            Response::Ok | Response::Array(_) | Response::RowSet(_) => None,
        }
    }
}

/// Server-driven instruction carried by a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `^`: run the body as a new command on the same connection
    Command(Vec<u8>),
    /// `|`: open the pub/sub transport and send the body on it
    PubSub(Vec<u8>),
    /// `@`: reconnect, body optionally carries `<host> <port>`
    Reconnect(Vec<u8>),
}

/// Outcome of decoding one complete buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Response(Response),
    /// A row-set chunk was absorbed; keep reading
    Pending,
    Directive(Directive),
}

/// Decode a complete buffer.
///
/// Several chunk frames may be concatenated in one buffer; they are fed to
/// the assembler in order. On failure the in-flight row set is dropped.
pub fn decode(buf: &[u8], ctx: &mut RowsetContext) -> Result<Decoded> {
    match decode_all(buf, ctx, 0) {
        Ok(decoded) => Ok(decoded),
        Err(e) => {
            ctx.clear();
            Err(e)
        }
    }
}

fn decode_all(buf: &[u8], ctx: &mut RowsetContext, depth: usize) -> Result<Decoded> {
    if depth > MAX_REDISPATCH_DEPTH {
        return Err(Error::Protocol(ProtocolError::new(
            ProtocolErrorKind::RecursionLimit,
            format!("frame nesting exceeds {} levels", MAX_REDISPATCH_DEPTH),
        )));
    }

    let mut offset = 0;
    loop {
        let (decoded, used) = decode_frame(&buf[offset..], ctx, depth)?;
        offset += used;
        if matches!(decoded, Decoded::Pending) && used > 0 && offset < buf.len() {
            continue;
        }
        if offset < buf.len() && !matches!(decoded, Decoded::Pending) {
            tracing::trace!(
                trailing = buf.len() - offset,
                "ignoring bytes after a terminal frame"
            );
        }
        return Ok(decoded);
    }
}

/// Decode the frame at the start of `buf`, returning the outcome and the
/// number of bytes it occupied.
fn decode_frame(buf: &[u8], ctx: &mut RowsetContext, depth: usize) -> Result<(Decoded, usize)> {
    let &first = buf
        .first()
        .ok_or_else(|| Error::malformed("empty frame"))?;
    tracing::trace!(tag = %char::from(first), len = buf.len(), "decoding frame");

    match first {
        tag::INTEGER => {
            let (value, size) = scalar(buf)?;
            let response = match value {
                Value::Integer(v) => Response::Integer(v),
                Value::Float(v) => Response::Float(v),
                Value::Text(s) if s.is_empty() => Response::Integer(0),
                other => return Err(bad_numeral("integer", &other)),
            };
            Ok((Decoded::Response(response), size))
        }
        tag::FLOAT => {
            let (value, size) = scalar(buf)?;
            let response = match value {
                Value::Float(v) => Response::Float(v),
                Value::Text(s) if s.is_empty() => Response::Float(0.0),
                other => return Err(bad_numeral("float", &other)),
            };
            Ok((Decoded::Response(response), size))
        }
        tag::NULL => Ok((Decoded::Response(Response::Null), 2.min(buf.len()))),
        tag::ROWSET | tag::ROWSET_CHUNK => {
            let (assembled, used) = rowset::assemble(buf, ctx)?;
            let decoded = match assembled {
                Some(rs) => Decoded::Response(Response::RowSet(rs)),
                None => Decoded::Pending,
            };
            Ok((decoded, used))
        }
        tag::COMPRESSED => {
            let frame_end = frame_bounds(buf)?.1;
            let inflated = compress::decompress(buf)?;
            tracing::trace!(
                compressed = frame_end,
                inflated = inflated.len(),
                "decompressed frame"
            );
            let decoded = decode_all(&inflated, ctx, depth + 1)?;
            Ok((decoded, frame_end))
        }
        tag::ERROR => {
            let (body_start, frame_end) = frame_bounds(buf)?;
            Err(Error::Server(parse_error_body(&buf[body_start..frame_end])))
        }
        tag::STRING
        | tag::ZEROSTRING
        | tag::BLOB
        | tag::JSON
        | tag::ARRAY
        | tag::COMMAND
        | tag::PUBSUB
        | tag::RECONNECT => {
            let (body_start, frame_end) = frame_bounds(buf)?;
            let body = &buf[body_start..frame_end];
            Ok((decode_body(first, &buf[..frame_end], body)?, frame_end))
        }
        other => {
            tracing::warn!(
                tag = %char::from(other),
                len = buf.len(),
                "unrecognized frame tag, decoding as NULL"
            );
            Ok((Decoded::Response(Response::Null), buf.len()))
        }
    }
}

fn decode_body(first: u8, frame: &[u8], body: &[u8]) -> Result<Decoded> {
    let response = match first {
        tag::COMMAND => return Ok(Decoded::Directive(Directive::Command(body.to_vec()))),
        tag::PUBSUB => return Ok(Decoded::Directive(Directive::PubSub(body.to_vec()))),
        tag::RECONNECT => return Ok(Decoded::Directive(Directive::Reconnect(body.to_vec()))),
        _ if frame == OK_FRAME => Response::Ok,
        tag::STRING | tag::ZEROSTRING | tag::BLOB if body.is_empty() => {
            Response::String(String::new())
        }
        tag::STRING => Response::String(String::from_utf8_lossy(body).into_owned()),
        tag::ZEROSTRING => {
            let text = &body[..body.len() - 1];
            Response::String(String::from_utf8_lossy(text).into_owned())
        }
        tag::BLOB => Response::Blob(body.to_vec()),
        tag::JSON => {
            let json = serde_json::from_slice(body).map_err(|e| {
                let mut err = ProtocolError::new(
                    ProtocolErrorKind::Malformed,
                    format!("invalid JSON payload: {}", e),
                );
                err.raw_data = Some(body.to_vec());
                err.source = Some(Box::new(e));
                Error::Protocol(err)
            })?;
            Response::Json(json)
        }
        _ => {
            let values = decode_array(body)
                .ok_or_else(|| Error::malformed("array frame ends before its declared items"))?;
            Response::Array(values)
        }
    };
    Ok(Decoded::Response(response))
}

/// Decode `N items` where the count is scanned from index 0.
///
/// Non-digit bytes before the count contribute nothing, so a full
/// `=N items` buffer decodes the same way as the body of an array frame.
pub fn decode_array(buf: &[u8]) -> Option<Vec<Value>> {
    let mut reader = FrameReader::new(buf, 0);
    let count = usize::try_from(reader.read_number()?.value).ok()?;
    let mut values = Vec::new();
    reader.read_values(count, &mut values)?;
    Some(values)
}

/// Parse `CODE:EXT[:OFFSET] message`.
///
/// A body without a code field is reported with code 0 and the whole body
/// as the message.
pub fn parse_error_body(body: &[u8]) -> ServerError {
    let Some(space) = body.iter().position(|&b| b == b' ') else {
        return ServerError::new(0, 0, String::from_utf8_lossy(body));
    };
    let mut codes = body[..space].split(|&b| b == b':').map(parse_code);
    let code = codes.next().unwrap_or(0);
    let extended_code = codes.next().unwrap_or(0);
    let message = String::from_utf8_lossy(&body[space + 1..]).into_owned();
    ServerError::new(code, extended_code, message)
}

fn parse_code(field: &[u8]) -> u32 {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Body start and frame end of a length-prefixed frame.
fn frame_bounds(buf: &[u8]) -> Result<(usize, usize)> {
    let number =
        scan_number(buf, 1).ok_or_else(|| Error::malformed("frame is missing its length field"))?;
    let end = usize::try_from(number.value)
        .ok()
        .and_then(|len| number.next.checked_add(len))
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            Error::malformed(format!(
                "frame declares {} bytes but only {} are available",
                number.value,
                buf.len().saturating_sub(number.next)
            ))
        })?;
    Ok((number.next, end))
}

fn scalar(buf: &[u8]) -> Result<(Value, usize)> {
    decode_value(buf, 0).ok_or_else(|| Error::malformed("numeric frame is not terminated"))
}

fn bad_numeral(kind: &str, value: &Value) -> Error {
    Error::malformed(format!("invalid {} frame: {:?}", kind, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scsp_core::ErrorCategory;

    use crate::protocol::ROWSET_CHUNK_END;

    fn decode_one(buf: &[u8]) -> Result<Decoded> {
        decode(buf, &mut RowsetContext::new())
    }

    fn response(buf: &[u8]) -> Response {
        match decode_one(buf).unwrap() {
            Decoded::Response(r) => r,
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[test]
    fn test_ok_and_strings() {
        assert_eq!(response(b"+2 OK"), Response::Ok);
        assert_eq!(
            response(b"+11 Hello World"),
            Response::String("Hello World".to_string())
        );
        assert_eq!(response(b"!6 Hello\0"), Response::String("Hello".to_string()));
        assert_eq!(response(b"+2 ok"), Response::String("ok".to_string()));
    }

    #[test]
    fn test_zero_length_frames_are_empty_strings() {
        assert_eq!(response(b"+0 "), Response::String(String::new()));
        assert_eq!(response(b"$0 "), Response::String(String::new()));
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_scalars() {
        assert_eq!(response(b":123 "), Response::Integer(123));
        assert_eq!(response(b":-7 "), Response::Integer(-7));
        assert_eq!(response(b": "), Response::Integer(0));
        assert_eq!(response(b",3.1415 "), Response::Float(3.1415));
        assert_eq!(response(b"_ "), Response::Null);
        assert_eq!(response(b"$3 \x01\x02\x03"), Response::Blob(vec![1, 2, 3]));
        assert!(decode_one(b":abc ").is_err());
    }

    #[test]
    fn test_json() {
        let body = r#"{"a":[1,2]}"#;
        let r = response(format!("#{} {}", body.len(), body).as_bytes());
        assert_eq!(r, Response::Json(serde_json::json!({"a": [1, 2]})));
        assert!(decode_one(b"#3 {x}").is_err());
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_array_scenario() {
        let values = decode_array(b"=5 +11 Hello World:123456 ,3.1415 _ $10 0123456789").unwrap();
        assert_eq!(
            values,
            vec![
                Value::Text("Hello World".to_string()),
                Value::Integer(123_456),
                Value::Float(3.1415),
                Value::Null,
                Value::Blob(b"0123456789".to_vec()),
            ]
        );
    }

    #[test]
    fn test_array_frame() {
        let body = "2 +1 a:5 ";
        let frame = format!("={} {}", body.len(), body);
        assert_eq!(
            response(frame.as_bytes()),
            Response::Array(vec![Value::Text("a".to_string()), Value::Integer(5)])
        );
    }

    #[test]
    fn test_error_frame_is_server_error() {
        let body = "1:0 no such column: x";
        let frame = format!("-{} {}", body.len(), body);
        let err = decode_one(frame.as_bytes()).unwrap_err();
        match err {
            Error::Server(ref e) => {
                assert_eq!(e.code, 1);
                assert_eq!(e.extended_code, 0);
                assert_eq!(e.message, "no such column: x");
                assert_eq!(e.category(), ErrorCategory::Operational);
            }
            other => panic!("expected a server error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_body_variants() {
        let e = parse_error_body(b"19:2067:-1 UNIQUE constraint failed");
        assert_eq!((e.code, e.extended_code), (19, 2067));
        assert_eq!(e.message, "UNIQUE constraint failed");
        assert_eq!(e.category(), ErrorCategory::Integrity);

        let e = parse_error_body(b"garbled");
        assert_eq!((e.code, e.extended_code), (0, 0));
        assert_eq!(e.message, "garbled");
    }

    #[test]
    fn test_directives() {
        assert_eq!(
            decode_one(b"^8 SELECT 1").unwrap(),
            Decoded::Directive(Directive::Command(b"SELECT 1".to_vec()))
        );
        assert_eq!(
            decode_one(b"|9 PAUTH 1 2").unwrap(),
            Decoded::Directive(Directive::PubSub(b"PAUTH 1 2".to_vec()))
        );
        assert_eq!(
            decode_one(b"@14 localhost 8860").unwrap(),
            Decoded::Directive(Directive::Reconnect(b"localhost 8860".to_vec()))
        );
    }

    #[test]
    fn test_unknown_tag_decodes_as_null() {
        assert_eq!(response(b"?5 hello"), Response::Null);
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let err = decode_one(b"+11 Hello").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::Malformed,
                ..
            })
        ));
    }

    #[test]
    fn test_concatenated_chunks_then_sentinel() {
        let mut ctx = RowsetContext::new();
        let first = "1:1 1 1 +1 n:1 ";
        let second = "2:1 2 1 :2 :3 ";
        let buf = format!("/{} {}/{} {}", first.len(), first, second.len(), second);

        assert_eq!(decode(buf.as_bytes(), &mut ctx).unwrap(), Decoded::Pending);
        let Decoded::Response(Response::RowSet(rs)) = decode(ROWSET_CHUNK_END, &mut ctx).unwrap()
        else {
            panic!("expected a row set");
        };
        assert_eq!(rs.nrows(), 3);
        assert_eq!(rs.data().len(), rs.nrows() * rs.ncols());
    }

    #[test]
    fn test_chunks_and_sentinel_in_one_buffer() {
        let mut ctx = RowsetContext::new();
        let first = "1:1 1 1 +1 n:9 ";
        let mut buf = format!("/{} {}", first.len(), first).into_bytes();
        buf.extend_from_slice(ROWSET_CHUNK_END);
        let r = match decode(&buf, &mut ctx).unwrap() {
            Decoded::Response(r) => r,
            other => panic!("expected a response, got {:?}", other),
        };
        assert_eq!(r.as_rowset().unwrap().value(0, 0), Some(&Value::Integer(9)));
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_failure_clears_in_flight_rowset() {
        let mut ctx = RowsetContext::new();
        let first = "1:1 1 1 +1 n:1 ";
        decode(format!("/{} {}", first.len(), first).as_bytes(), &mut ctx).unwrap();
        assert!(ctx.is_active());
        assert!(decode(b"+11 Hello", &mut ctx).is_err());
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_compressed_frame_is_redispatched() {
        let inner = b"+26 abcdefghijklmnopqrstuvwxyz";
        let compressed = lz4_flex::block::compress(inner);
        let sizes = format!("{} {} ", compressed.len(), inner.len());
        let mut frame = format!("%{} {}", sizes.len() + compressed.len(), sizes).into_bytes();
        frame.extend_from_slice(&compressed);

        assert_eq!(
            response(&frame),
            Response::String("abcdefghijklmnopqrstuvwxyz".to_string())
        );
    }

    #[test]
    fn test_compressed_rowset_keeps_cleartext_header() {
        let cells = b":1 :2 :3 ";
        let compressed = lz4_flex::block::compress(cells);
        let header_body = "0:1 3 1 +1 n".to_string();
        let header = format!("*{} {}", header_body.len() + cells.len(), header_body);
        let sizes = format!("{} {} ", compressed.len(), cells.len());
        let total = sizes.len() + header.len() + compressed.len();
        let mut frame = format!("%{} {}{}", total, sizes, header).into_bytes();
        frame.extend_from_slice(&compressed);

        let rs = response(&frame).into_rowset().unwrap();
        assert_eq!(rs.nrows(), 3);
        assert_eq!(rs.column_name(0), Some("n"));
        assert_eq!(rs.value(2, 0), Some(&Value::Integer(3)));
    }

    fn wrap_compressed(inner: &[u8]) -> Vec<u8> {
        let compressed = lz4_flex::block::compress(inner);
        let sizes = format!("{} {} ", compressed.len(), inner.len());
        let mut frame = format!("%{} {}", sizes.len() + compressed.len(), sizes).into_bytes();
        frame.extend_from_slice(&compressed);
        frame
    }

    #[test]
    fn test_compressed_nesting_is_bounded() {
        let mut frame = b"+2 hi".to_vec();
        for _ in 0..MAX_REDISPATCH_DEPTH {
            frame = wrap_compressed(&frame);
        }
        assert_eq!(response(&frame), Response::String("hi".to_string()));

        let mut ctx = RowsetContext::new();
        let err = decode(&wrap_compressed(&frame), &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError {
                kind: ProtocolErrorKind::RecursionLimit,
                ..
            })
        ));
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_response_conversions() {
        assert_eq!(Response::Integer(4).into_value(), Some(Value::Integer(4)));
        assert_eq!(Response::Null.into_value(), Some(Value::Null));
        assert_eq!(Response::Ok.into_value(), None);
        assert!(Response::Ok.is_ok());
        assert_eq!(Response::String("x".into()).as_str(), Some("x"));
    }
}
