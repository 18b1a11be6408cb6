//! SCSP wire protocol implementation.
//!
//! Every frame starts with a one-byte tag followed by an ASCII decimal
//! length terminated by a space:
//!
//! ```text
//! +11 Hello World        string
//! :42                    integer (no length, value ends at the space)
//! -19 1:0 no such table  error (code:extended, then message)
//! *LEN 0:2 ROWS COLS ..  row set
//! /LEN IDX:2 ROWS COLS ..row-set chunk
//! %LEN CLEN ULEN ..      compressed frame
//! ```
//!
//! There are no record boundaries other than the declared lengths. The
//! session manager uses [`frame_len`] to cut the leading frame off its read
//! buffer before handing it to [`decoder::decode`]; whatever follows stays
//! buffered for the next frame.

pub mod compress;
pub mod decoder;
pub mod reader;
pub mod rowset;
pub mod writer;

pub use decoder::{Decoded, Directive, MAX_REDISPATCH_DEPTH, Response, decode, decode_array};
pub use reader::{FrameReader, Number, scan_number};
pub use rowset::{ColumnMeta, RowSet, RowsetContext};
pub use writer::{CommandPayload, build_command_frame};

/// Frame tags.
pub mod tag {
    pub const STRING: u8 = b'+';
    pub const ZEROSTRING: u8 = b'!';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const FLOAT: u8 = b',';
    pub const ROWSET: u8 = b'*';
    pub const ROWSET_CHUNK: u8 = b'/';
    pub const JSON: u8 = b'#';
    pub const NULL: u8 = b'_';
    pub const BLOB: u8 = b'$';
    pub const COMPRESSED: u8 = b'%';
    pub const COMMAND: u8 = b'^';
    pub const ARRAY: u8 = b'=';
    pub const PUBSUB: u8 = b'|';
    pub const RECONNECT: u8 = b'@';
}

/// Frame sent by the server after the last chunk of a chunked row set.
pub const ROWSET_CHUNK_END: &[u8] = b"/6 0 0 0 ";

/// Literal reply to commands that produce no value.
pub const OK_FRAME: &[u8] = b"+2 OK";

/// Check whether `buf` holds everything needed to decode its leading frame.
///
/// - `integer`, `float` and `null` frames carry no length; they are complete
///   once the buffer ends with a space.
/// - row-set chunk streams are complete when they end with
///   [`ROWSET_CHUNK_END`] or when the buffer is an exact sequence of complete
///   chunk frames. A compressed frame may likewise be followed by further
///   chunks or the end marker.
/// - everything else is complete when the declared length plus its header
///   equals the bytes received. `$` and `+` frames may declare zero length.
pub fn is_complete(buf: &[u8]) -> bool {
    let Some(&first) = buf.first() else {
        return false;
    };

    match first {
        tag::INTEGER | tag::FLOAT | tag::NULL => buf.last() == Some(&b' '),
        tag::ROWSET_CHUNK => buf.ends_with(ROWSET_CHUNK_END) || is_frame_sequence(buf),
        tag::COMPRESSED => is_frame_sequence(buf),
        _ => {
            let Some(number) = scan_number(buf, 1) else {
                return false;
            };
            if number.value == 0 && !matches!(first, tag::BLOB | tag::STRING) {
                return false;
            }
            declared_end(&number) == Some(buf.len())
        }
    }
}

/// Length of the frame at the start of `buf`, once all of it has arrived.
///
/// Returns `None` while the frame is still incomplete. Bytes past the
/// returned length belong to the frames that follow. A buffer led by an
/// unrecognized tag is taken whole.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    let &first = buf.first()?;
    match first {
        tag::INTEGER | tag::FLOAT | tag::NULL => {
            buf.iter().position(|&b| b == b' ').map(|space| space + 1)
        }
        tag::STRING
        | tag::ZEROSTRING
        | tag::ERROR
        | tag::ROWSET
        | tag::ROWSET_CHUNK
        | tag::JSON
        | tag::BLOB
        | tag::COMPRESSED
        | tag::COMMAND
        | tag::ARRAY
        | tag::PUBSUB
        | tag::RECONNECT => {
            let number = scan_number(buf, 1)?;
            declared_end(&number).filter(|end| *end <= buf.len())
        }
        _ => Some(buf.len()),
    }
}

/// True when `buf` splits exactly into one or more complete frames.
fn is_frame_sequence(buf: &[u8]) -> bool {
    let mut offset = 0;
    while offset < buf.len() {
        match frame_len(&buf[offset..]) {
            Some(len) if len > 0 => offset += len,
            _ => return false,
        }
    }
    offset == buf.len()
}

fn declared_end(number: &Number) -> Option<usize> {
    usize::try_from(number.value)
        .ok()
        .and_then(|len| number.next.checked_add(len))
}
