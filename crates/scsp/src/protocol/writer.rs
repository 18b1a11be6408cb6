//! SCSP command framing.
//!
//! Outbound commands are a single length-prefixed frame: `+LEN text` for
//! command strings, `$LEN bytes` for raw binary payloads.

use crate::protocol::tag;

/// Payload of one outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPayload<'a> {
    /// SQL or administrative command text
    Text(&'a str),
    /// Raw bytes (file transfer chunks, blob uploads)
    Blob(&'a [u8]),
}

impl<'a> CommandPayload<'a> {
    /// Tag byte announcing this payload kind.
    pub fn delimiter(&self) -> u8 {
        match self {
            CommandPayload::Text(_) => tag::STRING,
            CommandPayload::Blob(_) => tag::BLOB,
        }
    }

    /// Payload bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            CommandPayload::Text(text) => text.as_bytes(),
            CommandPayload::Blob(bytes) => bytes,
        }
    }

    /// Frame header `<delimiter><byte-length> `.
    pub fn header(&self) -> Vec<u8> {
        let len = self.as_bytes().len().to_string();
        let mut header = Vec::with_capacity(len.len() + 2);
        header.push(self.delimiter());
        header.extend_from_slice(len.as_bytes());
        header.push(b' ');
        header
    }
}

/// Build a complete command frame (header followed by payload).
pub fn build_command_frame(payload: CommandPayload<'_>) -> Vec<u8> {
    let body = payload.as_bytes();
    let mut frame = payload.header();
    frame.reserve(body.len());
    frame.extend_from_slice(body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::scan_number;

    #[test]
    fn test_text_frame() {
        let frame = build_command_frame(CommandPayload::Text("SELECT 1;"));
        assert_eq!(frame, b"+9 SELECT 1;");
    }

    #[test]
    fn test_blob_frame() {
        let frame = build_command_frame(CommandPayload::Blob(&[0x00, 0xFF]));
        assert_eq!(frame, b"$2 \x00\xFF");
    }

    #[test]
    fn test_empty_payload_is_header_only() {
        let payload = CommandPayload::Blob(&[]);
        assert_eq!(payload.header(), b"$0 ");
        assert_eq!(build_command_frame(payload), b"$0 ");
    }

    #[test]
    fn test_declared_length_scans_back() {
        let command = "USE DATABASE chinook.sqlite;".repeat(40);
        let frame = build_command_frame(CommandPayload::Text(&command));
        let number = scan_number(&frame, 1).unwrap();
        assert_eq!(number.value as usize, command.len());
        assert_eq!(&frame[number.next..], command.as_bytes());
    }

    #[test]
    fn test_multibyte_text_length_is_in_bytes() {
        let frame = build_command_frame(CommandPayload::Text("é"));
        assert_eq!(frame, "+2 é".as_bytes());
    }
}
