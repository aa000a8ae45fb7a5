//! Chat record encoding/decoding.
//!
//! A record body is a fixed header followed by NUL-terminated UTF-16LE
//! text fields, so the decoder routes purely on the command value:
//!
//! ```text
//! offset  size      field
//! 0       8         timestamp (u64 LE)
//! 8       4         command   (u32 LE)
//! 12      2*(n+1)   from      (UTF-16LE, NUL-terminated)
//!         2*(n+1)   pm_to     (only for Private)
//!         2*(n+1)   msg       (only for payload-bearing commands)
//! ```

use thiserror::Error;

use super::unix_timestamp;

const COMMAND_OFFSET: usize = 8;
const TEXT_OFFSET: usize = 12;
/// Header plus one code unit and its terminator.
const MIN_RECORD_LEN: usize = TEXT_OFFSET + 2 * 2;

/// Sender name used for server-originated notices.
pub const SERVER_NAME: &str = "Server";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("record too short: {got} bytes")]
    Truncated { got: usize },
    #[error("unknown command value {0}")]
    UnknownCommand(u32),
    #[error("record does not end with a NUL terminator")]
    MissingTerminator,
    #[error("record is missing a required field")]
    MissingField,
    #[error("sender name is empty")]
    EmptyFrom,
    #[error("private message recipient is empty")]
    EmptyRecipient,
    #[error("message payload is empty")]
    EmptyPayload,
    #[error("text field is not valid UTF-16")]
    InvalidUtf16,
}

/// Wire command set. Value 0 is the invalid sentinel on the wire and is
/// never produced; a record carrying it fails to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Broadcast = 1,
    Private = 2,
    ChangeName = 3,
    ListUsers = 4,
    Connect = 5,
    ServerMsg = 6,
    /// Rendered locally by the client, never transmitted.
    Help = 7,
}

impl ChatCommand {
    pub const fn wire_value(self) -> u32 {
        self as u32
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(ChatCommand::Broadcast),
            2 => Some(ChatCommand::Private),
            3 => Some(ChatCommand::ChangeName),
            4 => Some(ChatCommand::ListUsers),
            5 => Some(ChatCommand::Connect),
            6 => Some(ChatCommand::ServerMsg),
            7 => Some(ChatCommand::Help),
            _ => None,
        }
    }

    /// Slash keyword typed at the client, e.g. `/pm`.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "/pm" => Some(ChatCommand::Private),
            "/setname" => Some(ChatCommand::ChangeName),
            "/listusers" => Some(ChatCommand::ListUsers),
            "/help" => Some(ChatCommand::Help),
            _ => None,
        }
    }

    /// Connect and ListUsers carry no payload text.
    pub fn takes_payload(self) -> bool {
        !matches!(self, ChatCommand::Connect | ChatCommand::ListUsers)
    }
}

/// One chat record, the unit exchanged over the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub timestamp: u64,
    pub command: ChatCommand,
    pub from: String,
    pub pm_to: String,
    pub msg: String,
}

impl ChatMessage {
    pub fn new(command: ChatCommand, from: impl Into<String>) -> Self {
        Self {
            timestamp: unix_timestamp(),
            command,
            from: from.into(),
            pm_to: String::new(),
            msg: String::new(),
        }
    }

    /// A server-originated notice addressed at clients.
    pub fn server_notice(msg: impl Into<String>) -> Self {
        let mut record = Self::new(ChatCommand::ServerMsg, SERVER_NAME);
        record.msg = msg.into();
        record
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_pm_to(mut self, pm_to: impl Into<String>) -> Self {
        self.pm_to = pm_to.into();
        self
    }

    /// Serialize to a record body. Rejects records that violate the field
    /// invariants; a rejected record writes nothing.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.from.is_empty() {
            return Err(CodecError::EmptyFrom);
        }
        if self.command == ChatCommand::Private && self.pm_to.is_empty() {
            return Err(CodecError::EmptyRecipient);
        }
        if self.command.takes_payload() && self.msg.is_empty() {
            return Err(CodecError::EmptyPayload);
        }

        let capacity =
            TEXT_OFFSET + 2 * (self.from.len() + self.pm_to.len() + self.msg.len() + 3);
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.command.wire_value().to_le_bytes());
        push_utf16(&mut buf, &self.from);
        if self.command == ChatCommand::Private {
            push_utf16(&mut buf, &self.pm_to);
        }
        if self.command.takes_payload() {
            push_utf16(&mut buf, &self.msg);
        }
        Ok(buf)
    }

    /// Parse a record body. All parsing is bounds-checked; any failure
    /// leaves no partial record behind.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < MIN_RECORD_LEN {
            return Err(CodecError::Truncated { got: bytes.len() });
        }

        let mut timestamp_bytes = [0u8; 8];
        timestamp_bytes.copy_from_slice(&bytes[..COMMAND_OFFSET]);
        let timestamp = u64::from_le_bytes(timestamp_bytes);

        let mut command_bytes = [0u8; 4];
        command_bytes.copy_from_slice(&bytes[COMMAND_OFFSET..TEXT_OFFSET]);
        let command_value = u32::from_le_bytes(command_bytes);
        let command =
            ChatCommand::from_wire(command_value).ok_or(CodecError::UnknownCommand(command_value))?;

        // A trailing odd byte is not part of any code unit and is dropped.
        let units: Vec<u16> = bytes[TEXT_OFFSET..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if units.last() != Some(&0) {
            return Err(CodecError::MissingTerminator);
        }

        let (from, mut pos) = take_nul_string(&units, 0)?;
        if from.is_empty() {
            return Err(CodecError::EmptyFrom);
        }

        let mut record = Self {
            timestamp,
            command,
            from,
            pm_to: String::new(),
            msg: String::new(),
        };

        if !command.takes_payload() {
            return Ok(record);
        }
        if pos == units.len() {
            return Err(CodecError::MissingField);
        }

        if command == ChatCommand::Private {
            let (pm_to, next) = take_nul_string(&units, pos)?;
            if pm_to.is_empty() {
                return Err(CodecError::EmptyRecipient);
            }
            if next == units.len() {
                return Err(CodecError::MissingField);
            }
            record.pm_to = pm_to;
            pos = next;
        }

        // The payload runs to the final terminator; interior NULs are kept.
        let payload = &units[pos..units.len() - 1];
        if payload.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        record.msg = String::from_utf16(payload).map_err(|_| CodecError::InvalidUtf16)?;
        Ok(record)
    }
}

fn push_utf16(buf: &mut Vec<u8>, text: &str) {
    for unit in text.encode_utf16() {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    buf.extend_from_slice(&0u16.to_le_bytes());
}

/// Decode the NUL-terminated string starting at `pos`; returns it with the
/// position just past the terminator.
fn take_nul_string(units: &[u16], pos: usize) -> Result<(String, usize), CodecError> {
    let len = units[pos..]
        .iter()
        .position(|&unit| unit == 0)
        .ok_or(CodecError::MissingTerminator)?;
    let text =
        String::from_utf16(&units[pos..pos + len]).map_err(|_| CodecError::InvalidUtf16)?;
    Ok((text, pos + len + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(from: &str, msg: &str) -> ChatMessage {
        ChatMessage::new(ChatCommand::Broadcast, from).with_msg(msg)
    }

    #[test]
    fn broadcast_roundtrip() {
        let record = broadcast("alice", "hello there");
        let bytes = record.encode().unwrap();
        assert_eq!(ChatMessage::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn private_roundtrip_keeps_recipient() {
        let record = ChatMessage::new(ChatCommand::Private, "alice")
            .with_pm_to("bob")
            .with_msg("psst");
        let bytes = record.encode().unwrap();
        let decoded = ChatMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.pm_to, "bob");
        assert_eq!(decoded, record);
    }

    #[test]
    fn connect_and_list_carry_no_payload() {
        for command in [ChatCommand::Connect, ChatCommand::ListUsers] {
            let record = ChatMessage::new(command, "alice").with_msg("ignored");
            let bytes = record.encode().unwrap();
            // Header, "alice" and its terminator, nothing else.
            assert_eq!(bytes.len(), 12 + 2 * 6);
            let decoded = ChatMessage::decode(&bytes).unwrap();
            assert_eq!(decoded.command, command);
            assert!(decoded.msg.is_empty());
        }
    }

    #[test]
    fn non_ascii_text_roundtrips() {
        let record = ChatMessage::new(ChatCommand::Private, "Соня")
            .with_pm_to("老王")
            .with_msg("caf\u{e9} \u{1F600}");
        let bytes = record.encode().unwrap();
        assert_eq!(ChatMessage::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn encode_rejects_invalid_fields() {
        let no_sender = broadcast("", "hi");
        assert_eq!(no_sender.encode().unwrap_err(), CodecError::EmptyFrom);

        let no_recipient = ChatMessage::new(ChatCommand::Private, "alice").with_msg("hi");
        assert_eq!(no_recipient.encode().unwrap_err(), CodecError::EmptyRecipient);

        let no_payload = ChatMessage::new(ChatCommand::Broadcast, "alice");
        assert_eq!(no_payload.encode().unwrap_err(), CodecError::EmptyPayload);
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert_eq!(
            ChatMessage::decode(&[0u8; 15]).unwrap_err(),
            CodecError::Truncated { got: 15 }
        );
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let mut bytes = broadcast("alice", "hi").encode().unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(
            ChatMessage::decode(&bytes).unwrap_err(),
            CodecError::UnknownCommand(99)
        );
    }

    #[test]
    fn decode_rejects_missing_final_terminator() {
        let mut bytes = broadcast("alice", "hi").encode().unwrap();
        let last = bytes.len() - 2;
        bytes[last..].copy_from_slice(&('x' as u16).to_le_bytes());
        assert_eq!(
            ChatMessage::decode(&bytes).unwrap_err(),
            CodecError::MissingTerminator
        );
    }

    #[test]
    fn decode_rejects_record_ending_after_sender() {
        let bytes = ChatMessage::new(ChatCommand::Broadcast, "alice")
            .with_msg("x")
            .encode()
            .unwrap();
        // Chop off the payload field, leaving "alice\0" as the whole text.
        let truncated = &bytes[..12 + 2 * 6];
        assert_eq!(
            ChatMessage::decode(truncated).unwrap_err(),
            CodecError::MissingField
        );
    }

    #[test]
    fn payload_keeps_interior_nul() {
        let record = broadcast("alice", "a\0b");
        let bytes = record.encode().unwrap();
        assert_eq!(ChatMessage::decode(&bytes).unwrap().msg, "a\0b");
    }

    #[test]
    fn single_bit_corruption_never_panics() {
        let bytes = ChatMessage::new(ChatCommand::Private, "ab")
            .with_pm_to("cd")
            .with_msg("ef")
            .encode()
            .unwrap();
        for byte in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[byte] ^= 1 << bit;
                // Must yield either a record or an error, never a panic.
                let _ = ChatMessage::decode(&corrupted);
            }
        }
    }
}
