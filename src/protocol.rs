//! Control-channel command protocol
//!
//! Commands are serialized as bare JSON objects concatenated on the stream,
//! one object per command: `{"type":0}` asks the local agent to open a new
//! portal connection. The numeric `type` tag is fixed; new commands append to
//! the enumeration, and a receiver ignores tags it does not recognize.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

/// Wire tag for the INIT command.
const INIT_TYPE: u8 = 0;

/// Command discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum CommandType {
    /// Ask the local agent to open a new portal connection.
    Init,
    /// Unrecognized tag, preserved so newer peers stay compatible.
    Unknown(u8),
}

impl From<u8> for CommandType {
    fn from(value: u8) -> Self {
        match value {
            INIT_TYPE => CommandType::Init,
            other => CommandType::Unknown(other),
        }
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        match value {
            CommandType::Init => INIT_TYPE,
            CommandType::Unknown(other) => other,
        }
    }
}

/// A single control-channel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: CommandType,
}

impl Command {
    /// The INIT command.
    pub fn init() -> Self {
        Self {
            command_type: CommandType::Init,
        }
    }

    /// Serialize to the wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::Codec)
    }
}

/// Codec for commands framed as concatenated JSON objects.
///
/// `decode` consumes exactly one complete object per call. Incomplete input
/// yields `Ok(None)` until more bytes arrive. Malformed input discards the
/// buffered bytes and returns an error, so a read loop can log it and keep
/// going; end-of-stream is reported by the framed reader itself and stays
/// distinguishable from decode failures.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl CommandCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>> {
        while src.first().is_some_and(|b| b.is_ascii_whitespace()) {
            src.advance(1);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let (next, consumed) = {
            let mut objects = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Command>();
            (objects.next(), objects.byte_offset())
        };

        match next {
            Some(Ok(command)) => {
                src.advance(consumed);
                Ok(Some(command))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                src.clear();
                Err(Error::Codec(e))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&command.to_bytes()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_wire_format() {
        assert_eq!(Command::init().to_bytes().unwrap(), b"{\"type\":0}");
    }

    #[test]
    fn decode_single_command() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":0}"[..]);
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd, Command::init());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_concatenated_commands() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":0}{\"type\":0}"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_partial_then_complete() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&b"{\"ty"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"pe\":0}");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
    }

    #[test]
    fn decode_tolerates_whitespace_between_commands() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":0}\n {\"type\":0}"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
    }

    #[test]
    fn decode_unknown_type_is_preserved() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":7}"[..]);
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd.command_type, CommandType::Unknown(7));
    }

    #[test]
    fn decode_malformed_recovers_on_next_call() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&b"not json at all"[..]);
        assert!(codec.decode(&mut buf).is_err());
        // Buffer was discarded; a later well-formed command decodes cleanly.
        buf.extend_from_slice(b"{\"type\":0}");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
    }

    #[test]
    fn encode_then_decode_round_trip() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Command::init(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::init()));
    }

    #[test]
    fn command_type_u8_mapping() {
        assert_eq!(CommandType::from(0), CommandType::Init);
        assert_eq!(CommandType::from(42), CommandType::Unknown(42));
        assert_eq!(u8::from(CommandType::Init), 0);
        assert_eq!(u8::from(CommandType::Unknown(42)), 42);
    }
}
