//! # Chat Wire Protocol
//!
//! Every websocket message on `/api/chat` is binary: one kind byte followed by
//! the payload.
//!
//! | Kind   | Direction        | Payload                 |
//! |--------|------------------|-------------------------|
//! | `0x00` | server to client | none (handshake)        |
//! | `0x01` | both             | Ogg-encapsulated Opus   |
//!
//! Any other kind is reported as `Unknown` so callers can log it and move on.

use crate::error::PipelineError;

/// Known message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Handshake = 0x00,
    Audio = 0x01,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(MessageKind::Handshake),
            0x01 => Some(MessageKind::Audio),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A parsed client message. Audio borrows its payload from the websocket frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientMessage<'a> {
    Handshake,
    Audio(&'a [u8]),
    Unknown { kind: u8, len: usize },
}

/// Split a binary message into kind and payload.
pub fn parse(message: &[u8]) -> Result<ClientMessage<'_>, PipelineError> {
    let (&kind, payload) = message
        .split_first()
        .ok_or_else(|| PipelineError::ProtocolViolation("empty message".to_string()))?;

    Ok(match MessageKind::from_u8(kind) {
        Some(MessageKind::Handshake) => ClientMessage::Handshake,
        Some(MessageKind::Audio) => ClientMessage::Audio(payload),
        None => ClientMessage::Unknown {
            kind,
            len: payload.len(),
        },
    })
}

/// The one-byte message that tells a client its session is live.
pub fn handshake() -> Vec<u8> {
    vec![MessageKind::Handshake.to_u8()]
}

/// Prefix an Opus payload with the audio kind byte.
pub fn audio_message(payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(payload.len() + 1);
    msg.push(MessageKind::Audio.to_u8());
    msg.extend_from_slice(payload);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_is_single_zero_byte() {
        assert_eq!(handshake(), vec![0x00]);
        assert_eq!(parse(&handshake()).unwrap(), ClientMessage::Handshake);
    }

    /// Building an audio message and parsing it returns the exact payload.
    #[test]
    fn test_audio_message_framing() {
        let payload = [0x4f, 0x67, 0x67, 0x53, 0x00, 0xff];
        let msg = audio_message(&payload);
        assert_eq!(msg[0], 0x01);
        assert_eq!(parse(&msg).unwrap(), ClientMessage::Audio(&payload[..]));

        let empty = audio_message(&[]);
        assert_eq!(parse(&empty).unwrap(), ClientMessage::Audio(&[][..]));
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        assert_eq!(
            parse(&[0x07, 1, 2]).unwrap(),
            ClientMessage::Unknown { kind: 0x07, len: 2 }
        );
    }

    #[test]
    fn test_empty_message_is_protocol_violation() {
        assert!(matches!(
            parse(&[]),
            Err(PipelineError::ProtocolViolation(_))
        ));
    }
}
