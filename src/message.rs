//! Binary encoding for `BitchatMessage`, the application payload carried
//! inside `MessageType::Message` and `NoisePayloadType::PrivateMessage`.
//!
//! Layout: flags byte, 8-byte BE timestamp-ms, 1-byte-length-prefixed id,
//! 1-byte-length-prefixed sender, 2-byte-length-prefixed content, then the
//! optional fields in flag-bit order, each 1-byte-length-prefixed
//! (mentions is a count byte followed by repeated length-prefixed
//! strings).

use crate::types::BitchatMessage;
use thiserror::Error;

const FLAG_IS_RELAY: u8 = 1 << 0;
const FLAG_IS_PRIVATE: u8 = 1 << 1;
const FLAG_HAS_ORIGINAL_SENDER: u8 = 1 << 2;
const FLAG_HAS_RECIPIENT_NICKNAME: u8 = 1 << 3;
const FLAG_HAS_SENDER_PEER_ID: u8 = 1 << 4;
const FLAG_HAS_MENTIONS: u8 = 1 << 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageCodecError {
    #[error("message payload truncated")]
    Truncated,
    #[error("field exceeds its length-prefix capacity")]
    FieldTooLong,
    #[error("invalid utf-8 in field")]
    InvalidUtf8,
}

pub fn encode(msg: &BitchatMessage) -> Result<Vec<u8>, MessageCodecError> {
    let mut flags = 0u8;
    if msg.is_relay {
        flags |= FLAG_IS_RELAY;
    }
    if msg.is_private {
        flags |= FLAG_IS_PRIVATE;
    }
    if msg.original_sender.is_some() {
        flags |= FLAG_HAS_ORIGINAL_SENDER;
    }
    if msg.recipient_nickname.is_some() {
        flags |= FLAG_HAS_RECIPIENT_NICKNAME;
    }
    if msg.sender_peer_id.is_some() {
        flags |= FLAG_HAS_SENDER_PEER_ID;
    }
    if msg.mentions.is_some() {
        flags |= FLAG_HAS_MENTIONS;
    }

    let mut out = Vec::with_capacity(32 + msg.content.len());
    out.push(flags);
    out.extend_from_slice(&msg.timestamp_ms.to_be_bytes());

    push_u8_prefixed(&mut out, msg.id.as_bytes())?;
    push_u8_prefixed(&mut out, msg.sender.as_bytes())?;
    push_u16_prefixed(&mut out, msg.content.as_bytes())?;

    if let Some(original_sender) = &msg.original_sender {
        push_u8_prefixed(&mut out, original_sender.as_bytes())?;
    }
    if let Some(recipient_nickname) = &msg.recipient_nickname {
        push_u8_prefixed(&mut out, recipient_nickname.as_bytes())?;
    }
    if let Some(sender_peer_id) = &msg.sender_peer_id {
        push_u8_prefixed(&mut out, sender_peer_id.as_bytes())?;
    }
    if let Some(mentions) = &msg.mentions {
        if mentions.len() > u8::MAX as usize {
            return Err(MessageCodecError::FieldTooLong);
        }
        out.push(mentions.len() as u8);
        for mention in mentions {
            push_u8_prefixed(&mut out, mention.as_bytes())?;
        }
    }

    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<BitchatMessage, MessageCodecError> {
    let mut cursor = 0usize;
    let flags = *bytes.get(cursor).ok_or(MessageCodecError::Truncated)?;
    cursor += 1;

    let timestamp_ms = u64::from_be_bytes(
        bytes
            .get(cursor..cursor + 8)
            .ok_or(MessageCodecError::Truncated)?
            .try_into()
            .unwrap(),
    );
    cursor += 8;

    let id = read_u8_prefixed_string(bytes, &mut cursor)?;
    let sender = read_u8_prefixed_string(bytes, &mut cursor)?;
    let content = read_u16_prefixed_string(bytes, &mut cursor)?;

    let original_sender = if flags & FLAG_HAS_ORIGINAL_SENDER != 0 {
        Some(read_u8_prefixed_string(bytes, &mut cursor)?)
    } else {
        None
    };
    let recipient_nickname = if flags & FLAG_HAS_RECIPIENT_NICKNAME != 0 {
        Some(read_u8_prefixed_string(bytes, &mut cursor)?)
    } else {
        None
    };
    let sender_peer_id = if flags & FLAG_HAS_SENDER_PEER_ID != 0 {
        Some(read_u8_prefixed_string(bytes, &mut cursor)?)
    } else {
        None
    };
    let mentions = if flags & FLAG_HAS_MENTIONS != 0 {
        let count = *bytes.get(cursor).ok_or(MessageCodecError::Truncated)? as usize;
        cursor += 1;
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(read_u8_prefixed_string(bytes, &mut cursor)?);
        }
        Some(list)
    } else {
        None
    };

    Ok(BitchatMessage {
        id,
        sender,
        content,
        timestamp_ms,
        is_relay: flags & FLAG_IS_RELAY != 0,
        is_private: flags & FLAG_IS_PRIVATE != 0,
        original_sender,
        recipient_nickname,
        sender_peer_id,
        mentions,
        delivery_status: None,
    })
}

fn push_u8_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), MessageCodecError> {
    if bytes.len() > u8::MAX as usize {
        return Err(MessageCodecError::FieldTooLong);
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(())
}

fn push_u16_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), MessageCodecError> {
    if bytes.len() > u16::MAX as usize {
        return Err(MessageCodecError::FieldTooLong);
    }
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_u8_prefixed_string(bytes: &[u8], cursor: &mut usize) -> Result<String, MessageCodecError> {
    let len = *bytes.get(*cursor).ok_or(MessageCodecError::Truncated)? as usize;
    *cursor += 1;
    let end = cursor.checked_add(len).ok_or(MessageCodecError::Truncated)?;
    let slice = bytes.get(*cursor..end).ok_or(MessageCodecError::Truncated)?;
    let s = String::from_utf8(slice.to_vec()).map_err(|_| MessageCodecError::InvalidUtf8)?;
    *cursor = end;
    Ok(s)
}

fn read_u16_prefixed_string(bytes: &[u8], cursor: &mut usize) -> Result<String, MessageCodecError> {
    let len = u16::from_be_bytes(
        bytes
            .get(*cursor..*cursor + 2)
            .ok_or(MessageCodecError::Truncated)?
            .try_into()
            .unwrap(),
    ) as usize;
    *cursor += 2;
    let end = cursor.checked_add(len).ok_or(MessageCodecError::Truncated)?;
    let slice = bytes.get(*cursor..end).ok_or(MessageCodecError::Truncated)?;
    let s = String::from_utf8(slice.to_vec()).map_err(|_| MessageCodecError::InvalidUtf8)?;
    *cursor = end;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BitchatMessage;

    #[test]
    fn round_trips_minimal_message() {
        let msg = BitchatMessage::new("alice", "hello");
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sender, msg.sender);
        assert_eq!(decoded.content, msg.content);
        assert_eq!(decoded.id, msg.id);
    }

    #[test]
    fn round_trips_all_optional_fields() {
        let mut msg = BitchatMessage::new("bob", "hi @carol");
        msg.is_relay = true;
        msg.is_private = true;
        msg.original_sender = Some("alice".to_string());
        msg.recipient_nickname = Some("carol".to_string());
        msg.sender_peer_id = Some("00112233445566".to_string());
        msg.mentions = Some(vec!["carol".to_string(), "dave".to_string()]);

        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.original_sender, msg.original_sender);
        assert_eq!(decoded.recipient_nickname, msg.recipient_nickname);
        assert_eq!(decoded.sender_peer_id, msg.sender_peer_id);
        assert_eq!(decoded.mentions, msg.mentions);
        assert!(decoded.is_relay && decoded.is_private);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let msg = BitchatMessage::new("alice", "hello");
        let mut bytes = encode(&msg).unwrap();
        bytes.truncate(3);
        assert!(decode(&bytes).is_err());
    }
}
