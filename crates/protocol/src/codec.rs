//! Message serialization and framing using postcard
//!
//! # Frame Format
//!
//! Messages on the TCP stream are length-prefixed:
//! ```text
//! [Length: u32 (big-endian)][Message bytes (postcard serialized)]
//! ```
//!
//! The stream is non-blocking, so frames arrive in arbitrary pieces.
//! [`FrameDecoder`] buffers those pieces and yields whole messages.

use crate::{Message, error::ProtocolError, error::Result};
use bytes::{Buf, BytesMut};

/// Maximum allowed frame size (32 MiB)
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Encode a message to bytes using postcard
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    postcard::to_allocvec(message).map_err(ProtocolError::from)
}

/// Decode a message from bytes using postcard
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    postcard::from_bytes(bytes).map_err(ProtocolError::from)
}

/// Encode a message with length prefix for framing
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, CURRENT_VERSION, encode_framed};
///
/// let msg = Message {
///     version: CURRENT_VERSION,
///     id: 1,
///     payload: MessagePayload::Reset,
/// };
/// let framed = encode_framed(&msg).unwrap();
/// assert!(framed.len() > 4);
/// ```
pub fn encode_framed(message: &Message) -> Result<Vec<u8>> {
    let message_bytes = encode_message(message)?;
    let message_len = message_bytes.len();

    if message_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: message_len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + message_len);
    frame.extend_from_slice(&(message_len as u32).to_be_bytes());
    frame.extend_from_slice(&message_bytes);

    Ok(frame)
}

/// Decode exactly one framed message
pub fn decode_framed(frame: &[u8]) -> Result<Message> {
    if frame.len() < LENGTH_PREFIX {
        return Err(ProtocolError::IncompleteFrame {
            expected: LENGTH_PREFIX,
            actual: frame.len(),
        });
    }

    let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if frame.len() < LENGTH_PREFIX + length {
        return Err(ProtocolError::IncompleteFrame {
            expected: LENGTH_PREFIX + length,
            actual: frame.len(),
        });
    }

    decode_message(&frame[LENGTH_PREFIX..LENGTH_PREFIX + length])
}

/// Incremental decoder for a byte stream of frames
///
/// # Example
/// ```
/// use protocol::{FrameDecoder, Message, MessagePayload, CURRENT_VERSION, encode_framed};
///
/// let msg = Message { version: CURRENT_VERSION, id: 9, payload: MessagePayload::Reset };
/// let frame = encode_framed(&msg).unwrap();
///
/// let mut decoder = FrameDecoder::new();
/// decoder.extend(&frame[..3]);
/// assert!(decoder.next_message().unwrap().is_none());
/// decoder.extend(&frame[3..]);
/// assert_eq!(decoder.next_message().unwrap(), Some(msg));
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed as a full frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete message, if one is buffered
    ///
    /// An oversized length prefix is an error; the decoder is unusable after it.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        if self.buffer.len() < LENGTH_PREFIX + length {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX);
        let body = self.buffer.split_to(length);
        decode_message(&body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CURRENT_VERSION, MessagePayload,
        types::{Caps, DataPacket, TransferStatus},
    };

    fn bulk(id: u64, data: Vec<u8>) -> Message {
        Message {
            version: CURRENT_VERSION,
            id,
            payload: MessagePayload::BulkPacket(DataPacket {
                endpoint: 0x02,
                length: data.len() as u32,
                status: TransferStatus::Success,
                data,
            }),
        }
    }

    #[test]
    fn test_decode_framed_incomplete() {
        let frame = encode_framed(&bulk(1, vec![0xAA; 32])).unwrap();
        let err = decode_framed(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompleteFrame { .. }));
    }

    #[test]
    fn test_decode_framed_rejects_oversized_prefix() {
        let mut frame = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&[0u8; 8]);
        let err = decode_framed(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_decoder_handles_byte_at_a_time() {
        let msg = Message {
            version: CURRENT_VERSION,
            id: 3,
            payload: MessagePayload::Hello {
                version: "usbredir-server test".to_string(),
                caps: Caps::local(),
            },
        };
        let frame = encode_framed(&msg).unwrap();

        let mut decoder = FrameDecoder::new();
        for (i, byte) in frame.iter().enumerate() {
            decoder.extend(std::slice::from_ref(byte));
            let decoded = decoder.next_message().unwrap();
            if i + 1 < frame.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(decoded, Some(msg.clone()));
            }
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_yields_back_to_back_frames() {
        let mut stream = encode_framed(&bulk(1, vec![1, 2, 3])).unwrap();
        stream.extend(encode_framed(&bulk(2, vec![4, 5])).unwrap());
        stream.extend(&encode_framed(&bulk(3, vec![6])).unwrap()[..2]);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);

        assert_eq!(decoder.next_message().unwrap().map(|m| m.id), Some(1));
        assert_eq!(decoder.next_message().unwrap().map(|m| m.id), Some(2));
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), 2);
    }

    #[test]
    fn test_decoder_rejects_oversized_prefix() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
