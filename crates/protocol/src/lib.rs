//! Redirection protocol for usbredir-server
//!
//! This crate defines the messages exchanged between the USB host (the server
//! that owns the physical device) and the remote guest, the capability words
//! negotiated in the greeting, and the length-prefixed framing used on the TCP
//! stream.
//!
//! # Example
//!
//! ```
//! use protocol::{Caps, FrameDecoder, Message, MessagePayload, CURRENT_VERSION, encode_framed};
//!
//! let hello = Message {
//!     version: CURRENT_VERSION,
//!     id: 0,
//!     payload: MessagePayload::Hello {
//!         version: "example".to_string(),
//!         caps: Caps::local(),
//!     },
//! };
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.extend(&encode_framed(&hello).unwrap());
//! assert_eq!(decoder.next_message().unwrap(), Some(hello));
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    FrameDecoder, MAX_FRAME_SIZE, decode_framed, decode_message, encode_framed, encode_message,
};
pub use error::{ProtocolError, Result};
pub use messages::{Message, MessagePayload};
pub use types::{
    CAPS_SIZE, Capability, Caps, ControlPacket, DataPacket, DeviceInfo, DeviceSpeed,
    TransferStatus,
};
pub use version::{CURRENT_VERSION, ProtocolVersion, validate_version};
