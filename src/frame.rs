//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//! A [`Frame`] is the atomic unit on the wire; a *message* is one final frame,
//! or a non-final text/binary frame followed by continuation frames.
//!
//! ## Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! The header is assembled and torn apart with explicit shifts and masks so
//! the wire layout never depends on host byte order or on how the compiler
//! packs bit-fields.
//!
//! Frames come in two categories:
//!
//! - **Data frames**: [`OpCode::Text`], [`OpCode::Binary`] and
//!   [`OpCode::Continuation`], carrying application payload.
//! - **Control frames**: [`OpCode::Close`], [`OpCode::Ping`] and
//!   [`OpCode::Pong`], managing the connection itself.
//!
//! Construction goes through the per-kind constructors:
//!
//! ```rust
//! use sockeye::{CloseCode, Frame};
//!
//! let text = Frame::text("Hello, WebSocket!");
//! let ping = Frame::ping("are you there");
//! let close = Frame::close(CloseCode::Normal, b"bye");
//! ```

use bytes::BytesMut;

use crate::{close::CloseCode, WsError};

/// WebSocket operation code identifying the purpose of a frame.
///
/// The numeric values are fixed by [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// Continuation = 0x0, Text = 0x1, Binary = 0x2, Close = 0x8, Ping = 0x9,
/// Pong = 0xA. The remaining nibble values (0x3-0x7, 0xB-0xF) are reserved
/// and rejected on read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames manage the connection state and may legally arrive
    /// between the fragments of a data message.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    /// Interprets the opcode nibble of a frame header. Reserved values are a
    /// protocol violation and yield [`WsError::InvalidOpCode`].
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible frame header: 2 bytes of fixed header, 8 bytes of
/// extended length, 4 bytes of masking key.
pub(crate) const MAX_HEADER_SIZE: usize = 14;

/// A single WebSocket frame.
///
/// The payload is always held in clear form. `mask` records the 4-byte key
/// the frame was (or will be) masked with on the wire: the decoder keeps the
/// key it removed, and the encoder applies the key — if any — while
/// serializing. A server sends every frame with `mask` unset.
///
/// # Fields
/// - `fin`: final-fragment flag; `true` means this frame completes a message.
/// - `opcode`: frame type.
/// - `payload`: payload bytes, growable.
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The wire masking key, if the frame is to be (or was) masked.
    mask: Option<[u8; 4]>,
    /// The payload of the frame, in clear (unmasked) form.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a new frame.
    ///
    /// # Parameters
    /// - `fin`: whether this frame is the final fragment of a message.
    /// - `opcode`: the frame type.
    /// - `mask`: optional 4-byte masking key; supply one only when emulating
    ///   the client role (a server never masks what it sends).
    /// - `payload`: the payload bytes.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame.
    pub fn text(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a final binary frame.
    pub fn binary(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// Creates a ping frame with an optional payload.
    pub fn ping(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    /// Creates a pong frame. The payload should echo the ping it answers.
    pub fn pong(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a close frame carrying a status code and a reason.
    ///
    /// The payload is the 2-byte big-endian status code followed by the
    /// reason bytes.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Creates a close frame with a raw payload, without imposing the
    /// code+reason structure.
    pub fn close_raw(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Attaches a masking key, to be applied when the frame is encoded.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Attaches a freshly generated random masking key.
    ///
    /// Used when speaking the client side of the protocol, where every frame
    /// must be masked with an unpredictable key.
    pub fn masked(self) -> Self {
        let key: [u8; 4] = rand::random();
        self.with_mask(key)
    }

    /// The masking key the frame carries, if any.
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Decodes the close status code from a close frame's payload.
    ///
    /// Returns the 2-byte big-endian code when the payload holds at least two
    /// bytes, and 0 otherwise (an empty close frame carries no code).
    pub fn close_status(&self) -> u16 {
        match self.payload.get(0..2) {
            Some(bytes) => u16::from_be_bytes([bytes[0], bytes[1]]),
            None => 0,
        }
    }

    /// Serializes the frame header into `head`, returning the header size.
    ///
    /// Picks the smallest length encoding that fits the payload: 7-bit
    /// inline for lengths up to 125, 16-bit extended up to 65535, 64-bit
    /// extended beyond that. The 64-bit form always has its top bit clear
    /// since payloads are bounded by addressable memory.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEADER_SIZE`].
    pub(crate) fn encode_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let mut size = if len <= 125 {
            head[1] = len as u8;
            2
        } else if len <= 0xFFFF {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(key) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&key);
            size += 4;
        }
        size
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("fin", &self.fin)
            .field("opcode", &self.opcode)
            .field("masked", &self.mask.is_some())
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod opcode_tests {
        use super::*;

        #[test]
        fn test_is_control() {
            assert!(OpCode::Close.is_control());
            assert!(OpCode::Ping.is_control());
            assert!(OpCode::Pong.is_control());

            assert!(!OpCode::Continuation.is_control());
            assert!(!OpCode::Text.is_control());
            assert!(!OpCode::Binary.is_control());
        }

        #[test]
        fn test_try_from_u8_valid() {
            assert_eq!(OpCode::try_from(0x0).unwrap(), OpCode::Continuation);
            assert_eq!(OpCode::try_from(0x1).unwrap(), OpCode::Text);
            assert_eq!(OpCode::try_from(0x2).unwrap(), OpCode::Binary);
            assert_eq!(OpCode::try_from(0x8).unwrap(), OpCode::Close);
            assert_eq!(OpCode::try_from(0x9).unwrap(), OpCode::Ping);
            assert_eq!(OpCode::try_from(0xA).unwrap(), OpCode::Pong);
        }

        #[test]
        fn test_try_from_u8_reserved() {
            for code in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
                assert!(matches!(
                    OpCode::try_from(code),
                    Err(WsError::InvalidOpCode(c)) if c == code
                ));
            }
        }

        #[test]
        fn test_round_trip_u8() {
            for opcode in [
                OpCode::Continuation,
                OpCode::Text,
                OpCode::Binary,
                OpCode::Close,
                OpCode::Ping,
                OpCode::Pong,
            ] {
                assert_eq!(OpCode::try_from(u8::from(opcode)).unwrap(), opcode);
            }
        }
    }

    mod frame_tests {
        use super::*;

        #[test]
        fn test_constructors() {
            let frame = Frame::text("hi");
            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(&frame.payload[..], b"hi");
            assert_eq!(frame.mask_key(), None);

            let frame = Frame::binary(&[1u8, 2, 3][..]);
            assert_eq!(frame.opcode, OpCode::Binary);
            assert_eq!(&frame.payload[..], &[1, 2, 3]);

            let frame = Frame::ping("probe");
            assert_eq!(frame.opcode, OpCode::Ping);

            let frame = Frame::pong("probe");
            assert_eq!(frame.opcode, OpCode::Pong);
        }

        #[test]
        fn test_close_constructor_carries_code_and_reason() {
            let frame = Frame::close(CloseCode::Normal, b"done");
            assert_eq!(frame.opcode, OpCode::Close);
            assert_eq!(&frame.payload[..2], &1000u16.to_be_bytes());
            assert_eq!(&frame.payload[2..], b"done");
            assert_eq!(frame.close_status(), 1000);
        }

        #[test]
        fn test_close_status_of_short_payload_is_zero() {
            assert_eq!(Frame::close_raw("").close_status(), 0);
            assert_eq!(Frame::close_raw(&[0x03u8][..]).close_status(), 0);
        }

        #[test]
        fn test_close_status_passes_unknown_codes_through() {
            let frame = Frame::close(CloseCode::Other(4999), b"");
            assert_eq!(frame.close_status(), 4999);
        }

        #[test]
        fn test_encode_head_inline_length() {
            let frame = Frame::text("Header test");
            let mut head = [0u8; MAX_HEADER_SIZE];
            let size = frame.encode_head(&mut head);

            assert_eq!(size, 2);
            assert_eq!(head[0], 0x81); // FIN=1, opcode=Text
            assert_eq!(head[1], 11); // MASK=0, len=11
        }

        #[test]
        fn test_encode_head_with_mask_key() {
            let key = [0xAA, 0xBB, 0xCC, 0xDD];
            let frame = Frame::text("Header test").with_mask(key);
            let mut head = [0u8; MAX_HEADER_SIZE];
            let size = frame.encode_head(&mut head);

            assert_eq!(size, 2 + 4);
            assert_eq!(head[1], 0x80 | 11);
            assert_eq!(&head[2..6], &key);
        }

        #[test]
        fn test_encode_head_16_bit_length() {
            let frame = Frame::binary(&vec![0u8; 126][..]);
            let mut head = [0u8; MAX_HEADER_SIZE];
            let size = frame.encode_head(&mut head);

            assert_eq!(size, 4);
            assert_eq!(head[0], 0x82);
            assert_eq!(head[1], 126);
            assert_eq!(&head[2..4], &126u16.to_be_bytes());
        }

        #[test]
        fn test_encode_head_64_bit_length() {
            let frame = Frame::binary(&vec![0u8; 65536][..]);
            let mut head = [0u8; MAX_HEADER_SIZE];
            let size = frame.encode_head(&mut head);

            assert_eq!(size, 10);
            assert_eq!(head[1], 127);
            assert_eq!(&head[2..10], &65536u64.to_be_bytes());
            // reserved top bit of the 64-bit length stays clear
            assert_eq!(head[2] & 0x80, 0);
        }

        #[test]
        fn test_encode_head_non_final_fragment() {
            let frame = Frame::new(false, OpCode::Continuation, None, "frag");
            let mut head = [0u8; MAX_HEADER_SIZE];
            frame.encode_head(&mut head);

            assert_eq!(head[0], 0x00); // FIN=0, opcode=Continuation
        }

        #[test]
        fn test_masked_generates_a_key() {
            let frame = Frame::text("x").masked();
            assert!(frame.mask_key().is_some());
        }
    }
}
