//! Frame codec: incremental binary read/write of WebSocket frames, suitable
//! for driving through [`tokio_util::codec::Framed`].
//!
//! The decoder walks the wire layout in three stages — fixed 2-byte header,
//! extended length plus masking key, payload — keeping its position across
//! calls so it can resume as bytes trickle in. Masked payloads are unmasked
//! before the frame is handed out; the key stays attached to the frame as a
//! record of its wire form.
//!
//! Two checks are connection policy rather than plain syntax:
//!
//! - `require_masked`: a server must reject unmasked client frames. The flag
//!   is configurable so tests can speak as an unmasked peer.
//! - `max_payload`: an upper bound on a single frame's payload, so a hostile
//!   length field cannot drive an arbitrarily large allocation.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEADER_SIZE},
    mask::apply_mask,
    WsError,
};

/// Default cap on a single frame's payload: 1 MiB.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Decoding position within the current frame.
#[derive(Debug)]
enum DecodeState {
    /// Waiting for the fixed 2-byte header.
    Head,
    /// Waiting for the extended length and/or masking key.
    Rest(Head),
    /// Waiting for the payload.
    Payload(Body),
}

/// Fields recovered from the fixed 2-byte header.
#[derive(Debug)]
struct Head {
    fin: bool,
    opcode: OpCode,
    masked: bool,
    /// The raw 7-bit length field.
    length_code: u8,
    /// Size of the extended length that follows (0, 2 or 8 bytes).
    extra: usize,
}

impl Head {
    /// Bytes still needed before the payload starts.
    fn rest_len(&self) -> usize {
        self.extra + if self.masked { 4 } else { 0 }
    }
}

/// Everything needed to slice the payload out of the buffer.
#[derive(Debug)]
struct Body {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    len: usize,
}

/// Encoder/decoder for WebSocket frames.
///
/// Implements both [`codec::Decoder`] and [`codec::Encoder`], so one value
/// configures both directions of a [`tokio_util::codec::Framed`] transport.
#[derive(Debug)]
pub struct FrameCodec {
    state: DecodeState,
    /// Reject incoming frames without the MASK bit.
    require_masked: bool,
    /// Upper bound on a single frame's payload length.
    max_payload: usize,
}

impl FrameCodec {
    /// Creates a codec.
    ///
    /// `require_masked` should be `true` for the server role: client frames
    /// must arrive masked, and an unmasked one fails the read with
    /// [`WsError::UnmaskedFrame`].
    pub fn new(require_masked: bool) -> Self {
        Self {
            state: DecodeState::Head,
            require_masked,
            max_payload: MAX_PAYLOAD,
        }
    }

    /// Overrides the per-frame payload cap.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }
}

impl codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    /// Decodes at most one frame from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the consumed prefix and
    /// the stage reached are remembered for the next call. A short read that
    /// ends the stream mid-frame surfaces as an I/O error through
    /// [`codec::Framed`]'s end-of-stream handling, distinct from the protocol
    /// errors raised here.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match std::mem::replace(&mut self.state, DecodeState::Head) {
                DecodeState::Head => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let fin = src[0] & 0x80 != 0;
                    // reserved bits (0x70) are read and ignored: no extension
                    // is negotiated, and unknown bits are tolerated
                    let opcode = OpCode::try_from(src[0] & 0x0F)?;
                    let masked = src[1] & 0x80 != 0;
                    let length_code = src[1] & 0x7F;
                    src.advance(2);

                    log::trace!(
                        "frame header: fin={fin} opcode={opcode:?} masked={masked} len={length_code}"
                    );

                    if self.require_masked && !masked {
                        log::warn!("rejecting unmasked frame (masking is required)");
                        return Err(WsError::UnmaskedFrame);
                    }

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };

                    self.state = DecodeState::Rest(Head {
                        fin,
                        opcode,
                        masked,
                        length_code,
                        extra,
                    });
                }
                DecodeState::Rest(head) => {
                    if src.remaining() < head.rest_len() {
                        self.state = DecodeState::Rest(head);
                        return Ok(None);
                    }

                    let len = match head.extra {
                        0 => usize::from(head.length_code),
                        2 => usize::from(src.get_u16()),
                        8 => {
                            let len64 = src.get_u64();
                            if len64 & (1 << 63) != 0 {
                                log::warn!("64-bit payload length has its high bit set");
                                return Err(WsError::InvalidLength);
                            }
                            usize::try_from(len64).map_err(|_| WsError::PayloadTooLarge)?
                        }
                        _ => unreachable!("extra is 0, 2 or 8"),
                    };

                    if len > self.max_payload {
                        log::warn!("payload of {len} bytes exceeds cap of {}", self.max_payload);
                        return Err(WsError::PayloadTooLarge);
                    }

                    let mask = if head.masked {
                        let mut key = [0u8; 4];
                        src.copy_to_slice(&mut key);
                        Some(key)
                    } else {
                        None
                    };

                    self.state = DecodeState::Payload(Body {
                        fin: head.fin,
                        opcode: head.opcode,
                        mask,
                        len,
                    });
                }
                DecodeState::Payload(body) => {
                    if src.remaining() < body.len {
                        // a hint of how much is still missing
                        src.reserve(body.len - src.remaining());
                        self.state = DecodeState::Payload(body);
                        return Ok(None);
                    }

                    let mut payload = src.split_to(body.len);
                    if let Some(key) = body.mask {
                        apply_mask(&mut payload, key);
                    }

                    log::debug!(
                        "frame received: opcode={:?} fin={} len={}",
                        body.opcode,
                        body.fin,
                        body.len
                    );

                    return Ok(Some(Frame::new(body.fin, body.opcode, body.mask, payload)));
                }
            }
        }
    }
}

impl codec::Encoder<Frame> for FrameCodec {
    type Error = WsError;

    /// Serializes a frame into `dst`: header, optional extended length and
    /// key, then the payload, masked in place first when the frame carries a
    /// key. The connection flushes after every frame it sends.
    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        log::debug!(
            "frame sent: opcode={:?} fin={} len={}",
            frame.opcode,
            frame.fin,
            frame.payload.len()
        );

        if let Some(key) = frame.mask_key() {
            apply_mask(&mut frame.payload, key);
        }

        let mut head = [0u8; MAX_HEADER_SIZE];
        let size = frame.encode_head(&mut head);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}
