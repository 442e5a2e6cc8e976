//! Connection state machine: one logical WebSocket session on top of the
//! frame codec.
//!
//! A [`Connection`] is produced by a successful [`Connection::upgrade`] and
//! then driven by [`Connection::next_event`], which reads frames until a
//! complete message (or a close) can be surfaced:
//!
//! - pings are answered with pongs and counted, never surfaced;
//! - pongs are counted, never surfaced;
//! - fragmented messages are reassembled across continuation frames, with
//!   control frames allowed to interleave between the fragments;
//! - a close frame yields [`Event::Close`] and records the peer's status
//!   code.
//!
//! The connection is strictly sequential: it owns its stream exclusively,
//! every operation runs to completion before the next, and concurrency
//! across connections is the caller's concern entirely.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

use crate::codec::{FrameCodec, MAX_PAYLOAD};
use crate::frame::{Frame, OpCode};
use crate::{handshake, CloseCode, Result, WsError};

/// Default cap on a reassembled message: 2 MiB.
///
/// Fragmented messages accumulate in a buffer until their final fragment
/// arrives; without a bound, a peer could grow that buffer indefinitely
/// with non-final fragments.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Configuration for a connection, built up with consuming `with_*` calls.
///
/// ```rust
/// use sockeye::Options;
///
/// let options = Options::default()
///     .with_max_payload(64 * 1024)
///     .with_utf8();
/// ```
#[derive(Clone)]
pub struct Options {
    /// Whether incoming frames must be masked. `true` for production server
    /// use (client frames are always masked); turn off to accept frames from
    /// an unmasked peer in tests.
    pub require_masked: bool,
    /// Cap on a single frame's payload, enforced by the codec.
    pub max_payload: usize,
    /// Cap on a reassembled message across all its fragments.
    pub max_message_size: usize,
    /// Validate that completed text messages are UTF-8.
    pub check_utf8: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            require_masked: true,
            max_payload: MAX_PAYLOAD,
            max_message_size: MAX_MESSAGE_SIZE,
            check_utf8: false,
        }
    }
}

impl Options {
    /// Accepts unmasked frames from the peer. Intended for tests that speak
    /// the wire protocol without a masking client.
    pub fn unmasked_peer(self) -> Self {
        Self {
            require_masked: false,
            ..self
        }
    }

    /// Sets the per-frame payload cap.
    pub fn with_max_payload(self, size: usize) -> Self {
        Self {
            max_payload: size,
            ..self
        }
    }

    /// Sets the reassembled-message cap.
    pub fn with_max_message_size(self, size: usize) -> Self {
        Self {
            max_message_size: size,
            ..self
        }
    }

    /// Enables UTF-8 validation of completed text messages.
    pub fn with_utf8(self) -> Self {
        Self {
            check_utf8: true,
            ..self
        }
    }
}

/// A message-level event surfaced by [`Connection::next_event`].
///
/// Text and binary events leave the message bytes in the connection's
/// buffer, readable through [`Connection::message`] until the next call to
/// `next_event`. Errors are not an event: they arrive as the `Err` arm of
/// the returned `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A complete text message has been reassembled.
    Text,
    /// A complete binary message has been reassembled.
    Binary,
    /// The peer sent a close frame; [`Connection::close_status`] holds its
    /// status code.
    Close,
}

/// The kind of data message to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl From<MessageKind> for OpCode {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => OpCode::Text,
            MessageKind::Binary => OpCode::Binary,
        }
    }
}

/// One server-side WebSocket session.
///
/// Created by [`Connection::upgrade`]; a failed handshake never produces a
/// `Connection`. The stream is owned exclusively until [`Connection::close`]
/// shuts it down (once, even though it serves both directions) or the
/// connection is dropped.
#[derive(Debug)]
pub struct Connection<S> {
    framed: Framed<S, FrameCodec>,
    /// Reassembly buffer for the message in flight; after a text/binary
    /// event it holds the completed message.
    message: BytesMut,
    /// Opcode of the fragmented message currently being reassembled — the
    /// most recent non-continuation data opcode seen without FIN. Kept as a
    /// field because fragmentation can span many internal read iterations
    /// and several `next_event` calls.
    in_progress: Option<OpCode>,
    /// Status code from the peer's close frame; 0 until one arrives.
    status_code: u16,
    pings_received: u64,
    pongs_received: u64,
    max_message_size: usize,
    check_utf8: bool,
    open: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Performs the upgrade handshake on `stream` and, on success, returns
    /// the open connection.
    ///
    /// Writes the `101 Switching Protocols` response and immediately sends
    /// one unsolicited, unmasked ping as a liveness probe. When the
    /// handshake preconditions fail, nothing has been written to the stream.
    /// Callers that want to fall back to ordinary HTTP handling should test
    /// [`crate::is_upgrade_request`] before handing the stream over, since
    /// `upgrade` takes ownership of it.
    pub async fn upgrade(mut stream: S, headers: &HeaderMap, options: Options) -> Result<Self> {
        handshake::negotiate(&mut stream, headers).await?;

        let codec =
            FrameCodec::new(options.require_masked).with_max_payload(options.max_payload);
        let mut framed = Framed::new(stream, codec);

        // liveness probe right after the protocol switch
        framed.send(Frame::ping("")).await?;

        Ok(Self {
            framed,
            message: BytesMut::new(),
            in_progress: None,
            status_code: 0,
            pings_received: 0,
            pongs_received: 0,
            max_message_size: options.max_message_size,
            check_utf8: options.check_utf8,
            open: true,
        })
    }

    /// Waits for the next message-level event.
    ///
    /// Blocks (asynchronously) until a complete message, a close frame or an
    /// error arrives. Control frames are consumed along the way: pings are
    /// answered with an identical-payload pong without touching the
    /// reassembly buffer, pongs are only counted.
    ///
    /// After an `Err` the connection is unusable. No close frame is sent on
    /// the caller's behalf; answering a protocol violation with
    /// `close(CloseCode::Protocol)` is the caller's decision.
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            let frame = match self.framed.next().await {
                Some(frame) => frame?,
                None => {
                    log::debug!("stream ended without a close frame");
                    return Err(WsError::ConnectionClosed);
                }
            };

            match frame.opcode {
                OpCode::Ping => {
                    self.pings_received += 1;
                    log::debug!("ping received, answering pong");
                    self.framed.send(Frame::pong(frame.payload)).await?;
                }
                OpCode::Pong => {
                    self.pongs_received += 1;
                    log::debug!("pong received");
                }
                OpCode::Close => {
                    self.status_code = frame.close_status();
                    log::debug!("close received, status={}", self.status_code);
                    return Ok(Event::Close);
                }
                OpCode::Text | OpCode::Binary => {
                    // a new data frame begins a new message, whatever was in
                    // flight before
                    self.message.clear();
                    self.append(&frame.payload)?;
                    if frame.fin {
                        self.in_progress = None;
                        return self.complete(frame.opcode);
                    }
                    self.in_progress = Some(frame.opcode);
                }
                OpCode::Continuation => {
                    let opcode = self
                        .in_progress
                        .ok_or(WsError::UnexpectedContinuation)?;
                    self.append(&frame.payload)?;
                    if frame.fin {
                        self.in_progress = None;
                        return self.complete(opcode);
                    }
                }
            }
        }
    }

    /// Appends a fragment to the reassembly buffer, enforcing the message
    /// cap.
    fn append(&mut self, payload: &[u8]) -> Result<()> {
        if self.message.len() + payload.len() > self.max_message_size {
            log::warn!(
                "message exceeds cap of {} bytes, dropping connection",
                self.max_message_size
            );
            return Err(WsError::MessageTooLarge);
        }
        self.message.extend_from_slice(payload);
        Ok(())
    }

    /// Finishes a reassembled message, producing its event.
    fn complete(&mut self, opcode: OpCode) -> Result<Event> {
        log::debug!("message complete: {:?}, {} bytes", opcode, self.message.len());
        match opcode {
            OpCode::Text => {
                if self.check_utf8 && std::str::from_utf8(&self.message).is_err() {
                    return Err(WsError::InvalidUtf8);
                }
                Ok(Event::Text)
            }
            OpCode::Binary => Ok(Event::Binary),
            _ => unreachable!("only data opcodes are reassembled"),
        }
    }

    /// The most recently completed message.
    ///
    /// Valid immediately after [`Event::Text`] or [`Event::Binary`], until
    /// the next call to [`Connection::next_event`].
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Sends a single final, unmasked data frame carrying `payload`.
    ///
    /// No implicit fragmentation: the payload goes out as one frame, flushed
    /// before this returns.
    pub async fn send_message(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        if !self.open {
            return Err(WsError::ConnectionClosed);
        }
        log::debug!("sending {:?} message, {} bytes", kind, payload.len());
        self.framed
            .send(Frame::new(true, OpCode::from(kind), None, payload))
            .await
    }

    /// Closes the connection: sends a close frame with `code`, flushes, and
    /// shuts the stream down.
    ///
    /// The stream serves both directions but is shut down exactly once.
    /// Idempotent — closing an already-closed connection is a no-op, not an
    /// error.
    pub async fn close(&mut self, code: CloseCode) -> Result<()> {
        if !self.open {
            log::debug!("close on an already-closed connection");
            return Ok(());
        }
        self.open = false;

        log::debug!("closing connection, status={code}");
        let sent = self.framed.send(Frame::close(code, "")).await;
        // release the transport even when the close frame did not go out
        let shutdown = self.framed.get_mut().shutdown().await;
        sent?;
        shutdown?;
        Ok(())
    }

    /// Closes with the "going away" status — the teardown path for a server
    /// shutting down or discarding the connection.
    pub async fn close_going_away(&mut self) -> Result<()> {
        self.close(CloseCode::Away).await
    }

    /// Whether the local end has not yet been closed.
    ///
    /// Receiving [`Event::Close`] does not flip this: the stream stays
    /// usable for the answering close frame until [`Connection::close`] is
    /// called.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The close status received from the peer. Meaningful only after
    /// [`Event::Close`]; 0 until then.
    pub fn close_status(&self) -> u16 {
        self.status_code
    }

    /// Number of pings received (and answered) so far.
    pub fn pings_received(&self) -> u64 {
        self.pings_received
    }

    /// Number of pongs received so far, the initial liveness probe's answer
    /// included.
    pub fn pongs_received(&self) -> u64 {
        self.pongs_received
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        // an async close cannot run here; a session that wants the graceful
        // going-away exchange calls close_going_away() before dropping
        if self.open {
            log::debug!("connection dropped while open; no close frame was sent");
        }
    }
}
