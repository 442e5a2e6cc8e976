//! # sockeye
//! Server-side implementation of the WebSocket protocol (RFC 6455): the binary
//! frame codec, the HTTP/1.1 upgrade handshake, and a per-connection state
//! machine that turns a stream of frames into complete text/binary messages.
//!
//! The crate is deliberately narrow. It expects a collaborating HTTP layer to
//! have parsed the request into an [`http::HeaderMap`] and to hand over the
//! raw byte stream once it decides the request is an upgrade; everything after
//! that point — the `101 Switching Protocols` response, frame parsing,
//! masking, fragmentation reassembly, ping/pong and close bookkeeping — is
//! handled here.
//!
//! Each [`Connection`] owns its stream exclusively and processes frames
//! sequentially; running many connections concurrently is the caller's
//! business (one task per connection is the usual arrangement).
//!
//! # Server Example
//! ```no_run
//! use http::HeaderMap;
//! use sockeye::{CloseCode, Connection, Event, MessageKind, Options};
//! use tokio::net::TcpStream;
//!
//! async fn serve(stream: TcpStream, headers: HeaderMap) -> sockeye::Result<()> {
//!     let mut ws = Connection::upgrade(stream, &headers, Options::default()).await?;
//!     loop {
//!         match ws.next_event().await? {
//!             Event::Text => {
//!                 let echo = ws.message().to_vec();
//!                 ws.send_message(MessageKind::Text, &echo).await?;
//!             }
//!             Event::Binary => {
//!                 let echo = ws.message().to_vec();
//!                 ws.send_message(MessageKind::Binary, &echo).await?;
//!             }
//!             Event::Close => {
//!                 ws.close(CloseCode::Normal).await?;
//!                 return Ok(());
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! # Scope
//! Compression extensions (RFC 7692), HTTP/2, TLS and client-side connecting
//! are out of scope. The codec supports masked writes so that test harnesses
//! can speak the client side of the protocol, but a server never masks the
//! frames it sends.

pub mod close;
pub mod codec;
pub mod connection;
pub mod frame;
pub mod handshake;
mod mask;

use thiserror::Error;

pub use close::CloseCode;
pub use connection::{Connection, Event, MessageKind, Options};
pub use frame::{Frame, OpCode};
pub use handshake::is_upgrade_request;

/// A result type for WebSocket operations, using [`WsError`] as the error type.
pub type Result<T> = std::result::Result<T, WsError>;

/// Errors surfaced by the codec, the handshake and the connection state
/// machine.
///
/// Three classes matter to callers:
///
/// - I/O errors ([`WsError::Io`], [`WsError::ConnectionClosed`]): the stream
///   ended or failed mid-structure. Always fatal to the connection.
/// - Protocol violations (unmasked frames, bad lengths, bad opcodes,
///   misplaced continuations): also fatal. The core does not send a CLOSE
///   frame on the caller's behalf; deciding whether to answer a violation
///   with `close(CloseCode::Protocol)` is left to the caller.
/// - Handshake failures ([`WsError::NotWebSocket`], [`WsError::MissingKey`]):
///   not fatal to the underlying TCP connection — the request simply is not a
///   WebSocket upgrade, and the caller falls back to ordinary HTTP handling.
///   Nothing has been written to the stream when these are returned.
#[derive(Error, Debug)]
pub enum WsError {
    /// The peer's stream ended, or an operation was attempted on a closed
    /// connection.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A frame header carried an opcode outside the set defined by RFC 6455
    /// section 11.8.
    #[error("invalid opcode (byte={0:#x})")]
    InvalidOpCode(u8),

    /// An incoming frame was not masked although the connection requires
    /// masked frames (the server role always does in production).
    #[error("unmasked frame received while masking is required")]
    UnmaskedFrame,

    /// A 64-bit extended payload length had its most significant bit set,
    /// which the protocol reserves as zero.
    #[error("64-bit payload length with the high bit set")]
    InvalidLength,

    /// A continuation frame arrived with no fragmented message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// A single frame's payload exceeded the configured read limit.
    #[error("frame payload exceeds the configured limit")]
    PayloadTooLarge,

    /// A fragmented message grew past the configured reassembly limit.
    #[error("reassembled message exceeds the configured limit")]
    MessageTooLarge,

    /// A completed text message was not valid UTF-8. Only raised when UTF-8
    /// checking is enabled in [`Options`].
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    /// The request headers do not describe a WebSocket upgrade (`Upgrade:
    /// websocket` is absent or has another value).
    #[error("not a websocket upgrade request")]
    NotWebSocket,

    /// The upgrade request is missing the `Sec-WebSocket-Key` header.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingKey,

    /// An I/O error from the underlying stream: short read, short write, or
    /// the stream closing mid-structure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
