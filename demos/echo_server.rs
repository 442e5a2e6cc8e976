//! A WebSocket echo server over plain TCP.
//!
//! The HTTP side here is intentionally rudimentary: the request line and
//! headers are read into an [`http::HeaderMap`] and the raw stream is handed
//! to sockeye. A real deployment puts a proper HTTP layer in front and calls
//! [`Connection::upgrade`] from its upgrade path.

use anyhow::Context as _;
use http::{HeaderMap, HeaderName, HeaderValue};
use sockeye::{CloseCode, Connection, Event, MessageKind, Options};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Reads the request head byte by byte up to the blank line.
///
/// Frames only start flowing after our 101 response, but reading one byte at
/// a time still guarantees nothing past the head is consumed.
async fn read_request_head(stream: &mut TcpStream) -> anyhow::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.context("request head")?;
        head.push(byte[0]);
        anyhow::ensure!(head.len() < 16 * 1024, "request head too large");
    }
    Ok(String::from_utf8(head)?)
}

/// Parses header lines into a map; the request line itself is only logged.
fn parse_headers(head: &str) -> anyhow::Result<HeaderMap> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    log::info!("request: {request_line}");

    let mut headers = HeaderMap::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .with_context(|| format!("malformed header line: {line:?}"))?;
        headers.insert(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}

async fn handle_client(mut stream: TcpStream) -> anyhow::Result<()> {
    let head = read_request_head(&mut stream).await?;
    let headers = parse_headers(&head)?;

    if !sockeye::is_upgrade_request(&headers) {
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
            .await?;
        anyhow::bail!("not a websocket request");
    }

    let mut ws = Connection::upgrade(stream, &headers, Options::default()).await?;

    loop {
        match ws.next_event().await {
            Ok(Event::Text) => {
                let echo = ws.message().to_vec();
                ws.send_message(MessageKind::Text, &echo).await?;
            }
            Ok(Event::Binary) => {
                let echo = ws.message().to_vec();
                ws.send_message(MessageKind::Binary, &echo).await?;
            }
            Ok(Event::Close) => {
                log::info!("client closed, status={}", ws.close_status());
                ws.close(CloseCode::Normal).await?;
                return Ok(());
            }
            Err(err) => {
                log::warn!("connection failed: {err}");
                return Err(err.into());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    log::info!("listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("client connected: {peer}");

        tokio::spawn(async move {
            if let Err(err) = handle_client(stream).await {
                log::error!("{peer}: {err:#}");
            }
        });
    }
}
