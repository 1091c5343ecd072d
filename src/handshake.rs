//! Client-side HTTP/1.1 `Upgrade: websocket` handshake.
//!
//! The agent always knows its own endpoint host/port from the CLI, so unlike
//! a general-purpose client this module never parses a `ws://`/`wss://` URL --
//! it only builds the single fixed request the listener expects and validates
//! the 101 response.

use crate::error::{Error, Result};
use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_RESPONSE_BYTES: usize = 16 * 1024;

pub fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(random_bytes)
}

fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

fn build_request(login_mac: &str, collect_key: &str, host: &str, key: &str) -> String {
    format!(
        "GET /ws?login={login}&key={key_param} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Protocol: json\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        login = login_mac,
        key_param = collect_key,
        host = host,
        key = key,
    )
}

struct HttpResponse {
    status: u16,
    headers: HashMap<String, String>,
}

/// Accumulates bytes until the header block is complete, then hands them to
/// `httparse` rather than hand-rolling a line scanner.
async fn read_http_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<HttpResponse> {
    let mut buf = BytesMut::with_capacity(1024);
    let mut chunk = [0u8; 256];
    loop {
        if buf.len() >= MAX_RESPONSE_BYTES {
            return Err(Error::IncompleteHttpResponse);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::IncompleteHttpResponse);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut header_storage);
    match response
        .parse(&buf)
        .map_err(|source| Error::HttpParseError { source })?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::IncompleteHttpResponse),
    }

    let status = response.code.ok_or(Error::IncompleteHttpResponse)?;
    let mut headers = HashMap::new();
    for header in response.headers.iter() {
        headers.insert(
            header.name.to_ascii_lowercase(),
            String::from_utf8_lossy(header.value).trim().to_string(),
        );
    }

    Ok(HttpResponse { status, headers })
}

/// Performs the HTTP Upgrade exchange over an already-connected (and, for
/// `wss`, already TLS-wrapped) stream. On success the stream is left
/// positioned right after the blank line that ends the response headers,
/// ready for the frame codec to take over.
pub async fn perform_handshake<S>(
    stream: &mut S,
    login_mac: &str,
    collect_key: &str,
    host: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_websocket_key();
    let request = build_request(login_mac, collect_key, host, &key);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let response = read_http_response(stream).await?;
    validate_response(&response, &key)
}

fn validate_response(response: &HttpResponse, key: &str) -> Result<()> {
    if response.status != 101 {
        return Err(Error::NoUpgrade);
    }

    let upgrade = response
        .headers
        .get("upgrade")
        .ok_or(Error::NoUpgradeHeader)?;
    if upgrade != "websocket" {
        return Err(Error::NoUpgradeHeader);
    }

    // RFC 6455 tokens are case-insensitive; the reference implementation
    // required an exact-case match, which this client deliberately relaxes
    // while still emitting the canonical casing on its own requests.
    let connection = response
        .headers
        .get("connection")
        .ok_or(Error::NoConnectionHeader)?;
    if !connection.eq_ignore_ascii_case("upgrade") {
        return Err(Error::NoConnectionHeader);
    }

    let accept = response
        .headers
        .get("sec-websocket-accept")
        .ok_or(Error::InvalidAcceptKey)?;
    if accept != &expected_accept(key) {
        return Err(Error::InvalidAcceptKey);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn accept_value_matches_rfc6455_example() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(expected_accept(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn request_contains_required_headers() {
        let req = build_request("aa:bb:cc", "secret", "listener.example:443", "somekey");
        assert!(req.starts_with("GET /ws?login=aa:bb:cc&key=secret HTTP/1.1"));
        assert!(req.contains("Host: listener.example:443"));
        assert!(req.contains("Upgrade: websocket"));
        assert!(req.contains("Connection: Upgrade"));
        assert!(req.contains("Sec-WebSocket-Key: somekey"));
        assert!(req.contains("Sec-WebSocket-Version: 13"));
    }

    fn accept_response(key: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            expected_accept(key)
        )
    }

    #[tokio::test]
    async fn handshake_succeeds_against_well_formed_server() {
        let (mut client, mut server) = duplex(4096);
        let handle = tokio::spawn(async move {
            perform_handshake(&mut client, "aa:bb:cc", "secret", "listener.example").await
        });

        // drain the request line, then respond
        let mut buf = vec![0u8; 4096];
        let n = server.read(&mut buf).await.unwrap();
        let req = String::from_utf8_lossy(&buf[..n]);
        let key = req
            .lines()
            .find(|l| l.starts_with("Sec-WebSocket-Key:"))
            .unwrap()
            .split_once(':')
            .unwrap()
            .1
            .trim()
            .to_string();

        server
            .write_all(accept_response(&key).as_bytes())
            .await
            .unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_accept_key() {
        let (mut client, mut server) = duplex(4096);
        let handle =
            tokio::spawn(
                async move { perform_handshake(&mut client, "mac", "key", "host").await },
            );

        let mut buf = vec![0u8; 4096];
        let _ = server.read(&mut buf).await.unwrap();
        server
            .write_all(accept_response("not-the-real-key").as_bytes())
            .await
            .unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::InvalidAcceptKey));
    }
}
