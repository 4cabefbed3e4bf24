//! HTTP/1.1 upgrade handshake (RFC 6455 §4).

use std::io::{ErrorKind, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::BytesMut;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{FrameError, Result};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the upgrade request/response header block.
pub const MAX_HANDSHAKE_SIZE: usize = 8 * 1024;

const READ_CHUNK_SIZE: usize = 1024;

/// Generate a fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// Compute `Sec-WebSocket-Accept` for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// A validated client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub resource: String,
    pub host: Option<String>,
    pub key: String,
    pub protocols: Vec<String>,
}

/// Build the client's upgrade request.
pub fn build_request(host: &str, resource: &str, key: &str) -> String {
    format!(
        "GET {resource} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Build the server's `101 Switching Protocols` answer.
pub fn build_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

/// Build an error answer for a rejected upgrade.
pub fn build_rejection(status: u16, reason: &str) -> String {
    let extra = if status == 426 {
        "Sec-WebSocket-Version: 13\r\n"
    } else {
        ""
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         {extra}\
         Connection: close\r\n\
         Content-Length: 0\r\n\
         \r\n"
    )
}

/// Parse and validate an upgrade request.
///
/// Returns `Ok(None)` until the full header block has arrived; on success
/// also returns how many bytes the header block used.
pub fn parse_request(src: &[u8]) -> Result<Option<(UpgradeRequest, usize)>> {
    let Some((head, consumed)) = split_head(src)? else {
        return Ok(None);
    };
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split_whitespace();
    let (method, resource, version) = (parts.next(), parts.next(), parts.next());
    if method != Some("GET") {
        return Err(handshake_err(format!(
            "expected GET request, got '{request_line}'"
        )));
    }
    if version != Some("HTTP/1.1") {
        return Err(handshake_err(format!(
            "unsupported HTTP version in '{request_line}'"
        )));
    }
    let resource = resource.unwrap_or("/").to_string();

    let headers = parse_headers(lines)?;
    if !header_has_token(&headers, "upgrade", "websocket") {
        return Err(handshake_err("missing 'Upgrade: websocket'"));
    }
    if !header_has_token(&headers, "connection", "upgrade") {
        return Err(handshake_err("missing 'Connection: upgrade'"));
    }
    match header(&headers, "sec-websocket-version") {
        Some("13") => {}
        other => {
            return Err(handshake_err(format!(
                "unsupported websocket version {}",
                other.unwrap_or("<none>")
            )))
        }
    }
    let key = header(&headers, "sec-websocket-key")
        .filter(|k| !k.is_empty())
        .ok_or_else(|| handshake_err("missing Sec-WebSocket-Key"))?
        .to_string();
    let protocols = header(&headers, "sec-websocket-protocol")
        .map(|v| {
            v.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Some((
        UpgradeRequest {
            resource,
            host: header(&headers, "host").map(str::to_string),
            key,
            protocols,
        },
        consumed,
    )))
}

/// Parse the server's answer and verify the accept key.
///
/// Returns `Ok(None)` until the full header block has arrived, otherwise
/// the number of bytes the header block used.
pub fn parse_response(src: &[u8], key: &str) -> Result<Option<usize>> {
    let Some((head, consumed)) = split_head(src)? else {
        return Ok(None);
    };
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if status != Some("101") {
        return Err(handshake_err(format!(
            "server refused upgrade: '{status_line}'"
        )));
    }

    let headers = parse_headers(lines)?;
    if !header_has_token(&headers, "upgrade", "websocket") {
        return Err(handshake_err("response missing 'Upgrade: websocket'"));
    }
    let expected = accept_key(key);
    match header(&headers, "sec-websocket-accept") {
        Some(accept) if accept == expected => Ok(Some(consumed)),
        Some(accept) => Err(handshake_err(format!(
            "Sec-WebSocket-Accept mismatch (got {accept}, expected {expected})"
        ))),
        None => Err(handshake_err("response missing Sec-WebSocket-Accept")),
    }
}

/// Run the client side of the handshake on a blocking stream.
///
/// Returns any bytes the server sent after its header block; they belong to
/// the first WebSocket frame.
pub fn client_handshake<S: Read + Write>(stream: &mut S, host: &str, resource: &str) -> Result<BytesMut> {
    let key = generate_key();
    write_all(stream, build_request(host, resource, &key).as_bytes())?;

    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        if let Some(consumed) = parse_response(&buf, &key)? {
            let _ = buf.split_to(consumed);
            tracing::debug!(host, resource, "websocket client handshake complete");
            return Ok(buf);
        }
        read_more(stream, &mut buf)?;
    }
}

/// Run the server side of the handshake on a blocking stream.
///
/// On validation failure a `400 Bad Request` is sent before the error is
/// returned.
pub fn server_handshake<S: Read + Write>(stream: &mut S) -> Result<(UpgradeRequest, BytesMut)> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        match parse_request(&buf) {
            Ok(Some((request, consumed))) => {
                write_all(stream, build_response(&accept_key(&request.key)).as_bytes())?;
                let _ = buf.split_to(consumed);
                tracing::debug!(resource = %request.resource, "websocket server handshake complete");
                return Ok((request, buf));
            }
            Ok(None) => read_more(stream, &mut buf)?,
            Err(err) => {
                let _ = write_all(stream, build_rejection(400, "Bad Request").as_bytes());
                return Err(err);
            }
        }
    }
}

fn split_head(src: &[u8]) -> Result<Option<(&str, usize)>> {
    let Some(end) = src.windows(4).position(|w| w == b"\r\n\r\n") else {
        if src.len() > MAX_HANDSHAKE_SIZE {
            return Err(handshake_err(format!(
                "header block exceeds {MAX_HANDSHAKE_SIZE} bytes"
            )));
        }
        return Ok(None);
    };
    if end + 4 > MAX_HANDSHAKE_SIZE {
        return Err(handshake_err(format!(
            "header block exceeds {MAX_HANDSHAKE_SIZE} bytes"
        )));
    }
    let head = std::str::from_utf8(&src[..end])
        .map_err(|_| handshake_err("header block is not valid UTF-8"))?;
    Ok(Some((head, end + 4)))
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Vec<(String, &'a str)>> {
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| handshake_err(format!("malformed header line '{line}'")))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim()));
    }
    Ok(headers)
}

fn header<'a>(headers: &[(String, &'a str)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
}

fn header_has_token(headers: &[(String, &str)], name: &str, token: &str) -> bool {
    headers
        .iter()
        .filter(|(n, _)| n == name)
        .flat_map(|(_, v)| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn read_more<S: Read>(stream: &mut S, buf: &mut BytesMut) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

fn write_all<S: Write>(stream: &mut S, bytes: &[u8]) -> Result<()> {
    stream.write_all(bytes)?;
    stream.flush()?;
    Ok(())
}

fn handshake_err(msg: impl Into<String>) -> FrameError {
    FrameError::Handshake(msg.into())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_16_byte_nonces() {
        let a = generate_key();
        let b = generate_key();
        assert_ne!(a, b);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 16);
    }

    #[test]
    fn request_roundtrip() {
        let raw = build_request("localhost:6969", "/esif", "dGhlIHNhbXBsZSBub25jZQ==");
        let (req, consumed) = parse_request(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(req.resource, "/esif");
        assert_eq!(req.host.as_deref(), Some("localhost:6969"));
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn request_headers_are_case_insensitive() {
        let raw = "GET / HTTP/1.1\r\n\
                   host: x\r\n\
                   UPGRADE: WebSocket\r\n\
                   connection: keep-alive, Upgrade\r\n\
                   sec-websocket-key: abc\r\n\
                   SEC-WEBSOCKET-VERSION: 13\r\n\
                   Sec-WebSocket-Protocol: esifrpc, other\r\n\r\n";
        let (req, _) = parse_request(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(req.key, "abc");
        assert_eq!(req.protocols, vec!["esifrpc", "other"]);
    }

    #[test]
    fn partial_request_waits() {
        let raw = build_request("h", "/", "k");
        assert!(parse_request(&raw.as_bytes()[..raw.len() - 2])
            .unwrap()
            .is_none());
    }

    #[test]
    fn request_validation_failures() {
        let cases = [
            "POST / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n\r\n",
            "GET / HTTP/1.1\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n\r\n",
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: close\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 13\r\n\r\n",
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: k\r\nSec-WebSocket-Version: 8\r\n\r\n",
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n",
            "GET / HTTP/1.1\r\nno colon here\r\n\r\n",
        ];
        for raw in cases {
            assert!(
                matches!(parse_request(raw.as_bytes()), Err(FrameError::Handshake(_))),
                "accepted: {raw:?}"
            );
        }
    }

    #[test]
    fn oversized_header_block_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HANDSHAKE_SIZE + 1));
        assert!(matches!(
            parse_request(&raw),
            Err(FrameError::Handshake(_))
        ));
    }

    #[test]
    fn response_accept_verified() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let good = build_response(&accept_key(key));
        assert_eq!(parse_response(good.as_bytes(), key).unwrap(), Some(good.len()));

        let bad = build_response("AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(parse_response(bad.as_bytes(), key).is_err());

        let refused = build_rejection(400, "Bad Request");
        assert!(parse_response(refused.as_bytes(), key).is_err());
    }

    #[test]
    fn client_and_server_handshake_over_socketpair() {
        let (mut client, mut server) = UnixStream::pair().unwrap();

        let server_thread = std::thread::spawn(move || {
            let (request, leftover) = server_handshake(&mut server).unwrap();
            std::io::Write::write_all(&mut server, b"\x82\x00").unwrap();
            (request, leftover)
        });

        let leftover = client_handshake(&mut client, "example:1", "/rpc").unwrap();
        let (request, server_leftover) = server_thread.join().unwrap();

        assert_eq!(request.resource, "/rpc");
        assert!(server_leftover.is_empty());
        // Bytes after the 101 may already be buffered or still in flight.
        assert!(leftover.is_empty() || leftover.as_ref() == b"\x82\x00");
    }

    #[test]
    fn leftover_bytes_are_returned() {
        let mut wire = build_request("h", "/", "k").into_bytes();
        wire.extend_from_slice(b"\x82\x01Z");
        let mut stream = ReadWrite {
            input: Cursor::new(wire),
            output: Vec::new(),
        };

        let (_, leftover) = server_handshake(&mut stream).unwrap();
        assert_eq!(leftover.as_ref(), b"\x82\x01Z");
        assert!(String::from_utf8(stream.output)
            .unwrap()
            .starts_with("HTTP/1.1 101"));
    }

    #[test]
    fn bad_request_answered_with_400() {
        let mut stream = ReadWrite {
            input: Cursor::new(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        assert!(server_handshake(&mut stream).is_err());
        assert!(String::from_utf8(stream.output)
            .unwrap()
            .starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn eof_during_handshake() {
        let mut stream = ReadWrite {
            input: Cursor::new(b"GET / HTTP/1.1\r\n".to_vec()),
            output: Vec::new(),
        };
        assert!(matches!(
            server_handshake(&mut stream),
            Err(FrameError::ConnectionClosed)
        ));
    }

    struct ReadWrite {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for ReadWrite {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ReadWrite {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
