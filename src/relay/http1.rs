//! HTTP/1.x head reading and rewriting for the relay
//!
//! The relay forwards connections byte-for-byte after the head, so heads are
//! kept as ordered name/value pairs rather than re-framed: the only edits
//! ever made are stripping the override request header and appending the
//! upstream response header.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CarouselError, Result};

/// Upper bound on one request or response head
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Read from `stream` into `buf` until a full head (terminated by a blank
/// line) is buffered; returns the head length in bytes
///
/// Bytes past the head stay in `buf` and belong to the body.
pub async fn read_head<R>(stream: &mut R, buf: &mut BytesMut) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(buf) {
            return Ok(end);
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(CarouselError::InvalidRequest(
                "header section too large".into(),
            ));
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(CarouselError::InvalidRequest(
                "connection closed before end of header section".into(),
            ));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// One parsed HTTP/1.x request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn parse(head: &[u8]) -> Result<Self> {
        let (first_line, headers) =
            parse_head(head).map_err(CarouselError::InvalidRequest)?;

        let mut parts = first_line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version))
                if !method.is_empty() && !target.is_empty() && version.starts_with("HTTP/") =>
            {
                Ok(Self {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: version.to_string(),
                    headers,
                })
            }
            _ => Err(CarouselError::InvalidRequest(format!(
                "bad request line: {:?}",
                first_line
            ))),
        }
    }

    /// Remove every occurrence of `name` (case-insensitive), returning the
    /// first value if any was present
    pub fn take_header(&mut self, name: &str) -> Option<String> {
        let mut first = None;
        self.headers.retain(|(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                if first.is_none() {
                    first = Some(v.clone());
                }
                false
            } else {
                true
            }
        });
        first
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(self.method.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.target.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.version.as_bytes());
        buf.put_slice(b"\r\n");
        encode_headers(&mut buf, &self.headers);
        buf.freeze()
    }
}

/// One parsed HTTP/1.x response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    /// Status code and reason phrase, e.g. "200 OK"
    pub status: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn parse(head: &[u8]) -> Result<Self> {
        let (first_line, headers) =
            parse_head(head).map_err(CarouselError::InvalidResponse)?;

        match first_line.split_once(' ') {
            Some((version, status)) if version.starts_with("HTTP/") && !status.is_empty() => {
                Ok(Self {
                    version: version.to_string(),
                    status: status.to_string(),
                    headers,
                })
            }
            _ => Err(CarouselError::InvalidResponse(format!(
                "bad status line: {:?}",
                first_line
            ))),
        }
    }

    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(self.version.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.status.as_bytes());
        buf.put_slice(b"\r\n");
        encode_headers(&mut buf, &self.headers);
        buf.freeze()
    }
}

fn parse_head(head: &[u8]) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let text =
        std::str::from_utf8(head).map_err(|_| "header section is not valid UTF-8".to_string())?;

    let mut lines = text.split("\r\n");
    let first_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| "empty header section".to_string())?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("bad header line: {:?}", line))?;
        if name.is_empty() || name.ends_with(' ') {
            return Err(format!("bad header name: {:?}", name));
        }
        headers.push((name.to_string(), value.trim_start().to_string()));
    }

    Ok((first_line, headers))
}

fn encode_headers(buf: &mut BytesMut, headers: &[(String, String)]) {
    for (name, value) in headers {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] =
        b"GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\nX-Carousel-Proxy: 10.0.0.1:3128\r\n\r\n";

    #[test]
    fn test_parse_request_head() {
        let head = RequestHead::parse(REQUEST).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "http://example.com/index.html");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.headers.len(), 2);
        assert_eq!(head.headers[0], ("Host".to_string(), "example.com".to_string()));
    }

    #[test]
    fn test_take_header_is_case_insensitive_and_removes_all() {
        let raw = b"GET / HTTP/1.1\r\nx-carousel-proxy: a:1\r\nHost: h\r\nX-CAROUSEL-PROXY: b:2\r\n\r\n";
        let mut head = RequestHead::parse(raw).unwrap();

        assert_eq!(head.take_header("X-Carousel-Proxy").unwrap(), "a:1");
        assert_eq!(head.headers.len(), 1);
        assert!(head.take_header("X-Carousel-Proxy").is_none());
    }

    #[test]
    fn test_request_encode_round_trip() {
        let head = RequestHead::parse(REQUEST).unwrap();
        let reparsed = RequestHead::parse(&head.encode()).unwrap();
        assert_eq!(head, reparsed);
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        assert!(RequestHead::parse(b"\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / FTP/1.0\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n").is_err());
    }

    #[test]
    fn test_parse_response_and_inject_header() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n";
        let mut head = ResponseHead::parse(raw).unwrap();
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.status, "200 OK");

        head.push_header("X-Carousel-Proxy", "10.0.0.1:3128");
        let encoded = head.encode();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.ends_with("X-Carousel-Proxy: 10.0.0.1:3128\r\n\r\n"));
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        assert!(ResponseHead::parse(b"200 OK\r\n\r\n").is_err());
        assert!(ResponseHead::parse(b"HTTP/1.1\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn test_read_head_keeps_body_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody",
        )
        .await
        .unwrap();

        let mut buf = BytesMut::new();
        let head_len = read_head(&mut server, &mut buf).await.unwrap();

        let head = RequestHead::parse(&buf[..head_len]).unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(&buf[head_len..], b"body");
    }

    #[tokio::test]
    async fn test_read_head_truncated_stream_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"GET / HTTP/1.1\r\nHost:")
            .await
            .unwrap();
        drop(client);

        let mut buf = BytesMut::new();
        let err = read_head(&mut server, &mut buf).await.unwrap_err();
        assert!(matches!(err, CarouselError::InvalidRequest(_)));
    }
}
