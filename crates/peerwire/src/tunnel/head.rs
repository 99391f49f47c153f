//! HTTP/1.1 heads and trailer blocks in text form.

use http::header::{CONNECTION, HeaderMap, HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{Request, StatusCode, Version, request};

use super::errors::TunnelError;

/// Most fields accepted in one head or trailer block.
const MAX_FIELDS: usize = 64;

const KEEP_ALIVE: &str = "keep-alive";

/// Parses a request head from the start of `buf`.
///
/// Returns the head and its length in bytes, or `None` while more input is
/// needed.
pub(super) fn parse_request(buf: &[u8]) -> Result<Option<(request::Parts, usize)>, TunnelError> {
    let mut fields = [httparse::EMPTY_HEADER; MAX_FIELDS];
    let mut parsed = httparse::Request::new(&mut fields);
    let httparse::Status::Complete(length) = parsed.parse(buf)? else {
        return Ok(None);
    };
    let version = if parsed.version == Some(0) {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    };
    let (mut parts, ()) = Request::builder()
        .method(parsed.method.unwrap_or_default())
        .uri(parsed.path.unwrap_or("/"))
        .version(version)
        .body(())?
        .into_parts();
    parts.headers = field_map(parsed.headers)?;
    Ok(Some((parts, length)))
}

/// Parses a complete response head.
pub(super) fn parse_response(buf: &[u8]) -> Result<(StatusCode, HeaderMap), TunnelError> {
    let mut fields = [httparse::EMPTY_HEADER; MAX_FIELDS];
    let mut parsed = httparse::Response::new(&mut fields);
    if parsed.parse(buf)?.is_partial() {
        return Err(TunnelError::TruncatedHead);
    }
    let status = StatusCode::from_u16(parsed.code.unwrap_or_default()).map_err(http::Error::from)?;
    Ok((status, field_map(parsed.headers)?))
}

/// Parses a block of `name: value` lines ended by an empty line.
pub(super) fn parse_fields(buf: &[u8]) -> Result<HeaderMap, TunnelError> {
    let mut fields = [httparse::EMPTY_HEADER; MAX_FIELDS];
    match httparse::parse_headers(buf, &mut fields)? {
        httparse::Status::Complete((_, parsed)) => field_map(parsed),
        httparse::Status::Partial => Err(TunnelError::TruncatedHead),
    }
}

pub(super) fn encode_request(parts: &request::Parts) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", parts.method, parts.uri).into_bytes();
    encode_fields(&mut head, &parts.headers);
    head
}

pub(super) fn encode_response(status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or_default()
    )
    .into_bytes();
    encode_fields(&mut head, headers);
    head
}

/// Appends every field and the terminating empty line.
pub(super) fn encode_fields(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// Drops the fields that describe one hop rather than the message.
pub(super) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
    headers.remove(KEEP_ALIVE);
}

fn field_map(fields: &[httparse::Header<'_>]) -> Result<HeaderMap, TunnelError> {
    let mut map = HeaderMap::with_capacity(fields.len());
    for field in fields {
        let name = HeaderName::from_bytes(field.name.as_bytes()).map_err(http::Error::from)?;
        let value = HeaderValue::from_bytes(field.value).map_err(http::Error::from)?;
        map.append(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http::header::CONTENT_LENGTH;

    use super::*;

    #[test]
    fn request_head_waits_for_the_blank_line() {
        let partial = b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n";
        assert!(parse_request(partial).expect("parse").is_none());

        let complete = b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (parts, length) = parse_request(complete).expect("parse").expect("complete");
        assert_eq!(parts.method, Method::POST);
        assert_eq!(parts.uri.path(), "/upload");
        assert_eq!(parts.headers.get(CONTENT_LENGTH).map(HeaderValue::as_bytes), Some(&b"5"[..]));
        assert_eq!(complete.get(length..), Some(&b"hello"[..]));
    }

    #[test]
    fn encoded_request_parses_back() {
        let (parts, _) = parse_request(b"GET /a?b=c HTTP/1.1\r\nHost: gw\r\nX-Trace: 7\r\n\r\n")
            .expect("parse")
            .expect("complete");
        let encoded = encode_request(&parts);
        let (again, length) = parse_request(&encoded).expect("parse").expect("complete");
        assert_eq!(length, encoded.len());
        assert_eq!(again.uri, parts.uri);
        assert_eq!(again.headers, parts.headers);
    }

    #[test]
    fn response_head_keeps_status_and_fields() {
        let mut headers = HeaderMap::new();
        headers.insert("x-xss-protection", HeaderValue::from_static("0"));
        let encoded = encode_response(StatusCode::NOT_FOUND, &headers);
        assert!(encoded.starts_with(b"HTTP/1.1 404 Not Found\r\n"));

        let (status, parsed) = parse_response(&encoded).expect("parse");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parsed, headers);
    }

    #[test]
    fn truncated_response_head_is_rejected() {
        let error = parse_response(b"HTTP/1.1 200 OK\r\nX-A: 1\r\n").expect_err("partial");
        assert!(matches!(error, TunnelError::TruncatedHead));
    }

    #[test]
    fn garbage_is_not_a_request() {
        let error = parse_request(b"\x00\x01 nonsense\r\n\r\n").expect_err("garbage");
        assert!(matches!(error, TunnelError::Parse(_)));
    }

    #[test]
    fn trailer_block_parses() {
        let trailer = parse_fields(b"X-Checksum: abc\r\nX-Count: 2\r\n\r\n").expect("parse");
        assert_eq!(trailer.len(), 2);
        assert_eq!(trailer.get("x-count"), Some(&HeaderValue::from_static("2")));
    }

    #[test]
    fn hop_by_hop_fields_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(KEEP_ALIVE, HeaderValue::from_static("timeout=5"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("3"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(CONTENT_LENGTH));
    }
}
