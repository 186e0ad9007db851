//! Hand-rolled HTTP/1.1 request-line + header + body parser.
//!
//! Record-layer plaintext arrives already de-framed by [`crate::record_layer::RecordLayer`], so
//! this parser only needs to handle a `Content-Length` body; HAP never sends chunked bodies.

use std::collections::HashMap;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            _ => Err(Error::Protocol("unsupported HTTP method")),
        }
    }
}

/// A fully parsed HAP request: method, path (with query string split off), and body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

struct Head {
    method: HttpMethod,
    path: String,
    query: HashMap<String, String>,
    content_length: usize,
    header_len: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>, Error> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::Protocol("HTTP request is not valid UTF-8"))?;
    let Some((head, _)) = text.split_once("\r\n\r\n") else {
        return Ok(None);
    };
    let header_len = head.len() + 4;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(Error::Protocol("empty HTTP request"))?;
    let mut parts = request_line.split(' ');
    let method = HttpMethod::parse(parts.next().ok_or(Error::Protocol("missing HTTP method"))?)?;
    let target = parts.next().ok_or(Error::Protocol("missing HTTP target"))?;

    let (path, query) = match target.split_once('?') {
        Some((path, query_string)) => (path.to_string(), parse_query(query_string)),
        None => (target.to_string(), HashMap::new()),
    };

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::Protocol("invalid Content-Length"))?;
            }
        }
    }

    Ok(Some(Head {
        method,
        path,
        query,
        content_length,
        header_len,
    }))
}

impl Request {
    /// Parse one complete HTTP/1.1 request out of de-framed plaintext.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the request line, headers, or declared body length don't
    /// parse, or if the buffer doesn't yet contain the whole body (the caller is expected to
    /// accumulate plaintext across record-layer calls before invoking this).
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let head = parse_head(buf)?.ok_or(Error::Protocol("HTTP request missing header terminator"))?;
        let body = &buf[head.header_len..];
        if body.len() < head.content_length {
            return Err(Error::Protocol("HTTP body shorter than Content-Length"));
        }
        Ok(Self {
            method: head.method,
            path: head.path,
            query: head.query,
            body: body[..head.content_length].to_vec(),
        })
    }

    /// Parse one complete request, tolerating an incomplete buffer.
    ///
    /// Returns `Ok(None)` when the header terminator hasn't arrived yet, or the body isn't
    /// fully buffered yet — the caller should feed more bytes and retry. Returns
    /// `Ok(Some((request, consumed)))` on success, where `consumed` is the number of leading
    /// bytes of `buf` the request occupied (any trailing bytes belong to the next request).
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] for malformed HTTP framing (not for an incomplete buffer).
    pub fn try_parse(buf: &[u8]) -> Result<Option<(Self, usize)>, Error> {
        let Some(head) = parse_head(buf)? else {
            return Ok(None);
        };
        let body_available = buf.len() - head.header_len;
        if body_available < head.content_length {
            return Ok(None);
        }
        let body_start = head.header_len;
        let body_end = body_start + head.content_length;
        Ok(Some((
            Self {
                method: head.method,
                path: head.path,
                query: head.query,
                body: buf[body_start..body_end].to_vec(),
            },
            body_end,
        )))
    }
}

fn parse_query(query_string: &str) -> HashMap<String, String> {
    query_string
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_query_string() {
        let raw = b"GET /characteristics?id=1.2,1.3 HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "/characteristics");
        assert_eq!(req.query.get("id").unwrap(), "1.2,1.3");
    }

    #[test]
    fn parses_put_with_body() {
        let body = br#"{"characteristics":[]}"#;
        let mut raw = format!("PUT /characteristics HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        raw.extend_from_slice(body);

        let req = Request::parse(&raw).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.body, body);
    }

    #[test]
    fn rejects_body_shorter_than_declared_length() {
        let raw = b"PUT /characteristics HTTP/1.1\r\nContent-Length: 100\r\n\r\n{}";
        assert!(Request::parse(raw).is_err());
    }
}
