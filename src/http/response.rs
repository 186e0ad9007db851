//! Response writer producing the exact literal status lines and content types a HAP controller
//! expects on the wire.

/// A complete HTTP/1.1 response, ready to hand to [`crate::record_layer::RecordLayer::encrypt`].
pub struct Response {
    status_line: &'static str,
    content_type: Option<&'static str>,
    keep_alive: bool,
    body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn no_content() -> Self {
        Self {
            status_line: "HTTP/1.1 204 No Content",
            content_type: None,
            keep_alive: true,
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn json(status_line: &'static str, body: Vec<u8>) -> Self {
        Self {
            status_line,
            content_type: Some("application/hap+json"),
            keep_alive: true,
            body,
        }
    }

    #[must_use]
    pub fn tlv8(status_line: &'static str, body: Vec<u8>) -> Self {
        Self {
            status_line,
            content_type: Some("application/pairing+tlv8"),
            keep_alive: true,
            body,
        }
    }

    /// A `POST /resource` snapshot reply: whatever opaque bytes the application callback produced.
    #[must_use]
    pub fn resource(body: Vec<u8>) -> Self {
        Self {
            status_line: "HTTP/1.1 200 OK",
            content_type: Some("application/octet-stream"),
            keep_alive: true,
            body,
        }
    }

    /// An asynchronous `EVENT/1.0` notification frame, sent unsolicited to subscribed sessions.
    /// Not a reply to any request, so it carries no `Connection` header.
    #[must_use]
    pub fn event(body: Vec<u8>) -> Self {
        Self {
            status_line: "EVENT/1.0 200 OK",
            content_type: Some("application/hap+json"),
            keep_alive: false,
            body,
        }
    }

    /// Serialize to the exact bytes that cross the record layer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 64);
        out.extend_from_slice(self.status_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = self.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        if self.keep_alive {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}
