use std::fmt::Write as _;

/// Value of the `Server` header on every reply.
pub const SERVER_AGENT: &str = concat!("screencast-rtsp/", env!("CARGO_PKG_VERSION"));

/// Status codes this server answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    /// No mount, or no stream, at the request URI.
    NotFound,
    SessionNotFound,
    /// PAUSE on a session that never played.
    MethodNotValidInState,
    /// The mount does not offer the requested lower transport.
    UnsupportedTransport,
    InternalError,
    NotImplemented,
    /// The session pool is full.
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::SessionNotFound => 454,
            Self::MethodNotValidInState => 455,
            Self::UnsupportedTransport => 461,
            Self::InternalError => 500,
            Self::NotImplemented => 501,
            Self::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::SessionNotFound => "Session Not Found",
            Self::MethodNotValidInState => "Method Not Valid in This State",
            Self::UnsupportedTransport => "Unsupported Transport",
            Self::InternalError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// A reply to one request.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status: Status,
    headers: Vec<(&'static str, String)>,
    sdp: Option<String>,
}

impl RtspResponse {
    /// Reply echoing the request's `CSeq`.
    pub fn reply(status: Status, cseq: &str) -> Self {
        Self::bare(status).header("CSeq", cseq)
    }

    /// Reply to something that could not be parsed, so has no `CSeq`.
    pub fn bare(status: Status) -> Self {
        Self {
            status,
            headers: vec![("Server", SERVER_AGENT.to_string())],
            sdp: None,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Attach a session description as the body.
    pub fn sdp(mut self, sdp: String) -> Self {
        self.sdp = Some(sdp);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&str> {
        self.sdp.as_deref()
    }

    /// Status line, headers and body as sent on the wire.
    pub fn to_wire(&self) -> String {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status.code(), self.status.reason());
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        if let Some(sdp) = &self.sdp {
            let _ = write!(
                out,
                "Content-Type: application/sdp\r\nContent-Length: {}\r\n",
                sdp.len()
            );
        }
        out.push_str("\r\n");
        if let Some(sdp) = &self.sdp {
            out.push_str(sdp);
        }
        out
    }
}
