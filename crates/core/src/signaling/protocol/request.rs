use std::fmt;

use crate::error::{ParseErrorKind, Result, ScreencastError};

/// RTSP methods this server answers. Anything else is carried verbatim so the
/// 501 reply can be logged with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    Other(String),
}

impl Method {
    /// Value of the `Public` header in OPTIONS replies.
    pub const PUBLIC: &'static str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

    fn from_token(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request line and headers of one client request. The connection reads any
/// body itself, sized by [`content_length`](Self::content_length).
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

fn malformed(kind: ParseErrorKind) -> ScreencastError {
    ScreencastError::Parse { kind }
}

impl RtspRequest {
    /// Parse a request head. Leading blank lines are skipped and parsing
    /// stops at the first blank line after the request line.
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head
            .lines()
            .map(str::trim_end)
            .skip_while(|line| line.is_empty());

        let request_line = lines
            .next()
            .ok_or_else(|| malformed(ParseErrorKind::EmptyRequest))?;
        let tokens: Vec<&str> = request_line.split_whitespace().collect();
        let &[method, uri, version] = tokens.as_slice() else {
            return Err(malformed(ParseErrorKind::InvalidRequestLine));
        };
        if !version.starts_with("RTSP/") {
            return Err(malformed(ParseErrorKind::InvalidRequestLine));
        }

        let headers = lines
            .take_while(|line| !line.is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .ok_or_else(|| malformed(ParseErrorKind::InvalidHeader))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            method: Method::from_token(method),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The `CSeq` to echo, `"0"` when the client sent none.
    pub fn cseq(&self) -> &str {
        self.header("CSeq").unwrap_or("0")
    }

    pub fn transport(&self) -> Option<&str> {
        self.header("Transport")
    }

    /// Session id without its `;timeout=` parameter.
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_of_a_mount() {
        let req = RtspRequest::parse(
            "DESCRIBE rtsp://192.168.1.20:9999/2 RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.method, Method::Describe);
        assert_eq!(req.uri, "rtsp://192.168.1.20:9999/2");
        assert_eq!(req.cseq(), "2");
        assert_eq!(req.header("accept"), Some("application/sdp"));
        assert_eq!(req.content_length(), 0);
    }

    #[test]
    fn setup_carries_transport_and_session() {
        let req = RtspRequest::parse(
            "SETUP rtsp://h:9999/1/stream=1 RTSP/1.0\r\n\
             cseq: 4\r\n\
             Transport: RTP/AVP;unicast;client_port=8002-8003\r\n\
             Session: 00000000DEADBEEF;timeout=60\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.cseq(), "4");
        assert_eq!(req.transport(), Some("RTP/AVP;unicast;client_port=8002-8003"));
        assert_eq!(req.session_id(), Some("00000000DEADBEEF"));
    }

    #[test]
    fn leading_blank_lines_are_skipped() {
        let req = RtspRequest::parse("\r\n\r\nOPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.uri, "*");
    }

    #[test]
    fn unknown_methods_are_kept() {
        let req = RtspRequest::parse("RECORD rtsp://h/1 RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Other("RECORD".to_string()));
        assert_eq!(req.method.to_string(), "RECORD");
        assert_eq!(req.cseq(), "0");
    }

    #[test]
    fn malformed_heads() {
        let kind = |raw: &str| match RtspRequest::parse(raw) {
            Err(ScreencastError::Parse { kind }) => kind,
            other => panic!("expected a parse error, got {other:?}"),
        };
        assert_eq!(kind(""), ParseErrorKind::EmptyRequest);
        assert_eq!(kind("PLAY\r\n\r\n"), ParseErrorKind::InvalidRequestLine);
        assert_eq!(kind("PLAY rtsp://h/1 RTSP/1.0 x\r\n\r\n"), ParseErrorKind::InvalidRequestLine);
        assert_eq!(kind("GET / HTTP/1.1\r\n\r\n"), ParseErrorKind::InvalidRequestLine);
        assert_eq!(kind("OPTIONS * RTSP/1.0\r\nno colon\r\n\r\n"), ParseErrorKind::InvalidHeader);
    }

    #[test]
    fn keepalive_body_length() {
        let req = RtspRequest::parse(
            "GET_PARAMETER rtsp://h/1 RTSP/1.0\r\nCSeq: 9\r\nContent-Length: 12\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.method, Method::GetParameter);
        assert_eq!(req.content_length(), 12);
    }
}
