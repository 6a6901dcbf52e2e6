use std::net::SocketAddr;

use crate::signaling::media::{MediaTable, stream_index};
use crate::signaling::protocol::request::{Method, RtspRequest};
use crate::signaling::protocol::response::{RtspResponse, Status};
use crate::signaling::session::transport::TransportHeader;
use crate::signaling::session::{SessionManager, SessionState, Transport};

/// What the connection must do after a response has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The client tore a session down; its disconnect is due.
    TornDown,
}

/// Handles RTSP method requests for a single TCP connection.
///
/// Remembers the sessions created and the mounts described on this
/// connection so both can be released when it drops.
pub struct MethodHandler {
    session_manager: SessionManager,
    media: MediaTable,
    client_addr: SocketAddr,
    session_ids: Vec<String>,
    /// Mount paths whose media this connection built or read with DESCRIBE.
    described: Vec<String>,
}

impl MethodHandler {
    pub fn new(session_manager: SessionManager, media: MediaTable, client_addr: SocketAddr) -> Self {
        MethodHandler {
            session_manager,
            media,
            client_addr,
            session_ids: Vec::new(),
            described: Vec::new(),
        }
    }

    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    pub fn handle(&mut self, request: &RtspRequest) -> (RtspResponse, Outcome) {
        let cseq = request.cseq();

        let response = match &request.method {
            Method::Options => {
                tracing::debug!(%cseq, "OPTIONS");
                RtspResponse::reply(Status::Ok, cseq).header("Public", Method::PUBLIC)
            }
            Method::Describe => self.handle_describe(cseq, &request.uri),
            Method::Setup => self.handle_setup(cseq, request),
            Method::Play => self.handle_play(cseq, request),
            Method::Pause => self.handle_pause(cseq, request),
            Method::Teardown => return self.handle_teardown(cseq, request),
            Method::GetParameter => self.handle_get_parameter(cseq, request),
            Method::Other(method) => {
                tracing::warn!(%method, %cseq, "unsupported RTSP method");
                RtspResponse::reply(Status::NotImplemented, cseq)
            }
        };
        (response, Outcome::Continue)
    }

    /// Host clients used to reach us (`rtsp://host:9999/1` gives `host`),
    /// or the client's own address when the URI names none.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        uri.strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map_or_else(|| self.client_addr.ip().to_string(), str::to_string)
    }

    fn handle_describe(&mut self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let Some(media) = self.media.resolve_from_uri(uri) else {
            tracing::warn!(uri, "DESCRIBE for unknown mount");
            return RtspResponse::reply(Status::NotFound, cseq);
        };

        let host = self.host_from_uri_or_client(uri);
        match media.describe(&host) {
            Ok(sdp) => {
                if !self.described.iter().any(|path| path == media.path()) {
                    self.described.push(media.path().to_string());
                }
                RtspResponse::reply(Status::Ok, cseq)
                    .header("Content-Base", format!("{}/", uri.trim_end_matches('/')))
                    .sdp(sdp)
            }
            Err(e) => {
                tracing::error!(path = %media.path(), error = %e, "cannot build media");
                RtspResponse::reply(Status::InternalError, cseq)
            }
        }
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(media) = self.media.resolve_from_uri(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP for unknown mount");
            return RtspResponse::reply(Status::NotFound, cseq);
        };

        let stream_count = media.entry().description().payloaders().len();
        let Some(stream) = stream_index(&request.uri).filter(|&s| usize::from(s) < stream_count)
        else {
            tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
            return RtspResponse::reply(Status::NotFound, cseq);
        };

        let Some(client_transport) = request.transport().and_then(TransportHeader::parse) else {
            tracing::warn!(%cseq, transport = ?request.transport(), "SETUP without a usable Transport header");
            return RtspResponse::reply(Status::BadRequest, cseq);
        };

        let offered = media.entry().transport();
        if client_transport.lower() != offered {
            tracing::warn!(%cseq, requested = %client_transport.lower(), %offered, "transport not offered on this mount");
            return RtspResponse::reply(Status::UnsupportedTransport, cseq)
                .header("Unsupported", format!("lower transport {}", client_transport.lower()));
        }

        let session = match request.session_id() {
            Some(id) => match self.session_manager.get_session(id) {
                Some(s) if s.mount_path == media.path() => s,
                _ => {
                    tracing::warn!(session_id = id, "SETUP for unknown session");
                    return RtspResponse::reply(Status::SessionNotFound, cseq);
                }
            },
            None => {
                let Some(session) = self.session_manager.create_session(media.path()) else {
                    return RtspResponse::reply(Status::ServiceUnavailable, cseq);
                };
                if let Err(e) = media.add_session(&session.id) {
                    tracing::error!(path = %media.path(), error = %e, "cannot build media");
                    self.session_manager.remove_session(&session.id);
                    return RtspResponse::reply(Status::InternalError, cseq);
                }
                self.session_ids.push(session.id.clone());
                session
            }
        };

        let transport = match client_transport {
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let (server_rtp_port, server_rtcp_port) =
                    self.session_manager.allocate_server_ports();
                Transport::Udp {
                    client_rtp_port,
                    client_rtcp_port,
                    server_rtp_port,
                    server_rtcp_port,
                }
            }
            TransportHeader::Interleaved { channels } => {
                let (rtp_channel, rtcp_channel) =
                    channels.unwrap_or((stream * 2, stream * 2 + 1));
                Transport::Interleaved {
                    rtp_channel,
                    rtcp_channel,
                }
            }
        };

        let transport_response = transport.response_header();
        session.set_transport(stream, transport);

        tracing::info!(
            session_id = %session.id,
            mount = %media.path(),
            stream,
            transport = %transport_response,
            "stream set up"
        );

        RtspResponse::reply(Status::Ok, cseq)
            .header("Transport", transport_response)
            .header("Session", session.session_header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = request
            .session_id()
            .and_then(|id| self.session_manager.get_session(id))
        else {
            tracing::warn!(%cseq, session_id = ?request.session_id(), "PLAY without a known session");
            return RtspResponse::reply(Status::SessionNotFound, cseq);
        };

        if let Some(media) = self.media.get(&session.mount_path)
            && let Err(e) = media.play(&session.id)
        {
            tracing::error!(session_id = %session.id, error = %e, "cannot start media");
            return RtspResponse::reply(Status::InternalError, cseq);
        }

        session.set_state(SessionState::Playing);
        tracing::info!(session_id = %session.id, "session started playing");

        RtspResponse::reply(Status::Ok, cseq)
            .header("Session", session.session_header_value())
            .header("Range", "npt=now-")
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = request
            .session_id()
            .and_then(|id| self.session_manager.get_session(id))
        else {
            tracing::warn!(%cseq, session_id = ?request.session_id(), "PAUSE without a known session");
            return RtspResponse::reply(Status::SessionNotFound, cseq);
        };

        if session.state() == SessionState::Ready {
            tracing::warn!(session_id = %session.id, "PAUSE before PLAY");
            return RtspResponse::reply(Status::MethodNotValidInState, cseq)
                .header("Allow", "SETUP, PLAY, TEARDOWN");
        }

        if let Some(media) = self.media.get(&session.mount_path)
            && let Err(e) = media.pause(&session.id)
        {
            tracing::error!(session_id = %session.id, error = %e, "cannot pause media");
            return RtspResponse::reply(Status::InternalError, cseq);
        }

        session.set_state(SessionState::Paused);
        tracing::info!(session_id = %session.id, "session paused");
        RtspResponse::reply(Status::Ok, cseq).header("Session", session.session_header_value())
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> (RtspResponse, Outcome) {
        let removed = request
            .session_id()
            .and_then(|id| self.session_manager.remove_session(id));

        let Some(session) = removed else {
            tracing::warn!(%cseq, session_id = ?request.session_id(), "TEARDOWN without a known session");
            return (
                RtspResponse::reply(Status::SessionNotFound, cseq),
                Outcome::Continue,
            );
        };

        if let Some(media) = self.media.get(&session.mount_path) {
            media.remove_session(&session.id);
        }
        self.session_ids.retain(|id| *id != session.id);
        tracing::info!(session_id = %session.id, "session terminated via TEARDOWN");
        (RtspResponse::reply(Status::Ok, cseq), Outcome::TornDown)
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let resp = RtspResponse::reply(Status::Ok, cseq);
        match request
            .session_id()
            .and_then(|id| self.session_manager.get_session(id))
        {
            Some(session) => resp.header("Session", session.session_header_value()),
            None => resp,
        }
    }

    /// Remove every session this connection still owns, then release media
    /// it described that nobody else is using. Returns the number of
    /// sessions removed.
    pub fn release_sessions(&mut self) -> usize {
        let orphaned = std::mem::take(&mut self.session_ids);
        let removed = self.session_manager.remove_sessions(&orphaned);
        for session in &removed {
            if let Some(media) = self.media.get(&session.mount_path) {
                media.remove_session(&session.id);
            }
        }

        for path in std::mem::take(&mut self.described) {
            if let Some(media) = self.media.get(&path)
                && media.release_if_idle()
            {
                tracing::debug!(path, "released media described by a departed client");
            }
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, LowerTransport, StreamProfile};
    use crate::events::{SessionEventTracker, SessionObserver};
    use crate::mount::MountRegistry;
    use crate::pipeline::PipelineDescriptionBuilder;
    use crate::pipeline::state::PipelineState;
    use std::sync::Arc;

    fn handler(transport: LowerTransport, max_sessions: usize) -> MethodHandler {
        let encoder = EncoderConfig::new(true);
        let builder = PipelineDescriptionBuilder::new(&encoder, 0, Some("dev"));
        let mut mounts = MountRegistry::new(transport);
        mounts
            .register(
                "/1",
                builder.build(&StreamProfile::new(1920, 1080, 4000, "/1").with_audio(true)),
            )
            .unwrap();
        let observer: Arc<dyn SessionObserver> = Arc::new(SessionEventTracker::new());
        MethodHandler::new(
            SessionManager::new(max_sessions),
            MediaTable::new(&mounts, &observer),
            "127.0.0.1:50000".parse().unwrap(),
        )
    }

    fn request(raw: &str) -> RtspRequest {
        RtspRequest::parse(raw).unwrap()
    }

    fn setup(h: &mut MethodHandler, uri: &str, transport: &str, session: Option<&str>) -> RtspResponse {
        let mut raw = format!("SETUP {uri} RTSP/1.0\r\nCSeq: 3\r\nTransport: {transport}\r\n");
        if let Some(id) = session {
            raw.push_str(&format!("Session: {id}\r\n"));
        }
        raw.push_str("\r\n");
        h.handle(&request(&raw)).0
    }

    fn session_of(resp: &RtspResponse) -> String {
        let value = resp.header_value("Session").unwrap();
        value.split(';').next().unwrap().to_string()
    }

    #[test]
    fn describe_known_and_unknown() {
        let mut h = handler(LowerTransport::Udp, 4);
        let (resp, _) = h.handle(&request("DESCRIBE rtsp://127.0.0.1:9999/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n"));
        assert_eq!(resp.status.code(), 200);
        let body = resp.body().unwrap();
        assert!(body.contains("c=IN IP4 127.0.0.1"));
        assert!(body.contains("a=control:stream=1"));

        let (resp, _) = h.handle(&request("DESCRIBE rtsp://127.0.0.1:9999/9 RTSP/1.0\r\nCSeq: 3\r\n\r\n"));
        assert_eq!(resp.status.code(), 404);
    }

    #[test]
    fn setup_two_streams_into_one_session() {
        let mut h = handler(LowerTransport::Udp, 4);
        let first = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8000-8001", None);
        assert_eq!(first.status.code(), 200);
        let id = session_of(&first);

        let second = setup(&mut h, "rtsp://h:9999/1/stream=1", "RTP/AVP;unicast;client_port=8002-8003", Some(&id));
        assert_eq!(second.status.code(), 200);
        assert_eq!(session_of(&second), id);
        assert_eq!(h.session_ids().len(), 1);
        assert_eq!(h.session_manager.get_session(&id).unwrap().stream_count(), 2);
    }

    #[test]
    fn setup_rejects_wrong_transport() {
        let mut h = handler(LowerTransport::Udp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP/TCP;unicast;interleaved=0-1", None);
        assert_eq!(resp.status.code(), 461);

        let mut h = handler(LowerTransport::Tcp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8000-8001", None);
        assert_eq!(resp.status.code(), 461);
        assert!(h.session_ids().is_empty());
    }

    #[test]
    fn interleaved_channels_default_per_stream() {
        let mut h = handler(LowerTransport::Tcp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=1", "RTP/AVP/TCP;unicast", None);
        assert_eq!(resp.status.code(), 200);
        assert_eq!(
            resp.header_value("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=2-3")
        );
    }

    #[test]
    fn setup_unknown_stream_is_not_found() {
        let mut h = handler(LowerTransport::Udp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=5", "RTP/AVP;unicast;client_port=8000-8001", None);
        assert_eq!(resp.status.code(), 404);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=x", "RTP/AVP;unicast;client_port=8000-8001", None);
        assert_eq!(resp.status.code(), 404);
        assert!(h.session_ids().is_empty());
    }

    #[test]
    fn setup_without_suffix_is_stream_zero() {
        let mut h = handler(LowerTransport::Tcp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1", "RTP/AVP/TCP;unicast", None);
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(
            resp.header_value("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=0-1")
        );
    }

    #[test]
    fn describe_only_client_releases_media_on_close() {
        let mut h = handler(LowerTransport::Udp, 4);
        let (resp, _) = h.handle(&request("DESCRIBE rtsp://127.0.0.1:9999/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n"));
        assert_eq!(resp.status, Status::Ok);
        let media = h.media.get("/1").unwrap();
        assert!(media.is_constructed());

        assert_eq!(h.release_sessions(), 0);
        assert!(!media.is_constructed());
    }

    #[test]
    fn pause_before_play_is_455() {
        let mut h = handler(LowerTransport::Udp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8000-8001", None);
        let id = session_of(&resp);
        let (resp, _) = h.handle(&request(&format!("PAUSE rtsp://h:9999/1/ RTSP/1.0\r\nCSeq: 4\r\nSession: {id}\r\n\r\n")));
        assert_eq!(resp.status, Status::MethodNotValidInState);
        assert_eq!(resp.header_value("Allow"), Some("SETUP, PLAY, TEARDOWN"));
    }

    #[test]
    fn full_pool_is_unavailable() {
        let mut h = handler(LowerTransport::Udp, 1);
        let ok = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8000-8001", None);
        assert_eq!(ok.status.code(), 200);
        let full = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8002-8003", None);
        assert_eq!(full.status.code(), 503);
    }

    #[test]
    fn play_pause_teardown() {
        let mut h = handler(LowerTransport::Udp, 4);
        let resp = setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8000-8001", None);
        let id = session_of(&resp);
        let media = h.media.get("/1").unwrap();

        let (resp, _) = h.handle(&request(&format!("PLAY rtsp://h:9999/1/ RTSP/1.0\r\nCSeq: 4\r\nSession: {id}\r\n\r\n")));
        assert_eq!(resp.status.code(), 200);
        assert_eq!(media.state(), PipelineState::Playing);

        let (resp, _) = h.handle(&request(&format!("PAUSE rtsp://h:9999/1/ RTSP/1.0\r\nCSeq: 5\r\nSession: {id}\r\n\r\n")));
        assert_eq!(resp.status.code(), 200);
        assert_eq!(media.state(), PipelineState::Paused);

        let (resp, outcome) = h.handle(&request(&format!("TEARDOWN rtsp://h:9999/1/ RTSP/1.0\r\nCSeq: 6\r\nSession: {id}\r\n\r\n")));
        assert_eq!(resp.status.code(), 200);
        assert_eq!(outcome, Outcome::TornDown);
        assert!(!media.is_constructed());
        assert!(h.session_ids().is_empty());
    }

    #[test]
    fn unknown_session_is_454() {
        let mut h = handler(LowerTransport::Udp, 4);
        let (resp, outcome) = h.handle(&request("TEARDOWN rtsp://h/1 RTSP/1.0\r\nCSeq: 7\r\nSession: NOPE\r\n\r\n"));
        assert_eq!(resp.status.code(), 454);
        assert_eq!(outcome, Outcome::Continue);
        let (resp, _) = h.handle(&request("PLAY rtsp://h/1 RTSP/1.0\r\nCSeq: 8\r\n\r\n"));
        assert_eq!(resp.status.code(), 454);
    }

    #[test]
    fn release_sessions_frees_media() {
        let mut h = handler(LowerTransport::Udp, 4);
        setup(&mut h, "rtsp://h:9999/1/stream=0", "RTP/AVP;unicast;client_port=8000-8001", None);
        assert_eq!(h.release_sessions(), 1);
        assert!(h.session_manager.is_empty());
        assert!(!h.media.get("/1").unwrap().is_constructed());
    }

    #[test]
    fn unsupported_method() {
        let mut h = handler(LowerTransport::Udp, 4);
        let (resp, _) = h.handle(&request("RECORD rtsp://h/1 RTSP/1.0\r\nCSeq: 9\r\n\r\n"));
        assert_eq!(resp.status.code(), 501);
    }
}
