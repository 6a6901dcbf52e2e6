use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::events::SessionObserver;
use crate::signaling::media::MediaTable;
use crate::signaling::protocol::{MethodHandler, Outcome, RtspRequest, RtspResponse, Status};
use crate::signaling::session::SessionManager;

/// Upper bound on a request line plus headers.
const MAX_HEAD_LEN: usize = 8 * 1024;

/// Upper bound on a request body.
const MAX_BODY_LEN: usize = 64 * 1024;

/// Why reading a request stopped.
enum Interrupted {
    /// The connection is finished: closed, failed, or the server is stopping.
    Closed(&'static str),
    /// The client exceeded a size limit. It gets a 400 and is dropped.
    Oversized(&'static str),
}

/// A single RTSP client connection with its own lifecycle.
pub(crate) struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    observer: Arc<dyn SessionObserver>,
    /// Bytes of a line whose end has not arrived yet.
    pending: Vec<u8>,
    disconnect_reported: bool,
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    ///
    /// `on_connect` fires before the first request is read; `on_disconnect`
    /// fires exactly once, on TEARDOWN or when the connection ends.
    pub fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        session_manager: SessionManager,
        media: MediaTable,
        observer: Arc<dyn SessionObserver>,
        running: Arc<AtomicBool>,
        read_timeout: Duration,
    ) {
        if stream.set_nonblocking(false).is_err()
            || stream.set_read_timeout(Some(read_timeout)).is_err()
        {
            tracing::warn!(%peer_addr, "cannot configure client socket");
            return;
        }

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "cannot clone client socket");
                return;
            }
        };

        tracing::info!(%peer_addr, "client connected");
        observer.on_connect(&peer_addr.ip().to_string(), peer_addr.port());

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler: MethodHandler::new(session_manager, media, peer_addr),
            peer_addr,
            observer,
            pending: Vec::new(),
            disconnect_reported: false,
        };

        let reason = conn.run(&running);
        conn.cleanup();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        loop {
            let head = match self.read_head(running) {
                Ok(head) => head,
                Err(interrupted) => return self.finish(interrupted),
            };

            let request = match RtspRequest::parse(&head) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "unparsable request");
                    if self.send(&RtspResponse::bare(Status::BadRequest)).is_err() {
                        return "write error";
                    }
                    continue;
                }
            };

            if let Err(interrupted) = self.skip_body(request.content_length(), running) {
                return self.finish(interrupted);
            }

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                uri = %request.uri,
                version = %request.version,
                "request"
            );

            let (response, outcome) = self.handler.handle(&request);

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status.code(),
                "response"
            );

            if self.send(&response).is_err() {
                return "write error";
            }

            if outcome == Outcome::TornDown {
                self.report_disconnect();
            }
        }
    }

    fn send(&mut self, response: &RtspResponse) -> std::io::Result<()> {
        self.writer.write_all(response.to_wire().as_bytes())
    }

    /// Answer an oversized request with 400 before the socket is dropped.
    fn finish(&mut self, interrupted: Interrupted) -> &'static str {
        match interrupted {
            Interrupted::Closed(reason) => reason,
            Interrupted::Oversized(reason) => {
                tracing::warn!(peer = %self.peer_addr, reason, "dropping client");
                let _ = self.send(&RtspResponse::bare(Status::BadRequest));
                let _ = self.writer.shutdown(Shutdown::Both);
                reason
            }
        }
    }

    /// Read the request line and headers, up to the blank line. At most
    /// [`MAX_HEAD_LEN`] bytes are buffered for one head.
    fn read_head(&mut self, running: &AtomicBool) -> Result<String, Interrupted> {
        let mut head = String::new();
        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(Interrupted::Closed("server shutting down"));
            }

            let buffered = head.len() + self.pending.len();
            if buffered > MAX_HEAD_LEN {
                return Err(Interrupted::Oversized("request head too large"));
            }
            let allowance = (MAX_HEAD_LEN + 1 - buffered) as u64;

            match (&mut self.reader)
                .take(allowance)
                .read_until(b'\n', &mut self.pending)
            {
                Ok(0) => return Err(Interrupted::Closed("connection closed by client")),
                Ok(_) if !self.pending.ends_with(b"\n") => continue,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    if line.trim().is_empty() {
                        if head.is_empty() {
                            continue;
                        }
                        return Ok(head);
                    }
                    head.push_str(&line);
                }
                Err(e) if is_timeout(&e) => continue,
                Err(_) => return Err(Interrupted::Closed("read error")),
            }
        }
    }

    /// Consume a request body. No method this server handles takes one, but
    /// keepalive GET_PARAMETER requests may carry parameter names.
    fn skip_body(&mut self, len: usize, running: &AtomicBool) -> Result<(), Interrupted> {
        if len == 0 {
            return Ok(());
        }
        if len > MAX_BODY_LEN {
            return Err(Interrupted::Oversized("request body too large"));
        }

        let mut body = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            if !running.load(Ordering::SeqCst) {
                return Err(Interrupted::Closed("server shutting down"));
            }
            match self.reader.read(&mut body[filled..]) {
                Ok(0) => return Err(Interrupted::Closed("connection closed by client")),
                Ok(n) => filled += n,
                Err(e) if is_timeout(&e) => continue,
                Err(_) => return Err(Interrupted::Closed("read error")),
            }
        }
        tracing::trace!(peer = %self.peer_addr, len, "request body consumed");
        Ok(())
    }

    fn report_disconnect(&mut self) {
        if self.disconnect_reported {
            return;
        }
        self.disconnect_reported = true;
        self.observer
            .on_disconnect(&self.peer_addr.ip().to_string(), self.peer_addr.port());
    }

    /// Release sessions owned by this connection and idle media it described,
    /// then report the disconnect if TEARDOWN did not already.
    fn cleanup(&mut self) {
        let removed = self.handler.release_sessions();
        if removed > 0 {
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
        self.report_disconnect();
    }
}
