use std::ffi::CStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gst::glib;
use gst::glib::translate::ToGlibPtr;
use gst_rtsp_server::prelude::*;

use screencast::config::LowerTransport;
use screencast::engine::{EngineSetup, EventLoop, LoopQuit, MediaEngine};
use screencast::events::SessionObserver;
use screencast::mount::MountEntry;
use screencast::{Result, ScreencastError};

use crate::CAT;

/// Engine backed by `gst-rtsp-server`.
#[derive(Debug, Clone, Default)]
pub struct GstEngine;

impl GstEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Server attached to its own main context, not yet dispatching.
pub struct GstLoop {
    context: glib::MainContext,
    main_loop: glib::MainLoop,
    server: gst_rtsp_server::RTSPServer,
    source: glib::SourceId,
    paths: Vec<String>,
}

struct GstQuit {
    context: glib::MainContext,
    main_loop: glib::MainLoop,
}

impl LoopQuit for GstQuit {
    fn quit(&self) {
        // Runs on the loop's context, so a quit sent before `run` is queued
        // rather than lost.
        let main_loop = self.main_loop.clone();
        self.context.invoke(move || main_loop.quit());
    }
}

fn protocols(transport: LowerTransport) -> gst_rtsp::RTSPLowerTrans {
    match transport {
        LowerTransport::Tcp => gst_rtsp::RTSPLowerTrans::TCP,
        LowerTransport::Udp => gst_rtsp::RTSPLowerTrans::UDP,
    }
}

fn media_factory(
    entry: &MountEntry,
    observer: &Arc<dyn SessionObserver>,
) -> gst_rtsp_server::RTSPMediaFactory {
    let factory = gst_rtsp_server::RTSPMediaFactory::new();
    factory.set_launch(&entry.description().to_string());
    factory.set_shared(entry.is_shared());
    factory.set_protocols(protocols(entry.transport()));

    let path = entry.path().to_string();
    let constructed = observer.clone();
    factory.connect_media_constructed(move |_, _| {
        gst::info!(CAT, "media constructed for {}", path);
        constructed.on_media_constructed(&path);
    });

    let path = entry.path().to_string();
    let configured = observer.clone();
    factory.connect_media_configure(move |_, _| {
        gst::info!(CAT, "media configured for {}", path);
        configured.on_media_configured(&path);
    });

    factory
}

/// Host and port of the client's connection URL.
fn peer_of(client: &gst_rtsp_server::RTSPClient) -> Option<(String, u16)> {
    // SAFETY: the connection and its URL are owned by the client, which the
    // caller borrows for the duration of this call. Both are only read.
    unsafe {
        let conn = gst_rtsp_server::ffi::gst_rtsp_client_get_connection(client.to_glib_none().0);
        if conn.is_null() {
            return None;
        }
        let url = gst_rtsp::ffi::gst_rtsp_connection_get_url(conn);
        if url.is_null() || (*url).host.is_null() {
            return None;
        }
        let host = CStr::from_ptr((*url).host).to_string_lossy().into_owned();
        Some((host, (*url).port))
    }
}

fn watch_client(client: &gst_rtsp_server::RTSPClient, observer: &Arc<dyn SessionObserver>) {
    let Some((host, port)) = peer_of(client) else {
        gst::warning!(CAT, "client connected without a readable peer address");
        return;
    };

    gst::info!(CAT, "client connected: {}:{}", host, port);
    observer.on_connect(&host, port);

    let reported = Arc::new(AtomicBool::new(false));
    let report = {
        let observer = observer.clone();
        move || {
            if !reported.swap(true, Ordering::SeqCst) {
                gst::info!(CAT, "client disconnected: {}:{}", host, port);
                observer.on_disconnect(&host, port);
            }
        }
    };

    let on_teardown = report.clone();
    client.connect_teardown_request(move |_, _| on_teardown());
    client.connect_closed(move |_| report());
}

impl MediaEngine for GstEngine {
    type Loop = GstLoop;

    fn attach(self, setup: EngineSetup) -> Result<GstLoop> {
        let addr = setup.bind_addr();
        let context = glib::MainContext::new();
        let main_loop = glib::MainLoop::new(Some(&context), false);

        let server = gst_rtsp_server::RTSPServer::new();
        server.set_address(&setup.bind_address);
        server.set_service(&setup.port.to_string());

        let pool = gst_rtsp_server::RTSPSessionPool::new();
        pool.set_max_sessions(setup.max_sessions);
        server.set_session_pool(Some(&pool));

        let mounts = server.mount_points().ok_or_else(|| ScreencastError::ServerAttach {
            addr: addr.clone(),
            reason: "server has no mount points".to_string(),
        })?;

        let mut paths = Vec::with_capacity(setup.mounts.len());
        for entry in setup.mounts.entries() {
            mounts.add_factory(entry.path(), media_factory(entry, &setup.observer));
            gst::debug!(CAT, "mounted {} ({})", entry.path(), entry.transport());
            paths.push(entry.path().to_string());
        }

        let observer = setup.observer.clone();
        server.connect_client_connected(move |_, client| watch_client(client, &observer));

        let source = server
            .attach(Some(&context))
            .map_err(|e| ScreencastError::ServerAttach {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        gst::info!(CAT, "RTSP server attached on {}", addr);
        Ok(GstLoop {
            context,
            main_loop,
            server,
            source,
            paths,
        })
    }
}

impl EventLoop for GstLoop {
    fn quit_handle(&self) -> Box<dyn LoopQuit> {
        Box::new(GstQuit {
            context: self.context.clone(),
            main_loop: self.main_loop.clone(),
        })
    }

    fn run(self) {
        let GstLoop {
            context,
            main_loop,
            server,
            source,
            paths,
        } = self;

        if let Err(e) = context.with_thread_default(|| main_loop.run()) {
            tracing::error!(error = %e, "cannot make the server context current");
        }

        // Close every client before the listener goes away.
        server.client_filter(Some(&mut |_, _| gst_rtsp_server::RTSPFilterResult::Remove));

        if let Some(mounts) = server.mount_points() {
            for path in &paths {
                mounts.remove_factory(path);
            }
        }

        match context.find_source_by_id(&source) {
            Some(s) => s.destroy(),
            None => tracing::warn!("server source already gone"),
        }
        gst::info!(CAT, "RTSP server released");
    }
}
