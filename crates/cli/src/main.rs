mod args;
mod backend;
mod monitor;

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::process;
use std::sync::Arc;

use clap::Parser;
use screencast::{
    EncoderConfig, MediaEngine, MountRegistry, Result, ScreencastError, ServerConfig,
    SessionEventTracker, SignalingEngine, StreamingServer,
};

use args::{Args, LaunchOptions};

fn main() {
    let args = Args::parse();
    let (opts, corrections) = LaunchOptions::resolve(&args);

    tracing_subscriber::fmt()
        .with_max_level(opts.level_filter())
        .init();

    for correction in &corrections {
        tracing::warn!("{correction}");
    }

    let code = match run(&args, &opts) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "screencast server failed");
            eprintln!("{e}");
            exit_code(&e)
        }
    };
    process::exit(code);
}

fn run(args: &Args, opts: &LaunchOptions) -> Result<()> {
    backend::init(opts.log_level)?;
    let media = if args.signaling_only {
        None
    } else {
        Some(backend::media_engine()?)
    };

    let discovered = backend::discover()?;
    monitor::print_monitors(&discovered.monitors);

    let monitor_index = if discovered.monitor_count() > 1 {
        print!("Please select the screen to capture: ");
        let _ = io::stdout().flush();
        monitor::select_monitor(discovered.monitor_count(), &mut io::stdin().lock())?
    } else {
        0
    };

    let encoder = EncoderConfig::new(opts.use_hardware);
    println!(
        "\nCapture screen {monitor_index}\nEncoder settings: bitrate={}, fps={}, use hardware encoder={}",
        opts.bitrate_kbps,
        encoder.target_fps,
        u8::from(encoder.use_hardware)
    );

    let audio_device_id = if args.no_audio {
        None
    } else {
        discovered.default_audio_device_id.clone()
    };
    let audio = audio_device_id.is_some();

    let config = ServerConfig {
        bind_address: args.address.clone(),
        port: args.port,
        monitor_index,
        audio_device_id,
        encoder,
        transport: args.transport.into(),
        max_sessions: args.max_sessions,
        profiles: ServerConfig::default_profiles(opts.bitrate_kbps, audio),
    };
    let mounts = MountRegistry::from_config(&config)?;

    let urls = banner_urls(&discovered.addresses, &config);
    match media {
        Some(engine) => serve(engine, &config, mounts, &urls, "Stream ready at"),
        None => serve(
            SignalingEngine::new(),
            &config,
            mounts,
            &urls,
            "RTSP signaling only (no media) at",
        ),
    }
}

/// Run the server until Enter is pressed on stdin.
fn serve<E: MediaEngine>(
    engine: E,
    config: &ServerConfig,
    mounts: MountRegistry,
    urls: &[String],
    label: &str,
) -> Result<()> {
    let tracker = Arc::new(SessionEventTracker::new());
    let mut server = StreamingServer::new(engine, tracker.clone());
    server.start(config, mounts)?;

    for url in urls {
        println!("{label} {url}");
    }
    println!("Press Enter to stop");

    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "cannot read stdin, stopping");
    }

    server.stop();
    tracing::info!(clients = tracker.session_count(), "server shut down");
    Ok(())
}

/// One `rtsp://` URL per reachable address and profile. Without a discovered
/// address the bind address is used.
fn banner_urls(addresses: &BTreeSet<Ipv4Addr>, config: &ServerConfig) -> Vec<String> {
    let hosts: Vec<String> = if addresses.is_empty() {
        vec![config.bind_address.clone()]
    } else {
        addresses.iter().map(Ipv4Addr::to_string).collect()
    };

    hosts
        .iter()
        .flat_map(|host| {
            config
                .profiles
                .iter()
                .map(move |p| format!("rtsp://{host}:{}{}", config.port, p.mount_path))
        })
        .collect()
}

fn exit_code(err: &ScreencastError) -> i32 {
    match err {
        ScreencastError::DisplayEnumeration(_) | ScreencastError::Discovery(_) => -1,
        ScreencastError::InvalidMonitor { .. } => -2,
        ScreencastError::InvalidProfile { .. }
        | ScreencastError::InvalidMountPath(_)
        | ScreencastError::DuplicatePath(_)
        | ScreencastError::TransportMismatch { .. } => -4,
        _ => -3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(
            exit_code(&ScreencastError::DisplayEnumeration("none".into())),
            -1
        );
        assert_eq!(
            exit_code(&ScreencastError::InvalidMonitor { index: 5, count: 2 }),
            -2
        );
        assert_eq!(
            exit_code(&ScreencastError::ServerAttach {
                addr: "0.0.0.0:9999".into(),
                reason: "in use".into()
            }),
            -3
        );
        assert_eq!(exit_code(&ScreencastError::DuplicatePath("/1".into())), -4);
        assert_eq!(
            exit_code(&ScreencastError::TransportMismatch {
                configured: screencast::LowerTransport::Udp,
                mounted: screencast::LowerTransport::Tcp,
            }),
            -4
        );
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn build_without_media_engine_refuses_to_stream() {
        let err = backend::media_engine().unwrap_err();
        assert!(matches!(err, ScreencastError::Engine(_)));
        assert!(err.to_string().contains("--signaling-only"));
        assert_eq!(exit_code(&err), -3);
    }

    #[test]
    fn monitor_five_of_two_exits_minus_two() {
        let err = monitor::select_monitor(2, &mut io::Cursor::new("5\n")).unwrap_err();
        assert_eq!(exit_code(&err), -2);
    }

    #[test]
    fn banner_lists_every_address_and_path() {
        let config = ServerConfig::default();
        let addresses: BTreeSet<Ipv4Addr> =
            [Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(10, 0, 0, 5)]
                .into_iter()
                .collect();
        assert_eq!(
            banner_urls(&addresses, &config),
            vec![
                "rtsp://10.0.0.5:9999/1",
                "rtsp://10.0.0.5:9999/2",
                "rtsp://192.168.1.20:9999/1",
                "rtsp://192.168.1.20:9999/2",
            ]
        );
    }

    #[test]
    fn banner_falls_back_to_bind_address() {
        let config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            ..ServerConfig::default()
        };
        assert_eq!(
            banner_urls(&BTreeSet::new(), &config),
            vec!["rtsp://127.0.0.1:9999/1", "rtsp://127.0.0.1:9999/2"]
        );
    }
}
