//! CLI command implementations

use crate::input::{self, Input};
use crate::output::{format_position, format_record, json_line, OutputFormat};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{
    Capability, Error, MediaSource, PlaybackSession, PlaybackState, Platform, PlayerConfig,
    PositionInfo, SessionHandle, SimEngine, SinkSelector, StatusEvent, TelemetryRecord,
};
use strand_gst::{check_gstreamer_installation, GstEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Arguments of `strand play`
pub struct PlayOptions {
    pub path: String,
    pub decrypted: Option<String>,
    pub sink: Option<String>,
    pub decryptor: Option<String>,
    pub config: Option<PathBuf>,
}

/// Arguments of `strand simulate`
pub struct SimulateOptions {
    pub duration_secs: u64,
    pub fps: u32,
    pub protected: bool,
    pub decryptor: bool,
}

/// Print telemetry until the task is aborted
fn spawn_printer(
    mut rx: broadcast::Receiver<TelemetryRecord>,
    format: OutputFormat,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(record) => println!("{}", format_record(&record, format)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Telemetry output lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn position_of(handle: &SessionHandle) -> PositionInfo {
    PositionInfo {
        position_ms: handle.current_position_ms(),
        duration_ms: handle.current_duration_ms(),
    }
}

/// Play a local file, reading controls from stdin
pub async fn play(options: PlayOptions, format: &str) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);

    let mut config = match &options.config {
        Some(path) => PlayerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    config.apply_env();
    if options.sink.is_some() {
        config.video_sink = options.sink;
    }
    if options.decryptor.is_some() {
        config.decryptor = options.decryptor;
    }
    config.validate()?;

    let mut source = MediaSource::new(&options.path);
    if let Some(decrypted) = options.decrypted {
        source = source.with_decrypted(decrypted);
    }

    let engine = GstEngine::shared()?;
    let session = PlaybackSession::new(engine, &source, config)
        .with_context(|| format!("Failed to build pipeline for {}", source.effective_location()))?;
    info!(session_id = %session.id(), location = source.effective_location(), "Playing");

    let handle = session.spawn();
    let printer = spawn_printer(handle.subscribe_telemetry(), format);

    eprintln!("{}", input::HELP);
    handle.play().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match input::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Input::Session(command))) => match handle.send(command).await {
                Ok(()) => {}
                Err(Error::SessionClosed) => break,
                Err(e) => eprintln!("{}", e),
            },
            Ok(Some(Input::Info)) => {
                let position = position_of(&handle);
                if format == OutputFormat::Json {
                    println!("{}", json_line(&position));
                } else {
                    println!(
                        "{} [{}] {}",
                        handle.state(),
                        handle.control_label(),
                        format_position(&position)
                    );
                }
            }
            Ok(Some(Input::Help)) => eprintln!("{}", input::HELP),
            Ok(Some(Input::Quit)) => break,
            Err(message) => eprintln!("{}", message),
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Session already closed");
    }
    tokio::task::yield_now().await;
    printer.abort();
    Ok(())
}

/// Check the GStreamer installation
pub fn check(format: &str) -> anyhow::Result<()> {
    let info = check_gstreamer_installation()?;

    if OutputFormat::from(format) == OutputFormat::Json {
        let report = serde_json::json!({
            "version": info.version,
            "platform": info.platform.display_name(),
            "video_sinks": info.video_sinks,
            "missing_elements": info.missing_elements,
            "complete": info.is_complete(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("GStreamer: {}", info.version);
        println!("Platform: {}", info.platform.display_name());
        if info.has_native_sink() {
            println!("Native video sinks: {}", info.video_sinks.join(", "));
        } else {
            println!("Native video sinks: none (autovideosink will be used)");
        }

        if !info.missing_elements.is_empty() {
            println!("\nMissing elements:");
            for element in &info.missing_elements {
                println!("  - {}", element);
            }
        }
    }

    if !info.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}

/// Scripted headless session: expose streams, play, toggle quality once,
/// seek once, then end the stream.
pub async fn simulate(options: SimulateOptions, format: &str) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let fps = options.fps.max(1);

    let engine: Arc<SimEngine> = SimEngine::shared();
    let config = PlayerConfig {
        decryptor: options.decryptor.then(|| "simdecrypt".to_string()),
        ..PlayerConfig::default()
    };
    let session = PlaybackSession::with_sinks(
        engine.clone(),
        &MediaSource::new("sim://sample"),
        config,
        SinkSelector::new(Platform::Other, None),
    )?;
    let handle = session.spawn();
    let printer = spawn_printer(handle.subscribe_telemetry(), format);

    let caps = |media_type: &str| {
        if options.protected {
            Capability::protected("application/x-cenc", media_type)
        } else {
            Capability::new(media_type)
        }
    };
    engine.expose_stream("src_0", Some(caps("video/x-h264")));
    engine.expose_stream("src_1", Some(caps("audio/mpeg")));
    engine.set_duration(Some(Duration::from_secs(options.duration_secs)));

    handle.play().await?;

    let frame = Duration::from_secs(1) / fps;
    let total_frames = options.duration_secs * u64::from(fps);
    let mut ticker = tokio::time::interval(frame);
    let mut pts = Duration::ZERO;

    for n in 0..total_frames {
        ticker.tick().await;
        if handle.state() != PlaybackState::Playing {
            warn!(state = %handle.state(), "Playback stopped early");
            break;
        }
        engine.advance(frame);
        pts += frame;
        engine.push_frame(Some(pts));

        if n == total_frames / 3 {
            handle.toggle_quality().await?;
        }
        if n == total_frames / 2 {
            let target = pts + Duration::from_secs(1);
            handle.seek(target.as_millis() as u64).await?;
            pts = target;
        }
    }

    if handle.state() == PlaybackState::Playing {
        engine.post_status(StatusEvent::EndOfStream);
    }
    let mut states = handle.subscribe_state();
    let _ = tokio::time::timeout(
        Duration::from_secs(1),
        states.wait_for(|s| *s == PlaybackState::Ready),
    )
    .await;

    let position = position_of(&handle);
    if format == OutputFormat::Text {
        println!(
            "simulation finished: {} at {} ({} links, {} stages)",
            handle.state(),
            format_position(&position),
            engine.links().len(),
            engine.stage_names().len()
        );
    }

    handle.shutdown().await?;
    tokio::task::yield_now().await;
    printer.abort();
    Ok(())
}
