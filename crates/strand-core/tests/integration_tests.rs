//! Integration tests for Strand Core
//!
//! Every test drives a real session against the in-memory engine.

use std::sync::Arc;
use std::time::Duration;

use strand_core::{
    engine::{Engine, PropertyValue},
    router::IgnoreReason,
    Capability, ControlLabel, DiscoveredEndpoint, Endpoint, MediaSource, PlaybackSession,
    PlaybackState, PlayerConfig, Platform, QualityTier, RenderRect, RouteOutcome, SimEngine,
    SinkSelector, StatusEvent, StreamKind, SurfaceProvider, TelemetryEvent,
};

// =============================================================================
// Helpers
// =============================================================================

fn open(engine: &Arc<SimEngine>, config: PlayerConfig) -> PlaybackSession {
    PlaybackSession::with_sinks(
        engine.clone(),
        &MediaSource::new("/media/big_buck_bunny.mp4"),
        config,
        SinkSelector::new(Platform::X11, None),
    )
    .unwrap()
}

fn with_decryptor() -> PlayerConfig {
    PlayerConfig {
        decryptor: Some("cencdec".into()),
        ..Default::default()
    }
}

fn ms(v: u64) -> Option<Duration> {
    Some(Duration::from_millis(v))
}

/// Expose the streams, route them, and return the outcomes in order
fn route_all(
    engine: &SimEngine,
    session: &mut PlaybackSession,
    streams: &[(&str, Capability)],
) -> Vec<RouteOutcome> {
    for (pad, caps) in streams {
        engine.expose_stream(pad, Some(caps.clone()));
    }
    session.route_pending()
}

// =============================================================================
// Graph Construction Tests
// =============================================================================

#[test]
fn test_graph_topology() {
    let engine = SimEngine::shared();
    let session = open(&engine, PlayerConfig::default());

    assert_eq!(
        engine.stage_names(),
        vec!["src", "dbin", "qv", "vconv", "vscale", "vcaps", "vsink", "qa", "aconv", "ares", "asink"]
    );
    assert_eq!(engine.static_link_count(), 1 + 4 + 3);
    assert_eq!(
        engine.property("src", "location"),
        Some(PropertyValue::Text("/media/big_buck_bunny.mp4".into()))
    );
    assert!(session.graph().topology().decryptor.is_none());
}

#[test]
fn test_decrypted_location_preferred() {
    let engine = SimEngine::shared();
    let _session = PlaybackSession::with_sinks(
        engine.clone(),
        &MediaSource::new("/media/protected.mp4").with_decrypted("/tmp/clear.mp4"),
        PlayerConfig::default(),
        SinkSelector::new(Platform::Other, None),
    )
    .unwrap();
    assert_eq!(
        engine.property("src", "location"),
        Some(PropertyValue::Text("/tmp/clear.mp4".into()))
    );
}

#[test]
fn test_sink_falls_back_to_auto() {
    let engine = SimEngine::shared();
    engine.remove_factory("ximagesink");
    engine.remove_factory("xvimagesink");
    let _session = open(&engine, PlayerConfig::default());
    assert_eq!(engine.stage_factory("vsink").as_deref(), Some("autovideosink"));
}

#[test]
fn test_sink_override_tried_first() {
    let engine = SimEngine::shared();
    let config = PlayerConfig {
        video_sink: Some("glimagesink".into()),
        ..Default::default()
    };
    let _session = PlaybackSession::with_sinks(
        engine.clone(),
        &MediaSource::new("/media/a.mp4"),
        config.clone(),
        SinkSelector::new(Platform::X11, config.video_sink.clone()),
    )
    .unwrap();
    assert_eq!(engine.stage_factory("vsink").as_deref(), Some("glimagesink"));
}

#[test]
fn test_missing_decryptor_factory_not_fatal() {
    let engine = SimEngine::shared();
    engine.remove_factory("cencdec");
    let session = open(&engine, with_decryptor());
    assert!(session.graph().topology().decryptor.is_none());
}

#[test]
fn test_missing_required_stage_releases_partial_graph() {
    let engine = SimEngine::shared();
    engine.remove_factory("audioresample");
    let result = PlaybackSession::with_sinks(
        engine.clone(),
        &MediaSource::new("/media/a.mp4"),
        PlayerConfig::default(),
        SinkSelector::new(Platform::Other, None),
    );
    assert!(result.is_err());
    assert!(engine.stage_names().is_empty());
    assert_eq!(engine.released().first().map(String::as_str), Some("aconv"));
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[test]
fn test_unprotected_streams_route_directly_and_position_advances() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());

    let outcomes = route_all(
        &engine,
        &mut session,
        &[
            ("src_0", Capability::new("video/x-raw")),
            ("src_1", Capability::new("audio/x-raw")),
        ],
    );
    assert_eq!(
        outcomes,
        vec![RouteOutcome::Direct(StreamKind::Video), RouteOutcome::Direct(StreamKind::Audio)]
    );

    let topology = session.graph().topology().clone();
    assert_eq!(session.graph().links_into(&topology.video_queue.input()), 1);
    assert_eq!(session.graph().links_into(&topology.audio_queue.input()), 1);

    engine.set_duration(Some(Duration::from_secs(10)));
    session.play().unwrap();

    let mut last = 0;
    for _ in 0..8 {
        engine.advance(Duration::from_secs(2));
        let info = session.poll_position().unwrap();
        assert!(info.position_ms <= 10_000);
        assert!(info.position_ms >= last);
        assert_eq!(info.duration_ms, Some(10_000));
        last = info.position_ms;
    }
    assert_eq!(last, 10_000);
}

#[test]
fn test_protected_stream_routes_through_decryptor() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, with_decryptor());

    let outcomes = route_all(
        &engine,
        &mut session,
        &[("src_0", Capability::protected("application/x-cenc", "video/x-h264"))],
    );
    assert_eq!(outcomes, vec![RouteOutcome::Decrypted(StreamKind::Video)]);

    let topology = session.graph().topology().clone();
    let decryptor = topology.decryptor.clone().unwrap();
    let attempts = engine.link_attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].1, decryptor.input());
    assert_eq!(attempts[1], (decryptor.output(), topology.video_queue.input()));
    assert!(
        !attempts.iter().any(|(out, input)| out.stage == topology.demuxer.id
            && *input == topology.video_queue.input()),
        "direct fallback never attempted"
    );
    assert_eq!(engine.stage_state("decrypt"), Some(PlaybackState::Ready));
}

#[test]
fn test_protected_stream_without_decryptor_fails_at_runtime() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    let mut telemetry = session.subscribe_telemetry();

    let outcomes = route_all(
        &engine,
        &mut session,
        &[("src_0", Capability::protected("application/x-cenc", "video/x-h264"))],
    );
    assert_eq!(outcomes, vec![RouteOutcome::Direct(StreamKind::Video)]);
    assert_eq!(engine.link_attempts().len(), 1);

    session.play().unwrap();
    assert!(session.drain_events() >= 1);
    assert_eq!(session.state(), PlaybackState::Ready);
    assert_eq!(session.control_label(), ControlLabel::Play);
    assert_eq!(engine.current_state(), PlaybackState::Ready);

    let mut saw_error = false;
    while let Ok(record) = telemetry.try_recv() {
        if let TelemetryEvent::Error { code, .. } = record.event {
            assert_eq!(code, "ENGINE_RUNTIME");
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[test]
fn test_quality_toggle_from_paused_ends_playing() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    session.play().unwrap();
    session.pause().unwrap();
    assert_eq!(engine.current_state(), PlaybackState::Paused);

    let tier = session.toggle_quality().unwrap();
    assert_eq!(tier, QualityTier::Reduced);
    assert_eq!(engine.current_state(), PlaybackState::Playing);
    assert_eq!(session.state(), PlaybackState::Playing);
    assert_eq!(session.control_label(), ControlLabel::Pause);
    assert_eq!(
        engine.property("vcaps", "caps"),
        Some(PropertyValue::Dimensions(Some(strand_core::Resolution::new(640, 360))))
    );
    assert_eq!(engine.renegotiation_count(), 1);

    session.toggle_quality().unwrap();
    assert_eq!(engine.property("vcaps", "caps"), Some(PropertyValue::Dimensions(None)));
}

#[test]
fn test_quality_tier_parity() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    session.play().unwrap();

    for n in 1..=7 {
        session.toggle_quality().unwrap();
        let expected = if n % 2 == 0 { QualityTier::Full } else { QualityTier::Reduced };
        assert_eq!(session.quality_tier(), expected, "after {} toggles", n);
    }
}

#[test]
fn test_seek_rearms_first_frame() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    engine.set_duration(Some(Duration::from_secs(60)));
    session.play().unwrap();

    for i in 0..30 {
        engine.push_frame(ms(i * 33));
    }
    let metrics = session.metrics();
    {
        let m = metrics.lock().unwrap();
        assert!(m.last_ttff().is_some());
        assert!(!m.is_armed());
        assert_eq!(m.window().len(), 29);
    }

    session.seek(5000).unwrap();
    {
        let m = metrics.lock().unwrap();
        assert_eq!(m.window().len(), 0);
        assert!(m.is_armed());
    }
    assert_eq!(engine.seeks().len(), 1);
    assert!(engine.seeks()[0].1.flush);

    let mut telemetry = session.subscribe_telemetry();
    engine.push_frame(ms(5000));
    assert!(!metrics.lock().unwrap().is_armed());
    let record = telemetry.try_recv().unwrap();
    assert!(matches!(record.event, TelemetryEvent::FirstFrame { .. }));
}

// =============================================================================
// Routing Edge Cases
// =============================================================================

#[test]
fn test_second_stream_of_same_kind_is_noop() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());

    let outcomes = route_all(
        &engine,
        &mut session,
        &[
            ("src_0", Capability::new("video/x-raw")),
            ("src_1", Capability::new("video/x-raw")),
        ],
    );
    assert_eq!(
        outcomes,
        vec![RouteOutcome::Direct(StreamKind::Video), RouteOutcome::AlreadyRouted(StreamKind::Video)]
    );
    let input = session.graph().topology().video_queue.input();
    assert_eq!(session.graph().links_into(&input), 1);
    assert_eq!(engine.links().len(), 1);
}

#[test]
fn test_repeated_protected_route_is_noop() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, with_decryptor());
    let caps = Capability::protected("application/x-cenc", "audio/mpeg");

    let outcomes = route_all(&engine, &mut session, &[("src_0", caps.clone()), ("src_1", caps)]);
    assert_eq!(outcomes[0], RouteOutcome::Decrypted(StreamKind::Audio));
    assert!(outcomes[1].is_routed());

    let input = session.graph().topology().audio_queue.input();
    assert_eq!(session.graph().links_into(&input), 1);
}

#[test]
fn test_decryptor_failure_falls_back_to_direct() {
    let engine = SimEngine::shared();
    engine.refuse_links_into("decrypt");
    let mut session = open(&engine, with_decryptor());

    let outcomes = route_all(
        &engine,
        &mut session,
        &[("src_0", Capability::protected("application/x-cenc", "video/x-h264"))],
    );
    assert_eq!(outcomes, vec![RouteOutcome::Direct(StreamKind::Video)]);
    assert_eq!(engine.link_attempts().len(), 2);
}

#[test]
fn test_rejected_decryptor_output_frees_decryptor_for_later_streams() {
    let engine = SimEngine::shared();
    engine.refuse_link("decrypt", "qv");
    let mut session = open(&engine, with_decryptor());

    let outcomes = route_all(
        &engine,
        &mut session,
        &[
            ("src_0", Capability::protected("application/x-cenc", "video/x-h264")),
            ("src_1", Capability::protected("application/x-cenc", "audio/mpeg")),
        ],
    );
    assert_eq!(
        outcomes,
        vec![RouteOutcome::Direct(StreamKind::Video), RouteOutcome::Decrypted(StreamKind::Audio)]
    );

    let topology = session.graph().topology().clone();
    let decryptor = topology.decryptor.unwrap();
    let demuxer = topology.demuxer.id;
    assert_eq!(
        session.graph().peer_of(&topology.video_queue.input()),
        Some(&Endpoint::output(demuxer, "dbin", "src_0"))
    );
    assert_eq!(
        session.graph().peer_of(&decryptor.input()),
        Some(&Endpoint::output(demuxer, "dbin", "src_1"))
    );
    assert_eq!(session.graph().peer_of(&topology.audio_queue.input()), Some(&decryptor.output()));
    assert_eq!(engine.links().len(), 3);
}

#[test]
fn test_same_endpoint_routed_twice_direct() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    let discovered = DiscoveredEndpoint {
        endpoint: Endpoint::output(session.graph().topology().demuxer.id, "dbin", "src_0"),
        capability: Some(Capability::new("video/x-h264")),
    };

    assert_eq!(
        session.on_stream_discovered(discovered.clone()),
        RouteOutcome::Direct(StreamKind::Video)
    );
    let attempts = engine.link_attempts().len();
    assert_eq!(
        session.on_stream_discovered(discovered),
        RouteOutcome::AlreadyRouted(StreamKind::Video)
    );

    let input = session.graph().topology().video_queue.input();
    assert_eq!(session.graph().links_into(&input), 1);
    assert_eq!(engine.links().len(), 1);
    assert_eq!(engine.link_attempts().len(), attempts);
}

#[test]
fn test_same_endpoint_routed_twice_through_decryptor() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, with_decryptor());
    let discovered = DiscoveredEndpoint {
        endpoint: Endpoint::output(session.graph().topology().demuxer.id, "dbin", "src_0"),
        capability: Some(Capability::protected("application/x-cenc", "video/x-h264")),
    };

    assert_eq!(
        session.on_stream_discovered(discovered.clone()),
        RouteOutcome::Decrypted(StreamKind::Video)
    );
    let attempts = engine.link_attempts().len();
    assert_eq!(
        session.on_stream_discovered(discovered),
        RouteOutcome::Decrypted(StreamKind::Video)
    );

    let topology = session.graph().topology();
    let decryptor = topology.decryptor.as_ref().unwrap();
    assert_eq!(session.graph().links_into(&decryptor.input()), 1);
    assert_eq!(session.graph().links_into(&topology.video_queue.input()), 1);
    assert_eq!(engine.links().len(), 2);
    assert_eq!(engine.link_attempts().len(), attempts);
}

#[test]
fn test_failed_direct_link_leaves_other_streams_alone() {
    let engine = SimEngine::shared();
    engine.refuse_links_into("qa");
    let mut session = open(&engine, PlayerConfig::default());

    let outcomes = route_all(
        &engine,
        &mut session,
        &[
            ("src_0", Capability::new("audio/x-raw")),
            ("src_1", Capability::new("video/x-raw")),
        ],
    );
    assert_eq!(
        outcomes,
        vec![RouteOutcome::Unrouted(StreamKind::Audio), RouteOutcome::Direct(StreamKind::Video)]
    );
}

#[test]
fn test_unroutable_discoveries_ignored() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    let demuxer = session.graph().topology().demuxer.clone();

    let cases = vec![
        (
            DiscoveredEndpoint {
                endpoint: Endpoint::output(demuxer.id, "dbin", "src_0"),
                capability: None,
            },
            IgnoreReason::NoCapability,
        ),
        (
            DiscoveredEndpoint {
                endpoint: Endpoint::output(demuxer.id, "dbin", "src_1"),
                capability: Some(Capability::new("text/x-raw")),
            },
            IgnoreReason::UnknownKind,
        ),
        (
            DiscoveredEndpoint {
                endpoint: Endpoint::input(demuxer.id, "dbin", "sink"),
                capability: Some(Capability::new("video/x-raw")),
            },
            IgnoreReason::NotOutput,
        ),
    ];

    for (discovered, reason) in cases {
        assert_eq!(session.on_stream_discovered(discovered), RouteOutcome::Ignored(reason));
    }
    assert!(engine.link_attempts().is_empty());
    assert_eq!(engine.finished_discoveries().len(), 3);
}

// =============================================================================
// Surface Tests
// =============================================================================

struct Window(Option<u64>);

impl SurfaceProvider for Window {
    fn native_handle(&self) -> Option<u64> {
        self.0
    }

    fn render_rect(&self) -> RenderRect {
        RenderRect::new(0, 0, 1280, 720)
    }
}

#[test]
fn test_surface_preparation() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    session.attach_surface(Arc::new(Window(Some(0x0360_0007))));

    let assignment = engine.request_surface().unwrap();
    assert_eq!(assignment.handle, 0x0360_0007);
    assert_eq!(assignment.rect.width, 1280);

    session.resize(RenderRect::new(10, 10, 640, 360));
    assert_eq!(engine.render_rects().last(), Some(&RenderRect::new(10, 10, 640, 360)));
}

#[test]
fn test_implausible_surface_skipped() {
    let engine = SimEngine::shared();
    let mut session = open(&engine, PlayerConfig::default());
    session.attach_surface(Arc::new(Window(Some(0x8))));
    assert!(engine.request_surface().is_none());
    assert!(engine.surface_assignments().is_empty());
}

// =============================================================================
// Session Loop Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_spawned_session_publishes_position() {
    let engine = SimEngine::shared();
    let session = open(&engine, PlayerConfig::default());
    let handle = session.spawn();

    engine.expose_stream("src_0", Some(Capability::new("video/x-raw")));
    engine.set_duration(Some(Duration::from_secs(30)));
    handle.play().await.unwrap();

    engine.advance(Duration::from_secs(3));
    tokio::time::sleep(Duration::from_millis(450)).await;

    assert_eq!(handle.current_duration_ms(), Some(30_000));
    assert_eq!(handle.current_position_ms(), 3_000);
    assert_eq!(engine.links().len(), 1);

    handle.shutdown().await.unwrap();
    assert_eq!(handle.state(), PlaybackState::Null);
    assert!(engine.stage_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_session_handles_end_of_stream() {
    let engine = SimEngine::shared();
    let handle = open(&engine, PlayerConfig::default()).spawn();
    let mut states = handle.subscribe_state();

    handle.toggle_play_pause().await.unwrap();
    assert_eq!(handle.control_label(), ControlLabel::Pause);

    engine.post_status(StatusEvent::EndOfStream);
    states
        .wait_for(|s| *s == PlaybackState::Ready)
        .await
        .unwrap();
    assert_eq!(handle.control_label(), ControlLabel::Play);

    // Replay from Ready
    handle.toggle_play_pause().await.unwrap();
    assert_eq!(handle.state(), PlaybackState::Playing);
}
