// State machine tests for CallSession
//
// Time is supplied explicitly: each `advance(now)` is one polling tick, so the
// silence gate can be driven through whole timeouts without sleeping.

mod common;

use anyhow::Result;
use callwire::audio::normalized_volume;
use callwire::gateway::RemoteResponse;
use callwire::session::{CallStatus, SessionEvent};
use callwire::{CallError, CallSettings, CaptureError};
use common::{FakePlayer, Harness, LOUD, QUIET};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

const TICK: Duration = Duration::from_millis(16);

/// Start a call and speak until the session is recording
async fn start_recording(h: &mut Harness) -> Result<Instant> {
    h.session.start().await?;
    h.probe.set_level(LOUD);
    let now = Instant::now();
    h.session.advance(now);
    assert_eq!(h.session.status(), CallStatus::Recording);
    Ok(now)
}

/// Tick with quiet input until the session leaves Recording
fn run_silence(h: &mut Harness, mut now: Instant, limit: Duration) -> Instant {
    h.probe.set_level(QUIET);
    let end = now + limit;
    while now < end && h.session.status() == CallStatus::Recording {
        now += TICK;
        h.session.advance(now);
    }
    now
}

async fn remote(h: &mut Harness, body: &str) {
    h.session.apply_remote(RemoteResponse::decode(body)).await;
}

#[tokio::test]
async fn test_scenario_speech_then_silence_finalizes_once() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;
    assert_eq!(h.session.volume(), 60);

    h.probe.set_level(QUIET);
    let mut now = t0;
    let mut finalizations = 0;
    let mut previous = h.session.status();
    while now < t0 + Duration::from_millis(3000) {
        now += TICK;
        h.session.advance(now);
        let status = h.session.status();
        if previous == CallStatus::Recording && status == CallStatus::Processing {
            finalizations += 1;
        }
        previous = status;
    }

    assert_eq!(finalizations, 1);
    assert_eq!(h.session.status(), CallStatus::Processing);
    assert_eq!(h.probe.recorder_stops(), 1);
    assert!(!h.probe.tracks_enabled(), "mic muted while processing");
    assert_eq!(h.session.silence_progress(), 0.0);

    Ok(())
}

#[tokio::test]
async fn test_finalization_waits_for_full_timeout() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;

    // 1400ms of silence is not enough
    let now = run_silence(&mut h, t0, Duration::from_millis(1400));
    assert_eq!(h.session.status(), CallStatus::Recording);
    assert!(h.session.silence_progress() > 0.85);

    run_silence(&mut h, now, Duration::from_millis(500));
    assert_eq!(h.session.status(), CallStatus::Processing);

    Ok(())
}

#[tokio::test]
async fn test_speech_resets_silence_gate() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;

    let now = run_silence(&mut h, t0, Duration::from_millis(1000));
    assert!(h.session.silence_progress() > 0.5);
    assert!(h.session.silence_deadline().is_some());

    h.probe.set_level(LOUD);
    h.session.advance(now + TICK);
    assert_eq!(h.session.silence_progress(), 0.0);
    assert!(h.session.silence_deadline().is_none());

    // A fresh full timeout is needed again
    let now = run_silence(&mut h, now + TICK, Duration::from_millis(1400));
    assert_eq!(h.session.status(), CallStatus::Recording);
    run_silence(&mut h, now, Duration::from_millis(500));
    assert_eq!(h.session.status(), CallStatus::Processing);

    Ok(())
}

#[tokio::test]
async fn test_loud_sample_while_listening_starts_recording() -> Result<()> {
    let thresholds = [0, 5, 45, 95, 100];
    let levels = [0u8, 13, 77, 128, 200, 255];

    for threshold in thresholds {
        for level in levels {
            let mut h = Harness::new();
            h.settings.send_replace(CallSettings {
                threshold_percent: threshold,
                silence_timeout_ms: 1500,
            });
            h.session.start().await?;
            h.probe.set_level(level);
            h.session.advance(Instant::now());

            let volume = normalized_volume(&[level; 128]);
            let expected = if volume > threshold {
                CallStatus::Recording
            } else {
                CallStatus::Listening
            };
            assert_eq!(
                h.session.status(),
                expected,
                "threshold {threshold}, volume {volume}"
            );
        }
    }

    Ok(())
}

#[tokio::test]
async fn test_volume_equal_to_threshold_is_silence() -> Result<()> {
    let mut h = Harness::new();
    h.settings.send_replace(CallSettings {
        threshold_percent: 60,
        silence_timeout_ms: 1500,
    });
    h.session.start().await?;
    h.probe.set_level(LOUD);
    h.session.advance(Instant::now());

    assert_eq!(h.session.volume(), 60);
    assert_eq!(h.session.status(), CallStatus::Listening);

    Ok(())
}

#[tokio::test]
async fn test_threshold_change_applies_on_next_sample() -> Result<()> {
    let mut h = Harness::new();
    h.settings.send_replace(CallSettings {
        threshold_percent: 70,
        silence_timeout_ms: 1500,
    });
    h.session.start().await?;
    h.probe.set_level(LOUD);

    let now = Instant::now();
    h.session.advance(now);
    assert_eq!(h.session.status(), CallStatus::Listening);

    h.settings.send_replace(CallSettings {
        threshold_percent: 50,
        silence_timeout_ms: 1500,
    });
    h.session.advance(now + TICK);
    assert_eq!(h.session.status(), CallStatus::Recording);
    assert_eq!(h.session.snapshot().threshold_percent, 50);

    Ok(())
}

#[tokio::test]
async fn test_timeout_change_applies_to_progress() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;

    let now = run_silence(&mut h, t0, Duration::from_millis(750));
    let before = h.session.silence_progress();

    h.settings.send_replace(CallSettings {
        threshold_percent: 45,
        silence_timeout_ms: 3000,
    });
    h.session.advance(now + TICK);
    assert!(h.session.silence_progress() < before);

    Ok(())
}

#[tokio::test]
async fn test_no_sampling_outside_listening_and_recording() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;
    run_silence(&mut h, t0, Duration::from_secs(2));
    assert_eq!(h.session.status(), CallStatus::Processing);

    let reads = h.probe.analyser_reads.load(Ordering::SeqCst);
    h.probe.set_level(255);
    for i in 1..=20u32 {
        h.session.advance(t0 + Duration::from_secs(3) + TICK * i);
    }

    assert_eq!(h.probe.analyser_reads.load(Ordering::SeqCst), reads);
    assert_eq!(h.session.status(), CallStatus::Processing);
    assert_eq!(h.session.volume(), 0);

    Ok(())
}

#[tokio::test]
async fn test_utterance_is_transmitted_and_empty_reply_resumes() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;
    run_silence(&mut h, t0, Duration::from_secs(2));

    h.settle().await;

    assert_eq!(h.gateway.calls(), 1);
    assert!(h.gateway.last_bytes.load(Ordering::SeqCst) > 44);
    assert_eq!(h.session.status(), CallStatus::Listening);
    assert!(h.probe.tracks_enabled());
    assert_eq!(h.session.snapshot().utterances_sent, 1);

    Ok(())
}

#[tokio::test]
async fn test_scenario_remote_call_start_while_idle() -> Result<()> {
    let mut h = Harness::new();
    remote(&mut h, r#"{"call": true}"#).await;

    assert_eq!(h.session.status(), CallStatus::Listening);
    assert!(h.session.is_active());
    assert_eq!(h.probe.acquisitions.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.tracks_enabled(), Some(true));

    // A second start signal during the call is ignored
    remote(&mut h, r#"[{"call": true}]"#).await;
    assert_eq!(h.probe.acquisitions.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_scenario_final_clip_ends_call() -> Result<()> {
    let mut h = Harness::new();
    h.gateway
        .set_reply(r#"{"audio": "clip.mp3", "signal": "end"}"#);
    let t0 = start_recording(&mut h).await?;
    run_silence(&mut h, t0, Duration::from_secs(2));

    // Recorder stop -> transmission -> reply
    h.pump().await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
        if let Ok(event) = h.events.try_recv() {
            let is_reply = matches!(event, SessionEvent::Reply { .. });
            h.session.handle_event(event).await;
            if is_reply {
                break;
            }
        }
    }

    assert_eq!(h.session.status(), CallStatus::Playing);
    assert!(!h.probe.tracks_enabled());

    h.settle().await;

    assert_eq!(h.player.played(), vec!["clip.mp3".to_string()]);
    assert_eq!(h.session.status(), CallStatus::Idle);
    assert!(!h.session.is_active());
    assert_eq!(h.probe.tracks_stopped(), 1);
    assert!(h.probe.analyser_closed());
    assert!(!h.probe.recorder_active());

    Ok(())
}

#[tokio::test]
async fn test_scenario_empty_reply_while_processing_resumes_listening() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;
    h.session.commit();
    assert_eq!(h.session.status(), CallStatus::Processing);
    assert!(!h.probe.tracks_enabled());

    remote(&mut h, "{}").await;

    assert_eq!(h.session.status(), CallStatus::Listening);
    assert!(h.probe.tracks_enabled());

    Ok(())
}

#[tokio::test]
async fn test_unparseable_reply_resumes_listening() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;
    h.session.commit();

    remote(&mut h, "Transmission Error: connection refused").await;
    assert_eq!(h.session.status(), CallStatus::Listening);

    Ok(())
}

#[tokio::test]
async fn test_gateway_failure_resumes_listening() -> Result<()> {
    let mut h = Harness::new();
    h.gateway.set_failure("Gateway Error (502): bad gateway");
    start_recording(&mut h).await?;
    h.session.commit();

    h.settle().await;

    assert_eq!(h.gateway.calls(), 1);
    assert_eq!(h.session.status(), CallStatus::Listening);
    assert!(h.probe.tracks_enabled());

    Ok(())
}

#[tokio::test]
async fn test_scenario_capture_failure_leaves_idle() -> Result<()> {
    let mut h = Harness::new();
    h.probe
        .fail_with(CaptureError::PermissionDenied("user dismissed prompt".to_string()));

    let err = h.session.start().await.unwrap_err();

    assert!(matches!(
        err,
        CallError::Capture(CaptureError::PermissionDenied(_))
    ));
    assert_eq!(h.session.status(), CallStatus::Idle);
    assert!(!h.session.is_active());
    assert!(h.session.last_error().is_some());
    assert!(h.session.silence_deadline().is_none());
    assert!(!h.session.is_recorder_active());
    assert_eq!(h.session.tracks_enabled(), None);
    assert_eq!(h.probe.recorders_built.load(Ordering::SeqCst), 0);

    // Ticks after a failed start do nothing
    h.session.advance(Instant::now());
    assert_eq!(h.probe.analyser_reads.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_error_cleared_on_next_start() -> Result<()> {
    let mut h = Harness::new();
    h.probe.fail_with(CaptureError::NoInputDevice);
    assert!(h.session.start().await.is_err());
    assert!(h.session.snapshot().last_error.is_some());

    h.probe.clear_failure();
    h.session.start().await?;
    assert_eq!(h.session.snapshot().last_error, None);
    assert_eq!(h.session.status(), CallStatus::Listening);

    Ok(())
}

#[tokio::test]
async fn test_start_while_active_is_noop() -> Result<()> {
    let mut h = Harness::new();
    h.session.start().await?;
    let call_id = h.session.call_id();

    h.session.start().await?;

    assert_eq!(h.session.call_id(), call_id);
    assert_eq!(h.probe.acquisitions.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_remote_hang_up_from_any_state() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;

    remote(&mut h, r#"{"call": false, "audio": "ignored.mp3"}"#).await;

    assert_eq!(h.session.status(), CallStatus::Idle);
    assert!(h.player.played().is_empty());
    assert_eq!(h.probe.tracks_stopped(), 1);

    Ok(())
}

#[tokio::test]
async fn test_playback_failure_resumes_listening() -> Result<()> {
    let player = FakePlayer::instant();
    player.set_failure("autoplay blocked");
    let mut h = Harness::with_player(player);
    start_recording(&mut h).await?;
    h.session.commit();

    remote(&mut h, r#"{"audio": "clip.mp3", "signal": "end"}"#).await;
    assert_eq!(h.session.status(), CallStatus::Playing);

    h.settle().await;

    assert_eq!(h.session.status(), CallStatus::Listening);
    assert!(h.session.is_active(), "failed clip never ends the call");
    assert!(h.probe.tracks_enabled());

    Ok(())
}

#[tokio::test]
async fn test_clip_without_end_signal_resumes_listening() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;
    h.session.commit();

    remote(&mut h, r#"{"audio": "clip.mp3"}"#).await;
    h.settle().await;

    assert_eq!(h.session.status(), CallStatus::Listening);
    assert!(h.probe.tracks_enabled());

    Ok(())
}

#[tokio::test]
async fn test_clip_while_recording_abandons_utterance() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;

    remote(&mut h, r#"{"audio": "interrupt.mp3"}"#).await;

    assert_eq!(h.session.status(), CallStatus::Playing);
    assert!(!h.probe.recorder_active());
    assert!(!h.probe.tracks_enabled());

    h.settle().await;

    assert_eq!(h.gateway.calls(), 0, "abandoned utterance is not sent");
    assert_eq!(h.session.status(), CallStatus::Listening);

    Ok(())
}

#[tokio::test]
async fn test_new_clip_replaces_playing_clip() -> Result<()> {
    let release = Arc::new(Notify::new());
    let mut h = Harness::with_player(FakePlayer::held(Arc::clone(&release)));
    h.session.start().await?;

    remote(&mut h, r#"{"audio": "first.mp3"}"#).await;
    h.settle().await;
    remote(&mut h, r#"{"audio": "second.mp3", "signal": "end"}"#).await;
    h.settle().await;

    assert_eq!(h.session.status(), CallStatus::Playing);
    assert_eq!(
        h.player.played(),
        vec!["first.mp3".to_string(), "second.mp3".to_string()]
    );

    release.notify_one();
    h.settle().await;

    assert_eq!(h.session.status(), CallStatus::Idle);

    Ok(())
}

#[tokio::test]
async fn test_stale_events_are_ignored() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;
    h.session.commit();

    let stranger = Uuid::new_v4();
    h.session
        .handle_event(SessionEvent::Reply {
            call_id: stranger,
            reply: Ok(r#"{"call": false}"#.to_string()),
        })
        .await;
    h.session
        .handle_event(SessionEvent::PlaybackFinished {
            call_id: stranger,
            clip: 1,
            end_after: true,
            outcome: Ok(()),
        })
        .await;

    assert_eq!(h.session.status(), CallStatus::Processing);
    assert!(h.session.is_active());

    Ok(())
}

#[tokio::test]
async fn test_late_recorder_stop_after_cleanup_is_dropped() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;
    h.session.commit();

    // Recorder events are still queued when the call ends
    h.session.cleanup();
    h.settle().await;

    assert_eq!(h.gateway.calls(), 0);
    assert_eq!(h.session.status(), CallStatus::Idle);

    Ok(())
}

#[tokio::test]
async fn test_commit_outside_recording_is_ignored() -> Result<()> {
    let mut h = Harness::new();
    h.session.commit();
    assert_eq!(h.session.status(), CallStatus::Idle);

    h.session.start().await?;
    h.session.commit();
    assert_eq!(h.session.status(), CallStatus::Listening);
    assert_eq!(h.probe.recorder_stops(), 0);

    Ok(())
}

#[tokio::test]
async fn test_remaining_silence_budget_readout() -> Result<()> {
    let mut h = Harness::new();
    let t0 = start_recording(&mut h).await?;
    assert_eq!(h.session.snapshot().silence_remaining_ms, 1500);

    h.probe.set_level(QUIET);
    h.session.advance(t0 + TICK);
    h.session.advance(t0 + TICK + Duration::from_millis(600));

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.status, CallStatus::Recording);
    assert_eq!(snapshot.silence_remaining_ms, 900);
    assert!((snapshot.silence_progress - 0.4).abs() < 1e-6);

    Ok(())
}

#[tokio::test]
async fn test_finalize_mutes_before_stopping_recorder() -> Result<()> {
    let mut h = Harness::new();
    let now = start_recording(&mut h).await?;

    run_silence(&mut h, now, Duration::from_secs(2));
    assert_eq!(h.session.status(), CallStatus::Processing);
    h.settle().await;

    assert_eq!(
        h.probe.ops(),
        vec![
            "tracks_enabled",
            "recorder_start",
            "tracks_disabled",
            "recorder_stop",
            "tracks_enabled",
        ]
    );
    assert_eq!(h.session.status(), CallStatus::Listening);

    Ok(())
}

#[tokio::test]
async fn test_manual_commit_follows_finalize_order() -> Result<()> {
    let mut h = Harness::new();
    start_recording(&mut h).await?;
    h.probe.clear_ops();

    h.session.commit();

    assert_eq!(h.probe.ops(), vec!["tracks_disabled", "recorder_stop"]);

    Ok(())
}

#[tokio::test]
async fn test_tracks_muted_exactly_while_processing_or_playing() -> Result<()> {
    let release = Arc::new(Notify::new());
    let mut h = Harness::with_player(FakePlayer::held(Arc::clone(&release)));
    h.gateway.set_reply(r#"{"audio": "reply.mp3"}"#);

    fn check(h: &Harness) {
        let status = h.session.status();
        assert_eq!(
            h.session.tracks_enabled(),
            Some(!status.mutes_microphone()),
            "tracks while {status}"
        );
        assert_eq!(h.probe.tracks_enabled(), !status.mutes_microphone());
    }

    let now = start_recording(&mut h).await?;
    check(&h);

    run_silence(&mut h, now, Duration::from_secs(2));
    assert_eq!(h.session.status(), CallStatus::Processing);
    check(&h);

    h.settle().await;
    assert_eq!(h.session.status(), CallStatus::Playing);
    check(&h);

    release.notify_one();
    h.settle().await;
    assert_eq!(h.session.status(), CallStatus::Listening);
    check(&h);

    Ok(())
}
