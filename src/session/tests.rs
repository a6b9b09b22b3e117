//! Integration tests for the session layer.
//!
//! These drive a full session against the in-memory transport: handshake,
//! token-gated submission, cumulative acknowledgment, dedup, and teardown.

use super::*;
use crate::test_utils::{FailingSink, ServerEnd, TestCodec, result_batch, transport_pair};
use crate::types::PayloadKind;

use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use tokio::time::timeout;

fn start_session(config: SessionConfig) -> (Session, SessionEvents, ServerEnd) {
    let _ = tracing_subscriber::fmt::try_init();
    let (sink, stream, server) = transport_pair();
    let (session, events) = Session::start(sink, stream, Arc::new(TestCodec), config);
    (session, events, server)
}

async fn ready_session(
    config: SessionConfig,
    sources: &[&str],
    tokens: u32,
) -> (Session, SessionEvents, ServerEnd) {
    let (session, events, server) = start_session(config);
    server.send_welcome(sources, tokens);
    session.wait_ready().await.expect("handshake should complete");
    (session, events, server)
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn payload(byte: u8) -> Option<FramePayload> {
    Some(FramePayload::new(vec![byte; 8]))
}

#[tokio::test]
async fn handshake_seeds_ledger_and_reaches_ready() {
    let (session, _events, _server) =
        ready_session(SessionConfig::default(), &["camera", "audio"], 2).await;

    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.accepts_source("camera"));
    assert!(session.accepts_source("audio"));
    assert!(!session.accepts_source("lidar"));
    assert_eq!(session.available_tokens("camera"), Some(2));
}

#[tokio::test]
async fn advertised_quota_is_clamped_to_ceiling() {
    let config = SessionConfig { token_ceiling: 3, ..SessionConfig::default() };
    let (session, _events, _server) = ready_session(config, &["camera"], 1000).await;
    assert_eq!(session.available_tokens("camera"), Some(3));
}

#[tokio::test]
async fn producer_is_never_invoked_without_a_token() {
    let (session, _events, _server) = ready_session(SessionConfig::default(), &["camera"], 1).await;
    let camera = session.source("camera");
    let produced = AtomicUsize::new(0);

    let outcome = camera
        .try_submit(|| {
            produced.fetch_add(1, Ordering::SeqCst);
            payload(1)
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Sent { sequence_id: 1 }));
    assert_eq!(produced.load(Ordering::SeqCst), 1);

    // Quota exhausted: the closure must not run again.
    let outcome = camera
        .try_submit(|| {
            produced.fetch_add(1, Ordering::SeqCst);
            payload(2)
        })
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::NoToken);
    assert_eq!(produced.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn third_submit_blocks_until_an_ack_frees_a_token() {
    let (session, _events, mut server) =
        ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let submitter = tokio::spawn(async move {
        for byte in 1..=3u8 {
            let outcome = camera.submit(|| payload(byte)).await.unwrap();
            progress_tx.send(outcome.sequence_id().unwrap()).unwrap();
        }
    });

    assert_eq!(progress_rx.recv().await, Some(1));
    assert_eq!(progress_rx.recv().await, Some(2));
    assert!(
        timeout(Duration::from_millis(100), progress_rx.recv()).await.is_err(),
        "third submission should block with the quota exhausted"
    );

    server.ack("camera", 1, 1);

    let third = timeout(Duration::from_secs(1), progress_rx.recv())
        .await
        .expect("ack should unblock the third submission");
    assert_eq!(third, Some(3));
    submitter.await.unwrap();

    for expected in 1..=3u64 {
        assert_eq!(server.recv_frame().await.unwrap().sequence_id, expected);
    }
}

#[tokio::test]
async fn single_ack_releases_every_earlier_frame() {
    let config = SessionConfig { token_ceiling: 10, ..SessionConfig::default() };
    let (session, _events, server) = ready_session(config, &["camera"], 10).await;
    let camera = session.source("camera");

    for byte in 0..10u8 {
        camera.submit(|| payload(byte)).await.unwrap();
    }
    assert_eq!(session.available_tokens("camera"), Some(0));

    // The server aggregates and acknowledges only frame 7.
    server.ack("camera", 7, 1);

    eventually("cumulative release of frames 1-7", || {
        session.available_tokens("camera") == Some(7)
    })
    .await;

    // Re-acking the same frame must not mint tokens.
    server.ack("camera", 7, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.available_tokens("camera"), Some(7));
}

#[tokio::test]
async fn stale_result_batches_are_dropped_wholesale() {
    let (session, mut events, server) =
        ready_session(SessionConfig::default(), &["camera"], 5).await;
    let camera = session.source("camera");
    for byte in 0..5u8 {
        camera.submit(|| payload(byte)).await.unwrap();
    }

    for (seq, update_count) in [(1, 5), (2, 3), (3, 4), (4, 5), (5, 6)] {
        server.send_result(&result_batch("camera", seq, update_count));
    }

    let mut accepted = Vec::new();
    while accepted.last() != Some(&6) {
        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(SessionEvent::Result(batch)) => accepted.push(batch.update_count),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(accepted, vec![5, 6]);

    // Dropped batches still returned their tokens.
    eventually("tokens from dropped batches", || session.available_tokens("camera") == Some(5))
        .await;
}

#[tokio::test]
async fn lenient_mode_forwards_out_of_order_batches() {
    let config = SessionConfig { strict_result_order: false, ..SessionConfig::default() };
    let (session, mut events, server) = ready_session(config, &["camera"], 5).await;
    let camera = session.source("camera");
    for byte in 0..2u8 {
        camera.submit(|| payload(byte)).await.unwrap();
    }

    server.send_result(&result_batch("camera", 1, 5));
    server.send_result(&result_batch("camera", 2, 3));

    let mut seen = Vec::new();
    for _ in 0..2 {
        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(SessionEvent::Result(batch)) => seen.push(batch.update_count),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(seen, vec![5, 3]);
}

#[tokio::test]
async fn disconnect_before_welcome_is_a_handshake_failure() {
    let (session, mut events, mut server) = start_session(SessionConfig::default());
    server.disconnect();

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Closed(DisconnectReason::HandshakeFailure)) => {}
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.wait_ready().await.is_err());
}

#[tokio::test]
async fn disconnect_after_ready_is_connection_lost_and_unblocks_submits() {
    let (session, mut events, mut server) =
        ready_session(SessionConfig::default(), &["camera"], 0).await;
    let camera = session.source("camera");

    let blocked = tokio::spawn(async move { camera.submit(|| payload(1)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.disconnect();

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Closed(DisconnectReason::ConnectionLost)) => {}
        other => panic!("expected connection lost, got {other:?}"),
    }
    let result = timeout(Duration::from_secs(1), blocked)
        .await
        .expect("teardown must unblock the submission")
        .unwrap();
    assert!(matches!(result, Err(SessionError::Closed)));
}

#[tokio::test]
async fn stop_is_idempotent_and_notifies_once() {
    let (session, mut events, _server) =
        ready_session(SessionConfig::default(), &["camera"], 1).await;

    tokio::join!(session.stop(), session.stop());
    session.stop().await;

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Closed(DisconnectReason::Stopped)) => {}
        other => panic!("expected stopped, got {other:?}"),
    }
    assert!(events.recv().await.is_none());
    assert!(!session.is_running());
    assert_eq!(session.state(), SessionState::NotConnected);
}

#[tokio::test]
async fn send_failure_returns_the_token_and_spares_the_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_real_sink, stream, server) = transport_pair();
    let (session, _events) = Session::start(
        Box::new(FailingSink),
        stream,
        Arc::new(TestCodec),
        SessionConfig::default(),
    );
    server.send_welcome(&["camera"], 2);
    session.wait_ready().await.unwrap();

    let camera = session.source("camera");
    let err = camera.submit(|| payload(1)).await.unwrap_err();
    assert!(matches!(err, SessionError::Send { .. }));

    assert!(session.is_running());
    assert_eq!(session.available_tokens("camera"), Some(2));
}

#[tokio::test]
async fn fatal_result_status_ends_the_session_once() {
    let (session, mut events, server) =
        ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();

    let mut batch = result_batch("camera", 1, 1);
    batch.status = ResultStatus::NoEngineForSource;
    server.send_result(&batch);

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Closed(DisconnectReason::ServerError)) => {}
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn non_fatal_failure_status_drops_the_batch_but_returns_the_token() {
    let (session, mut events, server) =
        ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();

    let mut batch = result_batch("camera", 1, 1);
    batch.status = ResultStatus::Unknown;
    server.send_result(&batch);

    eventually("token returned for failed frame", || {
        session.available_tokens("camera") == Some(2)
    })
    .await;
    assert!(session.is_running());

    // The batch itself never reaches the application.
    server.send_result(&result_batch("camera", 1, 2));
    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Result(batch)) => assert_eq!(batch.update_count, 2),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn return_token_flag_defers_the_release() {
    let (session, mut events, server) =
        ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();
    assert_eq!(session.available_tokens("camera"), Some(1));

    let mut first = result_batch("camera", 1, 1);
    first.return_token = false;
    server.send_result(&first);

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Result(batch)) => assert_eq!(batch.update_count, 1),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(session.available_tokens("camera"), Some(1));

    // The final batch for the frame carries the token home.
    server.send_result(&result_batch("camera", 1, 2));
    eventually("deferred token release", || session.available_tokens("camera") == Some(2)).await;
}

#[tokio::test]
async fn declining_producer_returns_the_token() {
    let (session, _events, mut server) =
        ready_session(SessionConfig::default(), &["camera"], 1).await;
    let camera = session.source("camera");

    let outcome = camera.submit(|| None).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Declined);
    assert_eq!(session.available_tokens("camera"), Some(1));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.try_recv_frame().is_none());
}

#[tokio::test]
async fn sequence_ids_count_per_source() {
    let (session, _events, mut server) =
        ready_session(SessionConfig::default(), &["camera", "audio"], 5).await;
    let camera = session.source("camera");
    let audio = session.source("audio");

    camera.submit(|| payload(1)).await.unwrap();
    audio.submit(|| payload(2)).await.unwrap();
    camera.submit(|| payload(3)).await.unwrap();

    let mut camera_seqs = Vec::new();
    let mut audio_seqs = Vec::new();
    for _ in 0..3 {
        let frame = server.recv_frame().await.unwrap();
        match frame.source_name.as_str() {
            "camera" => camera_seqs.push(frame.sequence_id),
            "audio" => audio_seqs.push(frame.sequence_id),
            other => panic!("unexpected source {other}"),
        }
    }
    assert_eq!(camera_seqs, vec![1, 2]);
    assert_eq!(audio_seqs, vec![1]);
}

#[tokio::test]
async fn measurement_mode_emits_interval_reports() {
    let config = SessionConfig::default().with_measurement(2);
    let (session, mut events, server) = ready_session(config, &["camera"], 5).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();
    camera.submit(|| payload(2)).await.unwrap();

    server.ack("camera", 1, 1);
    server.ack("camera", 2, 2);

    let mut report = None;
    for _ in 0..3 {
        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(SessionEvent::Measurement(r)) => report = Some(r),
            Some(SessionEvent::Result(_)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    let report = report.expect("a report after two acknowledged frames");
    assert_eq!(report.source_name, "camera");
    assert_eq!(report.acked_frames, 2);
}

#[tokio::test]
async fn undecodable_message_after_ready_is_skipped() {
    let (session, mut events, server) =
        ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();

    server.send_raw(vec![0xFF, 0x00, 0x01]);
    server.send_result(&result_batch("camera", 1, 1));

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Result(batch)) => assert_eq!(batch.update_count, 1),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(session.is_running());
}

#[tokio::test]
async fn undecodable_first_message_fails_the_handshake() {
    let (_session, mut events, server) = start_session(SessionConfig::default());
    server.send_raw(vec![0xFF]);

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Closed(DisconnectReason::HandshakeFailure)) => {}
        other => panic!("expected handshake failure, got {other:?}"),
    }
}

#[tokio::test]
async fn results_before_the_welcome_fail_the_handshake() {
    let (_session, mut events, server) = start_session(SessionConfig::default());
    server.send_result(&result_batch("camera", 1, 1));

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Closed(DisconnectReason::HandshakeFailure)) => {}
        other => panic!("expected handshake failure, got {other:?}"),
    }
}

#[tokio::test]
async fn late_welcome_replaces_the_ledger() {
    let (session, _events, server) = ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();
    assert_eq!(session.available_tokens("camera"), Some(1));

    server.send_welcome(&["camera"], 4);
    eventually("reseeded quota", || session.available_tokens("camera") == Some(4)).await;
}

#[tokio::test]
async fn result_payloads_reach_the_application_intact() {
    let (session, mut events, server) =
        ready_session(SessionConfig::default(), &["camera"], 2).await;
    let camera = session.source("camera");
    camera.submit(|| payload(1)).await.unwrap();

    let mut batch = result_batch("camera", 1, 1);
    batch.results[0].kind = PayloadKind::Image;
    batch.results[0].payload = vec![0xAB; 32].into();
    server.send_result(&batch);

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(SessionEvent::Result(batch)) => {
            assert_eq!(batch.results.len(), 1);
            assert_eq!(batch.results[0].kind, PayloadKind::Image);
            assert_eq!(batch.results[0].payload.len(), 32);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
