//! Zustandsmaschine eines einzelnen Endpunkts
//!
//! Die Gegenseite wird simuliert, indem Signale direkt in den Kanal der
//! Session zugestellt werden.

mod common;

use common::*;
use consult_call::call_engine::CallEvent;
use consult_call::capture::{MediaKind, RemoteTrack};
use consult_call::signaling::{IceCandidate, MemoryHub, SessionDescription, Signal};
use consult_call::testing::host_candidate;
use consult_call::{CallConfig, CallError, CallState, DeviceError, EndReason};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Scenario {
    Idle,
    Outgoing,
    Incoming,
    ActiveCaller,
    ActiveCallee,
}

const ALL: [Scenario; 5] = [
    Scenario::Idle,
    Scenario::Outgoing,
    Scenario::Incoming,
    Scenario::ActiveCaller,
    Scenario::ActiveCallee,
];

async fn drive(hub: &MemoryHub, alice: &Peer, scenario: Scenario) {
    match scenario {
        Scenario::Idle => {}
        Scenario::Outgoing => {
            alice.session.start().await.unwrap();
        }
        Scenario::Incoming => {
            inject(hub, SESSION, "bob", Signal::Offer(offer_sdp("call")));
            alice.session.flush().await.unwrap();
        }
        Scenario::ActiveCaller => {
            alice.session.start().await.unwrap();
            inject(hub, SESSION, "bob", Signal::Answer(answer_sdp("call")));
            alice.session.flush().await.unwrap();
        }
        Scenario::ActiveCallee => {
            inject(hub, SESSION, "bob", Signal::Offer(offer_sdp("call")));
            alice.session.flush().await.unwrap();
            alice.session.accept().await.unwrap();
        }
    }

    let expected = match scenario {
        Scenario::Idle => CallState::Idle,
        Scenario::Outgoing => CallState::OutgoingPending,
        Scenario::Incoming => CallState::IncomingPending,
        Scenario::ActiveCaller | Scenario::ActiveCallee => CallState::Active,
    };
    assert_eq!(alice.state(), expected, "driving to {:?}", scenario);
}

// ============================================================================
// START / ACCEPT
// ============================================================================

#[tokio::test]
async fn start_publishes_offer_and_holds_media() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;

    alice.session.start().await.unwrap();

    assert_eq!(alice.state(), CallState::OutgoingPending);
    let media = alice.session.local_media().expect("local media");
    assert_eq!(media.tracks().len(), 2);
    assert_eq!(alice.devices.live_streams(), 2);
    assert_eq!(alice.connection().tracks().len(), 2);

    let sent = sent_by(&hub, SESSION, "alice");
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Signal::Offer(offer) => assert_eq!(Some(offer.clone()), alice.connection().local_description()),
        other => panic!("expected offer, got {:?}", other),
    }
}

#[tokio::test]
async fn second_start_is_rejected() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;

    alice.session.start().await.unwrap();
    let err = alice.session.start().await.unwrap_err();

    assert!(matches!(err, CallError::InvalidState(CallState::OutgoingPending)));
    assert_eq!(alice.factory.created(), 1);
}

#[tokio::test]
async fn incoming_offer_is_surfaced() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    let mut events = alice.session.subscribe();

    inject(&hub, SESSION, "bob", Signal::Offer(offer_sdp("call")));
    alice.session.flush().await.unwrap();

    assert_eq!(alice.state(), CallState::IncomingPending);
    let info = alice.session.incoming_call().expect("incoming call info");
    assert_eq!(info.caller_id.as_str(), "bob");
    assert_eq!(info.session_id.as_str(), "7");
    // Noch nichts angefordert, bevor angenommen wurde
    assert_eq!(alice.devices.open_count(), 0);
    assert_eq!(alice.factory.created(), 0);

    assert!(matches!(
        events.try_recv().unwrap(),
        CallEvent::StateChanged(CallState::IncomingPending)
    ));
    match events.try_recv().unwrap() {
        CallEvent::IncomingCall(event_info) => assert_eq!(event_info, info),
        other => panic!("expected incoming call, got {:?}", other),
    }
}

#[tokio::test]
async fn accept_answers_the_retained_offer() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;

    drive(&hub, &alice, Scenario::ActiveCallee).await;

    let connection = alice.connection();
    assert_eq!(connection.remote_description(), Some(offer_sdp("call")));
    assert!(alice.session.incoming_call().is_none());
    assert!(matches!(
        sent_by(&hub, SESSION, "alice").as_slice(),
        [Signal::Answer(_)]
    ));
}

#[tokio::test]
async fn accept_and_decline_without_pending_call_are_noops() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;

    alice.session.accept().await.unwrap();
    alice.session.decline().await.unwrap();

    assert_eq!(alice.state(), CallState::Idle);
    assert!(sent_by(&hub, SESSION, "alice").is_empty());
    assert_eq!(alice.devices.open_count(), 0);

    // Auch während eines eigenen Anrufs nimmt `accept` nichts an
    alice.session.start().await.unwrap();
    alice.session.accept().await.unwrap();
    assert_eq!(alice.state(), CallState::OutgoingPending);
    assert_eq!(alice.factory.created(), 1);
}

// ============================================================================
// END / DECLINE
// ============================================================================

#[tokio::test]
async fn end_from_every_state_releases_everything() {
    for scenario in ALL {
        for decline in [false, true] {
            let hub = MemoryHub::new();
            let alice = Peer::join(&hub, SESSION, "alice").await;
            drive(&hub, &alice, scenario).await;

            if decline {
                alice.session.decline().await.unwrap();
            } else {
                alice.session.end().await.unwrap();
            }

            alice.assert_released();
            let expected_end_calls = match scenario {
                Scenario::Idle => 0,
                _ => 1,
            };
            assert_eq!(
                count_end_calls(&sent_by(&hub, SESSION, "alice")),
                expected_end_calls,
                "{:?} decline={}",
                scenario,
                decline
            );
        }
    }
}

#[tokio::test]
async fn decline_reports_declined_reason() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::Incoming).await;

    alice.session.decline().await.unwrap();

    assert_eq!(alice.session.snapshot().last_end_reason, Some(EndReason::Declined));
}

#[tokio::test]
async fn remote_end_call_from_every_state_returns_to_idle() {
    for scenario in ALL {
        let hub = MemoryHub::new();
        let alice = Peer::join(&hub, SESSION, "alice").await;
        drive(&hub, &alice, scenario).await;

        inject(&hub, SESSION, "bob", Signal::EndCall);
        alice.session.flush().await.unwrap();

        alice.assert_released();
        // Auf ein End-Call wird nicht mit einem End-Call geantwortet
        assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 0);
        if !matches!(scenario, Scenario::Idle) {
            assert_eq!(
                alice.session.snapshot().last_end_reason,
                Some(EndReason::RemoteHangup)
            );
        }
    }
}

#[tokio::test]
async fn end_emits_ended_then_idle() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::ActiveCaller).await;
    let mut events = alice.session.subscribe();

    alice.session.end().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(matches!(
        received.as_slice(),
        [
            CallEvent::StateChanged(CallState::Ended),
            CallEvent::StateChanged(CallState::Idle),
            CallEvent::CallEnded {
                reason: EndReason::LocalHangup
            },
        ]
    ));
}

// ============================================================================
// IN-FLIGHT SETUP
// ============================================================================

#[tokio::test]
async fn end_call_during_start_in_flight() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.devices.set_delay(Duration::from_millis(100));

    let (started, state) = tokio::join!(alice.session.start(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(alice.state(), CallState::OutgoingPending);
        inject(&hub, SESSION, "bob", Signal::EndCall);
        alice.session.flush().await.unwrap();
        alice.state()
    });

    started.unwrap();
    assert_eq!(state, CallState::Idle);
    alice.assert_released();
    assert!(sent_by(&hub, SESSION, "alice")
        .iter()
        .all(|s| !matches!(s, Signal::Offer(_))));
}

#[tokio::test]
async fn end_call_during_accept_in_flight() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::Incoming).await;
    alice.devices.set_delay(Duration::from_millis(100));

    let (accepted, state) = tokio::join!(alice.session.accept(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        inject(&hub, SESSION, "bob", Signal::EndCall);
        alice.session.flush().await.unwrap();
        alice.state()
    });

    accepted.unwrap();
    assert_eq!(state, CallState::Idle);
    alice.assert_released();
    assert!(sent_by(&hub, SESSION, "alice").is_empty());

    // Die Session nimmt danach wieder neue Anrufe an
    alice.devices.set_delay(Duration::from_millis(0));
    drive(&hub, &alice, Scenario::ActiveCallee).await;
}

#[tokio::test]
async fn local_end_during_start_in_flight() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.devices.set_delay(Duration::from_millis(100));

    let (started, state) = tokio::join!(alice.session.start(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        alice.session.end().await.unwrap();
        alice.state()
    });

    started.unwrap();
    assert_eq!(state, CallState::Idle);
    alice.assert_released();
    let sent = sent_by(&hub, SESSION, "alice");
    assert_eq!(count_end_calls(&sent), 1);
    assert!(sent.iter().all(|s| !matches!(s, Signal::Offer(_))));
}

#[tokio::test]
async fn end_mid_setup_frees_capture_before_returning() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.devices.set_delay(Duration::from_millis(100));

    let (started, ()) = tokio::join!(alice.session.start(), async {
        // Mikrofon offen, Kamera noch im Permission-Prompt
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(alice.devices.live_streams(), 1);

        alice.session.end().await.unwrap();

        assert_eq!(alice.state(), CallState::Idle);
        assert!(!alice.capture.is_held());
        assert_eq!(alice.devices.live_streams(), 0);
        assert_eq!(alice.factory.live_connections(), 0);
    });
    started.unwrap();

    alice.devices.set_delay(Duration::ZERO);
    alice.session.start().await.unwrap();
    assert_eq!(alice.state(), CallState::OutgoingPending);
}

#[tokio::test]
async fn decline_mid_accept_frees_capture_before_returning() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::Incoming).await;
    alice.devices.set_delay(Duration::from_millis(100));

    let (accepted, ()) = tokio::join!(alice.session.accept(), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(alice.devices.live_streams(), 1);

        alice.session.decline().await.unwrap();

        assert_eq!(alice.state(), CallState::Idle);
        assert!(!alice.capture.is_held());
        assert_eq!(alice.devices.live_streams(), 0);
        assert_eq!(alice.factory.live_connections(), 0);
    });
    accepted.unwrap();
    assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 1);
    assert!(sent_by(&hub, SESSION, "alice")
        .iter()
        .all(|s| !matches!(s, Signal::Answer(_))));

    alice.devices.set_delay(Duration::ZERO);
    alice.session.start().await.unwrap();
    assert_eq!(alice.state(), CallState::OutgoingPending);
}

// ============================================================================
// COLLISION / SELF-FILTER
// ============================================================================

#[tokio::test]
async fn offers_while_busy_are_dropped() {
    for scenario in [
        Scenario::Outgoing,
        Scenario::Incoming,
        Scenario::ActiveCaller,
        Scenario::ActiveCallee,
    ] {
        let hub = MemoryHub::new();
        let alice = Peer::join(&hub, SESSION, "alice").await;
        drive(&hub, &alice, scenario).await;

        let before = alice.session.snapshot();
        let connections = alice.factory.created();

        // Absender vor und nach "alice" in der Sortierung
        inject(&hub, SESSION, "aaron", Signal::Offer(offer_sdp("early")));
        inject(&hub, SESSION, "bob", Signal::Offer(offer_sdp("late")));
        inject(&hub, SESSION, "carol", Signal::Offer(offer_sdp("other")));
        alice.session.flush().await.unwrap();

        assert_eq!(alice.state(), before.state, "{:?}", scenario);
        assert_eq!(alice.session.incoming_call(), before.incoming_call);
        assert_eq!(alice.factory.created(), connections);
    }
}

#[tokio::test]
async fn default_policy_drops_offer_from_lower_identity() {
    let hub = MemoryHub::new();
    let bob = Peer::join(&hub, SESSION, "bob").await;
    bob.session.start().await.unwrap();

    inject(&hub, SESSION, "alice", Signal::Offer(offer_sdp("glare")));
    bob.session.flush().await.unwrap();

    assert_eq!(bob.state(), CallState::OutgoingPending);
    assert_eq!(bob.factory.created(), 1);
    assert!(!bob.connection().is_closed());
    assert!(sent_by(&hub, SESSION, "bob")
        .iter()
        .all(|s| !matches!(s, Signal::Answer(_))));
}

#[tokio::test]
async fn own_signals_are_ignored_in_every_state() {
    for scenario in ALL {
        let hub = MemoryHub::new();
        let alice = Peer::join(&hub, SESSION, "alice").await;
        drive(&hub, &alice, scenario).await;
        let before = alice.session.snapshot();
        let connections = alice.factory.created();

        for signal in [
            Signal::Offer(offer_sdp("echo")),
            Signal::Answer(answer_sdp("echo")),
            Signal::IceCandidate(host_candidate(9)),
            Signal::EndCall,
        ] {
            inject(&hub, SESSION, "alice", signal);
        }
        alice.session.flush().await.unwrap();

        assert_eq!(alice.state(), before.state, "{:?}", scenario);
        assert_eq!(alice.session.incoming_call(), before.incoming_call);
        assert_eq!(alice.factory.created(), connections);
        if connections > 0 {
            assert!(alice.connection().candidates().is_empty());
        }
    }
}

// ============================================================================
// ANSWERS / CANDIDATES
// ============================================================================

#[tokio::test]
async fn candidates_in_any_order_end_active() {
    let orders: [[u8; 3]; 6] = [
        [1, 2, 3],
        [1, 3, 2],
        [2, 1, 3],
        [2, 3, 1],
        [3, 1, 2],
        [3, 2, 1],
    ];

    for order in orders {
        for answer_at in 0..=order.len() {
            let hub = MemoryHub::new();
            let alice = Peer::join(&hub, SESSION, "alice").await;
            alice.session.start().await.unwrap();

            let mut signals: Vec<Signal> = order
                .iter()
                .map(|n| Signal::IceCandidate(host_candidate(*n)))
                .collect();
            signals.insert(answer_at, Signal::Answer(answer_sdp("call")));
            for signal in signals {
                inject(&hub, SESSION, "bob", signal);
            }
            alice.session.flush().await.unwrap();

            assert_eq!(alice.state(), CallState::Active, "{:?} / {}", order, answer_at);
            let mut applied: Vec<String> = alice
                .connection()
                .candidates()
                .into_iter()
                .map(|c| c.candidate)
                .collect();
            applied.sort();
            let mut expected: Vec<String> =
                (1..=3).map(|n| host_candidate(n).candidate).collect();
            expected.sort();
            assert_eq!(applied, expected);
        }
    }
}

#[tokio::test]
async fn malformed_candidate_is_ignored() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::ActiveCaller).await;

    let garbage = IceCandidate {
        candidate: "not a candidate".to_string(),
        ..Default::default()
    };
    inject(&hub, SESSION, "bob", Signal::IceCandidate(garbage));
    inject(&hub, SESSION, "bob", Signal::IceCandidate(host_candidate(1)));
    alice.session.flush().await.unwrap();

    assert_eq!(alice.state(), CallState::Active);
    assert_eq!(alice.connection().candidates(), vec![host_candidate(1)]);
}

#[tokio::test]
async fn candidate_buffer_keeps_newest() {
    let hub = MemoryHub::new();
    let config = CallConfig {
        candidate_buffer_limit: 2,
        ..test_config()
    };
    let alice = Peer::join_with(&hub, SESSION, "alice", config).await;
    alice.session.start().await.unwrap();

    for n in 1..=3 {
        inject(&hub, SESSION, "bob", Signal::IceCandidate(host_candidate(n)));
    }
    inject(&hub, SESSION, "bob", Signal::Answer(answer_sdp("call")));
    alice.session.flush().await.unwrap();

    assert_eq!(
        alice.connection().candidates(),
        vec![host_candidate(2), host_candidate(3)]
    );
}

#[tokio::test]
async fn candidates_before_offer_are_applied_on_accept() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;

    inject(&hub, SESSION, "bob", Signal::IceCandidate(host_candidate(1)));
    inject(&hub, SESSION, "bob", Signal::Offer(offer_sdp("call")));
    inject(&hub, SESSION, "bob", Signal::IceCandidate(host_candidate(2)));
    alice.session.flush().await.unwrap();
    alice.session.accept().await.unwrap();

    assert_eq!(alice.state(), CallState::Active);
    assert_eq!(
        alice.connection().candidates(),
        vec![host_candidate(1), host_candidate(2)]
    );
}

#[tokio::test]
async fn stale_and_malformed_answers_are_ignored() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.session.start().await.unwrap();

    inject(
        &hub,
        SESSION,
        "bob",
        Signal::Answer(SessionDescription::answer("garbage")),
    );
    alice.session.flush().await.unwrap();
    assert_eq!(alice.state(), CallState::OutgoingPending);

    inject(&hub, SESSION, "bob", Signal::Answer(answer_sdp("first")));
    inject(&hub, SESSION, "bob", Signal::Answer(answer_sdp("duplicate")));
    alice.session.flush().await.unwrap();

    assert_eq!(alice.state(), CallState::Active);
    assert_eq!(alice.connection().remote_description(), Some(answer_sdp("first")));
}

#[tokio::test]
async fn answer_while_idle_is_ignored() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;

    inject(&hub, SESSION, "bob", Signal::Answer(answer_sdp("stray")));
    alice.session.flush().await.unwrap();

    assert_eq!(alice.state(), CallState::Idle);
    assert_eq!(alice.factory.created(), 0);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn device_error_on_start_returns_to_idle() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.devices.deny(MediaKind::Video);

    let err = alice.session.start().await.unwrap_err();

    assert!(matches!(
        err,
        CallError::Device(DeviceError::PermissionDenied(MediaKind::Video))
    ));
    alice.assert_released();
    assert!(sent_by(&hub, SESSION, "alice").is_empty());
    assert_eq!(alice.session.snapshot().last_end_reason, Some(EndReason::SetupFailed));
}

#[tokio::test]
async fn audio_only_backend_places_calls_with_default_config() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.devices.unsupported(MediaKind::Video);

    alice.session.start().await.unwrap();

    assert_eq!(alice.state(), CallState::OutgoingPending);
    let media = alice.session.local_media().unwrap();
    assert_eq!(media.tracks().len(), 1);
    assert_eq!(media.tracks_of(MediaKind::Audio).count(), 1);
    assert_eq!(alice.connection().tracks().len(), 1);
}

#[tokio::test]
async fn device_error_on_accept_notifies_caller() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::Incoming).await;
    alice.devices.remove(MediaKind::Audio);

    let err = alice.session.accept().await.unwrap_err();

    assert!(matches!(
        err,
        CallError::Device(DeviceError::NotFound(MediaKind::Audio))
    ));
    alice.assert_released();
    assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 1);
}

#[tokio::test]
async fn malformed_offer_fails_accept_quietly() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    inject(
        &hub,
        SESSION,
        "bob",
        Signal::Offer(SessionDescription::offer("garbage")),
    );
    alice.session.flush().await.unwrap();
    assert_eq!(alice.state(), CallState::IncomingPending);

    alice.session.accept().await.unwrap();

    alice.assert_released();
    assert_eq!(alice.session.snapshot().last_end_reason, Some(EndReason::SetupFailed));
    assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 1);
}

#[tokio::test]
async fn connection_failure_on_start_returns_to_idle() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    alice.factory.set_failing(true);

    alice.session.start().await.unwrap();

    alice.assert_released();
    assert!(sent_by(&hub, SESSION, "alice").is_empty());
}

#[tokio::test]
async fn publish_failure_is_not_fatal() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    hub.set_failing(true);

    alice.session.start().await.unwrap();
    assert_eq!(alice.state(), CallState::OutgoingPending);

    inject(&hub, SESSION, "bob", Signal::Answer(answer_sdp("call")));
    alice.session.flush().await.unwrap();
    assert_eq!(alice.state(), CallState::Active);

    alice.session.end().await.unwrap();
    alice.assert_released();
}

// ============================================================================
// WATCHDOG / RING TIMEOUT
// ============================================================================

#[tokio::test]
async fn connectivity_loss_ends_call() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::ActiveCaller).await;
    let mut events = alice.session.subscribe();

    let connection = alice.connection();
    connection.emit_connectivity(consult_call::call_engine::ConnectivityState::Connected);
    alice.session.flush().await.unwrap();
    assert!(wait_until(|| matches!(
        events.try_recv(),
        Ok(CallEvent::ConnectivityChanged(_))
    ))
    .await);
    assert_eq!(alice.state(), CallState::Active);

    connection.emit_connectivity(consult_call::call_engine::ConnectivityState::Failed);
    assert!(wait_until(|| alice.state() == CallState::Idle).await);

    alice.assert_released();
    assert_eq!(
        alice.session.snapshot().last_end_reason,
        Some(EndReason::ConnectivityLost)
    );
    assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out() {
    let hub = MemoryHub::new();
    let config = CallConfig {
        ring_timeout_secs: Some(45),
        ..test_config()
    };
    let alice = Peer::join_with(&hub, SESSION, "alice", config).await;
    alice.session.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(44)).await;
    alice.session.flush().await.unwrap();
    assert_eq!(alice.state(), CallState::OutgoingPending);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(wait_until(|| alice.state() == CallState::Idle).await);

    alice.assert_released();
    assert_eq!(alice.session.snapshot().last_end_reason, Some(EndReason::NoAnswer));
    assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 1);
}

#[tokio::test(start_paused = true)]
async fn answered_call_does_not_time_out() {
    let hub = MemoryHub::new();
    let config = CallConfig {
        ring_timeout_secs: Some(45),
        ..test_config()
    };
    let alice = Peer::join_with(&hub, SESSION, "alice", config).await;
    drive(&hub, &alice, Scenario::ActiveCaller).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    alice.session.flush().await.unwrap();

    assert_eq!(alice.state(), CallState::Active);
}

// ============================================================================
// MEDIA
// ============================================================================

#[tokio::test]
async fn remote_tracks_are_collected() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::ActiveCaller).await;
    assert!(alice.session.remote_media().is_none());

    let connection = alice.connection();
    connection.emit_track(RemoteTrack::new("bob-audio", "bob", MediaKind::Audio));
    connection.emit_track(RemoteTrack::new("bob-audio", "bob", MediaKind::Audio));
    connection.emit_track(RemoteTrack::new("bob-video", "bob", MediaKind::Video));

    assert!(wait_until(|| alice
        .session
        .remote_media()
        .map(|m| m.tracks().len() == 2)
        .unwrap_or(false))
    .await);

    alice.session.end().await.unwrap();
    assert!(alice.session.remote_media().is_none());
}

#[tokio::test]
async fn mute_and_camera_off_toggle_tracks() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    drive(&hub, &alice, Scenario::ActiveCaller).await;

    alice.session.set_audio_enabled(false);
    let media = alice.session.local_media().unwrap();
    assert!(media.tracks_of(MediaKind::Audio).all(|t| !t.is_enabled()));
    assert!(media.tracks_of(MediaKind::Video).all(|t| t.is_enabled()));
    assert!(!alice.devices.sink(MediaKind::Audio).unwrap().is_enabled());

    alice.session.set_video_enabled(false);
    alice.session.set_audio_enabled(true);
    assert!(media.tracks_of(MediaKind::Audio).all(|t| t.is_enabled()));
    assert!(media.tracks_of(MediaKind::Video).all(|t| !t.is_enabled()));

    // Kein Neuverhandeln
    assert_eq!(alice.factory.created(), 1);
    assert_eq!(sent_by(&hub, SESSION, "alice").len(), 1);
    assert_eq!(alice.state(), CallState::Active);
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

#[tokio::test]
async fn leave_ends_call_and_unsubscribes() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    assert_eq!(hub.subscriber_count(&channel(SESSION)), 1);
    drive(&hub, &alice, Scenario::ActiveCaller).await;

    alice.session.leave().await;

    assert_eq!(hub.subscriber_count(&channel(SESSION)), 0);
    alice.assert_released();
    assert_eq!(count_end_calls(&sent_by(&hub, SESSION, "alice")), 1);
    assert!(matches!(
        alice.session.start().await.unwrap_err(),
        CallError::SessionClosed
    ));
}

#[tokio::test]
async fn dropping_session_unsubscribes() {
    let hub = MemoryHub::new();
    let alice = Peer::join(&hub, SESSION, "alice").await;
    assert_eq!(hub.subscriber_count(&channel(SESSION)), 1);

    drop(alice);

    assert!(wait_until(|| hub.subscriber_count(&channel(SESSION)) == 0).await);
}
