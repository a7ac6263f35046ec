// Integration tests for `Correlator` against the in-process loopback bridge.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{Instant, timeout};

use simlink_api::{BridgeCall, LoopbackBridge};
use simlink_core::{
    ConnectionState, CoreError, Correlator, EventRef, LinkConfig, LinkEvent, ReconnectConfig,
    VariableRef,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> LinkConfig {
    LinkConfig {
        monitor_enabled: false,
        ..LinkConfig::default()
    }
}

async fn started(bridge: &LoopbackBridge) -> Correlator {
    let correlator = Correlator::new(bridge.clone(), config());
    correlator.start().await;
    correlator
}

fn altitude() -> VariableRef {
    VariableRef::new("PLANE ALTITUDE", "feet")
}

fn count_calls(bridge: &LoopbackBridge, pred: impl Fn(&BridgeCall) -> bool) -> usize {
    bridge.calls().iter().filter(|call| pred(call)).count()
}

async fn wait_for_state(correlator: &Correlator, wanted: ConnectionState) {
    let mut rx = correlator.connection_state();
    timeout(Duration::from_secs(5), rx.wait_for(|state| *state == wanted))
        .await
        .unwrap()
        .unwrap();
}

async fn wait_for_pending(correlator: &Correlator, count: usize) {
    while correlator.stats().pending < count {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_get_value_echoes_simulator_value() {
    let bridge = LoopbackBridge::running();
    bridge.seed("PLANE ALTITUDE", 3500.0);
    let correlator = started(&bridge).await;

    let read = correlator.get_value(&altitude().with_alias("alt")).await;

    assert_eq!(read.value(), 3500.0);
    assert_eq!(read.output_name(), "alt");
    assert!(correlator.is_connected());
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_same_key_reuses_definition() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;

    correlator.get_value(&altitude().with_value(1.0)).await;
    let first = correlator.definition_id(&altitude()).unwrap();
    correlator.get_value(&altitude().with_value(9.0)).await;
    let second = correlator.definition_id(&altitude()).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        count_calls(&bridge, |c| matches!(c, BridgeCall::AddDefinition { .. })),
        1
    );
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unit_distinguishes_definitions() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;

    let meters = VariableRef::new("PLANE ALTITUDE", "meters");
    correlator.get_multiple(&[altitude(), meters.clone()]).await;

    assert_ne!(
        correlator.definition_id(&altitude()),
        correlator.definition_id(&meters)
    );
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_withheld_read_does_not_delay_others() {
    let bridge = LoopbackBridge::running();
    bridge.seed("AIRSPEED INDICATED", 120.0);
    bridge.withhold("GEAR HANDLE POSITION");
    let correlator = started(&bridge).await;

    let start = Instant::now();
    let slow = {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .get_value(&VariableRef::new("GEAR HANDLE POSITION", "bool"))
                .await
        })
    };

    let fast = correlator
        .get_value(&VariableRef::new("AIRSPEED INDICATED", "knots"))
        .await;
    assert_eq!(fast.value(), 120.0);
    assert!(start.elapsed() < Duration::from_secs(1));

    let gear = slow.await.unwrap();
    assert!(gear.is_unavailable());
    assert!(start.elapsed() >= config().request_timeout);
    assert_eq!(correlator.stats().pending, 0);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_request() {
    let bridge = LoopbackBridge::running();
    bridge.withhold("PLANE ALTITUDE");
    let correlator = started(&bridge).await;

    let err = correlator.try_get_value(&altitude()).await.unwrap_err();

    assert!(matches!(err, CoreError::Timeout { timeout_ms: 2000, .. }));
    // The link itself is still fine.
    assert!(correlator.is_connected());
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_get_multiple_returns_successful_subset() {
    let bridge = LoopbackBridge::running();
    bridge.seed("PLANE ALTITUDE", 3500.0);
    bridge.seed("AIRSPEED INDICATED", 120.0);
    bridge.withhold("VERTICAL SPEED");
    let correlator = started(&bridge).await;

    let reads = correlator
        .get_multiple(&[
            altitude(),
            VariableRef::new("VERTICAL SPEED", "feet per minute"),
            VariableRef::new("AIRSPEED INDICATED", "knots"),
        ])
        .await;

    let names: Vec<_> = reads.iter().map(VariableRef::name).collect();
    assert_eq!(names, ["PLANE ALTITUDE", "AIRSPEED INDICATED"]);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_simulator_yields_nan() {
    let bridge = LoopbackBridge::new();
    let correlator = started(&bridge).await;

    let start = Instant::now();
    let read = correlator.get_value(&altitude()).await;

    assert!(read.is_unavailable());
    assert!(start.elapsed() <= config().request_timeout);
    assert_eq!(
        correlator.try_get_value(&altitude()).await.unwrap_err(),
        CoreError::Unavailable
    );
    assert!(!correlator.is_connected());
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_variable_is_rejected_before_connecting() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;

    let err = correlator
        .try_get_value(&VariableRef::new("", "feet"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ValidationFailed { .. }));
    assert_eq!(bridge.opens(), 0);
    correlator.shutdown().await;
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_set_then_get_round_trips_through_simulator() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    let camera = VariableRef::new("CAMERA STATE", "");

    let written = correlator.set_value(&camera.with_value(2.0)).await.unwrap();
    assert_eq!(written.value(), 2.0);

    let read = correlator.get_value(&camera).await;
    assert_eq!(read.value(), 2.0);
    assert_eq!(bridge.value("CAMERA STATE"), Some(2.0));
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_value_without_confirmation_is_none() {
    let bridge = LoopbackBridge::running();
    bridge.withhold("CAMERA STATE");
    let correlator = started(&bridge).await;

    let result = correlator
        .set_value(&VariableRef::new("CAMERA STATE", "").with_value(3.0))
        .await;

    assert_eq!(result, None);
    // The write itself still went through.
    assert_eq!(bridge.value("CAMERA STATE"), Some(3.0));
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_value_rejects_non_finite() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;

    let err = correlator
        .try_set_value(&altitude().with_value(f64::NAN))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ValidationFailed { .. }));
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_multiple_writes_in_order() {
    let bridge = LoopbackBridge::running();
    bridge.withhold("A");
    let correlator = started(&bridge).await;

    let written = correlator
        .set_multiple(&[
            VariableRef::new("A", "").with_value(1.0),
            VariableRef::new("B", "").with_value(2.0),
            VariableRef::new("C", "").with_value(3.0),
        ])
        .await;

    // A's confirmation never arrives, so only B and C are reported.
    let names: Vec<_> = written.iter().map(VariableRef::name).collect();
    assert_eq!(names, ["B", "C"]);

    let sets: Vec<f64> = bridge
        .calls()
        .iter()
        .filter_map(|call| match call {
            BridgeCall::SetData { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(sets, [1.0, 2.0, 3.0]);
    correlator.shutdown().await;
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_event_registered_once() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    let lights = EventRef::new("TOGGLE_NAV_LIGHTS", 1);

    assert!(correlator.send_event(&lights).await);
    let first = correlator.event_id(&lights).unwrap();
    assert!(correlator.send_event(&lights).await);
    let second = correlator.event_id(&lights).unwrap();
    assert!(correlator.flush().await);

    assert_eq!(first, second);
    assert_eq!(
        count_calls(&bridge, |c| matches!(c, BridgeCall::MapEventToName { .. })),
        1
    );
    assert_eq!(
        count_calls(&bridge, |c| matches!(c, BridgeCall::AddEventToGroup { .. })),
        1
    );
    assert_eq!(
        count_calls(&bridge, |c| matches!(c, BridgeCall::TransmitEvent { value: 1, .. })),
        2
    );
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_event_without_simulator_is_not_sent() {
    let bridge = LoopbackBridge::new();
    let correlator = started(&bridge).await;

    assert!(!correlator.send_event(&EventRef::new("PAUSE_TOGGLE", 0)).await);
    assert!(bridge.calls().is_empty());
    correlator.shutdown().await;
}

// ── Disconnect and recovery ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_outstanding_reads() {
    let bridge = LoopbackBridge::running();
    for name in ["A", "B", "C"] {
        bridge.withhold(name);
    }
    let correlator = started(&bridge).await;

    let start = Instant::now();
    let reads: Vec<_> = ["A", "B", "C"]
        .into_iter()
        .map(|name| {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.try_get_value(&VariableRef::new(name, "")).await })
        })
        .collect();
    wait_for_pending(&correlator, 3).await;

    assert!(correlator.disconnect().await);

    for read in reads {
        let err = read.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Cancelled { .. }), "got {err:?}");
    }
    assert!(start.elapsed() < config().request_timeout);

    let stats = correlator.stats();
    assert_eq!(stats.state, ConnectionState::Disconnected);
    assert_eq!(stats.definitions, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(bridge.open_sessions(), 0);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    correlator.connect().await.unwrap();
    let mut events = correlator.subscribe();

    assert!(correlator.disconnect().await);
    assert!(!correlator.disconnect().await);

    assert_eq!(
        events.recv().await.unwrap(),
        LinkEvent::Disconnected {
            generation: 1,
            reason: "disconnect requested".into()
        }
    );
    assert!(events.try_recv().is_err());
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_assigns_fresh_ids() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;

    correlator.get_value(&altitude()).await;
    let before = correlator.definition_id(&altitude()).unwrap();
    assert_eq!(correlator.generation(), 1);

    correlator.disconnect().await;
    assert_eq!(correlator.definition_id(&altitude()), None);

    let read = correlator.get_value(&altitude()).await;
    let after = correlator.definition_id(&altitude()).unwrap();

    assert!(!read.is_unavailable());
    assert_ne!(before, after);
    assert_eq!(correlator.generation(), 2);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_simulator_quit_resets_link() {
    let bridge = LoopbackBridge::running();
    bridge.seed("PLANE ALTITUDE", 1000.0);
    let correlator = started(&bridge).await;
    correlator.get_value(&altitude()).await;

    bridge.quit();
    wait_for_state(&correlator, ConnectionState::Disconnected).await;
    assert_eq!(correlator.stats().definitions, 0);
    assert!(correlator.get_value(&altitude()).await.is_unavailable());

    bridge.start();
    let read = correlator.get_value(&altitude()).await;
    assert_eq!(read.value(), 1000.0);
    assert_eq!(correlator.generation(), 2);
    assert_eq!(bridge.open_sessions(), 1);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_simulator_crash_reports_reason() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    correlator.connect().await.unwrap();
    let mut events = correlator.subscribe();

    bridge.crash();

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        LinkEvent::Disconnected { generation, reason } => {
            assert_eq!(generation, 1);
            assert!(reason.contains("pump"), "unexpected reason: {reason}");
        }
        other => panic!("expected a disconnect, got {other:?}"),
    }
    assert_eq!(bridge.open_sessions(), 0);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_bridge_call_tears_down() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    correlator.get_value(&altitude()).await;

    bridge.fail_calls(true);
    let err = correlator.try_get_value(&altitude()).await.unwrap_err();

    assert!(matches!(err, CoreError::TransportFailure { .. }), "got {err:?}");
    wait_for_state(&correlator, ConnectionState::Disconnected).await;

    bridge.fail_calls(false);
    assert!(!correlator.get_value(&altitude()).await.is_unavailable());
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_restarts_do_not_leak_sessions() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;

    for _ in 0..3 {
        assert!(!correlator.get_value(&altitude()).await.is_unavailable());
        bridge.quit();
        wait_for_state(&correlator, ConnectionState::Disconnected).await;
        bridge.start();
    }
    assert!(!correlator.get_value(&altitude()).await.is_unavailable());

    assert_eq!(bridge.opens(), 4);
    assert_eq!(bridge.open_sessions(), 1);
    correlator.shutdown().await;
    assert_eq!(bridge.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_connects_when_simulator_appears() {
    let bridge = LoopbackBridge::new();
    let correlator = Correlator::new(
        bridge.clone(),
        LinkConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
            },
            ..LinkConfig::default()
        },
    );
    correlator.start().await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!correlator.is_connected());

    bridge.start();
    wait_for_state(&correlator, ConnectionState::Connected).await;
    assert_eq!(bridge.opens(), 1);

    bridge.quit();
    wait_for_state(&correlator, ConnectionState::Disconnected).await;
    bridge.start();
    wait_for_state(&correlator, ConnectionState::Connected).await;
    assert_eq!(correlator.generation(), 2);
    correlator.shutdown().await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_flush_fails_without_connection() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    correlator.connect().await.unwrap();
    assert!(correlator.flush().await);

    correlator.disconnect().await;
    assert!(!correlator.flush().await);
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_timings_fall_back_to_defaults() {
    let bridge = LoopbackBridge::running();
    bridge.seed("PLANE ALTITUDE", 5.0);
    let correlator = Correlator::new(
        bridge.clone(),
        LinkConfig {
            poll_interval: Duration::ZERO,
            request_timeout: Duration::ZERO,
            ..config()
        },
    );
    correlator.start().await;

    assert_eq!(correlator.config().poll_interval, Duration::from_millis(100));
    assert_eq!(correlator.get_value(&altitude()).await.value(), 5.0);
    assert!(correlator.is_connected());
    correlator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_queued_events() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    correlator.connect().await.unwrap();

    for value in 0..50 {
        assert!(correlator.send_event(&EventRef::new("TOGGLE_NAV_LIGHTS", value)).await);
    }
    correlator.shutdown().await;

    assert_eq!(
        count_calls(&bridge, |c| matches!(c, BridgeCall::TransmitEvent { .. })),
        0
    );
    assert!(!correlator.send_event(&EventRef::new("TOGGLE_NAV_LIGHTS", 1)).await);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_bridge() {
    let bridge = LoopbackBridge::running();
    let correlator = started(&bridge).await;
    correlator.get_value(&altitude()).await;
    assert_eq!(bridge.open_sessions(), 1);

    correlator.shutdown().await;

    assert!(!correlator.is_connected());
    assert_eq!(bridge.open_sessions(), 0);
    assert!(correlator.get_value(&altitude()).await.is_unavailable());
}

#[tokio::test(start_paused = true)]
async fn test_run_helper_shuts_down_afterwards() {
    let bridge = LoopbackBridge::running();
    bridge.seed("PLANE ALTITUDE", 4200.0);

    let value = Correlator::run(bridge.clone(), LinkConfig::default(), |correlator| async move {
        correlator.get_value(&altitude()).await.value()
    })
    .await;

    assert_eq!(value, 4200.0);
    assert_eq!(bridge.open_sessions(), 0);
}
