use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::context::{EvaluationContext, UserContext};
use crate::events::EventName;
use crate::model::{AiConfigFilter, AiConfigKind, EvaluationReason};
use crate::stream::StreamError;

use super::state::ChannelState;
use super::test_support::{
    build_client, polling_config, push_event, realtime_config, seed_defaults, test_config,
    MockConnect, MockGateway, MockTransport,
};

/// Lets spawned tasks run to completion between assertions.
async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Collects payloads delivered to a listener.
fn recorder() -> (Arc<StdMutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync) {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |payload: &Value| {
        sink.lock().unwrap().push(payload.clone())
    })
}

#[tokio::test(start_paused = true)]
async fn missing_flag_resolves_to_default_without_refetch() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;

    let value = client
        .flag("missing", None, Some(json!("fallback")))
        .await;
    assert_eq!(value, json!("fallback"));
    // The bulk snapshot is authoritative: no extra request for the miss.
    assert_eq!(gateway.calls_for("/flags"), 1);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn cached_snapshot_serves_flags_without_network() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;
    assert_eq!(gateway.calls_for("/flags"), 1);

    assert_eq!(client.flag("bool_flag", None, None).await, json!(true));
    let all = client.all_flags(None).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all.get("string_flag"), Some(&json!("hello")));
    assert_eq!(gateway.calls_for("/flags"), 1);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn contextual_evaluation_always_asks_the_backend() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    gateway.set_json(
        "/flags/bool_flag",
        json!({ "key": "bool_flag", "value": false, "reason": "rule_match", "variation_key": "off" }),
    );
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;

    let context = EvaluationContext::new()
        .with_user(UserContext::new("user_1").with_attribute("email", "test@example.com"));
    for _ in 0..2 {
        let value = client.flag("bool_flag", Some(&context), None).await;
        assert_eq!(value, json!(false));
    }
    assert_eq!(gateway.calls_for("/flags/bool_flag"), 2);
    let recorded = gateway.calls();
    let contextual: Vec<&String> = recorded
        .iter()
        .filter(|path| path.starts_with("/flags/bool_flag"))
        .collect();
    for path in contextual {
        assert!(path.contains("user_id=user_1"), "path {path}");
        assert!(path.contains("user_email=test%40example.com"), "path {path}");
    }

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn flag_detail_falls_back_when_the_backend_fails() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    gateway.set_status("/flags/bool_flag", 500);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;

    let detail = client.flag_detail("bool_flag", None, Some(json!(false))).await;
    assert_eq!(detail.key, "bool_flag");
    assert_eq!(detail.value, json!(false));
    assert_eq!(detail.reason, EvaluationReason::Default);
    assert_eq!(detail.variation_key, None);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn polling_refetches_on_the_interval_until_destroyed() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(
        polling_config(Duration::from_millis(1000)),
        Arc::clone(&gateway),
        None,
    );
    client.ready().await;
    settle().await;
    assert_eq!(gateway.calls_for("/flags"), 1);

    for _ in 0..3 {
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
    }
    assert!(gateway.calls_for("/flags") >= 4);
    assert!(gateway.calls_for("/configs") >= 4);

    client.destroy().await;
    let flags_after_destroy = gateway.calls_for("/flags");
    for _ in 0..5 {
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
    }
    assert_eq!(gateway.calls_for("/flags"), flags_after_destroy);
}

#[tokio::test(start_paused = true)]
async fn stream_retries_back_off_then_fall_back_to_polling() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let transport = MockTransport::new(
        (0..6).map(|n| MockConnect::fail(&format!("refused {n}"))).collect(),
    );
    let client = build_client(realtime_config(), Arc::clone(&gateway), Some(Arc::clone(&transport)));
    client.ready().await;
    settle().await;
    assert_eq!(transport.attempts(), 1);

    // Backoff doubles per failure: 1s, 2s, 4s, 8s, 16s.
    for (expected, backoff_ms) in [(2, 1100), (3, 2100), (4, 4100), (5, 8100), (6, 16100)] {
        tokio::time::advance(Duration::from_millis(backoff_ms)).await;
        settle().await;
        assert_eq!(transport.attempts(), expected);
    }

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.channel, ChannelState::Polling);

    // Fallback polling keeps data fresh without further connect attempts.
    let flags_before = gateway.calls_for("/flags");
    tokio::time::advance(Duration::from_millis(30_100)).await;
    settle().await;
    assert!(gateway.calls_for("/flags") > flags_before);
    assert_eq!(transport.attempts(), 6);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn unsupported_transport_falls_back_to_polling_immediately() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let transport = MockTransport::new(vec![MockConnect {
        outcome: Err(StreamError::Unsupported("no sse here".to_string())),
        hold_open: false,
    }]);
    let client = build_client(realtime_config(), Arc::clone(&gateway), Some(Arc::clone(&transport)));
    let (changes, listener) = recorder();
    let _sub = client.on(EventName::RealtimeChanged, listener);
    client.ready().await;
    settle().await;

    assert_eq!(transport.attempts(), 1);
    assert_eq!(client.snapshot().await.channel, ChannelState::Polling);
    assert_eq!(changes.lock().unwrap().as_slice(), &[json!(false)]);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn realtime_without_transport_polls_at_fallback_cadence() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(realtime_config(), Arc::clone(&gateway), None);
    client.ready().await;
    settle().await;

    // No push transport to connect, so the channel degrades straight to
    // polling at the fallback interval.
    assert_eq!(client.snapshot().await.channel, ChannelState::Polling);
    assert_eq!(gateway.calls_for("/flags"), 1);

    tokio::time::advance(Duration::from_millis(30_100)).await;
    settle().await;
    assert_eq!(gateway.calls_for("/flags"), 2);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn enable_realtime_without_transport_degrades_to_polling() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    let (changes, listener) = recorder();
    let _sub = client.on(EventName::RealtimeChanged, listener);
    client.ready().await;
    assert_eq!(client.snapshot().await.channel, ChannelState::Idle);

    client.enable_realtime().await;
    settle().await;
    assert_eq!(client.snapshot().await.channel, ChannelState::Polling);
    assert_eq!(changes.lock().unwrap().as_slice(), &[json!(false)]);
    // Only the startup fetch went out; nothing is refreshed ahead of a
    // stream that cannot exist.
    assert_eq!(gateway.calls_for("/flags"), 1);

    tokio::time::advance(Duration::from_millis(30_100)).await;
    settle().await;
    assert_eq!(gateway.calls_for("/flags"), 2);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn push_events_trigger_refreshes_and_notifications() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let transport = MockTransport::new(vec![MockConnect::ok(vec![
        push_event("connected", Value::Null),
        push_event("flag.toggled", json!({ "key": "bool_flag" })),
        push_event("config.value_updated", json!({ "key": "welcome" })),
        push_event("ai_config.updated", json!({ "name": "support-agent" })),
    ])]);
    let client = build_client(realtime_config(), Arc::clone(&gateway), Some(Arc::clone(&transport)));
    let (ai_updates, listener) = recorder();
    let _sub = client.on(EventName::AiConfigUpdated, listener);
    client.ready().await;
    settle().await;

    assert_eq!(client.snapshot().await.channel, ChannelState::Streaming);
    // Startup fetch plus one refresh per change notification.
    assert_eq!(gateway.calls_for("/flags"), 2);
    assert_eq!(gateway.calls_for("/configs"), 2);
    assert_eq!(
        ai_updates.lock().unwrap().as_slice(),
        &[json!({ "name": "support-agent" })]
    );

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn realtime_can_be_toggled_at_runtime() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let transport = MockTransport::new(vec![MockConnect::ok(vec![push_event(
        "connected",
        Value::Null,
    )])]);
    let client = build_client(test_config(), Arc::clone(&gateway), Some(Arc::clone(&transport)));
    let (changes, listener) = recorder();
    let _sub = client.on(EventName::RealtimeChanged, listener);
    client.ready().await;
    assert_eq!(client.snapshot().await.channel, ChannelState::Idle);

    client.enable_realtime().await;
    settle().await;
    assert_eq!(transport.attempts(), 1);
    assert_eq!(client.snapshot().await.channel, ChannelState::Streaming);

    client.disable_realtime().await;
    settle().await;
    // No refresh interval configured, so disabling realtime goes idle.
    assert_eq!(client.snapshot().await.channel, ChannelState::Idle);
    assert_eq!(
        changes.lock().unwrap().as_slice(),
        &[json!(true), json!(false)]
    );

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn zero_ttl_forces_network_on_every_read() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    gateway.set_json("/configs/welcome", json!({ "key": "welcome", "value": "hi" }));
    let config = crate::config::ClientConfig {
        cache_ttl: Some(Duration::ZERO),
        ..test_config()
    };
    let client = build_client(config, Arc::clone(&gateway), None);
    client.ready().await;
    assert_eq!(gateway.calls_for("/flags"), 1);

    for _ in 0..3 {
        assert_eq!(client.flag("bool_flag", None, None).await, json!(true));
    }
    assert_eq!(gateway.calls_for("/flags"), 4);

    for _ in 0..2 {
        assert_eq!(client.config_value("welcome", None).await, json!("hi"));
    }
    assert_eq!(gateway.calls_for("/configs/welcome"), 2);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn config_values_fall_back_on_server_errors() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    gateway.set_status("/configs/rollout", 500);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    let (errors, listener) = recorder();
    let _sub = client.on(EventName::Error, listener);
    client.ready().await;

    assert_eq!(client.config_value("welcome", None).await, json!("hi"));
    let value = client
        .config_value("rollout", Some(json!({ "percent": 0 })))
        .await;
    assert_eq!(value, json!({ "percent": 0 }));
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(client.snapshot().await.last_error.is_some());

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn missing_ai_config_synthesizes_from_default_content() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;

    assert!(client.ai_config("support-agent", None).await.is_none());

    let file = client
        .ai_config("support-agent", Some("You are a support agent."))
        .await
        .unwrap();
    assert_eq!(file.file_name, "support-agent");
    assert_eq!(file.file_type, AiConfigKind::Rule);
    assert_eq!(file.content, "You are a support agent.");
    assert_eq!(file.folder, None);

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn ai_config_listing_honours_the_filter() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    gateway.set_json(
        "/ai-configs",
        json!({ "ai_configs": [
            { "file_name": "support-agent", "file_type": "agent", "content": "a" },
            { "file_name": "summarise", "file_type": "skill", "content": "b", "folder": "tools" },
            { "file_name": "tone", "file_type": "rule", "content": "c" },
        ]}),
    );
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;

    assert_eq!(client.list_ai_configs(None).await.len(), 3);
    let filter = AiConfigFilter {
        file_type: Some(AiConfigKind::Skill),
        folder: None,
    };
    let skills = client.list_ai_configs(Some(&filter)).await;
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0].file_name, "summarise");

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn config_updates_also_fire_the_legacy_event_name() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    let (legacy, legacy_listener) = recorder();
    let (current, current_listener) = recorder();
    let _legacy_sub = client.on(EventName::RemoteConfigUpdated, legacy_listener);
    let _current_sub = client.on(EventName::ConfigsUpdated, current_listener);
    client.ready().await;

    assert_eq!(legacy.lock().unwrap().len(), 1);
    assert_eq!(
        legacy.lock().unwrap().as_slice(),
        current.lock().unwrap().as_slice()
    );

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn startup_failures_still_make_the_client_ready() {
    let gateway = MockGateway::new();
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    let (errors, listener) = recorder();
    let _sub = client.on(EventName::Error, listener);
    client.ready().await;
    settle().await;

    assert!(client.snapshot().await.ready);
    assert!(errors.lock().unwrap().len() >= 2);
    let value = client.flag("bool_flag", None, Some(json!(false))).await;
    assert_eq!(value, json!(false));

    client.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_is_idempotent_and_drops_listeners() {
    let gateway = MockGateway::new();
    seed_defaults(&gateway);
    let client = build_client(test_config(), Arc::clone(&gateway), None);
    client.ready().await;

    client.destroy().await;
    client.destroy().await;
    assert!(!client.snapshot().await.channel.is_streaming());
}
