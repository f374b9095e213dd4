//! Integration tests for the stream lifecycle manager over scripted
//! connections and a scripted session API.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::json;
use tokio::time::Instant;

use venuelink::application::stream::{
    LifecycleState, StreamEvent, StreamLifecycleManager, StreamSettings,
};
use venuelink::application::throttle::{RateLimitRule, RateLimiter, RestGateway, ThrottleSettings};
use venuelink::domain::RuleId;
use venuelink::port::outbound::{ExchangeAdapter, HttpMethod, RestResponse, StreamChannel, VenueEvent};
use venuelink::testkit::adapter::{diff_json, fill_json, order_json, token_body, JsonVenueAdapter};
use venuelink::testkit::config;
use venuelink::testkit::domain::{pair, PAIR};
use venuelink::testkit::transport::{ChannelConnector, ChannelStreamControl, ScriptedRest};

use support::WS_BASE;

type Events = BoxStream<'static, StreamEvent>;

struct Harness {
    rest: Arc<ScriptedRest>,
    control: ChannelStreamControl,
    manager: StreamLifecycleManager,
    events: Events,
}

fn harness_with(adapter: Arc<dyn ExchangeAdapter>, settings: StreamSettings, rest: Arc<ScriptedRest>) -> Harness {
    let (connector, control) = ChannelConnector::new();
    let manager = StreamLifecycleManager::new(
        adapter,
        config::gateway(rest.clone()),
        connector,
        None,
        settings,
        vec![pair()],
    );
    let events = manager.events();
    Harness {
        rest,
        control,
        manager,
        events,
    }
}

fn public(rest: Arc<ScriptedRest>) -> Harness {
    harness_with(support::json_venue(), config::stream(StreamChannel::Public), rest)
}

fn private(rest: Arc<ScriptedRest>) -> Harness {
    harness_with(support::json_venue(), config::stream(StreamChannel::Private), rest)
}

fn token_reply(token: &str) -> Result<RestResponse, venuelink::error::TransportError> {
    Ok(RestResponse::new(200, token_body(token, 60_000).to_string()))
}

async fn next_event(events: &mut Events) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(600), events.next())
        .await
        .expect("no stream event in time")
        .expect("event stream ended")
}

/// Skip events until one matches.
async fn wait_for_event(events: &mut Events, mut wanted: impl FnMut(&StreamEvent) -> bool) -> StreamEvent {
    loop {
        let event = next_event(events).await;
        if wanted(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn session_is_renewed_before_it_expires() {
    let rest = ScriptedRest::new().into_shared();
    rest.ok_json(HttpMethod::Post, "/session", token_body("tok-1", 60_000));
    rest.status(HttpMethod::Put, "/session/tok-1", 200);
    let h = private(rest);
    h.control.answer_pings(true);

    h.manager.start();
    h.control.wait_for_connections(1).await;
    assert_eq!(h.control.urls(), [format!("{WS_BASE}/private?token=tok-1")]);
    assert!(h.control.sent_text_on(1).iter().any(|frame| frame.contains("account")));

    // Renewal is due every 30s of a 60s lifetime.
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(h.rest.call_count(HttpMethod::Put, "/session/tok-1"), 3);
    assert_eq!(h.rest.call_count(HttpMethod::Post, "/session"), 1);
    assert_eq!(h.control.connect_count(), 1);
    assert!(h.manager.is_ready());
    let token = h.manager.current_token().unwrap();
    assert_eq!(token.value(), "tok-1");
    assert!(!token.is_expired());
}

#[tokio::test(start_paused = true)]
async fn reconnect_acquires_a_fresh_token() {
    let rest = ScriptedRest::new().into_shared();
    rest.enqueue(HttpMethod::Post, "/session", token_reply("tok-1"));
    rest.enqueue(HttpMethod::Post, "/session", token_reply("tok-2"));
    let mut h = private(rest);

    h.manager.start();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    assert!(h.control.drop_connection());

    let dropped = next_event(&mut h.events).await;
    assert!(matches!(dropped, StreamEvent::Disconnected { .. }), "{dropped:?}");
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);

    assert_eq!(
        h.control.urls(),
        [
            format!("{WS_BASE}/private?token=tok-1"),
            format!("{WS_BASE}/private?token=tok-2"),
        ]
    );
    assert_eq!(h.rest.call_count(HttpMethod::Post, "/session"), 2);
    assert_eq!(h.manager.current_token().unwrap().value(), "tok-2");
}

#[tokio::test(start_paused = true)]
async fn failed_renewal_reacquires_and_never_reuses_the_token() {
    let rest = ScriptedRest::new().into_shared();
    rest.enqueue(HttpMethod::Post, "/session", token_reply("tok-1"));
    rest.enqueue(HttpMethod::Post, "/session", token_reply("tok-2"));
    rest.status(HttpMethod::Put, "/session/tok-1", 500);
    rest.status(HttpMethod::Put, "/session/tok-2", 200);
    let mut h = private(rest);
    h.control.answer_pings(true);

    h.manager.start();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    assert_eq!(h.manager.current_token().unwrap().value(), "tok-1");

    let started = Instant::now();
    let dropped = next_event(&mut h.events).await;
    match &dropped {
        StreamEvent::Disconnected { reason } => assert!(reason.contains("renewal failed"), "{reason}"),
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(29));
    assert!(h.manager.current_token().map_or(true, |token| token.value() != "tok-1"));

    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    for _ in 0..40 {
        let token = h.manager.current_token().unwrap();
        assert_eq!(token.value(), "tok-2");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert_eq!(h.rest.call_count(HttpMethod::Put, "/session/tok-1"), 1);
    assert_eq!(h.rest.call_count(HttpMethod::Post, "/session"), 2);
    assert!(h.rest.call_count(HttpMethod::Put, "/session/tok-2") >= 1);
    assert_eq!(
        h.control.urls(),
        [
            format!("{WS_BASE}/private?token=tok-1"),
            format!("{WS_BASE}/private?token=tok-2"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn venue_session_expiry_reacquires() {
    let rest = ScriptedRest::new().into_shared();
    rest.enqueue(HttpMethod::Post, "/session", token_reply("tok-1"));
    rest.enqueue(HttpMethod::Post, "/session", token_reply("tok-2"));
    let mut h = private(rest);

    h.manager.start();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    h.control.push_json(&json!({"type": "session_expired"}));

    assert_eq!(
        next_event(&mut h.events).await,
        StreamEvent::Disconnected {
            reason: "session expired".into()
        }
    );
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    assert_eq!(h.control.urls()[1], format!("{WS_BASE}/private?token=tok-2"));
    assert_eq!(h.control.client_closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_connection_is_replaced_after_pong_timeout() {
    let mut h = public(ScriptedRest::new().into_shared());
    let start = Instant::now();

    h.manager.start();
    h.control.wait_for_connections(1).await;
    h.control.wait_for_connections(2).await;

    // 30s idle before the ping, 10s for the pong.
    assert!(start.elapsed() >= Duration::from_secs(40));
    assert_eq!(h.control.pings_sent(), 1);
    let end = wait_for_event(&mut h.events, |event| matches!(event, StreamEvent::Disconnected { .. })).await;
    assert_eq!(
        end,
        StreamEvent::Disconnected {
            reason: "heartbeat timeout".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_connection() {
    let h = public(ScriptedRest::new().into_shared());
    h.control.answer_pings(true);

    h.manager.start();
    h.control.wait_for_connections(1).await;
    tokio::time::sleep(Duration::from_secs(200)).await;

    assert!(h.control.pings_sent() >= 5);
    assert_eq!(h.control.connect_count(), 1);
    assert!(h.manager.last_received_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_reconnecting() {
    let mut h = public(ScriptedRest::new().into_shared());

    h.manager.start();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    assert_eq!(h.control.urls(), [format!("{WS_BASE}/public")]);
    assert!(h.control.sent_text_on(1)[0].contains(PAIR));

    h.control.push_text("not json");
    h.control.push_json(&json!({"type": "mystery"}));
    h.control.push_json(&diff_json(PAIR, 5, &[("100", "1")], &[]));

    let StreamEvent::Message(VenueEvent::BookDiff(update)) = next_event(&mut h.events).await else {
        panic!("expected the diff after the malformed frames");
    };
    assert_eq!(update.sequence_id, 5);
    assert_eq!(h.control.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_session_failures_are_reported_and_retried() {
    let rest = ScriptedRest::new().into_shared();
    rest.status(HttpMethod::Post, "/session", 503);
    let mut h = private(rest);

    h.manager.start();
    let event = next_event(&mut h.events).await;
    let StreamEvent::SessionUnavailable { attempts, .. } = event else {
        panic!("expected session unavailable, got {event:?}");
    };
    assert_eq!(attempts, 3);
    assert_eq!(h.control.connect_count(), 0);

    let event = next_event(&mut h.events).await;
    assert!(matches!(event, StreamEvent::SessionUnavailable { attempts: 6, .. }), "{event:?}");
    assert!(matches!(h.manager.state(), LifecycleState::Acquiring { .. }));
}

#[tokio::test(start_paused = true)]
async fn connect_failures_back_off_then_recover() {
    let mut h = public(ScriptedRest::new().into_shared());
    h.control.fail_next_connects(2);
    let start = Instant::now();

    h.manager.start();
    for _ in 0..2 {
        let event = next_event(&mut h.events).await;
        assert!(matches!(event, StreamEvent::Disconnected { .. }), "{event:?}");
    }
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);

    // 100ms then 200ms.
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(h.control.urls().len(), 3);
    assert_eq!(h.manager.state(), LifecycleState::Active);
}

#[tokio::test(start_paused = true)]
async fn redelivered_private_events_reach_subscribers_once() {
    let adapter: Arc<dyn ExchangeAdapter> = Arc::new(JsonVenueAdapter::new(WS_BASE).without_sessions());
    let mut h = harness_with(
        adapter,
        config::stream(StreamChannel::Private),
        ScriptedRest::new().into_shared(),
    );

    h.manager.start();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::Connected);
    assert_eq!(h.control.urls(), [format!("{WS_BASE}/private")]);

    let fill = fill_json("T1", "O1", PAIR, "100", "1");
    let open = order_json("O1", PAIR, "open", 1_700_000_000_000);
    h.control.push_json(&fill);
    h.control.push_json(&open);
    h.control.push_json(&fill);
    h.control.push_json(&open);

    // Redelivery after a reconnect is dropped as well.
    h.control.drop_connection();
    let mut messages = Vec::new();
    loop {
        match next_event(&mut h.events).await {
            StreamEvent::Message(event) => messages.push(event),
            StreamEvent::Connected => break,
            _ => {}
        }
    }
    h.control.push_json(&fill);
    h.control.push_json(&fill_json("T2", "O1", PAIR, "100", "1"));
    loop {
        if let StreamEvent::Message(event) = next_event(&mut h.events).await {
            let last = matches!(&event, VenueEvent::Trade(trade) if trade.trade_id.as_str() == "T2");
            messages.push(event);
            if last {
                break;
            }
        }
    }

    let trades = messages.iter().filter(|event| matches!(event, VenueEvent::Trade(_))).count();
    let orders = messages.iter().filter(|event| matches!(event, VenueEvent::Order(_))).count();
    assert_eq!((trades, orders), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn stop_closes_the_session_and_ends_events() {
    let rest = ScriptedRest::new().into_shared();
    rest.ok_json(HttpMethod::Post, "/session", token_body("tok-1", 60_000));
    rest.status(HttpMethod::Delete, "/session/tok-1", 200);
    let h = private(rest);

    h.manager.start();
    h.control.wait_for_connections(1).await;
    h.manager.stop().await;

    assert_eq!(h.rest.call_count(HttpMethod::Delete, "/session/tok-1"), 1);
    assert_eq!(h.control.client_closes(), 1);
    assert_eq!(h.manager.state(), LifecycleState::Closed);
    assert!(h.manager.current_token().is_none());

    let events: Vec<StreamEvent> = h.events.collect().await;
    assert_eq!(events, [StreamEvent::Connected]);
    assert!(h.manager.events().next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_unwinds_a_subscribe_waiting_on_the_rate_limit() {
    let rest = ScriptedRest::new().into_shared();
    let mut rules = config::rules();
    rules.push(RateLimitRule::new("ws-send", 1, Duration::from_secs(3600)));
    let throttle = ThrottleSettings {
        max_wait: None,
        ..config::throttle()
    };
    let limiter = RateLimiter::new(rules, throttle).unwrap().into_shared();
    assert!(limiter.try_acquire(&RuleId::from("ws-send"), 1).unwrap().is_some());

    let (connector, control) = ChannelConnector::new();
    let settings = StreamSettings {
        send_limit_id: Some(RuleId::from("ws-send")),
        ..config::stream(StreamChannel::Public)
    };
    let manager = StreamLifecycleManager::new(
        support::json_venue(),
        RestGateway::new(limiter, rest, None),
        connector,
        None,
        settings,
        vec![pair()],
    );

    manager.start();
    control.wait_for_connections(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), LifecycleState::Connecting);

    tokio::time::timeout(Duration::from_secs(2), manager.stop())
        .await
        .expect("stop should not wait for the rate limit");
    assert_eq!(manager.state(), LifecycleState::Closed);
    assert_eq!(control.client_closes(), 1);
    assert!(control.sent_text_on(1).is_empty());
}
