use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil_client::{ApiClient, ClientError};
use vigil_runtime::{
    execute_action, ActionEffect, AlertEngine, ConnState, EventEngine, InsightEngine, PollChannel,
    RateEngine, SseSession,
};
use vigil_stream::InsightFeed;

fn insight_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "type": "anomaly",
        "title": "unexpected exec",
        "summary": "process spawned outside baseline",
        "confidence": 0.92,
        "severity": "high",
        "data": {},
        "actions": [
            {"label": "Dismiss", "action_id": "dismiss"},
            {"label": "Promote to Rule", "action_id": "promote", "params": {"rule_name": "deny-exec"}}
        ],
        "created_at": "2026-08-30T10:00:00Z"
    })
}

fn sse_body(frames: &[serde_json::Value]) -> String {
    frames
        .iter()
        .map(|f| format!("data: {f}\n\n"))
        .collect::<String>()
}

async fn wait_for_state(
    status: &mut tokio::sync::watch::Receiver<vigil_runtime::SessionStatus>,
    want: ConnState,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if status.borrow().state == want {
                return;
            }
            status.changed().await.expect("status channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {want:?}"));
}

#[tokio::test]
async fn poll_channel_shares_one_timer_across_consumers() {
    let fetches = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&fetches);
    let channel = PollChannel::new(Duration::from_millis(20), move || {
        let counter = Arc::clone(&counter);
        async move {
            Ok::<u64, ClientError>(counter.fetch_add(1, Ordering::SeqCst))
        }
    });

    let (h1, mut rx1) = channel.subscribe();
    let (h2, mut rx2) = channel.subscribe();
    assert_eq!(channel.listener_count(), 2);
    assert!(channel.timer_active());

    // both consumers see ticks from the same fetch stream
    let a = tokio::time::timeout(Duration::from_secs(2), rx1.recv())
        .await
        .unwrap()
        .unwrap();
    let b = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a, b, "one tick fans out to every listener");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let count = fetches.load(Ordering::SeqCst);
    assert!(count >= 2, "timer kept ticking, saw {count}");
    assert!(count < 20, "two subscribers must not double the tick rate");

    h1.release();
    h2.release();
}

#[tokio::test]
async fn last_release_stops_the_shared_timer() {
    let fetches = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&fetches);
    let channel = PollChannel::new(Duration::from_millis(10), move || {
        let counter = Arc::clone(&counter);
        async move { Ok::<u64, ClientError>(counter.fetch_add(1, Ordering::SeqCst)) }
    });

    let (h1, _rx1) = channel.subscribe();
    let (h2, _rx2) = channel.subscribe();

    h1.release();
    assert!(channel.timer_active(), "one listener left, timer stays");

    h2.release();
    h2.release(); // idempotent
    assert!(!channel.timer_active());
    assert_eq!(channel.listener_count(), 0);
    assert_eq!(channel.status().borrow().state, ConnState::Disconnected);

    let settled = fetches.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), settled, "no ticks after last release");
}

#[tokio::test]
async fn released_listener_receives_nothing_more() {
    let channel = PollChannel::new(Duration::from_millis(10), || async {
        Ok::<u32, ClientError>(7)
    });

    let (h1, mut rx1) = channel.subscribe();
    let (_h2, _rx2) = channel.subscribe();

    h1.release();
    // the registry dropped this listener's sender, so the channel drains to None
    let end = tokio::time::timeout(Duration::from_secs(2), async {
        while rx1.recv().await.is_some() {}
    })
    .await;
    assert!(end.is_ok(), "released listener's channel must close");
}

#[tokio::test]
async fn failed_ticks_are_skipped_not_fatal() {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);
    let channel = PollChannel::new(Duration::from_millis(10), move || {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(ClientError::Stream("backend hiccup".into()))
            } else {
                Ok(n)
            }
        }
    });

    let (handle, mut rx) = channel.subscribe();
    // odd ticks still arrive even though every even tick fails
    for _ in 0..3 {
        let n = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n % 2, 1);
    }
    handle.release();
}

#[tokio::test]
async fn sse_session_reconnects_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[json!({"type": "heartbeat"}), json!({"kind": "payload"})]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let mut session =
        SseSession::connect(reqwest::Client::new(), format!("{}/api/stream", server.uri()));
    let mut status = session.status.clone();

    wait_for_state(&mut status, ConnState::Error).await;
    assert!(status.borrow().error.is_some());

    // first backoff step is one second; the retry lands on the healthy mock.
    // The heartbeat is absorbed by the session, so the first delivered frame
    // is the payload itself, which proves the reconnect went Open again.
    let frame = tokio::time::timeout(Duration::from_secs(5), session.frames.recv())
        .await
        .expect("reconnect never delivered")
        .expect("frame channel closed");
    assert_eq!(frame.data["kind"], "payload");

    // the heartbeat re-asserted Open and cleared the 500's error before the
    // payload was delivered; the only error that may reappear afterwards is
    // the end-of-body close
    let current = status.borrow().clone();
    assert!(
        current.error.is_none() || current.error.as_deref() == Some("stream closed by server"),
        "stale error survived recovery: {current:?}"
    );

    session.handle.release();
}

#[tokio::test]
async fn release_publishes_closed_and_ends_delivery() {
    let server = MockServer::start().await;
    // SSE comment padding after the frame keeps the response body spanning
    // many socket reads, so the session stays observably Open instead of
    // flipping Open -> Error within one scheduling quantum.
    let mut body =
        sse_body(&[json!({"type": "exec", "timestamp": 1, "pid": 2, "ppid": 1, "cgroupId": "c", "comm": "sh", "parentComm": "init", "blocked": false})]);
    body.push_str(&": keepalive padding\n".repeat(200_000));
    Mock::given(method("GET"))
        .and(path("/api/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut session =
        SseSession::connect(reqwest::Client::new(), format!("{}/api/stream", server.uri()));
    let mut status = session.status.clone();
    wait_for_state(&mut status, ConnState::Open).await;

    session.handle.release();
    session.handle.release(); // second release is a no-op
    assert!(session.handle.is_released());
    assert_eq!(status.borrow().state, ConnState::Closed);

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while session.frames.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "frame channel must close after release");
}

#[tokio::test]
async fn insight_engine_applies_snapshot_then_deduped_push() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ai/sentinel/insights"))
        .and(query_param("limit", "50"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"insights": [insight_json("i-snap")]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ai/sentinel/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    sse_body(&[
                        json!({"type": "heartbeat"}),
                        insight_json("i-push"),
                        insight_json("i-push"),
                    ]),
                    "text/event-stream",
                )
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let mut engine = InsightEngine::new(ApiClient::new(server.uri()));
    engine.start().await.expect("snapshot fetch");

    let feed = engine.feed();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if feed.lock().await.contains("i-push") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pushed insight never arrived");

    let feed = feed.lock().await;
    assert!(feed.contains("i-snap"));
    assert_eq!(feed.len(), 2, "redelivered push id admitted once");
    assert_eq!(feed.counts().high, 2);
    engine.stop();
}

#[tokio::test]
async fn insight_engine_snapshot_failure_keeps_push_attached() {
    let server = MockServer::start().await;
    // no insights mock: the snapshot 404s, but push frames still flow
    Mock::given(method("GET"))
        .and(path("/api/ai/sentinel/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&[insight_json("i-live")]), "text/event-stream")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let mut engine = InsightEngine::new(ApiClient::new(server.uri()));
    assert!(engine.start().await.is_err());

    let feed = engine.feed();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if feed.lock().await.contains("i-live") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("push must stay attached after a failed snapshot");
    engine.stop();
}

#[tokio::test]
async fn refresh_restores_insights_pushed_while_the_snapshot_was_in_flight() {
    let server = MockServer::start().await;
    // first snapshot (engine start) is empty and fast; the refresh snapshot
    // is slow enough for the push channel to deliver an insight mid-fetch
    Mock::given(method("GET"))
        .and(path("/api/ai/sentinel/insights"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insights": []})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ai/sentinel/insights"))
        .and(query_param("limit", "50"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"insights": [insight_json("i-snap")]}))
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ai/sentinel/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&[insight_json("i-live")]), "text/event-stream")
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let mut engine = InsightEngine::new(ApiClient::new(server.uri()));
    engine.start().await.expect("priming snapshot");
    engine.refresh().await.expect("refresh snapshot");

    let feed = engine.feed();
    let feed = feed.lock().await;
    assert!(feed.contains("i-snap"));
    assert!(
        feed.contains("i-live"),
        "live insight admitted during the refresh window must survive the bulk replace"
    );
    assert_eq!(feed.len(), 2);
    assert_eq!(feed.new_count(), 1, "the restored insight is not counted twice");
    engine.stop();
}

#[tokio::test]
async fn alert_engine_primes_without_badge_growth() {
    let server = MockServer::start().await;
    let alerts = json!([
        {"id": "a1", "timestamp": 1, "severity": "high", "ruleName": "r1",
         "description": "d", "pid": 10, "processName": "sh", "blocked": true},
        {"id": "a2", "timestamp": 2, "severity": "info", "ruleName": "r2",
         "description": "d", "pid": 11, "processName": "cat", "blocked": false}
    ]);
    Mock::given(method("GET"))
        .and(path("/api/alerts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(alerts))
        .mount(&server)
        .await;

    let mut engine = AlertEngine::new(ApiClient::new(server.uri()), Duration::from_millis(30));
    engine.start().await.expect("priming snapshot");

    // let a few poll ticks re-deliver the same ids
    tokio::time::sleep(Duration::from_millis(150)).await;

    let feed = engine.feed();
    let feed = feed.lock().await;
    assert_eq!(feed.len(), 2);
    assert_eq!(feed.new_count(), 0, "known ids never grow the badge");
    assert_eq!(feed.action_counts().blocked, 1);
    engine.stop();
}

#[tokio::test]
async fn event_engine_routes_named_frames_out_of_band() {
    let server = MockServer::start().await;
    let body = format!(
        "event: rules:reload\ndata: {}\n\n{}",
        json!({"total": 3}),
        sse_body(&[json!({"type": "exec", "timestamp": 9, "pid": 42, "ppid": 1,
                           "cgroupId": "c", "comm": "sh", "parentComm": "init", "blocked": false})])
    );
    Mock::given(method("GET"))
        .and(path("/api/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/event-stream")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let mut engine = EventEngine::new(ApiClient::new(server.uri()));
    let mut reloads = engine.rules_reload();
    engine.start();

    tokio::time::timeout(Duration::from_secs(5), reloads.changed())
        .await
        .expect("rules:reload never signalled")
        .expect("reload channel closed");
    assert_eq!(*reloads.borrow(), 1);

    let feed = engine.feed();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !feed.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("probe event never arrived");
    assert_eq!(feed.lock().await.events().next().unwrap().pid(), 42);
    engine.stop();
}

#[tokio::test]
async fn rate_engine_keeps_only_the_latest_sample() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    sse_body(&[
                        json!({"exec": 1, "file": 0, "network": 0}),
                        json!({"exec": 8, "file": 3, "network": 2}),
                    ]),
                    "text/event-stream",
                )
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let mut engine = RateEngine::new(ApiClient::new(server.uri()));
    let rates = engine.rates();
    engine.start();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if rates.borrow().exec == 8 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("latest rate sample never published");
    assert_eq!(rates.borrow().file, 3);
    engine.stop();
}

#[tokio::test]
async fn dismiss_consumes_the_insight_without_any_request() {
    // nothing is listening here; dismiss must not need the wire
    let api = ApiClient::new("http://127.0.0.1:9");
    let feed = Arc::new(Mutex::new(InsightFeed::new()));
    feed.lock()
        .await
        .admit(serde_json::from_value(insight_json("i1")).unwrap());

    let effect = execute_action(&api, &feed, "i1", "dismiss")
        .await
        .expect("local action");
    assert_eq!(effect, ActionEffect::Removed);
    assert!(feed.lock().await.is_empty());
}

#[tokio::test]
async fn failed_promote_leaves_the_insight_in_place() {
    let server = MockServer::start().await;
    // no promote mock mounted: the POST comes back 404

    let api = ApiClient::new(server.uri());
    let feed = Arc::new(Mutex::new(InsightFeed::new()));
    feed.lock()
        .await
        .admit(serde_json::from_value(insight_json("i1")).unwrap());

    let err = execute_action(&api, &feed, "i1", "promote")
        .await
        .expect_err("promotion must fail");
    assert_eq!(err.status(), Some(404));
    assert!(feed.lock().await.contains("i1"), "failed action keeps the insight");
}

#[tokio::test]
async fn promote_hits_the_rule_endpoint_and_consumes_the_insight() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rules/deny-exec/promote"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let api = ApiClient::new(server.uri());
    let feed = Arc::new(Mutex::new(InsightFeed::new()));
    feed.lock()
        .await
        .admit(serde_json::from_value(insight_json("i1")).unwrap());

    // the backend emits action id "promote" with the rule name in params
    let effect = execute_action(&api, &feed, "i1", "promote")
        .await
        .expect("promotion");
    assert_eq!(effect, ActionEffect::Removed);
    assert!(!feed.lock().await.contains("i1"));
}

#[tokio::test]
async fn unknown_action_is_refused_softly() {
    let api = ApiClient::new("http://127.0.0.1:9");
    let feed = Arc::new(Mutex::new(InsightFeed::new()));
    let mut insight: vigil_schema::Insight =
        serde_json::from_value(insight_json("i1")).unwrap();
    insight.actions.push(vigil_schema::InsightActionDesc {
        label: "??".into(),
        action_id: "teleport".into(),
        params: serde_json::Value::Null,
    });
    feed.lock().await.admit(insight);

    let effect = execute_action(&api, &feed, "i1", "teleport").await.unwrap();
    assert_eq!(effect, ActionEffect::None);
    let effect = execute_action(&api, &feed, "i1", "no-such-descriptor").await.unwrap();
    assert_eq!(effect, ActionEffect::None);
    assert!(feed.lock().await.contains("i1"));
}
