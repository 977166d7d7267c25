//! End-to-end multiplexer tests over the public API.
//!
//! A scripted in-memory transport stands in for the browser: the test
//! injects the frames a real browser would send and asserts on the
//! state the crate derives from them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;

use chromium_cdp::identifiers::{FrameId, SessionId, TargetId};
use chromium_cdp::transport::{Transport, TransportEvent, TransportEvents};
use chromium_cdp::{
    Connection, ConnectionOptions, Error, NetworkEvent, NetworkManager, FrameManager,
};

// ============================================================================
// Scripted Transport
// ============================================================================

/// In-memory browser double.
struct BrowserDouble {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Mutex<Vec<String>>,
    /// Scripted responses keyed by method, popped in order.
    replies: Mutex<VecDeque<(String, Value)>>,
    closed: AtomicBool,
}

impl BrowserDouble {
    fn new() -> (Arc<Self>, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events: tx,
                sent: Mutex::new(Vec::new()),
                replies: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }

    /// Scripts the `result` object for the next command with `method`.
    fn reply_to(&self, method: &str, result: Value) {
        self.replies
            .lock()
            .push_back((method.to_string(), result));
    }

    fn push(&self, frame: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(frame.into()));
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for BrowserDouble {
    async fn send_text(&self, text: String) -> chromium_cdp::Result<()> {
        self.sent.lock().push(text.clone());

        // Answer scripted commands like the browser would.
        let command: Value = serde_json::from_str(&text).expect("commands are valid JSON");
        let method = command.get("method").and_then(Value::as_str).unwrap_or("");
        let scripted = {
            let mut replies = self.replies.lock();
            match replies.front() {
                Some((expected, _)) if expected == method => replies.pop_front(),
                _ => None,
            }
        };

        if let Some((_, result)) = scripted {
            let id = command.get("id").and_then(Value::as_u64).expect("id");
            let session_suffix = command
                .get("sessionId")
                .and_then(Value::as_str)
                .map(|session_id| format!(r#","sessionId":"{session_id}""#))
                .unwrap_or_default();
            self.push(format!(r#"{{"id":{id},"result":{result}{session_suffix}}}"#));
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stop_reading(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn attach_frame(session_id: &str) -> String {
    format!(
        r#"{{"method":"Target.attachedToTarget","params":{{"sessionId":"{session_id}","targetInfo":{{"targetId":"T-{session_id}","type":"page","url":"about:blank"}},"waitingForDebugger":false}}}}"#
    )
}

fn session_event(session_id: &str, method: &str, params: &str) -> String {
    format!(r#"{{"method":"{method}","params":{params},"sessionId":"{session_id}"}}"#)
}

async fn settle() {
    sleep(Duration::from_millis(30)).await;
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn create_session_roundtrip_through_scripted_browser() {
    let (browser, events) = BrowserDouble::new();
    let connection = Connection::new(
        "ws://double",
        browser.clone(),
        events,
        ConnectionOptions::default(),
    );

    // The browser answers the attach command and pushes the attach
    // notification (response first, notification second).
    browser.reply_to(
        "Target.attachToTarget",
        serde_json::json!({ "sessionId": "PAGE" }),
    );
    let create = {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .create_session(&TargetId::new("T-PAGE"), false)
                .await
        })
    };
    settle().await;
    browser.push(attach_frame("PAGE"));

    let session = create.await.expect("join").expect("session");
    assert_eq!(session.id().as_str(), "PAGE");
    assert_eq!(
        connection.get_session(&SessionId::new("PAGE")).unwrap().id(),
        session.id()
    );
}

#[tokio::test]
async fn frame_manager_tracks_navigation_lifecycle() {
    let (browser, events) = BrowserDouble::new();
    let connection = Connection::new(
        "ws://double",
        browser.clone(),
        events,
        ConnectionOptions::default(),
    );

    browser.push(attach_frame("PAGE"));
    let session = connection
        .wait_for_session(&SessionId::new("PAGE"))
        .await
        .expect("session");

    let manager = FrameManager::new(session);

    // Navigation commit, context creation, then a reload destroying and
    // replacing the context.
    browser.push(session_event(
        "PAGE",
        "Page.frameNavigated",
        r#"{"frame":{"id":"MAIN","loaderId":"L1","url":"https://example.com"}}"#,
    ));
    browser.push(session_event(
        "PAGE",
        "Runtime.executionContextCreated",
        r#"{"context":{"id":1,"origin":"https://example.com","name":"","auxData":{"frameId":"MAIN","isDefault":true}}}"#,
    ));
    settle().await;

    let main = manager.main_frame().expect("main frame");
    assert_eq!(main.url(), "https://example.com");
    assert!(main.main_world().has_context());

    // A caller parked before the reload observes the replacement
    // context, not the destroyed one.
    let waiting = {
        let world = main.main_world().clone();
        tokio::spawn(async move {
            // Give the reload a chance to destroy the context first.
            sleep(Duration::from_millis(10)).await;
            world.get_execution_context().await
        })
    };

    browser.push(session_event(
        "PAGE",
        "Runtime.executionContextDestroyed",
        r#"{"executionContextId":1}"#,
    ));
    settle().await;
    assert!(!main.main_world().has_context());

    browser.push(session_event(
        "PAGE",
        "Runtime.executionContextCreated",
        r#"{"context":{"id":2,"origin":"https://example.com","name":"","auxData":{"frameId":"MAIN","isDefault":true}}}"#,
    ));
    settle().await;

    let context = waiting.await.expect("join").expect("replacement context");
    assert_eq!(context.id().value(), 2);
}

#[tokio::test]
async fn network_manager_correlates_over_the_wire() {
    let (browser, events) = BrowserDouble::new();
    let connection = Connection::new(
        "ws://double",
        browser.clone(),
        events,
        ConnectionOptions::default(),
    );

    browser.push(attach_frame("PAGE"));
    let session = connection
        .wait_for_session(&SessionId::new("PAGE"))
        .await
        .expect("session");

    let manager = NetworkManager::new();
    browser.reply_to("Network.enable", serde_json::json!({}));
    browser.reply_to("Network.setCacheDisabled", serde_json::json!({}));
    browser.reply_to("Fetch.disable", serde_json::json!({}));
    manager.add_client(&session).await.expect("add client");

    let finished = Arc::new(Mutex::new(Vec::new()));
    let finished_clone = Arc::clone(&finished);
    let _guard = manager.subscribe(
        Some("requestFinished"),
        Arc::new(move |event: &NetworkEvent| {
            if let NetworkEvent::RequestFinished(request) = event {
                finished_clone.lock().push(request.clone());
            }
        }),
    );

    // Extra-info arrives before the response it belongs to.
    browser.push(session_event(
        "PAGE",
        "Network.requestWillBeSent",
        r#"{"requestId":"42","request":{"url":"https://example.com/data","method":"GET","headers":{}},"type":"XHR"}"#,
    ));
    browser.push(session_event(
        "PAGE",
        "Network.responseReceivedExtraInfo",
        r#"{"requestId":"42","headers":{"set-cookie":"a=1"},"statusCode":200}"#,
    ));
    browser.push(session_event(
        "PAGE",
        "Network.responseReceived",
        r#"{"requestId":"42","hasExtraInfo":true,"response":{"url":"https://example.com/data","status":200,"statusText":"OK","headers":{}}}"#,
    ));
    browser.push(session_event(
        "PAGE",
        "Network.loadingFinished",
        r#"{"requestId":"42"}"#,
    ));
    settle().await;

    let finished = finished.lock().clone();
    assert_eq!(finished.len(), 1);
    let response = finished[0].response().expect("joined response");
    assert_eq!(
        response.headers().get("set-cookie").map(String::as_str),
        Some("a=1")
    );
    assert_eq!(manager.requests_in_progress(), 0);
}

#[tokio::test]
async fn close_fails_everything_deterministically() {
    let (browser, events) = BrowserDouble::new();
    let connection = Connection::new(
        "ws://double",
        browser.clone(),
        events,
        ConnectionOptions::default(),
    );

    browser.push(attach_frame("PAGE"));
    let session = connection
        .wait_for_session(&SessionId::new("PAGE"))
        .await
        .expect("session");

    // One unanswered call on the session, one on the connection.
    let session_call = {
        let session = session.clone();
        tokio::spawn(async move { session.send("Page.navigate", None).await })
    };
    let connection_call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send("Target.getTargets", None).await })
    };
    settle().await;

    connection.close("shutting down");

    for outcome in [
        session_call.await.expect("join"),
        connection_call.await.expect("join"),
    ] {
        let err = outcome.expect_err("closed");
        assert!(matches!(err, Error::TargetClosed { .. }));
        assert!(err.to_string().contains("shutting down"));
    }

    // Nothing touches the transport afterwards.
    let frames_before = browser.sent().len();
    assert!(session.send("Page.reload", None).await.is_err());
    assert_eq!(browser.sent().len(), frames_before);
}

#[tokio::test]
async fn frame_waiters_resolve_across_late_attachment() {
    let (browser, events) = BrowserDouble::new();
    let connection = Connection::new(
        "ws://double",
        browser.clone(),
        events,
        ConnectionOptions::default(),
    );

    browser.push(attach_frame("PAGE"));
    let session = connection
        .wait_for_session(&SessionId::new("PAGE"))
        .await
        .expect("session");
    let manager = FrameManager::new(session);

    let waiting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.wait_for_frame(&FrameId::new("IFRAME")).await })
    };
    settle().await;

    browser.push(session_event(
        "PAGE",
        "Page.frameNavigated",
        r#"{"frame":{"id":"MAIN","loaderId":"L1","url":"https://example.com"}}"#,
    ));
    browser.push(session_event(
        "PAGE",
        "Page.frameAttached",
        r#"{"frameId":"IFRAME","parentFrameId":"MAIN"}"#,
    ));

    let frame = waiting.await.expect("join").expect("frame attached");
    assert_eq!(frame.id().as_str(), "IFRAME");
    assert_eq!(
        manager
            .tree()
            .get_parent_frame(&FrameId::new("IFRAME"))
            .unwrap()
            .id()
            .as_str(),
        "MAIN"
    );
}
