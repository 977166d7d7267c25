//! Joined request and response objects.
//!
//! A [`NetworkRequest`] is the correlator's output: one logical request
//! with its headers already patched from the interception layer and its
//! redirect ancestry attached. A request superseded by a redirect is
//! forgotten for callback purposes but survives in the redirect chain of
//! its successor.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::{FetchRequestId, FrameId, NetworkRequestId};
use crate::network::events::{
    RequestPausedParams, RequestWillBeSentParams, ResponseExtraInfoParams, ResponsePayload,
};
use crate::session::Session;

// ============================================================================
// NetworkRequest
// ============================================================================

/// One emitted network request.
///
/// Cheap to clone; all clones address the same request.
#[derive(Clone)]
pub struct NetworkRequest {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    id: NetworkRequestId,
    interception_id: Option<FetchRequestId>,
    session: Session,
    frame_id: Option<FrameId>,

    url: String,
    method: String,
    headers: HashMap<String, String>,
    post_data: Option<String>,
    resource_type: Option<String>,

    interception_enabled: bool,
    interception_handled: AtomicBool,

    /// Requests this one superseded, oldest first.
    redirect_chain: Vec<NetworkRequest>,

    response: Mutex<Option<NetworkResponse>>,
    failure_text: Mutex<Option<String>>,
    from_memory_cache: AtomicBool,
}

impl NetworkRequest {
    /// Builds a request from a joined `requestWillBeSent`.
    #[must_use]
    pub(crate) fn from_will_be_sent(
        session: Session,
        interception_id: Option<FetchRequestId>,
        interception_enabled: bool,
        params: &RequestWillBeSentParams,
        redirect_chain: Vec<NetworkRequest>,
    ) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id: params.request_id.clone(),
                interception_id,
                session,
                frame_id: params.frame_id.clone(),
                url: params.request.url.clone(),
                method: params.request.method.clone(),
                headers: params.request.headers.clone(),
                post_data: params.request.post_data.clone(),
                resource_type: params.resource_type.clone(),
                interception_enabled,
                interception_handled: AtomicBool::new(false),
                redirect_chain,
                response: Mutex::new(None),
                failure_text: Mutex::new(None),
                from_memory_cache: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a request from a paused event with no network
    /// instrumentation behind it.
    #[must_use]
    pub(crate) fn from_paused(
        session: Session,
        interception_enabled: bool,
        params: &RequestPausedParams,
    ) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id: NetworkRequestId::new(params.request_id.as_str()),
                interception_id: Some(params.request_id.clone()),
                session,
                frame_id: params.frame_id.clone(),
                url: params.request.url.clone(),
                method: params.request.method.clone(),
                headers: params.request.headers.clone(),
                post_data: params.request.post_data.clone(),
                resource_type: params.resource_type.clone(),
                interception_enabled,
                interception_handled: AtomicBool::new(false),
                redirect_chain: Vec::new(),
                response: Mutex::new(None),
                failure_text: Mutex::new(None),
                from_memory_cache: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Network id, shared by the whole redirect chain.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NetworkRequestId {
        &self.inner.id
    }

    /// Interception id, when the request went through the fetch layer.
    #[inline]
    #[must_use]
    pub fn interception_id(&self) -> Option<&FetchRequestId> {
        self.inner.interception_id.as_ref()
    }

    /// Request URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// HTTP method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Request headers (interception-layer values win).
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.inner.headers
    }

    /// POST body, when inlined.
    #[inline]
    #[must_use]
    pub fn post_data(&self) -> Option<&str> {
        self.inner.post_data.as_deref()
    }

    /// Resource type string.
    #[inline]
    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        self.inner.resource_type.as_deref()
    }

    /// Originating frame.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> Option<&FrameId> {
        self.inner.frame_id.as_ref()
    }

    /// Requests this one superseded, oldest first.
    #[inline]
    #[must_use]
    pub fn redirect_chain(&self) -> &[NetworkRequest] {
        &self.inner.redirect_chain
    }

    /// Matched response, once one was joined.
    #[must_use]
    pub fn response(&self) -> Option<NetworkResponse> {
        self.inner.response.lock().clone()
    }

    /// Failure text, once loading failed.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.inner.failure_text.lock().clone()
    }

    /// Whether the response came from the in-memory cache.
    #[inline]
    #[must_use]
    pub fn from_memory_cache(&self) -> bool {
        self.inner.from_memory_cache.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Interception
    // ========================================================================

    /// Lets a paused request proceed unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] when the request is not paused in the fetch
    /// layer or was already handled.
    pub async fn continue_request(&self) -> Result<()> {
        let interception_id = self.require_interception("Fetch.continueRequest")?;
        self.inner
            .session
            .send(
                "Fetch.continueRequest",
                Some(json!({ "requestId": interception_id })),
            )
            .await?;
        Ok(())
    }

    /// Aborts a paused request.
    ///
    /// # Errors
    ///
    /// Same as [`NetworkRequest::continue_request`].
    pub async fn abort(&self) -> Result<()> {
        let interception_id = self.require_interception("Fetch.failRequest")?;
        self.inner
            .session
            .send(
                "Fetch.failRequest",
                Some(json!({ "requestId": interception_id, "errorReason": "Failed" })),
            )
            .await?;
        Ok(())
    }

    fn require_interception(&self, method: &str) -> Result<&FetchRequestId> {
        if !self.inner.interception_enabled {
            return Err(Error::protocol(method, "Request interception is not enabled"));
        }
        if self.inner.interception_handled.swap(true, Ordering::SeqCst) {
            return Err(Error::protocol(method, "Request is already handled"));
        }
        self.inner
            .interception_id
            .as_ref()
            .ok_or_else(|| Error::protocol(method, "Request is not paused in the fetch layer"))
    }

    // ========================================================================
    // Correlator Hooks
    // ========================================================================

    pub(crate) fn set_response(&self, response: NetworkResponse) {
        *self.inner.response.lock() = Some(response);
    }

    pub(crate) fn set_failure(&self, text: &str) {
        *self.inner.failure_text.lock() = Some(text.to_string());
    }

    pub(crate) fn set_from_memory_cache(&self) {
        self.inner.from_memory_cache.store(true, Ordering::SeqCst);
    }

    /// This request's chain plus itself, for its successor.
    #[must_use]
    pub(crate) fn chain_with_self(&self) -> Vec<NetworkRequest> {
        let mut chain = self.inner.redirect_chain.clone();
        chain.push(self.clone());
        chain
    }
}

impl fmt::Debug for NetworkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkRequest")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("url", &self.inner.url)
            .field("redirects", &self.inner.redirect_chain.len())
            .finish()
    }
}

// ============================================================================
// NetworkResponse
// ============================================================================

/// Why a body can never be fetched.
#[derive(Debug, Clone, Copy)]
enum BodyUnavailable {
    /// Redirect hops have no retrievable body.
    Redirect,
}

enum BodyState {
    Pending(Vec<oneshot::Sender<std::result::Result<(), BodyUnavailable>>>),
    Ready(std::result::Result<(), BodyUnavailable>),
}

/// One joined response.
///
/// Cheap to clone; all clones address the same response.
#[derive(Clone)]
pub struct NetworkResponse {
    inner: Arc<ResponseInner>,
}

struct ResponseInner {
    session: Session,
    request_id: NetworkRequestId,

    url: String,
    status: u16,
    status_text: String,
    headers: HashMap<String, String>,

    from_disk_cache: bool,
    from_service_worker: bool,
    from_memory_cache: bool,

    remote_ip_address: Option<String>,
    remote_port: Option<u16>,
    security_state: Option<String>,

    body: Mutex<BodyState>,
}

impl NetworkResponse {
    /// Joins a response payload with its optional extra-info.
    ///
    /// Extra-info headers and status are authoritative when present.
    #[must_use]
    pub(crate) fn new(
        session: Session,
        request_id: NetworkRequestId,
        payload: &ResponsePayload,
        extra_info: Option<&ResponseExtraInfoParams>,
        from_memory_cache: bool,
    ) -> Self {
        let mut headers = payload.headers.clone();
        let mut status = payload.status;

        if let Some(extra_info) = extra_info {
            for (key, value) in &extra_info.headers {
                headers.insert(key.clone(), value.clone());
            }
            if let Some(code) = extra_info.status_code {
                status = code;
            }
        }

        Self {
            inner: Arc::new(ResponseInner {
                session,
                request_id,
                url: payload.url.clone(),
                status,
                status_text: payload.status_text.clone(),
                headers,
                from_disk_cache: payload.from_disk_cache,
                from_service_worker: payload.from_service_worker,
                from_memory_cache,
                remote_ip_address: payload.remote_ip_address.clone(),
                remote_port: payload.remote_port,
                security_state: payload.security_state.clone(),
                body: Mutex::new(BodyState::Pending(Vec::new())),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Response URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// HTTP status code (wire value when extra-info supplied one).
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.inner.status
    }

    /// HTTP status text.
    #[inline]
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.inner.status_text
    }

    /// Response headers (extra-info values win).
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.inner.headers
    }

    /// Returns `true` if served from the disk or memory cache.
    #[inline]
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.inner.from_disk_cache || self.inner.from_memory_cache
    }

    /// Returns `true` if produced by a service worker.
    #[inline]
    #[must_use]
    pub fn from_service_worker(&self) -> bool {
        self.inner.from_service_worker
    }

    /// Remote endpoint address, when known.
    #[inline]
    #[must_use]
    pub fn remote_ip_address(&self) -> Option<&str> {
        self.inner.remote_ip_address.as_deref()
    }

    /// Remote endpoint port, when known.
    #[inline]
    #[must_use]
    pub fn remote_port(&self) -> Option<u16> {
        self.inner.remote_port
    }

    /// Security state string, when reported.
    #[inline]
    #[must_use]
    pub fn security_state(&self) -> Option<&str> {
        self.inner.security_state.as_deref()
    }

    /// Returns `true` once the status signals success.
    #[inline]
    #[must_use]
    pub fn ok(&self) -> bool {
        self.inner.status == 0 || (200..300).contains(&self.inner.status)
    }

    // ========================================================================
    // Body
    // ========================================================================

    /// Fetches the response body, waiting for loading to finish first.
    ///
    /// # Errors
    ///
    /// - [`Error::RedirectBodyUnavailable`] for redirect hops
    /// - [`Error::BodyDecode`] when the base64 payload is corrupt
    /// - Session-level errors from the body fetch
    pub async fn body(&self) -> Result<Vec<u8>> {
        self.wait_body_loaded().await?;

        let result = self
            .inner
            .session
            .send(
                "Network.getResponseBody",
                Some(json!({ "requestId": self.inner.request_id })),
            )
            .await?;

        let body = result
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let base64_encoded = result
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if base64_encoded {
            BASE64
                .decode(body)
                .map_err(|e| Error::body_decode(e.to_string()))
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }

    /// Fetches the response body as text.
    ///
    /// # Errors
    ///
    /// Same as [`NetworkResponse::body`].
    pub async fn text(&self) -> Result<String> {
        let bytes = self.body().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Suspends until the body is fully loaded (or failed).
    async fn wait_body_loaded(&self) -> Result<()> {
        let rx = {
            let mut body = self.inner.body.lock();
            match &mut *body {
                BodyState::Ready(outcome) => return map_body_outcome(*outcome),
                BodyState::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };

        match rx.await {
            Ok(outcome) => map_body_outcome(outcome),
            Err(_) => Err(Error::RedirectBodyUnavailable),
        }
    }

    // ========================================================================
    // Correlator Hooks
    // ========================================================================

    /// Marks the body retrievable. First marking wins.
    pub(crate) fn mark_body_loaded(&self) {
        self.resolve_body(Ok(()));
    }

    /// Marks the body permanently unavailable (redirect hop).
    pub(crate) fn mark_body_unavailable(&self) {
        self.resolve_body(Err(BodyUnavailable::Redirect));
    }

    fn resolve_body(&self, outcome: std::result::Result<(), BodyUnavailable>) {
        let mut body = self.inner.body.lock();
        if let BodyState::Pending(waiters) = &mut *body {
            for waiter in waiters.drain(..) {
                let _ = waiter.send(outcome);
            }
            *body = BodyState::Ready(outcome);
        }
    }
}

fn map_body_outcome(outcome: std::result::Result<(), BodyUnavailable>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(BodyUnavailable::Redirect) => Err(Error::RedirectBodyUnavailable),
    }
}

impl fmt::Debug for NetworkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkResponse")
            .field("url", &self.inner.url)
            .field("status", &self.inner.status)
            .field("from_cache", &self.from_cache())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::connection::{Connection, ConnectionOptions};
    use crate::identifiers::SessionId;
    use crate::transport::testing::ScriptedTransport;

    async fn test_session() -> (Session, Arc<ScriptedTransport>) {
        let (transport, events) = ScriptedTransport::new();
        let connection = Connection::new(
            "ws://test",
            transport.clone(),
            events,
            ConnectionOptions::default(),
        );
        transport.push(
            r#"{"method":"Target.attachedToTarget","params":{"sessionId":"S","targetInfo":{"targetId":"T","type":"page","url":""},"waitingForDebugger":false}}"#,
        );
        let session = connection
            .wait_for_session(&SessionId::new("S"))
            .await
            .expect("session");
        (session, transport)
    }

    fn will_be_sent(id: &str, url: &str) -> RequestWillBeSentParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{id}","request":{{"url":"{url}","method":"GET","headers":{{"accept":"*/*"}}}}}}"#
        ))
        .expect("parse")
    }

    fn response_payload(status: u16) -> ResponsePayload {
        serde_json::from_str(&format!(
            r#"{{"url":"https://a.test","status":{status},"statusText":"OK","headers":{{"content-type":"text/html"}}}}"#
        ))
        .expect("parse")
    }

    #[tokio::test]
    async fn test_redirect_chain_accumulates() {
        let (session, _transport) = test_session().await;

        let first = NetworkRequest::from_will_be_sent(
            session.clone(),
            None,
            false,
            &will_be_sent("7", "https://a.test/1"),
            Vec::new(),
        );
        let second = NetworkRequest::from_will_be_sent(
            session.clone(),
            None,
            false,
            &will_be_sent("7", "https://a.test/2"),
            first.chain_with_self(),
        );
        let third = NetworkRequest::from_will_be_sent(
            session,
            None,
            false,
            &will_be_sent("7", "https://a.test/3"),
            second.chain_with_self(),
        );

        let chain = third.redirect_chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].url(), "https://a.test/1");
        assert_eq!(chain[1].url(), "https://a.test/2");
    }

    #[tokio::test]
    async fn test_extra_info_overrides_headers_and_status() {
        let (session, _transport) = test_session().await;

        let extra_info: ResponseExtraInfoParams = serde_json::from_str(
            r#"{"requestId":"7","headers":{"content-type":"text/plain","set-cookie":"a=1"},"statusCode":304}"#,
        )
        .expect("parse");

        let response = NetworkResponse::new(
            session,
            NetworkRequestId::new("7"),
            &response_payload(200),
            Some(&extra_info),
            false,
        );

        assert_eq!(response.status(), 304);
        assert_eq!(
            response.headers().get("content-type").map(String::as_str),
            Some("text/plain")
        );
        assert_eq!(
            response.headers().get("set-cookie").map(String::as_str),
            Some("a=1")
        );
    }

    #[tokio::test]
    async fn test_redirect_body_unavailable() {
        let (session, _transport) = test_session().await;

        let response = NetworkResponse::new(
            session,
            NetworkRequestId::new("7"),
            &response_payload(302),
            None,
            false,
        );
        response.mark_body_unavailable();

        let err = response.body().await.expect_err("redirect body");
        assert!(matches!(err, Error::RedirectBodyUnavailable));
    }

    #[tokio::test]
    async fn test_body_waits_for_loading_finished() {
        let (session, transport) = test_session().await;

        let response = NetworkResponse::new(
            session,
            NetworkRequestId::new("7"),
            &response_payload(200),
            None,
            false,
        );

        let fetching = {
            let response = response.clone();
            tokio::spawn(async move { response.text().await })
        };
        tokio::task::yield_now().await;

        response.mark_body_loaded();

        // Answer the getResponseBody call.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let sent = transport.sent();
        let command: Value = serde_json::from_str(sent.last().expect("body fetch")).expect("valid");
        assert_eq!(
            command.get("method").and_then(Value::as_str),
            Some("Network.getResponseBody")
        );
        let id = command.get("id").and_then(Value::as_u64).expect("id");
        transport.push(format!(
            r#"{{"id":{id},"result":{{"body":"aGVsbG8=","base64Encoded":true}},"sessionId":"S"}}"#
        ));

        let text = fetching.await.expect("join").expect("body");
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_interception_requires_enablement() {
        let (session, _transport) = test_session().await;

        let request = NetworkRequest::from_will_be_sent(
            session,
            Some(FetchRequestId::new("int-1")),
            false,
            &will_be_sent("7", "https://a.test"),
            Vec::new(),
        );

        let err = request.continue_request().await.expect_err("not enabled");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_from_memory_cache_flag() {
        let (session, _transport) = test_session().await;

        let request = NetworkRequest::from_will_be_sent(
            session,
            None,
            false,
            &will_be_sent("7", "https://a.test"),
            Vec::new(),
        );
        assert!(!request.from_memory_cache());
        request.set_from_memory_cache();
        assert!(request.from_memory_cache());
    }
}
