//! Network event correlator and interception control.
//!
//! Joins `Network.*` and `Fetch.*` events, delivered in no guaranteed
//! order and keyed by two different id spaces, into consistent request
//! and response objects. The joining rules follow the protocol's
//! behavior:
//!
//! - `requestPaused` and `requestWillBeSent` pair up on the network id
//!   when URL and method agree; whichever arrives first is buffered.
//!   Paused-event headers are authoritative.
//! - A response that expects extra-info is parked until the extra-info
//!   arrives; terminal events that show up in between park alongside it.
//! - A `requestWillBeSent` carrying a `redirectResponse` closes out the
//!   previous request on the same id before the new hop is built.
//!
//! All handlers run on the connection's serialized inbound worker;
//! notification callbacks run outside the buffer lock.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::json;
use tracing::{debug, error};

use crate::error::Result;
use crate::events::{EventBus, EventCallback, EventSubscription, ProtocolEvent};
use crate::identifiers::{FetchRequestId, SessionId};
use crate::network::events::{
    AuthRequiredParams, LoadingFailedParams, LoadingFinishedParams, RequestPausedParams,
    RequestServedFromCacheParams, RequestWillBeSentParams, ResponseExtraInfoParams,
    ResponseReceivedParams,
};
use crate::network::request::{NetworkRequest, NetworkResponse};
use crate::network::state::{NetworkEventState, QueuedEventGroup, RedirectInfo};
use crate::session::Session;

// ============================================================================
// NetworkEvent
// ============================================================================

/// Notification raised by the correlator.
#[derive(Clone)]
pub enum NetworkEvent {
    /// A fully joined request was emitted.
    Request(NetworkRequest),

    /// A response was matched to its request.
    Response(NetworkResponse),

    /// A request reached its successful terminal state.
    RequestFinished(NetworkRequest),

    /// A request reached its failed terminal state.
    RequestFailed(NetworkRequest),

    /// A request was answered from the in-memory cache.
    RequestServedFromCache(Option<NetworkRequest>),
}

impl NetworkEvent {
    /// Routing key used on the network-event bus.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::RequestFinished(_) => "requestFinished",
            Self::RequestFailed(_) => "requestFailed",
            Self::RequestServedFromCache(_) => "requestServedFromCache",
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// HTTP authentication credentials supplied to `Fetch.continueWithAuth`.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// User name.
    pub username: String,

    /// Password.
    pub password: String,
}

/// Emulated network conditions.
#[derive(Debug, Clone, Default)]
pub struct NetworkConditions {
    /// Whether the network is emulated as unreachable.
    pub offline: bool,

    /// Added round-trip latency in milliseconds.
    pub latency_ms: f64,

    /// Download throughput in bytes/s; negative disables throttling.
    pub download: f64,

    /// Upload throughput in bytes/s; negative disables throttling.
    pub upload: f64,
}

/// Session-level settings the manager re-applies to every client.
#[derive(Clone, Copy)]
enum Apply {
    ExtraHeaders,
    UserAgent,
    NetworkConditions,
    CacheDisabled,
    RequestInterception,
}

// ============================================================================
// NetworkManager
// ============================================================================

/// Correlates network events across one or more sessions.
///
/// Cheap to clone; all clones address the same manager.
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<NetworkManagerInner>,
}

struct ClientEntry {
    session: Session,

    /// Dropped on removal; unsubscribes every handler.
    _subscriptions: Vec<EventSubscription>,
}

struct NetworkManagerInner {
    state: Mutex<NetworkEventState>,
    clients: Mutex<FxHashMap<SessionId, ClientEntry>>,

    /// Interception ids already offered credentials once.
    attempted_auths: Mutex<FxHashSet<FetchRequestId>>,

    credentials: Mutex<Option<Credentials>>,
    extra_headers: Mutex<Option<HashMap<String, String>>>,
    user_agent: Mutex<Option<String>>,
    user_cache_disabled: Mutex<Option<bool>>,
    conditions: Mutex<Option<NetworkConditions>>,

    user_request_interception: AtomicBool,
    protocol_request_interception: AtomicBool,

    events: EventBus<NetworkEvent>,
}

impl NetworkManager {
    /// Creates a manager with no clients.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkManagerInner {
                state: Mutex::new(NetworkEventState::new()),
                clients: Mutex::new(FxHashMap::default()),
                attempted_auths: Mutex::new(FxHashSet::default()),
                credentials: Mutex::new(None),
                extra_headers: Mutex::new(None),
                user_agent: Mutex::new(None),
                user_cache_disabled: Mutex::new(None),
                conditions: Mutex::new(None),
                user_request_interception: AtomicBool::new(false),
                protocol_request_interception: AtomicBool::new(false),
                events: EventBus::new(),
            }),
        }
    }

    // ========================================================================
    // Clients
    // ========================================================================

    /// Starts consuming a session's network events.
    ///
    /// Subscribes the handlers, enables the network domain and re-applies
    /// every configured setting to the new client. Adding a session twice
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn add_client(&self, session: &Session) -> Result<()> {
        {
            let clients = self.inner.clients.lock();
            if clients.contains_key(session.id()) {
                return Ok(());
            }
        }

        let subscriptions = self.subscribe_handlers(session);
        self.inner.clients.lock().insert(
            session.id().clone(),
            ClientEntry {
                session: session.clone(),
                _subscriptions: subscriptions,
            },
        );

        session.send("Network.enable", None).await?;
        self.apply(session, Apply::ExtraHeaders).await?;
        self.apply(session, Apply::NetworkConditions).await?;
        self.apply(session, Apply::CacheDisabled).await?;
        self.apply(session, Apply::RequestInterception).await?;
        self.apply(session, Apply::UserAgent).await?;
        Ok(())
    }

    /// Stops consuming a session's network events.
    pub fn remove_client(&self, session: &Session) {
        self.inner.clients.lock().remove(session.id());
    }

    /// Number of requests between emission and terminal state.
    #[must_use]
    pub fn requests_in_progress(&self) -> usize {
        self.inner.state.lock().requests_in_progress()
    }

    /// Registers a listener for correlator notifications.
    ///
    /// Keys: `request`, `response`, `requestFinished`, `requestFailed`,
    /// `requestServedFromCache`; `None` receives all.
    #[must_use]
    pub fn subscribe(
        &self,
        filter: Option<&str>,
        callback: EventCallback<NetworkEvent>,
    ) -> EventSubscription {
        self.inner.events.subscribe(filter, callback)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Enables or disables user-level request interception.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn set_request_interception(&self, enabled: bool) -> Result<()> {
        self.inner
            .user_request_interception
            .store(enabled, Ordering::SeqCst);
        self.update_protocol_request_interception().await
    }

    /// Sets (or clears) credentials for HTTP authentication challenges.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn authenticate(&self, credentials: Option<Credentials>) -> Result<()> {
        *self.inner.credentials.lock() = credentials;
        self.update_protocol_request_interception().await
    }

    /// Sets extra headers added to every request.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn set_extra_http_headers(&self, headers: HashMap<String, String>) -> Result<()> {
        let lowercased = headers
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();
        *self.inner.extra_headers.lock() = Some(lowercased);
        self.apply_to_all_clients(Apply::ExtraHeaders).await
    }

    /// Overrides the user agent.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        *self.inner.user_agent.lock() = Some(user_agent.to_string());
        self.apply_to_all_clients(Apply::UserAgent).await
    }

    /// Enables or disables the browser cache.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn set_cache_enabled(&self, enabled: bool) -> Result<()> {
        *self.inner.user_cache_disabled.lock() = Some(!enabled);
        self.apply_to_all_clients(Apply::CacheDisabled).await
    }

    /// Emulates an offline network.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn set_offline_mode(&self, offline: bool) -> Result<()> {
        self.inner
            .conditions
            .lock()
            .get_or_insert_with(NetworkConditions::default)
            .offline = offline;
        self.apply_to_all_clients(Apply::NetworkConditions).await
    }

    /// Emulates network throughput and latency.
    ///
    /// # Errors
    ///
    /// Propagates session send failures.
    pub async fn emulate_network_conditions(
        &self,
        conditions: Option<NetworkConditions>,
    ) -> Result<()> {
        {
            let mut current = self.inner.conditions.lock();
            let entry = current.get_or_insert_with(NetworkConditions::default);
            match conditions {
                Some(conditions) => {
                    entry.latency_ms = conditions.latency_ms;
                    entry.download = conditions.download;
                    entry.upload = conditions.upload;
                }
                None => {
                    entry.latency_ms = 0.0;
                    entry.download = -1.0;
                    entry.upload = -1.0;
                }
            }
        }
        self.apply_to_all_clients(Apply::NetworkConditions).await
    }

    async fn update_protocol_request_interception(&self) -> Result<()> {
        let enabled = self.inner.user_request_interception.load(Ordering::SeqCst)
            || self.inner.credentials.lock().is_some();

        if enabled == self.inner.protocol_request_interception.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.inner
            .protocol_request_interception
            .store(enabled, Ordering::SeqCst);
        self.apply_to_all_clients(Apply::RequestInterception).await
    }

    async fn apply_to_all_clients(&self, what: Apply) -> Result<()> {
        let sessions: Vec<Session> = {
            let clients = self.inner.clients.lock();
            clients.values().map(|entry| entry.session.clone()).collect()
        };

        for session in sessions {
            self.apply(&session, what).await?;
        }
        Ok(())
    }

    async fn apply(&self, session: &Session, what: Apply) -> Result<()> {
        match what {
            Apply::ExtraHeaders => {
                let headers = self.inner.extra_headers.lock().clone();
                if let Some(headers) = headers {
                    session
                        .send(
                            "Network.setExtraHTTPHeaders",
                            Some(json!({ "headers": headers })),
                        )
                        .await?;
                }
            }
            Apply::UserAgent => {
                let user_agent = self.inner.user_agent.lock().clone();
                if let Some(user_agent) = user_agent {
                    session
                        .send(
                            "Network.setUserAgentOverride",
                            Some(json!({ "userAgent": user_agent })),
                        )
                        .await?;
                }
            }
            Apply::NetworkConditions => {
                let conditions = self.inner.conditions.lock().clone();
                if let Some(conditions) = conditions {
                    session
                        .send(
                            "Network.emulateNetworkConditions",
                            Some(json!({
                                "offline": conditions.offline,
                                "latency": conditions.latency_ms,
                                "downloadThroughput": conditions.download,
                                "uploadThroughput": conditions.upload,
                            })),
                        )
                        .await?;
                }
            }
            Apply::CacheDisabled => {
                self.apply_cache_disabled(session).await?;
            }
            Apply::RequestInterception => {
                self.inner.user_cache_disabled.lock().get_or_insert(false);
                self.apply_cache_disabled(session).await?;

                if self.inner.protocol_request_interception.load(Ordering::SeqCst) {
                    session
                        .send(
                            "Fetch.enable",
                            Some(json!({
                                "handleAuthRequests": true,
                                "patterns": [{ "urlPattern": "*" }],
                            })),
                        )
                        .await?;
                } else {
                    session.send("Fetch.disable", None).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_cache_disabled(&self, session: &Session) -> Result<()> {
        let disabled = *self.inner.user_cache_disabled.lock();
        if let Some(disabled) = disabled {
            session
                .send(
                    "Network.setCacheDisabled",
                    Some(json!({ "cacheDisabled": disabled })),
                )
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Handler Wiring
    // ========================================================================

    fn subscribe_handlers(&self, session: &Session) -> Vec<EventSubscription> {
        let weak = Arc::downgrade(&self.inner);
        vec![
            session.subscribe(
                Some("Network.requestWillBeSent"),
                handler(weak.clone(), session, |manager, session, event| {
                    if let Ok(params) = event.params_as::<RequestWillBeSentParams>() {
                        manager.on_request_will_be_sent(&session, params);
                    }
                }),
            ),
            session.subscribe(
                Some("Fetch.requestPaused"),
                handler(weak.clone(), session, |manager, session, event| {
                    if let Ok(params) = event.params_as::<RequestPausedParams>() {
                        manager.on_request_paused(&session, &params);
                    }
                }),
            ),
            session.subscribe(
                Some("Fetch.authRequired"),
                handler(weak.clone(), session, |manager, session, event| {
                    if let Ok(params) = event.params_as::<AuthRequiredParams>() {
                        manager.on_auth_required(&session, &params);
                    }
                }),
            ),
            session.subscribe(
                Some("Network.responseReceived"),
                handler(weak.clone(), session, |manager, session, event| {
                    if let Ok(params) = event.params_as::<ResponseReceivedParams>() {
                        manager.on_response_received(&session, params);
                    }
                }),
            ),
            session.subscribe(
                Some("Network.responseReceivedExtraInfo"),
                handler(weak.clone(), session, |manager, session, event| {
                    if let Ok(params) = event.params_as::<ResponseExtraInfoParams>() {
                        manager.on_response_extra_info(&session, params);
                    }
                }),
            ),
            session.subscribe(
                Some("Network.requestServedFromCache"),
                handler(weak.clone(), session, |manager, _session, event| {
                    if let Ok(params) = event.params_as::<RequestServedFromCacheParams>() {
                        manager.on_request_served_from_cache(&params);
                    }
                }),
            ),
            session.subscribe(
                Some("Network.loadingFinished"),
                handler(weak.clone(), session, |manager, _session, event| {
                    if let Ok(params) = event.params_as::<LoadingFinishedParams>() {
                        manager.on_loading_finished(params);
                    }
                }),
            ),
            session.subscribe(
                Some("Network.loadingFailed"),
                handler(weak, session, |manager, _session, event| {
                    if let Ok(params) = event.params_as::<LoadingFailedParams>() {
                        manager.on_loading_failed(params);
                    }
                }),
            ),
        ]
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn on_request_will_be_sent(&self, session: &Session, mut params: RequestWillBeSentParams) {
        let interception_active = self.inner.user_request_interception.load(Ordering::SeqCst)
            && !params.request.url.to_lowercase().starts_with("data:");

        if !interception_active {
            // Request interception does not happen for data: URLs.
            self.on_request(session, params, None);
            return;
        }

        let fetch_request_id = {
            let mut state = self.inner.state.lock();
            let paused = state.get_request_paused(&params.request_id).cloned();
            match paused {
                Some(paused) => {
                    // Paused-event headers are authoritative.
                    patch_headers(&mut params.request.headers, &paused.request.headers);
                    state.forget_request_paused(&params.request_id);
                    state.store_request_will_be_sent(params.request_id.clone(), params.clone());
                    Some(paused.request_id)
                }
                None => {
                    state.store_request_will_be_sent(params.request_id.clone(), params.clone());
                    None
                }
            }
        };

        if let Some(fetch_request_id) = fetch_request_id {
            self.on_request(session, params, Some(fetch_request_id));
        }
    }

    fn on_request_paused(&self, session: &Session, params: &RequestPausedParams) {
        let user_enabled = self.inner.user_request_interception.load(Ordering::SeqCst);
        let protocol_enabled = self
            .inner
            .protocol_request_interception
            .load(Ordering::SeqCst);

        if !user_enabled && protocol_enabled {
            // Interception was enabled for auth handling only; keep the
            // request moving.
            let session = session.clone();
            let request_id = params.request_id.clone();
            tokio::spawn(async move {
                let result = session
                    .send(
                        "Fetch.continueRequest",
                        Some(json!({ "requestId": request_id })),
                    )
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "Failed to continue intercepted request");
                }
            });
        }

        let Some(network_id) = params.network_id.clone() else {
            self.on_request_without_network_instrumentation(session, params);
            return;
        };

        let joined = {
            let mut state = self.inner.state.lock();

            // Redirect hops reuse the network id; a buffered entry whose
            // URL or method disagrees belongs to a different hop and is
            // stale.
            let buffered = state.get_request_will_be_sent(&network_id).cloned();
            match buffered {
                Some(mut will_be_sent)
                    if will_be_sent.request.url == params.request.url
                        && will_be_sent.request.method == params.request.method =>
                {
                    patch_headers(&mut will_be_sent.request.headers, &params.request.headers);
                    state.store_request_will_be_sent(network_id.clone(), will_be_sent.clone());
                    Some(will_be_sent)
                }
                Some(_) => {
                    state.forget_request_will_be_sent(&network_id);
                    state.store_request_paused(network_id.clone(), params.clone());
                    None
                }
                None => {
                    state.store_request_paused(network_id.clone(), params.clone());
                    None
                }
            }
        };

        if let Some(will_be_sent) = joined {
            self.on_request(session, will_be_sent, Some(params.request_id.clone()));
        }
    }

    /// Emits the joined request, closing out a redirect predecessor
    /// first when the event carries one.
    fn on_request(
        &self,
        session: &Session,
        params: RequestWillBeSentParams,
        fetch_request_id: Option<FetchRequestId>,
    ) {
        let mut emissions: Vec<NetworkEvent> = Vec::new();

        {
            let mut state = self.inner.state.lock();
            let mut redirect_chain = Vec::new();

            if let Some(redirect_response) = &params.redirect_response {
                let mut redirect_extra_info = None;

                if params.redirect_has_extra_info {
                    redirect_extra_info = state.shift_response_extra_info(&params.request_id);
                    if redirect_extra_info.is_none() {
                        // Defer the whole hop until its extra-info lands.
                        let id = params.request_id.clone();
                        state.queue_redirect_info(
                            id,
                            RedirectInfo {
                                event: params,
                                fetch_request_id,
                            },
                        );
                        return;
                    }
                }

                // If we attached late we may have missed the original
                // requestWillBeSent; then there is nothing to close out.
                if let Some(previous) = state.get_request(&params.request_id) {
                    let response = NetworkResponse::new(
                        session.clone(),
                        params.request_id.clone(),
                        redirect_response,
                        redirect_extra_info.as_ref(),
                        previous.from_memory_cache(),
                    );
                    previous.set_response(response.clone());
                    response.mark_body_unavailable();
                    redirect_chain = previous.chain_with_self();

                    self.forget_request_locked(&mut state, &previous, false);
                    emissions.push(NetworkEvent::Response(response));
                    emissions.push(NetworkEvent::RequestFinished(previous));
                }
            }

            let request = NetworkRequest::from_will_be_sent(
                session.clone(),
                fetch_request_id,
                self.inner.user_request_interception.load(Ordering::SeqCst),
                &params,
                redirect_chain,
            );
            state.store_request(params.request_id.clone(), request.clone());
            emissions.push(NetworkEvent::Request(request));
        }

        for event in emissions {
            self.emit(event);
        }
    }

    /// A paused event with no network id still surfaces for user
    /// interception; it just never correlates.
    fn on_request_without_network_instrumentation(
        &self,
        session: &Session,
        params: &RequestPausedParams,
    ) {
        let request = NetworkRequest::from_paused(
            session.clone(),
            self.inner.user_request_interception.load(Ordering::SeqCst),
            params,
        );
        self.emit(NetworkEvent::Request(request));
    }

    fn on_response_received(&self, session: &Session, params: ResponseReceivedParams) {
        let ready = {
            let mut state = self.inner.state.lock();
            let request = state.get_request(&params.request_id);

            // Memory-cache hits and unknown requests never get
            // extra-info; a response that declares extra-info waits for
            // it. Which responses carry the flag at all is
            // protocol-version-dependent; the flag itself is trusted.
            let expecting_extra_info =
                request.as_ref().is_some_and(|r| !r.from_memory_cache()) && params.has_extra_info;

            if expecting_extra_info {
                match state.shift_response_extra_info(&params.request_id) {
                    Some(extra_info) => Some((params, Some(extra_info))),
                    None => {
                        state.queue_event_group(
                            params.request_id.clone(),
                            QueuedEventGroup {
                                response: params,
                                loading_finished: None,
                                loading_failed: None,
                            },
                        );
                        None
                    }
                }
            } else {
                Some((params, None))
            }
        };

        if let Some((params, extra_info)) = ready {
            self.emit_response(session, &params, extra_info.as_ref());
        }
    }

    fn emit_response(
        &self,
        session: &Session,
        params: &ResponseReceivedParams,
        extra_info: Option<&ResponseExtraInfoParams>,
    ) {
        let emission = {
            let state = self.inner.state.lock();
            let Some(request) = state.get_request(&params.request_id) else {
                // File uploads produce a response with no request.
                return;
            };

            // Disk-cache responses never carry usable extra-info.
            let extra_info = if params.response.from_disk_cache {
                None
            } else {
                extra_info
            };

            let response = NetworkResponse::new(
                session.clone(),
                params.request_id.clone(),
                &params.response,
                extra_info,
                request.from_memory_cache(),
            );
            request.set_response(response.clone());
            NetworkEvent::Response(response)
        };

        self.emit(emission);
    }

    fn on_response_extra_info(&self, session: &Session, params: ResponseExtraInfoParams) {
        enum Pending {
            Redirect(RedirectInfo),
            Group(QueuedEventGroup, ResponseExtraInfoParams),
            Buffered,
        }

        let pending = {
            let mut state = self.inner.state.lock();

            if let Some(redirect) = state.take_queued_redirect_info(&params.request_id) {
                // Re-drive the deferred redirect hop with the extra-info
                // now available.
                state.push_response_extra_info(params.request_id.clone(), params);
                Pending::Redirect(redirect)
            } else if let Some(group) = state.take_queued_event_group(&params.request_id) {
                Pending::Group(group, params)
            } else {
                state.push_response_extra_info(params.request_id.clone(), params);
                Pending::Buffered
            }
        };

        match pending {
            Pending::Redirect(redirect) => {
                self.on_request(session, redirect.event, redirect.fetch_request_id);
            }
            Pending::Group(group, extra_info) => {
                self.emit_response(session, &group.response, Some(&extra_info));
                if let Some(finished) = group.loading_finished {
                    self.emit_loading_finished(&finished);
                }
                if let Some(failed) = group.loading_failed {
                    self.emit_loading_failed(&failed);
                }
            }
            Pending::Buffered => {}
        }
    }

    fn on_loading_finished(&self, params: LoadingFinishedParams) {
        let deferred = {
            let mut state = self.inner.state.lock();
            match state.queued_event_group_mut(&params.request_id) {
                Some(group) => {
                    group.loading_finished = Some(params.clone());
                    true
                }
                None => false,
            }
        };

        if !deferred {
            self.emit_loading_finished(&params);
        }
    }

    fn emit_loading_finished(&self, params: &LoadingFinishedParams) {
        let request = {
            let mut state = self.inner.state.lock();
            let Some(request) = state.get_request(&params.request_id) else {
                return;
            };
            self.forget_request_locked(&mut state, &request, true);
            request
        };

        if let Some(response) = request.response() {
            response.mark_body_loaded();
        }
        self.emit(NetworkEvent::RequestFinished(request));
    }

    fn on_loading_failed(&self, params: LoadingFailedParams) {
        let deferred = {
            let mut state = self.inner.state.lock();
            match state.queued_event_group_mut(&params.request_id) {
                Some(group) => {
                    group.loading_failed = Some(params.clone());
                    true
                }
                None => false,
            }
        };

        if !deferred {
            self.emit_loading_failed(&params);
        }
    }

    fn emit_loading_failed(&self, params: &LoadingFailedParams) {
        let request = {
            let mut state = self.inner.state.lock();
            let Some(request) = state.get_request(&params.request_id) else {
                return;
            };
            self.forget_request_locked(&mut state, &request, true);
            request
        };

        request.set_failure(&params.error_text);
        if let Some(response) = request.response() {
            response.mark_body_loaded();
        }
        self.emit(NetworkEvent::RequestFailed(request));
    }

    fn on_request_served_from_cache(&self, params: &RequestServedFromCacheParams) {
        let request = self.inner.state.lock().get_request(&params.request_id);
        if let Some(request) = &request {
            request.set_from_memory_cache();
        }
        self.emit(NetworkEvent::RequestServedFromCache(request));
    }

    fn on_auth_required(&self, session: &Session, params: &AuthRequiredParams) {
        let credentials = self.inner.credentials.lock().clone();
        let response = {
            let mut attempted = self.inner.attempted_auths.lock();
            if attempted.contains(&params.request_id) {
                "CancelAuth"
            } else if credentials.is_some() {
                attempted.insert(params.request_id.clone());
                "ProvideCredentials"
            } else {
                "Default"
            }
        };

        let credentials = credentials.unwrap_or_default();
        let session = session.clone();
        let request_id = params.request_id.clone();
        tokio::spawn(async move {
            let result = session
                .send(
                    "Fetch.continueWithAuth",
                    Some(json!({
                        "requestId": request_id,
                        "authChallengeResponse": {
                            "response": response,
                            "username": credentials.username,
                            "password": credentials.password,
                        },
                    })),
                )
                .await;
            if let Err(e) = result {
                error!(error = %e, "Failed to answer auth challenge");
            }
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Drops a request from the live map; with `events` also clears
    /// every correlation buffer under its id.
    fn forget_request_locked(
        &self,
        state: &mut NetworkEventState,
        request: &NetworkRequest,
        events: bool,
    ) {
        state.forget_request(request.id());

        if let Some(interception_id) = request.interception_id() {
            self.inner.attempted_auths.lock().remove(interception_id);
        }

        if events {
            state.forget(request.id());
        }

        debug!(request_id = %request.id(), "Request forgotten");
    }

    fn emit(&self, event: NetworkEvent) {
        self.inner.events.emit(event.kind(), &event);
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Overwrites `target` entries with the paused event's headers.
fn patch_headers(target: &mut HashMap<String, String>, patch: &HashMap<String, String>) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Wraps a handler so it only runs while the manager is alive.
fn handler<F>(
    weak: Weak<NetworkManagerInner>,
    session: &Session,
    f: F,
) -> EventCallback<ProtocolEvent>
where
    F: Fn(NetworkManager, Session, &ProtocolEvent) + Send + Sync + 'static,
{
    let session = session.clone();
    Arc::new(move |event: &ProtocolEvent| {
        if let Some(inner) = weak.upgrade() {
            f(NetworkManager { inner }, session.clone(), event);
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::connection::{Connection, ConnectionOptions};
    use crate::identifiers::NetworkRequestId;
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
            .wait_for_session(&crate::identifiers::SessionId::new("S"))
            .await
            .expect("session");
        (session, transport)
    }

    /// Recorder collecting every correlator notification.
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        responses: Arc<Mutex<Vec<NetworkResponse>>>,
        requests: Arc<Mutex<Vec<NetworkRequest>>>,
        _guard: EventSubscription,
    }

    impl Recorder {
        fn attach(manager: &NetworkManager) -> Self {
            let events = Arc::new(Mutex::new(Vec::new()));
            let responses = Arc::new(Mutex::new(Vec::new()));
            let requests = Arc::new(Mutex::new(Vec::new()));

            let events_clone = Arc::clone(&events);
            let responses_clone = Arc::clone(&responses);
            let requests_clone = Arc::clone(&requests);
            let guard = manager.subscribe(
                None,
                Arc::new(move |event: &NetworkEvent| {
                    events_clone.lock().push(event.kind().to_string());
                    match event {
                        NetworkEvent::Response(response) => {
                            responses_clone.lock().push(response.clone());
                        }
                        NetworkEvent::Request(request)
                        | NetworkEvent::RequestFinished(request)
                        | NetworkEvent::RequestFailed(request) => {
                            requests_clone.lock().push(request.clone());
                        }
                        NetworkEvent::RequestServedFromCache(_) => {}
                    }
                }),
            );

            Self {
                events,
                responses,
                requests,
                _guard: guard,
            }
        }

        fn kinds(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        fn count(&self, kind: &str) -> usize {
            self.events.lock().iter().filter(|k| *k == kind).count()
        }
    }

    fn will_be_sent(id: &str, url: &str, method: &str) -> RequestWillBeSentParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{id}","request":{{"url":"{url}","method":"{method}","headers":{{"x-origin":"renderer"}}}},"type":"Document","frameId":"F1"}}"#
        ))
        .expect("parse")
    }

    fn redirect_will_be_sent(
        id: &str,
        url: &str,
        redirect_url: &str,
        has_extra_info: bool,
    ) -> RequestWillBeSentParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{id}","request":{{"url":"{url}","method":"GET","headers":{{}}}},"redirectResponse":{{"url":"{redirect_url}","status":302,"statusText":"Found","headers":{{"location":"{url}"}}}},"redirectHasExtraInfo":{has_extra_info}}}"#
        ))
        .expect("parse")
    }

    fn paused(fetch_id: &str, network_id: &str, url: &str, method: &str) -> RequestPausedParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{fetch_id}","networkId":"{network_id}","request":{{"url":"{url}","method":"{method}","headers":{{"x-patched":"fetch","x-origin":"fetch"}}}},"frameId":"F1"}}"#
        ))
        .expect("parse")
    }

    fn response_received(id: &str, has_extra_info: bool, from_disk_cache: bool) -> ResponseReceivedParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{id}","hasExtraInfo":{has_extra_info},"response":{{"url":"https://a.test","status":200,"statusText":"OK","headers":{{"content-type":"text/html"}},"fromDiskCache":{from_disk_cache}}}}}"#
        ))
        .expect("parse")
    }

    fn extra_info(id: &str, status: u16) -> ResponseExtraInfoParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{id}","headers":{{"set-cookie":"sid=1"}},"statusCode":{status}}}"#
        ))
        .expect("parse")
    }

    fn loading_finished(id: &str) -> LoadingFinishedParams {
        serde_json::from_str(&format!(r#"{{"requestId":"{id}","encodedDataLength":120}}"#))
            .expect("parse")
    }

    fn loading_failed(id: &str, text: &str) -> LoadingFailedParams {
        serde_json::from_str(&format!(
            r#"{{"requestId":"{id}","errorText":"{text}","canceled":false}}"#
        ))
        .expect("parse")
    }

    #[tokio::test]
    async fn test_plain_request_lifecycle() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("1", "https://a.test", "GET"));
        manager.on_response_received(&session, response_received("1", false, false));
        manager.on_loading_finished(loading_finished("1"));

        assert_eq!(recorder.kinds(), vec!["request", "response", "requestFinished"]);
        assert!(manager.inner.state.lock().is_empty());
    }

    #[tokio::test]
    async fn test_paused_before_will_be_sent_joins_with_patched_headers() {
        // Property: requestPaused arriving first is buffered; the later
        // requestWillBeSent joins it, emitting exactly one request with
        // the paused event's headers winning.
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        manager
            .inner
            .user_request_interception
            .store(true, Ordering::SeqCst);
        let recorder = Recorder::attach(&manager);

        manager.on_request_paused(&session, &paused("int-7", "7", "https://a.test", "GET"));
        assert_eq!(recorder.count("request"), 0);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://a.test", "GET"));
        assert_eq!(recorder.count("request"), 1);

        let request = recorder.requests.lock()[0].clone();
        assert_eq!(request.interception_id().unwrap().as_str(), "int-7");
        assert_eq!(
            request.headers().get("x-patched").map(String::as_str),
            Some("fetch")
        );
        assert_eq!(
            request.headers().get("x-origin").map(String::as_str),
            Some("fetch")
        );
    }

    #[tokio::test]
    async fn test_will_be_sent_before_paused_joins_too() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        manager
            .inner
            .user_request_interception
            .store(true, Ordering::SeqCst);
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://a.test", "GET"));
        assert_eq!(recorder.count("request"), 0);

        manager.on_request_paused(&session, &paused("int-7", "7", "https://a.test", "GET"));
        assert_eq!(recorder.count("request"), 1);
        assert_eq!(
            recorder.requests.lock()[0]
                .interception_id()
                .unwrap()
                .as_str(),
            "int-7"
        );
    }

    #[tokio::test]
    async fn test_stale_will_be_sent_discarded_on_mismatch() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        manager
            .inner
            .user_request_interception
            .store(true, Ordering::SeqCst);
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://old.test", "GET"));
        // Same network id, different URL: the buffered entry is stale.
        manager.on_request_paused(&session, &paused("int-7", "7", "https://new.test", "GET"));

        assert_eq!(recorder.count("request"), 0);
        let state = manager.inner.state.lock();
        assert!(state.get_request_will_be_sent(&NetworkRequestId::new("7")).is_none());
        assert!(state.get_request_paused(&NetworkRequestId::new("7")).is_some());
    }

    #[tokio::test]
    async fn test_response_waits_for_declared_extra_info() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://a.test", "GET"));
        manager.on_response_received(&session, response_received("7", true, false));
        assert_eq!(recorder.count("response"), 0);

        // A terminal event in the gap parks with the response.
        manager.on_loading_finished(loading_finished("7"));
        assert_eq!(recorder.count("requestFinished"), 0);

        manager.on_response_extra_info(&session, extra_info("7", 200));
        assert_eq!(recorder.kinds(), vec!["request", "response", "requestFinished"]);

        let response = recorder.responses.lock()[0].clone();
        assert_eq!(
            response.headers().get("set-cookie").map(String::as_str),
            Some("sid=1")
        );
        assert!(manager.inner.state.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disk_cache_response_skips_extra_info() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://a.test", "GET"));
        manager.on_response_received(&session, response_received("7", true, true));

        // Emitted immediately; disk-cache responses never join extra-info.
        assert_eq!(recorder.count("response"), 1);
        let response = recorder.responses.lock()[0].clone();
        assert!(response.from_cache());
        assert!(response.headers().get("set-cookie").is_none());
    }

    #[tokio::test]
    async fn test_redirect_closes_out_previous_request() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://a.test/start", "GET"));
        manager.on_request_will_be_sent(
            &session,
            redirect_will_be_sent("7", "https://a.test/next", "https://a.test/start", false),
        );

        assert_eq!(
            recorder.kinds(),
            vec!["request", "response", "requestFinished", "request"]
        );

        let (hop_response, successor) = {
            let requests = recorder.requests.lock();
            let successor = requests
                .iter()
                .find(|r| r.url() == "https://a.test/next")
                .expect("new hop")
                .clone();
            (requests[0].response().expect("redirect response"), successor)
        };
        assert_eq!(successor.redirect_chain().len(), 1);
        assert_eq!(successor.redirect_chain()[0].url(), "https://a.test/start");

        // The superseded hop has a 302 response with no retrievable body.
        assert_eq!(hop_response.status(), 302);
        let err = hop_response.body().await.expect_err("redirect body");
        assert!(matches!(err, crate::Error::RedirectBodyUnavailable));
    }

    #[tokio::test]
    async fn test_redirect_defers_until_extra_info() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("7", "https://a.test/start", "GET"));
        manager.on_request_will_be_sent(
            &session,
            redirect_will_be_sent("7", "https://a.test/next", "https://a.test/start", true),
        );

        // Redirect parked; only the original emission happened so far.
        assert_eq!(recorder.kinds(), vec!["request"]);

        manager.on_response_extra_info(&session, extra_info("7", 302));
        assert_eq!(
            recorder.kinds(),
            vec!["request", "response", "requestFinished", "request"]
        );
    }

    #[tokio::test]
    async fn test_loading_failed_surfaces_failure_text() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("9", "https://a.test", "GET"));
        manager.on_loading_failed(loading_failed("9", "net::ERR_CONNECTION_RESET"));

        assert_eq!(recorder.kinds(), vec!["request", "requestFailed"]);
        let request = recorder.requests.lock().last().cloned().unwrap();
        assert_eq!(request.failure().as_deref(), Some("net::ERR_CONNECTION_RESET"));
        assert!(manager.inner.state.lock().is_empty());
    }

    #[tokio::test]
    async fn test_served_from_cache_marks_request() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("3", "https://a.test", "GET"));
        manager.on_request_served_from_cache(&RequestServedFromCacheParams {
            request_id: NetworkRequestId::new("3"),
        });

        assert_eq!(recorder.count("requestServedFromCache"), 1);

        // A memory-cache hit no longer waits for extra-info.
        manager.on_response_received(&session, response_received("3", true, false));
        assert_eq!(recorder.count("response"), 1);
    }

    #[tokio::test]
    async fn test_auto_continue_when_only_protocol_interception() {
        let (session, transport) = test_session().await;
        let manager = NetworkManager::new();
        manager
            .inner
            .protocol_request_interception
            .store(true, Ordering::SeqCst);

        manager.on_request_paused(&session, &paused("int-1", "1", "https://a.test", "GET"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let sent = transport.sent();
        let frame = sent.iter().find(|f| f.contains("Fetch.continueRequest"));
        assert!(frame.is_some(), "paused request must be auto-continued");
    }

    #[tokio::test]
    async fn test_paused_without_network_id_surfaces_uncorrelated() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        let recorder = Recorder::attach(&manager);

        let params: RequestPausedParams = serde_json::from_str(
            r#"{"requestId":"int-5","request":{"url":"https://a.test","method":"GET"}}"#,
        )
        .expect("parse");
        manager.on_request_paused(&session, &params);

        assert_eq!(recorder.count("request"), 1);
        assert!(manager.inner.state.lock().is_empty());
    }

    #[tokio::test]
    async fn test_data_url_bypasses_interception_join() {
        let (session, _transport) = test_session().await;
        let manager = NetworkManager::new();
        manager
            .inner
            .user_request_interception
            .store(true, Ordering::SeqCst);
        let recorder = Recorder::attach(&manager);

        manager.on_request_will_be_sent(&session, will_be_sent("2", "data:text/plain,hi", "GET"));
        assert_eq!(recorder.count("request"), 1);
    }

    // ========================================================================
    // Order-Independence Property
    // ========================================================================

    /// Valid delivery orders for one intercepted, non-redirected
    /// request: the pause happens before the network responds, the
    /// response after its request, loadingFinished last of the three;
    /// extraInfo floats freely, and paused/willBeSent race each other.
    fn valid_orders() -> Vec<Vec<u8>> {
        // 0 = willBeSent, 1 = paused, 2 = responseReceived,
        // 3 = extraInfo, 4 = loadingFinished
        let mut orders = Vec::new();
        let events = [0_u8, 1, 2, 3, 4];
        permute(&events, &mut Vec::new(), &mut orders);
        orders
            .into_iter()
            .filter(|order| {
                let pos = |event: u8| order.iter().position(|e| *e == event).unwrap();
                pos(0) < pos(2) && pos(1) < pos(2) && pos(2) < pos(4)
            })
            .collect()
    }

    fn permute(rest: &[u8], acc: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
        if rest.is_empty() {
            out.push(acc.clone());
            return;
        }
        for (i, event) in rest.iter().enumerate() {
            let mut remaining = rest.to_vec();
            remaining.remove(i);
            acc.push(*event);
            permute(&remaining, acc, out);
            acc.pop();
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Property: every valid topological order yields exactly one
        /// joined request, one response with extra-info applied, and one
        /// finished notification, with all buffers cleared.
        #[test]
        fn prop_correlation_complete_in_any_valid_order(index in 0usize..30) {
            let orders = valid_orders();
            let order = &orders[index % orders.len()];

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async {
                let (session, _transport) = test_session().await;
                let manager = NetworkManager::new();
                manager
                    .inner
                    .user_request_interception
                    .store(true, Ordering::SeqCst);
                let recorder = Recorder::attach(&manager);

                for event in order {
                    match event {
                        0 => manager.on_request_will_be_sent(
                            &session,
                            will_be_sent("7", "https://a.test", "GET"),
                        ),
                        1 => manager.on_request_paused(
                            &session,
                            &paused("int-7", "7", "https://a.test", "GET"),
                        ),
                        2 => manager.on_response_received(
                            &session,
                            response_received("7", true, false),
                        ),
                        3 => manager.on_response_extra_info(&session, extra_info("7", 200)),
                        4 => manager.on_loading_finished(loading_finished("7")),
                        _ => unreachable!(),
                    }
                }

                prop_assert_eq!(recorder.count("request"), 1);
                prop_assert_eq!(recorder.count("response"), 1);
                prop_assert_eq!(recorder.count("requestFinished"), 1);

                let response = recorder.responses.lock()[0].clone();
                prop_assert_eq!(
                    response.headers().get("set-cookie").map(String::as_str),
                    Some("sid=1")
                );

                prop_assert!(manager.inner.state.lock().is_empty());
                Ok(())
            })?;
        }
    }
}
