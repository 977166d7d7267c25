//! Correlation buffers for in-flight network events.
//!
//! CDP delivers the events of one request in no guaranteed order. These
//! buffers hold whichever half of a join arrived first until its
//! counterpart shows up, and every entry is positively cleared once the
//! request reaches a terminal state so memory stays bounded.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::identifiers::{FetchRequestId, NetworkRequestId};
use crate::network::events::{
    LoadingFailedParams, LoadingFinishedParams, RequestPausedParams, RequestWillBeSentParams,
    ResponseExtraInfoParams, ResponseReceivedParams,
};
use crate::network::request::NetworkRequest;

// ============================================================================
// Buffers
// ============================================================================

/// Redirect whose emission is waiting for an extra-info event.
#[derive(Debug, Clone)]
pub struct RedirectInfo {
    /// The deferred `requestWillBeSent`.
    pub event: RequestWillBeSentParams,

    /// Interception id the join already produced, if any.
    pub fetch_request_id: Option<FetchRequestId>,
}

/// Response (plus any terminal events) parked until its extra-info
/// arrives.
#[derive(Debug, Clone)]
pub struct QueuedEventGroup {
    /// The deferred `responseReceived`.
    pub response: ResponseReceivedParams,

    /// `loadingFinished` that arrived while the response was parked.
    pub loading_finished: Option<LoadingFinishedParams>,

    /// `loadingFailed` that arrived while the response was parked.
    pub loading_failed: Option<LoadingFailedParams>,
}

// ============================================================================
// NetworkEventState
// ============================================================================

/// Per-network-id correlation state.
///
/// Mutated only from the serialized inbound worker; the owning manager
/// wraps it in a mutex for cross-thread reads.
#[derive(Default)]
pub struct NetworkEventState {
    request_will_be_sent: FxHashMap<NetworkRequestId, RequestWillBeSentParams>,
    request_paused: FxHashMap<NetworkRequestId, RequestPausedParams>,
    requests: FxHashMap<NetworkRequestId, NetworkRequest>,

    /// FIFO per id: a request id recurs across redirect hops, and each
    /// hop consumes exactly one extra-info in arrival order.
    response_extra_info: FxHashMap<NetworkRequestId, VecDeque<ResponseExtraInfoParams>>,

    queued_redirects: FxHashMap<NetworkRequestId, VecDeque<RedirectInfo>>,
    queued_event_groups: FxHashMap<NetworkRequestId, QueuedEventGroup>,
}

impl NetworkEventState {
    /// Creates empty state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // requestWillBeSent
    // ========================================================================

    pub fn store_request_will_be_sent(
        &mut self,
        id: NetworkRequestId,
        event: RequestWillBeSentParams,
    ) {
        self.request_will_be_sent.insert(id, event);
    }

    #[must_use]
    pub fn get_request_will_be_sent(
        &self,
        id: &NetworkRequestId,
    ) -> Option<&RequestWillBeSentParams> {
        self.request_will_be_sent.get(id)
    }

    pub fn forget_request_will_be_sent(&mut self, id: &NetworkRequestId) {
        self.request_will_be_sent.remove(id);
    }

    // ========================================================================
    // requestPaused
    // ========================================================================

    pub fn store_request_paused(&mut self, id: NetworkRequestId, event: RequestPausedParams) {
        self.request_paused.insert(id, event);
    }

    #[must_use]
    pub fn get_request_paused(&self, id: &NetworkRequestId) -> Option<&RequestPausedParams> {
        self.request_paused.get(id)
    }

    pub fn forget_request_paused(&mut self, id: &NetworkRequestId) {
        self.request_paused.remove(id);
    }

    // ========================================================================
    // Live Requests
    // ========================================================================

    pub fn store_request(&mut self, id: NetworkRequestId, request: NetworkRequest) {
        self.requests.insert(id, request);
    }

    #[must_use]
    pub fn get_request(&self, id: &NetworkRequestId) -> Option<NetworkRequest> {
        self.requests.get(id).cloned()
    }

    pub fn forget_request(&mut self, id: &NetworkRequestId) {
        self.requests.remove(id);
    }

    /// Number of requests between emission and terminal state.
    #[must_use]
    pub fn requests_in_progress(&self) -> usize {
        self.requests.len()
    }

    // ========================================================================
    // Extra-Info FIFO
    // ========================================================================

    pub fn push_response_extra_info(
        &mut self,
        id: NetworkRequestId,
        event: ResponseExtraInfoParams,
    ) {
        self.response_extra_info.entry(id).or_default().push_back(event);
    }

    /// Consumes the oldest unmatched extra-info for this id.
    pub fn shift_response_extra_info(
        &mut self,
        id: &NetworkRequestId,
    ) -> Option<ResponseExtraInfoParams> {
        self.response_extra_info.get_mut(id)?.pop_front()
    }

    // ========================================================================
    // Queued Redirects
    // ========================================================================

    pub fn queue_redirect_info(&mut self, id: NetworkRequestId, info: RedirectInfo) {
        self.queued_redirects.entry(id).or_default().push_back(info);
    }

    /// Consumes the oldest redirect parked for this id.
    pub fn take_queued_redirect_info(&mut self, id: &NetworkRequestId) -> Option<RedirectInfo> {
        self.queued_redirects.get_mut(id)?.pop_front()
    }

    // ========================================================================
    // Queued Event Groups
    // ========================================================================

    pub fn queue_event_group(&mut self, id: NetworkRequestId, group: QueuedEventGroup) {
        self.queued_event_groups.insert(id, group);
    }

    #[must_use]
    pub fn queued_event_group_mut(
        &mut self,
        id: &NetworkRequestId,
    ) -> Option<&mut QueuedEventGroup> {
        self.queued_event_groups.get_mut(id)
    }

    /// Consumes the parked group for this id.
    pub fn take_queued_event_group(&mut self, id: &NetworkRequestId) -> Option<QueuedEventGroup> {
        self.queued_event_groups.remove(id)
    }

    // ========================================================================
    // Terminal Cleanup
    // ========================================================================

    /// Clears every buffer keyed by this id.
    ///
    /// Called when a request reaches a terminal state; nothing may
    /// linger or the maps grow without bound.
    pub fn forget(&mut self, id: &NetworkRequestId) {
        self.request_will_be_sent.remove(id);
        self.request_paused.remove(id);
        self.response_extra_info.remove(id);
        self.queued_redirects.remove(id);
        self.queued_event_groups.remove(id);
    }

    /// Returns `true` when every buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request_will_be_sent.is_empty()
            && self.request_paused.is_empty()
            && self.requests.is_empty()
            && self.response_extra_info.values().all(VecDeque::is_empty)
            && self.queued_redirects.values().all(VecDeque::is_empty)
            && self.queued_event_groups.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
