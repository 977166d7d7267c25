//! Network and fetch event payloads.
//!
//! Two id spaces meet here: `Network.*` events carry a network request
//! id that is stable across a redirect chain, while `Fetch.requestPaused`
//! carries its own interception id and only optionally names the network
//! id it belongs to. The correlator bridges the two.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::identifiers::{FetchRequestId, FrameId, LoaderId, NetworkRequestId};

// ============================================================================
// Request / Response Payloads
// ============================================================================

/// Request description shared by `Network.requestWillBeSent` and
/// `Fetch.requestPaused`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Request URL, without fragment.
    pub url: String,

    /// Fragment part reported separately.
    #[serde(default)]
    pub url_fragment: Option<String>,

    /// HTTP method.
    pub method: String,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// POST body, when small enough to inline.
    #[serde(default)]
    pub post_data: Option<String>,
}

/// Response description carried by `Network.responseReceived` and by
/// `redirectResponse` on the next `requestWillBeSent` of the chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Response URL.
    #[serde(default)]
    pub url: String,

    /// HTTP status code.
    #[serde(default)]
    pub status: u16,

    /// HTTP status text.
    #[serde(default)]
    pub status_text: String,

    /// Response headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Whether the response was served from the HTTP disk cache.
    #[serde(default)]
    pub from_disk_cache: bool,

    /// Whether the response was produced by a service worker.
    #[serde(default)]
    pub from_service_worker: bool,

    /// Remote endpoint address, when known.
    #[serde(default)]
    pub remote_ip_address: Option<String>,

    /// Remote endpoint port, when known.
    #[serde(default)]
    pub remote_port: Option<u16>,

    /// Security state string reported by the browser.
    #[serde(default)]
    pub security_state: Option<String>,
}

// ============================================================================
// Network Events
// ============================================================================

/// Params of `Network.requestWillBeSent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    /// Network id, stable across the redirect chain.
    pub request_id: NetworkRequestId,

    /// Loader the request belongs to.
    #[serde(default)]
    pub loader_id: Option<LoaderId>,

    /// The request itself.
    pub request: RequestPayload,

    /// Response of the hop this request supersedes, on redirects.
    #[serde(default)]
    pub redirect_response: Option<ResponsePayload>,

    /// Whether the superseded hop will get an extra-info event.
    #[serde(default)]
    pub redirect_has_extra_info: bool,

    /// Resource type (`Document`, `XHR`, ...).
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,

    /// Originating frame.
    #[serde(default)]
    pub frame_id: Option<FrameId>,
}

/// Params of `Fetch.requestPaused`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedParams {
    /// Interception id, distinct from the network id.
    pub request_id: FetchRequestId,

    /// The paused request; its headers are authoritative.
    pub request: RequestPayload,

    /// Originating frame.
    #[serde(default)]
    pub frame_id: Option<FrameId>,

    /// Resource type.
    #[serde(rename = "resourceType", default)]
    pub resource_type: Option<String>,

    /// Network id this pause belongs to; absent for requests without
    /// network instrumentation.
    #[serde(default)]
    pub network_id: Option<NetworkRequestId>,
}

/// Params of `Network.responseReceived`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    /// Network id.
    pub request_id: NetworkRequestId,

    /// The response.
    pub response: ResponsePayload,

    /// Whether a matching extra-info event will arrive.
    #[serde(default)]
    pub has_extra_info: bool,

    /// Originating frame.
    #[serde(default)]
    pub frame_id: Option<FrameId>,
}

/// Params of `Network.responseReceivedExtraInfo`.
///
/// Arrives out of order relative to the response event and recurs per
/// redirect hop under the same id, hence the FIFO buffering.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseExtraInfoParams {
    /// Network id.
    pub request_id: NetworkRequestId,

    /// Raw response headers, including ones the renderer strips.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Status code as seen on the wire.
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Params of `Network.loadingFinished`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinishedParams {
    /// Network id.
    pub request_id: NetworkRequestId,

    /// Total encoded bytes.
    #[serde(default)]
    pub encoded_data_length: Option<f64>,
}

/// Params of `Network.loadingFailed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedParams {
    /// Network id.
    pub request_id: NetworkRequestId,

    /// Failure description.
    #[serde(default)]
    pub error_text: String,

    /// Whether the request was canceled.
    #[serde(default)]
    pub canceled: bool,

    /// Block reason, when the browser blocked it.
    #[serde(default)]
    pub blocked_reason: Option<String>,
}

/// Params of `Network.requestServedFromCache`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCacheParams {
    /// Network id.
    pub request_id: NetworkRequestId,
}

/// Params of `Fetch.authRequired`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredParams {
    /// Interception id.
    pub request_id: FetchRequestId,

    /// Challenge details.
    #[serde(default)]
    pub auth_challenge: Value,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_will_be_sent_parse() {
        let json = r#"{
            "requestId": "7",
            "loaderId": "L1",
            "request": {
                "url": "https://example.com/api",
                "method": "POST",
                "headers": {"Content-Type": "application/json"},
                "postData": "{}"
            },
            "type": "XHR",
            "frameId": "F1",
            "redirectHasExtraInfo": false
        }"#;

        let params: RequestWillBeSentParams = serde_json::from_str(json).expect("parse");
        assert_eq!(params.request_id.as_str(), "7");
        assert_eq!(params.request.method, "POST");
        assert!(params.redirect_response.is_none());
        assert_eq!(params.resource_type.as_deref(), Some("XHR"));
    }

    #[test]
    fn test_request_paused_without_network_id() {
        let json = r#"{
            "requestId": "interception-3",
            "request": {"url": "https://example.com", "method": "GET"},
            "frameId": "F1",
            "resourceType": "Document"
        }"#;

        let params: RequestPausedParams = serde_json::from_str(json).expect("parse");
        assert!(params.network_id.is_none());
        assert_eq!(params.request_id.as_str(), "interception-3");
    }

    #[test]
    fn test_redirect_response_carried() {
        let json = r#"{
            "requestId": "7",
            "request": {"url": "https://example.com/b", "method": "GET"},
            "redirectResponse": {
                "url": "https://example.com/a",
                "status": 302,
                "statusText": "Found",
                "headers": {"location": "/b"}
            },
            "redirectHasExtraInfo": true
        }"#;

        let params: RequestWillBeSentParams = serde_json::from_str(json).expect("parse");
        let redirect = params.redirect_response.expect("redirect");
        assert_eq!(redirect.status, 302);
        assert!(params.redirect_has_extra_info);
    }

    #[test]
    fn test_loading_failed_parse() {
        let json = r#"{"requestId": "7", "errorText": "net::ERR_FAILED", "canceled": false}"#;
        let params: LoadingFailedParams = serde_json::from_str(json).expect("parse");
        assert_eq!(params.error_text, "net::ERR_FAILED");
    }
}
