//! Single chokepoint for outbound calls.
//!
//! The gateway attaches the session identity and applies per-call timeouts. It adopts
//! server-renegotiated identities and classifies every failure into a [`RequestError`].
//! Each call declares up front whether it expects JSON or a binary body.

mod transport;

pub use transport::{
    FilePart, HttpRequest, HttpResponse, ReqwestTransport, RequestBody, Transport, TransportError,
};

use crate::error::RequestError;
use crate::session::SessionIdentity;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_HEADER: &str = "x-session-id";
const SESSION_FIELD: &str = "session_id";

/// How the response body of a call is to be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Decode as JSON; 4xx/5xx become `ServerError`.
    Json,
    /// Hand back the raw buffer for every status; the caller judges success.
    Binary,
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
    pub expect: Expect,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            headers: HeaderMap::new(),
            expect: Expect::Json,
        }
    }
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn binary(mut self) -> Self {
        self.expect = Expect::Binary;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BinaryResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Json { status: StatusCode, body: Value },
    Binary(BinaryResponse),
}

#[derive(Clone)]
pub struct RequestGateway {
    base_url: String,
    default_timeout: Duration,
    transport: Arc<dyn Transport>,
    session: Arc<SessionIdentity>,
}

impl RequestGateway {
    pub fn new(
        base_url: &str,
        default_timeout: Duration,
        transport: Arc<dyn Transport>,
        session: Arc<SessionIdentity>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_timeout,
            transport,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<Payload, RequestError> {
        let session_id = self.session.resolve();
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let mut headers = options.headers;
        if let Ok(v) = HeaderValue::from_str(&session_id) {
            headers.insert(HeaderName::from_static(SESSION_HEADER), v);
        }
        if method == Method::POST && matches!(body, RequestBody::Json(_)) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(%method, %url, session_id = %session_id, "sending request");

        let req = HttpRequest {
            method: method.clone(),
            url,
            headers,
            body,
            timeout,
        };

        // Enforce the deadline here as well so every transport honors it.
        let resp = match tokio::time::timeout(timeout, self.transport.execute(req)).await {
            Err(_) | Ok(Err(TransportError::TimedOut)) => {
                tracing::debug!(%method, endpoint, "request timed out");
                return Err(RequestError::timeout(timeout));
            }
            Ok(Err(TransportError::Unreachable(detail))) => {
                tracing::debug!(%method, endpoint, %detail, "backend unreachable");
                return Err(RequestError::network_unreachable(&self.base_url, detail));
            }
            Ok(Ok(resp)) => resp,
        };

        tracing::debug!(%method, endpoint, status = resp.status.as_u16(), "response received");
        self.adopt_header_session(&resp.headers);

        match options.expect {
            Expect::Binary => Ok(Payload::Binary(BinaryResponse {
                status: resp.status,
                headers: resp.headers,
                body: resp.body,
            })),
            Expect::Json => {
                let status = resp.status;
                self.decode_json(resp)
                    .map(|body| Payload::Json { status, body })
            }
        }
    }

    /// Send and decode the JSON body into `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let options = RequestOptions {
            expect: Expect::Json,
            ..options
        };
        match self.send(method, endpoint, body, options).await? {
            Payload::Json { status, body } => serde_json::from_value(body).map_err(|e| {
                RequestError::malformed(
                    Some(status.as_u16()),
                    format!("Unexpected response from {endpoint}: {e}"),
                )
            }),
            Payload::Binary(_) => Err(RequestError::malformed(
                None,
                format!("Unexpected binary response from {endpoint}"),
            )),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, RequestError> {
        self.send_json(
            Method::GET,
            endpoint,
            RequestBody::Empty,
            RequestOptions::default(),
        )
        .await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: RequestBody,
    ) -> Result<T, RequestError> {
        self.send_json(Method::POST, endpoint, body, RequestOptions::default())
            .await
    }

    fn adopt_header_session(&self, headers: &HeaderMap) {
        if let Some(id) = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session.reconcile(id);
        }
    }

    fn decode_json(&self, resp: HttpResponse) -> Result<Value, RequestError> {
        let status = resp.status;
        let parsed: Option<Value> = serde_json::from_slice(&resp.body).ok();

        if let Some(id) = parsed
            .as_ref()
            .and_then(|v| v.get(SESSION_FIELD))
            .and_then(Value::as_str)
        {
            self.session.reconcile(id);
        }

        if status.is_client_error() || status.is_server_error() {
            let message = parsed
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| status_text(status));
            return Err(RequestError::server(status.as_u16(), message));
        }

        parsed.ok_or_else(|| {
            RequestError::malformed(
                Some(status.as_u16()),
                format!("Server returned a non-JSON response (status {})", status.as_u16()),
            )
        })
    }
}

/// Pull a human-readable message from a structured error body (`error`, then `message`).
pub fn error_message(body: &Value) -> Option<String> {
    ["error", "message"].iter().find_map(|key| {
        body.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("Server error: {} {}", status.as_u16(), reason),
        None => format!("Server error: {}", status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{gateway_with, json_response, Reply, ScriptedTransport};
    use serde_json::json;

    #[tokio::test]
    async fn attaches_session_header_and_json_content_type() {
        let transport = ScriptedTransport::new(vec![json_response(200, json!({"ok": true}))]);
        let (gateway, session) = gateway_with(transport.clone());
        let id = session.resolve();

        gateway
            .send(
                Method::POST,
                "/qa",
                RequestBody::Json(json!({"question": "rows"})),
                RequestOptions::default(),
            )
            .await
            .unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://backend.test/api/qa");
        assert_eq!(sent[0].headers.get(SESSION_HEADER).unwrap(), id.as_str());
        assert_eq!(
            sent[0].headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn get_and_multipart_calls_leave_content_type_unset() {
        let transport = ScriptedTransport::new(vec![
            json_response(200, json!({})),
            json_response(200, json!({})),
        ]);
        let (gateway, _) = gateway_with(transport.clone());

        gateway
            .send(Method::GET, "/overview", RequestBody::Empty, RequestOptions::default())
            .await
            .unwrap();
        let part = FilePart {
            field: "file".into(),
            file_name: "a.csv".into(),
            mime: "text/csv".into(),
            bytes: bytes::Bytes::from_static(b"a,b\n1,2\n"),
        };
        gateway
            .send(
                Method::POST,
                "/upload",
                RequestBody::Multipart(part),
                RequestOptions::default(),
            )
            .await
            .unwrap();

        for req in transport.requests() {
            assert!(req.headers.get(CONTENT_TYPE).is_none());
        }
    }

    #[tokio::test]
    async fn connection_failure_is_network_unreachable() {
        let transport = ScriptedTransport::new(vec![Reply::Fail(TransportError::Unreachable(
            "connection refused".into(),
        ))]);
        let (gateway, _) = gateway_with(transport);

        let err = gateway.get_json::<Value>("/overview").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkUnreachable);
        assert_eq!(err.status, None);
        assert!(err.message.contains("http://backend.test/api"));
    }

    #[tokio::test]
    async fn server_error_uses_structured_message() {
        let transport = ScriptedTransport::new(vec![json_response(500, json!({"error": "boom"}))]);
        let (gateway, _) = gateway_with(transport);

        let err = gateway.get_json::<Value>("/insights").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.message, "boom");
        assert_eq!(err.status, Some(500));
    }

    #[tokio::test]
    async fn server_error_falls_back_to_message_then_status_text() {
        let transport = ScriptedTransport::new(vec![
            json_response(429, json!({"message": "slow down"})),
            Reply::Respond(HttpResponse {
                status: StatusCode::BAD_GATEWAY,
                headers: HeaderMap::new(),
                body: bytes::Bytes::from_static(b"<html>bad gateway</html>"),
            }),
        ]);
        let (gateway, _) = gateway_with(transport);

        let err = gateway.get_json::<Value>("/overview").await.unwrap_err();
        assert_eq!(err.message, "slow down");
        assert_eq!(err.status, Some(429));

        let err = gateway.get_json::<Value>("/overview").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.message, "Server error: 502 Bad Gateway");
    }

    #[tokio::test]
    async fn non_json_success_is_malformed() {
        let transport = ScriptedTransport::new(vec![Reply::Respond(HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: bytes::Bytes::from_static(b"not json"),
        })]);
        let (gateway, _) = gateway_with(transport);

        let err = gateway.get_json::<Value>("/overview").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            insights: String,
        }
        let transport = ScriptedTransport::new(vec![json_response(200, json!({"other": 1}))]);
        let (gateway, _) = gateway_with(transport);

        let err = gateway.get_json::<Needs>("/insights").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert_eq!(err.status, Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_times_out() {
        let transport = ScriptedTransport::new(vec![Reply::Stall]);
        let (gateway, _) = gateway_with(transport);

        let err = gateway
            .send_json::<Value>(
                Method::GET,
                "/overview",
                RequestBody::Empty,
                RequestOptions::default().with_timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn transport_timeout_is_classified_as_timeout() {
        let transport = ScriptedTransport::new(vec![Reply::Fail(TransportError::TimedOut)]);
        let (gateway, _) = gateway_with(transport);
        let err = gateway.get_json::<Value>("/overview").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn adopts_session_from_header_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("from-header"));
        let transport = ScriptedTransport::new(vec![
            Reply::Respond(HttpResponse {
                status: StatusCode::OK,
                headers,
                body: bytes::Bytes::from_static(b"{}"),
            }),
            json_response(200, json!({"session_id": "from-body"})),
        ]);
        let (gateway, session) = gateway_with(transport.clone());

        gateway.get_json::<Value>("/overview").await.unwrap();
        assert_eq!(session.resolve(), "from-header");

        gateway.get_json::<Value>("/overview").await.unwrap();
        assert_eq!(session.resolve(), "from-body");
        assert_eq!(
            transport.requests()[1].headers.get(SESSION_HEADER).unwrap(),
            "from-header"
        );
    }

    #[tokio::test]
    async fn body_session_wins_over_header_in_same_response() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("header-id"));
        let transport = ScriptedTransport::new(vec![Reply::Respond(HttpResponse {
            status: StatusCode::OK,
            headers,
            body: bytes::Bytes::from(json!({"session_id": "body-id"}).to_string()),
        })]);
        let (gateway, session) = gateway_with(transport);

        gateway.get_json::<Value>("/overview").await.unwrap();
        assert_eq!(session.resolve(), "body-id");
    }

    #[tokio::test]
    async fn error_responses_still_renegotiate_session() {
        let transport = ScriptedTransport::new(vec![json_response(
            400,
            json!({"error": "No dataset loaded", "session_id": "server-side"}),
        )]);
        let (gateway, session) = gateway_with(transport);

        let err = gateway.get_json::<Value>("/overview").await.unwrap_err();
        assert_eq!(err.message, "No dataset loaded");
        assert_eq!(session.resolve(), "server-side");
    }

    #[tokio::test]
    async fn binary_expectation_returns_error_statuses_untouched() {
        let transport = ScriptedTransport::new(vec![json_response(400, json!({"error": "no data"}))]);
        let (gateway, _) = gateway_with(transport);

        let payload = gateway
            .send(
                Method::GET,
                "/export/excel",
                RequestBody::Empty,
                RequestOptions::default().binary(),
            )
            .await
            .unwrap();
        match payload {
            Payload::Binary(b) => assert_eq!(b.status, StatusCode::BAD_REQUEST),
            Payload::Json { .. } => panic!("expected binary payload"),
        }
    }
}
