//! Shared fakes for unit tests.

use crate::gateway::{HttpRequest, HttpResponse, RequestGateway, Transport, TransportError};
use crate::session::{MemoryStore, SessionIdentity};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_BASE_URL: &str = "http://backend.test/api";

/// Canned outcome for one transport call.
pub enum Reply {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never completes; the gateway deadline has to fire.
    Stall,
}

/// Transport that replays scripted replies in order and records every request.
#[derive(Clone)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    seen: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.seen.lock().unwrap().push(req);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Respond(resp)) => Ok(resp),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Stall) => futures::future::pending::<Result<HttpResponse, TransportError>>().await,
            None => Err(TransportError::Unreachable("no scripted reply left".into())),
        }
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> Reply {
    Reply::Respond(HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: bytes::Bytes::from(body.to_string()),
    })
}

pub fn binary_response(status: u16, disposition: Option<&str>, body: &'static [u8]) -> Reply {
    let mut headers = HeaderMap::new();
    if let Some(d) = disposition {
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(d).unwrap());
    }
    Reply::Respond(HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
        body: bytes::Bytes::from_static(body),
    })
}

pub fn gateway_with(transport: ScriptedTransport) -> (RequestGateway, Arc<SessionIdentity>) {
    let session = Arc::new(SessionIdentity::new(Box::new(MemoryStore::default())));
    let gateway = RequestGateway::new(
        TEST_BASE_URL,
        Duration::from_secs(300),
        Arc::new(transport),
        session.clone(),
    );
    (gateway, session)
}
