#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use admin_session::{
    api::{ApiClient, HttpRequest, HttpResponse, Transport},
    clock::ManualClock,
    config::SessionConfig,
    errors::SessionError,
    notify::RecordingSink,
    session::{detect::CookieMap, SessionContext},
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

pub const BASE_URL: &str = "https://api.test";

/// One canned reply, optionally delayed.
pub struct Reply {
    pub response: HttpResponse,
    pub delay: Option<Duration>,
}

pub fn reply(status: u16, body: &str) -> Reply {
    Reply {
        response: HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        },
        delay: None,
    }
}

impl Reply {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.response.headers.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Transport that answers from a queue and records what it was asked to send.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
    cookies: Mutex<CookieMap>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn set_cookie(&self, name: &str, value: &str) {
        self.cookies
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.url.trim_start_matches(BASE_URL).to_string())
            .collect()
    }

    pub fn request(&self, index: usize) -> HttpRequest {
        self.requests()[index].clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        let Some(reply) = reply else {
            return Err(SessionError::Network("no scripted reply left".to_string()));
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(reply.response)
    }

    fn cookies(&self, _url: &str) -> CookieMap {
        self.cookies.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub client: ApiClient,
    pub context: Arc<SessionContext>,
    pub transport: Arc<ScriptedTransport>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(replies: Vec<Reply>) -> Harness {
    harness_with(SessionConfig::default(), replies)
}

pub fn harness_with(config: SessionConfig, replies: Vec<Reply>) -> Harness {
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let context = SessionContext::builder(config.with_base_url(BASE_URL))
        .clock(clock.clone())
        .notice_sink(sink.clone())
        .build();
    let transport = ScriptedTransport::new(replies);
    let client = ApiClient::new(context.clone(), transport.clone());

    Harness {
        client,
        context,
        transport,
        sink,
        clock,
    }
}

pub fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|value| value.to_str().ok())
}
