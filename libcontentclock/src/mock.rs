//! Scripted HTTP client for testing
//!
//! Adapters and the dispatcher are exercised against this client instead of
//! real platform endpoints. Routes match on method and URL prefix; the
//! longest matching prefix wins, so `/media` and `/media_publish` can be
//! scripted independently. Every request is recorded for later assertions.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::error::PlatformError;
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};

#[derive(Debug, Clone)]
enum MockReply {
    Response(HttpResponse),
    Error(PlatformError),
}

#[derive(Debug)]
struct MockRoute {
    method: HttpMethod,
    url_prefix: String,
    /// Replies are consumed in order; the last one repeats.
    replies: VecDeque<MockReply>,
}

#[derive(Debug, Default)]
pub struct MockHttpClient {
    routes: Mutex<Vec<MockRoute>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON reply for requests matching `method` and `url_prefix`.
    pub fn respond(
        &self,
        method: HttpMethod,
        url_prefix: &str,
        status: u16,
        body: Value,
    ) -> &Self {
        self.push(
            method,
            url_prefix,
            MockReply::Response(HttpResponse::new(status, body.to_string())),
        )
    }

    /// Queue a raw reply, for binary downloads or non-JSON error pages.
    pub fn respond_raw(
        &self,
        method: HttpMethod,
        url_prefix: &str,
        status: u16,
        body: impl Into<Vec<u8>>,
    ) -> &Self {
        self.push(
            method,
            url_prefix,
            MockReply::Response(HttpResponse::new(status, body)),
        )
    }

    /// Queue a transport failure.
    pub fn fail(
        &self,
        method: HttpMethod,
        url_prefix: &str,
        error: PlatformError,
    ) -> &Self {
        self.push(method, url_prefix, MockReply::Error(error))
    }

    fn push(&self, method: HttpMethod, url_prefix: &str, reply: MockReply) -> &Self {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.url_prefix == url_prefix)
        {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(MockRoute {
                method,
                url_prefix: url_prefix.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Requests whose URL starts with `url_prefix`.
    pub fn requests_to(&self, url_prefix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.starts_with(url_prefix))
            .collect()
    }

    fn next_reply(&self, request: &HttpRequest) -> Option<MockReply> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.starts_with(&r.url_prefix))
            .max_by_key(|r| r.url_prefix.len())?;

        if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, PlatformError> {
        let reply = self.next_reply(&request);
        let summary = format!("{} {}", request.method, request.url);

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Error(error)) => Err(error),
            None => Ok(HttpResponse::new(
                404,
                format!(r#"{{"error":"no mock route for {}"}}"#, summary),
            )),
        }
    }
}
