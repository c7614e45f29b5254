//! Outbound HTTP used by the platform adapters
//!
//! Adapters build an [`HttpRequest`] and hand it to an [`HttpClient`]. The
//! production client is [`ReqwestClient`]; tests use
//! [`crate::mock::MockHttpClient`].

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::time::Duration;

use crate::error::PlatformError;

/// Everything except the RFC 3986 unreserved characters.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a URL component or OAuth parameter.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

/// One field of a multipart form. Text fields have no file name.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: value.into().into_bytes(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartPart>),
    Bytes {
        content_type: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// URL without query string; parameters go in `query`.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn bytes(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes {
            content_type: content_type.into(),
            data,
        };
        self
    }

    /// First header with this name, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a form field, when the body is form-encoded.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    ///
    /// An empty or non-JSON body is an `UnexpectedResponse` carrying the
    /// status and a prefix of the body.
    pub fn json(&self) -> Result<Value, PlatformError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            PlatformError::UnexpectedResponse(format!(
                "HTTP {} with non-JSON body ({}): {}",
                self.status,
                e,
                self.snippet()
            ))
        })
    }

    /// The body truncated for log and error messages.
    pub fn snippet(&self) -> String {
        const MAX: usize = 300;
        let text = self.text();
        if text.chars().count() <= MAX {
            text
        } else {
            let cut: String = text.chars().take(MAX).collect();
            format!("{}...", cut)
        }
    }
}

/// Executes requests on behalf of the adapters.
///
/// Implementations apply the per-call deadline and report transport
/// failures as `PlatformError::Network`. Non-2xx responses are returned
/// as-is; interpreting them is the adapter's job.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, PlatformError>;
}

pub struct ReqwestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("contentclock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    fn build(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, PlatformError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(self.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Bytes { content_type, data } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data),
            RequestBody::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut field = reqwest::multipart::Part::bytes(part.data);
                    if let Some(file_name) = part.file_name {
                        field = field.file_name(file_name);
                    }
                    if let Some(content_type) = part.content_type {
                        field = field.mime_str(&content_type).map_err(|e| {
                            PlatformError::Validation(format!(
                                "invalid content type '{}': {}",
                                content_type, e
                            ))
                        })?;
                    }
                    form = form.part(part.name, field);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, PlatformError> {
        let method = request.method;
        let url = request.url.clone();
        let timeout = self.timeout;

        tracing::debug!(%method, url = %url, "Sending request");

        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| transport_error(&url, timeout, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, timeout, e))?;

        tracing::debug!(%method, url = %url, status, "Received response");

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

fn transport_error(url: &str, timeout: Duration, error: reqwest::Error) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Network(format!(
            "request to {} timed out after {}s",
            url,
            timeout.as_secs()
        ))
    } else if error.is_builder() {
        PlatformError::Validation(format!("invalid request to {}: {}", url, error))
    } else {
        PlatformError::Network(format!("request to {} failed: {}", url, error))
    }
}
