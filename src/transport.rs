//! Opaque HTTP-ish transport abstractions. The real HTTP stack (axum request
//! extractors, header parsing, cookie jars) lives in the host; this crate only
//! needs the narrow surface §6 names.

use std::collections::HashMap;

/// An inbound request, as seen by a decoder.
pub trait TransportRequest: Send + Sync {
    fn url(&self) -> &str;
    fn method(&self) -> &str;
    fn content_type(&self) -> Option<&str>;
    fn body(&self) -> &[u8];
    fn parameter(&self, name: &str) -> Option<&str>;
    fn cookie(&self, name: &str) -> Option<&str>;
    fn header(&self, name: &str) -> Option<&str>;
}

/// An outbound response, as written by an encoder.
pub trait TransportResponse: Send + Sync {
    fn set_content_type(&mut self, content_type: &str);
    fn set_header(&mut self, name: &str, value: &str);
    fn set_cookie(&mut self, name: &str, value: &str);
    fn send_redirect(&mut self, url: &str);
    fn send_response(&mut self, body: &[u8]);
    fn send_error(&mut self, body: &[u8]);
}

/// In-memory request/response pair, used by this crate's own tests and handy
/// for a host prototyping against the library before wiring in its real HTTP
/// stack.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransportRequest {
    pub url: String,
    pub method: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub parameters: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl MemoryTransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    pub fn post(url: impl Into<String>, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            content_type: Some(content_type.into()),
            body,
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Parses `url`'s own query string and `body` (when form-encoded) into
    /// `parameters`, as a real HTTP framework's request object would already
    /// have done for us.
    pub fn with_query_params_from_url(mut self) -> Self {
        if let Some(idx) = self.url.find('?') {
            let query = self.url[idx + 1..].to_string();
            for pair in query.split('&') {
                if let Some((k, v)) = pair.split_once('=') {
                    let decoded = urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.to_string());
                    self.parameters.insert(k.to_string(), decoded);
                }
            }
        }
        self
    }
}

impl TransportRequest for MemoryTransportRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTransportResponse {
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub redirect_url: Option<String>,
    pub body: Option<Vec<u8>>,
    pub error_body: Option<Vec<u8>>,
}

impl TransportResponse for MemoryTransportResponse {
    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    fn send_redirect(&mut self, url: &str) {
        self.redirect_url = Some(url.to_string());
    }

    fn send_response(&mut self, body: &[u8]) {
        self.body = Some(body.to_vec());
    }

    fn send_error(&mut self, body: &[u8]) {
        self.error_body = Some(body.to_vec());
    }
}
