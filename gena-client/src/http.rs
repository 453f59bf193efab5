//! Blocking HTTP transport used for SUBSCRIBE/UNSUBSCRIBE requests.
//!
//! The [`HttpClient`] trait is the seam the protocol engine talks through;
//! [`UreqClient`] is the production implementation. Tests substitute their
//! own implementations with canned responses.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// A transport-level failure, distinct from any HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// An HTTP response with header names folded to lower case.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Executes one HTTP request synchronously.
///
/// Implementations must report transport failures through the error
/// variant and HTTP error statuses through [`HttpResponse::status`].
pub trait HttpClient: Send + Sync {
    fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production transport over a shared [`ureq::Agent`].
#[derive(Debug, Clone)]
pub struct UreqClient {
    agent: Arc<ureq::Agent>,
}

impl UreqClient {
    /// Create a client with sensible connect/read timeouts.
    pub fn new() -> Self {
        Self::with_agent(Arc::new(
            ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(5))
                .timeout_read(Duration::from_secs(10))
                .build(),
        ))
    }

    /// Create a client over a custom agent, for non-default timeouts.
    pub fn with_agent(agent: Arc<ureq::Agent>) -> Self {
        Self { agent }
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for UreqClient {
    fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.agent.request(method, url).timeout(timeout);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        match request.call() {
            Ok(response) => collect(response),
            // a status error still carries a full response
            Err(ureq::Error::Status(_, response)) => collect(response),
            Err(err) => Err(TransportError(err.to_string())),
        }
    }
}

fn collect(response: ureq::Response) -> Result<HttpResponse, TransportError> {
    let status = response.status();
    let mut headers = HashMap::new();
    for name in response.headers_names() {
        if let Some(value) = response.header(&name) {
            headers.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|err| TransportError(err.to_string()))?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Parse a `TIMEOUT` header value of the form `Second-N` or
/// `Second-infinite` into seconds; infinite maps to -1.
pub fn parse_timeout_header(value: &str) -> Option<i32> {
    let value = value.trim();
    if value.len() < 7 || !value[..7].eq_ignore_ascii_case("second-") {
        return None;
    }
    let rest = &value[7..];
    if rest.eq_ignore_ascii_case("infinite") {
        return Some(-1);
    }
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse::<i32>().ok()
}
