//! Event delivery to a Snowplow collector.
//!
//! The [`Emitter`] stores each tracked payload in memory, sends it on a
//! background task through a [`Transport`], and reports the outcome to a
//! completion callback as lists of successful and failed attempts. There
//! is no batching and no retry: an event gets exactly one attempt.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Collector path for GET requests.
pub const GET_PATH: &str = "/i";

/// Collector path for POST requests.
pub const POST_PATH: &str = "/com.snowplowanalytics.snowplow/tp2";

/// Schema wrapping POST request bodies.
pub const PAYLOAD_DATA_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/payload_data/jsonschema/1-0-4";

/// Status reported for an attempt that never got an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: i32 = -1;

/// HTTP method used to send events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    /// One event per request, encoded in the query string.
    Get,
    /// Events wrapped in a `payload_data` JSON body.
    #[default]
    Post,
}

impl RequestType {
    /// Collector path for this request type.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Get => GET_PATH,
            Self::Post => POST_PATH,
        }
    }
}

impl FromStr for RequestType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            _ => Err(ProviderError::Validation(format!(
                "emitter_request_type must be GET or POST, got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// URL scheme used to reach the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    #[default]
    Https,
}

impl Protocol {
    /// URL scheme, lowercase.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Self::Http),
            "HTTPS" => Ok(Self::Https),
            _ => Err(ProviderError::Validation(format!(
                "emitter_protocol must be HTTP or HTTPS, got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme().to_ascii_uppercase())
    }
}

/// A single tracker-protocol event: flat string key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Payload {
    pairs: BTreeMap<String, String>,
}

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. Empty values are skipped, as collectors treat them as absent.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.pairs.insert(key.into(), value);
        }
    }

    /// Get a field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    /// All fields, ordered by key.
    pub fn pairs(&self) -> &BTreeMap<String, String> {
        &self.pairs
    }
}

/// One request bound for the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorRequest {
    /// Full collector URL, path included.
    pub url: String,
    /// HTTP method.
    pub method: RequestType,
    /// The event being sent.
    pub payload: Payload,
}

impl CollectorRequest {
    /// The JSON body sent for POST requests.
    pub fn post_body(&self) -> serde_json::Value {
        serde_json::json!({
            "schema": PAYLOAD_DATA_SCHEMA,
            "data": [self.payload],
        })
    }
}

/// Sends a request to the collector and returns the HTTP status.
///
/// Implementations report [`TRANSPORT_FAILURE_STATUS`] when no response
/// was received at all.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the request.
    async fn send(&self, request: CollectorRequest) -> i32;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("snowplow-provider/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: CollectorRequest) -> i32 {
        let builder = match request.method {
            RequestType::Get => self.client.get(&request.url).query(request.payload.pairs()),
            RequestType::Post => self.client.post(&request.url).json(&request.post_body()),
        };

        match builder.send().await {
            Ok(response) => i32::from(response.status().as_u16()),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Collector request failed");
                TRANSPORT_FAILURE_STATUS
            },
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackResult {
    /// Number of events in the attempt.
    pub count: usize,
    /// HTTP status, or [`TRANSPORT_FAILURE_STATUS`].
    pub status: i32,
}

impl CallbackResult {
    fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Completion callback: `(successes, failures)`.
pub type EmitterCallback = Arc<dyn Fn(&[CallbackResult], &[CallbackResult]) + Send + Sync>;

/// In-memory delivery state. Events stay here until acknowledged.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    next_id: AtomicU64,
    events: Mutex<BTreeMap<u64, Payload>>,
}

impl MemoryStorage {
    fn add(&self, payload: Payload) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, payload);
        id
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Number of events not yet acknowledged by the collector.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Payload>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Delivers tracked events to a collector.
pub struct Emitter {
    collector_uri: String,
    request_type: RequestType,
    protocol: Protocol,
    transport: Arc<dyn Transport>,
    storage: Arc<MemoryStorage>,
    callback: Option<EmitterCallback>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("collector_url", &self.collector_url())
            .field("request_type", &self.request_type)
            .field("pending", &self.storage.pending())
            .finish_non_exhaustive()
    }
}

impl Emitter {
    /// Create an emitter for `collector_uri` (host and optional port, no scheme).
    pub fn new(collector_uri: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            collector_uri: collector_uri.into(),
            request_type: RequestType::default(),
            protocol: Protocol::default(),
            transport,
            storage: Arc::new(MemoryStorage::default()),
            callback: None,
        }
    }

    /// Set the HTTP method.
    pub fn with_request_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }

    /// Set the URL scheme.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the completion callback.
    pub fn with_callback(mut self, callback: EmitterCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Full collector URL, e.g. `http://com.acme/i`.
    pub fn collector_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.protocol.scheme(),
            self.collector_uri,
            self.request_type.path()
        )
    }

    /// The HTTP method in use.
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Delivery state shared with in-flight send tasks.
    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }

    /// Queue a payload and send it on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(&self, mut payload: Payload) {
        payload.add("stm", chrono::Utc::now().timestamp_millis().to_string());
        let id = self.storage.add(payload.clone());
        let request = CollectorRequest {
            url: self.collector_url(),
            method: self.request_type,
            payload,
        };
        let transport = Arc::clone(&self.transport);
        let storage = Arc::clone(&self.storage);
        let callback = self.callback.clone();

        debug!(url = %request.url, method = %request.method, "Sending event to collector");
        tokio::spawn(async move {
            let result = CallbackResult {
                count: 1,
                status: transport.send(request).await,
            };
            debug!(status = result.status, "Collector responded");

            let (successes, failures) = if result.is_success() {
                storage.remove(id);
                (vec![result], Vec::new())
            } else {
                (Vec::new(), vec![result])
            };
            if let Some(callback) = callback {
                callback(&successes, &failures);
            }
        });
    }
}
