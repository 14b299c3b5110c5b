//! Tracker: turns events into tracker-protocol payloads.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::emitter::{Emitter, Payload};
use crate::payload::SelfDescribingJson;

/// Version string sent in the `tv` field.
pub const TRACKER_VERSION: &str = concat!("rust-provider-", env!("CARGO_PKG_VERSION"));

/// Default platform code for server-side tracking.
pub const DEFAULT_PLATFORM: &str = "srv";

/// Schema wrapping a self-describing event.
pub const UNSTRUCT_EVENT_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/unstruct_event/jsonschema/1-0-0";

/// Schema wrapping the context list.
pub const CONTEXTS_SCHEMA: &str = "iglu:com.snowplowanalytics.snowplow/contexts/jsonschema/1-0-1";

/// A self-describing event with its attached contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfDescribingEvent {
    /// The event itself.
    pub event: SelfDescribingJson,
    /// Contexts attached to the event.
    pub contexts: Vec<SelfDescribingJson>,
}

/// A page view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageViewEvent {
    /// Page URL.
    pub page_url: String,
    /// Page title.
    pub page_title: Option<String>,
    /// Referrer URL.
    pub referrer: Option<String>,
    /// Contexts attached to the event.
    pub contexts: Vec<SelfDescribingJson>,
}

/// Per-event fields describing who or what generated the event.
///
/// Empty by default: events from the provider are anonymous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    fields: BTreeMap<String, String>,
}

impl Subject {
    /// Create an anonymous subject.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user id (`uid`).
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.fields.insert("uid".to_string(), user_id.into());
        self
    }

    fn apply(&self, payload: &mut Payload) {
        for (key, value) in &self.fields {
            payload.add(key.clone(), value.clone());
        }
    }
}

/// Builds event payloads and hands them to an [`Emitter`].
#[derive(Debug)]
pub struct Tracker {
    emitter: Emitter,
    subject: Subject,
    namespace: String,
    app_id: String,
    platform: String,
    base64_encode: bool,
}

impl Tracker {
    /// Create a tracker with the default platform and base64 encoding on.
    pub fn new(emitter: Emitter) -> Self {
        Self {
            emitter,
            subject: Subject::default(),
            namespace: String::new(),
            app_id: String::new(),
            platform: DEFAULT_PLATFORM.to_string(),
            base64_encode: true,
        }
    }

    /// Set the subject attached to every event.
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Set the tracker namespace (`tna`).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the application id (`aid`).
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Set the platform (`p`).
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Choose between base64 (`ue_px`, `cx`) and plain (`ue_pr`, `co`) JSON fields.
    pub fn with_base64_encode(mut self, base64_encode: bool) -> Self {
        self.base64_encode = base64_encode;
        self
    }

    /// The emitter events are handed to.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Track a self-describing event. Returns the generated event id.
    pub fn track_self_describing_event(&self, event: SelfDescribingEvent) -> String {
        let mut payload = Payload::new();
        payload.add("e", "ue");
        let unstruct = SelfDescribingJson::new(UNSTRUCT_EVENT_SCHEMA, event.event.to_value());
        self.add_json(&mut payload, &unstruct.to_value(), "ue_px", "ue_pr");
        self.track(payload, &event.contexts)
    }

    /// Track a page view. Returns the generated event id.
    pub fn track_page_view(&self, event: PageViewEvent) -> String {
        let mut payload = Payload::new();
        payload.add("e", "pv");
        payload.add("url", event.page_url);
        payload.add("page", event.page_title.unwrap_or_default());
        payload.add("refr", event.referrer.unwrap_or_default());
        self.track(payload, &event.contexts)
    }

    fn track(&self, mut payload: Payload, contexts: &[SelfDescribingJson]) -> String {
        let event_id = Uuid::new_v4().to_string();
        payload.add("eid", event_id.clone());
        payload.add("dtm", chrono::Utc::now().timestamp_millis().to_string());
        payload.add("tv", TRACKER_VERSION);
        payload.add("p", self.platform.clone());
        payload.add("aid", self.app_id.clone());
        payload.add("tna", self.namespace.clone());
        self.subject.apply(&mut payload);

        if !contexts.is_empty() {
            let data: Vec<Value> = contexts.iter().map(SelfDescribingJson::to_value).collect();
            let wrapped = SelfDescribingJson::new(CONTEXTS_SCHEMA, data);
            self.add_json(&mut payload, &wrapped.to_value(), "cx", "co");
        }

        debug!(event_id = %event_id, event = payload.get("e").unwrap_or_default(), "Tracking event");
        self.emitter.add(payload);
        event_id
    }

    fn add_json(&self, payload: &mut Payload, value: &Value, encoded_key: &str, plain_key: &str) {
        let json = value.to_string();
        if self.base64_encode {
            payload.add(encoded_key, URL_SAFE.encode(json));
        } else {
            payload.add(plain_key, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn decode(field: &str) -> Value {
        let bytes = URL_SAFE.decode(field).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sent_payload(transport: &RecordingTransport) -> Payload {
        for _ in 0..100 {
            if let Some(request) = transport.requests().pop() {
                return request.payload;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no request was sent");
    }

    fn event() -> SelfDescribingEvent {
        SelfDescribingEvent {
            event: SelfDescribingJson::new(
                "iglu:com.acme/created/jsonschema/1-0-0",
                json!({"name": "bucket"}),
            ),
            contexts: vec![SelfDescribingJson::new(
                "iglu:com.acme/context_1/jsonschema/1-0-0",
                json!({"foo": "bar"}),
            )],
        }
    }

    #[tokio::test]
    async fn test_self_describing_event_base64() {
        let transport = Arc::new(RecordingTransport::new(200));
        let tracker = Tracker::new(Emitter::new("com.acme", transport.clone()))
            .with_namespace("ns")
            .with_app_id("app");

        let event_id = tracker.track_self_describing_event(event());
        let payload = sent_payload(&transport).await;

        assert_eq!(payload.get("e"), Some("ue"));
        assert_eq!(payload.get("eid"), Some(event_id.as_str()));
        assert_eq!(payload.get("p"), Some("srv"));
        assert_eq!(payload.get("tna"), Some("ns"));
        assert_eq!(payload.get("aid"), Some("app"));
        assert_eq!(payload.get("tv"), Some(TRACKER_VERSION));
        assert!(payload.get("dtm").is_some());
        assert!(payload.get("ue_pr").is_none());

        let ue = decode(payload.get("ue_px").unwrap());
        assert_eq!(ue["schema"], UNSTRUCT_EVENT_SCHEMA);
        assert_eq!(ue["data"]["schema"], "iglu:com.acme/created/jsonschema/1-0-0");
        assert_eq!(ue["data"]["data"]["name"], "bucket");

        let cx = decode(payload.get("cx").unwrap());
        assert_eq!(cx["schema"], CONTEXTS_SCHEMA);
        assert_eq!(cx["data"][0]["data"]["foo"], "bar");
    }

    #[tokio::test]
    async fn test_self_describing_event_plain_json() {
        let transport = Arc::new(RecordingTransport::new(200));
        let tracker =
            Tracker::new(Emitter::new("com.acme", transport.clone())).with_base64_encode(false);

        tracker.track_self_describing_event(SelfDescribingEvent {
            contexts: Vec::new(),
            ..event()
        });
        let payload = sent_payload(&transport).await;

        let ue: Value = serde_json::from_str(payload.get("ue_pr").unwrap()).unwrap();
        assert_eq!(ue["data"]["data"]["name"], "bucket");
        assert!(payload.get("ue_px").is_none());
        assert!(payload.get("co").is_none());
        assert!(payload.get("cx").is_none());
        // Empty namespace and app id are left out entirely.
        assert!(payload.get("tna").is_none());
        assert!(payload.get("aid").is_none());
    }

    #[tokio::test]
    async fn test_page_view() {
        let transport = Arc::new(RecordingTransport::new(200));
        let tracker = Tracker::new(Emitter::new("com.acme", transport.clone()))
            .with_platform("web")
            .with_subject(Subject::new().with_user_id("terraform"));

        tracker.track_page_view(PageViewEvent {
            page_url: "https://acme.com/deploy".to_string(),
            page_title: Some("Deploy".to_string()),
            ..Default::default()
        });
        let payload = sent_payload(&transport).await;

        assert_eq!(payload.get("e"), Some("pv"));
        assert_eq!(payload.get("url"), Some("https://acme.com/deploy"));
        assert_eq!(payload.get("page"), Some("Deploy"));
        assert_eq!(payload.get("refr"), None);
        assert_eq!(payload.get("p"), Some("web"));
        assert_eq!(payload.get("uid"), Some("terraform"));
    }
}
