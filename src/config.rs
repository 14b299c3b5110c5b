//! Provider configuration and tracker construction.
//!
//! Every tracker setting can be given at the provider level and
//! overridden per resource. A non-empty resource value wins; otherwise the
//! provider value is used.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::delivery::{StatusSender, NO_STATUS};
use crate::emitter::{CallbackResult, Emitter, EmitterCallback, Protocol, RequestType, Transport};
use crate::error::ProviderError;
use crate::tracker::{Subject, Tracker, DEFAULT_PLATFORM};

/// Collector URI attribute.
pub const COLLECTOR_URI: &str = "collector_uri";
/// Application id attribute.
pub const TRACKER_APP_ID: &str = "tracker_app_id";
/// Tracker namespace attribute.
pub const TRACKER_NAMESPACE: &str = "tracker_namespace";
/// Platform attribute.
pub const TRACKER_PLATFORM: &str = "tracker_platform";
/// Request type attribute (`GET` or `POST`).
pub const EMITTER_REQUEST_TYPE: &str = "emitter_request_type";
/// Protocol attribute (`HTTP` or `HTTPS`).
pub const EMITTER_PROTOCOL: &str = "emitter_protocol";
/// Provider-level bound on how long an operation waits for the collector.
pub const EMIT_TIMEOUT_SECONDS: &str = "emit_timeout_seconds";

/// Attributes accepted both at provider and resource level.
pub const TRACKER_ATTRIBUTES: [&str; 6] = [
    COLLECTOR_URI,
    TRACKER_APP_ID,
    TRACKER_NAMESPACE,
    TRACKER_PLATFORM,
    EMITTER_REQUEST_TYPE,
    EMITTER_PROTOCOL,
];

/// Default wait for a collector acknowledgment.
pub const DEFAULT_EMIT_TIMEOUT: Duration = Duration::from_secs(30);

const EMPTY_COLLECTOR_URI: &str = "URI of the Snowplow Collector is empty - this can be set either at the provider or resource level with the 'collector_uri' input";

/// Provider-level configuration, fixed at `configure` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Collector host (and optional port), without scheme.
    pub collector_uri: String,
    /// Application id.
    pub tracker_app_id: String,
    /// Tracker namespace.
    pub tracker_namespace: String,
    /// Platform code.
    pub tracker_platform: String,
    /// HTTP method.
    pub emitter_request_type: RequestType,
    /// URL scheme.
    pub emitter_protocol: Protocol,
    /// How long an operation waits for the collector to answer.
    pub emit_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            collector_uri: String::new(),
            tracker_app_id: String::new(),
            tracker_namespace: String::new(),
            tracker_platform: DEFAULT_PLATFORM.to_string(),
            emitter_request_type: RequestType::Post,
            emitter_protocol: Protocol::Https,
            emit_timeout: DEFAULT_EMIT_TIMEOUT,
        }
    }
}

impl ProviderConfig {
    /// Read the provider configuration object.
    ///
    /// Absent, null and empty values take their defaults.
    pub fn from_value(config: &Value) -> Result<Self, ProviderError> {
        let defaults = Self::default();
        let emit_timeout = match config.get(EMIT_TIMEOUT_SECONDS) {
            None | Some(Value::Null) => defaults.emit_timeout,
            Some(v) => match v.as_u64() {
                Some(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ProviderError::Validation(format!(
                        "{} must be a positive integer",
                        EMIT_TIMEOUT_SECONDS
                    )))
                },
            },
        };

        Ok(Self {
            collector_uri: non_empty(config, COLLECTOR_URI).unwrap_or_default(),
            tracker_app_id: non_empty(config, TRACKER_APP_ID).unwrap_or_default(),
            tracker_namespace: non_empty(config, TRACKER_NAMESPACE).unwrap_or_default(),
            tracker_platform: non_empty(config, TRACKER_PLATFORM)
                .unwrap_or(defaults.tracker_platform),
            emitter_request_type: non_empty(config, EMITTER_REQUEST_TYPE)
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(defaults.emitter_request_type),
            emitter_protocol: non_empty(config, EMITTER_PROTOCOL)
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(defaults.emitter_protocol),
            emit_timeout,
        })
    }

    /// Resolve resource-level overrides against this configuration.
    pub fn resolve(&self, overrides: &TrackerOverrides) -> Result<TrackerSettings, ProviderError> {
        let pick = |over: &Option<String>, base: &str| {
            over.as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(base)
                .to_string()
        };

        let collector_uri = pick(&overrides.collector_uri, &self.collector_uri);
        if collector_uri.is_empty() {
            return Err(ProviderError::Configuration(EMPTY_COLLECTOR_URI.to_string()));
        }

        Ok(TrackerSettings {
            collector_uri,
            app_id: pick(&overrides.tracker_app_id, &self.tracker_app_id),
            namespace: pick(&overrides.tracker_namespace, &self.tracker_namespace),
            platform: pick(&overrides.tracker_platform, &self.tracker_platform),
            request_type: overrides
                .emitter_request_type
                .unwrap_or(self.emitter_request_type),
            protocol: overrides.emitter_protocol.unwrap_or(self.emitter_protocol),
        })
    }
}

/// Tracker settings given on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerOverrides {
    /// Collector host override.
    pub collector_uri: Option<String>,
    /// Application id override.
    pub tracker_app_id: Option<String>,
    /// Namespace override.
    pub tracker_namespace: Option<String>,
    /// Platform override.
    pub tracker_platform: Option<String>,
    /// Request type override.
    pub emitter_request_type: Option<RequestType>,
    /// Protocol override.
    pub emitter_protocol: Option<Protocol>,
}

impl TrackerOverrides {
    /// Read overrides from a resource state or configuration object.
    pub fn from_value(state: &Value) -> Result<Self, ProviderError> {
        Ok(Self {
            collector_uri: non_empty(state, COLLECTOR_URI),
            tracker_app_id: non_empty(state, TRACKER_APP_ID),
            tracker_namespace: non_empty(state, TRACKER_NAMESPACE),
            tracker_platform: non_empty(state, TRACKER_PLATFORM),
            emitter_request_type: non_empty(state, EMITTER_REQUEST_TYPE)
                .map(|s| s.parse())
                .transpose()?,
            emitter_protocol: non_empty(state, EMITTER_PROTOCOL)
                .map(|s| s.parse())
                .transpose()?,
        })
    }
}

/// Fully resolved tracker settings for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Collector host, never empty.
    pub collector_uri: String,
    /// Application id.
    pub app_id: String,
    /// Tracker namespace.
    pub namespace: String,
    /// Platform code.
    pub platform: String,
    /// HTTP method.
    pub request_type: RequestType,
    /// URL scheme.
    pub protocol: Protocol,
}

/// Build a tracker for one operation.
///
/// The emitter callback writes the status picked by
/// [`status_from_results`] into `status`.
pub fn init_tracker(
    config: &ProviderConfig,
    overrides: &TrackerOverrides,
    transport: Arc<dyn Transport>,
    status: StatusSender,
) -> Result<Tracker, ProviderError> {
    let settings = config.resolve(overrides)?;

    let callback: EmitterCallback =
        Arc::new(move |successes: &[CallbackResult], failures: &[CallbackResult]| {
            status.send(status_from_results(successes, failures));
        });

    let emitter = Emitter::new(settings.collector_uri.clone(), transport)
        .with_request_type(settings.request_type)
        .with_protocol(settings.protocol)
        .with_callback(callback);

    debug!(
        collector_url = %emitter.collector_url(),
        namespace = %settings.namespace,
        app_id = %settings.app_id,
        platform = %settings.platform,
        "Initialized tracker"
    );

    Ok(Tracker::new(emitter)
        .with_subject(Subject::new())
        .with_namespace(settings.namespace)
        .with_app_id(settings.app_id)
        .with_platform(settings.platform)
        .with_base64_encode(true))
}

/// Pick the status of a single-event delivery from the callback lists.
///
/// A lone success wins, then a lone failure. Anything else is ambiguous
/// and yields [`NO_STATUS`].
pub fn status_from_results(successes: &[CallbackResult], failures: &[CallbackResult]) -> i32 {
    match (successes, failures) {
        ([only], _) => only.status,
        (_, [only]) => only.status,
        _ => NO_STATUS,
    }
}

fn non_empty(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::status_channel;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    fn acme_config() -> ProviderConfig {
        ProviderConfig::from_value(&json!({
            "collector_uri": "com.acme",
            "tracker_app_id": "",
            "tracker_namespace": "",
            "tracker_platform": "srv",
            "emitter_request_type": "GET",
            "emitter_protocol": "HTTP"
        }))
        .unwrap()
    }

    fn tracker_for(config: &ProviderConfig, overrides: &TrackerOverrides) -> Result<Tracker, ProviderError> {
        let (tx, _rx) = status_channel();
        init_tracker(config, overrides, Arc::new(RecordingTransport::new(200)), tx)
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_value(&json!({})).unwrap();
        assert_eq!(config.collector_uri, "");
        assert_eq!(config.tracker_platform, "srv");
        assert_eq!(config.emitter_request_type, RequestType::Post);
        assert_eq!(config.emitter_protocol, Protocol::Https);
        assert_eq!(config.emit_timeout, DEFAULT_EMIT_TIMEOUT);

        let config = ProviderConfig::from_value(&json!({"tracker_platform": null, "emit_timeout_seconds": 5})).unwrap();
        assert_eq!(config.tracker_platform, "srv");
        assert_eq!(config.emit_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_provider_values() {
        assert!(ProviderConfig::from_value(&json!({"emitter_request_type": "PUT"})).is_err());
        assert!(ProviderConfig::from_value(&json!({"emitter_protocol": "gopher"})).is_err());
        assert!(ProviderConfig::from_value(&json!({"emit_timeout_seconds": 0})).is_err());
        assert!(ProviderConfig::from_value(&json!({"emit_timeout_seconds": -3})).is_err());
    }

    #[test]
    fn test_init_tracker_falls_back_to_provider_uri() {
        let overrides = TrackerOverrides::from_value(&json!({"collector_uri": ""})).unwrap();
        let tracker = tracker_for(&acme_config(), &overrides).unwrap();
        assert_eq!(tracker.emitter().collector_url(), "http://com.acme/i");
    }

    #[test]
    fn test_init_tracker_resource_override() {
        let overrides =
            TrackerOverrides::from_value(&json!({"collector_uri": "com.acme.override"})).unwrap();
        let tracker = tracker_for(&acme_config(), &overrides).unwrap();
        assert_eq!(tracker.emitter().collector_url(), "http://com.acme.override/i");
    }

    #[test]
    fn test_init_tracker_empty_uri_everywhere() {
        let err = tracker_for(&ProviderConfig::default(), &TrackerOverrides::default()).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert_eq!(
            err.message(),
            "URI of the Snowplow Collector is empty - this can be set either at the provider or resource level with the 'collector_uri' input"
        );
    }

    #[test]
    fn test_resolve_every_field() {
        let overrides = TrackerOverrides::from_value(&json!({
            "tracker_app_id": "app-override",
            "tracker_namespace": "",
            "tracker_platform": "web",
            "emitter_request_type": "post",
            "emitter_protocol": "https"
        }))
        .unwrap();
        let settings = acme_config().resolve(&overrides).unwrap();

        assert_eq!(settings.collector_uri, "com.acme");
        assert_eq!(settings.app_id, "app-override");
        assert_eq!(settings.namespace, "");
        assert_eq!(settings.platform, "web");
        assert_eq!(settings.request_type, RequestType::Post);
        assert_eq!(settings.protocol, Protocol::Https);
    }

    #[test]
    fn test_invalid_override() {
        assert!(TrackerOverrides::from_value(&json!({"emitter_protocol": "SMTP"})).is_err());
    }

    fn result(status: i32) -> CallbackResult {
        CallbackResult { count: 1, status }
    }

    #[test]
    fn test_status_from_results() {
        assert_eq!(status_from_results(&[result(200)], &[]), 200);
        assert_eq!(status_from_results(&[], &[result(503)]), 503);
        assert_eq!(status_from_results(&[result(200)], &[result(500)]), 200);
        assert_eq!(status_from_results(&[], &[]), 0);
        assert_eq!(status_from_results(&[result(200), result(201)], &[]), 0);
        assert_eq!(status_from_results(&[result(200), result(201)], &[result(404)]), 404);
        assert_eq!(status_from_results(&[], &[result(500), result(502)]), 0);
    }

    #[tokio::test]
    async fn test_callback_reports_status() {
        let (tx, rx) = status_channel();
        let tracker = init_tracker(
            &acme_config(),
            &TrackerOverrides::default(),
            Arc::new(RecordingTransport::new(404)),
            tx,
        )
        .unwrap();

        tracker.track_page_view(crate::tracker::PageViewEvent {
            page_url: "https://acme.com".to_string(),
            ..Default::default()
        });

        assert_eq!(rx.wait(Duration::from_secs(1)).await.unwrap(), 404);
    }
}
