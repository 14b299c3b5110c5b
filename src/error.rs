//! Error types for the Snowplow provider.

use std::time::Duration;

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while configuring the provider or tracking an event.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider or resource configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lifecycle operation ran before `configure`.
    #[error("Provider has not been configured")]
    NotConfigured,

    /// A required attribute or key is missing.
    #[error("Missing required attribute '{0}'")]
    MissingField(String),

    /// A context entry is missing its `iglu_uri` or `payload` key.
    #[error("Invalid context attributes: '{0}' key missing")]
    InvalidContext(String),

    /// A payload string is not well-formed JSON.
    #[error("Invalid JSON payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// A payload is well-formed but has the wrong shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The collector answered outside the 2xx/3xx class, or never answered.
    #[error("Got {status} status code when sending event - need 2xx or 3xx")]
    Delivery {
        /// Status reported by the emitter callback.
        status: i32,
    },

    /// The emitter callback did not fire within the configured wait.
    #[error("Timed out after {0:?} waiting for the collector to acknowledge the event")]
    Timeout(Duration),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),
}

impl ProviderError {
    /// Get the error message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Configuration(msg)
            | Self::InvalidPayload(msg)
            | Self::Validation(msg)
            | Self::UnknownResource(msg) => msg.clone(),
            Self::MissingField(field) => format!("'{}' is required", field),
            Self::InvalidContext(field) => format!("'{}' key missing", field),
            Self::Parse(err) => err.to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the failure happened after the event was handed to the emitter.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Delivery { .. } | Self::Timeout(_))
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        let diagnostic = Diagnostic::error(err.to_string());
        match &err {
            ProviderError::MissingField(field) => diagnostic.with_attribute(field.clone()),
            ProviderError::InvalidContext(_) => diagnostic.with_attribute("contexts"),
            ProviderError::Delivery { .. } | ProviderError::Timeout(_) => diagnostic
                .with_detail("The event was handed to the emitter but not acknowledged by the collector"),
            _ => diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::InvalidContext("iglu_uri".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid context attributes: 'iglu_uri' key missing"
        );

        let err = ProviderError::MissingField("page_url".to_string());
        assert_eq!(format!("{}", err), "Missing required attribute 'page_url'");

        let err = ProviderError::Delivery { status: 404 };
        assert_eq!(
            format!("{}", err),
            "Got 404 status code when sending event - need 2xx or 3xx"
        );

        let err = ProviderError::UnknownResource("snowplow_track_thing".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: snowplow_track_thing");
    }

    #[test]
    fn test_parse_error_from_serde() {
        let err: ProviderError = serde_json::from_str::<serde_json::Value>("{\"hello\"}")
            .unwrap_err()
            .into();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert!(err.to_string().starts_with("Invalid JSON payload"));
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Configuration("collector missing".to_string());
        assert_eq!(err.message(), "collector missing");

        let err = ProviderError::MissingField("create_event".to_string());
        assert_eq!(err.message(), "'create_event' is required");

        let err = ProviderError::InvalidContext("payload".to_string());
        assert_eq!(err.message(), "'payload' key missing");

        let err = ProviderError::NotConfigured;
        assert_eq!(err.message(), "Provider has not been configured");
    }

    #[test]
    fn test_delivery_failure_classification() {
        assert!(ProviderError::Delivery { status: 0 }.is_delivery_failure());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_delivery_failure());
        assert!(!ProviderError::MissingField("payload".into()).is_delivery_failure());
    }

    #[test]
    fn test_error_to_diagnostic() {
        let diag: Diagnostic = ProviderError::MissingField("iglu_uri".to_string()).into();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.attribute, Some("iglu_uri".to_string()));

        let diag: Diagnostic = ProviderError::InvalidContext("payload".to_string()).into();
        assert_eq!(diag.attribute, Some("contexts".to_string()));

        let diag: Diagnostic = ProviderError::Delivery { status: 500 }.into();
        assert!(diag.summary.contains("500"));
        assert!(diag.detail.is_some());
    }
}
