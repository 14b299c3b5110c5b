//! Testing utilities for providers and collector delivery.
//!
//! [`ProviderTester`] drives a `ProviderService` implementation through the
//! same call sequence a host would use. [`RecordingTransport`] stands in for
//! the collector: it records every request and answers with a fixed status.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use snowplow_provider::provider::{SnowplowProvider, PAGE_VIEW};
//! use snowplow_provider::testing::{ProviderTester, RecordingTransport};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(RecordingTransport::new(200));
//! let tester = ProviderTester::new(SnowplowProvider::with_transport(transport.clone()));
//!
//! tester.configure(json!({"collector_uri": "com.acme"})).await.unwrap();
//! let state = tester
//!     .lifecycle_create(PAGE_VIEW, json!({"page_url": "https://acme.com"}))
//!     .await
//!     .unwrap();
//!
//! assert!(state["id"].is_string());
//! assert_eq!(transport.requests().len(), 1);
//! # });
//! ```

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::emitter::{CollectorRequest, Transport};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::PlanResult;

/// A [`Transport`] that records requests instead of sending them.
#[derive(Debug)]
pub struct RecordingTransport {
    status: AtomicI32,
    hang: bool,
    requests: Mutex<Vec<CollectorRequest>>,
}

impl RecordingTransport {
    /// Answer every request with `status`.
    pub fn new(status: i32) -> Self {
        Self {
            status: AtomicI32::new(status),
            hang: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Record requests but never answer them.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(0)
        }
    }

    /// Change the status returned for subsequent requests.
    pub fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CollectorRequest> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CollectorRequest>> {
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: CollectorRequest) -> i32 {
        self.lock().push(request);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.status.load(Ordering::SeqCst)
    }
}

/// A test harness for provider implementations.
///
/// Wraps a `ProviderService` and exposes the host's calls as plain async
/// methods, plus helpers that chain them into full lifecycles.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Warnings are ignored; error diagnostics are returned as `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run plan → create → read and return the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run plan → update → read and return the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Run create → update → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;
        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan creates a new resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan updates in place.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute.
///
/// # Panics
///
/// Panics if the plan does not change the attribute.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{Payload, RequestType};
    use crate::provider::{SnowplowProvider, PAGE_VIEW, SELF_DESCRIBING_EVENT};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn request() -> CollectorRequest {
        let mut payload = Payload::new();
        payload.add("e", "pv");
        CollectorRequest {
            url: "https://com.acme/i".to_string(),
            method: RequestType::Get,
            payload,
        }
    }

    fn tester() -> ProviderTester<SnowplowProvider> {
        ProviderTester::new(SnowplowProvider::with_transport(Arc::new(
            RecordingTransport::new(200),
        )))
    }

    #[tokio::test]
    async fn test_recording_transport() {
        let transport = RecordingTransport::new(204);
        assert_eq!(transport.send(request()).await, 204);

        transport.set_status(500);
        assert_eq!(transport.send(request()).await, 500);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].payload.get("e"), Some("pv"));
    }

    #[tokio::test]
    async fn test_hanging_transport_records_but_never_answers() {
        let transport = RecordingTransport::hanging();
        let answered = tokio::time::timeout(Duration::from_millis(50), transport.send(request())).await;
        assert!(answered.is_err());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tester_configure_rejects_bad_config() {
        let err = tester()
            .configure(json!({"emitter_request_type": "PATCH"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(ref d) if d.len() == 1));
    }

    #[tokio::test]
    async fn test_tester_resource_types() {
        let types = tester().resource_types();
        assert!(types.contains(&SELF_DESCRIBING_EVENT.to_string()));
        assert!(types.contains(&PAGE_VIEW.to_string()));
    }

    #[tokio::test]
    async fn test_tester_plan_create() {
        let plan = tester()
            .plan_create(PAGE_VIEW, json!({"page_url": "https://acme.com"}))
            .await
            .unwrap();

        assert_plan_creates(&plan);
        assert_plan_changes_attribute(&plan, "page_url");
        assert!(plan.planned_state["id"].is_null());
    }

    #[tokio::test]
    async fn test_tester_plan_update() {
        let tester = tester();
        let prior = json!({
            "id": "123",
            "create_event": {"iglu_uri": "iglu:com.acme/created/jsonschema/1-0-0", "payload": "{}"}
        });

        let plan = tester
            .plan_update(SELF_DESCRIBING_EVENT, prior.clone(), prior.clone())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let mut proposed = prior.clone();
        proposed["tracker_namespace"] = json!("infra");
        let plan = tester
            .plan_update(SELF_DESCRIBING_EVENT, prior, proposed)
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "tracker_namespace");
        assert_eq!(plan.planned_state["id"], "123");
    }

    #[tokio::test]
    async fn test_tester_plan_delete() {
        let plan = tester()
            .plan_delete(PAGE_VIEW, json!({"id": "123", "page_url": "https://acme.com"}))
            .await
            .unwrap();
        assert!(plan.planned_state.is_null());
        assert_eq!(plan.changes.len(), 1);
        assert!(plan.changes[0].after.is_none());
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("No provider-level collector_uri")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("Got 500 status code")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid JSON payload: expected value")];
        assert_error_contains(&diagnostics, "Invalid");
        assert_error_contains(&diagnostics, "payload");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Missing required attribute 'page_url'").with_attribute("page_url"),
            Diagnostic::error("Validation error").with_detail("bad protocol"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("Missing required attribute"));
        assert!(display.contains("Validation error"));
        assert!(display.contains("(at page_url)"));
        assert!(display.contains("bad protocol"));
    }
}
