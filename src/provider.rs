//! The Snowplow provider: resources whose lifecycle emits tracking events.
//!
//! Two resource types are served:
//!
//! - `snowplow_track_self_describing_event` sends `create_event` when the
//!   resource is created, `update_event` on update and `delete_event` on
//!   delete.
//! - `snowplow_track_page_view` sends a page view when created. Any change
//!   replaces it, so every apply of a changed configuration sends a new one.
//!
//! Each operation builds its own tracker and waits for the collector's
//! answer before returning, so the host only records state for events the
//! collector accepted.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{
    init_tracker, ProviderConfig, TrackerOverrides, COLLECTOR_URI, EMITTER_PROTOCOL,
    EMITTER_REQUEST_TYPE, EMIT_TIMEOUT_SECONDS, TRACKER_APP_ID, TRACKER_ATTRIBUTES,
    TRACKER_NAMESPACE, TRACKER_PLATFORM,
};
use crate::delivery::{check_status, status_channel};
use crate::emitter::{HttpTransport, Transport};
use crate::error::ProviderError;
use crate::payload::{
    contexts_from_list, self_describing_json_from_map, SelfDescribingJson, IGLU_URI_KEY,
    PAYLOAD_KEY,
};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, ProviderSchema, Schema};
use crate::service::ProviderService;
use crate::tracker::{PageViewEvent, SelfDescribingEvent, Tracker};
use crate::types::{AttributeChange, PlanResult};
use crate::validation::{apply_defaults, validate};

/// Resource type for lifecycle self-describing events.
pub const SELF_DESCRIBING_EVENT: &str = "snowplow_track_self_describing_event";

/// Resource type for page views.
pub const PAGE_VIEW: &str = "snowplow_track_page_view";

const ID: &str = "id";
const CONTEXTS: &str = "contexts";
const PAGE_URL: &str = "page_url";
const PAGE_TITLE: &str = "page_title";
const REFERRER: &str = "referrer";

/// The lifecycle phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Resource creation.
    Create,
    /// In-place update.
    Update,
    /// Resource deletion.
    Delete,
}

impl Phase {
    /// The block holding this phase's event.
    pub fn block_name(&self) -> &'static str {
        match self {
            Self::Create => "create_event",
            Self::Update => "update_event",
            Self::Delete => "delete_event",
        }
    }
}

/// Build the self-describing event for `phase` from a resource state.
///
/// Returns `Ok(None)` when the phase has no event configured. Contexts
/// are decoded first, so a bad context fails the call even then.
pub fn event_for_phase(
    state: &Value,
    phase: Phase,
) -> Result<Option<SelfDescribingEvent>, ProviderError> {
    let contexts = contexts_from_state(state)?;
    let block = match state.get(phase.block_name()) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) if items.is_empty() => return Ok(None),
        Some(Value::Array(items)) if items.len() == 1 => &items[0],
        Some(other) => other,
    };
    let attr = block.as_object().ok_or_else(|| {
        ProviderError::Validation(format!("'{}' must be a single block", phase.block_name()))
    })?;

    Ok(Some(SelfDescribingEvent {
        event: self_describing_json_from_map(attr)?,
        contexts,
    }))
}

/// Build the page view described by a resource state.
pub fn page_view_from_state(state: &Value) -> Result<PageViewEvent, ProviderError> {
    let contexts = contexts_from_state(state)?;
    let page_url = string_attr(state, PAGE_URL)
        .ok_or_else(|| ProviderError::MissingField(PAGE_URL.to_string()))?;

    Ok(PageViewEvent {
        page_url,
        page_title: string_attr(state, PAGE_TITLE),
        referrer: string_attr(state, REFERRER),
        contexts,
    })
}

fn contexts_from_state(state: &Value) -> Result<Vec<SelfDescribingJson>, ProviderError> {
    match state.get(CONTEXTS) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => contexts_from_list(entries),
        Some(_) => Err(ProviderError::Validation(format!(
            "'{}' must be a list",
            CONTEXTS
        ))),
    }
}

fn string_attr(state: &Value, key: &str) -> Option<String> {
    state
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn with_id(state: Value, id: Value) -> Result<Value, ProviderError> {
    match state {
        Value::Object(mut map) => {
            map.insert(ID.to_string(), id);
            Ok(Value::Object(map))
        },
        other => Err(ProviderError::Validation(format!(
            "resource state must be an object, got {}",
            other
        ))),
    }
}

fn tracker_override_attributes(schema: Schema) -> Schema {
    TRACKER_ATTRIBUTES.iter().fold(schema, |schema, name| {
        schema.with_attribute(
            *name,
            Attribute::optional_string()
                .with_description(format!("Overrides the provider's {} for this resource", name))
                .with_default(json!("")),
        )
    })
}

fn event_block() -> Block {
    Block::new()
        .with_attribute(
            IGLU_URI_KEY,
            Attribute::required_string()
                .with_description("Iglu schema URI, e.g. iglu:com.acme/event/jsonschema/1-0-0"),
        )
        .with_attribute(
            PAYLOAD_KEY,
            Attribute::required_dynamic()
                .with_description("JSON-encoded string, or a map of string values"),
        )
}

fn provider_config_schema() -> Schema {
    Schema::new()
        .with_attribute(
            COLLECTOR_URI,
            Attribute::optional_string().with_description("URI of your Snowplow Collector"),
        )
        .with_attribute(
            TRACKER_APP_ID,
            Attribute::optional_string()
                .with_description("Optional application ID")
                .with_default(json!("")),
        )
        .with_attribute(
            TRACKER_NAMESPACE,
            Attribute::optional_string()
                .with_description("Optional namespace")
                .with_default(json!("")),
        )
        .with_attribute(
            TRACKER_PLATFORM,
            Attribute::optional_string()
                .with_description("Optional platform")
                .with_default(json!("srv")),
        )
        .with_attribute(
            EMITTER_REQUEST_TYPE,
            Attribute::optional_string()
                .with_description("Whether to use GET or POST requests to emit events")
                .with_default(json!("POST")),
        )
        .with_attribute(
            EMITTER_PROTOCOL,
            Attribute::optional_string()
                .with_description("Whether to use HTTP or HTTPS to send events")
                .with_default(json!("HTTPS")),
        )
        .with_attribute(
            EMIT_TIMEOUT_SECONDS,
            Attribute::optional_int64()
                .with_description("How long to wait for the collector to acknowledge an event")
                .with_default(json!(30)),
        )
}

fn self_describing_event_schema() -> Schema {
    tracker_override_attributes(Schema::new())
        .with_attribute(ID, Attribute::computed_string())
        .with_block(
            Phase::Create.block_name(),
            NestedBlock::single(event_block()).with_min_items(1),
        )
        .with_block(Phase::Update.block_name(), NestedBlock::single(event_block()))
        .with_block(Phase::Delete.block_name(), NestedBlock::single(event_block()))
        .with_block(CONTEXTS, NestedBlock::list(event_block()))
}

fn page_view_schema() -> Schema {
    let mut schema = tracker_override_attributes(Schema::new())
        .with_attribute(PAGE_URL, Attribute::required_string())
        .with_attribute(PAGE_TITLE, Attribute::optional_string())
        .with_attribute(REFERRER, Attribute::optional_string())
        .with_attribute(ID, Attribute::computed_string())
        .with_block(CONTEXTS, NestedBlock::list(event_block()).with_force_new());
    for (name, attr) in schema.block.attributes.iter_mut() {
        if name != ID {
            attr.force_new = true;
        }
    }
    schema
}

struct Configured {
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
}

/// Provider that tracks a Snowplow event for each resource lifecycle operation.
pub struct SnowplowProvider {
    state: RwLock<Option<Arc<Configured>>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for SnowplowProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnowplowProvider {
    /// Create a provider that sends events over HTTP.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            transport: None,
        }
    }

    /// Create a provider that sends events through `transport`.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            state: RwLock::new(None),
            transport: Some(transport),
        }
    }

    /// The active provider configuration, if `configure` succeeded.
    pub async fn config(&self) -> Option<ProviderConfig> {
        self.state.read().await.as_ref().map(|c| c.config.clone())
    }

    async fn configured(&self) -> Result<Arc<Configured>, ProviderError> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(ProviderError::NotConfigured)
    }

    fn resource_schema(&self, resource_type: &str) -> Result<Schema, ProviderError> {
        match resource_type {
            SELF_DESCRIBING_EVENT => Ok(self_describing_event_schema()),
            PAGE_VIEW => Ok(page_view_schema()),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    /// Send one event and wait for the collector's verdict.
    ///
    /// `track` must hand exactly one event to the tracker.
    async fn emit<F>(&self, state: &Value, track: F) -> Result<(), ProviderError>
    where
        F: FnOnce(&Tracker) -> String,
    {
        let configured = self.configured().await?;
        let overrides = TrackerOverrides::from_value(state)?;
        let (tx, rx) = status_channel();
        let tracker = init_tracker(
            &configured.config,
            &overrides,
            Arc::clone(&configured.transport),
            tx,
        )?;

        let event_id = track(&tracker);
        let status = rx.wait(configured.config.emit_timeout).await?;
        check_status(status)?;

        info!(event_id = %event_id, status, collector_url = %tracker.emitter().collector_url(), "Collector accepted event");
        Ok(())
    }

    async fn emit_phase(&self, state: &Value, phase: Phase) -> Result<bool, ProviderError> {
        match event_for_phase(state, phase)? {
            Some(event) => {
                debug!(phase = ?phase, schema = %event.event.schema, "Emitting lifecycle event");
                self.emit(state, |tracker| tracker.track_self_describing_event(event))
                    .await?;
                Ok(true)
            },
            None => {
                debug!(phase = ?phase, "No event configured for phase");
                Ok(false)
            },
        }
    }
}

#[async_trait]
impl ProviderService for SnowplowProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(provider_config_schema())
            .with_resource(SELF_DESCRIBING_EVENT, self_describing_event_schema())
            .with_resource(PAGE_VIEW, page_view_schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&provider_config_schema(), &config);
        if diagnostics.is_empty() {
            if let Err(e) = ProviderConfig::from_value(&config) {
                diagnostics.push(e.into());
            }
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = provider_config_schema();
        let config = apply_defaults(&schema, &config);
        let invalid: Vec<Diagnostic> = validate(&schema, &config)
            .into_iter()
            .filter(Diagnostic::is_error)
            .collect();
        if !invalid.is_empty() {
            warn!(errors = invalid.len(), "Rejected provider configuration");
            return Ok(invalid);
        }

        let config = match ProviderConfig::from_value(&config) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Rejected provider configuration");
                return Ok(vec![e.into()]);
            },
        };

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(config.emit_timeout)?),
        };

        let mut diagnostics = Vec::new();
        if config.collector_uri.is_empty() {
            diagnostics.push(
                Diagnostic::warning("No provider-level collector_uri")
                    .with_detail("Every resource must then set its own collector_uri")
                    .with_attribute(COLLECTOR_URI),
            );
        }

        info!(
            collector_uri = %config.collector_uri,
            request_type = %config.emitter_request_type,
            protocol = %config.emitter_protocol,
            "Provider configured"
        );
        *self.state.write().await = Some(Arc::new(Configured { config, transport }));
        Ok(diagnostics)
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let mut diagnostics = validate(&schema, &config);
        if !diagnostics.is_empty() {
            return Ok(diagnostics);
        }

        if let Err(e) = TrackerOverrides::from_value(&config) {
            diagnostics.push(e.into());
        }
        let decoded = match resource_type {
            SELF_DESCRIBING_EVENT => [Phase::Create, Phase::Update, Phase::Delete]
                .into_iter()
                .try_for_each(|phase| event_for_phase(&config, phase).map(|_| ())),
            _ => page_view_from_state(&config).map(|_| ()),
        };
        if let Err(e) = decoded {
            diagnostics.push(e.into());
        }
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let keys: BTreeSet<&String> = schema
            .block
            .attributes
            .keys()
            .chain(schema.block.blocks.keys())
            .filter(|k| k.as_str() != ID)
            .collect();
        let value_of = |state: &Value, key: &str| state.get(key).cloned().unwrap_or(Value::Null);

        let Some(prior) = prior_state else {
            let changes = keys
                .iter()
                .filter_map(|key| {
                    let value = value_of(&proposed_state, key);
                    (!value.is_null()).then(|| AttributeChange::added(key.as_str(), value))
                })
                .collect();
            let planned = with_id(proposed_state, Value::Null)?;
            return Ok(PlanResult::with_changes(planned, changes, false));
        };

        if proposed_state.is_null() {
            let removed = keys
                .iter()
                .filter_map(|key| {
                    let before = value_of(&prior, key);
                    (!before.is_null()).then(|| AttributeChange::new(key.as_str(), Some(before), None))
                })
                .collect();
            return Ok(PlanResult::with_changes(Value::Null, removed, false));
        }
        let changes: Vec<AttributeChange> = keys
            .iter()
            .filter_map(|key| {
                let before = value_of(&prior, key);
                let after = value_of(&proposed_state, key);
                (before != after).then(|| AttributeChange::modified(key.as_str(), before, after))
            })
            .collect();

        if changes.is_empty() {
            return Ok(PlanResult::no_change(prior));
        }

        let requires_replace = changes.iter().any(|c| schema.forces_new(&c.path));
        let id = if requires_replace {
            Value::Null
        } else {
            value_of(&prior, ID)
        };
        let planned = with_id(proposed_state, id)?;
        Ok(PlanResult::with_changes(planned, changes, requires_replace))
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        match resource_type {
            SELF_DESCRIBING_EVENT => {
                if !self.emit_phase(&planned_state, Phase::Create).await? {
                    return Err(ProviderError::MissingField(
                        Phase::Create.block_name().to_string(),
                    ));
                }
            },
            PAGE_VIEW => {
                let page_view = page_view_from_state(&planned_state)?;
                self.emit(&planned_state, |tracker| tracker.track_page_view(page_view))
                    .await?;
            },
            other => return Err(ProviderError::UnknownResource(other.to_string())),
        }

        let id = Uuid::new_v4().to_string();
        info!(resource_type, id = %id, "Resource created");
        with_id(planned_state, Value::String(id))
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        // The collector keeps no record we could query, so state never drifts.
        self.resource_schema(resource_type)?;
        Ok(current_state)
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        match resource_type {
            SELF_DESCRIBING_EVENT => {
                self.emit_phase(&planned_state, Phase::Update).await?;
            },
            PAGE_VIEW => {
                debug!("Page views are replaced, not updated; nothing to send");
            },
            other => return Err(ProviderError::UnknownResource(other.to_string())),
        }

        let id = prior_state.get(ID).cloned().unwrap_or(Value::Null);
        info!(resource_type, id = %id, "Resource updated");
        with_id(planned_state, id)
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        match resource_type {
            SELF_DESCRIBING_EVENT => {
                self.emit_phase(&current_state, Phase::Delete).await?;
            },
            PAGE_VIEW => {},
            other => return Err(ProviderError::UnknownResource(other.to_string())),
        }

        let id = current_state.get(ID).cloned().unwrap_or(Value::Null);
        info!(resource_type, id = %id, "Resource deleted");
        Ok(())
    }
}
