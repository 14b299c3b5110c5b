//! Snowplow Provider
//!
//! An infrastructure-as-code provider whose resources send
//! [Snowplow](https://snowplow.io) events when they are created, updated
//! or deleted. Pipelines use it to record deployments and other
//! infrastructure changes in the same warehouse as their product events.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Resources**: `snowplow_track_self_describing_event` and
//!   `snowplow_track_page_view`, served by [`SnowplowProvider`]
//! - **ProviderService trait**: The host-facing interface a plugin host drives
//! - **Tracker and emitter**: Tracker-protocol payload building and HTTP
//!   delivery to a collector over GET or POST
//! - **Schema types**: Types for describing provider and resource schemas
//! - **Error types**: [`ProviderError`], convertible into host diagnostics
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```no_run
//! use snowplow_provider::{init_logging, ProviderService, SnowplowProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = SnowplowProvider::new();
//!     provider
//!         .configure(json!({
//!             "collector_uri": "collector.acme.com",
//!             "emitter_request_type": "POST",
//!         }))
//!         .await?;
//!
//!     let state = provider
//!         .create(
//!             "snowplow_track_self_describing_event",
//!             json!({
//!                 "create_event": {
//!                     "iglu_uri": "iglu:com.acme/deploy/jsonschema/1-0-0",
//!                     "payload": "{\"service\":\"checkout\"}"
//!                 }
//!             }),
//!         )
//!         .await?;
//!     println!("tracked as {}", state["id"]);
//!     Ok(())
//! }
//! ```
//!
//! # Delivery
//!
//! Every lifecycle operation sends exactly one event (or none, when the
//! phase has no event configured) and waits for the collector before it
//! returns. A 2xx or 3xx answer succeeds; anything else, including no
//! answer within `emit_timeout_seconds`, fails the operation so the host
//! does not record state for an event that was never accepted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod delivery;
pub mod emitter;
pub mod error;
pub mod logging;
pub mod payload;
pub mod provider;
pub mod schema;
pub mod service;
pub mod testing;
pub mod tracker;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use config::{ProviderConfig, TrackerOverrides};
pub use emitter::{Emitter, HttpTransport, Protocol, RequestType, Transport};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use payload::SelfDescribingJson;
pub use provider::{SnowplowProvider, PAGE_VIEW, SELF_DESCRIBING_EVENT};
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use tracker::{PageViewEvent, SelfDescribingEvent, Tracker};
pub use types::{AttributeChange, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
