//! Segmented object and paginated collection retrieval over a
//! name-addressed request/response transport.

pub mod core;
pub mod plugins;
pub mod telemetry;

pub use crate::core::engine::{Engine, EngineConfig};
pub use crate::core::error::{FetchError, FetchResult, TransportError};
pub use crate::core::naming::{NameComponent, ResourceName};
pub use crate::plugins::registry::{PluginRegistry, Transport, TransportContext};
