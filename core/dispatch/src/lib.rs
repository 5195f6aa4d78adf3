//! Plugin dispatch for cmsync.
//!
//! Every network call to a plugin service goes through this crate:
//! - Resolution of the plugin instance owning a handle per operation kind
//! - Schema operations (module references, module sources)
//! - Data operations, single-handle and batched per plugin instance
//! - Client-topic notifications for operations that could not be served
//! - A bounded executor for request paths that answer asynchronously
//!
//! Transport is a trait; [`HttpPluginTransport`] talks to real plugins with
//! per-kind timeouts and [`MemoryTransport`] serves tests and single-node setups.

pub mod config;
pub mod data;
pub mod events;
pub mod executor;
pub mod http;
pub mod memory;
pub mod model;
pub mod request;
pub mod resolver;
pub mod transport;

pub use config::DispatchConfig;
pub use data::{
    DataOperationDefinition, DataOperationRequest, DataOperations, ResourceAddress,
    PASSTHROUGH_OPERATIONAL,
};
pub use events::{
    DataOperationEvent, DataOperationEventPublisher, DataOperationResponse, MemoryEventPublisher,
    NcmpResponseStatus,
};
pub use executor::{BoundedExecutor, TaskOutcome};
pub use http::HttpPluginTransport;
pub use memory::MemoryTransport;
pub use model::ModelOperations;
pub use request::{RequestHandler, RequestOutcome};
pub use resolver::{resolve_plugin_instance, OperationKind};
pub use transport::{PluginRequest, PluginTransport};
