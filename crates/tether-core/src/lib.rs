pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod models;
pub mod query;
pub mod relay;
pub mod relay_url;
pub mod runtime;
pub mod stats;
pub mod store;
pub mod tracing_setup;
pub mod transport;

// Re-export the main entry points at crate root
pub use config::{CascadePolicy, EngineConfig};
pub use engine::{Engine, EventTemplate, PageParams, StoreNotification};
pub use error::{Error, Result};
pub use runtime::EngineRuntime;
pub use stats::EngineStats;
pub use transport::{NostrSdkTransport, RelayTransport, TransportMessage};
