// dsr-common/src/lib.rs
pub mod config;
pub mod dependency;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;

// Re-export key types
pub use config::RegistryConfig;
pub use dependency::{DependencyFlags, DependencySpec};
pub use error::{DsError, Result};
pub use events::RegistryEvent;
pub use model::{ComponentStage, InitPhase, Service, ServiceId, ServiceInfo};
