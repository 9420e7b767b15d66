// dsr-core/src/lib.rs

// Declare the top-level modules within the library crate
pub mod component;
pub mod dependency;
pub mod observable;
pub mod registry;
mod resolver;
pub mod scheduler;

// Re-export key types so hosts only need this crate
pub use component::{ComponentController, ComponentId, DsComponent};
pub use dependency::DependencyInfo;
pub use dsr_common::{
    ComponentStage, DependencyFlags, DependencySpec, DsError, InitPhase, RegistryConfig,
    RegistryEvent, Result, Service, ServiceId, ServiceInfo,
};
pub use observable::{Observable, Subscription};
pub use registry::{ComponentBuilder, DependencyService};
