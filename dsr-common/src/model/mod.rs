// src/model/mod.rs
pub mod service;
pub mod stage;

// Re-export
pub use service::{Service, ServiceId, ServiceInfo};
pub use stage::{ComponentStage, InitPhase};
