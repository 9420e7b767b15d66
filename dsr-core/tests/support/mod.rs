#![allow(dead_code)]

use std::sync::Arc;

use dsr_core::{ComponentStage, DependencyService, DsComponent, RegistryEvent};
use parking_lot::Mutex;

pub fn init_logging() {
    dsr_common::logging::init_test_tracing();
}

pub fn stage_of(registry: &DependencyService, name: &str) -> ComponentStage {
    registry
        .component(name)
        .map(|c| c.stage().get())
        .unwrap_or_else(|| panic!("component '{name}' is not registered"))
}

pub fn stages(registry: &DependencyService) -> Vec<(String, ComponentStage)> {
    registry
        .components()
        .iter()
        .map(|c| (c.name().to_string(), c.stage().get()))
        .collect()
}

/// Records every stage value delivered to a component's stage listener.
pub fn record_stages(component: &DsComponent) -> Arc<Mutex<Vec<ComponentStage>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    component.stage().subscribe(move |stage| sink.lock().push(*stage));
    seen
}

pub fn record_events(registry: &DependencyService) -> Arc<Mutex<Vec<RegistryEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.subscribe_events(move |event| sink.lock().push(event.clone()));
    seen
}
