// dsr-core/src/component.rs
//! Component records as seen from outside the engine.
//!
//! A component is split in two: the engine keeps the structural record
//! (edges, supplier, disposer) and a shared [`ComponentCell`] holds what
//! handles may read without entering the registry lock. [`DsComponent`] is the
//! read-only view over a cell; [`ComponentController`] adds the mutators and
//! the typed value accessor.
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use dsr_common::error::{DsError, Result};
use dsr_common::model::{ComponentStage, Service, ServiceId, ServiceInfo};
use parking_lot::RwLock;

use crate::dependency::DependencyInfo;
use crate::observable::Observable;
use crate::registry::Shared;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u64);

impl ComponentId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Published state of one dependency edge.
pub(crate) struct Binding {
    pub(crate) service: ServiceInfo,
    pub(crate) minimum: usize,
    pub(crate) dynamic: bool,
    pub(crate) providers: Vec<Weak<ComponentCell>>,
}

pub(crate) struct ComponentCell {
    pub(crate) id: ComponentId,
    pub(crate) name: String,
    pub(crate) stage: Observable<ComponentStage>,
    pub(crate) available: Observable<bool>,
    pub(crate) value: RwLock<Option<AnyValue>>,
    /// Projected service values; each entry is an `Arc<S>` boxed as `Any`.
    pub(crate) exports: RwLock<HashMap<ServiceId, AnyValue>>,
    pub(crate) bindings: RwLock<BTreeMap<ServiceId, Binding>>,
    pub(crate) provided: Vec<ServiceInfo>,
}

impl ComponentCell {
    pub(crate) fn new(
        id: ComponentId,
        name: String,
        provided: Vec<ServiceInfo>,
        bindings: BTreeMap<ServiceId, Binding>,
        available: bool,
    ) -> Self {
        Self {
            id,
            name,
            stage: Observable::new(ComponentStage::Defined),
            available: Observable::new(available),
            value: RwLock::new(None),
            exports: RwLock::new(HashMap::new()),
            bindings: RwLock::new(bindings),
            provided,
        }
    }

    fn export<S: ?Sized + Send + Sync + 'static>(&self, service: ServiceId) -> Option<Arc<S>> {
        self.exports
            .read()
            .get(&service)
            .and_then(|v| v.downcast_ref::<Arc<S>>())
            .cloned()
    }
}

/// Read-only capability view of a registered component.
#[derive(Clone)]
pub struct DsComponent {
    pub(crate) cell: Arc<ComponentCell>,
}

impl DsComponent {
    pub(crate) fn new(cell: Arc<ComponentCell>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> ComponentId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    pub fn stage(&self) -> Observable<ComponentStage> {
        self.cell.stage.clone()
    }

    pub fn is_available(&self) -> Observable<bool> {
        self.cell.available.clone()
    }

    /// The constructed value, present only while the component is
    /// pre-satisfied or satisfied.
    pub fn value(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.cell.value.read().clone()
    }

    pub fn value_as<C: Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.value().and_then(|v| v.downcast::<C>().ok())
    }

    /// Values of `service` projected by the providers currently bound to this
    /// component's dependency on it. The returned `Arc`s must not be kept past
    /// the providing component's deactivation.
    pub fn dependencies<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: &Service<S>,
    ) -> Result<Vec<Arc<S>>> {
        let bindings = self.cell.bindings.read();
        let binding = bindings
            .get(&service.id())
            .ok_or_else(|| DsError::UnknownDependency {
                component: self.cell.name.clone(),
                service: service.name().to_string(),
            })?;
        Ok(binding
            .providers
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|p| p.export::<S>(service.id()))
            .collect())
    }

    /// First bound provider of `service`, if any.
    pub fn dependency<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: &Service<S>,
    ) -> Result<Option<Arc<S>>> {
        Ok(self.dependencies(service)?.into_iter().next())
    }

    pub fn dependency_info(&self) -> Vec<DependencyInfo> {
        self.cell
            .bindings
            .read()
            .values()
            .map(|b| DependencyInfo {
                service: b.service.clone(),
                minimum: b.minimum,
                dynamic: b.dynamic,
                providers: b
                    .providers
                    .iter()
                    .filter_map(Weak::upgrade)
                    .map(|p| p.name.clone())
                    .collect(),
            })
            .collect()
    }

    pub fn provided_services(&self) -> Vec<ServiceInfo> {
        self.cell.provided.clone()
    }
}

impl PartialEq for DsComponent {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for DsComponent {}

impl fmt::Debug for DsComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsComponent")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("stage", &self.cell.stage.get())
            .field("available", &self.cell.available.get())
            .finish()
    }
}

/// Mutating capability over a component, handed out by `build()` and to the
/// component's own supplier.
pub struct ComponentController<C> {
    component: DsComponent,
    registry: Weak<Shared>,
    _value: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> ComponentController<C> {
    pub(crate) fn new(component: DsComponent, registry: Weak<Shared>) -> Self {
        Self {
            component,
            registry,
            _value: PhantomData,
        }
    }

    pub fn component(&self) -> &DsComponent {
        &self.component
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn stage(&self) -> Observable<ComponentStage> {
        self.component.stage()
    }

    pub fn is_available(&self) -> Observable<bool> {
        self.component.is_available()
    }

    pub fn value(&self) -> Option<Arc<C>> {
        self.component.value_as::<C>()
    }

    pub fn dependencies<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: &Service<S>,
    ) -> Result<Vec<Arc<S>>> {
        self.component.dependencies(service)
    }

    pub fn dependency<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: &Service<S>,
    ) -> Result<Option<Arc<S>>> {
        self.component.dependency(service)
    }

    pub fn set_available(&self, available: bool) -> Result<&Self> {
        self.shared()?
            .set_available(self.component.id(), available)?;
        Ok(self)
    }

    pub fn remove(&self) -> Result<&Self> {
        self.shared()?.remove(self.component.id())?;
        Ok(self)
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.registry.upgrade().ok_or(DsError::Closed)
    }
}

impl<C> Clone for ComponentController<C> {
    fn clone(&self) -> Self {
        Self {
            component: self.component.clone(),
            registry: Weak::clone(&self.registry),
            _value: PhantomData,
        }
    }
}

impl<C> fmt::Debug for ComponentController<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentController")
            .field("component", &self.component)
            .field("value_type", &std::any::type_name::<C>())
            .finish()
    }
}
