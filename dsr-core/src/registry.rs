// dsr-core/src/registry.rs
use std::cell::RefCell;
use std::sync::Arc;

use dsr_common::config::RegistryConfig;
use dsr_common::dependency::DependencySpec;
use dsr_common::error::{DsError, Result};
use dsr_common::events::RegistryEvent;
use dsr_common::model::{InitPhase, Service, ServiceInfo};
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, instrument, trace};

use crate::component::{
    AnyValue, Binding, ComponentCell, ComponentController, ComponentId, DsComponent,
};
use crate::observable::{Listeners, Observable, Subscription};
use crate::resolver::{Activation, Activator, Catalog, Disposer, Engine, PassReport, Registration};
use crate::scheduler::{Scheduler, Task};

pub(crate) struct Txn {
    engine: RefCell<Engine>,
    scheduler: Scheduler,
}

pub(crate) struct Shared {
    txn: ReentrantMutex<Txn>,
    catalog: RwLock<Catalog>,
    phase: Observable<InitPhase>,
    events: Listeners<RegistryEvent>,
}

impl Shared {
    /// Runs one mutation as a pass: resolve, publish, notify, then drain any
    /// work deferred while the pass was in flight.
    #[instrument(skip_all, name = "dsr_pass", fields(op = op))]
    pub(crate) fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Engine) -> Result<T>,
    ) -> Result<T> {
        let txn = self.txn.lock();
        let result = {
            let _pass = txn.scheduler.begin_pass(op)?;
            let (result, report) = {
                let mut engine = txn.engine.borrow_mut();
                let result = f(&mut engine);
                let report = engine.finish_pass();
                (result, report)
            };
            self.publish(report);
            result
        };
        self.drain(&txn);
        result
    }

    fn publish(&self, report: PassReport) {
        *self.catalog.write() = report.catalog;
        for cell in &report.availability {
            cell.available.notify();
        }
        for cell in &report.stage_changes {
            cell.stage.notify();
        }
        if report.phase_changed {
            self.phase.notify();
        }
        for event in &report.events {
            self.events.emit(event);
        }
    }

    fn drain(&self, txn: &Txn) {
        let Some(_drain) = txn.scheduler.begin_drain() else {
            return;
        };
        while let Some(task) = txn.scheduler.next_task() {
            trace!("Running deferred task ({} left)", txn.scheduler.pending());
            task();
        }
    }

    pub(crate) fn schedule(&self, task: Task) {
        let txn = self.txn.lock();
        if txn.scheduler.is_in_pass() {
            txn.scheduler.defer(task);
            return;
        }
        drop(txn);
        task();
    }

    pub(crate) fn set_available(&self, id: ComponentId, available: bool) -> Result<()> {
        self.mutate("set_available", |engine| {
            engine.set_available(id, available);
            Ok(())
        })
    }

    pub(crate) fn remove(&self, id: ComponentId) -> Result<()> {
        self.mutate("remove", |engine| {
            engine.remove(id);
            Ok(())
        })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let engine = self.txn.get_mut().engine.get_mut();
        if engine.is_closed() {
            return;
        }
        debug!("Registry dropped without close(); tearing down components");
        let report = engine.teardown();
        // Controllers can outlive the registry and still hold listeners.
        self.publish(report);
    }
}

/// The component registry. Cheap to clone; all clones share one graph.
#[derive(Clone)]
pub struct DependencyService {
    shared: Arc<Shared>,
}

impl DependencyService {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Registry configured from `DSR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(RegistryConfig::load()?))
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        debug!("Creating registry: {:?}", config);
        let phase = Observable::new(InitPhase::Uninitialized);
        let engine = Engine::new(config, phase.clone());
        Self {
            shared: Arc::new(Shared {
                txn: ReentrantMutex::new(Txn {
                    engine: RefCell::new(engine),
                    scheduler: Scheduler::new(),
                }),
                catalog: RwLock::new(Catalog {
                    phase: Some(InitPhase::Uninitialized),
                    ..Catalog::default()
                }),
                phase,
                events: Listeners::new(),
            }),
        }
    }

    /// Starts defining a component. Fails if `name` is taken or the registry
    /// is closed.
    pub fn inject<C, F>(&self, name: impl Into<String>, supplier: F) -> Result<ComponentBuilder<C>>
    where
        C: Send + Sync + 'static,
        F: Fn(&ComponentController<C>) -> C + Send + 'static,
    {
        let name = name.into();
        self.shared.mutate("inject", |engine| {
            engine.ensure_open()?;
            engine.ensure_unique(&name)?;
            engine.begin_initializing();
            Ok(())
        })?;
        debug!("Injecting component '{}'", name);
        Ok(ComponentBuilder {
            registry: self.clone(),
            name,
            supplier: Box::new(supplier),
            provisions: Vec::new(),
            dependencies: Vec::new(),
            available: true,
            disposer: None,
            errors: Vec::new(),
        })
    }

    /// Live components ordered by name. Removed components never appear.
    pub fn components(&self) -> Vec<DsComponent> {
        self.shared.catalog.read().components.values().cloned().collect()
    }

    pub fn component(&self, name: &str) -> Option<DsComponent> {
        self.shared.catalog.read().components.get(name).cloned()
    }

    /// Every service provided or depended upon by a live component.
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.shared.catalog.read().services.clone()
    }

    pub fn init_phase(&self) -> Observable<InitPhase> {
        self.shared.phase.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.catalog.read().phase == Some(InitPhase::Initialized)
    }

    /// Ends the definition phase: every `Defined` component is resolved.
    pub fn post_init(&self) -> Result<()> {
        self.shared.mutate("post_init", |engine| engine.post_init())
    }

    /// Runs `task` now, or after the current pass if called from inside one
    /// (a listener, supplier, projector or disposer).
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.schedule(Box::new(task));
    }

    /// Removes every component and rejects further definitions.
    pub fn close(&self) -> Result<()> {
        self.shared.mutate("close", |engine| {
            engine.close();
            Ok(())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.catalog.read().closed
    }

    pub fn subscribe_events<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.shared.events.add(Arc::new(listener))
    }

    pub fn unsubscribe_events(&self, sub: Subscription) -> bool {
        self.shared.events.remove(sub)
    }
}

impl Default for DependencyService {
    fn default() -> Self {
        Self::new()
    }
}

type Supplier<C> = Box<dyn Fn(&ComponentController<C>) -> C + Send>;
type Projector<C> = Box<dyn Fn(&Arc<C>) -> AnyValue + Send>;

/// Accumulates a component definition; nothing reaches the registry until
/// [`ComponentBuilder::build`].
pub struct ComponentBuilder<C> {
    registry: DependencyService,
    name: String,
    supplier: Supplier<C>,
    provisions: Vec<(ServiceInfo, Projector<C>)>,
    dependencies: Vec<(ServiceInfo, DependencySpec)>,
    available: bool,
    disposer: Option<Box<dyn Fn(Arc<C>) + Send>>,
    errors: Vec<DsError>,
}

impl<C: Send + Sync + 'static> ComponentBuilder<C> {
    /// Declares `service` as provided, with its value projected from the
    /// component value whenever the component activates.
    pub fn provides<S, P>(mut self, service: &Service<S>, projector: P) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        P: Fn(&Arc<C>) -> Arc<S> + Send + 'static,
    {
        if self.provisions.iter().any(|(info, _)| info.id == service.id()) {
            self.errors.push(DsError::DuplicateProvision {
                component: self.name.clone(),
                service: service.name().to_string(),
            });
            return self;
        }
        self.provisions.push((
            service.info(),
            Box::new(move |value: &Arc<C>| -> AnyValue { Arc::new(projector(value)) }),
        ));
        self
    }

    /// Provides the component value itself as `service`.
    pub fn provides_self(self, service: &Service<C>) -> Self {
        self.provides(service, Arc::clone)
    }

    pub fn depends<S, F>(mut self, service: &Service<S>, configure: F) -> Self
    where
        S: ?Sized + 'static,
        F: FnOnce(DependencySpec) -> DependencySpec,
    {
        if self
            .dependencies
            .iter()
            .any(|(info, _)| info.id == service.id())
        {
            self.errors.push(DsError::DuplicateDependency {
                component: self.name.clone(),
                service: service.name().to_string(),
            });
            return self;
        }
        let spec = configure(DependencySpec::default());
        self.dependencies.push((service.info(), spec));
        self
    }

    /// Shorthand for a static dependency on at least one provider.
    pub fn requires<S: ?Sized + 'static>(self, service: &Service<S>) -> Self {
        self.depends(service, |d| d)
    }

    pub fn initially_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Called with the value whenever the component leaves an active stage.
    /// Without a disposer the value is kept and reused on reactivation.
    pub fn dispose_when_inactive<D>(mut self, disposer: D) -> Self
    where
        D: Fn(Arc<C>) + Send + 'static,
    {
        self.disposer = Some(Box::new(disposer));
        self
    }

    /// Admits the component: it stays `Defined` until `post_init`, and is
    /// resolved immediately afterwards.
    pub fn build(self) -> Result<ComponentController<C>> {
        let Self {
            registry,
            name,
            supplier,
            provisions,
            dependencies,
            available,
            disposer,
            errors,
        } = self;
        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }

        let weak = Arc::downgrade(&registry.shared);
        registry.shared.mutate("build", move |engine| {
            engine.ensure_open()?;
            engine.ensure_unique(&name)?;
            engine.begin_initializing();

            let id = engine.allocate_id();
            let bindings = dependencies
                .iter()
                .map(|(info, spec)| {
                    (
                        info.id,
                        Binding {
                            service: info.clone(),
                            minimum: spec.effective_minimum(),
                            dynamic: spec.is_dynamic(),
                            providers: Vec::new(),
                        },
                    )
                })
                .collect();
            let provided = provisions.iter().map(|(info, _)| info.clone()).collect();
            let cell = Arc::new(ComponentCell::new(id, name, provided, bindings, available));
            let controller = ComponentController::new(DsComponent::new(Arc::clone(&cell)), weak);

            let disposer = disposer.map(|dispose| -> Disposer {
                Box::new(move |value: AnyValue| {
                    if let Ok(value) = value.downcast::<C>() {
                        dispose(value);
                    }
                })
            });
            engine.admit(Registration {
                activator: activator(supplier, provisions, controller.clone()),
                cell,
                dependencies,
                disposer,
            });
            Ok(controller)
        })
    }
}

fn activator<C: Send + Sync + 'static>(
    supplier: Supplier<C>,
    provisions: Vec<(ServiceInfo, Projector<C>)>,
    controller: ComponentController<C>,
) -> Activator {
    Box::new(move || {
        let value = Arc::new(supplier(&controller));
        let exports = provisions
            .iter()
            .map(|(info, project)| (info.id, project(&value)))
            .collect();
        Activation { value, exports }
    })
}
