// dsr-core/src/resolver.rs
//! The resolution engine.
//!
//! All registry state lives in one [`Engine`] value owned by the registry's
//! transaction lock. A mutation seeds a pass with the components it touched.
//! The pass widens that seed to its affected closure: everything that
//! depends, directly or transitively, on a service provided inside it.
//! Components outside the closure cannot be affected and keep their stage.
//!
//! Stages inside the closure are derived from scratch, never from the stages
//! they had before, so the outcome depends only on the graph. A component can
//! be active if every static edge is met by providers that are themselves
//! grounded without leaning on a static path back to it, and every dynamic
//! edge has enough candidates that can be active. That is a least fixed point
//! over static edges nested inside a greatest fixed point over dynamic ones:
//! a cycle resolves only if one of its edges is dynamic.
//!
//! Once the active set is known, components leaving it are deactivated
//! consumers first, and components joining it are activated providers first.
//! Components that only wait on dynamic edges start as `PreSatisfied` and
//! become `Satisfied` when their providers come up later in the same pass.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use dsr_common::config::RegistryConfig;
use dsr_common::dependency::DependencySpec;
use dsr_common::error::{DsError, Result};
use dsr_common::events::RegistryEvent;
use dsr_common::model::{ComponentStage, InitPhase, ServiceId, ServiceInfo};
use tracing::{debug, error, instrument, trace};

use crate::component::{AnyValue, ComponentCell, ComponentId, DsComponent};
use crate::dependency::DependencyEdge;
use crate::observable::Observable;

/// A constructed component value plus the service values projected from it.
pub(crate) struct Activation {
    pub(crate) value: AnyValue,
    pub(crate) exports: HashMap<ServiceId, AnyValue>,
}

pub(crate) type Activator = Box<dyn Fn() -> Activation + Send>;
pub(crate) type Disposer = Box<dyn Fn(AnyValue) + Send>;

pub(crate) struct Registration {
    pub(crate) cell: Arc<ComponentCell>,
    pub(crate) dependencies: Vec<(ServiceInfo, DependencySpec)>,
    pub(crate) activator: Activator,
    pub(crate) disposer: Option<Disposer>,
}

struct Record {
    cell: Arc<ComponentCell>,
    stage: ComponentStage,
    available: bool,
    removed: bool,
    edges: BTreeMap<ServiceId, DependencyEdge>,
    activator: Activator,
    disposer: Option<Disposer>,
    /// Value kept across deactivation when no disposer is registered, reused
    /// on the next activation instead of calling the supplier again.
    retained: Option<Activation>,
}

impl Record {
    fn provided_ids(&self) -> Vec<ServiceId> {
        self.cell.provided.iter().map(|s| s.id).collect()
    }

    fn is_providing(&self) -> bool {
        !self.removed && self.available && self.stage.is_active()
    }
}

#[derive(Default)]
struct Journal {
    /// Components whose stage moved during the pass, with the stage they had
    /// when it started, in first-change order.
    stage_changes: Vec<(Arc<ComponentCell>, ComponentStage)>,
    changed: HashSet<ComponentId>,
    availability: Vec<Arc<ComponentCell>>,
    touched: BTreeSet<ComponentId>,
    phase_from: Option<InitPhase>,
    events: Vec<RegistryEvent>,
    steps: usize,
    transitions: usize,
    closed: bool,
}

/// Read-only snapshot published once a pass has converged.
#[derive(Clone, Default)]
pub(crate) struct Catalog {
    pub(crate) components: BTreeMap<String, DsComponent>,
    pub(crate) services: Vec<ServiceInfo>,
    pub(crate) phase: Option<InitPhase>,
    pub(crate) closed: bool,
}

/// Everything the registry must announce once the engine is released.
pub(crate) struct PassReport {
    pub(crate) stage_changes: Vec<Arc<ComponentCell>>,
    pub(crate) availability: Vec<Arc<ComponentCell>>,
    pub(crate) phase_changed: bool,
    pub(crate) events: Vec<RegistryEvent>,
    pub(crate) catalog: Catalog,
}

pub(crate) struct Engine {
    config: RegistryConfig,
    records: BTreeMap<ComponentId, Record>,
    names: HashMap<String, ComponentId>,
    /// service -> components declaring it as provided
    service_index: HashMap<ServiceId, BTreeSet<ComponentId>>,
    /// service -> components depending on it
    dependents_index: HashMap<ServiceId, BTreeSet<ComponentId>>,
    services: BTreeMap<ServiceId, (ServiceInfo, usize)>,
    phase: InitPhase,
    phase_slot: Observable<InitPhase>,
    closed: bool,
    next_id: u64,
    journal: Journal,
}

impl Engine {
    pub(crate) fn new(config: RegistryConfig, phase_slot: Observable<InitPhase>) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
            names: HashMap::new(),
            service_index: HashMap::new(),
            dependents_index: HashMap::new(),
            services: BTreeMap::new(),
            phase: phase_slot.get(),
            phase_slot,
            closed: false,
            next_id: 1,
            journal: Journal::default(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DsError::Closed);
        }
        Ok(())
    }

    pub(crate) fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.names.contains_key(name) {
            return Err(DsError::DuplicateComponent(name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn begin_initializing(&mut self) {
        if self.phase == InitPhase::Uninitialized {
            self.set_phase(InitPhase::Initializing);
        }
    }

    pub(crate) fn allocate_id(&mut self) -> ComponentId {
        let id = ComponentId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn admit(&mut self, registration: Registration) {
        let Registration {
            cell,
            dependencies,
            activator,
            disposer,
        } = registration;
        let id = cell.id;
        let name = cell.name.clone();

        let edges: BTreeMap<ServiceId, DependencyEdge> = dependencies
            .into_iter()
            .map(|(info, spec)| (info.id, DependencyEdge::new(info, spec)))
            .collect();

        for info in &cell.provided {
            self.service_index.entry(info.id).or_default().insert(id);
            self.track_service(info);
        }
        for edge in edges.values() {
            self.dependents_index
                .entry(edge.service_id())
                .or_default()
                .insert(id);
            self.track_service(&edge.service);
        }

        let provided: Vec<ServiceId> = cell.provided.iter().map(|s| s.id).collect();
        debug!(
            "Admitting component '{}' ({}) with {} provided service(s) and {} dependenc(ies)",
            name,
            id,
            provided.len(),
            edges.len()
        );

        self.records.insert(
            id,
            Record {
                available: cell.available.get(),
                cell,
                stage: ComponentStage::Defined,
                removed: false,
                edges,
                activator,
                disposer,
                retained: None,
            },
        );
        self.names.insert(name.clone(), id);
        self.journal.events.push(RegistryEvent::ComponentAdded { name });

        let mut seeds = vec![id];
        seeds.extend(self.dependents_of(&provided));
        self.resolve(seeds);
    }

    pub(crate) fn set_available(&mut self, id: ComponentId, available: bool) {
        let Some(record) = self.records.get_mut(&id) else {
            debug!("Ignoring availability change for removed component {}", id);
            return;
        };
        if record.removed || record.available == available {
            trace!(
                "Availability of '{}' already {}; nothing to do",
                record.cell.name,
                available
            );
            return;
        }
        record.available = available;
        record.cell.available.replace(available);
        debug!("Component '{}' marked available={}", record.cell.name, available);
        self.journal.availability.push(Arc::clone(&record.cell));
        self.journal.events.push(RegistryEvent::AvailabilityChanged {
            name: record.cell.name.clone(),
            available,
        });
        self.resolve([id]);
    }

    pub(crate) fn remove(&mut self, id: ComponentId) {
        let Some(record) = self.records.get_mut(&id) else {
            debug!("Component {} already removed", id);
            return;
        };
        debug!("Removing component '{}'", record.cell.name);
        record.removed = true;
        self.resolve([id]);
        self.purge(id);
    }

    pub(crate) fn post_init(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.phase >= InitPhase::PreInitialized {
            return Err(DsError::InvalidPhase(format!(
                "post_init called while the registry is already {}",
                self.phase
            )));
        }
        self.begin_initializing();
        self.set_phase(InitPhase::PreInitialized);

        let ids: Vec<ComponentId> = self.records.keys().copied().collect();
        debug!("Resolving {} component(s) after init", ids.len());
        self.resolve(ids);

        self.set_phase(InitPhase::Initialized);
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        let ids: Vec<ComponentId> = self.records.keys().copied().collect();
        debug!("Closing registry with {} component(s)", ids.len());
        for record in self.records.values_mut() {
            record.removed = true;
        }
        self.resolve(ids.iter().copied());
        for id in ids {
            self.purge(id);
        }
        self.closed = true;
        self.journal.closed = true;
    }

    /// Close outside a registry pass. The caller still owes the stage
    /// notifications in the returned report.
    pub(crate) fn teardown(&mut self) -> PassReport {
        self.close();
        self.finish_pass()
    }

    #[instrument(skip_all, name = "dsr_resolve")]
    fn resolve(&mut self, seeds: impl IntoIterator<Item = ComponentId>) {
        let closure = self.affected_closure(seeds);
        trace!("Resolving an affected closure of {} component(s)", closure.len());

        let mut steps = 0usize;
        let potential = match self.potential_set(&closure, &mut steps) {
            Some(potential) => potential,
            None => {
                error!(
                    "Resolution pass exceeded {} steps; deactivating {} affected component(s)",
                    self.config.max_resolution_steps,
                    closure.len()
                );
                BTreeSet::new()
            }
        };
        self.settle(&closure, &potential, &mut steps);
        self.journal.steps += steps;
        trace!("Resolution converged after {} step(s)", steps);
    }

    /// `seeds` plus every component depending, transitively, on a service
    /// one of them provides.
    fn affected_closure(
        &self,
        seeds: impl IntoIterator<Item = ComponentId>,
    ) -> BTreeSet<ComponentId> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<ComponentId> = seeds.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            let Some(record) = self.records.get(&id) else {
                continue;
            };
            if !closure.insert(id) {
                continue;
            }
            queue.extend(self.dependents_of(&record.provided_ids()));
        }
        closure
    }

    /// Members of `closure` that can be active. Returns `None` if the step
    /// budget runs out first.
    ///
    /// Starts by assuming every eligible member can be active, settles the
    /// ones whose static edges are grounded under that assumption, and
    /// repeats with the settled set as the new assumption until it stops
    /// shrinking.
    fn potential_set(
        &self,
        closure: &BTreeSet<ComponentId>,
        steps: &mut usize,
    ) -> Option<BTreeSet<ComponentId>> {
        if !self.phase.allows_resolution() {
            return Some(BTreeSet::new());
        }
        let budget = self.config.max_resolution_steps;
        let mut assumed: BTreeSet<ComponentId> = closure
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(id)
                    .is_some_and(|r| !r.removed && r.available)
            })
            .collect();

        loop {
            let mut settled = BTreeSet::new();
            let mut queue: VecDeque<ComponentId> = assumed.iter().copied().collect();
            let mut queued: HashSet<ComponentId> = assumed.iter().copied().collect();
            while let Some(id) = queue.pop_front() {
                queued.remove(&id);
                if settled.contains(&id) {
                    continue;
                }
                if *steps >= budget {
                    return None;
                }
                *steps += 1;
                if !self.supported(id, closure, &settled, &assumed) {
                    continue;
                }
                settled.insert(id);
                let provided = self.records.get(&id).map(Record::provided_ids).unwrap_or_default();
                for dependent in self.dependents_of(&provided) {
                    if assumed.contains(&dependent)
                        && !settled.contains(&dependent)
                        && queued.insert(dependent)
                    {
                        queue.push_back(dependent);
                    }
                }
            }

            if settled.len() == assumed.len() {
                return Some(settled);
            }
            trace!(
                "{} component(s) dropped from the assumed set",
                assumed.len() - settled.len()
            );
            assumed = settled;
        }
    }

    /// Whether every edge of `id` has enough providers. Inside the closure a
    /// static edge counts only `settled` providers and a dynamic edge counts
    /// `assumed` ones; outside it, only providers that are active now count.
    fn supported(
        &self,
        id: ComponentId,
        closure: &BTreeSet<ComponentId>,
        settled: &BTreeSet<ComponentId>,
        assumed: &BTreeSet<ComponentId>,
    ) -> bool {
        let Some(record) = self.records.get(&id) else {
            return false;
        };
        record.edges.values().all(|edge| {
            if edge.minimum == 0 {
                return true;
            }
            let pool = if edge.dynamic { assumed } else { settled };
            let count = self
                .service_index
                .get(&edge.service_id())
                .map_or(0, |candidates| {
                    candidates
                        .iter()
                        .filter(|p| {
                            if closure.contains(p) {
                                pool.contains(p)
                            } else {
                                self.records.get(p).is_some_and(Record::is_providing)
                            }
                        })
                        .count()
                });
            count >= edge.minimum
        })
    }

    /// Moves every member of `closure` to the stage implied by `potential`.
    fn settle(
        &mut self,
        closure: &BTreeSet<ComponentId>,
        potential: &BTreeSet<ComponentId>,
        steps: &mut usize,
    ) {
        let falling: BTreeSet<ComponentId> = closure.difference(potential).copied().collect();
        for id in self.consumers_first(&falling) {
            let target = self.resting_stage(id);
            if self.records.get(&id).is_some_and(|r| r.stage != target) {
                self.refresh_providers(id);
                self.transition(id, target);
            }
        }

        let mut pending: BTreeSet<ComponentId> = potential
            .iter()
            .copied()
            .filter(|id| self.records.get(id).is_some_and(|r| !r.stage.is_active()))
            .collect();
        let mut queue: VecDeque<ComponentId> = pending.iter().copied().collect();
        while !pending.is_empty() {
            let next = match queue.pop_front() {
                Some(id) => {
                    *steps += 1;
                    if !pending.contains(&id) || !self.edges_met(id, true) {
                        continue;
                    }
                    id
                }
                // Everything left waits on a dynamic edge; start one of them.
                None => match pending.iter().copied().find(|id| self.edges_met(*id, false)) {
                    Some(id) => id,
                    None => {
                        error!(
                            "{} component(s) could not be activated in order",
                            pending.len()
                        );
                        break;
                    }
                },
            };
            pending.remove(&next);
            self.refresh_providers(next);
            let target = self.active_stage(next);
            self.transition(next, target);
            let provided = self.records.get(&next).map(Record::provided_ids).unwrap_or_default();
            for dependent in self.dependents_of(&provided) {
                if pending.contains(&dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        for &id in closure {
            self.refresh_providers(id);
            if !potential.contains(&id) {
                continue;
            }
            let target = self.active_stage(id);
            if self.records.get(&id).is_some_and(|r| r.stage != target) {
                self.transition(id, target);
            }
        }
    }

    /// Stage of an active component, from its refreshed provider sets.
    fn active_stage(&self, id: ComponentId) -> ComponentStage {
        let met = self
            .records
            .get(&id)
            .is_some_and(|r| r.edges.values().all(DependencyEdge::is_met));
        if met {
            ComponentStage::Satisfied
        } else {
            ComponentStage::PreSatisfied
        }
    }

    /// Stage of a component that cannot be active.
    fn resting_stage(&self, id: ComponentId) -> ComponentStage {
        match self.records.get(&id) {
            None => ComponentStage::Removed,
            Some(r) if r.removed => ComponentStage::Removed,
            Some(r) if !r.available => ComponentStage::Unavailable,
            Some(_) if !self.phase.allows_resolution() => ComponentStage::Defined,
            Some(_) => ComponentStage::Unsatisfied,
        }
    }

    /// Whether `id`'s edges are met by providers active right now; with
    /// `include_dynamic` false only static edges are checked.
    fn edges_met(&self, id: ComponentId, include_dynamic: bool) -> bool {
        let Some(record) = self.records.get(&id) else {
            return false;
        };
        record
            .edges
            .values()
            .filter(|edge| include_dynamic || !edge.dynamic)
            .all(|edge| {
                edge.minimum == 0 || self.active_providers(edge.service_id()).len() >= edge.minimum
            })
    }

    /// Orders `ids` so that a component comes before any member of `ids`
    /// providing a service it depends on.
    fn consumers_first(&self, ids: &BTreeSet<ComponentId>) -> Vec<ComponentId> {
        let mut order = Vec::with_capacity(ids.len());
        let mut seen = HashSet::new();
        for &id in ids {
            self.visit_consumers(id, ids, &mut seen, &mut order);
        }
        order
    }

    fn visit_consumers(
        &self,
        id: ComponentId,
        ids: &BTreeSet<ComponentId>,
        seen: &mut HashSet<ComponentId>,
        order: &mut Vec<ComponentId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        if let Some(record) = self.records.get(&id) {
            for consumer in self.dependents_of(&record.provided_ids()) {
                if ids.contains(&consumer) {
                    self.visit_consumers(consumer, ids, seen, order);
                }
            }
        }
        order.push(id);
    }

    /// Recomputes `id`'s provider sets from the service index.
    fn refresh_providers(&mut self, id: ComponentId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        let fresh: Vec<(ServiceId, BTreeSet<ComponentId>)> = record
            .edges
            .keys()
            .map(|svc| (*svc, self.active_providers(*svc)))
            .collect();

        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        for (svc, providers) in fresh {
            if let Some(edge) = record.edges.get_mut(&svc) {
                if edge.replace_providers(providers) {
                    trace!(
                        "'{}' now sees {} provider(s) of {} (deficit {})",
                        record.cell.name,
                        edge.providers.len(),
                        edge.service,
                        edge.deficit()
                    );
                }
            }
        }
        self.journal.touched.insert(id);
    }

    fn active_providers(&self, service: ServiceId) -> BTreeSet<ComponentId> {
        self.service_index
            .get(&service)
            .map(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .filter(|p| self.records.get(p).is_some_and(Record::is_providing))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn transition(&mut self, id: ComponentId, target: ComponentStage) {
        let log_transitions = self.config.log_transitions;
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        let from = record.stage;
        record.stage = target;
        record.cell.stage.replace(target);
        if self.journal.changed.insert(id) {
            self.journal
                .stage_changes
                .push((Arc::clone(&record.cell), from));
        }
        self.journal.transitions += 1;
        if log_transitions {
            debug!("'{}': {} -> {}", record.cell.name, from, target);
        } else {
            trace!("'{}': {} -> {}", record.cell.name, from, target);
        }

        match (from.is_active(), target.is_active()) {
            (false, true) => self.activate(id),
            (true, false) => self.deactivate(id, target),
            _ => {}
        }
        if target == ComponentStage::Removed {
            if let Some(record) = self.records.get_mut(&id) {
                record.retained = None;
            }
        }
    }

    fn activate(&mut self, id: ComponentId) {
        // The supplier may read its dependencies through its controller.
        self.publish_bindings(id);
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        let activation = match record.retained.take() {
            Some(retained) => {
                trace!("Reusing retained value of '{}'", record.cell.name);
                retained
            }
            None => {
                debug!("Constructing value of '{}'", record.cell.name);
                (record.activator)()
            }
        };
        *record.cell.value.write() = Some(activation.value);
        *record.cell.exports.write() = activation.exports;
    }

    fn deactivate(&mut self, id: ComponentId, target: ComponentStage) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        let value = record.cell.value.write().take();
        let exports = std::mem::take(&mut *record.cell.exports.write());
        let Some(value) = value else {
            return;
        };
        match &record.disposer {
            Some(dispose) => {
                debug!("Disposing value of '{}' ({})", record.cell.name, target);
                drop(exports);
                dispose(value);
            }
            None if target != ComponentStage::Removed => {
                trace!("Retaining value of '{}' while {}", record.cell.name, target);
                record.retained = Some(Activation { value, exports });
            }
            None => {}
        }
    }

    fn publish_bindings(&self, id: ComponentId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        let mut bindings = record.cell.bindings.write();
        for (svc, edge) in &record.edges {
            if let Some(binding) = bindings.get_mut(svc) {
                binding.providers = edge
                    .providers
                    .iter()
                    .filter_map(|p| self.records.get(p))
                    .map(|r| Arc::downgrade(&r.cell))
                    .collect();
            }
        }
    }

    fn purge(&mut self, id: ComponentId) {
        let Some(record) = self.records.remove(&id) else {
            return;
        };
        self.names.remove(&record.cell.name);
        for info in &record.cell.provided {
            if let Some(set) = self.service_index.get_mut(&info.id) {
                set.remove(&id);
                if set.is_empty() {
                    self.service_index.remove(&info.id);
                }
            }
            self.untrack_service(info.id);
        }
        for svc in record.edges.keys() {
            if let Some(set) = self.dependents_index.get_mut(svc) {
                set.remove(&id);
                if set.is_empty() {
                    self.dependents_index.remove(svc);
                }
            }
            self.untrack_service(*svc);
        }
        self.journal.touched.remove(&id);
        trace!("Purged '{}' from the registry", record.cell.name);
    }

    fn dependents_of(&self, services: &[ServiceId]) -> Vec<ComponentId> {
        let mut out = BTreeSet::new();
        for svc in services {
            if let Some(dependents) = self.dependents_index.get(svc) {
                out.extend(dependents.iter().copied());
            }
        }
        out.into_iter().collect()
    }

    fn track_service(&mut self, info: &ServiceInfo) {
        self.services
            .entry(info.id)
            .or_insert_with(|| (info.clone(), 0))
            .1 += 1;
    }

    fn untrack_service(&mut self, id: ServiceId) {
        if let Some((_, uses)) = self.services.get_mut(&id) {
            *uses -= 1;
            if *uses == 0 {
                self.services.remove(&id);
            }
        }
    }

    fn set_phase(&mut self, to: InitPhase) {
        let from = self.phase;
        if from == to {
            return;
        }
        debug!("Registry phase {} -> {}", from, to);
        self.phase = to;
        self.phase_slot.replace(to);
        self.journal.phase_from.get_or_insert(from);
        self.journal
            .events
            .push(RegistryEvent::PhaseChanged { from, to });
    }

    /// Publishes provider bindings for everything the pass touched and
    /// collects what must be announced.
    pub(crate) fn finish_pass(&mut self) -> PassReport {
        let touched = std::mem::take(&mut self.journal.touched);
        for id in touched {
            self.publish_bindings(id);
        }

        let journal = std::mem::take(&mut self.journal);
        let mut events = journal.events;
        let mut stage_changes = Vec::new();
        for (cell, initial) in journal.stage_changes {
            let last = cell.stage.get();
            if last != initial {
                events.push(RegistryEvent::stage_changed(cell.name.clone(), initial, last));
                stage_changes.push(cell);
            }
        }
        if journal.steps > 0 {
            events.push(RegistryEvent::PassFinished {
                steps: journal.steps,
                transitions: journal.transitions,
            });
        }
        if journal.closed {
            events.push(RegistryEvent::Closed);
        }

        PassReport {
            stage_changes,
            availability: journal.availability,
            phase_changed: journal.phase_from.is_some_and(|from| from != self.phase),
            events,
            catalog: self.catalog(),
        }
    }

    fn catalog(&self) -> Catalog {
        Catalog {
            components: self
                .records
                .values()
                .map(|r| (r.cell.name.clone(), DsComponent::new(Arc::clone(&r.cell))))
                .collect(),
            services: self.services.values().map(|(info, _)| info.clone()).collect(),
            phase: Some(self.phase),
            closed: self.closed,
        }
    }
}
