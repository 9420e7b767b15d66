mod support;

use std::collections::BTreeMap;

use dsr_core::{ComponentController, ComponentStage, DependencyService, DsComponent, Service};
use proptest::prelude::*;

const SERVICES: usize = 4;
const COMPONENTS: usize = 6;

#[derive(Debug, Clone)]
struct Shape {
    provides: Vec<usize>,
    /// (service, minimum, dynamic)
    deps: Vec<(usize, usize, bool)>,
}

#[derive(Debug, Clone)]
enum Op {
    Toggle(usize),
    Remove(usize),
    Restore(usize),
    PostInit,
}

fn shape() -> impl Strategy<Value = Shape> {
    (
        prop::collection::btree_set(0..SERVICES, 0..=2),
        prop::collection::btree_map(0..SERVICES, (0..=2usize, any::<bool>()), 0..=2),
    )
        .prop_map(|(provides, deps)| Shape {
            provides: provides.into_iter().collect(),
            deps: deps.into_iter().map(|(s, (m, d))| (s, m, d)).collect(),
        })
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..COMPONENTS).prop_map(Op::Toggle),
        1 => (0..COMPONENTS).prop_map(Op::Remove),
        2 => (0..COMPONENTS).prop_map(Op::Restore),
        1 => Just(Op::PostInit),
    ]
}

struct World {
    registry: DependencyService,
    services: Vec<Service<usize>>,
    shapes: Vec<Shape>,
    controllers: Vec<ComponentController<usize>>,
}

impl World {
    fn new(shapes: Vec<Shape>) -> Self {
        let registry = DependencyService::new();
        let services = (0..SERVICES)
            .map(|i| Service::new(format!("s{i}")))
            .collect();
        let mut world = Self {
            registry,
            services,
            shapes,
            controllers: Vec::new(),
        };
        for i in 0..world.shapes.len() {
            let ctl = world.define(i);
            world.controllers.push(ctl);
        }
        world
    }

    fn define(&self, i: usize) -> ComponentController<usize> {
        self.define_in(&self.registry, i, true)
    }

    fn define_in(
        &self,
        registry: &DependencyService,
        i: usize,
        available: bool,
    ) -> ComponentController<usize> {
        let shape = &self.shapes[i];
        let mut builder = registry
            .inject(format!("c{i}"), move |_| i)
            .unwrap()
            .initially_available(available);
        for &svc in &shape.provides {
            builder = builder.provides_self(&self.services[svc]);
        }
        for &(svc, minimum, dynamic) in &shape.deps {
            builder = builder.depends(&self.services[svc], |d| d.minimum(minimum).dynamic(dynamic));
        }
        builder.build().unwrap()
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Toggle(i) => {
                let ctl = &self.controllers[i];
                let available = ctl.is_available().get();
                ctl.set_available(!available).unwrap();
            }
            Op::Remove(i) => {
                self.controllers[i].remove().unwrap();
            }
            Op::Restore(i) => {
                if self.controllers[i].stage().get() == ComponentStage::Removed {
                    self.controllers[i] = self.define(i);
                }
            }
            Op::PostInit => {
                if !self.registry.is_initialized() {
                    self.registry.post_init().unwrap();
                }
            }
        }
    }

    /// A fresh registry holding only what is live in this one, in its
    /// current availability.
    fn rebuilt(&self) -> DependencyService {
        let fresh = DependencyService::new();
        for (i, ctl) in self.controllers.iter().enumerate() {
            if ctl.stage().get() != ComponentStage::Removed {
                self.define_in(&fresh, i, ctl.is_available().get());
            }
        }
        if self.registry.is_initialized() {
            fresh.post_init().unwrap();
        }
        fresh
    }

    fn check(&self) -> Result<(), TestCaseError> {
        let live: BTreeMap<String, DsComponent> = self
            .registry
            .components()
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        let initialized = self.registry.is_initialized();

        for ctl in &self.controllers {
            let stage = ctl.stage().get();
            prop_assert_eq!(ctl.value().is_some(), stage.is_active(), "{}", ctl.name());
            prop_assert_eq!(
                live.contains_key(ctl.name()),
                stage != ComponentStage::Removed,
                "{} is {} but listed={}",
                ctl.name(),
                stage,
                live.contains_key(ctl.name())
            );
        }

        for component in live.values() {
            let stage = component.stage().get();
            let available = component.is_available().get();
            if !available {
                prop_assert_eq!(stage, ComponentStage::Unavailable);
                continue;
            }
            if !initialized {
                prop_assert_eq!(stage, ComponentStage::Defined);
                continue;
            }

            let mut unmet_static = 0;
            let mut unmet_dynamic = 0;
            for dep in component.dependency_info() {
                let active = live
                    .values()
                    .filter(|p| p.stage().get().is_active())
                    .filter(|p| p.provided_services().iter().any(|s| s.id == dep.service.id))
                    .count();
                prop_assert_eq!(
                    dep.providers.len(),
                    active,
                    "{} binds a stale provider set for {}",
                    component.name(),
                    dep.service
                );
                if active < dep.minimum {
                    if dep.dynamic {
                        unmet_dynamic += 1;
                    } else {
                        unmet_static += 1;
                    }
                }
            }

            match stage {
                ComponentStage::Satisfied => {
                    prop_assert_eq!(unmet_static + unmet_dynamic, 0, "{}", component.name());
                }
                ComponentStage::PreSatisfied => {
                    prop_assert_eq!(unmet_static, 0, "{}", component.name());
                    prop_assert!(unmet_dynamic > 0, "{}", component.name());
                }
                ComponentStage::Unsatisfied => {
                    prop_assert!(unmet_static + unmet_dynamic > 0, "{}", component.name());
                }
                other => {
                    return Err(TestCaseError::fail(format!(
                        "{} is {} after init",
                        component.name(),
                        other
                    )));
                }
            }
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_pass_converges_to_a_consistent_graph(
        shapes in prop::collection::vec(shape(), COMPONENTS),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        support::init_logging();
        let mut world = World::new(shapes);
        world.check()?;
        for op in &ops {
            world.apply(op);
            world.check()?;
        }

        world.registry.close().unwrap();
        prop_assert!(world.registry.components().is_empty());
        for ctl in &world.controllers {
            prop_assert_eq!(ctl.stage().get(), ComponentStage::Removed);
            prop_assert!(ctl.value().is_none());
        }
    }

    #[test]
    fn stages_do_not_depend_on_mutation_history(
        shapes in prop::collection::vec(shape(), COMPONENTS),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        support::init_logging();
        let mut world = World::new(shapes);
        for op in &ops {
            world.apply(op);
            let fresh = world.rebuilt();
            prop_assert_eq!(
                support::stages(&world.registry),
                support::stages(&fresh),
                "after {:?}",
                op
            );
        }
    }

    #[test]
    fn static_graphs_resolve_the_same_regardless_of_definition_order(
        shapes in prop::collection::vec(shape(), COMPONENTS),
    ) {
        let statics: Vec<Shape> = shapes
            .into_iter()
            .map(|mut s| {
                s.deps.iter_mut().for_each(|d| d.2 = false);
                s
            })
            .collect();

        let forward = World::new(statics.clone());
        forward.registry.post_init().unwrap();

        // Define everything after init, in reverse order.
        let reverse = DependencyService::new();
        reverse.post_init().unwrap();
        let services: Vec<Service<usize>> = forward.services.clone();
        for i in (0..statics.len()).rev() {
            let mut builder = reverse.inject(format!("c{i}"), move |_| i).unwrap();
            for &svc in &statics[i].provides {
                builder = builder.provides_self(&services[svc]);
            }
            for &(svc, minimum, _) in &statics[i].deps {
                builder = builder.depends(&services[svc], |d| d.minimum(minimum));
            }
            builder.build().unwrap();
        }

        let stages = |r: &DependencyService| -> Vec<(String, ComponentStage)> {
            r.components().iter().map(|c| (c.name().to_string(), c.stage().get())).collect()
        };
        prop_assert_eq!(stages(&forward.registry), stages(&reverse));
    }
}
