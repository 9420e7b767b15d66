mod support;

use dsr_core::{ComponentStage, DependencyService, RegistryEvent, Service};
use support::{init_logging, record_events, record_stages, stage_of, stages};

struct Services {
    svc1: Service<String>,
    svc2: Service<String>,
    svc3: Service<String>,
    svc4: Service<String>,
    svc5: Service<String>,
}

impl Services {
    fn new() -> Self {
        Self {
            svc1: Service::new("svc1"),
            svc2: Service::new("svc2"),
            svc3: Service::new("svc3"),
            svc4: Service::new("svc4"),
            svc5: Service::new("svc5"),
        }
    }
}

fn named(name: &'static str) -> impl Fn(&dsr_core::ComponentController<String>) -> String {
    move |_| name.to_string()
}

/// A..D from the reference scenario; E is injected separately.
fn inject_chain(registry: &DependencyService, s: &Services) {
    registry
        .inject("A", named("A"))
        .unwrap()
        .requires(&s.svc1)
        .requires(&s.svc2)
        .provides_self(&s.svc3)
        .build()
        .unwrap();
    registry
        .inject("B", named("B"))
        .unwrap()
        .requires(&s.svc2)
        .requires(&s.svc3)
        .provides_self(&s.svc4)
        .build()
        .unwrap();
    registry
        .inject("C", named("C"))
        .unwrap()
        .requires(&s.svc3)
        .requires(&s.svc4)
        .provides_self(&s.svc5)
        .build()
        .unwrap();
    registry
        .inject("D", named("D"))
        .unwrap()
        .requires(&s.svc5)
        .build()
        .unwrap();
}

#[test]
fn five_component_chain_resolves_and_tears_down() {
    init_logging();
    let registry = DependencyService::new();
    let s = Services::new();

    inject_chain(&registry, &s);
    let e = registry
        .inject("E", named("E"))
        .unwrap()
        .provides_self(&s.svc1)
        .provides_self(&s.svc2)
        .build()
        .unwrap();
    assert!(stages(&registry)
        .iter()
        .all(|(_, stage)| *stage == ComponentStage::Defined));

    registry.post_init().unwrap();
    assert!(registry.is_initialized());
    assert_eq!(
        stages(&registry),
        ["A", "B", "C", "D", "E"]
            .iter()
            .map(|n| (n.to_string(), ComponentStage::Satisfied))
            .collect::<Vec<_>>()
    );
    assert_eq!(e.value().as_deref().map(String::as_str), Some("E"));

    let c = registry.component("C").unwrap();
    assert_eq!(c.value_as::<String>().as_deref().map(String::as_str), Some("C"));
    let info = c.dependency_info();
    assert_eq!(info.len(), 2);
    assert!(info.iter().all(|d| d.providers.len() == 1 && !d.dynamic));

    let events = record_events(&registry);
    registry.close().unwrap();
    assert!(registry.components().is_empty());
    assert_eq!(c.stage().get(), ComponentStage::Removed);
    assert!(c.value().is_none());
    assert!(e.value().is_none());
    assert!(matches!(events.lock().last(), Some(RegistryEvent::Closed)));
    assert!(matches!(
        registry.inject("late", |_| ()).err(),
        Some(dsr_core::DsError::Closed)
    ));
}

#[test]
fn unavailable_provider_only_affects_its_dependents() {
    init_logging();
    let registry = DependencyService::new();
    let s = Services::new();

    registry
        .inject("E", named("E"))
        .unwrap()
        .provides_self(&s.svc1)
        .provides_self(&s.svc2)
        .build()
        .unwrap();
    let a = registry
        .inject("A", named("A"))
        .unwrap()
        .requires(&s.svc1)
        .requires(&s.svc2)
        .provides_self(&s.svc3)
        .build()
        .unwrap();
    let b = registry
        .inject("B", named("B"))
        .unwrap()
        .requires(&s.svc2)
        .requires(&s.svc3)
        .provides_self(&s.svc4)
        .build()
        .unwrap();
    let c = registry
        .inject("C", named("C"))
        .unwrap()
        .requires(&s.svc3)
        .requires(&s.svc4)
        .provides_self(&s.svc5)
        .build()
        .unwrap();
    let d = registry
        .inject("D", named("D"))
        .unwrap()
        .requires(&s.svc5)
        .build()
        .unwrap();
    registry.post_init().unwrap();

    let d_seen = record_stages(d.component());
    let a_seen = record_stages(a.component());

    c.set_available(false).unwrap();
    assert_eq!(c.stage().get(), ComponentStage::Unavailable);
    assert!(c.value().is_none());
    assert_eq!(d.stage().get(), ComponentStage::Unsatisfied);
    assert!(d.value().is_none());
    for name in ["A", "B", "E"] {
        assert_eq!(stage_of(&registry, name), ComponentStage::Satisfied, "{name}");
    }
    assert!(d.dependencies(&s.svc5).unwrap().is_empty());

    c.set_available(true).unwrap();
    assert_eq!(c.stage().get(), ComponentStage::Satisfied);
    assert_eq!(d.stage().get(), ComponentStage::Satisfied);
    let svc5 = d.dependencies(&s.svc5).unwrap();
    assert_eq!(svc5.len(), 1);
    assert_eq!(svc5[0].as_str(), "C");
    assert_eq!(
        b.dependencies(&s.svc3).unwrap()[0].as_str(),
        "A",
        "B sees A through svc3"
    );

    assert_eq!(
        *d_seen.lock(),
        vec![ComponentStage::Unsatisfied, ComponentStage::Satisfied]
    );
    assert!(a_seen.lock().is_empty(), "A never changed stage");

    registry.close().unwrap();
    for ctl in [&a, &b, &c, &d] {
        assert_eq!(ctl.stage().get(), ComponentStage::Removed);
        assert!(ctl.value().is_none());
    }
    assert!(registry.components().is_empty());
    assert!(registry.services().is_empty());
    assert!(registry.is_closed());
    assert_eq!(d_seen.lock().last(), Some(&ComponentStage::Removed));
}

#[test]
fn post_init_notifies_converged_stages_only() {
    init_logging();
    let registry = DependencyService::new();
    let s = Services::new();
    inject_chain(&registry, &s);
    registry
        .inject("E", named("E"))
        .unwrap()
        .provides_self(&s.svc1)
        .provides_self(&s.svc2)
        .build()
        .unwrap();

    let a_seen = record_stages(&registry.component("A").unwrap());
    let d_seen = record_stages(&registry.component("D").unwrap());
    let events = record_events(&registry);

    registry.post_init().unwrap();

    // A is evaluated before E activates, but listeners only see the result.
    assert_eq!(*a_seen.lock(), vec![ComponentStage::Satisfied]);
    assert_eq!(*d_seen.lock(), vec![ComponentStage::Satisfied]);

    let events = events.lock();
    let stage_events: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RegistryEvent::StageChanged { name, from, to } => Some((name.as_str(), *from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(stage_events.len(), 5);
    assert!(stage_events
        .iter()
        .all(|(_, from, to)| *from == ComponentStage::Defined && *to == ComponentStage::Satisfied));
    assert!(events.iter().any(|e| matches!(
        e,
        RegistryEvent::PhaseChanged {
            to: dsr_core::InitPhase::Initialized,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(RegistryEvent::PassFinished { .. })
    ));
}

#[test]
fn late_components_resolve_immediately_after_init() {
    init_logging();
    let registry = DependencyService::new();
    let s = Services::new();
    registry.post_init().unwrap();

    inject_chain(&registry, &s);
    for name in ["A", "B", "C", "D"] {
        assert_eq!(stage_of(&registry, name), ComponentStage::Unsatisfied);
    }

    let e = registry
        .inject("E", named("E"))
        .unwrap()
        .provides_self(&s.svc1)
        .provides_self(&s.svc2)
        .build()
        .unwrap();
    assert_eq!(e.stage().get(), ComponentStage::Satisfied);
    for name in ["A", "B", "C", "D"] {
        assert_eq!(stage_of(&registry, name), ComponentStage::Satisfied);
    }

    e.remove().unwrap();
    assert!(registry.component("E").is_none());
    for name in ["A", "B", "C", "D"] {
        assert_eq!(stage_of(&registry, name), ComponentStage::Unsatisfied);
    }
    let svc_names: Vec<_> = registry.services().into_iter().map(|i| i.name).collect();
    assert!(svc_names.contains(&"svc1".to_string()), "A still depends on svc1");
}
