// dsr-core/src/dependency.rs
use std::collections::BTreeSet;
use std::fmt;

use dsr_common::dependency::DependencySpec;
use dsr_common::model::{ServiceId, ServiceInfo};
use serde::{Deserialize, Serialize};

use crate::component::ComponentId;

/// One component's reliance on a service. `providers` is derived by the
/// engine and always holds exactly the available, active components that
/// declare `service` once a pass has converged.
#[derive(Debug, Clone)]
pub(crate) struct DependencyEdge {
    pub(crate) service: ServiceInfo,
    pub(crate) minimum: usize,
    pub(crate) dynamic: bool,
    pub(crate) providers: BTreeSet<ComponentId>,
}

impl DependencyEdge {
    pub(crate) fn new(service: ServiceInfo, spec: DependencySpec) -> Self {
        Self {
            service,
            minimum: spec.effective_minimum(),
            dynamic: spec.is_dynamic(),
            providers: BTreeSet::new(),
        }
    }

    pub(crate) fn service_id(&self) -> ServiceId {
        self.service.id
    }

    /// Literally met by the current provider set. Always true for minimum 0.
    pub(crate) fn is_met(&self) -> bool {
        self.providers.len() >= self.minimum
    }

    pub(crate) fn deficit(&self) -> usize {
        self.minimum.saturating_sub(self.providers.len())
    }

    /// Returns whether the provider set changed.
    pub(crate) fn replace_providers(&mut self, providers: BTreeSet<ComponentId>) -> bool {
        if self.providers == providers {
            return false;
        }
        self.providers = providers;
        true
    }
}

/// Diagnostic snapshot of a dependency edge as last published by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub service: ServiceInfo,
    pub minimum: usize,
    pub dynamic: bool,
    pub providers: Vec<String>,
}

impl DependencyInfo {
    pub fn is_met(&self) -> bool {
        self.providers.len() >= self.minimum
    }
}

impl fmt::Display for DependencyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}{}]",
            self.service,
            self.providers.len(),
            self.minimum,
            if self.dynamic { ", dynamic" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use dsr_common::model::Service;

    use super::*;

    fn edge(spec: DependencySpec) -> DependencyEdge {
        DependencyEdge::new(Service::<u8>::new("bytes").info(), spec)
    }

    #[test]
    fn zero_minimum_is_always_met() {
        let e = edge(DependencySpec::new().minimum(0));
        assert!(e.is_met());
        assert_eq!(e.deficit(), 0);
        assert!(edge(DependencySpec::new().minimum(4).optional()).is_met());
    }

    #[test]
    fn cardinality_tracks_provider_count() {
        let mut e = edge(DependencySpec::new().minimum(2).dynamic(true));
        assert!(e.dynamic);
        assert_eq!(e.deficit(), 2);

        let one: BTreeSet<_> = [ComponentId::from_raw(1)].into_iter().collect();
        assert!(e.replace_providers(one.clone()));
        assert!(!e.replace_providers(one));
        assert!(!e.is_met());

        let two: BTreeSet<_> = [ComponentId::from_raw(1), ComponentId::from_raw(2)]
            .into_iter()
            .collect();
        assert!(e.replace_providers(two));
        assert!(e.is_met());
    }

    #[test]
    fn info_renders_for_diagnostics() {
        let info = DependencyInfo {
            service: Service::<u8>::new("bytes").info(),
            minimum: 2,
            dynamic: true,
            providers: vec!["reader".into()],
        };
        assert!(!info.is_met());
        assert!(info.to_string().ends_with("[1/2, dynamic]"));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["providers"][0], "reader");
        assert_eq!(json["service"]["name"], "bytes");
    }
}
