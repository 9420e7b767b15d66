// dsr-common/src/events.rs
use serde::{Deserialize, Serialize};

use crate::model::{ComponentStage, InitPhase};

/// Registry-wide notifications, delivered after a resolution pass has
/// converged and per-component observables have fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    ComponentAdded {
        name: String,
    },
    StageChanged {
        name: String,
        from: ComponentStage,
        to: ComponentStage,
    },
    AvailabilityChanged {
        name: String,
        available: bool,
    },
    PhaseChanged {
        from: InitPhase,
        to: InitPhase,
    },
    PassFinished {
        steps: usize,
        transitions: usize,
    },
    Closed,
}

impl RegistryEvent {
    pub fn stage_changed(name: impl Into<String>, from: ComponentStage, to: ComponentStage) -> Self {
        Self::StageChanged {
            name: name.into(),
            from,
            to,
        }
    }

    /// Name of the component the event is about, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::ComponentAdded { name }
            | Self::StageChanged { name, .. }
            | Self::AvailabilityChanged { name, .. } => Some(name),
            Self::PhaseChanged { .. } | Self::PassFinished { .. } | Self::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let ev = RegistryEvent::stage_changed(
            "db",
            ComponentStage::Unsatisfied,
            ComponentStage::Satisfied,
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "stage_changed");
        assert_eq!(json["from"], "unsatisfied");
        assert_eq!(ev.component(), Some("db"));
        assert_eq!(RegistryEvent::Closed.component(), None);
    }
}
