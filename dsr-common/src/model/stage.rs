// dsr-common/src/model/stage.rs
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a component in the resolution state machine.
///
/// `PreSatisfied` and `Satisfied` are the only stages in which a component
/// holds a value and counts as a provider. `Removed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStage {
    Defined,
    Unsatisfied,
    Unavailable,
    PreSatisfied,
    Satisfied,
    Removed,
}

impl ComponentStage {
    pub fn is_active(self) -> bool {
        matches!(self, ComponentStage::PreSatisfied | ComponentStage::Satisfied)
    }

    pub fn is_terminal(self) -> bool {
        self == ComponentStage::Removed
    }
}

impl fmt::Display for ComponentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Defined => "defined",
            Self::Unsatisfied => "unsatisfied",
            Self::Unavailable => "unavailable",
            Self::PreSatisfied => "pre-satisfied",
            Self::Satisfied => "satisfied",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Global initialization phase of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    Uninitialized,
    Initializing,
    PreInitialized,
    Initialized,
}

impl InitPhase {
    /// Components are only resolved past `Defined` once this holds.
    pub fn allows_resolution(self) -> bool {
        self >= InitPhase::PreInitialized
    }
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::PreInitialized => "pre-initialized",
            Self::Initialized => "initialized",
        };
        f.write_str(s)
    }
}
