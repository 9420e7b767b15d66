use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DsError {
    #[error("Duplicate component name: '{0}' is already registered")]
    DuplicateComponent(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Component '{component}' declares service '{service}' as provided more than once")]
    DuplicateProvision { component: String, service: String },

    #[error("Component '{component}' declares a dependency on service '{service}' more than once")]
    DuplicateDependency { component: String, service: String },

    #[error("Component '{component}' has no dependency on service '{service}'")]
    UnknownDependency { component: String, service: String },

    #[error("Reentrant mutation rejected: {0}")]
    Reentrant(String),

    #[error("Invalid phase transition: {0}")]
    InvalidPhase(String),

    #[error("Registry is closed")]
    Closed,

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl DsError {
    /// Definition errors are raised by `inject`/`build` and never by a
    /// resolution pass.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            DsError::DuplicateComponent(_)
                | DsError::UnknownComponent(_)
                | DsError::DuplicateProvision { .. }
                | DsError::DuplicateDependency { .. }
                | DsError::UnknownDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DsError>;
