// dsr-common/src/config.rs
use std::env;

use tracing::debug;

use super::error::{DsError, Result};

/// Upper bound on component re-evaluations within a single resolution pass.
/// Well-formed graphs converge long before this; hitting it means a bug.
const DEFAULT_MAX_RESOLUTION_STEPS: usize = 100_000;

const MAX_STEPS_ENV: &str = "DSR_MAX_RESOLUTION_STEPS";
const LOG_TRANSITIONS_ENV: &str = "DSR_LOG_TRANSITIONS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_resolution_steps: usize,
    /// Emit every stage transition at `debug` instead of `trace`.
    pub log_transitions: bool,
}

impl RegistryConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading dsr registry configuration");

        let max_resolution_steps = match env::var(MAX_STEPS_ENV).ok().filter(|s| !s.is_empty())
        {
            Some(raw) => {
                let steps = raw.trim().parse::<usize>().map_err(|e| {
                    DsError::Config(format!("{MAX_STEPS_ENV}='{raw}' is not a valid count: {e}"))
                })?;
                if steps == 0 {
                    return Err(DsError::Config(format!(
                        "{MAX_STEPS_ENV} must be greater than zero"
                    )));
                }
                steps
            }
            None => {
                debug!(
                    "{} not set, falling back to default: {}",
                    MAX_STEPS_ENV, DEFAULT_MAX_RESOLUTION_STEPS
                );
                DEFAULT_MAX_RESOLUTION_STEPS
            }
        };

        let log_transitions = match env::var(LOG_TRANSITIONS_ENV).ok() {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                DsError::Config(format!("{LOG_TRANSITIONS_ENV}='{raw}' is not a boolean"))
            })?,
            None => false,
        };

        debug!(
            "Configuration loaded: max_resolution_steps={}, log_transitions={}",
            max_resolution_steps, log_transitions
        );
        Ok(Self {
            max_resolution_steps,
            log_transitions,
        })
    }

    pub fn with_max_resolution_steps(mut self, steps: usize) -> Self {
        self.max_resolution_steps = steps.max(1);
        self
    }

    pub fn with_log_transitions(mut self, enabled: bool) -> Self {
        self.log_transitions = enabled;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_resolution_steps: DEFAULT_MAX_RESOLUTION_STEPS,
            log_transitions: false,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

pub fn load_config() -> Result<RegistryConfig> {
    RegistryConfig::load()
}
