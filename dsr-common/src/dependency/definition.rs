// dsr-common/src/dependency/definition.rs
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyFlags: u8 {
        /// May be assumed satisfiable before it is literally met.
        const DYNAMIC  = 0b00000001;
        /// Never blocks activation; the minimum is treated as zero.
        const OPTIONAL = 0b00000010;
    }
}

impl Default for DependencyFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for DependencyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("static");
        }
        write!(f, "{self:?}")
    }
}

/// Declaration of how a component relies on one service. Built up by the
/// configurator passed to `ComponentBuilder::depends`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub minimum: usize,
    #[serde(default)]
    pub flags: DependencyFlags,
}

impl DependencySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn minimum(mut self, minimum: usize) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.flags.set(DependencyFlags::DYNAMIC, dynamic);
        self
    }

    pub fn optional(mut self) -> Self {
        self.flags.insert(DependencyFlags::OPTIONAL);
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(DependencyFlags::DYNAMIC)
    }

    pub fn effective_minimum(&self) -> usize {
        if self.flags.contains(DependencyFlags::OPTIONAL) {
            0
        } else {
            self.minimum
        }
    }
}

impl Default for DependencySpec {
    fn default() -> Self {
        Self {
            minimum: 1,
            flags: DependencyFlags::empty(),
        }
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "min={} ({})", self.effective_minimum(), self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_static_provider() {
        let spec = DependencySpec::default();
        assert_eq!(spec.effective_minimum(), 1);
        assert!(!spec.is_dynamic());
        assert_eq!(spec.to_string(), "min=1 (static)");
    }

    #[test]
    fn optional_overrides_minimum() {
        let spec = DependencySpec::new().minimum(3).optional().dynamic(true);
        assert_eq!(spec.minimum, 3);
        assert_eq!(spec.effective_minimum(), 0);
        assert!(spec.is_dynamic());
        assert!(!spec.dynamic(false).is_dynamic());
    }
}
