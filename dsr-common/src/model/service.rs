// dsr-common/src/model/service.rs
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(u64);

impl ServiceId {
    fn next() -> Self {
        Self(NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc#{}", self.0)
    }
}

/// Typed capability key. Two services are equal only if one is a clone of the
/// other; constructing a second service with the same name yields a distinct
/// key.
pub struct Service<S: ?Sized> {
    id: ServiceId,
    name: Arc<str>,
    value_type: &'static str,
    _value: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + 'static> Service<S> {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            id: ServiceId::next(),
            name: Arc::from(name),
            value_type: std::any::type_name::<S>(),
            _value: PhantomData,
        }
    }
}

impl<S: ?Sized> Service<S> {
    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &'static str {
        self.value_type
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            id: self.id,
            name: self.name.to_string(),
            value_type: self.value_type.to_string(),
        }
    }
}

impl<S: ?Sized> Clone for Service<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            value_type: self.value_type,
            _value: PhantomData,
        }
    }
}

impl<S: ?Sized> PartialEq for Service<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<S: ?Sized> Eq for Service<S> {}

impl<S: ?Sized> Hash for Service<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<S: ?Sized> fmt::Debug for Service<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .finish()
    }
}

impl<S: ?Sized> fmt::Display for Service<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, self.value_type)
    }
}

/// Untyped description of a service, as reported by registry enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub name: String,
    pub value_type: String,
}

impl fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, self.value_type)
    }
}
