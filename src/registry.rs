//! In-memory table of announced registrations.

use std::collections::HashMap;
use std::time::Duration;

use crate::container::Address;

/// Identifies one registration: a service name announced on behalf of one
/// container. Different containers may announce the same service name and
/// are tracked independently.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    pub service: String,
    pub container_id: String,
}

impl RegistrationKey {
    pub fn new(service: impl Into<String>, container_id: impl Into<String>) -> Self {
        RegistrationKey {
            service: service.into(),
            container_id: container_id.into(),
        }
    }
}

/// One announced service endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub key: RegistrationKey,
    pub address: Address,
    pub ttl: Duration,
}

/// Outcome of an upsert: whether the backend needs to hear about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    Changed,
    Unchanged,
}

/// Tracks which (service, container) pairs have been announced and at
/// which address. Only the beacon's reconciliation loop touches the
/// registry, so a plain map is enough.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<RegistrationKey, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Record `address` for `key`. Reports `Unchanged` when the key is
    /// already present at the same address, in which case the caller owes
    /// the backend nothing.
    pub fn upsert(&mut self, key: RegistrationKey, address: Address, ttl: Duration) -> Upsert {
        match self.entries.get(&key) {
            Some(existing) if existing.address == address => Upsert::Unchanged,
            _ => {
                self.entries
                    .insert(key.clone(), Registration { key, address, ttl });
                Upsert::Changed
            }
        }
    }

    /// Drop `key`, returning its registration. Removing a missing key is a
    /// no-op.
    pub fn remove(&mut self, key: &RegistrationKey) -> Option<Registration> {
        self.entries.remove(key)
    }

    /// Drop every registration owned by `container_id`.
    pub fn remove_container(&mut self, container_id: &str) -> Vec<Registration> {
        let mut removed = Vec::new();
        self.entries.retain(|key, entry| {
            if key.container_id == container_id {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Snapshot of everything currently announced.
    pub fn all(&self) -> Vec<Registration> {
        self.entries.values().cloned().collect()
    }

    /// Drop everything, returning the former registrations.
    pub fn drain(&mut self) -> Vec<Registration> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
