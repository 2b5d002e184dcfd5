//! Local cache of services a system has discovered and consumes.

use dashmap::DashMap;

use super::description::ServiceDescription;

/// Identifies one cached service: its name and, if known, its provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    name: String,
    provider: Option<String>,
    base_path: String,
}

impl CacheKey {
    fn of(description: &ServiceDescription) -> Self {
        Self {
            name: description.name().to_string(),
            provider: description.provider().map(|p| p.system_name.clone()),
            base_path: description.base_path().to_string(),
        }
    }
}

/// Concurrent cache of consumed service descriptions.
#[derive(Debug, Default)]
pub struct ServiceCache {
    entries: DashMap<CacheKey, ServiceDescription>,
}

impl ServiceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `description`, replacing any entry for the same service.
    pub fn update(&self, description: ServiceDescription) {
        self.entries.insert(CacheKey::of(&description), description);
    }

    /// Returns every cached service named `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Vec<ServiceDescription> {
        self.entries
            .iter()
            .filter(|entry| entry.key().name == name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Returns every cached service matching `predicate`.
    #[must_use]
    pub fn find(&self, predicate: impl Fn(&ServiceDescription) -> bool) -> Vec<ServiceDescription> {
        self.entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Removes the entry for `description`'s service.
    pub fn remove(&self, description: &ServiceDescription) -> bool {
        self.entries.remove(&CacheKey::of(description)).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::service::description::{AccessPolicy, Encoding};

    fn description(name: &str, provider: &str, port: u16) -> ServiceDescription {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        ServiceDescription::new(name, format!("/{name}"), vec![Encoding::JSON], AccessPolicy::Unrestricted)
            .unwrap()
            .provided_by(provider, addr)
    }

    #[test]
    fn update_replaces_same_service() {
        let cache = ServiceCache::new();
        cache.update(description("temperature", "sensor-a", 9000));
        cache.update(description("temperature", "sensor-a", 9001));
        assert_eq!(cache.len(), 1);

        let cached = cache.get_by_name("temperature");
        assert_eq!(cached[0].provider().unwrap().addr.port(), 9001);
    }

    #[test]
    fn same_name_from_different_providers_coexist() {
        let cache = ServiceCache::new();
        cache.update(description("temperature", "sensor-a", 9000));
        cache.update(description("temperature", "sensor-b", 9000));
        cache.update(description("humidity", "sensor-a", 9000));

        assert_eq!(cache.get_by_name("temperature").len(), 2);
        assert_eq!(
            cache
                .find(|d| d.provider().is_some_and(|p| p.system_name == "sensor-a"))
                .len(),
            2
        );
    }

    #[test]
    fn remove_and_clear() {
        let cache = ServiceCache::new();
        let entry = description("temperature", "sensor-a", 9000);
        cache.update(entry.clone());
        assert!(cache.remove(&entry));
        assert!(!cache.remove(&entry));

        cache.update(entry);
        cache.clear();
        assert!(cache.is_empty());
    }
}
