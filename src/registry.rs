//! Scoped endpoint registry.
//!
//! A [`ScopeRegistry`] is installed at the container that holds a device and
//! collects every endpoint in that scope. Endpoints look it up by walking
//! outward from their own container ([`ScopeTable::find_nearest`]). Each
//! insertion or removal is published to the subscribed listeners, which is
//! how the device learns about endpoints it has to bind.
//!
//! Listener callbacks run on a snapshot taken after the registry lock is
//! released, so a listener may call back into the registry.

use crate::endpoint::EndpointHandle;
use crate::error::{MapScopeError, Result};
use crate::host::ContainerTree;
use crate::id::{ContainerId, EndpointId};
use crate::sync::lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Receives registry membership changes
pub trait RegistryListener: Send + Sync {
    fn on_added(&self, endpoint: &EndpointHandle);
    fn on_removed(&self, endpoint: &EndpointHandle);
}

/// Subscription handle returned by [`ScopeRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Endpoint table of one scope
pub struct ScopeRegistry {
    scope: ContainerId,
    entries: Mutex<Vec<(EndpointId, EndpointHandle)>>,
    listeners: Mutex<Vec<(ListenerId, Weak<dyn RegistryListener>)>>,
    next_listener: AtomicU64,
}

impl ScopeRegistry {
    pub fn new(scope: ContainerId) -> Self {
        Self {
            scope,
            entries: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn scope(&self) -> ContainerId {
        self.scope
    }

    pub fn subscribe(&self, listener: Weak<dyn RegistryListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(l, _)| *l != id);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Insert an endpoint and notify listeners. Returns false if it was
    /// already present.
    pub fn register(&self, endpoint: EndpointHandle) -> bool {
        {
            let mut entries = lock(&self.entries);
            if entries.iter().any(|(id, _)| *id == endpoint.id()) {
                tracing::debug!("{} already registered in scope {}", endpoint.id(), self.scope);
                return false;
            }
            entries.push((endpoint.id(), endpoint.clone()));
        }
        tracing::trace!("registered {} in scope {}", endpoint.id(), self.scope);
        for listener in self.live_listeners() {
            listener.on_added(&endpoint);
        }
        true
    }

    /// Remove an endpoint and notify listeners
    pub fn unregister(&self, id: EndpointId) -> Option<EndpointHandle> {
        let removed = {
            let mut entries = lock(&self.entries);
            let pos = entries.iter().position(|(e, _)| *e == id)?;
            entries.remove(pos).1
        };
        tracing::trace!("unregistered {} from scope {}", id, self.scope);
        for listener in self.live_listeners() {
            listener.on_removed(&removed);
        }
        Some(removed)
    }

    pub fn get(&self, id: EndpointId) -> Option<EndpointHandle> {
        lock(&self.entries)
            .iter()
            .find(|(e, _)| *e == id)
            .map(|(_, h)| h.clone())
    }

    /// Registered endpoints in insertion order
    pub fn entries(&self) -> Vec<EndpointHandle> {
        lock(&self.entries).iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_listeners(&self) -> Vec<Arc<dyn RegistryListener>> {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|(_, l)| l.strong_count() > 0);
        listeners.iter().filter_map(|(_, l)| l.upgrade()).collect()
    }
}

impl std::fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field("scope", &self.scope)
            .field("entries", &self.len())
            .finish()
    }
}

/// Map from container to the registry installed there
#[derive(Default)]
pub struct ScopeTable {
    scopes: Mutex<HashMap<ContainerId, Arc<ScopeRegistry>>>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, container: ContainerId) -> Option<Arc<ScopeRegistry>> {
        lock(&self.scopes).get(&container).cloned()
    }

    /// Create the registry of `container`. A container holds at most one.
    pub fn install(&self, container: ContainerId) -> Result<Arc<ScopeRegistry>> {
        let mut scopes = lock(&self.scopes);
        if scopes.contains_key(&container) {
            return Err(MapScopeError::Configuration(format!(
                "scope {} already has a registry",
                container
            )));
        }
        let registry = Arc::new(ScopeRegistry::new(container));
        scopes.insert(container, registry.clone());
        Ok(registry)
    }

    pub fn remove(&self, container: ContainerId) -> Option<Arc<ScopeRegistry>> {
        lock(&self.scopes).remove(&container)
    }

    /// Walk outward from `container` to the first scope with a registry
    pub fn find_nearest(
        &self,
        tree: &dyn ContainerTree,
        container: ContainerId,
    ) -> Option<Arc<ScopeRegistry>> {
        let mut current = Some(container);
        while let Some(id) = current {
            if let Some(registry) = self.get(id) {
                return Some(registry);
            }
            current = tree.parent_of(id);
        }
        None
    }

    pub fn len(&self) -> usize {
        lock(&self.scopes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointArgs;
    use crate::endpoint::EndpointCore;
    use crate::host::HostTree;
    use crate::types::{Atom, Direction};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, EndpointId)>>,
    }

    impl RegistryListener for Recorder {
        fn on_added(&self, endpoint: &EndpointHandle) {
            lock(&self.events).push(("added", endpoint.id()));
        }

        fn on_removed(&self, endpoint: &EndpointHandle) {
            lock(&self.events).push(("removed", endpoint.id()));
        }
    }

    fn endpoint(name: &str) -> EndpointHandle {
        let args = EndpointArgs::parse(&[Atom::symbol(name), Atom::symbol("f")], 100).unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        Arc::new(EndpointCore::new(ContainerId::ROOT, Direction::Out, args, tx))
    }

    #[test]
    fn test_register_notifies_in_order() {
        let registry = ScopeRegistry::new(ContainerId::ROOT);
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let first_dyn: Arc<dyn RegistryListener> = first.clone();
        let second_dyn: Arc<dyn RegistryListener> = second.clone();
        registry.subscribe(Arc::downgrade(&first_dyn));
        registry.subscribe(Arc::downgrade(&second_dyn));

        let ep = endpoint("freq");
        assert!(registry.register(ep.clone()));
        assert!(!registry.register(ep.clone()));
        assert!(registry.unregister(ep.id()).is_some());
        assert!(registry.unregister(ep.id()).is_none());

        let expected = vec![("added", ep.id()), ("removed", ep.id())];
        assert_eq!(*lock(&first.events), expected);
        assert_eq!(*lock(&second.events), expected);
    }

    #[test]
    fn test_unsubscribe_and_dead_listeners() {
        let registry = ScopeRegistry::new(ContainerId::ROOT);
        let kept = Arc::new(Recorder::default());
        let kept_dyn: Arc<dyn RegistryListener> = kept.clone();
        let id = registry.subscribe(Arc::downgrade(&kept_dyn));
        {
            let dropped: Arc<dyn RegistryListener> = Arc::new(Recorder::default());
            registry.subscribe(Arc::downgrade(&dropped));
        }

        registry.register(endpoint("a"));
        assert_eq!(registry.listener_count(), 1);

        registry.unsubscribe(id);
        registry.register(endpoint("b"));
        assert_eq!(lock(&kept.events).len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_install_rejects_second_registry() {
        let table = ScopeTable::new();
        assert!(table.install(ContainerId(3)).is_ok());
        let err = table.install(ContainerId(3)).unwrap_err();
        assert!(err.is_configuration());
        assert!(table.remove(ContainerId(3)).is_some());
        assert!(table.install(ContainerId(3)).is_ok());
    }

    #[test]
    fn test_find_nearest_walks_outward() {
        let tree = HostTree::new();
        let outer = tree.add_container(ContainerId::ROOT).unwrap();
        let inner = tree.add_container(outer).unwrap();
        let table = ScopeTable::new();

        assert!(table.find_nearest(&tree, inner).is_none());

        table.install(outer).unwrap();
        let found = table.find_nearest(&tree, inner).unwrap();
        assert_eq!(found.scope(), outer);
        assert!(table.find_nearest(&tree, ContainerId::ROOT).is_none());
    }
}
