//! Host-side collaborators.
//!
//! The engine never owns the container hierarchy; it only asks the host two
//! questions through [`ContainerTree`]: who is the parent of a container,
//! and what lives below it. [`HostTree`] is an in-memory implementation used
//! by the demo binary and the tests.
//!
//! [`HostContext`] bundles everything a device or endpoint needs from its
//! environment: the tree, the scope table, the network backend, the engine
//! config and the instance-index resolver.

use crate::config::EngineConfig;
use crate::device::{Device, DeviceCore};
use crate::endpoint::{Endpoint, EndpointCore, EndpointHandle};
use crate::error::{MapScopeError, Result};
use crate::id::{ContainerId, DeviceId, EndpointId};
use crate::network::NetworkBackend;
use crate::registry::ScopeTable;
use crate::sync::{read, write};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock, Weak};

/// An object found while iterating a container
#[derive(Clone)]
pub enum HostObject {
    Device(DeviceId),
    Endpoint(EndpointHandle),
    /// Anything the engine does not care about
    Other,
}

/// Read-only view of the host's container hierarchy
pub trait ContainerTree: Send + Sync {
    /// Parent of `container`, or `None` at the root
    fn parent_of(&self, container: ContainerId) -> Option<ContainerId>;

    /// Visit every object in `container` and all of its descendants,
    /// depth first. The visitor may stop the walk early.
    fn deep_iterate(
        &self,
        container: ContainerId,
        visitor: &mut dyn FnMut(&HostObject) -> ControlFlow<()>,
    );
}

/// Resolves the external index (e.g. voice number) of a container
pub type IndexResolver = Arc<dyn Fn(ContainerId) -> Option<i64> + Send + Sync>;

enum Placed {
    Device(DeviceId, Weak<DeviceCore>),
    Endpoint(EndpointId, Weak<EndpointCore>),
    Other,
}

#[derive(Default)]
struct Node {
    parent: Option<ContainerId>,
    children: Vec<ContainerId>,
    objects: Vec<Placed>,
    index: Option<i64>,
}

#[derive(Default)]
struct TreeState {
    nodes: HashMap<ContainerId, Node>,
    next_id: u32,
}

/// In-memory container hierarchy
pub struct HostTree {
    state: RwLock<TreeState>,
}

impl Default for HostTree {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTree {
    /// Create a tree holding only the root container
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ContainerId::ROOT, Node::default());
        Self {
            state: RwLock::new(TreeState { nodes, next_id: 1 }),
        }
    }

    /// Add a child container under `parent`
    pub fn add_container(&self, parent: ContainerId) -> Result<ContainerId> {
        let mut state = write(&self.state);
        if !state.nodes.contains_key(&parent) {
            return Err(MapScopeError::Lookup(format!("no container {}", parent)));
        }
        let id = ContainerId(state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id,
            Node {
                parent: Some(parent),
                ..Default::default()
            },
        );
        if let Some(node) = state.nodes.get_mut(&parent) {
            node.children.push(id);
        }
        Ok(id)
    }

    /// Make a device visible to descendant walks of its ancestors
    pub fn place_device(&self, container: ContainerId, device: &Device) -> Result<()> {
        let placed = Placed::Device(device.id(), Arc::downgrade(device.core()));
        self.place(container, placed)
    }

    /// Make an endpoint visible to a device created later in an enclosing
    /// container
    pub fn place_endpoint(&self, container: ContainerId, endpoint: &Endpoint) -> Result<()> {
        let placed = Placed::Endpoint(endpoint.id(), Arc::downgrade(endpoint.handle()));
        self.place(container, placed)
    }

    /// Place an object the engine ignores
    pub fn place_other(&self, container: ContainerId) -> Result<()> {
        self.place(container, Placed::Other)
    }

    fn place(&self, container: ContainerId, placed: Placed) -> Result<()> {
        let mut state = write(&self.state);
        let node = state
            .nodes
            .get_mut(&container)
            .ok_or_else(|| MapScopeError::Lookup(format!("no container {}", container)))?;
        node.objects.push(placed);
        Ok(())
    }

    /// Remove an endpoint from its container
    pub fn remove_endpoint(&self, container: ContainerId, id: EndpointId) {
        let mut state = write(&self.state);
        if let Some(node) = state.nodes.get_mut(&container) {
            node.objects
                .retain(|p| !matches!(p, Placed::Endpoint(ep, _) if *ep == id));
        }
    }

    /// Remove a device from its container
    pub fn remove_device(&self, container: ContainerId, id: DeviceId) {
        let mut state = write(&self.state);
        if let Some(node) = state.nodes.get_mut(&container) {
            node.objects
                .retain(|p| !matches!(p, Placed::Device(dev, _) if *dev == id));
        }
    }

    /// Assign the external index of a container (a voice number)
    pub fn set_index(&self, container: ContainerId, index: i64) -> Result<()> {
        let mut state = write(&self.state);
        let node = state
            .nodes
            .get_mut(&container)
            .ok_or_else(|| MapScopeError::Lookup(format!("no container {}", container)))?;
        node.index = Some(index);
        Ok(())
    }

    /// Index of the nearest enclosing container that has one
    pub fn index_of(&self, container: ContainerId) -> Option<i64> {
        let state = read(&self.state);
        let mut current = Some(container);
        while let Some(id) = current {
            let node = state.nodes.get(&id)?;
            if node.index.is_some() {
                return node.index;
            }
            current = node.parent;
        }
        None
    }

    /// Resolver backed by [`HostTree::index_of`]
    pub fn index_resolver(self: &Arc<Self>) -> IndexResolver {
        let tree = Arc::downgrade(self);
        Arc::new(move |container| tree.upgrade().and_then(|t| t.index_of(container)))
    }

    /// Snapshot a subtree so the visitor runs without the tree lock held
    fn collect(&self, container: ContainerId) -> Vec<HostObject> {
        let state = read(&self.state);
        let mut out = Vec::new();
        let mut stack = vec![container];
        while let Some(id) = stack.pop() {
            let Some(node) = state.nodes.get(&id) else {
                continue;
            };
            for placed in &node.objects {
                match placed {
                    Placed::Device(id, core) => {
                        if core.strong_count() > 0 {
                            out.push(HostObject::Device(*id));
                        }
                    }
                    Placed::Endpoint(_, core) => {
                        if let Some(handle) = core.upgrade() {
                            out.push(HostObject::Endpoint(handle));
                        }
                    }
                    Placed::Other => out.push(HostObject::Other),
                }
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }
}

impl ContainerTree for HostTree {
    fn parent_of(&self, container: ContainerId) -> Option<ContainerId> {
        read(&self.state).nodes.get(&container).and_then(|n| n.parent)
    }

    fn deep_iterate(
        &self,
        container: ContainerId,
        visitor: &mut dyn FnMut(&HostObject) -> ControlFlow<()>,
    ) {
        for object in self.collect(container) {
            if visitor(&object).is_break() {
                break;
            }
        }
    }
}

/// Explicit environment shared by every device and endpoint of one host
#[derive(Clone)]
pub struct HostContext {
    tree: Arc<dyn ContainerTree>,
    scopes: Arc<ScopeTable>,
    network: Arc<dyn NetworkBackend>,
    config: Arc<EngineConfig>,
    resolver: IndexResolver,
}

impl HostContext {
    pub fn new(
        tree: Arc<dyn ContainerTree>,
        network: Arc<dyn NetworkBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tree,
            scopes: Arc::new(ScopeTable::new()),
            network,
            config: Arc::new(config),
            resolver: Arc::new(|_| None),
        }
    }

    /// Replace the instance-index resolver
    pub fn with_index_resolver(mut self, resolver: IndexResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn tree(&self) -> &dyn ContainerTree {
        self.tree.as_ref()
    }

    pub fn scopes(&self) -> &ScopeTable {
        &self.scopes
    }

    pub fn network(&self) -> &Arc<dyn NetworkBackend> {
        &self.network
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &IndexResolver {
        &self.resolver
    }
}
