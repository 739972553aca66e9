//! Signal endpoints.
//!
//! An [`Endpoint`] is the host-owned handle of one typed, vector-valued
//! signal source or sink. On creation it joins the nearest enclosing scope
//! that has a registry; the device owning that registry binds it to a
//! network signal. Dropping the handle leaves the registry, which unbinds
//! the endpoint and releases whatever instance it owned.
//!
//! Properties given before the endpoint is bound are kept and applied at
//! bind time. The list is retained so a later device can re-apply it.

use crate::config::{EndpointArgs, InstanceDirective, PropertyDirective};
use crate::config::directives::parse_properties;
use crate::device::DeviceCore;
use crate::error::{MapScopeError, Result, ResultExt};
use crate::host::HostContext;
use crate::id::{ContainerId, EndpointId, InstanceId, SignalKey};
use crate::registry::ScopeRegistry;
use crate::sync::lock;
use crate::types::{Atom, Direction, EndpointOutput, SignalType};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

/// Shared handle to an endpoint's core
pub type EndpointHandle = Arc<EndpointCore>;

/// Binding state of an endpoint, guarded by the endpoint lock
#[derive(Default)]
pub(crate) struct EndpointState {
    /// Every property received so far, in order
    pub(crate) deferred: Vec<PropertyDirective>,
    /// Instance reserved on the bound signal; `Some` marks the endpoint instanced
    pub(crate) instance: Option<InstanceId>,
    pub(crate) device: Weak<DeviceCore>,
    pub(crate) signal: Option<SignalKey>,
    pub(crate) registry: Weak<ScopeRegistry>,
}

/// Identity and declaration of an endpoint, shared with the registry and
/// the bound signal
pub struct EndpointCore {
    id: EndpointId,
    container: ContainerId,
    name: String,
    direction: Direction,
    signal_type: SignalType,
    length: usize,
    outlet: Sender<EndpointOutput>,
    pub(crate) state: Mutex<EndpointState>,
}

impl EndpointCore {
    pub(crate) fn new(
        container: ContainerId,
        direction: Direction,
        args: EndpointArgs,
        outlet: Sender<EndpointOutput>,
    ) -> Self {
        Self {
            id: EndpointId::next(),
            container,
            name: args.name,
            direction,
            signal_type: args.signal_type,
            length: args.length,
            outlet,
            state: Mutex::new(EndpointState {
                deferred: args.properties,
                ..Default::default()
            }),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Declared signal name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    /// Declared vector length
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_bound(&self) -> bool {
        let state = lock(&self.state);
        state.signal.is_some() && state.device.strong_count() > 0
    }

    pub fn instance(&self) -> Option<InstanceId> {
        lock(&self.state).instance
    }

    /// Emit a message on the endpoint's outlet. A closed outlet means the
    /// host handle is going away; the message is dropped.
    pub(crate) fn emit(&self, output: EndpointOutput) {
        let _ = self.outlet.send(output);
    }

    pub(crate) fn device(&self) -> Option<Arc<DeviceCore>> {
        lock(&self.state).device.upgrade()
    }

    pub(crate) fn join(self: &Arc<Self>, registry: &Arc<ScopeRegistry>) {
        lock(&self.state).registry = Arc::downgrade(registry);
        registry.register(self.clone());
    }

    /// Leave the registry, which unbinds the endpoint if a device listens
    pub(crate) fn leave(&self) {
        let registry = std::mem::take(&mut lock(&self.state).registry);
        if let Some(registry) = registry.upgrade() {
            registry.unregister(self.id);
        }
    }

    /// Forget the device and registry after the device tore down
    pub(crate) fn detach(&self) {
        let mut state = lock(&self.state);
        state.device = Weak::new();
        state.signal = None;
        state.instance = None;
        state.registry = Weak::new();
    }
}

impl std::fmt::Debug for EndpointCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("type", &self.signal_type)
            .field("length", &self.length)
            .finish()
    }
}

/// Host-owned endpoint handle
pub struct Endpoint {
    core: EndpointHandle,
    outputs: Receiver<EndpointOutput>,
}

impl Endpoint {
    /// Create an endpoint in `container` from `<name> <type> [<length>]
    /// [@key value...]`. Fails when the arguments are unusable.
    pub fn new(
        ctx: &HostContext,
        container: ContainerId,
        direction: Direction,
        args: &[Atom],
    ) -> Result<Self> {
        let args = EndpointArgs::parse(args, ctx.config().max_vector_length)
            .with_context(|| format!("failed to create {} endpoint", direction))?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let core = Arc::new(EndpointCore::new(container, direction, args, tx));
        tracing::debug!(
            "created {} '{}' ({} {} x{})",
            core.id,
            core.name,
            core.direction,
            core.signal_type,
            core.length
        );

        if let Some(registry) = ctx.scopes().find_nearest(ctx.tree(), container) {
            core.join(&registry);
        }

        Ok(Self { core, outputs: rx })
    }

    pub fn id(&self) -> EndpointId {
        self.core.id
    }

    pub fn handle(&self) -> &EndpointHandle {
        &self.core
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn direction(&self) -> Direction {
        self.core.direction
    }

    pub fn is_bound(&self) -> bool {
        self.core.is_bound()
    }

    pub fn instance(&self) -> Option<InstanceId> {
        self.core.instance()
    }

    /// Messages emitted by this endpoint
    pub fn outputs(&self) -> &Receiver<EndpointOutput> {
        &self.outputs
    }

    pub fn drain_outputs(&self) -> Vec<EndpointOutput> {
        self.outputs.try_iter().collect()
    }

    pub fn send_int(&self, value: i64) -> Result<()> {
        self.send_list(&[Atom::Int(value)])
    }

    pub fn send_float(&self, value: f64) -> Result<()> {
        self.send_list(&[Atom::Float(value)])
    }

    /// Send a list of one or more whole vectors
    pub fn send_list(&self, atoms: &[Atom]) -> Result<()> {
        let device = self.bound_device()?;
        device.write_atoms(&self.core, atoms).inspect_err(|e| {
            tracing::warn!("{} '{}': update dropped: {}", self.core.id, self.core.name, e)
        })
    }

    /// Release this endpoint's instance. No-op for non-instanced endpoints.
    pub fn release(&self) -> Result<()> {
        if self.core.instance().is_none() {
            return Ok(());
        }
        self.bound_device()?.release_local(&self.core)
    }

    /// Assign the instance id, now if bound, otherwise at bind time
    pub fn set_instance(&self, directive: InstanceDirective) {
        self.apply(vec![PropertyDirective::Instance(directive)]);
    }

    /// Add `@key value...` properties
    pub fn add_properties(&self, atoms: &[Atom]) {
        let directives = parse_properties(atoms);
        if !directives.is_empty() {
            self.apply(directives);
        }
    }

    fn apply(&self, directives: Vec<PropertyDirective>) {
        let device = {
            let mut state = lock(&self.core.state);
            state.deferred.extend(directives.iter().cloned());
            state.device.upgrade()
        };
        if let Some(device) = device {
            device.apply_directives(&self.core, &directives);
        }
    }

    fn bound_device(&self) -> Result<Arc<DeviceCore>> {
        self.core.device().ok_or_else(|| {
            MapScopeError::Lookup(format!("'{}' is not bound to a device", self.core.name))
        })
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.core.leave();
        tracing::trace!("dropped {}", self.core.id);
    }
}
