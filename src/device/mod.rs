//! Device binding
//!
//! A [`Device`] owns one network device and the registry of its scope.
//! Creating it claims the scope: no other device may exist in an enclosing
//! or enclosed container. Endpoints already present below the device are
//! registered right away, so creation order does not matter.
//!
//! # Architecture
//!
//! - [`Device`] - host-owned handle; dropping it tears the binding down
//! - [`DeviceCore`] - shared state behind the handle, listener of the registry
//! - [`SignalBinder`] - bound signals keyed by the network correlation id
//! - [`InstanceTable`] - per-signal instance allocation
//! - [`UpdateQueue`] - one timetag per tick for outgoing updates
//! - [`PollLoop`] - periodic network service
//!
//! # Locking
//!
//! All device state sits behind one mutex, which also serializes value
//! writes from other threads against the poll tick. The device lock is
//! always taken before an endpoint lock and is never held while registry
//! listeners run or reports are emitted.

pub mod binder;
pub mod instance;
pub mod poll;
pub mod queue;

pub use binder::{BoundSignal, SignalBinder};
pub use instance::{Activation, InstanceTable, Reservation};
pub use poll::{PollHandle, PollLoop, TickOutcome};
pub use queue::UpdateQueue;

use crate::buffer::ValueBuffer;
use crate::config::{DeviceArgs, EngineConfig, PropertyDirective};
use crate::endpoint::EndpointHandle;
use crate::error::{MapScopeError, Result, ResultExt};
use crate::host::{HostContext, HostObject, IndexResolver};
use crate::id::{ContainerId, DeviceId, EndpointId, InstanceId};
use crate::network::{DeviceOptions, NetworkDevice, SignalEvent};
use crate::registry::{ListenerId, RegistryListener, ScopeRegistry};
use crate::sync::lock;
use crate::types::{Atom, DeviceReport, Direction, SignalValue};
use crossbeam_channel::{Receiver, Sender};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};

pub(crate) fn offline() -> MapScopeError {
    MapScopeError::Network("device is offline".to_string())
}

/// Mutable device state, guarded by the device lock
pub(crate) struct DeviceState {
    network: Option<Box<dyn NetworkDevice>>,
    binder: SignalBinder,
    queue: UpdateQueue,
    buffer: ValueBuffer,
    ready: bool,
    torn_down: bool,
    registry: Option<Arc<ScopeRegistry>>,
    listener: Option<ListenerId>,
}

/// Shared core of a device
pub struct DeviceCore {
    id: DeviceId,
    name: String,
    container: ContainerId,
    config: EngineConfig,
    resolver: IndexResolver,
    self_ref: Weak<DeviceCore>,
    reports: Sender<DeviceReport>,
    events: Receiver<SignalEvent>,
    state: Mutex<DeviceState>,
}

impl DeviceCore {
    fn report(&self, report: DeviceReport) {
        tracing::trace!("{} {}", report.selector(), report.value());
        let _ = self.reports.send(report);
    }

    fn report_count(&self, state: &DeviceState, direction: Direction) -> Option<DeviceReport> {
        let network = state.network.as_deref()?;
        Some(DeviceReport::count(direction, network.num_signals(direction)))
    }

    pub(crate) fn write_atoms(&self, endpoint: &EndpointHandle, atoms: &[Atom]) -> Result<()> {
        let mut state = lock(&self.state);
        if state.torn_down {
            return Err(offline());
        }
        state.write_atoms(endpoint, atoms)
    }

    pub(crate) fn release_local(&self, endpoint: &EndpointHandle) -> Result<()> {
        let mut state = lock(&self.state);
        if state.torn_down {
            return Err(offline());
        }
        state.release_local(endpoint)
    }

    /// Apply properties received after the endpoint was bound
    pub(crate) fn apply_directives(&self, endpoint: &EndpointHandle, directives: &[PropertyDirective]) {
        let mut state = lock(&self.state);
        if state.torn_down {
            return;
        }
        for directive in directives {
            if let Err(e) = state.apply_directive(endpoint, directive, &self.resolver) {
                tracing::warn!("{} '{}': {}", endpoint.id(), endpoint.name(), e);
            }
        }
    }

    fn bind(&self, endpoint: &EndpointHandle) {
        let report = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if state.torn_down {
                return;
            }
            let Some(network) = state.network.as_deref_mut() else {
                return;
            };

            let bound = match state.binder.bind(endpoint, network, &self.config) {
                Ok(bound) => bound,
                Err(e) => {
                    tracing::warn!("{}", e.with_context(format!("cannot bind {}", endpoint.id())));
                    return;
                }
            };

            let directives = {
                let mut ep = lock(&endpoint.state);
                ep.device = self.self_ref.clone();
                ep.signal = Some(bound.key);
                ep.deferred.clone()
            };
            for directive in &directives {
                // a joining endpoint only brings its instance
                if !bound.created && !matches!(directive, PropertyDirective::Instance(_)) {
                    continue;
                }
                if let Err(e) = state.apply_directive(endpoint, directive, &self.resolver) {
                    tracing::warn!("{} '{}': {}", endpoint.id(), endpoint.name(), e);
                }
            }

            self.report_count(state, endpoint.direction())
        };

        if let Some(report) = report {
            self.report(report);
        }
    }

    fn unbind(&self, endpoint: &EndpointHandle) {
        let report = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if state.torn_down || lock(&endpoint.state).signal.is_none() {
                return;
            }
            let Some(network) = state.network.as_deref_mut() else {
                return;
            };

            match state.binder.unbind(endpoint, network) {
                Ok(unbound) => {
                    if !unbound.released.is_empty() {
                        let time = state.queue.maybe_start(network);
                        for id in &unbound.released {
                            network.release_instance(unbound.key, *id, time);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("{}", e.with_context(format!("cannot unbind {}", endpoint.id())));
                }
            }

            {
                let mut ep = lock(&endpoint.state);
                ep.device = Weak::new();
                ep.signal = None;
                ep.instance = None;
            }
            self.report_count(state, endpoint.direction())
        };

        if let Some(report) = report {
            self.report(report);
        }
    }
}

impl RegistryListener for DeviceCore {
    fn on_added(&self, endpoint: &EndpointHandle) {
        self.bind(endpoint);
    }

    fn on_removed(&self, endpoint: &EndpointHandle) {
        self.unbind(endpoint);
    }
}

/// Host-owned device handle
pub struct Device {
    core: Arc<DeviceCore>,
    ctx: HostContext,
    reports: Receiver<DeviceReport>,
    poller: Option<PollHandle>,
}

impl Device {
    /// Create a device in `container` from `[<alias>] [@alias name]
    /// [@interface name] [@key value...]`.
    ///
    /// Fails with a configuration error when another device already owns
    /// an enclosing or enclosed scope.
    pub fn new(ctx: &HostContext, container: ContainerId, args: &[Atom]) -> Result<Self> {
        let config = ctx.config().clone();
        let args = DeviceArgs::parse(args);
        let name = args.name(&config.default_device_name);
        let options = DeviceOptions {
            interface: args.interface.clone(),
        };

        match &options.interface {
            Some(iface) => tracing::info!("Connecting to network interface {}", iface),
            None => tracing::info!("Connecting to default network interface"),
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut network = ctx
            .network()
            .create(&name, &options, events_tx)
            .with_context(|| format!("failed to create device '{}'", name))?;

        let id = DeviceId::next();
        if let Err(e) = check_scope(ctx, container, id) {
            tracing::error!("{}", e);
            // the network device is released here
            return Err(e);
        }

        let registry = ctx.scopes().install(container)?;

        for (key, value) in args.properties {
            network.set_property(&key, value);
        }

        let (reports_tx, reports_rx) = crossbeam_channel::unbounded();
        let core = Arc::new_cyclic(|self_ref| DeviceCore {
            id,
            name: name.clone(),
            container,
            resolver: ctx.resolver().clone(),
            self_ref: self_ref.clone(),
            reports: reports_tx,
            events: events_rx,
            state: Mutex::new(DeviceState {
                network: Some(network),
                binder: SignalBinder::new(),
                queue: UpdateQueue::new(),
                buffer: ValueBuffer::new(config.max_list_length),
                ready: false,
                torn_down: false,
                registry: Some(registry.clone()),
                listener: None,
            }),
            config,
        });

        let listener: Weak<dyn RegistryListener> = Arc::downgrade(&core) as Weak<dyn RegistryListener>;
        let listener_id = registry.subscribe(listener);
        lock(&core.state).listener = Some(listener_id);

        // endpoints created before the device join now
        let mut existing = Vec::new();
        ctx.tree().deep_iterate(container, &mut |object| {
            if let HostObject::Endpoint(handle) = object {
                existing.push(handle.clone());
            }
            ControlFlow::Continue(())
        });
        for endpoint in existing {
            if lock(&endpoint.state).registry.strong_count() == 0 {
                endpoint.join(&registry);
            }
        }

        tracing::debug!("device '{}' ({:?}) owns scope {}", name, id, container);
        Ok(Self {
            core,
            ctx: ctx.clone(),
            reports: reports_rx,
            poller: None,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn container(&self) -> ContainerId {
        self.core.container
    }

    pub(crate) fn core(&self) -> &Arc<DeviceCore> {
        &self.core
    }

    /// Whether the network handshake completed
    pub fn is_ready(&self) -> bool {
        lock(&self.core.state).ready
    }

    /// Run one poll tick on the calling thread
    pub fn tick(&self) -> TickOutcome {
        self.core.tick()
    }

    /// Tick until ready, at most `max_ticks` times
    pub fn tick_until_ready(&self, max_ticks: usize) -> bool {
        for _ in 0..max_ticks {
            if self.is_ready() {
                return true;
            }
            self.tick();
        }
        self.is_ready()
    }

    /// Start the poll loop thread at the configured interval
    pub fn start(&mut self) -> Result<()> {
        if self.poller.as_ref().is_some_and(PollHandle::is_running) {
            return Ok(());
        }
        let interval = self.core.config.poll_interval();
        self.poller = Some(PollHandle::spawn(Arc::downgrade(&self.core), interval)?);
        Ok(())
    }

    /// Stop the poll loop thread
    pub fn stop(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
    }

    /// Reports emitted by this device
    pub fn reports(&self) -> &Receiver<DeviceReport> {
        &self.reports
    }

    pub fn drain_reports(&self) -> Vec<DeviceReport> {
        self.reports.try_iter().collect()
    }

    /// Number of network signals of one direction
    pub fn signal_count(&self, direction: Direction) -> usize {
        lock(&self.core.state)
            .network
            .as_deref()
            .map(|n| n.num_signals(direction))
            .unwrap_or(0)
    }

    /// Endpoints bound to a signal, in bind order
    pub fn bound_endpoints(&self, name: &str, direction: Direction) -> Vec<EndpointId> {
        lock(&self.core.state)
            .binder
            .find(name, direction)
            .map(BoundSignal::endpoint_ids)
            .unwrap_or_default()
    }

    /// Active instance ids of a signal
    pub fn active_instances(&self, name: &str, direction: Direction) -> Vec<InstanceId> {
        lock(&self.core.state)
            .binder
            .find(name, direction)
            .map(|s| s.instances().active_ids())
            .unwrap_or_default()
    }

    /// Last value written to one instance of a signal
    pub fn instance_value(
        &self,
        name: &str,
        direction: Direction,
        instance: InstanceId,
    ) -> Option<SignalValue> {
        lock(&self.core.state)
            .binder
            .find(name, direction)
            .and_then(|s| s.instances().value(instance).cloned())
    }

    fn teardown(&mut self) {
        self.stop();

        let (registry, listener) = {
            let mut state = lock(&self.core.state);
            (state.registry.take(), state.listener.take())
        };
        if let (Some(registry), Some(listener)) = (&registry, listener) {
            registry.unsubscribe(listener);
        }
        self.ctx.scopes().remove(self.core.container);

        let mut state = lock(&self.core.state);
        state.torn_down = true;
        let signals = state.binder.drain();
        for signal in &signals {
            for endpoint in &signal.endpoints {
                endpoint.detach();
            }
            if let Some(network) = state.network.as_deref_mut() {
                network.remove_signal(signal.key);
            }
        }
        // any endpoint registered but never bound must be free to rejoin
        if let Some(registry) = registry {
            for endpoint in registry.entries() {
                endpoint.detach();
            }
        }
        state.network = None;
        tracing::info!("device '{}' closed", self.core.name);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Refuse a device whose scope overlaps another device's
fn check_scope(ctx: &HostContext, container: ContainerId, id: DeviceId) -> Result<()> {
    let mut current = Some(container);
    while let Some(scope) = current {
        if ctx.scopes().get(scope).is_some() {
            return Err(MapScopeError::Configuration(format!(
                "another device already owns scope {} enclosing {}",
                scope, container
            )));
        }
        current = ctx.tree().parent_of(scope);
    }

    let mut found = None;
    ctx.tree().deep_iterate(container, &mut |object| match object {
        HostObject::Device(other) if *other != id => {
            found = Some(*other);
            ControlFlow::Break(())
        }
        _ => ControlFlow::Continue(()),
    });
    if let Some(other) = found {
        return Err(MapScopeError::Configuration(format!(
            "device {:?} already exists inside scope {}",
            other, container
        )));
    }
    Ok(())
}
