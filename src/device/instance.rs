//! Instance management.
//!
//! Every bound signal carries an [`InstanceTable`]: the set of active
//! instance ids (each stamped with its activation order), the endpoint that
//! reserved each id, and the last value written per instance.
//!
//! A new signal starts with the default instance 0 active and unclaimed.
//! Reserving any other id drops it, unless an endpoint claimed 0 itself.
//! At most `capacity` instances are active; activating one more applies the
//! signal's [`StealMode`].

use super::binder::BoundSignal;
use super::{offline, DeviceState};
use crate::buffer::ValueBuffer;
use crate::config::InstanceDirective;
use crate::endpoint::EndpointHandle;
use crate::error::{MapScopeError, Result};
use crate::host::IndexResolver;
use crate::id::{EndpointId, InstanceId};
use crate::network::{NetworkDevice, SignalEvent, SignalEventKind};
use crate::sync::lock;
use crate::types::{Atom, EndpointOutput, ReleaseOrigin, SignalValue, StealMode, Timetag};
use std::collections::{BTreeMap, HashMap};

/// Result of activating an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Already active
    Existing,
    /// Newly active, under capacity
    Activated,
    /// Newly active after releasing the stolen instance
    Stole(InstanceId),
    /// At capacity and nothing may be stolen
    Overflow,
}

/// Result of reserving an instance for an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// The unclaimed default instance was dropped
    pub dropped_default: bool,
    /// Instances the endpoint owned before, now released
    pub replaced: Vec<InstanceId>,
    pub activation: Activation,
}

#[derive(Debug, Clone)]
pub struct InstanceTable {
    active: BTreeMap<InstanceId, u64>,
    owners: BTreeMap<InstanceId, EndpointId>,
    values: HashMap<InstanceId, SignalValue>,
    capacity: usize,
    steal: StealMode,
    clock: u64,
}

impl InstanceTable {
    pub fn new(capacity: usize, steal: StealMode) -> Self {
        let mut active = BTreeMap::new();
        active.insert(InstanceId::DEFAULT, 0);
        Self {
            active,
            owners: BTreeMap::new(),
            values: HashMap::new(),
            capacity: capacity.max(1),
            steal,
            clock: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn steal_mode(&self) -> StealMode {
        self.steal
    }

    pub fn set_steal_mode(&mut self, steal: StealMode) {
        self.steal = steal;
    }

    pub fn is_active(&self, id: InstanceId) -> bool {
        self.active.contains_key(&id)
    }

    /// Active ids in ascending id order
    pub fn active_ids(&self) -> Vec<InstanceId> {
        self.active.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn owner(&self, id: InstanceId) -> Option<EndpointId> {
        self.owners.get(&id).copied()
    }

    /// Whether updates need an instance id to be told apart
    pub fn is_instanced(&self) -> bool {
        !self.owners.is_empty() || self.active.keys().any(|id| !id.is_default())
    }

    pub fn value(&self, id: InstanceId) -> Option<&SignalValue> {
        self.values.get(&id)
    }

    pub fn set_value(&mut self, id: InstanceId, value: SignalValue) {
        self.values.insert(id, value);
    }

    /// Claim `id` for `owner` and activate it. An endpoint owns one
    /// instance, so anything it held before is released.
    pub fn reserve(&mut self, id: InstanceId, owner: EndpointId) -> Reservation {
        let replaced: Vec<InstanceId> = self
            .owners
            .iter()
            .filter(|(i, o)| **o == owner && **i != id)
            .map(|(i, _)| *i)
            .collect();
        for old in &replaced {
            self.owners.remove(old);
            self.release(*old);
        }

        let dropped_default = !id.is_default()
            && !self.owners.contains_key(&InstanceId::DEFAULT)
            && self.release(InstanceId::DEFAULT);

        self.owners.insert(id, owner);
        let activation = self.activate(id);
        Reservation {
            dropped_default,
            replaced,
            activation,
        }
    }

    pub fn activate(&mut self, id: InstanceId) -> Activation {
        if self.active.contains_key(&id) {
            return Activation::Existing;
        }
        if self.active.len() < self.capacity {
            self.stamp(id);
            return Activation::Activated;
        }

        let Some(victim) = self.steal_victim() else {
            return Activation::Overflow;
        };
        self.release(victim);
        self.stamp(id);
        Activation::Stole(victim)
    }

    /// The active instance the steal mode would give up, by activation order
    pub fn steal_victim(&self) -> Option<InstanceId> {
        let victim = match self.steal {
            StealMode::None => return None,
            StealMode::Oldest => self.active.iter().min_by_key(|(_, order)| **order),
            StealMode::Newest => self.active.iter().max_by_key(|(_, order)| **order),
        };
        victim.map(|(id, _)| *id)
    }

    fn stamp(&mut self, id: InstanceId) {
        self.active.insert(id, self.clock);
        self.clock += 1;
    }

    /// Deactivate `id`. Ownership survives so the owner can reactivate it.
    pub fn release(&mut self, id: InstanceId) -> bool {
        self.values.remove(&id);
        self.active.remove(&id).is_some()
    }

    /// Drop every claim of `owner`, returning the ids that were active
    pub fn forget_owner(&mut self, owner: EndpointId) -> Vec<InstanceId> {
        let owned: Vec<InstanceId> = self
            .owners
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(i, _)| *i)
            .collect();
        owned
            .into_iter()
            .filter(|id| {
                self.owners.remove(id);
                self.release(*id)
            })
            .collect()
    }
}

impl BoundSignal {
    fn owning_endpoint(&self, id: InstanceId) -> Option<&EndpointHandle> {
        let owner = self.instances.owner(id)?;
        self.endpoints.iter().find(|ep| ep.id() == owner)
    }

    /// Tell the owner of `id` it was released, or everyone when unowned
    pub(crate) fn notify_release(&self, id: InstanceId, origin: ReleaseOrigin) {
        match self.owning_endpoint(id) {
            Some(owner) => owner.emit(EndpointOutput::Release {
                instance: None,
                origin,
            }),
            None => {
                for ep in &self.endpoints {
                    ep.emit(EndpointOutput::Release {
                        instance: Some(id),
                        origin,
                    });
                }
            }
        }
    }

    pub(crate) fn notify_overflow(&self, id: InstanceId) {
        tracing::warn!("'{}': instance {} overflow", self.spec.name, id);
        for ep in &self.endpoints {
            ep.emit(EndpointOutput::Overflow { instance: id });
        }
    }

    /// Activate `id` for an update. Returns false when the update must be
    /// dropped.
    pub(crate) fn admit(
        &mut self,
        id: InstanceId,
        network: &mut dyn NetworkDevice,
        time: Timetag,
    ) -> bool {
        match self.instances.activate(id) {
            Activation::Existing | Activation::Activated => true,
            Activation::Stole(victim) => {
                tracing::debug!("'{}': instance {} stolen for {}", self.spec.name, victim, id);
                network.release_instance(self.key, victim, time);
                self.notify_release(victim, ReleaseOrigin::Local);
                true
            }
            Activation::Overflow => {
                self.notify_overflow(id);
                false
            }
        }
    }

    /// Answer an overflow raised by the network for `id`: give up an active
    /// instance under the steal mode, or tell every endpoint.
    fn relieve_overflow(&mut self, id: InstanceId, network: &mut dyn NetworkDevice, time: Timetag) {
        let Some(victim) = self.instances.steal_victim() else {
            self.notify_overflow(id);
            return;
        };
        tracing::debug!("'{}': instance {} stolen on overflow of {}", self.spec.name, victim, id);
        self.instances.release(victim);
        network.release_instance(self.key, victim, time);
        self.notify_release(victim, ReleaseOrigin::Local);
    }

    /// Deliver an incoming value to the owner of `id`, or broadcast it
    fn deliver(&self, id: InstanceId, value: &SignalValue, buffer: &mut ValueBuffer) {
        if let Some(owner) = self.owning_endpoint(id) {
            owner.emit(buffer.to_output(value, None));
            return;
        }
        let prefix = (self.instances.active_count() > 1).then_some(id);
        let output = buffer.to_output(value, prefix);
        for ep in &self.endpoints {
            ep.emit(output.clone());
        }
    }

    /// Apply one network event to this signal
    pub(crate) fn route(
        &mut self,
        event: SignalEvent,
        buffer: &mut ValueBuffer,
        network: &mut dyn NetworkDevice,
    ) {
        let id = event.instance;
        let origin = match event.kind {
            SignalEventKind::Update(Some(value)) => {
                let value = value.cast(self.spec.signal_type);
                if !self.admit(id, network, event.time) {
                    return;
                }
                self.deliver(id, &value, buffer);
                self.instances.set_value(id, value);
                return;
            }
            SignalEventKind::Overflow => {
                self.relieve_overflow(id, network, event.time);
                return;
            }
            SignalEventKind::Update(None) if !self.instances.is_instanced() => {
                tracing::debug!("'{}': value-less update ignored", self.spec.name);
                return;
            }
            SignalEventKind::Update(None) => ReleaseOrigin::Local,
            SignalEventKind::UpstreamRelease => ReleaseOrigin::Upstream,
            SignalEventKind::DownstreamRelease => ReleaseOrigin::Downstream,
        };
        self.notify_release(id, origin);
        self.instances.release(id);
    }
}

impl DeviceState {
    /// Write a host list to the endpoint's signal under this tick's timetag
    pub(super) fn write_atoms(&mut self, endpoint: &EndpointHandle, atoms: &[Atom]) -> Result<()> {
        let network = self.network.as_deref_mut().ok_or_else(offline)?;
        let (key, instance) = {
            let state = lock(&endpoint.state);
            (state.signal, state.instance)
        };
        let key = key.ok_or_else(|| {
            MapScopeError::Lookup(format!("'{}' has no bound signal", endpoint.name()))
        })?;
        let signal = self
            .binder
            .get_mut(key)
            .ok_or_else(|| MapScopeError::Lookup(format!("no signal for {:?}", key)))?;

        let value = self
            .buffer
            .parse_list(atoms, signal.spec.signal_type, signal.spec.length)?;
        let time = self.queue.maybe_start(network);

        let id = instance.unwrap_or_default();
        if !signal.admit(id, network, time) {
            return Ok(());
        }

        let mut last = None;
        for chunk in value.chunks(signal.spec.length) {
            network.update(key, instance, &chunk, time);
            last = Some(chunk);
        }
        if let Some(last) = last {
            signal.instances.set_value(id, last);
        }
        Ok(())
    }

    /// Release the endpoint's own instance under this tick's timetag
    pub(super) fn release_local(&mut self, endpoint: &EndpointHandle) -> Result<()> {
        let (key, instance) = {
            let state = lock(&endpoint.state);
            (state.signal, state.instance)
        };
        let Some(id) = instance else {
            return Ok(());
        };
        let network = self.network.as_deref_mut().ok_or_else(offline)?;
        let key = key.ok_or_else(|| {
            MapScopeError::Lookup(format!("'{}' has no bound signal", endpoint.name()))
        })?;
        let signal = self
            .binder
            .get_mut(key)
            .ok_or_else(|| MapScopeError::Lookup(format!("no signal for {:?}", key)))?;

        let time = self.queue.maybe_start(network);
        if signal.instances.release(id) {
            network.release_instance(key, id, time);
        } else {
            tracing::debug!("'{}': instance {} is not active", signal.spec.name, id);
        }
        Ok(())
    }

    /// Reserve the instance named by `directive` for `endpoint`
    pub(super) fn assign_instance(
        &mut self,
        endpoint: &EndpointHandle,
        directive: InstanceDirective,
        resolver: &IndexResolver,
    ) -> Result<()> {
        let id = match directive {
            InstanceDirective::Id(id) => id,
            InstanceDirective::FromIndex => {
                resolver(endpoint.container()).map(InstanceId).ok_or_else(|| {
                    MapScopeError::Lookup(format!(
                        "no index for container {} of '{}'",
                        endpoint.container(),
                        endpoint.name()
                    ))
                })?
            }
        };

        let network = self.network.as_deref_mut().ok_or_else(offline)?;
        let key = lock(&endpoint.state).signal.ok_or_else(|| {
            MapScopeError::Lookup(format!("'{}' has no bound signal", endpoint.name()))
        })?;
        let signal = self
            .binder
            .get_mut(key)
            .ok_or_else(|| MapScopeError::Lookup(format!("no signal for {:?}", key)))?;

        let reservation = signal.instances.reserve(id, endpoint.id());
        if !reservation.replaced.is_empty() {
            let time = self.queue.maybe_start(network);
            for old in &reservation.replaced {
                network.release_instance(key, *old, time);
            }
        }
        match reservation.activation {
            Activation::Stole(victim) => {
                let time = self.queue.maybe_start(network);
                network.release_instance(key, victim, time);
                signal.notify_release(victim, ReleaseOrigin::Local);
            }
            Activation::Overflow => signal.notify_overflow(id),
            Activation::Existing | Activation::Activated => {}
        }

        lock(&endpoint.state).instance = Some(id);
        tracing::debug!(
            "{} reserved instance {} on '{}'{}",
            endpoint.id(),
            id,
            signal.spec.name,
            if reservation.dropped_default {
                " (default instance dropped)"
            } else {
                ""
            }
        );
        Ok(())
    }

    /// Route one drained network event to its signal
    pub(super) fn route_event(&mut self, event: SignalEvent) {
        let Some(network) = self.network.as_deref_mut() else {
            return;
        };
        match self.binder.get_mut(event.key) {
            Some(signal) => signal.route(event, &mut self.buffer, network),
            None => tracing::debug!("event for unknown {:?} ignored", event.key),
        }
    }
}
