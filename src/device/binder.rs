//! Signal binding.
//!
//! The binder owns every [`BoundSignal`] of a device. Signals are keyed by
//! the [`SignalKey`] handed to the network and indexed by
//! `(name, direction)`, so endpoints declaring the same signal share one
//! network signal. The first endpoint fixes type and length; a later
//! endpoint that disagrees is refused.

use super::instance::InstanceTable;
use super::{offline, DeviceState};
use crate::config::{EngineConfig, PropertyDirective};
use crate::endpoint::EndpointHandle;
use crate::error::{MapScopeError, Result};
use crate::host::IndexResolver;
use crate::id::{EndpointId, InstanceId, SignalKey};
use crate::network::{NetworkDevice, SignalSpec, PROP_MAX, PROP_MIN};
use crate::sync::lock;
use crate::types::{Atom, Direction, PropertyValue, SignalType};
use std::collections::{BTreeMap, HashMap};

/// A network signal and the endpoints sharing it
pub struct BoundSignal {
    pub(crate) key: SignalKey,
    pub(crate) spec: SignalSpec,
    /// Bound endpoints in bind order
    pub(crate) endpoints: Vec<EndpointHandle>,
    pub(crate) instances: InstanceTable,
}

impl BoundSignal {
    pub fn key(&self) -> SignalKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn direction(&self) -> Direction {
        self.spec.direction
    }

    pub fn signal_type(&self) -> SignalType {
        self.spec.signal_type
    }

    pub fn length(&self) -> usize {
        self.spec.length
    }

    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.endpoints.iter().map(|ep| ep.id()).collect()
    }

    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }
}

/// Outcome of a successful bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bound {
    pub key: SignalKey,
    /// A network signal was created
    pub created: bool,
}

/// Outcome of a successful unbind
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Unbound {
    pub key: SignalKey,
    pub direction: Direction,
    /// The network signal was removed with its last endpoint
    pub removed: bool,
    /// Instances the endpoint owned that were still active
    pub released: Vec<InstanceId>,
}

#[derive(Default)]
pub struct SignalBinder {
    signals: BTreeMap<SignalKey, BoundSignal>,
    index: HashMap<(String, Direction), SignalKey>,
    next_key: u32,
}

impl SignalBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `endpoint` to its named signal, creating the network signal on
    /// first use
    pub(crate) fn bind(
        &mut self,
        endpoint: &EndpointHandle,
        network: &mut dyn NetworkDevice,
        config: &EngineConfig,
    ) -> Result<Bound> {
        let lookup = (endpoint.name().to_string(), endpoint.direction());

        if let Some(&key) = self.index.get(&lookup) {
            let signal = self
                .signals
                .get_mut(&key)
                .ok_or_else(|| MapScopeError::Lookup(format!("no signal for {:?}", key)))?;
            if signal.spec.signal_type != endpoint.signal_type()
                || signal.spec.length != endpoint.length()
            {
                return Err(MapScopeError::Binding(format!(
                    "signal '{}' is {} x{}, {} declares {} x{}",
                    signal.spec.name,
                    signal.spec.signal_type,
                    signal.spec.length,
                    endpoint.id(),
                    endpoint.signal_type(),
                    endpoint.length()
                )));
            }
            if !signal.endpoints.iter().any(|ep| ep.id() == endpoint.id()) {
                signal.endpoints.push(endpoint.clone());
            }
            return Ok(Bound {
                key,
                created: false,
            });
        }

        let key = self.allocate_key();
        let spec = SignalSpec {
            name: lookup.0.clone(),
            direction: lookup.1,
            signal_type: endpoint.signal_type(),
            length: endpoint.length(),
        };
        network
            .add_signal(key, &spec)
            .map_err(|e| e.with_context(format!("failed to add signal '{}'", spec.name)))?;
        tracing::debug!(
            "created {} signal '{}' ({} x{}) as {:?}",
            spec.direction,
            spec.name,
            spec.signal_type,
            spec.length,
            key
        );

        self.signals.insert(
            key,
            BoundSignal {
                key,
                spec,
                endpoints: vec![endpoint.clone()],
                instances: InstanceTable::new(config.instance_capacity, config.steal_mode),
            },
        );
        self.index.insert(lookup, key);
        Ok(Bound { key, created: true })
    }

    /// Remove `endpoint` from its signal, removing the network signal with
    /// the last endpoint
    pub(crate) fn unbind(
        &mut self,
        endpoint: &EndpointHandle,
        network: &mut dyn NetworkDevice,
    ) -> Result<Unbound> {
        let lookup = (endpoint.name().to_string(), endpoint.direction());
        let key = *self.index.get(&lookup).ok_or_else(|| {
            MapScopeError::Lookup(format!("no {} signal '{}'", lookup.1, lookup.0))
        })?;
        let signal = self
            .signals
            .get_mut(&key)
            .ok_or_else(|| MapScopeError::Lookup(format!("no signal for {:?}", key)))?;
        let pos = signal
            .endpoints
            .iter()
            .position(|ep| ep.id() == endpoint.id())
            .ok_or_else(|| {
                MapScopeError::Binding(format!(
                    "{} is not bound to signal '{}'",
                    endpoint.id(),
                    lookup.0
                ))
            })?;

        if signal.endpoints.len() == 1 {
            self.signals.remove(&key);
            self.index.remove(&lookup);
            network.remove_signal(key);
            tracing::debug!("removed {} signal '{}'", lookup.1, lookup.0);
            return Ok(Unbound {
                key,
                direction: lookup.1,
                removed: true,
                released: Vec::new(),
            });
        }

        signal.endpoints.remove(pos);
        Ok(Unbound {
            key,
            direction: lookup.1,
            removed: false,
            released: signal.instances.forget_owner(endpoint.id()),
        })
    }

    fn allocate_key(&mut self) -> SignalKey {
        loop {
            let key = SignalKey(self.next_key);
            self.next_key = self.next_key.wrapping_add(1);
            if key.is_valid() && !self.signals.contains_key(&key) {
                return key;
            }
        }
    }

    pub fn get(&self, key: SignalKey) -> Option<&BoundSignal> {
        self.signals.get(&key)
    }

    pub fn get_mut(&mut self, key: SignalKey) -> Option<&mut BoundSignal> {
        self.signals.get_mut(&key)
    }

    pub fn find(&self, name: &str, direction: Direction) -> Option<&BoundSignal> {
        self.index
            .get(&(name.to_string(), direction))
            .and_then(|key| self.signals.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundSignal> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Take every signal out of the binder
    pub(crate) fn drain(&mut self) -> Vec<BoundSignal> {
        self.index.clear();
        std::mem::take(&mut self.signals).into_values().collect()
    }
}

impl DeviceState {
    /// Apply one endpoint property to its bound signal
    pub(super) fn apply_directive(
        &mut self,
        endpoint: &EndpointHandle,
        directive: &PropertyDirective,
        resolver: &IndexResolver,
    ) -> Result<()> {
        if let PropertyDirective::Instance(instance) = directive {
            return self.assign_instance(endpoint, *instance, resolver);
        }

        let network = self.network.as_deref_mut().ok_or_else(offline)?;
        let key = lock(&endpoint.state).signal.ok_or_else(|| {
            MapScopeError::Lookup(format!("'{}' has no bound signal", endpoint.name()))
        })?;
        let signal = self
            .binder
            .get_mut(key)
            .ok_or_else(|| MapScopeError::Lookup(format!("no signal for {:?}", key)))?;

        match directive {
            PropertyDirective::Minimum(values) => set_extremum(network, signal, PROP_MIN, values)?,
            PropertyDirective::Maximum(values) => set_extremum(network, signal, PROP_MAX, values)?,
            PropertyDirective::Steal(mode) => {
                signal.instances.set_steal_mode(*mode);
                network.set_signal_property(key, "steal", PropertyValue::Str(vec![mode.to_string()]));
            }
            PropertyDirective::Meta { name, value } => {
                network.set_signal_property(key, name, value.clone());
            }
            PropertyDirective::Instance(_) => {}
        }
        Ok(())
    }
}

fn set_extremum(
    network: &mut dyn NetworkDevice,
    signal: &BoundSignal,
    property: &str,
    values: &[Atom],
) -> Result<()> {
    let value = PropertyDirective::expand_extremum(values, signal.spec.signal_type, signal.spec.length)
        .ok_or_else(|| {
            MapScopeError::Type(format!("@{} of '{}' is not numeric", property, signal.spec.name))
        })?;
    network.set_signal_property(signal.key, property, value.into());
    Ok(())
}
