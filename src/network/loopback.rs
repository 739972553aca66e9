//! In-process loopback network.
//!
//! Every device created through a [`LoopbackNetwork`] lives in one shared
//! table. Batches sent by a device are recorded so they can be inspected,
//! and output signals can be routed to input signals of other devices,
//! which turns the loopback into a tiny self-contained mapping network.
//! A dropped device keeps its record, batches included, until the next
//! device is created.
//!
//! Devices become ready after a configurable number of polls, standing in
//! for the discovery handshake of a real network.

use super::{
    DeviceOptions, NetworkBackend, NetworkDevice, SignalEvent, SignalEventKind, SignalSpec,
    PROP_HOST, PROP_INTERFACE, PROP_NAME, PROP_PORT,
};
use crate::config::EngineConfig;
use crate::error::{MapScopeError, Result};
use crate::id::{InstanceId, SignalKey};
use crate::sync::lock;
use crate::types::{Direction, PropertyValue, SignalValue, Timetag};
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOOPBACK_HOST: &str = "127.0.0.1";
const LOOPBACK_INTERFACE: &str = "lo";
const BASE_PORT: u16 = 9000;

/// One recorded signal update. `value` is `None` for an instance release.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackUpdate {
    pub signal: String,
    pub instance: Option<InstanceId>,
    pub value: Option<SignalValue>,
}

/// Updates sent together under one timetag
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackBatch {
    pub time: Timetag,
    pub updates: Vec<LoopbackUpdate>,
}

struct SignalRecord {
    spec: SignalSpec,
    properties: HashMap<String, PropertyValue>,
}

struct DeviceRecord {
    properties: HashMap<String, PropertyValue>,
    signals: BTreeMap<SignalKey, SignalRecord>,
    open: Option<LoopbackBatch>,
    batches: Vec<LoopbackBatch>,
    events: Sender<SignalEvent>,
    polls: u32,
    connected: bool,
}

impl DeviceRecord {
    fn find_signal(&self, name: &str, direction: Direction) -> Option<SignalKey> {
        self.signals
            .iter()
            .find(|(_, s)| s.spec.name == name && s.spec.direction == direction)
            .map(|(k, _)| *k)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    src_device: String,
    src_signal: String,
    dst_device: String,
    dst_signal: String,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, DeviceRecord>,
    routes: Vec<Route>,
    next_port: u16,
}

impl Inner {
    fn record(&self, device: &str) -> Result<&DeviceRecord> {
        self.devices
            .get(device)
            .ok_or_else(|| MapScopeError::Lookup(format!("no loopback device '{}'", device)))
    }

    /// Forward the output updates of a sent batch along the routes
    fn route(&self, src_device: &str, batch: &LoopbackBatch) {
        for update in &batch.updates {
            for route in self
                .routes
                .iter()
                .filter(|r| r.src_device == src_device && r.src_signal == update.signal)
            {
                let Some(dst) = self.devices.get(&route.dst_device) else {
                    continue;
                };
                let Some(key) = dst.find_signal(&route.dst_signal, Direction::In) else {
                    continue;
                };
                let kind = match &update.value {
                    Some(value) => SignalEventKind::Update(Some(value.clone())),
                    None => SignalEventKind::UpstreamRelease,
                };
                let _ = dst.events.send(SignalEvent {
                    key,
                    instance: update.instance.unwrap_or_default(),
                    kind,
                    time: batch.time,
                });
            }
        }
    }
}

/// Shared loopback network and inspection handle
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<Mutex<Inner>>,
    ready_after_polls: u32,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new(0)
    }
}

impl LoopbackNetwork {
    /// Create a network whose devices are ready after `ready_after_polls`
    pub fn new(ready_after_polls: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_port: BASE_PORT,
                ..Default::default()
            })),
            ready_after_polls,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.ready_after_polls)
    }

    /// Names of all devices ever created, sorted
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.inner).devices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_connected(&self, device: &str) -> bool {
        lock(&self.inner)
            .devices
            .get(device)
            .is_some_and(|d| d.connected)
    }

    /// Signals currently declared by `device`
    pub fn signals(&self, device: &str) -> Vec<SignalSpec> {
        lock(&self.inner)
            .devices
            .get(device)
            .map(|d| d.signals.values().map(|s| s.spec.clone()).collect())
            .unwrap_or_default()
    }

    pub fn signal_count(&self, device: &str, direction: Direction) -> usize {
        self.signals(device)
            .iter()
            .filter(|s| s.direction == direction)
            .count()
    }

    /// Batches sent by `device` so far
    pub fn batches(&self, device: &str) -> Vec<LoopbackBatch> {
        lock(&self.inner)
            .devices
            .get(device)
            .map(|d| d.batches.clone())
            .unwrap_or_default()
    }

    /// Drain the recorded batches of `device`
    pub fn take_batches(&self, device: &str) -> Vec<LoopbackBatch> {
        lock(&self.inner)
            .devices
            .get_mut(device)
            .map(|d| std::mem::take(&mut d.batches))
            .unwrap_or_default()
    }

    pub fn device_property(&self, device: &str, key: &str) -> Option<PropertyValue> {
        lock(&self.inner)
            .devices
            .get(device)
            .and_then(|d| d.properties.get(key).cloned())
    }

    pub fn signal_property(
        &self,
        device: &str,
        signal: &str,
        direction: Direction,
        key: &str,
    ) -> Option<PropertyValue> {
        let inner = lock(&self.inner);
        let record = inner.devices.get(device)?;
        let sig = record.find_signal(signal, direction)?;
        record.signals.get(&sig)?.properties.get(key).cloned()
    }

    /// Route an output signal of one device to an input signal of another
    pub fn connect(&self, src_device: &str, src_signal: &str, dst_device: &str, dst_signal: &str) {
        let route = Route {
            src_device: src_device.to_string(),
            src_signal: src_signal.to_string(),
            dst_device: dst_device.to_string(),
            dst_signal: dst_signal.to_string(),
        };
        let mut inner = lock(&self.inner);
        if !inner.routes.contains(&route) {
            tracing::debug!(
                "loopback route {}/{} -> {}/{}",
                src_device,
                src_signal,
                dst_device,
                dst_signal
            );
            inner.routes.push(route);
        }
    }

    /// Push an event for a signal of `device`, as if it came from the network
    pub fn inject(
        &self,
        device: &str,
        signal: &str,
        direction: Direction,
        instance: InstanceId,
        kind: SignalEventKind,
    ) -> Result<()> {
        let inner = lock(&self.inner);
        let record = inner.record(device)?;
        let key = record.find_signal(signal, direction).ok_or_else(|| {
            MapScopeError::Lookup(format!("no signal '{}' on '{}'", signal, device))
        })?;
        record
            .events
            .send(SignalEvent {
                key,
                instance,
                kind,
                time: Timetag::now(),
            })
            .map_err(|_| MapScopeError::Network(format!("device '{}' is gone", device)))
    }

    /// Inject a value update on an input signal
    pub fn inject_update(
        &self,
        device: &str,
        signal: &str,
        instance: InstanceId,
        value: SignalValue,
    ) -> Result<()> {
        self.inject(
            device,
            signal,
            Direction::In,
            instance,
            SignalEventKind::Update(Some(value)),
        )
    }
}

impl NetworkBackend for LoopbackNetwork {
    fn create(
        &self,
        name: &str,
        options: &DeviceOptions,
        events: Sender<SignalEvent>,
    ) -> Result<Box<dyn NetworkDevice>> {
        if name.is_empty() {
            return Err(MapScopeError::Network("device name is empty".to_string()));
        }

        let mut inner = lock(&self.inner);
        // dropped devices stay inspectable until the next device joins
        inner.devices.retain(|_, d| d.connected);
        let mut unique = name.to_string();
        let mut ordinal = 1;
        while inner.devices.get(&unique).is_some_and(|d| d.connected) {
            ordinal += 1;
            unique = format!("{}.{}", name, ordinal);
        }

        let port = inner.next_port;
        inner.next_port = inner.next_port.wrapping_add(1);

        let interface = options
            .interface
            .clone()
            .unwrap_or_else(|| LOOPBACK_INTERFACE.to_string());
        let mut properties = HashMap::new();
        properties.insert(PROP_NAME.to_string(), PropertyValue::Str(vec![unique.clone()]));
        properties.insert(PROP_INTERFACE.to_string(), PropertyValue::Str(vec![interface]));
        properties.insert(
            PROP_HOST.to_string(),
            PropertyValue::Str(vec![LOOPBACK_HOST.to_string()]),
        );
        properties.insert(PROP_PORT.to_string(), PropertyValue::Int(vec![port as i32]));

        inner.devices.insert(
            unique.clone(),
            DeviceRecord {
                properties,
                signals: BTreeMap::new(),
                open: None,
                batches: Vec::new(),
                events,
                polls: 0,
                connected: true,
            },
        );
        tracing::debug!("loopback device '{}' on port {}", unique, port);

        Ok(Box::new(LoopbackDevice {
            name: unique,
            inner: self.inner.clone(),
            ready_after_polls: self.ready_after_polls,
        }))
    }
}

/// Device handle returned by [`LoopbackNetwork::create`]
pub struct LoopbackDevice {
    name: String,
    inner: Arc<Mutex<Inner>>,
    ready_after_polls: u32,
}

impl LoopbackDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut DeviceRecord) -> R) -> Option<R> {
        lock(&self.inner).devices.get_mut(&self.name).map(f)
    }

    fn record_update(&mut self, update: LoopbackUpdate, time: Timetag) {
        let mut inner = lock(&self.inner);
        let Some(record) = inner.devices.get_mut(&self.name) else {
            return;
        };
        if let Some(open) = record.open.as_mut().filter(|b| b.time == time) {
            open.updates.push(update);
            return;
        }

        // no open queue: send immediately
        let batch = LoopbackBatch {
            time,
            updates: vec![update],
        };
        record.batches.push(batch.clone());
        inner.route(&self.name, &batch);
    }
}

impl NetworkDevice for LoopbackDevice {
    fn poll(&mut self, _timeout: Duration) -> usize {
        self.with_record(|r| r.polls = r.polls.saturating_add(1));
        0
    }

    fn is_ready(&self) -> bool {
        lock(&self.inner)
            .devices
            .get(&self.name)
            .is_some_and(|r| r.polls >= self.ready_after_polls)
    }

    fn add_signal(&mut self, key: SignalKey, spec: &SignalSpec) -> Result<()> {
        let mut inner = lock(&self.inner);
        let record = inner
            .devices
            .get_mut(&self.name)
            .ok_or_else(|| MapScopeError::Network(format!("device '{}' is gone", self.name)))?;
        if record.find_signal(&spec.name, spec.direction).is_some() {
            return Err(MapScopeError::Network(format!(
                "signal '{}' ({}) already exists",
                spec.name, spec.direction
            )));
        }
        record.signals.insert(
            key,
            SignalRecord {
                spec: spec.clone(),
                properties: HashMap::new(),
            },
        );
        Ok(())
    }

    fn remove_signal(&mut self, key: SignalKey) {
        self.with_record(|r| r.signals.remove(&key));
    }

    fn num_signals(&self, direction: Direction) -> usize {
        lock(&self.inner)
            .devices
            .get(&self.name)
            .map(|r| {
                r.signals
                    .values()
                    .filter(|s| s.spec.direction == direction)
                    .count()
            })
            .unwrap_or(0)
    }

    fn start_queue(&mut self, time: Timetag) {
        self.with_record(|r| {
            r.open = Some(LoopbackBatch {
                time,
                updates: Vec::new(),
            })
        });
    }

    fn send_queue(&mut self, time: Timetag) {
        let mut inner = lock(&self.inner);
        let Some(record) = inner.devices.get_mut(&self.name) else {
            return;
        };
        let batch = match record.open.take() {
            Some(batch) if batch.time == time => batch,
            other => {
                tracing::warn!("loopback '{}': no queue open for {}", self.name, time);
                record.open = other;
                return;
            }
        };
        record.batches.push(batch.clone());
        inner.route(&self.name, &batch);
    }

    fn update(
        &mut self,
        key: SignalKey,
        instance: Option<InstanceId>,
        value: &SignalValue,
        time: Timetag,
    ) {
        let Some(signal) = self
            .with_record(|r| r.signals.get(&key).map(|s| s.spec.name.clone()))
            .flatten()
        else {
            tracing::warn!("loopback '{}': update on unknown {:?}", self.name, key);
            return;
        };
        self.record_update(
            LoopbackUpdate {
                signal,
                instance,
                value: Some(value.clone()),
            },
            time,
        );
    }

    fn release_instance(&mut self, key: SignalKey, instance: InstanceId, time: Timetag) {
        let Some(signal) = self
            .with_record(|r| r.signals.get(&key).map(|s| s.spec.name.clone()))
            .flatten()
        else {
            return;
        };
        self.record_update(
            LoopbackUpdate {
                signal,
                instance: Some(instance),
                value: None,
            },
            time,
        );
    }

    fn property(&self, key: &str) -> Option<PropertyValue> {
        lock(&self.inner)
            .devices
            .get(&self.name)
            .and_then(|r| r.properties.get(key).cloned())
    }

    fn set_property(&mut self, key: &str, value: PropertyValue) {
        self.with_record(|r| r.properties.insert(key.to_string(), value));
    }

    fn signal_property(&self, signal: SignalKey, key: &str) -> Option<PropertyValue> {
        lock(&self.inner)
            .devices
            .get(&self.name)
            .and_then(|r| r.signals.get(&signal))
            .and_then(|s| s.properties.get(key).cloned())
    }

    fn set_signal_property(&mut self, signal: SignalKey, key: &str, value: PropertyValue) {
        self.with_record(|r| {
            if let Some(s) = r.signals.get_mut(&signal) {
                s.properties.insert(key.to_string(), value);
            }
        });
    }
}

impl Drop for LoopbackDevice {
    fn drop(&mut self) {
        self.with_record(|r| {
            r.connected = false;
            r.open = None;
        });
        tracing::debug!("loopback device '{}' disconnected", self.name);
    }
}
