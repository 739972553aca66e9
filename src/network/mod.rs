//! Mapping network abstraction
//!
//! The engine talks to the mapping network through two traits:
//!
//! - [`NetworkBackend`] - creates one [`NetworkDevice`] per device binding
//! - [`NetworkDevice`] - a poll-driven device with named, typed signals
//!
//! The network never calls back into the engine directly. Value updates,
//! releases and overflow notices for a signal are pushed as [`SignalEvent`]s
//! on the channel handed to [`NetworkBackend::create`], tagged with the
//! [`SignalKey`] the engine chose when it added the signal. The poll tick
//! drains that channel and resolves each key through the signal binder.
//!
//! # Implementations
//!
//! - [`LoopbackNetwork`] - in-process network with inspectable state, used
//!   by the demo binary and the tests

pub mod loopback;

pub use loopback::{LoopbackBatch, LoopbackDevice, LoopbackNetwork, LoopbackUpdate};

use crate::error::Result;
use crate::id::{InstanceId, SignalKey};
use crate::types::{Direction, PropertyValue, SignalType, SignalValue, Timetag};
use crossbeam_channel::Sender;
use std::time::Duration;

/// Device property holding the registered name
pub const PROP_NAME: &str = "name";
/// Device property holding the network interface name
pub const PROP_INTERFACE: &str = "interface";
/// Device property holding the bound address
pub const PROP_HOST: &str = "host";
/// Device property holding the bound port
pub const PROP_PORT: &str = "port";
/// Signal range properties
pub const PROP_MIN: &str = "min";
pub const PROP_MAX: &str = "max";

/// Declaration of a network signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub name: String,
    pub direction: Direction,
    pub signal_type: SignalType,
    pub length: usize,
}

/// Options used when creating a network device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceOptions {
    /// Network interface to bind, or the backend's default
    pub interface: Option<String>,
}

/// What happened to a signal instance on the network side
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEventKind {
    /// New value, or `None` when the instance was released without one
    Update(Option<SignalValue>),
    /// A source released the instance
    UpstreamRelease,
    /// A destination released the instance
    DownstreamRelease,
    /// The network ran out of instances
    Overflow,
}

/// Event pushed by the network for one signal instance
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub key: SignalKey,
    pub instance: InstanceId,
    pub kind: SignalEventKind,
    pub time: Timetag,
}

/// One device on the mapping network.
///
/// Calls are made with the owning device's lock held; implementations must
/// not block except inside [`NetworkDevice::poll`].
#[cfg_attr(test, mockall::automock)]
pub trait NetworkDevice: Send {
    /// Service the network for at most `timeout`. Returns the number of
    /// messages handled, zero when idle.
    fn poll(&mut self, timeout: Duration) -> usize;

    /// Whether the device finished joining the network
    fn is_ready(&self) -> bool;

    /// Create a signal. `key` tags every event the signal produces.
    fn add_signal(&mut self, key: SignalKey, spec: &SignalSpec) -> Result<()>;

    fn remove_signal(&mut self, key: SignalKey);

    /// Number of signals of one direction
    fn num_signals(&self, direction: Direction) -> usize;

    /// Open a batch; updates until [`NetworkDevice::send_queue`] share `time`
    fn start_queue(&mut self, time: Timetag);

    /// Send the batch opened with `time`
    fn send_queue(&mut self, time: Timetag);

    /// Set a signal value, on `instance` for instanced writes
    fn update(
        &mut self,
        key: SignalKey,
        instance: Option<InstanceId>,
        value: &SignalValue,
        time: Timetag,
    );

    fn release_instance(&mut self, key: SignalKey, instance: InstanceId, time: Timetag);

    /// Device property lookup
    fn property(&self, key: &str) -> Option<PropertyValue>;

    fn set_property(&mut self, key: &str, value: PropertyValue);

    fn signal_property(&self, signal: SignalKey, key: &str) -> Option<PropertyValue>;

    fn set_signal_property(&mut self, signal: SignalKey, key: &str, value: PropertyValue);
}

/// Factory for network devices
pub trait NetworkBackend: Send + Sync {
    fn create(
        &self,
        name: &str,
        options: &DeviceOptions,
        events: Sender<SignalEvent>,
    ) -> Result<Box<dyn NetworkDevice>>;
}
