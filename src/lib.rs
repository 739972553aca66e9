//! # mapscope: scoped signal endpoints for a mapping network
//!
//! Endpoints are typed, vector-valued signal sources and sinks created by a
//! host inside a tree of containers. A single device per scope discovers
//! them, binds each to a named network signal, and exchanges timestamped
//! updates with the mapping network. Objects may be created and destroyed
//! in any order.
//!
//! ## Architecture
//!
//! - **Registry**: per-scope endpoint table with add/remove notifications
//! - **Device**: claims a scope, binds endpoints to network signals, owns the
//!   instance tables and the update queue
//! - **Network**: trait boundary to the mapping network plus an in-process
//!   loopback implementation
//! - **Poll loop**: a dedicated thread that services the network, routes
//!   incoming events and flushes one batch per tick
//! - **Communication**: crossbeam channels carry network events into the
//!   device and outputs back to the host
//!
//! ## Configuration
//!
//! Engine tunables are read from `config.toml` (or JSON) in the platform
//! config directory under `mapscope`; see [`config::EngineConfig`].
//!
//! ## Example
//!
//! ```ignore
//! use mapscope::{
//!     config::EngineConfig, network::LoopbackNetwork, Atom, ContainerId, Device,
//!     Direction, Endpoint, HostContext, HostTree,
//! };
//! use std::sync::Arc;
//!
//! let tree = Arc::new(HostTree::new());
//! let network = LoopbackNetwork::new(3);
//! let ctx = HostContext::new(tree.clone(), Arc::new(network), EngineConfig::default());
//!
//! let device = Device::new(&ctx, ContainerId::ROOT, &[Atom::symbol("synth")])?;
//! let freq = Endpoint::new(
//!     &ctx,
//!     ContainerId::ROOT,
//!     Direction::Out,
//!     &[Atom::symbol("freq"), Atom::symbol("f")],
//! )?;
//!
//! device.tick_until_ready(10);
//! freq.send_float(440.0)?;
//! device.tick();
//! ```

pub mod buffer;
pub mod config;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod id;
pub mod network;
pub mod registry;
mod sync;
pub mod types;

// Re-export commonly used types
pub use buffer::ValueBuffer;
pub use config::EngineConfig;
pub use device::{Device, TickOutcome};
pub use endpoint::{Endpoint, EndpointHandle};
pub use error::{MapScopeError, Result};
pub use host::{ContainerTree, HostContext, HostObject, HostTree};
pub use id::{ContainerId, DeviceId, EndpointId, InstanceId};
pub use registry::{RegistryListener, ScopeRegistry, ScopeTable};
pub use types::{Atom, DeviceReport, Direction, EndpointOutput, SignalType, SignalValue};
