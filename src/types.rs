//! Core data types for mapscope
//!
//! This module contains the value-level types shared by every component:
//! host atoms, typed signal vectors, timetags and the messages endpoints
//! and devices emit back to the host.
//!
//! # Main Types
//!
//! - [`SignalType`] - Declared element type of a signal (`int` or `float`)
//! - [`Direction`] - Whether the signal is an input or an output of the device
//! - [`Atom`] - One element of a host value list
//! - [`SignalValue`] - A typed numeric vector as the network sees it
//! - [`Timetag`] - Timestamp shared by every update queued within one tick
//! - [`EndpointOutput`] / [`DeviceReport`] - Outbound messages to host outlets

use crate::id::InstanceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared element type of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// 32-bit signed integer elements
    Int,
    /// 32-bit floating point elements
    #[default]
    Float,
}

impl SignalType {
    /// Parse a host type symbol. Only the first character matters, so
    /// `i`, `int` and `integer` all mean [`SignalType::Int`].
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.chars().next() {
            Some('i') => Some(SignalType::Int),
            Some('f') => Some(SignalType::Float),
            _ => None,
        }
    }

    /// Single-character type code used on the wire
    pub fn code(&self) -> char {
        match self {
            SignalType::Int => 'i',
            SignalType::Float => 'f',
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalType::Int => write!(f, "int"),
            SignalType::Float => write!(f, "float"),
        }
    }
}

/// Signal direction relative to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Values arrive from the network and are delivered to endpoints
    In,
    /// Values are produced by endpoints and sent to the network
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// One element of a host value list
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Int(i64),
    Float(f64),
    Symbol(String),
}

impl Atom {
    /// Convenience constructor for symbols
    pub fn symbol(s: impl Into<String>) -> Self {
        Atom::Symbol(s.into())
    }

    /// The symbol text, if this atom is a symbol
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Atom::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// True for symbols starting with `@`
    pub fn is_directive(&self) -> bool {
        self.as_symbol().is_some_and(|s| s.starts_with('@'))
    }

    /// True for ints and floats
    pub fn is_numeric(&self) -> bool {
        matches!(self, Atom::Int(_) | Atom::Float(_))
    }

    /// Coerce to an int, truncating floats. Symbols, NaN and values outside
    /// the `i32` range do not coerce.
    pub fn coerce_int(&self) -> Option<i32> {
        match self {
            Atom::Int(i) => i32::try_from(*i).ok(),
            Atom::Float(f) => {
                let t = f.trunc();
                (t >= i32::MIN as f64 && t <= i32::MAX as f64).then_some(t as i32)
            }
            Atom::Symbol(_) => None,
        }
    }

    /// Coerce to a float. Symbols and finite values beyond the `f32` range
    /// do not coerce.
    pub fn coerce_float(&self) -> Option<f32> {
        match self {
            Atom::Int(i) => Some(*i as f32),
            Atom::Float(f) => {
                let narrowed = *f as f32;
                (narrowed.is_finite() || !f.is_finite()).then_some(narrowed)
            }
            Atom::Symbol(_) => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Int(i) => write!(f, "{}", i),
            Atom::Float(x) => write!(f, "{}", x),
            Atom::Symbol(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Int(v)
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Float(v)
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::Symbol(v.to_string())
    }
}

/// A typed numeric vector, the unit of exchange with the network
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl SignalValue {
    /// Element type of this value
    pub fn signal_type(&self) -> SignalType {
        match self {
            SignalValue::Int(_) => SignalType::Int,
            SignalValue::Float(_) => SignalType::Float,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            SignalValue::Int(v) => v.len(),
            SignalValue::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into successive vectors of `length` elements. A trailing
    /// partial chunk is dropped.
    pub fn chunks(&self, length: usize) -> Vec<SignalValue> {
        if length == 0 {
            return Vec::new();
        }
        match self {
            SignalValue::Int(v) => v
                .chunks_exact(length)
                .map(|c| SignalValue::Int(c.to_vec()))
                .collect(),
            SignalValue::Float(v) => v
                .chunks_exact(length)
                .map(|c| SignalValue::Float(c.to_vec()))
                .collect(),
        }
    }

    /// Convert element-wise to the given type
    pub fn cast(&self, ty: SignalType) -> SignalValue {
        match (self, ty) {
            (SignalValue::Int(v), SignalType::Float) => {
                SignalValue::Float(v.iter().map(|&i| i as f32).collect())
            }
            (SignalValue::Float(v), SignalType::Int) => {
                SignalValue::Int(v.iter().map(|&f| f as i32).collect())
            }
            _ => self.clone(),
        }
    }
}

/// Property value attached to a device or signal as metadata
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Str(Vec<String>),
}

impl PropertyValue {
    pub fn len(&self) -> usize {
        match self {
            PropertyValue::Int(v) => v.len(),
            PropertyValue::Float(v) => v.len(),
            PropertyValue::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First element as a string, if this is a string property
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(v) => v.first().map(|s| s.as_str()),
            _ => None,
        }
    }
}

impl From<SignalValue> for PropertyValue {
    fn from(value: SignalValue) -> Self {
        match value {
            SignalValue::Int(v) => PropertyValue::Int(v),
            SignalValue::Float(v) => PropertyValue::Float(v),
        }
    }
}

/// Offset between the NTP epoch (1900) and the Unix epoch (1970) in seconds
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// NTP-style timestamp: whole seconds since 1900 plus a 2^-32 fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timetag {
    pub sec: u32,
    pub frac: u32,
}

impl Timetag {
    /// Capture the current wall-clock time
    pub fn now() -> Self {
        Self::from_datetime(chrono::Utc::now())
    }

    /// Build a timetag from a UTC timestamp
    pub fn from_datetime(at: chrono::DateTime<chrono::Utc>) -> Self {
        let sec = (at.timestamp() + NTP_UNIX_OFFSET) as u32;
        let frac = ((at.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            sec,
            frac: frac as u32,
        }
    }

    /// Seconds as a double, for logging
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.frac as f64 / 4_294_967_296.0
    }
}

impl fmt::Display for Timetag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08x}", self.sec, self.frac)
    }
}

/// What to do when activating an instance would exceed a signal's capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StealMode {
    /// Release nothing; tell every bound endpoint about the overflow
    #[default]
    None,
    /// Release the instance that was activated first
    Oldest,
    /// Release the instance that was activated last
    Newest,
}

impl StealMode {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "none" | "0" => Some(StealMode::None),
            "oldest" => Some(StealMode::Oldest),
            "newest" => Some(StealMode::Newest),
            _ => None,
        }
    }
}

impl fmt::Display for StealMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StealMode::None => write!(f, "none"),
            StealMode::Oldest => write!(f, "oldest"),
            StealMode::Newest => write!(f, "newest"),
        }
    }
}

/// Where an instance release originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseOrigin {
    Local,
    Upstream,
    Downstream,
}

impl fmt::Display for ReleaseOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseOrigin::Local => write!(f, "local"),
            ReleaseOrigin::Upstream => write!(f, "upstream"),
            ReleaseOrigin::Downstream => write!(f, "downstream"),
        }
    }
}

/// Message emitted on an endpoint's outlet
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointOutput {
    /// Single-element update
    Scalar(Atom),
    /// Vector update, or a broadcast update prefixed with its instance id
    List(Vec<Atom>),
    /// An instance was released. `instance` is set when the notification is
    /// broadcast rather than routed to the instance's owner.
    Release {
        instance: Option<InstanceId>,
        origin: ReleaseOrigin,
    },
    /// Instance capacity was exceeded and nothing was stolen
    Overflow { instance: InstanceId },
}

impl EndpointOutput {
    /// Flatten into the tagged list form the host prints
    pub fn to_atoms(&self) -> Vec<Atom> {
        match self {
            EndpointOutput::Scalar(a) => vec![a.clone()],
            EndpointOutput::List(atoms) => atoms.clone(),
            EndpointOutput::Release { instance, origin } => {
                let mut out = Vec::with_capacity(3);
                if let Some(id) = instance {
                    out.push(Atom::Int(id.0));
                }
                out.push(Atom::symbol("release"));
                out.push(Atom::symbol(origin.to_string()));
                out
            }
            EndpointOutput::Overflow { instance } => {
                vec![Atom::Int(instance.0), Atom::symbol("overflow")]
            }
        }
    }
}

/// Tagged single-value message emitted on a device's outlet
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReport {
    Name(String),
    Interface(String),
    Address(String),
    Port(u16),
    NumInputs(usize),
    NumOutputs(usize),
}

impl DeviceReport {
    /// Selector symbol the host sees
    pub fn selector(&self) -> &'static str {
        match self {
            DeviceReport::Name(_) => "name",
            DeviceReport::Interface(_) => "interface",
            DeviceReport::Address(_) => "IP",
            DeviceReport::Port(_) => "port",
            DeviceReport::NumInputs(_) => "numInputs",
            DeviceReport::NumOutputs(_) => "numOutputs",
        }
    }

    /// Payload atom
    pub fn value(&self) -> Atom {
        match self {
            DeviceReport::Name(s) | DeviceReport::Interface(s) | DeviceReport::Address(s) => {
                Atom::symbol(s.clone())
            }
            DeviceReport::Port(p) => Atom::Int(*p as i64),
            DeviceReport::NumInputs(n) | DeviceReport::NumOutputs(n) => Atom::Int(*n as i64),
        }
    }

    /// Signal count report for a direction
    pub fn count(direction: Direction, count: usize) -> Self {
        match direction {
            Direction::In => DeviceReport::NumInputs(count),
            Direction::Out => DeviceReport::NumOutputs(count),
        }
    }
}
