//! Parsing of host argument lists.
//!
//! Devices and endpoints are configured with flat atom lists the way a
//! host would type them: positional arguments first, then `@key value...`
//! pairs. Malformed pairs are skipped with a warning; only missing
//! positional arguments fail construction.

use crate::error::{MapScopeError, Result};
use crate::id::InstanceId;
use crate::types::{Atom, PropertyValue, SignalType, SignalValue, StealMode};

/// Keys that describe the endpoint itself and are never forwarded
const RESERVED_KEYS: [&str; 3] = ["name", "type", "length"];

/// Parsed device arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceArgs {
    pub alias: Option<String>,
    pub interface: Option<String>,
    /// Remaining `@key value` pairs, set as device metadata
    pub properties: Vec<(String, PropertyValue)>,
}

impl DeviceArgs {
    pub fn parse(args: &[Atom]) -> Self {
        let mut parsed = DeviceArgs::default();

        if let Some(first) = args.first().and_then(Atom::as_symbol) {
            if !first.starts_with('@') {
                parsed.alias = Some(first.to_string());
            }
        }

        let mut i = 0;
        while i + 1 < args.len() {
            let Some(key) = args[i].as_symbol().and_then(|s| s.strip_prefix('@')) else {
                i += 1;
                continue;
            };
            let value = &args[i + 1];
            match (key, value) {
                ("alias", Atom::Symbol(s)) => parsed.alias = Some(s.clone()),
                ("interface", Atom::Symbol(s)) => parsed.interface = Some(s.clone()),
                ("alias" | "interface", _) => {
                    tracing::warn!("@{} expects a symbol, got '{}'", key, value);
                }
                (_, Atom::Symbol(s)) => parsed
                    .properties
                    .push((key.to_string(), PropertyValue::Str(vec![s.clone()]))),
                (_, Atom::Int(v)) => parsed
                    .properties
                    .push((key.to_string(), PropertyValue::Int(vec![*v as i32]))),
                (_, Atom::Float(v)) => parsed
                    .properties
                    .push((key.to_string(), PropertyValue::Float(vec![*v as f32]))),
            }
            i += 2;
        }

        parsed
    }

    /// Device name: the alias without a leading `/`, or `default`
    pub fn name(&self, default: &str) -> String {
        match &self.alias {
            Some(alias) => alias.strip_prefix('/').unwrap_or(alias).to_string(),
            None => default.to_string(),
        }
    }
}

/// How an endpoint picks its instance id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceDirective {
    /// Explicit id
    Id(InstanceId),
    /// Ask the host for the index of the enclosing voice container
    FromIndex,
}

/// One deferred `@key value...` property of an endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDirective {
    Instance(InstanceDirective),
    /// Numeric minimum, expanded to the signal length when applied
    Minimum(Vec<Atom>),
    /// Numeric maximum, expanded to the signal length when applied
    Maximum(Vec<Atom>),
    Steal(StealMode),
    /// Arbitrary metadata forwarded verbatim
    Meta { name: String, value: PropertyValue },
}

impl PropertyDirective {
    /// Expand a numeric extremum cyclically to `length` elements of `ty`
    pub fn expand_extremum(values: &[Atom], ty: SignalType, length: usize) -> Option<SignalValue> {
        if values.is_empty() {
            return None;
        }
        let cycle = values.iter().cycle().take(length.max(1));
        match ty {
            SignalType::Int => cycle
                .map(Atom::coerce_int)
                .collect::<Option<Vec<_>>>()
                .map(SignalValue::Int),
            SignalType::Float => cycle
                .map(Atom::coerce_float)
                .collect::<Option<Vec<_>>>()
                .map(SignalValue::Float),
        }
    }
}

/// Parsed endpoint arguments: `<name> <type> [<length>] [@key value...]`
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointArgs {
    pub name: String,
    pub signal_type: SignalType,
    pub length: usize,
    pub properties: Vec<PropertyDirective>,
}

impl EndpointArgs {
    pub fn parse(args: &[Atom], max_vector_length: usize) -> Result<Self> {
        let usage = || {
            MapScopeError::Configuration(
                "usage: <signal-name> <datatype> <opt: vectorlength>".to_string(),
            )
        };

        let name = args.first().and_then(Atom::as_symbol).ok_or_else(usage)?;
        let type_symbol = args.get(1).and_then(Atom::as_symbol).ok_or_else(usage)?;
        let signal_type = SignalType::from_symbol(type_symbol).ok_or_else(|| {
            MapScopeError::Type(format!("unsupported signal type '{}'", type_symbol))
        })?;

        let (length, rest) = match args.get(2) {
            Some(Atom::Int(len)) => {
                if *len < 1 {
                    return Err(MapScopeError::Type(format!(
                        "vector length must be positive, got {}",
                        len
                    )));
                }
                let len = *len as usize;
                if len > max_vector_length {
                    return Err(MapScopeError::Capacity {
                        what: "vector",
                        length: len,
                        max: max_vector_length,
                    });
                }
                (len, &args[3..])
            }
            _ => (1, &args[2..]),
        };

        Ok(Self {
            name: name.to_string(),
            signal_type,
            length,
            properties: parse_properties(rest),
        })
    }
}

/// Element kind of a property value run
#[derive(Debug, Clone, Copy, PartialEq)]
enum RunKind {
    Int,
    Float,
    Symbol,
    Mixed,
}

fn run_kind(values: &[Atom]) -> RunKind {
    let mut kind = None;
    for value in values {
        let this = match value {
            Atom::Int(_) => RunKind::Int,
            Atom::Float(_) => RunKind::Float,
            Atom::Symbol(_) => RunKind::Symbol,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(RunKind::Int), RunKind::Float) | (Some(RunKind::Float), RunKind::Int) => {
                RunKind::Float
            }
            _ => RunKind::Mixed,
        });
    }
    kind.unwrap_or(RunKind::Mixed)
}

/// Parse a `@key value...` list into property directives.
pub fn parse_properties(args: &[Atom]) -> Vec<PropertyDirective> {
    let mut out = Vec::new();
    let mut i = 0;

    while i + 1 < args.len() {
        let Some(key) = args[i].as_symbol().and_then(|s| s.strip_prefix('@')) else {
            i += 1;
            continue;
        };
        i += 1;
        if RESERVED_KEYS.contains(&key) {
            continue;
        }

        let run_len = args[i..]
            .iter()
            .take_while(|a| !a.is_directive())
            .count();
        let values = &args[i..i + run_len];
        i += run_len;

        if values.is_empty() {
            tracing::warn!("value missing for property {}", key);
            continue;
        }

        let kind = run_kind(values);
        if kind == RunKind::Mixed {
            tracing::warn!("only numeric types may be mixed in property values ({})", key);
            continue;
        }

        match key {
            "instance" => match &values[0] {
                Atom::Int(id) => out.push(PropertyDirective::Instance(InstanceDirective::Id(
                    InstanceId(*id),
                ))),
                Atom::Symbol(s) if s == "polyindex" || s == "index" => {
                    out.push(PropertyDirective::Instance(InstanceDirective::FromIndex))
                }
                _ => tracing::warn!("instance value must be an integer or 'polyindex'"),
            },
            "min" | "minimum" | "max" | "maximum" => {
                if kind == RunKind::Symbol {
                    tracing::warn!("@{} expects numeric values", key);
                    continue;
                }
                let values = values.to_vec();
                out.push(if key.starts_with("mi") {
                    PropertyDirective::Minimum(values)
                } else {
                    PropertyDirective::Maximum(values)
                });
            }
            "steal" => match values[0].as_symbol().and_then(StealMode::from_symbol) {
                Some(mode) => out.push(PropertyDirective::Steal(mode)),
                None => tracing::warn!("@steal expects one of oldest, newest, none"),
            },
            _ => {
                let value = match kind {
                    RunKind::Int => {
                        PropertyValue::Int(values.iter().filter_map(Atom::coerce_int).collect())
                    }
                    RunKind::Float => PropertyValue::Float(
                        values.iter().filter_map(Atom::coerce_float).collect(),
                    ),
                    _ => PropertyValue::Str(values.iter().map(|a| a.to_string()).collect()),
                };
                out.push(PropertyDirective::Meta {
                    name: key.to_string(),
                    value,
                });
            }
        }
    }

    out
}
