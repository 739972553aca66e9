//! Scratch buffer for converting between host value lists and typed vectors.
//!
//! The buffer has a fixed capacity (the maximum list length the host can
//! receive in one message). Oversized vectors are truncated with a warning
//! rather than failing the whole update.

use crate::error::{MapScopeError, Result};
use crate::id::InstanceId;
use crate::types::{Atom, EndpointOutput, SignalType, SignalValue};

/// Default maximum number of atoms in one host message
pub const MAX_LIST: usize = 256;

/// Fixed-capacity conversion buffer
#[derive(Debug)]
pub struct ValueBuffer {
    atoms: Vec<Atom>,
    capacity: usize,
}

impl Default for ValueBuffer {
    fn default() -> Self {
        Self::new(MAX_LIST)
    }
}

impl ValueBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            atoms: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill the buffer from a typed vector, optionally prefixed with an
    /// instance id, and return the atoms. Elements past capacity are dropped.
    pub fn load(&mut self, value: &SignalValue, prefix: Option<InstanceId>) -> &[Atom] {
        self.atoms.clear();
        if let Some(id) = prefix {
            self.atoms.push(Atom::Int(id.0));
        }
        let room = self.capacity - self.atoms.len();
        if value.len() > room {
            tracing::warn!(
                "{}",
                MapScopeError::Capacity {
                    what: "list",
                    length: value.len(),
                    max: room,
                }
            );
        }
        match value {
            SignalValue::Int(v) => self
                .atoms
                .extend(v.iter().take(room).map(|&i| Atom::Int(i as i64))),
            SignalValue::Float(v) => self
                .atoms
                .extend(v.iter().take(room).map(|&f| Atom::Float(f as f64))),
        }
        &self.atoms
    }

    /// Convert an incoming typed vector into the message an endpoint emits:
    /// a scalar for single elements, a list otherwise.
    pub fn to_output(&mut self, value: &SignalValue, prefix: Option<InstanceId>) -> EndpointOutput {
        let atoms = self.load(value, prefix);
        if atoms.len() == 1 {
            EndpointOutput::Scalar(atoms[0].clone())
        } else {
            EndpointOutput::List(atoms.to_vec())
        }
    }

    /// Convert a host list into a typed vector of `ty`.
    ///
    /// The list must be a non-zero multiple of `length` elements. Lists
    /// longer than capacity are truncated to the largest whole multiple of
    /// `length` that fits.
    pub fn parse_list(&self, atoms: &[Atom], ty: SignalType, length: usize) -> Result<SignalValue> {
        let length = length.max(1);
        if atoms.len() < length || atoms.len() % length != 0 {
            return Err(MapScopeError::Type(format!(
                "Illegal list length {} (expected factor of {})",
                atoms.len(),
                length
            )));
        }

        let mut count = atoms.len();
        if count > self.capacity {
            tracing::warn!(
                "{}",
                MapScopeError::Capacity {
                    what: "list",
                    length: count,
                    max: self.capacity,
                }
            );
            count = (self.capacity / length) * length;
            if count == 0 {
                return Err(MapScopeError::Capacity {
                    what: "vector",
                    length,
                    max: self.capacity,
                });
            }
        }

        let atoms = &atoms[..count];
        match ty {
            SignalType::Int => atoms
                .iter()
                .map(|a| a.coerce_int().ok_or_else(|| illegal(a)))
                .collect::<Result<Vec<_>>>()
                .map(SignalValue::Int),
            SignalType::Float => atoms
                .iter()
                .map(|a| a.coerce_float().ok_or_else(|| illegal(a)))
                .collect::<Result<Vec<_>>>()
                .map(SignalValue::Float),
        }
    }

    /// Coerce a single scalar to a one-element vector of `ty`
    pub fn parse_scalar(atom: &Atom, ty: SignalType) -> Result<SignalValue> {
        match ty {
            SignalType::Int => atom.coerce_int().map(|i| SignalValue::Int(vec![i])),
            SignalType::Float => atom.coerce_float().map(|f| SignalValue::Float(vec![f])),
        }
        .ok_or_else(|| illegal(atom))
    }
}

fn illegal(atom: &Atom) -> MapScopeError {
    MapScopeError::Type(format!("Illegal data type in list: '{}'", atom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_output() {
        let mut buf = ValueBuffer::default();
        let out = buf.to_output(&SignalValue::Int(vec![7]), None);
        assert_eq!(out, EndpointOutput::Scalar(Atom::Int(7)));
    }

    #[test]
    fn test_prefixed_output_is_list() {
        let mut buf = ValueBuffer::default();
        let out = buf.to_output(&SignalValue::Float(vec![0.5]), Some(InstanceId(3)));
        assert_eq!(out, EndpointOutput::List(vec![Atom::Int(3), Atom::Float(0.5)]));
    }

    #[test]
    fn test_load_truncates_to_capacity() {
        let mut buf = ValueBuffer::new(4);
        let atoms = buf.load(&SignalValue::Int((0..10).collect()), Some(InstanceId(1)));
        assert_eq!(atoms.len(), 4);
        assert_eq!(atoms[0], Atom::Int(1));
        assert_eq!(atoms[3], Atom::Int(2));
    }

    #[test]
    fn test_parse_list_mixed_numbers() {
        let buf = ValueBuffer::default();
        let value = buf
            .parse_list(&[Atom::Int(1), Atom::Float(2.5)], SignalType::Float, 2)
            .unwrap();
        assert_eq!(value, SignalValue::Float(vec![1.0, 2.5]));

        let value = buf
            .parse_list(&[Atom::Float(1.9), Atom::Int(2)], SignalType::Int, 1)
            .unwrap();
        assert_eq!(value, SignalValue::Int(vec![1, 2]));
    }

    #[test]
    fn test_parse_list_rejects_bad_length() {
        let buf = ValueBuffer::default();
        let err = buf
            .parse_list(&[Atom::Int(1), Atom::Int(2), Atom::Int(3)], SignalType::Int, 2)
            .unwrap_err();
        assert!(matches!(err, MapScopeError::Type(_)));
        assert!(buf.parse_list(&[Atom::Int(1)], SignalType::Int, 2).is_err());
    }

    #[test]
    fn test_parse_list_rejects_symbols() {
        let buf = ValueBuffer::default();
        let err = buf
            .parse_list(&[Atom::Int(1), Atom::symbol("x")], SignalType::Int, 1)
            .unwrap_err();
        assert!(err.to_string().contains("Illegal data type"));
    }

    #[test]
    fn test_parse_list_truncates_whole_vectors() {
        let buf = ValueBuffer::new(5);
        let atoms: Vec<Atom> = (0..8).map(Atom::Int).collect();
        let value = buf.parse_list(&atoms, SignalType::Int, 2).unwrap();
        assert_eq!(value, SignalValue::Int(vec![0, 1, 2, 3]));
    }

    #[test]
    fn test_parse_list_rejects_out_of_range_ints() {
        let buf = ValueBuffer::default();
        let too_big = buf.parse_list(&[Atom::Int(5_000_000_000)], SignalType::Int, 1);
        assert!(matches!(too_big, Err(MapScopeError::Type(_))));

        let too_small = buf.parse_list(&[Atom::Float(-3.0e9)], SignalType::Int, 1);
        assert!(matches!(too_small, Err(MapScopeError::Type(_))));

        let nan = buf.parse_list(&[Atom::Float(f64::NAN)], SignalType::Int, 1);
        assert!(matches!(nan, Err(MapScopeError::Type(_))));

        let edge = buf
            .parse_list(&[Atom::Int(i32::MAX as i64), Atom::Float(-2147483648.9)], SignalType::Int, 1)
            .unwrap();
        assert_eq!(edge, SignalValue::Int(vec![i32::MAX, i32::MIN]));

        let wide = buf.parse_list(&[Atom::Float(1.0e300)], SignalType::Float, 1);
        assert!(matches!(wide, Err(MapScopeError::Type(_))));
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(
            ValueBuffer::parse_scalar(&Atom::Float(3.7), SignalType::Int).unwrap(),
            SignalValue::Int(vec![3])
        );
        assert!(ValueBuffer::parse_scalar(&Atom::symbol("a"), SignalType::Float).is_err());
    }

    proptest! {
        #[test]
        fn test_load_never_exceeds_capacity(
            values in prop::collection::vec(any::<i32>(), 0..600),
            capacity in 1usize..300,
            prefixed in any::<bool>()
        ) {
            let mut buf = ValueBuffer::new(capacity);
            let prefix = prefixed.then_some(InstanceId(1));
            let atoms = buf.load(&SignalValue::Int(values.clone()), prefix);
            prop_assert!(atoms.len() <= capacity);
            let expected = values.len() + usize::from(prefixed);
            prop_assert_eq!(atoms.len(), expected.min(capacity));
        }

        #[test]
        fn test_parsed_lists_are_whole_vectors(
            count in 1usize..40,
            length in 1usize..8
        ) {
            let buf = ValueBuffer::new(64);
            let atoms: Vec<Atom> = (0..(count * length) as i64).map(Atom::Int).collect();
            match buf.parse_list(&atoms, SignalType::Float, length) {
                Ok(value) => {
                    prop_assert_eq!(value.len() % length, 0);
                    prop_assert!(value.len() <= 64);
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
