//! Dynamic packet field model
//!
//! The codec turns a packet body into a tree of [`FieldValue`]s keyed by the
//! protocol's field names. NBT compounds are exposed the same way: a compound
//! tag is a [`FieldValue::Compound`] and int tags are [`FieldValue::Int`].

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Bytes),
    List(Vec<FieldValue>),
    Compound(Fields),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let FieldValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        if let FieldValue::Bytes(b) = self {
            Some(b)
        } else {
            None
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        if let FieldValue::List(l) = self {
            Some(l)
        } else {
            None
        }
    }

    pub fn as_compound(&self) -> Option<&Fields> {
        if let FieldValue::Compound(c) = self {
            Some(c)
        } else {
            None
        }
    }

    pub fn as_compound_mut(&mut self) -> Option<&mut Fields> {
        if let FieldValue::Compound(c) = self {
            Some(c)
        } else {
            None
        }
    }

    /// Shifts a numeric value by `delta`, keeping its integer or floating
    /// representation. Non-numeric values are returned unchanged.
    pub fn shifted(&self, delta: i64) -> FieldValue {
        match self {
            FieldValue::Int(i) => FieldValue::Int(i.wrapping_sub(delta)),
            FieldValue::Float(f) => FieldValue::Float(f - delta as f64),
            other => other.clone(),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(value: $t) -> Self {
                    FieldValue::Int(value as i64)
                }
            }
        )*
    };
}

impl_from_int!(i8, u8, i16, u16, i32, u32, i64);

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(value as f64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<Bytes> for FieldValue {
    fn from(value: Bytes) -> Self {
        FieldValue::Bytes(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(value: Vec<FieldValue>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Fields> for FieldValue {
    fn from(value: Fields) -> Self {
        FieldValue::Compound(value)
    }
}

/// Named fields of one packet (or one compound value)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut FieldValue> {
        self.0.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(FieldValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    pub fn get_bytes(&self, key: &str) -> Option<&Bytes> {
        self.get(key).and_then(FieldValue::as_bytes)
    }

    pub fn get_list(&self, key: &str) -> Option<&[FieldValue]> {
        self.get(key).and_then(FieldValue::as_list)
    }

    pub fn get_compound(&self, key: &str) -> Option<&Fields> {
        self.get(key).and_then(FieldValue::as_compound)
    }

    /// Shifts a numeric field in place. Returns false when the field is
    /// missing or not a number.
    pub fn shift(&mut self, key: &str, delta: i64) -> bool {
        match self.0.get_mut(key) {
            Some(value @ (FieldValue::Int(_) | FieldValue::Float(_))) => {
                *value = value.shifted(delta);
                true
            }
            _ => false,
        }
    }
}

impl FromIterator<(String, FieldValue)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Fields(iter.into_iter().collect())
    }
}

/// A named packet ready to be written through a codec-backed socket
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub name: String,
    pub fields: Fields,
}

impl Packet {
    pub fn new(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Fields::new())
    }
}
