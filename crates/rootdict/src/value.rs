// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamic values decoded from, or encoded to, the wire.
//!
//! A class instance is a [`Record`]: one named slot per streamed member,
//! base class members flattened in front of the derived ones.

use crate::error::WireError;
use crate::meta::ScalarKind;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A dynamic value of any streamable shape.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),

    /// Fixed arrays, counted arrays, sequences and sets.
    Array(Vec<Value>),
    /// Map entries in wire order.
    Map(Vec<(Value, Value)>),
    /// `std::bitset` bits, least significant first.
    Bits(Vec<bool>),
    /// Class instance.
    Record(Record),
    /// Object pointer; `None` is the null pointer.
    Pointer(Option<Box<Value>>),

    /// Unset slot.
    #[default]
    Null,
}

macro_rules! impl_as {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<$ty> {
            match self {
                Self::$variant(v) => Some(*v),
                _ => None,
            }
        }
    };
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Zero of the variant a scalar of `kind` decodes to.
    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::Char => Self::I8(0),
            ScalarKind::Short => Self::I16(0),
            ScalarKind::Int | ScalarKind::Counter => Self::I32(0),
            ScalarKind::Long | ScalarKind::Long64 => Self::I64(0),
            ScalarKind::UChar => Self::U8(0),
            ScalarKind::UShort => Self::U16(0),
            ScalarKind::UInt | ScalarKind::Bits => Self::U32(0),
            ScalarKind::ULong | ScalarKind::ULong64 => Self::U64(0),
            ScalarKind::Float | ScalarKind::Float16 => Self::F32(0.0),
            ScalarKind::Double | ScalarKind::Double32 => Self::F64(0.0),
        }
    }

    impl_as!(as_bool, Bool, bool);
    impl_as!(as_i8, I8, i8);
    impl_as!(as_i16, I16, i16);
    impl_as!(as_i32, I32, i32);
    impl_as!(as_i64, I64, i64);
    impl_as!(as_u8, U8, u8);
    impl_as!(as_u16, U16, u16);
    impl_as!(as_u32, U32, u32);
    impl_as!(as_u64, U64, u64);
    impl_as!(as_f32, F32, f32);
    impl_as!(as_f64, F64, f64);

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Integer value widened to i64, for counters.
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(i64::from(v)),
            Self::I16(v) => Some(i64::from(v)),
            Self::I32(v) => Some(i64::from(v)),
            Self::I64(v) => Some(v),
            Self::U8(v) => Some(i64::from(v)),
            Self::U16(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Short shape name, used in type mismatch reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Bits(_) => "bits",
            Self::Record(_) => "record",
            Self::Pointer(_) => "pointer",
            Self::Null => "null",
        }
    }
}

macro_rules! impl_from_native {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        }
    };
}

impl_from_native!(bool, Bool);
impl_from_native!(i8, I8);
impl_from_native!(i16, I16);
impl_from_native!(i32, I32);
impl_from_native!(i64, I64);
impl_from_native!(u8, U8);
impl_from_native!(u16, U16);
impl_from_native!(u32, U32);
impl_from_native!(u64, U64);
impl_from_native!(f32, F32);
impl_from_native!(f64, F64);
impl_from_native!(String, String);
impl_from_native!(Record, Record);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

// ---- Record

/// Decoded class instance: named slots in wire order.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Record {
    pub class: String,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Vec::new(),
        }
    }

    /// Append a slot (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Overwrite an existing slot, or append a new one.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Typed read of a slot.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, WireError> {
        let value = self.get(name).ok_or_else(|| WireError::TypeMismatch {
            context: format!("{}::{}", self.class, name),
            expected: "a field".into(),
            found: "nothing".into(),
        })?;
        T::from_value(value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.class)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:?}", name, value)?;
        }
        f.write_str("}")
    }
}

// ---- typed conversion

/// Extract a native value from a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, WireError>;
}

/// Convert a native value into a [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

fn mismatch(expected: &str, found: &Value) -> WireError {
    WireError::TypeMismatch {
        context: "value".into(),
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

macro_rules! impl_value_conv {
    ($ty:ty, $variant:ident, $name:expr) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, WireError> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(mismatch($name, other)),
                }
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

impl_value_conv!(bool, Bool, "bool");
impl_value_conv!(i8, I8, "i8");
impl_value_conv!(i16, I16, "i16");
impl_value_conv!(i32, I32, "i32");
impl_value_conv!(i64, I64, "i64");
impl_value_conv!(u8, U8, "u8");
impl_value_conv!(u16, U16, "u16");
impl_value_conv!(u32, U32, "u32");
impl_value_conv!(u64, U64, "u64");
impl_value_conv!(f32, F32, "f32");
impl_value_conv!(f64, F64, "f64");
impl_value_conv!(String, String, "string");
impl_value_conv!(Record, Record, "record");

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, WireError> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            other => Err(mismatch("array", other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: IntoValue> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        items.into_value()
    }
}

impl<T: FromValue, const N: usize> FromValue for [T; N] {
    fn from_value(value: &Value) -> Result<Self, WireError> {
        let items: Vec<T> = Vec::from_value(value)?;
        let len = items.len();
        items.try_into().map_err(|_| WireError::TypeMismatch {
            context: "value".into(),
            expected: format!("array of {}", N),
            found: format!("array of {}", len),
        })
    }
}

impl<T: IntoValue, const N: usize> IntoValue for [T; N] {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: &Value) -> Result<Self, WireError> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", other)),
        }
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for BTreeMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

impl<K: FromValue + std::hash::Hash + Eq, V: FromValue> FromValue for HashMap<K, V> {
    fn from_value(value: &Value) -> Result<Self, WireError> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<Box<T>> {
    fn from_value(value: &Value) -> Result<Self, WireError> {
        match value {
            Value::Pointer(None) | Value::Null => Ok(None),
            Value::Pointer(Some(inner)) => Ok(Some(Box::new(T::from_value(inner)?))),
            other => Err(mismatch("pointer", other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<Box<T>> {
    fn into_value(self) -> Value {
        Value::Pointer(self.map(|inner| Box::new((*inner).into_value())))
    }
}
