// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed columnar storage.
//!
//! Columnar fragments hold every property as one [`Column`]: a closed
//! tagged union with per-variant `Vec` storage. The closed set replaces
//! open-ended per-type code generation; adding a type means adding a
//! variant here and handling it in the marshaller and converter.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::value::DynValue;

/// Tag of a column's element type.
///
/// `wire_tag` values are part of the marshalling format and never change
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Booleans (storable, but not convertible to dynamic form).
    Bool,
    /// 32-bit signed integers.
    Int32,
    /// 32-bit unsigned integers.
    UInt32,
    /// 64-bit signed integers.
    Int64,
    /// 64-bit unsigned integers.
    UInt64,
    /// 32-bit floats.
    Float32,
    /// 64-bit floats.
    Float64,
    /// UTF-8 strings.
    Utf8,
    /// UTF-8 strings with 64-bit offsets.
    LargeUtf8,
}

impl DataType {
    /// Stable integer tag used in marshalled headers.
    pub fn wire_tag(self) -> i32 {
        match self {
            Self::Bool => 1,
            Self::Int32 => 2,
            Self::UInt32 => 3,
            Self::Int64 => 4,
            Self::UInt64 => 5,
            Self::Float32 => 6,
            Self::Float64 => 7,
            Self::Utf8 => 8,
            Self::LargeUtf8 => 9,
        }
    }

    /// Reverse of [`DataType::wire_tag`].
    pub fn from_wire_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::Bool),
            2 => Some(Self::Int32),
            3 => Some(Self::UInt32),
            4 => Some(Self::Int64),
            5 => Some(Self::UInt64),
            6 => Some(Self::Float32),
            7 => Some(Self::Float64),
            8 => Some(Self::Utf8),
            9 => Some(Self::LargeUtf8),
            _ => None,
        }
    }

    /// Schema name of this type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
            Self::LargeUtf8 => "large_utf8",
        }
    }

    /// Parse a schema name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(Self::Bool),
            "int32" => Some(Self::Int32),
            "uint32" => Some(Self::UInt32),
            "int64" => Some(Self::Int64),
            "uint64" => Some(Self::UInt64),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            "utf8" => Some(Self::Utf8),
            "large_utf8" => Some(Self::LargeUtf8),
            _ => None,
        }
    }
}

/// One property column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// Boolean storage.
    Bool(Vec<bool>),
    /// `i32` storage.
    Int32(Vec<i32>),
    /// `u32` storage.
    UInt32(Vec<u32>),
    /// `i64` storage.
    Int64(Vec<i64>),
    /// `u64` storage.
    UInt64(Vec<u64>),
    /// `f32` storage.
    Float32(Vec<f32>),
    /// `f64` storage.
    Float64(Vec<f64>),
    /// String storage.
    Utf8(Vec<String>),
    /// String storage (64-bit offset flavor).
    LargeUtf8(Vec<String>),
}

impl Column {
    /// Empty column of the given type.
    pub fn new(dtype: DataType) -> Self {
        match dtype {
            DataType::Bool => Self::Bool(Vec::new()),
            DataType::Int32 => Self::Int32(Vec::new()),
            DataType::UInt32 => Self::UInt32(Vec::new()),
            DataType::Int64 => Self::Int64(Vec::new()),
            DataType::UInt64 => Self::UInt64(Vec::new()),
            DataType::Float32 => Self::Float32(Vec::new()),
            DataType::Float64 => Self::Float64(Vec::new()),
            DataType::Utf8 => Self::Utf8(Vec::new()),
            DataType::LargeUtf8 => Self::LargeUtf8(Vec::new()),
        }
    }

    /// Element type tag.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Int32(_) => DataType::Int32,
            Self::UInt32(_) => DataType::UInt32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::LargeUtf8(_) => DataType::LargeUtf8,
        }
    }

    /// Row count.
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Utf8(v) | Self::LargeUtf8(v) => v.len(),
        }
    }

    /// True when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `idx` widened to a [`DynValue`], or `None` past the end.
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, idx: usize) -> Option<DynValue> {
        match self {
            Self::Bool(v) => v.get(idx).map(|b| DynValue::Bool(*b)),
            Self::Int32(v) => v.get(idx).map(|x| DynValue::Int(i64::from(*x))),
            Self::UInt32(v) => v.get(idx).map(|x| DynValue::Int(i64::from(*x))),
            Self::Int64(v) => v.get(idx).map(|x| DynValue::Int(*x)),
            Self::UInt64(v) => v.get(idx).map(|x| {
                i64::try_from(*x).map_or(DynValue::Float(*x as f64), DynValue::Int)
            }),
            Self::Float32(v) => v.get(idx).map(|x| DynValue::Float(f64::from(*x))),
            Self::Float64(v) => v.get(idx).map(|x| DynValue::Float(*x)),
            Self::Utf8(v) | Self::LargeUtf8(v) => {
                v.get(idx).map(|s| DynValue::Str(s.clone()))
            }
        }
    }

    /// Append a dynamic value, coercing where the target type allows it
    /// (`Int64` takes ints, `Float64` takes ints and floats, string
    /// columns take strings).
    ///
    /// # Errors
    /// [`EngineError::DataType`] when the value does not fit the column.
    #[allow(clippy::cast_precision_loss)]
    pub fn push_value(&mut self, value: &DynValue) -> Result<(), EngineError> {
        match (self, value) {
            (Self::Int64(v), DynValue::Int(x)) => {
                v.push(*x);
                Ok(())
            }
            (Self::Float64(v), DynValue::Int(x)) => {
                v.push(*x as f64);
                Ok(())
            }
            (Self::Float64(v), DynValue::Float(x)) => {
                v.push(*x);
                Ok(())
            }
            (Self::Utf8(v) | Self::LargeUtf8(v), DynValue::Str(s)) => {
                v.push(s.clone());
                Ok(())
            }
            (Self::Bool(v), DynValue::Bool(b)) => {
                v.push(*b);
                Ok(())
            }
            (col, other) => Err(EngineError::DataType(format!(
                "cannot append {} value to {} column",
                match other {
                    DynValue::Null => "null",
                    DynValue::Bool(_) => "bool",
                    DynValue::Int(_) => "int",
                    DynValue::Float(_) => "float",
                    DynValue::Str(_) => "string",
                    DynValue::List(_) => "list",
                    DynValue::Map(_) => "map",
                },
                col.data_type().name()
            ))),
        }
    }

    /// Copy row `idx` of `src` onto the end of this column.
    ///
    /// Unlike [`Column::push_value`] this is an exact-type copy with no
    /// widening.
    ///
    /// # Errors
    /// [`EngineError::DataType`] on type mismatch,
    /// [`EngineError::InvalidValue`] when `idx` is past the end of `src`.
    pub fn push_from(&mut self, src: &Self, idx: usize) -> Result<(), EngineError> {
        fn fetch<T: Clone>(v: &[T], idx: usize) -> Result<T, EngineError> {
            v.get(idx).cloned().ok_or_else(|| {
                EngineError::InvalidValue(format!("row {idx} out of column bounds"))
            })
        }
        match (self, src) {
            (Self::Bool(dst), Self::Bool(s)) => dst.push(fetch(s, idx)?),
            (Self::Int32(dst), Self::Int32(s)) => dst.push(fetch(s, idx)?),
            (Self::UInt32(dst), Self::UInt32(s)) => dst.push(fetch(s, idx)?),
            (Self::Int64(dst), Self::Int64(s)) => dst.push(fetch(s, idx)?),
            (Self::UInt64(dst), Self::UInt64(s)) => dst.push(fetch(s, idx)?),
            (Self::Float32(dst), Self::Float32(s)) => dst.push(fetch(s, idx)?),
            (Self::Float64(dst), Self::Float64(s)) => dst.push(fetch(s, idx)?),
            (Self::Utf8(dst), Self::Utf8(s)) | (Self::LargeUtf8(dst), Self::LargeUtf8(s)) => {
                dst.push(fetch(s, idx)?);
            }
            (dst, src) => {
                return Err(EngineError::DataType(format!(
                    "cannot copy {} row into {} column",
                    src.data_type().name(),
                    dst.data_type().name()
                )));
            }
        }
        Ok(())
    }

    /// Append the type's default (zero / empty string / false).
    pub fn push_default(&mut self) {
        match self {
            Self::Bool(v) => v.push(false),
            Self::Int32(v) => v.push(0),
            Self::UInt32(v) => v.push(0),
            Self::Int64(v) => v.push(0),
            Self::UInt64(v) => v.push(0),
            Self::Float32(v) => v.push(0.0),
            Self::Float64(v) => v.push(0.0),
            Self::Utf8(v) | Self::LargeUtf8(v) => v.push(String::new()),
        }
    }
}
