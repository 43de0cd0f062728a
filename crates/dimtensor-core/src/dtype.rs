use std::fmt;

use crate::error::{Error, Result};

// DType: scalar element kind plus bit width
//
// A DType is backend-independent. Engines decide which DTypes they can hold
// natively (see `Backend::supports_dtype`); the dispatcher only compares and
// promotes them.
//
//   float16 / float32 / float64
//   int8 / int16 / int32 / int64
//   bool (stored as 8 bits)
//   complex64 / complex128

/// The element kind of a DType.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DTypeKind {
    Bool,
    Int,
    Float,
    Complex,
}

impl fmt::Display for DTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DTypeKind::Bool => "bool",
            DTypeKind::Int => "int",
            DTypeKind::Float => "float",
            DTypeKind::Complex => "complex",
        };
        write!(f, "{s}")
    }
}

/// Scalar element type: a kind and a bit width.
///
/// Two DTypes are equal iff kind and bits match. There is no global default
/// instance; callers always pick one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DType {
    kind: DTypeKind,
    bits: u8,
}

impl DType {
    pub const FLOAT16: DType = DType::raw(DTypeKind::Float, 16);
    pub const FLOAT32: DType = DType::raw(DTypeKind::Float, 32);
    pub const FLOAT64: DType = DType::raw(DTypeKind::Float, 64);
    pub const INT8: DType = DType::raw(DTypeKind::Int, 8);
    pub const INT16: DType = DType::raw(DTypeKind::Int, 16);
    pub const INT32: DType = DType::raw(DTypeKind::Int, 32);
    pub const INT64: DType = DType::raw(DTypeKind::Int, 64);
    pub const BOOL: DType = DType::raw(DTypeKind::Bool, 8);
    pub const COMPLEX64: DType = DType::raw(DTypeKind::Complex, 64);
    pub const COMPLEX128: DType = DType::raw(DTypeKind::Complex, 128);

    const fn raw(kind: DTypeKind, bits: u8) -> Self {
        DType { kind, bits }
    }

    /// Build a DType, validating that the bit width exists for the kind.
    pub fn new(kind: DTypeKind, bits: u32) -> Result<Self> {
        let valid = match kind {
            DTypeKind::Bool => bits == 8,
            DTypeKind::Int => matches!(bits, 8 | 16 | 32 | 64),
            DTypeKind::Float => matches!(bits, 16 | 32 | 64),
            DTypeKind::Complex => matches!(bits, 64 | 128),
        };
        if !valid {
            return Err(Error::msg(format!("no {kind} dtype with {bits} bits")));
        }
        Ok(DType::raw(kind, bits as u8))
    }

    pub fn float(bits: u32) -> Result<Self> {
        Self::new(DTypeKind::Float, bits)
    }

    pub fn int(bits: u32) -> Result<Self> {
        Self::new(DTypeKind::Int, bits)
    }

    pub fn bool() -> Self {
        DType::BOOL
    }

    pub fn complex(bits: u32) -> Result<Self> {
        Self::new(DTypeKind::Complex, bits)
    }

    pub fn kind(&self) -> DTypeKind {
        self.kind
    }

    pub fn bits(&self) -> u32 {
        self.bits as u32
    }

    /// Size of one element in bytes.
    pub fn itemsize(&self) -> usize {
        self.bits as usize / 8
    }

    pub fn is_float(&self) -> bool {
        self.kind == DTypeKind::Float
    }

    pub fn is_int(&self) -> bool {
        self.kind == DTypeKind::Int
    }

    pub fn is_bool(&self) -> bool {
        self.kind == DTypeKind::Bool
    }

    pub fn is_complex(&self) -> bool {
        self.kind == DTypeKind::Complex
    }

    /// Result type of combining two operands.
    ///
    /// bool < int < float < complex; within the winning kind the widest bit
    /// width wins. Mixing a float with a complex widens the complex so that
    /// each component can hold the float.
    pub fn promote(a: DType, b: DType) -> DType {
        let kind = a.kind.max(b.kind);
        let widest = |k: DTypeKind| {
            [a, b]
                .iter()
                .filter(|d| d.kind == k)
                .map(|d| d.bits)
                .max()
                .unwrap_or(0)
        };
        let mut bits = widest(kind);
        if kind == DTypeKind::Complex {
            bits = bits.max(widest(DTypeKind::Float).saturating_mul(2));
        }
        DType::raw(kind, bits)
    }

    /// The float type that holds the result of true division.
    pub fn to_float(&self) -> DType {
        match self.kind {
            DTypeKind::Float | DTypeKind::Complex => *self,
            DTypeKind::Int if self.bits == 64 => DType::FLOAT64,
            _ => DType::FLOAT32,
        }
    }

    /// Round a value held in f64 storage to what this dtype can represent.
    ///
    /// Integers truncate toward zero and saturate at their bit width, bools
    /// are 1.0 for any non-zero input, float16/32 lose their extra precision.
    pub fn cast_value(&self, v: f64) -> f64 {
        match (self.kind, self.bits) {
            (DTypeKind::Bool, _) => {
                if v != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            (DTypeKind::Int, bits) => {
                let max = 2f64.powi(bits as i32 - 1) - 1.0;
                let min = -(2f64.powi(bits as i32 - 1));
                if v.is_nan() {
                    0.0
                } else {
                    v.trunc().clamp(min, max)
                }
            }
            (DTypeKind::Float, 16) => half::f16::from_f64(v).to_f64(),
            (DTypeKind::Float, 32) => v as f32 as f64,
            _ => v,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DTypeKind::Bool => write!(f, "bool"),
            kind => write!(f, "{}{}", kind, self.bits),
        }
    }
}

// WithDType: bridge between Rust scalar types and the runtime DType

/// Trait implemented by Rust types that can be stored in a tensor.
///
/// Provides the mapping between the concrete Rust type and its DType, plus
/// conversions to/from f64 for the host interchange format.
pub trait WithDType: Copy + Send + Sync + 'static + std::fmt::Debug {
    /// The corresponding DType.
    const DTYPE: DType;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;
}

macro_rules! with_dtype_num {
    ($ty:ty, $dtype:expr) => {
        impl WithDType for $ty {
            const DTYPE: DType = $dtype;
            fn to_f64(self) -> f64 {
                num_traits::ToPrimitive::to_f64(&self).unwrap_or(f64::NAN)
            }
            fn from_f64(v: f64) -> Self {
                num_traits::NumCast::from($dtype.cast_value(v)).unwrap_or_default()
            }
        }
    };
}

with_dtype_num!(f32, DType::FLOAT32);
with_dtype_num!(f64, DType::FLOAT64);
with_dtype_num!(i32, DType::INT32);
with_dtype_num!(i64, DType::INT64);
with_dtype_num!(i16, DType::INT16);
with_dtype_num!(i8, DType::INT8);

impl WithDType for half::f16 {
    const DTYPE: DType = DType::FLOAT16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for bool {
    const DTYPE: DType = DType::BOOL;
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
    fn from_f64(v: f64) -> Self {
        v != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_equality() {
        assert_eq!(DType::float(32).unwrap(), DType::FLOAT32);
        assert_ne!(DType::FLOAT32, DType::FLOAT64);
        assert_ne!(DType::INT32, DType::FLOAT32);
    }

    #[test]
    fn test_invalid_bits() {
        assert!(DType::float(8).is_err());
        assert!(DType::int(12).is_err());
        assert!(DType::complex(32).is_err());
    }

    #[test]
    fn test_itemsize() {
        assert_eq!(DType::FLOAT16.itemsize(), 2);
        assert_eq!(DType::INT64.itemsize(), 8);
        assert_eq!(DType::BOOL.itemsize(), 1);
        assert_eq!(DType::COMPLEX128.itemsize(), 16);
    }

    #[test]
    fn test_promote() {
        assert_eq!(DType::promote(DType::INT32, DType::FLOAT16), DType::FLOAT16);
        assert_eq!(DType::promote(DType::INT64, DType::INT8), DType::INT64);
        assert_eq!(DType::promote(DType::BOOL, DType::INT8), DType::INT8);
        assert_eq!(
            DType::promote(DType::FLOAT64, DType::COMPLEX64),
            DType::COMPLEX128
        );
    }

    #[test]
    fn test_cast_value() {
        assert_eq!(DType::INT32.cast_value(2.7), 2.0);
        assert_eq!(DType::INT32.cast_value(-2.7), -2.0);
        assert_eq!(DType::INT8.cast_value(1000.0), 127.0);
        assert_eq!(DType::BOOL.cast_value(-3.0), 1.0);
        assert_eq!(DType::FLOAT64.cast_value(0.1), 0.1);
    }

    #[test]
    fn test_with_dtype() {
        assert_eq!(f32::DTYPE, DType::FLOAT32);
        assert_eq!(i64::from_f64(42.9), 42);
        assert!(bool::from_f64(0.5));
        assert_eq!(f32::from_f64(3.14).to_f64(), 3.140000104904175);
    }

    #[test]
    fn test_display() {
        assert_eq!(DType::FLOAT32.to_string(), "float32");
        assert_eq!(DType::BOOL.to_string(), "bool");
        assert_eq!(DType::COMPLEX64.to_string(), "complex64");
    }
}
