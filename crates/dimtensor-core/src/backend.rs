use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::checked_elem_count;

// Backend: the capability interface every array engine implements
//
// An engine owns its native values. The rest of the library never looks
// inside them: it hands `NativeData` handles back to the engine that made
// them, together with positional arguments (axes, extents, permutations).
// All names and kinds are resolved into positions by the dispatcher before
// a primitive is called.
//
// Engines are used as trait objects (`BackendRef`) because a single
// expression can combine tensors from different engines; which engine runs
// it is decided at runtime by `resolve`.
//
// Conversion between engines goes through `HostBuffer`, a row-major f64
// buffer plus extents and dtype. Every engine can produce one from its own
// values and build its own values from one.

/// Shared handle to an engine.
pub type BackendRef = Arc<dyn Backend>;

/// Opaque value owned by exactly one engine.
#[derive(Clone)]
pub struct NativeData {
    inner: Arc<dyn Any + Send + Sync>,
}

impl NativeData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        NativeData {
            inner: Arc::new(value),
        }
    }

    /// Borrow as the engine's own type, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }
}

impl fmt::Debug for NativeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeData(..)")
    }
}

/// Engine-neutral row-major buffer used for conversion and inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    pub dims: Vec<usize>,
    pub dtype: DType,
    pub values: Vec<f64>,
}

impl HostBuffer {
    pub fn new(dims: Vec<usize>, dtype: DType, values: Vec<f64>) -> Result<Self> {
        let expected = checked_elem_count(&dims)?;
        if values.len() != expected {
            return Err(Error::ElementCountMismatch {
                expected,
                got: values.len(),
            });
        }
        Ok(HostBuffer {
            dims,
            dtype,
            values,
        })
    }
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Floor,
    Ceil,
    Round,
    Sign,
}

impl UnaryOp {
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            UnaryOp::Neg => -v,
            UnaryOp::Abs => v.abs(),
            UnaryOp::Exp => v.exp(),
            UnaryOp::Log => v.ln(),
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Tanh => v.tanh(),
            UnaryOp::Floor => v.floor(),
            UnaryOp::Ceil => v.ceil(),
            UnaryOp::Round => v.round(),
            UnaryOp::Sign => {
                if v > 0.0 {
                    1.0
                } else if v < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Transcendental ops produce floats even from int input.
    pub fn result_dtype(&self, input: DType) -> DType {
        match self {
            UnaryOp::Exp
            | UnaryOp::Log
            | UnaryOp::Sqrt
            | UnaryOp::Sin
            | UnaryOp::Cos
            | UnaryOp::Tanh => input.to_float(),
            UnaryOp::Neg | UnaryOp::Abs | UnaryOp::Sign if input.is_bool() => DType::INT8,
            _ => input,
        }
    }
}

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Minimum,
    Maximum,
}

impl BinaryOp {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Minimum => a.min(b),
            BinaryOp::Maximum => a.max(b),
        }
    }

    /// Promoted operand type; true division always yields a float.
    pub fn result_dtype(&self, a: DType, b: DType) -> DType {
        let promoted = DType::promote(a, b);
        match self {
            BinaryOp::Div => promoted.to_float(),
            _ => promoted,
        }
    }
}

/// Element-wise comparisons, producing bool values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    pub fn apply(&self, a: f64, b: f64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
        }
    }
}

/// Reductions along a list of axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    Min,
    Max,
    Any,
    All,
}

impl ReduceOp {
    /// Fold a sequence of values. Empty input gives the op's identity.
    pub fn fold(&self, values: impl Iterator<Item = f64>) -> f64 {
        match self {
            ReduceOp::Sum => values.sum(),
            ReduceOp::Mean => {
                let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 {
                    f64::NAN
                } else {
                    sum / n as f64
                }
            }
            ReduceOp::Min => values.fold(f64::INFINITY, f64::min),
            ReduceOp::Max => values.fold(f64::NEG_INFINITY, f64::max),
            ReduceOp::Any => bool_value(values.into_iter().any(|v| v != 0.0)),
            ReduceOp::All => bool_value(values.into_iter().all(|v| v != 0.0)),
        }
    }

    pub fn result_dtype(&self, input: DType) -> DType {
        match self {
            ReduceOp::Any | ReduceOp::All => DType::BOOL,
            ReduceOp::Mean => input.to_float(),
            ReduceOp::Sum if input.is_bool() => DType::INT64,
            _ => input,
        }
    }
}

/// How engines hold a boolean in f64 form.
pub fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// The capability interface of an array engine.
///
/// Every method receives positional arguments only. Extents are always
/// resolved integers; axes refer to the native value's own axis order.
/// Element-wise primitives take operands of equal rank whose extents agree
/// or are 1 (virtual broadcasting).
///
/// Only recognition, host conversion and the metadata queries are required.
/// Primitives an engine lacks report `UnsupportedOperation` by default.
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Unique engine name; two handles with the same name are one engine.
    fn name(&self) -> &str;

    /// Rank used to pick the executing engine for mixed operands.
    fn priority(&self) -> i32;

    /// Whether the engine can hold values of this dtype natively.
    fn supports_dtype(&self, dtype: DType) -> bool;

    /// Recognition step: is this value one of ours?
    fn is_native(&self, data: &NativeData) -> bool;

    fn dtype(&self, data: &NativeData) -> Result<DType>;

    fn dims(&self, data: &NativeData) -> Result<Vec<usize>>;

    fn from_host(&self, host: HostBuffer) -> Result<NativeData>;

    fn to_host(&self, data: &NativeData) -> Result<HostBuffer>;

    // Creation

    fn full(&self, dims: &[usize], value: f64, dtype: DType) -> Result<NativeData> {
        let values = vec![dtype.cast_value(value); checked_elem_count(dims)?];
        self.from_host(HostBuffer::new(dims.to_vec(), dtype, values)?)
    }

    fn zeros(&self, dims: &[usize], dtype: DType) -> Result<NativeData> {
        self.full(dims, 0.0, dtype)
    }

    fn ones(&self, dims: &[usize], dtype: DType) -> Result<NativeData> {
        self.full(dims, 1.0, dtype)
    }

    /// 1-D values `start, start + step, ...` below `stop`.
    fn arange(&self, start: f64, stop: f64, step: f64, dtype: DType) -> Result<NativeData> {
        if step == 0.0 {
            return Err(Error::InvalidSlice("arange step must be non-zero".into()));
        }
        let n = ((stop - start) / step).ceil().max(0.0) as usize;
        let values = (0..n)
            .map(|i| dtype.cast_value(start + step * i as f64))
            .collect();
        self.from_host(HostBuffer::new(vec![n], dtype, values)?)
    }

    fn random_uniform(
        &self,
        _dims: &[usize],
        _low: f64,
        _high: f64,
        _dtype: DType,
        _seed: Option<u64>,
    ) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "random_uniform"))
    }

    fn random_normal(
        &self,
        _dims: &[usize],
        _mean: f64,
        _std: f64,
        _dtype: DType,
        _seed: Option<u64>,
    ) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "random_normal"))
    }

    // Element-wise

    fn unary(&self, _op: UnaryOp, _x: &NativeData) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "unary"))
    }

    fn binary(&self, _op: BinaryOp, _a: &NativeData, _b: &NativeData) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "binary"))
    }

    fn compare(&self, _op: CmpOp, _a: &NativeData, _b: &NativeData) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "compare"))
    }

    /// `cond != 0 ? a : b`, element-wise with broadcasting.
    fn where_cond(
        &self,
        _cond: &NativeData,
        _a: &NativeData,
        _b: &NativeData,
    ) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "where_cond"))
    }

    fn cast(&self, _x: &NativeData, _dtype: DType) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "cast"))
    }

    // Reductions

    /// Reduce over `axes`, removing them from the result.
    fn reduce(&self, _op: ReduceOp, _x: &NativeData, _axes: &[usize]) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "reduce"))
    }

    // Shape manipulation

    fn reshape(&self, _x: &NativeData, _dims: &[usize]) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "reshape"))
    }

    /// Output axis `i` is input axis `perm[i]`.
    fn transpose(&self, _x: &NativeData, _perm: &[usize]) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "transpose"))
    }

    fn concat(&self, _xs: &[&NativeData], _axis: usize) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "concat"))
    }

    /// Repeat size-1 axes to reach `dims` (same rank).
    fn broadcast_to(&self, _x: &NativeData, _dims: &[usize]) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "broadcast_to"))
    }

    /// `len` elements along `axis` from `start` with stride `step`.
    fn slice(
        &self,
        _x: &NativeData,
        _axis: usize,
        _start: usize,
        _len: usize,
        _step: usize,
    ) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "slice"))
    }

    /// Select one position along `axis` and drop the axis.
    fn index(&self, x: &NativeData, axis: usize, index: usize) -> Result<NativeData> {
        let sliced = self.slice(x, axis, index, 1, 1)?;
        let mut dims = self.dims(&sliced)?;
        dims.remove(axis);
        self.reshape(&sliced, &dims)
    }

    /// Pick positions `indices` along `axis`.
    fn gather(&self, _x: &NativeData, _axis: usize, _indices: &[usize]) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "gather"))
    }

    /// Copy of `x` with positions `indices` along `axis` replaced by the
    /// matching slices of `values`.
    fn scatter(
        &self,
        _x: &NativeData,
        _axis: usize,
        _indices: &[usize],
        _values: &NativeData,
    ) -> Result<NativeData> {
        Err(Error::unsupported(self.name(), "scatter"))
    }
}

/// Two handles refer to the same engine.
pub fn same_backend(a: &BackendRef, b: &BackendRef) -> bool {
    Arc::ptr_eq(a, b) || a.name() == b.name()
}

/// Pick the engine that executes an operation over values from `backends`.
///
/// All the same: that engine. Otherwise the highest priority wins; ties go
/// to the earliest operand.
pub fn resolve(backends: &[&BackendRef]) -> Result<BackendRef> {
    let first = backends
        .first()
        .ok_or_else(|| Error::msg("cannot resolve a backend for zero operands"))?;
    if backends.iter().all(|b| same_backend(first, b)) {
        return Ok(Arc::clone(first));
    }
    let mut best = *first;
    for b in &backends[1..] {
        if b.priority() > best.priority() {
            best = b;
        }
    }
    log::debug!(
        "mixed backends [{}] resolved to '{}'",
        backends
            .iter()
            .map(|b| b.name())
            .collect::<Vec<_>>()
            .join(", "),
        best.name()
    );
    Ok(Arc::clone(best))
}

/// Move a value from one engine into another.
///
/// Pure: the source value is untouched and the result is freshly allocated
/// by the target. A dtype the target cannot hold is a `ConversionError`.
pub fn convert(data: &NativeData, from: &BackendRef, to: &BackendRef) -> Result<NativeData> {
    if same_backend(from, to) {
        return Ok(data.clone());
    }
    let host = from.to_host(data)?;
    if !to.supports_dtype(host.dtype) {
        return Err(Error::conversion(
            from.name(),
            to.name(),
            format!("dtype {} is not supported by the target", host.dtype),
        ));
    }
    log::debug!(
        "converting {:?} {} values from '{}' to '{}'",
        host.dims,
        host.dtype,
        from.name(),
        to.name()
    );
    to.from_host(host).map_err(|e| match e {
        e @ Error::ConversionError { .. } => e,
        other => Error::conversion(from.name(), to.name(), other.to_string()),
    })
}
