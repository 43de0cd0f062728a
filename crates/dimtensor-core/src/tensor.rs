use std::fmt;
use std::sync::Arc;

use crate::backend::{self, BackendRef, BinaryOp, CmpOp, HostBuffer, NativeData, ReduceOp, UnaryOp};
use crate::context;
use crate::dim::{Dimension, Size};
use crate::dispatch;
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::shape::{IntoShape, Shape};
use crate::stack;

// Tensor: a Shape paired with engine-owned data
//
// A Tensor never exposes positions. Its Shape names every axis, and the
// native value behind it has exactly one axis per dimension, in the same
// (canonical) order, with the same extents. Dimensions a tensor does not
// have are treated as size 1 when it meets other tensors.
//
// STORAGE
//
//   Dense    one native value owned by `backend`
//   Stacked  one tensor per slice of a stacking dimension, used when the
//            slices disagree on some size (a non-uniform shape). The
//            components share the tensor's backend and dtype.
//
// MEMORY MODEL
//
//   The inner data is wrapped in Arc, so cloning a Tensor is O(1). Tensors
//   are immutable: every operation returns a new Tensor and the backend
//   binding of an existing tensor never changes.

#[derive(Clone)]
pub(crate) enum Storage {
    Dense(NativeData),
    Stacked {
        along: String,
        components: Vec<Tensor>,
    },
}

struct TensorInner {
    shape: Shape,
    dtype: DType,
    backend: BackendRef,
    storage: Storage,
}

/// A tensor with named, typed dimensions bound to one backend.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, backend={}{})",
            self.inner.shape,
            self.inner.dtype,
            self.inner.backend.name(),
            if self.is_stacked() { ", stacked" } else { "" }
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inner.dtype, self.inner.shape)
    }
}

impl Tensor {
    // Construction

    /// Wrap a native value. The backend must recognise it and its extents
    /// must match `shape` exactly.
    pub fn from_native(backend: BackendRef, data: NativeData, shape: Shape) -> Result<Self> {
        if !backend.is_native(&data) {
            return Err(Error::conversion(
                "foreign value",
                backend.name(),
                "value is not recognised by the backend",
            ));
        }
        let dims = backend.dims(&data)?;
        let expected = shape.resolved_sizes()?;
        if dims != expected {
            return Err(Error::InvalidShape(format!(
                "native extents {dims:?} do not match shape {shape}"
            )));
        }
        let dtype = backend.dtype(&data)?;
        log::trace!("wrapped {} {} on '{}'", dtype, shape, backend.name());
        Ok(Tensor {
            inner: Arc::new(TensorInner {
                shape,
                dtype,
                backend,
                storage: Storage::Dense(data),
            }),
        })
    }

    /// A non-uniform tensor made of per-slice components. Callers guarantee
    /// that component `i` has shape `shape.slice_component(along, i)`.
    pub(crate) fn stacked(
        shape: Shape,
        along: String,
        components: Vec<Tensor>,
        backend: BackendRef,
        dtype: DType,
    ) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                shape,
                dtype,
                backend,
                storage: Storage::Stacked { along, components },
            }),
        }
    }

    /// Tensor from row-major values on the active backend.
    pub fn from_f64_slice(values: &[f64], shape: impl IntoShape, dtype: DType) -> Result<Self> {
        let shape = shape.into_shape()?;
        let backend = context::active_backend()?;
        Self::from_f64_slice_on(&backend, values, shape, dtype)
    }

    pub(crate) fn from_f64_slice_on(
        backend: &BackendRef,
        values: &[f64],
        shape: Shape,
        dtype: DType,
    ) -> Result<Self> {
        let dims = shape.resolved_sizes()?;
        let host = HostBuffer::new(dims, dtype, values.to_vec())?;
        let data = backend.from_host(host)?;
        Self::from_native(Arc::clone(backend), data, shape)
    }

    /// Tensor from typed values; the dtype follows `T`.
    pub fn from_vec<T: WithDType>(values: Vec<T>, shape: impl IntoShape) -> Result<Self> {
        let values: Vec<f64> = values.into_iter().map(T::to_f64).collect();
        Self::from_f64_slice(&values, shape, T::DTYPE)
    }

    /// A 0-dimensional tensor on the active backend.
    pub fn scalar(value: f64, dtype: DType) -> Result<Self> {
        Self::from_f64_slice(&[value], Shape::empty(), dtype)
    }

    /// Same shape and dtype, filled with zeros, on this tensor's backend.
    pub fn zeros_like(&self) -> Result<Self> {
        self.full_like(0.0)
    }

    pub fn ones_like(&self) -> Result<Self> {
        self.full_like(1.0)
    }

    /// Same shape and dtype, filled with `value`, on this tensor's backend.
    pub fn full_like(&self, value: f64) -> Result<Self> {
        match &self.inner.storage {
            Storage::Dense(_) => {
                let dims = self.inner.shape.resolved_sizes()?;
                let data = self.inner.backend.full(&dims, value, self.inner.dtype)?;
                Self::from_native(self.backend(), data, self.inner.shape.clone())
            }
            Storage::Stacked { .. } => stack::map_components(self, |c| c.full_like(value)),
        }
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Shared handle to the owning backend.
    pub fn backend(&self) -> BackendRef {
        Arc::clone(&self.inner.backend)
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Number of elements; `None` for a non-uniform tensor.
    pub fn volume(&self) -> Option<usize> {
        self.inner.shape.volume()
    }

    pub fn is_uniform(&self) -> bool {
        self.inner.shape.is_uniform()
    }

    pub fn is_stacked(&self) -> bool {
        matches!(self.inner.storage, Storage::Stacked { .. })
    }

    /// The native value, if this tensor is dense.
    pub fn native(&self) -> Option<&NativeData> {
        match &self.inner.storage {
            Storage::Dense(data) => Some(data),
            Storage::Stacked { .. } => None,
        }
    }

    /// Name of the stacking dimension, if this tensor is non-uniform.
    pub fn stack_dim(&self) -> Option<&str> {
        match &self.inner.storage {
            Storage::Stacked { along, .. } => Some(along),
            Storage::Dense(_) => None,
        }
    }

    /// Per-slice tensors along the stacking dimension.
    pub fn components(&self) -> Option<&[Tensor]> {
        match &self.inner.storage {
            Storage::Stacked { components, .. } => Some(components),
            Storage::Dense(_) => None,
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    /// Native value or an error naming `op`.
    pub(crate) fn dense_data(&self, op: &str) -> Result<&NativeData> {
        self.native().ok_or_else(|| {
            Error::unsupported(self.backend_name(), format!("{op} on a non-uniform tensor"))
        })
    }

    // Conversion

    /// Copy of this tensor bound to `target`. The original is untouched.
    pub fn to_backend(&self, target: &BackendRef) -> Result<Self> {
        if backend::same_backend(&self.inner.backend, target) {
            return Ok(self.clone());
        }
        match &self.inner.storage {
            Storage::Dense(data) => {
                let converted = backend::convert(data, &self.inner.backend, target)?;
                Self::from_native(Arc::clone(target), converted, self.inner.shape.clone())
            }
            Storage::Stacked { along, components } => {
                let components = components
                    .iter()
                    .map(|c| c.to_backend(target))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::stacked(
                    self.inner.shape.clone(),
                    along.clone(),
                    components,
                    Arc::clone(target),
                    self.inner.dtype,
                ))
            }
        }
    }

    /// Row-major host copy with extents in shape order.
    pub fn to_host(&self) -> Result<HostBuffer> {
        let data = self.dense_data("to_host")?;
        self.inner.backend.to_host(data)
    }

    /// All values in canonical shape order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.to_host()?.values)
    }

    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        Ok(self.to_f64_vec()?.into_iter().map(T::from_f64).collect())
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar_f64(&self) -> Result<f64> {
        let values = self.to_f64_vec()?;
        match values.as_slice() {
            [v] => Ok(*v),
            _ => Err(Error::ElementCountMismatch {
                expected: 1,
                got: values.len(),
            }),
        }
    }

    /// Element cast to another dtype on the same backend.
    pub fn cast(&self, dtype: DType) -> Result<Self> {
        if dtype == self.inner.dtype {
            return Ok(self.clone());
        }
        match &self.inner.storage {
            Storage::Dense(data) => {
                let out = self.inner.backend.cast(data, dtype)?;
                Self::from_native(self.backend(), out, self.inner.shape.clone())
            }
            Storage::Stacked { along, components } => {
                let components = components
                    .iter()
                    .map(|c| c.cast(dtype))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::stacked(
                    self.inner.shape.clone(),
                    along.clone(),
                    components,
                    self.backend(),
                    dtype,
                ))
            }
        }
    }

    // Shape manipulation

    /// Same values under a renamed dimension.
    pub fn rename_dim(&self, old: &str, new: &str) -> Result<Self> {
        let shape = self.inner.shape.rename(old, new)?;
        match &self.inner.storage {
            // same kind, so the dimension keeps its position
            Storage::Dense(data) => Self::from_native(self.backend(), data.clone(), shape),
            Storage::Stacked { along, components } => {
                let components = components
                    .iter()
                    .map(|c| {
                        if c.shape().contains(old) {
                            c.rename_dim(old, new)
                        } else {
                            Ok(c.clone())
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                let along = if along == old { new.to_string() } else { along.clone() };
                Ok(Self::stacked(
                    shape,
                    along,
                    components,
                    self.backend(),
                    self.inner.dtype,
                ))
            }
        }
    }

    /// Materialized broadcast onto the merge of this shape and `target`.
    ///
    /// When the merged shape is non-uniform the result is stacked: slice `i`
    /// of this tensor is expanded onto slice `i` of the merged shape, so
    /// per-slice sizes resolve one slice at a time. The stacking dimension
    /// must then be part of the merged shape.
    pub fn expand(&self, target: &Shape) -> Result<Self> {
        let merged = self
            .inner
            .shape
            .merge_with(target, crate::config::batch_policy())?;
        let along = match (&self.inner.storage, merged.stacking_dims().first()) {
            (Storage::Stacked { along, .. }, _) => along.clone(),
            (Storage::Dense(_), Some(along)) => along.to_string(),
            (Storage::Dense(_), None) => {
                return dispatch::expand_exact(self, &merged, &self.inner.backend)
            }
        };
        let stack_dim = merged.dim(&along)?.clone();
        let n = stack_dim.size().fixed().unwrap_or(0);
        let components = (0..n)
            .map(|i| {
                let part = dispatch::slice_operand(self, &along, i)?;
                part.expand(&merged.slice_component(&along, i)?)
            })
            .collect::<Result<Vec<_>>>()?;
        stack::stack(&components, stack_dim)
    }

    /// A dimension's size as an int64 tensor.
    ///
    /// Fixed sizes give a 0-dimensional tensor. A non-uniform size gives a
    /// 1-D tensor along its stacking dimension.
    pub fn size_tensor(&self, name: &str) -> Result<Self> {
        let backend = self.backend();
        match self.inner.shape.get_size(name)? {
            Size::Fixed(n) => {
                Self::from_f64_slice_on(&backend, &[*n as f64], Shape::empty(), DType::INT64)
            }
            Size::NonUniform { along, sizes } => {
                let stack_dim: Dimension = self.inner.shape.dim(along)?.clone();
                let values: Vec<f64> = sizes.iter().map(|&s| s as f64).collect();
                Self::from_f64_slice_on(&backend, &values, Shape::new(vec![stack_dim])?, DType::INT64)
            }
            Size::Symbolic => Err(Error::InvalidShape(format!(
                "dimension '{name}' has no concrete size"
            ))),
        }
    }

    /// Copy with the positions `indices` along `name` replaced by `values`.
    ///
    /// `values` must have this tensor's shape with `name` resized to
    /// `indices.len()`; missing dimensions are broadcast.
    pub fn scatter(&self, name: &str, indices: &[usize], values: &Tensor) -> Result<Self> {
        let data = self.dense_data("scatter")?;
        let size = self.inner.shape.get_size(name)?.fixed().unwrap_or(0);
        if let Some(&bad) = indices.iter().find(|&&i| i >= size) {
            return Err(Error::IndexOutOfRange {
                dim: name.to_string(),
                index: bad,
                size,
            });
        }
        let axis = self
            .inner
            .shape
            .index_of(name)
            .ok_or_else(|| Error::not_found(name, &self.inner.shape))?;
        let update_shape = Shape::new(
            self.inner
                .shape
                .dims()
                .iter()
                .map(|d| {
                    if d.name() == name {
                        d.with_size(indices.len())
                    } else {
                        d.clone()
                    }
                })
                .collect(),
        )?;
        let updates = dispatch::expand_exact(values, &update_shape, &self.inner.backend)?;
        let updates = updates.dense_data("scatter")?;
        let out = self.inner.backend.scatter(data, axis, indices, updates)?;
        Self::from_native(self.backend(), out, self.inner.shape.clone())
    }

    // Element-wise operations

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Mul, self, rhs)
    }

    /// True division; integer operands give a float result.
    pub fn div(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Div, self, rhs)
    }

    pub fn pow(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Pow, self, rhs)
    }

    pub fn minimum(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Minimum, self, rhs)
    }

    pub fn maximum(&self, rhs: &Self) -> Result<Self> {
        dispatch::binary(BinaryOp::Maximum, self, rhs)
    }

    /// Add a constant, cast to this tensor's dtype.
    pub fn add_scalar(&self, value: f64) -> Result<Self> {
        let s = self.scalar_like(value)?;
        dispatch::binary(BinaryOp::Add, self, &s)
    }

    /// Multiply by a constant, cast to this tensor's dtype.
    pub fn mul_scalar(&self, value: f64) -> Result<Self> {
        let s = self.scalar_like(value)?;
        dispatch::binary(BinaryOp::Mul, self, &s)
    }

    fn scalar_like(&self, value: f64) -> Result<Self> {
        Self::from_f64_slice_on(&self.backend(), &[value], Shape::empty(), self.inner.dtype)
    }

    pub fn eq(&self, rhs: &Self) -> Result<Self> {
        dispatch::compare(CmpOp::Eq, self, rhs)
    }

    pub fn ne(&self, rhs: &Self) -> Result<Self> {
        dispatch::compare(CmpOp::Ne, self, rhs)
    }

    pub fn gt(&self, rhs: &Self) -> Result<Self> {
        dispatch::compare(CmpOp::Gt, self, rhs)
    }

    pub fn ge(&self, rhs: &Self) -> Result<Self> {
        dispatch::compare(CmpOp::Ge, self, rhs)
    }

    pub fn lt(&self, rhs: &Self) -> Result<Self> {
        dispatch::compare(CmpOp::Lt, self, rhs)
    }

    pub fn le(&self, rhs: &Self) -> Result<Self> {
        dispatch::compare(CmpOp::Le, self, rhs)
    }

    /// `cond ? on_true : on_false`, broadcast over all three shapes.
    pub fn where_cond(cond: &Self, on_true: &Self, on_false: &Self) -> Result<Self> {
        dispatch::where_cond(cond, on_true, on_false)
    }

    pub fn neg(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Neg, self)
    }

    pub fn abs(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Abs, self)
    }

    pub fn exp(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Exp, self)
    }

    pub fn log(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Log, self)
    }

    pub fn sqrt(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Sqrt, self)
    }

    pub fn sin(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Sin, self)
    }

    pub fn cos(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Cos, self)
    }

    pub fn tanh(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Tanh, self)
    }

    pub fn floor(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Floor, self)
    }

    pub fn ceil(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Ceil, self)
    }

    pub fn round(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Round, self)
    }

    pub fn sign(&self) -> Result<Self> {
        dispatch::unary(UnaryOp::Sign, self)
    }

    // Reductions
    //
    // Named reductions consume exactly the listed dimensions, batch ones
    // included: naming a batch dimension is the only way to reduce over it.
    // The `*_all` variants consume every non-batch dimension and never touch
    // batch dimensions.

    pub fn sum<S: AsRef<str>>(&self, dims: &[S]) -> Result<Self> {
        dispatch::reduce(ReduceOp::Sum, self, dims)
    }

    pub fn mean<S: AsRef<str>>(&self, dims: &[S]) -> Result<Self> {
        dispatch::reduce(ReduceOp::Mean, self, dims)
    }

    pub fn min<S: AsRef<str>>(&self, dims: &[S]) -> Result<Self> {
        dispatch::reduce(ReduceOp::Min, self, dims)
    }

    pub fn max<S: AsRef<str>>(&self, dims: &[S]) -> Result<Self> {
        dispatch::reduce(ReduceOp::Max, self, dims)
    }

    pub fn any<S: AsRef<str>>(&self, dims: &[S]) -> Result<Self> {
        dispatch::reduce(ReduceOp::Any, self, dims)
    }

    pub fn all<S: AsRef<str>>(&self, dims: &[S]) -> Result<Self> {
        dispatch::reduce(ReduceOp::All, self, dims)
    }

    pub fn sum_all(&self) -> Result<Self> {
        dispatch::reduce_non_batch(ReduceOp::Sum, self)
    }

    pub fn mean_all(&self) -> Result<Self> {
        dispatch::reduce_non_batch(ReduceOp::Mean, self)
    }

    pub fn min_all(&self) -> Result<Self> {
        dispatch::reduce_non_batch(ReduceOp::Min, self)
    }

    pub fn max_all(&self) -> Result<Self> {
        dispatch::reduce_non_batch(ReduceOp::Max, self)
    }

    pub fn any_all(&self) -> Result<Self> {
        dispatch::reduce_non_batch(ReduceOp::Any, self)
    }

    pub fn all_all(&self) -> Result<Self> {
        dispatch::reduce_non_batch(ReduceOp::All, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::shape::{channel, spatial};

    fn cpu() -> BackendRef {
        Arc::new(CpuBackend)
    }

    #[test]
    fn test_shape_round_trip() {
        let s = spatial([("x", 3), ("y", 2)]).unwrap();
        let t = Tensor::from_f64_slice(&[0.0; 6], &s, DType::FLOAT32).unwrap();
        assert_eq!(t.shape(), &s);
        assert_eq!(t.volume(), Some(6));
        assert_eq!(t.backend_name(), "cpu");
    }

    #[test]
    fn test_element_count_checked() {
        let r = Tensor::from_f64_slice(&[1.0, 2.0], [("x", 3)], DType::FLOAT32);
        assert!(matches!(r, Err(Error::ElementCountMismatch { .. })));
    }

    #[test]
    fn test_from_native_checks_extents() {
        let b = cpu();
        let data = b.zeros(&[2, 3], DType::FLOAT32).unwrap();
        let bad = spatial([("x", 3), ("y", 2)]).unwrap();
        assert!(Tensor::from_native(Arc::clone(&b), data.clone(), bad).is_err());
        let good = spatial([("x", 2), ("y", 3)]).unwrap();
        assert!(Tensor::from_native(b, data, good).is_ok());
    }

    #[test]
    fn test_rename_reorders_data() {
        // (x=2, y=3) renamed x -> z keeps z first
        let t = Tensor::from_f64_slice(
            &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            spatial([("x", 2), ("y", 3)]).unwrap(),
            DType::FLOAT64,
        )
        .unwrap();
        let r = t.rename_dim("x", "z").unwrap();
        assert!(r.shape().contains("z"));
        assert!(!r.shape().contains("x"));
        assert_eq!(r.shape().names(), vec!["z", "y"]);
        let row = r.dim("z").unwrap().index(1).unwrap();
        assert_eq!(row.to_f64_vec().unwrap(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_expand_materializes() {
        let t = Tensor::from_f64_slice(&[1.0, 2.0], [("x", 2)], DType::FLOAT32).unwrap();
        let e = t.expand(&channel([("vector", 3)]).unwrap()).unwrap();
        assert_eq!(e.shape().names(), vec!["vector", "x"]);
        assert_eq!(e.to_f64_vec().unwrap(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_size_tensor_fixed() {
        let t = Tensor::from_f64_slice(&[0.0; 4], [("x", 4)], DType::FLOAT32).unwrap();
        let s = t.size_tensor("x").unwrap();
        assert_eq!(s.dtype(), DType::INT64);
        assert!(s.shape().is_empty());
        assert_eq!(s.to_scalar_f64().unwrap(), 4.0);
        assert!(t.size_tensor("y").is_err());
    }

    #[test]
    fn test_scatter_broadcasts_values() {
        let t = Tensor::from_f64_slice(
            &[0.0; 6],
            spatial([("x", 3), ("y", 2)]).unwrap(),
            DType::FLOAT32,
        )
        .unwrap();
        let v = Tensor::scalar(7.0, DType::FLOAT32).unwrap();
        let s = t.scatter("x", &[2], &v).unwrap();
        assert_eq!(s.to_f64_vec().unwrap(), vec![0.0, 0.0, 0.0, 0.0, 7.0, 7.0]);
        assert!(matches!(
            t.scatter("x", &[3], &v),
            Err(Error::IndexOutOfRange { index: 3, size: 3, .. })
        ));
        // original untouched
        assert_eq!(t.to_f64_vec().unwrap(), vec![0.0; 6]);
    }

    #[test]
    fn test_to_scalar_requires_one_element() {
        let t = Tensor::from_f64_slice(&[1.0, 2.0], [("x", 2)], DType::FLOAT32).unwrap();
        assert!(t.to_scalar_f64().is_err());
        assert_eq!(t.sum_all().unwrap().to_scalar_f64().unwrap(), 3.0);
    }

    #[test]
    fn test_scalar_ops_keep_dtype() {
        let t = Tensor::from_vec(vec![1i32, 2, 3], [("x", 3)]).unwrap();
        let r = t.mul_scalar(2.5).unwrap();
        assert_eq!(r.dtype(), DType::INT32);
        assert_eq!(r.to_vec::<i32>().unwrap(), vec![2, 4, 6]);
    }
}
