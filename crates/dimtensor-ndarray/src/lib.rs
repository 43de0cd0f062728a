// ndarray Backend: a second engine built on `ndarray` with rayon kernels
//
// This crate provides an implementation of the dimtensor Backend trait on
// top of `ndarray::ArcArray<f64, IxDyn>`. It outranks the baseline CPU
// engine (priority 10 vs 0), so an expression mixing the two runs here and
// the CPU operands are converted first.
//
// ARCHITECTURE:
// - NdArray pairs a shared dynamic-rank array with its DType; values are
//   held as f64 and rounded with `DType::cast_value` on every write
// - transpose, slice and index are O(1) views on the shared buffer
// - element-wise kernels run through `Zip`; arrays with at least
//   `parallel_threshold` elements use `par_map_collect` (rayon)
// - reductions move reduced axes last and fold each output lane, lanes in
//   parallel
//
// USAGE:
//   let nd: BackendRef = Arc::new(NdarrayBackend::new());
//   let t = with_backend(nd, || zeros([("x", 4)], DType::FLOAT32))?;

use std::sync::Arc;

use ndarray::{ArcArray, ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, Uniform};
use rayon::prelude::*;

use dimtensor_core::backend::{
    bool_value, Backend, BackendRef, BinaryOp, CmpOp, HostBuffer, NativeData, ReduceOp, UnaryOp,
};
use dimtensor_core::dtype::DType;
use dimtensor_core::error::{Error, Result};
use dimtensor_core::layout::checked_elem_count;

type Data = ArcArray<f64, IxDyn>;

// NdArray: native value of this engine

/// Native value of the ndarray engine.
#[derive(Debug, Clone)]
pub struct NdArray {
    array: Data,
    dtype: DType,
}

impl NdArray {
    fn new(array: ArrayD<f64>, dtype: DType) -> Self {
        NdArray {
            array: array.into_shared(),
            dtype,
        }
    }

    pub fn array(&self) -> &ArcArray<f64, IxDyn> {
        &self.array
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Row-major copy if the array is a strided view.
    fn standard(&self) -> Data {
        if self.array.is_standard_layout() {
            self.array.clone()
        } else {
            self.array.as_standard_layout().into_owned().into_shared()
        }
    }
}

// NdarrayBackend

/// ndarray-backed engine, priority 10.
#[derive(Debug, Clone, Copy)]
pub struct NdarrayBackend {
    parallel_threshold: usize,
}

impl Default for NdarrayBackend {
    fn default() -> Self {
        NdarrayBackend {
            parallel_threshold: Self::DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl NdarrayBackend {
    pub const NAME: &'static str = "ndarray";
    pub const PRIORITY: i32 = 10;

    /// Element count from which kernels run on the rayon pool.
    pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 15;

    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, ready for scopes and `set_global_default`.
    pub fn shared() -> BackendRef {
        Arc::new(Self::new())
    }

    pub fn with_parallel_threshold(mut self, elements: usize) -> Self {
        self.parallel_threshold = elements;
        self
    }

    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    fn array<'a>(&self, data: &'a NativeData) -> Result<&'a NdArray> {
        data.downcast_ref::<NdArray>()
            .ok_or_else(|| Error::msg("value is not owned by the ndarray backend"))
    }

    fn wrap(array: ArrayD<f64>, dtype: DType) -> NativeData {
        NativeData::new(NdArray::new(array, dtype))
    }

    fn view(data: Data, dtype: DType) -> NativeData {
        NativeData::new(NdArray { array: data, dtype })
    }

    fn check_dtype(&self, dtype: DType) -> Result<()> {
        if !self.supports_dtype(dtype) {
            return Err(Error::unsupported(Self::NAME, format!("dtype {dtype}")));
        }
        Ok(())
    }

    fn check_axis(op: &str, axis: usize, rank: usize) -> Result<()> {
        if axis >= rank {
            return Err(Error::msg(format!(
                "{op} axis {axis} out of range for rank {rank}"
            )));
        }
        Ok(())
    }

    fn parallel(&self, len: usize) -> bool {
        len >= self.parallel_threshold
    }

    fn map1<F>(&self, a: ArrayViewD<'_, f64>, f: F) -> ArrayD<f64>
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let zip = Zip::from(&a);
        if self.parallel(a.len()) {
            zip.par_map_collect(|&x| f(x))
        } else {
            zip.map_collect(|&x| f(x))
        }
    }

    fn map2<F>(&self, a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>, f: F) -> ArrayD<f64>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        let zip = Zip::from(&a).and(&b);
        if self.parallel(a.len()) {
            zip.par_map_collect(|&x, &y| f(x, y))
        } else {
            zip.map_collect(|&x, &y| f(x, y))
        }
    }
}

/// Broadcast extents of same-rank operands (extent 1 stretches).
fn broadcast_dims(operands: &[&[usize]]) -> Result<Vec<usize>> {
    let rank = operands.first().map_or(0, |d| d.len());
    let mut out = vec![1usize; rank];
    for dims in operands {
        if dims.len() != rank {
            return Err(Error::msg(format!(
                "element-wise operands must have equal rank, got {operands:?}"
            )));
        }
        for (o, &d) in out.iter_mut().zip(dims.iter()) {
            match (*o, d) {
                (a, b) if a == b || b == 1 => {}
                (1, b) => *o = b,
                _ => {
                    return Err(Error::msg(format!(
                        "cannot broadcast extents {operands:?}"
                    )))
                }
            }
        }
    }
    Ok(out)
}

fn broadcast<'a>(a: &'a NdArray, dims: &[usize]) -> Result<ArrayViewD<'a, f64>> {
    a.array.broadcast(IxDyn(dims)).ok_or_else(|| {
        Error::msg(format!(
            "cannot broadcast extents {:?} to {dims:?}",
            a.array.shape()
        ))
    })
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

fn from_vec(dims: &[usize], values: Vec<f64>) -> Result<ArrayD<f64>> {
    ArrayD::from_shape_vec(IxDyn(dims), values)
        .map_err(|e| Error::msg(format!("ndarray shape error: {e}")))
}

impl Backend for NdarrayBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn supports_dtype(&self, dtype: DType) -> bool {
        !dtype.is_complex()
    }

    fn is_native(&self, data: &NativeData) -> bool {
        data.is::<NdArray>()
    }

    fn dtype(&self, data: &NativeData) -> Result<DType> {
        Ok(self.array(data)?.dtype)
    }

    fn dims(&self, data: &NativeData) -> Result<Vec<usize>> {
        Ok(self.array(data)?.array.shape().to_vec())
    }

    fn from_host(&self, host: HostBuffer) -> Result<NativeData> {
        if !self.supports_dtype(host.dtype) {
            return Err(Error::conversion(
                "host",
                Self::NAME,
                format!("dtype {} is not supported", host.dtype),
            ));
        }
        let dtype = host.dtype;
        let values = host.values.into_iter().map(|v| dtype.cast_value(v)).collect();
        Ok(Self::wrap(from_vec(&host.dims, values)?, dtype))
    }

    fn to_host(&self, data: &NativeData) -> Result<HostBuffer> {
        let a = self.array(data)?;
        HostBuffer::new(
            a.array.shape().to_vec(),
            a.dtype,
            a.array.iter().copied().collect(),
        )
    }

    fn full(&self, dims: &[usize], value: f64, dtype: DType) -> Result<NativeData> {
        self.check_dtype(dtype)?;
        checked_elem_count(dims)?;
        Ok(Self::wrap(
            ArrayD::from_elem(IxDyn(dims), dtype.cast_value(value)),
            dtype,
        ))
    }

    fn random_uniform(
        &self,
        dims: &[usize],
        low: f64,
        high: f64,
        dtype: DType,
        seed: Option<u64>,
    ) -> Result<NativeData> {
        self.check_dtype(dtype)?;
        if low.is_nan() || high.is_nan() || low >= high {
            return Err(Error::msg(format!("empty uniform range [{low}, {high})")));
        }
        let dist = Uniform::new(low, high);
        let mut rng = seeded_rng(seed);
        let n = checked_elem_count(dims)?;
        let values = (0..n).map(|_| dtype.cast_value(rng.sample(dist))).collect();
        Ok(Self::wrap(from_vec(dims, values)?, dtype))
    }

    fn random_normal(
        &self,
        dims: &[usize],
        mean: f64,
        std: f64,
        dtype: DType,
        seed: Option<u64>,
    ) -> Result<NativeData> {
        self.check_dtype(dtype)?;
        let dist = Normal::new(mean, std)
            .map_err(|e| Error::msg(format!("invalid normal distribution: {e}")))?;
        let mut rng = seeded_rng(seed);
        let n = checked_elem_count(dims)?;
        let values = (0..n).map(|_| dtype.cast_value(rng.sample(dist))).collect();
        Ok(Self::wrap(from_vec(dims, values)?, dtype))
    }

    fn unary(&self, op: UnaryOp, x: &NativeData) -> Result<NativeData> {
        let a = self.array(x)?;
        let dtype = op.result_dtype(a.dtype);
        log::trace!("ndarray unary {op:?} over {:?}", a.array.shape());
        let out = self.map1(a.array.view(), |v| dtype.cast_value(op.apply(v)));
        Ok(Self::wrap(out, dtype))
    }

    fn binary(&self, op: BinaryOp, lhs: &NativeData, rhs: &NativeData) -> Result<NativeData> {
        let (a, b) = (self.array(lhs)?, self.array(rhs)?);
        let dims = broadcast_dims(&[a.array.shape(), b.array.shape()])?;
        let dtype = op.result_dtype(a.dtype, b.dtype);
        log::trace!("ndarray binary {op:?} over {dims:?}");
        let out = self.map2(broadcast(a, &dims)?, broadcast(b, &dims)?, |x, y| {
            dtype.cast_value(op.apply(x, y))
        });
        Ok(Self::wrap(out, dtype))
    }

    fn compare(&self, op: CmpOp, lhs: &NativeData, rhs: &NativeData) -> Result<NativeData> {
        let (a, b) = (self.array(lhs)?, self.array(rhs)?);
        let dims = broadcast_dims(&[a.array.shape(), b.array.shape()])?;
        let out = self.map2(broadcast(a, &dims)?, broadcast(b, &dims)?, |x, y| {
            bool_value(op.apply(x, y))
        });
        Ok(Self::wrap(out, DType::BOOL))
    }

    fn where_cond(
        &self,
        cond: &NativeData,
        on_true: &NativeData,
        on_false: &NativeData,
    ) -> Result<NativeData> {
        let (c, a, b) = (self.array(cond)?, self.array(on_true)?, self.array(on_false)?);
        let dims = broadcast_dims(&[c.array.shape(), a.array.shape(), b.array.shape()])?;
        let dtype = DType::promote(a.dtype, b.dtype);
        let (vc, va, vb) = (broadcast(c, &dims)?, broadcast(a, &dims)?, broadcast(b, &dims)?);
        let pick = |&k: &f64, &x: &f64, &y: &f64| dtype.cast_value(if k != 0.0 { x } else { y });
        let zip = Zip::from(&vc).and(&va).and(&vb);
        let out = if self.parallel(vc.len()) {
            zip.par_map_collect(pick)
        } else {
            zip.map_collect(pick)
        };
        Ok(Self::wrap(out, dtype))
    }

    fn cast(&self, x: &NativeData, dtype: DType) -> Result<NativeData> {
        self.check_dtype(dtype)?;
        let a = self.array(x)?;
        let out = self.map1(a.array.view(), |v| dtype.cast_value(v));
        Ok(Self::wrap(out, dtype))
    }

    fn reduce(&self, op: ReduceOp, x: &NativeData, axes: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let shape = a.array.shape();
        let rank = shape.len();
        for &ax in axes {
            Self::check_axis("reduce", ax, rank)?;
        }
        let mut perm: Vec<usize> = (0..rank).filter(|ax| !axes.contains(ax)).collect();
        let out_dims: Vec<usize> = perm.iter().map(|&ax| shape[ax]).collect();
        perm.extend((0..rank).filter(|ax| axes.contains(ax)));
        let lanes: usize = out_dims.iter().product();
        let group: usize = perm[out_dims.len()..].iter().map(|&ax| shape[ax]).product();
        let dtype = op.result_dtype(a.dtype);
        log::trace!("ndarray reduce {op:?} axes {axes:?} of {shape:?}");

        let moved = a.array.clone().permuted_axes(IxDyn(&perm));
        let flat = moved
            .as_standard_layout()
            .into_owned()
            .into_shape((lanes, group))
            .map_err(|e| Error::msg(format!("ndarray shape error: {e}")))?;
        let fold = |lane: ndarray::ArrayView1<'_, f64>| dtype.cast_value(op.fold(lane.iter().copied()));
        let values: Vec<f64> = if self.parallel(lanes * group) {
            flat.axis_iter(Axis(0)).into_par_iter().map(fold).collect()
        } else {
            flat.axis_iter(Axis(0)).map(fold).collect()
        };
        Ok(Self::wrap(from_vec(&out_dims, values)?, dtype))
    }

    fn reshape(&self, x: &NativeData, dims: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let n = checked_elem_count(dims)?;
        if n != a.array.len() {
            return Err(Error::ElementCountMismatch {
                expected: a.array.len(),
                got: n,
            });
        }
        let reshaped = a
            .standard()
            .into_shape(IxDyn(dims))
            .map_err(|e| Error::msg(format!("ndarray shape error: {e}")))?;
        Ok(Self::view(reshaped, a.dtype))
    }

    fn transpose(&self, x: &NativeData, perm: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let rank = a.array.ndim();
        let mut seen = vec![false; rank];
        for &p in perm {
            if p >= rank || std::mem::replace(&mut seen[p], true) {
                return Err(Error::msg(format!(
                    "{perm:?} is not a permutation of {rank} axes"
                )));
            }
        }
        if perm.len() != rank {
            return Err(Error::msg(format!(
                "{perm:?} is not a permutation of {rank} axes"
            )));
        }
        Ok(Self::view(a.array.clone().permuted_axes(IxDyn(perm)), a.dtype))
    }

    fn concat(&self, xs: &[&NativeData], axis: usize) -> Result<NativeData> {
        let arrays = xs
            .iter()
            .map(|x| self.array(x))
            .collect::<Result<Vec<_>>>()?;
        let first = arrays
            .first()
            .ok_or_else(|| Error::msg("concat needs at least one value"))?;
        Self::check_axis("concat", axis, first.array.ndim())?;
        let dtype = arrays
            .iter()
            .fold(first.dtype, |acc, a| DType::promote(acc, a.dtype));
        let views: Vec<ArrayViewD<'_, f64>> = arrays.iter().map(|a| a.array.view()).collect();
        let joined = ndarray::concatenate(Axis(axis), &views)
            .map_err(|e| Error::msg(format!("cannot concat along axis {axis}: {e}")))?;
        Ok(Self::wrap(joined.mapv(|v| dtype.cast_value(v)), dtype))
    }

    fn broadcast_to(&self, x: &NativeData, dims: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let out = broadcast(a, dims)?.to_owned();
        Ok(Self::wrap(out, a.dtype))
    }

    fn slice(
        &self,
        x: &NativeData,
        axis: usize,
        start: usize,
        len: usize,
        step: usize,
    ) -> Result<NativeData> {
        let a = self.array(x)?;
        Self::check_axis("slice", axis, a.array.ndim())?;
        let size = a.array.len_of(Axis(axis));
        let end = if len == 0 { start } else { start + (len - 1) * step + 1 };
        if step == 0 || end > size {
            return Err(Error::msg(format!(
                "slice {start}+{len}x{step} out of range for axis {axis} of size {size}"
            )));
        }
        let mut out = a.array.clone();
        out.slice_axis_inplace(
            Axis(axis),
            ndarray::Slice::new(start as isize, Some(end as isize), step as isize),
        );
        Ok(Self::view(out, a.dtype))
    }

    fn index(&self, x: &NativeData, axis: usize, index: usize) -> Result<NativeData> {
        let a = self.array(x)?;
        Self::check_axis("index", axis, a.array.ndim())?;
        let size = a.array.len_of(Axis(axis));
        if index >= size {
            return Err(Error::msg(format!(
                "index {index} out of range for axis {axis} of size {size}"
            )));
        }
        let out = a.array.clone().index_axis_move(Axis(axis), index);
        Ok(Self::view(out, a.dtype))
    }

    fn gather(&self, x: &NativeData, axis: usize, indices: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        Self::check_axis("gather", axis, a.array.ndim())?;
        let size = a.array.len_of(Axis(axis));
        if let Some(&bad) = indices.iter().find(|&&i| i >= size) {
            return Err(Error::msg(format!(
                "gather index {bad} out of range for axis {axis} of size {size}"
            )));
        }
        Ok(Self::wrap(a.array.select(Axis(axis), indices), a.dtype))
    }

    fn scatter(
        &self,
        x: &NativeData,
        axis: usize,
        indices: &[usize],
        updates: &NativeData,
    ) -> Result<NativeData> {
        let (a, u) = (self.array(x)?, self.array(updates)?);
        Self::check_axis("scatter", axis, a.array.ndim())?;
        let mut expected = a.array.shape().to_vec();
        expected[axis] = indices.len();
        if u.array.shape() != expected.as_slice() {
            return Err(Error::msg(format!(
                "scatter updates have extents {:?}, expected {expected:?}",
                u.array.shape()
            )));
        }
        let size = a.array.len_of(Axis(axis));
        if let Some(&bad) = indices.iter().find(|&&i| i >= size) {
            return Err(Error::msg(format!(
                "scatter index {bad} out of range for axis {axis} of size {size}"
            )));
        }
        let dtype = a.dtype;
        let mut out = a.array.to_owned();
        for (k, &i) in indices.iter().enumerate() {
            out.index_axis_mut(Axis(axis), i)
                .assign(&u.array.index_axis(Axis(axis), k).mapv(|v| dtype.cast_value(v)));
        }
        Ok(Self::wrap(out, dtype))
    }
}
