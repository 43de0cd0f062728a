use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::backend::{
    bool_value, Backend, BinaryOp, CmpOp, HostBuffer, NativeData, ReduceOp, UnaryOp,
};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::{checked_elem_count, elem_count, Layout};

// CpuBackend: the baseline engine, always available
//
// Values live in one flat `Arc<Vec<f64>>` per array, viewed through a
// `Layout`. Every dtype except complex is held in f64 storage and rounded
// with `DType::cast_value` whenever a result is produced, so an int32 array
// only ever contains values an int32 can hold.
//
// Transpose, slice, index and broadcast only build a new Layout over the
// same buffer. Everything else walks the input layouts and writes a fresh
// contiguous buffer.

/// Native value of the CPU engine.
#[derive(Debug, Clone)]
pub struct CpuArray {
    values: Arc<Vec<f64>>,
    layout: Layout,
    dtype: DType,
}

impl CpuArray {
    fn contiguous(dims: &[usize], values: Vec<f64>, dtype: DType) -> Self {
        CpuArray {
            values: Arc::new(values),
            layout: Layout::contiguous(dims),
            dtype,
        }
    }

    fn view(&self, layout: Layout) -> Self {
        CpuArray {
            values: Arc::clone(&self.values),
            layout,
            dtype: self.dtype,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Elements in logical row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        if self.layout.is_contiguous() {
            return self.values[..self.layout.elem_count()].to_vec();
        }
        self.layout
            .strided_indices()
            .map(|i| self.values[i])
            .collect()
    }

    /// True when two arrays share one storage buffer.
    pub fn shares_storage(&self, other: &CpuArray) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

/// The baseline engine: priority 0, every non-complex dtype.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub const NAME: &'static str = "cpu";

    fn array<'a>(&self, data: &'a NativeData) -> Result<&'a CpuArray> {
        data.downcast_ref::<CpuArray>()
            .ok_or_else(|| Error::msg("value is not owned by the cpu backend"))
    }

    fn wrap(array: CpuArray) -> NativeData {
        NativeData::new(array)
    }

    fn check_dtype(&self, dtype: DType) -> Result<()> {
        if !self.supports_dtype(dtype) {
            return Err(Error::unsupported(Self::NAME, format!("dtype {dtype}")));
        }
        Ok(())
    }
}

/// Output extents of an element-wise op over same-rank operands.
pub(crate) fn broadcast_dims(operands: &[&[usize]]) -> Result<Vec<usize>> {
    let rank = operands.first().map(|d| d.len()).unwrap_or(0);
    if operands.iter().any(|d| d.len() != rank) {
        return Err(Error::msg(format!(
            "element-wise operands must have equal rank, got {operands:?}"
        )));
    }
    let mut out = vec![1usize; rank];
    for (axis, size) in out.iter_mut().enumerate() {
        for dims in operands {
            let d = dims[axis];
            if d == *size || d == 1 {
                continue;
            }
            if *size != 1 {
                return Err(Error::msg(format!(
                    "cannot broadcast extents {operands:?} on axis {axis}"
                )));
            }
            *size = d;
        }
    }
    Ok(out)
}

/// Split `dims` around `axis` into (outer, size, inner) element counts.
pub(crate) fn split_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
    (
        elem_count(&dims[..axis]),
        dims[axis],
        elem_count(&dims[axis + 1..]),
    )
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        0
    }

    fn supports_dtype(&self, dtype: DType) -> bool {
        !dtype.is_complex()
    }

    fn is_native(&self, data: &NativeData) -> bool {
        data.is::<CpuArray>()
    }

    fn dtype(&self, data: &NativeData) -> Result<DType> {
        Ok(self.array(data)?.dtype)
    }

    fn dims(&self, data: &NativeData) -> Result<Vec<usize>> {
        Ok(self.array(data)?.layout.dims().to_vec())
    }

    fn from_host(&self, host: HostBuffer) -> Result<NativeData> {
        if !self.supports_dtype(host.dtype) {
            return Err(Error::conversion(
                "host",
                Self::NAME,
                format!("dtype {} is not supported", host.dtype),
            ));
        }
        let HostBuffer {
            dims,
            dtype,
            values,
        } = host;
        let values = values.into_iter().map(|v| dtype.cast_value(v)).collect();
        Ok(Self::wrap(CpuArray::contiguous(&dims, values, dtype)))
    }

    fn to_host(&self, data: &NativeData) -> Result<HostBuffer> {
        let a = self.array(data)?;
        HostBuffer::new(a.layout.dims().to_vec(), a.dtype, a.to_vec())
    }

    fn full(&self, dims: &[usize], value: f64, dtype: DType) -> Result<NativeData> {
        self.check_dtype(dtype)?;
        let values = vec![dtype.cast_value(value); checked_elem_count(dims)?];
        Ok(Self::wrap(CpuArray::contiguous(dims, values, dtype)))
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
        let mut rng = seeded_rng(seed);
        let values = (0..checked_elem_count(dims)?)
            .map(|_| dtype.cast_value(low + (high - low) * rng.gen::<f64>()))
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(dims, values, dtype)))
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
        let mut rng = seeded_rng(seed);
        let values = (0..checked_elem_count(dims)?)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                dtype.cast_value(mean + std * z)
            })
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(dims, values, dtype)))
    }

    fn unary(&self, op: UnaryOp, x: &NativeData) -> Result<NativeData> {
        let a = self.array(x)?;
        let dtype = op.result_dtype(a.dtype);
        let values = a
            .layout
            .strided_indices()
            .map(|i| dtype.cast_value(op.apply(a.values[i])))
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(a.layout.dims(), values, dtype)))
    }

    fn binary(&self, op: BinaryOp, lhs: &NativeData, rhs: &NativeData) -> Result<NativeData> {
        let (a, b) = (self.array(lhs)?, self.array(rhs)?);
        let dims = broadcast_dims(&[a.layout.dims(), b.layout.dims()])?;
        let dtype = op.result_dtype(a.dtype, b.dtype);
        let la = a.layout.broadcast_to(&dims)?;
        let lb = b.layout.broadcast_to(&dims)?;
        let values = la
            .strided_indices()
            .zip(lb.strided_indices())
            .map(|(i, j)| dtype.cast_value(op.apply(a.values[i], b.values[j])))
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(&dims, values, dtype)))
    }

    fn compare(&self, op: CmpOp, lhs: &NativeData, rhs: &NativeData) -> Result<NativeData> {
        let (a, b) = (self.array(lhs)?, self.array(rhs)?);
        let dims = broadcast_dims(&[a.layout.dims(), b.layout.dims()])?;
        let la = a.layout.broadcast_to(&dims)?;
        let lb = b.layout.broadcast_to(&dims)?;
        let values = la
            .strided_indices()
            .zip(lb.strided_indices())
            .map(|(i, j)| bool_value(op.apply(a.values[i], b.values[j])))
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(&dims, values, DType::BOOL)))
    }

    fn where_cond(
        &self,
        cond: &NativeData,
        on_true: &NativeData,
        on_false: &NativeData,
    ) -> Result<NativeData> {
        let (c, a, b) = (self.array(cond)?, self.array(on_true)?, self.array(on_false)?);
        let dims = broadcast_dims(&[c.layout.dims(), a.layout.dims(), b.layout.dims()])?;
        let dtype = DType::promote(a.dtype, b.dtype);
        let lc = c.layout.broadcast_to(&dims)?;
        let la = a.layout.broadcast_to(&dims)?;
        let lb = b.layout.broadcast_to(&dims)?;
        let values = lc
            .strided_indices()
            .zip(la.strided_indices().zip(lb.strided_indices()))
            .map(|(k, (i, j))| {
                let v = if c.values[k] != 0.0 {
                    a.values[i]
                } else {
                    b.values[j]
                };
                dtype.cast_value(v)
            })
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(&dims, values, dtype)))
    }

    fn cast(&self, x: &NativeData, dtype: DType) -> Result<NativeData> {
        self.check_dtype(dtype)?;
        let a = self.array(x)?;
        let values = a
            .layout
            .strided_indices()
            .map(|i| dtype.cast_value(a.values[i]))
            .collect();
        Ok(Self::wrap(CpuArray::contiguous(a.layout.dims(), values, dtype)))
    }

    fn reduce(&self, op: ReduceOp, x: &NativeData, axes: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let rank = a.layout.rank();
        if let Some(bad) = axes.iter().find(|&&ax| ax >= rank) {
            return Err(Error::msg(format!("reduce axis {bad} out of range for rank {rank}")));
        }
        // kept axes first, reduced axes last: each output is one run
        let mut perm: Vec<usize> = (0..rank).filter(|ax| !axes.contains(ax)).collect();
        let out_dims: Vec<usize> = perm.iter().map(|&ax| a.layout.dims()[ax]).collect();
        perm.extend((0..rank).filter(|ax| axes.contains(ax)));
        let group = elem_count(
            &perm[out_dims.len()..]
                .iter()
                .map(|&ax| a.layout.dims()[ax])
                .collect::<Vec<_>>(),
        );
        let dtype = op.result_dtype(a.dtype);
        let ordered: Vec<f64> = a
            .layout
            .permute(&perm)?
            .strided_indices()
            .map(|i| a.values[i])
            .collect();
        let values = if group == 0 {
            vec![dtype.cast_value(op.fold(std::iter::empty())); elem_count(&out_dims)]
        } else {
            ordered
                .chunks(group)
                .map(|run| dtype.cast_value(op.fold(run.iter().copied())))
                .collect()
        };
        Ok(Self::wrap(CpuArray::contiguous(&out_dims, values, dtype)))
    }

    fn reshape(&self, x: &NativeData, dims: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let n = checked_elem_count(dims)?;
        if n != a.layout.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: a.layout.elem_count(),
                got: n,
            });
        }
        match a.layout.reshape(dims) {
            Some(layout) => Ok(Self::wrap(a.view(layout))),
            None => Ok(Self::wrap(CpuArray::contiguous(dims, a.to_vec(), a.dtype))),
        }
    }

    fn transpose(&self, x: &NativeData, perm: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        Ok(Self::wrap(a.view(a.layout.permute(perm)?)))
    }

    fn concat(&self, xs: &[&NativeData], axis: usize) -> Result<NativeData> {
        let arrays = xs
            .iter()
            .map(|x| self.array(x))
            .collect::<Result<Vec<_>>>()?;
        let first = arrays
            .first()
            .ok_or_else(|| Error::msg("concat needs at least one value"))?;
        let rank = first.layout.rank();
        if axis >= rank {
            return Err(Error::msg(format!("concat axis {axis} out of range for rank {rank}")));
        }
        let mut out_dims = first.layout.dims().to_vec();
        out_dims[axis] = 0;
        let mut dtype = first.dtype;
        for a in &arrays {
            let dims = a.layout.dims();
            let same_elsewhere = dims.len() == rank
                && (0..rank).all(|i| i == axis || dims[i] == first.layout.dims()[i]);
            if !same_elsewhere {
                return Err(Error::msg(format!(
                    "cannot concat extents {:?} and {:?} along axis {axis}",
                    first.layout.dims(),
                    dims
                )));
            }
            out_dims[axis] += dims[axis];
            dtype = DType::promote(dtype, a.dtype);
        }
        let (outer, _, inner) = split_axis(&out_dims, axis);
        let parts: Vec<Vec<f64>> = arrays.iter().map(|a| a.to_vec()).collect();
        let mut values = Vec::with_capacity(elem_count(&out_dims));
        for o in 0..outer {
            for (a, part) in arrays.iter().zip(&parts) {
                let run = a.layout.dims()[axis] * inner;
                values.extend(part[o * run..(o + 1) * run].iter().map(|&v| dtype.cast_value(v)));
            }
        }
        Ok(Self::wrap(CpuArray::contiguous(&out_dims, values, dtype)))
    }

    fn broadcast_to(&self, x: &NativeData, dims: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        Ok(Self::wrap(a.view(a.layout.broadcast_to(dims)?)))
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
        Ok(Self::wrap(a.view(a.layout.slice(axis, start, len, step)?)))
    }

    fn index(&self, x: &NativeData, axis: usize, index: usize) -> Result<NativeData> {
        let a = self.array(x)?;
        Ok(Self::wrap(a.view(a.layout.index(axis, index)?)))
    }

    fn gather(&self, x: &NativeData, axis: usize, indices: &[usize]) -> Result<NativeData> {
        let a = self.array(x)?;
        let dims = a.layout.dims();
        if axis >= dims.len() {
            return Err(Error::msg(format!("gather axis {axis} out of range")));
        }
        let (outer, size, inner) = split_axis(dims, axis);
        if let Some(&bad) = indices.iter().find(|&&i| i >= size) {
            return Err(Error::msg(format!(
                "gather index {bad} out of range for axis {axis} of size {size}"
            )));
        }
        let src = a.to_vec();
        let mut values = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            for &i in indices {
                let start = (o * size + i) * inner;
                values.extend_from_slice(&src[start..start + inner]);
            }
        }
        let mut out_dims = dims.to_vec();
        out_dims[axis] = indices.len();
        Ok(Self::wrap(CpuArray::contiguous(&out_dims, values, a.dtype)))
    }

    fn scatter(
        &self,
        x: &NativeData,
        axis: usize,
        indices: &[usize],
        updates: &NativeData,
    ) -> Result<NativeData> {
        let (a, u) = (self.array(x)?, self.array(updates)?);
        let dims = a.layout.dims();
        if axis >= dims.len() {
            return Err(Error::msg(format!("scatter axis {axis} out of range")));
        }
        let mut expected = dims.to_vec();
        expected[axis] = indices.len();
        if u.layout.dims() != expected.as_slice() {
            return Err(Error::msg(format!(
                "scatter updates have extents {:?}, expected {:?}",
                u.layout.dims(),
                expected
            )));
        }
        let (outer, size, inner) = split_axis(dims, axis);
        if let Some(&bad) = indices.iter().find(|&&i| i >= size) {
            return Err(Error::msg(format!(
                "scatter index {bad} out of range for axis {axis} of size {size}"
            )));
        }
        let mut values = a.to_vec();
        let src = u.to_vec();
        for o in 0..outer {
            for (k, &i) in indices.iter().enumerate() {
                let dst = (o * size + i) * inner;
                let from = (o * indices.len() + k) * inner;
                for j in 0..inner {
                    values[dst + j] = a.dtype.cast_value(src[from + j]);
                }
            }
        }
        Ok(Self::wrap(CpuArray::contiguous(dims, values, a.dtype)))
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(dims: &[usize], values: &[f64]) -> NativeData {
        CpuBackend
            .from_host(HostBuffer::new(dims.to_vec(), DType::FLOAT64, values.to_vec()).unwrap())
            .unwrap()
    }

    fn values(d: &NativeData) -> Vec<f64> {
        CpuBackend.to_host(d).unwrap().values
    }

    #[test]
    fn test_binary_broadcast() {
        let a = host(&[2, 1], &[1.0, 2.0]);
        let b = host(&[1, 3], &[10.0, 20.0, 30.0]);
        let c = CpuBackend.binary(BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(CpuBackend.dims(&c).unwrap(), vec![2, 3]);
        assert_eq!(values(&c), vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn test_int_division_is_float() {
        let a = CpuBackend.full(&[2], 3.0, DType::INT32).unwrap();
        let b = CpuBackend.full(&[2], 2.0, DType::INT32).unwrap();
        let c = CpuBackend.binary(BinaryOp::Div, &a, &b).unwrap();
        assert_eq!(CpuBackend.dtype(&c).unwrap(), DType::FLOAT32);
        assert_eq!(values(&c), vec![1.5, 1.5]);
    }

    #[test]
    fn test_transpose_is_a_view() {
        let a = host(&[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let t = CpuBackend.transpose(&a, &[1, 0]).unwrap();
        let (ra, rt) = (
            a.downcast_ref::<CpuArray>().unwrap(),
            t.downcast_ref::<CpuArray>().unwrap(),
        );
        assert!(ra.shares_storage(rt));
        assert_eq!(values(&t), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_reduce_axes() {
        let a = host(&[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let rows = CpuBackend.reduce(ReduceOp::Sum, &a, &[1]).unwrap();
        assert_eq!(values(&rows), vec![3.0, 12.0]);
        let cols = CpuBackend.reduce(ReduceOp::Max, &a, &[0]).unwrap();
        assert_eq!(values(&cols), vec![3.0, 4.0, 5.0]);
        let all = CpuBackend.reduce(ReduceOp::Mean, &a, &[0, 1]).unwrap();
        assert_eq!(CpuBackend.dims(&all).unwrap(), Vec::<usize>::new());
        assert_eq!(values(&all), vec![2.5]);
    }

    #[test]
    fn test_concat_middle_axis() {
        let a = host(&[2, 1], &[1.0, 2.0]);
        let b = host(&[2, 2], &[3.0, 4.0, 5.0, 6.0]);
        let c = CpuBackend.concat(&[&a, &b], 1).unwrap();
        assert_eq!(CpuBackend.dims(&c).unwrap(), vec![2, 3]);
        assert_eq!(values(&c), vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_slice_gather_scatter() {
        let a = host(&[5], &[0.0, 1.0, 2.0, 3.0, 4.0]);
        let s = CpuBackend.slice(&a, 0, 1, 2, 2).unwrap();
        assert_eq!(values(&s), vec![1.0, 3.0]);
        let g = CpuBackend.gather(&a, 0, &[4, 0]).unwrap();
        assert_eq!(values(&g), vec![4.0, 0.0]);
        let u = host(&[2], &[9.0, 8.0]);
        let sc = CpuBackend.scatter(&a, 0, &[1, 3], &u).unwrap();
        assert_eq!(values(&sc), vec![0.0, 9.0, 2.0, 8.0, 4.0]);
        // source untouched
        assert_eq!(values(&a), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let a = CpuBackend
            .random_normal(&[8], 0.0, 1.0, DType::FLOAT64, Some(7))
            .unwrap();
        let b = CpuBackend
            .random_normal(&[8], 0.0, 1.0, DType::FLOAT64, Some(7))
            .unwrap();
        assert_eq!(values(&a), values(&b));
        let u = CpuBackend
            .random_uniform(&[100], 2.0, 3.0, DType::FLOAT32, Some(1))
            .unwrap();
        assert!(values(&u).iter().all(|&v| (2.0..=3.0).contains(&v)));
    }

    #[test]
    fn test_complex_unsupported() {
        assert!(!CpuBackend.supports_dtype(DType::COMPLEX64));
        assert!(matches!(
            CpuBackend.from_host(HostBuffer::new(vec![1], DType::COMPLEX64, vec![0.0]).unwrap()),
            Err(Error::ConversionError { .. })
        ));
    }
}
