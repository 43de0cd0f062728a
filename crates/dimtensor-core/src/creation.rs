use crate::backend::BackendRef;
use crate::config;
use crate::context;
use crate::dim::{DimKind, Dimension};
use crate::dtype::DType;
use crate::error::Result;
use crate::shape::{IntoShape, Shape};
use crate::tensor::Tensor;

// Creation functions
//
// Every function here builds a new tensor on the *active* backend (the
// innermost scope, else the process-wide default, else the baseline CPU
// engine). Shapes can be given as a `Shape` or as `(name, size)` pairs whose
// kinds are inferred from the names:
//
//   zeros([("x", 4), ("vector", 2)], DType::FLOAT32)
//       -> (vector:c=2, x:s=4)
//
// All sizes must be concrete; symbolic and non-uniform shapes are rejected
// with `InvalidShape`.

fn prepare(shape: impl IntoShape) -> Result<(BackendRef, Shape, Vec<usize>)> {
    let shape = shape.into_shape()?;
    let dims = shape.resolved_sizes()?;
    let backend = context::active_backend()?;
    Ok((backend, shape, dims))
}

/// A tensor filled with `value`.
pub fn full(shape: impl IntoShape, value: f64, dtype: DType) -> Result<Tensor> {
    let (backend, shape, dims) = prepare(shape)?;
    log::trace!("full({value}) {dtype} {shape} on '{}'", backend.name());
    let data = backend.full(&dims, value, dtype)?;
    Tensor::from_native(backend, data, shape)
}

pub fn zeros(shape: impl IntoShape, dtype: DType) -> Result<Tensor> {
    let (backend, shape, dims) = prepare(shape)?;
    let data = backend.zeros(&dims, dtype)?;
    Tensor::from_native(backend, data, shape)
}

pub fn ones(shape: impl IntoShape, dtype: DType) -> Result<Tensor> {
    let (backend, shape, dims) = prepare(shape)?;
    let data = backend.ones(&dims, dtype)?;
    Tensor::from_native(backend, data, shape)
}

/// Uniform samples in `[low, high)`.
///
/// Seeded from the thread's `Config` when it carries a seed; otherwise from
/// entropy.
pub fn random_uniform(shape: impl IntoShape, low: f64, high: f64, dtype: DType) -> Result<Tensor> {
    if low.is_nan() || high.is_nan() || low >= high {
        crate::bail!("random_uniform needs low < high, got [{low}, {high})");
    }
    let (backend, shape, dims) = prepare(shape)?;
    let seed = config::next_seed();
    log::trace!("random_uniform {dtype} {shape} seed={seed:?}");
    let data = backend.random_uniform(&dims, low, high, dtype, seed)?;
    Tensor::from_native(backend, data, shape)
}

/// Normal samples with the given mean and standard deviation.
pub fn random_normal(shape: impl IntoShape, mean: f64, std: f64, dtype: DType) -> Result<Tensor> {
    if !std.is_finite() || std < 0.0 {
        crate::bail!("random_normal needs a finite std >= 0, got {std}");
    }
    let (backend, shape, dims) = prepare(shape)?;
    let seed = config::next_seed();
    log::trace!("random_normal {dtype} {shape} seed={seed:?}");
    let data = backend.random_normal(&dims, mean, std, dtype, seed)?;
    Tensor::from_native(backend, data, shape)
}

/// `start, start + step, ...` below `stop`, along a new dimension `name`.
pub fn arange(
    name: &str,
    kind: DimKind,
    start: f64,
    stop: f64,
    step: f64,
    dtype: DType,
) -> Result<Tensor> {
    let backend = context::active_backend()?;
    let data = backend.arange(start, stop, step, dtype)?;
    let n = backend.dims(&data)?.first().copied().unwrap_or(0);
    let shape = Shape::new(vec![Dimension::new(name, kind, n)])?;
    Tensor::from_native(backend, data, shape)
}

/// `num` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(
    name: &str,
    kind: DimKind,
    start: f64,
    stop: f64,
    num: usize,
    dtype: DType,
) -> Result<Tensor> {
    let values: Vec<f64> = match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    };
    let shape = Shape::new(vec![Dimension::new(name, kind, num)])?;
    Tensor::from_f64_slice(&values, shape, dtype)
}
