use std::sync::Arc;

use crate::backend::{self, BackendRef, BinaryOp, CmpOp, NativeData, ReduceOp, UnaryOp};
use crate::config;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::stack;
use crate::tensor::{Storage, Tensor};

// Dispatcher: from named operands to one positional backend call
//
// For an operation over tensors T1..Tn:
//
//   1. result shape  = merge of all operand shapes (config batch policy)
//   2. backend       = backend::resolve over the operands' engines
//   3. each operand is converted to that backend, transposed into the
//      result shape's order, and given size-1 axes for the dimensions it
//      lacks (`align`)
//   4. the primitive runs on the aligned values; the engine broadcasts the
//      size-1 axes
//   5. the raw output is wrapped with the result shape
//
// Batch dimensions pass through untouched: the primitives are element-wise
// or reduce only the axes they are given, so every batch slice is computed
// independently even though the engine runs them in one call.
//
// NON-UNIFORM OPERANDS
//
// A stacked operand is handled one slice at a time: every operand is cut at
// slice i of the stacking dimension (components are taken as they are,
// dense operands that have the dimension are indexed, the rest are reused),
// the operation runs on the slices and the results are stacked again.

/// Bring `t`'s value into `target`'s axis order on `backend`, with size-1
/// axes for target dimensions `t` lacks. Every dimension of `t` must be in
/// `target`.
pub(crate) fn align(t: &Tensor, target: &Shape, backend: &BackendRef) -> Result<NativeData> {
    let data = t.dense_data("align")?;
    let mut data = backend::convert(data, &t.backend(), backend)?;
    let shape = t.shape();
    let positions = shape
        .dims()
        .iter()
        .map(|d| {
            target
                .index_of(d.name())
                .ok_or_else(|| Error::incompatible(d.name(), shape, target))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut perm: Vec<usize> = (0..positions.len()).collect();
    perm.sort_by_key(|&i| positions[i]);
    if perm.iter().enumerate().any(|(i, &p)| i != p) {
        data = backend.transpose(&data, &perm)?;
    }

    if shape.rank() != target.rank() {
        let dims = target
            .dims()
            .iter()
            .map(|d| match shape.get(d.name()) {
                Some(own) => own.size().fixed().ok_or_else(|| {
                    Error::InvalidShape(format!("dimension '{}' is not resolved", d.name()))
                }),
                None => Ok(1),
            })
            .collect::<Result<Vec<_>>>()?;
        data = backend.reshape(&data, &dims)?;
    }
    Ok(data)
}

/// Materialize `t` with exactly the shape `target` on `backend`.
///
/// `target` must contain every dimension of `t` with a compatible size;
/// the missing ones are broadcast.
pub(crate) fn expand_exact(t: &Tensor, target: &Shape, backend: &BackendRef) -> Result<Tensor> {
    let merged = t.shape().merge_with(target, config::batch_policy())?;
    if merged.rank() != target.rank() {
        let extra = t
            .shape()
            .names()
            .into_iter()
            .find(|n| !target.contains(n))
            .unwrap_or_default();
        return Err(Error::incompatible(extra, t.shape(), target));
    }
    let mut data = align(t, target, backend)?;
    let sizes = target.resolved_sizes()?;
    if backend.dims(&data)? != sizes {
        data = backend.broadcast_to(&data, &sizes)?;
    }
    Tensor::from_native(Arc::clone(backend), data, target.clone())
}

/// Operand cut at slice `i` of stacking dimension `along`.
pub(crate) fn slice_operand(t: &Tensor, along: &str, i: usize) -> Result<Tensor> {
    if t.stack_dim() == Some(along) {
        let components = t.components().unwrap_or_default();
        return components.get(i).cloned().ok_or_else(|| Error::IndexOutOfRange {
            dim: along.to_string(),
            index: i,
            size: components.len(),
        });
    }
    if t.shape().contains(along) {
        return t.dim(along)?.index(i);
    }
    Ok(t.clone())
}

/// Run `f` over the aligned values of `operands` and wrap the result.
fn elementwise<F>(op: &str, operands: &[&Tensor], f: &F) -> Result<Tensor>
where
    F: Fn(&BackendRef, &[NativeData]) -> Result<NativeData>,
{
    let shape = Shape::merge_all(operands.iter().map(|t| t.shape()), config::batch_policy())?;

    if let Some(stacked) = operands.iter().find(|t| t.is_stacked()) {
        let along = stacked.stack_dim().unwrap_or_default().to_string();
        let stack_dim = stacked.shape().dim(&along)?.clone();
        let n = stack_dim.size().fixed().unwrap_or(0);
        let results = (0..n)
            .map(|i| {
                let parts = operands
                    .iter()
                    .map(|t| slice_operand(t, &along, i))
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&Tensor> = parts.iter().collect();
                elementwise(op, &refs, f)
            })
            .collect::<Result<Vec<_>>>()?;
        return stack::stack(&results, stack_dim);
    }

    let backends: Vec<BackendRef> = operands.iter().map(|t| t.backend()).collect();
    let backend = backend::resolve(&backends.iter().collect::<Vec<_>>())?;
    let aligned = operands
        .iter()
        .map(|t| align(t, &shape, &backend))
        .collect::<Result<Vec<_>>>()?;
    log::trace!("{op} {shape} on '{}'", backend.name());
    let out = f(&backend, &aligned)?;
    Tensor::from_native(backend, out, shape)
}

pub(crate) fn unary(op: UnaryOp, x: &Tensor) -> Result<Tensor> {
    elementwise("unary", &[x], &|b: &BackendRef, xs: &[NativeData]| {
        b.unary(op, &xs[0])
    })
}

pub(crate) fn binary(op: BinaryOp, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    elementwise("binary", &[lhs, rhs], &|b: &BackendRef, xs: &[NativeData]| {
        b.binary(op, &xs[0], &xs[1])
    })
}

pub(crate) fn compare(op: CmpOp, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    elementwise("compare", &[lhs, rhs], &|b: &BackendRef, xs: &[NativeData]| {
        b.compare(op, &xs[0], &xs[1])
    })
}

pub(crate) fn where_cond(cond: &Tensor, on_true: &Tensor, on_false: &Tensor) -> Result<Tensor> {
    elementwise(
        "where",
        &[cond, on_true, on_false],
        &|b: &BackendRef, xs: &[NativeData]| b.where_cond(&xs[0], &xs[1], &xs[2]),
    )
}

/// Binary op restricted to operands with identical spatial sub-shapes.
///
/// Other kinds merge as usual. Operands whose grids differ fail with
/// `IncompatibleShapes`; unify them first with `join_spatial`.
pub fn spatial_binary(op: BinaryOp, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    let (a, b) = (lhs.shape().spatial(), rhs.shape().spatial());
    if a != b {
        let conflict = a
            .names()
            .into_iter()
            .chain(b.names())
            .find(|n| a.get(n) != b.get(n))
            .or_else(|| a.names().first().copied())
            .unwrap_or("spatial")
            .to_string();
        return Err(Error::incompatible(conflict, &a, &b));
    }
    binary(op, lhs, rhs)
}

/// Expand every tensor onto the union of all their spatial sub-shapes.
///
/// A spatial dimension whose size varies per slice brings its stacking
/// dimension into the union, so dense operands come out stacked as well.
pub fn join_spatial(tensors: &[Tensor]) -> Result<Vec<Tensor>> {
    let policy = config::batch_policy();
    let spatial: Vec<Shape> = tensors.iter().map(|t| t.shape().spatial()).collect();
    let mut union = Shape::merge_all(&spatial, policy)?;
    let stacking: Vec<String> = union.stacking_dims().into_iter().map(String::from).collect();
    for along in stacking {
        let holder = tensors
            .iter()
            .find(|t| t.shape().contains(&along))
            .ok_or_else(|| Error::not_found(along.as_str(), &union))?;
        union = union.merge_with(&holder.shape().only(&[along.as_str()]), policy)?;
    }
    tensors.iter().map(|t| t.expand(&union)).collect()
}

/// Reduce over named dimensions. Every name must be present.
///
/// Batch dimensions are reduced only when named here; nothing else in the
/// dispatcher consumes them.
pub(crate) fn reduce<S: AsRef<str>>(op: ReduceOp, t: &Tensor, dims: &[S]) -> Result<Tensor> {
    let mut names: Vec<&str> = Vec::with_capacity(dims.len());
    for d in dims {
        let name = d.as_ref();
        t.shape().dim(name)?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    reduce_names(op, t, &names)
}

/// Reduce over every non-batch dimension.
pub(crate) fn reduce_non_batch(op: ReduceOp, t: &Tensor) -> Result<Tensor> {
    let names: Vec<String> = t
        .shape()
        .non_batch()
        .names()
        .into_iter()
        .map(String::from)
        .collect();
    reduce(op, t, &names)
}

fn reduce_names(op: ReduceOp, t: &Tensor, names: &[&str]) -> Result<Tensor> {
    match t.storage() {
        Storage::Dense(data) => {
            let backend = t.backend();
            let mut axes: Vec<usize> = names
                .iter()
                .filter_map(|n| t.shape().index_of(n))
                .collect();
            axes.sort_unstable();
            let shape = t.shape().without(names);
            log::trace!("reduce {op:?} over {names:?} on '{}'", backend.name());
            let out = backend.reduce(op, data, &axes)?;
            Tensor::from_native(backend, out, shape)
        }
        Storage::Stacked { along, components } => {
            let inner: Vec<&str> = names
                .iter()
                .copied()
                .filter(|n| *n != along.as_str())
                .collect();
            if inner.len() == names.len() {
                return stack::map_components(t, |c| reduce_names(op, c, &inner));
            }
            reduce_across_stack(op, t, along, components, &inner)
        }
    }
}

/// Reduce a stacked tensor over its stacking dimension (and `inner`).
///
/// Each component is reduced over `inner` first; the partial results are
/// then folded together. Mean divides the summed partials by the summed
/// element counts, so larger components weigh more.
fn reduce_across_stack(
    op: ReduceOp,
    t: &Tensor,
    along: &str,
    components: &[Tensor],
    inner: &[&str],
) -> Result<Tensor> {
    if let Some(kept) = t
        .shape()
        .non_uniform_dims()
        .dims()
        .iter()
        .find(|d| !inner.contains(&d.name()))
    {
        return Err(Error::InvalidShape(format!(
            "cannot reduce '{along}' while keeping '{}', whose size varies along it",
            kept.name()
        )));
    }
    let fold = |op: ReduceOp, combine: BinaryOp, of: &dyn Fn(&Tensor) -> Result<Tensor>| {
        fold_partials(components, inner, op, combine, of)?
            .ok_or_else(|| Error::msg(format!("stacking dimension '{along}' has no slices")))
    };
    let identity = |c: &Tensor| -> Result<Tensor> { Ok(c.clone()) };
    match op {
        ReduceOp::Sum => fold(ReduceOp::Sum, BinaryOp::Add, &identity),
        ReduceOp::Min => fold(ReduceOp::Min, BinaryOp::Minimum, &identity),
        ReduceOp::Max => fold(ReduceOp::Max, BinaryOp::Maximum, &identity),
        ReduceOp::Any => fold(ReduceOp::Any, BinaryOp::Maximum, &identity)?.cast(DType::BOOL),
        ReduceOp::All => fold(ReduceOp::All, BinaryOp::Minimum, &identity)?.cast(DType::BOOL),
        ReduceOp::Mean => {
            let as_f64 = |c: &Tensor| -> Result<Tensor> { c.cast(DType::FLOAT64) };
            let total = fold(ReduceOp::Sum, BinaryOp::Add, &as_f64)?;
            let ones = |c: &Tensor| -> Result<Tensor> { c.full_like(1.0)?.cast(DType::FLOAT64) };
            let count = fold(ReduceOp::Sum, BinaryOp::Add, &ones)?;
            binary(BinaryOp::Div, &total, &count)?.cast(op.result_dtype(t.dtype()))
        }
    }
}

/// Reduce `of(component)` over `inner` for every component and combine the
/// partials with `combine`. `None` when there are no components.
fn fold_partials(
    components: &[Tensor],
    inner: &[&str],
    op: ReduceOp,
    combine: BinaryOp,
    of: &dyn Fn(&Tensor) -> Result<Tensor>,
) -> Result<Option<Tensor>> {
    let mut acc: Option<Tensor> = None;
    for c in components {
        let partial = reduce_names(op, &of(c)?, inner)?;
        acc = Some(match acc {
            None => partial,
            Some(a) => binary(combine, &a, &partial)?,
        });
    }
    Ok(acc)
}
