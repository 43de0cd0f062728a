use std::sync::Arc;

use crate::backend::{self, BackendRef, NativeData};
use crate::config;
use crate::dim::{Dimension, Size};
use crate::dispatch;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::{Storage, Tensor};

// Stacking: many tensors along a new dimension
//
// Uniform case: every input agrees on the size of every dimension it has.
// The inputs are expanded onto the merge of their shapes, given a size-1
// axis for the new dimension and concatenated by the backend. The result is
// an ordinary dense tensor.
//
// Non-uniform case: some dimension has different sizes in different inputs,
// e.g. a=4 and a=5. No padding is done. The result keeps one component per
// input and its shape records the per-slice sizes:
//
//   stack([(a=4, b=2), (a=5, b=2)], c)  =  (c:c=2, a:s=[4, 5]@c, b:s=2)
//
// A varying dimension must be present in every input; dimensions present in
// only some inputs broadcast as usual.

/// Stack tensors along a new dimension.
///
/// `dim` gives the name and kind of the new dimension. Its size must be the
/// number of tensors, or symbolic. Item names on `dim` label the slices.
pub fn stack(tensors: &[Tensor], dim: Dimension) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::msg("stack needs at least one tensor"))?;
    let n = tensors.len();
    let dim = match dim.size() {
        Size::Fixed(k) if *k == n => dim,
        Size::Symbolic => dim.with_size(n),
        other => {
            return Err(Error::InvalidShape(format!(
                "cannot stack {n} tensors along '{}' of size {other}",
                dim.name()
            )))
        }
    };
    if let Some(t) = tensors.iter().find(|t| t.shape().contains(dim.name())) {
        return Err(Error::InvalidShape(format!(
            "stacking dimension '{}' already present in {}",
            dim.name(),
            t.shape()
        )));
    }

    let backends: Vec<BackendRef> = tensors.iter().map(|t| t.backend()).collect();
    let backend = backend::resolve(&backends.iter().collect::<Vec<_>>())?;
    let varying = varying_dims(tensors)?;
    log::trace!(
        "stack {n} tensors along '{}' on '{}', varying {:?}",
        dim.name(),
        backend.name(),
        varying
    );

    if varying.is_empty() && tensors.iter().all(|t| !t.is_stacked()) {
        return stack_uniform(tensors, dim, &backend);
    }

    // varying dims become symbolic so that merge fixes their position
    let proxies = tensors
        .iter()
        .map(|t| {
            varying
                .iter()
                .try_fold(t.shape().clone(), |s, name| s.with_size(name, Size::Symbolic))
        })
        .collect::<Result<Vec<_>>>()?;
    let merged = Shape::merge_all(&proxies, config::batch_policy())?;
    let mut dims: Vec<Dimension> = merged
        .dims()
        .iter()
        .map(|d| {
            if !varying.iter().any(|v| v == d.name()) {
                return Ok(d.clone());
            }
            let sizes = tensors
                .iter()
                .map(|t| Ok(t.shape().get_size(d.name())?.fixed().unwrap_or(0)))
                .collect::<Result<Vec<_>>>()?;
            Ok(d.with_size(Size::NonUniform {
                along: dim.name().to_string(),
                sizes,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    dims.push(dim.clone());
    let shape = Shape::new(dims)?;

    let dtype = tensors
        .iter()
        .skip(1)
        .fold(first.dtype(), |acc, t| DType::promote(acc, t.dtype()));
    let components = tensors
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let target = shape.slice_component(dim.name(), i)?;
            let c = if t.is_stacked() {
                t.to_backend(&backend)?.expand(&target)?
            } else {
                dispatch::expand_exact(t, &target, &backend)?
            };
            c.cast(dtype)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stacked(
        shape,
        dim.name().to_string(),
        components,
        backend,
        dtype,
    ))
}

/// Names whose size differs between inputs, in first-seen order.
fn varying_dims(tensors: &[Tensor]) -> Result<Vec<String>> {
    let mut seen: Vec<&Dimension> = Vec::new();
    let mut varying: Vec<String> = Vec::new();
    for t in tensors {
        for d in t.shape().dims() {
            match seen.iter().find(|s| s.name() == d.name()) {
                None => seen.push(d),
                Some(s) => {
                    if s.kind() != d.kind() {
                        return Err(Error::incompatible(d.name(), tensors[0].shape(), t.shape()));
                    }
                    if s.size() != d.size() && !varying.iter().any(|v| v == d.name()) {
                        varying.push(d.name().to_string());
                    }
                }
            }
        }
    }
    for name in &varying {
        for t in tensors {
            match t.shape().get_size(name) {
                Ok(Size::Fixed(_)) => {}
                Ok(_) => {
                    return Err(Error::InvalidShape(format!(
                        "dimension '{name}' is already non-uniform and cannot vary again"
                    )))
                }
                // ambiguous: no size to record for this input
                Err(_) => return Err(Error::incompatible(name.as_str(), tensors[0].shape(), t.shape())),
            }
        }
    }
    Ok(varying)
}

fn stack_uniform(tensors: &[Tensor], dim: Dimension, backend: &BackendRef) -> Result<Tensor> {
    let shapes: Vec<&Shape> = tensors.iter().map(|t| t.shape()).collect();
    let merged = Shape::merge_all(shapes, config::batch_policy())?;
    let mut dims = merged.dims().to_vec();
    dims.push(dim.clone());
    let shape = Shape::new(dims)?;
    let axis = shape
        .index_of(dim.name())
        .ok_or_else(|| Error::not_found(dim.name(), &shape))?;
    let mut with_axis = merged.resolved_sizes()?;
    with_axis.insert(axis, 1);

    let parts = tensors
        .iter()
        .map(|t| {
            let e = dispatch::expand_exact(t, &merged, backend)?;
            backend.reshape(e.dense_data("stack")?, &with_axis)
        })
        .collect::<Result<Vec<NativeData>>>()?;
    let refs: Vec<&NativeData> = parts.iter().collect();
    let data = backend.concat(&refs, axis)?;
    Tensor::from_native(Arc::clone(backend), data, shape)
}

/// Concatenate tensors along an existing dimension.
///
/// Every input must have `name` with the same kind; all other dimensions
/// merge as usual. Item names are concatenated when every input has them.
pub fn concat(tensors: &[Tensor], name: &str) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::msg("concat needs at least one tensor"))?;
    let kind = first.shape().dim(name)?.kind();
    let mut along = Vec::with_capacity(tensors.len());
    for t in tensors {
        t.dense_data("concat")?;
        let d = t.shape().dim(name)?;
        if d.kind() != kind {
            return Err(Error::incompatible(name, first.shape(), t.shape()));
        }
        along.push(d.clone());
    }

    // symbolic proxies keep the dimension where the inputs have it
    let proxies = tensors
        .iter()
        .map(|t| t.shape().with_size(name, Size::Symbolic))
        .collect::<Result<Vec<_>>>()?;
    let merged = Shape::merge_all(&proxies, config::batch_policy())?;
    let backends: Vec<BackendRef> = tensors.iter().map(|t| t.backend()).collect();
    let backend = backend::resolve(&backends.iter().collect::<Vec<_>>())?;

    let parts = tensors
        .iter()
        .zip(&along)
        .map(|(t, d)| dispatch::expand_exact(t, &merged.with_dim(d.clone())?, &backend))
        .collect::<Result<Vec<_>>>()?;

    let total: usize = along.iter().map(|d| d.size().fixed().unwrap_or(0)).sum();
    let labels: Option<Vec<String>> = along
        .iter()
        .map(|d| d.item_names().map(|items| items.to_vec()))
        .collect::<Option<Vec<_>>>()
        .map(|lists| lists.concat());
    let out_dim = match labels {
        Some(items) => Dimension::with_items(name, kind, items),
        None => Dimension::new(name, kind, total),
    };
    let shape = merged.with_dim(out_dim)?;
    let axis = shape
        .index_of(name)
        .ok_or_else(|| Error::not_found(name, &shape))?;
    let natives = parts
        .iter()
        .map(|p| p.dense_data("concat"))
        .collect::<Result<Vec<_>>>()?;
    let data = backend.concat(&natives, axis)?;
    Tensor::from_native(backend, data, shape)
}

/// Apply `f` to every component of a stacked tensor and stack the results
/// again. Dense tensors are passed to `f` directly.
pub(crate) fn map_components<F>(t: &Tensor, f: F) -> Result<Tensor>
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    let (along, components) = match t.storage() {
        Storage::Stacked { along, components } => (along, components),
        Storage::Dense(_) => return f(t),
    };
    let stack_dim = t.shape().dim(along)?.clone();
    let mapped = components.iter().map(&f).collect::<Result<Vec<_>>>()?;
    stack(&mapped, stack_dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::DimKind;
    use crate::shape::{channel, spatial};

    fn filled(value: f64, shape: Shape) -> Tensor {
        let n = shape.volume().unwrap();
        Tensor::from_f64_slice(&vec![value; n], shape, DType::FLOAT32).unwrap()
    }

    fn c_dim() -> Dimension {
        Dimension::new("c", DimKind::Channel, Size::Symbolic)
    }

    #[test]
    fn test_uniform_stack_is_dense() {
        let a = filled(1.0, spatial([("x", 3)]).unwrap());
        let b = filled(2.0, spatial([("x", 3)]).unwrap());
        let s = stack(&[a, b], c_dim()).unwrap();
        assert!(!s.is_stacked());
        assert_eq!(s.shape().names(), vec!["c", "x"]);
        assert_eq!(s.to_f64_vec().unwrap(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_uniform_stack_broadcasts_missing_dims() {
        let a = filled(1.0, spatial([("x", 2)]).unwrap());
        let b = filled(2.0, spatial([("y", 3)]).unwrap());
        let s = stack(&[a, b], c_dim()).unwrap();
        assert_eq!(s.shape().names(), vec!["c", "x", "y"]);
        assert_eq!(s.volume(), Some(12));
    }

    #[test]
    fn test_non_uniform_stack() {
        let a = filled(1.0, spatial([("a", 4), ("b", 2)]).unwrap());
        let b = filled(2.0, spatial([("a", 5), ("b", 2)]).unwrap());
        let s = stack(&[a.clone(), b.clone()], c_dim()).unwrap();
        assert!(!s.is_uniform());
        assert_eq!(
            s.shape().get_size("a").unwrap(),
            &Size::NonUniform {
                along: "c".into(),
                sizes: vec![4, 5]
            }
        );
        assert_eq!(s.shape().get_size("b").unwrap(), &Size::Fixed(2));
        assert_eq!(s.volume(), None);
        let parts: Vec<Tensor> = s.unstack("c").unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(parts[0].shape(), a.shape());
        assert_eq!(parts[1].shape(), b.shape());
        assert_eq!(parts[1].to_f64_vec().unwrap(), vec![2.0; 10]);

        let sizes = s.size_tensor("a").unwrap();
        assert_eq!(sizes.shape().names(), vec!["c"]);
        assert_eq!(sizes.to_f64_vec().unwrap(), vec![4.0, 5.0]);
    }

    fn ragged() -> Tensor {
        let a = filled(1.0, spatial([("a", 4), ("b", 2)]).unwrap());
        let b = filled(2.0, spatial([("a", 5), ("b", 2)]).unwrap());
        stack(&[a, b], c_dim()).unwrap()
    }

    fn slices(t: &Tensor, along: &str) -> Vec<Tensor> {
        t.unstack(along).unwrap().collect::<Result<_>>().unwrap()
    }

    #[test]
    fn test_stack_of_non_uniform() {
        let s = ragged();
        let d = Dimension::new("d", DimKind::Instance, Size::Symbolic);
        let ss = stack(&[s.clone(), s.mul_scalar(10.0).unwrap()], d).unwrap();
        assert!(ss.is_stacked());
        assert_eq!(ss.shape().get_size("d").unwrap(), &Size::Fixed(2));
        assert_eq!(
            ss.shape().get_size("a").unwrap(),
            s.shape().get_size("a").unwrap()
        );
        let outer = slices(&ss, "d");
        assert_eq!(outer[0].shape(), s.shape());
        let inner = slices(&outer[1], "c");
        assert_eq!(inner[0].to_f64_vec().unwrap(), vec![10.0; 8]);
        assert_eq!(inner[1].to_f64_vec().unwrap(), vec![20.0; 10]);
    }

    #[test]
    fn test_expand_non_uniform() {
        let s = ragged();
        let same = s.expand(s.shape()).unwrap();
        assert_eq!(same.shape(), s.shape());
        assert_eq!(slices(&same, "c")[1].to_f64_vec().unwrap(), vec![2.0; 10]);

        let wider = s.expand(&spatial([("x", 3)]).unwrap()).unwrap();
        let parts = slices(&wider, "c");
        assert_eq!(
            parts[1].shape(),
            &spatial([("a", 5), ("b", 2), ("x", 3)]).unwrap()
        );
        assert_eq!(parts[1].to_f64_vec().unwrap(), vec![2.0; 30]);

        // a dense tensor lifted onto a per-slice shape comes out stacked
        let dense = filled(7.0, spatial([("b", 2)]).unwrap());
        let lifted = dense.expand(s.shape()).unwrap();
        assert!(lifted.is_stacked());
        assert_eq!(lifted.shape(), s.shape());
        assert_eq!(slices(&lifted, "c")[0].to_f64_vec().unwrap(), vec![7.0; 8]);

        // a single size cannot stand in for per-slice sizes
        assert!(matches!(
            s.expand(&spatial([("a", 4)]).unwrap()),
            Err(Error::IncompatibleShapes { .. })
        ));
    }

    #[test]
    fn test_varying_dim_must_be_everywhere() {
        let a = filled(1.0, spatial([("a", 4), ("b", 2)]).unwrap());
        let b = filled(2.0, spatial([("a", 5)]).unwrap());
        let c = filled(3.0, spatial([("b", 2)]).unwrap());
        assert!(matches!(
            stack(&[a, b, c], c_dim()),
            Err(Error::IncompatibleShapes { .. })
        ));
    }

    #[test]
    fn test_stack_size_checked() {
        let a = filled(1.0, spatial([("x", 2)]).unwrap());
        let wrong = Dimension::new("c", DimKind::Channel, 3);
        assert!(stack(&[a.clone()], wrong).is_err());
        assert!(stack(&[a.clone()], Dimension::new("x", DimKind::Spatial, 1)).is_err());
        assert!(stack(&[], c_dim()).is_err());
    }

    #[test]
    fn test_stack_with_labels() {
        let a = filled(1.0, spatial([("x", 2)]).unwrap());
        let b = filled(2.0, spatial([("x", 2)]).unwrap());
        let dim = Dimension::with_items("vector", DimKind::Channel, ["u", "v"]);
        let s = stack(&[a, b], dim).unwrap();
        let v = s.dim("vector").unwrap().item("v").unwrap();
        assert_eq!(v.to_f64_vec().unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_concat_items() {
        let a = filled(1.0, channel([("vector", "x,y")]).unwrap());
        let b = filled(2.0, channel([("vector", "z")]).unwrap());
        let c = concat(&[a, b], "vector").unwrap();
        assert_eq!(
            c.shape().dim("vector").unwrap().item_names().unwrap(),
            &["x".to_string(), "y".to_string(), "z".to_string()]
        );
        assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_concat_with_other_dims() {
        let a = filled(1.0, spatial([("x", 2), ("y", 2)]).unwrap());
        let b = filled(2.0, spatial([("x", 1), ("y", 2)]).unwrap());
        let c = concat(&[a, b], "x").unwrap();
        assert_eq!(c.shape().get_size("x").unwrap(), &Size::Fixed(3));
        assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0]);
        assert!(matches!(
            concat(&[c.clone(), filled(0.0, spatial([("y", 2)]).unwrap())], "x"),
            Err(Error::DimensionNotFound { .. })
        ));
    }
}
