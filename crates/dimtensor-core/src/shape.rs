use std::collections::HashSet;
use std::fmt;

use crate::dim::{DimKind, DimSpec, Dimension, Size};
use crate::error::{Error, Result};

// Shape: ordered, name-unique collection of Dimensions
//
// Unlike a positional shape ([3, 4]), every axis here has a name and a kind,
// and operations match axes by name:
//
//   spatial(x=5, y=4)  merged with  channel(vector=2) & spatial(x=5, y=4)
//   = (vector:c=2, x:s=5, y:s=4)
//
// Shapes are kept in canonical order: batch, instance, channel, spatial,
// with the relative order inside each kind preserved. Equality is
// structural and order-sensitive.
//
// MERGE
//
// For every name in either operand:
//   - present in one operand only: taken unchanged (the other broadcasts)
//   - present in both: kinds must match, sizes must agree. A symbolic size
//     agrees with anything. Differing batch sizes are governed by the
//     BatchMergePolicy; differing sizes of any other kind always conflict.
//   - item names: missing on one side is fine, differing lists conflict.
//
// The order inside a kind bucket is taken from the operand whose names are
// a superset of the other's. When neither is, or both hold the same names in
// different orders, the bucket is sorted by name. That keeps merge
// commutative and idempotent.

/// How two batch dimensions of the same name but different size merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMergePolicy {
    /// Fail with `IncompatibleShapes`.
    #[default]
    Strict,
    /// Size 1 merges with any size; otherwise fail.
    BroadcastUnit,
}

/// Ordered, name-unique collection of named dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    /// The empty (scalar) shape.
    pub fn empty() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Build a shape from dimensions, validating names and item labels and
    /// normalizing to canonical order.
    pub fn new(dims: Vec<Dimension>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(dims.len());
        for d in &dims {
            d.validate()?;
            if !seen.insert(d.name()) {
                return Err(Error::InvalidShape(format!(
                    "duplicate dimension name '{}'",
                    d.name()
                )));
            }
        }
        check_stacking(&dims)?;
        let mut dims = dims;
        // stable: preserves relative order inside each kind
        dims.sort_by_key(|d| d.kind());
        Ok(Shape { dims })
    }

    /// Build a shape of a single kind from `name = spec` pairs.
    pub fn of<N, S>(kind: DimKind, pairs: impl IntoIterator<Item = (N, S)>) -> Result<Self>
    where
        N: Into<String>,
        DimSpec: From<S>,
    {
        let dims = pairs
            .into_iter()
            .map(|(name, spec)| DimSpec::from(spec).into_dimension(name.into(), kind))
            .collect();
        Shape::new(dims)
    }

    /// Keyword-style construction: the kind of each dimension is inferred
    /// from its name (see `DimKind::infer`).
    pub fn from_pairs<N, S>(pairs: impl IntoIterator<Item = (N, S)>) -> Result<Self>
    where
        N: Into<String>,
        DimSpec: From<S>,
    {
        let dims = pairs
            .into_iter()
            .map(|(name, spec)| {
                let name: String = name.into();
                let kind = DimKind::infer(&name);
                DimSpec::from(spec).into_dimension(name, kind)
            })
            .collect();
        Shape::new(dims)
    }

    // Accessors

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name()).collect()
    }

    pub fn kinds(&self) -> Vec<DimKind> {
        self.dims.iter().map(|d| d.kind()).collect()
    }

    pub fn sizes(&self) -> Vec<&Size> {
        self.dims.iter().map(|d| d.size()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// The named dimension, or `DimensionNotFound`.
    pub fn dim(&self, name: &str) -> Result<&Dimension> {
        self.get(name).ok_or_else(|| Error::not_found(name, self))
    }

    /// Size of the named dimension, or `DimensionNotFound`.
    pub fn get_size(&self, name: &str) -> Result<&Size> {
        self.dim(name).map(|d| d.size())
    }

    // Filtering

    /// Sub-shape of the requested kinds, order preserved.
    pub fn filter(&self, kinds: &[DimKind]) -> Shape {
        Shape {
            dims: self
                .dims
                .iter()
                .filter(|d| kinds.contains(&d.kind()))
                .cloned()
                .collect(),
        }
    }

    pub fn batch(&self) -> Shape {
        self.filter(&[DimKind::Batch])
    }

    pub fn instance(&self) -> Shape {
        self.filter(&[DimKind::Instance])
    }

    pub fn channel(&self) -> Shape {
        self.filter(&[DimKind::Channel])
    }

    pub fn spatial(&self) -> Shape {
        self.filter(&[DimKind::Spatial])
    }

    pub fn non_batch(&self) -> Shape {
        self.filter(&[DimKind::Instance, DimKind::Channel, DimKind::Spatial])
    }

    /// Sub-shape without the named dimensions. Unknown names are ignored.
    pub fn without<S: AsRef<str>>(&self, names: &[S]) -> Shape {
        Shape {
            dims: self
                .dims
                .iter()
                .filter(|d| !names.iter().any(|n| n.as_ref() == d.name()))
                .cloned()
                .collect(),
        }
    }

    /// Sub-shape with only the named dimensions that are present, in this
    /// shape's order.
    pub fn only<S: AsRef<str>>(&self, names: &[S]) -> Shape {
        Shape {
            dims: self
                .dims
                .iter()
                .filter(|d| names.iter().any(|n| n.as_ref() == d.name()))
                .cloned()
                .collect(),
        }
    }

    /// Like `only`, but every requested name must be present.
    pub fn only_strict<S: AsRef<str>>(&self, names: &[S]) -> Result<Shape> {
        if let Some(missing) = names.iter().find(|n| !self.contains(n.as_ref())) {
            return Err(Error::not_found(missing.as_ref(), self));
        }
        Ok(self.only(names))
    }

    // Merging

    /// Merge with strict batch handling.
    pub fn merge(&self, other: &Shape) -> Result<Shape> {
        self.merge_with(other, BatchMergePolicy::Strict)
    }

    /// Merge two shapes by dimension name. See the module comment for rules.
    pub fn merge_with(&self, other: &Shape, policy: BatchMergePolicy) -> Result<Shape> {
        for d in &self.dims {
            if let Some(o) = other.get(d.name()) {
                if o.kind() != d.kind() {
                    return Err(Error::incompatible(d.name(), self, other));
                }
            }
        }
        let mut dims = Vec::with_capacity(self.rank() + other.rank());
        for kind in DimKind::ALL {
            let a: Vec<&Dimension> = self.dims.iter().filter(|d| d.kind() == kind).collect();
            let b: Vec<&Dimension> = other.dims.iter().filter(|d| d.kind() == kind).collect();
            for name in bucket_order(&a, &b) {
                let da = a.iter().find(|d| d.name() == name);
                let db = b.iter().find(|d| d.name() == name);
                let merged = match (da, db) {
                    (Some(da), Some(db)) => merge_dim(da, db, policy)
                        .ok_or_else(|| Error::incompatible(name.as_str(), self, other))?,
                    (Some(d), None) | (None, Some(d)) => (*d).clone(),
                    (None, None) => unreachable!("bucket_order only yields known names"),
                };
                dims.push(merged);
            }
        }
        Ok(Shape { dims })
    }

    /// Left fold of `merge_with` over any number of shapes.
    pub fn merge_all<'a>(
        shapes: impl IntoIterator<Item = &'a Shape>,
        policy: BatchMergePolicy,
    ) -> Result<Shape> {
        shapes
            .into_iter()
            .try_fold(Shape::empty(), |acc, s| acc.merge_with(s, policy))
    }

    /// Disjoint union: fails if any name appears in both shapes.
    pub fn concat(&self, other: &Shape) -> Result<Shape> {
        let mut dims = self.dims.clone();
        dims.extend(other.dims.iter().cloned());
        Shape::new(dims)
    }

    // Sizes

    /// Product of all sizes. `None` when any size is symbolic or
    /// non-uniform, or when the product overflows `usize`. The empty shape
    /// has volume 1.
    pub fn volume(&self) -> Option<usize> {
        self.dims
            .iter()
            .map(|d| d.size().fixed())
            .try_fold(1usize, |acc, s| acc.checked_mul(s?))
    }

    /// False iff some dimension has a per-slice size vector.
    pub fn is_uniform(&self) -> bool {
        !self.dims.iter().any(|d| d.size().is_non_uniform())
    }

    /// True iff every size is a plain integer.
    pub fn is_resolved(&self) -> bool {
        self.dims.iter().all(|d| d.size().is_fixed())
    }

    /// Concrete sizes in shape order, or `InvalidShape` if any is symbolic
    /// or non-uniform.
    pub fn resolved_sizes(&self) -> Result<Vec<usize>> {
        self.dims
            .iter()
            .map(|d| {
                d.size().fixed().ok_or_else(|| {
                    Error::InvalidShape(format!(
                        "dimension '{}' has unresolved size {} in {}",
                        d.name(),
                        d.size(),
                        self
                    ))
                })
            })
            .collect()
    }

    /// Dimensions whose size varies per slice.
    pub fn non_uniform_dims(&self) -> Shape {
        Shape {
            dims: self
                .dims
                .iter()
                .filter(|d| d.size().is_non_uniform())
                .cloned()
                .collect(),
        }
    }

    /// Names of the dimensions that non-uniform sizes are indexed by.
    pub fn stacking_dims(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for d in &self.dims {
            if let Size::NonUniform { along, .. } = d.size() {
                if !out.contains(&along.as_str()) {
                    out.push(along);
                }
            }
        }
        out
    }

    // Derived shapes

    /// Replace one dimension by name (same kind, new size or labels).
    pub fn with_dim(&self, dim: Dimension) -> Result<Shape> {
        let idx = self
            .index_of(dim.name())
            .ok_or_else(|| Error::not_found(dim.name(), self))?;
        dim.validate()?;
        let mut dims = self.dims.clone();
        dims[idx] = dim;
        Shape::new(dims)
    }

    pub fn with_size(&self, name: &str, size: impl Into<Size>) -> Result<Shape> {
        let dim = self.dim(name)?.with_size(size);
        self.with_dim(dim)
    }

    /// Drop one dimension; `DimensionNotFound` if absent.
    pub fn without_dim(&self, name: &str) -> Result<Shape> {
        self.dim(name)?;
        Ok(self.without(&[name]))
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<Shape> {
        let idx = self.index_of(old).ok_or_else(|| Error::not_found(old, self))?;
        if old != new && self.contains(new) {
            return Err(Error::InvalidShape(format!(
                "cannot rename '{old}' to '{new}': name already in use"
            )));
        }
        let mut dims = self.dims.clone();
        dims[idx] = dims[idx].renamed(new);
        // non-uniform sizes that point at the old name follow the rename
        for d in dims.iter_mut() {
            if let Size::NonUniform { along, sizes } = d.size() {
                if along == old {
                    *d = d.with_size(Size::NonUniform {
                        along: new.to_string(),
                        sizes: sizes.clone(),
                    });
                }
            }
        }
        Shape::new(dims)
    }

    /// Shape of slice `index` along `stack_dim`: the stacking dimension is
    /// removed and every size indexed by it is resolved for that slice.
    pub fn slice_component(&self, stack_dim: &str, index: usize) -> Result<Shape> {
        let size = self.dim(stack_dim)?.size().fixed().unwrap_or(0);
        if index >= size {
            return Err(Error::IndexOutOfRange {
                dim: stack_dim.to_string(),
                index,
                size,
            });
        }
        let dims = self
            .dims
            .iter()
            .filter(|d| d.name() != stack_dim)
            .map(|d| match d.size() {
                Size::NonUniform { along, sizes } if along == stack_dim => {
                    let n = sizes.get(index).copied().ok_or_else(|| {
                        Error::InvalidShape(format!(
                            "dimension '{}' has no size for slice {index} of '{stack_dim}'",
                            d.name()
                        ))
                    })?;
                    Ok(d.with_size(n))
                }
                _ => Ok(d.clone()),
            })
            .collect::<Result<_>>()?;
        Ok(Shape { dims })
    }
}

/// Every per-slice size must point at another dimension of the same shape
/// with a fixed size, and hold exactly one entry per slice.
fn check_stacking(dims: &[Dimension]) -> Result<()> {
    for d in dims {
        let Size::NonUniform { along, sizes } = d.size() else {
            continue;
        };
        let stack_dim = dims
            .iter()
            .find(|s| s.name() == along.as_str() && s.name() != d.name())
            .ok_or_else(|| {
                Error::InvalidShape(format!(
                    "dimension '{}' varies along '{along}', which is not in the shape",
                    d.name()
                ))
            })?;
        match stack_dim.size() {
            Size::Fixed(n) if *n == sizes.len() => {}
            Size::Fixed(n) => {
                return Err(Error::InvalidShape(format!(
                    "dimension '{}' lists {} sizes but '{along}' has {n} slices",
                    d.name(),
                    sizes.len()
                )))
            }
            other => {
                return Err(Error::InvalidShape(format!(
                    "stacking dimension '{along}' must have a fixed size, not {other}"
                )))
            }
        }
    }
    Ok(())
}

/// Order of names inside one kind bucket of a merge.
fn bucket_order(a: &[&Dimension], b: &[&Dimension]) -> Vec<String> {
    let names = |v: &[&Dimension]| v.iter().map(|d| d.name().to_string()).collect::<Vec<_>>();
    let (an, bn) = (names(a), names(b));
    if an == bn {
        return an;
    }
    let a_covers_b = bn.iter().all(|n| an.contains(n));
    let b_covers_a = an.iter().all(|n| bn.contains(n));
    match (a_covers_b, b_covers_a) {
        (true, false) => an,
        (false, true) => bn,
        _ => {
            let mut union = an;
            for n in bn {
                if !union.contains(&n) {
                    union.push(n);
                }
            }
            union.sort();
            union
        }
    }
}

/// Merge two same-named, same-kind dimensions. `None` on conflict.
fn merge_dim(a: &Dimension, b: &Dimension, policy: BatchMergePolicy) -> Option<Dimension> {
    let size = match (a.size(), b.size()) {
        (Size::Fixed(x), Size::Fixed(y)) if x == y => Size::Fixed(*x),
        (Size::Fixed(x), Size::Fixed(y))
            if a.kind() == DimKind::Batch
                && policy == BatchMergePolicy::BroadcastUnit
                && (*x == 1 || *y == 1) =>
        {
            Size::Fixed((*x).max(*y))
        }
        (Size::Symbolic, s) | (s, Size::Symbolic) => s.clone(),
        (x @ Size::NonUniform { .. }, y @ Size::NonUniform { .. }) if x == y => x.clone(),
        _ => return None,
    };
    let fits = |d: &Dimension| {
        d.item_names()
            .filter(|items| size.fixed() == Some(items.len()))
            .map(|items| items.to_vec())
    };
    let items = match (fits(a), fits(b)) {
        (Some(x), Some(y)) if x != y => return None,
        (Some(x), _) | (None, Some(x)) => Some(x),
        (None, None) => None,
    };
    Some(a.with_size(size).with_item_names(items))
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

// Dimension constructors
//
// One per kind. Each accepts `name = spec` pairs where the spec is a size or
// a comma-separated label list:
//
//   spatial([("x", 5), ("y", 4)])
//   channel([("vector", "x,y")])

pub fn batch<N, S>(pairs: impl IntoIterator<Item = (N, S)>) -> Result<Shape>
where
    N: Into<String>,
    DimSpec: From<S>,
{
    Shape::of(DimKind::Batch, pairs)
}

pub fn spatial<N, S>(pairs: impl IntoIterator<Item = (N, S)>) -> Result<Shape>
where
    N: Into<String>,
    DimSpec: From<S>,
{
    Shape::of(DimKind::Spatial, pairs)
}

pub fn instance<N, S>(pairs: impl IntoIterator<Item = (N, S)>) -> Result<Shape>
where
    N: Into<String>,
    DimSpec: From<S>,
{
    Shape::of(DimKind::Instance, pairs)
}

pub fn channel<N, S>(pairs: impl IntoIterator<Item = (N, S)>) -> Result<Shape>
where
    N: Into<String>,
    DimSpec: From<S>,
{
    Shape::of(DimKind::Channel, pairs)
}

/// Anything the creation functions accept as a shape: a `Shape` or
/// keyword-style `(name, size)` pairs with inferred kinds.
pub trait IntoShape {
    fn into_shape(self) -> Result<Shape>;
}

impl IntoShape for Shape {
    fn into_shape(self) -> Result<Shape> {
        Ok(self)
    }
}

impl IntoShape for &Shape {
    fn into_shape(self) -> Result<Shape> {
        Ok(self.clone())
    }
}

impl<const N: usize> IntoShape for [(&str, usize); N] {
    fn into_shape(self) -> Result<Shape> {
        Shape::from_pairs(self)
    }
}

impl IntoShape for &[(&str, usize)] {
    fn into_shape(self) -> Result<Shape> {
        Shape::from_pairs(self.iter().copied())
    }
}

impl IntoShape for Vec<(&str, usize)> {
    fn into_shape(self) -> Result<Shape> {
        Shape::from_pairs(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy(x: usize, y: usize) -> Shape {
        spatial([("x", x), ("y", y)]).unwrap()
    }

    #[test]
    fn test_canonical_order() {
        let s = Shape::new(vec![
            Dimension::new("x", DimKind::Spatial, 5),
            Dimension::new("vector", DimKind::Channel, 2),
            Dimension::new("particles", DimKind::Instance, 7),
            Dimension::new("batch", DimKind::Batch, 3),
            Dimension::new("y", DimKind::Spatial, 4),
        ])
        .unwrap();
        assert_eq!(s.names(), vec!["batch", "particles", "vector", "x", "y"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let r = Shape::new(vec![
            Dimension::new("x", DimKind::Spatial, 5),
            Dimension::new("x", DimKind::Channel, 2),
        ]);
        assert!(matches!(r, Err(Error::InvalidShape(_))));
    }

    #[test]
    fn test_item_names_track_size() {
        let d = Dimension::with_items("vector", DimKind::Channel, ["x", "y"]);
        let s = Shape::new(vec![d.clone()]).unwrap();
        assert_eq!(s.volume(), Some(2));
        let resized = s.with_size("vector", 3usize).unwrap();
        assert!(resized.dim("vector").unwrap().item_names().is_none());
        assert!(Shape::new(vec![d.renamed("")]).is_err());
    }

    #[test]
    fn test_constructors_with_labels() {
        let s = channel([("vector", "x,y,z")]).unwrap();
        assert_eq!(s.get_size("vector").unwrap(), &Size::Fixed(3));
        assert_eq!(s.dim("vector").unwrap().item_index("z"), Some(2));
    }

    #[test]
    fn test_from_pairs_infers_kind() {
        let s = Shape::from_pairs([("x", 4), ("vector", 2), ("batch", 3)]).unwrap();
        assert_eq!(s.names(), vec!["batch", "vector", "x"]);
        assert_eq!(
            s.kinds(),
            vec![DimKind::Batch, DimKind::Channel, DimKind::Spatial]
        );
    }

    #[test]
    fn test_filter_and_without() {
        let s = xy(5, 4).merge(&channel([("vector", 2)]).unwrap()).unwrap();
        let sp = s.spatial();
        assert_eq!(sp.names(), vec!["x", "y"]);
        assert!(sp.without(&sp.names()).is_empty());
        assert_eq!(s.without(&["nope"]), s);
        assert_eq!(s.without(&["x"]).names(), vec!["vector", "y"]);
    }

    #[test]
    fn test_only() {
        let s = xy(5, 4);
        assert_eq!(s.only(&s.names()), s);
        assert_eq!(s.only(&["y", "x"]), s);
        assert_eq!(s.only(&["y", "missing"]).names(), vec!["y"]);
        assert!(matches!(
            s.only_strict(&["missing"]),
            Err(Error::DimensionNotFound { .. })
        ));
    }

    #[test]
    fn test_get_size_missing() {
        let s = xy(5, 4);
        assert!(matches!(
            s.get_size("z"),
            Err(Error::DimensionNotFound { .. })
        ));
    }

    #[test]
    fn test_merge_disjoint_spatial() {
        let a = spatial([("x", 5)]).unwrap();
        let b = spatial([("y", 4)]).unwrap();
        let m = a.merge(&b).unwrap();
        assert_eq!(m.names(), vec!["x", "y"]);
        assert_eq!(m.volume(), Some(20));
    }

    #[test]
    fn test_merge_conflict() {
        let a = spatial([("x", 5)]).unwrap();
        let b = spatial([("x", 6)]).unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(Error::IncompatibleShapes { ref dim, .. }) if dim == "x"
        ));
    }

    #[test]
    fn test_merge_kind_conflict() {
        let a = spatial([("x", 5)]).unwrap();
        let b = channel([("x", 5)]).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_merge_commutative_and_idempotent() {
        let a = xy(5, 4);
        let b = channel([("vector", 2)])
            .unwrap()
            .merge(&spatial([("z", 3), ("x", 5)]).unwrap())
            .unwrap();
        let ab = a.merge(&b).unwrap();
        assert_eq!(ab, b.merge(&a).unwrap());
        assert_eq!(ab.merge(&b).unwrap(), ab);
        assert_eq!(ab.merge(&a).unwrap(), ab);
    }

    #[test]
    fn test_merge_keeps_superset_order() {
        let a = spatial([("y", 4), ("x", 5)]).unwrap();
        let b = spatial([("x", 5)]).unwrap();
        assert_eq!(a.merge(&b).unwrap().names(), vec!["y", "x"]);
        assert_eq!(b.merge(&a).unwrap().names(), vec!["y", "x"]);
    }

    #[test]
    fn test_merge_batch_policy() {
        let a = batch([("batch", 1)]).unwrap();
        let b = batch([("batch", 8)]).unwrap();
        assert!(a.merge(&b).is_err());
        let m = a.merge_with(&b, BatchMergePolicy::BroadcastUnit).unwrap();
        assert_eq!(m.get_size("batch").unwrap(), &Size::Fixed(8));
        let c = batch([("batch", 3)]).unwrap();
        assert!(c.merge_with(&b, BatchMergePolicy::BroadcastUnit).is_err());
    }

    #[test]
    fn test_merge_symbolic() {
        let a = spatial([("x", DimSpec::Symbolic)]).unwrap();
        let b = spatial([("x", 5)]).unwrap();
        assert_eq!(a.merge(&b).unwrap(), b);
        assert_eq!(a.volume(), None);
        assert!(a.is_uniform());
        assert!(!a.is_resolved());
    }

    #[test]
    fn test_merge_item_names() {
        let labelled = channel([("vector", "x,y")]).unwrap();
        let plain = channel([("vector", 2)]).unwrap();
        assert_eq!(labelled.merge(&plain).unwrap(), labelled);
        let other = channel([("vector", "u,v")]).unwrap();
        assert!(labelled.merge(&other).is_err());
    }

    #[test]
    fn test_merge_all() {
        let shapes = [
            spatial([("x", 5)]).unwrap(),
            spatial([("y", 4)]).unwrap(),
            channel([("vector", 2)]).unwrap(),
        ];
        let m = Shape::merge_all(&shapes, BatchMergePolicy::Strict).unwrap();
        assert_eq!(m.names(), vec!["vector", "x", "y"]);
        assert_eq!(m.volume(), Some(40));
    }

    #[test]
    fn test_slice_component() {
        let s = Shape::new(vec![
            Dimension::new("c", DimKind::Channel, 2),
            Dimension::new(
                "a",
                DimKind::Spatial,
                Size::NonUniform {
                    along: "c".into(),
                    sizes: vec![4, 5],
                },
            ),
            Dimension::new("b", DimKind::Spatial, 2),
        ])
        .unwrap();
        assert!(!s.is_uniform());
        assert_eq!(s.volume(), None);
        assert_eq!(s.stacking_dims(), vec!["c"]);
        assert_eq!(s.slice_component("c", 1).unwrap(), xy_named(5, 2));
        assert!(s.slice_component("c", 2).is_err());
    }

    fn per_slice(stack: usize, sizes: Vec<usize>, along: &str) -> Result<Shape> {
        Shape::new(vec![
            Dimension::new("c", DimKind::Channel, stack),
            Dimension::new(
                "a",
                DimKind::Spatial,
                Size::NonUniform {
                    along: along.into(),
                    sizes,
                },
            ),
        ])
    }

    #[test]
    fn test_malformed_per_slice_sizes_rejected() {
        assert!(per_slice(2, vec![4, 5], "c").is_ok());
        // one entry short of the stacking size
        assert!(matches!(
            per_slice(2, vec![4], "c"),
            Err(Error::InvalidShape(_))
        ));
        // stacking dimension missing, or the dimension itself
        assert!(matches!(
            per_slice(2, vec![4, 5], "nope"),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            per_slice(2, vec![4, 5], "a"),
            Err(Error::InvalidShape(_))
        ));
        // stacking dimension without a fixed size
        let symbolic = Shape::new(vec![
            Dimension::new("c", DimKind::Channel, Size::Symbolic),
            Dimension::new(
                "a",
                DimKind::Spatial,
                Size::NonUniform {
                    along: "c".into(),
                    sizes: vec![4, 5],
                },
            ),
        ]);
        assert!(matches!(symbolic, Err(Error::InvalidShape(_))));
        // resizing the stacking dimension breaks the per-slice sizes
        let s = per_slice(2, vec![4, 5], "c").unwrap();
        assert!(s.with_size("c", 3usize).is_err());
    }

    #[test]
    fn test_volume_overflow_is_undefined() {
        let s = spatial([("x", 1usize << 40), ("y", 1 << 40)]).unwrap();
        assert_eq!(s.volume(), None);
        assert!(s.is_resolved());
    }

    fn xy_named(a: usize, b: usize) -> Shape {
        spatial([("a", a), ("b", b)]).unwrap()
    }

    #[test]
    fn test_rename_follows_non_uniform() {
        let s = Shape::new(vec![
            Dimension::new("c", DimKind::Channel, 2),
            Dimension::new(
                "a",
                DimKind::Spatial,
                Size::NonUniform {
                    along: "c".into(),
                    sizes: vec![4, 5],
                },
            ),
        ])
        .unwrap();
        let r = s.rename("c", "k").unwrap();
        assert_eq!(r.stacking_dims(), vec!["k"]);
        assert!(s.rename("c", "a").is_err());
    }

    #[test]
    fn test_display() {
        let s = xy(5, 4).merge(&channel([("vector", "x,y")]).unwrap()).unwrap();
        assert_eq!(format!("{s}"), "(vector:c=x,y, x:s=5, y:s=4)");
    }
}
