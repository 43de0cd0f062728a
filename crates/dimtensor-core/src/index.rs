use std::ops::{Range, RangeFrom, RangeFull};

use crate::dim::{Dimension, Size};
use crate::error::{Error, Result};
use crate::stack;
use crate::tensor::{Storage, Tensor};

// Indexer: read-only, dimension-scoped selection
//
// Every request names one dimension and leaves all others alone:
//
//   Index(i)      pick position i, the dimension disappears
//   Slice(s)      keep start, start+step, ... below stop
//   Item(label)   pick the position labelled `label`, the dimension
//                 disappears
//   Items(list)   keep the labelled positions, in the given order
//
// Requests given together as a mapping (`Tensor::select`) are applied in the
// tensor's canonical shape order, whatever order the caller listed them in.
//
// On a non-uniform tensor a request on the stacking dimension picks
// components; any other request is applied to every component and the
// results are stacked again (which may make the tensor uniform).

/// A range request: `start >= 0`, `step > 0`, `stop` clamped to the size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub start: i64,
    pub stop: Option<i64>,
    pub step: i64,
}

impl Slice {
    pub fn new(start: i64, stop: Option<i64>, step: i64) -> Self {
        Slice { start, stop, step }
    }

    /// Every position.
    pub fn full() -> Self {
        Slice::new(0, None, 1)
    }

    pub fn with_step(self, step: i64) -> Self {
        Slice { step, ..self }
    }

    /// (start, len, step) in positions of a dimension of `size`.
    pub(crate) fn resolve(&self, dim: &str, size: usize) -> Result<(usize, usize, usize)> {
        if self.start < 0 {
            return Err(Error::InvalidSlice(format!(
                "start must be >= 0 on '{dim}', got {}",
                self.start
            )));
        }
        if self.step <= 0 {
            return Err(Error::InvalidSlice(format!(
                "step must be > 0 on '{dim}', got {}",
                self.step
            )));
        }
        if let Some(stop) = self.stop.filter(|&s| s < 0) {
            return Err(Error::InvalidSlice(format!(
                "stop must be >= 0 on '{dim}', got {stop}"
            )));
        }
        let start = (self.start as usize).min(size);
        let stop = self.stop.map_or(size, |s| (s as usize).min(size));
        let step = self.step as usize;
        if stop <= start {
            return Ok((0, 0, step));
        }
        Ok((start, (stop - start).div_ceil(step), step))
    }
}

impl From<Range<i64>> for Slice {
    fn from(r: Range<i64>) -> Self {
        Slice::new(r.start, Some(r.end), 1)
    }
}

impl From<RangeFrom<i64>> for Slice {
    fn from(r: RangeFrom<i64>) -> Self {
        Slice::new(r.start, None, 1)
    }
}

impl From<RangeFull> for Slice {
    fn from(_: RangeFull) -> Self {
        Slice::full()
    }
}

/// One dimension-scoped request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpec {
    Index(usize),
    Slice(Slice),
    Item(String),
    Items(Vec<String>),
}

impl From<usize> for IndexSpec {
    fn from(i: usize) -> Self {
        IndexSpec::Index(i)
    }
}

impl From<Slice> for IndexSpec {
    fn from(s: Slice) -> Self {
        IndexSpec::Slice(s)
    }
}

impl From<Range<i64>> for IndexSpec {
    fn from(r: Range<i64>) -> Self {
        IndexSpec::Slice(r.into())
    }
}

impl From<RangeFrom<i64>> for IndexSpec {
    fn from(r: RangeFrom<i64>) -> Self {
        IndexSpec::Slice(r.into())
    }
}

impl From<&str> for IndexSpec {
    fn from(item: &str) -> Self {
        IndexSpec::Item(item.to_string())
    }
}

impl From<Vec<&str>> for IndexSpec {
    fn from(items: Vec<&str>) -> Self {
        IndexSpec::Items(items.into_iter().map(String::from).collect())
    }
}

/// Handle on one dimension of a tensor, from `Tensor::dim`.
#[derive(Debug, Clone, Copy)]
pub struct DimView<'a> {
    tensor: &'a Tensor,
    dim: &'a Dimension,
}

impl<'a> DimView<'a> {
    pub fn name(&self) -> &'a str {
        self.dim.name()
    }

    pub fn dimension(&self) -> &'a Dimension {
        self.dim
    }

    pub fn size(&self) -> &'a Size {
        self.dim.size()
    }

    pub fn item_names(&self) -> Option<&'a [String]> {
        self.dim.item_names()
    }

    /// Select position `i`; the dimension is removed.
    pub fn index(&self, i: usize) -> Result<Tensor> {
        index_at(self.tensor, self.dim.name(), i)
    }

    pub fn slice(&self, s: impl Into<Slice>) -> Result<Tensor> {
        slice_at(self.tensor, self.dim.name(), s.into())
    }

    /// Select the position labelled `item`; the dimension is removed.
    pub fn item(&self, item: &str) -> Result<Tensor> {
        let i = item_position(self.dim, item)?;
        self.index(i)
    }

    /// Keep the labelled positions, in the given order.
    pub fn items<S: AsRef<str>>(&self, items: &[S]) -> Result<Tensor> {
        let labels: Vec<String> = items.iter().map(|s| s.as_ref().to_string()).collect();
        let positions = labels
            .iter()
            .map(|item| item_position(self.dim, item))
            .collect::<Result<Vec<_>>>()?;
        gather_at(self.tensor, self.dim.name(), &positions, Some(labels))
    }

    pub fn get(&self, spec: impl Into<IndexSpec>) -> Result<Tensor> {
        self.tensor.index(self.dim.name(), spec)
    }

    /// Lazy, restartable sequence of the slices along this dimension.
    pub fn unstack(&self) -> Result<Unstack> {
        self.tensor.unstack(self.dim.name())
    }

    pub fn size_tensor(&self) -> Result<Tensor> {
        self.tensor.size_tensor(self.dim.name())
    }
}

fn item_position(dim: &Dimension, item: &str) -> Result<usize> {
    if dim.item_names().is_none() {
        return Err(Error::InvalidSlice(format!(
            "dimension '{}' has no item names",
            dim.name()
        )));
    }
    dim.item_index(item).ok_or_else(|| {
        Error::InvalidSlice(format!("'{item}' is not an item of dimension '{}'", dim.name()))
    })
}

fn out_of_range(name: &str, index: usize, size: &Size) -> Error {
    Error::IndexOutOfRange {
        dim: name.to_string(),
        index,
        size: size.fixed().unwrap_or(0),
    }
}

fn index_at(t: &Tensor, name: &str, i: usize) -> Result<Tensor> {
    let dim = t.shape().dim(name)?;
    match t.storage() {
        Storage::Dense(data) => {
            let size = dim.size().fixed().unwrap_or(0);
            if i >= size {
                return Err(out_of_range(name, i, dim.size()));
            }
            let axis = t
                .shape()
                .index_of(name)
                .ok_or_else(|| Error::not_found(name, t.shape()))?;
            let backend = t.backend();
            let out = backend.index(data, axis, i)?;
            Tensor::from_native(backend, out, t.shape().without_dim(name)?)
        }
        Storage::Stacked { along, components } if along == name => components
            .get(i)
            .cloned()
            .ok_or_else(|| out_of_range(name, i, dim.size())),
        Storage::Stacked { .. } => stack::map_components(t, |c| index_at(c, name, i)),
    }
}

fn slice_at(t: &Tensor, name: &str, s: Slice) -> Result<Tensor> {
    let dim = t.shape().dim(name)?;
    match t.storage() {
        Storage::Dense(data) => {
            let size = dim.size().fixed().unwrap_or(0);
            let (start, len, step) = s.resolve(name, size)?;
            let axis = t
                .shape()
                .index_of(name)
                .ok_or_else(|| Error::not_found(name, t.shape()))?;
            let backend = t.backend();
            let out = backend.slice(data, axis, start, len, step)?;
            let labels = dim
                .item_names()
                .map(|items| items.iter().skip(start).step_by(step).take(len).cloned().collect());
            let sliced = dim.with_size(len).with_item_names(labels);
            Tensor::from_native(backend, out, t.shape().with_dim(sliced)?)
        }
        Storage::Stacked { along, .. } if along == name => {
            let size = dim.size().fixed().unwrap_or(0);
            let (start, len, step) = s.resolve(name, size)?;
            let positions: Vec<usize> = (0..len).map(|k| start + k * step).collect();
            gather_at(t, name, &positions, None)
        }
        Storage::Stacked { .. } => stack::map_components(t, |c| slice_at(c, name, s)),
    }
}

/// Keep `positions` along `name`. `labels` replaces the item names when
/// given; otherwise the labels of the kept positions survive.
fn gather_at(
    t: &Tensor,
    name: &str,
    positions: &[usize],
    labels: Option<Vec<String>>,
) -> Result<Tensor> {
    let dim = t.shape().dim(name)?;
    let in_range = || -> Result<Dimension> {
        let size = dim.size().fixed().unwrap_or(0);
        if let Some(&bad) = positions.iter().find(|&&p| p >= size) {
            return Err(out_of_range(name, bad, dim.size()));
        }
        let labels = labels.clone().or_else(|| {
            dim.item_names()
                .map(|items| positions.iter().map(|&p| items[p].clone()).collect())
        });
        Ok(dim.with_size(positions.len()).with_item_names(labels))
    };
    match t.storage() {
        Storage::Dense(data) => {
            let kept = in_range()?;
            let axis = t
                .shape()
                .index_of(name)
                .ok_or_else(|| Error::not_found(name, t.shape()))?;
            let backend = t.backend();
            let out = backend.gather(data, axis, positions)?;
            Tensor::from_native(backend, out, t.shape().with_dim(kept)?)
        }
        Storage::Stacked { along, components } if along == name => {
            let kept = in_range()?;
            let picked: Vec<Tensor> = positions.iter().map(|&p| components[p].clone()).collect();
            stack::stack(&picked, kept)
        }
        Storage::Stacked { .. } => {
            stack::map_components(t, |c| gather_at(c, name, positions, labels.clone()))
        }
    }
}

/// Lazy sequence of the slices of a tensor along one dimension.
///
/// Finite and restartable: `rewind` starts over, and cloning gives an
/// independent cursor. Along a stacking dimension the slices are the
/// components, whose shapes may differ from each other.
#[derive(Debug, Clone)]
pub struct Unstack {
    tensor: Tensor,
    name: String,
    size: usize,
    pos: usize,
}

impl Unstack {
    pub fn dim_name(&self) -> &str {
        &self.name
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for Unstack {
    type Item = Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.size {
            return None;
        }
        let out = index_at(&self.tensor, &self.name, self.pos);
        self.pos += 1;
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.size - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Unstack {}

impl Tensor {
    /// Handle on the named dimension.
    pub fn dim(&self, name: &str) -> Result<DimView<'_>> {
        Ok(DimView {
            tensor: self,
            dim: self.shape().dim(name)?,
        })
    }

    /// Apply one request to the named dimension.
    pub fn index(&self, name: &str, spec: impl Into<IndexSpec>) -> Result<Tensor> {
        let view = self.dim(name)?;
        match spec.into() {
            IndexSpec::Index(i) => view.index(i),
            IndexSpec::Slice(s) => view.slice(s),
            IndexSpec::Item(item) => view.item(&item),
            IndexSpec::Items(items) => view.items(&items),
        }
    }

    /// Apply several requests at once, in canonical shape order.
    ///
    /// Unknown names fail with `DimensionNotFound`, a name given twice with
    /// `InvalidSlice`.
    pub fn select(&self, requests: &[(&str, IndexSpec)]) -> Result<Tensor> {
        for (i, (name, _)) in requests.iter().enumerate() {
            self.shape().dim(name)?;
            if requests[..i].iter().any(|(n, _)| n == name) {
                return Err(Error::InvalidSlice(format!(
                    "dimension '{name}' indexed more than once"
                )));
            }
        }
        let mut out = self.clone();
        for d in self.shape().dims() {
            if let Some((name, spec)) = requests.iter().find(|(n, _)| *n == d.name()) {
                out = out.index(name, spec.clone())?;
            }
        }
        Ok(out)
    }

    /// Slices along `name` as a lazy, restartable sequence.
    pub fn unstack(&self, name: &str) -> Result<Unstack> {
        let size = match self.shape().get_size(name)? {
            Size::Fixed(n) => *n,
            other => {
                return Err(Error::InvalidShape(format!(
                    "cannot unstack '{name}' of size {other}"
                )))
            }
        };
        Ok(Unstack {
            tensor: self.clone(),
            name: name.to_string(),
            size,
            pos: 0,
        })
    }
}
