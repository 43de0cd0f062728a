use crate::error::{Error, Result};

// Layout: how a positional view maps onto flat storage
//
// The baseline CPU engine keeps values in one flat buffer and describes every
// view with extents, strides and an offset. That makes the shape primitives
// the dispatcher leans on most cheap:
//
//   permute    reorder extents and strides, no copy
//   slice      offset += start * stride, stride *= step, no copy
//   index      offset += i * stride, drop the axis, no copy
//   broadcast  stride 0 along size-1 axes, no copy
//
// Reshape only works on contiguous layouts; everything else gets copied
// into a fresh contiguous buffer first.

/// Row-major strides for the given extents.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    if !dims.is_empty() {
        strides[dims.len() - 1] = 1;
        for i in (0..dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
    }
    strides
}

/// Number of elements for the given extents (1 for a scalar).
///
/// Only for extents of storage that already exists; caller-supplied extents
/// go through `checked_elem_count`.
pub fn elem_count(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Like `elem_count`, but `InvalidShape` when the product overflows.
pub fn checked_elem_count(dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::InvalidShape(format!("extents {dims:?} overflow the element count")))
}

/// Extents, strides and offset of a view into flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Position in the storage buffer where this view starts.
    offset: usize,
}

impl Layout {
    /// Row-major layout starting at offset 0.
    pub fn contiguous(dims: &[usize]) -> Self {
        Layout {
            dims: dims.to_vec(),
            strides: contiguous_strides(dims),
            offset: 0,
        }
    }

    pub fn new(dims: Vec<usize>, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            dims,
            strides,
            offset,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn elem_count(&self) -> usize {
        elem_count(&self.dims)
    }

    /// Row-major, no gaps, offset 0.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == contiguous_strides(&self.dims)
    }

    fn check_axis(&self, axis: usize) -> Result<()> {
        if axis >= self.rank() {
            return Err(Error::msg(format!(
                "axis {axis} out of range for rank {}",
                self.rank()
            )));
        }
        Ok(())
    }

    /// Reorder axes: output axis `i` is input axis `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Layout> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        if perm.len() != rank
            || perm.iter().any(|&p| p >= rank || std::mem::replace(&mut seen[p], true))
        {
            return Err(Error::msg(format!(
                "invalid permutation {perm:?} for rank {rank}"
            )));
        }
        Ok(Layout {
            dims: perm.iter().map(|&p| self.dims[p]).collect(),
            strides: perm.iter().map(|&p| self.strides[p]).collect(),
            offset: self.offset,
        })
    }

    /// View of `len` elements along `axis`, starting at `start`, taking
    /// every `step`-th element.
    pub fn slice(&self, axis: usize, start: usize, len: usize, step: usize) -> Result<Layout> {
        self.check_axis(axis)?;
        let size = self.dims[axis];
        if step == 0 || (len > 0 && start + (len - 1) * step >= size) {
            return Err(Error::InvalidSlice(format!(
                "start {start}, len {len}, step {step} exceeds axis {axis} of size {size}"
            )));
        }
        let mut dims = self.dims.clone();
        let mut strides = self.strides.clone();
        dims[axis] = len;
        strides[axis] *= step;
        let offset = if len > 0 {
            self.offset + start * self.strides[axis]
        } else {
            self.offset
        };
        Ok(Layout {
            dims,
            strides,
            offset,
        })
    }

    /// View with `axis` fixed at position `index` and removed.
    pub fn index(&self, axis: usize, index: usize) -> Result<Layout> {
        self.check_axis(axis)?;
        if index >= self.dims[axis] {
            return Err(Error::msg(format!(
                "index {index} out of range for axis {axis} of size {}",
                self.dims[axis]
            )));
        }
        let mut dims = self.dims.clone();
        let mut strides = self.strides.clone();
        let offset = self.offset + index * strides[axis];
        dims.remove(axis);
        strides.remove(axis);
        Ok(Layout {
            dims,
            strides,
            offset,
        })
    }

    /// View repeated along size-1 axes to reach `target` (same rank).
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Layout> {
        if target.len() != self.rank() {
            return Err(Error::msg(format!(
                "cannot broadcast rank {} to {:?}",
                self.rank(),
                target
            )));
        }
        let mut strides = self.strides.clone();
        for (i, (&have, &want)) in self.dims.iter().zip(target).enumerate() {
            if have == want {
                continue;
            }
            if have != 1 {
                return Err(Error::msg(format!(
                    "cannot broadcast {:?} to {:?}: axis {i} has size {have}",
                    self.dims, target
                )));
            }
            strides[i] = 0;
        }
        Ok(Layout {
            dims: target.to_vec(),
            strides,
            offset: self.offset,
        })
    }

    /// Same elements under new extents. `None` unless contiguous.
    pub fn reshape(&self, dims: &[usize]) -> Option<Layout> {
        if self.is_contiguous() && elem_count(dims) == self.elem_count() {
            Some(Layout::contiguous(dims))
        } else {
            None
        }
    }

    /// flat = offset + sum(index[i] * stride[i])
    pub fn flat_index(&self, index: &[usize]) -> usize {
        let mut flat = self.offset;
        for (i, &idx) in index.iter().enumerate() {
            flat += idx * self.strides[i];
        }
        flat
    }

    /// Iterator over flat storage indices in logical (row-major) order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter: walks a layout in logical order
//
// For a contiguous layout this just counts 0, 1, 2, ...; for permuted,
// sliced or broadcast views it jumps around the buffer following strides.

/// Iterator that yields flat storage indices for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims.clone(),
            strides: layout.strides.clone(),
            offset: layout.offset,
            remaining: layout.elem_count(),
            started: false,
        }
    }

    fn flat_index(&self) -> usize {
        let mut idx = self.offset;
        for i in 0..self.current.len() {
            idx += self.current[i] * self.strides[i];
        }
        idx
    }

    /// Advance the multi-dimensional index by one, last axis fastest.
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat_index())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
