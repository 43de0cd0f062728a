//! # dimtensor-core
//!
//! Tensors whose axes are addressed by name and kind instead of position.
//!
//! This crate provides:
//! - [`Shape`] / [`Dimension`]: named dimensions of kind batch, instance,
//!   channel or spatial, with merge-based broadcasting
//! - [`DType`]: element kind and bit width, with promotion and casting
//! - [`Backend`] trait: the primitive operations an array engine provides,
//!   with [`CpuBackend`] as the always-available baseline
//! - [`Tensor`]: a shape plus an opaque value owned by one backend
//! - dimension-scoped indexing ([`DimView`], [`Unstack`]) and non-uniform
//!   stacking ([`stack`])
//!
//! ```ignore
//! use dimtensor_core::{channel, spatial, zeros, DType};
//!
//! let grid = zeros(spatial([("x", 5), ("y", 4)])?, DType::FLOAT32)?;
//! let field = zeros(channel([("vector", "x,y")])?, DType::FLOAT32)?;
//! let sum = grid.add(&field)?; // (vector:c=x,y, x:s=5, y:s=4)
//! ```

// Layering, bottom-up:
// - dtype, dim, shape: pure value types, no backend involved
// - backend, cpu, layout: the engine interface and the baseline engine
// - context, config: thread-scoped active backend and settings
// - tensor, dispatch, index, stack, creation: the user-facing surface

pub mod backend;
pub mod config;
pub mod context;
pub mod cpu;
pub mod creation;
pub mod dim;
mod dispatch;
pub mod dtype;
pub mod error;
pub mod index;
pub mod layout;
pub mod shape;
pub mod stack;
pub mod tensor;

pub use backend::{
    Backend, BackendRef, BinaryOp, CmpOp, HostBuffer, NativeData, ReduceOp, UnaryOp,
};
pub use config::{with_config, Config};
pub use context::{
    active_backend, reset_global_default, set_global_default, with_backend, BackendScope,
};
pub use cpu::{CpuArray, CpuBackend};
pub use creation::{arange, full, linspace, ones, random_normal, random_uniform, zeros};
pub use dim::{DimKind, DimSpec, Dimension, Size};
pub use dispatch::{join_spatial, spatial_binary};
pub use dtype::{DType, DTypeKind, WithDType};
pub use error::{Error, Result};
pub use index::{DimView, IndexSpec, Slice, Unstack};
pub use layout::Layout;
pub use shape::{batch, channel, instance, spatial, BatchMergePolicy, IntoShape, Shape};
pub use stack::{concat, stack};
pub use tensor::Tensor;
