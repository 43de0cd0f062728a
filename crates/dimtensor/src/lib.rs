//! # dimtensor
//!
//! Backend-agnostic tensors whose dimensions carry a name and a kind.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```ignore
//! use dimtensor::prelude::*;
//!
//! let grid = zeros(spatial([("x", 5), ("y", 4)])?, DType::FLOAT32)?;
//! let v = ones(channel([("vector", "x,y")])?, DType::FLOAT32)?;
//! let field = grid.add(&v)?;
//! assert_eq!(field.volume(), Some(5 * 4 * 2));
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `dimtensor-core` | Shape algebra, DType, Backend trait, CPU engine, Tensor, indexing, stacking |
//! | `dimtensor-ndarray` | ndarray engine with rayon kernels (feature `ndarray`, on by default) |

use std::sync::Arc;

/// Re-export core types.
pub use dimtensor_core::{
    backend::{
        bool_value, convert, resolve, same_backend, Backend, BackendRef, BinaryOp, CmpOp,
        HostBuffer, NativeData, ReduceOp, UnaryOp,
    },
    config::{with_config, Config},
    context::{
        active_backend, global_default, reset_global_default, scope_depth, set_global_default,
        with_backend, BackendScope,
    },
    BatchMergePolicy, DType, DTypeKind, DimKind, DimSpec, Dimension, Error, IntoShape, Result,
    Shape, Size, Tensor, WithDType,
};

pub use dimtensor_core::{batch, channel, instance, spatial};
pub use dimtensor_core::{arange, full, linspace, ones, random_normal, random_uniform, zeros};
pub use dimtensor_core::{concat, join_spatial, spatial_binary, stack};
pub use dimtensor_core::{DimView, IndexSpec, Slice, Unstack};

/// Re-export the baseline engine.
pub use dimtensor_core::{CpuArray, CpuBackend};

/// Re-export the ndarray engine (feature `ndarray`).
#[cfg(feature = "ndarray")]
pub use dimtensor_ndarray::{NdArray, NdarrayBackend};

/// Every engine compiled into this build, baseline first.
pub fn available_backends() -> Vec<BackendRef> {
    let mut engines: Vec<BackendRef> = vec![Arc::new(CpuBackend)];
    #[cfg(feature = "ndarray")]
    engines.push(NdarrayBackend::shared());
    engines
}

/// Install the highest-priority compiled engine as the process-wide default
/// and return it.
pub fn install_preferred_default() -> Result<BackendRef> {
    let preferred = available_backends()
        .into_iter()
        .max_by_key(|b| b.priority())
        .ok_or_else(|| Error::msg("no backend compiled in"))?;
    log::info!(
        "preferred backend '{}' (priority {})",
        preferred.name(),
        preferred.priority()
    );
    set_global_default(Arc::clone(&preferred))?;
    Ok(preferred)
}

pub mod prelude {
    pub use crate::{
        active_backend, arange, batch, channel, concat, full, instance, join_spatial, linspace,
        ones, random_normal, random_uniform, spatial, spatial_binary, stack, with_backend,
        with_config, zeros,
    };
    pub use crate::{
        Backend, BackendRef, BackendScope, BatchMergePolicy, BinaryOp, Config, CpuBackend, DType,
        DimKind, Dimension, Error, IndexSpec, ReduceOp, Result, Shape, Size, Slice, Tensor,
    };

    #[cfg(feature = "ndarray")]
    pub use crate::NdarrayBackend;
}
