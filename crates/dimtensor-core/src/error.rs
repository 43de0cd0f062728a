use crate::shape::Shape;

/// All errors that can occur within dimtensor.
///
/// Every failure is local and synchronous: nothing in the shape algebra or
/// the dispatcher retries, falls back to another backend, or swallows a
/// conflict. Callers that want resilience catch the error and re-dispatch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A dimension name was required but is absent from the shape.
    #[error("dimension '{name}' not found in shape {shape}")]
    DimensionNotFound { name: String, shape: Shape },

    /// Two shapes disagree on a dimension they both declare.
    #[error("incompatible shapes {lhs} and {rhs}: conflict on dimension '{dim}'")]
    IncompatibleShapes { dim: String, lhs: Shape, rhs: Shape },

    /// Malformed index or range request.
    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    /// Integer index past the end of a dimension.
    #[error("index {index} out of range for dimension '{dim}' of size {size}")]
    IndexOutOfRange {
        dim: String,
        index: usize,
        size: usize,
    },

    /// A value cannot be represented in the target backend's native form.
    #[error("cannot convert from backend '{from}' to '{to}': {reason}")]
    ConversionError {
        from: String,
        to: String,
        reason: String,
    },

    /// The backend does not implement the requested primitive.
    #[error("backend '{backend}' does not support operation '{op}'")]
    UnsupportedOperation { backend: String, op: String },

    /// A shape violates a structural invariant (duplicate names, item-name
    /// length mismatch, unresolved sizes where concrete ones are required).
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Element count mismatch when building a tensor from raw values.
    #[error("element count mismatch: shape requires {expected} elements, got {got}")]
    ElementCountMismatch { expected: usize, got: usize },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn not_found(name: impl Into<String>, shape: &Shape) -> Self {
        Error::DimensionNotFound {
            name: name.into(),
            shape: shape.clone(),
        }
    }

    pub fn incompatible(dim: impl Into<String>, lhs: &Shape, rhs: &Shape) -> Self {
        Error::IncompatibleShapes {
            dim: dim.into(),
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }
    }

    pub fn unsupported(backend: impl Into<String>, op: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            backend: backend.into(),
            op: op.into(),
        }
    }

    pub fn conversion(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::ConversionError {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout dimtensor.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
