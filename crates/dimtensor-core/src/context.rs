use std::cell::RefCell;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::backend::BackendRef;
use crate::cpu::CpuBackend;
use crate::error::{Error, Result};

// Backend context: which engine creation functions use
//
// Resolution order for the active backend:
//
//   1. innermost open scope on this thread
//   2. the process-wide default, if one was installed
//   3. the baseline CPU engine
//
// Scopes are a thread-local stack. `BackendScope` pushes on creation and
// pops in Drop, so the previous backend comes back on every exit path
// (early return, `?`, panic). Nested scopes must be dropped in reverse
// order, which lexical scoping guarantees.
//
// Only creation consults the context. Operations on existing tensors
// resolve their engine from the operands (see `backend::resolve`).

static BASELINE: Lazy<BackendRef> = Lazy::new(|| Arc::new(CpuBackend));

static GLOBAL_DEFAULT: Lazy<RwLock<Option<BackendRef>>> = Lazy::new(|| RwLock::new(None));

thread_local! {
    static SCOPES: RefCell<Vec<BackendRef>> = const { RefCell::new(Vec::new()) };
}

/// The always-available fallback engine.
pub fn baseline() -> BackendRef {
    Arc::clone(&BASELINE)
}

/// Replace the process-wide default backend.
pub fn set_global_default(backend: BackendRef) -> Result<()> {
    let mut slot = GLOBAL_DEFAULT
        .write()
        .map_err(|_| Error::msg("global backend lock poisoned"))?;
    log::info!("global default backend set to '{}'", backend.name());
    *slot = Some(backend);
    Ok(())
}

/// Remove the process-wide default; the baseline takes over again.
pub fn reset_global_default() -> Result<()> {
    let mut slot = GLOBAL_DEFAULT
        .write()
        .map_err(|_| Error::msg("global backend lock poisoned"))?;
    if slot.take().is_some() {
        log::info!("global default backend reset to baseline");
    }
    Ok(())
}

/// The process-wide default, ignoring scopes.
pub fn global_default() -> Result<BackendRef> {
    let slot = GLOBAL_DEFAULT
        .read()
        .map_err(|_| Error::msg("global backend lock poisoned"))?;
    Ok(slot.clone().unwrap_or_else(baseline))
}

/// The backend creation functions use right now on this thread.
pub fn active_backend() -> Result<BackendRef> {
    match SCOPES.with(|s| s.borrow().last().cloned()) {
        Some(b) => Ok(b),
        None => global_default(),
    }
}

/// Number of open scopes on this thread.
pub fn scope_depth() -> usize {
    SCOPES.with(|s| s.borrow().len())
}

/// RAII override of the active backend.
///
/// ```ignore
/// let _scope = BackendScope::enter(Arc::new(NdarrayBackend::new()));
/// let t = zeros([("x", 4)], DType::FLOAT32)?; // ndarray-backed
/// // previous backend restored when `_scope` drops
/// ```
#[must_use = "the override ends as soon as the scope is dropped"]
pub struct BackendScope {
    depth: usize,
    // !Send: the guard must drop on the thread whose stack it pushed to
    _not_send: std::marker::PhantomData<*const ()>,
}

impl BackendScope {
    pub fn enter(backend: BackendRef) -> Self {
        log::trace!("entering backend scope '{}'", backend.name());
        let depth = SCOPES.with(|s| {
            let mut s = s.borrow_mut();
            s.push(backend);
            s.len()
        });
        BackendScope {
            depth,
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for BackendScope {
    fn drop(&mut self) {
        SCOPES.with(|s| {
            let mut s = s.borrow_mut();
            if s.len() != self.depth {
                log::warn!(
                    "backend scope at depth {} dropped out of order ({} scopes open); \
                     inner overrides are discarded",
                    self.depth,
                    s.len()
                );
            }
            // drops inner scopes that were leaked with mem::forget
            s.truncate(self.depth - 1);
        });
        log::trace!("left backend scope at depth {}", self.depth);
    }
}

/// Run `f` with `backend` as the active backend.
pub fn with_backend<R>(backend: BackendRef, f: impl FnOnce() -> R) -> R {
    let _scope = BackendScope::enter(backend);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, HostBuffer, NativeData};
    use crate::dtype::DType;

    #[derive(Debug)]
    struct Named(&'static str);

    impl Backend for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn priority(&self) -> i32 {
            1
        }
        fn supports_dtype(&self, _dtype: DType) -> bool {
            true
        }
        fn is_native(&self, _data: &NativeData) -> bool {
            false
        }
        fn dtype(&self, _data: &NativeData) -> Result<DType> {
            Err(Error::unsupported(self.0, "dtype"))
        }
        fn dims(&self, _data: &NativeData) -> Result<Vec<usize>> {
            Err(Error::unsupported(self.0, "dims"))
        }
        fn from_host(&self, _host: HostBuffer) -> Result<NativeData> {
            Err(Error::unsupported(self.0, "from_host"))
        }
        fn to_host(&self, _data: &NativeData) -> Result<HostBuffer> {
            Err(Error::unsupported(self.0, "to_host"))
        }
    }

    fn active_name() -> String {
        active_backend().unwrap().name().to_string()
    }

    #[test]
    fn test_baseline_when_nothing_set() {
        assert_eq!(scope_depth(), 0);
        assert_eq!(active_name(), "cpu");
    }

    #[test]
    fn test_nested_scopes() {
        with_backend(Arc::new(Named("outer")), || {
            assert_eq!(active_name(), "outer");
            with_backend(Arc::new(Named("inner")), || {
                assert_eq!(active_name(), "inner");
                assert_eq!(scope_depth(), 2);
            });
            assert_eq!(active_name(), "outer");
        });
        assert_eq!(scope_depth(), 0);
    }

    #[test]
    fn test_scope_restored_on_error_and_panic() {
        let failing = || -> Result<()> {
            let _s = BackendScope::enter(Arc::new(Named("err")));
            Err(Error::msg("inside scope"))
        };
        assert!(failing().is_err());
        assert_eq!(scope_depth(), 0);

        let r = std::panic::catch_unwind(|| {
            with_backend(Arc::new(Named("panic")), || panic!("boom"));
        });
        assert!(r.is_err());
        assert_eq!(scope_depth(), 0);
    }

    #[test]
    fn test_out_of_order_drop_unwinds_to_outer() {
        let outer = BackendScope::enter(Arc::new(Named("outer")));
        let inner = BackendScope::enter(Arc::new(Named("inner")));
        assert_eq!(scope_depth(), 2);
        // the outer guard takes every scope above it along
        drop(outer);
        assert_eq!(scope_depth(), 0);
        assert_eq!(active_name(), "cpu");
        // the stale inner guard leaves the stack alone
        let again = BackendScope::enter(Arc::new(Named("again")));
        drop(inner);
        assert_eq!(active_name(), "again");
        drop(again);
        assert_eq!(scope_depth(), 0);
    }
}
