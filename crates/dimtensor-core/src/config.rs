use std::cell::{Cell, RefCell};

use crate::shape::BatchMergePolicy;

// Config: per-thread knobs of the dispatcher
//
// Kept thread-local for the same reason as the backend scope stack: the
// settings follow a call chain, not the process. `with_config` installs a
// value for the duration of a closure and restores the previous one on the
// way out, including when the closure panics.
//
// Seeding: when `seed` is set, every random generator call on this thread
// receives `seed + n`, where n counts the calls made since the config was
// installed. Two runs with the same seed see the same values.

/// Settings consulted by shape merging and random creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    batch_policy: BatchMergePolicy,
    seed: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_policy(mut self, policy: BatchMergePolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn batch_policy(&self) -> BatchMergePolicy {
        self.batch_policy
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
    static SEED_CALLS: Cell<u64> = const { Cell::new(0) };
}

/// The config active on this thread.
pub fn current() -> Config {
    CONFIG.with(|c| c.borrow().clone())
}

/// Batch policy of the active config.
pub fn batch_policy() -> BatchMergePolicy {
    CONFIG.with(|c| c.borrow().batch_policy)
}

/// Seed for the next random generator call, if seeding is on.
pub(crate) fn next_seed() -> Option<u64> {
    let seed = CONFIG.with(|c| c.borrow().seed)?;
    let n = SEED_CALLS.with(|calls| {
        let n = calls.get();
        calls.set(n + 1);
        n
    });
    Some(seed.wrapping_add(n))
}

struct ConfigGuard {
    previous: Option<(Config, u64)>,
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        if let Some((config, calls)) = self.previous.take() {
            CONFIG.with(|c| *c.borrow_mut() = config);
            SEED_CALLS.with(|c| c.set(calls));
        }
    }
}

/// Run `f` with `config` active on this thread.
pub fn with_config<R>(config: Config, f: impl FnOnce() -> R) -> R {
    let previous = CONFIG.with(|c| std::mem::replace(&mut *c.borrow_mut(), config));
    let calls = SEED_CALLS.with(|c| c.replace(0));
    let _guard = ConfigGuard {
        previous: Some((previous, calls)),
    };
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_strict_unseeded() {
        let c = Config::default();
        assert_eq!(c.batch_policy(), BatchMergePolicy::Strict);
        assert_eq!(c.seed(), None);
        assert_eq!(next_seed(), None);
    }

    #[test]
    fn test_with_config_restores() {
        let cfg = Config::new().with_batch_policy(BatchMergePolicy::BroadcastUnit);
        with_config(cfg, || {
            assert_eq!(batch_policy(), BatchMergePolicy::BroadcastUnit);
        });
        assert_eq!(batch_policy(), BatchMergePolicy::Strict);
    }

    #[test]
    fn test_with_config_restores_on_panic() {
        let r = std::panic::catch_unwind(|| {
            with_config(Config::new().with_seed(1), || panic!("boom"));
        });
        assert!(r.is_err());
        assert_eq!(current(), Config::default());
    }

    #[test]
    fn test_seed_sequence_repeats() {
        let run = || with_config(Config::new().with_seed(40), || (next_seed(), next_seed()));
        assert_eq!(run(), (Some(40), Some(41)));
        assert_eq!(run(), (Some(40), Some(41)));
    }
}
