use crate::{Error, Result};
use core::{fmt, time::Duration};
use std::sync::Arc;

/// A sizing bound, re-queried on every grow/shrink decision.
///
/// Returning a different value later (for example from an atomic an operator
/// updates) resizes the pool without restarting it.
pub type SizeFn = Arc<dyn Fn() -> usize + Send + Sync>;

/// How long a worker may sit idle before it is eligible for retirement.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns a [`SizeFn`] that always yields `n`.
pub fn fixed(n: usize) -> SizeFn {
    Arc::new(move || n)
}

/// Construction parameters for a [`Pool`](crate::Pool).
///
/// Both bounds are required; [`Pool::new`](crate::Pool::new) rejects a config
/// with either one missing.
#[derive(Clone)]
pub struct PoolConfig {
    pub min: Option<SizeFn>,
    pub max: Option<SizeFn>,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn new(min: SizeFn, max: SizeFn) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::default()
        }
    }

    /// Constant bounds.
    pub fn fixed(min: usize, max: usize) -> Self {
        Self::new(fixed(min), fixed(max))
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<Bounds> {
        let (Some(min), Some(max)) = (&self.min, &self.max) else {
            let which = if self.min.is_none() { "minimum" } else { "maximum" };
            return Err(Error::InvalidBounds {
                reason: format!("{which} sizing function is missing"),
            });
        };

        let (lo, hi) = (min(), max());
        if hi == 0 {
            return Err(Error::InvalidBounds {
                reason: "maximum must be greater than 0".to_string(),
            });
        }
        if lo > hi {
            return Err(Error::InvalidBounds {
                reason: format!("minimum ({lo}) exceeds maximum ({hi})"),
            });
        }

        Ok(Bounds {
            min: Arc::clone(min),
            max: Arc::clone(max),
        })
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("min", &self.min.as_ref().map(|min| min()))
            .field("max", &self.max.as_ref().map(|max| max()))
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Validated sizing functions.
pub(crate) struct Bounds {
    min: SizeFn,
    max: SizeFn,
}

impl Bounds {
    /// Current `(min, max)`. A callable that drifts into `min > max` or
    /// `max == 0` after validation is clamped rather than trusted.
    pub(crate) fn current(&self) -> (usize, usize) {
        let max = (self.max)().max(1);
        let min = (self.min)().min(max);
        (min, max)
    }
}
