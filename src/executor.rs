//! The capability every promise operation dispatches its work through.

use std::{fmt, sync::Arc, time::Duration};

/// A unit of work handed to an [`Executor`].
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run work, either right away or after a delay.
///
/// Implementors decide which thread the work runs on and whether work items may run in parallel.
/// The only requirements are that `run_now` does not wait for `work` to finish, and that
/// `run_after` never runs `work` before `delay` has elapsed.
///
/// Work submitted to an implementor that can no longer run it (for example, because it has been
/// shut down) should be dropped. Dropping work that holds a [`Resolver`][crate::Resolver] rejects
/// the corresponding promise with [`Error::Abandoned`][crate::Error::Abandoned] once no other
/// resolver is left.
pub trait Execute: Send + Sync + 'static {
    /// Schedules `work` to run as soon as possible.
    fn run_now(&self, work: Work);

    /// Schedules `work` to run no earlier than `delay` from now.
    fn run_after(&self, delay: Duration, work: Work);
}

/// A cloneable, type-erased handle to an [`Execute`] implementation.
///
/// Every promise operation takes an [`Executor`] explicitly; there is no global default.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<dyn Execute>,
}

impl Executor {
    /// Wraps an [`Execute`] implementation.
    pub fn new<E: Execute>(execute: E) -> Self {
        Self {
            inner: Arc::new(execute),
        }
    }

    /// Runs `f` as soon as possible.
    #[inline]
    pub fn run_now<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.inner.run_now(Box::new(f));
    }

    /// Runs `f` no earlier than `delay` from now.
    #[inline]
    pub fn run_after<F: FnOnce() + Send + 'static>(&self, delay: Duration, f: F) {
        self.inner.run_after(delay, Box::new(f));
    }
}

impl<E: Execute> From<Arc<E>> for Executor {
    fn from(execute: Arc<E>) -> Self {
        Self { inner: execute }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}
