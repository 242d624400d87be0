//! Drop guards.

/// Runs a closure when dropped, including while the owning thread unwinds.
#[must_use = "`Defer` runs its closure as soon as it is dropped, so it should be bound to a variable"]
pub struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Returns a guard that runs `cb` when it goes out of scope.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use crate::test::silent_panic;

    use super::*;

    #[test]
    fn runs_on_scope_exit_and_unwind() {
        let runs = AtomicUsize::new(0);
        {
            let _guard = defer(|| {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(runs.load(Ordering::SeqCst), 0);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        catch_unwind(AssertUnwindSafe(|| {
            let _guard = defer(|| {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            silent_panic("unwinding");
        }))
        .unwrap_err();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
