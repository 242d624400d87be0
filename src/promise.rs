use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    sync::{Condvar, Mutex},
    Error, Executor, Outcome,
};

/// Runs `f`, turning a panic into an [`Error::Panicked`].
pub(crate) fn guard<R>(f: impl FnOnce() -> R) -> Outcome<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Error::from_panic)
}

type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

struct Observer<T> {
    executor: Executor,
    continuation: Continuation<T>,
}

impl<T: Send + 'static> Observer<T> {
    fn dispatch(self, outcome: Outcome<T>) {
        let Observer {
            executor,
            continuation,
        } = self;
        executor.run_now(move || {
            if let Err(panic) = guard(move || continuation(outcome)) {
                log::error!("promise observer panicked: {panic}");
            }
        });
    }
}

enum State<T> {
    Pending(Vec<Observer<T>>),
    Settled(Outcome<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Wakes threads blocked in [`Promise::block`].
    condvar: Condvar,
    /// Number of live [`Resolver`]s.
    resolvers: AtomicUsize,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if let State::Settled(_) = &*state {
                return false;
            }
            mem::replace(&mut *state, State::Settled(outcome.clone()))
        };
        self.condvar.notify_all();

        if let State::Pending(observers) = previous {
            log::trace!(
                "promise {} with {} observer(s)",
                if outcome.is_ok() { "fulfilled" } else { "rejected" },
                observers.len(),
            );
            for observer in observers {
                observer.dispatch(outcome.clone());
            }
        }
        true
    }
}

/// A value of type `T`, or an [`Error`], that will be known eventually.
///
/// A [`Promise`] starts out pending and settles exactly once, either by being fulfilled with a
/// value or by being rejected with an [`Error`]. Once settled, it never changes again.
///
/// [`Promise`] is a cheap handle: cloning it yields another handle to the same underlying state.
/// Settling is done through the [`Resolver`] returned by [`Promise::pending`].
///
/// Code that wants to react to the outcome registers a continuation via [`Promise::observe`], or
/// via one of the chaining methods built on top of it ([`Promise::then`], [`Promise::map`],
/// [`Promise::catch`], [`Promise::recover`], [`Promise::always`], ...). Continuations never run
/// on the thread that registers them or settles the promise; they are handed to the [`Executor`]
/// passed alongside them.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The settling side of a pending [`Promise`].
///
/// Any number of clones of a [`Resolver`] may race to settle the promise; exactly one of them
/// succeeds. If every clone is dropped while the promise is still pending, the promise is rejected
/// with [`Error::Abandoned`].
pub struct Resolver<T: Clone + Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        self.inner.resolvers.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.inner.resolvers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.settle(Err(Error::Abandoned));
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Fulfills the promise with `value`.
    ///
    /// Returns `true` if this call settled the promise, or `false` if it was already settled (in
    /// which case `value` is dropped).
    #[inline]
    pub fn fulfill(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the promise with `error`.
    ///
    /// Returns `true` if this call settled the promise, or `false` if it was already settled.
    #[inline]
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Settles the promise with `outcome`.
    ///
    /// Returns `true` if this call settled the promise, or `false` if it was already settled.
    /// The winning call dispatches every registered observer, in registration order, to the
    /// executor it was registered with.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let settled = self.inner.settle(outcome);
        if !settled {
            log::trace!("ignoring attempt to settle an already settled promise");
        }
        settled
    }

    /// Returns whether the promise has been settled (by any resolver).
    pub fn is_settled(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Settled(_))
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a pending [`Promise`] and the [`Resolver`] that settles it.
    pub fn pending() -> (Promise<T>, Resolver<T>) {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::Pending(Vec::new())),
            condvar: Condvar::new(),
            resolvers: AtomicUsize::new(1),
        });
        (
            Promise {
                inner: inner.clone(),
            },
            Resolver { inner },
        )
    }

    /// Creates a [`Promise`] that is already settled with `outcome`.
    pub fn settled(outcome: Outcome<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Settled(outcome)),
                condvar: Condvar::new(),
                resolvers: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a [`Promise`] that is already fulfilled with `value`.
    #[inline]
    pub fn fulfilled(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Creates a [`Promise`] that is already rejected with `error`.
    #[inline]
    pub fn rejected(error: Error) -> Self {
        Self::settled(Err(error))
    }

    /// Runs `work` on `executor` and settles the returned [`Promise`] with its result.
    ///
    /// A panic in `work` rejects the promise with [`Error::Panicked`].
    pub fn spawn<F>(executor: &Executor, work: F) -> Self
    where
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        let (promise, resolver) = Self::pending();
        executor.run_now(move || {
            resolver.settle(guard(work).and_then(|outcome| outcome));
        });
        promise
    }

    /// Runs `work` on `executor`, handing it the [`Resolver`] of the returned [`Promise`].
    ///
    /// `work` may settle the promise right away or pass the resolver on to settle it later. A
    /// panic in `work` rejects the promise with [`Error::Panicked`] unless it was settled first.
    pub fn spawn_with<F>(executor: &Executor, work: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        let (promise, resolver) = Self::pending();
        executor.run_now(move || {
            let handed_out = resolver.clone();
            if let Err(panic) = guard(move || work(handed_out)) {
                resolver.reject(panic);
            }
        });
        promise
    }

    /// Registers `continuation` to be run on `executor` with the outcome of this promise.
    ///
    /// If the promise is still pending, the continuation is queued and will be dispatched when the
    /// promise settles, after every continuation registered before it. If the promise has already
    /// settled, the continuation is dispatched right away.
    ///
    /// This method never runs `continuation` on the calling thread (unless `executor` chooses to),
    /// and never blocks on other continuations.
    pub fn observe<F>(&self, executor: &Executor, continuation: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let observer = Observer {
            executor: executor.clone(),
            continuation: Box::new(continuation),
        };
        let outcome = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending(observers) => {
                    observers.push(observer);
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        observer.dispatch(outcome);
    }

    /// Settles `resolver` with the outcome of this promise, once it is known.
    pub(crate) fn pipe(&self, executor: &Executor, resolver: Resolver<T>) {
        self.observe(executor, move |outcome| {
            resolver.settle(outcome);
        });
    }

    /// Returns the outcome of this promise, or [`None`] if it is still pending.
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &*self.inner.state.lock() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Pending(_))
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Settled(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Settled(Err(_)))
    }

    /// Blocks the calling thread until the promise settles, and returns its outcome.
    ///
    /// This is an adapter for synchronous code at the edges of a program. Calling it from a
    /// thread of an executor that is also needed to settle the promise will deadlock.
    pub fn block(&self) -> Outcome<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone();
            }
            state = self.inner.condvar.wait(state);
        }
    }

    /// Like [`Promise::block`], but gives up after `timeout` and returns [`None`].
    ///
    /// A `timeout` too large to be represented as a deadline waits indefinitely.
    pub fn block_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.block());
        };
        let mut state = self.inner.state.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return Some(outcome.clone());
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            state = self.inner.condvar.wait_timeout(state, left);
        }
    }

    /// Runs `work` with the fulfilled value, and settles the returned promise with its result.
    ///
    /// If this promise is rejected, `work` is not run and the returned promise is rejected with the
    /// same error.
    pub fn then<U, F>(&self, executor: &Executor, work: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.observe(executor, move |outcome| {
            resolver.settle(outcome.and_then(|value| guard(|| work(value)).and_then(|r| r)));
        });
        promise
    }

    /// Transforms the fulfilled value with `work`.
    #[inline]
    pub fn map<U, F>(&self, executor: &Executor, work: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(executor, move |value| Ok(work(value)))
    }

    /// Chains another promise-producing step onto the fulfilled value.
    ///
    /// The returned promise settles like the promise produced by `work`.
    pub fn and_then<U, F>(&self, executor: &Executor, work: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let next_executor = executor.clone();
        self.observe(executor, move |outcome| {
            match outcome.and_then(|value| guard(|| work(value))) {
                Ok(next) => next.pipe(&next_executor, resolver),
                Err(error) => {
                    resolver.reject(error);
                }
            }
        });
        promise
    }

    /// Runs `work` with the rejection error. The returned promise settles like this one.
    ///
    /// If `work` panics, the returned promise is rejected with the panic instead.
    pub fn catch<F>(&self, executor: &Executor, work: F) -> Promise<T>
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.observe(executor, move |outcome| {
            let outcome = outcome.map_err(|error| guard(|| work(&error)).err().unwrap_or(error));
            resolver.settle(outcome);
        });
        promise
    }

    /// Lets `work` turn a rejection back into a value (or into a different error).
    pub fn recover<F>(&self, executor: &Executor, work: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Outcome<T> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.observe(executor, move |outcome| {
            resolver.settle(outcome.or_else(|error| guard(|| work(error)).and_then(|r| r)));
        });
        promise
    }

    /// Like [`Promise::recover`], but `work` produces another promise to settle with.
    pub fn recover_with<F>(&self, executor: &Executor, work: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Promise<T> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let next_executor = executor.clone();
        self.observe(executor, move |outcome| match outcome {
            Ok(value) => {
                resolver.fulfill(value);
            }
            Err(error) => match guard(|| work(error)) {
                Ok(next) => next.pipe(&next_executor, resolver),
                Err(panic) => {
                    resolver.reject(panic);
                }
            },
        });
        promise
    }

    /// Runs `work` once this promise settles, whatever the outcome.
    ///
    /// The returned promise settles like this one, unless `work` panics.
    pub fn always<F>(&self, executor: &Executor, work: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.observe(executor, move |outcome| {
            resolver.settle(guard(work).and_then(|()| outcome));
        });
        promise
    }

    /// Feeds the items of `items` one after another through `step`, starting from this promise.
    ///
    /// Each step receives the value the previous step fulfilled with. The first rejection skips
    /// all remaining steps.
    pub fn reduce<I, F>(&self, executor: &Executor, items: I, step: F) -> Promise<T>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: FnMut(T, I::Item) -> Promise<T> + Send + 'static,
    {
        let step = Arc::new(Mutex::new(step));
        items.into_iter().fold(self.clone(), |acc, item| {
            let step = step.clone();
            acc.and_then(executor, move |value| {
                let mut step = step.lock();
                (*step)(value, item)
            })
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Promise");
        match self.inner.state.try_lock().as_deref() {
            Some(State::Pending(observers)) => s.field("observers", &observers.len()),
            Some(State::Settled(outcome)) => s.field("outcome", outcome),
            None => s.field("state", &"<locked>"),
        }
        .finish()
    }
}
