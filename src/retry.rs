use std::{fmt, time::Duration};

use crate::{promise::guard, Error, Executor, Input, Outcome, Promise, Resolver};

/// Number of attempts a [`Retry`] makes unless configured otherwise.
pub const DEFAULT_ATTEMPTS: i64 = 1;

/// Delay between two attempts of a [`Retry`] unless configured otherwise.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

type Condition = Box<dyn Fn(i64, &Error) -> bool + Send + 'static>;
type Work<T> = Box<dyn FnMut() -> Input<T> + Send + 'static>;

/// Runs fallible work repeatedly until it succeeds or runs out of attempts.
///
/// ```
/// # use std::time::Duration;
/// # use oath::{Error, Promise, Retry, WorkerPool};
/// let pool = WorkerPool::builder().spawn().unwrap();
/// let mut calls = 0;
/// let promise: Promise<u32> = Retry::new()
///     .attempts(3)
///     .delay(Duration::from_millis(1))
///     .run(&pool.executor(), move || {
///         calls += 1;
///         if calls < 3 {
///             Err(Error::new("example", 1, "not yet"))
///         } else {
///             Ok(calls)
///         }
///     });
/// assert_eq!(promise.block(), Ok(3));
/// ```
pub struct Retry {
    attempts: i64,
    delay: Duration,
    condition: Option<Condition>,
}

impl Retry {
    /// Creates a [`Retry`] that makes [`DEFAULT_ATTEMPTS`] attempts, [`DEFAULT_DELAY`] apart,
    /// regardless of the error.
    pub fn new() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
            condition: None,
        }
    }

    /// Sets the total number of attempts, including the first one.
    ///
    /// Values less than 1 result in exactly one attempt.
    pub fn attempts(mut self, attempts: i64) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the delay between a failed attempt and the next one.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets a condition that decides whether a failed attempt is retried.
    ///
    /// `condition` is called with the number of attempts left after the failure and the error it
    /// produced. Returning `false` rejects the resulting promise with that error right away.
    /// It is not called after the last attempt.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(i64, &Error) -> bool + Send + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Starts running `work` on `executor`.
    ///
    /// `work` may return an [`Outcome`], a [`Promise`], or anything else that converts into an
    /// [`Input`]. A panic in `work` counts as a failed attempt.
    ///
    /// The returned promise is fulfilled with the value of the first successful attempt, or
    /// rejected with the error of the last one.
    pub fn run<T, R, F>(self, executor: &Executor, mut work: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        R: Into<Input<T>>,
        F: FnMut() -> R + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let attempt = Attempt {
            executor: executor.clone(),
            work: Box::new(move || -> Input<T> { work().into() }),
            remaining: self.attempts.max(1),
            delay: self.delay,
            condition: self.condition,
            resolver,
        };
        executor.run_now(move || attempt.run());
        promise
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

/// Runs `work` once on `executor`, with the default [`Retry`] configuration.
pub fn retry<T, R, F>(executor: &Executor, work: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    R: Into<Input<T>>,
    F: FnMut() -> R + Send + 'static,
{
    Retry::new().run(executor, work)
}

/// State carried from one attempt to the next.
struct Attempt<T: Clone + Send + 'static> {
    executor: Executor,
    work: Work<T>,
    /// Attempts left, including the one about to run.
    remaining: i64,
    delay: Duration,
    condition: Option<Condition>,
    resolver: Resolver<T>,
}

impl<T: Clone + Send + 'static> Attempt<T> {
    fn run(mut self) {
        self.remaining -= 1;
        let work = &mut self.work;
        match guard(|| work()) {
            Ok(Input::Settled(outcome)) => self.finish(outcome),
            Ok(Input::Promise(promise)) => {
                let executor = self.executor.clone();
                promise.observe(&executor, move |outcome| self.finish(outcome));
            }
            Err(panic) => self.finish(Err(panic)),
        }
    }

    fn finish(self, outcome: Outcome<T>) {
        let error = match outcome {
            Ok(value) => {
                self.resolver.fulfill(value);
                return;
            }
            Err(error) => error,
        };

        if self.remaining <= 0 {
            log::debug!("final attempt failed: {error}");
            self.resolver.reject(error);
            return;
        }

        let proceed = match &self.condition {
            Some(condition) => guard(|| condition(self.remaining, &error)),
            None => Ok(true),
        };
        match proceed {
            Ok(true) => {
                log::debug!(
                    "attempt failed: {error}; retrying in {:?} ({} attempt(s) left)",
                    self.delay,
                    self.remaining,
                );
                let executor = self.executor.clone();
                let delay = self.delay;
                executor.run_after(delay, move || self.run());
            }
            Ok(false) => {
                log::debug!("not retrying after: {error}");
                self.resolver.reject(error);
            }
            Err(panic) => {
                self.resolver.reject(panic);
            }
        }
    }
}
