use std::time::Duration;

use crate::{race, Error, Executor, Promise};

impl<T: Clone + Send + 'static> Promise<T> {
    /// Fulfills the returned promise with this promise's value, `delay` after it is fulfilled.
    ///
    /// A rejection is passed on immediately.
    pub fn delay(&self, executor: &Executor, delay: Duration) -> Promise<T> {
        let (promise, resolver) = Promise::pending();
        let timer = executor.clone();
        self.observe(executor, move |outcome| match outcome {
            Ok(value) => timer.run_after(delay, move || {
                resolver.fulfill(value);
            }),
            Err(error) => {
                resolver.reject(error);
            }
        });
        promise
    }

    /// Settles like this promise, unless `timeout` elapses first, in which case the returned
    /// promise is rejected with [`Error::TimedOut`].
    ///
    /// The clock starts when this method is called. Whatever this promise is waiting on is not
    /// cancelled when the timeout fires.
    pub fn timeout(&self, executor: &Executor, timeout: Duration) -> Promise<T> {
        let (timer, resolver) = Promise::pending();
        executor.run_after(timeout, move || {
            resolver.reject(Error::TimedOut);
        });
        race(executor, [self.clone(), timer])
    }
}
