use crate::{Error, Executor, Promise};

impl<T: Clone + Send + 'static> Promise<T> {
    /// Checks the fulfilled value with `predicate`.
    ///
    /// The returned promise is fulfilled with the same value if `predicate` returns `true`, and
    /// rejected with [`Error::ValidationFailure`] if it returns `false`. A rejection is passed on
    /// without calling `predicate`.
    pub fn validate<F>(&self, executor: &Executor, predicate: F) -> Promise<T>
    where
        F: FnOnce(&T) -> bool + Send + 'static,
    {
        self.then(executor, move |value| {
            if predicate(&value) {
                Ok(value)
            } else {
                Err(Error::ValidationFailure)
            }
        })
    }
}
