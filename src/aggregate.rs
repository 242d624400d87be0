//! Combinators that coordinate many promises into one.
//!
//! All of them accept anything that converts [`Into<Input<T>>`]: a [`Promise`], or an
//! [`Outcome`] that is already known. Already known outcomes are treated exactly like promises
//! that have already settled: both are taken into account in input order, before any pending
//! input.
//!
//! None of these combinators cancel anything. Inputs that lose a race, or whose siblings already
//! decided the result, keep running; their outcomes are discarded.

use std::{mem, sync::Arc};

use crate::{sync::Mutex, Error, Executor, Outcome, Promise, Resolver};

/// An input to [`all`], [`any`], [`race`] or a [`Retry`][crate::Retry] attempt.
pub enum Input<T> {
    /// A promise that may or may not have settled yet.
    Promise(Promise<T>),
    /// An outcome that is already known.
    Settled(Outcome<T>),
}

impl<T> Input<T> {
    /// An input that has already been fulfilled with `value`.
    pub fn value(value: T) -> Self {
        Self::Settled(Ok(value))
    }

    /// An input that has already been rejected with `error`.
    pub fn error(error: Error) -> Self {
        Self::Settled(Err(error))
    }
}

impl<T: Clone + Send + 'static> Input<T> {
    /// Returns the outcome if it is already known, or the promise that is still pending.
    fn known(self) -> Result<Outcome<T>, Promise<T>> {
        match self {
            Self::Settled(outcome) => Ok(outcome),
            Self::Promise(promise) => promise.peek().ok_or(promise),
        }
    }
}

impl<T> From<Promise<T>> for Input<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Promise(promise)
    }
}

impl<T> From<Outcome<T>> for Input<T> {
    fn from(outcome: Outcome<T>) -> Self {
        Self::Settled(outcome)
    }
}

/// Write-once result cells for the children of one aggregation.
struct Slots<V> {
    inner: Mutex<SlotsInner<V>>,
}

struct SlotsInner<V> {
    cells: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Slots<V> {
    fn new(len: usize) -> Self {
        Self {
            inner: Mutex::new(SlotsInner {
                cells: (0..len).map(|_| None).collect(),
                remaining: len,
            }),
        }
    }

    /// Stores the result of the child at `index`.
    ///
    /// The call that fills the last empty cell gets every cell back, in index order.
    fn fill(&self, index: usize, value: V) -> Option<Vec<V>> {
        let mut inner = self.inner.lock();
        debug_assert!(inner.cells[index].is_none(), "slot {index} filled twice");
        inner.cells[index] = Some(value);
        inner.remaining -= 1;
        if inner.remaining == 0 {
            Some(mem::take(&mut inner.cells).into_iter().flatten().collect())
        } else {
            None
        }
    }
}

fn collect<T, I>(inputs: I) -> Vec<Input<T>>
where
    I: IntoIterator,
    I::Item: Into<Input<T>>,
{
    inputs.into_iter().map(Into::into).collect()
}

/// Waits for every input to be fulfilled.
///
/// The returned promise fulfills with the values of all inputs, in input order. As soon as any
/// input is rejected, the returned promise is rejected with that input's error; the first
/// rejection to happen wins, regardless of its position in the input.
///
/// An empty input fulfills with an empty [`Vec`].
pub fn all<T, I>(executor: &Executor, inputs: I) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator,
    I::Item: Into<Input<T>>,
{
    let inputs = collect(inputs);
    let (promise, resolver) = Promise::pending();
    if inputs.is_empty() {
        resolver.fulfill(Vec::new());
        return promise;
    }

    let slots = Arc::new(Slots::new(inputs.len()));
    for (index, input) in inputs.into_iter().enumerate() {
        match input.known() {
            Ok(outcome) => settle_all(&slots, &resolver, index, outcome),
            Err(child) => {
                let slots = slots.clone();
                let resolver = resolver.clone();
                child.observe(executor, move |outcome| {
                    settle_all(&slots, &resolver, index, outcome);
                });
            }
        }
    }
    promise
}

fn settle_all<T: Clone + Send + 'static>(
    slots: &Slots<T>,
    resolver: &Resolver<Vec<T>>,
    index: usize,
    outcome: Outcome<T>,
) {
    match outcome {
        Ok(value) => {
            if let Some(values) = slots.fill(index, value) {
                resolver.fulfill(values);
            }
        }
        Err(error) => {
            resolver.reject(error);
        }
    }
}

/// Waits for every input to settle, whether it is fulfilled or rejected.
///
/// The returned promise fulfills with the outcome of every input, in input order, as long as at
/// least one input was fulfilled. If every input was rejected, the returned promise is rejected
/// with the error of the input that settled *last* (in time, not in input order). Inputs that are
/// already settled when `any` is called count as settling in input order, before pending ones.
///
/// An empty input fulfills with an empty [`Vec`].
pub fn any<T, I>(executor: &Executor, inputs: I) -> Promise<Vec<Outcome<T>>>
where
    T: Clone + Send + 'static,
    I: IntoIterator,
    I::Item: Into<Input<T>>,
{
    let inputs = collect(inputs);
    let (promise, resolver) = Promise::pending();
    if inputs.is_empty() {
        resolver.fulfill(Vec::new());
        return promise;
    }

    let slots = Arc::new(Slots::new(inputs.len()));
    for (index, input) in inputs.into_iter().enumerate() {
        match input.known() {
            Ok(outcome) => settle_any(&slots, &resolver, index, outcome),
            Err(child) => {
                let slots = slots.clone();
                let resolver = resolver.clone();
                child.observe(executor, move |outcome| {
                    settle_any(&slots, &resolver, index, outcome);
                });
            }
        }
    }
    promise
}

fn settle_any<T: Clone + Send + 'static>(
    slots: &Slots<Outcome<T>>,
    resolver: &Resolver<Vec<Outcome<T>>>,
    index: usize,
    outcome: Outcome<T>,
) {
    let error = outcome.as_ref().err().cloned();
    let Some(outcomes) = slots.fill(index, outcome) else {
        return;
    };
    // If every input was rejected, the one completing the set was rejected too, and it is the
    // last one to have settled.
    match error {
        Some(last) if outcomes.iter().all(Result::is_err) => {
            resolver.reject(last);
        }
        _ => {
            resolver.fulfill(outcomes);
        }
    }
}

/// Settles like whichever input settles first.
///
/// Inputs that are already settled when `race` is called, whether they are settled promises or
/// known outcomes, win over pending ones; among them, the first in input order wins.
///
/// # Panics
///
/// This function will panic if `inputs` is empty, since such a race could never settle.
pub fn race<T, I>(executor: &Executor, inputs: I) -> Promise<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator,
    I::Item: Into<Input<T>>,
{
    let inputs = collect(inputs);
    assert!(!inputs.is_empty(), "race needs at least 1 input");

    let (promise, resolver) = Promise::pending();
    for input in inputs {
        match input.known() {
            Ok(outcome) => {
                resolver.settle(outcome);
            }
            Err(child) => child.pipe(executor, resolver.clone()),
        }
    }
    promise
}
