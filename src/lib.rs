//! One-shot promises with executor-driven continuations.
//!
//! (if you're after futures that are polled by an `async` runtime, this is not the library you're
//! looking for; promises here are push-based and never polled)
//!
//! # Overview
//!
//! This library features two main types: [`Promise`] and [`Executor`].
//!
//! ## Promises
//!
//! A [`Promise`] is a placeholder for a value that will be known eventually. It starts out pending,
//! and is settled exactly once through its [`Resolver`]: either it is *fulfilled* with a value, or
//! it is *rejected* with an [`Error`]. Every later attempt to settle it is ignored.
//!
//! Code that is interested in the outcome registers a continuation with [`Promise::observe`], or
//! chains new promises off of it with [`Promise::then`], [`Promise::map`], [`Promise::catch`],
//! [`Promise::recover`], [`Promise::always`] and friends. Rejections skip over fulfillment
//! continuations until something handles them, and panics inside continuations turn into
//! rejections with [`Error::Panicked`] instead of tearing down the thread that ran them.
//!
//! Multiple promises can be combined with [`all`], [`any`] and [`race`]. Fallible work can be
//! repeated with [`Retry`], and [`Promise::delay`], [`Promise::timeout`] and
//! [`Promise::validate`] cover the remaining everyday needs.
//!
//! Nothing is ever cancelled: a promise that loses a race, or whose result is no longer needed,
//! still runs to completion, and its outcome is simply dropped.
//!
//! ## Executors
//!
//! Continuations never run inside the call that registers them or the call that settles the
//! promise. Instead, every operation takes an [`Executor`] that decides where the continuation
//! runs. Anything implementing [`Execute`] can be used, which only needs to run work right away and
//! after a delay.
//!
//! [`WorkerPool`] is the executor that comes with this crate: a fixed set of OS threads plus a
//! timer thread. Like every thread owner in this crate, it enforces *structured concurrency*: when
//! it is dropped, its threads are joined, and a panic in raw work submitted to it is forwarded to
//! the thread dropping the pool.
//!
//! # Usage
//!
//! Spawning work on a pool and waiting for its transformed result:
//!
//! ```
//! use oath::{Promise, WorkerPool};
//!
//! let pool = WorkerPool::builder().name("doc").threads(2).spawn().unwrap();
//! let executor = pool.executor();
//!
//! let answer = Promise::spawn(&executor, || {
//!     println!("Doing heavy task...");
//!     Ok(41)
//! })
//! .map(&executor, |n| n + 1);
//!
//! assert_eq!(answer.block(), Ok(42));
//! ```
//!
//! Combining promises, some of which may fail:
//!
//! ```
//! use std::time::Duration;
//! use oath::{all, Error, Promise, WorkerPool};
//!
//! let pool = WorkerPool::builder().spawn().unwrap();
//! let executor = pool.executor();
//!
//! let fast = Promise::fulfilled(1);
//! let slow = Promise::fulfilled(2).delay(&executor, Duration::from_millis(10));
//! let sum = all(&executor, [fast, slow])
//!     .map(&executor, |values: Vec<i32>| values.iter().sum::<i32>());
//! assert_eq!(sum.block(), Ok(3));
//!
//! let (never, _resolver) = Promise::<i32>::pending();
//! let limited = never.timeout(&executor, Duration::from_millis(10));
//! assert_eq!(limited.block(), Err(Error::TimedOut));
//! ```

mod aggregate;
mod drop;
mod error;
mod executor;
mod pool;
mod promise;
mod retry;
mod sync;
mod timing;
mod validate;

#[cfg(test)]
mod test;

pub use aggregate::{all, any, race, Input};
pub use error::{Error, Outcome, DOMAIN};
pub use executor::{Execute, Executor, Work};
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use promise::{Promise, Resolver};
pub use retry::{retry, Retry, DEFAULT_ATTEMPTS, DEFAULT_DELAY};
