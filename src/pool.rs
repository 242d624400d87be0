//! An owned pool of threads that implements [`Execute`].

use std::{
    any::Any,
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    io,
    panic::{self, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    drop::defer,
    executor::{Execute, Work},
    sync::Mutex,
    Executor,
};

enum Job {
    Run(Work),
    Exit,
}

enum TimerMsg {
    Schedule(Timer),
    Exit,
}

struct Timer {
    /// `None` if the deadline lies too far in the future to be represented. Such timers never fire.
    deadline: Option<Instant>,
    /// Submission order, used to fire timers with equal deadlines first-in first-out.
    seq: u64,
    work: Work,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed, so that `BinaryHeap` (a max-heap) yields the earliest deadline first. Timers that
    // never fire sort after all others.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        let key = |t: &Timer| (t.deadline.is_none(), t.deadline, t.seq);
        key(other).cmp(&key(self))
    }
}

/// State shared between the [`WorkerPool`], its threads, and every [`Executor`] handle to it.
struct Shared {
    name: String,
    jobs: Sender<Job>,
    timers: Sender<TimerMsg>,
    timer_seq: Mutex<u64>,
    closed: AtomicBool,
    /// Payload of the first panic raised by a job.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Execute for Shared {
    fn run_now(&self, work: Work) {
        if self.closed.load(Ordering::Acquire) {
            log::warn!("pool '{}' is shut down, dropping submitted work", self.name);
            return;
        }
        if self.jobs.send(Job::Run(work)).is_err() {
            log::warn!("pool '{}' has no workers left, dropping submitted work", self.name);
        }
    }

    fn run_after(&self, delay: Duration, work: Work) {
        if self.closed.load(Ordering::Acquire) {
            log::warn!("pool '{}' is shut down, dropping delayed work", self.name);
            return;
        }
        let deadline = Instant::now().checked_add(delay);
        if deadline.is_none() {
            log::debug!("pool '{}' got delayed work that will never become due", self.name);
        }
        let seq = {
            let mut seq = self.timer_seq.lock();
            *seq += 1;
            *seq
        };
        let timer = Timer {
            deadline,
            seq,
            work,
        };
        if self.timers.send(TimerMsg::Schedule(timer)).is_err() {
            log::warn!("pool '{}' has no timer thread, dropping delayed work", self.name);
        }
    }
}

/// A builder object that can be used to configure and spawn a [`WorkerPool`].
#[derive(Clone)]
pub struct WorkerPoolBuilder {
    name: Option<String>,
    threads: usize,
}

impl WorkerPoolBuilder {
    /// Sets the base name of the [`WorkerPool`] threads.
    ///
    /// Worker threads are named `<name>-<index>`, the timer thread is named `<name>-timer`.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the number of worker threads.
    ///
    /// By default, a single worker thread is used, which means that all work submitted to the
    /// pool runs serially, in the order it became ready.
    #[inline]
    pub fn threads(self, threads: usize) -> Self {
        Self { threads, ..self }
    }

    /// Spawns the [`WorkerPool`].
    ///
    /// # Panics
    ///
    /// This method will panic if the number of threads is 0.
    pub fn spawn(self) -> io::Result<WorkerPool> {
        assert_ne!(self.threads, 0, "a worker pool needs at least 1 thread");

        let name = self.name.unwrap_or_else(|| "pool".to_string());
        let (job_sender, job_recv) = crossbeam_channel::unbounded();
        let (timer_sender, timer_recv) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            name: name.clone(),
            jobs: job_sender,
            timers: timer_sender,
            timer_seq: Mutex::new(0),
            closed: AtomicBool::new(false),
            panic: Mutex::new(None),
        });

        // Assemble the pool as threads come up, so that an error half-way through still shuts
        // down the threads that were already spawned.
        let mut pool = WorkerPool {
            shared: shared.clone(),
            workers: Vec::with_capacity(self.threads),
            timer: None,
        };
        for i in 0..self.threads {
            let recv = job_recv.clone();
            let shared = shared.clone();
            let thread_name = format!("{name}-{i}");
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || work_loop(&thread_name, recv, &shared))?;
            pool.workers.push(handle);
        }

        let jobs = shared.jobs.clone();
        let thread_name = format!("{name}-timer");
        pool.timer = Some(
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || timer_loop(&thread_name, timer_recv, jobs))?,
        );

        Ok(pool)
    }
}

fn work_loop(thread: &str, recv: Receiver<Job>, shared: &Shared) {
    log::trace!("'{thread}' starting");
    let _guard = defer(move || log::trace!("'{thread}' exiting"));
    for job in recv {
        match job {
            Job::Run(work) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                    log::error!("work on '{thread}' panicked");
                    shared.panic.lock().get_or_insert(payload);
                }
            }
            Job::Exit => break,
        }
    }
}

fn timer_loop(thread: &str, recv: Receiver<TimerMsg>, jobs: Sender<Job>) {
    log::trace!("'{thread}' starting");
    let _guard = defer(move || log::trace!("'{thread}' exiting"));
    let mut timers: BinaryHeap<Timer> = BinaryHeap::new();
    loop {
        let msg = match timers.peek() {
            Some(Timer {
                deadline: Some(deadline),
                ..
            }) => match recv.recv_deadline(*deadline) {
                Ok(msg) => Some(msg),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            _ => match recv.recv() {
                Ok(msg) => Some(msg),
                Err(_) => return,
            },
        };
        match msg {
            Some(TimerMsg::Schedule(timer)) => timers.push(timer),
            Some(TimerMsg::Exit) => {
                if !timers.is_empty() {
                    log::debug!("'{thread}' discarding {} pending timer(s)", timers.len());
                }
                return;
            }
            None => {}
        }

        let now = Instant::now();
        while timers
            .peek()
            .and_then(|timer| timer.deadline)
            .map_or(false, |deadline| deadline <= now)
        {
            if let Some(timer) = timers.pop() {
                if jobs.send(Job::Run(timer.work)).is_err() {
                    return;
                }
            }
        }
    }
}

/// An owned set of threads that runs the work submitted through its [`Executor`] handles.
///
/// Work submitted via [`Execute::run_now`] is queued for the worker threads. Work submitted via
/// [`Execute::run_after`] is held by a dedicated timer thread until its deadline, and then queued
/// for the worker threads like any other work.
///
/// This type enforces structured concurrency: When it's dropped, pending timers are discarded,
/// already queued work is drained, and all threads are joined. If a work item has panicked, the
/// panic is forwarded to the thread dropping the [`WorkerPool`]. (Work submitted through promise
/// operations never panics: those panics are turned into rejections.)
///
/// [`Executor`] handles may outlive the pool. Work submitted through them after the pool was
/// dropped is discarded.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);

        // Stop the timer thread first, so it doesn't forward work to exited workers.
        if let Some(timer) = self.timer.take() {
            self.shared.timers.send(TimerMsg::Exit).ok();
            if let Err(payload) = timer.join() {
                self.shared.panic.lock().get_or_insert(payload);
            }
        }

        for _ in &self.workers {
            self.shared.jobs.send(Job::Exit).ok();
        }
        for worker in self.workers.drain(..) {
            if let Err(payload) = worker.join() {
                self.shared.panic.lock().get_or_insert(payload);
            }
        }

        let payload = self.shared.panic.lock().take();
        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

impl WorkerPool {
    /// Returns a builder that can be used to configure and spawn a [`WorkerPool`].
    #[inline]
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            name: None,
            threads: 1,
        }
    }

    /// Returns an [`Executor`] handle that submits work to this pool.
    pub fn executor(&self) -> Executor {
        Executor::from(self.shared.clone())
    }

    /// Returns the number of worker threads (not counting the timer thread).
    #[inline]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{panic::catch_unwind, sync::atomic::AtomicUsize};

    use crate::{test::silent_panic, Promise};

    use super::*;

    fn assert_send<T: Send>() {}

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn pool_is_send() {
        assert_send::<WorkerPool>();
        assert_send::<Executor>();
    }

    #[test]
    fn runs_work() {
        let pool = WorkerPool::builder().name("runs_work").threads(4).spawn().unwrap();
        assert_eq!(pool.threads(), 4);
        let executor = pool.executor();
        let promises = (0..32usize)
            .map(|i| Promise::spawn(&executor, move || Ok(i * 2)))
            .collect::<Vec<_>>();
        for (i, promise) in promises.into_iter().enumerate() {
            assert_eq!(promise.block_timeout(WAIT), Some(Ok(i * 2)));
        }
    }

    #[test]
    fn worker_names() {
        let pool = WorkerPool::builder().name("named").spawn().unwrap();
        let name = Promise::spawn(&pool.executor(), || {
            Ok(thread::current().name().map(str::to_string))
        });
        assert_eq!(name.block_timeout(WAIT), Some(Ok(Some("named-0".to_string()))));
    }

    #[test]
    fn single_thread_is_serial() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let order = order.clone();
            executor.run_now(move || order.lock().push(i));
        }
        drop(pool);
        assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn delayed_work_waits() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        let (promise, resolver) = Promise::<Instant>::pending();
        let delay = Duration::from_millis(30);
        let start = Instant::now();
        executor.run_after(delay, move || {
            resolver.fulfill(Instant::now());
        });
        let elapsed = promise.block_timeout(WAIT).unwrap().unwrap() - start;
        assert!(elapsed >= delay, "{elapsed:?} elapsed, expected at least {delay:?}");
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done, resolver) = Promise::<()>::pending();
        for (i, ms) in [(0, 40), (1, 10), (2, 25), (3, 10)] {
            let order = order.clone();
            executor.run_after(Duration::from_millis(ms), move || order.lock().push(i));
        }
        executor.run_after(Duration::from_millis(60), move || {
            resolver.fulfill(());
        });
        done.block_timeout(WAIT).unwrap().unwrap();
        assert_eq!(*order.lock(), [1, 3, 2, 0]);
    }

    #[test]
    fn pool_propagates_panic_on_drop() {
        let pool = WorkerPool::builder().spawn().unwrap();
        pool.executor().run_now(|| silent_panic("worker panic"));
        catch_unwind(AssertUnwindSafe(|| drop(pool))).unwrap_err();
    }

    #[test]
    fn panicking_work_does_not_kill_worker() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        executor.run_now(|| silent_panic("worker panic"));
        let after = Promise::spawn(&executor, || Ok(1));
        assert_eq!(after.block_timeout(WAIT), Some(Ok(1)));
        catch_unwind(AssertUnwindSafe(|| drop(pool))).unwrap_err();
    }

    #[test]
    fn work_after_shutdown_is_dropped() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        drop(pool);

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        executor.run_now(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let promise = Promise::<()>::spawn(&executor, || Ok(()));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(promise.peek(), Some(Err(crate::Error::Abandoned)));
    }

    #[test]
    fn pending_timers_are_discarded_on_drop() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let (promise, resolver) = Promise::<()>::pending();
        pool.executor().run_after(Duration::from_secs(3600), move || {
            resolver.fulfill(());
        });
        let start = Instant::now();
        drop(pool);
        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(promise.peek(), Some(Err(crate::Error::Abandoned)));
    }

    #[test]
    fn unbounded_delay_never_fires() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        let (never, never_resolver) = Promise::<()>::pending();
        executor.run_after(Duration::MAX, move || {
            never_resolver.fulfill(());
        });

        // Timers behind it still fire.
        let (soon, soon_resolver) = Promise::<()>::pending();
        executor.run_after(Duration::from_millis(5), move || {
            soon_resolver.fulfill(());
        });
        assert_eq!(soon.block_timeout(WAIT), Some(Ok(())));
        assert!(never.is_pending());

        drop(pool);
        assert_eq!(never.peek(), Some(Err(crate::Error::Abandoned)));
    }

    #[test]
    fn unbounded_timeout_lets_source_win() {
        let pool = WorkerPool::builder().spawn().unwrap();
        let executor = pool.executor();
        let (source, resolver) = Promise::<i32>::pending();
        let limited = source.timeout(&executor, Duration::MAX);
        assert_eq!(limited.block_timeout(Duration::from_millis(20)), None);
        resolver.fulfill(3);
        assert_eq!(limited.block_timeout(WAIT), Some(Ok(3)));
    }

    #[test]
    #[should_panic(expected = "at least 1 thread")]
    fn zero_threads() {
        let _ = WorkerPool::builder().threads(0).spawn();
    }
}
