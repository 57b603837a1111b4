//! Eventually-available values and the operations that chain them.
//!
//! A [`Task`] is a cheap, cloneable handle to a result that some producer
//! settles exactly once: either a value or a [`Failure`]. Producers are the
//! [`WorkerPool`](crate::WorkerPool), an external writer calling
//! [`Task::complete`], or another task's continuation.
//!
//! Continuations registered with [`map`](Task::map), [`flat_map`](Task::flat_map),
//! [`handle`](Task::handle) and the rest run inline: on the thread that settles
//! the predecessor, or straight away on the registering thread if the
//! predecessor is already settled. Nothing here hops threads on its own; only
//! pool submissions do.
//!
//! Continuations triggered while another one is running on the same thread
//! are queued and run after it returns, so a continuation must not block on
//! a task that only a later continuation would settle.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{CompletionError, Failure};

/// Terminal state of a task
pub type Outcome<T> = Result<T, Failure>;

type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

/// Snapshot of where a task is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
}

enum State<T> {
    Pending(Vec<Callback<T>>),
    Settled(Outcome<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

/// Handle to a computation that completes with a `T` or fails
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Task<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("state", &self.state()).finish()
    }
}

/// A continuation bound to the outcome it will receive
type Job = Box<dyn FnOnce()>;

thread_local! {
    /// Continuations waiting to run on this thread
    static QUEUE: RefCell<VecDeque<Job>> = const { RefCell::new(VecDeque::new()) };
    /// Set while the outermost `settle` on this thread drains `QUEUE`
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Clears `DRAINING` even if a job unwinds
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}

/// Queue `jobs` and run them unless an outer `settle` on this thread is
/// already draining the queue; that one picks them up instead. Keeps the
/// stack flat however long a chain of continuations gets.
fn dispatch(jobs: impl IntoIterator<Item = Job>) {
    QUEUE.with(|queue| queue.borrow_mut().extend(jobs));
    if DRAINING.with(|draining| draining.replace(true)) {
        return;
    }

    let _guard = DrainGuard;
    while let Some(job) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        job();
    }
}

/// Run `f`, turning a panic into a failure
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Outcome<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Failure::from_panic)
}

impl<T> Task<T>
where
    T: Clone + Send + 'static,
{
    fn with_state(state: State<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                settled: Condvar::new(),
            }),
        }
    }

    /// A task nobody has settled yet; resolve it with [`complete`](Self::complete)
    /// or [`fail`](Self::fail)
    pub fn pending() -> Self {
        Self::with_state(State::Pending(Vec::new()))
    }

    /// An already completed task
    pub fn completed(value: T) -> Self {
        Self::with_state(State::Settled(Ok(value)))
    }

    /// An already failed task
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::from_failure(Failure::new(err))
    }

    pub fn from_failure(failure: Failure) -> Self {
        Self::with_state(State::Settled(Err(failure)))
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Callbacks never run under this lock, so poisoning carries no torn state
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete the task with `value`.
    ///
    /// Returns `false` and leaves the task untouched if it was already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Fail the task with `err`.
    ///
    /// Returns `false` and leaves the task untouched if it was already settled.
    pub fn fail(&self, err: impl Into<anyhow::Error>) -> bool {
        self.settle(Err(Failure::new(err)))
    }

    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        let callbacks = {
            let mut state = self.lock();
            match &mut *state {
                State::Settled(_) => return false,
                State::Pending(callbacks) => {
                    let callbacks = mem::take(callbacks);
                    *state = State::Settled(outcome.clone());
                    callbacks
                }
            }
        };
        self.shared.settled.notify_all();

        dispatch(callbacks.into_iter().map(|callback| {
            let outcome = outcome.clone();
            Box::new(move || callback(outcome)) as Job
        }));
        true
    }

    /// Register `callback` to run once the task settles
    pub(crate) fn on_settled(&self, callback: impl FnOnce(Outcome<T>) + Send + 'static) {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        callback(outcome);
    }

    pub fn state(&self) -> TaskState {
        match &*self.lock() {
            State::Pending(_) => TaskState::Pending,
            State::Settled(Ok(_)) => TaskState::Completed,
            State::Settled(Err(_)) => TaskState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() != TaskState::Pending
    }

    /// The outcome if the task has settled, without blocking
    pub fn peek(&self) -> Option<Outcome<T>> {
        match &*self.lock() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Block the calling thread until the task settles.
    ///
    /// A failure comes back wrapped in [`CompletionError`], whose source is the
    /// original [`Failure`].
    pub fn wait(&self) -> Result<T, CompletionError> {
        let mut state = self.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone().map_err(CompletionError::new);
            }
            state = self
                .shared
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Transform the value once it is available
    pub fn map<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let next = Task::pending();
        let sink = next.clone();
        self.on_settled(move |outcome| {
            sink.settle(outcome.and_then(|value| guarded(move || f(value))));
        });
        next
    }

    /// Like [`map`](Self::map), but `f` may fail
    pub fn try_map<U, E, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let next = Task::pending();
        let sink = next.clone();
        self.on_settled(move |outcome| {
            let mapped = outcome
                .and_then(|value| guarded(move || f(value)))
                .and_then(|result| result.map_err(Failure::new));
            sink.settle(mapped);
        });
        next
    }

    /// Consume the value for its side effects
    pub fn accept<F>(&self, f: F) -> Task<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.map(f)
    }

    /// Chain a task that depends on this one's value and adopt its outcome.
    ///
    /// `f` is not called if this task fails.
    pub fn flat_map<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Task<U> + Send + 'static,
    {
        let next = Task::pending();
        let sink = next.clone();
        self.on_settled(move |outcome| {
            match outcome.and_then(|value| guarded(move || f(value))) {
                Ok(dependent) => dependent.on_settled(move |result| {
                    sink.settle(result);
                }),
                Err(failure) => {
                    sink.settle(Err(failure));
                }
            }
        });
        next
    }

    /// Map either outcome to a value. The resulting task only fails if `f`
    /// panics.
    pub fn handle<U, F>(&self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Outcome<T>) -> U + Send + 'static,
    {
        let next = Task::pending();
        let sink = next.clone();
        self.on_settled(move |outcome| {
            sink.settle(guarded(move || f(outcome)));
        });
        next
    }

    /// Replace a failure with the value `f` produces; a success passes through
    pub fn recover<F>(&self, f: F) -> Task<T>
    where
        F: FnOnce(Failure) -> T + Send + 'static,
    {
        let next = Task::pending();
        let sink = next.clone();
        self.on_settled(move |outcome| {
            sink.settle(match outcome {
                Ok(value) => Ok(value),
                Err(failure) => guarded(move || f(failure)),
            });
        });
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, IllegalArgument};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn illegal(message: &str) -> IllegalArgument {
        IllegalArgument(message.to_string())
    }

    #[test]
    fn test_completed_task_returns_value() -> anyhow::Result<()> {
        let task = Task::completed("Hello".to_string());
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.wait()?, "Hello");
        Ok(())
    }

    #[test]
    fn test_failed_task_keeps_root_cause() {
        let task: Task<String> = Task::failed(illegal("X"));
        assert_eq!(task.state(), TaskState::Failed);

        let err = task.wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "X");
        assert_eq!(err.cause().kind(), FailureKind::Semantic);
    }

    #[test]
    fn test_settles_at_most_once() -> anyhow::Result<()> {
        let task = Task::pending();
        assert!(task.complete(1));
        assert!(!task.complete(2));
        assert!(!task.fail(illegal("late")));
        assert_eq!(task.wait()?, 1);
        Ok(())
    }

    #[test]
    fn test_wait_blocks_until_external_writer_completes() -> anyhow::Result<()> {
        let task = Task::pending();
        assert!(task.peek().is_none());

        let writer = task.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.complete("AE".to_string());
        });

        assert_eq!(task.wait()?, "AE");
        producer.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_map_applies_function() -> anyhow::Result<()> {
        let task = Task::completed("AE".to_string()).map(|c| format!("You live in {}", c));
        assert_eq!(task.wait()?, "You live in AE");
        Ok(())
    }

    #[test]
    fn test_map_registered_before_completion() -> anyhow::Result<()> {
        let source = Task::pending();
        let mapped = source.map(|n: i32| n * 2);
        assert_eq!(mapped.state(), TaskState::Pending);

        source.complete(21);
        assert_eq!(mapped.wait()?, 42);
        Ok(())
    }

    #[test]
    fn test_map_skips_function_on_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let task: Task<i32> = Task::failed(illegal("X"));
        let mapped = task.map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            n + 1
        });

        let err = mapped.wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "X");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_map_panic_fails_task() {
        let task = Task::completed(1).map(|_: i32| -> i32 { panic!("bad input") });
        let err = task.wait().unwrap_err();
        assert_eq!(err.cause().kind(), FailureKind::Panicked);
        assert_eq!(err.root_cause().to_string(), "task panicked: bad input");
    }

    #[test]
    fn test_try_map_error_fails_task() {
        let task = Task::completed("").try_map(|s: &str| {
            if s.is_empty() {
                Err(illegal("empty"))
            } else {
                Ok(s.len())
            }
        });
        assert_eq!(task.wait().unwrap_err().root_cause().to_string(), "empty");
    }

    #[test]
    fn test_accept_runs_side_effect() -> anyhow::Result<()> {
        let holder = Arc::new(Mutex::new(String::new()));
        let sink = holder.clone();

        Task::completed("AE".to_string())
            .accept(move |country| *sink.lock().unwrap() = country)
            .wait()?;

        assert_eq!(*holder.lock().unwrap(), "AE");
        Ok(())
    }

    #[test]
    fn test_flat_map_adopts_dependent_outcome() -> anyhow::Result<()> {
        let task = Task::completed("Dubai".to_string())
            .flat_map(|city| Task::completed(format!("You live in {}", city)));
        assert_eq!(task.wait()?, "You live in Dubai");

        let failing = Task::completed(1).flat_map(|_| Task::<i32>::failed(illegal("inner")));
        assert_eq!(failing.wait().unwrap_err().root_cause().to_string(), "inner");
        Ok(())
    }

    #[test]
    fn test_flat_map_waits_for_pending_dependent() -> anyhow::Result<()> {
        let dependent = Task::pending();
        let inner = dependent.clone();
        let task = Task::completed(()).flat_map(move |_| inner);
        assert_eq!(task.state(), TaskState::Pending);

        dependent.complete("late".to_string());
        assert_eq!(task.wait()?, "late");
        Ok(())
    }

    #[test]
    fn test_flat_map_never_invoked_after_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let task: Task<String> = Task::failed(illegal("X"));
        let chained = task.flat_map(move |city| {
            counter.fetch_add(1, Ordering::SeqCst);
            Task::completed(city)
        });

        assert!(chained.wait().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_propagates_through_chain() {
        let task: Task<i32> = Task::failed(illegal("root"));
        let chained = task
            .map(|n| n + 1)
            .flat_map(|n| Task::completed(n * 2))
            .map(|n| n.to_string());

        let err = chained.wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "root");
        assert_eq!(err.cause().find::<IllegalArgument>(), Some(&illegal("root")));
    }

    #[test]
    fn test_handle_always_succeeds() -> anyhow::Result<()> {
        let failed: Task<String> = Task::failed(illegal("X"));
        assert_eq!(failed.handle(|outcome| outcome.ok()).wait()?, None);

        let ok = Task::completed("Dubai".to_string());
        assert_eq!(
            ok.handle(|outcome| outcome.ok()).wait()?,
            Some("Dubai".to_string())
        );

        let sentinel = Task::<String>::failed(illegal("X"))
            .handle(|outcome| outcome.unwrap_or_else(|_| "ERROR".to_string()));
        assert_eq!(sentinel.wait()?, "ERROR");
        Ok(())
    }

    #[test]
    fn test_recover_replaces_only_failures() -> anyhow::Result<()> {
        let failed: Task<String> = Task::failed(illegal("X"));
        assert_eq!(
            failed.recover(|failure| format!("recovered from {}", failure)).wait()?,
            "recovered from X"
        );

        let ok = Task::completed("fine".to_string());
        assert_eq!(ok.recover(|_| "unused".to_string()).wait()?, "fine");
        Ok(())
    }

    #[test]
    fn test_every_observer_sees_same_outcome() -> anyhow::Result<()> {
        let task = Task::pending();
        let first = task.map(|n: i32| n + 1);
        let second = task.map(|n: i32| n + 2);

        task.complete(10);
        assert_eq!(first.wait()?, 11);
        assert_eq!(second.wait()?, 12);
        assert_eq!(task.wait()?, 10);
        Ok(())
    }

    #[test]
    fn test_continuation_runs_on_settling_thread() -> anyhow::Result<()> {
        let task = Task::pending();
        let observed = task.map(|_: ()| thread::current().name().map(str::to_string));

        let writer = task.clone();
        thread::Builder::new()
            .name("settler".to_string())
            .spawn(move || {
                writer.complete(());
            })?
            .join()
            .unwrap();

        assert_eq!(observed.wait()?, Some("settler".to_string()));
        Ok(())
    }

    #[test]
    fn test_long_map_chain_settles() -> anyhow::Result<()> {
        let head = Task::pending();
        let mut tail = head.map(|n: u64| n + 1);
        for _ in 1..100_000 {
            tail = tail.map(|n| n + 1);
        }

        head.complete(0);
        assert_eq!(tail.wait()?, 100_000);
        Ok(())
    }

    #[test]
    fn test_long_mixed_chain_settles() -> anyhow::Result<()> {
        let head: Task<u64> = Task::pending();
        let mut tail = head.clone();
        for step in 0..100_000u64 {
            tail = match step % 3 {
                0 => tail.map(|n| n + 1),
                1 => tail.flat_map(|n| Task::completed(n + 1)),
                _ => tail.handle(|outcome| outcome.map_or(0, |n| n + 1)),
            };
        }

        head.complete(0);
        assert_eq!(tail.wait()?, 100_000);
        Ok(())
    }

    #[test]
    fn test_long_failed_chain_keeps_root_cause() {
        let head: Task<u64> = Task::pending();
        let mut tail = head.clone();
        for _ in 0..100_000 {
            tail = tail.map(|n| n + 1);
        }

        head.fail(illegal("deep"));
        assert_eq!(tail.wait().unwrap_err().root_cause().to_string(), "deep");
    }

    #[test]
    fn test_handle_panic_fails_task() {
        let task = Task::<String>::failed(illegal("X"))
            .handle(|_| -> String { panic!("cannot recover") });

        let err = task.wait().unwrap_err();
        assert_eq!(err.cause().kind(), FailureKind::Panicked);
        assert_eq!(err.root_cause().to_string(), "task panicked: cannot recover");
    }
}
