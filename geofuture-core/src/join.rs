//! Join barriers: operations that wait on more than one task.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{CompletionError, Failure};
use crate::task::{guarded, Task};

/// Bookkeeping shared by the per-task callbacks of [`Task::all_of`]
struct Barrier {
    remaining: usize,
    first_failure: Option<(usize, Failure)>,
}

impl Barrier {
    /// Record one settled input; returns the final verdict once all are in
    fn arrive(&mut self, index: usize, failure: Option<Failure>) -> Option<Result<(), Failure>> {
        if let Some(failure) = failure {
            let earlier = self
                .first_failure
                .as_ref()
                .map_or(false, |(seen, _)| *seen < index);
            if !earlier {
                self.first_failure = Some((index, failure));
            }
        }

        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        Some(match self.first_failure.take() {
            Some((_, failure)) => Err(failure),
            None => Ok(()),
        })
    }
}

impl<T> Task<T>
where
    T: Clone + Send + 'static,
{
    /// Wait for both tasks and merge their values with `f`.
    ///
    /// Fails if either side fails. When both fail, the failure of `self`
    /// is the one reported.
    pub fn combine<B, C, F>(&self, other: &Task<B>, f: F) -> Task<C>
    where
        B: Clone + Send + 'static,
        C: Clone + Send + 'static,
        F: FnOnce(T, B) -> C + Send + 'static,
    {
        let next = Task::pending();
        let sink = next.clone();
        let other = other.clone();
        self.on_settled(move |left| {
            other.on_settled(move |right| {
                let combined = match (left, right) {
                    (Ok(a), Ok(b)) => guarded(move || f(a, b)),
                    (Err(failure), _) | (Ok(_), Err(failure)) => Err(failure),
                };
                sink.settle(combined);
            });
        });
        next
    }

    /// A task that completes once every input has settled.
    ///
    /// If any input failed, the barrier fails with the failure of the
    /// lowest-index failed input. An empty input completes immediately.
    pub fn all_of<'a, I>(tasks: I) -> Task<()>
    where
        I: IntoIterator<Item = &'a Task<T>>,
    {
        let tasks: Vec<Task<T>> = tasks.into_iter().cloned().collect();
        let all = Task::pending();
        if tasks.is_empty() {
            all.complete(());
            return all;
        }

        let barrier = Arc::new(Mutex::new(Barrier {
            remaining: tasks.len(),
            first_failure: None,
        }));

        for (index, task) in tasks.iter().enumerate() {
            let barrier = Arc::clone(&barrier);
            let sink = all.clone();
            task.on_settled(move |outcome| {
                let verdict = barrier
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .arrive(index, outcome.err());
                if let Some(verdict) = verdict {
                    sink.settle(verdict);
                }
            });
        }
        all
    }

    /// Block on each task in order and collect the values.
    ///
    /// Stops at the first failure met in iteration order, even if a later
    /// task failed sooner.
    pub fn join_all<'a, I>(tasks: I) -> Result<Vec<T>, CompletionError>
    where
        I: IntoIterator<Item = &'a Task<T>>,
    {
        tasks.into_iter().map(Task::wait).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, IllegalArgument};
    use crate::task::TaskState;
    use std::thread;
    use std::time::Duration;

    fn illegal(message: &str) -> IllegalArgument {
        IllegalArgument(message.to_string())
    }

    #[test]
    fn test_combine_merges_values() -> anyhow::Result<()> {
        let city = Task::completed("Dubai".to_string());
        let country = Task::completed("AE".to_string());

        let residence = city.combine(&country, |city, country| {
            format!("You live in {}, {}", city, country)
        });
        assert_eq!(residence.wait()?, "You live in Dubai, AE");
        Ok(())
    }

    #[test]
    fn test_combine_fails_with_either_side() {
        let ok = Task::completed(1);
        let bad: Task<i32> = Task::failed(illegal("right"));
        let err = ok.combine(&bad, |a, b| a + b).wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "right");

        let bad: Task<i32> = Task::failed(illegal("left"));
        let err = bad.combine(&ok, |a, b| a + b).wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "left");
    }

    #[test]
    fn test_combine_reports_left_failure_when_both_fail() {
        let left: Task<i32> = Task::failed(illegal("left"));
        let right: Task<i32> = Task::failed(illegal("right"));
        let err = left.combine(&right, |a, b| a + b).wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "left");
    }

    #[test]
    fn test_combine_waits_for_both_sides() -> anyhow::Result<()> {
        let left = Task::pending();
        let right = Task::pending();
        let sum = left.combine(&right, |a: i32, b: i32| a + b);

        left.complete(1);
        assert_eq!(sum.state(), TaskState::Pending);
        right.complete(2);
        assert_eq!(sum.wait()?, 3);
        Ok(())
    }

    #[test]
    fn test_all_of_completes_after_every_member() -> anyhow::Result<()> {
        let tasks: Vec<Task<u64>> = (0..4).map(|_| Task::pending()).collect();
        let all = Task::all_of(&tasks);

        let writers = tasks.clone();
        let producer = thread::spawn(move || {
            for (delay, task) in writers.iter().enumerate().rev() {
                thread::sleep(Duration::from_millis(5));
                task.complete(delay as u64);
            }
        });

        all.wait()?;
        assert!(tasks.iter().all(Task::is_done));
        producer.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_all_of_fails_if_any_member_fails() {
        let tasks = vec![
            Task::completed(1),
            Task::failed(illegal("second")),
            Task::completed(3),
        ];
        let err = Task::all_of(&tasks).wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "second");
        assert_eq!(err.cause().kind(), FailureKind::Semantic);
    }

    #[test]
    fn test_all_of_reports_lowest_index_failure() {
        let first = Task::pending();
        let second: Task<i32> = Task::pending();
        let all = Task::all_of([&first, &second]);

        // settle in reverse order; the lower index still wins
        second.fail(illegal("second"));
        first.fail(illegal("first"));

        let err = all.wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "first");
    }

    #[test]
    fn test_all_of_empty_completes_immediately() {
        let all = Task::<i32>::all_of(&[]);
        assert_eq!(all.state(), TaskState::Completed);
    }

    #[test]
    fn test_join_all_collects_in_order() -> anyhow::Result<()> {
        let tasks = vec![
            Task::completed("Dubai".to_string()),
            Task::completed("AE".to_string()),
        ];
        assert_eq!(Task::join_all(&tasks)?, vec!["Dubai", "AE"]);
        Ok(())
    }

    #[test]
    fn test_join_all_raises_on_failure() {
        let tasks = vec![
            Task::completed("Dubai".to_string()),
            Task::completed("AE".to_string()),
            Task::failed(illegal("X")),
        ];
        let err = Task::join_all(&tasks).unwrap_err();
        assert_eq!(err.root_cause().to_string(), "X");
        assert!(err.cause().find::<IllegalArgument>().is_some());
    }
}
