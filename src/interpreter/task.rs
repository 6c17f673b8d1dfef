//! Cooperative, single-threaded resumable computations.
//!
//! A [`Resumable`] body is an explicit state machine: every call to
//! [`Resumable::step`] either finishes with an output or reports that it is
//! suspended. [`Task`] wraps a body and is consumed by [`Task::resume`], which
//! hands back either the finished output or the still-suspended task, so a
//! finished task can never be resumed again.

use std::cell::Cell;
use std::rc::Rc;

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// The computation finished with a value.
    Done(T),
    /// The computation reached a suspend point.
    Suspended,
}

impl<T> Step<T> {
    /// Whether the computation finished.
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done(_))
    }

    /// Transform the finished value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Done(value) => Step::Done(f(value)),
            Step::Suspended => Step::Suspended,
        }
    }
}

/// Marker error raised when a task observes its cancellation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Shared cancellation flag checked at every suspend point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    /// Create an un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every task sharing this token.
    pub fn cancel(&self) {
        self.0.set(true);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// A resumable body driven by [`Task`].
pub trait Resumable<Cx: ?Sized> {
    /// Value produced on completion.
    type Output;
    /// Error that aborts the computation.
    type Error: From<Cancelled>;

    /// Advance to the next suspend point or to completion.
    fn step(&mut self, cx: &mut Cx) -> Result<Step<Self::Output>, Self::Error>;

    /// Release anything the body holds after it is abandoned mid-flight.
    fn unwind(self, _cx: &mut Cx)
    where
        Self: Sized,
    {
    }
}

/// Result of resuming a [`Task`].
#[derive(Debug)]
pub enum Resumed<R, T> {
    /// The task hit a suspend point and must be resumed again later.
    Suspended(Task<R>),
    /// The task finished.
    Done(T),
}

/// A resumable unit of computation.
#[derive(Debug)]
pub struct Task<R> {
    body: R,
    resumes: u64,
    cancel: CancelToken,
}

impl<R> Task<R> {
    /// Wrap `body`, observing `cancel` at every resume.
    pub fn new(body: R, cancel: CancelToken) -> Self {
        Self {
            body,
            resumes: 0,
            cancel,
        }
    }

    /// Number of times this task has been resumed.
    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    /// Borrow the body.
    pub fn body(&self) -> &R {
        &self.body
    }

    /// Run until the next suspend point or completion.
    ///
    /// On error or cancellation the body is unwound before the error is
    /// returned.
    pub fn resume<Cx: ?Sized>(
        mut self,
        cx: &mut Cx,
    ) -> Result<Resumed<R, R::Output>, R::Error>
    where
        R: Resumable<Cx>,
    {
        if self.cancel.is_cancelled() {
            self.body.unwind(cx);
            return Err(Cancelled.into());
        }
        self.resumes += 1;
        match self.body.step(cx) {
            Ok(Step::Done(output)) => Ok(Resumed::Done(output)),
            Ok(Step::Suspended) => {
                if self.cancel.is_cancelled() {
                    self.body.unwind(cx);
                    return Err(Cancelled.into());
                }
                Ok(Resumed::Suspended(self))
            }
            Err(err) => {
                self.body.unwind(cx);
                Err(err)
            }
        }
    }

    /// Abandon the task, unwinding its body.
    pub fn abort<Cx: ?Sized>(self, cx: &mut Cx)
    where
        R: Resumable<Cx>,
    {
        self.body.unwind(cx);
    }
}

/// Resume an optional child task stored in `$slot`.
///
/// Evaluates to the child's output once it finishes; while the child is
/// suspended the enclosing step function returns `Ok(Step::Suspended)`.
macro_rules! await_child {
    ($slot:expr, $cx:expr) => {
        match $slot.take() {
            Some(task) => match task.resume($cx)? {
                $crate::interpreter::task::Resumed::Suspended(task) => {
                    $slot = Some(task);
                    return Ok($crate::interpreter::task::Step::Suspended);
                }
                $crate::interpreter::task::Resumed::Done(output) => Some(output),
            },
            None => None,
        }
    };
}

pub(crate) use await_child;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum CountError {
        Cancelled,
        Boom,
    }

    impl From<Cancelled> for CountError {
        fn from(_: Cancelled) -> Self {
            CountError::Cancelled
        }
    }

    struct Countdown {
        remaining: u32,
        unwound: Rc<Cell<bool>>,
    }

    impl Resumable<Vec<u32>> for Countdown {
        type Output = &'static str;
        type Error = CountError;

        fn step(&mut self, log: &mut Vec<u32>) -> Result<Step<Self::Output>, Self::Error> {
            log.push(self.remaining);
            if self.remaining == 99 {
                return Err(CountError::Boom);
            }
            if self.remaining == 0 {
                return Ok(Step::Done("liftoff"));
            }
            self.remaining -= 1;
            Ok(Step::Suspended)
        }

        fn unwind(self, _log: &mut Vec<u32>) {
            self.unwound.set(true);
        }
    }

    struct Parent {
        child: Option<Task<Countdown>>,
        observed: Option<&'static str>,
    }

    impl Resumable<Vec<u32>> for Parent {
        type Output = &'static str;
        type Error = CountError;

        fn step(&mut self, log: &mut Vec<u32>) -> Result<Step<Self::Output>, Self::Error> {
            if let Some(output) = await_child!(self.child, log) {
                self.observed = Some(output);
            }
            Ok(Step::Done(self.observed.unwrap_or("nothing")))
        }
    }

    fn countdown(remaining: u32) -> (Countdown, Rc<Cell<bool>>) {
        let unwound = Rc::new(Cell::new(false));
        (
            Countdown {
                remaining,
                unwound: unwound.clone(),
            },
            unwound,
        )
    }

    #[test]
    fn resume_suspends_until_done() {
        let (body, _) = countdown(2);
        let mut task = Task::new(body, CancelToken::new());
        let mut log = Vec::new();
        let output = loop {
            match task.resume(&mut log).expect("resume") {
                Resumed::Suspended(next) => task = next,
                Resumed::Done(output) => break output,
            }
        };
        assert_eq!(output, "liftoff");
        assert_eq!(log, vec![2, 1, 0]);
    }

    #[test]
    fn suspension_propagates_through_parents() {
        let (body, _) = countdown(1);
        let parent = Parent {
            child: Some(Task::new(body, CancelToken::new())),
            observed: None,
        };
        let task = Task::new(parent, CancelToken::new());
        let mut log = Vec::new();

        let task = match task.resume(&mut log).expect("first resume") {
            Resumed::Suspended(task) => task,
            Resumed::Done(_) => panic!("parent finished before child"),
        };
        assert_eq!(task.resumes(), 1);
        match task.resume(&mut log).expect("second resume") {
            Resumed::Done(output) => assert_eq!(output, "liftoff"),
            Resumed::Suspended(_) => panic!("expected completion"),
        }
    }

    #[test]
    fn cancellation_is_observed_and_unwinds() {
        let token = CancelToken::new();
        let (body, unwound) = countdown(5);
        let task = Task::new(body, token.clone());
        let mut log = Vec::new();
        let task = match task.resume(&mut log).expect("resume") {
            Resumed::Suspended(task) => task,
            Resumed::Done(_) => panic!("finished early"),
        };
        token.cancel();
        assert_eq!(task.resume(&mut log).err(), Some(CountError::Cancelled));
        assert!(unwound.get());
    }

    #[test]
    fn errors_unwind_the_body() {
        let (body, unwound) = countdown(99);
        let task = Task::new(body, CancelToken::new());
        assert_eq!(task.resume(&mut Vec::new()).err(), Some(CountError::Boom));
        assert!(unwound.get());
    }
}
