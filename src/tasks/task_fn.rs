//! # Function-backed task (`TaskFn`)
//!
//! [`TaskFn`] wraps a closure `F: Fn(CancellationToken, I) -> Fut`, producing a fresh
//! future per call. No state is shared between calls; if a task needs shared state,
//! capture an `Arc<...>` explicitly inside the closure.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use stagevisor::{TaskFn, TaskRef, TaskError};
//!
//! let t: TaskRef<i64, i64> = TaskFn::arc("x10", |_ctx: CancellationToken, n: i64| async move {
//!     Ok::<_, TaskError>(n * 10)
//! });
//!
//! assert_eq!(t.name(), "x10");
//! ```

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::tasks::task::{Task, TaskRef};

type CancelHook<I> = Box<dyn Fn(&I, &TaskError) + Send + Sync>;

/// Function-backed task implementation.
///
/// Wraps a closure that *creates* a new future per call, plus an optional cancel hook.
pub struct TaskFn<F, I> {
    name: Cow<'static, str>,
    f: F,
    on_cancel: Option<CancelHook<I>>,
}

impl<F, I> TaskFn<F, I> {
    /// Creates a new function-backed task.
    ///
    /// Prefer [`TaskFn::arc`] when you immediately need a [`TaskRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            on_cancel: None,
        }
    }

    /// Attaches a hook invoked with the input and error whenever the task fails.
    pub fn with_cancel(mut self, hook: impl Fn(&I, &TaskError) + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Creates the task and returns it as a shared handle (`Arc<dyn Task<I, O>>`).
    pub fn arc<O, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> TaskRef<I, O>
    where
        F: Fn(CancellationToken, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
    {
        Self::new(name, f).into_ref()
    }

    /// Converts an assembled task into a shared handle.
    pub fn into_ref<O, Fut>(self) -> TaskRef<I, O>
    where
        F: Fn(CancellationToken, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
    {
        Arc::new(self)
    }
}

impl<F, I> fmt::Debug for TaskFn<F, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFn")
            .field("name", &self.name)
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

#[async_trait]
impl<I, O, F, Fut> Task<I, O> for TaskFn<F, I>
where
    F: Fn(CancellationToken, I) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: CancellationToken, input: I) -> Result<O, TaskError> {
        (self.f)(ctx, input).await
    }

    fn cancel(&self, input: &I, err: &TaskError) {
        if let Some(hook) = &self.on_cancel {
            hook(input, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_task_fn_processes_input() {
        let t: TaskRef<i64, i64> = TaskFn::arc("x3", |_ctx: CancellationToken, n: i64| async move {
            Ok::<_, TaskError>(n * 3)
        });
        assert_eq!(t.name(), "x3");
        assert_eq!(t.process(CancellationToken::new(), 7).await, Ok(21));
    }

    #[test]
    fn test_cancel_hook_receives_input_and_error() {
        let seen: Arc<Mutex<Vec<(i64, String)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let t: TaskRef<i64, i64> = TaskFn::new("x3", |_ctx: CancellationToken, n: i64| async move {
            Ok::<_, TaskError>(n)
        })
        .with_cancel(move |n: &i64, e: &TaskError| {
            sink.lock().unwrap().push((*n, e.as_label().to_string()));
        })
        .into_ref();

        t.cancel(&5, &TaskError::fail("boom"));
        assert_eq!(*seen.lock().unwrap(), vec![(5, "task_failed".to_string())]);
    }
}
