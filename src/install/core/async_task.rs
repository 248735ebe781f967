//! Boxed future wrapper used at trait seams that must stay object safe

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Owned, sendable future returned by [`crate::install::privilege::PrivilegedShell`]
/// and [`crate::install::download::ReleaseFeed`] implementations.
pub struct AsyncTask<T> {
    inner: Pin<Box<dyn Future<Output = T> + Send + 'static>>,
}

impl<T> AsyncTask<T> {
    /// Box a future
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            inner: Box::pin(fut),
        }
    }

    /// Task that resolves immediately
    pub fn ready(value: T) -> Self
    where
        T: Send + 'static,
    {
        Self::from_future(std::future::ready(value))
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_task_resolves_to_value() {
        assert_eq!(AsyncTask::ready(7).await, 7);
    }
}
