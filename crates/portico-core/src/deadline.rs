// crates/portico-core/src/deadline.rs
//
// Deadline and cancellation enforcement for in-flight calls.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::time::{Instant, Sleep};
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};

use crate::call::MessageStream;
use crate::error::RpcError;

/// Resolve when `deadline` passes; never resolves when there is none.
pub async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Race `fut` against the deadline and the cancellation token.
///
/// Cancellation wins over expiry when both are ready.
pub async fn guarded<F, T>(
    fut: F,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RpcError::Cancelled),
        _ = expire(deadline) => Err(RpcError::DeadlineExceeded),
        result = fut => result,
    }
}

/// A message stream bounded by a deadline and a cancellation token.
///
/// Yields `DeadlineExceeded` or `Cancelled` once and then ends. Dropping the
/// stream cancels the token, which stops any producer task watching it.
pub struct GuardedStream {
    inner: MessageStream,
    sleep: Option<Pin<Box<Sleep>>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    _guard: DropGuard,
    done: bool,
}

impl GuardedStream {
    pub fn new(inner: MessageStream, deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            sleep: deadline.map(|deadline| Box::pin(tokio::time::sleep_until(deadline))),
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            _guard: cancel.drop_guard(),
            done: false,
        }
    }

    /// Box the guarded stream back into a [`MessageStream`].
    pub fn boxed(self) -> MessageStream {
        Box::pin(self)
    }
}

impl Stream for GuardedStream {
    type Item = Result<Value, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(RpcError::Cancelled)));
        }

        if let Some(sleep) = this.sleep.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                this.done = true;
                return Poll::Ready(Some(Err(RpcError::DeadlineExceeded)));
            }
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{collect_stream, stream_from_iter};
    use serde_json::json;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn guarded_returns_result_before_deadline() {
        let cancel = CancellationToken::new();
        let deadline = Some(Instant::now() + Duration::from_secs(5));
        let result = guarded(async { Ok::<_, RpcError>(7) }, deadline, &cancel).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_expires_slow_future() {
        let cancel = CancellationToken::new();
        let deadline = Some(Instant::now() + Duration::from_secs(1));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok::<_, RpcError>(())
        };
        assert_eq!(
            guarded(slow, deadline, &cancel).await,
            Err(RpcError::DeadlineExceeded)
        );
    }

    #[tokio::test]
    async fn guarded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = guarded(std::future::pending::<Result<(), RpcError>>(), None, &cancel).await;
        assert_eq!(result, Err(RpcError::Cancelled));
    }

    #[tokio::test]
    async fn guarded_stream_passes_through_items() {
        let stream = GuardedStream::new(
            stream_from_iter(vec![json!(1), json!(2)]),
            None,
            CancellationToken::new(),
        );
        let values = collect_stream(stream.boxed(), None).await.expect("ok");
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_stream_ends_with_deadline_error() {
        let pending: MessageStream = Box::pin(tokio_stream::pending());
        let deadline = Some(Instant::now() + Duration::from_millis(100));
        let mut stream = GuardedStream::new(pending, deadline, CancellationToken::new());

        assert_eq!(stream.next().await, Some(Err(RpcError::DeadlineExceeded)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn dropping_guarded_stream_cancels_token() {
        let cancel = CancellationToken::new();
        let stream = GuardedStream::new(stream_from_iter(vec![]), None, cancel.clone());
        assert!(!cancel.is_cancelled());
        drop(stream);
        assert!(cancel.is_cancelled());
    }
}
