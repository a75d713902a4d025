use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};

use super::sse::keep_alive_frame;

pin_project! {
    /// Interleaves `:keep-alive` comments into an SSE byte stream whenever no
    /// frame was produced for `interval`.
    ///
    /// The timer lives inside the stream, so it stops when the inner stream
    /// ends and is dropped together with the response body.
    pub struct KeepAlive<S> {
        #[pin]
        inner: S,
        #[pin]
        sleep: Sleep,
        interval: Duration,
        done: bool,
    }
}

impl<S> KeepAlive<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            sleep: tokio::time::sleep(interval),
            interval,
            done: false,
        }
    }
}

impl<S> Stream for KeepAlive<S>
where
    S: Stream<Item = Bytes>,
{
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                this.sleep.as_mut().reset(Instant::now() + *this.interval);
                return Poll::Ready(Some(frame));
            }
            Poll::Ready(None) => {
                *this.done = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if this.sleep.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }
        this.sleep.as_mut().reset(Instant::now() + *this.interval);
        tracing::trace!("sending keep-alive");
        Poll::Ready(Some(keep_alive_frame()))
    }
}
