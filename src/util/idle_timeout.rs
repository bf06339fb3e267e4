use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::{ready, Stream};
use pin_project_lite::pin_project;
use tokio::time::{sleep, Instant, Sleep};

/// Reported from inside an [IdleTimeout] stream; callers can downcast to it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no data received for {0:?}")]
pub struct BodyStalled(pub Duration);

pin_project! {
    /// Fails a body stream if the wrapped stream produces nothing for `timeout`. The deadline is
    ///  reset with every chunk, so large but steadily progressing downloads are not affected.
    pub struct IdleTimeout<S> {
        #[pin]
        body: S,
        #[pin]
        deadline: Sleep,
        timeout: Duration,
    }
}

impl <S> IdleTimeout<S> {
    pub fn new(body: S, timeout: Duration) -> IdleTimeout<S> {
        IdleTimeout {
            body,
            deadline: sleep(timeout),
            timeout,
        }
    }
}

impl <S, E> Stream for IdleTimeout<S>
where S: Stream<Item = Result<Bytes, E>>,
      E: Into<anyhow::Error>,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        match this.body.poll_next(cx) {
            Poll::Ready(item) => {
                let timeout = *this.timeout;
                this.deadline.as_mut().reset(Instant::now() + timeout);
                Poll::Ready(item.map(|chunk| chunk.map_err(Into::into)))
            }
            Poll::Pending => {
                ready!(this.deadline.poll(cx));
                Poll::Ready(Some(Err(BodyStalled(*this.timeout).into())))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.body.size_hint()
    }
}

#[cfg(test)]
mod test {
    use futures::StreamExt;
    use super::*;

    fn chunks(data: &[&'static str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(data.iter().map(|s| Ok(Bytes::from_static(s.as_bytes()))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_progressing_body_passes() {
        let body = IdleTimeout::new(chunks(&["a", "b", "c"]), Duration::from_millis(50));
        let collected: Vec<anyhow::Result<Bytes>> = body.collect().await;
        assert_eq!(collected.len(), 3);
        assert!(collected.iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_stalled_body_fails() {
        let stalled = chunks(&["abc"]).chain(futures::stream::pending());
        let mut body = Box::pin(IdleTimeout::new(stalled, Duration::from_millis(50)));

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        let next = tokio::time::timeout(Duration::from_secs(5), body.next()).await
            .expect("the idle timeout should fire first");
        let err = next.unwrap().unwrap_err();
        assert_eq!(err.downcast_ref::<BodyStalled>(), Some(&BodyStalled(Duration::from_millis(50))));
    }
}
