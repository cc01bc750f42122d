//! HTTP body types for control-plane requests.
//!
//! `Body::channel` backs streamed invocation responses: the sender half hands
//! chunks to the connection as the user writes them and can terminate the
//! stream with HTTP trailers to report a mid-stream error.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_channel::{mpsc, oneshot};
use futures_util::{SinkExt, Stream};
use http::HeaderMap;
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;

use crate::error::BoxError;

type BoxedBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

/// The body type attached to every control-plane request.
pub struct Body(BoxedBody);

impl Body {
    /// Wrap another [`http_body::Body`].
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Body(body.map_err(Into::into).boxed_unsync())
    }

    /// An empty body.
    pub fn empty() -> Self {
        Body::new(http_body_util::Empty::new())
    }

    /// Create a streamed body along with its sender half.
    pub fn channel() -> (Sender, Body) {
        let (data_tx, data_rx) = mpsc::channel(0);
        let (trailers_tx, trailers_rx) = oneshot::channel();
        let sender = Sender {
            data_tx,
            trailers_tx: Some(trailers_tx),
        };
        let body = Body::new(ChannelBody {
            data_rx,
            data_done: false,
            trailers_rx,
            trailers_done: false,
        });
        (sender, body)
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for Body {
            fn from(buf: $ty) -> Self {
                Self::new(http_body_util::Full::from(buf))
            }
        }
    };
}

body_from_impl!(&'static [u8]);
body_from_impl!(Vec<u8>);
body_from_impl!(&'static str);
body_from_impl!(String);
body_from_impl!(Bytes);

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}

/// Sender half of [`Body::channel`].
///
/// Dropping the sender closes the body normally; the connection writes the
/// empty terminating chunk.
#[must_use = "Sender does nothing unless sent on"]
pub struct Sender {
    data_tx: mpsc::Sender<Result<Bytes, BoxError>>,
    trailers_tx: Option<oneshot::Sender<HeaderMap>>,
}

impl Sender {
    /// Send one chunk of body data.
    pub async fn send_data(&mut self, chunk: Bytes) -> Result<(), SenderError> {
        self.data_tx
            .send(Ok(chunk))
            .await
            .map_err(|_| SenderError::ChannelClosed)
    }

    /// Send the terminating trailers. May be called at most once.
    pub fn send_trailers(&mut self, trailers: HeaderMap) -> Result<(), SenderError> {
        let tx = self.trailers_tx.take().ok_or(SenderError::ChannelClosed)?;
        tx.send(trailers).map_err(|_| SenderError::ChannelClosed)
    }
}

/// Failure to hand data to a channel body.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    /// The receiving body was dropped, usually with its connection.
    #[error("channel closed")]
    ChannelClosed,
}

struct ChannelBody {
    data_rx: mpsc::Receiver<Result<Bytes, BoxError>>,
    data_done: bool,
    trailers_rx: oneshot::Receiver<HeaderMap>,
    trailers_done: bool,
}

impl http_body::Body for ChannelBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if !this.data_done {
            match Pin::new(&mut this.data_rx).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.data_done = true,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.trailers_done {
            return Poll::Ready(None);
        }

        // Trailers come after the data stream has terminated.
        match Pin::new(&mut this.trailers_rx).poll(cx) {
            Poll::Ready(Ok(trailers)) => {
                this.trailers_done = true;
                Poll::Ready(Some(Ok(Frame::trailers(trailers))))
            }
            Poll::Ready(Err(_)) => {
                this.trailers_done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.data_done && self.trailers_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[tokio::test]
    async fn channel_streams_data_then_trailers() {
        let (mut tx, body) = Body::channel();

        let writer = tokio::spawn(async move {
            tx.send_data(Bytes::from_static(b"hel")).await.unwrap();
            tx.send_data(Bytes::from_static(b"lo")).await.unwrap();
            let mut trailers = HeaderMap::new();
            trailers.insert("x-test", HeaderValue::from_static("1"));
            tx.send_trailers(trailers).unwrap();
        });

        let collected = body.collect().await.unwrap();
        let trailers = collected.trailers().cloned();
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"hello"));
        assert_eq!(
            trailers.unwrap().get("x-test"),
            Some(&HeaderValue::from_static("1"))
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_sender_ends_the_body() {
        let (mut tx, body) = Body::channel();
        let writer = tokio::spawn(async move {
            tx.send_data(Bytes::from_static(b"bye")).await.unwrap();
        });

        let collected = body.collect().await.unwrap();
        assert!(collected.trailers().is_none());
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"bye"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn send_on_dropped_body_fails() {
        let (mut tx, body) = Body::channel();
        drop(body);
        let err = tx.send_data(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, SenderError::ChannelClosed));
    }
}
