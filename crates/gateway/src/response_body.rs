//! A `http_body::Body` that streams data chunks from the Pipeline Engine
//! and, once they're exhausted, emits one trailer frame built by the
//! Trailer Writer. This is the concrete wiring between
//! `gateway_pipeline::ResponseSink`/`TrailerState` and axum's response
//! type — axum itself has no opinion on trailers beyond what
//! `http_body::Body::poll_frame` reports.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame};
use tokio::sync::{mpsc, oneshot};

pub struct TrailerBody {
    data_rx: mpsc::Receiver<Result<Bytes, std::io::Error>>,
    trailers_rx: Option<oneshot::Receiver<HeaderMap>>,
}

impl TrailerBody {
    pub fn new(
        data_rx: mpsc::Receiver<Result<Bytes, std::io::Error>>,
        trailers_rx: oneshot::Receiver<HeaderMap>,
    ) -> Self {
        Self {
            data_rx,
            trailers_rx: Some(trailers_rx),
        }
    }
}

impl Body for TrailerBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.data_rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {}
            Poll::Pending => return Poll::Pending,
        }

        // Data channel drained; the trailer is produced once the Pipeline
        // Engine has settled, strictly after every stage has reached a
        // terminal state.
        if let Some(rx) = self.trailers_rx.as_mut() {
            match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(headers)) => {
                    self.trailers_rx = None;
                    return Poll::Ready(Some(Ok(Frame::trailers(headers))));
                }
                Poll::Ready(Err(_)) => {
                    self.trailers_rx = None;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(None)
    }
}
