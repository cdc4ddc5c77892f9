/* src/server/adapter/axum/src/transport.rs */

// Axum-side transport: an inbound body source and a channel-backed sink whose
// receiving half becomes the axum response.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream, Bytes};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

use crate::error::AdapterError;
use crate::request::{TransportRequest, TransportSource};
use crate::response::{HeaderList, ResponseSink, SinkSignal};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Chunk = io::Result<Bytes>;

/// Inbound axum body. Hyper only reads from the socket when polled, so pausing
/// is just not polling.
pub struct AxumSource {
  stream: Option<Pin<Box<BodyDataStream>>>,
}

impl AxumSource {
  pub fn new(body: Body) -> Self {
    Self { stream: Some(Box::pin(body.into_data_stream())) }
  }
}

impl TransportSource for AxumSource {
  fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
    let Some(stream) = self.stream.as_mut() else {
      return Poll::Ready(None);
    };
    stream.poll_next_unpin(cx).map(|item| item.map(|chunk| chunk.map_err(io::Error::other)))
  }

  fn pause(&mut self) {
    trace!("request body paused");
  }

  fn resume(&mut self) {
    trace!("request body resumed");
  }

  fn destroy(&mut self) {
    self.stream = None;
  }

  fn is_destroyed(&self) -> bool {
    self.stream.is_none()
  }
}

impl From<Request> for TransportRequest<AxumSource> {
  fn from(req: Request) -> Self {
    let (parts, body) = req.into_parts();
    let url = parts.uri.path_and_query().map_or("/", |pq| pq.as_str()).to_string();
    Self {
      method: parts.method,
      url,
      headers: parts.headers,
      version: parts.version,
      source: AxumSource::new(body),
    }
  }
}

struct ResponseHead {
  status: StatusCode,
  headers: HeaderList,
}

/// Sink writing into a bounded channel of `high_water_mark` chunks.
pub struct ChannelSink {
  head: Option<oneshot::Sender<ResponseHead>>,
  tx: Option<mpsc::Sender<Chunk>>,
  /// Chunk accepted while the channel was full; sent once a slot frees up.
  backlog: Option<Bytes>,
  drain: Option<BoxFuture<Result<mpsc::OwnedPermit<Chunk>, mpsc::error::SendError<()>>>>,
  closed: Option<BoxFuture<()>>,
  destroyed: bool,
}

/// Receiving half of a [`ChannelSink`].
pub struct ChannelResponse {
  head: oneshot::Receiver<ResponseHead>,
  body: mpsc::Receiver<Chunk>,
}

impl ChannelSink {
  pub fn new(high_water_mark: usize) -> (Self, ChannelResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (tx, rx) = mpsc::channel(high_water_mark.max(1));
    let sink = Self {
      head: Some(head_tx),
      tx: Some(tx),
      backlog: None,
      drain: None,
      closed: None,
      destroyed: false,
    };
    (sink, ChannelResponse { head: head_rx, body: rx })
  }

  fn arm_drain(&mut self, tx: mpsc::Sender<Chunk>) {
    self.drain = Some(Box::pin(tx.reserve_owned()));
  }

  // The futures below hold sender clones; the body only ends once they go.
  fn release(&mut self) {
    self.tx = None;
    self.drain = None;
    self.closed = None;
  }
}

impl ResponseSink for ChannelSink {
  fn write_head(&mut self, status: StatusCode, headers: HeaderList) {
    if let Some(head) = self.head.take() {
      let _ = head.send(ResponseHead { status, headers });
    }
  }

  fn write(&mut self, chunk: Bytes) -> bool {
    let Some(tx) = self.tx.clone() else {
      return false;
    };
    match tx.try_send(Ok(chunk)) {
      Ok(()) if tx.capacity() > 0 => true,
      Ok(()) => {
        self.arm_drain(tx);
        false
      }
      Err(mpsc::error::TrySendError::Full(chunk)) => {
        self.backlog = chunk.ok();
        self.arm_drain(tx);
        false
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        self.release();
        false
      }
    }
  }

  fn end(&mut self) {
    if let (Some(tx), Some(chunk)) = (&self.tx, self.backlog.take()) {
      let _ = tx.try_send(Ok(chunk));
    }
    self.head = None;
    self.release();
  }

  fn destroy(&mut self, error: Option<&AdapterError>) {
    if let (Some(tx), Some(err)) = (&self.tx, error) {
      let _ = tx.try_send(Err(io::Error::other(err.to_string())));
    }
    self.head = None;
    self.backlog = None;
    self.destroyed = true;
    self.release();
  }

  fn is_destroyed(&self) -> bool {
    self.destroyed
  }

  fn poll_signal(&mut self, cx: &mut Context<'_>) -> Poll<SinkSignal> {
    if let Some(drain) = self.drain.as_mut() {
      let ready = match drain.as_mut().poll(cx) {
        Poll::Pending => return Poll::Pending,
        Poll::Ready(ready) => ready,
      };
      self.drain = None;
      return match ready {
        Ok(permit) => {
          if let Some(chunk) = self.backlog.take() {
            permit.send(Ok(chunk));
          }
          Poll::Ready(SinkSignal::Drain)
        }
        Err(_) => Poll::Ready(SinkSignal::Close),
      };
    }

    let Some(tx) = self.tx.as_ref() else {
      return Poll::Ready(SinkSignal::Close);
    };
    let closed = self.closed.get_or_insert_with(|| {
      let tx = tx.clone();
      Box::pin(async move { tx.closed().await })
    });
    closed.as_mut().poll(cx).map(|()| SinkSignal::Close)
  }
}

impl ChannelResponse {
  /// Wait for the head, then stream the body as it is written.
  pub async fn into_response(self) -> Response {
    let Ok(head) = self.head.await else {
      return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut response = Response::new(Body::from_stream(ReceiverStream::new(self.body)));
    *response.status_mut() = head.status;
    let headers = response.headers_mut();
    for (name, value) in head.headers {
      headers.append(name, value);
    }
    response
  }
}

#[cfg(test)]
mod tests {
  use axum::http::header::SET_COOKIE;
  use axum::http::{HeaderValue, Method};
  use http_body_util::BodyExt;

  use super::*;
  use crate::response::{ResponseBody, StandardResponse, from_standard_response};

  #[tokio::test]
  async fn axum_request_keeps_path_and_query() {
    let req = Request::builder()
      .method(Method::POST)
      .uri("http://localhost/search?q=1")
      .body(Body::from("x"))
      .unwrap();
    let transport = TransportRequest::from(req);
    assert_eq!(transport.url, "/search?q=1");
    assert_eq!(transport.method, Method::POST);
    assert!(!transport.source.is_destroyed());
  }

  #[tokio::test]
  async fn streams_through_a_one_slot_channel() {
    let (mut sink, receiver) = ChannelSink::new(1);
    let items: Vec<Result<Bytes, AdapterError>> =
      ["a", "b", "c", "d"].iter().map(|s| Ok(Bytes::from_static(s.as_bytes()))).collect();
    let response: StandardResponse = axum::http::Response::builder()
      .header(SET_COOKIE, HeaderValue::from_static("a=1, b=2"))
      .body(ResponseBody::from_stream(futures_util::stream::iter(items)))
      .unwrap();

    let writer = tokio::spawn(async move { from_standard_response(&mut sink, response).await });
    let response = receiver.into_response().await;
    assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"abcd");
    writer.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn dropped_receiver_cancels_the_writer() {
    let (mut sink, receiver) = ChannelSink::new(1);
    let response = axum::http::Response::new(ResponseBody::from_stream(futures_util::stream::pending()));
    let writer = tokio::spawn(async move { from_standard_response(&mut sink, response).await });
    drop(receiver);
    let result = writer.await.unwrap();
    assert!(matches!(result, Err(AdapterError::Cancelled)));
  }

  #[tokio::test]
  async fn unwritten_head_is_a_server_error() {
    let (sink, receiver) = ChannelSink::new(4);
    drop(sink);
    assert_eq!(receiver.into_response().await.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
