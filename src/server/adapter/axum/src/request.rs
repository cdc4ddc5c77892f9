/* src/server/adapter/axum/src/request.rs */

// Transport request -> standard request. The body is a lazy stream: nothing
// is read from the transport until the consumer first polls it, and the
// source is paused whenever the consumer falls `high_water_mark` chunks behind.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Request, Uri, Version, header};
use futures_core::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AdapterError;
use crate::flow::{Flow, FlowEvent};

/// Pull-based byte source of an inbound transport request.
pub trait TransportSource: Send + 'static {
  /// Next chunk; `None` at end of input.
  fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>>;
  fn pause(&mut self);
  fn resume(&mut self);
  /// Tear the source down; no further chunks are produced.
  fn destroy(&mut self);
  fn is_destroyed(&self) -> bool;
}

pub struct TransportRequest<S> {
  pub method: Method,
  /// Path and query, as received.
  pub url: String,
  pub headers: HeaderMap,
  pub version: Version,
  pub source: S,
}

pub type StandardRequest = Request<RequestBody>;

#[derive(Debug, Clone, Copy)]
pub struct BodyOptions {
  /// Bytes accepted when no content-length is declared; 0 disables the check.
  pub body_size_limit: u64,
  pub high_water_mark: usize,
}

impl Default for BodyOptions {
  fn default() -> Self {
    Self { body_size_limit: 512 * 1024, high_water_mark: 16 }
  }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
  headers.get(header::CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

fn has_no_body(headers: &HeaderMap, version: Version, length: Option<u64>) -> bool {
  if !headers.contains_key(header::CONTENT_TYPE) || length == Some(0) {
    return true;
  }
  let http1 = matches!(version, Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11);
  http1 && length.is_none() && !headers.contains_key(header::TRANSFER_ENCODING)
}

/// Build a standard request around `transport`. Fails with `PayloadTooLarge`
/// before reading anything when the declared length exceeds the limit.
pub fn to_standard_request<S: TransportSource>(
  transport: TransportRequest<S>,
  base: &str,
  options: BodyOptions,
) -> Result<StandardRequest, AdapterError> {
  let TransportRequest { method, url, headers, version, mut source } = transport;
  let uri: Uri = format!("{base}{url}")
    .parse()
    .map_err(|e| AdapterError::InvalidRequest(format!("{base}{url}: {e}")))?;

  let length = declared_length(&headers);
  let body = if has_no_body(&headers, version, length) {
    RequestBody::absent()
  } else {
    let (limit, declared) = match (length, options.body_size_limit) {
      (Some(n), max) if max > 0 && n > max => {
        source.destroy();
        return Err(AdapterError::PayloadTooLarge { limit: max, received: Some(n), declared: true });
      }
      (Some(n), _) => (Some(n), true),
      (None, 0) => (None, false),
      (None, max) => (Some(max), false),
    };
    if source.is_destroyed() {
      debug!(url = %url, "transport closed before the body was read");
      RequestBody::cancelled()
    } else {
      RequestBody::pending(Pump {
        source: Box::new(source),
        limit,
        declared,
        high_water_mark: options.high_water_mark.max(1),
      })
    }
  };

  let mut request = Request::new(body);
  *request.method_mut() = method;
  *request.uri_mut() = uri;
  *request.version_mut() = version;
  *request.headers_mut() = headers;
  Ok(request)
}

struct Pump {
  source: Box<dyn TransportSource>,
  limit: Option<u64>,
  declared: bool,
  high_water_mark: usize,
}

impl Pump {
  fn abort(&mut self, flow: &Flow) {
    if flow.cancel() && !self.source.is_destroyed() {
      self.source.destroy();
    }
  }
}

enum Step {
  Closed,
  Chunk(Option<io::Result<Bytes>>),
}

async fn run_pump(mut pump: Pump, tx: mpsc::Sender<Result<Bytes, AdapterError>>, flow: Arc<Flow>) {
  flow.fire(FlowEvent::Start);
  let mut size: u64 = 0;
  loop {
    let step = tokio::select! {
      biased;
      () = tx.closed() => Step::Closed,
      chunk = std::future::poll_fn(|cx| pump.source.poll_chunk(cx)) => Step::Chunk(chunk),
    };
    let chunk = match step {
      Step::Closed => {
        pump.abort(&flow);
        return;
      }
      Step::Chunk(None) => {
        flow.fire(FlowEvent::Finish);
        return;
      }
      Step::Chunk(Some(Err(e))) => {
        flow.cancel();
        let _ = tx.send(Err(AdapterError::Transport(e))).await;
        return;
      }
      Step::Chunk(Some(Ok(chunk))) => chunk,
    };

    size += chunk.len() as u64;
    if let Some(limit) = pump.limit
      && size > limit
    {
      pump.abort(&flow);
      let err = AdapterError::PayloadTooLarge { limit, received: None, declared: pump.declared };
      let _ = tx.send(Err(err)).await;
      return;
    }

    if tx.send(Ok(chunk)).await.is_err() {
      pump.abort(&flow);
      return;
    }

    if tx.capacity() == 0 {
      pump.source.pause();
      flow.fire(FlowEvent::Stall);
      // A permit frees up once the consumer pulls; the slot goes straight back.
      match tx.reserve().await {
        Ok(permit) => drop(permit),
        Err(_) => {
          pump.abort(&flow);
          return;
        }
      }
      flow.fire(FlowEvent::Resume);
      pump.source.resume();
    }
  }
}

enum BodyInner {
  Absent,
  Pending(Option<Pump>),
  Streaming(mpsc::Receiver<Result<Bytes, AdapterError>>),
  Finished,
}

/// Body of a [`StandardRequest`].
pub struct RequestBody {
  inner: BodyInner,
  flow: Arc<Flow>,
}

impl std::fmt::Debug for RequestBody {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RequestBody").field("flow", &self.flow.state()).finish_non_exhaustive()
  }
}

impl RequestBody {
  /// No body at all (as opposed to an empty one).
  pub fn absent() -> Self {
    Self { inner: BodyInner::Absent, flow: Arc::new(Flow::new()) }
  }

  fn cancelled() -> Self {
    let flow = Flow::new();
    flow.cancel();
    Self { inner: BodyInner::Finished, flow: Arc::new(flow) }
  }

  fn pending(pump: Pump) -> Self {
    Self { inner: BodyInner::Pending(Some(pump)), flow: Arc::new(Flow::new()) }
  }

  pub fn is_absent(&self) -> bool {
    matches!(self.inner, BodyInner::Absent)
  }

  pub fn flow(&self) -> &Arc<Flow> {
    &self.flow
  }
}

impl Stream for RequestBody {
  type Item = Result<Bytes, AdapterError>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    loop {
      match &mut this.inner {
        BodyInner::Absent | BodyInner::Finished => return Poll::Ready(None),
        BodyInner::Pending(pump) => {
          let Some(pump) = pump.take() else {
            this.inner = BodyInner::Finished;
            continue;
          };
          let (tx, rx) = mpsc::channel(pump.high_water_mark);
          tokio::spawn(run_pump(pump, tx, this.flow.clone()));
          this.inner = BodyInner::Streaming(rx);
        }
        BodyInner::Streaming(rx) => {
          return match rx.poll_recv(cx) {
            Poll::Ready(None) => {
              this.inner = BodyInner::Finished;
              Poll::Ready(None)
            }
            other => other,
          };
        }
      }
    }
  }
}

impl Drop for RequestBody {
  fn drop(&mut self) {
    if let BodyInner::Pending(Some(pump)) = &mut self.inner {
      pump.abort(&self.flow);
    }
  }
}
