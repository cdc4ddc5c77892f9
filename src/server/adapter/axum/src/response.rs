/* src/server/adapter/axum/src/response.rs */

// Standard response -> transport writes.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::body::Bytes;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{debug, error};

use crate::error::AdapterError;
use crate::flow::{Flow, FlowEvent};

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, AdapterError>> + Send>>;
pub type HeaderList = Vec<(HeaderName, HeaderValue)>;
pub type StandardResponse = Response<ResponseBody>;

/// Response body handle. Clones share one underlying stream, which can be
/// taken by exactly one reader; after that the body reports itself locked.
#[derive(Clone, Default)]
pub struct ResponseBody {
  stream: Option<Arc<Mutex<Option<BodyStream>>>>,
}

impl std::fmt::Debug for ResponseBody {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResponseBody")
      .field("empty", &self.is_empty())
      .field("locked", &self.is_locked())
      .finish()
  }
}

impl ResponseBody {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn from_stream<S>(stream: S) -> Self
  where
    S: Stream<Item = Result<Bytes, AdapterError>> + Send + 'static,
  {
    Self { stream: Some(Arc::new(Mutex::new(Some(Box::pin(stream))))) }
  }

  pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
    Self::from_stream(futures_util::stream::once(std::future::ready(Ok(bytes.into()))))
  }

  /// No body at all.
  pub fn is_empty(&self) -> bool {
    self.stream.is_none()
  }

  pub fn is_locked(&self) -> bool {
    self
      .stream
      .as_ref()
      .is_some_and(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).is_none())
  }

  /// Take the stream. `None` for an empty or already-locked body.
  pub fn reader(&self) -> Option<BodyStream> {
    self.stream.as_ref()?.lock().unwrap_or_else(|e| e.into_inner()).take()
  }
}

#[derive(Debug)]
pub enum SinkSignal {
  /// Buffered writes were flushed; writing may continue.
  Drain,
  /// The peer went away.
  Close,
  Error(io::Error),
}

/// Outgoing transport response.
pub trait ResponseSink: Send {
  fn write_head(&mut self, status: StatusCode, headers: HeaderList);
  /// Queue `chunk`. `false` asks the writer to wait for [`SinkSignal::Drain`].
  fn write(&mut self, chunk: Bytes) -> bool;
  fn end(&mut self);
  fn destroy(&mut self, error: Option<&AdapterError>);
  fn is_destroyed(&self) -> bool;
  fn poll_signal(&mut self, cx: &mut Context<'_>) -> Poll<SinkSignal>;
}

/// Split a folded `Set-Cookie` value back into individual cookies. A comma
/// only separates cookies when the text after it reaches `=` before any `;`
/// or `,`, so commas inside `Expires=` dates stay put.
pub fn split_cookies_string(input: &str) -> Vec<String> {
  let bytes = input.as_bytes();
  let len = bytes.len();
  let skip_whitespace = |pos: &mut usize| {
    while *pos < len && bytes[*pos].is_ascii_whitespace() {
      *pos += 1;
    }
    *pos < len
  };

  let mut cookies = Vec::new();
  if len == 0 {
    return cookies;
  }
  let mut pos = 0;
  let mut start = 0;
  while skip_whitespace(&mut pos) {
    if bytes[pos] != b',' {
      pos += 1;
      continue;
    }
    let last_comma = pos;
    pos += 1;
    skip_whitespace(&mut pos);
    let next_start = pos;
    while pos < len && !matches!(bytes[pos], b'=' | b';' | b',') {
      pos += 1;
    }
    if pos < len && bytes[pos] == b'=' {
      cookies.push(input[start..last_comma].to_string());
      pos = next_start;
      start = pos;
    } else {
      pos = last_comma + 1;
    }
  }
  cookies.push(input[start..].to_string());
  cookies
}

/// Header entries as written to the transport: one `Set-Cookie` entry per cookie.
pub fn transport_headers(headers: &HeaderMap) -> HeaderList {
  let mut out = Vec::with_capacity(headers.len());
  for (name, value) in headers {
    if name != SET_COOKIE {
      out.push((name.clone(), value.clone()));
      continue;
    }
    let Ok(folded) = value.to_str() else {
      out.push((name.clone(), value.clone()));
      continue;
    };
    for cookie in split_cookies_string(folded) {
      if let Ok(value) = HeaderValue::from_str(&cookie) {
        out.push((SET_COOKIE, value));
      }
    }
  }
  out
}

enum WriteStep {
  Signal(SinkSignal),
  Chunk(Option<Result<Bytes, AdapterError>>),
}

/// Write `response` to `sink`, honoring drain backpressure. A sink that
/// closes or errors first cancels the body; a body error destroys the sink.
pub async fn from_standard_response<K: ResponseSink + ?Sized>(
  sink: &mut K,
  response: StandardResponse,
) -> Result<(), AdapterError> {
  let (parts, body) = response.into_parts();
  sink.write_head(parts.status, transport_headers(&parts.headers));

  if body.is_empty() {
    sink.end();
    return Ok(());
  }
  let Some(mut reader) = body.reader() else {
    let err = AdapterError::ResponseBodyLocked;
    error!("{err}");
    sink.write(Bytes::from(err.to_string()));
    sink.end();
    return Err(err);
  };

  let flow = Flow::new();
  if sink.is_destroyed() {
    flow.cancel();
    return Err(AdapterError::Cancelled);
  }
  flow.fire(FlowEvent::Start);

  loop {
    let step = tokio::select! {
      biased;
      signal = std::future::poll_fn(|cx| sink.poll_signal(cx)) => WriteStep::Signal(signal),
      chunk = reader.next() => WriteStep::Chunk(chunk),
    };
    let signal = match step {
      WriteStep::Chunk(None) => {
        flow.fire(FlowEvent::Finish);
        sink.end();
        return Ok(());
      }
      WriteStep::Chunk(Some(Err(e))) => return Err(cancel(&flow, sink, e)),
      WriteStep::Chunk(Some(Ok(chunk))) => {
        if sink.write(chunk) {
          continue;
        }
        flow.fire(FlowEvent::Wait);
        std::future::poll_fn(|cx| sink.poll_signal(cx)).await
      }
      WriteStep::Signal(signal) => signal,
    };
    match signal {
      SinkSignal::Drain => {
        flow.fire(FlowEvent::Resume);
      }
      SinkSignal::Close => {
        if flow.cancel() {
          debug!("client closed the response early");
        }
        return Err(AdapterError::Cancelled);
      }
      SinkSignal::Error(e) => return Err(cancel(&flow, sink, AdapterError::Transport(e))),
    }
  }
}

/// Cancel once, from whichever side noticed first; the body reader is dropped
/// by the caller on return.
fn cancel<K: ResponseSink + ?Sized>(flow: &Flow, sink: &mut K, err: AdapterError) -> AdapterError {
  if flow.cancel() {
    sink.destroy(Some(&err));
  }
  err
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;

  use super::*;

  #[test]
  fn splits_cookies_but_not_expiry_dates() {
    assert_eq!(split_cookies_string("a=1, b=2"), vec!["a=1", "b=2"]);
    assert_eq!(
      split_cookies_string("sid=x; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Path=/, theme=dark"),
      vec!["sid=x; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Path=/", "theme=dark"]
    );
    assert_eq!(split_cookies_string("single=1"), vec!["single=1"]);
    assert!(split_cookies_string("").is_empty());
  }

  #[test]
  fn folded_set_cookie_becomes_separate_entries() {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("text/html"));
    headers.insert(SET_COOKIE, HeaderValue::from_static("a=1, b=2"));
    let list = transport_headers(&headers);
    let cookies: Vec<_> =
      list.iter().filter(|(n, _)| n == SET_COOKIE).map(|(_, v)| v.to_str().unwrap()).collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
    assert_eq!(list.len(), 3);
  }

  #[test]
  fn body_locks_after_first_reader() {
    let body = ResponseBody::from_bytes("hi");
    let shared = body.clone();
    assert!(!body.is_locked());
    assert!(shared.reader().is_some());
    assert!(body.is_locked());
    assert!(body.reader().is_none());
    assert!(ResponseBody::empty().is_empty());
    assert!(!ResponseBody::empty().is_locked());
  }

  /// Sink that accepts `budget` writes before asking for drain, and replays
  /// scripted signals.
  #[derive(Default)]
  struct RecordingSink {
    head: Option<(StatusCode, HeaderList)>,
    written: Vec<Bytes>,
    budget: usize,
    signals: VecDeque<SinkSignal>,
    ended: bool,
    destroyed: bool,
    drains: usize,
  }

  impl ResponseSink for RecordingSink {
    fn write_head(&mut self, status: StatusCode, headers: HeaderList) {
      self.head = Some((status, headers));
    }

    fn write(&mut self, chunk: Bytes) -> bool {
      self.written.push(chunk);
      if self.budget == 0 {
        self.signals.push_back(SinkSignal::Drain);
        return false;
      }
      self.budget -= 1;
      true
    }

    fn end(&mut self) {
      self.ended = true;
    }

    fn destroy(&mut self, _error: Option<&AdapterError>) {
      self.destroyed = true;
    }

    fn is_destroyed(&self) -> bool {
      self.destroyed
    }

    fn poll_signal(&mut self, _cx: &mut Context<'_>) -> Poll<SinkSignal> {
      match self.signals.pop_front() {
        Some(SinkSignal::Drain) => {
          self.drains += 1;
          Poll::Ready(SinkSignal::Drain)
        }
        Some(signal) => Poll::Ready(signal),
        None => Poll::Pending,
      }
    }
  }

  fn chunks(parts: &[&'static str]) -> ResponseBody {
    let items: Vec<Result<Bytes, AdapterError>> =
      parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
    ResponseBody::from_stream(futures_util::stream::iter(items))
  }

  #[tokio::test]
  async fn writes_head_and_body_with_drain_waits() {
    let mut sink = RecordingSink { budget: 1, ..RecordingSink::default() };
    let response = Response::builder()
      .status(StatusCode::CREATED)
      .header(SET_COOKIE, "a=1, b=2")
      .body(chunks(&["one", "two", "three"]))
      .unwrap();

    from_standard_response(&mut sink, response).await.unwrap();
    let (status, headers) = sink.head.clone().unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.len(), 2);
    assert_eq!(sink.written, vec!["one", "two", "three"]);
    assert_eq!(sink.drains, 2);
    assert!(sink.ended);
  }

  #[tokio::test]
  async fn empty_body_ends_immediately() {
    let mut sink = RecordingSink::default();
    let response = Response::builder().status(StatusCode::NO_CONTENT).body(ResponseBody::empty()).unwrap();
    from_standard_response(&mut sink, response).await.unwrap();
    assert!(sink.ended);
    assert!(sink.written.is_empty());
  }

  #[tokio::test]
  async fn locked_body_writes_diagnostic() {
    let mut sink = RecordingSink { budget: 8, ..RecordingSink::default() };
    let body = ResponseBody::from_bytes("consumed elsewhere");
    let _taken = body.reader();
    let response = Response::new(body);

    let err = from_standard_response(&mut sink, response).await.unwrap_err();
    assert!(matches!(err, AdapterError::ResponseBodyLocked));
    assert!(sink.ended);
    assert!(String::from_utf8_lossy(&sink.written[0]).starts_with("Fatal error: Response body is locked."));
  }

  #[tokio::test]
  async fn close_before_exhaustion_cancels_the_body() {
    let mut sink = RecordingSink { budget: 8, ..RecordingSink::default() };
    sink.signals.push_back(SinkSignal::Close);
    sink.signals.push_back(SinkSignal::Error(io::Error::other("reset")));
    let response = Response::new(ResponseBody::from_stream(futures_util::stream::pending()));

    let err = from_standard_response(&mut sink, response).await.unwrap_err();
    assert!(matches!(err, AdapterError::Cancelled));
    assert!(!sink.ended);
    assert!(!sink.destroyed);
  }

  #[tokio::test]
  async fn body_error_destroys_the_sink() {
    let mut sink = RecordingSink { budget: 8, ..RecordingSink::default() };
    let items: Vec<Result<Bytes, AdapterError>> =
      vec![Ok(Bytes::from_static(b"partial")), Err(AdapterError::Handler("render failed".into()))];
    let response = Response::new(ResponseBody::from_stream(futures_util::stream::iter(items)));

    let err = from_standard_response(&mut sink, response).await.unwrap_err();
    assert!(matches!(err, AdapterError::Handler(_)));
    assert!(sink.destroyed);
    assert!(!sink.ended);
  }

  #[tokio::test]
  async fn destroyed_sink_never_reads() {
    let mut sink = RecordingSink { destroyed: true, ..RecordingSink::default() };
    let response = Response::new(chunks(&["x"]));
    assert!(matches!(from_standard_response(&mut sink, response).await, Err(AdapterError::Cancelled)));
    assert!(sink.written.is_empty());
  }
}
