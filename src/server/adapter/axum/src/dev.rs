/* src/server/adapter/axum/src/dev.rs */

// Development middleware: refresh virtual modules, answer critical-CSS
// requests, and bridge everything else to the injected request handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use revive_core::vmod::SERVER_ENTRY;
use revive_core::{BuildManifest, ReviveContext};
use tracing::{debug, error, warn};

use crate::error::{AdapterError, AxumError, DevError};
use crate::request::{BodyOptions, StandardRequest, TransportRequest, to_standard_request};
use crate::response::{StandardResponse, from_standard_response};
use crate::transport::{AxumSource, ChannelSink};

pub const CRITICAL_CSS_PATH: &str = "/_critical.css";

/// Per-request inputs handed to the request handler.
#[derive(Clone)]
pub struct RenderContext {
  pub manifest: Arc<BuildManifest>,
  pub critical_css: Option<String>,
  /// Freshly generated `virtual:server-entry` source.
  pub server_entry: String,
}

pub type RequestHandler = Arc<
  dyn Fn(StandardRequest, RenderContext) -> BoxFuture<'static, Result<StandardResponse, AdapterError>>
    + Send
    + Sync,
>;

#[derive(Clone)]
pub struct DevState {
  context: Arc<ReviveContext>,
  handler: RequestHandler,
  base: Option<String>,
  options: BodyOptions,
}

impl DevState {
  /// Body limits come from the `[dev]` config section.
  pub fn new(context: Arc<ReviveContext>, handler: RequestHandler) -> Self {
    let dev = &context.config().dev;
    let options =
      BodyOptions { body_size_limit: dev.body_size_limit, high_water_mark: dev.high_water_mark };
    Self { context, handler, base: None, options }
  }

  /// Fixed origin for request urls, instead of one derived from `Host`.
  pub fn with_base(mut self, base: impl Into<String>) -> Self {
    self.base = Some(base.into());
    self
  }

  pub fn context(&self) -> &Arc<ReviveContext> {
    &self.context
  }

  fn base_for(&self, headers: &HeaderMap) -> String {
    if let Some(base) = &self.base {
      return base.clone();
    }
    let host = headers.get(HOST).and_then(|h| h.to_str().ok()).unwrap_or("localhost");
    format!("http://{host}")
  }
}

/// Router whose every request goes through [`dev_middleware`].
pub fn dev_router(state: DevState) -> Router {
  Router::new().fallback(dev_fallback).layer(middleware::from_fn_with_state(state, dev_middleware))
}

pub async fn dev_middleware(State(state): State<DevState>, req: Request, next: Next) -> Response {
  let (parts, body) = req.into_parts();
  let context = state.context.clone();

  context.registry().invalidate_all().await;
  let server_entry = match context.registry().load_named(SERVER_ENTRY).await {
    Ok(code) => code,
    Err(e) => return forward_error(parts, e.into(), next).await,
  };

  if parts.uri.path() == CRITICAL_CSS_PATH {
    let pathname = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
      .ok()
      .and_then(|Query(mut params)| params.remove("pathname"));
    let css = context.styles_for_url(pathname.as_deref()).await;
    return ([(CONTENT_TYPE, "text/css")], css.unwrap_or_default()).into_response();
  }

  let url = parts.uri.path_and_query().map_or("/", |pq| pq.as_str()).to_string();
  let manifest = context.dev_manifest().await;
  let critical_css = context.styles_for_url(Some(&url)).await;

  let transport = TransportRequest {
    method: parts.method.clone(),
    url,
    headers: parts.headers.clone(),
    version: parts.version,
    source: AxumSource::new(body),
  };
  let mut request = match to_standard_request(transport, &state.base_for(&parts.headers), state.options) {
    Ok(request) => request,
    Err(e) => return forward_error(parts, e, next).await,
  };
  *request.extensions_mut() = parts.extensions;

  let render = RenderContext { manifest, critical_css, server_entry };
  let response = match (state.handler)(request, render).await {
    Ok(response) => response,
    Err(e) => {
      error!(error = %e, "request handler failed");
      return AxumError(e).into_response();
    }
  };

  let (mut sink, receiver) = ChannelSink::new(state.options.high_water_mark);
  tokio::spawn(async move {
    match from_standard_response(&mut sink, response).await {
      Ok(()) => {}
      Err(AdapterError::Cancelled) => debug!("response abandoned by the client"),
      Err(e) => warn!(error = %e, "response stream failed"),
    }
  });
  receiver.into_response().await
}

/// Hand `err` to the next layer, the middleware equivalent of `next(error)`.
async fn forward_error(parts: Parts, err: AdapterError, next: Next) -> Response {
  debug!(error = %err, uri = %parts.uri, "forwarding dev error");
  let mut req = Request::from_parts(parts, Body::empty());
  req.extensions_mut().insert(DevError::new(err));
  next.run(req).await
}

/// Renders a forwarded [`DevError`]; anything else is a 404.
pub async fn dev_fallback(req: Request) -> Response {
  match req.extensions().get::<DevError>() {
    Some(err) => err.clone().into_response(),
    None => StatusCode::NOT_FOUND.into_response(),
  }
}
