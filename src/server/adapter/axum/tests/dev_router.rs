/* src/server/adapter/axum/tests/dev_router.rs */

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use axum::http::{Method, Request, Response, StatusCode};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use revive_adapter_axum::{
  AdapterError, DevState, RenderContext, RequestHandler, ResponseBody, StandardRequest, dev_router,
};
use revive_core::memory::{MemoryHost, MemoryModule};
use revive_core::{ManifestMode, ReviveConfig, ReviveContext};
use tower::ServiceExt;

const CONFIG: &str = r#"
[dev]
body_size_limit = 64

[[routes]]
id = "root"
path = ""
file = "root.tsx"

[[routes]]
id = "routes/blog"
parent_id = "root"
path = "blog"
file = "routes/blog.tsx"
"#;

fn context() -> Arc<ReviveContext> {
  let host = MemoryHost::new();
  host.add(
    MemoryModule::file("/srv/app/root.tsx")
      .url("/@fs/srv/app/root.tsx")
      .code("__vite_ssr_exports__.default = Root;"),
  );
  host.add(
    MemoryModule::file("/srv/app/routes/blog.tsx")
      .url("/@fs/srv/app/routes/blog.tsx")
      .imports(&["/srv/app/routes/blog.css"])
      .code("Object.defineProperty(__vite_ssr_exports__, \"loader\", { get(){ return loader }});"),
  );
  host.add(MemoryModule::file("/srv/app/routes/blog.css").default_export(".post{color:red}"));

  let config: ReviveConfig = toml::from_str(CONFIG).unwrap();
  let config = config.resolve_paths(Path::new("/srv"));
  Arc::new(ReviveContext::new(config, Arc::new(host), ManifestMode::Development).unwrap())
}

/// Echoes what it was handed, with two folded cookies.
fn echo_handler() -> RequestHandler {
  Arc::new(|req: StandardRequest, render: RenderContext| {
    Box::pin(async move {
      let method = req.method().clone();
      let uri = req.uri().to_string();
      let mut body = Vec::new();
      let mut stream = req.into_body();
      while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
      }
      let text = format!(
        "{method} {uri} body={} css={} version={} entry={}",
        String::from_utf8_lossy(&body),
        render.critical_css.is_some(),
        render.manifest.version.len(),
        render.server_entry.contains("virtual:server-manifest"),
      );
      Ok(
        Response::builder()
          .header(SET_COOKIE, "a=1, b=2")
          .body(ResponseBody::from_bytes(Bytes::from(text)))
          .unwrap(),
      )
    })
  })
}

async fn body_text(response: axum::response::Response) -> String {
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn critical_css_endpoint_serves_route_styles() {
  let app = dev_router(DevState::new(context(), echo_handler()));
  let req = Request::builder().uri("/_critical.css?pathname=/blog").body(Body::empty()).unwrap();

  let response = app.oneshot(req).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[CONTENT_TYPE], "text/css");
  let css = body_text(response).await;
  assert!(css.contains(".post{color:red}"));
  assert!(css.contains("/* /srv/app/routes/blog.css */"));
}

#[tokio::test]
async fn critical_css_without_matches_is_empty() {
  let app = dev_router(DevState::new(context(), echo_handler()));
  let req = Request::builder().uri("/_critical.css").body(Body::empty()).unwrap();
  let response = app.oneshot(req).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn handler_sees_request_and_render_context() {
  let app = dev_router(DevState::new(context(), echo_handler()));
  let req = Request::builder()
    .method(Method::POST)
    .uri("/blog")
    .header(CONTENT_TYPE, "text/plain")
    .header(CONTENT_LENGTH, "5")
    .body(Body::from("hello"))
    .unwrap();

  let response = app.oneshot(req).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let cookies: Vec<_> = response.headers().get_all(SET_COOKIE).iter().collect();
  assert_eq!(cookies, vec!["a=1", "b=2"]);
  assert_eq!(
    body_text(response).await,
    "POST http://localhost/blog body=hello css=true version=16 entry=true"
  );
}

#[tokio::test]
async fn data_requests_skip_critical_css() {
  let state = DevState::new(context(), echo_handler()).with_base("https://example.test");
  let req = Request::builder().uri("/blog?_data=routes/blog").body(Body::empty()).unwrap();

  let response = dev_router(state).oneshot(req).await.unwrap();
  let text = body_text(response).await;
  assert!(text.starts_with("GET https://example.test/blog?_data=routes/blog body= css=false"));
}

#[tokio::test]
async fn oversized_declared_body_is_413_before_the_handler() {
  let called = Arc::new(AtomicBool::new(false));
  let flag = called.clone();
  let handler: RequestHandler = Arc::new(move |_req: StandardRequest, _render: RenderContext| {
    flag.store(true, Ordering::SeqCst);
    Box::pin(async move { Ok(Response::new(ResponseBody::empty())) })
  });
  let app = dev_router(DevState::new(context(), handler));
  let req = Request::builder()
    .method(Method::POST)
    .uri("/blog")
    .header(CONTENT_TYPE, "application/octet-stream")
    .header(CONTENT_LENGTH, "100")
    .body(Body::from(vec![0u8; 100]))
    .unwrap();

  let response = app.oneshot(req).await.unwrap();
  assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
  let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
  assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");
  assert_eq!(
    json["error"]["message"],
    "Received content-length of 100, but only accept up to 64 bytes."
  );
  assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn handler_errors_render_as_json() {
  let handler: RequestHandler = Arc::new(|_req: StandardRequest, _render: RenderContext| {
    Box::pin(async move { Err(AdapterError::Handler("render exploded".into())) })
  });
  let app = dev_router(DevState::new(context(), handler));
  let req = Request::builder().uri("/blog").body(Body::empty()).unwrap();

  let response = app.oneshot(req).await.unwrap();
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
  assert_eq!(json["error"]["code"], "HANDLER_ERROR");
  assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn every_request_invalidates_virtual_modules() {
  let context = context();
  let before = context.registry().generation();
  let app = dev_router(DevState::new(context.clone(), echo_handler()));
  let req = Request::builder().uri("/").body(Body::empty()).unwrap();
  let _ = app.oneshot(req).await.unwrap();
  assert!(context.registry().generation() > before);
}
