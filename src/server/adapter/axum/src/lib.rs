/* src/server/adapter/axum/src/lib.rs */

mod dev;
mod error;
mod flow;
mod request;
mod response;
mod transport;

/// Re-export revive-core for convenience
pub use revive_core;

pub use dev::{
  CRITICAL_CSS_PATH, DevState, RenderContext, RequestHandler, dev_fallback, dev_middleware,
  dev_router,
};
pub use error::{AdapterError, AxumError, DevError};
pub use flow::{Flow, FlowEvent, FlowState, transition};
pub use request::{
  BodyOptions, RequestBody, StandardRequest, TransportRequest, TransportSource, to_standard_request,
};
pub use response::{
  BodyStream, HeaderList, ResponseBody, ResponseSink, SinkSignal, StandardResponse,
  from_standard_response, split_cookies_string, transport_headers,
};
pub use transport::{AxumSource, ChannelResponse, ChannelSink};

/// Serve the development router on `addr` until the listener fails.
pub async fn serve(state: DevState, addr: &str) -> Result<(), AdapterError> {
  let router = dev_router(state);
  let listener = tokio::net::TcpListener::bind(addr).await?;
  let local_addr = listener.local_addr()?;
  tracing::info!("Revive dev server running on http://localhost:{}", local_addr.port());
  axum::serve(listener, router).await?;
  Ok(())
}
