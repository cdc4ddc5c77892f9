/* src/server/core/rust/src/errors.rs */

use std::path::PathBuf;

/// Failure reported by the host module graph (resolution, compilation, evaluation).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
  message: String,
}

impl HostError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviveError {
  #[error("virtual module \"{name}\" is already defined")]
  DuplicateVirtualModule { name: String },

  #[error("module {id} is not available: {reason}")]
  ModuleNotAvailable { id: String, reason: String },

  #[error("route \"{route_id}\" could not be resolved from {file}: {reason}")]
  RouteModuleUnresolvable { route_id: String, file: String, reason: String },

  #[error("bundler manifest not found at {} (did the asset build finish?)", path.display())]
  PhysicalManifestMissing { path: PathBuf },

  #[error("could not load stylesheet {file}")]
  StylesheetLoadFailure { file: String },

  #[error("invalid route table: {0}")]
  InvalidRouteTable(String),

  #[error("invalid config {}: {message}", path.display())]
  Config { path: PathBuf, message: String },

  #[error(transparent)]
  Host(#[from] HostError),

  #[error("failed to access {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

impl ReviveError {
  pub fn not_available(id: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::ModuleNotAvailable { id: id.into(), reason: reason.into() }
  }

  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io { path: path.into(), source }
  }

  pub fn code(&self) -> &'static str {
    match self {
      Self::DuplicateVirtualModule { .. } => "DUPLICATE_VIRTUAL_MODULE",
      Self::ModuleNotAvailable { .. } => "MODULE_NOT_AVAILABLE",
      Self::RouteModuleUnresolvable { .. } => "ROUTE_MODULE_UNRESOLVABLE",
      Self::PhysicalManifestMissing { .. } => "PHYSICAL_MANIFEST_MISSING",
      Self::StylesheetLoadFailure { .. } => "STYLESHEET_LOAD_FAILURE",
      Self::InvalidRouteTable(_) => "INVALID_ROUTE_TABLE",
      Self::Config { .. } => "CONFIG_ERROR",
      Self::Host(_) => "HOST_ERROR",
      Self::Io { .. } => "IO_ERROR",
      Self::Json(_) => "JSON_ERROR",
    }
  }

  /// HTTP status used when the error reaches a client.
  pub fn status(&self) -> u16 {
    match self {
      Self::ModuleNotAvailable { .. } => 404,
      _ => 500,
    }
  }
}

pub type Result<T, E = ReviveError> = std::result::Result<T, E>;
