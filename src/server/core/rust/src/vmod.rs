/* src/server/core/rust/src/vmod.rs */

// Registry of synthetic modules that have no backing file.
//
// Ids are derived, not registered: `virtual:<name>` is the public id that
// user code imports, `\0virtual:<name>` the internal id the host graph keys
// the module by. The `\0` prefix keeps other resolvers away from the id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::errors::{Result, ReviveError};
use crate::host::ModuleHost;

pub const PUBLIC_PREFIX: &str = "virtual:";
pub const INTERNAL_PREFIX: &str = "\0";

pub const SERVER_ENTRY: &str = "server-entry";
pub const SERVER_MANIFEST: &str = "server-manifest";
pub const BROWSER_MANIFEST: &str = "browser-manifest";

pub fn public_id(name: &str) -> String {
  format!("{PUBLIC_PREFIX}{name}")
}

pub fn internal_id(public_id: &str) -> String {
  format!("{INTERNAL_PREFIX}{public_id}")
}

/// Inverse of [`internal_id`].
pub fn public_id_of(internal_id: &str) -> Option<&str> {
  internal_id.strip_prefix(INTERNAL_PREFIX).filter(|id| id.starts_with(PUBLIC_PREFIX))
}

/// Browser-reachable url of a virtual module (`\0` is not url-safe, so the dev
/// server spells it `__x00__`).
pub fn dev_url(public_id: &str) -> String {
  format!("/@id/__x00__{public_id}")
}

pub type ContentProducer = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

pub struct VirtualModule {
  pub name: String,
  pub public_id: String,
  pub internal_id: String,
  producer: ContentProducer,
}

impl std::fmt::Debug for VirtualModule {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("VirtualModule")
      .field("public_id", &self.public_id)
      .field("internal_id", &self.internal_id)
      .finish_non_exhaustive()
  }
}

pub struct VirtualModuleRegistry {
  records: Vec<Arc<VirtualModule>>,
  host: Arc<dyn ModuleHost>,
  // Loads hold the read side for the whole content computation, invalidation
  // the write side, so a load never straddles an invalidation.
  gate: RwLock<()>,
  generation: AtomicU64,
}

impl VirtualModuleRegistry {
  pub fn new(host: Arc<dyn ModuleHost>) -> Self {
    Self { records: Vec::new(), host, gate: RwLock::new(()), generation: AtomicU64::new(0) }
  }

  /// Register a module. Only called while the registry is being set up.
  pub fn define(&mut self, name: &str, producer: ContentProducer) -> Result<Arc<VirtualModule>> {
    if self.records.iter().any(|r| r.name == name) {
      return Err(ReviveError::DuplicateVirtualModule { name: name.to_string() });
    }
    let public = public_id(name);
    let record = Arc::new(VirtualModule {
      name: name.to_string(),
      internal_id: internal_id(&public),
      public_id: public,
      producer,
    });
    self.records.push(record.clone());
    Ok(record)
  }

  /// Internal id for `requested`, if it is one of ours.
  pub fn resolve(&self, requested: &str) -> Option<String> {
    self.records.iter().find(|r| r.public_id == requested).map(|r| r.internal_id.clone())
  }

  pub fn get(&self, name: &str) -> Option<&Arc<VirtualModule>> {
    self.records.iter().find(|r| r.name == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<VirtualModule>> {
    self.records.iter()
  }

  /// Current content of the module with `internal_id`; `Ok(None)` when it is not ours.
  /// Producer errors propagate unchanged.
  pub async fn load(&self, internal_id: &str) -> Result<Option<String>> {
    let Some(record) = self.records.iter().find(|r| r.internal_id == internal_id) else {
      return Ok(None);
    };
    let _read = self.gate.read().await;
    let content = (record.producer)().await?;
    Ok(Some(content))
  }

  /// Load by public id or name, failing when no such module exists.
  pub async fn load_named(&self, name: &str) -> Result<String> {
    let id = internal_id(&public_id(name));
    self.load(&id).await?.ok_or_else(|| ReviveError::not_available(id, "not a virtual module"))
  }

  /// Tell the host to drop its cached copy of `public_id`.
  /// Returns false when `public_id` is not a registered module.
  pub async fn invalidate(&self, public_id: &str) -> bool {
    let Some(internal) = self.resolve(public_id) else { return false };
    let _write = self.gate.write().await;
    self.generation.fetch_add(1, Ordering::SeqCst);
    if self.host.module_by_id(&internal).is_some() {
      self.host.invalidate_module(&internal);
    }
    true
  }

  pub async fn invalidate_all(&self) {
    let _write = self.gate.write().await;
    self.generation.fetch_add(1, Ordering::SeqCst);
    for record in &self.records {
      if self.host.module_by_id(&record.internal_id).is_some() {
        self.host.invalidate_module(&record.internal_id);
      }
    }
  }

  /// Bumped by every invalidation.
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }
}
