/* src/server/core/rust/src/memory.rs */

// In-memory `ModuleHost`.
//
// Modules are registered up front and only enter the "graph" once something
// compiles them (`ensure_entry`, `module_by_url`, or as an import of a
// compiled module), which mirrors how a dev server discovers modules lazily.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;

use crate::errors::HostError;
use crate::host::{ModuleHost, ModuleNode, TransformResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryModule {
  pub id: String,
  pub url: String,
  pub file: Option<String>,
  pub code: String,
  pub imported_ids: Vec<String>,
  pub transform_deps: Option<Vec<String>>,
  pub default_export: Option<String>,
  /// When set, compiling this module fails with the given message.
  pub compile_error: Option<String>,
}

impl MemoryModule {
  /// A module whose id, url and file are all `path`.
  pub fn file(path: &str) -> Self {
    Self {
      id: path.to_string(),
      url: path.to_string(),
      file: Some(path.to_string()),
      ..Self::default()
    }
  }

  pub fn code(mut self, code: impl Into<String>) -> Self {
    self.code = code.into();
    self
  }

  pub fn imports(mut self, ids: &[&str]) -> Self {
    self.imported_ids = ids.iter().map(|s| (*s).to_string()).collect();
    self
  }

  pub fn transform_deps(mut self, urls: &[&str]) -> Self {
    self.transform_deps = Some(urls.iter().map(|s| (*s).to_string()).collect());
    self
  }

  pub fn default_export(mut self, text: impl Into<String>) -> Self {
    self.default_export = Some(text.into());
    self
  }

  pub fn url(mut self, url: impl Into<String>) -> Self {
    self.url = url.into();
    self
  }

  pub fn failing(mut self, message: impl Into<String>) -> Self {
    self.compile_error = Some(message.into());
    self
  }
}

#[derive(Default)]
struct GraphInner {
  modules: HashMap<String, MemoryModule>,
  by_url: HashMap<String, String>,
  compiled: HashSet<String>,
  invalidated: Vec<String>,
}

#[derive(Default)]
pub struct MemoryHost {
  inner: RwLock<GraphInner>,
  generation: AtomicU64,
  track_generation: bool,
}

impl MemoryHost {
  pub fn new() -> Self {
    Self::default()
  }

  /// Host that reports a source generation, bumped by `touch`.
  pub fn with_generation() -> Self {
    Self { track_generation: true, ..Self::default() }
  }

  pub fn add(&self, module: MemoryModule) {
    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
    inner.by_url.insert(module.url.clone(), module.id.clone());
    inner.compiled.remove(&module.id);
    inner.modules.insert(module.id.clone(), module);
  }

  /// Simulate a source change.
  pub fn touch(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
  }

  pub fn is_compiled(&self, id: &str) -> bool {
    self.inner.read().unwrap_or_else(|e| e.into_inner()).compiled.contains(id)
  }

  /// Ids passed to `invalidate_module`, in call order.
  pub fn invalidated(&self) -> Vec<String> {
    self.inner.read().unwrap_or_else(|e| e.into_inner()).invalidated.clone()
  }

  fn lookup_id(inner: &GraphInner, url: &str) -> Option<String> {
    if inner.modules.contains_key(url) {
      return Some(url.to_string());
    }
    inner.by_url.get(url).cloned()
  }

  /// Compile `id` and everything it statically imports.
  fn compile(&self, id: &str) -> Result<(), HostError> {
    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
    let mut stack = vec![id.to_string()];
    while let Some(current) = stack.pop() {
      if inner.compiled.contains(&current) {
        continue;
      }
      let Some(module) = inner.modules.get(&current) else {
        return Err(HostError::new(format!("cannot find module {current}")));
      };
      if let Some(message) = &module.compile_error {
        return Err(HostError::new(message.clone()));
      }
      let imports = module.imported_ids.clone();
      inner.compiled.insert(current);
      stack.extend(imports);
    }
    Ok(())
  }

  fn node(module: &MemoryModule) -> ModuleNode {
    ModuleNode {
      id: module.id.clone(),
      url: module.url.clone(),
      file: module.file.clone(),
      imported_ids: module.imported_ids.clone(),
      transform_deps: module.transform_deps.clone(),
    }
  }
}

impl ModuleHost for MemoryHost {
  fn resolve_module_id<'a>(
    &'a self,
    url: &'a str,
    _ssr: bool,
  ) -> BoxFuture<'a, Result<Option<String>, HostError>> {
    Box::pin(async move {
      let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
      Ok(Self::lookup_id(&inner, url))
    })
  }

  fn ensure_entry<'a>(&'a self, url: &'a str, _ssr: bool) -> BoxFuture<'a, Result<(), HostError>> {
    Box::pin(async move {
      let id = {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Self::lookup_id(&inner, url)
      };
      let id = id.ok_or_else(|| HostError::new(format!("cannot find module {url}")))?;
      self.compile(&id)
    })
  }

  fn transform_request<'a>(
    &'a self,
    url: &'a str,
    _ssr: bool,
  ) -> BoxFuture<'a, Result<Option<TransformResult>, HostError>> {
    Box::pin(async move {
      let id = {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Self::lookup_id(&inner, url)
      };
      let Some(id) = id else { return Ok(None) };
      self.compile(&id)?;
      let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
      Ok(inner.modules.get(&id).map(|m| TransformResult {
        code: m.code.clone(),
        deps: m.transform_deps.clone(),
      }))
    })
  }

  fn module_by_id(&self, id: &str) -> Option<ModuleNode> {
    let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
    if !inner.compiled.contains(id) {
      return None;
    }
    inner.modules.get(id).map(Self::node)
  }

  fn module_by_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<ModuleNode>> {
    Box::pin(async move {
      let id = {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Self::lookup_id(&inner, url)
      }?;
      self.compile(&id).ok()?;
      self.module_by_id(&id)
    })
  }

  fn load_default_export<'a>(
    &'a self,
    url: &'a str,
  ) -> BoxFuture<'a, Result<Option<String>, HostError>> {
    Box::pin(async move {
      let id = {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Self::lookup_id(&inner, url)
      };
      let id = id.ok_or_else(|| HostError::new(format!("cannot find module {url}")))?;
      self.compile(&id)?;
      let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
      Ok(inner.modules.get(&id).and_then(|m| m.default_export.clone()))
    })
  }

  fn invalidate_module(&self, id: &str) {
    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
    inner.compiled.remove(id);
    inner.invalidated.push(id.to_string());
  }

  fn source_generation(&self) -> Option<u64> {
    self.track_generation.then(|| self.generation.load(Ordering::SeqCst))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn modules_enter_graph_when_compiled() {
    let host = MemoryHost::new();
    host.add(MemoryModule::file("/app/root.tsx").imports(&["/app/root.css"]));
    host.add(MemoryModule::file("/app/root.css"));

    assert!(host.module_by_id("/app/root.tsx").is_none());
    host.ensure_entry("/app/root.tsx", true).await.unwrap();
    assert!(host.module_by_id("/app/root.tsx").is_some());
    assert!(host.is_compiled("/app/root.css"));
  }

  #[tokio::test]
  async fn compile_errors_surface() {
    let host = MemoryHost::new();
    host.add(MemoryModule::file("/app/bad.tsx").failing("Unexpected token"));
    let err = host.transform_request("/app/bad.tsx", true).await.unwrap_err();
    assert_eq!(err.message(), "Unexpected token");
  }

  #[tokio::test]
  async fn invalidation_evicts_and_is_recorded() {
    let host = MemoryHost::new();
    host.add(MemoryModule::file("/app/a.ts"));
    host.ensure_entry("/app/a.ts", true).await.unwrap();
    host.invalidate_module("/app/a.ts");
    assert!(host.module_by_id("/app/a.ts").is_none());
    assert_eq!(host.invalidated(), vec!["/app/a.ts"]);
  }

  #[test]
  fn generation_is_opt_in() {
    assert_eq!(MemoryHost::new().source_generation(), None);
    let host = MemoryHost::with_generation();
    assert_eq!(host.source_generation(), Some(0));
    host.touch();
    assert_eq!(host.source_generation(), Some(1));
  }
}
