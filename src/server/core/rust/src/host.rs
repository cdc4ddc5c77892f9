/* src/server/core/rust/src/host.rs */

// Contract for the bundler's live module graph. The graph, its transform
// pipeline and the file watcher live outside this crate; everything here
// talks to them through `ModuleHost`.

use futures_util::future::BoxFuture;

use crate::errors::HostError;
use crate::styles::is_css_file;

/// Snapshot of one node in the host module graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
  /// Resolved id (absolute file path, or a `\0`-prefixed virtual id).
  pub id: String,
  /// Dev-server url, including any query such as `?url`.
  pub url: String,
  /// Backing file, if the module has one.
  pub file: Option<String>,
  /// Statically known imports, as resolved ids.
  pub imported_ids: Vec<String>,
  /// Import urls recorded by the most recent SSR transform, when there was one.
  pub transform_deps: Option<Vec<String>>,
}

impl ModuleNode {
  /// Stylesheet by file convention, excluding stylesheets imported as plain `?url` references.
  pub fn is_stylesheet(&self) -> bool {
    self.file.as_deref().is_some_and(is_css_file) && !self.url.ends_with("?url")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
  pub code: String,
  pub deps: Option<Vec<String>>,
}

pub trait ModuleHost: Send + Sync {
  /// Resolve an import url to a module id without compiling it.
  fn resolve_module_id<'a>(
    &'a self,
    url: &'a str,
    ssr: bool,
  ) -> BoxFuture<'a, Result<Option<String>, HostError>>;

  /// Compile `url` (and whatever it pulls in) so that it is present in the graph.
  fn ensure_entry<'a>(&'a self, url: &'a str, ssr: bool) -> BoxFuture<'a, Result<(), HostError>>;

  /// Run the transform pipeline for `url`, returning the compiled code.
  fn transform_request<'a>(
    &'a self,
    url: &'a str,
    ssr: bool,
  ) -> BoxFuture<'a, Result<Option<TransformResult>, HostError>>;

  /// Look up a node that is already in the graph.
  fn module_by_id(&self, id: &str) -> Option<ModuleNode>;

  /// Look up a node by url, resolving it first.
  fn module_by_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<ModuleNode>>;

  /// Evaluate `url` for SSR and return its default export as text.
  fn load_default_export<'a>(
    &'a self,
    url: &'a str,
  ) -> BoxFuture<'a, Result<Option<String>, HostError>>;

  /// Drop any cached compilation of `id`.
  fn invalidate_module(&self, id: &str);

  /// Counter that changes whenever source files change, if the host tracks one.
  fn source_generation(&self) -> Option<u64> {
    None
  }
}

/// Normalize a file path into the forward-slash form the graph keys modules by.
/// Collapses repeated separators and `.`/`..` segments, and strips a leading
/// drive prefix. A relative path keeps the `..` segments it cannot resolve.
pub fn normalize_path(path: &str) -> String {
  let unix = path.replace('\\', "/");
  let drive_len = unix.bytes().take_while(u8::is_ascii_alphabetic).count();
  let unix = if drive_len > 0 && unix.as_bytes().get(drive_len) == Some(&b':') {
    &unix[drive_len + 1..]
  } else {
    unix.as_str()
  };

  let absolute = unix.starts_with('/');
  let mut segments: Vec<&str> = Vec::new();
  for segment in unix.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        if segments.last().is_some_and(|last| *last != "..") {
          segments.pop();
        } else if !absolute {
          segments.push("..");
        }
      }
      other => segments.push(other),
    }
  }
  let joined = segments.join("/");
  if absolute { format!("/{joined}") } else { joined }
}

/// Dev-server url serving an absolute file path.
pub fn fs_url(path: &str) -> String {
  let normalized = normalize_path(path);
  if normalized.starts_with('/') { format!("/@fs{normalized}") } else { format!("/@fs/{normalized}") }
}

/// Whether the dev server can serve `file` directly as JS.
pub fn is_js_file(file: &str) -> bool {
  let Some((_, ext)) = file.rsplit_once('.') else { return false };
  matches!(
    ext.to_ascii_lowercase().as_str(),
    "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "mts" | "cts"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalizes_separators() {
    assert_eq!(normalize_path("C:\\app\\\\routes\\blog.tsx"), "/app/routes/blog.tsx");
    assert_eq!(normalize_path("./app/root.tsx"), "app/root.tsx");
    assert_eq!(normalize_path("/srv//app/root.tsx"), "/srv/app/root.tsx");
  }

  #[test]
  fn collapses_dot_segments() {
    assert_eq!(normalize_path("/srv/app/../shared/root.tsx"), "/srv/shared/root.tsx");
    assert_eq!(normalize_path("/srv/./app/./routes/../root.tsx"), "/srv/app/root.tsx");
    assert_eq!(normalize_path("/../root.tsx"), "/root.tsx");
    assert_eq!(normalize_path("app/../../lib/x.tsx"), "../lib/x.tsx");
    assert_eq!(fs_url("/srv/app/../shared/root.tsx"), "/@fs/srv/shared/root.tsx");
  }

  #[test]
  fn fs_url_is_rooted() {
    assert_eq!(fs_url("/srv/app/root.tsx"), "/@fs/srv/app/root.tsx");
    assert_eq!(fs_url("C:\\srv\\app\\root.tsx"), "/@fs/srv/app/root.tsx");
  }

  #[test]
  fn js_file_detection() {
    assert!(is_js_file("routes/blog.tsx"));
    assert!(is_js_file("entry.client.MJS"));
    assert!(!is_js_file("routes/post.mdx"));
    assert!(!is_js_file("README"));
  }

  #[test]
  fn url_stylesheets_are_not_stylesheets() {
    let node = ModuleNode {
      id: "/app/a.css".into(),
      url: "/app/a.css?url".into(),
      file: Some("/app/a.css".into()),
      imported_ids: vec![],
      transform_deps: None,
    };
    assert!(!node.is_stylesheet());
    let inline = ModuleNode { url: "/app/a.css".into(), ..node };
    assert!(inline.is_stylesheet());
  }
}
