/* src/server/core/rust/src/styles.rs */

// Critical CSS collection: walk the live module graph from route modules and
// gather every stylesheet they reach.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::errors::ReviveError;
use crate::host::{ModuleHost, ModuleNode, normalize_path};
use crate::route::RouteTable;

fn css_file_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"\.(css|less|sass|scss|styl|stylus|pcss|postcss|sss)(?:$|\?)").unwrap()
  })
}

fn css_modules_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"\.module\.(css|less|sass|scss|styl|stylus|pcss|postcss|sss)(?:$|\?)").unwrap()
  })
}

pub fn is_css_file(file: &str) -> bool {
  css_file_re().is_match(file)
}

pub fn is_css_modules_file(file: &str) -> bool {
  css_modules_re().is_match(file)
}

/// Compiled output of CSS-modules stylesheets, recorded by the transform hook.
/// Evaluating such a module only yields its class-name map, so the compiled
/// text is captured here instead.
#[derive(Debug, Clone, Default)]
pub struct CssModulesRecords {
  inner: Arc<RwLock<HashMap<String, String>>>,
}

impl CssModulesRecords {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record `code` for `id`. Returns the previous record, if any.
  pub fn record(&self, id: &str, code: String) -> Option<String> {
    let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
    map.insert(id.to_string(), code)
  }

  pub fn get(&self, id: &str) -> Option<String> {
    let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
    map.get(id).cloned()
  }

  pub fn len(&self) -> usize {
    self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stylesheet {
  pub url: String,
  pub content: String,
}

/// Collect stylesheets reachable from `entries` (files or ids), deduplicated,
/// in first-visit order. Entries themselves are not collected.
///
/// Edges come from the node's last SSR transform when it has one, otherwise
/// from its static imports. Only edges the graph already knows are walked;
/// dynamic imports that were never transformed stay unexplored.
pub async fn collect_stylesheets(
  host: &dyn ModuleHost,
  records: &CssModulesRecords,
  entries: &[String],
) -> Vec<Stylesheet> {
  let mut visited: HashSet<String> = HashSet::new();
  let mut order: Vec<ModuleNode> = Vec::new();
  let mut queue: VecDeque<ModuleNode> = VecDeque::new();

  for entry in entries {
    match resolve_entry(host, entry).await {
      Some(node) => {
        if visited.insert(node.id.clone()) {
          queue.push_back(node);
        }
      }
      None => warn!(file = %entry, "could not resolve module for file"),
    }
  }
  let entry_ids: HashSet<String> = visited.clone();

  while let Some(node) = queue.pop_front() {
    for child in import_edges(host, &node).await {
      if visited.insert(child.id.clone()) {
        order.push(child.clone());
        queue.push_back(child);
      }
    }
  }

  let mut styles = Vec::new();
  for dep in order.into_iter().filter(|n| !entry_ids.contains(&n.id)) {
    if !dep.is_stylesheet() {
      continue;
    }
    match load_stylesheet(host, records, &dep).await {
      Ok(content) => styles.push(Stylesheet { url: dep.url, content }),
      Err(e) => warn!(file = %dep.file.as_deref().unwrap_or(&dep.id), "{e}"),
    }
  }
  styles
}

async fn resolve_entry(host: &dyn ModuleHost, file: &str) -> Option<ModuleNode> {
  let normalized = normalize_path(file);
  if let Some(node) = host.module_by_id(&normalized) {
    return Some(node);
  }
  if let Err(e) = host.ensure_entry(&normalized, true).await {
    warn!(file = %file, error = %e, "failed to compile entry");
    return None;
  }
  match host.module_by_id(&normalized) {
    Some(node) => Some(node),
    None => host.module_by_url(&normalized).await,
  }
}

async fn import_edges(host: &dyn ModuleHost, node: &ModuleNode) -> Vec<ModuleNode> {
  let mut out = Vec::new();
  match &node.transform_deps {
    Some(urls) => {
      for url in urls {
        match host.module_by_url(url).await {
          Some(child) => out.push(child),
          None => debug!(from = %node.id, url = %url, "skipping unresolved import"),
        }
      }
    }
    None => {
      for id in &node.imported_ids {
        match host.module_by_id(id) {
          Some(child) => out.push(child),
          None => match host.module_by_url(id).await {
            Some(child) => out.push(child),
            None => debug!(from = %node.id, id = %id, "skipping unresolved import"),
          },
        }
      }
    }
  }
  out
}

async fn load_stylesheet(
  host: &dyn ModuleHost,
  records: &CssModulesRecords,
  node: &ModuleNode,
) -> Result<String, ReviveError> {
  let file = node.file.clone().unwrap_or_else(|| node.id.clone());
  let failure = || ReviveError::StylesheetLoadFailure { file: file.clone() };

  let content = if is_css_modules_file(&file) {
    records.get(&file).or_else(|| records.get(&node.id))
  } else {
    host.load_default_export(&node.url).await.map_err(|_| failure())?
  };
  content.ok_or_else(failure)
}

/// Inline `<style>` text for a list of stylesheets, each preceded by a comment
/// naming its url. `None` when there is nothing to inline.
pub fn render_critical_css(styles: &[Stylesheet]) -> Option<String> {
  if styles.is_empty() {
    return None;
  }
  let mut out = String::new();
  for (i, style) in styles.iter().enumerate() {
    if i > 0 {
      out.push('\n');
    }
    let url = style.url.replace("/*", "/\\*").replace("*/", "*\\/");
    out.push_str(&format!("\n/* {url} */\n"));
    out.push_str(&style.content);
  }
  Some(out)
}

/// Critical CSS for the routes matching `url`.
/// `None` for data requests (`?_data=`) and for urls reaching no stylesheet.
pub async fn styles_for_url(
  host: &dyn ModuleHost,
  routes: &RouteTable,
  app_directory: &Path,
  records: &CssModulesRecords,
  url: Option<&str>,
) -> Option<String> {
  let url = url?;
  if url.contains("?_data=") {
    return None;
  }
  let files: Vec<String> = routes
    .match_routes(url)
    .iter()
    .filter_map(|id| routes.get(id))
    .map(|route| normalize_path(&app_directory.join(&route.file).to_string_lossy()))
    .collect();
  let styles = collect_stylesheets(host, records, &files).await;
  render_critical_css(&styles)
}
