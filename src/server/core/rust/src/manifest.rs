/* src/server/core/rust/src/manifest.rs */

// Build manifest: which module, imports and stylesheets each route needs in
// the browser, plus the capability flags the client router relies on.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::capabilities::{RouteCapabilities, extract_exports};
use crate::config::ReviveConfig;
use crate::errors::{Result, ReviveError};
use crate::hash::hash_json;
use crate::host::{ModuleHost, fs_url, is_js_file, normalize_path};
use crate::route::{RouteDescriptor, RouteTable};
use crate::script::to_script_json;
use crate::vmod::{BROWSER_MANIFEST, dev_url, public_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMode {
  Development,
  Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAssets {
  pub module: String,
  pub imports: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub css: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(default, skip_serializing_if = "is_false")]
  pub index: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub case_sensitive: bool,
  pub module: String,
  pub imports: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub css: Option<Vec<String>>,
  pub has_action: bool,
  pub has_loader: bool,
  pub has_error_boundary: bool,
}

fn is_false(value: &bool) -> bool {
  !*value
}

impl ManifestEntry {
  fn new(route: &RouteDescriptor, module: String, capabilities: &RouteCapabilities) -> Self {
    Self {
      id: route.id.clone(),
      parent_id: route.parent_id.clone(),
      path: route.path.clone(),
      index: route.index,
      case_sensitive: route.case_sensitive,
      module,
      imports: Vec::new(),
      css: None,
      has_action: capabilities.has_action(),
      has_loader: capabilities.has_loader(),
      has_error_boundary: capabilities.has_error_boundary(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
  pub version: String,
  pub url: String,
  pub entry: EntryAssets,
  pub routes: BTreeMap<String, ManifestEntry>,
}

/// The part of a manifest its version is derived from.
#[derive(Serialize)]
struct Fingerprint<'a> {
  entry: &'a EntryAssets,
  routes: &'a BTreeMap<String, ManifestEntry>,
}

impl BuildManifest {
  /// `export default <json>;` for the server-side manifest module.
  pub fn to_server_module(&self) -> Result<String> {
    Ok(format!("export default {};", to_script_json(self)?))
  }

  /// `window.<global>=<json>;` as loaded by the browser.
  pub fn to_browser_script(&self, global: &str) -> Result<String> {
    Ok(format!("window.{global}={};", to_script_json(self)?))
  }
}

/// One entry of the bundler's `manifest.json`, keyed by project-relative source path.
#[derive(Debug, Clone, Deserialize)]
pub struct BundlerManifestEntry {
  pub file: String,
  #[serde(default)]
  pub imports: Vec<String>,
  #[serde(default)]
  pub css: Vec<String>,
}

pub type BundlerManifest = HashMap<String, BundlerManifestEntry>;

pub async fn read_bundler_manifest(path: &Path) -> Result<BundlerManifest> {
  let content = match tokio::fs::read_to_string(path).await {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      return Err(ReviveError::PhysicalManifestMissing { path: path.to_path_buf() });
    }
    Err(e) => return Err(ReviveError::io(path, e)),
  };
  Ok(serde_json::from_str(&content)?)
}

struct BuildAssets {
  module: String,
  imports: Vec<String>,
  css: Vec<String>,
}

/// Key the bundler uses for `file`: its path relative to the project root.
fn bundler_key(root: &Path, file: &Path) -> String {
  let root = normalize_path(&root.to_string_lossy());
  let file = normalize_path(&file.to_string_lossy());
  let prefix = if root.ends_with('/') { root } else { format!("{root}/") };
  let relative = file.strip_prefix(prefix.as_str()).map(str::to_string);
  relative.unwrap_or(file)
}

/// Physical module, transitive imports and stylesheets for one source file.
/// Imports and css are deduplicated in first-visit order.
fn resolve_build_assets(
  manifest: &BundlerManifest,
  key: &str,
  public_path: &str,
) -> Option<BuildAssets> {
  let entry = manifest.get(key)?;
  let mut imports = Vec::new();
  let mut css = Vec::new();
  let mut seen_css = HashSet::new();
  let mut visited = HashSet::from([key.to_string()]);
  let mut queue: VecDeque<&BundlerManifestEntry> = VecDeque::from([entry]);

  while let Some(current) = queue.pop_front() {
    for sheet in &current.css {
      if seen_css.insert(sheet.clone()) {
        css.push(format!("{public_path}{sheet}"));
      }
    }
    for import in &current.imports {
      if !visited.insert(import.clone()) {
        continue;
      }
      match manifest.get(import) {
        Some(chunk) => {
          imports.push(format!("{public_path}{}", chunk.file));
          queue.push_back(chunk);
        }
        None => warn!(from = %key, import = %import, "import missing from bundler manifest"),
      }
    }
  }

  Some(BuildAssets { module: format!("{public_path}{}", entry.file), imports, css })
}

/// Compile a route module for SSR and read its export names.
async fn route_capabilities(
  host: &dyn ModuleHost,
  route: &RouteDescriptor,
  file: &Path,
) -> Result<RouteCapabilities> {
  let unresolvable = |reason: String| ReviveError::RouteModuleUnresolvable {
    route_id: route.id.clone(),
    file: file.display().to_string(),
    reason,
  };
  let url = fs_url(&file.to_string_lossy());
  let compiled = host.transform_request(&url, true).await.map_err(|e| unresolvable(e.to_string()))?;
  let Some(compiled) = compiled else {
    return Err(unresolvable("no route module code found".into()));
  };
  let exports = extract_exports(&compiled.code);
  Ok(RouteCapabilities::from_exports(exports.as_slice()))
}

/// Production manifest, built once from the bundler output and then frozen.
pub struct ProductionManifest {
  config: Arc<ReviveConfig>,
  routes: Arc<RouteTable>,
  built: OnceLock<Arc<BuildManifest>>,
}

impl ProductionManifest {
  pub fn new(config: Arc<ReviveConfig>, routes: Arc<RouteTable>) -> Self {
    Self { config, routes, built: OnceLock::new() }
  }

  /// Manifest produced by [`build`](Self::build), or `ModuleNotAvailable`
  /// when the asset build has not finished yet.
  pub fn get(&self) -> Result<Arc<BuildManifest>> {
    self.built.get().cloned().ok_or_else(|| {
      ReviveError::not_available("virtual:server-manifest", "requested before the build finished")
    })
  }

  /// Read the bundler manifest, assemble and version the build manifest, and
  /// write `manifest-<version>.js`. Every failure is fatal.
  pub async fn build(&self, host: &dyn ModuleHost) -> Result<Arc<BuildManifest>> {
    if let Some(done) = self.built.get() {
      return Ok(done.clone());
    }
    let config = &self.config;
    let public_path = config.app.public_path.as_str();
    let assets_dir = config.assets_build_directory();
    let bundler = read_bundler_manifest(&assets_dir.join("manifest.json")).await?;

    let entry_file = config.entry_client_file();
    let entry_key = bundler_key(config.root(), &entry_file);
    let entry_assets = resolve_build_assets(&bundler, &entry_key, public_path).ok_or_else(|| {
      ReviveError::RouteModuleUnresolvable {
        route_id: "entry.client".into(),
        file: entry_key.clone(),
        reason: "not present in the bundler manifest".into(),
      }
    })?;
    let entry = EntryAssets {
      module: entry_assets.module,
      imports: entry_assets.imports,
      css: Some(entry_assets.css),
    };

    let mut routes = BTreeMap::new();
    for route in self.routes.iter() {
      let file = config.route_file(route);
      let capabilities = route_capabilities(host, route, &file).await?;
      let key = bundler_key(config.root(), &file);
      let assets = resolve_build_assets(&bundler, &key, public_path).ok_or_else(|| {
        ReviveError::RouteModuleUnresolvable {
          route_id: route.id.clone(),
          file: key.clone(),
          reason: "not present in the bundler manifest".into(),
        }
      })?;
      let mut manifest_entry = ManifestEntry::new(route, assets.module, &capabilities);
      manifest_entry.imports = assets.imports;
      manifest_entry.css = Some(assets.css);
      routes.insert(route.id.clone(), manifest_entry);
    }

    let version = hash_json(
      &Fingerprint { entry: &entry, routes: &routes },
      Some(config.build.manifest_hash_length),
    )?;
    let out = manifest_file_path(&assets_dir, &version);
    let url = format!("{public_path}manifest-{version}.js");
    let manifest = BuildManifest { version, url, entry, routes };

    write_file_safe(&out, &manifest.to_browser_script(&config.build.manifest_global)?).await?;
    debug!(path = %out.display(), "wrote build manifest");

    Ok(self.built.get_or_init(|| Arc::new(manifest)).clone())
  }
}

async fn write_file_safe(path: &Path, contents: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent).await.map_err(|e| ReviveError::io(parent, e))?;
  }
  tokio::fs::write(path, contents).await.map_err(|e| ReviveError::io(path, e))
}

/// Development manifest, recomputed from the live graph on every call.
pub struct DevManifestBuilder {
  config: Arc<ReviveConfig>,
  routes: Arc<RouteTable>,
  host: Arc<dyn ModuleHost>,
  /// Last manifest and the source generation it was built at, when coalescing.
  shared: Option<Mutex<Option<(u64, Arc<BuildManifest>)>>>,
}

impl DevManifestBuilder {
  pub fn new(config: Arc<ReviveConfig>, routes: Arc<RouteTable>, host: Arc<dyn ModuleHost>) -> Self {
    let shared = config.dev.coalesce_manifest.then(|| Mutex::new(None));
    Self { config, routes, host, shared }
  }

  /// Current manifest. With coalescing enabled and a host that tracks source
  /// generations, callers at the same generation share one computation.
  pub async fn manifest(&self) -> Arc<BuildManifest> {
    let (Some(shared), Some(generation)) = (&self.shared, self.host.source_generation()) else {
      return Arc::new(self.compute().await);
    };
    let mut slot = shared.lock().await;
    if let Some((built_at, manifest)) = slot.as_ref()
      && *built_at == generation
    {
      return manifest.clone();
    }
    let manifest = Arc::new(self.compute().await);
    *slot = Some((generation, manifest.clone()));
    manifest
  }

  async fn compute(&self) -> BuildManifest {
    let mut routes = BTreeMap::new();
    for route in self.routes.iter() {
      let file = self.config.route_file(route);
      let capabilities = match route_capabilities(self.host.as_ref(), route, &file).await {
        Ok(capabilities) => capabilities,
        Err(e) => {
          warn!(route = %route.id, "{e}");
          RouteCapabilities::default()
        }
      };
      routes.insert(route.id.clone(), ManifestEntry::new(route, dev_module_url(&file), &capabilities));
    }

    BuildManifest {
      version: random_version(),
      url: dev_url(&public_id(BROWSER_MANIFEST)),
      entry: EntryAssets {
        module: dev_module_url(&self.config.entry_client_file()),
        imports: Vec::new(),
        css: None,
      },
      routes,
    }
  }
}

/// Dev-server url of a source file; non-JS sources get `?import` so the dev
/// server answers with a JS module.
pub fn dev_module_url(file: &Path) -> String {
  let path = file.to_string_lossy();
  let url = fs_url(&path);
  if is_js_file(&path) { url } else { format!("{url}?import") }
}

fn random_version() -> String {
  hex::encode(rand::random::<[u8; 8]>())
}

/// Absolute path of the manifest file for a given version.
pub fn manifest_file_path(assets_dir: &Path, version: &str) -> PathBuf {
  assets_dir.join(format!("manifest-{version}.js"))
}
