/* src/server/core/rust/src/config.rs */

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Result, ReviveError};
use crate::host::normalize_path;
use crate::route::{RouteDescriptor, RouteTable};

pub const CONFIG_FILE: &str = "revive.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviveConfig {
  #[serde(default)]
  pub app: AppSection,
  #[serde(default)]
  pub dev: DevSection,
  #[serde(default)]
  pub build: BuildSection,
  #[serde(default)]
  pub routes: Vec<RouteDescriptor>,
  /// Directory holding `revive.toml`; relative paths resolve against it.
  #[serde(skip)]
  root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
  #[serde(default = "default_app_directory")]
  pub directory: String,
  #[serde(default = "default_entry_client")]
  pub entry_client: String,
  #[serde(default = "default_entry_server")]
  pub entry_server: String,
  #[serde(default = "default_assets_build_directory")]
  pub assets_build_directory: String,
  #[serde(default = "default_public_path")]
  pub public_path: String,
  /// Feature flags handed through to the server entry untouched.
  #[serde(default)]
  pub future: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for AppSection {
  fn default() -> Self {
    Self {
      directory: default_app_directory(),
      entry_client: default_entry_client(),
      entry_server: default_entry_server(),
      assets_build_directory: default_assets_build_directory(),
      public_path: default_public_path(),
      future: None,
    }
  }
}

fn default_app_directory() -> String {
  "app".to_string()
}

fn default_entry_client() -> String {
  "entry.client.tsx".to_string()
}

fn default_entry_server() -> String {
  "entry.server.tsx".to_string()
}

fn default_assets_build_directory() -> String {
  "public/build".to_string()
}

fn default_public_path() -> String {
  "/build/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevSection {
  /// Request body limit in bytes; 0 disables the limit for undeclared lengths.
  #[serde(default = "default_body_size_limit")]
  pub body_size_limit: u64,
  #[serde(default)]
  pub coalesce_manifest: bool,
  /// Body chunks buffered ahead of the consumer before the source is paused.
  #[serde(default = "default_high_water_mark")]
  pub high_water_mark: usize,
}

impl Default for DevSection {
  fn default() -> Self {
    Self {
      body_size_limit: default_body_size_limit(),
      coalesce_manifest: false,
      high_water_mark: default_high_water_mark(),
    }
  }
}

fn default_body_size_limit() -> u64 {
  512 * 1024
}

fn default_high_water_mark() -> usize {
  16
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildSection {
  #[serde(default = "default_manifest_hash_length")]
  pub manifest_hash_length: usize,
  #[serde(default = "default_manifest_global")]
  pub manifest_global: String,
}

impl Default for BuildSection {
  fn default() -> Self {
    Self {
      manifest_hash_length: default_manifest_hash_length(),
      manifest_global: default_manifest_global(),
    }
  }
}

fn default_manifest_hash_length() -> usize {
  8
}

fn default_manifest_global() -> String {
  "__remixManifest".to_string()
}

impl ReviveConfig {
  /// Anchor relative paths at `root`.
  pub fn resolve_paths(mut self, root: &Path) -> Self {
    self.root = root.to_path_buf();
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn app_directory(&self) -> PathBuf {
    self.root.join(&self.app.directory)
  }

  pub fn assets_build_directory(&self) -> PathBuf {
    self.root.join(&self.app.assets_build_directory)
  }

  /// Assets directory as written in the config, forward-slashed.
  pub fn relative_assets_build_directory(&self) -> String {
    normalize_path(&self.app.assets_build_directory)
  }

  pub fn entry_client_file(&self) -> PathBuf {
    self.app_directory().join(&self.app.entry_client)
  }

  pub fn entry_server_file(&self) -> PathBuf {
    self.app_directory().join(&self.app.entry_server)
  }

  /// Absolute source file of a route module.
  pub fn route_file(&self, route: &RouteDescriptor) -> PathBuf {
    self.app_directory().join(&route.file)
  }

  pub fn route_table(&self) -> Result<RouteTable> {
    RouteTable::new(self.routes.iter().cloned())
  }

  fn validate(&self, path: &Path) -> Result<()> {
    let invalid = |message: &str| ReviveError::Config { path: path.to_path_buf(), message: message.into() };
    if self.dev.high_water_mark == 0 {
      return Err(invalid("dev.high_water_mark must be at least 1"));
    }
    if !(1..=64).contains(&self.build.manifest_hash_length) {
      return Err(invalid("build.manifest_hash_length must be between 1 and 64"));
    }
    if self.build.manifest_global.is_empty() {
      return Err(invalid("build.manifest_global must not be empty"));
    }
    if !self.app.public_path.ends_with('/') {
      return Err(invalid("app.public_path must end with '/'"));
    }
    self.route_table()?;
    Ok(())
  }
}

/// Walk upward from `start` to find `revive.toml`.
pub fn find_config(start: &Path) -> Result<PathBuf> {
  let mut dir = start.canonicalize().map_err(|e| ReviveError::io(start, e))?;
  loop {
    let candidate = dir.join(CONFIG_FILE);
    if candidate.is_file() {
      return Ok(candidate);
    }
    if !dir.pop() {
      return Err(ReviveError::Config {
        path: start.to_path_buf(),
        message: format!("{CONFIG_FILE} not found (searched upward)"),
      });
    }
  }
}

/// Parse, validate and anchor a config file at its own directory.
pub fn load_config(path: &Path) -> Result<ReviveConfig> {
  let content = std::fs::read_to_string(path).map_err(|e| ReviveError::io(path, e))?;
  let config: ReviveConfig = toml::from_str(&content)
    .map_err(|e| ReviveError::Config { path: path.to_path_buf(), message: e.to_string() })?;
  config.validate(path)?;
  let root = path.parent().unwrap_or(Path::new("."));
  Ok(config.resolve_paths(root))
}

#[cfg(test)]
mod tests {
  use super::*;

  const BLOG: &str = r#"
[app]
public_path = "/assets/"

[dev]
body_size_limit = 1024

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

  #[test]
  fn defaults_fill_missing_sections() {
    let config: ReviveConfig = toml::from_str("").unwrap();
    assert_eq!(config.app.directory, "app");
    assert_eq!(config.app.public_path, "/build/");
    assert_eq!(config.dev.body_size_limit, 512 * 1024);
    assert_eq!(config.dev.high_water_mark, 16);
    assert!(!config.dev.coalesce_manifest);
    assert_eq!(config.build.manifest_hash_length, 8);
    assert_eq!(config.build.manifest_global, "__remixManifest");
    assert!(config.routes.is_empty());
  }

  #[test]
  fn parses_routes_and_overrides() {
    let config: ReviveConfig = toml::from_str(BLOG).unwrap();
    assert_eq!(config.app.public_path, "/assets/");
    assert_eq!(config.dev.body_size_limit, 1024);
    let table = config.route_table().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get("routes/blog").unwrap().parent_id.as_deref(), Some("root"));
  }

  #[test]
  fn future_flags_pass_through() {
    let config: ReviveConfig = toml::from_str("[app.future]\nv2_meta = true\n").unwrap();
    let future = config.app.future.unwrap();
    assert_eq!(future.get("v2_meta"), Some(&serde_json::Value::Bool(true)));
  }

  #[test]
  fn find_walks_upward_and_load_anchors_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE), BLOG).unwrap();
    let nested = dir.path().join("app/routes");
    std::fs::create_dir_all(&nested).unwrap();

    let found = find_config(&nested).unwrap();
    assert_eq!(found, dir.path().canonicalize().unwrap().join(CONFIG_FILE));

    let config = load_config(&found).unwrap();
    let root = dir.path().canonicalize().unwrap();
    assert_eq!(config.root(), root);
    assert_eq!(config.app_directory(), root.join("app"));
    assert_eq!(config.assets_build_directory(), root.join("public/build"));
    assert_eq!(config.entry_client_file(), root.join("app/entry.client.tsx"));
    assert_eq!(config.relative_assets_build_directory(), "public/build");
  }

  #[test]
  fn missing_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = find_config(dir.path()).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
  }

  #[test]
  fn rejects_unknown_parent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE);
    std::fs::write(
      &path,
      "[[routes]]\nid = \"root\"\nfile = \"root.tsx\"\n\n[[routes]]\nid = \"a\"\nparent_id = \"nope\"\nfile = \"a.tsx\"\n",
    )
    .unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, ReviveError::InvalidRouteTable(_)));
  }

  #[test]
  fn rejects_zero_high_water_mark() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE);
    std::fs::write(&path, "[dev]\nhigh_water_mark = 0\n").unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("high_water_mark"));
  }
}
