/* src/server/core/rust/src/context.rs */

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::config::ReviveConfig;
use crate::entry::server_entry_code;
use crate::errors::{Result, ReviveError};
use crate::host::ModuleHost;
use crate::manifest::{BuildManifest, DevManifestBuilder, ManifestMode, ProductionManifest};
use crate::route::RouteTable;
use crate::styles::{CssModulesRecords, is_css_modules_file, styles_for_url};
use crate::vmod::{BROWSER_MANIFEST, SERVER_ENTRY, SERVER_MANIFEST, VirtualModuleRegistry, public_id};

fn server_only_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\.server(\.[cm]?[jt]sx?)?$").unwrap())
}

/// Everything one dev server (or one production build) shares: config, the
/// route table, the host graph, and the virtual modules built on top of them.
pub struct ReviveContext {
  config: Arc<ReviveConfig>,
  routes: Arc<RouteTable>,
  host: Arc<dyn ModuleHost>,
  mode: ManifestMode,
  registry: VirtualModuleRegistry,
  records: CssModulesRecords,
  dev_manifest: Arc<DevManifestBuilder>,
  production: Arc<ProductionManifest>,
}

impl ReviveContext {
  pub fn new(config: ReviveConfig, host: Arc<dyn ModuleHost>, mode: ManifestMode) -> Result<Self> {
    let config = Arc::new(config);
    let routes = Arc::new(config.route_table()?);
    let dev_manifest =
      Arc::new(DevManifestBuilder::new(config.clone(), routes.clone(), host.clone()));
    let production = Arc::new(ProductionManifest::new(config.clone(), routes.clone()));
    let mut registry = VirtualModuleRegistry::new(host.clone());

    {
      let (config, routes) = (config.clone(), routes.clone());
      registry.define(
        SERVER_ENTRY,
        Arc::new(move || {
          let (config, routes) = (config.clone(), routes.clone());
          Box::pin(async move { server_entry_code(&config, &routes) })
        }),
      )?;
    }

    {
      let (dev_manifest, production) = (dev_manifest.clone(), production.clone());
      registry.define(
        SERVER_MANIFEST,
        Arc::new(move || {
          let (dev_manifest, production) = (dev_manifest.clone(), production.clone());
          Box::pin(async move {
            let manifest = match mode {
              ManifestMode::Development => dev_manifest.manifest().await,
              ManifestMode::Production => production.get()?,
            };
            manifest.to_server_module()
          })
        }),
      )?;
    }

    {
      let dev_manifest = dev_manifest.clone();
      let global = config.build.manifest_global.clone();
      registry.define(
        BROWSER_MANIFEST,
        Arc::new(move || {
          let (dev_manifest, global) = (dev_manifest.clone(), global.clone());
          Box::pin(async move {
            if mode == ManifestMode::Production {
              return Err(ReviveError::not_available(
                public_id(BROWSER_MANIFEST),
                "this module only exists in development",
              ));
            }
            dev_manifest.manifest().await.to_browser_script(&global)
          })
        }),
      )?;
    }

    Ok(Self {
      config,
      routes,
      host,
      mode,
      registry,
      records: CssModulesRecords::new(),
      dev_manifest,
      production,
    })
  }

  pub fn config(&self) -> &ReviveConfig {
    &self.config
  }

  pub fn routes(&self) -> &RouteTable {
    &self.routes
  }

  pub fn host(&self) -> &Arc<dyn ModuleHost> {
    &self.host
  }

  pub fn mode(&self) -> ManifestMode {
    self.mode
  }

  pub fn registry(&self) -> &VirtualModuleRegistry {
    &self.registry
  }

  pub fn records(&self) -> &CssModulesRecords {
    &self.records
  }

  pub async fn dev_manifest(&self) -> Arc<BuildManifest> {
    self.dev_manifest.manifest().await
  }

  /// Build (once) and persist the production manifest.
  pub async fn build_production_manifest(&self) -> Result<Arc<BuildManifest>> {
    self.production.build(self.host.as_ref()).await
  }

  /// Critical CSS for `url`.
  pub async fn styles_for_url(&self, url: Option<&str>) -> Option<String> {
    styles_for_url(
      self.host.as_ref(),
      &self.routes,
      &self.config.app_directory(),
      &self.records,
      url,
    )
    .await
  }

  /// Per-module transform: records compiled CSS-modules output, and empties
  /// server-only modules for the browser. Returns replacement code, if any.
  pub fn transform_hook(&self, code: &str, id: &str, ssr: bool) -> Option<String> {
    if is_css_modules_file(id) {
      self.records.record(id, code.to_string());
    }
    if !ssr && server_only_re().is_match(id) {
      debug!(id = %id, "emptying server-only module for the browser");
      return Some("export default {}".to_string());
    }
    None
  }
}
