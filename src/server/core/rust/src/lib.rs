/* src/server/core/rust/src/lib.rs */

pub mod capabilities;
pub mod config;
pub mod context;
pub mod entry;
pub mod errors;
pub mod hash;
pub mod host;
pub mod manifest;
pub mod memory;
pub mod route;
pub mod script;
pub mod styles;
pub mod vmod;

// Re-exports for ergonomic use
pub use capabilities::{RouteCapabilities, RouteCapability, extract_exports};
pub use config::{ReviveConfig, find_config, load_config};
pub use context::ReviveContext;
pub use entry::server_entry_code;
pub use errors::{HostError, Result, ReviveError};
pub use hash::{content_hash, hash_json};
pub use host::{ModuleHost, ModuleNode, TransformResult, fs_url, is_js_file, normalize_path};
pub use manifest::{
  BuildManifest, DevManifestBuilder, EntryAssets, ManifestEntry, ManifestMode, ProductionManifest,
};
pub use route::{RouteDescriptor, RouteTable};
pub use script::{script_escape_json, to_script_json};
pub use styles::{
  CssModulesRecords, Stylesheet, collect_stylesheets, render_critical_css, styles_for_url,
};
pub use vmod::{ContentProducer, VirtualModule, VirtualModuleRegistry};
