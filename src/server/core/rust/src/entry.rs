/* src/server/core/rust/src/entry.rs */

// Source of the `virtual:server-entry` module: the server build object the
// request handler consumes, wired to every route module by dev-server url.

use std::fmt::Write;

use crate::config::ReviveConfig;
use crate::errors::Result;
use crate::host::fs_url;
use crate::route::RouteTable;
use crate::vmod::{SERVER_MANIFEST, public_id};

fn js_string(value: &str) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

fn js_optional(value: Option<&str>) -> Result<String> {
  match value {
    Some(v) => js_string(v),
    None => Ok("undefined".to_string()),
  }
}

pub fn server_entry_code(config: &ReviveConfig, routes: &RouteTable) -> Result<String> {
  let mut out = String::new();
  let entry_server = fs_url(&config.entry_server_file().to_string_lossy());
  // Writing into a String cannot fail.
  let _ = writeln!(out, "import * as entryServer from {};", js_string(&entry_server)?);
  for (index, route) in routes.iter().enumerate() {
    let url = fs_url(&config.route_file(route).to_string_lossy());
    let _ = writeln!(out, "import * as route{index} from {};", js_string(&url)?);
  }

  let _ = writeln!(
    out,
    "export {{ default as assets }} from {};",
    js_string(&public_id(SERVER_MANIFEST))?
  );
  let _ = writeln!(
    out,
    "export const assetsBuildDirectory = {};",
    js_string(&config.relative_assets_build_directory())?
  );
  if let Some(future) = &config.app.future {
    let _ = writeln!(out, "export const future = {};", serde_json::to_string(future)?);
  }
  let _ = writeln!(out, "export const publicPath = {};", js_string(&config.app.public_path)?);
  let _ = writeln!(out, "export const entry = {{ module: entryServer }};");

  out.push_str("export const routes = {\n");
  for (index, route) in routes.iter().enumerate() {
    let _ = writeln!(
      out,
      "  {}: {{ id: {}, parentId: {}, path: {}, index: {}, caseSensitive: {}, module: route{index} }},",
      js_string(&route.id)?,
      js_string(&route.id)?,
      js_optional(route.parent_id.as_deref())?,
      js_optional(route.path.as_deref())?,
      route.index,
      route.case_sensitive,
    );
  }
  out.push_str("};\n");
  Ok(out)
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;
  use crate::route::RouteDescriptor;

  fn blog_config() -> (ReviveConfig, RouteTable) {
    let config: ReviveConfig = toml::from_str(
      r#"
[[routes]]
id = "root"
path = ""
file = "root.tsx"

[[routes]]
id = "routes/blog"
parent_id = "root"
path = "blog"
file = "routes/blog.tsx"
"#,
    )
    .unwrap();
    let config = config.resolve_paths(Path::new("/srv/site"));
    let routes = config.route_table().unwrap();
    (config, routes)
  }

  #[test]
  fn imports_every_route_by_fs_url() {
    let (config, routes) = blog_config();
    let code = server_entry_code(&config, &routes).unwrap();
    assert!(code.contains("import * as entryServer from \"/@fs/srv/site/app/entry.server.tsx\";"));
    assert!(code.contains("import * as route0 from \"/@fs/srv/site/app/root.tsx\";"));
    assert!(code.contains("import * as route1 from \"/@fs/srv/site/app/routes/blog.tsx\";"));
    assert!(code.contains("export { default as assets } from \"virtual:server-manifest\";"));
    assert!(code.contains("export const assetsBuildDirectory = \"public/build\";"));
    assert!(code.contains("export const publicPath = \"/build/\";"));
  }

  #[test]
  fn route_entries_reference_imports() {
    let (config, routes) = blog_config();
    let code = server_entry_code(&config, &routes).unwrap();
    assert!(code.contains(
      "\"root\": { id: \"root\", parentId: undefined, path: \"\", index: false, caseSensitive: false, module: route0 },"
    ));
    assert!(code.contains("parentId: \"root\", path: \"blog\""));
    assert!(!code.contains("export const future"));
  }

  #[test]
  fn future_flags_are_exported_when_set() {
    let (mut config, _) = blog_config();
    let mut flags = serde_json::Map::new();
    flags.insert("v2_meta".into(), serde_json::Value::Bool(true));
    config.app.future = Some(flags);
    let routes = RouteTable::new([RouteDescriptor {
      id: "root".into(),
      parent_id: None,
      path: None,
      index: false,
      case_sensitive: false,
      file: "root.tsx".into(),
    }])
    .unwrap();
    let code = server_entry_code(&config, &routes).unwrap();
    assert!(code.contains("export const future = {\"v2_meta\":true};"));
    assert!(code.contains("path: undefined"));
  }
}
