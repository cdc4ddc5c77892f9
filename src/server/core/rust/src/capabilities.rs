/* src/server/core/rust/src/capabilities.rs */

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Well-known exports a route module may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteCapability {
  Loader,
  Action,
  ErrorBoundary,
  Headers,
  Meta,
  Links,
  Handle,
  ShouldRevalidate,
  Component,
}

impl RouteCapability {
  pub const ALL: [Self; 9] = [
    Self::Loader,
    Self::Action,
    Self::ErrorBoundary,
    Self::Headers,
    Self::Meta,
    Self::Links,
    Self::Handle,
    Self::ShouldRevalidate,
    Self::Component,
  ];

  pub fn export_name(self) -> &'static str {
    match self {
      Self::Loader => "loader",
      Self::Action => "action",
      Self::ErrorBoundary => "ErrorBoundary",
      Self::Headers => "headers",
      Self::Meta => "meta",
      Self::Links => "links",
      Self::Handle => "handle",
      Self::ShouldRevalidate => "shouldRevalidate",
      Self::Component => "default",
    }
  }

  pub fn from_export_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.export_name() == name)
  }
}

/// Capability set derived from a route module's exported names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCapabilities(BTreeSet<RouteCapability>);

impl RouteCapabilities {
  pub fn from_exports<S: AsRef<str>>(exports: &[S]) -> Self {
    Self(exports.iter().filter_map(|e| RouteCapability::from_export_name(e.as_ref())).collect())
  }

  pub fn has(&self, capability: RouteCapability) -> bool {
    self.0.contains(&capability)
  }

  pub fn has_loader(&self) -> bool {
    self.has(RouteCapability::Loader)
  }

  pub fn has_action(&self) -> bool {
    self.has(RouteCapability::Action)
  }

  pub fn has_error_boundary(&self) -> bool {
    self.has(RouteCapability::ErrorBoundary)
  }

  pub fn iter(&self) -> impl Iterator<Item = RouteCapability> + '_ {
    self.0.iter().copied()
  }
}

// `Object.defineProperty(__vite_ssr_exports__, "loader", ...)`
fn define_property_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r#"Object\.defineProperty\(__vite_ssr_exports__,\s*['"](\w+)['"]"#).unwrap()
  })
}

// `__vite_ssr_exports__.default = ...`
fn assignment_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"__vite_ssr_exports__\.(\w+)\s*=\s*[^=]").unwrap())
}

/// Export names declared by SSR-compiled module code.
pub fn extract_exports(code: &str) -> Vec<String> {
  let defined = define_property_re().captures_iter(code).map(|c| c[1].to_string());
  let assigned = assignment_re().captures_iter(code).map(|c| c[1].to_string());
  let mut out: Vec<String> = Vec::new();
  for name in defined.chain(assigned) {
    if !out.contains(&name) {
      out.push(name);
    }
  }
  out
}
