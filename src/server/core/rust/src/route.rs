/* src/server/core/rust/src/route.rs */

// Resolved route table plus the url -> route-branch matcher used for style collection.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ReviveError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
  pub id: String,
  #[serde(default, alias = "parent_id", skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(default)]
  pub index: bool,
  #[serde(default, alias = "case_sensitive")]
  pub case_sensitive: bool,
  /// Source file, relative to the app directory.
  pub file: String,
}

/// Immutable, validated route table keyed by route id.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
  routes: BTreeMap<String, RouteDescriptor>,
  children: HashMap<String, Vec<String>>,
  roots: Vec<String>,
}

impl RouteTable {
  pub fn new(routes: impl IntoIterator<Item = RouteDescriptor>) -> Result<Self> {
    let mut map = BTreeMap::new();
    for route in routes {
      if map.contains_key(&route.id) {
        return Err(ReviveError::InvalidRouteTable(format!("duplicate route id \"{}\"", route.id)));
      }
      map.insert(route.id.clone(), route);
    }

    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots = Vec::new();
    for route in map.values() {
      match &route.parent_id {
        Some(parent) if !map.contains_key(parent) => {
          return Err(ReviveError::InvalidRouteTable(format!(
            "route \"{}\" references unknown parent \"{parent}\"",
            route.id
          )));
        }
        Some(parent) => children.entry(parent.clone()).or_default().push(route.id.clone()),
        None => roots.push(route.id.clone()),
      }
    }
    if !map.is_empty() && roots.is_empty() {
      return Err(ReviveError::InvalidRouteTable("no root route (every route has a parent)".into()));
    }

    Ok(Self { routes: map, children, roots })
  }

  pub fn get(&self, id: &str) -> Option<&RouteDescriptor> {
    self.routes.get(id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
    self.routes.values()
  }

  pub fn len(&self) -> usize {
    self.routes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.routes.is_empty()
  }

  pub fn children_of(&self, id: &str) -> &[String] {
    self.children.get(id).map_or(&[], Vec::as_slice)
  }

  /// Ordered root -> leaf route ids of the best branch matching `url`.
  /// Empty when nothing matches.
  pub fn match_routes(&self, url: &str) -> Vec<String> {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut best: Option<(i32, Vec<String>)> = None;
    for root in &self.roots {
      let mut branch = Vec::new();
      self.match_branch(root, &segments, 0, &mut branch, &mut best);
    }
    best.map(|(_, ids)| ids).unwrap_or_default()
  }

  fn match_branch(
    &self,
    id: &str,
    remaining: &[&str],
    score: i32,
    branch: &mut Vec<String>,
    best: &mut Option<(i32, Vec<String>)>,
  ) {
    let Some(route) = self.routes.get(id) else { return };

    if route.index {
      if remaining.is_empty() {
        branch.push(route.id.clone());
        consider(score + 2, branch, best);
        branch.pop();
      }
      return;
    }

    let pattern = route.path.as_deref().unwrap_or("");
    for (rest, gained) in match_pattern(pattern, remaining, route.case_sensitive) {
      branch.push(route.id.clone());
      let score = score + gained;
      let children = self.children_of(id);
      if rest.is_empty() {
        consider(score, branch, best);
      }
      for child in children {
        self.match_branch(child, rest, score, branch, best);
      }
      branch.pop();
    }
  }
}

fn consider(score: i32, branch: &[String], best: &mut Option<(i32, Vec<String>)>) {
  let better = match best {
    Some((current, _)) => score > *current,
    None => true,
  };
  if better {
    *best = Some((score, branch.to_vec()));
  }
}

/// Every way `pattern` can consume a prefix of `segments`, as (rest, score gained).
fn match_pattern<'a, 'b>(
  pattern: &str,
  segments: &'b [&'a str],
  case_sensitive: bool,
) -> Vec<(&'b [&'a str], i32)> {
  let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
  let mut states: Vec<(usize, i32)> = vec![(0, 0)];

  for part in &parts {
    let mut next = Vec::new();
    for (pos, score) in states {
      if *part == "*" {
        // Splat swallows everything left, including nothing.
        next.push((segments.len(), score - 1));
        continue;
      }
      if let Some(name) = part.strip_prefix(':') {
        let optional = name.ends_with('?');
        if optional {
          next.push((pos, score));
        }
        if pos < segments.len() {
          next.push((pos + 1, score + 3));
        }
        continue;
      }
      let (static_part, optional) = match part.strip_suffix('?') {
        Some(p) => (p, true),
        None => (*part, false),
      };
      if optional {
        next.push((pos, score));
      }
      if let Some(segment) = segments.get(pos) {
        let eq = if case_sensitive {
          *segment == static_part
        } else {
          segment.eq_ignore_ascii_case(static_part)
        };
        if eq {
          next.push((pos + 1, score + 10));
        }
      }
    }
    states = next;
    if states.is_empty() {
      break;
    }
  }

  states.into_iter().map(|(pos, score)| (&segments[pos..], score)).collect()
}
