/* src/server/core/rust/src/hash.rs */

// Content hashing used for cache-busting file names.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of `source` as lowercase hex, truncated to `max_len` characters when given.
pub fn content_hash(source: impl AsRef<[u8]>, max_len: Option<usize>) -> String {
  let digest = Sha256::digest(source.as_ref());
  let mut hex = hex::encode(digest);
  if let Some(len) = max_len {
    hex.truncate(len);
  }
  hex
}

/// Hash the compact JSON form of `value`.
/// Field order follows struct declaration order and `BTreeMap` key order,
/// so equal values hash equally across processes.
pub fn hash_json<T: Serialize>(value: &T, max_len: Option<usize>) -> serde_json::Result<String> {
  let json = serde_json::to_vec(value)?;
  Ok(content_hash(json, max_len))
}
