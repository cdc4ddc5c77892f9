/* src/server/core/rust/src/script.rs */

use serde::Serialize;

/// Serialize `value` as JSON that can be embedded in a JS module or an inline `<script>`.
pub fn to_script_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
  let json = serde_json::to_string(value)?;
  Ok(script_escape_json(&json))
}

/// Escape JSON text for inclusion in script source.
///
/// Walks the JSON text tracking whether the current position is inside a
/// string (handling `\"` and `\\`). Inside strings, non-ASCII codepoints and
/// `<` become `\uXXXX` sequences; chars outside the BMP are written as
/// surrogate pairs. This also covers U+2028/U+2029, which are legal in JSON
/// but terminate lines in older JS engines.
pub fn script_escape_json(json: &str) -> String {
  let mut out = String::with_capacity(json.len());
  let mut in_string = false;
  let mut chars = json.chars();

  while let Some(ch) = chars.next() {
    if !in_string {
      if ch == '"' {
        in_string = true;
      }
      out.push(ch);
      continue;
    }
    match ch {
      '\\' => {
        out.push(ch);
        if let Some(next) = chars.next() {
          out.push(next);
        }
      }
      '"' => {
        in_string = false;
        out.push(ch);
      }
      '<' => out.push_str("\\u003c"),
      c if c as u32 > 0x7F => {
        let code = c as u32;
        if code > 0xFFFF {
          let adjusted = code - 0x1_0000;
          let hi = (adjusted >> 10) + 0xD800;
          let lo = (adjusted & 0x3FF) + 0xDC00;
          out.push_str(&format!("\\u{hi:04x}\\u{lo:04x}"));
        } else {
          out.push_str(&format!("\\u{code:04x}"));
        }
      }
      c => out.push(c),
    }
  }
  out
}
