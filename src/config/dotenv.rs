//! The installation's `.env` file.
//!
//! Parsing goes through `dotenvy`'s iterators, which never touch the process
//! environment. Lines it cannot parse are skipped with a warning.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// Keys accepted for the proxy API key, in priority order.
pub const API_KEY_VARS: [&str; 2] = ["API_KEY", "PROXY_API_KEY"];

fn collect<R: std::io::Read>(iter: dotenvy::Iter<R>, origin: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                vars.insert(key, value);
            }
            Err(e) => warn!("skipping line in {origin}: {e}"),
        }
    }
    vars
}

/// Parse dotenv content into a map.
#[must_use]
pub fn parse(content: &str) -> HashMap<String, String> {
    collect(dotenvy::from_read_iter(content.as_bytes()), ".env content")
}

/// Read and parse `path`; a missing file is an empty map.
pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => Ok(collect(iter, &path.display().to_string())),
        Err(e) if e.not_found() => Ok(HashMap::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// First non-empty API key variable.
#[must_use]
pub fn api_key(vars: &HashMap<String, String>) -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|k| vars.get(*k))
        .find(|v| !v.is_empty())
        .cloned()
}

/// Generate a local API key: `sk-` plus a random v4 UUID in simple form.
#[must_use]
pub fn generate_api_key() -> String {
    format!("sk-{}", Uuid::new_v4().simple())
}

/// Render the `.env` written by `install`.
#[must_use]
pub fn render(api_key: &str) -> String {
    format!("# API key clients use to reach the local proxy\nAPI_KEY={api_key}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let vars = parse(
            "# comment\n\
             API_KEY=abc\n\
             export PORT=9000\n\
             QUOTED=\"with # hash\"\n\
             SINGLE='x y'\n\
             ESCAPED=\"a\\nb\"\n\
             garbage\n",
        );
        assert_eq!(vars.get("API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(vars.get("PORT").map(String::as_str), Some("9000"));
        assert_eq!(vars.get("QUOTED").map(String::as_str), Some("with # hash"));
        assert_eq!(vars.get("SINGLE").map(String::as_str), Some("x y"));
        assert_eq!(vars.get("ESCAPED").map(String::as_str), Some("a\nb"));
        assert!(!vars.contains_key("garbage"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load(&dir.path().join(".env")).unwrap().is_empty());

        let path = dir.path().join(".env");
        std::fs::write(&path, render("sk-file")).unwrap();
        assert_eq!(api_key(&load(&path).unwrap()).as_deref(), Some("sk-file"));
    }

    #[test]
    fn test_api_key_priority() {
        let vars = parse("PROXY_API_KEY=second\nAPI_KEY=first\n");
        assert_eq!(api_key(&vars).as_deref(), Some("first"));

        let vars = parse("API_KEY=\nPROXY_API_KEY=second\n");
        assert_eq!(api_key(&vars).as_deref(), Some("second"));

        assert_eq!(api_key(&HashMap::new()), None);
    }

    #[test]
    fn test_generated_keys_are_random() {
        let key = generate_api_key();
        assert!(key.starts_with("sk-"));
        assert_eq!(key.len(), 35);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
        assert_eq!(api_key(&parse(&render(&key))).as_deref(), Some(key.as_str()));
    }
}
