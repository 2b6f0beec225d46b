//! Path buckets and resource name resolution
//!
//! A [`PathConfig`] maps bucket names (`scripts`, `loader`, ...) to URL
//! prefixes. Logical resource names are resolved against a bucket:
//!
//! - `!http://cdn/x.js` is already absolute and only loses its marker
//! - `/raw.js` is origin-absolute and bypasses every configured prefix
//! - `@x.js` is resolved in the bucket named by the `@` alias entry
//! - anything else goes to the requested bucket (default `scripts`), or to
//!   the root prefix when that bucket is not configured

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket holding script resources; the default for resolution.
pub const BUCKET_SCRIPTS: &str = "scripts";

/// Bucket holding the loader's own runtime scripts.
pub const BUCKET_LOADER: &str = "loader";

/// Prefix marking a name as already absolute.
pub const ABSOLUTE_MARKER: char = '!';

/// Prefix selecting the alias bucket.
pub const ALIAS_MARKER: char = '@';

/// Bucket name to prefix table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    /// Root prefix every relative bucket is resolved against
    #[serde(default)]
    pub root: String,

    /// Name of the bucket `@`-prefixed names resolve in
    #[serde(default, rename = "@", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Named buckets
    #[serde(flatten)]
    pub buckets: BTreeMap<String, String>,

    #[serde(skip)]
    normalized: bool,
}

impl PathConfig {
    /// Create a table with the given root prefix and no buckets.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Add or replace a bucket.
    pub fn with_bucket(mut self, name: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.buckets.insert(name.into(), prefix.into());
        self.normalized = false;
        self
    }

    /// Set the bucket `@`-prefixed names resolve in.
    pub fn with_alias(mut self, bucket: impl Into<String>) -> Self {
        self.alias = Some(bucket.into());
        self
    }

    /// Normalize in place.
    ///
    /// The root gets a trailing separator (an empty root stays empty), every
    /// relative bucket is prefixed with the root, every bucket ends in a
    /// separator, and missing `scripts`/`loader` buckets get defaults.
    /// A normalized table is left untouched.
    pub fn configure(&mut self) {
        if self.normalized {
            return;
        }

        let root = self.root.trim().to_string();
        self.root = with_trailing_separator(root);

        for prefix in self.buckets.values_mut() {
            *prefix = normalize_prefix(&self.root, prefix);
        }

        let scripts = self
            .buckets
            .entry(BUCKET_SCRIPTS.to_string())
            .or_insert_with(|| format!("{}scripts/", self.root))
            .clone();
        self.buckets
            .entry(BUCKET_LOADER.to_string())
            .or_insert_with(|| format!("{scripts}loader/"));

        self.normalized = true;
    }

    /// Consume and return the normalized table.
    pub fn configured(mut self) -> Self {
        self.configure();
        self
    }

    /// Whether [`configure`](Self::configure) already ran.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// The root prefix.
    pub fn root_path(&self) -> &str {
        &self.root
    }

    /// Prefix of a bucket; the empty bucket name is the root.
    pub fn prefix(&self, bucket: &str) -> Option<&str> {
        if bucket.is_empty() {
            return Some(&self.root);
        }
        self.buckets.get(bucket).map(String::as_str)
    }

    /// Check if a bucket is configured
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.prefix(bucket).is_some()
    }

    /// Bucket `name` would be resolved in when it is not configured.
    ///
    /// Returns `None` when resolution does not fall back to the root prefix.
    pub fn missing_bucket<'a>(&'a self, name: &str, bucket: Option<&'a str>) -> Option<&'a str> {
        match target(name, bucket) {
            Target::Bucket(bucket) if !self.has_bucket(bucket) => Some(bucket),
            Target::Alias => match self.alias.as_deref() {
                Some(alias) if !self.has_bucket(alias) => Some(alias),
                None => Some("@"),
                _ => None,
            },
            _ => None,
        }
    }

    /// Resolve a logical name to a URL.
    pub fn resolve(&self, name: &str, bucket: Option<&str>) -> String {
        if !self.normalized {
            return self.clone().configured().resolve(name, bucket);
        }

        match target(name, bucket) {
            Target::Absolute => name[ABSOLUTE_MARKER.len_utf8()..].to_string(),
            Target::Origin => format!("/{}", name.trim_start_matches('/')),
            Target::Alias => {
                let dir = self
                    .alias
                    .as_deref()
                    .and_then(|alias| self.prefix(alias))
                    .unwrap_or(&self.root);
                join(dir, &name[ALIAS_MARKER.len_utf8()..])
            }
            Target::Bucket(bucket) => join(self.prefix(bucket).unwrap_or(&self.root), name),
        }
    }

    /// Resolve several names in one bucket.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S], bucket: Option<&str>) -> Vec<String> {
        names
            .iter()
            .map(|name| self.resolve(name.as_ref(), bucket))
            .collect()
    }
}

enum Target<'a> {
    Absolute,
    Origin,
    Alias,
    Bucket(&'a str),
}

fn target<'a>(name: &str, bucket: Option<&'a str>) -> Target<'a> {
    match name.chars().next() {
        Some(ABSOLUTE_MARKER) => Target::Absolute,
        Some('/') => Target::Origin,
        Some(ALIAS_MARKER) => Target::Alias,
        _ => Target::Bucket(bucket.unwrap_or(BUCKET_SCRIPTS)),
    }
}

fn is_absolute(prefix: &str) -> bool {
    prefix.starts_with('/') || prefix.contains("://")
}

fn with_trailing_separator(mut prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

fn normalize_prefix(root: &str, prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return root.to_string();
    }
    if is_absolute(prefix) {
        with_trailing_separator(prefix.to_string())
    } else {
        with_trailing_separator(format!("{root}{prefix}"))
    }
}

fn join(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() || dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_paths() -> PathConfig {
        PathConfig::new("/app/")
            .with_bucket("scripts", "js")
            .configured()
    }

    #[test]
    fn test_resolve_in_scripts_bucket() {
        let paths = app_paths();
        assert_eq!(paths.resolve("foo.js", Some("scripts")), "/app/js/foo.js");
        assert_eq!(paths.resolve("foo.js", None), "/app/js/foo.js");
    }

    #[test]
    fn test_resolve_origin_absolute() {
        let paths = app_paths();
        assert_eq!(paths.resolve("/raw.js", Some("scripts")), "/raw.js");
        assert_eq!(paths.resolve("//raw.js", None), "/raw.js");
    }

    #[test]
    fn test_resolve_absolute_marker() {
        let paths = app_paths();
        assert_eq!(paths.resolve("!http://x", None), "http://x");
        assert_eq!(paths.resolve("!relative.js", Some("images")), "relative.js");
    }

    #[test]
    fn test_resolve_alias_bucket() {
        let paths = PathConfig::new("/app")
            .with_bucket("libs", "vendor/libs")
            .with_alias("libs")
            .configured();
        assert_eq!(paths.resolve("@jquery.js", None), "/app/vendor/libs/jquery.js");
    }

    #[test]
    fn test_resolve_unconfigured_bucket_falls_back_to_root() {
        let paths = app_paths();
        assert_eq!(paths.resolve("logo.png", Some("images")), "/app/logo.png");
        assert_eq!(paths.missing_bucket("logo.png", Some("images")), Some("images"));
        assert_eq!(paths.missing_bucket("foo.js", Some("scripts")), None);
        assert_eq!(paths.missing_bucket("@foo.js", None), Some("@"));
        assert_eq!(paths.missing_bucket("!foo.js", Some("images")), None);
    }

    #[test]
    fn test_resolve_root_bucket() {
        let paths = app_paths();
        assert_eq!(paths.resolve("index.html", Some("")), "/app/index.html");
    }

    #[test]
    fn test_configure_defaults() {
        let paths = PathConfig::default().configured();
        assert_eq!(paths.root_path(), "");
        assert_eq!(paths.prefix("scripts"), Some("scripts/"));
        assert_eq!(paths.prefix("loader"), Some("scripts/loader/"));
        assert_eq!(paths.resolve("main.js", None), "scripts/main.js");
    }

    #[test]
    fn test_configure_normalizes_prefixes() {
        let paths = PathConfig::new("site")
            .with_bucket("images", "img")
            .with_bucket("cdn", "https://cdn.example.com/assets")
            .with_bucket("abs", "/static")
            .with_bucket("empty", "")
            .configured();

        assert_eq!(paths.root_path(), "site/");
        assert_eq!(paths.prefix("images"), Some("site/img/"));
        assert_eq!(paths.prefix("cdn"), Some("https://cdn.example.com/assets/"));
        assert_eq!(paths.prefix("abs"), Some("/static/"));
        assert_eq!(paths.prefix("empty"), Some("site/"));
        assert_eq!(paths.prefix("loader"), Some("site/scripts/loader/"));
    }

    #[test]
    fn test_configure_is_idempotent() {
        let once = app_paths();
        let mut twice = once.clone();
        twice.configure();
        assert_eq!(once, twice);
        assert_eq!(twice.prefix("scripts"), Some("/app/js/"));
    }

    #[test]
    fn test_configure_equivalent_input() {
        let a = PathConfig::new("/app").with_bucket("scripts", "js").configured();
        let b = PathConfig::new("/app/").with_bucket("scripts", "js/").configured();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolve_unnormalized_table() {
        let paths = PathConfig::new("/app").with_bucket("scripts", "js");
        assert_eq!(paths.resolve("foo.js", None), "/app/js/foo.js");
    }

    #[test]
    fn test_resolve_all() {
        let paths = app_paths();
        assert_eq!(
            paths.resolve_all(&["a.js", "b.js"], None),
            vec!["/app/js/a.js".to_string(), "/app/js/b.js".to_string()]
        );
    }

    #[test]
    fn test_deserialize_from_toml_like_json() {
        let paths: PathConfig = serde_json::from_str(
            r#"{ "root": "/app", "scripts": "js", "libs": "lib", "@": "libs" }"#,
        )
        .unwrap();
        assert_eq!(paths.alias.as_deref(), Some("libs"));
        assert!(!paths.is_normalized());

        let paths = paths.configured();
        assert_eq!(paths.resolve("@x.js", None), "/app/lib/x.js");
        assert_eq!(paths.resolve("x.js", None), "/app/js/x.js");
    }
}
