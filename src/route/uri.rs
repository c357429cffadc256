use std::fmt;

/// A request URI in registry form: a host optionally followed by
/// `/`-separated path segments.
///
/// Raw request URIs are normalized with [`Uri::route_key`] before they touch
/// the trie; keys compare byte-exact after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri(String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalizes into the trie key: lowercases host and path, drops the
    /// query and fragment, and strips a single trailing slash. A bare `/`
    /// is kept as-is so the key never collapses to the empty string.
    pub fn route_key(&self) -> Uri {
        let mut key = self.0.to_lowercase();
        if let Some(idx) = key.find('?') {
            key.truncate(idx);
        }
        if let Some(idx) = key.find('#') {
            key.truncate(idx);
        }
        if key.len() > 1 && key.ends_with('/') {
            key.pop();
        }
        Uri(key)
    }

    /// Returns the next, most specific wildcard fallback for this key, or
    /// `None` once the fallback chain is exhausted.
    ///
    /// Path segments are stripped one at a time from the right; once only
    /// the host remains, the leftmost host label is replaced with `*` and
    /// then consumed label by label (`a.b.c` -> `*.b.c` -> `*.c` -> done).
    pub fn next_wildcard(&self) -> Option<Uri> {
        if let Some(idx) = self.0.rfind('/') {
            return Some(Uri(self.0[..idx].to_string()));
        }

        let host = self.0.strip_prefix("*.").unwrap_or(&self.0);
        let (_, rest) = host.split_once('.')?;
        if rest.is_empty() {
            return None;
        }
        Some(Uri(format!("*.{rest}")))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri(s.to_string())
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Uri(s)
    }
}
