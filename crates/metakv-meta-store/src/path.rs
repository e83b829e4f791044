//! Key namespacing under a root path
//!
//! Backend keys are `<root>/<logical>`. Prefix matching stays plain
//! byte-prefix matching: the prefix `test1` covers `test1/a` and `test1a`.

use metakv_common::{Error, Result};

const SEPARATOR: char = '/';

/// Translates logical keys to and from backend keys under one root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath {
    root: String,
    // `root + "/"`, the byte prefix every namespaced key starts with
    scope: String,
}

impl KeyPath {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches(SEPARATOR).to_string();
        let scope = format!("{root}{SEPARATOR}");
        Self { root, scope }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Backend key for an exact logical key; the empty key is the root itself.
    pub fn to_backend_key(&self, key: &str) -> String {
        if key.is_empty() {
            self.root.clone()
        } else {
            format!("{}{key}", self.scope)
        }
    }

    /// Backend prefix covering every logical key starting with `prefix`.
    pub fn prefix_key(&self, prefix: &str) -> String {
        format!("{}{prefix}", self.scope)
    }

    /// Strip the root off a backend key.
    pub fn to_logical_key(&self, backend_key: &[u8]) -> Result<String> {
        let key = std::str::from_utf8(backend_key).map_err(|_| {
            Error::InvalidKey(format!(
                "backend key is not UTF-8: {}",
                String::from_utf8_lossy(backend_key)
            ))
        })?;
        if key == self.root {
            return Ok(String::new());
        }
        key.strip_prefix(self.scope.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidKey(format!("{key} is outside root {}", self.root)))
    }

    /// Full backend path for a logical key
    pub fn get_path(&self, key: &str) -> String {
        self.to_backend_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_key() {
        let path = KeyPath::new("/meta/root");
        assert_eq!(path.to_backend_key("a/b"), "/meta/root/a/b");
        assert_eq!(path.to_backend_key(""), "/meta/root");
        assert_eq!(path.prefix_key(""), "/meta/root/");
        assert_eq!(path.prefix_key("test1"), "/meta/root/test1");
        assert_eq!(path.get_path("x"), "/meta/root/x");
    }

    #[test]
    fn test_trailing_separator_trimmed() {
        let path = KeyPath::new("/meta/root//");
        assert_eq!(path.root(), "/meta/root");
        assert_eq!(path.to_backend_key("k"), "/meta/root/k");
    }

    #[test]
    fn test_logical_key() {
        let path = KeyPath::new("/meta/root");
        assert_eq!(path.to_logical_key(b"/meta/root/a/b").unwrap(), "a/b");
        assert_eq!(path.to_logical_key(b"/meta/root").unwrap(), "");
        assert!(matches!(
            path.to_logical_key(b"/meta/rootx/a"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            path.to_logical_key(b"/meta/root/\xff"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_separator_in_key_is_plain_text() {
        let path = KeyPath::new("/r");
        let key = path.to_backend_key("x//y/");
        assert_eq!(key, "/r/x//y/");
        assert_eq!(path.to_logical_key(key.as_bytes()).unwrap(), "x//y/");
    }
}
