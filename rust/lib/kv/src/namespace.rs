use std::sync::Arc;

use crate::error::KVError;
use crate::traits::KVStore;

/// Scopes an inner store to one namespace by prefixing every key with
/// `"{namespace}:"`. Scans and prefix deletes never see other namespaces.
pub struct Namespaced {
    inner: Arc<dyn KVStore>,
    prefix: String,
}

impl Namespaced {
    pub fn new(inner: Arc<dyn KVStore>, namespace: &str) -> Self {
        Self {
            inner,
            prefix: format!("{namespace}:"),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl KVStore for Namespaced {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError> {
        self.inner.get(&self.key(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError> {
        self.inner.set(&self.key(key), value)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.inner.delete(&self.key(key))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError> {
        let entries = self.inner.scan(&self.key(prefix))?;
        Ok(entries
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_string(), v))
            .collect())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, KVError> {
        self.inner.delete_prefix(&self.key(prefix))
    }
}

/// Derive a storage namespace from a server URL: scheme, host and port,
/// lowercased, without path or trailing slash.
///
/// `https://API.example.com/v1/` → `https://api.example.com`
pub fn origin_namespace(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("http".to_string(), url),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    // Drop userinfo; credentials never belong in a storage key.
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let authority = authority.to_ascii_lowercase();
    let authority = match (scheme.as_str(), authority.rsplit_once(':')) {
        ("http", Some((host, "80"))) | ("https", Some((host, "443"))) => host.to_string(),
        _ => authority,
    };
    format!("{scheme}://{authority}")
}
