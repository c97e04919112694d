use crate::error::KVError;

/// KVStore is the string-keyed byte storage behind the session layer.
///
/// Keys follow a namespaced convention: `{origin}:auth:access_token`,
/// `{origin}:auth:user`, etc. Implementations must be safe to share between
/// tasks; every call is a single short transaction.
pub trait KVStore: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError>;

    /// Set a key-value pair, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), KVError>;

    /// Scan all keys matching a prefix. Returns sorted (key, value) pairs.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KVError>;

    /// Delete every key under `prefix`. Returns how many keys were removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, KVError> {
        let entries = self.scan(prefix)?;
        for (key, _) in &entries {
            self.delete(key)?;
        }
        Ok(entries.len())
    }

    /// Convenience: read a UTF-8 string value.
    fn get_string(&self, key: &str) -> Result<Option<String>, KVError> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| KVError::Serialization(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Convenience: write a UTF-8 string value.
    fn set_string(&self, key: &str, value: &str) -> Result<(), KVError> {
        self.set(key, value.as_bytes())
    }
}
