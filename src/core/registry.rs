/// Identifier Registry Module
///
/// Callers never hold direct references to connections or operations; they hold
/// opaque tokens. `Registry` is the token-keyed table that owns the entities.
use crate::core::{BgsqlError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Opaque handle returned to callers in place of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(String);

impl Token {
    fn generate() -> Self {
        Token(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Token(raw.to_string())
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Token(raw)
    }
}

/// Token-keyed table of shared entities guarded by a single mutex.
pub struct Registry<T> {
    entries: Mutex<HashMap<Token, Arc<T>>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Token, Arc<T>>> {
        // Map mutations never panic midway, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value` under a freshly generated token.
    ///
    /// Either the entry is fully registered and its token returned, or nothing
    /// is registered and `ResourceExhausted` is returned.
    pub fn insert(&self, value: Arc<T>) -> Result<Token> {
        let mut entries = self.lock();
        entries
            .try_reserve(1)
            .map_err(|e| BgsqlError::ResourceExhausted(e.to_string()))?;
        let mut token = Token::generate();
        while entries.contains_key(&token) {
            token = Token::generate();
        }
        entries.insert(token.clone(), value);
        Ok(token)
    }

    pub fn get(&self, token: &Token) -> Option<Arc<T>> {
        self.lock().get(token).cloned()
    }

    pub fn remove(&self, token: &Token) -> Option<Arc<T>> {
        self.lock().remove(token)
    }

    /// Empties the table, handing every entry back to the caller.
    pub fn drain(&self) -> Vec<Arc<T>> {
        self.lock().drain().map(|(_, value)| value).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
