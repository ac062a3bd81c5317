//! Registry of live load-zone workers
//!
//! One worker per live zone, keyed by zone name. The registry is the
//! only piece of worker state shared across reconciles; workers
//! themselves are driven by exactly one reconcile at a time.

use std::collections::HashMap;
use std::sync::Arc;

use surge_common::{Error, Result};
use tokio::sync::Mutex;

use crate::worker::PlzWorker;

/// Concurrency-safe name-to-value map with add-once semantics
#[derive(Debug, Default)]
pub struct Registry<T> {
    inner: Mutex<HashMap<String, T>>,
}

/// Registry of [`PlzWorker`]s, keyed by zone name
pub type WorkerRegistry = Registry<Arc<PlzWorker>>;

impl<T: Clone> Registry<T> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Add an entry; a duplicate name fails and leaves the original
    ///
    /// A duplicate usually means two reconciles raced; the loser backs
    /// off and the surviving worker keeps running.
    pub async fn add(&self, name: impl Into<String>, value: T) -> Result<()> {
        let name = name.into();
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&name) {
            return Err(Error::internal_with_context(
                "worker-registry",
                format!("worker {name} has already been added"),
            ));
        }
        inner.insert(name, value);
        Ok(())
    }

    /// Look up an entry by name
    pub async fn get(&self, name: &str) -> Result<T> {
        self.inner.lock().await.get(name).cloned().ok_or_else(|| {
            Error::internal_with_context(
                "worker-registry",
                format!("worker {name} doesn't exist anymore"),
            )
        })
    }

    /// Remove an entry; removing an absent name is fine
    pub async fn delete(&self, name: &str) {
        self.inner.lock().await.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_get_delete_roundtrip() {
        let registry: Registry<u32> = Registry::new();
        registry.add("europe-east", 1).await.unwrap();
        assert_eq!(registry.get("europe-east").await.unwrap(), 1);

        registry.delete("europe-east").await;
        assert!(registry.get("europe-east").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_add_keeps_original() {
        let registry: Registry<u32> = Registry::new();
        registry.add("europe-east", 1).await.unwrap();

        let err = registry.add("europe-east", 2).await.unwrap_err();
        assert!(err.to_string().contains("already been added"));
        assert_eq!(registry.get("europe-east").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_is_unconditional() {
        let registry: Registry<u32> = Registry::new();
        registry.delete("never-added").await;
    }
}
