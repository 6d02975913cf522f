use std::{collections::HashMap, future::Future, sync::Arc};

use error_stack::Result;
use tokio::sync::{Mutex, OnceCell};

use crate::core::Felt;

use super::{Abi, AbiError};

/// Where an abi comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiKey {
    /// Datasource asset, by name.
    Asset(String),
    /// Fetched from the chain, by contract address.
    Address(Felt),
}

/// Process wide abi cache.
///
/// The first successful resolution of a key wins, concurrent resolutions of the
/// same key wait for the one in flight. Failures are not cached.
#[derive(Default)]
pub struct AbiCache {
    entries: Mutex<HashMap<AbiKey, Arc<OnceCell<Arc<Abi>>>>>,
}

impl AbiCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_insert_with<F, Fut>(
        &self,
        key: AbiKey,
        init: F,
    ) -> Result<Arc<Abi>, AbiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Abi, AbiError>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key).or_default().clone()
        };

        cell.get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub async fn get(&self, key: &AbiKey) -> Option<Arc<Abi>> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }
}
