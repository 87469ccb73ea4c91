//! One executor per endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use tether_core::{EndpointDescriptor, EndpointId};

use crate::executor::{Executor, ExecutorSettings};
use crate::transport::Connector;

/// Hands out the executor for an endpoint, creating it on first use and
/// disposing it when the endpoint goes away.
pub struct ExecutorRegistry {
    connector: Arc<dyn Connector>,
    settings: ExecutorSettings,
    executors: RwLock<HashMap<EndpointId, Arc<Executor>>>,
}

impl ExecutorRegistry {
    pub fn new(connector: Arc<dyn Connector>, settings: ExecutorSettings) -> Self {
        Self {
            connector,
            settings,
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Executor for `endpoint`. A descriptor that differs from the one the
    /// current executor was built with (e.g. a refreshed token) replaces it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; see [`Executor::new`].
    pub async fn get_or_create(&self, endpoint: &EndpointDescriptor) -> Arc<Executor> {
        {
            let executors = self.executors.read().await;
            if let Some(existing) = executors.get(&endpoint.id) {
                if existing.endpoint() == endpoint && !existing.is_disposed() {
                    return existing.clone();
                }
            }
        }

        let mut executors = self.executors.write().await;
        if let Some(existing) = executors.get(&endpoint.id) {
            if existing.endpoint() == endpoint && !existing.is_disposed() {
                return existing.clone();
            }
        }
        let created = Arc::new(Executor::new(
            endpoint.clone(),
            self.connector.clone(),
            self.settings.clone(),
        ));
        if let Some(previous) = executors.insert(endpoint.id.clone(), created.clone()) {
            tracing::info!(endpoint = %endpoint.id, "descriptor changed; replacing executor");
            previous.dispose().await;
        }
        created
    }

    pub async fn get(&self, id: &EndpointId) -> Option<Arc<Executor>> {
        self.executors.read().await.get(id).cloned()
    }

    /// Dispose and forget the endpoint's executor. Returns whether one existed.
    pub async fn remove(&self, id: &EndpointId) -> bool {
        let removed = self.executors.write().await.remove(id);
        match removed {
            Some(executor) => {
                executor.dispose().await;
                true
            }
            None => false,
        }
    }

    pub async fn ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<_> = self.executors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn dispose_all(&self) {
        let drained: Vec<_> = self.executors.write().await.drain().collect();
        for (_, executor) in drained {
            executor.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeShell, Reply};

    fn endpoint(id: &str, token: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            id: EndpointId::from(id),
            address: format!("ws://fake/{id}"),
            token: token.to_string(),
            expires_at: None,
        }
    }

    fn registry() -> ExecutorRegistry {
        let shell = FakeShell::new(|_| Reply::ok(""));
        ExecutorRegistry::new(Arc::new(shell), ExecutorSettings::default())
    }

    #[tokio::test]
    async fn same_descriptor_returns_same_executor() {
        let registry = registry();
        let a = registry.get_or_create(&endpoint("e1", "t")).await;
        let b = registry.get_or_create(&endpoint("e1", "t")).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ids().await, vec![EndpointId::from("e1")]);
    }

    #[tokio::test]
    async fn new_token_replaces_and_disposes_previous() {
        let registry = registry();
        let old = registry.get_or_create(&endpoint("e1", "old")).await;
        let new = registry.get_or_create(&endpoint("e1", "new")).await;
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_disposed());
        assert!(!new.is_disposed());
    }

    #[tokio::test]
    async fn remove_disposes_executor() {
        let registry = registry();
        let executor = registry.get_or_create(&endpoint("e1", "t")).await;
        assert!(registry.remove(&EndpointId::from("e1")).await);
        assert!(executor.is_disposed());
        assert!(registry.get(&EndpointId::from("e1")).await.is_none());
        assert!(!registry.remove(&EndpointId::from("e1")).await);
    }

    #[tokio::test]
    async fn endpoints_are_independent() {
        let registry = registry();
        let a = registry.get_or_create(&endpoint("a", "t")).await;
        let b = registry.get_or_create(&endpoint("b", "t")).await;
        registry.remove(&EndpointId::from("a")).await;
        assert!(a.is_disposed());
        let result = b.execute("true", &[]).await.expect("execute on b");
        assert!(result.success);
    }
}
