//! Executor registry keyed by job type.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::executor::JobExecutor;

/// Registry of available executors.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn JobExecutor>>>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Register an executor under its job type. Replaces any prior
    /// registration for the same type.
    pub async fn register(&self, executor: Arc<dyn JobExecutor>) {
        let job_type = executor.job_type().to_string();
        self.executors
            .write()
            .await
            .insert(job_type.clone(), executor);
        tracing::debug!("Registered executor: {}", job_type);
    }

    /// Register an executor during single-threaded startup.
    pub fn register_sync(&self, executor: Arc<dyn JobExecutor>) {
        let job_type = executor.job_type().to_string();
        if let Ok(mut executors) = self.executors.try_write() {
            executors.insert(job_type.clone(), executor);
            tracing::debug!("Registered executor: {}", job_type);
        }
    }

    /// Get the executor for a job type.
    pub async fn get(&self, job_type: &str) -> Option<Arc<dyn JobExecutor>> {
        self.executors.read().await.get(job_type).cloned()
    }

    /// Check if a job type has an executor.
    pub async fn has(&self, job_type: &str) -> bool {
        self.executors.read().await.contains_key(job_type)
    }

    /// List all registered job types.
    pub async fn list(&self) -> Vec<String> {
        self.executors.read().await.keys().cloned().collect()
    }

    /// Number of registered executors.
    pub fn count(&self) -> usize {
        self.executors.try_read().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::builtin::EchoExecutor;

    #[tokio::test]
    async fn register_and_get() {
        let registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor)).await;

        assert!(registry.has("echo").await);
        assert!(registry.get("echo").await.is_some());
        assert!(registry.get("unknown").await.is_none());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn list_job_types() {
        let registry = ExecutorRegistry::new();
        registry.register_sync(Arc::new(EchoExecutor));

        let types = registry.list().await;
        assert_eq!(types, vec!["echo".to_string()]);
    }
}
