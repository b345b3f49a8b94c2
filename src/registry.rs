//! Service orchestrator: the single source of truth for which protocol
//! services exist, whether they are running, and routing start/stop/status
//! requests by name.
//!
//! The registry is an explicitly constructed object handed to the composition
//! root; there is deliberately no process-global instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::services::Service;

// ---------------------------------------------------------------------------
// Errors and status
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service {0} not found")]
    ServiceNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("Running"),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Inner {
    /// Lower-cased service name to service.  Last registration wins.
    services: HashMap<String, Arc<dyn Service>>,
    /// Last-known status, present only for services that have been started
    /// or stopped at least once.
    status: HashMap<String, ServiceStatus>,
}

/// Process-wide registry of protocol services.
///
/// One mutex serializes every registry mutation.  Services bind their
/// listener and spawn their accept loop before `start` returns, so the lock
/// is held only for bookkeeping, never for the lifetime of a connection.
pub struct ServiceRegistry {
    inner: Mutex<Inner>,
    config: Arc<Config>,
}

impl ServiceRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                services: HashMap::new(),
                status: HashMap::new(),
            }),
            config,
        }
    }

    /// Register a service under its lower-cased name, replacing any earlier
    /// registration with the same name.
    pub async fn add_service(&self, service: Arc<dyn Service>) {
        let key = service.name().to_lowercase();
        self.inner.lock().await.services.insert(key, service);
    }

    /// Start the named service.  On success the status map records
    /// `Running`; on failure the service's own error is propagated unchanged
    /// and the status entry is left untouched.
    pub async fn start_service_by_name(&self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        let mut inner = self.inner.lock().await;
        let service = inner
            .services
            .get(&key)
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;
        service.start(Arc::clone(&self.config)).await?;
        inner.status.insert(key, ServiceStatus::Running);
        Ok(())
    }

    /// Stop the named service.  On success the status map records `Stopped`.
    pub async fn stop_service_by_name(&self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        let mut inner = self.inner.lock().await;
        let service = inner
            .services
            .get(&key)
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;
        service.stop().await?;
        inner.status.insert(key, ServiceStatus::Stopped);
        Ok(())
    }

    /// Start every registered service, aborting on the first failure.
    ///
    /// Known limitation: services started before the failing one are left
    /// running; there is no rollback.
    pub async fn start_all_services(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let services: Vec<(String, Arc<dyn Service>)> = inner
            .services
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        for (key, service) in services {
            service.start(Arc::clone(&self.config)).await?;
            inner.status.insert(key, ServiceStatus::Running);
        }
        Ok(())
    }

    /// Last-known status of the named service.  Errors if the service was
    /// never started or stopped; there is no default "Unknown" status.
    pub async fn service_status_by_name(&self, name: &str) -> Result<ServiceStatus, RegistryError> {
        let key = name.to_lowercase();
        self.inner
            .lock()
            .await
            .status
            .get(&key)
            .copied()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))
    }

    /// Names of all registered services (lower-cased registry keys).
    pub async fn service_names(&self) -> Vec<String> {
        self.inner.lock().await.services.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeService {
        name: &'static str,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    impl FakeService {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start: true,
            })
        }
    }

    #[async_trait]
    impl Service for FakeService {
        async fn start(&self, _config: Arc<Config>) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                anyhow::bail!("bind failed");
            }
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(crate::config::load_config(None).unwrap())
    }

    #[tokio::test]
    async fn start_and_status_are_case_insensitive() {
        let registry = ServiceRegistry::new(test_config());
        let svc = FakeService::new("Redis");
        registry.add_service(svc.clone()).await;

        registry.start_service_by_name("REDIS").await.unwrap();
        assert_eq!(svc.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.service_status_by_name("redis").await.unwrap(),
            ServiceStatus::Running
        );
    }

    #[tokio::test]
    async fn unknown_service_leaves_status_untouched() {
        let registry = ServiceRegistry::new(test_config());
        let err = registry.start_service_by_name("redis").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(registry.service_status_by_name("redis").await.is_err());
    }

    #[tokio::test]
    async fn stop_records_stopped() {
        let registry = ServiceRegistry::new(test_config());
        let svc = FakeService::new("ssh");
        registry.add_service(svc.clone()).await;

        registry.start_service_by_name("ssh").await.unwrap();
        registry.stop_service_by_name("ssh").await.unwrap();
        assert_eq!(svc.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.service_status_by_name("ssh").await.unwrap(),
            ServiceStatus::Stopped
        );
    }

    #[tokio::test]
    async fn failed_start_propagates_and_leaves_no_status() {
        let registry = ServiceRegistry::new(test_config());
        registry.add_service(FakeService::failing("ssh")).await;

        assert!(registry.start_service_by_name("ssh").await.is_err());
        assert!(registry.service_status_by_name("ssh").await.is_err());
    }

    #[tokio::test]
    async fn start_all_aborts_on_first_failure() {
        let registry = ServiceRegistry::new(test_config());
        registry.add_service(FakeService::failing("bad")).await;
        assert!(registry.start_all_services().await.is_err());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = ServiceRegistry::new(test_config());
        let first = FakeService::new("ssh");
        let second = FakeService::new("SSH");
        registry.add_service(first.clone()).await;
        registry.add_service(second.clone()).await;

        registry.start_service_by_name("ssh").await.unwrap();
        assert_eq!(first.starts.load(Ordering::SeqCst), 0);
        assert_eq!(second.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_has_no_reentrancy_guard() {
        // There is deliberately no double-start guard; a second start simply
        // invokes the service again (a real service would then fail on the
        // port bind collision).
        let registry = ServiceRegistry::new(test_config());
        let svc = FakeService::new("ssh");
        registry.add_service(svc.clone()).await;

        registry.start_service_by_name("ssh").await.unwrap();
        registry.start_service_by_name("ssh").await.unwrap();
        assert_eq!(svc.starts.load(Ordering::SeqCst), 2);
    }
}
