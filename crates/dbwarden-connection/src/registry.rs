//! Process-wide manager registry
//!
//! A [`ManagerRegistry`] holds at most one [`DbManager`] and the factory used to
//! build it. The process-wide registry is installed once with [`install`]; with
//! the `postgres` feature a default registry (Postgres driver, `db` settings
//! key) is installed on first use instead.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use dbwarden_core::{Result, WardenError};

use crate::DbManager;

/// Builds a fresh manager whenever the registry needs one
pub type ManagerFactory = Box<dyn Fn() -> Result<DbManager> + Send + Sync>;

/// Lazily-created single manager instance
pub struct ManagerRegistry {
    factory: ManagerFactory,
    instance: Mutex<Option<DbManager>>,
}

impl ManagerRegistry {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<DbManager> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            instance: Mutex::new(None),
        }
    }

    /// Return the current instance, creating it on first access
    pub fn get(&self) -> Result<DbManager> {
        let mut instance = self.instance.lock();
        if let Some(manager) = instance.as_ref() {
            return Ok(manager.clone());
        }
        let manager = (self.factory)()?;
        *instance = Some(manager.clone());
        Ok(manager)
    }

    /// Build a new instance, replacing any existing one.
    ///
    /// Clones of the replaced manager keep working until they are dropped.
    pub fn create(&self) -> Result<DbManager> {
        let manager = (self.factory)()?;
        let previous = self.instance.lock().replace(manager.clone());
        if previous.is_some() {
            tracing::debug!("replaced registered connection manager");
        }
        Ok(manager)
    }

    /// Substitute the instance directly, bypassing the factory. `None` clears it.
    pub fn override_instance(&self, manager: Option<DbManager>) {
        *self.instance.lock() = manager;
    }

    /// The current instance, if one has been created
    pub fn current(&self) -> Option<DbManager> {
        self.instance.lock().clone()
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("instance", &self.instance.lock().as_ref())
            .finish()
    }
}

static GLOBAL: OnceCell<ManagerRegistry> = OnceCell::new();

/// Install the process-wide registry. Fails if one is already installed.
pub fn install(registry: ManagerRegistry) -> Result<()> {
    GLOBAL.set(registry).map_err(|_| {
        WardenError::Configuration("a connection manager registry is already installed".into())
    })
}

/// The process-wide registry
pub fn global() -> Result<&'static ManagerRegistry> {
    #[cfg(feature = "postgres")]
    {
        Ok(GLOBAL.get_or_init(|| ManagerRegistry::new(postgres_factory)))
    }

    #[cfg(not(feature = "postgres"))]
    {
        GLOBAL.get().ok_or_else(|| {
            WardenError::Configuration("no connection manager registry installed".into())
        })
    }
}

/// Process-wide manager, created on first access
pub fn get() -> Result<DbManager> {
    global()?.get()
}

/// Replace the process-wide manager with a freshly built one
pub fn create() -> Result<DbManager> {
    global()?.create()
}

/// Substitute the process-wide manager, for tests
pub fn override_instance(manager: Option<DbManager>) -> Result<()> {
    global()?.override_instance(manager);
    Ok(())
}

/// Default factory: Postgres driver configured from the `db` settings key
#[cfg(feature = "postgres")]
pub fn postgres_factory() -> Result<DbManager> {
    use dbwarden_driver_postgres::PostgresDriver;
    use dbwarden_settings::Settings;

    let settings = Settings::load_default()?;
    let mut builder = DbManager::builder(PostgresDriver::new(), settings.db()?);
    if let Some(ms) = settings.db_retry_delay_ms()? {
        builder = builder.retry(crate::RetryPolicy::from_millis(ms));
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockDriver;
    use dbwarden_core::ConnectionConfig;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_registry(driver: Arc<MockDriver>) -> (ManagerRegistry, Arc<AtomicU32>) {
        let built = Arc::new(AtomicU32::new(0));
        let counter = built.clone();
        let registry = ManagerRegistry::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            DbManager::new(driver.clone(), ConnectionConfig::new())
        });
        (registry, built)
    }

    #[tokio::test]
    async fn test_get_creates_once() {
        let (registry, built) = counting_registry(MockDriver::new());
        assert!(registry.current().is_none());

        let first = registry.get().unwrap();
        let second = registry.get().unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_replaces_instance() {
        let (registry, built) = counting_registry(MockDriver::new());

        let first = registry.get().unwrap();
        let second = registry.create().unwrap();

        assert!(!first.ptr_eq(&second));
        assert!(registry.get().unwrap().ptr_eq(&second));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_override_instance() {
        let (registry, built) = counting_registry(MockDriver::new());
        let substitute = DbManager::new(MockDriver::new(), ConnectionConfig::new()).unwrap();

        registry.override_instance(Some(substitute.clone()));
        assert!(registry.get().unwrap().ptr_eq(&substitute));
        assert_eq!(built.load(Ordering::SeqCst), 0);

        registry.override_instance(None);
        assert!(registry.current().is_none());
        registry.get().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_factory_error_leaves_registry_empty() {
        let registry = ManagerRegistry::new(|| {
            Err(WardenError::Configuration("missing key: db".into()))
        });

        let err = registry.get().unwrap_err();
        assert_eq!(err, WardenError::Configuration("missing key: db".into()));
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = DbManager::new(MockDriver::new(), ConnectionConfig::new()).unwrap_err();
        assert!(matches!(err, WardenError::Configuration(_)));
    }
}
