//! Wiring of the vault, audit log and login orchestrator over one store.

use crate::audit::AuditLog;
use crate::config::CoreConfig;
use crate::crypto::KeyRing;
use crate::login::{AutomationDriver, LoginOrchestrator};
use crate::store::RecordStore;
use crate::vault::Vault;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// The assembled core, sharing one store and key ring
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub keyring: Arc<KeyRing>,
    pub audit: AuditLog,
    pub vault: Arc<Vault>,
    pub logins: LoginOrchestrator,
}

impl Services {
    pub fn build(
        config: &CoreConfig,
        keyring: Arc<KeyRing>,
        store: Arc<dyn RecordStore>,
        driver: Arc<dyn AutomationDriver>,
    ) -> Result<Self> {
        config.validate()?;

        let audit = AuditLog::with_page_size(store.clone(), config.storage.audit_page_size);
        let vault = Arc::new(Vault::new(store.clone(), keyring.clone(), audit.clone()));
        let logins = LoginOrchestrator::new(
            vault.clone(),
            store.clone(),
            audit.clone(),
            driver,
            config.login.clone(),
        );

        Ok(Self {
            store,
            keyring,
            audit,
            vault,
            logins,
        })
    }

    /// Open the configured store and read the master key from the environment
    pub fn from_config(config: &CoreConfig, driver: Arc<dyn AutomationDriver>) -> Result<Self> {
        config.validate()?;
        let keyring = Arc::new(KeyRing::from_env(&config.keys.master_key_env)?);
        let store = config.storage.open_store()?;
        info!(
            sqlite = config.storage.sqlite_path.is_some(),
            key_versions = keyring.versions().len(),
            "ssovault core initialized"
        );
        Self::build(config, keyring, store, driver)
    }
}
