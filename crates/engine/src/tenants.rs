use std::collections::HashMap;

use cb_domain::error::{Error, Result};
use cb_domain::tenant::TenantConfig;
use parking_lot::RwLock;

/// Where tenant configuration comes from.
#[async_trait::async_trait]
pub trait TenantSource: Send + Sync {
    /// # Errors
    ///
    /// [`Error::TenantNotFound`] when no such chatbot exists.
    async fn get_config(&self, tenant_id: &str) -> Result<TenantConfig>;
}

/// Tenants held in memory, seeded from the `[[tenants]]` config section.
#[derive(Default)]
pub struct StaticTenantSource {
    tenants: RwLock<HashMap<String, TenantConfig>>,
}

impl StaticTenantSource {
    /// Tenants failing [`TenantConfig::validate`] are logged and left out.
    pub fn new(tenants: impl IntoIterator<Item = TenantConfig>) -> Self {
        let tenants = tenants
            .into_iter()
            .filter(|t| match t.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(chatbot_id = %t.chatbot_id, error = %e, "skipping invalid tenant");
                    false
                }
            })
            .map(|t| (t.chatbot_id.clone(), t))
            .collect();
        Self {
            tenants: RwLock::new(tenants),
        }
    }

    /// Insert or replace a tenant. Callers must also invalidate its cached
    /// graph for the change to take effect.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the tenant fails validation; nothing changes.
    pub fn upsert(&self, config: TenantConfig) -> Result<()> {
        config.validate()?;
        self.tenants.write().insert(config.chatbot_id.clone(), config);
        Ok(())
    }

    pub fn remove(&self, tenant_id: &str) -> Option<TenantConfig> {
        self.tenants.write().remove(tenant_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenants.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait::async_trait]
impl TenantSource for StaticTenantSource {
    async fn get_config(&self, tenant_id: &str) -> Result<TenantConfig> {
        self.tenants
            .read()
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_owned()))
    }
}
