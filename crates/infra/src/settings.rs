//! Tenant settings.
//!
//! Ledger rules never read ambient state: every mutation asks the injected
//! provider for the tenant's [`PolicyConfig`] and passes it down explicitly.

use std::collections::HashMap;
use std::sync::RwLock;

use branchledger_core::TenantId;
use branchledger_inventory::PolicyConfig;

pub trait SettingsProvider: Send + Sync {
    fn policy(&self, tenant_id: TenantId) -> PolicyConfig;
}

/// Default policy with per-tenant overrides.
#[derive(Debug, Default)]
pub struct StaticSettings {
    default: PolicyConfig,
    overrides: RwLock<HashMap<TenantId, PolicyConfig>>,
}

impl StaticSettings {
    pub fn new(default: PolicyConfig) -> Self {
        Self {
            default,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, tenant_id: TenantId, policy: PolicyConfig) {
        match self.overrides.write() {
            Ok(mut map) => {
                map.insert(tenant_id, policy);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(tenant_id, policy);
            }
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn policy(&self, tenant_id: TenantId) -> PolicyConfig {
        let map = match self.overrides.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&tenant_id).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_the_default() {
        let settings = StaticSettings::new(PolicyConfig::default());
        let (a, b) = (TenantId::new(), TenantId::new());
        settings.set(
            a,
            PolicyConfig {
                allow_negative_stock: true,
            },
        );

        assert!(settings.policy(a).allow_negative_stock);
        assert!(!settings.policy(b).allow_negative_stock);
    }
}
