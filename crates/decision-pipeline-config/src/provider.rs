// crates/decision-pipeline-config/src/provider.rs
// ============================================================================
// Module: Inline Config Provider
// Description: ConfigProvider backed by the tenant tables of a loaded config.
// Purpose: Resolve primitive settings with default-tenant fallback.
// Dependencies: decision-pipeline-core, serde_json
// ============================================================================

//! ## Overview
//! Lookups try the run's tenant first and then the [`DEFAULT_TENANT`]
//! tables, so shared settings only need to be written once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use decision_pipeline_core::ConfigProvider;
use decision_pipeline_core::ConfigProviderError;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::ResolvedConfig;
use decision_pipeline_core::TenantId;
use serde_json::Map;
use serde_json::Value;

use crate::config::TenantTables;
use crate::config::resolve_settings;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Tenant whose tables back every other tenant.
pub const DEFAULT_TENANT: &str = "default";

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Config provider serving tenant tables loaded from TOML.
#[derive(Debug, Clone, Default)]
pub struct InlineConfigProvider {
    /// Tenant tables shared across clones.
    tenants: Arc<TenantTables>,
}

impl InlineConfigProvider {
    /// Creates a provider over the given tables.
    #[must_use]
    pub fn new(tenants: TenantTables) -> Self {
        Self {
            tenants: Arc::new(tenants),
        }
    }

    /// Finds the table for a tenant without fallback.
    fn table(
        &self,
        tenant: &str,
        config_version: &str,
        primitive: &str,
    ) -> Option<&Map<String, Value>> {
        self.tenants.get(tenant)?.get(config_version)?.get(primitive)
    }
}

impl ConfigProvider for InlineConfigProvider {
    fn get_config(
        &self,
        tenant_id: &TenantId,
        config_version: &ConfigVersion,
        primitive_name: &PrimitiveName,
    ) -> Result<ResolvedConfig, ConfigProviderError> {
        let table = self
            .table(tenant_id.as_str(), config_version.as_str(), primitive_name.as_str())
            .or_else(|| {
                self.table(DEFAULT_TENANT, config_version.as_str(), primitive_name.as_str())
            })
            .ok_or_else(|| {
                ConfigProviderError::NotFound(format!(
                    "tenant={tenant_id} config_version={config_version} primitive={primitive_name}"
                ))
            })?;
        resolve_settings(config_version.clone(), table).map_err(ConfigProviderError::Invalid)
    }
}
