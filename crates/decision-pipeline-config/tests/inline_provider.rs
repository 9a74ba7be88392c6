// crates/decision-pipeline-config/tests/inline_provider.rs
// ============================================================================
// Module: Inline Config Provider Tests
// Description: Resolution tests for tenant tables.
// Purpose: Validate tenant lookup, default fallback, and canonical versions.
// ============================================================================

//! ## Overview
//! Resolves primitive settings through [`InlineConfigProvider`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use decision_pipeline_config::InlineConfigProvider;
use decision_pipeline_config::PipelineConfig;
use decision_pipeline_core::ConfigProvider;
use decision_pipeline_core::ConfigProviderError;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::DEFAULT_CANONICAL_VERSION;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::TenantId;
use serde_json::json;

fn provider() -> InlineConfigProvider {
    PipelineConfig::from_toml_str(
        r#"
[tenants.default.v1.operational_risk]
at_risk_days = 30

[tenants.acme.v1.operational_risk]
at_risk_days = 14
canonical_version = "v3"
"#,
    )
    .unwrap()
    .config_provider()
}

fn lookup(
    provider: &InlineConfigProvider,
    tenant: &str,
    version: &str,
) -> Result<decision_pipeline_core::ResolvedConfig, ConfigProviderError> {
    provider.get_config(
        &TenantId::new(tenant),
        &ConfigVersion::new(version),
        &PrimitiveName::new("operational_risk"),
    )
}

/// Verifies that a tenant's own table wins and carries its canonical version.
#[test]
fn tenant_table_takes_precedence() {
    let resolved = lookup(&provider(), "acme", "v1").unwrap();
    assert_eq!(resolved.canonical_version, "v3");
    assert_eq!(resolved.config_version, ConfigVersion::new("v1"));
    assert_eq!(resolved.settings.get("at_risk_days"), Some(&json!(14)));
    assert!(!resolved.settings.contains_key("canonical_version"));
}

/// Verifies that unknown tenants fall back to the default tables.
#[test]
fn unknown_tenant_uses_default_tables() {
    let resolved = lookup(&provider(), "globex", "v1").unwrap();
    assert_eq!(resolved.canonical_version, DEFAULT_CANONICAL_VERSION);
    assert_eq!(resolved.settings.get("at_risk_days"), Some(&json!(30)));
}

/// Verifies that a missing version is reported as not found.
#[test]
fn missing_version_is_not_found() {
    let result = lookup(&provider(), "acme", "v9");
    assert!(matches!(result, Err(ConfigProviderError::NotFound(_))));
}

/// Verifies that an empty provider finds nothing.
#[test]
fn empty_provider_finds_nothing() {
    let result = lookup(&InlineConfigProvider::default(), "acme", "v1");
    assert!(matches!(result, Err(ConfigProviderError::NotFound(_))));
}
