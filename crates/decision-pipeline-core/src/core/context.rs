// crates/decision-pipeline-core/src/core/context.rs
// ============================================================================
// Module: Decision Pipeline Run Context
// Description: Immutable invocation context for a single run.
// Purpose: Carry tenant, primitive identity, as-of time, and correlation id.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A [`RunContext`] is built once per invocation and shared by reference with
//! every port the runner touches. Fields are private so the value cannot be
//! mutated after construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::PrimitiveName;
use crate::core::identifiers::PrimitiveVersion;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: Run Context
// ============================================================================

/// Immutable context for one runner invocation.
///
/// # Invariants
/// - Created once per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Tenant the run evaluates.
    tenant_id: TenantId,
    /// Primitive being evaluated.
    primitive_name: PrimitiveName,
    /// Requested primitive version.
    primitive_version: PrimitiveVersion,
    /// As-of timestamp for the evaluation.
    #[serde(with = "time::serde::rfc3339")]
    as_of_ts: OffsetDateTime,
    /// Tenant configuration version.
    config_version: ConfigVersion,
    /// Correlation identifier for logs, jobs, and audit rows.
    correlation_id: CorrelationId,
}

impl RunContext {
    /// Creates a new run context.
    #[must_use]
    pub const fn new(
        tenant_id: TenantId,
        primitive_name: PrimitiveName,
        primitive_version: PrimitiveVersion,
        as_of_ts: OffsetDateTime,
        config_version: ConfigVersion,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            tenant_id,
            primitive_name,
            primitive_version,
            as_of_ts,
            config_version,
            correlation_id,
        }
    }

    /// Returns the tenant identifier.
    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the primitive name.
    #[must_use]
    pub const fn primitive_name(&self) -> &PrimitiveName {
        &self.primitive_name
    }

    /// Returns the requested primitive version.
    #[must_use]
    pub const fn primitive_version(&self) -> &PrimitiveVersion {
        &self.primitive_version
    }

    /// Returns the as-of timestamp.
    #[must_use]
    pub const fn as_of_ts(&self) -> OffsetDateTime {
        self.as_of_ts
    }

    /// Returns the configuration version.
    #[must_use]
    pub const fn config_version(&self) -> &ConfigVersion {
        &self.config_version
    }

    /// Returns the correlation identifier.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns the advisory lock scope `(tenant, primitive)` for this run.
    #[must_use]
    pub fn lock_key(&self) -> LockKey {
        LockKey {
            tenant_id: self.tenant_id.clone(),
            primitive_name: self.primitive_name.clone(),
        }
    }
}

/// Advisory lock scope for a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Primitive name.
    pub primitive_name: PrimitiveName,
}
