//! Pre-flight access check against the on-chain registry

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{debug, warn};

use crate::domain::{AccessDecision, AccessLevel, AccessResource};
use crate::infra::{LedgerClient, LedgerError, Result};

/// Read-only gate run before any state-changing call is built.
///
/// The ledger contract re-checks access on submission; a stale "allowed"
/// answer here costs one failed simulation.
pub struct AccessControlGate {
    client: Arc<dyn LedgerClient>,
    required: AccessLevel,
}

impl AccessControlGate {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self {
            client,
            required: AccessLevel::WriteLimited,
        }
    }

    pub fn with_level(mut self, level: AccessLevel) -> Self {
        self.required = level;
        self
    }

    pub async fn check_access(
        &self,
        account: Address,
        resource: AccessResource,
        level: AccessLevel,
    ) -> Result<AccessDecision> {
        let resource_id = self.client.access_resource(resource).await?;
        let decision = self.client.check_access(account, resource_id, level).await?;
        debug!(
            account = %account,
            resource = ?resource,
            level = level.as_u8(),
            allowed = decision.allowed,
            "access checked"
        );
        Ok(decision)
    }

    /// Fail with `AccessDenied` unless the submitting account holds the required level
    pub async fn require(&self, resource: AccessResource) -> Result<()> {
        let account = self.client.account();
        let decision = self.check_access(account, resource, self.required).await?;
        if decision.allowed {
            Ok(())
        } else {
            warn!(account = %account, resource = ?resource, reason = %decision.reason, "access denied");
            Err(LedgerError::AccessDenied(decision.reason))
        }
    }
}
