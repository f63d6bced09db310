//! Credential model shared by the identity resolver and token issuance.
//!
//! Two kinds of token circulate in the platform. *Lobby tokens* belong to
//! users that have not joined a tenant yet; they are signed with the
//! process-wide platform secret and carry `tenantId: null`. *Tenant tokens*
//! are signed with the owning tenant's envelope-wrapped secret, so a token
//! can only verify against the tenant it claims to belong to.

pub mod jwt;

pub use jwt::{Claims, TokenService};

use serde::{Deserialize, Serialize};

/// Roles recognized across the platform.
///
/// Business roles are assigned to directory users; system roles exist only
/// for internally constructed contexts (migrations, scheduled jobs) and are
/// never granted to a directory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "MANAGER")]
    Manager,
    #[serde(rename = "ANALYST")]
    Analyst,
    #[serde(rename = "STAFF")]
    Staff,
    #[serde(rename = "SYSTEM_MIGRATION")]
    SystemMigration,
    #[serde(rename = "SYSTEM_JOB")]
    SystemJob,
    #[serde(rename = "SYSTEM_READONLY")]
    SystemReadonly,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Manager => "MANAGER",
            Self::Analyst => "ANALYST",
            Self::Staff => "STAFF",
            Self::SystemMigration => "SYSTEM_MIGRATION",
            Self::SystemJob => "SYSTEM_JOB",
            Self::SystemReadonly => "SYSTEM_READONLY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(Self::Admin),
            "MANAGER" => Some(Self::Manager),
            "ANALYST" => Some(Self::Analyst),
            "STAFF" => Some(Self::Staff),
            "SYSTEM_MIGRATION" => Some(Self::SystemMigration),
            "SYSTEM_JOB" => Some(Self::SystemJob),
            "SYSTEM_READONLY" => Some(Self::SystemReadonly),
            _ => None,
        }
    }

    /// System identities bypass per-tenant credential verification and are
    /// bound to restricted database roles by the query executor.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Self::SystemMigration | Self::SystemJob | Self::SystemReadonly
        )
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            UserRole::Admin,
            UserRole::Manager,
            UserRole::Analyst,
            UserRole::Staff,
            UserRole::SystemMigration,
            UserRole::SystemJob,
            UserRole::SystemReadonly,
        ] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn test_system_classification() {
        assert!(UserRole::SystemJob.is_system());
        assert!(!UserRole::Admin.is_system());
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert_eq!(UserRole::parse("SUPERUSER"), None);
    }
}
