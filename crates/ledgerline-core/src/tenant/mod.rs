//! Tenant naming and lifecycle rules.
//!
//! Schema names are the one value that gets interpolated into SQL
//! identifiers (`SET LOCAL search_path`, `CREATE SCHEMA`), so they are
//! modeled as a validated newtype: a [`SchemaName`] can only be constructed
//! through the grammar check, and every consumer takes the newtype rather
//! than a raw string.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Grammar for tenant schema names. The identity resolver, query executor
/// and provisioning coordinator all validate against this exact pattern
/// before any SQL identifier interpolation.
static SCHEMA_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tenant_[a-z0-9_]+_[a-z0-9]+$").expect("schema name regex"));

/// Number of random characters appended to a derived schema name so that
/// uniqueness does not depend on slug collisions.
const SUFFIX_LEN: usize = 8;

/// A schema name that passed the tenant grammar check, or `public`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate a stored or claimed schema name.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        if value == "public" || SCHEMA_NAME_RE.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(CoreError::SchemaViolation {
                name: value.to_string(),
            })
        }
    }

    /// The shared `public` namespace used by the registry and lobby users.
    pub fn public() -> Self {
        Self("public".to_string())
    }

    /// Build `tenant_<slug>_<suffix>` from an already-derived slug.
    pub fn for_tenant(slug: &str, suffix: &str) -> Result<Self, CoreError> {
        Self::parse(&format!("tenant_{}_{}", slug, suffix))
    }

    pub fn is_public(&self) -> bool {
        self.0 == "public"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaName> for String {
    fn from(value: SchemaName) -> Self {
        value.0
    }
}

/// Derive a url-safe slug from a display name: lowercase, non-alphanumeric
/// runs collapsed to a single underscore, leading/trailing underscores
/// trimmed.
pub fn derive_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("org");
    }
    slug
}

/// Random lowercase-alphanumeric suffix for schema name uniqueness.
pub fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Tenant liveness states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "deleted")]
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// `active ↔ suspended`; `active → deleted` is terminal.
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Suspended)
                | (Self::Suspended, Self::Active)
                | (Self::Active, Self::Deleted)
        )
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_grammar_accepts_valid_names() {
        assert!(SchemaName::parse("tenant_acme_saas_a1b2c3d4").is_ok());
        assert!(SchemaName::parse("tenant_x_9").is_ok());
        assert!(SchemaName::parse("public").is_ok());
    }

    #[test]
    fn test_schema_grammar_rejects_injection() {
        for bad in [
            "tenant_acme; DROP SCHEMA public",
            "tenant_Acme_a1",
            "tenant_acme",
            "pg_catalog",
            "tenant__",
            "",
            "tenant_acme_a1\"; --",
        ] {
            assert!(
                SchemaName::parse(bad).is_err(),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_derive_slug_collapses_and_lowercases() {
        assert_eq!(derive_slug("Acme SaaS"), "acme_saas");
        assert_eq!(derive_slug("  We--Are!! Ltd. "), "we_are_ltd");
        assert_eq!(derive_slug("金融"), "org");
    }

    #[test]
    fn test_random_suffix_shape() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_derived_schema_name_passes_grammar() {
        let name = SchemaName::for_tenant(&derive_slug("Acme SaaS"), &random_suffix()).unwrap();
        assert!(name.as_str().starts_with("tenant_acme_saas_"));
    }

    #[test]
    fn test_status_state_machine() {
        use TenantStatus::*;
        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));
        assert!(Active.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Suspended));
        assert!(!Suspended.can_transition_to(Deleted));
    }
}
