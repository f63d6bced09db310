//! Tenant registry (the authority over tenant existence and liveness).
//!
//! Read on nearly every request, so lookups go through a bounded in-process
//! cache with a short TTL. Writes invalidate the cache in the same process;
//! across processes a stale window of one TTL is accepted as the upper
//! bound for propagating a `suspended` status. The registry never returns a
//! decrypted secret — callers get the envelope blob and unwrap it
//! themselves.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledgerline_core::error::CoreError;
use ledgerline_core::tenant::{SchemaName, TenantStatus};

use crate::db::schema::tenants;
use crate::db::session::DbPool;

/// Row in `public.tenants`.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = tenants)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub schema_name: String,
    /// Envelope-wrapped signing secret; never plaintext at rest
    pub tenant_secret: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tenants)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub schema_name: String,
    pub tenant_secret: String,
    pub status: String,
}

impl Tenant {
    pub fn parsed_status(&self) -> Result<TenantStatus, CoreError> {
        TenantStatus::parse(&self.status)
            .ok_or_else(|| CoreError::database(format!("tenant {} has unknown status", self.id)))
    }

    pub fn parsed_schema(&self) -> Result<SchemaName, CoreError> {
        SchemaName::parse(&self.schema_name)
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active.as_str()
    }
}

struct CacheEntry {
    tenant: Tenant,
    cached_at: Instant,
}

/// Registry facade: pooled lookups behind a TTL cache.
pub struct TenantRegistry {
    pool: DbPool,
    cache: RwLock<HashMap<Uuid, CacheEntry>>,
    ttl: Duration,
}

impl TenantRegistry {
    pub fn new(pool: DbPool, ttl: Duration) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>,
        CoreError,
    > {
        self.pool
            .get()
            .map_err(|e| CoreError::unavailable(format!("connection checkout failed: {}", e)))
    }

    fn cached(&self, id: Uuid) -> Option<Tenant> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(&id)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(entry.tenant.clone())
        } else {
            None
        }
    }

    fn store(&self, tenant: &Tenant) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                tenant.id,
                CacheEntry {
                    tenant: tenant.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
    }

    fn invalidate(&self, id: Uuid) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&id);
        }
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, CoreError> {
        if let Some(tenant) = self.cached(id) {
            return Ok(Some(tenant));
        }

        use crate::db::schema::tenants::dsl;
        let mut conn = self.conn()?;
        let tenant = dsl::tenants
            .filter(dsl::id.eq(id))
            .first::<Tenant>(&mut conn)
            .optional()
            .map_err(|e| CoreError::database(format!("tenant lookup failed: {}", e)))?;

        if let Some(ref t) = tenant {
            self.store(t);
        }
        Ok(tenant)
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, CoreError> {
        use crate::db::schema::tenants::dsl;
        let mut conn = self.conn()?;
        dsl::tenants
            .filter(dsl::slug.eq(slug))
            .first::<Tenant>(&mut conn)
            .optional()
            .map_err(|e| CoreError::database(format!("tenant lookup failed: {}", e)))
    }

    /// Insert a tenant row on an externally owned connection so provisioning
    /// can keep it inside the onboarding transaction.
    pub fn create_on(
        conn: &mut PgConnection,
        new_tenant: NewTenant,
    ) -> Result<Tenant, CoreError> {
        diesel::insert_into(tenants::table)
            .values(&new_tenant)
            .get_result::<Tenant>(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    info,
                ) => CoreError::conflict(format!("tenant already exists: {}", info.message())),
                other => CoreError::database(format!("tenant insert failed: {}", other)),
            })
    }

    /// Apply a lifecycle transition, enforcing the tenant state machine.
    pub fn update_status(&self, id: Uuid, next: TenantStatus) -> Result<Tenant, CoreError> {
        use crate::db::schema::tenants::dsl;
        let mut conn = self.conn()?;

        let current = dsl::tenants
            .filter(dsl::id.eq(id))
            .first::<Tenant>(&mut conn)
            .optional()
            .map_err(|e| CoreError::database(format!("tenant lookup failed: {}", e)))?
            .ok_or_else(|| CoreError::not_found("tenant"))?;

        let status = current.parsed_status()?;
        if !status.can_transition_to(next) {
            return Err(CoreError::forbidden(format!(
                "tenant status cannot change from {} to {}",
                status, next
            )));
        }

        let updated = diesel::update(dsl::tenants.filter(dsl::id.eq(id)))
            .set((
                dsl::status.eq(next.as_str()),
                dsl::updated_at.eq(Utc::now()),
            ))
            .get_result::<Tenant>(&mut conn)
            .map_err(|e| CoreError::database(format!("tenant status update failed: {}", e)))?;

        self.invalidate(id);
        Ok(updated)
    }

    /// Hard delete, used by provisioning rollback. Tolerates a row that is
    /// already gone.
    pub fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        use crate::db::schema::tenants::dsl;
        let mut conn = self.conn()?;

        diesel::delete(dsl::tenants.filter(dsl::id.eq(id)))
            .execute(&mut conn)
            .map_err(|e| CoreError::database(format!("tenant delete failed: {}", e)))?;

        self.invalidate(id);
        Ok(())
    }

    /// Same-process cache refresh after an out-of-band write.
    pub fn refresh(&self, tenant: &Tenant) {
        self.store(tenant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tenant(status: TenantStatus) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: "Acme SaaS".to_string(),
            slug: "acme_saas".to_string(),
            schema_name: "tenant_acme_saas_a1b2c3d4".to_string(),
            tenant_secret: "aa".repeat(12) + ":" + &"bb".repeat(16) + ":" + &"cc".repeat(32),
            status: status.as_str().to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parsed_fields() {
        let tenant = sample_tenant(TenantStatus::Active);
        assert!(tenant.is_active());
        assert_eq!(tenant.parsed_status().unwrap(), TenantStatus::Active);
        assert_eq!(
            tenant.parsed_schema().unwrap().as_str(),
            "tenant_acme_saas_a1b2c3d4"
        );
    }

    #[test]
    fn test_suspended_tenant_not_active() {
        assert!(!sample_tenant(TenantStatus::Suspended).is_active());
    }
}
