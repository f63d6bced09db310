//! Provisioning coordinator: atomic tenant creation with compensating
//! rollback.
//!
//! Steps 1–3 (tenant row, physical schema, owner link) run inside one
//! transaction on `public`, so their rollback is the engine's. The template
//! migration runs afterwards under a `SYSTEM_MIGRATION` binding to the new
//! schema; when it fails, the coordinator reverts everything explicitly —
//! `DROP SCHEMA ... CASCADE`, unlink the owner, delete the tenant row —
//! with every compensation step tolerating "already gone", so the rollback
//! itself is idempotent. After any failure the database is indistinguishable
//! from the pre-call state.

pub mod seed;
pub mod template;

use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use ledgerline_core::auth::{Claims, TokenService, UserRole};
use ledgerline_core::crypto::EnvelopeCrypto;
use ledgerline_core::error::CoreError;
use ledgerline_core::tenant::{derive_slug, random_suffix, SchemaName, TenantStatus};

use crate::audit::{AuditEvent, AuditSink};
use crate::db::executor::{map_db_error, SchemaBinding};
use crate::db::refresh_token::RefreshTokenRepository;
use crate::db::tenant::{NewTenant, Tenant, TenantRegistry};
use crate::db::user::{User, UserRepository};
use crate::db::TenantExecutor;

#[derive(Debug, Deserialize)]
pub struct ProvisioningRequest {
    #[serde(rename = "companyName")]
    pub company_name: String,
    #[serde(rename = "subscriptionPlan")]
    pub subscription_plan: String,
    #[serde(rename = "dataSourceType")]
    pub data_source_type: String,
}

/// Result of a successful onboarding: the tenant record plus a freshly
/// signed tenant credential pair for the owner.
pub struct ProvisionedOrganization {
    pub tenant: Tenant,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct ProvisioningCoordinator {
    executor: Arc<TenantExecutor>,
    registry: Arc<TenantRegistry>,
    envelope: Arc<EnvelopeCrypto>,
    audit: Arc<AuditSink>,
}

impl ProvisioningCoordinator {
    pub fn new(
        executor: Arc<TenantExecutor>,
        registry: Arc<TenantRegistry>,
        envelope: Arc<EnvelopeCrypto>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            executor,
            registry,
            envelope,
            audit,
        }
    }

    /// Create a tenant for the given lobby user.
    pub async fn create_organization(
        &self,
        owner_user_id: Uuid,
        request: ProvisioningRequest,
    ) -> Result<ProvisionedOrganization, CoreError> {
        if request.company_name.trim().is_empty() {
            return Err(CoreError::validation(vec![
                "companyName is required".to_string(),
            ]));
        }

        let owner = self.load_lobby_owner(owner_user_id)?;

        let slug = derive_slug(&request.company_name);
        let suffix = random_suffix();
        let schema = SchemaName::for_tenant(&slug, &suffix)?;

        let secret = EnvelopeCrypto::generate_tenant_secret();
        let wrapped_secret = self.envelope.wrap(&secret)?;

        // Steps 4-7: one transaction on public
        let tenant = self.create_tenant_transaction(
            &owner,
            &request.company_name,
            &slug,
            &schema,
            wrapped_secret,
        )?;

        // Step 8: template migration outside that transaction, under a
        // migration binding scoped to the new schema
        if let Err(migration_error) = self.run_template_migration(&tenant, &schema).await {
            log::error!(
                "tenant template migration failed for {}: {}, rolling back",
                tenant.id,
                migration_error
            );
            self.rollback(&tenant, &schema, owner.id);
            return Err(CoreError::provisioning(format!(
                "tenant migration failed: {}",
                migration_error
            )));
        }

        self.registry.refresh(&tenant);

        // Step 9: issue the owner's tenant credential
        let (access_token, refresh_token) =
            self.issue_owner_credentials(&owner, &tenant, &schema, &secret)?;

        self.audit.emit(AuditEvent::new(
            tenant.id.to_string(),
            Some(owner.id),
            "tenant.provisioned",
            serde_json::json!({
                "slug": tenant.slug,
                "schema": tenant.schema_name,
                "plan": request.subscription_plan,
                "dataSource": request.data_source_type,
            }),
        ));

        Ok(ProvisionedOrganization {
            tenant,
            access_token,
            refresh_token,
        })
    }

    fn load_lobby_owner(&self, owner_user_id: Uuid) -> Result<User, CoreError> {
        let mut conn = self.conn()?;
        let owner = UserRepository::new(&mut conn)
            .find_by_id(owner_user_id)
            .map_err(map_db_error)?
            .ok_or_else(|| CoreError::not_found("user"))?;

        if !owner.is_lobby() {
            return Err(CoreError::forbidden(
                "user already belongs to an organization",
            ));
        }
        Ok(owner)
    }

    fn create_tenant_transaction(
        &self,
        owner: &User,
        company_name: &str,
        slug: &str,
        schema: &SchemaName,
        wrapped_secret: String,
    ) -> Result<Tenant, CoreError> {
        let mut conn = self.conn()?;

        crate::db::executor::run_in_transaction(&mut conn, |conn| {
            let tenant = TenantRegistry::create_on(
                conn,
                NewTenant {
                    name: company_name.to_string(),
                    slug: slug.to_string(),
                    schema_name: schema.as_str().to_string(),
                    tenant_secret: wrapped_secret,
                    status: TenantStatus::Active.as_str().to_string(),
                },
            )?;

            // Identifier fenced by the SchemaName grammar
            conn.batch_execute(&format!(
                r#"CREATE SCHEMA "{schema}";
                   GRANT USAGE ON SCHEMA "{schema}" TO ledgerline_tenant, ledgerline_job, ledgerline_readonly, ledgerline_migration;
                   GRANT CREATE ON SCHEMA "{schema}" TO ledgerline_migration;"#,
                schema = schema.as_str()
            ))
            .map_err(map_db_error)?;

            UserRepository::new(conn).link_to_tenant(owner.id, tenant.id)?;

            Ok(tenant)
        })
    }

    async fn run_template_migration(
        &self,
        tenant: &Tenant,
        schema: &SchemaName,
    ) -> Result<(), CoreError> {
        let binding =
            SchemaBinding::system(UserRole::SystemMigration, tenant.id, schema.clone())?;
        let template = template::tenant_template_sql(tenant.id, schema);

        self.executor
            .with_binding(binding, move |conn| {
                conn.batch_execute(&template).map_err(map_db_error)
            })
            .await
    }

    /// Compensating rollback after a post-transaction failure. Every step
    /// tolerates state that is already reverted.
    fn rollback(&self, tenant: &Tenant, schema: &SchemaName, owner_id: Uuid) {
        self.executor.forget_schema(schema);

        match self.conn() {
            Ok(mut conn) => {
                if let Err(e) = conn.batch_execute(&format!(
                    "DROP SCHEMA IF EXISTS \"{}\" CASCADE",
                    schema.as_str()
                )) {
                    log::error!("rollback: failed to drop schema {}: {}", schema, e);
                }

                if let Err(e) =
                    UserRepository::new(&mut conn).unlink_from_tenant(owner_id, tenant.id)
                {
                    log::error!("rollback: failed to unlink owner {}: {}", owner_id, e);
                }
            }
            Err(e) => log::error!("rollback: no connection available: {}", e),
        }

        if let Err(e) = self.registry.delete(tenant.id) {
            log::error!("rollback: failed to delete tenant row {}: {}", tenant.id, e);
        }
    }

    fn issue_owner_credentials(
        &self,
        owner: &User,
        tenant: &Tenant,
        schema: &SchemaName,
        secret: &[u8],
    ) -> Result<(String, String), CoreError> {
        let claims = Claims::access(
            owner.id,
            owner.email.clone(),
            UserRole::Admin,
            Some(tenant.id),
            schema.as_str(),
        );
        let access_token = TokenService::new(secret.to_vec())?.sign(&claims)?;

        let mut conn = self.conn()?;
        let refresh_token = RefreshTokenRepository::new(&mut conn).issue(owner.id)?;

        Ok((access_token, refresh_token))
    }

    /// Provisioning owns its connections outright instead of going through
    /// a schema binding: the onboarding transaction runs on `public`, and
    /// the rollback must work even when the binding machinery is what
    /// failed.
    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>,
        CoreError,
    > {
        self.executor.raw_connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_field_names_match_wire_format() {
        let request: ProvisioningRequest = serde_json::from_value(serde_json::json!({
            "companyName": "Acme SaaS",
            "subscriptionPlan": "free",
            "dataSourceType": "external",
        }))
        .unwrap();
        assert_eq!(request.company_name, "Acme SaaS");
        assert_eq!(request.subscription_plan, "free");
    }

    #[test]
    fn test_schema_derivation_from_company_name() {
        let slug = derive_slug("Acme SaaS");
        let schema = SchemaName::for_tenant(&slug, &random_suffix()).unwrap();
        assert!(schema.as_str().starts_with("tenant_acme_saas_"));
    }
}
