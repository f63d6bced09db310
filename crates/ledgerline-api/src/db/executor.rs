//! Tenant-scoped query executor.
//!
//! The single allowed point of contact between business code and SQL. Every
//! transaction is bound to exactly one schema for its own lifetime via
//! transaction-local settings:
//!
//! ```text
//! SET LOCAL search_path TO "<schema>", public
//! SELECT set_config('app.tenant_id', $1, true)
//! SET LOCAL ROLE <least-privileged role for the caller>
//! SET LOCAL statement_timeout = <bounded>
//! ```
//!
//! `SET LOCAL` semantics guarantee the settings die with the transaction,
//! so a pooled connection returned after commit/rollback carries no tenant
//! residue to its next borrower. Plain `SET` is never used.
//!
//! The schema name is interpolated into the `search_path` statement as an
//! identifier (Postgres cannot bind identifiers), which is why every name
//! entering this module is a [`SchemaName`] — a value that already passed
//! the tenant grammar check.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::Text;
use uuid::Uuid;

use ledgerline_core::auth::UserRole;
use ledgerline_core::context::{self, RequestContext};
use ledgerline_core::error::{retry_with_policy, CoreError, RetryPolicy};
use ledgerline_core::tenant::SchemaName;

use crate::db::session::DbPool;

/// Database roles the executor may assume inside a transaction.
///
/// Fixed identifiers only; nothing caller-controlled reaches `SET LOCAL ROLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbRole {
    Tenant,
    ReadOnly,
    Migration,
    Job,
}

impl DbRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "ledgerline_tenant",
            Self::ReadOnly => "ledgerline_readonly",
            Self::Migration => "ledgerline_migration",
            Self::Job => "ledgerline_job",
        }
    }

    fn for_user_role(role: UserRole) -> Self {
        match role {
            UserRole::SystemReadonly => Self::ReadOnly,
            UserRole::SystemMigration => Self::Migration,
            UserRole::SystemJob => Self::Job,
            _ => Self::Tenant,
        }
    }
}

/// The resolved binding for one transaction: schema, RLS marker, DB role.
#[derive(Debug, Clone)]
pub struct SchemaBinding {
    schema: SchemaName,
    rls_marker: String,
    db_role: DbRole,
}

impl SchemaBinding {
    /// Derive the binding from the ambient context.
    ///
    /// A non-public schema with no tenant id is a context-construction bug
    /// and surfaces as `MissingContext`, not as an authorization failure.
    pub fn from_context(ctx: &RequestContext) -> Result<Self, CoreError> {
        let schema = ctx.schema_name().clone();
        if !schema.is_public() && ctx.tenant_id().is_none() {
            return Err(CoreError::MissingContext);
        }
        Ok(Self {
            schema,
            rls_marker: ctx.rls_marker(),
            db_role: DbRole::for_user_role(ctx.role()),
        })
    }

    /// Binding for registry and audit-log access on `public`, independent of
    /// any ambient context.
    pub fn public_access() -> Self {
        Self {
            schema: SchemaName::public(),
            rls_marker: "PUBLIC_ACCESS".to_string(),
            db_role: DbRole::Job,
        }
    }

    /// Binding for internal work against a specific tenant schema.
    pub fn system(
        role: UserRole,
        tenant_id: Uuid,
        schema: SchemaName,
    ) -> Result<Self, CoreError> {
        if !role.is_system() {
            return Err(CoreError::forbidden(
                "explicit schema bindings require a system role",
            ));
        }
        let ctx = RequestContext::for_system(role, Some((tenant_id, schema)));
        Self::from_context(&ctx)
    }

    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }
}

/// Classify a diesel error into the core taxonomy.
///
/// Deadlocks (40P01) and serialization failures (40001) become retryable;
/// unique violations become conflicts and are never retried.
pub fn map_db_error(e: diesel::result::Error) -> CoreError {
    use diesel::result::{DatabaseErrorKind, Error};

    match e {
        Error::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
            CoreError::retryable(info.message().to_string())
        }
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            CoreError::conflict(info.message().to_string())
        }
        Error::DatabaseError(_, ref info) if info.message().contains("deadlock detected") => {
            CoreError::retryable(info.message().to_string())
        }
        Error::NotFound => CoreError::not_found("record"),
        other => CoreError::database(other.to_string()),
    }
}

enum TxError {
    Core(CoreError),
    Db(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Db(e)
    }
}

impl TxError {
    fn into_core(self) -> CoreError {
        match self {
            Self::Core(c) => c,
            Self::Db(d) => map_db_error(d),
        }
    }
}

/// Run `work` inside a plain transaction on an already-held connection,
/// translating transaction-management failures into the core taxonomy.
/// Used by provisioning, which owns its connection for the onboarding
/// transaction instead of going through a schema binding.
pub fn run_in_transaction<T, F>(conn: &mut PgConnection, work: F) -> Result<T, CoreError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, CoreError>,
{
    conn.transaction::<T, TxError, _>(|conn| work(conn).map_err(TxError::Core))
        .map_err(TxError::into_core)
}

#[derive(QueryableByName)]
struct SchemaExists {
    #[diesel(sql_type = diesel::sql_types::Bool)]
    present: bool,
}

/// The executor. One instance per process, shared across handlers.
pub struct TenantExecutor {
    pool: DbPool,
    verified_schemas: RwLock<HashSet<String>>,
    retry_policy: RetryPolicy,
    statement_timeout: Duration,
}

impl TenantExecutor {
    pub fn new(pool: DbPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            verified_schemas: RwLock::new(HashSet::new()),
            retry_policy: RetryPolicy::default(),
            statement_timeout,
        }
    }

    /// Run `work` in a transaction bound to the ambient context's schema.
    ///
    /// Fails with `MissingContext` before touching the pool when no context
    /// is established. Commits on `Ok`, rolls back on `Err`, releases the
    /// connection either way. Transient failures re-run the whole
    /// transaction under the retry policy, so `work` must be re-runnable.
    pub async fn with_transaction<T, F>(&self, work: F) -> Result<T, CoreError>
    where
        F: Fn(&mut PgConnection) -> Result<T, CoreError>,
    {
        let ctx = context::current()?;
        let binding = SchemaBinding::from_context(&ctx)?;
        self.run_bound(binding, work).await
    }

    /// Run `work` on `public` regardless of the ambient context. For
    /// registry and audit-log access.
    pub async fn with_public<T, F>(&self, work: F) -> Result<T, CoreError>
    where
        F: Fn(&mut PgConnection) -> Result<T, CoreError>,
    {
        self.run_bound(SchemaBinding::public_access(), work).await
    }

    /// Run `work` under an explicit system binding. The entry point for
    /// provisioning migrations and background maintenance.
    pub async fn with_binding<T, F>(
        &self,
        binding: SchemaBinding,
        work: F,
    ) -> Result<T, CoreError>
    where
        F: Fn(&mut PgConnection) -> Result<T, CoreError>,
    {
        self.run_bound(binding, work).await
    }

    /// One-statement shorthand inside a tenant-bound transaction.
    pub async fn execute_tenant(&self, sql: &str) -> Result<usize, CoreError> {
        let sql = sql.to_string();
        self.with_transaction(move |conn| {
            sql_query(&sql).execute(conn).map_err(map_db_error)
        })
        .await
    }

    /// Escape hatch for provisioning; the caller owns release and gets no
    /// schema binding.
    pub fn raw_connection(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>,
        CoreError,
    > {
        self.pool
            .get()
            .map_err(|e| CoreError::unavailable(format!("connection checkout failed: {}", e)))
    }

    /// Mark a freshly provisioned schema as known-good, and forget one that
    /// was rolled back.
    pub fn register_schema(&self, schema: &SchemaName) {
        if let Ok(mut set) = self.verified_schemas.write() {
            set.insert(schema.as_str().to_string());
        }
    }

    pub fn forget_schema(&self, schema: &SchemaName) {
        if let Ok(mut set) = self.verified_schemas.write() {
            set.remove(schema.as_str());
        }
    }

    async fn run_bound<T, F>(&self, binding: SchemaBinding, work: F) -> Result<T, CoreError>
    where
        F: Fn(&mut PgConnection) -> Result<T, CoreError>,
    {
        self.ensure_schema_exists(&binding.schema)?;

        let result = retry_with_policy(self.retry_policy, || {
            let mut conn = self
                .pool
                .get()
                .map_err(|e| CoreError::unavailable(format!("connection checkout failed: {}", e)))?;

            conn.transaction::<T, TxError, _>(|conn| {
                self.bind_transaction(conn, &binding)?;
                work(conn).map_err(TxError::Core)
            })
            .map_err(TxError::into_core)
        })
        .await;

        // Exhausted retries escalate as a generic database failure
        result.map_err(|e| match e {
            CoreError::Retryable { message } => CoreError::database(format!(
                "transaction failed after retries: {}",
                message
            )),
            other => other,
        })
    }

    fn bind_transaction(
        &self,
        conn: &mut PgConnection,
        binding: &SchemaBinding,
    ) -> Result<(), diesel::result::Error> {
        // Identifier position: fenced by the SchemaName grammar
        let search_path = if binding.schema.is_public() {
            "SET LOCAL search_path TO public".to_string()
        } else {
            format!(
                "SET LOCAL search_path TO \"{}\", public",
                binding.schema.as_str()
            )
        };
        sql_query(search_path).execute(conn)?;

        sql_query("SELECT set_config('app.tenant_id', $1, true)")
            .bind::<Text, _>(&binding.rls_marker)
            .execute(conn)?;

        sql_query(format!("SET LOCAL ROLE {}", binding.db_role.as_str())).execute(conn)?;

        sql_query(format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(conn)?;

        Ok(())
    }

    fn ensure_schema_exists(&self, schema: &SchemaName) -> Result<(), CoreError> {
        if schema.is_public() {
            return Ok(());
        }
        if let Ok(set) = self.verified_schemas.read() {
            if set.contains(schema.as_str()) {
                return Ok(());
            }
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| CoreError::unavailable(format!("connection checkout failed: {}", e)))?;

        let row: SchemaExists = sql_query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1) AS present",
        )
        .bind::<Text, _>(schema.as_str())
        .get_result(&mut conn)
        .map_err(map_db_error)?;

        if !row.present {
            return Err(CoreError::database(format!(
                "tenant schema {} is registered but does not exist",
                schema
            )));
        }

        self.register_schema(schema);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    fn db_error(kind: DatabaseErrorKind, message: &str) -> DieselError {
        DieselError::DatabaseError(kind, Box::new(message.to_string()))
    }

    #[test]
    fn test_deadlock_classified_retryable() {
        let err = map_db_error(db_error(
            DatabaseErrorKind::Unknown,
            "deadlock detected while locking tuple",
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_serialization_failure_classified_retryable() {
        let err = map_db_error(db_error(
            DatabaseErrorKind::SerializationFailure,
            "could not serialize access due to concurrent update",
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unique_violation_classified_conflict() {
        let err = map_db_error(db_error(
            DatabaseErrorKind::UniqueViolation,
            "duplicate key value violates unique constraint \"invoices_external_id_key\"",
        ));
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_binding_from_tenant_context() {
        let tenant = Uuid::new_v4();
        let ctx = RequestContext::for_tenant_user(
            tenant,
            SchemaName::parse("tenant_acme_a1b2c3d4").unwrap(),
            Uuid::new_v4(),
            "a@acme.test",
            UserRole::Analyst,
        );
        let binding = SchemaBinding::from_context(&ctx).unwrap();
        assert_eq!(binding.schema().as_str(), "tenant_acme_a1b2c3d4");
        assert_eq!(binding.rls_marker, tenant.to_string());
        assert_eq!(binding.db_role, DbRole::Tenant);
    }

    #[test]
    fn test_system_binding_maps_restricted_roles() {
        let schema = SchemaName::parse("tenant_acme_a1b2c3d4").unwrap();
        let binding =
            SchemaBinding::system(UserRole::SystemMigration, Uuid::new_v4(), schema).unwrap();
        assert_eq!(binding.db_role, DbRole::Migration);

        let err = SchemaBinding::system(
            UserRole::Admin,
            Uuid::new_v4(),
            SchemaName::parse("tenant_acme_a1b2c3d4").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden { .. }));
    }

    #[test]
    fn test_public_binding_uses_job_role() {
        let binding = SchemaBinding::public_access();
        assert!(binding.schema().is_public());
        assert_eq!(binding.rls_marker, "PUBLIC_ACCESS");
        assert_eq!(binding.db_role, DbRole::Job);
    }

    #[tokio::test]
    async fn test_with_transaction_requires_context_before_pool() {
        // Pool pointing at nothing: the context check must fire first, so no
        // connection attempt ever happens.
        let pool = diesel::r2d2::Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_millis(50))
            .build_unchecked(diesel::r2d2::ConnectionManager::<PgConnection>::new(
                "postgres://127.0.0.1:1/none",
            ));
        let executor = TenantExecutor::new(pool, Duration::from_secs(5));

        let result = executor
            .with_transaction(|_conn| Ok::<_, CoreError>(()))
            .await;
        assert!(matches!(result, Err(CoreError::MissingContext)));
    }
}
