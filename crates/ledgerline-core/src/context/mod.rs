//! Ambient tenant context.
//!
//! The per-operation identity carrier. The identity resolver establishes a
//! context around each request handler; background jobs establish one
//! explicitly through [`run_with_context`] — that helper is the only way to
//! obtain a tenant scope outside the request pipeline. The context lives in
//! Tokio task-local storage, so it survives every suspension point inside
//! the scope and is destroyed when the scope exits.
//!
//! There is no fallback identity. [`current`] returns
//! [`CoreError::MissingContext`] when called outside a scope; nothing in
//! this crate papers over that error.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::UserRole;
use crate::error::CoreError;
use crate::tenant::SchemaName;

tokio::task_local! {
    static CURRENT_CONTEXT: RequestContext;
}

/// Immutable identity carrier for one request or job.
///
/// Fields are private: elevating a lobby user into a tenant scope, or a
/// system job into a specific tenant's schema, produces a *new* context via
/// the constructors rather than mutating an established one.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    tenant_id: Option<Uuid>,
    schema_name: SchemaName,
    user_id: Uuid,
    user_email: String,
    role: UserRole,
    request_id: Uuid,
    established_at: DateTime<Utc>,
}

impl RequestContext {
    /// Context for an authenticated tenant user.
    pub fn for_tenant_user(
        tenant_id: Uuid,
        schema_name: SchemaName,
        user_id: Uuid,
        user_email: impl Into<String>,
        role: UserRole,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            schema_name,
            user_id,
            user_email: user_email.into(),
            role,
            request_id: Uuid::new_v4(),
            established_at: Utc::now(),
        }
    }

    /// Context for an authenticated user that has not joined a tenant.
    pub fn for_lobby_user(user_id: Uuid, user_email: impl Into<String>, role: UserRole) -> Self {
        Self {
            tenant_id: None,
            schema_name: SchemaName::public(),
            user_id,
            user_email: user_email.into(),
            role,
            request_id: Uuid::new_v4(),
            established_at: Utc::now(),
        }
    }

    /// Synthetic context for internal work. `binding` scopes the identity to
    /// one tenant's schema; `None` means cross-tenant work on `public`.
    pub fn for_system(role: UserRole, binding: Option<(Uuid, SchemaName)>) -> Self {
        debug_assert!(role.is_system(), "system context requires a system role");
        let (tenant_id, schema_name) = match binding {
            Some((id, schema)) => (Some(id), schema),
            None => (None, SchemaName::public()),
        };
        Self {
            tenant_id,
            schema_name,
            user_id: Uuid::nil(),
            user_email: format!("{}@system.internal", role.as_str().to_ascii_lowercase()),
            role,
            request_id: Uuid::new_v4(),
            established_at: Utc::now(),
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    pub fn schema_name(&self) -> &SchemaName {
        &self.schema_name
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn is_system(&self) -> bool {
        self.role.is_system()
    }

    /// Value for the database-side `app.tenant_id` session variable.
    pub fn rls_marker(&self) -> String {
        match (self.tenant_id, self.role) {
            (Some(id), _) => id.to_string(),
            (None, UserRole::SystemMigration) => "SYSTEM_MIGRATION".to_string(),
            (None, UserRole::SystemJob) => "SYSTEM_JOB".to_string(),
            (None, UserRole::SystemReadonly) => "SYSTEM_READONLY".to_string(),
            (None, _) => "PUBLIC_ACCESS".to_string(),
        }
    }
}

/// Run `work` with `ctx` as the current ambient context.
///
/// Nesting is supported: an inner scope shadows the outer one and the outer
/// context is restored when the inner future completes.
pub async fn run_with_context<F>(ctx: RequestContext, work: F) -> F::Output
where
    F: Future,
{
    CURRENT_CONTEXT.scope(ctx, work).await
}

/// The current ambient context, or `MissingContext` when no scope is active.
pub fn current() -> Result<RequestContext, CoreError> {
    CURRENT_CONTEXT
        .try_with(|ctx| ctx.clone())
        .map_err(|_| CoreError::MissingContext)
}

/// Whether an ambient context is established on this task.
pub fn has() -> bool {
    CURRENT_CONTEXT.try_with(|_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_ctx(email: &str) -> RequestContext {
        RequestContext::for_tenant_user(
            Uuid::new_v4(),
            SchemaName::parse("tenant_acme_a1b2c3d4").unwrap(),
            Uuid::new_v4(),
            email,
            UserRole::Staff,
        )
    }

    #[tokio::test]
    async fn test_current_fails_outside_scope() {
        assert!(matches!(current(), Err(CoreError::MissingContext)));
        assert!(!has());
    }

    #[tokio::test]
    async fn test_context_visible_inside_scope() {
        let ctx = user_ctx("a@acme.test");
        let tenant = ctx.tenant_id();

        run_with_context(ctx, async move {
            let seen = current().expect("context in scope");
            assert_eq!(seen.tenant_id(), tenant);
            assert_eq!(seen.user_email(), "a@acme.test");
        })
        .await;

        assert!(!has());
    }

    #[tokio::test]
    async fn test_context_survives_suspension_points() {
        run_with_context(user_ctx("a@acme.test"), async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert!(has());
            tokio::task::yield_now().await;
            assert_eq!(current().unwrap().user_email(), "a@acme.test");
        })
        .await;
    }

    #[tokio::test]
    async fn test_nested_scope_restores_outer() {
        run_with_context(user_ctx("outer@acme.test"), async {
            run_with_context(user_ctx("inner@acme.test"), async {
                assert_eq!(current().unwrap().user_email(), "inner@acme.test");
            })
            .await;
            assert_eq!(current().unwrap().user_email(), "outer@acme.test");
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_independent() {
        let a = tokio::spawn(run_with_context(user_ctx("a@acme.test"), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current().unwrap().user_email().to_string()
        }));
        let b = tokio::spawn(run_with_context(user_ctx("b@bravo.test"), async {
            current().unwrap().user_email().to_string()
        }));

        assert_eq!(a.await.unwrap(), "a@acme.test");
        assert_eq!(b.await.unwrap(), "b@bravo.test");
    }

    #[test]
    fn test_rls_marker_values() {
        let tenant = Uuid::new_v4();
        let schema = SchemaName::parse("tenant_acme_a1b2c3d4").unwrap();

        let ctx = RequestContext::for_system(UserRole::SystemMigration, Some((tenant, schema)));
        assert_eq!(ctx.rls_marker(), tenant.to_string());

        let ctx = RequestContext::for_system(UserRole::SystemJob, None);
        assert_eq!(ctx.rls_marker(), "SYSTEM_JOB");

        let ctx = RequestContext::for_lobby_user(Uuid::new_v4(), "l@l.test", UserRole::Staff);
        assert_eq!(ctx.rls_marker(), "PUBLIC_ACCESS");
    }
}
