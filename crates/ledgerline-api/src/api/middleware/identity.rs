//! Identity resolver middleware.
//!
//! Runs before every handler and converts the bearer credential into the
//! ambient tenant context. The resolution order matters:
//!
//! 1. Classify the route. Public routes get a preliminary system context
//!    and skip verification entirely.
//! 2. Decode the credential *without* verifying it, only to learn which
//!    tenant's secret to verify with. Nothing from this step is trusted.
//! 3. Resolve the tenant hint (claim first; `x-tenant-id` header only on
//!    system routes).
//! 4. Verify: per-tenant secret when a tenant resolved (after the registry
//!    liveness check), platform secret otherwise.
//! 5. Re-read tenant binding and role from the user directory so a freshly
//!    onboarded user's stale lobby token still works and role changes apply
//!    without token refresh.
//!
//! The established context wraps exactly the handler invocation; nothing
//! leaks into the next request on this connection.

use std::sync::Arc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use uuid::Uuid;

use ledgerline_core::auth::{Claims, TokenService, UserRole};
use ledgerline_core::context::{run_with_context, RequestContext};
use ledgerline_core::crypto::EnvelopeCrypto;
use ledgerline_core::error::CoreError;
use ledgerline_core::tenant::SchemaName;

use crate::api::error::ApiError;
use crate::db::session::DbPool;
use crate::db::tenant::{Tenant, TenantRegistry};
use crate::db::user::{User, UserRepository};

/// Route classes recognized by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// No credential required; runs under a preliminary system context
    Public,
    /// Internal tooling; may pass a tenant hint via `x-tenant-id`
    System,
    /// Everything else; requires a verified credential
    Tenant,
}

const PUBLIC_ROUTES: &[&str] = &[
    "/auth/register",
    "/auth/login",
    "/auth/refresh",
    "/health",
    "/plans",
];

pub fn classify_route(path: &str) -> RouteClass {
    if PUBLIC_ROUTES.contains(&path) || path.starts_with("/oauth/") {
        RouteClass::Public
    } else if path.starts_with("/admin/") {
        RouteClass::System
    } else {
        RouteClass::Tenant
    }
}

/// Shared state for identity resolution.
pub struct IdentityState {
    pub registry: Arc<TenantRegistry>,
    pub pool: DbPool,
    pub envelope: Arc<EnvelopeCrypto>,
    pub platform_secret: String,
}

pub struct IdentityResolver {
    state: Arc<IdentityState>,
}

impl IdentityResolver {
    pub fn new(state: Arc<IdentityState>) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityResolver
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = IdentityResolverService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityResolverService {
            service: std::rc::Rc::new(service),
            state: self.state.clone(),
        }))
    }
}

pub struct IdentityResolverService<S> {
    service: std::rc::Rc<S>,
    state: Arc<IdentityState>,
}

impl<S, B> Service<ServiceRequest> for IdentityResolverService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let state = self.state.clone();

        Box::pin(async move {
            let route = classify_route(req.path());

            let ctx = match resolve_identity(&state, &req, route) {
                Ok(ctx) => ctx,
                Err(e) => return Err(ApiError(e).into()),
            };

            // Expose the context to extractors as well; the task-local scope
            // below is what downstream services actually rely on.
            req.extensions_mut().insert(ctx.clone());
            run_with_context(ctx, service.call(req)).await
        })
    }
}

fn resolve_identity(
    state: &IdentityState,
    req: &ServiceRequest,
    route: RouteClass,
) -> Result<RequestContext, CoreError> {
    // Step 1: public routes run with a preliminary system context
    if route == RouteClass::Public {
        return Ok(RequestContext::for_system(UserRole::SystemJob, None));
    }

    let token = bearer_token(req).ok_or_else(|| {
        CoreError::forbidden("missing tenant context: no credential presented")
    })?;

    // Step 2: unverified decode, only for the tenant hint
    let hint = TokenService::decode_unverified(token)?;

    // Step 3: resolve the tenant hint
    let tenant_hint = match hint.tenant_id {
        Some(id) => Some(id),
        None if route == RouteClass::System => header_tenant_hint(req)?,
        None => None,
    };

    // Step 4: verify against the correct secret
    let (claims, tenant) = match tenant_hint {
        Some(tenant_id) => {
            let tenant = load_active_tenant(state, tenant_id)?;
            let secret = state.envelope.unwrap(&tenant.tenant_secret)?;
            let claims = TokenService::new(secret)?.verify(token)?;
            (claims, Some(tenant))
        }
        None => {
            let claims =
                TokenService::new(state.platform_secret.as_bytes().to_vec())?.verify(token)?;
            (claims, None)
        }
    };

    // Steps 5-6: the directory is authoritative for tenant binding and role
    let user = load_directory_user(state, &claims)?;
    let role = user.parsed_role()?;

    let tenant = match (tenant, user.tenant_id) {
        (Some(tenant), Some(bound)) if tenant.id == bound => Some(tenant),
        (Some(_), _) => {
            return Err(CoreError::forbidden(
                "credential tenant does not match directory binding",
            ))
        }
        // Freshly onboarded: lobby claim, directory already has a tenant
        (None, Some(bound)) => Some(load_active_tenant(state, bound)?),
        (None, None) => None,
    };

    // Step 7: establish the final context
    match tenant {
        Some(tenant) => {
            let schema = tenant.parsed_schema()?;
            Ok(RequestContext::for_tenant_user(
                tenant.id, schema, user.id, user.email, role,
            ))
        }
        None => Ok(RequestContext::for_lobby_user(user.id, user.email, role)),
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(TokenService::extract_bearer_token)
}

fn header_tenant_hint(req: &ServiceRequest) -> Result<Option<Uuid>, CoreError> {
    match req.headers().get("x-tenant-id") {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| CoreError::forbidden("malformed x-tenant-id header"))?;
            Uuid::parse_str(raw)
                .map(Some)
                .map_err(|_| CoreError::forbidden("malformed x-tenant-id header"))
        }
    }
}

fn load_active_tenant(state: &IdentityState, tenant_id: Uuid) -> Result<Tenant, CoreError> {
    let tenant = state
        .registry
        .find_by_id(tenant_id)?
        .ok_or_else(|| CoreError::forbidden("unknown tenant"))?;

    if !tenant.is_active() {
        return Err(CoreError::forbidden(format!(
            "tenant is {}",
            tenant.status
        )));
    }
    Ok(tenant)
}

fn load_directory_user(state: &IdentityState, claims: &Claims) -> Result<User, CoreError> {
    let user_id = claims.user_id()?;
    let mut conn = state
        .pool
        .get()
        .map_err(|e| CoreError::unavailable(format!("connection checkout failed: {}", e)))?;

    let user = UserRepository::new(&mut conn)
        .find_by_id(user_id)
        .map_err(|e| CoreError::database(format!("directory lookup failed: {}", e)))?
        .ok_or_else(|| CoreError::unauthorized("credential subject no longer exists"))?;

    if !user.is_active {
        return Err(CoreError::forbidden("user account is disabled"));
    }
    Ok(user)
}

/// Require a tenant-bound context for tenant-scoped handlers.
///
/// A lobby caller on a tenant endpoint is a 403 (the context exists, the
/// tenant binding does not), distinct from `MissingContext`.
pub fn require_tenant(ctx: &RequestContext) -> Result<(Uuid, SchemaName), CoreError> {
    match ctx.tenant_id() {
        Some(id) => Ok((id, ctx.schema_name().clone())),
        None => Err(CoreError::forbidden(
            "this endpoint requires an organization-bound credential",
        )),
    }
}
