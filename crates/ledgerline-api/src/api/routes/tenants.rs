//! Tenant onboarding endpoint.

use actix_web::{web, HttpResponse};

use ledgerline_core::context;
use ledgerline_core::error::CoreError;

use crate::api::error::ApiResult;
use crate::provisioning::{ProvisioningCoordinator, ProvisioningRequest};

/// `POST /tenants/setup` — create an organization for the calling lobby
/// user. Requires a lobby credential; a caller that already belongs to a
/// tenant cannot onboard twice.
pub async fn setup(
    coordinator: web::Data<ProvisioningCoordinator>,
    body: web::Json<ProvisioningRequest>,
) -> ApiResult<HttpResponse> {
    let ctx = context::current()?;
    if ctx.tenant_id().is_some() {
        return Err(CoreError::forbidden("user already belongs to an organization").into());
    }

    let provisioned = coordinator
        .create_organization(ctx.user_id(), body.into_inner())
        .await?;

    log::info!(
        "provisioned tenant {} ({}) for user {}",
        provisioned.tenant.id,
        provisioned.tenant.slug,
        ctx.user_id()
    );

    Ok(HttpResponse::Created().json(serde_json::json!({
        "organization": {
            "id": provisioned.tenant.id,
            "name": provisioned.tenant.name,
            "slug": provisioned.tenant.slug,
            "schemaName": provisioned.tenant.schema_name,
        },
        "auth": {
            "access_token": provisioned.access_token,
            "refresh_token": provisioned.refresh_token,
        },
    })))
}
