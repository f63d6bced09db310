//! Route handlers and their shared state.

pub mod auth;
pub mod health;
pub mod invoices;
pub mod quarantine;
pub mod tenants;

use std::sync::Arc;

use actix_web::web;
use uuid::Uuid;

use ledgerline_core::crypto::EnvelopeCrypto;
use ledgerline_core::error::CoreError;

use crate::db::tenant::TenantRegistry;

/// Key material and registry access shared by the auth and invoice
/// handlers.
pub struct AuthState {
    pub platform_secret: String,
    pub envelope: Arc<EnvelopeCrypto>,
    pub registry: Arc<TenantRegistry>,
}

impl AuthState {
    /// Unwrap the signing/field secret of an active tenant.
    pub fn tenant_secret(&self, tenant_id: Uuid) -> Result<Vec<u8>, CoreError> {
        let tenant = self
            .registry
            .find_by_id(tenant_id)?
            .ok_or_else(|| CoreError::forbidden("unknown tenant"))?;
        if !tenant.is_active() {
            return Err(CoreError::forbidden(format!("tenant is {}", tenant.status)));
        }
        self.envelope.unwrap(&tenant.tenant_secret)
    }
}

/// Mount every route on the application.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(auth::register))
            .route("/login", web::post().to(auth::login))
            .route("/refresh", web::post().to(auth::refresh)),
    )
    .service(web::scope("/tenants").route("/setup", web::post().to(tenants::setup)))
    .service(
        web::scope("/invoices")
            .route("", web::get().to(invoices::list))
            .route("", web::post().to(invoices::create))
            .route("/import", web::post().to(invoices::import))
            .route("/{id}", web::get().to(invoices::get)),
    )
    .service(
        web::scope("/quarantine")
            .route("", web::get().to(quarantine::list))
            .route("/retry", web::post().to(quarantine::retry_batch))
            .route("/{id}/retry", web::post().to(quarantine::retry_record))
            .route("/{id}/resolve", web::post().to(quarantine::resolve)),
    )
    .route("/health", web::get().to(health::health_check));
}
