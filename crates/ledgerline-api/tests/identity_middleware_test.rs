//! Identity resolver behavior that is observable without a database:
//! route classification, credential fencing, and the context scope that
//! public routes receive. Everything that needs the registry or the user
//! directory is covered by the database-backed test suite.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App, HttpResponse};
use uuid::Uuid;

use ledgerline_api::api::middleware::identity::{IdentityResolver, IdentityState};
use ledgerline_api::db::tenant::TenantRegistry;
use ledgerline_core::auth::{Claims, TokenService, UserRole};
use ledgerline_core::context;
use ledgerline_core::crypto::{EnvelopeCrypto, MasterKey};

const PLATFORM_SECRET: &str = "platform-secret-0123456789abcdef0123456789";

fn unreachable_pool() -> ledgerline_api::db::DbPool {
    diesel::r2d2::Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_millis(50))
        .build_unchecked(diesel::r2d2::ConnectionManager::new(
            "postgres://127.0.0.1:1/none",
        ))
}

fn identity_state() -> Arc<IdentityState> {
    let pool = unreachable_pool();
    let master = MasterKey::from_hex(&"ab".repeat(32)).unwrap();
    Arc::new(IdentityState {
        registry: Arc::new(TenantRegistry::new(pool.clone(), Duration::from_secs(60))),
        pool,
        envelope: Arc::new(EnvelopeCrypto::new(&master)),
        platform_secret: PLATFORM_SECRET.to_string(),
    })
}

async fn context_probe() -> HttpResponse {
    match context::current() {
        Ok(ctx) => HttpResponse::Ok().json(serde_json::json!({
            "role": ctx.role().as_str(),
            "tenantId": ctx.tenant_id(),
            "schema": ctx.schema_name().as_str(),
        })),
        Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "no context"
        })),
    }
}

#[actix_web::test]
async fn test_public_route_runs_under_preliminary_system_context() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityResolver::new(identity_state()))
            .route("/health", web::get().to(context_probe)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["role"], "SYSTEM_JOB");
    assert_eq!(body["tenantId"], serde_json::Value::Null);
    assert_eq!(body["schema"], "public");
}

#[actix_web::test]
async fn test_protected_route_without_credential_is_forbidden() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityResolver::new(identity_state()))
            .route("/invoices", web::get().to(context_probe)),
    )
    .await;

    let req = test::TestRequest::get().uri("/invoices").to_request();
    let result = test::try_call_service(&app, req).await;

    let err = result.expect_err("middleware must reject the request");
    assert_eq!(err.as_response_error().status_code().as_u16(), 403);
}

#[actix_web::test]
async fn test_malformed_token_is_unauthorized() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityResolver::new(identity_state()))
            .route("/invoices", web::get().to(context_probe)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/invoices")
        .insert_header(("Authorization", "Bearer not.a.token"))
        .to_request();
    let result = test::try_call_service(&app, req).await;

    let err = result.expect_err("middleware must reject the request");
    assert_eq!(err.as_response_error().status_code().as_u16(), 401);
}

#[actix_web::test]
async fn test_wrongly_signed_lobby_token_is_unauthorized() {
    // Signed with a different platform secret; no tenant hint, so
    // verification fails before any database access.
    let claims = Claims::access(
        Uuid::new_v4(),
        "intruder@example.com",
        UserRole::Staff,
        None,
        "public",
    );
    let token = TokenService::new(b"some-other-secret-entirely-0123456789".to_vec())
        .unwrap()
        .sign(&claims)
        .unwrap();

    let app = test::init_service(
        App::new()
            .wrap(IdentityResolver::new(identity_state()))
            .route("/invoices", web::get().to(context_probe)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/invoices")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let result = test::try_call_service(&app, req).await;

    let err = result.expect_err("middleware must reject the request");
    assert_eq!(err.as_response_error().status_code().as_u16(), 401);
}

#[actix_web::test]
async fn test_no_context_leaks_between_requests() {
    let app = test::init_service(
        App::new()
            .wrap(IdentityResolver::new(identity_state()))
            .route("/health", web::get().to(context_probe)),
    )
    .await;

    // Two sequential requests both see a fresh preliminary context, and the
    // test task itself never observes one.
    for _ in 0..2 {
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
    assert!(!context::has());
}
