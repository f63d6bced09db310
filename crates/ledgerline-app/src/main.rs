use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use ledgerline_api::api::middleware::identity::{IdentityResolver, IdentityState};
use ledgerline_api::api::routes::{self, AuthState};
use ledgerline_api::audit::{self, AuditSink};
use ledgerline_api::db::session::init_pool;
use ledgerline_api::db::tenant::TenantRegistry;
use ledgerline_api::db::TenantExecutor;
use ledgerline_api::etl::EtlPipeline;
use ledgerline_api::provisioning::ProvisioningCoordinator;
use ledgerline_core::config::AppConfig;
use ledgerline_core::crypto::EnvelopeCrypto;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    ledgerline_api::monitoring::logging::init_structured_logging();

    // Validate configuration before anything else; a missing master key or
    // platform secret must stop the boot here.
    let config = AppConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let pool = init_pool(&config.database_url, config.identity_resolution_timeout)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let envelope = Arc::new(EnvelopeCrypto::new(&config.master_key));
    let registry = Arc::new(TenantRegistry::new(pool.clone(), config.tenant_cache_ttl));
    let executor = Arc::new(TenantExecutor::new(pool.clone(), config.statement_timeout));

    let (audit_sink, audit_rx) = AuditSink::new();
    tokio::spawn(audit::run_consumer(audit_rx, executor.clone()));

    let pipeline = web::Data::new(EtlPipeline::new(
        executor.clone(),
        registry.clone(),
        envelope.clone(),
        audit_sink.clone(),
    ));
    let coordinator = web::Data::new(ProvisioningCoordinator::new(
        executor.clone(),
        registry.clone(),
        envelope.clone(),
        audit_sink.clone(),
    ));
    let auth_state = web::Data::new(AuthState {
        platform_secret: config.platform_jwt_secret.clone(),
        envelope: envelope.clone(),
        registry: registry.clone(),
    });
    let identity_state = Arc::new(IdentityState {
        registry: registry.clone(),
        pool: pool.clone(),
        envelope: envelope.clone(),
        platform_secret: config.platform_jwt_secret.clone(),
    });

    let server_url = format!("{}:{}", config.host, config.port);
    info!("Starting server at http://{}", server_url);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(executor.clone()))
            .app_data(pipeline.clone())
            .app_data(coordinator.clone())
            .app_data(auth_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .wrap(IdentityResolver::new(identity_state.clone()))
            .configure(routes::configure)
    })
    .bind(server_url)?
    .run()
    .await
}
