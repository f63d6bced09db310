use actix_web::HttpResponse;

/// Liveness probe. Public, no database touch.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "ledgerline",
    }))
}
