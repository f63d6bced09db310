//! Quarantine inspection and retry endpoints.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::etl::EtlPipeline;

#[derive(Debug, Deserialize)]
pub struct RetryBatchRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RetryRecordRequest {
    #[serde(rename = "fixedData", default)]
    pub fixed_data: Value,
}

/// `GET /quarantine` — pending quarantine rows for the caller's tenant.
pub async fn list(pipeline: web::Data<EtlPipeline>) -> ApiResult<HttpResponse> {
    let rows = pipeline.list_quarantine().await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// `POST /quarantine/retry` — re-run a batch of quarantined rows.
pub async fn retry_batch(
    pipeline: web::Data<EtlPipeline>,
    body: web::Json<RetryBatchRequest>,
) -> ApiResult<HttpResponse> {
    let summary = pipeline.retry_quarantine_batch(body.into_inner().ids).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// `POST /quarantine/{id}/retry` — retry one row with caller-supplied
/// fixes. Validation failures surface as 400 and leave the row intact.
pub async fn retry_record(
    pipeline: web::Data<EtlPipeline>,
    path: web::Path<Uuid>,
    body: web::Json<RetryRecordRequest>,
) -> ApiResult<HttpResponse> {
    pipeline
        .retry_quarantine_record(path.into_inner(), body.into_inner().fixed_data)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// `POST /quarantine/{id}/resolve` — mark a row fixed at the source.
pub async fn resolve(
    pipeline: web::Data<EtlPipeline>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    pipeline.resolve_quarantine_record(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}
