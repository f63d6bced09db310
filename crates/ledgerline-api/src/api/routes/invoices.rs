//! Invoice endpoints, the representative tenant-scoped entity.
//!
//! Every query here runs through the tenant-scoped executor, so the bound
//! `search_path` is what keeps tenant A's rows invisible to tenant B. A
//! foreign invoice id is simply absent in the caller's schema and comes
//! back 404 — indistinguishable from an id that exists nowhere.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use ledgerline_core::context;
use ledgerline_core::crypto;
use ledgerline_core::error::CoreError;

use crate::api::error::ApiResult;
use crate::api::middleware::identity::require_tenant;
use crate::api::routes::AuthState;
use crate::db::executor::map_db_error;
use crate::db::schema::invoices;
use crate::db::TenantExecutor;
use crate::etl::EtlPipeline;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = invoices)]
pub struct Invoice {
    pub id: Uuid,
    pub external_id: String,
    pub customer_name: String,
    pub invoice_number: String,
    pub amount: Decimal,
    pub status: String,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub metadata: Option<Value>,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceBody {
    pub id: Uuid,
    #[serde(rename = "externalId")]
    pub external_id: String,
    #[serde(rename = "customerName")]
    pub customer_name: String,
    #[serde(rename = "invoiceNumber")]
    pub invoice_number: String,
    pub amount: Decimal,
    pub status: String,
    pub currency: String,
    #[serde(rename = "dueDate")]
    pub due_date: Option<NaiveDate>,
    pub metadata: Option<Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Decrypt the sensitive columns for an authenticated read.
    ///
    /// Rows flagged encrypted must decrypt cleanly; a tag mismatch aborts
    /// the response rather than serving partial plaintext. Legacy rows
    /// (flag unset) pass through untouched.
    fn into_body(self, secret: &[u8]) -> Result<InvoiceBody, CoreError> {
        let (customer_name, invoice_number) = if self.is_encrypted {
            (
                crypto::decrypt_field(&self.customer_name, secret)?,
                crypto::decrypt_field(&self.invoice_number, secret)?,
            )
        } else {
            (self.customer_name, self.invoice_number)
        };

        Ok(InvoiceBody {
            id: self.id,
            external_id: self.external_id,
            customer_name,
            invoice_number,
            amount: self.amount,
            status: self.status,
            currency: self.currency,
            due_date: self.due_date,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub rows: Vec<Value>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "csv".to_string()
}

/// `GET /invoices` — all invoices in the caller's schema.
pub async fn list(
    executor: web::Data<std::sync::Arc<TenantExecutor>>,
    auth: web::Data<AuthState>,
) -> ApiResult<HttpResponse> {
    let ctx = context::current()?;
    let (tenant_id, _) = require_tenant(&ctx)?;
    let secret = auth.tenant_secret(tenant_id)?;

    let rows: Vec<Invoice> = executor
        .with_transaction(|conn| {
            use crate::db::schema::invoices::dsl;
            dsl::invoices
                .order(dsl::created_at.desc())
                .load(conn)
                .map_err(map_db_error)
        })
        .await?;

    let bodies = rows
        .into_iter()
        .map(|row| row.into_body(&secret))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(bodies))
}

/// `GET /invoices/{id}` — fetch one invoice. Cross-tenant ids are 404.
pub async fn get(
    executor: web::Data<std::sync::Arc<TenantExecutor>>,
    auth: web::Data<AuthState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let ctx = context::current()?;
    let (tenant_id, _) = require_tenant(&ctx)?;
    let secret = auth.tenant_secret(tenant_id)?;
    let invoice_id = path.into_inner();

    let row: Invoice = executor
        .with_transaction(|conn| {
            use crate::db::schema::invoices::dsl;
            dsl::invoices
                .filter(dsl::id.eq(invoice_id))
                .first(conn)
                .optional()
                .map_err(map_db_error)?
                .ok_or_else(|| CoreError::not_found("invoice"))
        })
        .await?;

    Ok(HttpResponse::Ok().json(row.into_body(&secret)?))
}

/// `POST /invoices` — upsert one invoice on its `external_id`.
pub async fn create(
    pipeline: web::Data<EtlPipeline>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    pipeline.upsert_invoice(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "success": true })))
}

/// `POST /invoices/import` — run the intake pipeline over raw rows.
pub async fn import(
    pipeline: web::Data<EtlPipeline>,
    body: web::Json<ImportRequest>,
) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    let summary = pipeline.run_invoice_etl(request.rows, &request.source).await?;
    Ok(HttpResponse::Ok().json(summary))
}
