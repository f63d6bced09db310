//! ETL intake pipeline: validate → encrypt → upsert → quarantine → retry.
//!
//! Runs entirely under the caller's tenant scope. The pipeline never opens
//! its own context; request handlers arrive with one from the identity
//! resolver, and scheduled pulls establish one explicitly before calling
//! in. All persistence happens inside a single executor transaction per
//! run, so a deadlock retry re-runs the whole upsert batch.

pub mod validate;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use ledgerline_core::context;
use ledgerline_core::crypto::{self, EnvelopeCrypto};
use ledgerline_core::error::CoreError;

use crate::api::middleware::identity::require_tenant;
use crate::audit::{AuditEvent, AuditSink};
use crate::db::executor::map_db_error;
use crate::db::schema::{invoices, quarantine_records};
use crate::db::tenant::TenantRegistry;
use crate::db::TenantExecutor;

use self::validate::{normalize_row, validate_row, ValidatedInvoice};

/// Outcome of one intake run.
#[derive(Debug, Serialize, PartialEq)]
pub struct EtlSummary {
    pub total: usize,
    pub synced: usize,
    pub quarantined: usize,
}

#[derive(Debug, Serialize)]
pub struct QuarantineFailure {
    pub id: Uuid,
    pub errors: Vec<String>,
}

/// Outcome of a quarantine batch retry.
#[derive(Debug, Serialize)]
pub struct RetrySummary {
    #[serde(rename = "totalProcessed")]
    pub total_processed: usize,
    pub succeeded: usize,
    pub failed: Vec<QuarantineFailure>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = invoices)]
pub struct InvoiceRecord {
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

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quarantine_records)]
pub struct NewQuarantineRecord {
    pub id: Uuid,
    pub source_type: String,
    pub raw_data: Value,
    pub errors: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = quarantine_records)]
pub struct QuarantineRecord {
    pub id: Uuid,
    pub source_type: String,
    pub raw_data: Value,
    pub errors: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub struct EtlPipeline {
    executor: Arc<TenantExecutor>,
    registry: Arc<TenantRegistry>,
    envelope: Arc<EnvelopeCrypto>,
    audit: Arc<AuditSink>,
}

impl EtlPipeline {
    pub fn new(
        executor: Arc<TenantExecutor>,
        registry: Arc<TenantRegistry>,
        envelope: Arc<EnvelopeCrypto>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            executor,
            registry,
            envelope,
            audit,
        }
    }

    /// Validate, encrypt and upsert a batch of raw rows; quarantine the
    /// rest. Idempotent on `external_id`: a re-submitted row updates the
    /// existing invoice instead of duplicating it.
    pub async fn run_invoice_etl(
        &self,
        rows: Vec<Value>,
        source: &str,
    ) -> Result<EtlSummary, CoreError> {
        let ctx = context::current()?;
        let (tenant_id, _) = require_tenant(&ctx)?;
        let secret = self.tenant_secret(tenant_id)?;

        let total = rows.len();
        let mut records: Vec<InvoiceRecord> = Vec::new();
        let mut rejects: Vec<NewQuarantineRecord> = Vec::new();

        for (index, raw) in rows.into_iter().enumerate() {
            let row_number = index + 1;
            let object = match raw {
                Value::Object(object) => normalize_row(&object),
                other => {
                    rejects.push(quarantine_reject(
                        source,
                        other,
                        vec![format!("row {}: payload is not an object", row_number)],
                    ));
                    continue;
                }
            };

            match validate_row(&object) {
                Ok(valid) => records.push(to_invoice_record(valid, &secret)?),
                Err(messages) => {
                    let numbered = messages
                        .into_iter()
                        .map(|m| format!("row {}: {}", row_number, m))
                        .collect();
                    rejects.push(quarantine_reject(source, Value::Object(object), numbered));
                }
            }
        }

        let synced = records.len();
        let quarantined = rejects.len();

        self.executor
            .with_transaction(|conn| {
                if !records.is_empty() {
                    upsert_invoices(conn, &records)?;
                }
                if !rejects.is_empty() {
                    diesel::insert_into(quarantine_records::table)
                        .values(&rejects)
                        .execute(conn)
                        .map_err(map_db_error)?;
                }
                Ok(())
            })
            .await?;

        self.audit.emit(AuditEvent::new(
            tenant_id.to_string(),
            Some(ctx.user_id()),
            "etl.invoices.completed",
            serde_json::json!({
                "source": source,
                "total": total,
                "synced": synced,
                "quarantined": quarantined,
            }),
        ));

        Ok(EtlSummary {
            total,
            synced,
            quarantined,
        })
    }

    /// Validate and upsert a single row from the API surface. Unlike the
    /// batch path, a validation failure here is the caller's error and
    /// surfaces directly instead of landing in quarantine.
    pub async fn upsert_invoice(&self, row: Value) -> Result<(), CoreError> {
        let ctx = context::current()?;
        let (tenant_id, _) = require_tenant(&ctx)?;
        let secret = self.tenant_secret(tenant_id)?;

        let object = row.as_object().cloned().ok_or_else(|| {
            CoreError::validation(vec!["payload must be a JSON object".to_string()])
        })?;
        let valid = validate_row(&normalize_row(&object)).map_err(CoreError::validation)?;
        let record = to_invoice_record(valid, &secret)?;

        self.executor
            .with_transaction(|conn| upsert_invoices(conn, std::slice::from_ref(&record)))
            .await
    }

    /// Re-run validation on stored quarantine rows; upsert the successes
    /// and delete only their quarantine entries.
    pub async fn retry_quarantine_batch(&self, ids: Vec<Uuid>) -> Result<RetrySummary, CoreError> {
        let ctx = context::current()?;
        let (tenant_id, _) = require_tenant(&ctx)?;
        let secret = self.tenant_secret(tenant_id)?;

        let (succeeded_ids, failed) = self
            .executor
            .with_transaction(|conn| {
                use crate::db::schema::quarantine_records::dsl;

                let rows: Vec<QuarantineRecord> = dsl::quarantine_records
                    .filter(dsl::id.eq_any(&ids))
                    .load(conn)
                    .map_err(map_db_error)?;

                let mut succeeded: Vec<Uuid> = Vec::new();
                let mut records: Vec<InvoiceRecord> = Vec::new();
                let mut failed: Vec<QuarantineFailure> = Vec::new();

                for row in &rows {
                    let object = match row.raw_data.as_object() {
                        Some(object) => normalize_row(object),
                        None => {
                            failed.push(QuarantineFailure {
                                id: row.id,
                                errors: vec!["stored payload is not an object".to_string()],
                            });
                            continue;
                        }
                    };
                    match validate_row(&object) {
                        Ok(valid) => {
                            records.push(to_invoice_record(valid, &secret)?);
                            succeeded.push(row.id);
                        }
                        Err(errors) => failed.push(QuarantineFailure { id: row.id, errors }),
                    }
                }

                if !records.is_empty() {
                    upsert_invoices(conn, &records)?;
                    diesel::delete(dsl::quarantine_records.filter(dsl::id.eq_any(&succeeded)))
                        .execute(conn)
                        .map_err(map_db_error)?;
                }

                Ok((succeeded, failed))
            })
            .await?;

        for id in &succeeded_ids {
            self.audit.emit(AuditEvent::new(
                tenant_id.to_string(),
                Some(ctx.user_id()),
                "etl.quarantine.retried",
                serde_json::json!({ "quarantineId": id }),
            ));
        }

        Ok(RetrySummary {
            total_processed: succeeded_ids.len() + failed.len(),
            succeeded: succeeded_ids.len(),
            failed,
        })
    }

    /// Single-row retry with caller-supplied fixes merged over the stored
    /// payload. Validation failure leaves the quarantine row intact and
    /// surfaces the messages.
    pub async fn retry_quarantine_record(
        &self,
        id: Uuid,
        fixed_fields: Value,
    ) -> Result<(), CoreError> {
        let ctx = context::current()?;
        let (tenant_id, _) = require_tenant(&ctx)?;
        let secret = self.tenant_secret(tenant_id)?;

        self.executor
            .with_transaction(|conn| {
                use crate::db::schema::quarantine_records::dsl;

                let row: QuarantineRecord = dsl::quarantine_records
                    .filter(dsl::id.eq(id))
                    .first(conn)
                    .optional()
                    .map_err(map_db_error)?
                    .ok_or_else(|| CoreError::not_found("quarantine record"))?;

                let mut merged = row.raw_data.as_object().cloned().unwrap_or_default();
                if let Some(fixes) = fixed_fields.as_object() {
                    for (key, value) in fixes {
                        merged.insert(key.clone(), value.clone());
                    }
                }

                let valid = validate_row(&normalize_row(&merged))
                    .map_err(CoreError::validation)?;
                let record = to_invoice_record(valid, &secret)?;

                upsert_invoices(conn, std::slice::from_ref(&record))?;
                diesel::delete(dsl::quarantine_records.filter(dsl::id.eq(id)))
                    .execute(conn)
                    .map_err(map_db_error)?;

                Ok(())
            })
            .await?;

        self.audit.emit(AuditEvent::new(
            tenant_id.to_string(),
            Some(ctx.user_id()),
            "etl.quarantine.retried",
            serde_json::json!({ "quarantineId": id }),
        ));

        Ok(())
    }

    /// Mark a quarantine row resolved without re-running it, for rows fixed
    /// at the source. `pending → resolved` is the only allowed mutation.
    pub async fn resolve_quarantine_record(&self, id: Uuid) -> Result<(), CoreError> {
        let ctx = context::current()?;
        require_tenant(&ctx)?;

        self.executor
            .with_transaction(|conn| {
                use crate::db::schema::quarantine_records::dsl;

                let updated = diesel::update(
                    dsl::quarantine_records
                        .filter(dsl::id.eq(id))
                        .filter(dsl::status.eq("pending")),
                )
                .set(dsl::status.eq("resolved"))
                .execute(conn)
                .map_err(map_db_error)?;

                if updated == 0 {
                    return Err(CoreError::not_found("quarantine record"));
                }
                Ok(())
            })
            .await
    }

    /// Pending quarantine rows for the current tenant.
    pub async fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>, CoreError> {
        let ctx = context::current()?;
        require_tenant(&ctx)?;

        self.executor
            .with_transaction(|conn| {
                use crate::db::schema::quarantine_records::dsl;

                dsl::quarantine_records
                    .filter(dsl::status.eq("pending"))
                    .order(dsl::created_at.desc())
                    .load(conn)
                    .map_err(map_db_error)
            })
            .await
    }

    fn tenant_secret(&self, tenant_id: Uuid) -> Result<Vec<u8>, CoreError> {
        let tenant = self
            .registry
            .find_by_id(tenant_id)?
            .ok_or_else(|| CoreError::forbidden("unknown tenant"))?;
        self.envelope.unwrap(&tenant.tenant_secret)
    }
}

fn quarantine_reject(source: &str, raw: Value, errors: Vec<String>) -> NewQuarantineRecord {
    NewQuarantineRecord {
        id: Uuid::new_v4(),
        source_type: source.to_string(),
        raw_data: raw,
        errors: serde_json::json!(errors),
        status: "pending".to_string(),
        created_at: Utc::now(),
    }
}

fn to_invoice_record(valid: ValidatedInvoice, secret: &[u8]) -> Result<InvoiceRecord, CoreError> {
    let invoice_number = valid
        .invoice_number
        .unwrap_or_else(|| synthesize_invoice_number());
    let now = Utc::now();

    Ok(InvoiceRecord {
        id: Uuid::new_v4(),
        external_id: valid.external_id,
        customer_name: crypto::encrypt_field(&valid.customer_name, secret)?,
        invoice_number: crypto::encrypt_field(&invoice_number, secret)?,
        amount: valid.amount,
        status: valid.status,
        currency: valid.currency,
        due_date: valid.due_date,
        metadata: valid.metadata,
        is_encrypted: true,
        created_at: now,
        updated_at: now,
    })
}

fn synthesize_invoice_number() -> String {
    let mut rng = rand::thread_rng();
    format!("INV-{:08X}", rng.gen::<u32>())
}

/// Parameterized multi-row upsert on the tenant-local natural key.
/// `created_at` and `id` keep their original values on conflict.
fn upsert_invoices(conn: &mut PgConnection, records: &[InvoiceRecord]) -> Result<(), CoreError> {
    diesel::insert_into(invoices::table)
        .values(records)
        .on_conflict(invoices::external_id)
        .do_update()
        .set((
            invoices::amount.eq(excluded(invoices::amount)),
            invoices::status.eq(excluded(invoices::status)),
            invoices::customer_name.eq(excluded(invoices::customer_name)),
            invoices::invoice_number.eq(excluded(invoices::invoice_number)),
            invoices::metadata.eq(excluded(invoices::metadata)),
            invoices::updated_at.eq(excluded(invoices::updated_at)),
        ))
        .execute(conn)
        .map_err(map_db_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_core::crypto::is_encrypted_format;
    use serde_json::json;
    use std::str::FromStr;

    fn secret() -> Vec<u8> {
        EnvelopeCrypto::generate_tenant_secret()
    }

    fn valid_invoice() -> ValidatedInvoice {
        ValidatedInvoice {
            external_id: "EXT-1".to_string(),
            customer_name: "Race Corp".to_string(),
            amount: Decimal::from_str("250").unwrap(),
            status: "pending".to_string(),
            currency: "USD".to_string(),
            due_date: None,
            invoice_number: None,
            metadata: None,
        }
    }

    #[test]
    fn test_transform_encrypts_sensitive_fields() {
        let secret = secret();
        let record = to_invoice_record(valid_invoice(), &secret).unwrap();

        assert!(record.is_encrypted);
        assert!(is_encrypted_format(&record.customer_name));
        assert!(is_encrypted_format(&record.invoice_number));
        assert_ne!(record.customer_name, "Race Corp");
        assert_eq!(
            crypto::decrypt_field(&record.customer_name, &secret).unwrap(),
            "Race Corp"
        );
        // Plaintext columns stay plaintext
        assert_eq!(record.amount, Decimal::from_str("250").unwrap());
        assert_eq!(record.status, "pending");
    }

    #[test]
    fn test_invoice_number_synthesized_when_absent() {
        let secret = secret();
        let record = to_invoice_record(valid_invoice(), &secret).unwrap();
        let number = crypto::decrypt_field(&record.invoice_number, &secret).unwrap();
        assert!(number.starts_with("INV-"));

        let mut with_number = valid_invoice();
        with_number.invoice_number = Some("INV-001".to_string());
        let record = to_invoice_record(with_number, &secret).unwrap();
        assert_eq!(
            crypto::decrypt_field(&record.invoice_number, &secret).unwrap(),
            "INV-001"
        );
    }

    #[test]
    fn test_quarantine_reject_shape() {
        let reject = quarantine_reject(
            "csv",
            json!({"amount": "999.00"}),
            vec!["row 2: customer_name is required".to_string()],
        );
        assert_eq!(reject.status, "pending");
        assert_eq!(reject.source_type, "csv");
        assert_eq!(
            reject.errors,
            json!(["row 2: customer_name is required"])
        );
    }

    #[tokio::test]
    async fn test_pipeline_requires_context() {
        // No ambient scope: the pipeline must fail before any validation or
        // database work.
        let pool = diesel::r2d2::Pool::builder()
            .max_size(1)
            .connection_timeout(std::time::Duration::from_millis(50))
            .build_unchecked(diesel::r2d2::ConnectionManager::<PgConnection>::new(
                "postgres://127.0.0.1:1/none",
            ));
        let executor = Arc::new(TenantExecutor::new(
            pool.clone(),
            std::time::Duration::from_secs(5),
        ));
        let registry = Arc::new(TenantRegistry::new(
            pool,
            std::time::Duration::from_secs(60),
        ));
        let master = ledgerline_core::crypto::MasterKey::from_hex(&"ab".repeat(32)).unwrap();
        let envelope = Arc::new(EnvelopeCrypto::new(&master));
        let (audit, _rx) = AuditSink::new();

        let pipeline = EtlPipeline::new(executor, registry, envelope, audit);
        let result = pipeline
            .run_invoice_etl(vec![json!({"external_id": "X"})], "csv")
            .await;
        assert!(matches!(result, Err(CoreError::MissingContext)));
    }
}
