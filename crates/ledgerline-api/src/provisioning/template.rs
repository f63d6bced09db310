//! Tenant schema template.
//!
//! Runs with `search_path` bound to the freshly created schema, so every
//! table lands in the tenant's namespace. The row-level-security policies
//! key on the `app.tenant_id` session variable set by the query executor;
//! they are the database-side half of the isolation contract.

use uuid::Uuid;

use ledgerline_core::tenant::SchemaName;

/// Business-table DDL for one tenant schema.
///
/// The tenant id is baked into the RLS policies as a literal. It is a
/// freshly generated UUID rendered through `Uuid::to_string`, never caller
/// input; the schema name already passed the tenant grammar check.
pub fn tenant_template_sql(tenant_id: Uuid, schema: &SchemaName) -> String {
    format!(
        r#"
CREATE TABLE invoices (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    external_id TEXT NOT NULL,
    customer_name TEXT NOT NULL,
    invoice_number TEXT NOT NULL,
    amount NUMERIC(14, 2) NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    currency TEXT NOT NULL DEFAULT 'USD',
    due_date DATE,
    metadata JSONB,
    is_encrypted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT invoices_external_id_key UNIQUE (external_id)
);

CREATE TABLE quarantine_records (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    source_type TEXT NOT NULL,
    raw_data JSONB NOT NULL,
    errors JSONB NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX invoices_status_idx ON invoices (status);
CREATE INDEX quarantine_records_status_idx ON quarantine_records (status);

ALTER TABLE invoices ENABLE ROW LEVEL SECURITY;
ALTER TABLE quarantine_records ENABLE ROW LEVEL SECURITY;

CREATE POLICY invoices_tenant_isolation ON invoices
    USING (current_setting('app.tenant_id', true) IN
        ('{tenant_id}', 'SYSTEM_MIGRATION', 'SYSTEM_JOB', 'SYSTEM_READONLY'));

CREATE POLICY quarantine_tenant_isolation ON quarantine_records
    USING (current_setting('app.tenant_id', true) IN
        ('{tenant_id}', 'SYSTEM_MIGRATION', 'SYSTEM_JOB', 'SYSTEM_READONLY'));

GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA "{schema}" TO ledgerline_tenant;
GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA "{schema}" TO ledgerline_job;
GRANT SELECT ON ALL TABLES IN SCHEMA "{schema}" TO ledgerline_readonly;
"#,
        tenant_id = tenant_id,
        schema = schema.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_carries_tenant_policy() {
        let id = Uuid::new_v4();
        let schema = SchemaName::parse("tenant_acme_a1b2c3d4").unwrap();
        let sql = tenant_template_sql(id, &schema);
        assert!(sql.contains(&id.to_string()));
        assert!(sql.contains("ENABLE ROW LEVEL SECURITY"));
        assert!(sql.contains("UNIQUE (external_id)"));
        assert!(sql.contains("\"tenant_acme_a1b2c3d4\""));
    }
}
