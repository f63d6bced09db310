//! Diesel table declarations.
//!
//! Registry tables are schema-qualified so they always resolve to `public`
//! regardless of the transaction's `search_path`. Tenant business tables
//! are deliberately unqualified: the query executor binds `search_path` to
//! exactly one tenant schema per transaction, and that binding is what
//! selects the namespace these declarations resolve into.

// --- Registry (always public) ---

diesel::table! {
    public.tenants (id) {
        id -> Uuid,
        name -> Text,
        slug -> Text,
        schema_name -> Text,
        tenant_secret -> Text,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    public.users (id) {
        id -> Uuid,
        email -> Text,
        password_hash -> Text,
        salt -> Text,
        full_name -> Text,
        role -> Text,
        tenant_id -> Nullable<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        last_login -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    public.refresh_tokens (id) {
        id -> Uuid,
        user_id -> Uuid,
        token_hash -> Text,
        expires_at -> Timestamptz,
        revoked -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    public.audit_log (id) {
        id -> Uuid,
        tenant_marker -> Text,
        actor_id -> Nullable<Uuid>,
        action -> Text,
        details -> Jsonb,
        created_at -> Timestamptz,
    }
}

// --- Tenant schema templates (resolved via the bound search_path) ---

diesel::table! {
    invoices (id) {
        id -> Uuid,
        external_id -> Text,
        customer_name -> Text,
        invoice_number -> Text,
        amount -> Numeric,
        status -> Text,
        currency -> Text,
        due_date -> Nullable<Date>,
        metadata -> Nullable<Jsonb>,
        is_encrypted -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    quarantine_records (id) {
        id -> Uuid,
        source_type -> Text,
        raw_data -> Jsonb,
        errors -> Jsonb,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(tenants, users);
