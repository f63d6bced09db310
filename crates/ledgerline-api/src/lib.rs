//! # Ledgerline API
//!
//! HTTP surface and database layer for the Ledgerline multi-tenant backend.
//! This crate provides:
//!
//! - The identity resolver middleware that turns bearer credentials into an
//!   ambient tenant context
//! - The tenant registry and global user directory over `public.*` tables
//! - The tenant-scoped query executor binding every transaction to one
//!   tenant schema
//! - The provisioning coordinator that creates tenants atomically with
//!   compensating rollback
//! - The ETL intake pipeline (validate, encrypt, upsert, quarantine, retry)
//! - A bounded audit event sink and the connector registry seam
//!
//! ## Isolation model
//!
//! Registry tables are declared schema-qualified (`public.*`) in the diesel
//! schema, so they resolve identically under any `search_path`. Tenant
//! business tables are declared *unqualified*: the query executor's
//! per-transaction `SET LOCAL search_path` decides which tenant's namespace
//! they resolve to, and the schema-name grammar check is the only path onto
//! that statement.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod api;
pub mod audit;
pub mod connectors;
pub mod db;
pub mod etl;
pub mod monitoring;
pub mod provisioning;
