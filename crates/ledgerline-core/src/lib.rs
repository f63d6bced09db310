//! # Ledgerline Core
//!
//! This crate provides the domain core of the Ledgerline multi-tenant backend:
//! - Ambient tenant context with task-local propagation
//! - Credential claims, signing and verification primitives
//! - Envelope crypto for per-tenant secrets and field encryption
//! - Error handling and retry policies
//! - Configuration loading with fail-fast validation
//!
//! ## Core Concepts
//!
//! Every operation in the system runs under a [`RequestContext`] that carries
//! the caller's tenant identity. The context is established exactly once per
//! request (by the identity resolver) or per background job (by
//! [`context::run_with_context`]) and propagates through all async work
//! spawned inside that scope. There is deliberately no default context:
//! [`context::current`] returns an error when no scope is active.
//!
//! Per-tenant signing secrets never touch storage in plaintext. They are
//! wrapped under a process master key by [`crypto::EnvelopeCrypto`] and only
//! unwrapped in memory for the duration of a verification or encryption call.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod tenant;

// Re-export commonly used types
pub use auth::{Claims, TokenService, UserRole};
pub use context::RequestContext;
pub use error::{CoreError, ErrorCategory, Result};
pub use tenant::{SchemaName, TenantStatus};
