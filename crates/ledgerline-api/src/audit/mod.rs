//! Post-commit audit emission.
//!
//! Producers hand events to a bounded channel and never wait: a full queue
//! drops the event and bumps a counter instead of blocking the request. A
//! single consumer task drains the channel and writes `public.audit_log`
//! rows under an explicit SystemJob context — the consumer is a background
//! job like any other and obtains its scope through `run_with_context`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use tokio::sync::mpsc;
use uuid::Uuid;

use ledgerline_core::auth::UserRole;
use ledgerline_core::context::{run_with_context, RequestContext};

use crate::db::executor::map_db_error;
use crate::db::schema::audit_log;
use crate::db::TenantExecutor;

/// Queue capacity; events beyond it are dropped, not queued elsewhere.
const AUDIT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Tenant id or system marker, mirroring `app.tenant_id`
    pub tenant_marker: String,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        tenant_marker: impl Into<String>,
        actor_id: Option<Uuid>,
        action: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            tenant_marker: tenant_marker.into(),
            actor_id,
            action: action.into(),
            details,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = audit_log)]
struct NewAuditRow {
    tenant_marker: String,
    actor_id: Option<Uuid>,
    action: String,
    details: serde_json::Value,
    created_at: chrono::DateTime<Utc>,
}

/// Producer half. Cheap to clone and share via `Arc`.
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
    dropped: AtomicU64,
}

impl AuditSink {
    /// Create the sink and its consumer receiver.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(AUDIT_QUEUE_CAPACITY);
        (
            Arc::new(Self {
                tx,
                dropped: AtomicU64::new(0),
            }),
            rx,
        )
    }

    /// Fire-and-forget emission. Never blocks the caller.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("audit queue full, dropped event ({} total): {}", total, e);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain the audit channel until every producer is gone.
///
/// Spawned once at startup. Write failures are logged and do not stop the
/// consumer; audit emission is the one sanctioned fire-and-forget path.
pub async fn run_consumer(mut rx: mpsc::Receiver<AuditEvent>, executor: Arc<TenantExecutor>) {
    while let Some(event) = rx.recv().await {
        let ctx = RequestContext::for_system(UserRole::SystemJob, None);
        let result = run_with_context(ctx, async {
            executor
                .with_transaction(|conn| {
                    let row = NewAuditRow {
                        tenant_marker: event.tenant_marker.clone(),
                        actor_id: event.actor_id,
                        action: event.action.clone(),
                        details: event.details.clone(),
                        created_at: Utc::now(),
                    };
                    diesel::insert_into(audit_log::table)
                        .values(&row)
                        .execute(conn)
                        .map_err(map_db_error)
                })
                .await
        })
        .await;

        if let Err(e) = result {
            log::warn!("failed to persist audit event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_to_consumer() {
        let (sink, mut rx) = AuditSink::new();
        sink.emit(AuditEvent::new(
            "SYSTEM_JOB",
            None,
            "etl.run",
            serde_json::json!({"synced": 3}),
        ));

        let event = rx.recv().await.expect("event");
        assert_eq!(event.action, "etl.run");
        assert_eq!(sink.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = AuditSink {
            tx,
            dropped: AtomicU64::new(0),
        };

        let event = AuditEvent::new("SYSTEM_JOB", None, "etl.run", serde_json::json!({}));
        sink.emit(event.clone());
        sink.emit(event.clone());
        sink.emit(event);

        assert_eq!(sink.dropped_count(), 2);
    }
}
