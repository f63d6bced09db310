//! Connector seam for external data sources.
//!
//! Concrete providers (accounting SaaS pulls, direct database pulls) live
//! outside this crate; here is only the capability set they must satisfy
//! and the registry that dispatches on the configured connector type. A
//! connector's `sync` runs under whatever tenant scope the caller
//! established — connectors never create their own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use ledgerline_core::error::CoreError;

use crate::etl::{EtlPipeline, EtlSummary};

/// Capability set every data connector provides.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataConnector: Send + Sync {
    /// Stable identifier used as the registry key and the quarantine
    /// `source_type` tag.
    fn connector_type(&self) -> &'static str;

    /// Cheap reachability probe for the configuration UI.
    async fn test_connection(&self) -> Result<(), CoreError>;

    /// Pull raw rows from the source.
    async fn fetch_data(&self) -> Result<Vec<Value>, CoreError>;
}

/// Fetch from the connector and push the rows through the intake pipeline.
pub async fn sync_connector(
    connector: &dyn DataConnector,
    pipeline: &EtlPipeline,
) -> Result<EtlSummary, CoreError> {
    let rows = connector.fetch_data().await?;
    pipeline
        .run_invoice_etl(rows, connector.connector_type())
        .await
}

/// Registry keyed by connector type.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<&'static str, Arc<dyn DataConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn DataConnector>) {
        self.connectors.insert(connector.connector_type(), connector);
    }

    pub fn get(&self, connector_type: &str) -> Result<Arc<dyn DataConnector>, CoreError> {
        self.connectors
            .get(connector_type)
            .cloned()
            .ok_or_else(|| {
                CoreError::validation(vec![format!(
                    "unknown connector type: {}",
                    connector_type
                )])
            })
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.connectors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut mock = MockDataConnector::new();
        mock.expect_connector_type().return_const("csv_drop");
        mock.expect_test_connection().returning(|| Ok(()));

        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(mock));

        let connector = registry.get("csv_drop").expect("registered");
        assert_eq!(connector.connector_type(), "csv_drop");
        connector.test_connection().await.expect("reachable");

        assert!(registry.get("quickbooks").is_err());
    }

    #[tokio::test]
    async fn test_fetch_returns_raw_rows() {
        let mut mock = MockDataConnector::new();
        mock.expect_connector_type().return_const("postgres_pull");
        mock.expect_fetch_data().returning(|| {
            Ok(vec![serde_json::json!({
                "invoice_id": "EXT-9",
                "total_amount": "10.00",
                "client_name": "Pulled Client",
            })])
        });

        let rows = mock.fetch_data().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["invoice_id"], "EXT-9");
    }
}
