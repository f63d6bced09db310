//! Raw-row normalization and validation for the invoice intake pipeline.
//!
//! Upstream connectors and CSV uploads disagree on field names, so rows are
//! first normalized through a fixed alias table, then validated. Validation
//! accumulates every problem in a row rather than stopping at the first,
//! because the quarantine UI shows the full list to the person fixing the
//! row.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Canonical-name aliases seen in the wild. The canonical key wins when
/// both are present.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("invoice_id", "external_id"),
    ("reference", "external_id"),
    ("total_amount", "amount"),
    ("total", "amount"),
    ("client_name", "customer_name"),
    ("customer", "customer_name"),
    ("invoice_no", "invoice_number"),
    ("due", "due_date"),
];

pub const VALID_STATUSES: &[&str] = &["pending", "paid", "overdue", "cancelled"];
pub const VALID_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "CAD", "AUD", "KES"];

pub const MIN_AMOUNT: &str = "0.01";
pub const MAX_AMOUNT: &str = "999999999.99";

/// A row that passed validation, still in plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInvoice {
    pub external_id: String,
    pub customer_name: String,
    pub amount: Decimal,
    pub status: String,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub invoice_number: Option<String>,
    pub metadata: Option<Value>,
}

/// Rewrite known aliases onto canonical field names.
pub fn normalize_row(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut row = raw.clone();
    for (alias, canonical) in FIELD_ALIASES {
        if row.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = row.remove(*alias) {
            row.insert((*canonical).to_string(), value);
        }
    }
    row
}

fn text_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_field(row: &Map<String, Value>) -> Option<Decimal> {
    match row.get("amount") {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Validate one normalized row. Returns the transformed record or the full
/// list of problems found.
pub fn validate_row(row: &Map<String, Value>) -> Result<ValidatedInvoice, Vec<String>> {
    let mut errors = Vec::new();

    let external_id = text_field(row, "external_id");
    if external_id.is_none() {
        errors.push("external_id is required".to_string());
    }

    let customer_name = text_field(row, "customer_name");
    if customer_name.is_none() {
        errors.push("customer_name is required".to_string());
    }

    let min = Decimal::from_str(MIN_AMOUNT).expect("min amount literal");
    let max = Decimal::from_str(MAX_AMOUNT).expect("max amount literal");
    let amount = match amount_field(row) {
        Some(value) if value >= min && value <= max => Some(value),
        Some(_) => {
            errors.push(format!(
                "amount must be between {} and {}",
                MIN_AMOUNT, MAX_AMOUNT
            ));
            None
        }
        None => {
            errors.push("amount must be a number".to_string());
            None
        }
    };

    let status = match text_field(row, "status") {
        Some(value) => {
            let lowered = value.to_lowercase();
            if VALID_STATUSES.contains(&lowered.as_str()) {
                lowered
            } else {
                errors.push(format!(
                    "status must be one of {}",
                    VALID_STATUSES.join(", ")
                ));
                String::new()
            }
        }
        None => "pending".to_string(),
    };

    let currency = match text_field(row, "currency") {
        Some(value) => {
            let upper = value.to_uppercase();
            if VALID_CURRENCIES.contains(&upper.as_str()) {
                upper
            } else {
                errors.push(format!(
                    "currency must be one of {}",
                    VALID_CURRENCIES.join(", ")
                ));
                String::new()
            }
        }
        None => "USD".to_string(),
    };

    let due_date = match row.get("due_date") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                errors.push("due_date must be an ISO date (YYYY-MM-DD)".to_string());
                None
            }
        },
        Some(_) => {
            errors.push("due_date must be an ISO date (YYYY-MM-DD)".to_string());
            None
        }
    };

    let (Some(external_id), Some(customer_name), Some(amount)) =
        (external_id, customer_name, amount)
    else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedInvoice {
        external_id,
        customer_name,
        amount,
        status,
        currency,
        due_date,
        invoice_number: text_field(row, "invoice_number"),
        metadata: row.get("metadata").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object row")
    }

    #[test]
    fn test_aliases_normalized() {
        let normalized = normalize_row(&row(json!({
            "invoice_id": "EXT-1",
            "total_amount": "1200.00",
            "client_name": "Good Client",
        })));
        assert_eq!(normalized["external_id"], "EXT-1");
        assert_eq!(normalized["amount"], "1200.00");
        assert_eq!(normalized["customer_name"], "Good Client");
    }

    #[test]
    fn test_canonical_wins_over_alias() {
        let normalized = normalize_row(&row(json!({
            "external_id": "CANONICAL",
            "invoice_id": "ALIAS",
        })));
        assert_eq!(normalized["external_id"], "CANONICAL");
    }

    #[test]
    fn test_valid_row_passes() {
        let record = validate_row(&row(json!({
            "external_id": "INV-001",
            "customer_name": "Good Client",
            "amount": "1200.00",
            "status": "paid",
            "currency": "eur",
            "due_date": "2026-09-01",
        })))
        .expect("valid row");

        assert_eq!(record.external_id, "INV-001");
        assert_eq!(record.amount, Decimal::from_str("1200.00").unwrap());
        assert_eq!(record.status, "paid");
        assert_eq!(record.currency, "EUR");
        assert_eq!(
            record.due_date,
            Some(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap())
        );
    }

    #[test]
    fn test_missing_customer_name_reported() {
        let errors = validate_row(&row(json!({
            "external_id": "INV-BAD",
            "amount": "999.00",
        })))
        .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("customer_name")));
    }

    #[test]
    fn test_all_errors_accumulated() {
        let errors = validate_row(&row(json!({
            "amount": "-5",
            "status": "unknown",
            "currency": "XXX",
            "due_date": "tomorrow",
        })))
        .unwrap_err();
        // external_id, customer_name, amount, status, currency, due_date
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_amount_bounds() {
        let too_big = validate_row(&row(json!({
            "external_id": "X",
            "customer_name": "C",
            "amount": "1000000000.00",
        })));
        assert!(too_big.is_err());

        let minimum = validate_row(&row(json!({
            "external_id": "X",
            "customer_name": "C",
            "amount": "0.01",
        })));
        assert!(minimum.is_ok());
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let record = validate_row(&row(json!({
            "external_id": "X",
            "customer_name": "C",
            "amount": 250,
        })))
        .expect("valid");
        assert_eq!(record.status, "pending");
        assert_eq!(record.currency, "USD");
        assert_eq!(record.due_date, None);
        assert_eq!(record.invoice_number, None);
    }

    #[test]
    fn test_numeric_amount_accepted() {
        let record = validate_row(&row(json!({
            "external_id": "X",
            "customer_name": "C",
            "amount": 250.5,
        })))
        .expect("valid");
        assert_eq!(record.amount, Decimal::from_str("250.5").unwrap());
    }
}
