use crate::models::{Document, DocumentClass, LineItem, LineKind, Lot, MAX_AMOUNT};
use crate::services::documents::{CreatedDocument, DocumentWithLines, NewDocument, NewLine};
use crate::services::sequence::format_bill_no;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

fn validate_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("amount_negative"));
    }
    if *value > Decimal::from(MAX_AMOUNT) {
        return Err(ValidationError::new("amount_too_large"));
    }
    Ok(())
}

fn validate_tax_rate(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("tax_rate_range"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    pub class: DocumentClass,
    /// Defaults to the day of the request.
    pub date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 128, message = "counterpart_id is required"))]
    pub counterpart_id: String,
    #[serde(default)]
    #[validate(nested)]
    pub lines: Vec<LineRequest>,
    /// Payment amount; payments carry no lines.
    #[validate(custom(function = "validate_amount"))]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LineRequest {
    pub kind: LineKind,
    #[serde(default)]
    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: String,
    pub lot_id: Option<String>,
    pub product_id: Option<String>,
    #[validate(custom(function = "validate_amount"))]
    pub unit_price: Decimal,
    #[validate(custom(function = "validate_amount"))]
    pub buy_price: Option<Decimal>,
    #[validate(custom(function = "validate_amount"))]
    pub sell_price: Option<Decimal>,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i64,
    #[serde(default)]
    #[validate(custom(function = "validate_tax_rate"))]
    pub tax_rate: Decimal,
}

impl From<LineRequest> for NewLine {
    fn from(line: LineRequest) -> Self {
        Self {
            kind: line.kind,
            description: line.description,
            lot_id: line.lot_id,
            product_id: line.product_id,
            unit_price: line.unit_price,
            buy_price: line.buy_price,
            sell_price: line.sell_price,
            quantity: line.quantity,
            tax_rate: line.tax_rate,
        }
    }
}

impl From<CreateDocumentRequest> for NewDocument {
    fn from(request: CreateDocumentRequest) -> Self {
        Self {
            class: request.class,
            date: request.date,
            counterpart_id: request.counterpart_id,
            lines: request.lines.into_iter().map(NewLine::from).collect(),
            amount: request.amount,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateDocumentResponse {
    pub id: String,
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_no: Option<u64>,
    /// `00042/2025` style rendering of `bill_no`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_no_display: Option<String>,
}

impl CreateDocumentResponse {
    pub fn new(created: CreatedDocument, year: i32) -> Self {
        Self {
            bill_no_display: created.bill_no.map(|n| format_bill_no(n, year)),
            id: created.id,
            total: created.total,
            bill_no: created.bill_no,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub kind: LineKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot_id: Option<String>,
    pub unit_price: Decimal,
    pub buy_price: Decimal,
    pub quantity: i64,
    pub tax_rate: Decimal,
    pub returned_quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<Decimal>,
}

impl From<LineItem> for LineItemResponse {
    fn from(line: LineItem) -> Self {
        Self {
            total: line.total().map(|total| total.round_dp(2)),
            id: line.id,
            kind: line.kind,
            description: line.description,
            lot_id: line.lot_id,
            unit_price: line.unit_price,
            buy_price: line.buy_price,
            quantity: line.quantity,
            tax_rate: line.tax_rate,
            returned_quantity: line.returned_quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub class: DocumentClass,
    pub date: NaiveDate,
    pub counterpart_id: String,
    pub total: Decimal,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_no: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_no_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_code: Option<String>,
    pub created_at: String,
    pub lines: Vec<LineItemResponse>,
}

impl From<DocumentWithLines> for DocumentResponse {
    fn from(found: DocumentWithLines) -> Self {
        let Document {
            id,
            class,
            date,
            counterpart_id,
            total,
            created_by,
            bill_no,
            original_code,
            created_utc,
        } = found.document;

        Self {
            bill_no_display: bill_no.map(|n| format_bill_no(n, date.year())),
            id,
            class,
            date,
            counterpart_id,
            total,
            created_by,
            bill_no,
            original_code,
            created_at: created_utc.to_rfc3339(),
            lines: found.lines.into_iter().map(LineItemResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LotResponse {
    pub id: String,
    pub product_id: String,
    pub supplier_id: String,
    pub document_id: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub original_quantity: i64,
    pub remaining_quantity: i64,
    pub active: bool,
    pub created_at: String,
}

impl From<Lot> for LotResponse {
    fn from(lot: Lot) -> Self {
        Self {
            id: lot.id,
            product_id: lot.product_id,
            supplier_id: lot.supplier_id,
            document_id: lot.document_id,
            buy_price: lot.buy_price,
            sell_price: lot.sell_price,
            original_quantity: lot.original_quantity,
            remaining_quantity: lot.remaining_quantity,
            active: lot.active,
            created_at: lot.created_utc.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejects_zero_quantity_and_blank_counterpart() {
        let request: CreateDocumentRequest = serde_json::from_value(serde_json::json!({
            "class": "sell",
            "counterpart_id": "",
            "lines": [{"kind": "product", "lot_id": "L1", "unit_price": "10", "quantity": 0}]
        }))
        .unwrap();

        let errors = request.validate().unwrap_err().to_string();
        assert!(errors.contains("counterpart_id"));
        assert!(errors.contains("quantity"));
    }

    #[test]
    fn test_request_rejects_negative_and_oversized_amounts() {
        let request: CreateDocumentRequest = serde_json::from_value(serde_json::json!({
            "class": "sell",
            "counterpart_id": "acme",
            "lines": [
                {"kind": "product", "lot_id": "L1", "unit_price": "-1", "quantity": 1},
                {"kind": "service", "unit_price": "1", "buy_price": "2000000000000", "quantity": 1},
                {"kind": "service", "unit_price": "1", "tax_rate": "150", "quantity": 1}
            ]
        }))
        .unwrap();

        let errors = request.validate().unwrap_err().to_string();
        assert!(errors.contains("unit_price"));
        assert!(errors.contains("buy_price"));
        assert!(errors.contains("tax_rate"));
    }

    #[test]
    fn test_created_response_renders_bill_number() {
        let created = CreatedDocument {
            id: "SELL250101".to_string(),
            total: Decimal::from(238),
            bill_no: Some(42),
        };
        let response = CreateDocumentResponse::new(created, 2025);
        assert_eq!(response.bill_no_display.as_deref(), Some("00042/2025"));
    }
}
