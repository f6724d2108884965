use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product line of a return, resolved against the original invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnProductLine {
    /// Line of the original document being returned.
    pub line_id: String,
    pub lot_id: String,
    pub buy_price: Decimal,
    /// Quantity still returnable on the original line.
    pub original_quantity: i64,
    pub return_quantity: i64,
}

/// Service line of a return. Services come back whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnServiceLine {
    pub line_id: String,
    pub buy_price: Decimal,
    #[serde(default)]
    pub return_reason: String,
}

impl ReturnServiceLine {
    pub fn has_reason(&self) -> bool {
        !self.return_reason.trim().is_empty()
    }
}

/// Committed return. Only the lines actually returned are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnTransaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub original_code: String,
    pub counterpart_id: String,
    pub date: NaiveDate,
    pub total: Decimal,
    pub created_by: String,
    #[serde(default)]
    pub products: Vec<ReturnProductLine>,
    #[serde(default)]
    pub services: Vec<ReturnServiceLine>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}
