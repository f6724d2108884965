use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A purchased batch of a product.
///
/// Invariant: `0 <= remaining_quantity <= original_quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    #[serde(rename = "_id")]
    pub id: String,
    pub product_id: String,
    pub supplier_id: String,
    /// Purchase bon that brought the lot in.
    pub document_id: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub original_quantity: i64,
    pub remaining_quantity: i64,
    pub active: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

impl Lot {
    /// Quantity a return may still put back.
    pub fn headroom(&self) -> i64 {
        self.original_quantity - self.remaining_quantity
    }
}
