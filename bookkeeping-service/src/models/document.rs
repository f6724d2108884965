//! Billing documents and their line items.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Document class. Each class numbers its documents in its own series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentClass {
    /// Purchase bon; creates lots.
    Buy,
    /// Sales invoice; draws quantity from lots.
    Sell,
    Payment,
    /// Return against a sales invoice; restores lot quantity.
    Return,
}

impl DocumentClass {
    pub const ALL: [DocumentClass; 4] = [
        DocumentClass::Buy,
        DocumentClass::Sell,
        DocumentClass::Payment,
        DocumentClass::Return,
    ];

    /// Identifier prefix of the class series.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentClass::Buy => "BUY",
            DocumentClass::Sell => "SELL",
            DocumentClass::Payment => "PAY",
            DocumentClass::Return => "RET",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentClass::Buy => "buy",
            DocumentClass::Sell => "sell",
            DocumentClass::Payment => "payment",
            DocumentClass::Return => "return",
        }
    }
}

impl std::fmt::Display for DocumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" | "purchase" => Ok(DocumentClass::Buy),
            "sell" | "invoice" => Ok(DocumentClass::Sell),
            "payment" | "pay" => Ok(DocumentClass::Payment),
            "return" => Ok(DocumentClass::Return),
            _ => Err(format!("Invalid document class: {}", s)),
        }
    }
}

/// A billable record with a period-scoped sequential id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    pub class: DocumentClass,
    pub date: NaiveDate,
    /// Client (sales) or supplier (purchases) reference.
    pub counterpart_id: String,
    pub total: Decimal,
    pub created_by: String,
    /// Global invoice number, sales only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_no: Option<u64>,
    /// Document this one reverses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_code: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Product,
    Service,
    Discount,
    Tax,
    Other,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Product => "product",
            LineKind::Service => "service",
            LineKind::Discount => "discount",
            LineKind::Tax => "tax",
            LineKind::Other => "other",
        }
    }
}

/// Line of a document. Lives and dies with its document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub document_id: String,
    pub kind: LineKind,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_id: Option<String>,
    pub unit_price: Decimal,
    /// Cost basis used when the line is returned.
    pub buy_price: Decimal,
    pub quantity: i64,
    /// Percent, e.g. 19 for 19%.
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub returned_quantity: i64,
}

/// Largest unit price, cost or payment amount accepted on a document.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Signed line amount: `unit_price × quantity` plus tax, negated for
/// discounts. `None` when the arithmetic leaves the decimal range.
pub fn line_amount(
    kind: LineKind,
    unit_price: Decimal,
    quantity: i64,
    tax_rate: Decimal,
) -> Option<Decimal> {
    let base = unit_price.checked_mul(Decimal::from(quantity))?;
    let tax = base
        .checked_mul(tax_rate)?
        .checked_div(Decimal::ONE_HUNDRED)?;
    let gross = base.checked_add(tax)?;
    match kind {
        LineKind::Discount => Some(-gross),
        _ => Some(gross),
    }
}

impl LineItem {
    /// Signed contribution of the line to its document total.
    pub fn total(&self) -> Option<Decimal> {
        line_amount(self.kind, self.unit_price, self.quantity, self.tax_rate)
    }

    /// Quantity that can still be returned.
    pub fn returnable_quantity(&self) -> i64 {
        self.quantity - self.returned_quantity
    }
}

/// Document total: sum of line totals rounded to cents, `None` on overflow.
pub fn document_total(lines: &[LineItem]) -> Option<Decimal> {
    lines
        .iter()
        .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.total()?))
        .map(|total| total.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn line(kind: LineKind, unit_price: i64, quantity: i64, tax_rate: i64) -> LineItem {
        LineItem {
            id: "l".to_string(),
            document_id: "d".to_string(),
            kind,
            description: String::new(),
            lot_id: None,
            unit_price: Decimal::from(unit_price),
            buy_price: Decimal::ZERO,
            quantity,
            tax_rate: Decimal::from(tax_rate),
            returned_quantity: 0,
        }
    }

    #[test]
    fn test_line_total_applies_tax() {
        assert_eq!(line(LineKind::Product, 100, 2, 19).total(), Some(Decimal::from(238)));
    }

    #[test]
    fn test_discount_lines_subtract() {
        let lines = vec![
            line(LineKind::Product, 50, 2, 0),
            line(LineKind::Discount, 10, 1, 0),
        ];
        assert_eq!(document_total(&lines), Some(Decimal::from(90)));
    }

    #[test]
    fn test_out_of_range_amounts_are_none() {
        let mut huge = line(LineKind::Product, 1, 10, 0);
        huge.unit_price = Decimal::MAX;
        assert_eq!(huge.total(), None);

        let half = Decimal::MAX / Decimal::TWO + Decimal::ONE;
        let lines = vec![
            line(LineKind::Product, 1, 1, 0),
            line(LineKind::Product, 1, 1, 0),
        ]
        .into_iter()
        .map(|mut l| {
            l.unit_price = half;
            l
        })
        .collect::<Vec<_>>();
        assert_eq!(document_total(&lines), None);
    }

    #[test]
    fn test_class_prefixes_and_parsing() {
        assert_eq!(DocumentClass::Sell.prefix(), "SELL");
        assert_eq!("purchase".parse::<DocumentClass>().unwrap(), DocumentClass::Buy);
        assert!("refund".parse::<DocumentClass>().is_err());
    }
}
