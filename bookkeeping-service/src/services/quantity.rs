//! Lot and line quantity bookkeeping.
//!
//! Every mutation is one conditional update in the store, so concurrent
//! sales and returns on the same lot can never lose an update or push a
//! quantity outside `0..=original`.

use crate::models::{LineItem, Lot, ReturnProductLine, ReturnServiceLine};
use crate::services::error::BookkeepingError;
use crate::services::store::Store;
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Clone)]
pub struct QuantityLedger {
    store: Arc<dyn Store>,
}

fn ensure_positive(qty: i64, what: &str) -> Result<(), BookkeepingError> {
    if qty <= 0 {
        return Err(BookkeepingError::InvalidQuantity(format!(
            "{} quantity must be positive, got {}",
            what, qty
        )));
    }
    Ok(())
}

impl QuantityLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Take `qty` units out of an active lot.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, lot_id: &str, qty: i64) -> Result<Lot, BookkeepingError> {
        ensure_positive(qty, "reserved")?;

        if let Some(lot) = self.store.reserve_lot(lot_id, qty).await? {
            metrics::counter!("lot_reservations_total", "outcome" => "reserved").increment(1);
            return Ok(lot);
        }

        // The conditional update matched nothing; find out why.
        let err = match self.store.get_lot(lot_id).await? {
            None => BookkeepingError::LotNotFound(lot_id.to_string()),
            Some(lot) if !lot.active => BookkeepingError::LotInactive(lot_id.to_string()),
            Some(lot) => BookkeepingError::InsufficientQuantity {
                lot_id: lot_id.to_string(),
                requested: qty,
                remaining: lot.remaining_quantity,
            },
        };
        metrics::counter!("lot_reservations_total", "outcome" => err.kind()).increment(1);
        tracing::info!(error = %err, "Reservation refused");
        Err(err)
    }

    /// Put `qty` units back into a lot, never beyond its original quantity.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, lot_id: &str, qty: i64) -> Result<Lot, BookkeepingError> {
        ensure_positive(qty, "released")?;

        if let Some(lot) = self.store.release_lot(lot_id, qty).await? {
            return Ok(lot);
        }

        let err = match self.store.get_lot(lot_id).await? {
            None => BookkeepingError::LotNotFound(lot_id.to_string()),
            Some(lot) => BookkeepingError::ReturnExceedsOriginal {
                reference: lot_id.to_string(),
                requested: qty,
                headroom: lot.headroom(),
            },
        };
        tracing::info!(error = %err, "Release refused");
        Err(err)
    }

    /// Record `qty` more units of a line as returned.
    #[tracing::instrument(skip(self))]
    pub async fn debit_line(&self, line_id: &str, qty: i64) -> Result<LineItem, BookkeepingError> {
        ensure_positive(qty, "returned")?;

        if let Some(line) = self.store.debit_line(line_id, qty).await? {
            return Ok(line);
        }

        let err = match self.store.get_line_item(line_id).await? {
            None => BookkeepingError::NotFound(format!("line item {}", line_id)),
            Some(line) => BookkeepingError::ReturnExceedsOriginal {
                reference: line_id.to_string(),
                requested: qty,
                headroom: line.returnable_quantity(),
            },
        };
        tracing::info!(error = %err, "Line debit refused");
        Err(err)
    }

    /// Undo a `debit_line`.
    #[tracing::instrument(skip(self))]
    pub async fn credit_line(&self, line_id: &str, qty: i64) -> Result<LineItem, BookkeepingError> {
        ensure_positive(qty, "credited")?;

        match self.store.credit_line(line_id, qty).await? {
            Some(line) => Ok(line),
            None => Err(BookkeepingError::InvalidQuantity(format!(
                "line {} has fewer than {} returned units",
                line_id, qty
            ))),
        }
    }
}

/// True iff every line satisfies `0 <= return_quantity <= original_quantity`.
pub fn validate_return_quantities(lines: &[ReturnProductLine]) -> bool {
    lines
        .iter()
        .all(|l| l.return_quantity >= 0 && l.return_quantity <= l.original_quantity)
}

/// Cost basis refunded by a return: products at buy price times quantity,
/// reasoned services whole. `None` when the sum leaves the decimal range.
pub fn calculate_return_total(
    products: &[ReturnProductLine],
    services: &[ReturnServiceLine],
) -> Option<Decimal> {
    let products = products.iter().try_fold(Decimal::ZERO, |sum, p| {
        sum.checked_add(p.buy_price.checked_mul(Decimal::from(p.return_quantity))?)
    })?;
    services
        .iter()
        .filter(|s| s.has_reason())
        .try_fold(products, |sum, s| sum.checked_add(s.buy_price))
}

pub fn has_items_to_return(products: &[ReturnProductLine], services: &[ReturnServiceLine]) -> bool {
    products.iter().any(|p| p.return_quantity > 0) || services.iter().any(|s| s.has_reason())
}
