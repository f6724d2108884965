//! Creation and deletion of purchase bons, invoices and payments.

use crate::models::{
    document_total, line_amount, Document, DocumentClass, LineItem, LineKind, Lot, MAX_AMOUNT,
};
use crate::services::error::BookkeepingError;
use crate::services::hierarchy::HierarchyManager;
use crate::services::quantity::QuantityLedger;
use crate::services::sequence::SequenceAllocator;
use crate::services::store::Store;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

/// A line as submitted for a new document.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub kind: LineKind,
    pub description: String,
    /// Lot drawn from (sales product lines).
    pub lot_id: Option<String>,
    /// Product bought (purchase product lines).
    pub product_id: Option<String>,
    pub unit_price: Decimal,
    /// Declared cost of a service line.
    pub buy_price: Option<Decimal>,
    /// Resale price of the lot a purchase line creates.
    pub sell_price: Option<Decimal>,
    pub quantity: i64,
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub class: DocumentClass,
    pub date: Option<NaiveDate>,
    pub counterpart_id: String,
    pub lines: Vec<NewLine>,
    /// Payments only.
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedDocument {
    pub id: String,
    pub total: Decimal,
    pub bill_no: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DocumentWithLines {
    pub document: Document,
    pub lines: Vec<LineItem>,
}

/// Writes already applied by a create, undone newest first on failure.
enum Applied {
    Reserved { lot_id: String, qty: i64 },
    Document(String),
    Lots(String),
    Lines(String),
}

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn Store>,
    sequence: SequenceAllocator,
    ledger: QuantityLedger,
    hierarchy: HierarchyManager,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn Store>,
        sequence: SequenceAllocator,
        ledger: QuantityLedger,
        hierarchy: HierarchyManager,
    ) -> Self {
        Self {
            store,
            sequence,
            ledger,
            hierarchy,
        }
    }

    #[tracing::instrument(skip(self, input), fields(class = %input.class))]
    pub async fn create_document(
        &self,
        input: NewDocument,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<CreatedDocument, BookkeepingError> {
        validate(&input)?;

        let mut applied = Vec::new();
        let result = match input.class {
            DocumentClass::Buy => self.create_purchase(&input, user, now, &mut applied).await,
            DocumentClass::Sell => self.create_sale(&input, user, now, &mut applied).await,
            DocumentClass::Payment => self.create_payment(&input, user, now, &mut applied).await,
            DocumentClass::Return => Err(BookkeepingError::BadRequest(
                "returns are created against an original invoice".to_string(),
            )),
        };

        match result {
            Ok(created) => {
                metrics::counter!("documents_created_total", "class" => input.class.as_str())
                    .increment(1);
                tracing::info!(id = %created.id, total = %created.total, "Document created");
                Ok(created)
            }
            Err(err) => {
                tracing::warn!(error = %err, undo_steps = applied.len(), "Document creation failed");
                self.unwind(applied, err).await
            }
        }
    }

    async fn create_purchase(
        &self,
        input: &NewDocument,
        user: &str,
        now: DateTime<Utc>,
        applied: &mut Vec<Applied>,
    ) -> Result<CreatedDocument, BookkeepingError> {
        let id = self.sequence.next_id(DocumentClass::Buy, now).await?;

        let mut lines = Vec::with_capacity(input.lines.len());
        let mut lots = Vec::new();
        for (n, line) in input.lines.iter().enumerate() {
            if line.kind == LineKind::Product {
                lots.push(Lot {
                    id: format!("{}-L{}", id, n + 1),
                    product_id: line.product_id.clone().unwrap_or_default(),
                    supplier_id: input.counterpart_id.clone(),
                    document_id: id.clone(),
                    buy_price: line.unit_price,
                    sell_price: line.sell_price.unwrap_or(line.unit_price),
                    original_quantity: line.quantity,
                    remaining_quantity: line.quantity,
                    active: true,
                    created_utc: now,
                });
            }
            lines.push(build_line(&id, n, line, None, line.unit_price));
        }

        let document = build_document(&id, input, checked_total(&lines)?, None, user, now);
        self.store.insert_document(&document).await?;
        applied.push(Applied::Document(id.clone()));

        // Pushed before the insert: a failed batch may still have written rows.
        applied.push(Applied::Lots(id.clone()));
        self.store.insert_lots(&lots).await?;

        applied.push(Applied::Lines(id.clone()));
        self.store.insert_line_items(&lines).await?;

        Ok(CreatedDocument {
            id,
            total: document.total,
            bill_no: None,
        })
    }

    async fn create_sale(
        &self,
        input: &NewDocument,
        user: &str,
        now: DateTime<Utc>,
        applied: &mut Vec<Applied>,
    ) -> Result<CreatedDocument, BookkeepingError> {
        // Reserve before anything is numbered so a short lot costs nothing.
        let mut cost = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            match (&line.lot_id, line.kind) {
                (Some(lot_id), LineKind::Product) => {
                    let lot = self.ledger.reserve(lot_id, line.quantity).await?;
                    applied.push(Applied::Reserved {
                        lot_id: lot_id.clone(),
                        qty: line.quantity,
                    });
                    cost.push(lot.buy_price);
                }
                _ => cost.push(line.buy_price.unwrap_or(Decimal::ZERO)),
            }
        }

        let id = self.sequence.next_id(DocumentClass::Sell, now).await?;
        let bill_no = self.sequence.next_bill_no().await?;

        let lines: Vec<LineItem> = input
            .lines
            .iter()
            .zip(cost)
            .enumerate()
            .map(|(n, (line, buy_price))| build_line(&id, n, line, line.lot_id.clone(), buy_price))
            .collect();

        let document =
            build_document(&id, input, checked_total(&lines)?, Some(bill_no), user, now);
        self.store.insert_document(&document).await?;
        applied.push(Applied::Document(id.clone()));

        applied.push(Applied::Lines(id.clone()));
        self.store.insert_line_items(&lines).await?;

        Ok(CreatedDocument {
            id,
            total: document.total,
            bill_no: Some(bill_no),
        })
    }

    async fn create_payment(
        &self,
        input: &NewDocument,
        user: &str,
        now: DateTime<Utc>,
        applied: &mut Vec<Applied>,
    ) -> Result<CreatedDocument, BookkeepingError> {
        let id = self.sequence.next_id(DocumentClass::Payment, now).await?;
        let total = input.amount.unwrap_or(Decimal::ZERO).round_dp(2);

        let document = build_document(&id, input, total, None, user, now);
        self.store.insert_document(&document).await?;
        applied.push(Applied::Document(id.clone()));

        Ok(CreatedDocument {
            id,
            total,
            bill_no: None,
        })
    }

    /// Undo `applied` newest first and hand back the original error, or
    /// `PartialWrite` when an undo step fails too.
    async fn unwind<T>(
        &self,
        applied: Vec<Applied>,
        err: BookkeepingError,
    ) -> Result<T, BookkeepingError> {
        const OP: &str = "create_document";

        for step in applied.into_iter().rev() {
            let (name, undone) = match &step {
                Applied::Reserved { lot_id, qty } => (
                    "release_reservation",
                    self.ledger.release(lot_id, *qty).await.map(|_| ()),
                ),
                Applied::Document(id) => (
                    "delete_document",
                    self.store.delete_document(id).await.map(|_| ()),
                ),
                Applied::Lots(id) => (
                    "delete_lots",
                    self.store.delete_lots_of_document(id).await.map(|_| ()),
                ),
                Applied::Lines(id) => (
                    "delete_line_items",
                    self.store.delete_line_items(id).await.map(|_| ()),
                ),
            };
            if let Err(undo_err) = undone {
                return Err(BookkeepingError::partial_write(
                    OP,
                    name,
                    format!("{}; undo failed: {}", err, undo_err),
                ));
            }
        }
        Err(err)
    }

    pub async fn get_document(&self, id: &str) -> Result<DocumentWithLines, BookkeepingError> {
        let document = self
            .store
            .get_document(id)
            .await?
            .ok_or_else(|| BookkeepingError::NotFound(format!("document {}", id)))?;
        let lines = self.store.list_line_items(id).await?;
        Ok(DocumentWithLines { document, lines })
    }

    /// Delete a document with everything it owns. Returns whether it existed.
    ///
    /// Sales put their unreturned quantity back on the lots first; each line
    /// is marked returned before its lot is credited, so a retried delete
    /// never restocks a line twice.
    ///
    /// Purchases deactivate their lots before checking them, like
    /// [`DocumentService::delete_lot`].
    #[tracing::instrument(skip(self))]
    pub async fn delete_document(&self, id: &str) -> Result<bool, BookkeepingError> {
        const OP: &str = "delete_document";

        let Some(document) = self.store.get_document(id).await? else {
            return Ok(false);
        };

        let returns = self.store.count_returns_for(id).await?;
        if returns > 0 {
            return Err(BookkeepingError::DocumentReferenced {
                document_id: id.to_string(),
                returns,
            });
        }

        let mut progressed = false;
        match document.class {
            DocumentClass::Buy => {
                let lots = self.store.list_lots_of_document(id).await?;
                let mut fenced = Vec::with_capacity(lots.len());
                for lot in &lots {
                    let checked = match self.fence_lot(&lot.id).await {
                        Ok(Some(fenced_lot)) => ensure_unused(
                            &fenced_lot,
                            self.store.count_lot_references(&lot.id).await,
                        ),
                        Ok(None) => Ok(()),
                        Err(e) => Err(e),
                    };
                    fenced.push(lot);
                    if let Err(e) = checked {
                        self.unfence_lots(&fenced, OP).await?;
                        return Err(e);
                    }
                }
                progressed = self.store.delete_lots_of_document(id).await? > 0;
            }
            DocumentClass::Sell => {
                for line in self.store.list_line_items(id).await? {
                    let qty = line.returnable_quantity();
                    let Some(lot_id) = line.lot_id.as_deref() else {
                        continue;
                    };
                    if qty <= 0 {
                        continue;
                    }

                    self.ledger
                        .debit_line(&line.id, qty)
                        .await
                        .map_err(|e| e.after_progress(progressed, OP, "mark_line_restocked"))?;
                    if let Err(e) = self.ledger.release(lot_id, qty).await {
                        if let Err(undo_err) = self.ledger.credit_line(&line.id, qty).await {
                            return Err(BookkeepingError::partial_write(
                                OP,
                                "restock_lot",
                                format!("{}; unmarking line failed: {}", e, undo_err),
                            ));
                        }
                        return Err(e.after_progress(progressed, OP, "restock_lot"));
                    }
                    progressed = true;
                }
            }
            DocumentClass::Payment | DocumentClass::Return => {}
        }

        self.hierarchy
            .delete_document_cascade(id)
            .await
            .map_err(|e| match e {
                BookkeepingError::PartialWrite { .. } => e,
                e => e.after_progress(progressed, OP, "delete_document_cascade"),
            })
    }

    pub async fn get_lot(&self, lot_id: &str) -> Result<Lot, BookkeepingError> {
        self.store
            .get_lot(lot_id)
            .await?
            .ok_or_else(|| BookkeepingError::LotNotFound(lot_id.to_string()))
    }

    /// Soft delete. Inactive lots can no longer be sold from or returned to.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate_lot(&self, lot_id: &str) -> Result<Lot, BookkeepingError> {
        let lot = self
            .store
            .set_lot_active(lot_id, false)
            .await?
            .ok_or_else(|| BookkeepingError::LotNotFound(lot_id.to_string()))?;
        tracing::info!(lot_id = %lot_id, "Lot deactivated");
        Ok(lot)
    }

    /// Hard delete, refused while any sale or return names the lot or a sale
    /// still holds units reserved from it.
    ///
    /// The lot is deactivated before the reference check so no new sale can
    /// reserve from it in between; a refused delete restores the flag.
    #[tracing::instrument(skip(self))]
    pub async fn delete_lot(&self, lot_id: &str) -> Result<bool, BookkeepingError> {
        const OP: &str = "delete_lot";

        let Some(lot) = self.store.get_lot(lot_id).await? else {
            return Ok(false);
        };
        let checked = match self.fence_lot(lot_id).await? {
            Some(fenced) => ensure_unused(&fenced, self.store.count_lot_references(lot_id).await),
            None => return Ok(false),
        };
        if let Err(e) = checked {
            self.unfence_lots(&[&lot], OP).await?;
            return Err(e);
        }

        let existed = self.store.delete_lot(lot_id).await?;
        if existed {
            metrics::counter!("cascade_deletes_total", "kind" => "lot").increment(1);
        }
        Ok(existed)
    }
}

impl DocumentService {
    /// Deactivate `lot_id`, returning the lot as it stands once no further
    /// reservation can land on it.
    async fn fence_lot(&self, lot_id: &str) -> Result<Option<Lot>, BookkeepingError> {
        self.store.set_lot_active(lot_id, false).await
    }

    /// Reactivate the lots of `lots` that were active before being fenced.
    async fn unfence_lots(&self, lots: &[&Lot], op: &'static str) -> Result<(), BookkeepingError> {
        for lot in lots.iter().filter(|lot| lot.active) {
            if let Err(e) = self.store.set_lot_active(&lot.id, true).await {
                return Err(BookkeepingError::partial_write(
                    op,
                    "reactivate_lot",
                    format!("lot {} left inactive: {}", lot.id, e),
                ));
            }
        }
        Ok(())
    }
}

/// A fenced lot may go only when nothing names it and no sale holds units
/// reserved from it without having written its lines yet.
fn ensure_unused(
    lot: &Lot,
    references: Result<u64, BookkeepingError>,
) -> Result<(), BookkeepingError> {
    let references = references?;
    if references > 0 {
        return Err(BookkeepingError::LotReferenced {
            lot_id: lot.id.clone(),
            references,
        });
    }
    if lot.remaining_quantity != lot.original_quantity {
        return Err(BookkeepingError::Conflict(format!(
            "lot {} has {} units held by a sale in progress",
            lot.id,
            lot.original_quantity - lot.remaining_quantity
        )));
    }
    Ok(())
}

fn validate(input: &NewDocument) -> Result<(), BookkeepingError> {
    if input.counterpart_id.trim().is_empty() {
        return Err(BookkeepingError::BadRequest(
            "counterpart_id is required".to_string(),
        ));
    }

    match input.class {
        DocumentClass::Return => {
            return Err(BookkeepingError::BadRequest(
                "returns are created against an original invoice".to_string(),
            ))
        }
        DocumentClass::Payment => {
            if !input.lines.is_empty() {
                return Err(BookkeepingError::BadRequest(
                    "payments carry no lines".to_string(),
                ));
            }
            return match input.amount {
                Some(amount) if amount > Decimal::ZERO && amount <= max_amount() => Ok(()),
                Some(amount) if amount > Decimal::ZERO => Err(BookkeepingError::InvalidQuantity(
                    format!("payment amount exceeds {}", MAX_AMOUNT),
                )),
                _ => Err(BookkeepingError::InvalidQuantity(
                    "payment amount must be positive".to_string(),
                )),
            };
        }
        DocumentClass::Buy | DocumentClass::Sell => {}
    }

    if input.lines.is_empty() {
        return Err(BookkeepingError::BadRequest(
            "document needs at least one line".to_string(),
        ));
    }

    let mut lots = HashSet::new();
    let mut total = Decimal::ZERO;
    for (n, line) in input.lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(BookkeepingError::InvalidQuantity(format!(
                "line {} has quantity {}",
                n + 1,
                line.quantity
            )));
        }
        check_amount(n, "unit_price", Some(line.unit_price))?;
        check_amount(n, "buy_price", line.buy_price)?;
        check_amount(n, "sell_price", line.sell_price)?;
        if line.tax_rate < Decimal::ZERO || line.tax_rate > Decimal::ONE_HUNDRED {
            return Err(BookkeepingError::BadRequest(format!(
                "line {}: tax_rate must be between 0 and 100",
                n + 1
            )));
        }
        // Checked here so an out-of-range sale fails before any lot is reserved.
        total = line_amount(line.kind, line.unit_price, line.quantity, line.tax_rate)
            .and_then(|amount| total.checked_add(amount))
            .ok_or_else(|| {
                BookkeepingError::InvalidQuantity(format!(
                    "line {}: amount is out of range",
                    n + 1
                ))
            })?;

        let is_product = line.kind == LineKind::Product;
        match input.class {
            DocumentClass::Buy => {
                if line.lot_id.is_some() {
                    return Err(BookkeepingError::BadRequest(format!(
                        "line {}: purchases create lots, they do not name one",
                        n + 1
                    )));
                }
                if is_product && line.product_id.as_deref().map_or(true, str::is_empty) {
                    return Err(BookkeepingError::BadRequest(format!(
                        "line {}: product_id is required",
                        n + 1
                    )));
                }
            }
            _ => match (&line.lot_id, is_product) {
                (Some(lot_id), true) => {
                    if !lots.insert(lot_id.as_str()) {
                        return Err(BookkeepingError::BadRequest(format!(
                            "lot {} is listed more than once",
                            lot_id
                        )));
                    }
                }
                (None, true) => {
                    return Err(BookkeepingError::BadRequest(format!(
                        "line {}: product lines must name a lot",
                        n + 1
                    )))
                }
                (Some(_), false) => {
                    return Err(BookkeepingError::BadRequest(format!(
                        "line {}: only product lines draw from lots",
                        n + 1
                    )))
                }
                (None, false) => {}
            },
        }
    }
    Ok(())
}

fn max_amount() -> Decimal {
    Decimal::from(MAX_AMOUNT)
}

fn check_amount(n: usize, field: &str, value: Option<Decimal>) -> Result<(), BookkeepingError> {
    match value {
        Some(v) if v < Decimal::ZERO => Err(BookkeepingError::BadRequest(format!(
            "line {}: {} must not be negative",
            n + 1,
            field
        ))),
        Some(v) if v > max_amount() => Err(BookkeepingError::InvalidQuantity(format!(
            "line {}: {} exceeds {}",
            n + 1,
            field,
            MAX_AMOUNT
        ))),
        _ => Ok(()),
    }
}

fn checked_total(lines: &[LineItem]) -> Result<Decimal, BookkeepingError> {
    document_total(lines)
        .ok_or_else(|| BookkeepingError::InvalidQuantity("document total is out of range".to_string()))
}

fn build_line(
    document_id: &str,
    n: usize,
    line: &NewLine,
    lot_id: Option<String>,
    buy_price: Decimal,
) -> LineItem {
    LineItem {
        id: format!("{}-{}", document_id, n + 1),
        document_id: document_id.to_string(),
        kind: line.kind,
        description: line.description.clone(),
        lot_id,
        unit_price: line.unit_price,
        buy_price,
        quantity: line.quantity,
        tax_rate: line.tax_rate,
        returned_quantity: 0,
    }
}

fn build_document(
    id: &str,
    input: &NewDocument,
    total: Decimal,
    bill_no: Option<u64>,
    user: &str,
    now: DateTime<Utc>,
) -> Document {
    Document {
        id: id.to_string(),
        class: input.class,
        date: input.date.unwrap_or_else(|| now.date_naive()),
        counterpart_id: input.counterpart_id.clone(),
        total,
        created_by: user.to_string(),
        bill_no,
        original_code: None,
        created_utc: now,
    }
}
