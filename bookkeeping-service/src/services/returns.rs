//! Returns against sales invoices.
//!
//! A return moves `Draft -> Validated -> Committed`, or `Draft -> Rejected`.
//! Validation reads only; commit applies line debits and lot releases and
//! then records the return, undoing the ledger steps if anything fails.

use crate::models::{DocumentClass, LineKind, ReturnProductLine, ReturnServiceLine, ReturnTransaction};
use crate::services::error::BookkeepingError;
use crate::services::quantity::{
    calculate_return_total, has_items_to_return, validate_return_quantities, QuantityLedger,
};
use crate::services::sequence::SequenceAllocator;
use crate::services::store::Store;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ReturnedProduct {
    pub lot_id: String,
    pub return_quantity: i64,
}

#[derive(Debug, Clone)]
pub struct ReturnedService {
    pub line_id: String,
    pub return_reason: String,
}

#[derive(Debug, Clone)]
pub struct ReturnRequest {
    pub original_code: String,
    pub date: Option<NaiveDate>,
    pub products: Vec<ReturnedProduct>,
    pub services: Vec<ReturnedService>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStatus {
    Draft,
    Validated,
    Committed,
    Rejected,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Draft => "draft",
            ReturnStatus::Validated => "validated",
            ReturnStatus::Committed => "committed",
            ReturnStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReturnStatus::Committed | ReturnStatus::Rejected)
    }
}

/// Lines resolved against the original during validation.
#[derive(Debug, Clone)]
struct Resolved {
    counterpart_id: String,
    products: Vec<ReturnProductLine>,
    services: Vec<ReturnServiceLine>,
    /// Quantity of each returned service line, debited whole.
    service_quantities: Vec<i64>,
    total: Decimal,
}

/// One return on its way through the state machine.
#[derive(Debug)]
pub struct ReturnDraft {
    request: ReturnRequest,
    status: ReturnStatus,
    resolved: Option<Resolved>,
    committed: Option<ReturnTransaction>,
    rejection: Option<String>,
}

impl ReturnDraft {
    pub fn new(request: ReturnRequest) -> Self {
        Self {
            request,
            status: ReturnStatus::Draft,
            resolved: None,
            committed: None,
            rejection: None,
        }
    }

    pub fn status(&self) -> ReturnStatus {
        self.status
    }

    pub fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }

    pub fn committed(&self) -> Option<&ReturnTransaction> {
        self.committed.as_ref()
    }

    fn reject(&mut self, err: &BookkeepingError) {
        self.status = ReturnStatus::Rejected;
        self.rejection = Some(err.to_string());
        metrics::counter!("returns_rejected_total", "reason" => err.kind()).increment(1);
        tracing::info!(original = %self.request.original_code, error = %err, "Return rejected");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedReturn {
    pub id: String,
    pub total: Decimal,
}

/// Ledger steps applied by a commit, undone newest first on failure.
enum Applied {
    Debited { line_id: String, qty: i64 },
    Released { lot_id: String, qty: i64 },
}

#[derive(Clone)]
pub struct ReturnProcessor {
    store: Arc<dyn Store>,
    sequence: SequenceAllocator,
    ledger: QuantityLedger,
}

impl ReturnProcessor {
    pub fn new(store: Arc<dyn Store>, sequence: SequenceAllocator, ledger: QuantityLedger) -> Self {
        Self {
            store,
            sequence,
            ledger,
        }
    }

    /// Validate and commit in one go.
    pub async fn create_return(
        &self,
        request: ReturnRequest,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<CreatedReturn, BookkeepingError> {
        let mut draft = ReturnDraft::new(request);
        self.validate(&mut draft).await?;
        let transaction = self.commit(&mut draft, user, now).await?;
        Ok(CreatedReturn {
            id: transaction.id,
            total: transaction.total,
        })
    }

    /// `Draft -> Validated`, or `Draft -> Rejected` with the reason.
    #[tracing::instrument(skip(self, draft), fields(original = %draft.request.original_code))]
    pub async fn validate(&self, draft: &mut ReturnDraft) -> Result<(), BookkeepingError> {
        if draft.status != ReturnStatus::Draft {
            return Err(BookkeepingError::InvalidTransition {
                from: draft.status.as_str(),
                action: "validate",
            });
        }

        match self.resolve(&draft.request).await {
            Ok(resolved) => {
                draft.resolved = Some(resolved);
                draft.status = ReturnStatus::Validated;
                Ok(())
            }
            // Transient storage trouble says nothing about the return itself.
            Err(err) if err.is_retryable() => Err(err),
            Err(err) => {
                draft.reject(&err);
                Err(err)
            }
        }
    }

    async fn resolve(&self, request: &ReturnRequest) -> Result<Resolved, BookkeepingError> {
        let original = match self.store.get_document(&request.original_code).await? {
            Some(document) if document.class == DocumentClass::Sell => document,
            _ => return Err(BookkeepingError::OriginalNotFound(request.original_code.clone())),
        };
        let lines = self.store.list_line_items(&original.id).await?;

        let mut seen = HashSet::new();
        let mut products = Vec::with_capacity(request.products.len());
        for returned in &request.products {
            if !seen.insert(returned.lot_id.as_str()) {
                return Err(BookkeepingError::BadRequest(format!(
                    "lot {} is listed more than once",
                    returned.lot_id
                )));
            }

            let line = lines
                .iter()
                .find(|l| {
                    l.kind == LineKind::Product && l.lot_id.as_deref() == Some(returned.lot_id.as_str())
                })
                .ok_or_else(|| BookkeepingError::LotNotOnOriginal {
                    lot_id: returned.lot_id.clone(),
                    original: original.id.clone(),
                })?;

            match self.store.get_lot(&returned.lot_id).await? {
                Some(lot) if lot.active => {}
                _ => {
                    return Err(BookkeepingError::OriginalNotFound(format!(
                        "active lot {}",
                        returned.lot_id
                    )))
                }
            }

            products.push(ReturnProductLine {
                line_id: line.id.clone(),
                lot_id: returned.lot_id.clone(),
                buy_price: line.buy_price,
                original_quantity: line.returnable_quantity(),
                return_quantity: returned.return_quantity,
            });
        }

        if let Some(negative) = products.iter().find(|p| p.return_quantity < 0) {
            return Err(BookkeepingError::InvalidQuantity(format!(
                "lot {} has return quantity {}",
                negative.lot_id, negative.return_quantity
            )));
        }
        if !validate_return_quantities(&products) {
            // Only the upper bound is left to fail.
            let over = products
                .iter()
                .find(|p| p.return_quantity > p.original_quantity)
                .map(|p| (p.line_id.clone(), p.return_quantity, p.original_quantity))
                .unwrap_or_default();
            return Err(BookkeepingError::ReturnExceedsOriginal {
                reference: over.0,
                requested: over.1,
                headroom: over.2,
            });
        }

        let mut services = Vec::new();
        let mut service_quantities = Vec::new();
        for returned in &request.services {
            let line = lines
                .iter()
                .find(|l| l.kind == LineKind::Service && l.id == returned.line_id)
                .ok_or_else(|| {
                    BookkeepingError::OriginalNotFound(format!("service line {}", returned.line_id))
                })?;
            let service = ReturnServiceLine {
                line_id: line.id.clone(),
                buy_price: line.buy_price,
                return_reason: returned.return_reason.trim().to_string(),
            };
            if !service.has_reason() {
                continue;
            }
            if line.returnable_quantity() <= 0 {
                return Err(BookkeepingError::ReturnExceedsOriginal {
                    reference: line.id.clone(),
                    requested: line.quantity,
                    headroom: 0,
                });
            }
            service_quantities.push(line.returnable_quantity());
            services.push(service);
        }

        if !has_items_to_return(&products, &services) {
            return Err(BookkeepingError::EmptyReturn);
        }

        products.retain(|p| p.return_quantity > 0);
        let total = calculate_return_total(&products, &services).ok_or_else(|| {
            BookkeepingError::InvalidQuantity("return total is out of range".to_string())
        })?;
        Ok(Resolved {
            counterpart_id: original.counterpart_id,
            products,
            services,
            service_quantities,
            total,
        })
    }

    /// `Validated -> Committed`.
    ///
    /// A failed commit leaves the draft `Validated`. Every ledger step is
    /// conditional, so retrying is safe: a return whose quantity was taken
    /// by a concurrent one fails again with the same error.
    #[tracing::instrument(skip(self, draft), fields(original = %draft.request.original_code))]
    pub async fn commit(
        &self,
        draft: &mut ReturnDraft,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<ReturnTransaction, BookkeepingError> {
        let resolved = match (draft.status, &draft.resolved) {
            (ReturnStatus::Validated, Some(resolved)) => resolved.clone(),
            (status, _) => {
                return Err(BookkeepingError::InvalidTransition {
                    from: status.as_str(),
                    action: "commit",
                })
            }
        };

        match self.apply(&draft.request, resolved, user, now).await {
            Ok(transaction) => {
                draft.status = ReturnStatus::Committed;
                draft.committed = Some(transaction.clone());
                metrics::counter!("returns_committed_total").increment(1);
                tracing::info!(id = %transaction.id, total = %transaction.total, "Return committed");
                Ok(transaction)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Return commit failed");
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        request: &ReturnRequest,
        resolved: Resolved,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<ReturnTransaction, BookkeepingError> {
        let id = self.sequence.next_id(DocumentClass::Return, now).await?;
        let total = resolved.total;

        let mut applied = Vec::new();
        let outcome = self.apply_ledger(&resolved, &mut applied).await;
        let outcome = match outcome {
            Ok(()) => {
                let transaction = ReturnTransaction {
                    id,
                    original_code: request.original_code.clone(),
                    counterpart_id: resolved.counterpart_id,
                    date: request.date.unwrap_or_else(|| now.date_naive()),
                    total,
                    created_by: user.to_string(),
                    products: resolved.products,
                    services: resolved.services,
                    created_utc: now,
                };
                self.store
                    .insert_return(&transaction)
                    .await
                    .map(|_| transaction)
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(transaction) => Ok(transaction),
            Err(err) => {
                tracing::warn!(error = %err, undo_steps = applied.len(), "Return commit failed");
                self.unwind(applied, err).await
            }
        }
    }

    async fn apply_ledger(
        &self,
        resolved: &Resolved,
        applied: &mut Vec<Applied>,
    ) -> Result<(), BookkeepingError> {
        for product in &resolved.products {
            self.ledger
                .debit_line(&product.line_id, product.return_quantity)
                .await?;
            applied.push(Applied::Debited {
                line_id: product.line_id.clone(),
                qty: product.return_quantity,
            });

            self.ledger
                .release(&product.lot_id, product.return_quantity)
                .await?;
            applied.push(Applied::Released {
                lot_id: product.lot_id.clone(),
                qty: product.return_quantity,
            });
        }

        for (service, qty) in resolved.services.iter().zip(&resolved.service_quantities) {
            self.ledger.debit_line(&service.line_id, *qty).await?;
            applied.push(Applied::Debited {
                line_id: service.line_id.clone(),
                qty: *qty,
            });
        }
        Ok(())
    }

    async fn unwind<T>(
        &self,
        applied: Vec<Applied>,
        err: BookkeepingError,
    ) -> Result<T, BookkeepingError> {
        const OP: &str = "commit_return";

        for step in applied.into_iter().rev() {
            let (name, undone) = match &step {
                Applied::Debited { line_id, qty } => (
                    "credit_line",
                    self.ledger.credit_line(line_id, *qty).await.map(|_| ()),
                ),
                Applied::Released { lot_id, qty } => (
                    "withdraw_release",
                    self.ledger.reserve(lot_id, *qty).await.map(|_| ()),
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

    pub async fn get_return(&self, id: &str) -> Result<ReturnTransaction, BookkeepingError> {
        self.store
            .get_return(id)
            .await?
            .ok_or_else(|| BookkeepingError::NotFound(format!("return {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;
    use crate::services::documents::{DocumentService, NewDocument, NewLine};
    use crate::services::hierarchy::HierarchyManager;
    use crate::services::memory::MemoryStore;
    use crate::services::sequence::DEFAULT_COUNTER_WIDTH;
    use chrono::TimeZone;

    const LOT: &str = "BUY250101-L1";
    const SALE: &str = "SELL250101";
    const SERVICE_LINE: &str = "SELL250101-2";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 20, 9, 30, 0).unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        documents: DocumentService,
        returns: ReturnProcessor,
    }

    fn line(kind: LineKind, lot_id: Option<&str>, unit_price: i64, quantity: i64) -> NewLine {
        NewLine {
            kind,
            description: String::new(),
            lot_id: lot_id.map(str::to_string),
            product_id: Some("drill".to_string()),
            unit_price: Decimal::from(unit_price),
            buy_price: Some(Decimal::from(5)),
            sell_price: None,
            quantity,
            tax_rate: Decimal::ZERO,
        }
    }

    /// Lot of 10 bought at 10; an invoice sells 6 of it plus one service.
    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let sequence = SequenceAllocator::new(shared.clone(), DEFAULT_COUNTER_WIDTH);
        let ledger = QuantityLedger::new(shared.clone());
        let documents = DocumentService::new(
            shared.clone(),
            sequence.clone(),
            ledger.clone(),
            HierarchyManager::new(shared.clone()),
        );
        let returns = ReturnProcessor::new(shared, sequence, ledger);

        let mut purchase_line = line(LineKind::Product, None, 10, 10);
        purchase_line.buy_price = None;
        for (class, lines) in [
            (DocumentClass::Buy, vec![purchase_line]),
            (
                DocumentClass::Sell,
                vec![
                    line(LineKind::Product, Some(LOT), 25, 6),
                    line(LineKind::Service, None, 8, 1),
                ],
            ),
        ] {
            documents
                .create_document(
                    NewDocument {
                        class,
                        date: None,
                        counterpart_id: "client-7".to_string(),
                        lines,
                        amount: None,
                    },
                    "u1",
                    now(),
                )
                .await
                .unwrap();
        }

        Fixture {
            store,
            documents,
            returns,
        }
    }

    fn request(lot_qty: i64, service_reason: Option<&str>) -> ReturnRequest {
        ReturnRequest {
            original_code: SALE.to_string(),
            date: None,
            products: vec![ReturnedProduct {
                lot_id: LOT.to_string(),
                return_quantity: lot_qty,
            }],
            services: service_reason
                .map(|reason| {
                    vec![ReturnedService {
                        line_id: SERVICE_LINE.to_string(),
                        return_reason: reason.to_string(),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    async fn remaining(fx: &Fixture) -> i64 {
        fx.documents.get_lot(LOT).await.unwrap().remaining_quantity
    }

    #[tokio::test]
    async fn test_full_return_restores_lot_then_refuses_more() {
        let fx = fixture().await;
        assert_eq!(remaining(&fx).await, 4);

        let created = fx.returns.create_return(request(6, None), "u1", now()).await.unwrap();

        assert_eq!(created.id, "RET250101");
        assert_eq!(created.total, Decimal::from(60));
        assert_eq!(remaining(&fx).await, 10);

        let again = fx.returns.create_return(request(1, None), "u1", now()).await;
        assert!(matches!(
            again,
            Err(BookkeepingError::ReturnExceedsOriginal { requested: 1, headroom: 0, .. })
        ));
        assert_eq!(remaining(&fx).await, 10);
    }

    #[tokio::test]
    async fn test_reasoned_service_is_returned_whole_once() {
        let fx = fixture().await;

        let created = fx
            .returns
            .create_return(request(2, Some("installation cancelled")), "u1", now())
            .await
            .unwrap();
        assert_eq!(created.total, Decimal::from(2 * 10 + 5));

        let stored = fx.returns.get_return(&created.id).await.unwrap();
        assert_eq!(stored.original_code, SALE);
        assert_eq!(stored.counterpart_id, "client-7");
        assert_eq!(stored.products.len(), 1);
        assert_eq!(stored.products[0].original_quantity, 6);
        assert_eq!(stored.services.len(), 1);

        let again = fx
            .returns
            .create_return(request(0, Some("again")), "u1", now())
            .await;
        assert!(matches!(again, Err(BookkeepingError::ReturnExceedsOriginal { .. })));
    }

    #[tokio::test]
    async fn test_original_must_be_an_existing_sale() {
        let fx = fixture().await;

        for original in ["SELL259999", "BUY250101"] {
            let mut req = request(1, None);
            req.original_code = original.to_string();
            assert!(matches!(
                fx.returns.create_return(req, "u1", now()).await,
                Err(BookkeepingError::OriginalNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_lot_must_appear_on_original() {
        let fx = fixture().await;
        let mut req = request(1, None);
        req.products[0].lot_id = "BUY250101-L9".to_string();

        assert!(matches!(
            fx.returns.create_return(req, "u1", now()).await,
            Err(BookkeepingError::LotNotOnOriginal { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_and_negative_returns_are_rejected_before_mutation() {
        let fx = fixture().await;

        let mut draft = ReturnDraft::new(request(0, Some("   ")));
        assert!(matches!(
            fx.returns.validate(&mut draft).await,
            Err(BookkeepingError::EmptyReturn)
        ));
        assert_eq!(draft.status(), ReturnStatus::Rejected);
        assert!(draft.rejection().is_some());

        assert!(matches!(
            fx.returns.create_return(request(-1, None), "u1", now()).await,
            Err(BookkeepingError::InvalidQuantity(_))
        ));
        assert_eq!(remaining(&fx).await, 4);
        assert_eq!(fx.store.count_returns_for(SALE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminal_states_accept_no_transitions() {
        let fx = fixture().await;

        let mut draft = ReturnDraft::new(request(1, None));
        assert!(matches!(
            fx.returns.commit(&mut draft, "u1", now()).await,
            Err(BookkeepingError::InvalidTransition { from: "draft", .. })
        ));

        fx.returns.validate(&mut draft).await.unwrap();
        assert!(matches!(
            fx.returns.validate(&mut draft).await,
            Err(BookkeepingError::InvalidTransition { from: "validated", .. })
        ));

        fx.returns.commit(&mut draft, "u1", now()).await.unwrap();
        assert_eq!(draft.status(), ReturnStatus::Committed);
        assert!(draft.committed().is_some());
        assert!(matches!(
            fx.returns.commit(&mut draft, "u1", now()).await,
            Err(BookkeepingError::InvalidTransition { from: "committed", .. })
        ));

        let mut rejected = ReturnDraft::new(request(0, None));
        assert!(fx.returns.validate(&mut rejected).await.is_err());
        assert!(matches!(
            fx.returns.validate(&mut rejected).await,
            Err(BookkeepingError::InvalidTransition { from: "rejected", .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_record_undoes_ledger_and_stays_retryable() {
        let fx = fixture().await;
        let mut draft = ReturnDraft::new(request(3, Some("late")));
        fx.returns.validate(&mut draft).await.unwrap();
        fx.store.fail_next("insert_return", 1);

        assert!(matches!(
            fx.returns.commit(&mut draft, "u1", now()).await,
            Err(BookkeepingError::StorageUnavailable(_))
        ));
        assert_eq!(draft.status(), ReturnStatus::Validated);
        assert_eq!(remaining(&fx).await, 4);
        let lines = fx.store.list_line_items(SALE).await.unwrap();
        assert!(lines.iter().all(|l| l.returned_quantity == 0));

        fx.returns.commit(&mut draft, "u1", now()).await.unwrap();
        assert_eq!(remaining(&fx).await, 7);
    }

    #[tokio::test]
    async fn test_failed_undo_is_partial_write() {
        let fx = fixture().await;
        fx.store.fail_next("insert_return", 1);
        fx.store.fail_next("credit_line", 1);

        match fx.returns.create_return(request(2, None), "u1", now()).await {
            Err(BookkeepingError::PartialWrite { operation, step, .. }) => {
                assert_eq!(operation, "commit_return");
                assert_eq!(step, "credit_line");
            }
            other => panic!("expected PartialWrite, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_racing_returns_cannot_both_take_the_same_units() {
        let fx = fixture().await;
        let mut first = ReturnDraft::new(request(6, None));
        let mut second = ReturnDraft::new(request(6, None));
        fx.returns.validate(&mut first).await.unwrap();
        fx.returns.validate(&mut second).await.unwrap();

        fx.returns.commit(&mut first, "u1", now()).await.unwrap();
        assert!(matches!(
            fx.returns.commit(&mut second, "u1", now()).await,
            Err(BookkeepingError::ReturnExceedsOriginal { .. })
        ));
        // Commit failures never leave the validated state.
        assert_eq!(second.status(), ReturnStatus::Validated);
        assert!(second.rejection().is_none());
        assert_eq!(remaining(&fx).await, 10);

        // A retry fails the same way and still changes nothing.
        assert!(matches!(
            fx.returns.commit(&mut second, "u1", now()).await,
            Err(BookkeepingError::ReturnExceedsOriginal { .. })
        ));
        assert_eq!(second.status(), ReturnStatus::Validated);
        assert_eq!(remaining(&fx).await, 10);
        assert_eq!(fx.store.count_returns_for(SALE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_return_total_is_rejected_at_validation() {
        let fx = fixture().await;
        const COPY: &str = "SELL250199";

        // An invoice whose stored costs are too large to sum.
        let mut original = fx.store.get_document(SALE).await.unwrap().unwrap();
        original.id = COPY.to_string();
        fx.store.insert_document(&original).await.unwrap();
        let lines: Vec<LineItem> = fx
            .store
            .list_line_items(SALE)
            .await
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(n, mut line)| {
                line.id = format!("{}-{}", COPY, n + 1);
                line.document_id = COPY.to_string();
                line.buy_price = Decimal::MAX;
                line
            })
            .collect();
        fx.store.insert_line_items(&lines).await.unwrap();

        let mut req = request(2, None);
        req.original_code = COPY.to_string();
        let mut draft = ReturnDraft::new(req);
        assert!(matches!(
            fx.returns.validate(&mut draft).await,
            Err(BookkeepingError::InvalidQuantity(_))
        ));
        assert_eq!(draft.status(), ReturnStatus::Rejected);
        assert_eq!(remaining(&fx).await, 4);
        assert_eq!(fx.store.count_returns_for(COPY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_returned_invoice_cannot_be_deleted() {
        let fx = fixture().await;
        fx.returns.create_return(request(1, None), "u1", now()).await.unwrap();

        assert!(matches!(
            fx.documents.delete_document(SALE).await,
            Err(BookkeepingError::DocumentReferenced { returns: 1, .. })
        ));
    }
}
