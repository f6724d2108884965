//! Storage seam.
//!
//! Every method is a single atomic operation on one record (or one
//! filtered bulk delete). Multi-step workflows and their ordering live in
//! the services above this trait, never in an implementation.

use crate::models::{
    Document, DocumentClass, LineItem, Lot, Project, ReturnTransaction, Subtask, Task,
};
use crate::services::error::BookkeepingError;
use async_trait::async_trait;

pub type StoreResult<T> = Result<T, BookkeepingError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Whether a counter record exists for `key`.
    async fn counter_exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically set `counter = max(counter, floor) + 1` (upserting) and
    /// return the new value.
    async fn increment_counter(&self, key: &str, floor: u64) -> StoreResult<u64>;

    /// Greatest id of the class collection starting with `prefix`.
    async fn latest_id_with_prefix(
        &self,
        class: DocumentClass,
        prefix: &str,
    ) -> StoreResult<Option<String>>;

    // -------------------------------------------------------------------------
    // Documents and line items
    // -------------------------------------------------------------------------

    async fn insert_document(&self, document: &Document) -> StoreResult<()>;
    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>>;
    /// Returns false when nothing was deleted.
    async fn delete_document(&self, id: &str) -> StoreResult<bool>;

    async fn insert_line_items(&self, lines: &[LineItem]) -> StoreResult<()>;
    async fn get_line_item(&self, id: &str) -> StoreResult<Option<LineItem>>;
    async fn list_line_items(&self, document_id: &str) -> StoreResult<Vec<LineItem>>;
    async fn delete_line_items(&self, document_id: &str) -> StoreResult<u64>;

    /// Add `qty` to the line's returned quantity if it stays within the line
    /// quantity. Returns the updated line, `None` when the condition failed
    /// or the line does not exist.
    async fn debit_line(&self, line_id: &str, qty: i64) -> StoreResult<Option<LineItem>>;

    /// Subtract `qty` from the returned quantity if it stays non-negative.
    async fn credit_line(&self, line_id: &str, qty: i64) -> StoreResult<Option<LineItem>>;

    // -------------------------------------------------------------------------
    // Lots
    // -------------------------------------------------------------------------

    async fn insert_lots(&self, lots: &[Lot]) -> StoreResult<()>;
    async fn get_lot(&self, id: &str) -> StoreResult<Option<Lot>>;

    /// Decrement `remaining_quantity` by `qty` if the lot is active and holds
    /// at least `qty`.
    async fn reserve_lot(&self, lot_id: &str, qty: i64) -> StoreResult<Option<Lot>>;

    /// Increment `remaining_quantity` by `qty` if it stays within
    /// `original_quantity`.
    async fn release_lot(&self, lot_id: &str, qty: i64) -> StoreResult<Option<Lot>>;

    async fn set_lot_active(&self, lot_id: &str, active: bool) -> StoreResult<Option<Lot>>;
    async fn delete_lot(&self, lot_id: &str) -> StoreResult<bool>;

    /// Sales line items and returns naming the lot.
    async fn count_lot_references(&self, lot_id: &str) -> StoreResult<u64>;

    /// Lots created by a purchase bon.
    async fn list_lots_of_document(&self, document_id: &str) -> StoreResult<Vec<Lot>>;
    async fn delete_lots_of_document(&self, document_id: &str) -> StoreResult<u64>;

    // -------------------------------------------------------------------------
    // Returns
    // -------------------------------------------------------------------------

    async fn insert_return(&self, transaction: &ReturnTransaction) -> StoreResult<()>;
    async fn get_return(&self, id: &str) -> StoreResult<Option<ReturnTransaction>>;
    async fn count_returns_for(&self, original_code: &str) -> StoreResult<u64>;

    // -------------------------------------------------------------------------
    // Project tree
    // -------------------------------------------------------------------------

    async fn insert_project(&self, project: &Project) -> StoreResult<()>;
    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;
    async fn delete_project(&self, id: &str) -> StoreResult<bool>;
    /// `$addToSet`; false when the project does not exist.
    async fn link_task(&self, project_id: &str, task_id: &str) -> StoreResult<bool>;
    /// `$pull`; false when the project does not exist.
    async fn unlink_task(&self, project_id: &str, task_id: &str) -> StoreResult<bool>;
    async fn set_project_tasks(&self, project_id: &str, task_ids: &[String]) -> StoreResult<bool>;

    async fn insert_task(&self, task: &Task) -> StoreResult<()>;
    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>>;
    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>>;
    async fn delete_task(&self, id: &str) -> StoreResult<bool>;
    async fn link_subtask(&self, task_id: &str, subtask_id: &str) -> StoreResult<bool>;
    async fn unlink_subtask(&self, task_id: &str, subtask_id: &str) -> StoreResult<bool>;
    async fn set_task_subtasks(&self, task_id: &str, subtask_ids: &[String])
        -> StoreResult<bool>;

    async fn insert_subtask(&self, subtask: &Subtask) -> StoreResult<()>;
    async fn get_subtask(&self, id: &str) -> StoreResult<Option<Subtask>>;
    async fn list_subtasks(&self, task_id: &str) -> StoreResult<Vec<Subtask>>;
    async fn delete_subtask(&self, id: &str) -> StoreResult<bool>;
    async fn delete_subtasks_of_task(&self, task_id: &str) -> StoreResult<u64>;
}
