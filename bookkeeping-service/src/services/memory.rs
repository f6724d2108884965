//! In-process store used by tests and `STORE_BACKEND=memory` runs.
//!
//! Each conditional update runs under the map's shard lock for the key,
//! which gives the same single-record atomicity as the MongoDB backend.
//! Failures can be injected per primitive to exercise partial-write paths.

use crate::models::{
    Document, DocumentClass, LineItem, Lot, Project, ReturnTransaction, Subtask, Task,
};
use crate::services::error::BookkeepingError;
use crate::services::store::{Store, StoreResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
struct Collections {
    counters: DashMap<String, u64>,
    documents: DashMap<String, Document>,
    line_items: DashMap<String, LineItem>,
    lots: DashMap<String, Lot>,
    returns: DashMap<String, ReturnTransaction>,
    projects: DashMap<String, Project>,
    tasks: DashMap<String, Task>,
    subtasks: DashMap<String, Subtask>,
    failures: DashMap<&'static str, usize>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Collections>,
}

fn insert_unique<T>(map: &DashMap<String, T>, id: &str, value: T) -> StoreResult<()> {
    match map.entry(id.to_string()) {
        Entry::Occupied(_) => Err(BookkeepingError::Conflict(format!(
            "duplicate key: {}",
            id
        ))),
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of primitive `op` fail with
    /// `StorageUnavailable`.
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.inner.failures.insert(op, times);
    }

    /// Make every later call of `op` fail until cleared.
    pub fn fail_always(&self, op: &'static str) {
        self.inner.failures.insert(op, usize::MAX);
    }

    pub fn clear_failures(&self) {
        self.inner.failures.clear();
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        if let Some(mut remaining) = self.inner.failures.get_mut(op) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(BookkeepingError::StorageUnavailable(anyhow::anyhow!(
                    "injected failure in {}",
                    op
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.check("health_check")
    }

    async fn counter_exists(&self, key: &str) -> StoreResult<bool> {
        self.check("counter_exists")?;
        Ok(self.inner.counters.contains_key(key))
    }

    async fn increment_counter(&self, key: &str, floor: u64) -> StoreResult<u64> {
        self.check("increment_counter")?;
        let mut counter = self.inner.counters.entry(key.to_string()).or_insert(0);
        *counter = (*counter).max(floor) + 1;
        Ok(*counter)
    }

    async fn latest_id_with_prefix(
        &self,
        class: DocumentClass,
        prefix: &str,
    ) -> StoreResult<Option<String>> {
        self.check("latest_id_with_prefix")?;
        let latest = if class == DocumentClass::Return {
            self.inner
                .returns
                .iter()
                .filter(|r| r.key().starts_with(prefix))
                .map(|r| r.key().clone())
                .max()
        } else {
            self.inner
                .documents
                .iter()
                .filter(|d| d.key().starts_with(prefix))
                .map(|d| d.key().clone())
                .max()
        };
        Ok(latest)
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        self.check("insert_document")?;
        insert_unique(&self.inner.documents, &document.id, document.clone())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        self.check("get_document")?;
        Ok(self.inner.documents.get(id).map(|d| d.clone()))
    }

    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        self.check("delete_document")?;
        Ok(self.inner.documents.remove(id).is_some())
    }

    async fn insert_line_items(&self, lines: &[LineItem]) -> StoreResult<()> {
        self.check("insert_line_items")?;
        for line in lines {
            insert_unique(&self.inner.line_items, &line.id, line.clone())?;
        }
        Ok(())
    }

    async fn get_line_item(&self, id: &str) -> StoreResult<Option<LineItem>> {
        self.check("get_line_item")?;
        Ok(self.inner.line_items.get(id).map(|l| l.clone()))
    }

    async fn list_line_items(&self, document_id: &str) -> StoreResult<Vec<LineItem>> {
        self.check("list_line_items")?;
        let mut lines: Vec<LineItem> = self
            .inner
            .line_items
            .iter()
            .filter(|l| l.document_id == document_id)
            .map(|l| l.clone())
            .collect();
        lines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(lines)
    }

    async fn delete_line_items(&self, document_id: &str) -> StoreResult<u64> {
        self.check("delete_line_items")?;
        let before = self.inner.line_items.len();
        self.inner
            .line_items
            .retain(|_, l| l.document_id != document_id);
        Ok((before - self.inner.line_items.len()) as u64)
    }

    async fn debit_line(&self, line_id: &str, qty: i64) -> StoreResult<Option<LineItem>> {
        self.check("debit_line")?;
        Ok(self.inner.line_items.get_mut(line_id).and_then(|mut line| {
            if line.returned_quantity + qty <= line.quantity {
                line.returned_quantity += qty;
                Some(line.clone())
            } else {
                None
            }
        }))
    }

    async fn credit_line(&self, line_id: &str, qty: i64) -> StoreResult<Option<LineItem>> {
        self.check("credit_line")?;
        Ok(self.inner.line_items.get_mut(line_id).and_then(|mut line| {
            if line.returned_quantity - qty >= 0 {
                line.returned_quantity -= qty;
                Some(line.clone())
            } else {
                None
            }
        }))
    }

    async fn insert_lots(&self, lots: &[Lot]) -> StoreResult<()> {
        self.check("insert_lots")?;
        for lot in lots {
            insert_unique(&self.inner.lots, &lot.id, lot.clone())?;
        }
        Ok(())
    }

    async fn get_lot(&self, id: &str) -> StoreResult<Option<Lot>> {
        self.check("get_lot")?;
        Ok(self.inner.lots.get(id).map(|l| l.clone()))
    }

    async fn reserve_lot(&self, lot_id: &str, qty: i64) -> StoreResult<Option<Lot>> {
        self.check("reserve_lot")?;
        Ok(self.inner.lots.get_mut(lot_id).and_then(|mut lot| {
            if lot.active && lot.remaining_quantity >= qty {
                lot.remaining_quantity -= qty;
                Some(lot.clone())
            } else {
                None
            }
        }))
    }

    async fn release_lot(&self, lot_id: &str, qty: i64) -> StoreResult<Option<Lot>> {
        self.check("release_lot")?;
        Ok(self.inner.lots.get_mut(lot_id).and_then(|mut lot| {
            if lot.remaining_quantity + qty <= lot.original_quantity {
                lot.remaining_quantity += qty;
                Some(lot.clone())
            } else {
                None
            }
        }))
    }

    async fn set_lot_active(&self, lot_id: &str, active: bool) -> StoreResult<Option<Lot>> {
        self.check("set_lot_active")?;
        Ok(self.inner.lots.get_mut(lot_id).map(|mut lot| {
            lot.active = active;
            lot.clone()
        }))
    }

    async fn delete_lot(&self, lot_id: &str) -> StoreResult<bool> {
        self.check("delete_lot")?;
        Ok(self.inner.lots.remove(lot_id).is_some())
    }

    async fn count_lot_references(&self, lot_id: &str) -> StoreResult<u64> {
        self.check("count_lot_references")?;
        let lines = self
            .inner
            .line_items
            .iter()
            .filter(|l| l.lot_id.as_deref() == Some(lot_id))
            .count();
        let returns = self
            .inner
            .returns
            .iter()
            .filter(|r| r.products.iter().any(|p| p.lot_id == lot_id))
            .count();
        Ok((lines + returns) as u64)
    }

    async fn list_lots_of_document(&self, document_id: &str) -> StoreResult<Vec<Lot>> {
        self.check("list_lots_of_document")?;
        Ok(self
            .inner
            .lots
            .iter()
            .filter(|l| l.document_id == document_id)
            .map(|l| l.clone())
            .collect())
    }

    async fn delete_lots_of_document(&self, document_id: &str) -> StoreResult<u64> {
        self.check("delete_lots_of_document")?;
        let before = self.inner.lots.len();
        self.inner.lots.retain(|_, l| l.document_id != document_id);
        Ok((before - self.inner.lots.len()) as u64)
    }

    async fn insert_return(&self, transaction: &ReturnTransaction) -> StoreResult<()> {
        self.check("insert_return")?;
        insert_unique(&self.inner.returns, &transaction.id, transaction.clone())
    }

    async fn get_return(&self, id: &str) -> StoreResult<Option<ReturnTransaction>> {
        self.check("get_return")?;
        Ok(self.inner.returns.get(id).map(|r| r.clone()))
    }

    async fn count_returns_for(&self, original_code: &str) -> StoreResult<u64> {
        self.check("count_returns_for")?;
        Ok(self
            .inner
            .returns
            .iter()
            .filter(|r| r.original_code == original_code)
            .count() as u64)
    }

    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        self.check("insert_project")?;
        insert_unique(&self.inner.projects, &project.id, project.clone())
    }

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        self.check("get_project")?;
        Ok(self.inner.projects.get(id).map(|p| p.clone()))
    }

    async fn delete_project(&self, id: &str) -> StoreResult<bool> {
        self.check("delete_project")?;
        Ok(self.inner.projects.remove(id).is_some())
    }

    async fn link_task(&self, project_id: &str, task_id: &str) -> StoreResult<bool> {
        self.check("link_task")?;
        Ok(self
            .inner
            .projects
            .get_mut(project_id)
            .map(|mut project| {
                if !project.task_ids.iter().any(|id| id == task_id) {
                    project.task_ids.push(task_id.to_string());
                }
            })
            .is_some())
    }

    async fn unlink_task(&self, project_id: &str, task_id: &str) -> StoreResult<bool> {
        self.check("unlink_task")?;
        Ok(self
            .inner
            .projects
            .get_mut(project_id)
            .map(|mut project| project.task_ids.retain(|id| id != task_id))
            .is_some())
    }

    async fn set_project_tasks(&self, project_id: &str, task_ids: &[String]) -> StoreResult<bool> {
        self.check("set_project_tasks")?;
        Ok(self
            .inner
            .projects
            .get_mut(project_id)
            .map(|mut project| project.task_ids = task_ids.to_vec())
            .is_some())
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        self.check("insert_task")?;
        insert_unique(&self.inner.tasks, &task.id, task.clone())
    }

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        self.check("get_task")?;
        Ok(self.inner.tasks.get(id).map(|t| t.clone()))
    }

    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>> {
        self.check("list_tasks")?;
        let mut tasks: Vec<Task> = self
            .inner
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_utc.cmp(&b.created_utc).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        self.check("delete_task")?;
        Ok(self.inner.tasks.remove(id).is_some())
    }

    async fn link_subtask(&self, task_id: &str, subtask_id: &str) -> StoreResult<bool> {
        self.check("link_subtask")?;
        Ok(self
            .inner
            .tasks
            .get_mut(task_id)
            .map(|mut task| {
                if !task.subtask_ids.iter().any(|id| id == subtask_id) {
                    task.subtask_ids.push(subtask_id.to_string());
                }
            })
            .is_some())
    }

    async fn unlink_subtask(&self, task_id: &str, subtask_id: &str) -> StoreResult<bool> {
        self.check("unlink_subtask")?;
        Ok(self
            .inner
            .tasks
            .get_mut(task_id)
            .map(|mut task| task.subtask_ids.retain(|id| id != subtask_id))
            .is_some())
    }

    async fn set_task_subtasks(
        &self,
        task_id: &str,
        subtask_ids: &[String],
    ) -> StoreResult<bool> {
        self.check("set_task_subtasks")?;
        Ok(self
            .inner
            .tasks
            .get_mut(task_id)
            .map(|mut task| task.subtask_ids = subtask_ids.to_vec())
            .is_some())
    }

    async fn insert_subtask(&self, subtask: &Subtask) -> StoreResult<()> {
        self.check("insert_subtask")?;
        insert_unique(&self.inner.subtasks, &subtask.id, subtask.clone())
    }

    async fn get_subtask(&self, id: &str) -> StoreResult<Option<Subtask>> {
        self.check("get_subtask")?;
        Ok(self.inner.subtasks.get(id).map(|s| s.clone()))
    }

    async fn list_subtasks(&self, task_id: &str) -> StoreResult<Vec<Subtask>> {
        self.check("list_subtasks")?;
        let mut subtasks: Vec<Subtask> = self
            .inner
            .subtasks
            .iter()
            .filter(|s| s.task_id == task_id)
            .map(|s| s.clone())
            .collect();
        subtasks.sort_by(|a, b| a.created_utc.cmp(&b.created_utc).then(a.id.cmp(&b.id)));
        Ok(subtasks)
    }

    async fn delete_subtask(&self, id: &str) -> StoreResult<bool> {
        self.check("delete_subtask")?;
        Ok(self.inner.subtasks.remove(id).is_some())
    }

    async fn delete_subtasks_of_task(&self, task_id: &str) -> StoreResult<u64> {
        self.check("delete_subtasks_of_task")?;
        let before = self.inner.subtasks.len();
        self.inner.subtasks.retain(|_, s| s.task_id != task_id);
        Ok((before - self.inner.subtasks.len()) as u64)
    }
}
