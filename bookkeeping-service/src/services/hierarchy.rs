//! Ordered, idempotent maintenance of parent/child ownership.
//!
//! Children are written before their parent listing is updated and deleted
//! before their parent. A failure after an earlier step landed surfaces as
//! `PartialWrite` naming the step; re-running the operation completes it.

use crate::models::{ChildRef, ParentRef, Project, Subtask, Task};
use crate::services::error::BookkeepingError;
use crate::services::store::Store;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task: Task,
    pub subtasks: Vec<Subtask>,
}

/// A project with its children resolved from their back-references.
#[derive(Debug, Clone)]
pub struct ProjectTree {
    pub project: Project,
    pub tasks: Vec<TaskNode>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub tasks_deleted: u64,
    pub subtasks_deleted: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub tasks: usize,
    pub subtasks: usize,
}

#[derive(Clone)]
pub struct HierarchyManager {
    store: Arc<dyn Store>,
}

impl HierarchyManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_project(&self, name: &str, user: &str) -> Result<Project, BookkeepingError> {
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            task_ids: Vec::new(),
            created_by: user.to_string(),
            created_utc: Utc::now(),
        };
        self.store.insert_project(&project).await?;
        tracing::info!(project_id = %project.id, "Project created");
        Ok(project)
    }

    pub async fn project_tree(&self, project_id: &str) -> Result<ProjectTree, BookkeepingError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| BookkeepingError::NotFound(format!("project {}", project_id)))?;

        let mut tasks = Vec::new();
        for task in self.store.list_tasks(project_id).await? {
            let subtasks = self.store.list_subtasks(&task.id).await?;
            tasks.push(TaskNode { task, subtasks });
        }
        Ok(ProjectTree { project, tasks })
    }

    /// Insert a child under `parent`, then list it on the parent.
    ///
    /// If listing fails the child is deleted again; if that also fails the
    /// caller gets `PartialWrite` and `reconcile_project` repairs the listing.
    #[tracing::instrument(skip(self))]
    pub async fn create_child(
        &self,
        parent: ParentRef,
        title: &str,
        user: &str,
    ) -> Result<String, BookkeepingError> {
        const OP: &str = "create_child";
        let child_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let linked = match &parent {
            ParentRef::Project(project_id) => {
                if self.store.get_project(project_id).await?.is_none() {
                    return Err(BookkeepingError::NotFound(format!("project {}", project_id)));
                }
                let task = Task {
                    id: child_id.clone(),
                    project_id: project_id.clone(),
                    title: title.to_string(),
                    subtask_ids: Vec::new(),
                    created_by: user.to_string(),
                    created_utc: now,
                };
                self.store.insert_task(&task).await?;
                self.store.link_task(project_id, &child_id).await
            }
            ParentRef::Task(task_id) => {
                if self.store.get_task(task_id).await?.is_none() {
                    return Err(BookkeepingError::NotFound(format!("task {}", task_id)));
                }
                let subtask = Subtask {
                    id: child_id.clone(),
                    task_id: task_id.clone(),
                    title: title.to_string(),
                    done: false,
                    created_by: user.to_string(),
                    created_utc: now,
                };
                self.store.insert_subtask(&subtask).await?;
                self.store.link_subtask(task_id, &child_id).await
            }
        };

        let failure = match linked {
            Ok(true) => {
                tracing::info!(child_id = %child_id, "Child created");
                return Ok(child_id);
            }
            // Parent deleted between the check and the link.
            Ok(false) => BookkeepingError::NotFound(format!("parent of {}", child_id)),
            Err(e) => e,
        };

        tracing::warn!(child_id = %child_id, error = %failure, "Linking child failed, removing it");
        let undone = match &parent {
            ParentRef::Project(_) => self.store.delete_task(&child_id).await,
            ParentRef::Task(_) => self.store.delete_subtask(&child_id).await,
        };
        match undone {
            Ok(_) => Err(failure),
            Err(undo_err) => Err(BookkeepingError::partial_write(
                OP,
                "link_parent",
                format!("{}; removing child failed: {}", failure, undo_err),
            )),
        }
    }

    /// Delete every subtask, then every task, then the project.
    #[tracing::instrument(skip(self))]
    pub async fn delete_project_cascade(
        &self,
        project_id: &str,
    ) -> Result<CascadeReport, BookkeepingError> {
        const OP: &str = "delete_project_cascade";
        let mut report = CascadeReport::default();
        let mut progressed = false;

        let tasks = self.store.list_tasks(project_id).await?;
        for task in &tasks {
            let removed = self
                .store
                .delete_subtasks_of_task(&task.id)
                .await
                .map_err(|e| e.after_progress(progressed, OP, "delete_subtasks"))?;
            report.subtasks_deleted += removed;
            progressed |= removed > 0;

            let deleted = self
                .store
                .delete_task(&task.id)
                .await
                .map_err(|e| e.after_progress(progressed, OP, "delete_task"))?;
            if deleted {
                report.tasks_deleted += 1;
                progressed = true;
            }
        }

        let deleted = self
            .store
            .delete_project(project_id)
            .await
            .map_err(|e| e.after_progress(progressed, OP, "delete_project"))?;

        if deleted {
            metrics::counter!("cascade_deletes_total", "kind" => "project").increment(1);
        }
        tracing::info!(
            project_id = %project_id,
            tasks = report.tasks_deleted,
            subtasks = report.subtasks_deleted,
            "Project cascade finished"
        );
        Ok(report)
    }

    /// Delete a task (with its subtasks) or a subtask, then pull it from
    /// its parent's listing. Deleting a missing child succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn delete_child_detached(&self, child: ChildRef) -> Result<(), BookkeepingError> {
        const OP: &str = "delete_child_detached";

        match child {
            ChildRef::Task(task_id) => {
                let Some(task) = self.store.get_task(&task_id).await? else {
                    tracing::debug!(task_id = %task_id, "Task already gone");
                    return Ok(());
                };

                let removed = self.store.delete_subtasks_of_task(&task_id).await?;
                let mut progressed = removed > 0;
                progressed |= self
                    .store
                    .delete_task(&task_id)
                    .await
                    .map_err(|e| e.after_progress(progressed, OP, "delete_task"))?;
                self.store
                    .unlink_task(&task.project_id, &task_id)
                    .await
                    .map_err(|e| e.after_progress(progressed, OP, "unlink_task"))?;
                metrics::counter!("cascade_deletes_total", "kind" => "task").increment(1);
            }
            ChildRef::Subtask(subtask_id) => {
                let Some(subtask) = self.store.get_subtask(&subtask_id).await? else {
                    tracing::debug!(subtask_id = %subtask_id, "Subtask already gone");
                    return Ok(());
                };

                let progressed = self.store.delete_subtask(&subtask_id).await?;
                self.store
                    .unlink_subtask(&subtask.task_id, &subtask_id)
                    .await
                    .map_err(|e| e.after_progress(progressed, OP, "unlink_subtask"))?;
                metrics::counter!("cascade_deletes_total", "kind" => "subtask").increment(1);
            }
        }
        Ok(())
    }

    /// Delete a document's line items, then the document.
    ///
    /// Refused while returns point at the document. Returns whether the
    /// document existed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_document_cascade(&self, document_id: &str) -> Result<bool, BookkeepingError> {
        const OP: &str = "delete_document_cascade";

        let returns = self.store.count_returns_for(document_id).await?;
        if returns > 0 {
            return Err(BookkeepingError::DocumentReferenced {
                document_id: document_id.to_string(),
                returns,
            });
        }

        let removed = self.store.delete_line_items(document_id).await?;
        let existed = self
            .store
            .delete_document(document_id)
            .await
            .map_err(|e| e.after_progress(removed > 0, OP, "delete_document"))?;

        if existed {
            metrics::counter!("cascade_deletes_total", "kind" => "document").increment(1);
        }
        tracing::info!(document_id = %document_id, lines = removed, existed, "Document cascade finished");
        Ok(existed)
    }

    /// Rebuild the project's `task_ids` and every task's `subtask_ids`
    /// from the children's parent ids.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_project(&self, project_id: &str) -> Result<ReconcileReport, BookkeepingError> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(BookkeepingError::NotFound(format!("project {}", project_id)));
        }

        let tasks = self.store.list_tasks(project_id).await?;
        let mut report = ReconcileReport {
            tasks: tasks.len(),
            subtasks: 0,
        };

        for task in &tasks {
            let subtask_ids: Vec<String> = self
                .store
                .list_subtasks(&task.id)
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            report.subtasks += subtask_ids.len();
            if subtask_ids != task.subtask_ids {
                tracing::warn!(task_id = %task.id, "Repairing subtask listing");
            }
            self.store.set_task_subtasks(&task.id, &subtask_ids).await?;
        }

        let task_ids: Vec<String> = tasks.into_iter().map(|t| t.id).collect();
        self.store.set_project_tasks(project_id, &task_ids).await?;

        tracing::info!(project_id = %project_id, tasks = report.tasks, subtasks = report.subtasks, "Project reconciled");
        Ok(report)
    }
}
