use crate::models::{Subtask, Task};
use crate::services::hierarchy::{ProjectTree, TaskNode};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateChildRequest {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct CreateChildResponse {
    pub id: String,
    pub parent_type: String,
    pub parent_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubtaskResponse {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub done: bool,
    pub created_by: String,
    pub created_at: String,
}

impl From<Subtask> for SubtaskResponse {
    fn from(subtask: Subtask) -> Self {
        Self {
            id: subtask.id,
            task_id: subtask.task_id,
            title: subtask.title,
            done: subtask.done,
            created_by: subtask.created_by,
            created_at: subtask.created_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub subtask_ids: Vec<String>,
    pub created_by: String,
    pub created_at: String,
    pub subtasks: Vec<SubtaskResponse>,
}

impl From<TaskNode> for TaskResponse {
    fn from(node: TaskNode) -> Self {
        let Task {
            id,
            project_id,
            title,
            subtask_ids,
            created_by,
            created_utc,
        } = node.task;

        Self {
            id,
            project_id,
            title,
            subtask_ids,
            created_by,
            created_at: created_utc.to_rfc3339(),
            subtasks: node.subtasks.into_iter().map(SubtaskResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub task_ids: Vec<String>,
    pub created_by: String,
    pub created_at: String,
    pub tasks: Vec<TaskResponse>,
}

impl From<ProjectTree> for ProjectResponse {
    fn from(tree: ProjectTree) -> Self {
        Self {
            id: tree.project.id,
            name: tree.project.name,
            task_ids: tree.project.task_ids,
            created_by: tree.project.created_by,
            created_at: tree.project.created_utc.to_rfc3339(),
            tasks: tree.tasks.into_iter().map(TaskResponse::from).collect(),
        }
    }
}
