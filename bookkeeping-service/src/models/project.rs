//! Project → task → subtask ownership tree.
//!
//! The child's parent id is authoritative. `task_ids` and `subtask_ids` are
//! materialized listings kept in step with atomic add/pull updates and can
//! be rebuilt from the children at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
    pub created_by: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub subtask_ids: Vec<String>,
    pub created_by: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    #[serde(rename = "_id")]
    pub id: String,
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub done: bool,
    pub created_by: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
}

/// A node that can own children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Project(String),
    Task(String),
}

impl ParentRef {
    /// Parse a route segment (`projects`/`tasks`) and id.
    pub fn parse(parent_type: &str, id: String) -> Option<Self> {
        match parent_type {
            "project" | "projects" => Some(ParentRef::Project(id)),
            "task" | "tasks" => Some(ParentRef::Task(id)),
            _ => None,
        }
    }
}

/// A node that has a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    Task(String),
    Subtask(String),
}

impl ChildRef {
    pub fn parse(child_type: &str, id: String) -> Option<Self> {
        match child_type {
            "task" | "tasks" => Some(ChildRef::Task(id)),
            "subtask" | "subtasks" => Some(ChildRef::Subtask(id)),
            _ => None,
        }
    }
}
