//! Typed topic table
//!
//! Each marker type binds a topic name to the payload type carried on it, so
//! `publish_typed::<VfsList>(..)` cannot send the wrong shape.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use ts_rs::TS;

/// A topic with a statically known payload type.
pub trait Topic {
    const NAME: &'static str;
    type Payload: Serialize + DeserializeOwned + Send + 'static;
}

// ============================================================================
// Virtual file system
// ============================================================================

/// Request a directory listing.
pub struct VfsList;

/// Successful directory listing.
pub struct VfsListResp;

/// Failed directory listing.
pub struct VfsListError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "session.ts")]
pub struct VfsListRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct VfsEntry {
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "session.ts")]
pub struct VfsListing {
    /// Echo of the requested path
    pub path: String,
    pub entries: Vec<VfsEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "session.ts")]
pub struct VfsFailure {
    pub path: String,
    pub message: String,
}

impl Topic for VfsList {
    const NAME: &'static str = "vfs:list";
    type Payload = VfsListRequest;
}

impl Topic for VfsListResp {
    const NAME: &'static str = "vfs:list:resp";
    type Payload = VfsListing;
}

impl Topic for VfsListError {
    const NAME: &'static str = "vfs:list:error";
    type Payload = VfsFailure;
}

// ============================================================================
// Agent task graphs
// ============================================================================

pub struct TaskGraphCreated;
pub struct TaskGraphUpdated;
pub struct TaskGraphCompleted;

/// Wildcard covering every task graph event.
pub const TASKGRAPH_EVENTS: &str = "agent.taskgraph.*";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "session.ts")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct TaskNode {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct TaskGraphEvent {
    pub graph_id: String,
    #[serde(default)]
    pub tasks: Vec<TaskNode>,
}

impl Topic for TaskGraphCreated {
    const NAME: &'static str = "agent.taskgraph.created";
    type Payload = TaskGraphEvent;
}

impl Topic for TaskGraphUpdated {
    const NAME: &'static str = "agent.taskgraph.updated";
    type Payload = TaskGraphEvent;
}

impl Topic for TaskGraphCompleted {
    const NAME: &'static str = "agent.taskgraph.completed";
    type Payload = TaskGraphEvent;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error_topic, response_topic, topic_matches};

    #[test]
    fn test_vfs_reply_topics_follow_convention() {
        assert_eq!(VfsListResp::NAME, response_topic(VfsList::NAME));
        assert_eq!(VfsListError::NAME, error_topic(VfsList::NAME));
    }

    #[test]
    fn test_taskgraph_topics_match_wildcard() {
        for name in [
            TaskGraphCreated::NAME,
            TaskGraphUpdated::NAME,
            TaskGraphCompleted::NAME,
        ] {
            assert!(topic_matches(TASKGRAPH_EVENTS, name), "{name}");
        }
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
