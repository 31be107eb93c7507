//! Per-session task list, in memory only.

use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct TaskItem {
    pub id: usize,
    pub text: String,
    pub done: bool,
}

/// Owner of every session's task list.
#[derive(Debug, Default)]
pub struct TaskBoard {
    lists: Mutex<HashMap<String, Vec<TaskItem>>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session: &str, text: &str) -> TaskItem {
        let mut lists = self.lists.lock().await;
        let list = lists.entry(session.to_string()).or_default();
        let item = TaskItem {
            id: list.len() + 1,
            text: text.to_string(),
            done: false,
        };
        list.push(item.clone());
        item
    }

    pub async fn complete(&self, session: &str, id: usize) -> bool {
        let mut lists = self.lists.lock().await;
        if let Some(list) = lists.get_mut(session)
            && let Some(item) = list.iter_mut().find(|t| t.id == id)
        {
            item.done = true;
            return true;
        }
        false
    }

    pub async fn list(&self, session: &str) -> Vec<TaskItem> {
        self.lists
            .lock()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear(&self, session: &str) {
        self.lists.lock().await.remove(session);
    }
}

pub struct TaskAddTool {
    board: Arc<TaskBoard>,
}

impl TaskAddTool {
    pub fn new(board: Arc<TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl Tool for TaskAddTool {
    fn name(&self) -> &str {
        "task_add"
    }

    fn description(&self) -> &str {
        "Add an item to this session's task list."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tasks
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = args["text"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text'".into()))?;
        let item = self.board.add(&ctx.session_id, text).await;
        Ok(json!({ "added": item }))
    }
}

pub struct TaskCompleteTool {
    board: Arc<TaskBoard>,
}

impl TaskCompleteTool {
    pub fn new(board: Arc<TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Mark a task in this session's list as done."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tasks
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let id = args["id"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'id'".into()))?
            as usize;
        let completed = self.board.complete(&ctx.session_id, id).await;
        Ok(json!({ "completed": completed, "id": id }))
    }
}

pub struct TaskListTool {
    board: Arc<TaskBoard>,
}

impl TaskListTool {
    pub fn new(board: Arc<TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl Tool for TaskListTool {
    fn name(&self) -> &str {
        "task_list"
    }

    fn description(&self) -> &str {
        "Show this session's task list."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tasks
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tasks = self.board.list(&ctx.session_id).await;
        Ok(json!({ "tasks": tasks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(session: &str) -> ToolContext {
        ToolContext {
            workspace_root: std::path::PathBuf::from("/tmp"),
            session_id: session.into(),
            auto_mode: true,
        }
    }

    #[tokio::test]
    async fn add_complete_list_flow() {
        let board = Arc::new(TaskBoard::new());
        let add = TaskAddTool::new(board.clone());
        let complete = TaskCompleteTool::new(board.clone());
        let list = TaskListTool::new(board.clone());

        add.execute(json!({ "text": "read the file" }), &ctx("s1"))
            .await
            .unwrap();
        add.execute(json!({ "text": "edit it" }), &ctx("s1"))
            .await
            .unwrap();

        let done = complete
            .execute(json!({ "id": 1 }), &ctx("s1"))
            .await
            .unwrap();
        assert_eq!(done["completed"], true);

        let tasks = list.execute(json!({}), &ctx("s1")).await.unwrap();
        let items = tasks["tasks"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["done"], true);
        assert_eq!(items[1]["done"], false);
    }

    #[tokio::test]
    async fn lists_are_per_session() {
        let board = Arc::new(TaskBoard::new());
        board.add("a", "task for a").await;

        let list = TaskListTool::new(board.clone());
        let other = list.execute(json!({}), &ctx("b")).await.unwrap();
        assert!(other["tasks"].as_array().unwrap().is_empty());
    }
}
