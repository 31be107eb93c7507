//! Client-facing event frames and the bounded sink the engine writes to.
//!
//! The engine never touches the HTTP response directly: it pushes
//! `AgentEvent`s into an `EventSink` (a bounded mpsc channel) and the gateway
//! drains the receiver into `data: <json>\n\n` SSE frames. A slow client
//! fills the channel, `send` blocks, and back-pressure reaches the step loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Events emitted over the SSE stream, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streaming-chat token delta.
    Chunk { content: String },
    /// Streaming-chat terminator.
    Done,
    /// ReAct reasoning step.
    Thought { content: String },
    /// The agent is invoking a tool.
    Action { tool: String, args: Value },
    /// Truncated tool output.
    Observation { content: String },
    /// Terminal answer for the run.
    Final { content: String },
    /// Approval request; ends the run in agent mode.
    #[serde(rename_all = "camelCase")]
    DiffRequest {
        file_path: String,
        diff: String,
        session_id: String,
    },
    /// Hint for the editor to reveal a file the agent just wrote.
    OpenFile { path: String },
    /// Out-of-band error.
    Error { content: String },
}

/// Bounded writer the engine emits through.
///
/// `discard()` produces a sink with no receiver, used by delegation workers
/// whose internal events are not forwarded to the outer stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<AgentEvent>>,
}

impl EventSink {
    /// Default channel capacity for client-facing streams.
    pub const CAPACITY: usize = 64;

    /// Create a sink/receiver pair with the default capacity.
    pub fn channel() -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(Self::CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Send one event. Blocks when the channel is full; a dropped receiver
    /// is treated as a disconnected client and ignored.
    pub async fn send(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}
