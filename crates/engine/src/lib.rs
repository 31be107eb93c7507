//! The session-oriented ReAct agent engine.
//!
//! The engine follows a **reason → act → observe** cycle:
//!
//! 1. **Receive** a user message through the gateway
//! 2. **Trim** the conversation to the context budget (compacting when past
//!    75% of it)
//! 3. **Invoke** the model and parse a directive from the reply
//! 4. **Dispatch**: thoughts update the plan, actions run tools, diff
//!    requests wait for approval, delegate fans out sub-agents
//! 5. **Repeat** until a final, a pending approval, a stop request, or the
//!    step cap
//!
//! Approval responses re-enter the same session through
//! [`SessionManager::resume_with_decision`].

pub mod delegate;
pub mod manager;
pub mod prompt;
pub mod runner;
pub mod session;

pub use delegate::{TaskClass, classify_task, plan_models};
pub use manager::{ContextAttachment, Decision, OpenRequest, SessionManager};
pub use prompt::render_system_prompt;
pub use runner::{DEFAULT_MAX_STEPS, EngineDeps, RunOutcome, run_session};
pub use session::{PendingDiff, Session, SessionHandle};
