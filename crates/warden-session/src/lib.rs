//! warden-session: agent terminal sessions under human supervision.
//!
//! [`SessionManager`] runs every command request through risk assessment and
//! policy, parks commands that need a human in the execution queue, runs
//! approved ones in the sandbox, and keeps a JSONL transcript per session from
//! which pending approvals are recovered after a restart.

pub mod collab;
pub mod context;
mod error;
pub mod manager;
pub mod session;
pub mod store;
pub mod transcript;
pub mod types;

pub use collab::{AuditRecord, AuditSink, DetachedTerminal, TerminalTransport, TracingAuditSink};
pub use context::WardenContext;
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{
    AgentTerminalSession, CommandOutcome, CommandRecord, PendingApproval, SessionState, StateTransition,
    TransitionMarker, META_PROJECT_PATH, META_USER_ID,
};
pub use store::{MemoryTranscriptLog, TranscriptLog, TranscriptStore};
pub use transcript::{reconcile, ApprovalOutcome, TranscriptEntry};
pub use types::{
    ApprovalDecision, ApprovalResult, ApprovalStatus, ExecuteResult, ExecuteStatus, ExecutionReport,
    InterruptResult, RestoreReport, ResumeResult, SessionEvent, SessionInfo,
};
