//! Explicit wiring of the collaborators a [`SessionManager`](crate::SessionManager) uses.

use crate::collab::{AuditSink, DetachedTerminal, TerminalTransport, TracingAuditSink};
use crate::error::SessionError;
use crate::store::{MemoryTranscriptLog, TranscriptLog, TranscriptStore};
use std::sync::Arc;
use std::time::Duration;
use warden_core::{Config, PolicyEngine};
use warden_queue::{CommandExecutionQueue, FileKvStore, KvStore, MemoryKvStore};
use warden_sandbox::{CommandRunner, SandboxConfig, SandboxExecutor};

/// Everything the session layer talks to, built once by the process entry point.
pub struct WardenContext {
    pub store: Arc<dyn KvStore>,
    pub queue: Arc<CommandExecutionQueue>,
    /// `None` means no sandbox: approved commands fail instead of running unisolated.
    pub runner: Option<Arc<dyn CommandRunner>>,
    pub policy: PolicyEngine,
    pub sandbox: SandboxConfig,
    pub transcripts: Arc<dyn TranscriptLog>,
    pub audit: Arc<dyn AuditSink>,
    pub terminal: Arc<dyn TerminalTransport>,
}

impl WardenContext {
    /// Context over `store` with no sandbox, no rules, and in-memory transcripts.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            queue: Arc::new(CommandExecutionQueue::new(store.clone())),
            store,
            runner: None,
            policy: PolicyEngine::new(),
            sandbox: SandboxConfig::default(),
            transcripts: Arc::new(MemoryTranscriptLog::new()),
            audit: Arc::new(TracingAuditSink),
            terminal: Arc::new(DetachedTerminal),
        }
    }

    /// Fully in-memory context.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    /// File-backed context under the configured data directory, running
    /// commands through the configured sandbox backend.
    pub async fn from_config(config: &Config) -> Result<Self, SessionError> {
        let data_dir = config.resolved_data_dir();
        let store = FileKvStore::open(data_dir.join("store")).await?;
        tracing::debug!(data_dir = %data_dir.display(), "opening warden data directory");

        Ok(Self::new(Arc::new(store))
            .with_retention(Duration::from_secs(config.queue_retention_secs))
            .with_policy(PolicyEngine::with_rules(config.rules.clone())?)
            .with_sandbox(config.sandbox.clone())
            .with_runner(Arc::new(SandboxExecutor::new()))
            .with_transcripts(Arc::new(TranscriptStore::with_dir(data_dir.join("transcripts")))))
    }

    /// Rebuild the queue over the same store with a different retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.queue = Arc::new(CommandExecutionQueue::with_retention(self.store.clone(), retention));
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_transcripts(mut self, transcripts: Arc<dyn TranscriptLog>) -> Self {
        self.transcripts = transcripts;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn TerminalTransport>) -> Self {
        self.terminal = terminal;
        self
    }
}
