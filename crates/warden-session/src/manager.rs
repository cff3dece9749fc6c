//! Session table, command execution flow and crash recovery.
//!
//! Locking: the session table sits behind an `RwLock`; each session has its
//! own `Mutex` that serializes every state change, including approval
//! resolution. The session lock is never held while a command runs.

use crate::collab::AuditRecord;
use crate::context::WardenContext;
use crate::error::SessionError;
use crate::session::{AgentTerminalSession, CommandOutcome, CommandRecord, PendingApproval, SessionState};
use crate::transcript::{new_entry_id, reconcile, ApprovalOutcome, TranscriptEntry};
use crate::types::{
    ApprovalDecision, ApprovalResult, ApprovalStatus, ExecuteResult, ExecutionReport, InterruptResult,
    RestoreReport, ResumeResult, SessionEvent, SessionInfo,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use warden_core::clock::now_ms;
use warden_core::{assess, AgentRole, ApprovalMemory, CommandRisk, Decision, PolicyRequest, SHELL_TOOL};
use warden_queue::CommandExecution;
use warden_sandbox::{SandboxError, SandboxResult};

const SESSION_PREFIX: &str = "session:";
const MEMORY_KEY: &str = "approval_memory";
/// Transcript entries scanned when recovering a pending approval.
const RECOVERY_WINDOW: usize = 500;
const EVENT_CAPACITY: usize = 256;
const INTERRUPT_COMMENT: &str = "cancelled by user interrupt";
const CLOSE_COMMENT: &str = "cancelled: session closed";

type SessionSlot = Arc<Mutex<AgentTerminalSession>>;

/// Owns every agent terminal session.
pub struct SessionManager {
    ctx: WardenContext,
    sessions: RwLock<HashMap<String, SessionSlot>>,
    memory: RwLock<ApprovalMemory>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(ctx: WardenContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
            memory: RwLock::new(ApprovalMemory::new()),
            events,
        }
    }

    pub fn context(&self) -> &WardenContext {
        &self.ctx
    }

    /// Receive session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Copy of the remembered approvals.
    pub async fn approval_memory(&self) -> ApprovalMemory {
        self.memory.read().await.clone()
    }

    pub async fn create_session(
        &self,
        agent_id: &str,
        role: AgentRole,
        conversation_id: Option<String>,
        host: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<SessionInfo, SessionError> {
        let mut session = AgentTerminalSession::new(agent_id, role, conversation_id, host, metadata);
        let session_id = session.session_id.clone();

        match self.ctx.terminal.open(&session_id, host).await {
            Ok(pty) => session.pty_session_id = pty,
            Err(e) => tracing::warn!(session_id = %session_id, "terminal unavailable: {e}"),
        }

        self.transcript(
            &session_id,
            TranscriptEntry::SessionStart {
                id: new_entry_id(),
                timestamp: session.created_at,
                session_id: session_id.clone(),
                agent_id: agent_id.to_string(),
                role,
                host: host.to_string(),
            },
        )
        .await;
        self.persist(&session).await;

        let info = SessionInfo::from(&session);
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        tracing::info!(session_id = %session_id, agent_id, role = %role, "session created");
        self.emit(SessionEvent::SessionCreated { session_id });
        Ok(info)
    }

    /// Sessions, optionally filtered, oldest first.
    pub async fn list_sessions(
        &self,
        agent_id: Option<&str>,
        conversation_id: Option<&str>,
    ) -> Vec<SessionInfo> {
        let slots: Vec<SessionSlot> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(slots.len());
        for slot in slots {
            let session = slot.lock().await;
            if agent_id.is_some_and(|a| session.agent_id != a) {
                continue;
            }
            if conversation_id.is_some_and(|c| session.conversation_id.as_deref() != Some(c)) {
                continue;
            }
            infos.push(SessionInfo::from(&*session));
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id)));
        infos
    }

    pub async fn get_session_info(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let slot = self.slot(session_id).await?;
        let session = slot.lock().await;
        Ok(SessionInfo::from(&*session))
    }

    /// Close and forget a session. A pending approval is cancelled.
    pub async fn close_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let Some(slot) = self.sessions.write().await.remove(session_id) else {
            return Ok(false);
        };
        let mut session = slot.lock().await;

        if let Some(pending) = session.pending_approval().cloned() {
            if let Err(e) = self
                .ctx
                .queue
                .deny(&pending.command_id, None, Some(CLOSE_COMMENT))
                .await
            {
                tracing::warn!(session_id, command_id = %pending.command_id, "could not cancel queued command: {e}");
            }
            self.resolution(session_id, &pending.command_id, ApprovalOutcome::Cancelled, None, Some(CLOSE_COMMENT))
                .await;
        }

        if let Some(pty) = session.pty_session_id.take() {
            if let Err(e) = self.ctx.terminal.close(&pty).await {
                tracing::warn!(session_id, "terminal close failed: {e}");
            }
        }
        if let Err(e) = self
            .ctx
            .store
            .delete(&format!("{SESSION_PREFIX}{session_id}"))
            .await
        {
            tracing::warn!(session_id, "could not delete session record: {e}");
        }
        tracing::info!(session_id, "session closed");
        self.emit(SessionEvent::SessionClosed {
            session_id: session_id.to_string(),
        });
        Ok(true)
    }

    /// Decide on and, when allowed, run a command for the session's agent.
    ///
    /// Policy rejections are returned as `status = error` values, not `Err`.
    pub async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        description: Option<&str>,
        force_approval: bool,
    ) -> Result<ExecuteResult, SessionError> {
        let slot = self.slot(session_id).await?;
        let assessment = assess(command);
        let mut session = slot.lock().await;

        if let Some(blocker) = session.execute_blocker() {
            tracing::info!(session_id, command, "command refused: {blocker}");
            return Ok(ExecuteResult::error(&assessment, blocker));
        }

        let project = session.project_path();
        let decision = {
            let memory = self.memory.read().await;
            let request = PolicyRequest {
                role: session.agent_role,
                tool: SHELL_TOOL,
                command,
                assessment: &assessment,
                user_id: session.user_id(),
                project: project.as_deref(),
            };
            self.ctx.policy.decide(&request, Some(&memory))
        };
        let decision = match decision {
            Decision::Allow { .. } if force_approval => Decision::Ask {
                reason: "approval requested by caller".to_string(),
            },
            other => other,
        };

        tracing::info!(
            session_id,
            command,
            risk = %assessment.risk,
            decision = decision.label(),
            reason = decision.reason(),
            "policy decision"
        );
        self.transcript(
            session_id,
            TranscriptEntry::CommandRequest {
                id: new_entry_id(),
                timestamp: now_ms(),
                command: command.to_string(),
                risk: assessment.risk,
                decision: decision.label().to_string(),
                reason: decision.reason().to_string(),
            },
        )
        .await;

        let purpose = description.unwrap_or_default();
        let chat_id = session.conversation_id.clone();

        match decision {
            Decision::Deny { reason } => {
                let now = now_ms();
                session.record(CommandRecord {
                    command_id: None,
                    command: command.to_string(),
                    risk: assessment.risk,
                    reasons: assessment.reasons.clone(),
                    outcome: CommandOutcome::Rejected,
                    auto_approved: false,
                    exit_code: None,
                    resolved_by: None,
                    requested_at: now,
                    recorded_at: now,
                });
                self.persist(&session).await;
                self.audit(&session, None, command, assessment.risk, CommandOutcome::Rejected, false, None, None, None)
                    .await;
                Ok(ExecuteResult::error(&assessment, reason))
            }
            Decision::Ask { reason } => {
                let record = CommandExecution::new(session_id, chat_id, command, purpose, &assessment);
                let record = self.ctx.queue.add(record).await?;
                let pending = PendingApproval {
                    command_id: record.command_id.clone(),
                    command: record.command.clone(),
                    purpose: record.purpose.clone(),
                    risk: record.risk_level,
                    reasons: record.risk_reasons.clone(),
                    requested_at: record.requested_at,
                };
                let transition = session.request_approval(pending.clone())?;
                self.transcript(session_id, TranscriptEntry::approval_request(&pending)).await;
                self.persist(&session).await;
                drop(session);

                self.emit_transition(session_id, transition.from, transition.to);
                self.emit(SessionEvent::ApprovalRequested {
                    session_id: session_id.to_string(),
                    command_id: pending.command_id.clone(),
                    command: pending.command.clone(),
                    risk: pending.risk,
                });
                Ok(ExecuteResult::pending(&assessment, pending.command_id, reason))
            }
            Decision::Allow { .. } => {
                let record = CommandExecution::auto_approved(session_id, chat_id, command, purpose, &assessment);
                let record = self.ctx.queue.add(record).await?;
                let record = self.ctx.queue.start_execution(&record.command_id).await?;
                drop(session);

                let report = self.run_and_finish(&slot, record, true, None).await;
                Ok(ExecuteResult::executed(&assessment, report))
            }
        }
    }

    /// Resolve the session's pending approval. A resolved or mismatched
    /// command id fails with [`SessionError::NoPendingApproval`].
    pub async fn approve_command(&self, decision: ApprovalDecision) -> Result<ApprovalResult, SessionError> {
        let session_id = decision.session_id.as_str();
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        let pending = match (session.pending_approval(), decision.command_id.as_deref()) {
            (Some(p), Some(id)) if p.command_id != id => None,
            (p, _) => p.cloned(),
        }
        .ok_or_else(|| SessionError::NoPendingApproval(session_id.to_string()))?;

        let user_id = decision
            .user_id
            .clone()
            .or_else(|| session.user_id().map(str::to_string));
        let comment = decision.comment.as_deref();

        self.ensure_queued(session_id, session.conversation_id.clone(), &pending)
            .await?;
        let queue_result = if decision.approved {
            self.ctx.queue.approve(&pending.command_id, user_id.as_deref(), comment).await
        } else {
            self.ctx.queue.deny(&pending.command_id, user_id.as_deref(), comment).await
        };
        if let Err(e) = queue_result {
            tracing::warn!(session_id, command_id = %pending.command_id, "approval rejected by queue: {e}");
            return Err(e.into());
        }

        let (pending, transition) = session.claim_pending(Some(&pending.command_id))?;
        let outcome = if decision.approved {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Denied
        };
        self.resolution(session_id, &pending.command_id, outcome, user_id.as_deref(), comment)
            .await;
        tracing::info!(
            session_id,
            command_id = %pending.command_id,
            user_id = user_id.as_deref().unwrap_or("-"),
            approved = decision.approved,
            "approval resolved"
        );

        if !decision.approved {
            session.record(CommandRecord {
                command_id: Some(pending.command_id.clone()),
                command: pending.command.clone(),
                risk: pending.risk,
                reasons: pending.reasons.clone(),
                outcome: CommandOutcome::Denied,
                auto_approved: false,
                exit_code: None,
                resolved_by: user_id.clone(),
                requested_at: pending.requested_at,
                recorded_at: now_ms(),
            });
            self.persist(&session).await;
            self.audit(
                &session,
                Some(&pending.command_id),
                &pending.command,
                pending.risk,
                CommandOutcome::Denied,
                false,
                user_id.as_deref(),
                None,
                None,
            )
            .await;
            drop(session);
            self.emit_resolution(session_id, &pending.command_id, outcome);
            self.emit_transition(session_id, transition.from, transition.to);
            return Ok(ApprovalResult {
                status: ApprovalStatus::Denied,
                command_id: pending.command_id,
                message: decision.comment.clone(),
                remembered_pattern: None,
                execution: None,
            });
        }

        let remembered_pattern = match (&user_id, decision.auto_approve_future) {
            (Some(user), true) => {
                let project = if decision.remember_for_project {
                    decision.project_path.clone().or_else(|| session.project_path())
                } else {
                    None
                };
                Some(self.remember(user, project.as_deref(), &pending.command, pending.risk).await)
            }
            (None, true) => {
                tracing::warn!(session_id, "cannot remember approval without a user id");
                None
            }
            _ => None,
        };

        let record = self.ctx.queue.start_execution(&pending.command_id).await?;
        self.persist(&session).await;
        drop(session);
        self.emit_resolution(session_id, &pending.command_id, outcome);
        self.emit_transition(session_id, transition.from, transition.to);

        let report = self.run_and_finish(&slot, record, false, user_id).await;
        let status = if report.outcome == CommandOutcome::Executed {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Error
        };
        Ok(ApprovalResult {
            status,
            command_id: pending.command_id,
            message: report.error.clone(),
            remembered_pattern,
            execution: Some(report),
        })
    }

    /// Give the user control. Always legal; a pending approval is cancelled.
    pub async fn user_interrupt(&self, session_id: &str, user_id: &str) -> Result<InterruptResult, SessionError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;
        let (transition, cancelled) = session.interrupt(user_id);

        if let Some(pending) = &cancelled {
            if let Err(e) = self
                .ctx
                .queue
                .deny(&pending.command_id, Some(user_id), Some(INTERRUPT_COMMENT))
                .await
            {
                tracing::warn!(session_id, command_id = %pending.command_id, "could not cancel queued command: {e}");
            }
            self.resolution(
                session_id,
                &pending.command_id,
                ApprovalOutcome::Cancelled,
                Some(user_id),
                Some(INTERRUPT_COMMENT),
            )
            .await;
            session.record(CommandRecord {
                command_id: Some(pending.command_id.clone()),
                command: pending.command.clone(),
                risk: pending.risk,
                reasons: pending.reasons.clone(),
                outcome: CommandOutcome::Cancelled,
                auto_approved: false,
                exit_code: None,
                resolved_by: Some(user_id.to_string()),
                requested_at: pending.requested_at,
                recorded_at: now_ms(),
            });
            self.audit(
                &session,
                Some(&pending.command_id),
                &pending.command,
                pending.risk,
                CommandOutcome::Cancelled,
                false,
                Some(user_id),
                None,
                None,
            )
            .await;
        }

        self.transcript(
            session_id,
            TranscriptEntry::ControlTransition {
                id: new_entry_id(),
                timestamp: transition.at,
                from: transition.from,
                to: transition.to,
                marker: transition.marker,
                user_id: transition.user_id.clone(),
            },
        )
        .await;
        self.persist(&session).await;
        drop(session);

        tracing::info!(session_id, user_id, previous = %transition.from, "user took control");
        if let Some(pending) = &cancelled {
            self.emit_resolution(session_id, &pending.command_id, ApprovalOutcome::Cancelled);
        }
        self.emit_transition(session_id, transition.from, transition.to);
        Ok(InterruptResult {
            previous_state: transition.from,
            current_state: transition.to,
            cancelled_command_id: cancelled.map(|p| p.command_id),
        })
    }

    /// Hand control back to the agent. Only valid from user control.
    pub async fn agent_resume(&self, session_id: &str) -> Result<ResumeResult, SessionError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;
        let transition = session.resume()?;
        self.transcript(
            session_id,
            TranscriptEntry::ControlTransition {
                id: new_entry_id(),
                timestamp: transition.at,
                from: transition.from,
                to: transition.to,
                marker: transition.marker,
                user_id: None,
            },
        )
        .await;
        self.persist(&session).await;
        drop(session);

        tracing::info!(session_id, "agent resumed control");
        self.emit_transition(session_id, transition.from, transition.to);
        Ok(ResumeResult {
            previous_state: transition.from,
            current_state: transition.to,
        })
    }

    pub async fn get_command_state(&self, command_id: &str) -> Result<CommandExecution, SessionError> {
        self.ctx
            .queue
            .get(command_id)
            .await?
            .ok_or_else(|| SessionError::CommandNotFound(command_id.to_string()))
    }

    /// Every command awaiting approval, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<CommandExecution>, SessionError> {
        Ok(self.ctx.queue.get_pending().await?)
    }

    /// Load persisted sessions and approval memory, recovering pending
    /// approvals from each session's transcript.
    pub async fn restore(&self) -> Result<RestoreReport, SessionError> {
        match self.ctx.store.get(MEMORY_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(memory) => *self.memory.write().await = memory,
                Err(e) => tracing::warn!("ignoring unreadable approval memory: {e}"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("could not load approval memory: {e}"),
        }

        let mut report = RestoreReport::default();
        for key in self.ctx.store.keys(SESSION_PREFIX).await? {
            let Some(value) = self.ctx.store.get(&key).await? else {
                continue;
            };
            let mut session: AgentTerminalSession = match serde_json::from_value(value) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(key, "skipping unreadable session record: {e}");
                    continue;
                }
            };
            let session_id = session.session_id.clone();
            if self.sessions.read().await.contains_key(&session_id) {
                continue;
            }

            let changed = self.reconcile_session(&mut session, &mut report).await;
            if changed {
                self.persist(&session).await;
            }
            self.sessions
                .write()
                .await
                .insert(session_id, Arc::new(Mutex::new(session)));
            report.sessions += 1;
        }

        tracing::debug!(
            sessions = report.sessions,
            rehydrated = report.rehydrated.len(),
            cleared = report.cleared.len(),
            "sessions restored"
        );
        Ok(report)
    }

    async fn reconcile_session(&self, session: &mut AgentTerminalSession, report: &mut RestoreReport) -> bool {
        let session_id = session.session_id.clone();

        // a recorded approval the queue has already moved past is stale
        if let Some(pending) = session.pending_approval().cloned() {
            match self.ctx.queue.get(&pending.command_id).await {
                Ok(Some(record)) if !record.is_pending() => {
                    tracing::warn!(
                        session_id = %session_id,
                        command_id = %pending.command_id,
                        state = %record.state,
                        "dropping approval already resolved in queue"
                    );
                    if let Err(e) = session.claim_pending(Some(&pending.command_id)) {
                        tracing::warn!(session_id = %session_id, state = %session.state(), "could not clear stale approval: {e}");
                        return false;
                    }
                    report.cleared.push(session_id);
                    return true;
                }
                Ok(_) => return false,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "queue unavailable during recovery: {e}");
                    return false;
                }
            }
        }

        let entries = match self.ctx.transcripts.recent(&session_id, RECOVERY_WINDOW).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "could not read transcript: {e}");
                return false;
            }
        };
        let Some(pending) = reconcile(&entries) else {
            return false;
        };

        // the queue is authoritative once a decision reached it
        if let Ok(Some(record)) = self.ctx.queue.get(&pending.command_id).await {
            if !record.is_pending() {
                return false;
            }
        }
        if !session.rehydrate(pending.clone()) {
            tracing::warn!(
                session_id = %session_id,
                command_id = %pending.command_id,
                state = %session.state(),
                "unresolved approval found but session cannot hold it"
            );
            return false;
        }
        if let Err(e) = self
            .ensure_queued(&session_id, session.conversation_id.clone(), &pending)
            .await
        {
            tracing::warn!(session_id = %session_id, "could not requeue recovered approval: {e}");
        }
        tracing::info!(session_id = %session_id, command_id = %pending.command_id, "recovered pending approval");
        report.rehydrated.push(session_id);
        true
    }

    async fn slot(&self, session_id: &str) -> Result<SessionSlot, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Recreate the queue record for an approval whose record expired or was lost.
    async fn ensure_queued(
        &self,
        session_id: &str,
        chat_id: Option<String>,
        pending: &PendingApproval,
    ) -> Result<(), SessionError> {
        if self.ctx.queue.get(&pending.command_id).await?.is_some() {
            return Ok(());
        }
        let assessment = warden_core::RiskAssessment {
            risk: pending.risk,
            reasons: pending.reasons.clone(),
        };
        let mut record = CommandExecution::new(session_id, chat_id, &pending.command, &pending.purpose, &assessment);
        record.command_id = pending.command_id.clone();
        record.requested_at = pending.requested_at;
        self.ctx.queue.add(record).await?;
        tracing::debug!(session_id, command_id = %pending.command_id, "requeued pending approval");
        Ok(())
    }

    /// Run an EXECUTING record through the sandbox and record the outcome.
    async fn run_and_finish(
        &self,
        slot: &SessionSlot,
        record: CommandExecution,
        auto_approved: bool,
        resolved_by: Option<String>,
    ) -> ExecutionReport {
        let command_id = record.command_id.clone();
        let result = self.run_sandboxed(&record.command).await;
        let mut report = report_for(&command_id, result);

        for event in &report.security_events {
            tracing::warn!(
                command_id = %command_id,
                execution_id = %event.execution_id,
                kind = ?event.kind,
                "sandbox security event: {}",
                event.detail
            );
        }

        let queued = if report.outcome == CommandOutcome::Executed {
            self.ctx
                .queue
                .complete(&command_id, &report.stdout, &report.stderr, report.exit_code.unwrap_or(-1))
                .await
        } else {
            let error = if report.stderr.is_empty() {
                report.error.clone().unwrap_or_default()
            } else {
                report.stderr.clone()
            };
            self.ctx
                .queue
                .fail(&command_id, &report.stdout, &error, report.exit_code)
                .await
        };
        match queued {
            Ok(record) => {
                if report.duration_ms.is_none() {
                    report.duration_ms = record.duration_ms();
                }
            }
            Err(e) => tracing::warn!(command_id = %command_id, "could not record command result: {e}"),
        }

        let mut session = slot.lock().await;
        let session_id = session.session_id.clone();
        session.record(CommandRecord {
            command_id: Some(command_id.clone()),
            command: record.command.clone(),
            risk: record.risk_level,
            reasons: record.risk_reasons.clone(),
            outcome: report.outcome,
            auto_approved,
            exit_code: report.exit_code,
            resolved_by: resolved_by.clone(),
            requested_at: record.requested_at,
            recorded_at: now_ms(),
        });
        self.persist(&session).await;
        let pty = session.pty_session_id.clone();
        self.audit(
            &session,
            Some(&command_id),
            &record.command,
            record.risk_level,
            report.outcome,
            auto_approved,
            resolved_by.as_deref(),
            report.exit_code,
            report.duration_ms,
        )
        .await;
        drop(session);

        self.transcript(
            &session_id,
            TranscriptEntry::CommandResult {
                id: new_entry_id(),
                timestamp: now_ms(),
                command_id: Some(command_id.clone()),
                command: record.command.clone(),
                exit_code: report.exit_code,
                output: report.stdout.clone(),
                stderr: report.stderr.clone(),
                timed_out: report.timed_out,
            },
        )
        .await;
        if let Some(pty) = pty {
            let text = format!("$ {}\n{}{}", record.command, report.stdout, report.stderr);
            if let Err(e) = self.ctx.terminal.write(&pty, &text).await {
                tracing::warn!(session_id = %session_id, "terminal write failed: {e}");
            }
        }
        self.emit(SessionEvent::CommandCompleted {
            session_id,
            command_id,
            outcome: report.outcome,
            exit_code: report.exit_code,
        });
        report
    }

    async fn run_sandboxed(&self, command: &str) -> Result<SandboxResult, SandboxError> {
        match &self.ctx.runner {
            Some(runner) => runner.run(command, &self.ctx.sandbox).await,
            None => Err(SandboxError::BackendUnavailable(
                "no sandbox configured; refusing to run unisolated".to_string(),
            )),
        }
    }

    async fn remember(
        &self,
        user_id: &str,
        project: Option<&std::path::Path>,
        command: &str,
        risk: CommandRisk,
    ) -> String {
        let mut memory = self.memory.write().await;
        // pick up rules written by other processes sharing the store
        if let Ok(Some(value)) = self.ctx.store.get(MEMORY_KEY).await {
            if let Ok(stored) = serde_json::from_value::<ApprovalMemory>(value) {
                *memory = stored;
            }
        }
        let rule = memory.remember(user_id, project, command, risk);
        match serde_json::to_value(&*memory) {
            Ok(value) => {
                if let Err(e) = self.ctx.store.set(MEMORY_KEY, value, None).await {
                    tracing::warn!(user_id, "approval memory kept in memory only: {e}");
                }
            }
            Err(e) => tracing::warn!("could not serialize approval memory: {e}"),
        }
        rule.pattern
    }

    async fn persist(&self, session: &AgentTerminalSession) {
        let key = format!("{SESSION_PREFIX}{}", session.session_id);
        let result = match serde_json::to_value(session) {
            Ok(value) => self.ctx.store.set(&key, value, None).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            tracing::warn!(session_id = %session.session_id, "session state kept in memory only: {e}");
        }
    }

    async fn transcript(&self, session_id: &str, entry: TranscriptEntry) {
        if let Err(e) = self.ctx.transcripts.append(session_id, &entry).await {
            tracing::warn!(session_id, entry = entry.id(), "transcript append failed: {e}");
        }
    }

    async fn resolution(
        &self,
        session_id: &str,
        command_id: &str,
        outcome: ApprovalOutcome,
        user_id: Option<&str>,
        comment: Option<&str>,
    ) {
        self.transcript(
            session_id,
            TranscriptEntry::ApprovalResolution {
                id: new_entry_id(),
                timestamp: now_ms(),
                command_id: command_id.to_string(),
                outcome,
                user_id: user_id.map(str::to_string),
                comment: comment.map(str::to_string),
            },
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        session: &AgentTerminalSession,
        command_id: Option<&str>,
        command: &str,
        risk: CommandRisk,
        outcome: CommandOutcome,
        auto_approved: bool,
        user_id: Option<&str>,
        exit_code: Option<i32>,
        duration_ms: Option<u64>,
    ) {
        let record = AuditRecord {
            session_id: session.session_id.clone(),
            agent_id: session.agent_id.clone(),
            role: session.agent_role,
            command_id: command_id.map(str::to_string),
            command: command.to_string(),
            risk,
            outcome,
            auto_approved,
            user_id: user_id.map(str::to_string),
            exit_code,
            duration_ms,
        };
        self.ctx.audit.record(&record).await;
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_transition(&self, session_id: &str, from: SessionState, to: SessionState) {
        self.emit(SessionEvent::StateChanged {
            session_id: session_id.to_string(),
            from,
            to,
        });
    }

    fn emit_resolution(&self, session_id: &str, command_id: &str, outcome: ApprovalOutcome) {
        self.emit(SessionEvent::ApprovalResolved {
            session_id: session_id.to_string(),
            command_id: command_id.to_string(),
            outcome,
        });
    }
}

fn report_for(command_id: &str, result: Result<SandboxResult, SandboxError>) -> ExecutionReport {
    match result {
        Ok(result) => ExecutionReport {
            command_id: command_id.to_string(),
            outcome: if result.timed_out {
                CommandOutcome::Failed
            } else {
                CommandOutcome::Executed
            },
            exit_code: Some(result.exit_code),
            duration_ms: Some(result.duration.as_millis() as u64),
            timed_out: result.timed_out,
            error: result
                .timed_out
                .then(|| format!("command timed out (exit {})", result.exit_code)),
            stdout: result.stdout,
            stderr: result.stderr,
            security_events: result.security_events,
        },
        Err(e) => {
            tracing::warn!(command_id, "sandbox execution failed: {e}");
            ExecutionReport {
                command_id: command_id.to_string(),
                outcome: CommandOutcome::Failed,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
                security_events: Vec::new(),
                duration_ms: None,
                error: Some(e.to_string()),
            }
        }
    }
}
