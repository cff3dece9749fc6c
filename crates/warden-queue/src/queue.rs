//! Durable, indexed store of [`CommandExecution`] records.
//!
//! Layout in the backing [`KvStore`]:
//! - `cmd:<id>` holds the record
//! - `idx:session:<session_id>:<id>` and `idx:chat:<chat_id>:<id>` are secondary indexes
//! - `idx:pending:<id>` exists while the record awaits approval
//!
//! Ids inside index keys are percent-escaped, so a caller-supplied id
//! containing `:` cannot reach into another id's index range.
//!
//! Every write refreshes the retention TTL on the record and its index keys.

use crate::error::QueueError;
use crate::execution::{CommandExecution, ExecutionState};
use crate::kv::{escape_key, unescape_key, KvStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use warden_core::clock::now_ms;
use warden_core::DEFAULT_QUEUE_RETENTION_SECS;

const CMD_PREFIX: &str = "cmd:";
const SESSION_INDEX: &str = "idx:session:";
const CHAT_INDEX: &str = "idx:chat:";
const PENDING_INDEX: &str = "idx:pending:";

/// Queue of command executions shared by every session.
pub struct CommandExecutionQueue {
    store: Arc<dyn KvStore>,
    retention: Duration,
    lock: Mutex<()>,
}

impl CommandExecutionQueue {
    /// Queue with the default 24h retention.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_retention(store, Duration::from_secs(DEFAULT_QUEUE_RETENTION_SECS))
    }

    pub fn with_retention(store: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            lock: Mutex::new(()),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Insert a new record. Fails if the id is already queued.
    pub async fn add(&self, record: CommandExecution) -> Result<CommandExecution, QueueError> {
        let _guard = self.lock.lock().await;
        if self.load(&record.command_id).await?.is_some() {
            return Err(QueueError::Duplicate(record.command_id));
        }
        self.write(&record).await?;
        tracing::debug!(
            command_id = %record.command_id,
            session_id = %record.terminal_session_id,
            state = %record.state,
            "queued command"
        );
        Ok(record)
    }

    pub async fn get(&self, command_id: &str) -> Result<Option<CommandExecution>, QueueError> {
        self.load(command_id).await
    }

    /// Replace an existing record wholesale (last writer wins).
    pub async fn update(&self, record: CommandExecution) -> Result<CommandExecution, QueueError> {
        let _guard = self.lock.lock().await;
        if self.load(&record.command_id).await?.is_none() {
            return Err(QueueError::NotFound(record.command_id));
        }
        self.write(&record).await?;
        Ok(record)
    }

    /// Records for a terminal session, oldest first.
    pub async fn get_by_session(&self, session_id: &str) -> Result<Vec<CommandExecution>, QueueError> {
        self.by_index(&owner_prefix(SESSION_INDEX, session_id)).await
    }

    /// Records for a chat, oldest first.
    pub async fn get_by_chat(&self, chat_id: &str) -> Result<Vec<CommandExecution>, QueueError> {
        self.by_index(&owner_prefix(CHAT_INDEX, chat_id)).await
    }

    /// Every record awaiting approval across all sessions, FIFO by request time.
    pub async fn get_pending(&self) -> Result<Vec<CommandExecution>, QueueError> {
        let records = self.by_index(PENDING_INDEX).await?;
        Ok(records.into_iter().filter(|r| r.is_pending()).collect())
    }

    pub async fn approve(
        &self,
        command_id: &str,
        user_id: Option<&str>,
        comment: Option<&str>,
    ) -> Result<CommandExecution, QueueError> {
        self.transition(command_id, ExecutionState::Approved, |r| {
            r.approved_at = Some(now_ms());
            r.approved_by_user_id = user_id.map(str::to_string);
            r.approval_comment = comment.map(str::to_string);
        })
        .await
    }

    pub async fn deny(
        &self,
        command_id: &str,
        user_id: Option<&str>,
        comment: Option<&str>,
    ) -> Result<CommandExecution, QueueError> {
        self.transition(command_id, ExecutionState::Denied, |r| {
            r.approved_by_user_id = user_id.map(str::to_string);
            r.approval_comment = comment.map(str::to_string);
        })
        .await
    }

    /// APPROVED -> EXECUTING.
    pub async fn start_execution(&self, command_id: &str) -> Result<CommandExecution, QueueError> {
        self.transition(command_id, ExecutionState::Executing, |r| {
            r.execution_started_at = Some(now_ms());
        })
        .await
    }

    /// EXECUTING -> COMPLETED with the captured output.
    pub async fn complete(
        &self,
        command_id: &str,
        output: &str,
        stderr: &str,
        return_code: i32,
    ) -> Result<CommandExecution, QueueError> {
        self.transition(command_id, ExecutionState::Completed, |r| {
            r.output = output.to_string();
            r.stderr = stderr.to_string();
            r.return_code = Some(return_code);
            r.execution_completed_at = Some(now_ms());
        })
        .await
    }

    /// EXECUTING -> FAILED on timeout or when the sandbox could not run the command.
    pub async fn fail(
        &self,
        command_id: &str,
        output: &str,
        error: &str,
        return_code: Option<i32>,
    ) -> Result<CommandExecution, QueueError> {
        self.transition(command_id, ExecutionState::Failed, |r| {
            r.output = output.to_string();
            r.stderr = error.to_string();
            r.return_code = return_code;
            r.execution_completed_at = Some(now_ms());
        })
        .await
    }

    /// Drop expired records and index keys from the backing store.
    pub async fn purge_expired(&self) -> Result<usize, QueueError> {
        self.store.purge_expired().await
    }

    async fn transition(
        &self,
        command_id: &str,
        to: ExecutionState,
        apply: impl FnOnce(&mut CommandExecution),
    ) -> Result<CommandExecution, QueueError> {
        let _guard = self.lock.lock().await;
        let mut record = self
            .load(command_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(command_id.to_string()))?;
        if !record.state.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                command_id: command_id.to_string(),
                from: record.state,
                to,
            });
        }
        tracing::debug!(command_id, from = %record.state, to = %to, "command transition");
        record.state = to;
        apply(&mut record);
        self.write(&record).await?;
        Ok(record)
    }

    async fn load(&self, command_id: &str) -> Result<Option<CommandExecution>, QueueError> {
        match self.store.get(&format!("{CMD_PREFIX}{command_id}")).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, record: &CommandExecution) -> Result<(), QueueError> {
        let ttl = Some(self.retention);
        let id = &record.command_id;
        let value = serde_json::to_value(record)?;
        self.store.set(&format!("{CMD_PREFIX}{id}"), value, ttl).await?;

        let marker = Value::from(record.requested_at);
        self.store
            .set(
                &index_key(SESSION_INDEX, &record.terminal_session_id, id),
                marker.clone(),
                ttl,
            )
            .await?;
        if let Some(chat_id) = &record.chat_id {
            self.store
                .set(&index_key(CHAT_INDEX, chat_id, id), marker.clone(), ttl)
                .await?;
        }

        let pending_key = format!("{PENDING_INDEX}{}", escape_key(id));
        if record.is_pending() {
            self.store.set(&pending_key, marker, ttl).await?;
        } else {
            self.store.delete(&pending_key).await?;
        }
        Ok(())
    }

    async fn by_index(&self, prefix: &str) -> Result<Vec<CommandExecution>, QueueError> {
        let mut records = Vec::new();
        for key in self.store.keys(prefix).await? {
            let Some(id) = key.strip_prefix(prefix).and_then(unescape_key) else {
                continue;
            };
            match self.load(&id).await? {
                Some(record) => records.push(record),
                // index outlived its record
                None => {
                    self.store.delete(&key).await?;
                }
            }
        }
        records.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        Ok(records)
    }
}

fn owner_prefix(index: &str, owner: &str) -> String {
    format!("{index}{}:", escape_key(owner))
}

fn index_key(index: &str, owner: &str, command_id: &str) -> String {
    format!("{}{}", owner_prefix(index, owner), escape_key(command_id))
}
