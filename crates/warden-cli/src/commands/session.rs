//! `warden session ...`: create, list, inspect and close sessions.

use super::{format_ms, ExitError, Output};
use std::collections::BTreeMap;
use std::path::PathBuf;
use warden_core::AgentRole;
use warden_session::{SessionInfo, SessionManager, META_PROJECT_PATH, META_USER_ID};

pub struct CreateOptions {
    pub agent: String,
    pub role: AgentRole,
    pub conversation: Option<String>,
    pub host: String,
    pub user: Option<String>,
    pub project: Option<PathBuf>,
    pub metadata: Vec<(String, String)>,
}

pub async fn create(manager: &SessionManager, options: CreateOptions, output: Output) -> anyhow::Result<()> {
    let mut metadata: BTreeMap<String, String> = options.metadata.into_iter().collect();
    if let Some(user) = options.user {
        metadata.insert(META_USER_ID.to_string(), user);
    }
    if let Some(project) = options.project {
        let project = project.canonicalize().unwrap_or(project);
        metadata.insert(META_PROJECT_PATH.to_string(), project.to_string_lossy().to_string());
    }

    let info = manager
        .create_session(&options.agent, options.role, options.conversation, &options.host, metadata)
        .await?;
    output.emit(&info, |info| println!("{}", info.session_id))
}

pub async fn list(
    manager: &SessionManager,
    agent: Option<&str>,
    conversation: Option<&str>,
    output: Output,
) -> anyhow::Result<()> {
    let sessions = manager.list_sessions(agent, conversation).await;
    output.emit(&sessions, |sessions| {
        if sessions.is_empty() {
            println!("No sessions found.");
            return;
        }
        for s in sessions {
            println!(
                "{} | {} | {} | {} | {} cmds",
                s.session_id,
                s.agent_id,
                s.agent_role,
                s.state,
                s.command_history.len()
            );
        }
    })
}

pub async fn info(manager: &SessionManager, id: &str, output: Output) -> anyhow::Result<()> {
    let info = manager.get_session_info(id).await?;
    output.emit(&info, print_info)
}

pub async fn close(manager: &SessionManager, id: &str, output: Output) -> anyhow::Result<()> {
    let closed = manager.close_session(id).await?;
    if !closed {
        return Err(ExitError::new(1, format!("Session not found: {id}")).into());
    }
    output.emit(&serde_json::json!({ "session_id": id, "closed": true }), |_| {
        println!("Closed {id}")
    })
}

fn print_info(info: &SessionInfo) {
    println!("session:  {}", info.session_id);
    println!("agent:    {} ({})", info.agent_id, info.agent_role);
    println!("host:     {}", info.host);
    if let Some(conversation) = &info.conversation_id {
        println!("chat:     {conversation}");
    }
    println!("state:    {}", info.state);
    if let Some(pending) = &info.pending_approval {
        println!(
            "pending:  {} [{}] {}",
            pending.command_id, pending.risk, pending.command
        );
    }
    for (key, value) in &info.metadata {
        println!("meta:     {key}={value}");
    }
    if info.command_history.is_empty() {
        return;
    }
    println!("history:");
    for record in &info.command_history {
        let exit = record
            .exit_code
            .map(|c| format!(" exit={c}"))
            .unwrap_or_default();
        println!(
            "  {} {:<9} {:<9}{} {}",
            format_ms(record.recorded_at),
            record.outcome.as_str(),
            record.risk.as_str(),
            exit,
            record.command
        );
    }
}
