//! Command requests and their approval lifecycle.

use super::{format_ms, ExitError, Output};
use std::path::PathBuf;
use warden_queue::CommandExecution;
use warden_session::{
    ApprovalDecision, ApprovalResult, ApprovalStatus, ExecuteResult, ExecuteStatus, ExecutionReport,
    SessionManager,
};

/// `warden exec` options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub description: Option<String>,
    pub force_approval: bool,
}

/// Exit code when a command is held for approval.
pub const EXIT_PENDING: i32 = 2;

pub async fn run(
    manager: &SessionManager,
    session_id: &str,
    command: &str,
    options: ExecOptions,
    output: Output,
) -> anyhow::Result<()> {
    let result = manager
        .execute_command(session_id, command, options.description.as_deref(), options.force_approval)
        .await?;
    output.emit(&result, print_execute)?;

    match result.status {
        ExecuteStatus::Success => match result.execution.and_then(|e| e.exit_code) {
            Some(code) if code != 0 => Err(ExitError::new(code, format!("command exited with {code}")).into()),
            _ => Ok(()),
        },
        ExecuteStatus::PendingApproval => Err(ExitError::new(EXIT_PENDING, "awaiting approval").into()),
        ExecuteStatus::Error => Err(ExitError::new(
            1,
            result.message.unwrap_or_else(|| "command rejected".to_string()),
        )
        .into()),
    }
}

/// `warden approve` options.
#[derive(Debug, Clone, Default)]
pub struct ApproveOptions {
    pub command_id: Option<String>,
    pub deny: bool,
    pub user: Option<String>,
    pub comment: Option<String>,
    pub remember: bool,
    pub project: Option<PathBuf>,
}

pub async fn approve(
    manager: &SessionManager,
    session_id: &str,
    options: ApproveOptions,
    output: Output,
) -> anyhow::Result<()> {
    let mut decision = if options.deny {
        ApprovalDecision::deny(session_id)
    } else {
        ApprovalDecision::approve(session_id)
    };
    if let Some(id) = options.command_id {
        decision = decision.for_command(id);
    }
    if let Some(user) = options.user {
        decision = decision.by(user);
    }
    if let Some(comment) = options.comment {
        decision = decision.with_comment(comment);
    }
    if options.remember {
        decision = decision.remember(options.project);
    }

    let result = manager.approve_command(decision).await?;
    output.emit(&result, print_approval)?;
    if result.status == ApprovalStatus::Error {
        return Err(ExitError::new(
            1,
            result.message.unwrap_or_else(|| "command failed".to_string()),
        )
        .into());
    }
    Ok(())
}

pub async fn interrupt(manager: &SessionManager, session_id: &str, user: &str, output: Output) -> anyhow::Result<()> {
    let result = manager.user_interrupt(session_id, user).await?;
    output.emit(&result, |r| {
        println!("{} -> {}", r.previous_state, r.current_state);
        if let Some(id) = &r.cancelled_command_id {
            println!("cancelled pending command {id}");
        }
    })
}

pub async fn resume(manager: &SessionManager, session_id: &str, output: Output) -> anyhow::Result<()> {
    let result = manager.agent_resume(session_id).await?;
    output.emit(&result, |r| println!("{} -> {}", r.previous_state, r.current_state))
}

pub async fn status(manager: &SessionManager, command_id: &str, output: Output) -> anyhow::Result<()> {
    let record = manager.get_command_state(command_id).await?;
    output.emit(&record, |r| {
        println!("command:  {}", r.command);
        println!("id:       {}", r.command_id);
        println!("session:  {}", r.terminal_session_id);
        println!("state:    {}", r.state);
        println!("risk:     {}", r.risk_level);
        if let Some(user) = &r.approved_by_user_id {
            println!("resolver: {user}");
        }
        if let Some(code) = r.return_code {
            println!("exit:     {code}");
        }
        if !r.output.is_empty() {
            print!("{}", r.output);
        }
        if !r.stderr.is_empty() {
            eprint!("{}", r.stderr);
        }
    })
}

pub async fn pending(manager: &SessionManager, output: Output) -> anyhow::Result<()> {
    let records = manager.list_pending().await?;
    output.emit(&records, |records: &Vec<CommandExecution>| {
        if records.is_empty() {
            println!("Nothing awaiting approval.");
            return;
        }
        for r in records {
            println!(
                "{} | {} | {} | {} | {}",
                format_ms(r.requested_at),
                r.command_id,
                r.terminal_session_id,
                r.risk_level,
                r.command
            );
        }
    })
}

fn print_execute(result: &ExecuteResult) {
    match result.status {
        ExecuteStatus::Success => {}
        ExecuteStatus::PendingApproval => {
            println!(
                "awaiting approval [{}]: {}",
                result.risk,
                result.command_id.as_deref().unwrap_or("-")
            );
        }
        ExecuteStatus::Error => {
            eprintln!(
                "rejected [{}]: {}",
                result.risk,
                result.message.as_deref().unwrap_or("-")
            );
            for reason in &result.reasons {
                eprintln!("  - {reason}");
            }
        }
    }
    if let Some(report) = &result.execution {
        print_report(report);
    }
}

fn print_approval(result: &ApprovalResult) {
    match result.status {
        ApprovalStatus::Denied => println!("denied {}", result.command_id),
        ApprovalStatus::Approved | ApprovalStatus::Error => {
            if let Some(pattern) = &result.remembered_pattern {
                println!("remembered '{pattern}'");
            }
        }
    }
    if let Some(report) = &result.execution {
        print_report(report);
    }
}

fn print_report(report: &ExecutionReport) {
    print!("{}", report.stdout);
    eprint!("{}", report.stderr);
    if let Some(error) = &report.error {
        eprintln!("error: {error}");
    }
    for event in &report.security_events {
        eprintln!("security: {:?} {}", event.kind, event.detail);
    }
}
