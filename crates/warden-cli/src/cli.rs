//! CLI argument and command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use warden_core::AgentRole;

#[derive(Parser)]
#[command(name = "warden", version, about = "Risk-gated shell execution for autonomous agents")]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding sessions, queue records and transcripts.
    #[arg(long, global = true, env = "WARDEN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file (defaults to ~/.warden/config.json).
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a command and show the policy decision per role.
    Assess {
        /// The command line to classify.
        command: String,

        /// Only show the decision for this role.
        #[arg(long)]
        role: Option<AgentRole>,
    },

    /// Manage agent terminal sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Request execution of a command in a session.
    Exec {
        /// Session ID.
        session: String,

        /// The command line to run.
        command: String,

        /// Why the agent wants to run it.
        #[arg(long)]
        description: Option<String>,

        /// Require human approval even when policy would allow it.
        #[arg(long)]
        force_approval: bool,
    },

    /// Approve (or deny) a session's pending command.
    Approve {
        /// Session ID.
        session: String,

        /// Only resolve if this is the pending command.
        #[arg(long)]
        command_id: Option<String>,

        /// Deny instead of approving.
        #[arg(long)]
        deny: bool,

        /// User resolving the approval.
        #[arg(long, env = "WARDEN_USER")]
        user: Option<String>,

        #[arg(long)]
        comment: Option<String>,

        /// Remember this command pattern for the user.
        #[arg(long)]
        remember: bool,

        /// Scope the remembered pattern to a project directory.
        #[arg(long, requires = "remember")]
        project: Option<PathBuf>,
    },

    /// Take control of a session away from its agent.
    Interrupt {
        /// Session ID.
        session: String,

        /// User taking control.
        #[arg(long, env = "WARDEN_USER")]
        user: String,
    },

    /// Hand control of a session back to its agent.
    Resume {
        /// Session ID.
        session: String,
    },

    /// Show the queue record of a command.
    Status {
        /// Command ID.
        command_id: String,
    },

    /// List commands awaiting approval across all sessions.
    Pending,

    /// Inspect remembered approvals.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a session for an agent.
    Create {
        /// Agent identifier.
        #[arg(long)]
        agent: String,

        /// Agent role (defaults to the configured role).
        #[arg(long)]
        role: Option<AgentRole>,

        /// Conversation the session belongs to.
        #[arg(long)]
        conversation: Option<String>,

        #[arg(long, default_value = "localhost")]
        host: String,

        /// User whose remembered approvals apply.
        #[arg(long)]
        user: Option<String>,

        /// Project directory scoping remembered approvals.
        #[arg(long)]
        project: Option<PathBuf>,

        /// Extra metadata as key=value.
        #[arg(long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
    },
    /// List sessions.
    List {
        #[arg(long)]
        agent: Option<String>,

        #[arg(long)]
        conversation: Option<String>,
    },
    /// Show a session with its command history.
    Info {
        /// Session ID.
        id: String,
    },
    /// Close a session, cancelling any pending approval.
    Close {
        /// Session ID.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// List remembered approval patterns.
    List {
        /// Only show patterns for this user.
        #[arg(long)]
        user: Option<String>,
    },
}

/// Parse a `key=value` pair.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}
