//! warden: risk-gated shell execution for autonomous agents.
//!
//! Every command an agent requests is classified, checked against role and
//! rule policy, held for human approval when needed, and run in a sandbox.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, MemoryAction, SessionAction};
use commands::{ExitError, Output};
use tracing_subscriber::EnvFilter;
use warden_core::ConfigStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_store = match &cli.config {
        Some(path) => ConfigStore::with_path(path),
        None => ConfigStore::new(),
    };
    let mut config = config_store.load();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    let output = Output { json: cli.json };

    if let Err(err) = run(cli.command, &config, output).await {
        if let Some(exit_err) = err.downcast_ref::<ExitError>() {
            if !output.json {
                eprintln!("{}", exit_err.message);
            }
            std::process::exit(exit_err.code);
        }
        return Err(err);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warden=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: &warden_core::Config, output: Output) -> anyhow::Result<()> {
    if let Commands::Assess { command, role } = &command {
        return commands::assess::run(command, *role, config, output);
    }

    let manager = commands::open_manager(config).await?;
    match command {
        Commands::Assess { .. } => Ok(()),
        Commands::Session { action } => match action {
            SessionAction::Create {
                agent,
                role,
                conversation,
                host,
                user,
                project,
                metadata,
            } => {
                let options = commands::session::CreateOptions {
                    agent,
                    role: role.unwrap_or(config.default_role),
                    conversation,
                    host,
                    user,
                    project,
                    metadata,
                };
                commands::session::create(&manager, options, output).await
            }
            SessionAction::List { agent, conversation } => {
                commands::session::list(&manager, agent.as_deref(), conversation.as_deref(), output).await
            }
            SessionAction::Info { id } => commands::session::info(&manager, &id, output).await,
            SessionAction::Close { id } => commands::session::close(&manager, &id, output).await,
        },
        Commands::Exec {
            session,
            command,
            description,
            force_approval,
        } => {
            let options = commands::exec::ExecOptions {
                description,
                force_approval,
            };
            commands::exec::run(&manager, &session, &command, options, output).await
        }
        Commands::Approve {
            session,
            command_id,
            deny,
            user,
            comment,
            remember,
            project,
        } => {
            let options = commands::exec::ApproveOptions {
                command_id,
                deny,
                user,
                comment,
                remember,
                project,
            };
            commands::exec::approve(&manager, &session, options, output).await
        }
        Commands::Interrupt { session, user } => commands::exec::interrupt(&manager, &session, &user, output).await,
        Commands::Resume { session } => commands::exec::resume(&manager, &session, output).await,
        Commands::Status { command_id } => commands::exec::status(&manager, &command_id, output).await,
        Commands::Pending => commands::exec::pending(&manager, output).await,
        Commands::Memory { action } => match action {
            MemoryAction::List { user } => commands::memory::list(&manager, user.as_deref(), output).await,
        },
    }
}
