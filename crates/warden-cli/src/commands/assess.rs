//! `warden assess`: classify a command without running it.

use super::Output;
use serde::Serialize;
use warden_core::{assess, AgentRole, CommandRisk, Config, Decision, PolicyEngine, PolicyRequest, SHELL_TOOL};

#[derive(Debug, Serialize)]
struct RoleDecision {
    role: AgentRole,
    decision: &'static str,
    reason: String,
}

impl RoleDecision {
    fn new(role: AgentRole, decision: Decision) -> Self {
        Self {
            role,
            decision: decision.label(),
            reason: decision.reason().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssessOutput {
    command: String,
    risk: CommandRisk,
    reasons: Vec<String>,
    decisions: Vec<RoleDecision>,
}

pub fn run(command: &str, role: Option<AgentRole>, config: &Config, output: Output) -> anyhow::Result<()> {
    let engine = PolicyEngine::with_rules(config.rules.clone())?;
    let assessment = assess(command);
    let roles: Vec<AgentRole> = match role {
        Some(role) => vec![role],
        None => AgentRole::ALL.to_vec(),
    };

    let decisions = roles
        .into_iter()
        .map(|role| {
            let request = PolicyRequest {
                role,
                tool: SHELL_TOOL,
                command,
                assessment: &assessment,
                user_id: None,
                project: None,
            };
            RoleDecision::new(role, engine.decide(&request, None))
        })
        .collect();

    let result = AssessOutput {
        command: command.to_string(),
        risk: assessment.risk,
        reasons: assessment.reasons.clone(),
        decisions,
    };
    output.emit(&result, |r| {
        println!("risk: {}", r.risk);
        for reason in &r.reasons {
            println!("  - {reason}");
        }
        for d in &r.decisions {
            println!("{:<17} {:<5} {}", d.role.as_str(), d.decision, d.reason);
        }
    })
}
