//! `warden memory list`.

use super::{format_ms, Output};
use serde::Serialize;
use warden_core::AutoApproveRule;
use warden_session::SessionManager;

#[derive(Debug, Serialize)]
struct ScopeRules {
    scope: String,
    rules: Vec<AutoApproveRule>,
}

pub async fn list(manager: &SessionManager, user: Option<&str>, output: Output) -> anyhow::Result<()> {
    let memory = manager.approval_memory().await;
    let scopes: Vec<ScopeRules> = memory
        .scopes()
        .filter(|(scope, _)| user.map_or(true, |user| belongs_to(scope, user)))
        .map(|(scope, rules)| ScopeRules {
            scope: scope.to_string(),
            rules: rules.to_vec(),
        })
        .collect();

    output.emit(&scopes, |scopes| {
        if scopes.iter().all(|s| s.rules.is_empty()) {
            println!("No remembered approvals.");
            return;
        }
        for scope in scopes {
            for rule in &scope.rules {
                println!(
                    "{} | {} | up to {} | from '{}' at {}",
                    scope.scope,
                    rule.pattern,
                    rule.risk_level,
                    rule.original_command,
                    format_ms(rule.created_at)
                );
            }
        }
    })
}

/// Project scopes are keyed `<user>@<hash>`.
fn belongs_to(scope: &str, user: &str) -> bool {
    scope == user || scope.strip_prefix(user).is_some_and(|rest| rest.starts_with('@'))
}
