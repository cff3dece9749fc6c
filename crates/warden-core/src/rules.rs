//! Glob-pattern permission rules.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Tool name used for shell command requests.
pub const SHELL_TOOL: &str = "shell";

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Run without approval.
    Allow,
    /// Always require approval.
    Ask,
    /// Reject outright.
    Deny,
    /// Explicit fall-through to risk-based assessment.
    Default,
}

impl RuleAction {
    fn precedence(self) -> u8 {
        match self {
            RuleAction::Deny => 3,
            RuleAction::Ask => 2,
            RuleAction::Allow => 1,
            RuleAction::Default => 0,
        }
    }
}

/// A single rule: glob over the command line, scoped to a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Glob matched against the whole command line.
    pub pattern: String,
    /// Tool the rule applies to, or `*` for every tool.
    #[serde(default = "default_tool")]
    pub tool: String,
    /// Action taken when the rule matches.
    pub action: RuleAction,
    /// Human-readable explanation surfaced with the decision.
    #[serde(default)]
    pub description: String,
}

fn default_tool() -> String {
    SHELL_TOOL.to_string()
}

impl PermissionRule {
    /// Convenience constructor for shell rules.
    pub fn shell(pattern: impl Into<String>, action: RuleAction, description: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            tool: SHELL_TOOL.to_string(),
            action,
            description: description.into(),
        }
    }

    /// Description, or a generated one when empty.
    pub fn reason(&self) -> String {
        if self.description.is_empty() {
            format!("matched rule '{}'", self.pattern)
        } else {
            self.description.clone()
        }
    }
}

/// Result of evaluating a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome<'a> {
    /// An ALLOW rule matched and nothing stronger did.
    Allow(&'a PermissionRule),
    /// An ASK rule matched and no DENY did.
    Ask(&'a PermissionRule),
    /// A DENY rule matched.
    Deny(&'a PermissionRule),
    /// Nothing decisive matched.
    Default,
}

/// Compiled, ordered rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(PermissionRule, glob::Pattern)>,
}

impl RuleSet {
    /// Compile rules. Fails on the first invalid glob.
    pub fn new(rules: Vec<PermissionRule>) -> Result<Self, CoreError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let pattern = glob::Pattern::new(&rule.pattern).map_err(|e| CoreError::InvalidRule {
                    pattern: rule.pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok((rule, pattern))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        Ok(Self { rules })
    }

    /// Whether the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = &PermissionRule> {
        self.rules.iter().map(|(rule, _)| rule)
    }

    /// Evaluate `(tool, command)`: DENY > ASK > ALLOW > DEFAULT. Within one
    /// action the first declared rule wins.
    pub fn evaluate(&self, tool: &str, command: &str) -> RuleOutcome<'_> {
        let command = command.trim();
        let mut best: Option<&PermissionRule> = None;

        for (rule, pattern) in &self.rules {
            if rule.action == RuleAction::Default {
                continue;
            }
            if rule.tool != "*" && !rule.tool.eq_ignore_ascii_case(tool) {
                continue;
            }
            if !pattern.matches(command) {
                continue;
            }
            if best.map_or(true, |b| rule.action.precedence() > b.action.precedence()) {
                best = Some(rule);
            }
        }

        match best {
            Some(rule) => match rule.action {
                RuleAction::Deny => RuleOutcome::Deny(rule),
                RuleAction::Ask => RuleOutcome::Ask(rule),
                RuleAction::Allow => RuleOutcome::Allow(rule),
                RuleAction::Default => RuleOutcome::Default,
            },
            None => RuleOutcome::Default,
        }
    }
}
