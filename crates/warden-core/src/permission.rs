//! Policy decisions: rule matching first, role/risk table as the fallback.

use crate::memory::ApprovalMemory;
use crate::risk::{CommandRisk, RiskAssessment};
use crate::role::AgentRole;
use crate::rules::{PermissionRule, RuleOutcome, RuleSet};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Policy verdict for one command request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Run without approval.
    Allow { reason: String },
    /// Hold for human approval.
    Ask { reason: String },
    /// Reject; never executes.
    Deny { reason: String },
}

impl Decision {
    /// Whether the command may run immediately.
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    /// Whether the command is rejected.
    pub fn is_deny(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }

    /// Explanation carried by the decision.
    pub fn reason(&self) -> &str {
        match self {
            Decision::Allow { reason } | Decision::Ask { reason } | Decision::Deny { reason } => reason,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow { .. } => "allow",
            Decision::Ask { .. } => "ask",
            Decision::Deny { .. } => "deny",
        }
    }
}

/// Role/risk table decision, ignoring rules and memory.
///
/// FORBIDDEN is denied for every role, supervised or not.
pub fn decide_for_role(role: AgentRole, risk: CommandRisk) -> Decision {
    if risk == CommandRisk::Forbidden {
        return Decision::Deny {
            reason: "command is forbidden for every role".to_string(),
        };
    }

    let perms = role.permissions();
    if perms.supervised_mode {
        return match risk {
            CommandRisk::Safe if perms.auto_approve_safe => Decision::Allow {
                reason: "safe command auto-approved".to_string(),
            },
            CommandRisk::Moderate if perms.auto_approve_moderate => Decision::Allow {
                reason: "moderate command auto-approved".to_string(),
            },
            _ => Decision::Ask {
                reason: format!("supervised mode requires approval for {risk} commands"),
            },
        };
    }

    if risk > perms.max_risk {
        return Decision::Deny {
            reason: format!(
                "risk exceeds role ceiling ({risk} > {} for {role})",
                perms.max_risk
            ),
        };
    }
    if risk == CommandRisk::High && !perms.allow_high {
        return Decision::Deny {
            reason: format!("{role} may not run high-risk commands"),
        };
    }
    if risk == CommandRisk::Critical && !perms.allow_dangerous {
        return Decision::Deny {
            reason: format!("{role} may not run critical commands"),
        };
    }

    match risk {
        CommandRisk::Safe if perms.auto_approve_safe => Decision::Allow {
            reason: "safe command auto-approved".to_string(),
        },
        CommandRisk::Moderate if perms.auto_approve_moderate => Decision::Allow {
            reason: "moderate command auto-approved".to_string(),
        },
        _ => Decision::Ask {
            reason: format!("{risk} command requires approval for {role}"),
        },
    }
}

/// Whether `role` needs a human in the loop for `risk`.
///
/// True for every pair where [`decide_for_role`] does not return ALLOW.
pub fn needs_approval(role: AgentRole, risk: CommandRisk) -> bool {
    let perms = role.permissions();
    let auto = match risk {
        CommandRisk::Safe => perms.auto_approve_safe,
        CommandRisk::Moderate => perms.auto_approve_moderate,
        _ => false,
    };
    !(auto && risk <= perms.max_risk)
}

/// Everything the engine needs to decide on one command.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    /// Role of the requesting agent.
    pub role: AgentRole,
    /// Tool the command is issued through.
    pub tool: &'a str,
    /// Full command line.
    pub command: &'a str,
    /// Risk assessment of the command.
    pub assessment: &'a RiskAssessment,
    /// User whose remembered approvals apply.
    pub user_id: Option<&'a str>,
    /// Project directory narrowing remembered approvals.
    pub project: Option<&'a Path>,
}

/// Rule matcher composed with the role/risk table.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    rules: Option<RuleSet>,
}

impl PolicyEngine {
    /// Risk-based engine with no rules.
    pub fn new() -> Self {
        Self { rules: None }
    }

    /// Engine with a rule set evaluated before the role table.
    pub fn with_rules(rules: Vec<PermissionRule>) -> Result<Self, CoreError> {
        if rules.is_empty() {
            return Ok(Self::new());
        }
        Ok(Self {
            rules: Some(RuleSet::new(rules)?),
        })
    }

    /// Configured rules, if any.
    pub fn rules(&self) -> Option<&RuleSet> {
        self.rules.as_ref()
    }

    /// Decide on a request.
    ///
    /// Order: FORBIDDEN floor, then rules (DENY > ASK > ALLOW), then the role
    /// table. Remembered approvals can only turn a table ASK into ALLOW.
    pub fn decide(&self, request: &PolicyRequest<'_>, memory: Option<&ApprovalMemory>) -> Decision {
        let risk = request.assessment.risk;
        if risk == CommandRisk::Forbidden {
            return Decision::Deny {
                reason: format!("forbidden: {}", request.assessment.reasons.join("; ")),
            };
        }

        if let Some(rules) = &self.rules {
            match rules.evaluate(request.tool, request.command) {
                RuleOutcome::Deny(rule) => return Decision::Deny { reason: rule.reason() },
                RuleOutcome::Ask(rule) => return Decision::Ask { reason: rule.reason() },
                RuleOutcome::Allow(rule) => {
                    let remembered = remembered(request, memory).is_some();
                    let reason = if remembered {
                        format!("{} (remembered for this project)", rule.reason())
                    } else {
                        rule.reason()
                    };
                    return Decision::Allow { reason };
                }
                RuleOutcome::Default => {}
            }
        }

        let decision = decide_for_role(request.role, risk);
        if let Decision::Ask { .. } = decision {
            if let Some(rule) = remembered(request, memory) {
                if rule.risk_level >= risk {
                    return Decision::Allow {
                        reason: format!("auto-approved by remembered pattern '{}'", rule.pattern),
                    };
                }
            }
        }
        decision
    }
}

fn remembered<'m>(
    request: &PolicyRequest<'_>,
    memory: Option<&'m ApprovalMemory>,
) -> Option<&'m crate::memory::AutoApproveRule> {
    let memory = memory?;
    let user_id = request.user_id?;
    memory.find(user_id, request.project, request.command)
}
