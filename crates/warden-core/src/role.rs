//! Agent roles and their permission table.

use crate::risk::CommandRisk;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role an agent runs under.
///
/// Privilege ordering is partial: CHAT < AUTOMATION ≈ SYSTEM < ADMIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Conversational agent acting on behalf of a chat user.
    ChatAgent,
    /// Scripted automation pipelines.
    AutomationAgent,
    /// Host maintenance agents.
    SystemAgent,
    /// Administrative agent, always supervised.
    AdminAgent,
}

/// Permission record for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPermissions {
    /// Highest tier the role may request.
    pub max_risk: CommandRisk,
    /// SAFE commands run without approval.
    pub auto_approve_safe: bool,
    /// MODERATE commands run without approval.
    pub auto_approve_moderate: bool,
    /// HIGH commands may be requested at all.
    pub allow_high: bool,
    /// CRITICAL commands may be requested at all.
    pub allow_dangerous: bool,
    /// Any tier may be requested, but HIGH and above always need approval.
    pub supervised_mode: bool,
}

const CHAT_AGENT: AgentPermissions = AgentPermissions {
    max_risk: CommandRisk::Moderate,
    auto_approve_safe: true,
    auto_approve_moderate: false,
    allow_high: false,
    allow_dangerous: false,
    supervised_mode: false,
};

const AUTOMATION_AGENT: AgentPermissions = AgentPermissions {
    max_risk: CommandRisk::High,
    auto_approve_safe: true,
    auto_approve_moderate: true,
    allow_high: true,
    allow_dangerous: false,
    supervised_mode: false,
};

const SYSTEM_AGENT: AgentPermissions = AgentPermissions {
    max_risk: CommandRisk::Critical,
    auto_approve_safe: true,
    auto_approve_moderate: true,
    allow_high: true,
    allow_dangerous: true,
    supervised_mode: false,
};

const ADMIN_AGENT: AgentPermissions = AgentPermissions {
    max_risk: CommandRisk::Forbidden,
    auto_approve_safe: true,
    auto_approve_moderate: true,
    allow_high: true,
    allow_dangerous: true,
    supervised_mode: true,
};

impl AgentRole {
    /// All roles.
    pub const ALL: [AgentRole; 4] = [
        AgentRole::ChatAgent,
        AgentRole::AutomationAgent,
        AgentRole::SystemAgent,
        AgentRole::AdminAgent,
    ];

    /// The role's permission record.
    pub const fn permissions(self) -> AgentPermissions {
        match self {
            AgentRole::ChatAgent => CHAT_AGENT,
            AgentRole::AutomationAgent => AUTOMATION_AGENT,
            AgentRole::SystemAgent => SYSTEM_AGENT,
            AgentRole::AdminAgent => ADMIN_AGENT,
        }
    }

    /// Stable machine-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::ChatAgent => "chat_agent",
            AgentRole::AutomationAgent => "automation_agent",
            AgentRole::SystemAgent => "system_agent",
            AgentRole::AdminAgent => "admin_agent",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = UnknownRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AgentRole::ALL
            .iter()
            .copied()
            .find(|role| {
                role.as_str() == normalized || role.as_str().trim_end_matches("_agent") == normalized
            })
            .ok_or_else(|| UnknownRoleError {
                requested: s.to_string(),
            })
    }
}

/// Error returned when a role name is not recognised.
#[derive(Debug)]
pub struct UnknownRoleError {
    requested: String,
}

impl fmt::Display for UnknownRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let available = AgentRole::ALL
            .iter()
            .map(|role| role.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "Unknown role '{}'. Available roles: {available}",
            self.requested
        )
    }
}

impl std::error::Error for UnknownRoleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_agent_ceiling_is_moderate() {
        let perms = AgentRole::ChatAgent.permissions();
        assert_eq!(perms.max_risk, CommandRisk::Moderate);
        assert!(perms.auto_approve_safe);
        assert!(!perms.auto_approve_moderate);
        assert!(!perms.supervised_mode);
    }

    #[test]
    fn test_admin_is_supervised() {
        let perms = AgentRole::AdminAgent.permissions();
        assert!(perms.supervised_mode);
        assert_eq!(perms.max_risk, CommandRisk::Forbidden);
    }

    #[test]
    fn test_parse_role_names() {
        assert_eq!("chat_agent".parse::<AgentRole>().unwrap(), AgentRole::ChatAgent);
        assert_eq!("CHAT_AGENT".parse::<AgentRole>().unwrap(), AgentRole::ChatAgent);
        assert_eq!("admin".parse::<AgentRole>().unwrap(), AgentRole::AdminAgent);
        assert_eq!(
            "automation-agent".parse::<AgentRole>().unwrap(),
            AgentRole::AutomationAgent
        );
    }

    #[test]
    fn test_unknown_role_lists_available() {
        let error = "root".parse::<AgentRole>().unwrap_err().to_string();
        assert!(error.contains("Unknown role 'root'"));
        assert!(error.contains("system_agent"));
    }
}
