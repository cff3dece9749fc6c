//! warden-core: command risk classification and approval policy.

pub mod clock;
pub mod config;
mod error;
pub mod memory;
pub mod permission;
pub mod risk;
pub mod role;
pub mod rules;

pub use config::{Config, ConfigStore, DEFAULT_QUEUE_RETENTION_SECS};
pub use error::CoreError;
pub use memory::{derive_pattern, ApprovalMemory, AutoApproveRule};
pub use permission::{decide_for_role, needs_approval, Decision, PolicyEngine, PolicyRequest};
pub use risk::{assess, base_command, CommandRisk, RiskAssessment, RiskAssessor};
pub use role::{AgentPermissions, AgentRole, UnknownRoleError};
pub use rules::{PermissionRule, RuleAction, RuleOutcome, RuleSet, SHELL_TOOL};
