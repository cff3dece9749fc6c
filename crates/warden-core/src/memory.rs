//! Remembered approvals, keyed per user and optionally per project.
//!
//! When a user approves a command with "always allow", the command is reduced
//! to a pattern (first token, plus the subcommand for multi-word tools) and
//! stored. Later commands matching the pattern at or below the remembered risk
//! tier can skip the approval prompt.

use crate::clock::now_ms;
use crate::risk::CommandRisk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Tools whose subcommand is part of the remembered pattern.
const MULTI_WORD_TOOLS: &[&str] = &[
    "git", "docker", "kubectl", "cargo", "npm", "yarn", "pip", "apt", "apt-get", "systemctl",
    "brew",
];

/// A remembered "always allow" decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApproveRule {
    /// Glob the command must match.
    pub pattern: String,
    /// Highest tier this rule approves.
    pub risk_level: CommandRisk,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
    /// Command the user originally approved.
    pub original_command: String,
}

impl AutoApproveRule {
    /// Whether this rule covers `command`.
    pub fn matches(&self, command: &str) -> bool {
        pattern_matches(&self.pattern, command)
    }
}

/// Reduce a command to its remembered pattern.
///
/// `git push origin main` becomes `git push *`, `ls -la` becomes `ls *`.
pub fn derive_pattern(command: &str) -> String {
    let tokens = shell_words::split(command.trim())
        .unwrap_or_else(|_| command.split_whitespace().map(str::to_string).collect());
    let mut prefix: Vec<String> = Vec::new();
    if let Some(first) = tokens.first() {
        prefix.push(glob::Pattern::escape(first));
        if MULTI_WORD_TOOLS.contains(&first.as_str()) {
            if let Some(sub) = tokens.get(1).filter(|t| !t.starts_with('-')) {
                prefix.push(glob::Pattern::escape(sub));
            }
        }
    }
    format!("{} *", prefix.join(" "))
}

/// Match a remembered pattern. Chained commands never match.
pub fn pattern_matches(pattern: &str, command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() || command.contains(['\n', ';', '|', '&']) {
        return false;
    }
    let full = glob::Pattern::new(pattern).is_ok_and(|p| p.matches(command));
    let bare = pattern
        .strip_suffix(" *")
        .and_then(|prefix| glob::Pattern::new(prefix).ok())
        .is_some_and(|p| p.matches(command));
    full || bare
}

/// Scope key for a user, optionally narrowed to a project directory.
pub fn scope_key(user_id: &str, project: Option<&Path>) -> String {
    match project {
        Some(path) => {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
            format!("{user_id}@{}", &hash.to_hex()[..16])
        }
        None => user_id.to_string(),
    }
}

/// All remembered approvals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalMemory {
    scopes: BTreeMap<String, Vec<AutoApproveRule>>,
}

impl ApprovalMemory {
    /// Empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `command` for `user_id` (and `project`, when given).
    ///
    /// An existing rule with the same pattern is replaced.
    pub fn remember(
        &mut self,
        user_id: &str,
        project: Option<&Path>,
        command: &str,
        risk: CommandRisk,
    ) -> AutoApproveRule {
        let rule = AutoApproveRule {
            pattern: derive_pattern(command),
            risk_level: risk,
            created_at: now_ms(),
            original_command: command.to_string(),
        };
        let rules = self.scopes.entry(scope_key(user_id, project)).or_default();
        rules.retain(|r| r.pattern != rule.pattern);
        rules.push(rule.clone());
        tracing::debug!(user_id, pattern = %rule.pattern, risk = %risk, "remembered approval");
        rule
    }

    /// First remembered rule covering `command`. The project scope is
    /// consulted before the user-wide scope.
    pub fn find(&self, user_id: &str, project: Option<&Path>, command: &str) -> Option<&AutoApproveRule> {
        let project_rules = project.map(|p| self.rules_for(user_id, Some(p)));
        project_rules
            .into_iter()
            .flatten()
            .chain(self.rules_for(user_id, None))
            .find(|rule| rule.matches(command))
    }

    /// Remove the rule with `pattern`. Returns whether one existed.
    pub fn forget(&mut self, user_id: &str, project: Option<&Path>, pattern: &str) -> bool {
        let Some(rules) = self.scopes.get_mut(&scope_key(user_id, project)) else {
            return false;
        };
        let before = rules.len();
        rules.retain(|r| r.pattern != pattern);
        before != rules.len()
    }

    /// Rules stored for exactly this scope.
    pub fn rules_for(&self, user_id: &str, project: Option<&Path>) -> &[AutoApproveRule] {
        self.scopes
            .get(&scope_key(user_id, project))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every scope key and its rules.
    pub fn scopes(&self) -> impl Iterator<Item = (&str, &[AutoApproveRule])> {
        self.scopes.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derive_pattern() {
        assert_eq!(derive_pattern("ls -la"), "ls *");
        assert_eq!(derive_pattern("git push origin main"), "git push *");
        assert_eq!(derive_pattern("git --version"), "git *");
        assert_eq!(derive_pattern("docker ps -a"), "docker ps *");
        assert_eq!(derive_pattern("mkdir /tmp/x"), "mkdir *");
    }

    #[test]
    fn test_pattern_matches_bare_and_arguments() {
        assert!(pattern_matches("ls *", "ls"));
        assert!(pattern_matches("ls *", "ls -la /tmp"));
        assert!(!pattern_matches("ls *", "lsblk"));
        assert!(!pattern_matches("git push *", "git pull"));
    }

    #[test]
    fn test_chained_commands_never_match() {
        assert!(!pattern_matches("git push *", "git push origin && curl evil"));
        assert!(!pattern_matches("ls *", "ls; reboot"));
        assert!(!pattern_matches("ls *", "ls | sh"));
    }

    #[test]
    fn test_remember_and_find_user_scope() {
        let mut memory = ApprovalMemory::new();
        memory.remember("u1", None, "mkdir /tmp/x", CommandRisk::Moderate);

        let rule = memory.find("u1", None, "mkdir /tmp/y").unwrap();
        assert_eq!(rule.pattern, "mkdir *");
        assert_eq!(rule.original_command, "mkdir /tmp/x");
        assert!(memory.find("u2", None, "mkdir /tmp/y").is_none());
    }

    #[test]
    fn test_project_scope_is_isolated_but_user_scope_applies_everywhere() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let mut memory = ApprovalMemory::new();
        memory.remember("u1", Some(a.path()), "cargo build --release", CommandRisk::Moderate);

        assert!(memory.find("u1", Some(a.path()), "cargo build").is_some());
        assert!(memory.find("u1", Some(b.path()), "cargo build").is_none());
        assert!(memory.find("u1", None, "cargo build").is_none());

        memory.remember("u1", None, "ls", CommandRisk::Safe);
        assert!(memory.find("u1", Some(b.path()), "ls -la").is_some());
    }

    #[test]
    fn test_remember_replaces_same_pattern_and_forget() {
        let mut memory = ApprovalMemory::new();
        memory.remember("u1", None, "touch a", CommandRisk::Moderate);
        memory.remember("u1", None, "touch b", CommandRisk::Moderate);
        assert_eq!(memory.rules_for("u1", None).len(), 1);
        assert_eq!(memory.rules_for("u1", None)[0].original_command, "touch b");

        assert!(memory.forget("u1", None, "touch *"));
        assert!(!memory.forget("u1", None, "touch *"));
        assert!(memory.rules_for("u1", None).is_empty());
    }

    #[test]
    fn test_memory_serializes() {
        let mut memory = ApprovalMemory::new();
        memory.remember("u1", None, "git status", CommandRisk::Moderate);
        let json = serde_json::to_string(&memory).unwrap();
        let parsed: ApprovalMemory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, memory);
    }
}
