//! Pre-execution screening against the global blocklist and the level whitelist.

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Privilege escalation and service control verbs. Blocked at every level.
const BLOCKED_COMMANDS: &[&str] = &[
    "sudo",
    "su",
    "doas",
    "pkexec",
    "runuser",
    "setpriv",
    "chroot",
    "nsenter",
    "unshare",
    "systemctl",
    "service",
    "launchctl",
    "initctl",
    "rc-service",
    "update-rc.d",
    "chkconfig",
    "init",
    "telinit",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
];

static SEGMENT_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&&|\|\||[;|&\n]").expect("segment regex is valid"));

/// Split a shell command line into its chained segments.
pub fn segments(command: &str) -> Vec<&str> {
    SEGMENT_SPLIT
        .split(command)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Base executable name of a single command segment.
///
/// Leading `VAR=value` assignments are skipped and the basename is returned.
pub fn base_command(segment: &str) -> Option<String> {
    let tokens = shell_words::split(segment)
        .unwrap_or_else(|_| segment.split_whitespace().map(str::to_string).collect());
    tokens
        .into_iter()
        .find(|t| !is_env_assignment(t))
        .map(|t| t.rsplit('/').next().unwrap_or(&t).to_string())
        .filter(|t| !t.is_empty())
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Reject the command if any segment hits the blocklist, or misses the
/// whitelist when the configured level enforces one.
pub fn screen(command: &str, config: &SandboxConfig) -> Result<(), SandboxError> {
    let parts = segments(command);
    if parts.is_empty() {
        return Err(SandboxError::Blocked("empty command".to_string()));
    }

    for part in parts {
        let Some(base) = base_command(part) else {
            return Err(SandboxError::Blocked(format!("cannot parse '{part}'")));
        };
        if BLOCKED_COMMANDS.contains(&base.as_str()) {
            return Err(SandboxError::Blocked(format!(
                "'{base}' is never permitted inside the sandbox"
            )));
        }
        if config.security_level.enforces_whitelist()
            && !config.allowed_commands.iter().any(|c| c == &base)
        {
            return Err(SandboxError::Blocked(format!(
                "'{base}' is not whitelisted at security level high"
            )));
        }
    }
    Ok(())
}
