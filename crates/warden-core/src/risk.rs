//! Command risk classification.
//!
//! [`assess`] is deterministic and side-effect free: the same command string
//! always yields the same tier and reasons.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_sandbox::guard::segments;

/// Ordered risk tier of a shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRisk {
    /// Read-only, informational commands.
    Safe,
    /// Commands that modify user files.
    Moderate,
    /// Privilege escalation, deletion, package and service management.
    High,
    /// Host-wide state changes (power, accounts, firewall, mounts).
    Critical,
    /// Never executed under any role.
    Forbidden,
}

impl CommandRisk {
    /// All tiers in ascending order.
    pub const ALL: [CommandRisk; 5] = [
        CommandRisk::Safe,
        CommandRisk::Moderate,
        CommandRisk::High,
        CommandRisk::Critical,
        CommandRisk::Forbidden,
    ];

    /// Lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandRisk::Safe => "safe",
            CommandRisk::Moderate => "moderate",
            CommandRisk::High => "high",
            CommandRisk::Critical => "critical",
            CommandRisk::Forbidden => "forbidden",
        }
    }
}

impl fmt::Display for CommandRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of assessing one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Resolved tier.
    pub risk: CommandRisk,
    /// Human-readable reasons, most significant first.
    pub reasons: Vec<String>,
}

impl RiskAssessment {
    fn new(risk: CommandRisk, reason: impl Into<String>) -> Self {
        Self {
            risk,
            reasons: vec![reason.into()],
        }
    }
}

/// Stateless classifier. Exists so callers can hold an assessor value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAssessor;

impl RiskAssessor {
    /// Classify `command`.
    pub fn assess(&self, command: &str) -> RiskAssessment {
        assess(command)
    }
}

static DANGEROUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"\brm\s+(-[a-zA-Z]+\s+|--[a-z-]+\s+)*(/|/\*)(\s|$)",
            "recursive delete of the root filesystem",
        ),
        (r"\brm\s.*--no-preserve-root", "delete with --no-preserve-root"),
        (
            r">\s*/dev/(sd|hd|nvme|xvd|vd|mmcblk|disk)",
            "write redirected to a raw block device",
        ),
        (
            r"\bdd\s.*\bof=/dev/(sd|hd|nvme|xvd|vd|mmcblk|disk)",
            "dd onto a raw block device",
        ),
        (
            r"/etc/(shadow|gshadow|sudoers)\b|\.ssh/(id_[a-z0-9_]+|authorized_keys)|\.aws/credentials|\.gnupg/|\.netrc\b",
            "access to credential files",
        ),
        (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
        (r"\$\(", "command substitution"),
        (r"`", "backtick command substitution"),
        (
            r"(;|&&|\|\||\|)\s*(sudo\s+)?(rm|dd|mkfs(\.\w+)?|shred|wipefs|fdisk|chmod|chown|kill|killall|shutdown|reboot)\b",
            "command chained into a destructive verb",
        ),
        (
            r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(sh|bash|zsh|dash|ksh)\b",
            "downloaded content piped into a shell",
        ),
        (
            r"\bchmod\s+(-[a-zA-Z]*R[a-zA-Z]*\s+)?(0?777|a\+rwx)\s+/(\s|$)",
            "world-writable permissions on the root filesystem",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason)| (Regex::new(pattern).expect("dangerous pattern is valid"), reason))
    .collect()
});

static SYSTEM_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[\s=:])/(etc|usr|bin|sbin|lib|lib64)(/|\s|$)").expect("system path regex is valid")
});

static SENSITIVE_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">>?\s*/(etc|boot|sys)/").expect("redirect regex is valid"));

// `2>&1`, `>&-` and `&>` are redirections, not background separators.
static FD_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d*>&(\d+|-)?|&>>?").expect("fd redirect regex is valid"));

static SUDO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[\s;&|])sudo(\s|$)").expect("sudo regex is valid"));

const FORBIDDEN_COMMANDS: &[&str] = &[
    "shred", "wipefs", "fdisk", "sfdisk", "parted", "mkswap", "nc", "ncat", "netcat", "socat",
    "insmod", "rmmod", "modprobe", "kexec",
];

const CRITICAL_COMMANDS: &[&str] = &[
    "shutdown", "reboot", "halt", "poweroff", "init", "telinit", "iptables", "ip6tables", "nft",
    "ufw", "useradd", "userdel", "usermod", "groupadd", "groupdel", "passwd", "chpasswd",
    "visudo", "crontab", "mount", "umount", "swapoff",
];

const HIGH_RISK_COMMANDS: &[&str] = &[
    "sudo", "su", "doas", "pkexec", "rm", "rmdir", "dd", "mkfs", "fsck", "systemctl", "service",
    "launchctl", "kill", "killall", "pkill", "apt", "apt-get", "dpkg", "yum", "dnf", "rpm",
    "pacman", "zypper", "apk", "snap", "brew", "pip", "pip3", "gem",
];

const MODERATE_COMMANDS: &[&str] = &[
    "cp", "mv", "ln", "mkdir", "touch", "chmod", "chown", "chgrp", "tar", "zip", "unzip",
    "gzip", "gunzip", "bzip2", "xz", "7z", "rsync", "scp", "sed", "tee", "truncate", "git",
    "curl", "wget",
];

const SAFE_COMMANDS: &[&str] = &[
    "ls", "pwd", "echo", "printf", "cat", "head", "tail", "less", "more", "grep", "egrep", "rg",
    "find", "wc", "sort", "uniq", "cut", "diff", "date", "whoami", "id", "uname", "hostname",
    "env", "printenv", "which", "type", "file", "stat", "du", "df", "ps", "free", "uptime",
    "tree", "true", "false", "test", "basename", "dirname", "realpath",
];

/// Base executable name: the first shell token that is not a `VAR=value`
/// assignment, reduced to its basename.
///
/// Returns `None` for empty or unparseable input.
pub fn base_command(command: &str) -> Option<String> {
    let tokens = shell_words::split(command).ok()?;
    tokens
        .iter()
        .find(|t| !is_env_assignment(t))
        .and_then(|t| t.rsplit('/').next())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn normalize_verb(base: &str) -> &str {
    // mkfs.ext4, mkfs.xfs, ... all format filesystems.
    if base.starts_with("mkfs.") {
        "mkfs"
    } else {
        base
    }
}

/// Verbs that run another command given as their arguments.
const WRAPPER_COMMANDS: &[&str] = &[
    "env", "xargs", "nice", "nohup", "timeout", "command", "exec", "time", "stdbuf", "ionice",
    "setsid", "watch", "chronic",
];

/// Wrapper options whose value is a separate token.
const WRAPPER_VALUE_OPTIONS: &[&str] = &[
    "-n", "-s", "-k", "-u", "-I", "-P", "-L", "-d", "-E", "-a", "-c", "-C", "--signal",
    "--kill-after", "--adjustment", "--unset",
];

/// `find` actions that run a command per match.
const FIND_EXEC_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir"];

/// Classify `command` into a risk tier with reasons.
///
/// Every chained segment (`;`, `&&`, `||`, `|`, `&`) is classified on its
/// own and the highest tier wins.
pub fn assess(command: &str) -> RiskAssessment {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return RiskAssessment::new(CommandRisk::Forbidden, "empty command");
    }

    if base_command(trimmed).is_none() {
        return RiskAssessment::new(CommandRisk::Forbidden, "malformed command");
    }

    for (pattern, reason) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            return RiskAssessment::new(CommandRisk::Forbidden, format!("dangerous pattern: {reason}"));
        }
    }

    let unified = FD_REDIRECT.replace_all(trimmed, " > ");
    segments(&unified)
        .into_iter()
        .map(classify_segment)
        .reduce(RiskAssessment::max)
        .unwrap_or_else(|| RiskAssessment::new(CommandRisk::Forbidden, "malformed command"))
}

impl RiskAssessment {
    /// The higher of two assessments. Equal tiers keep both sets of reasons.
    fn max(self, other: RiskAssessment) -> RiskAssessment {
        match other.risk.cmp(&self.risk) {
            std::cmp::Ordering::Greater => other,
            std::cmp::Ordering::Less => self,
            std::cmp::Ordering::Equal => {
                let mut merged = self;
                for reason in other.reasons {
                    if !merged.reasons.contains(&reason) {
                        merged.reasons.push(reason);
                    }
                }
                merged
            }
        }
    }
}

fn classify_segment(segment: &str) -> RiskAssessment {
    // Segments split inside quotes may not parse; whitespace is close enough.
    let tokens = shell_words::split(segment)
        .unwrap_or_else(|_| segment.split_whitespace().map(str::to_string).collect());
    classify_tokens(&tokens, segment)
}

fn classify_tokens(tokens: &[String], segment: &str) -> RiskAssessment {
    let mut rest = match tokens.iter().position(|t| !is_env_assignment(t)) {
        Some(start) => &tokens[start..],
        None => return RiskAssessment::new(CommandRisk::Moderate, "no executable in segment"),
    };

    let mut wrappers = Vec::new();
    while let Some(first) = rest.first() {
        let verb = basename(first);
        if !WRAPPER_COMMANDS.contains(&verb) {
            break;
        }
        if rest.len() == 1 {
            break;
        }
        let inner = wrapped_command(&rest[1..]);
        if inner.is_empty() {
            return RiskAssessment::new(CommandRisk::Moderate, format!("cannot tell what '{verb}' runs"));
        }
        wrappers.push(verb);
        rest = inner;
    }

    let Some(first) = rest.first() else {
        return RiskAssessment::new(CommandRisk::Moderate, "no executable in segment");
    };
    let verb = normalize_verb(basename(first));
    let mut assessment = if verb == "find" {
        classify_find(rest, segment)
    } else {
        classify_verb(verb, segment)
    };
    if !wrappers.is_empty() {
        assessment.reasons.push(format!("run through {}", wrappers.join(", ")));
    }
    assessment
}

fn basename(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

/// Arguments of a wrapper verb with its own options, assignments and
/// numeric values (durations, niceness, counts) stripped.
fn wrapped_command(args: &[String]) -> &[String] {
    let mut i = 0;
    while let Some(arg) = args.get(i) {
        if WRAPPER_VALUE_OPTIONS.contains(&arg.as_str()) {
            i += 2;
        } else if arg.starts_with('-')
            || is_env_assignment(arg)
            || arg == "{}"
            || arg.starts_with(|c: char| c.is_ascii_digit())
        {
            i += 1;
        } else {
            return &args[i..];
        }
    }
    &[]
}

fn classify_find(tokens: &[String], segment: &str) -> RiskAssessment {
    let mut assessment = classify_verb("find", segment);
    if tokens.iter().any(|t| t == "-delete") {
        assessment = assessment.max(RiskAssessment::new(
            CommandRisk::High,
            "find -delete removes every match",
        ));
    }

    for (i, token) in tokens.iter().enumerate() {
        if !FIND_EXEC_ACTIONS.contains(&token.as_str()) {
            continue;
        }
        let action = &tokens[i + 1..];
        let end = action
            .iter()
            .position(|t| matches!(t.as_str(), ";" | "+" | "\\;" | "\\"))
            .unwrap_or(action.len());
        let mut inner = classify_tokens(&action[..end], segment);
        if inner.risk < CommandRisk::Moderate {
            inner.risk = CommandRisk::Moderate;
        }
        inner.reasons.push(format!("find {token} runs a command on each match"));
        assessment = assessment.max(inner);
    }
    assessment
}

fn classify_verb(verb: &str, segment: &str) -> RiskAssessment {
    if FORBIDDEN_COMMANDS.contains(&verb) {
        return RiskAssessment::new(CommandRisk::Forbidden, format!("'{verb}' is a forbidden command"));
    }

    if CRITICAL_COMMANDS.contains(&verb) {
        return RiskAssessment::new(
            CommandRisk::Critical,
            format!("'{verb}' changes host-wide system state"),
        );
    }

    if HIGH_RISK_COMMANDS.contains(&verb) {
        let mut assessment =
            RiskAssessment::new(CommandRisk::High, format!("'{verb}' is a high-risk command"));
        if verb == "sudo" {
            assessment.reasons.push("privilege escalation via sudo".to_string());
        }
        return assessment;
    }

    if MODERATE_COMMANDS.contains(&verb) {
        if SYSTEM_PATH.is_match(segment) {
            return RiskAssessment {
                risk: CommandRisk::High,
                reasons: vec![
                    format!("'{verb}' modifies files"),
                    "touches a system path".to_string(),
                ],
            };
        }
        return RiskAssessment::new(CommandRisk::Moderate, format!("'{verb}' modifies files"));
    }

    if SAFE_COMMANDS.contains(&verb) {
        let mut reasons = Vec::new();
        if SUDO.is_match(segment) {
            reasons.push("invokes sudo".to_string());
        }
        if SENSITIVE_REDIRECT.is_match(segment) {
            reasons.push("redirects output into a sensitive path".to_string());
        }
        if !reasons.is_empty() {
            return RiskAssessment {
                risk: CommandRisk::High,
                reasons,
            };
        }
        return RiskAssessment::new(CommandRisk::Safe, format!("'{verb}' is read-only"));
    }

    RiskAssessment::new(CommandRisk::Moderate, format!("unknown command '{verb}'"))
}
