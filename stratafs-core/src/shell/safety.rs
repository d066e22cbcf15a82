//! Command risk scoring and policy enforcement.
//!
//! Analysis order: overrides (exact before glob) adjust the blocked set,
//! then the blocklist/allowlist verdicts, then the dangerous-pattern screen
//! over the full command text, then a residual risk estimate for whatever
//! survives.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use stratafs_model::{
    FsResult, OverrideAction, PolicyOverride, RiskLevel, SafetyPolicy,
};

use crate::shell::parser::ParsedCommand;
use crate::sparse::glob::GlobPattern;
use crate::time::now_ms;

/// Commands the executor implements by direct FS facade calls.
pub const FS_NATIVE_COMMANDS: &[&str] = &[
    "cat", "ls", "mkdir", "rm", "rmdir", "cp", "mv", "touch", "pwd", "cd",
    "echo", "head", "tail", "wc", "stat", "chmod", "chown", "ln", "readlink",
    "realpath", "basename", "dirname", "test", "[", "true", "false",
];

pub fn is_fs_native(command: &str) -> bool {
    FS_NATIVE_COMMANDS.contains(&command)
}

/// Built-in screens matched against the full command text regardless of
/// policy contents.
static DANGEROUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "recursive deletion of the root",
            Regex::new(r"\brm\s+(-[A-Za-z]+\s+)*(/|/\*)(\s|$)").unwrap(),
        ),
        (
            "write to a raw device",
            Regex::new(r">\s*/dev/(sd|hd|nvme|mem|kmsg)").unwrap(),
        ),
        (
            "filesystem format",
            Regex::new(r"\bmkfs(\.[a-z0-9]+)?\b").unwrap(),
        ),
        (
            "raw disk write via dd",
            Regex::new(r"\bdd\b.*\bof=/dev/").unwrap(),
        ),
        ("fork bomb", Regex::new(r":\(\)\s*\{").unwrap()),
        ("command substitution", Regex::new(r"\$\(|`").unwrap()),
        (
            "piping into a shell",
            Regex::new(r"\|\s*(ba|z|da|k)?sh\b").unwrap(),
        ),
        (
            "shell evaluation primitive",
            Regex::new(r"(^|\s|\|)\s*(eval|exec|source)\b").unwrap(),
        ),
    ]
});

/// System prefixes that make a recursive/forced `rm` critical.
const PROTECTED_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/var", "/lib", "/dev", "/proc",
];

/// Analyzer result for one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub risk: RiskLevel,
    pub reason: Option<String>,
    /// The head command is in the FS-native set and may be dispatched
    /// straight to the facade.
    pub fs_native: bool,
}

enum CompiledOverride {
    Exact { command: String, action: OverrideAction },
    Pattern { glob: GlobPattern, action: OverrideAction },
}

/// Risk evaluation against one active policy plus its overrides.
pub struct SafetyAnalyzer {
    policy: SafetyPolicy,
    overrides: Vec<CompiledOverride>,
    policy_patterns: Vec<Regex>,
}

impl std::fmt::Debug for SafetyAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyAnalyzer")
            .field("policy", &self.policy.name)
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

impl SafetyAnalyzer {
    pub fn new(policy: SafetyPolicy, overrides: Vec<PolicyOverride>) -> FsResult<Self> {
        let now = now_ms();
        let mut compiled = Vec::new();
        // Exact overrides are applied before glob overrides.
        for over in overrides.iter().filter(|o| !o.is_pattern && o.in_effect(now)) {
            compiled.push(CompiledOverride::Exact {
                command: over.command.clone(),
                action: over.action,
            });
        }
        for over in overrides.iter().filter(|o| o.is_pattern && o.in_effect(now)) {
            compiled.push(CompiledOverride::Pattern {
                glob: GlobPattern::compile(&over.command)?,
                action: over.action,
            });
        }

        // Policy rows are user data; a bad stored regex must not take the
        // analyzer down.
        let mut policy_patterns = Vec::new();
        for raw in &policy.dangerous_patterns {
            match Regex::new(raw) {
                Ok(re) => policy_patterns.push(re),
                Err(err) => warn!("skipping unparsable policy pattern {raw:?}: {err}"),
            }
        }

        Ok(Self {
            policy,
            overrides: compiled,
            policy_patterns,
        })
    }

    /// Resolve overrides for one base command name.
    fn effective_block(&self, command: &str) -> Option<bool> {
        let mut verdict = None;
        for over in &self.overrides {
            let hit = match over {
                CompiledOverride::Exact { command: c, .. } => c == command,
                CompiledOverride::Pattern { glob, .. } => glob.matches(command),
            };
            if hit {
                let action = match over {
                    CompiledOverride::Exact { action, .. } => action,
                    CompiledOverride::Pattern { action, .. } => action,
                };
                verdict = Some(matches!(action, OverrideAction::Block));
            }
        }
        verdict
    }

    fn is_blocked(&self, command: &str) -> bool {
        match self.effective_block(command) {
            Some(decision) => decision,
            None => self.policy.blocked.iter().any(|b| b == command),
        }
    }

    /// Analyze a parsed command line; `full_text` is the expanded input as
    /// typed, used for the pattern screens.
    pub fn analyze(&self, command: &ParsedCommand, full_text: &str) -> SafetyVerdict {
        let fs_native = is_fs_native(&command.command);
        let allowed: HashSet<&str> =
            self.policy.allowed.iter().map(String::as_str).collect();

        for segment in command.segments() {
            let base = segment.command.as_str();
            if self.is_blocked(base) {
                return SafetyVerdict {
                    safe: false,
                    risk: RiskLevel::Critical,
                    reason: Some(format!("command blocked by policy: {base}")),
                    fs_native,
                };
            }
            if self.policy.allowlist_mode && !allowed.contains(base) {
                return SafetyVerdict {
                    safe: false,
                    risk: RiskLevel::High,
                    reason: Some(format!("command not on the allowlist: {base}")),
                    fs_native,
                };
            }
        }

        for (label, pattern) in DANGEROUS_PATTERNS.iter() {
            if pattern.is_match(full_text) {
                return SafetyVerdict {
                    safe: false,
                    risk: RiskLevel::Critical,
                    reason: Some(format!("dangerous pattern: {label}")),
                    fs_native,
                };
            }
        }
        for pattern in &self.policy_patterns {
            if pattern.is_match(full_text) {
                return SafetyVerdict {
                    safe: false,
                    risk: RiskLevel::Critical,
                    reason: Some(format!("matched policy pattern: {}", pattern.as_str())),
                    fs_native,
                };
            }
        }

        let mut risk = RiskLevel::None;
        let mut reason = None;
        for segment in command.segments() {
            let (seg_risk, seg_reason) = residual_risk(segment);
            if seg_risk > risk {
                risk = seg_risk;
                reason = seg_reason;
            }
        }
        if risk == RiskLevel::Critical {
            return SafetyVerdict {
                safe: false,
                risk,
                reason,
                fs_native,
            };
        }

        SafetyVerdict {
            safe: true,
            risk,
            reason,
            fs_native,
        }
    }
}

fn residual_risk(command: &ParsedCommand) -> (RiskLevel, Option<String>) {
    let base = command.command.as_str();
    match base {
        "rm" => {
            if command.flag("r") || command.flag("R") || command.flag("f") {
                for arg in &command.args {
                    if arg == "/"
                        || PROTECTED_PREFIXES
                            .iter()
                            .any(|p| arg == p || arg.starts_with(&format!("{p}/")))
                    {
                        return (
                            RiskLevel::Critical,
                            Some(format!("recursive removal of system path {arg}")),
                        );
                    }
                }
            }
            (RiskLevel::Low, None)
        }
        "chmod" | "chown" => {
            if command.flag("R") || command.flag("r") {
                (
                    RiskLevel::Medium,
                    Some(format!("recursive {base} over a subtree")),
                )
            } else {
                (RiskLevel::Low, None)
            }
        }
        "mv" | "cp" | "touch" | "ln" | "rmdir" | "truncate" => (RiskLevel::Low, None),
        "mkdir" => (RiskLevel::None, None),
        "cat" | "ls" | "head" | "tail" | "wc" | "stat" | "pwd" | "cd" | "echo"
        | "readlink" | "realpath" | "basename" | "dirname" | "test" | "["
        | "true" | "false" => (RiskLevel::None, None),
        other => (
            RiskLevel::Medium,
            Some(format!("unknown command: {other}")),
        ),
    }
}

/// The policy installed on first use: moderate blocklist, no allowlist.
pub fn default_policy() -> SafetyPolicy {
    SafetyPolicy {
        id: 0,
        name: "default".to_string(),
        allowlist_mode: false,
        blocked: [
            "curl", "wget", "ssh", "scp", "sftp", "nc", "ncat", "telnet",
            "sudo", "su", "reboot", "shutdown", "mount", "umount", "chroot",
            "kill", "killall", "pkill", "dd", "fdisk", "crontab", "systemctl",
            "service", "insmod", "modprobe",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        allowed: Vec::new(),
        dangerous_patterns: Vec::new(),
        strict: false,
        timeout_ms: 30_000,
        active: false,
    }
}
