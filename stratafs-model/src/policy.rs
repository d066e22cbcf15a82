/// Risk attributed to a command by the safety analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action taken by a policy override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OverrideAction {
    Allow,
    Block,
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::Allow => "allow",
            OverrideAction::Block => "block",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "allow" => Some(OverrideAction::Allow),
            "block" => Some(OverrideAction::Block),
            _ => None,
        }
    }
}

/// A persisted command-safety policy. Exactly one policy is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SafetyPolicy {
    pub id: i64,
    pub name: String,
    /// When set, only commands on `allowed` may run.
    pub allowlist_mode: bool,
    pub blocked: Vec<String>,
    pub allowed: Vec<String>,
    /// Regular expressions screened against the full command text.
    pub dangerous_patterns: Vec<String>,
    /// Strict pipelines: a non-zero exit stops the rest of the pipeline.
    pub strict: bool,
    pub timeout_ms: u64,
    pub active: bool,
}

/// A per-command exception applied on top of the active policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyOverride {
    pub id: i64,
    /// Exact command name, or a glob pattern when `is_pattern` is set.
    pub command: String,
    pub is_pattern: bool,
    pub action: OverrideAction,
    pub reason: String,
    /// Millisecond timestamp after which the override no longer applies.
    pub expires_at: Option<i64>,
    pub active: bool,
}

impl PolicyOverride {
    /// Whether this override applies at `now` (milliseconds).
    pub fn in_effect(&self, now: i64) -> bool {
        self.active && self.expires_at.is_none_or(|at| at > now)
    }
}

/// One row of the command execution history.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionRecord {
    pub id: i64,
    pub command_text: String,
    pub exit_code: i32,
    pub was_blocked: bool,
    pub block_reason: Option<String>,
    pub cwd: String,
    pub duration_ms: u64,
    /// Millisecond timestamp.
    pub executed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::Medium < RiskLevel::Critical);
    }

    #[test]
    fn expired_override_is_not_in_effect() {
        let ov = PolicyOverride {
            id: 1,
            command: "curl".into(),
            is_pattern: false,
            action: OverrideAction::Allow,
            reason: "approved for this session".into(),
            expires_at: Some(1_000),
            active: true,
        };
        assert!(ov.in_effect(999));
        assert!(!ov.in_effect(1_000));
    }
}
