use serde::{Deserialize, Serialize};

/// How risky a confirm-gated tool call is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    High,
    Medium,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
        }
    }
}

/// Result of classifying a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Never run this call.
    Block { reason: String },
    /// Run only after a human approves.
    Confirm { risk: RiskLevel, reason: String },
    /// Run immediately.
    Allow,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }

    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Self::Confirm { .. })
    }

    /// Human-readable rationale, if the decision carries one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Block { reason } | Self::Confirm { reason, .. } => Some(reason),
            Self::Allow => None,
        }
    }
}
