//! Rule set and classifier.

use crate::{Decision, Error, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Argument keys that may name the target of an operation-executing tool,
/// checked in order.
const TARGET_KEYS: &[&str] = &["operator_uri", "operator", "operation", "name", "uri"];

/// Guardrail rules loaded from TOML.
///
/// Every list falls back to its built-in default when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    /// Tools that are never run (shell access, raw database commands, drops).
    pub blocked_tools: Vec<String>,

    /// Substrings that block a call when found in its lowercased arguments.
    pub blocked_patterns: Vec<String>,

    /// Tools that always need confirmation (they affect the host session).
    pub confirm_tools: Vec<String>,

    /// Tools that execute another named operation.
    pub operation_tools: Vec<String>,

    /// Keywords marking a named operation as mutating.
    pub mutating_keywords: Vec<String>,

    /// Keywords that raise a mutating operation to high risk.
    pub destructive_keywords: Vec<String>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            blocked_tools: strings(&[
                "execute_shell",
                "run_shell",
                "shell",
                "bash",
                "run_command",
                "execute_command",
                "database_command",
                "run_database_command",
                "raw_query",
                "drop_database",
                "drop_collection",
            ]),
            blocked_patterns: strings(&["rm -rf", "drop table", "delete *", "; drop", "--drop"]),
            confirm_tools: strings(&["close_app", "close_session", "disable_plugin"]),
            operation_tools: strings(&["execute_operator", "run_operator"]),
            mutating_keywords: strings(&[
                "delete",
                "remove",
                "clear",
                "overwrite",
                "truncate",
                "merge",
                "reset",
                "purge",
                "wipe",
            ]),
            destructive_keywords: strings(&["delete", "drop", "purge", "wipe"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Tool-call classifier.
///
/// Immutable once built, so a single instance can be shared across turns
/// without synchronization.
#[derive(Debug, Clone, Default)]
pub struct Guardrail {
    rules: Rules,
}

impl Guardrail {
    pub fn new(rules: Rules) -> Self {
        Self { rules }
    }

    /// Load rules from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse rules from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let rules: Rules = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Classify a tool call.
    ///
    /// Tiers in priority order: blocked tool, blocked argument pattern,
    /// confirm-listed tool, mutating named operation, allow.
    pub fn classify(&self, tool_name: &str, arguments: &Value) -> Decision {
        if contains(&self.rules.blocked_tools, tool_name) {
            return Decision::Block {
                reason: format!(
                    "Tool '{tool_name}' is blocked: destructive or administrative operations are not permitted"
                ),
            };
        }

        let canonical = canonical_arguments(arguments);
        if let Some(pattern) = self
            .rules
            .blocked_patterns
            .iter()
            .find(|p| canonical.contains(p.to_lowercase().as_str()))
        {
            return Decision::Block {
                reason: format!("Arguments to '{tool_name}' contain blocked pattern '{pattern}'"),
            };
        }

        if contains(&self.rules.confirm_tools, tool_name) {
            return Decision::Confirm {
                risk: RiskLevel::High,
                reason: format!("'{tool_name}' affects the host session and needs confirmation"),
            };
        }

        if contains(&self.rules.operation_tools, tool_name) {
            if let Some(decision) = self.classify_operation(arguments) {
                return decision;
            }
        }

        Decision::Allow
    }

    fn classify_operation(&self, arguments: &Value) -> Option<Decision> {
        let target = operation_target(arguments)?;
        let lowered = target.to_lowercase();

        let first = self
            .rules
            .mutating_keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))?;

        let risk = if self
            .rules
            .destructive_keywords
            .iter()
            .any(|k| lowered.contains(k.as_str()))
        {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        Some(Decision::Confirm {
            risk,
            reason: format!("Operation '{target}' may modify data ({first})"),
        })
    }
}

fn contains(list: &[String], name: &str) -> bool {
    list.iter().any(|item| item == name)
}

/// Lowercased JSON text of the arguments.
///
/// `serde_json` maps are ordered by key, so equal values always serialize
/// identically.
fn canonical_arguments(arguments: &Value) -> String {
    match arguments {
        Value::Null => String::new(),
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

fn operation_target(arguments: &Value) -> Option<&str> {
    match arguments {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => TARGET_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    }
}
