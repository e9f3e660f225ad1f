//! Entity records served by the cache, plus the GEN_OS registry document
//! shapes and the connection state machine vocabulary.
//!
//! Remote rows decode through the `parse` constructors below, which map any
//! out-of-contract value onto a documented fallback variant instead of failing
//! the row. The registry documents tolerate missing fields the same way
//! (struct-level serde defaults): the store schema and registry files are
//! consumed, not owned.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Remote store rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Blocked,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "in_progress" => TaskStatus::InProgress,
            "blocked" => TaskStatus::Blocked,
            "completed" => TaskStatus::Completed,
            _ => TaskStatus::Backlog,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => TaskPriority::Critical,
            "high" => TaskPriority::High,
            "medium" => TaskPriority::Medium,
            _ => TaskPriority::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<String>,
    /// Task ids this one is blocked by. Not validated for existence;
    /// dangling references are tolerated.
    pub blocked_by: Vec<i64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Episodic,
    Semantic,
    Decision,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Decision => "decision",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "episodic" => MemoryType::Episodic,
            "decision" => MemoryType::Decision,
            _ => MemoryType::Semantic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Verified,
    Unverified,
    Derived,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Verified => "verified",
            TrustLevel::Unverified => "unverified",
            TrustLevel::Derived => "derived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "verified" => TrustLevel::Verified,
            "derived" => TrustLevel::Derived,
            _ => TrustLevel::Unverified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub project_id: String,
    pub agent_id: String,
    /// Preview-truncated in list views; full text only via the detail fetch.
    pub content: String,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub trust_level: TrustLevel,
    /// In [0, 1] when present.
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptLabel {
    Dev,
    Staging,
    Production,
}

impl PromptLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptLabel::Dev => "dev",
            PromptLabel::Staging => "staging",
            PromptLabel::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "staging" => PromptLabel::Staging,
            "production" => PromptLabel::Production,
            _ => PromptLabel::Dev,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    System,
    Skill,
    Template,
    Command,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::System => "system",
            PromptType::Skill => "skill",
            PromptType::Template => "template",
            PromptType::Command => "command",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "skill" => PromptType::Skill,
            "template" => PromptType::Template,
            "command" => PromptType::Command,
            _ => PromptType::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVendor {
    Claude,
    Gemini,
    Codex,
    All,
}

impl PromptVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptVendor::Claude => "claude",
            PromptVendor::Gemini => "gemini",
            PromptVendor::Codex => "codex",
            PromptVendor::All => "all",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "claude" => PromptVendor::Claude,
            "gemini" => PromptVendor::Gemini,
            "codex" => PromptVendor::Codex,
            _ => PromptVendor::All,
        }
    }
}

/// One version row of a prompt. `id` + `version` together are unique; the
/// bulk cache holds only the highest-version row per `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub version: i64,
    pub label: PromptLabel,
    #[serde(rename = "type")]
    pub kind: PromptType,
    pub vendor: PromptVendor,
    pub content: String,
    pub changelog: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Deprecated,
    Draft,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Deprecated => "deprecated",
            WorkflowStatus::Draft => "draft",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "deprecated" => WorkflowStatus::Deprecated,
            "draft" => WorkflowStatus::Draft,
            _ => WorkflowStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowStep {
    pub step: u32,
    pub name: String,
    pub actor: String,
    pub action: String,
    pub inputs: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub trigger: String,
    pub steps: Vec<WorkflowStep>,
    pub actors: Vec<String>,
    pub scripts: Vec<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Relative path under the GEN_OS root. The local registry is
    /// authoritative for this field even when the remote row wins the rest.
    pub path: String,
    pub domain: String,
    pub status: String,
    pub phase: String,
}

// ---------------------------------------------------------------------------
// GEN_OS registry documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProject {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path_relative: String,
    pub domain: String,
    pub status: String,
    pub phase: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRegistry {
    pub version: String,
    pub projects: Vec<LocalProject>,
}

/// Lightweight workflow projection generated into the registry. The remote
/// row supersedes it for display, but `spec_path`/`design_path` are kept for
/// navigation either way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalWorkflow {
    pub workflow_id: String,
    pub name: String,
    pub version: String,
    pub owner: String,
    pub trigger: String,
    pub steps_count: u32,
    pub spec_path: String,
    pub design_path: String,
    pub generated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowRegistry {
    pub version: String,
    pub generated_at: String,
    pub workflows: Vec<LocalWorkflow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAgent {
    pub id: String,
    pub name: String,
    pub vendor_preference: String,
    pub supported_vendors: Vec<String>,
    pub instructions: String,
    pub capabilities: Vec<String>,
    pub risk_tier: String,
    pub needs_approval: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTeam {
    pub agents: Vec<String>,
    pub mode: String,
    pub effort: String,
    pub use_case: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentManifest {
    pub version: String,
    pub name: String,
    pub description: String,
    pub agents: Vec<LocalAgent>,
    pub teams: HashMap<String, AgentTeam>,
}

// ---------------------------------------------------------------------------
// Connection state & status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusInfo {
    pub connection_state: ConnectionState,
    pub active_task_count: i64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Conjunction of equality filters for `get_tasks`. Unset fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_parse_round_trips() {
        for s in ["backlog", "in_progress", "blocked", "completed"] {
            assert_eq!(TaskStatus::parse(s).as_str(), s);
        }
        for s in ["critical", "high", "medium", "low"] {
            assert_eq!(TaskPriority::parse(s).as_str(), s);
        }
        for s in ["episodic", "semantic", "decision"] {
            assert_eq!(MemoryType::parse(s).as_str(), s);
        }
        for s in ["claude", "gemini", "codex", "all"] {
            assert_eq!(PromptVendor::parse(s).as_str(), s);
        }
    }

    #[test]
    fn enum_parse_falls_back_on_unknown_values() {
        assert_eq!(TaskStatus::parse("???"), TaskStatus::Backlog);
        assert_eq!(TaskPriority::parse(""), TaskPriority::Low);
        assert_eq!(MemoryType::parse("weird"), MemoryType::Semantic);
        assert_eq!(TrustLevel::parse("???"), TrustLevel::Unverified);
        assert_eq!(PromptLabel::parse("qa"), PromptLabel::Dev);
        assert_eq!(PromptType::parse("misc"), PromptType::System);
        assert_eq!(PromptVendor::parse("other"), PromptVendor::All);
        assert_eq!(WorkflowStatus::parse("retired"), WorkflowStatus::Active);
    }

    #[test]
    fn registry_documents_tolerate_missing_fields() {
        let registry: ProjectRegistry =
            serde_json::from_str(r#"{"projects": [{"id": "p1", "name": "Core"}]}"#).unwrap();
        assert_eq!(registry.projects.len(), 1);
        assert_eq!(registry.projects[0].id, "p1");
        assert!(registry.projects[0].path_relative.is_empty());

        let manifest: AgentManifest = serde_json::from_str(
            r#"{"agents": [{"id": "a1", "needs_approval": true}], "teams": {"review": {"agents": ["a1"]}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.agents.len(), 1);
        assert!(manifest.agents[0].needs_approval);
        assert_eq!(manifest.teams["review"].agents, vec!["a1"]);
    }

    #[test]
    fn local_project_reads_type_field() {
        let p: LocalProject = serde_json::from_str(
            r#"{"id": "p1", "name": "Core", "type": "service", "path_relative": "projects/core"}"#,
        )
        .unwrap();
        assert_eq!(p.kind, "service");
    }
}
