//! Seams between the hub and its two data sources. The hub only ever holds
//! `Arc<dyn RemoteStore>` / `Arc<dyn RegistrySource>`, so tests inject fakes
//! for both sides.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::model::{
    ConnectionState, LocalAgent, LocalProject, LocalWorkflow, Memory, Project, Prompt, Task,
    Workflow,
};

/// Remote PostgreSQL-backed store. All fetch operations are fail-soft: a
/// failed or disconnected query yields an empty collection, never an error.
/// Callers that need to distinguish "empty" from "unavailable" inspect
/// `state()`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Watch channel over connection-state transitions. Values are sent only
    /// on actual change.
    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;

    /// Monotonic counter bumped on every successful connect and every
    /// disconnect. Refresh cycles snapshot it to discard results that were
    /// in flight across a connection boundary.
    fn generation(&self) -> u64;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Establish and verify a pooled connection. The only operation whose
    /// failure is returned to the caller; a direct failure never schedules
    /// an automatic retry.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Cancel any pending retry, close the pool, return to `disconnected`.
    async fn disconnect(&self);

    /// Trivial round-trip through the fail-soft query path; the liveness
    /// probe loop uses this to surface background connection loss.
    async fn ping(&self);

    async fn fetch_tasks(&self, limit: i64) -> Vec<Task>;
    async fn fetch_memories(&self, limit: i64, preview_chars: i64) -> Vec<Memory>;
    /// Highest-version row per prompt identity.
    async fn fetch_prompts_latest(&self, limit: i64, preview_chars: i64) -> Vec<Prompt>;
    /// Non-deprecated workflows, name-ordered, uncapped.
    async fn fetch_workflows(&self) -> Vec<Workflow>;
    async fn fetch_active_task_count(&self) -> i64;
    async fn fetch_projects(&self) -> Vec<Project>;

    /// Live case-insensitive substring search over full (untruncated) memory
    /// content; results come back preview-truncated.
    async fn search_memories(&self, term: &str, limit: i64, preview_chars: i64) -> Vec<Memory>;
    /// Full-content fetch for detail views.
    async fn fetch_memory(&self, id: i64) -> Option<Memory>;
    /// All version rows for one prompt identity, version-descending, full
    /// content.
    async fn fetch_prompt_versions(&self, prompt_id: &str) -> Vec<Prompt>;
}

/// Local GEN_OS registry tree. Getters are fail-soft: an absent, unreadable,
/// or unparsable document yields an empty collection.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Detect the GEN_OS root and establish file watches. When no candidate
    /// validates, the source operates in disabled mode: `root()` is `None`
    /// and every getter returns empty.
    async fn initialize(&self);

    /// Unit signal raised for each create/change/delete on a watched
    /// registry file. No coalescing; consumers re-read idempotently.
    fn subscribe_changes(&self) -> broadcast::Receiver<()>;

    async fn projects(&self) -> Vec<LocalProject>;
    async fn workflows(&self) -> Vec<LocalWorkflow>;
    async fn agents(&self) -> Vec<LocalAgent>;

    fn root(&self) -> Option<PathBuf>;
    fn resolve_path(&self, relative: &str) -> Option<PathBuf>;
}
