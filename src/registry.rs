//! GEN_OS registry reader: root detection, JSON document reads, and file
//! watching over the three registry paths.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::model::{
    AgentManifest, LocalAgent, LocalProject, LocalWorkflow, ProjectRegistry, WorkflowRegistry,
};
use crate::traits::RegistrySource;

/// Relative paths under the GEN_OS root. The project registry doubles as the
/// validation marker during detection.
pub const PROJECT_REGISTRY: &str = "config/project_registry.json";
pub const WORKFLOW_REGISTRY: &str = "docs/workflows/registry/workflow_registry.json";
pub const AGENT_MANIFEST: &str = ".subagents/manifest.json";

const WATCHED_PATHS: [&str; 3] = [PROJECT_REGISTRY, WORKFLOW_REGISTRY, AGENT_MANIFEST];

pub struct GenOsRegistry {
    cfg: RegistryConfig,
    root: RwLock<Option<PathBuf>>,
    // Held to keep the watch alive; released on drop.
    watcher: Mutex<Option<RecommendedWatcher>>,
    changes: broadcast::Sender<()>,
}

impl GenOsRegistry {
    pub fn new(cfg: RegistryConfig) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            cfg,
            root: RwLock::new(None),
            watcher: Mutex::new(None),
            changes,
        }
    }

    async fn is_valid_root(dir: &Path) -> bool {
        tokio::fs::metadata(dir.join(PROJECT_REGISTRY)).await.is_ok()
    }

    /// Probe candidates in priority order: the explicit override, each
    /// workspace root, then each root's `../GEN_OS` sibling.
    async fn detect_root(&self) -> Option<PathBuf> {
        if !self.cfg.root.is_empty() {
            let configured = PathBuf::from(&self.cfg.root);
            if Self::is_valid_root(&configured).await {
                return Some(configured);
            }
        }
        for workspace in &self.cfg.workspace_roots {
            let root = PathBuf::from(workspace);
            if Self::is_valid_root(&root).await {
                return Some(root);
            }
            let sibling = root.join("..").join("GEN_OS");
            if Self::is_valid_root(&sibling).await {
                return Some(sibling);
            }
        }
        None
    }

    fn setup_watcher(&self, root: &Path) {
        let changes = self.changes.clone();
        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else { return };
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| WATCHED_PATHS.iter().any(|rel| p.ends_with(rel)));
                if relevant {
                    let _ = changes.send(());
                }
            },
            Config::default(),
        );
        match watcher {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
                    warn!("Failed to watch {}: {}", root.display(), e);
                    return;
                }
                *self.watcher.lock().unwrap() = Some(watcher);
            }
            Err(e) => warn!("Failed to create registry watcher: {}", e),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, relative: &str) -> Option<T> {
        let full = self.resolve_path(relative)?;
        let raw = match tokio::fs::read_to_string(&full).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Failed to read {}: {}", relative, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!("Failed to parse {}: {}", relative, e);
                None
            }
        }
    }
}

#[async_trait]
impl RegistrySource for GenOsRegistry {
    async fn initialize(&self) {
        let detected = self.detect_root().await;
        match &detected {
            Some(root) => {
                info!("GEN_OS detected at {}", root.display());
                self.setup_watcher(root);
            }
            None => {
                warn!("GEN_OS root not found; local registry reading disabled");
            }
        }
        *self.root.write().unwrap() = detected;
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    async fn projects(&self) -> Vec<LocalProject> {
        self.read_json::<ProjectRegistry>(PROJECT_REGISTRY)
            .await
            .map(|r| r.projects)
            .unwrap_or_default()
    }

    async fn workflows(&self) -> Vec<LocalWorkflow> {
        self.read_json::<WorkflowRegistry>(WORKFLOW_REGISTRY)
            .await
            .map(|r| r.workflows)
            .unwrap_or_default()
    }

    async fn agents(&self) -> Vec<LocalAgent> {
        self.read_json::<AgentManifest>(AGENT_MANIFEST)
            .await
            .map(|m| m.agents)
            .unwrap_or_default()
    }

    fn root(&self) -> Option<PathBuf> {
        self.root.read().unwrap().clone()
    }

    fn resolve_path(&self, relative: &str) -> Option<PathBuf> {
        self.root().map(|root| root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_registry(root: &Path, relative: &str, content: &str) {
        let full = root.join(relative);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    fn seed_project_registry(root: &Path) {
        write_registry(
            root,
            PROJECT_REGISTRY,
            r#"{"version": "1", "projects": [
                {"id": "p1", "name": "Core", "type": "service",
                 "path_relative": "projects/core", "domain": "infra",
                 "status": "active", "phase": "build"}
            ]}"#,
        );
    }

    fn registry_for(root: &Path) -> GenOsRegistry {
        GenOsRegistry::new(RegistryConfig {
            root: root.to_string_lossy().into_owned(),
            workspace_roots: vec![],
        })
    }

    #[tokio::test]
    async fn detects_explicit_root() {
        let dir = tempfile::tempdir().unwrap();
        seed_project_registry(dir.path());
        let registry = registry_for(dir.path());
        registry.initialize().await;
        assert_eq!(registry.root(), Some(dir.path().to_path_buf()));
    }

    #[tokio::test]
    async fn invalid_explicit_root_falls_through_to_workspace() {
        let dir = tempfile::tempdir().unwrap();
        seed_project_registry(dir.path());
        let registry = GenOsRegistry::new(RegistryConfig {
            root: "/nonexistent/genos".to_string(),
            workspace_roots: vec![dir.path().to_string_lossy().into_owned()],
        });
        registry.initialize().await;
        assert_eq!(registry.root(), Some(dir.path().to_path_buf()));
    }

    #[tokio::test]
    async fn detects_sibling_genos_directory() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        let genos = dir.path().join("GEN_OS");
        std::fs::create_dir_all(&workspace).unwrap();
        seed_project_registry(&genos);
        let registry = GenOsRegistry::new(RegistryConfig {
            root: String::new(),
            workspace_roots: vec![workspace.to_string_lossy().into_owned()],
        });
        registry.initialize().await;
        let detected = registry.root().unwrap();
        assert_eq!(canonical(&detected), canonical(&genos));
    }

    fn canonical(p: &Path) -> PathBuf {
        p.canonicalize().unwrap_or_else(|_| p.to_path_buf())
    }

    #[tokio::test]
    async fn no_candidate_means_disabled_mode() {
        let registry = GenOsRegistry::new(RegistryConfig {
            root: String::new(),
            workspace_roots: vec!["/nonexistent/workspace".to_string()],
        });
        registry.initialize().await;
        assert!(registry.root().is_none());
        assert!(registry.resolve_path("config/project_registry.json").is_none());
        assert!(registry.projects().await.is_empty());
        assert!(registry.workflows().await.is_empty());
        assert!(registry.agents().await.is_empty());
    }

    #[tokio::test]
    async fn reads_registry_documents() {
        let dir = tempfile::tempdir().unwrap();
        seed_project_registry(dir.path());
        write_registry(
            dir.path(),
            WORKFLOW_REGISTRY,
            r#"{"version": "1", "generated_at": "2026-08-01T00:00:00Z", "workflows": [
                {"workflow_id": "wf-release", "name": "Release", "version": "2",
                 "owner": "infra", "trigger": "tag push", "steps_count": 4,
                 "spec_path": "docs/workflows/release/spec.md",
                 "design_path": "docs/workflows/release/design.md",
                 "generated_at": "2026-08-01T00:00:00Z"}
            ]}"#,
        );
        write_registry(
            dir.path(),
            AGENT_MANIFEST,
            r#"{"version": "1", "name": "gen_os", "description": "",
                "agents": [{"id": "reviewer", "name": "Reviewer",
                            "vendor_preference": "claude",
                            "supported_vendors": ["claude", "gemini"],
                            "instructions": "Review diffs.",
                            "capabilities": ["review"],
                            "risk_tier": "low", "needs_approval": false}],
                "teams": {}}"#,
        );

        let registry = registry_for(dir.path());
        registry.initialize().await;

        let projects = registry.projects().await;
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].path_relative, "projects/core");

        let workflows = registry.workflows().await;
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].workflow_id, "wf-release");
        assert_eq!(workflows[0].steps_count, 4);

        let agents = registry.agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].supported_vendors, vec!["claude", "gemini"]);
    }

    #[tokio::test]
    async fn unparsable_document_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        seed_project_registry(dir.path());
        write_registry(dir.path(), WORKFLOW_REGISTRY, "{not json");
        let registry = registry_for(dir.path());
        registry.initialize().await;
        // The broken document degrades to empty; the valid one still reads.
        assert!(registry.workflows().await.is_empty());
        assert_eq!(registry.projects().await.len(), 1);
    }

    #[tokio::test]
    async fn resolve_path_joins_root() {
        let dir = tempfile::tempdir().unwrap();
        seed_project_registry(dir.path());
        let registry = registry_for(dir.path());
        registry.initialize().await;
        assert_eq!(
            registry.resolve_path("projects/core"),
            Some(dir.path().join("projects/core"))
        );
    }

    #[tokio::test]
    async fn file_change_raises_signal() {
        let dir = tempfile::tempdir().unwrap();
        seed_project_registry(dir.path());
        let registry = registry_for(dir.path());
        registry.initialize().await;
        let mut rx = registry.subscribe_changes();

        write_registry(
            dir.path(),
            PROJECT_REGISTRY,
            r#"{"version": "2", "projects": []}"#,
        );

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change signal within timeout")
            .expect("signal received");
    }
}
