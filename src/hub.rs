//! DataHub: the merged in-memory view of remote and registry data.
//!
//! The hub is the only component that talks to both sources. It owns the
//! merge policy, serializes refresh cycles, and publishes the single change
//! signal every view consumer subscribes to. Accessors are synchronous and
//! clone out of the last snapshot; they never touch I/O.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::RefreshConfig;
use crate::model::{
    LocalAgent, LocalWorkflow, Memory, Project, Prompt, StatusInfo, Task, TaskFilter, Workflow,
    WorkflowStatus,
};
use crate::traits::{RegistrySource, RemoteStore};

#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// Collections changed; consumers re-query the accessors.
    DataChanged,
    /// The remote connection transitioned. No data reload accompanies this.
    ConnectionChanged(crate::model::ConnectionState),
}

#[derive(Default)]
struct Snapshot {
    projects: Vec<Project>,
    tasks: Vec<Task>,
    memories: Vec<Memory>,
    prompts: Vec<Prompt>,
    workflows: Vec<Workflow>,
    local_workflows: Vec<LocalWorkflow>,
    agents: Vec<LocalAgent>,
    active_task_count: i64,
    last_sync: Option<DateTime<Utc>>,
}

pub struct DataHub {
    store: Arc<dyn RemoteStore>,
    registry: Arc<dyn RegistrySource>,
    cfg: RefreshConfig,
    snap: RwLock<Snapshot>,
    // Serializes whole refresh cycles; overlapping calls run back-to-back.
    refresh_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<HubEvent>,
}

/// Merge the remote project list into the local-derived one, keyed by
/// identity. For an identity present in both, the local path wins and every
/// other field takes the remote value. Remote-only identities are appended;
/// local-only identities are preserved unchanged.
pub fn merge_projects(local: &[Project], remote: Vec<Project>) -> Vec<Project> {
    let mut merged: Vec<Project> = local.to_vec();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();
    for remote_project in remote {
        match index.get(&remote_project.id) {
            Some(&i) => {
                let path = merged[i].path.clone();
                merged[i] = Project {
                    path,
                    ..remote_project
                };
            }
            None => {
                index.insert(remote_project.id.clone(), merged.len());
                merged.push(remote_project);
            }
        }
    }
    merged
}

impl DataHub {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        registry: Arc<dyn RegistrySource>,
        cfg: RefreshConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let hub = Arc::new(Self {
            store,
            registry,
            cfg,
            snap: RwLock::new(Snapshot::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            events,
        });
        hub.spawn_listeners();
        hub
    }

    /// Forward registry file-change signals (local reload, then notify) and
    /// remote state transitions (notify only) onto the hub bus. The tasks
    /// hold weak handles so dropping the hub tears them down.
    fn spawn_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut changes = self.registry.subscribe_changes();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) => {
                        let Some(hub) = weak.upgrade() else { break };
                        hub.load_local_data().await;
                        let _ = hub.events.send(HubEvent::DataChanged);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Registry change listener lagged by {} signals", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let weak = Arc::downgrade(self);
        let mut state_rx = self.store.subscribe_state();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                let Some(hub) = weak.upgrade() else { break };
                let _ = hub.events.send(HubEvent::ConnectionChanged(state));
                let _ = hub.events.send(HubEvent::DataChanged);
            }
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub async fn initialize(&self) {
        self.registry.initialize().await;
        self.load_local_data().await;
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        self.store.connect().await
    }

    pub async fn disconnect(&self) {
        self.store.disconnect().await;
    }

    /// Reload local data unconditionally, refresh from the remote store when
    /// connected, and fire exactly one `DataChanged` for the whole cycle.
    pub async fn refresh_all(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.load_local_data().await;
        if self.store.is_connected() {
            self.refresh_remote().await;
        }
        self.snap.write().unwrap().last_sync = Some(Utc::now());
        let _ = self.events.send(HubEvent::DataChanged);
    }

    async fn load_local_data(&self) {
        let (local_projects, local_workflows, agents) = tokio::join!(
            self.registry.projects(),
            self.registry.workflows(),
            self.registry.agents(),
        );

        let projects: Vec<Project> = local_projects
            .into_iter()
            .map(|p| Project {
                id: p.id,
                name: p.name,
                kind: p.kind,
                path: p.path_relative,
                domain: p.domain,
                status: p.status,
                phase: p.phase,
            })
            .collect();

        // Lightweight projection until (and unless) the remote supplies the
        // full records; spec/design paths stay available via local_workflows.
        let workflows: Vec<Workflow> = local_workflows
            .iter()
            .map(|w| Workflow {
                id: w.workflow_id.clone(),
                name: w.name.clone(),
                owner: w.owner.clone(),
                trigger: w.trigger.clone(),
                steps: Vec::new(),
                actors: Vec::new(),
                scripts: Vec::new(),
                status: WorkflowStatus::Active,
                created_at: DateTime::parse_from_rfc3339(&w.generated_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect();

        debug!(
            "Local data loaded: {} projects, {} workflows, {} agents",
            projects.len(),
            workflows.len(),
            agents.len()
        );

        let mut snap = self.snap.write().unwrap();
        snap.projects = projects;
        snap.workflows = workflows;
        snap.local_workflows = local_workflows;
        snap.agents = agents;
    }

    async fn refresh_remote(&self) {
        // Results issued before a connect/disconnect boundary are stale by
        // the time they return; skip every replacement when the generation
        // moved under us.
        let generation = self.store.generation();
        let limit = self.cfg.max_results;

        let (tasks, memories, prompts, workflows, active_count) = tokio::join!(
            self.store.fetch_tasks(limit),
            self.store
                .fetch_memories(limit, self.cfg.memory_preview_chars),
            self.store
                .fetch_prompts_latest(limit, self.cfg.prompt_preview_chars),
            self.store.fetch_workflows(),
            self.store.fetch_active_task_count(),
        );

        if self.store.generation() != generation {
            debug!("Discarding refresh results from a superseded connection");
            return;
        }

        let task_count = tasks.len();
        let memory_count = memories.len();
        let prompt_count = prompts.len();
        {
            let mut snap = self.snap.write().unwrap();
            snap.tasks = tasks;
            snap.memories = memories;
            snap.prompts = prompts;
            // An empty remote workflow result means "remote has nothing to
            // say"; the prior (possibly local-sourced) collection stands.
            if !workflows.is_empty() {
                snap.workflows = workflows;
            }
            snap.active_task_count = active_count;
        }

        let remote_projects = self.store.fetch_projects().await;
        if self.store.generation() != generation {
            debug!("Discarding project merge from a superseded connection");
            return;
        }
        if !remote_projects.is_empty() {
            let mut snap = self.snap.write().unwrap();
            let merged = merge_projects(&snap.projects, remote_projects);
            snap.projects = merged;
        }

        debug!(
            "Remote data loaded: {} tasks, {} memories, {} prompts",
            task_count, memory_count, prompt_count
        );
    }

    // -----------------------------------------------------------------------
    // Synchronous accessors over the last snapshot.
    // -----------------------------------------------------------------------

    pub fn get_projects(&self) -> Vec<Project> {
        self.snap.read().unwrap().projects.clone()
    }

    pub fn get_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let snap = self.snap.read().unwrap();
        snap.tasks
            .iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .project_id
                    .as_ref()
                    .map_or(true, |p| &t.project_id == p)
            })
            .cloned()
            .collect()
    }

    /// Case-insensitive substring match on content or any tag. An empty or
    /// absent term returns the full cached set.
    pub fn get_memories(&self, term: Option<&str>) -> Vec<Memory> {
        let snap = self.snap.read().unwrap();
        let term = term.unwrap_or("");
        if term.is_empty() {
            return snap.memories.clone();
        }
        let lower = term.to_lowercase();
        snap.memories
            .iter()
            .filter(|m| {
                m.content.to_lowercase().contains(&lower)
                    || m.tags.iter().any(|t| t.to_lowercase().contains(&lower))
            })
            .cloned()
            .collect()
    }

    pub fn get_prompts(&self) -> Vec<Prompt> {
        self.snap.read().unwrap().prompts.clone()
    }

    pub fn get_workflows(&self) -> Vec<Workflow> {
        self.snap.read().unwrap().workflows.clone()
    }

    pub fn get_local_workflows(&self) -> Vec<LocalWorkflow> {
        self.snap.read().unwrap().local_workflows.clone()
    }

    pub fn get_agents(&self) -> Vec<LocalAgent> {
        self.snap.read().unwrap().agents.clone()
    }

    pub fn get_active_task_count(&self) -> i64 {
        self.snap.read().unwrap().active_task_count
    }

    pub fn get_status_info(&self) -> StatusInfo {
        let snap = self.snap.read().unwrap();
        StatusInfo {
            connection_state: self.store.state(),
            active_task_count: snap.active_task_count,
            last_sync: snap.last_sync,
        }
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.registry.root()
    }

    pub fn resolve_path(&self, relative: &str) -> Option<PathBuf> {
        self.registry.resolve_path(relative)
    }

    // -----------------------------------------------------------------------
    // Live remote paths with cached fallbacks.
    // -----------------------------------------------------------------------

    /// Remote search scans full (untruncated) content; the cache only holds
    /// previews. Falls back to the local in-memory search when disconnected.
    pub async fn search_memories_remote(&self, term: &str) -> Vec<Memory> {
        if !self.store.is_connected() {
            return self.get_memories(Some(term));
        }
        self.store
            .search_memories(term, self.cfg.max_results, self.cfg.memory_preview_chars)
            .await
    }

    /// Full-content detail fetch; the cached (preview) record when
    /// disconnected.
    pub async fn get_memory_by_id(&self, id: i64) -> Option<Memory> {
        if !self.store.is_connected() {
            let snap = self.snap.read().unwrap();
            return snap.memories.iter().find(|m| m.id == id).cloned();
        }
        self.store.fetch_memory(id).await
    }

    /// All versions of one prompt, version-descending. Disconnected, only
    /// the cached latest entry (if any) is available.
    pub async fn get_prompt_versions(&self, prompt_id: &str) -> Vec<Prompt> {
        if !self.store.is_connected() {
            let snap = self.snap.read().unwrap();
            return snap
                .prompts
                .iter()
                .filter(|p| p.id == prompt_id)
                .cloned()
                .collect();
        }
        self.store.fetch_prompt_versions(prompt_id).await
    }
}
