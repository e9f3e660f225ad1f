//! PostgreSQL client: pooled connection lifecycle, reconnect state machine
//! with fixed backoff, and the fail-soft query surface the hub consumes.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::model::{
    ConnectionState, Memory, MemoryType, Project, Prompt, PromptLabel, PromptType, PromptVendor,
    Task, TaskPriority, TaskStatus, TrustLevel, Workflow, WorkflowStatus,
};
use crate::traits::RemoteStore;

/// Escalating reconnect delays; consecutive failures advance one step and
/// stay capped at the last entry. Any success resets to the first.
pub const RECONNECT_DELAYS_MS: [u64; 6] = [1000, 2000, 4000, 8000, 16000, 30000];

pub fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(RECONNECT_DELAYS_MS.len() - 1);
    Duration::from_millis(RECONNECT_DELAYS_MS[idx])
}

/// Typed bind parameter for `query`. The two variants cover every statement
/// the dashboard issues.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

/// Build connect options from configuration: the connection string when set,
/// else the discrete fields. Fails fast before any I/O when neither form
/// yields usable credentials.
pub fn connect_options(cfg: &DatabaseConfig) -> anyhow::Result<PgConnectOptions> {
    if !cfg.url.is_empty() {
        return Ok(PgConnectOptions::from_str(&cfg.url)?);
    }
    if cfg.user.is_empty() {
        bail!("no database credentials configured: set database.url or database.user");
    }
    let mut opts = PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .database(&cfg.name)
        .username(&cfg.user);
    if !cfg.password.is_empty() {
        opts = opts.password(&cfg.password);
    }
    Ok(opts)
}

fn is_connection_loss(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    ["connection refused", "connection reset", "connection terminated", "broken pipe", "connection closed", "pool timed out"]
        .iter()
        .any(|p| lower.contains(p))
}

pub struct PgRemoteStore {
    cfg: DatabaseConfig,
    pool: Mutex<Option<PgPool>>,
    state_tx: watch::Sender<ConnectionState>,
    retry_attempt: AtomicU32,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    // Handle to ourselves so `&self` methods can spawn the retry task.
    weak: Weak<PgRemoteStore>,
}

impl PgRemoteStore {
    pub fn new(cfg: DatabaseConfig) -> std::sync::Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        std::sync::Arc::new_cyclic(|weak| Self {
            cfg,
            pool: Mutex::new(None),
            state_tx,
            retry_attempt: AtomicU32::new(0),
            retry_timer: Mutex::new(None),
            generation: AtomicU64::new(0),
            weak: weak.clone(),
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn current_pool(&self) -> Option<PgPool> {
        self.pool.lock().unwrap().clone()
    }

    /// Execute a parameterized query. Returns empty when not connected (no
    /// I/O attempted). On failure, logs and returns empty; only a failure
    /// whose text indicates a lost connection drives the `error` transition
    /// and schedules a retry.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Vec<PgRow> {
        if self.state() != ConnectionState::Connected {
            return Vec::new();
        }
        let Some(pool) = self.current_pool() else {
            return Vec::new();
        };
        let mut q = sqlx::query(sql);
        for param in params {
            q = match param {
                SqlParam::Int(v) => q.bind(*v),
                SqlParam::Text(s) => q.bind(s.clone()),
            };
        }
        match q.fetch_all(&pool).await {
            Ok(rows) => rows,
            Err(e) => {
                let msg = e.to_string();
                error!("Query error: {}", msg);
                if is_connection_loss(&msg) {
                    self.set_state(ConnectionState::Error);
                    self.schedule_retry();
                }
                Vec::new()
            }
        }
    }

    /// Schedule one reconnect attempt after the current backoff delay.
    /// No-op while a timer is already pending.
    fn schedule_retry(&self) {
        let mut timer = self.retry_timer.lock().unwrap();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let attempt = self.retry_attempt.fetch_add(1, Ordering::SeqCst);
        let delay = backoff_delay(attempt);
        info!(
            "Scheduling reconnect in {}ms (attempt {})",
            delay.as_millis(),
            attempt + 1
        );
        let weak = self.weak.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(store) = weak.upgrade() else {
                return;
            };
            // Free the slot so a failed attempt can schedule the next one.
            *store.retry_timer.lock().unwrap() = None;
            let stale = store.pool.lock().unwrap().take();
            if let Some(pool) = stale {
                pool.close().await;
            }
            if store.connect().await.is_err() {
                store.schedule_retry();
            }
        }));
    }

    #[cfg(test)]
    fn retry_pending(&self) -> bool {
        self.retry_timer
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    // -----------------------------------------------------------------------
    // Row decoding. The schema is consumed, not owned, so every column read
    // is defensive: a malformed value degrades to a documented fallback
    // instead of failing the row.
    // -----------------------------------------------------------------------

    fn get_id(row: &PgRow, col: &str) -> i64 {
        row.try_get::<i64, _>(col)
            .or_else(|_| row.try_get::<i32, _>(col).map(i64::from))
            .unwrap_or(0)
    }

    fn get_text(row: &PgRow, col: &str) -> String {
        row.try_get::<String, _>(col).unwrap_or_default()
    }

    fn get_timestamp(row: &PgRow, col: &str) -> DateTime<Utc> {
        row.try_get::<DateTime<Utc>, _>(col)
            .or_else(|_| row.try_get::<NaiveDateTime, _>(col).map(|n| n.and_utc()))
            .unwrap_or_else(|_| Utc::now())
    }

    fn get_timestamp_opt(row: &PgRow, col: &str) -> Option<DateTime<Utc>> {
        row.try_get::<Option<DateTime<Utc>>, _>(col)
            .or_else(|_| {
                row.try_get::<Option<NaiveDateTime>, _>(col)
                    .map(|o| o.map(|n| n.and_utc()))
            })
            .unwrap_or(None)
    }

    fn row_to_task(row: &PgRow) -> Task {
        Task {
            id: Self::get_id(row, "id"),
            project_id: Self::get_text(row, "project_id"),
            title: Self::get_text(row, "title"),
            description: Self::get_text(row, "description"),
            status: TaskStatus::parse(&Self::get_text(row, "status")),
            priority: TaskPriority::parse(&Self::get_text(row, "priority")),
            assigned_to: row.try_get("assigned_to").unwrap_or(None),
            blocked_by: row.try_get::<Vec<i64>, _>("blocked_by").unwrap_or_default(),
            tags: row.try_get::<Vec<String>, _>("tags").unwrap_or_default(),
            created_at: Self::get_timestamp(row, "created_at"),
            completed_at: Self::get_timestamp_opt(row, "completed_at"),
        }
    }

    fn row_to_memory(row: &PgRow) -> Memory {
        Memory {
            id: Self::get_id(row, "id"),
            project_id: Self::get_text(row, "project_id"),
            agent_id: Self::get_text(row, "agent_id"),
            content: Self::get_text(row, "content"),
            memory_type: MemoryType::parse(&Self::get_text(row, "memory_type")),
            tags: row.try_get::<Vec<String>, _>("tags").unwrap_or_default(),
            trust_level: TrustLevel::parse(&Self::get_text(row, "trust_level")),
            confidence: row.try_get::<Option<f64>, _>("confidence").unwrap_or(None),
            created_at: Self::get_timestamp(row, "created_at"),
        }
    }

    fn row_to_prompt(row: &PgRow) -> Prompt {
        Prompt {
            id: Self::get_text(row, "id"),
            version: Self::get_id(row, "version"),
            label: PromptLabel::parse(&Self::get_text(row, "label")),
            kind: PromptType::parse(&Self::get_text(row, "type")),
            vendor: PromptVendor::parse(&Self::get_text(row, "vendor")),
            content: Self::get_text(row, "content"),
            changelog: Self::get_text(row, "changelog"),
            created_at: Self::get_timestamp(row, "created_at"),
        }
    }

    fn row_to_workflow(row: &PgRow) -> Workflow {
        let steps = row
            .try_get::<serde_json::Value, _>("steps")
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        Workflow {
            id: Self::get_text(row, "id"),
            name: Self::get_text(row, "name"),
            owner: Self::get_text(row, "owner"),
            trigger: Self::get_text(row, "trigger"),
            steps,
            actors: row.try_get::<Vec<String>, _>("actors").unwrap_or_default(),
            scripts: row.try_get::<Vec<String>, _>("scripts").unwrap_or_default(),
            status: WorkflowStatus::parse(&Self::get_text(row, "status")),
            created_at: Self::get_timestamp(row, "created_at"),
        }
    }

    fn row_to_project(row: &PgRow) -> Project {
        Project {
            id: Self::get_text(row, "id"),
            name: Self::get_text(row, "name"),
            kind: Self::get_text(row, "type"),
            path: Self::get_text(row, "path"),
            domain: Self::get_text(row, "domain"),
            status: Self::get_text(row, "status"),
            phase: Self::get_text(row, "phase"),
        }
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);

        let opts = match connect_options(&self.cfg) {
            Ok(opts) => opts,
            Err(e) => {
                error!("PostgreSQL connection failed: {}", e);
                self.set_state(ConnectionState::Error);
                return Err(e);
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(self.cfg.pool_max)
            .acquire_timeout(Duration::from_secs(self.cfg.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.cfg.idle_timeout_secs))
            .connect_lazy_with(opts);

        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => {
                *self.pool.lock().unwrap() = Some(pool);
                self.retry_attempt.store(0, Ordering::SeqCst);
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                info!("PostgreSQL connected");
                Ok(())
            }
            Err(e) => {
                pool.close().await;
                error!("PostgreSQL connection failed: {}", e);
                self.set_state(ConnectionState::Error);
                Err(e.into())
            }
        }
    }

    async fn disconnect(&self) {
        if let Some(timer) = self.retry_timer.lock().unwrap().take() {
            timer.abort();
        }
        let pool = self.pool.lock().unwrap().take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        self.retry_attempt.store(0, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        info!("PostgreSQL disconnected");
    }

    async fn ping(&self) {
        let rows = self.query("SELECT 1", &[]).await;
        debug!("Liveness probe returned {} row(s)", rows.len());
    }

    async fn fetch_tasks(&self, limit: i64) -> Vec<Task> {
        self.query(
            "SELECT id, project_id, title, description, status, priority, assigned_to, \
             blocked_by::bigint[] AS blocked_by, tags, created_at, completed_at \
             FROM tasks ORDER BY \
               CASE priority WHEN 'critical' THEN 1 WHEN 'high' THEN 2 WHEN 'medium' THEN 3 ELSE 4 END, \
               created_at DESC \
             LIMIT $1",
            &[SqlParam::Int(limit)],
        )
        .await
        .iter()
        .map(Self::row_to_task)
        .collect()
    }

    async fn fetch_memories(&self, limit: i64, preview_chars: i64) -> Vec<Memory> {
        self.query(
            "SELECT id, project_id, agent_id, LEFT(content, $2::int) AS content, memory_type, \
             tags, trust_level, confidence::float8 AS confidence, created_at \
             FROM memories ORDER BY created_at DESC LIMIT $1",
            &[SqlParam::Int(limit), SqlParam::Int(preview_chars)],
        )
        .await
        .iter()
        .map(Self::row_to_memory)
        .collect()
    }

    async fn fetch_prompts_latest(&self, limit: i64, preview_chars: i64) -> Vec<Prompt> {
        self.query(
            "WITH ranked AS ( \
               SELECT id, version, label, type, vendor, LEFT(content, $2::int) AS content, \
                      changelog, created_at, \
                      ROW_NUMBER() OVER (PARTITION BY id ORDER BY version DESC) AS rn \
               FROM prompts \
             ) \
             SELECT id, version, label, type, vendor, content, changelog, created_at \
             FROM ranked WHERE rn = 1 ORDER BY created_at DESC LIMIT $1",
            &[SqlParam::Int(limit), SqlParam::Int(preview_chars)],
        )
        .await
        .iter()
        .map(Self::row_to_prompt)
        .collect()
    }

    async fn fetch_workflows(&self) -> Vec<Workflow> {
        self.query(
            "SELECT id, name, owner, trigger, steps, actors, scripts, status, created_at \
             FROM workflows WHERE status != 'deprecated' ORDER BY name",
            &[],
        )
        .await
        .iter()
        .map(Self::row_to_workflow)
        .collect()
    }

    async fn fetch_active_task_count(&self) -> i64 {
        self.query(
            "SELECT COUNT(*)::bigint AS count FROM tasks WHERE status = 'in_progress'",
            &[],
        )
        .await
        .first()
        .map(|row| row.try_get::<i64, _>("count").unwrap_or(0))
        .unwrap_or(0)
    }

    async fn fetch_projects(&self) -> Vec<Project> {
        self.query(
            "SELECT id, name, type, path, domain, status, phase::text AS phase \
             FROM projects ORDER BY name",
            &[],
        )
        .await
        .iter()
        .map(Self::row_to_project)
        .collect()
    }

    async fn search_memories(&self, term: &str, limit: i64, preview_chars: i64) -> Vec<Memory> {
        self.query(
            "SELECT id, project_id, agent_id, LEFT(content, $3::int) AS content, memory_type, \
             tags, trust_level, confidence::float8 AS confidence, created_at \
             FROM memories WHERE content ILIKE $1 \
             ORDER BY created_at DESC LIMIT $2",
            &[
                SqlParam::Text(format!("%{}%", term)),
                SqlParam::Int(limit),
                SqlParam::Int(preview_chars),
            ],
        )
        .await
        .iter()
        .map(Self::row_to_memory)
        .collect()
    }

    async fn fetch_memory(&self, id: i64) -> Option<Memory> {
        self.query(
            "SELECT id, project_id, agent_id, content, memory_type, tags, trust_level, \
             confidence::float8 AS confidence, created_at \
             FROM memories WHERE id = $1",
            &[SqlParam::Int(id)],
        )
        .await
        .first()
        .map(Self::row_to_memory)
    }

    async fn fetch_prompt_versions(&self, prompt_id: &str) -> Vec<Prompt> {
        self.query(
            "SELECT id, version, label, type, vendor, content, changelog, created_at \
             FROM prompts WHERE id = $1 ORDER BY version DESC",
            &[SqlParam::Text(prompt_id.to_string())],
        )
        .await
        .iter()
        .map(Self::row_to_prompt)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_credentials_config() -> DatabaseConfig {
        DatabaseConfig::default()
    }

    fn refused_config() -> DatabaseConfig {
        // Port 1 on loopback refuses immediately; no server listens there.
        DatabaseConfig {
            url: "postgres://dash@127.0.0.1:1/gen_os".to_string(),
            connect_timeout_secs: 3,
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn backoff_sequence_escalates_and_caps() {
        let delays: Vec<u64> = (0..8).map(|a| backoff_delay(a).as_millis() as u64).collect();
        assert_eq!(delays[..6], [1000, 2000, 4000, 8000, 16000, 30000]);
        // Capped at the last entry for further attempts.
        assert_eq!(delays[6], 30000);
        assert_eq!(delays[7], 30000);
    }

    #[test]
    fn connection_loss_patterns() {
        assert!(is_connection_loss("error: Connection refused (os error 111)"));
        assert!(is_connection_loss("connection reset by peer"));
        assert!(is_connection_loss("Connection terminated unexpectedly"));
        assert!(!is_connection_loss("syntax error at or near \"SELEC\""));
        assert!(!is_connection_loss("relation \"tasks\" does not exist"));
    }

    #[test]
    fn connect_options_prefers_url() {
        let cfg = DatabaseConfig {
            url: "postgres://dash:pw@db:5433/gen_os".to_string(),
            user: "ignored".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(connect_options(&cfg).is_ok());
    }

    #[test]
    fn connect_options_requires_credentials() {
        let err = connect_options(&no_credentials_config()).unwrap_err();
        assert!(err.to_string().contains("no database credentials"));
    }

    #[tokio::test]
    async fn connect_without_credentials_fails_fast() {
        let store = PgRemoteStore::new(no_credentials_config());
        let result = store.connect().await;
        assert!(result.is_err());
        assert_eq!(store.state(), ConnectionState::Error);
        // A direct connect() failure never schedules an automatic retry.
        assert!(!store.retry_pending());
    }

    #[tokio::test]
    async fn connect_refused_reports_error_state() {
        let store = PgRemoteStore::new(refused_config());
        let result = store.connect().await;
        assert!(result.is_err());
        assert_eq!(store.state(), ConnectionState::Error);
        assert!(!store.retry_pending());
    }

    #[tokio::test]
    async fn query_while_disconnected_returns_empty() {
        let store = PgRemoteStore::new(refused_config());
        assert_eq!(store.state(), ConnectionState::Disconnected);
        let rows = store.query("SELECT 1", &[]).await;
        assert!(rows.is_empty());
        // Typed fetches inherit the same behavior.
        assert!(store.fetch_tasks(10).await.is_empty());
        assert_eq!(store.fetch_active_task_count().await, 0);
        assert!(store.fetch_memory(1).await.is_none());
    }

    #[tokio::test]
    async fn retry_scheduling_is_single_pending() {
        let store = PgRemoteStore::new(refused_config());
        store.schedule_retry();
        assert!(store.retry_pending());
        assert_eq!(store.retry_attempt.load(Ordering::SeqCst), 1);
        // Scheduling again while a timer is outstanding is a no-op.
        store.schedule_retry();
        assert_eq!(store.retry_attempt.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_retry() {
        let store = PgRemoteStore::new(refused_config());
        store.schedule_retry();
        assert!(store.retry_pending());
        store.disconnect().await;
        assert!(!store.retry_pending());
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert_eq!(store.retry_attempt.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn state_transitions_reach_subscribers() {
        let store = PgRemoteStore::new(no_credentials_config());
        let mut rx = store.subscribe_state();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
        let _ = store.connect().await;
        // Connecting then Error; the receiver sees at least the latest.
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn generation_bumps_on_disconnect() {
        let store = PgRemoteStore::new(refused_config());
        let before = store.generation();
        store.disconnect().await;
        assert_eq!(store.generation(), before + 1);
    }
}
