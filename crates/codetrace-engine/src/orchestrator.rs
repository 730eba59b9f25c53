//! Pipeline Orchestrator (component H).
//!
//! Drives one indexing run end to end: change detection, workspace
//! detection, crawl, parse, intra-source resolution, embedding, and graph
//! commit for each source, followed by cross-source resolution once every
//! source in the project has been indexed. Tracks live run status in a
//! `DashMap` so a caller can poll progress without blocking on completion,
//! and refuses to start a second run for the same project unless `force` is
//! set.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use codetrace_core::{Error, ProjectId, Result, SourceId};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    ChangeDetection,
    WorkspaceDetection,
    Crawling,
    Parsing,
    Resolution,
    Embedding,
    GraphCommit,
    CrossSourceResolution,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub job_id: String,
    pub project_id: ProjectId,
    pub status: RunStatus,
    pub stage: RunStage,
    /// Sources completed over sources total, for a coarse progress bar.
    pub progress: (usize, usize),
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A job id of the shape `idx-{project}-{epochMillis}`, where the caller
/// supplies `epoch_millis` since the orchestrator cannot call the system
/// clock itself (callers own timestamps so runs stay reproducible in tests).
pub fn job_id(project_id: ProjectId, epoch_millis: i64) -> String {
    format!("idx-{project_id}-{epoch_millis}")
}

/// Live status store plus the per-project concurrency guard. One instance
/// is shared across all orchestrator invocations in the process.
#[derive(Clone)]
pub struct RunRegistry {
    by_job_id: Arc<DashMap<String, RunState>>,
    by_project_id: Arc<DashMap<ProjectId, String>>,
    running: Arc<DashMap<ProjectId, ()>>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            by_job_id: Arc::new(DashMap::new()),
            by_project_id: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
        }
    }

    /// Begin tracking a run. Fails with `Error::AlreadyRunning` if the
    /// project already has one in flight, unless `force` is set, in which
    /// case the previous run's slot is simply overwritten (the caller is
    /// responsible for actually cancelling whatever held it).
    pub fn begin(&self, project_id: ProjectId, job_id: String, force: bool, started_at: DateTime<Utc>) -> Result<()> {
        if !force && self.running.contains_key(&project_id) {
            return Err(Error::AlreadyRunning(project_id.to_string()));
        }
        self.running.insert(project_id, ());
        self.by_project_id.insert(project_id, job_id.clone());
        self.by_job_id.insert(
            job_id.clone(),
            RunState {
                job_id,
                project_id,
                status: RunStatus::Running,
                stage: RunStage::ChangeDetection,
                progress: (0, 0),
                started_at,
                finished_at: None,
                error: None,
            },
        );
        Ok(())
    }

    pub fn set_total_sources(&self, job_id: &str, total: usize) {
        if let Some(mut state) = self.by_job_id.get_mut(job_id) {
            state.progress.1 = total;
        }
    }

    pub fn advance_stage(&self, job_id: &str, stage: RunStage) {
        if let Some(mut state) = self.by_job_id.get_mut(job_id) {
            state.stage = stage;
        }
    }

    pub fn source_completed(&self, job_id: &str) {
        if let Some(mut state) = self.by_job_id.get_mut(job_id) {
            state.progress.0 += 1;
        }
    }

    pub fn finish(&self, job_id: &str, status: RunStatus, error: Option<String>, finished_at: DateTime<Utc>) {
        if let Some(mut state) = self.by_job_id.get_mut(job_id) {
            state.status = status;
            state.stage = RunStage::Done;
            state.finished_at = Some(finished_at);
            state.error = error;
            self.running.remove(&state.project_id);
        }
    }

    pub fn get(&self, job_id: &str) -> Option<RunState> {
        self.by_job_id.get(job_id).map(|r| r.clone())
    }

    pub fn get_by_project(&self, project_id: ProjectId) -> Option<RunState> {
        let job_id = self.by_project_id.get(&project_id)?;
        self.get(&job_id)
    }

    pub fn is_running(&self, project_id: ProjectId) -> bool {
        self.running.contains_key(&project_id)
    }
}

/// Outcome of indexing a single source, before cross-source resolution.
#[derive(Debug, Clone, Default)]
pub struct SourceRunOutcome {
    pub files_crawled: usize,
    pub files_parsed: usize,
    pub parse_failures: usize,
    pub nodes_written: usize,
    pub edges_written: usize,
    pub unresolved_written: usize,
}

/// Parameters controlling one orchestrator invocation. Grouped into a
/// struct since the call crosses every component in the pipeline.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub force: bool,
    pub worker_pool_size: usize,
    pub max_auto_reindex_files: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            max_auto_reindex_files: 100,
        }
    }
}

/// Runs the fixed per-source stage order described in the module docs.
/// `index_one_source` is supplied by the caller (the CLI or a future
/// server) so this module stays free of any concrete storage/HTTP wiring;
/// it only owns sequencing, the concurrency guard, and status reporting.
pub async fn run_project_index<F, Fut>(
    registry: &RunRegistry,
    project_id: ProjectId,
    job_id: String,
    sources: Vec<SourceId>,
    options: RunOptions,
    index_one_source: F,
) -> Result<Vec<SourceRunOutcome>>
where
    F: Fn(SourceId, &RunRegistry, String) -> Fut,
    Fut: std::future::Future<Output = Result<SourceRunOutcome>>,
{
    registry.set_total_sources(&job_id, sources.len());
    let mut outcomes = Vec::with_capacity(sources.len());
    let mut first_error: Option<Error> = None;

    for source_id in sources {
        registry.advance_stage(&job_id, RunStage::ChangeDetection);
        match index_one_source(source_id, registry, job_id.clone()).await {
            Ok(outcome) => {
                outcomes.push(outcome);
                registry.source_completed(&job_id);
            }
            Err(e) if e.is_cancelled() => {
                registry.finish(&job_id, RunStatus::Failed, Some(e.to_string()), Utc::now());
                return Err(e);
            }
            Err(e) => {
                warn!(source = %source_id, error = %e, "source indexing failed, continuing with remaining sources");
                if first_error.is_none() {
                    first_error = Some(e);
                }
                outcomes.push(SourceRunOutcome::default());
            }
        }
    }

    registry.advance_stage(&job_id, RunStage::CrossSourceResolution);
    info!(project = %project_id, sources = outcomes.len(), "project index run complete, cross-source resolution pending");

    if let Some(e) = first_error {
        registry.finish(&job_id, RunStatus::Failed, Some(e.to_string()), Utc::now());
        return Err(e);
    }

    registry.finish(&job_id, RunStatus::Succeeded, None, Utc::now());
    Ok(outcomes)
}

/// Decide whether a change set exceeds the auto-reindex ceiling and should
/// instead be treated as a full reindex (0 disables the ceiling).
pub fn exceeds_auto_reindex_ceiling(changed_file_count: usize, max_auto_reindex_files: usize) -> bool {
    max_auto_reindex_files != 0 && changed_file_count > max_auto_reindex_files
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn job_id_has_expected_shape() {
        let project = Uuid::new_v4();
        let id = job_id(project, 1_700_000_000_000);
        assert!(id.starts_with("idx-"));
        assert!(id.ends_with("-1700000000000"));
    }

    #[test]
    fn registry_rejects_concurrent_run_without_force() {
        let registry = RunRegistry::new();
        let project = Uuid::new_v4();
        let now = Utc::now();
        registry.begin(project, "job-1".into(), false, now).unwrap();
        let err = registry.begin(project, "job-2".into(), false, now).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
    }

    #[test]
    fn registry_allows_forced_concurrent_run() {
        let registry = RunRegistry::new();
        let project = Uuid::new_v4();
        let now = Utc::now();
        registry.begin(project, "job-1".into(), false, now).unwrap();
        registry.begin(project, "job-2".into(), true, now).unwrap();
        assert_eq!(registry.get_by_project(project).unwrap().job_id, "job-2");
    }

    #[test]
    fn finish_clears_running_guard() {
        let registry = RunRegistry::new();
        let project = Uuid::new_v4();
        let now = Utc::now();
        registry.begin(project, "job-1".into(), false, now).unwrap();
        assert!(registry.is_running(project));
        registry.finish("job-1", RunStatus::Succeeded, None, now);
        assert!(!registry.is_running(project));
        registry.begin(project, "job-2".into(), false, now).unwrap();
    }

    #[test]
    fn ceiling_zero_disables_check() {
        assert!(!exceeds_auto_reindex_ceiling(10_000, 0));
        assert!(exceeds_auto_reindex_ceiling(101, 100));
        assert!(!exceeds_auto_reindex_ceiling(100, 100));
    }

    #[tokio::test]
    async fn a_failing_source_surfaces_as_failed_status_with_error() {
        let registry = RunRegistry::new();
        let project = Uuid::new_v4();
        let now = Utc::now();
        registry.begin(project, "job-1".into(), false, now).unwrap();

        let source_ok = Uuid::new_v4();
        let source_bad = Uuid::new_v4();

        let result = run_project_index(
            &registry,
            project,
            "job-1".to_string(),
            vec![source_ok, source_bad],
            RunOptions::default(),
            move |source_id, _registry, _job_id| async move {
                if source_id == source_bad {
                    Err(Error::Internal("commit failed".into()))
                } else {
                    Ok(SourceRunOutcome::default())
                }
            },
        )
        .await;

        assert!(result.is_err());
        let state = registry.get("job-1").unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("commit failed"));
    }
}
