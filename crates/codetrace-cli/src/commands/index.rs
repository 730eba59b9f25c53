use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use codetrace_core::Source;
use codetrace_engine::orchestrator::{self, RunOptions, RunRegistry, RunStatus, SourceRunOutcome};
use codetrace_engine::{index_source, resolve_project_cross_source, Embedder, GraphStore, SourceIndexInput, SourceIndexOutcome};

use crate::config::ResolvedConfig;
use crate::db;

pub async fn run(config: &ResolvedConfig, project_slug: &str, force: bool) -> Result<()> {
    let pool = db::connect(&config.database_url).await?;
    let project = db::load_project_by_slug(&pool, project_slug).await?;
    let sources = db::load_sources_for_project(&pool, project.id).await?;
    if sources.is_empty() {
        println!("project '{project_slug}' has no linked sources, nothing to index");
        return Ok(());
    }

    let store = GraphStore::new(pool.clone());
    let embedder = Arc::new(Embedder::new(
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.max_embedding_batch,
    )?);

    let by_id: HashMap<_, _> = sources.iter().map(|s| (s.id, s.clone())).collect();
    let outcomes: Arc<Mutex<Vec<(Source, SourceIndexOutcome)>>> = Arc::new(Mutex::new(Vec::new()));

    let registry = RunRegistry::new();
    let job_id = orchestrator::job_id(project.id, Utc::now().timestamp_millis());
    registry.begin(project.id, job_id.clone(), force, Utc::now())?;

    let options = RunOptions {
        force,
        max_auto_reindex_files: config.max_auto_reindex_files,
        ..Default::default()
    };

    let source_ids: Vec<_> = sources.iter().map(|s| s.id).collect();

    let max_auto_reindex_files = config.max_auto_reindex_files;
    let worker_pool_size = options.worker_pool_size;

    let run_result = orchestrator::run_project_index(&registry, project.id, job_id.clone(), source_ids, options, {
        let store = store.clone();
        let embedder = embedder.clone();
        let by_id = by_id.clone();
        let outcomes = outcomes.clone();
        move |source_id, _registry, _job_id| {
            let store = store.clone();
            let embedder = embedder.clone();
            let source = by_id.get(&source_id).cloned();
            let outcomes = outcomes.clone();
            async move {
                let source = source.ok_or_else(|| {
                    codetrace_core::Error::NotFound(format!("source {source_id} vanished mid-run"))
                })?;
                let outcome = index_source(
                    &store,
                    &embedder,
                    SourceIndexInput {
                        source: &source,
                        max_auto_reindex_files,
                        force,
                        worker_pool_size,
                    },
                )
                .await?;

                let run_outcome = SourceRunOutcome {
                    files_crawled: outcome.files_crawled,
                    files_parsed: outcome.files_parsed,
                    parse_failures: outcome.parse_failures,
                    nodes_written: outcome.commit.nodes_upserted,
                    edges_written: outcome.commit.edges_upserted,
                    unresolved_written: outcome.commit.unresolved_written,
                };
                outcomes.lock().unwrap().push((source, outcome));
                Ok(run_outcome)
            }
        }
    })
    .await;

    let run_outcomes = match run_result {
        Ok(outcomes) => outcomes,
        Err(e) => {
            registry.finish(&job_id, RunStatus::Failed, Some(e.to_string()), Utc::now());
            return Err(e).context("project index run failed");
        }
    };

    let collected = Arc::try_unwrap(outcomes).map(|m| m.into_inner().unwrap()).unwrap_or_default();
    let resolved = resolve_project_cross_source(&store, &collected).await?;

    for (source, outcome) in &collected {
        db::update_source_checkpoint(
            &pool,
            source.id,
            outcome.current_commit.as_deref(),
            outcome.current_branch.as_deref(),
            Utc::now(),
        )
        .await?;
    }

    let total_nodes: usize = run_outcomes.iter().map(|o| o.nodes_written).sum();
    let total_edges: usize = run_outcomes.iter().map(|o| o.edges_written).sum();
    let total_files: usize = run_outcomes.iter().map(|o| o.files_parsed).sum();
    println!(
        "indexed {project_slug}: {} sources, {total_files} files parsed, {total_nodes} nodes, {total_edges} edges, {resolved} cross-source references resolved",
        collected.len()
    );
    Ok(())
}
