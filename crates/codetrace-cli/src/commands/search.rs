use std::collections::HashMap;

use anyhow::Result;
use codetrace_engine::{EmbedInput, Embedder, GraphStore, RetrievalEngine};

use crate::config::ResolvedConfig;
use crate::db;

pub async fn run(
    config: &ResolvedConfig,
    query: &str,
    project_slug: &str,
    limit: usize,
    kind: Option<&str>,
) -> Result<()> {
    let pool = db::connect(&config.database_url).await?;
    let project = db::load_project_by_slug(&pool, project_slug).await?;
    let sources = db::load_sources_for_project(&pool, project.id).await?;

    let store = GraphStore::new(pool.clone());
    let retrieval = RetrievalEngine::new(pool.clone());
    let embedder = Embedder::new(
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.max_embedding_batch,
    )?;
    let query_embedding = embed_query(&embedder, query).await?;

    let mut printed = 0usize;
    println!("{:>3} | {:>6} | {:<8} | {:<40} | File", "#", "Score", "Kind", "Symbol");
    println!("{}", "-".repeat(100));

    for source in &sources {
        if printed >= limit {
            break;
        }
        let Some(workspace_id) = store.workspace_for_source(source.id).await? else {
            continue;
        };
        let hits = retrieval
            .hybrid_search(workspace_id, query, query_embedding.as_deref(), kind, limit - printed)
            .await?;
        for hit in hits {
            printed += 1;
            println!(
                "{:>3} | {:>6.3} | {:<8} | {:<40} | {}",
                printed, hit.score, hit.kind, hit.qualified_name, hit.file_path
            );
        }
    }

    if printed == 0 {
        println!("no results.");
    }
    Ok(())
}

/// Embed a query string through the same skip-embed codepath used for
/// nodes, keyed on a synthetic qualified name that never collides with a
/// stored body hash.
async fn embed_query(embedder: &Embedder, query: &str) -> Result<Option<Vec<f32>>> {
    let input = EmbedInput {
        qualified_name: "__query__".to_string(),
        signature: None,
        docstring: None,
        source_text: query.to_string(),
    };
    let embeddings = embedder.embed_changed(&[input], &HashMap::new()).await?;
    Ok(embeddings.get("__query__").cloned())
}
