use std::collections::{HashMap, HashSet};

use anyhow::Result;
use codetrace_engine::{ContextAssembler, EmbedInput, Embedder, GraphStore, RetrievalEngine};

use crate::config::ResolvedConfig;
use crate::db;

const SEARCH_LIMIT: usize = 10;

pub async fn run(config: &ResolvedConfig, query: &str, project_slug: &str, max_tokens: Option<usize>) -> Result<()> {
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

    let input = EmbedInput {
        qualified_name: "__query__".to_string(),
        signature: None,
        docstring: None,
        source_text: query.to_string(),
    };
    let query_embedding = embedder
        .embed_changed(&[input], &HashMap::new())
        .await?
        .get("__query__")
        .cloned();

    let mut hits = Vec::new();
    for source in &sources {
        let Some(workspace_id) = store.workspace_for_source(source.id).await? else {
            continue;
        };
        hits.extend(
            retrieval
                .hybrid_search(workspace_id, query, query_embedding.as_deref(), None, SEARCH_LIMIT)
                .await?,
        );
    }

    if hits.is_empty() {
        println!("no results.");
        return Ok(());
    }

    let max_tokens = max_tokens.unwrap_or(config.max_context_tokens);
    let assembler = ContextAssembler::new(&retrieval, max_tokens);
    let top_ids: HashSet<_> = hits.iter().map(|h| h.node_id).collect();
    let expanded = assembler.expand(&hits).await?;
    let bodies = store.load_node_bodies(&expanded).await?;
    let assembled = assembler.assemble(&bodies, &top_ids);

    for node in &assembled.nodes {
        println!("-- {} ({}) --", node.file_path, node.qualified_name);
        println!("{}", node.content);
        println!();
    }

    println!(
        "[{} symbols, {} tokens{}]",
        assembled.nodes.len(),
        assembled.total_tokens,
        if assembled.truncated { ", truncated" } else { "" }
    );
    Ok(())
}
