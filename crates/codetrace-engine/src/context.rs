//! Context Assembler (component J).
//!
//! Takes a hybrid search's top results, expands one or two hops through the
//! call/contains graph, dedupes, and packs the result into a token budget:
//! full source for the top-ranked nodes, signatures only for the expansion
//! ring, always noting which nodes were actually cited so a caller can
//! distinguish "used" context from "considered" context.
use std::collections::HashSet;

use codetrace_core::NodeId;

use crate::embedder::count_tokens_for_context;
use crate::retrieval::{RetrievalEngine, SearchHit, StructuralHit};

pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 8000;
const EXPANSION_HOPS: u32 = 2;

#[derive(Debug, Clone)]
pub struct ContextNode {
    pub node_id: NodeId,
    pub qualified_name: String,
    pub file_path: String,
    pub content: String,
    pub full_source_included: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub nodes: Vec<ContextNode>,
    pub cited_node_ids: Vec<NodeId>,
    pub total_tokens: usize,
    pub truncated: bool,
}

/// A thin view over whatever stores the full node bodies; the assembler
/// only needs source text and a signature, not the full `Node` record.
#[derive(Debug, Clone)]
pub struct NodeBody {
    pub node_id: NodeId,
    pub qualified_name: String,
    pub file_path: String,
    pub signature: Option<String>,
    pub source_text: String,
}

pub struct ContextAssembler<'a> {
    retrieval: &'a RetrievalEngine,
    max_tokens: usize,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(retrieval: &'a RetrievalEngine, max_tokens: usize) -> Self {
        Self { retrieval, max_tokens }
    }

    /// Expand `hits` by up to two hops of callers/callees plus same-file
    /// siblings, returning the deduplicated set of node ids to assemble
    /// (search hits first, then the expansion ring in discovery order).
    pub async fn expand(&self, hits: &[SearchHit]) -> codetrace_core::Result<Vec<NodeId>> {
        let mut seen: HashSet<NodeId> = hits.iter().map(|h| h.node_id).collect();
        let mut ordered: Vec<NodeId> = hits.iter().map(|h| h.node_id).collect();

        let mut frontier: Vec<NodeId> = ordered.clone();
        for _ in 0..EXPANSION_HOPS {
            let mut next_frontier = Vec::new();
            for node_id in &frontier {
                let mut neighbors: Vec<StructuralHit> = self.retrieval.callers(*node_id, 20).await?;
                neighbors.extend(self.retrieval.callees(*node_id, 20).await?);
                neighbors.extend(self.retrieval.file_siblings(*node_id, 20).await?);
                for n in neighbors {
                    if seen.insert(n.node_id) {
                        ordered.push(n.node_id);
                        next_frontier.push(n.node_id);
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(ordered)
    }

    /// Pack `bodies` (already ordered: top search hits first, expansion
    /// ring after) into the token budget. Top-ranked nodes (those also in
    /// `top_node_ids`) get full source; everything else gets a
    /// signature-only summary. Packing stops, marking `truncated`, the
    /// moment a node would overflow the budget.
    pub fn assemble(&self, bodies: &[NodeBody], top_node_ids: &HashSet<NodeId>) -> AssembledContext {
        let mut result = AssembledContext::default();

        for body in bodies {
            let full = top_node_ids.contains(&body.node_id);
            let content = if full {
                body.source_text.clone()
            } else {
                body.signature.clone().unwrap_or_else(|| body.qualified_name.clone())
            };

            let tokens = count_tokens_for_context(&content);
            if result.total_tokens + tokens > self.max_tokens {
                result.truncated = true;
                break;
            }

            result.total_tokens += tokens;
            result.cited_node_ids.push(body.node_id);
            result.nodes.push(ContextNode {
                node_id: body.node_id,
                qualified_name: body.qualified_name.clone(),
                file_path: body.file_path.clone(),
                content,
                full_source_included: full,
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn body(name: &str, text: &str) -> NodeBody {
        NodeBody {
            node_id: Uuid::new_v4(),
            qualified_name: name.to_string(),
            file_path: format!("{name}.ts"),
            signature: Some(format!("fn {name}()")),
            source_text: text.to_string(),
        }
    }

    #[test]
    fn assemble_includes_full_source_for_top_nodes_only() {
        let top = body("top", "fn top() { /* full body */ }");
        let other = body("other", "fn other() { /* full body */ }");
        let mut top_ids = HashSet::new();
        top_ids.insert(top.node_id);

        let bodies = vec![top.clone(), other.clone()];
        let engine_pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let retrieval = RetrievalEngine::new(engine_pool);
        let assembler = ContextAssembler::new(&retrieval, DEFAULT_MAX_CONTEXT_TOKENS);

        let assembled = assembler.assemble(&bodies, &top_ids);
        assert_eq!(assembled.nodes.len(), 2);
        assert!(assembled.nodes[0].full_source_included);
        assert!(!assembled.nodes[1].full_source_included);
        assert_eq!(assembled.nodes[1].content, "fn other()");
    }

    #[test]
    fn assemble_stops_and_marks_truncated_at_budget() {
        let big = body("big", &"word ".repeat(100));
        let bodies = vec![big.clone(), big];
        let engine_pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let retrieval = RetrievalEngine::new(engine_pool);
        let assembler = ContextAssembler::new(&retrieval, 50);

        let mut top_ids = HashSet::new();
        top_ids.insert(bodies[0].node_id);
        let assembled = assembler.assemble(&bodies, &top_ids);
        assert!(assembled.truncated);
        assert_eq!(assembled.nodes.len(), 1);
    }
}
