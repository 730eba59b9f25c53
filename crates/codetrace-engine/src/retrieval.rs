//! Retrieval Engine (component I).
//!
//! Hybrid search combines lexical ranking (Postgres `tsvector`/`tsquery`)
//! and vector ranking (cosine distance against `pgvector`) via reciprocal
//! rank fusion, then exposes the structural one-hop and bounded-BFS queries
//! the context assembler and any future API consumer need. All ranking is
//! pushed into SQL; no separate full-text or vector-search crate is used,
//! matching the core's choice to delegate both to the database.
use std::collections::HashMap;

use codetrace_core::{NodeId, Result, WorkspaceId};
use sqlx::postgres::PgPool;
use sqlx::Row;

const RRF_K: f64 = 60.0;
const OVERSAMPLE_FACTOR: usize = 3;
const MAX_BFS_DEPTH: u32 = 5;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub node_id: NodeId,
    pub qualified_name: String,
    pub file_path: String,
    pub kind: String,
    pub signature: Option<String>,
    pub source_text: String,
    pub docstring: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct StructuralHit {
    pub node_id: NodeId,
    pub qualified_name: String,
    pub file_path: String,
    pub depth: u32,
}

/// One lexical or vector candidate row, carrying everything a `SearchHit`
/// needs so fusion never has to re-query the database for metadata.
#[derive(Debug, Clone)]
struct Candidate {
    node_id: NodeId,
    qualified_name: String,
    file_path: String,
    kind: String,
    signature: Option<String>,
    source_text: String,
    docstring: Option<String>,
}

impl Candidate {
    fn from_row(row: sqlx::postgres::PgRow) -> Self {
        Self {
            node_id: row.get("id"),
            qualified_name: row.get("qualified_name"),
            file_path: row.get("file_path"),
            kind: row.get("kind"),
            signature: row.get("signature"),
            source_text: row.get("source_text"),
            docstring: row.get("docstring"),
        }
    }
}

pub struct RetrievalEngine {
    pool: PgPool,
}

impl RetrievalEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Hybrid search: lexical and vector candidate lists are each
    /// oversampled to `limit * 3`, then fused by reciprocal rank fusion
    /// with `k = 60`, breaking ties deterministically by node id. `kind`
    /// restricts both candidate lists to a single node kind when present.
    pub async fn hybrid_search(
        &self,
        workspace_id: WorkspaceId,
        query_text: &str,
        query_embedding: Option<&[f32]>,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let oversampled = (limit * OVERSAMPLE_FACTOR).max(limit);

        let lexical = self.lexical_candidates(workspace_id, query_text, kind, oversampled).await?;

        let vector = if let Some(embedding) = query_embedding {
            self.vector_candidates(workspace_id, embedding, kind, oversampled).await?
        } else {
            Vec::new()
        };

        Ok(fuse_rrf(&lexical, &vector, limit))
    }

    async fn lexical_candidates(
        &self,
        workspace_id: WorkspaceId,
        query_text: &str,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, qualified_name, file_path, kind, signature, source_text, docstring
            FROM nodes
            WHERE workspace_id = $1
              AND search_vector @@ websearch_to_tsquery('english', $2)
              AND ($4::text IS NULL OR kind = $4)
            ORDER BY ts_rank(search_vector, websearch_to_tsquery('english', $2)) DESC, id
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(query_text)
        .bind(limit as i64)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Candidate::from_row).collect())
    }

    async fn vector_candidates(
        &self,
        workspace_id: WorkspaceId,
        embedding: &[f32],
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, qualified_name, file_path, kind, signature, source_text, docstring
            FROM nodes
            WHERE workspace_id = $1 AND embedding IS NOT NULL
              AND ($4::text IS NULL OR kind = $4)
            ORDER BY embedding <=> $2 ASC, id
            LIMIT $3
            "#,
        )
        .bind(workspace_id)
        .bind(embedding)
        .bind(limit as i64)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Candidate::from_row).collect())
    }

    /// Direct callers of `node_id`: one hop of incoming `Calls` edges.
    pub async fn callers(&self, node_id: NodeId, limit: usize) -> Result<Vec<StructuralHit>> {
        self.one_hop(node_id, "calls", true, limit).await
    }

    /// Direct callees of `node_id`: one hop of outgoing `Calls` edges.
    pub async fn callees(&self, node_id: NodeId, limit: usize) -> Result<Vec<StructuralHit>> {
        self.one_hop(node_id, "calls", false, limit).await
    }

    /// Files/modules that import `node_id`'s containing file.
    pub async fn importers(&self, node_id: NodeId, limit: usize) -> Result<Vec<StructuralHit>> {
        self.one_hop(node_id, "imports", true, limit).await
    }

    async fn one_hop(&self, node_id: NodeId, kind: &str, incoming: bool, limit: usize) -> Result<Vec<StructuralHit>> {
        // Ordered by edge weight descending, then target node id, per spec's
        // one-hop ordering rule.
        let sql = if incoming {
            r#"
            SELECT n.id, n.qualified_name, n.file_path
            FROM edges e JOIN nodes n ON n.id = e.source_node
            WHERE e.target_node = $1 AND e.kind = $2
            ORDER BY e.weight DESC, n.id
            LIMIT $3
            "#
        } else {
            r#"
            SELECT n.id, n.qualified_name, n.file_path
            FROM edges e JOIN nodes n ON n.id = e.target_node
            WHERE e.source_node = $1 AND e.kind = $2
            ORDER BY e.weight DESC, n.id
            LIMIT $3
            "#
        };

        let rows = sqlx::query(sql)
            .bind(node_id)
            .bind(kind)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| StructuralHit {
                node_id: r.get("id"),
                qualified_name: r.get("qualified_name"),
                file_path: r.get("file_path"),
                depth: 1,
            })
            .collect())
    }

    /// Transitive dependencies: outgoing `calls`/`imports`/`uses_type` edges,
    /// bounded BFS to depth `MAX_BFS_DEPTH`, deduped on first discovery.
    pub async fn dependencies(&self, node_id: NodeId, limit: usize) -> Result<Vec<StructuralHit>> {
        self.transitive(node_id, false, limit).await
    }

    /// Transitive dependents: incoming `calls`/`imports`/`uses_type` edges,
    /// same bound and dedup rule as `dependencies`.
    pub async fn dependents(&self, node_id: NodeId, limit: usize) -> Result<Vec<StructuralHit>> {
        self.transitive(node_id, true, limit).await
    }

    /// Package-level dependency closure over `depends_on` edges synthesized
    /// by the import resolver; `reverse` selects dependents instead.
    pub async fn package_dependencies(&self, package_node_id: NodeId, reverse: bool) -> Result<Vec<StructuralHit>> {
        self.bfs(package_node_id, reverse, &["depends_on"], usize::MAX).await
    }

    async fn transitive(&self, node_id: NodeId, reverse: bool, limit: usize) -> Result<Vec<StructuralHit>> {
        self.bfs(node_id, reverse, &["calls", "imports", "uses_type"], limit).await
    }

    /// Depth-bounded breadth-first walk over the given edge kinds, deduping
    /// nodes on first discovery (which also terminates cycles); the depth
    /// recorded per hit is the shortest-path depth from `origin`. `limit`
    /// bounds the result count, not the BFS frontier.
    async fn bfs(&self, origin: NodeId, reverse: bool, kinds: &[&str], limit: usize) -> Result<Vec<StructuralHit>> {
        let mut visited = std::collections::HashSet::new();
        let mut frontier = vec![origin];
        let mut results = Vec::new();
        visited.insert(origin);

        let kinds: Vec<String> = kinds.iter().map(|s| s.to_string()).collect();

        for depth in 1..=MAX_BFS_DEPTH {
            if frontier.is_empty() || results.len() >= limit {
                break;
            }
            let sql = if reverse {
                "SELECT n.id, n.qualified_name, n.file_path FROM edges e JOIN nodes n ON n.id = e.source_node WHERE e.target_node = ANY($1) AND e.kind = ANY($2)"
            } else {
                "SELECT n.id, n.qualified_name, n.file_path FROM edges e JOIN nodes n ON n.id = e.target_node WHERE e.source_node = ANY($1) AND e.kind = ANY($2)"
            };

            let rows = sqlx::query(sql).bind(&frontier).bind(&kinds).fetch_all(&self.pool).await?;

            let mut next_frontier = Vec::new();
            for row in rows {
                let id: NodeId = row.get("id");
                if visited.insert(id) {
                    results.push(StructuralHit {
                        node_id: id,
                        qualified_name: row.get("qualified_name"),
                        file_path: row.get("file_path"),
                        depth,
                    });
                    next_frontier.push(id);
                }
            }
            frontier = next_frontier;
        }

        results.truncate(limit);
        Ok(results)
    }

    /// Other nodes declared in the same file as `node_id` (excluding itself),
    /// ordered by source position. Used by the context assembler's expansion
    /// ring alongside callers/callees.
    pub async fn file_siblings(&self, node_id: NodeId, limit: usize) -> Result<Vec<StructuralHit>> {
        let rows = sqlx::query(
            r#"
            SELECT sibling.id, sibling.qualified_name, sibling.file_path
            FROM nodes origin
            JOIN nodes sibling
              ON sibling.workspace_id = origin.workspace_id
             AND sibling.file_path = origin.file_path
             AND sibling.id <> origin.id
            WHERE origin.id = $1
            ORDER BY sibling.start_line
            LIMIT $2
            "#,
        )
        .bind(node_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StructuralHit {
                node_id: r.get("id"),
                qualified_name: r.get("qualified_name"),
                file_path: r.get("file_path"),
                depth: 1,
            })
            .collect())
    }

    /// All nodes declared in one file, ordered by source position.
    pub async fn file_context(&self, workspace_id: WorkspaceId, file_path: &str) -> Result<Vec<StructuralHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, qualified_name, file_path
            FROM nodes
            WHERE workspace_id = $1 AND file_path = $2
            ORDER BY start_line
            "#,
        )
        .bind(workspace_id)
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StructuralHit {
                node_id: r.get("id"),
                qualified_name: r.get("qualified_name"),
                file_path: r.get("file_path"),
                depth: 0,
            })
            .collect())
    }
}

/// Reciprocal rank fusion over two ranked candidate lists in descending
/// relevance order. Items present in only one list still score via that
/// list's rank; node metadata is taken from whichever list saw it first.
fn fuse_rrf(lexical: &[Candidate], vector: &[Candidate], limit: usize) -> Vec<SearchHit> {
    let mut scores: HashMap<NodeId, f64> = HashMap::new();
    let mut meta: HashMap<NodeId, Candidate> = HashMap::new();

    for (rank, c) in lexical.iter().enumerate() {
        *scores.entry(c.node_id).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        meta.entry(c.node_id).or_insert_with(|| c.clone());
    }
    for (rank, c) in vector.iter().enumerate() {
        *scores.entry(c.node_id).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        meta.entry(c.node_id).or_insert_with(|| c.clone());
    }

    let mut hits: Vec<SearchHit> = scores
        .into_iter()
        .filter_map(|(id, score)| {
            meta.remove(&id).map(|c| SearchHit {
                node_id: id,
                qualified_name: c.qualified_name,
                file_path: c.file_path,
                kind: c.kind,
                signature: c.signature,
                source_text: c.source_text,
                docstring: c.docstring,
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate(id: NodeId, name: &str) -> Candidate {
        Candidate {
            node_id: id,
            qualified_name: name.to_string(),
            file_path: format!("{name}.ts"),
            kind: "function".to_string(),
            signature: None,
            source_text: String::new(),
            docstring: None,
        }
    }

    #[test]
    fn rrf_favors_items_ranked_highly_in_both_lists() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let lexical = vec![candidate(a, "a"), candidate(b, "b")];
        let vector = vec![candidate(b, "b"), candidate(c, "c")];

        let fused = fuse_rrf(&lexical, &vector, 10);
        assert_eq!(fused[0].node_id, b);
    }

    #[test]
    fn rrf_tie_breaks_deterministically_by_node_id() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let lexical = vec![candidate(b, "b")];
        let vector = vec![candidate(a, "a")];
        let fused = fuse_rrf(&lexical, &vector, 10);
        assert_eq!(fused[0].node_id, a);
        assert_eq!(fused[1].node_id, b);
    }

    #[test]
    fn rrf_truncates_to_limit() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let lexical: Vec<_> = ids.iter().map(|id| candidate(*id, "n")).collect();
        let fused = fuse_rrf(&lexical, &[], 2);
        assert_eq!(fused.len(), 2);
    }
}
