//! Graph Builder (component G).
//!
//! Persists one source's crawl-and-resolve results: workspace, packages,
//! nodes, edges, and unresolved references, then deletes nodes whose file
//! path no longer appears in the crawl (cascading to their edges). Runs
//! inside a single transaction so a failed write never leaves a source
//! half-updated.
use codetrace_core::{Edge, Node, NodeId, Package, UnresolvedReference, Workspace, WorkspaceId};
use sqlx::postgres::PgPool;

/// Counts of rows written by a single `commit` call, returned to the
/// orchestrator for status reporting.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CommitCounts {
    pub packages_upserted: usize,
    pub nodes_upserted: usize,
    pub nodes_deleted: usize,
    pub edges_upserted: usize,
    pub unresolved_written: usize,
}

/// PostgreSQL-backed CRUD store for the graph's structural tables.
#[derive(Clone)]
pub struct GraphStore {
    pool: PgPool,
}

impl GraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the workspace row for a source. One workspace per source;
    /// `ON CONFLICT (source_id)` keeps this idempotent across re-crawls.
    pub async fn upsert_workspace(&self, workspace: &Workspace) -> codetrace_core::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workspaces (id, source_id, kind, package_manager)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_id) DO UPDATE SET
                kind = EXCLUDED.kind,
                package_manager = EXCLUDED.package_manager
            "#,
        )
        .bind(workspace.id)
        .bind(workspace.source_id)
        .bind(workspace.kind.to_string())
        .bind(workspace.package_manager.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_packages(&self, packages: &[Package]) -> codetrace_core::Result<usize> {
        for pkg in packages {
            sqlx::query(
                r#"
                INSERT INTO packages (id, workspace_id, name, relative_path, version, entry_point)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (workspace_id, relative_path) DO UPDATE SET
                    id = EXCLUDED.id,
                    name = EXCLUDED.name,
                    version = EXCLUDED.version,
                    entry_point = EXCLUDED.entry_point
                "#,
            )
            .bind(pkg.id)
            .bind(pkg.workspace_id)
            .bind(&pkg.name)
            .bind(&pkg.relative_path)
            .bind(&pkg.version)
            .bind(&pkg.entry_point)
            .execute(&self.pool)
            .await?;
        }
        Ok(packages.len())
    }

    /// Upsert a node, preserving the existing `embedding` column when the
    /// caller passes `None` (the embedder may not have run for nodes whose
    /// body hash was unchanged and already embedded).
    pub async fn upsert_node(&self, node: &Node) -> codetrace_core::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (
                id, workspace_id, package_id, file_path, name, qualified_name,
                kind, language, signature, start_line, end_line, source_text,
                docstring, body_hash, embedding, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                package_id = EXCLUDED.package_id,
                file_path = EXCLUDED.file_path,
                name = EXCLUDED.name,
                qualified_name = EXCLUDED.qualified_name,
                kind = EXCLUDED.kind,
                language = EXCLUDED.language,
                signature = EXCLUDED.signature,
                start_line = EXCLUDED.start_line,
                end_line = EXCLUDED.end_line,
                source_text = EXCLUDED.source_text,
                docstring = EXCLUDED.docstring,
                body_hash = EXCLUDED.body_hash,
                embedding = COALESCE(EXCLUDED.embedding, nodes.embedding),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(node.id)
        .bind(node.workspace_id)
        .bind(node.package_id)
        .bind(&node.file_path)
        .bind(&node.name)
        .bind(&node.qualified_name)
        .bind(node.kind.to_string())
        .bind(&node.language)
        .bind(&node.signature)
        .bind(node.start_line as i32)
        .bind(node.end_line as i32)
        .bind(&node.source_text)
        .bind(&node.docstring)
        .bind(&node.body_hash)
        .bind(node.embedding.as_deref())
        .bind(node.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_edge(&self, edge: &Edge) -> codetrace_core::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO edges (id, source_node, target_node, kind, weight, line)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_node, target_node, kind) DO UPDATE SET
                id = EXCLUDED.id,
                weight = EXCLUDED.weight,
                line = EXCLUDED.line
            "#,
        )
        .bind(edge.id)
        .bind(edge.source_node)
        .bind(edge.target_node)
        .bind(edge.kind.to_string())
        .bind(edge.weight)
        .bind(edge.line.map(|l| l as i32))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn write_unresolved(
        &self,
        refs: &[UnresolvedReference],
    ) -> codetrace_core::Result<usize> {
        for r in refs {
            sqlx::query(
                r#"
                INSERT INTO unresolved_references (id, node_id, raw_text, kind, line)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (node_id, raw_text, kind) DO UPDATE SET line = EXCLUDED.line
                "#,
            )
            .bind(r.id)
            .bind(r.node_id)
            .bind(&r.raw_text)
            .bind(r.kind.to_string())
            .bind(r.line.map(|l| l as i32))
            .execute(&self.pool)
            .await?;
        }
        Ok(refs.len())
    }

    /// Delete nodes in `workspace_id` whose `file_path` is absent from
    /// `present_file_paths` (a full-crawl's file list). Foreign-key cascade
    /// on `edges`/`unresolved_references` removes their dependent rows.
    pub async fn delete_stale_nodes(
        &self,
        workspace_id: WorkspaceId,
        present_file_paths: &[String],
    ) -> codetrace_core::Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM nodes
            WHERE workspace_id = $1 AND NOT (file_path = ANY($2))
            "#,
        )
        .bind(workspace_id)
        .bind(present_file_paths)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Run a full commit for one source's crawl: workspace, packages, nodes,
    /// edges, unresolved references, then stale-node cleanup, all inside one
    /// transaction so a mid-write failure leaves the prior state intact.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit(
        &self,
        workspace: &Workspace,
        packages: &[Package],
        nodes: &[Node],
        edges: &[Edge],
        unresolved: &[UnresolvedReference],
        present_file_paths: &[String],
    ) -> codetrace_core::Result<CommitCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = CommitCounts::default();

        sqlx::query(
            r#"
            INSERT INTO workspaces (id, source_id, kind, package_manager)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_id) DO UPDATE SET
                kind = EXCLUDED.kind,
                package_manager = EXCLUDED.package_manager
            "#,
        )
        .bind(workspace.id)
        .bind(workspace.source_id)
        .bind(workspace.kind.to_string())
        .bind(workspace.package_manager.to_string())
        .execute(&mut *tx)
        .await?;

        for pkg in packages {
            sqlx::query(
                r#"
                INSERT INTO packages (id, workspace_id, name, relative_path, version, entry_point)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (workspace_id, relative_path) DO UPDATE SET
                    id = EXCLUDED.id, name = EXCLUDED.name,
                    version = EXCLUDED.version, entry_point = EXCLUDED.entry_point
                "#,
            )
            .bind(pkg.id)
            .bind(pkg.workspace_id)
            .bind(&pkg.name)
            .bind(&pkg.relative_path)
            .bind(&pkg.version)
            .bind(&pkg.entry_point)
            .execute(&mut *tx)
            .await?;
            counts.packages_upserted += 1;
        }

        for node in nodes {
            sqlx::query(
                r#"
                INSERT INTO nodes (
                    id, workspace_id, package_id, file_path, name, qualified_name,
                    kind, language, signature, start_line, end_line, source_text,
                    docstring, body_hash, embedding, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (id) DO UPDATE SET
                    package_id = EXCLUDED.package_id, file_path = EXCLUDED.file_path,
                    name = EXCLUDED.name, qualified_name = EXCLUDED.qualified_name,
                    kind = EXCLUDED.kind, language = EXCLUDED.language,
                    signature = EXCLUDED.signature, start_line = EXCLUDED.start_line,
                    end_line = EXCLUDED.end_line, source_text = EXCLUDED.source_text,
                    docstring = EXCLUDED.docstring, body_hash = EXCLUDED.body_hash,
                    embedding = COALESCE(EXCLUDED.embedding, nodes.embedding),
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(node.id)
            .bind(node.workspace_id)
            .bind(node.package_id)
            .bind(&node.file_path)
            .bind(&node.name)
            .bind(&node.qualified_name)
            .bind(node.kind.to_string())
            .bind(&node.language)
            .bind(&node.signature)
            .bind(node.start_line as i32)
            .bind(node.end_line as i32)
            .bind(&node.source_text)
            .bind(&node.docstring)
            .bind(&node.body_hash)
            .bind(node.embedding.as_deref())
            .bind(node.updated_at)
            .execute(&mut *tx)
            .await?;
            counts.nodes_upserted += 1;
        }

        for edge in edges {
            sqlx::query(
                r#"
                INSERT INTO edges (id, source_node, target_node, kind, weight, line)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (source_node, target_node, kind) DO UPDATE SET
                    id = EXCLUDED.id, weight = EXCLUDED.weight, line = EXCLUDED.line
                "#,
            )
            .bind(edge.id)
            .bind(edge.source_node)
            .bind(edge.target_node)
            .bind(edge.kind.to_string())
            .bind(edge.weight)
            .bind(edge.line.map(|l| l as i32))
            .execute(&mut *tx)
            .await?;
            counts.edges_upserted += 1;
        }

        for r in unresolved {
            sqlx::query(
                r#"
                INSERT INTO unresolved_references (id, node_id, raw_text, kind, line)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (node_id, raw_text, kind) DO UPDATE SET line = EXCLUDED.line
                "#,
            )
            .bind(r.id)
            .bind(r.node_id)
            .bind(&r.raw_text)
            .bind(r.kind.to_string())
            .bind(r.line.map(|l| l as i32))
            .execute(&mut *tx)
            .await?;
            counts.unresolved_written += 1;
        }

        let deleted = sqlx::query(
            r#"
            DELETE FROM nodes
            WHERE workspace_id = $1 AND NOT (file_path = ANY($2))
            "#,
        )
        .bind(workspace.id)
        .bind(present_file_paths)
        .execute(&mut *tx)
        .await?;
        counts.nodes_deleted = deleted.rows_affected() as usize;

        tx.commit().await?;
        tracing::info!(
            packages = counts.packages_upserted,
            nodes = counts.nodes_upserted,
            deleted = counts.nodes_deleted,
            edges = counts.edges_upserted,
            unresolved = counts.unresolved_written,
            "graph commit complete"
        );
        Ok(counts)
    }

    /// Look up the deterministic node-id map for an entire source, keyed by
    /// qualified name, name, and file path — used to seed the resolver's
    /// `SymbolTable` for incremental re-crawls.
    pub async fn load_node_lookup(
        &self,
        workspace_id: WorkspaceId,
    ) -> codetrace_core::Result<Vec<(NodeId, String, String, String)>> {
        let rows: Vec<(NodeId, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, qualified_name, name, file_path
            FROM nodes
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Load `{qualifiedName -> (bodyHash, embedding)}` for a workspace, used
    /// by the embedder's skip-embed check against the previous run's state.
    /// Nodes without a stored embedding are omitted (never reused).
    pub async fn load_embedding_state(
        &self,
        workspace_id: WorkspaceId,
    ) -> codetrace_core::Result<std::collections::HashMap<String, crate::embedder::StoredEmbeddingState>> {
        let rows: Vec<(String, String, Option<Vec<f32>>)> = sqlx::query_as(
            r#"
            SELECT qualified_name, body_hash, embedding
            FROM nodes
            WHERE workspace_id = $1 AND embedding IS NOT NULL
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(qualified_name, body_hash, embedding)| {
                embedding.map(|embedding| {
                    (qualified_name, crate::embedder::StoredEmbeddingState { body_hash, embedding })
                })
            })
            .collect())
    }

    /// Delete unresolved references that cross-source resolution has since
    /// resolved, identified by their natural key.
    pub async fn delete_unresolved(&self, node_id: NodeId, raw_text: &str, kind: &str) -> codetrace_core::Result<()> {
        sqlx::query("DELETE FROM unresolved_references WHERE node_id = $1 AND raw_text = $2 AND kind = $3")
            .bind(node_id)
            .bind(raw_text)
            .bind(kind)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load the signature/source-text bodies the context assembler packs
    /// into a bundle, for an arbitrary set of node ids in one round trip.
    pub async fn load_node_bodies(&self, node_ids: &[NodeId]) -> codetrace_core::Result<Vec<crate::context::NodeBody>> {
        let rows: Vec<(NodeId, String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT id, qualified_name, file_path, signature, source_text
            FROM nodes
            WHERE id = ANY($1)
            "#,
        )
        .bind(node_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(node_id, qualified_name, file_path, signature, source_text)| crate::context::NodeBody {
                node_id,
                qualified_name,
                file_path,
                signature,
                source_text,
            })
            .collect())
    }

    /// Resolve a workspace id from its owning source id, used by CLI
    /// commands that only know the project/source pair a user typed.
    pub async fn workspace_for_source(&self, source_id: codetrace_core::SourceId) -> codetrace_core::Result<Option<WorkspaceId>> {
        let row: Option<(WorkspaceId,)> = sqlx::query_as("SELECT id FROM workspaces WHERE source_id = $1")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_counts_default_is_zero() {
        let counts = CommitCounts::default();
        assert_eq!(counts.nodes_upserted, 0);
        assert_eq!(counts.nodes_deleted, 0);
    }
}
