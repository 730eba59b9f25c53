//! Per-source indexing pipeline (components A-G chained).
//!
//! Drives one source through change detection, workspace detection, crawl,
//! parse, intra-source resolution, embedding, and graph commit, in that
//! order. `index_source` is the concrete body the orchestrator's
//! `index_one_source` hook is expected to call; it is kept separate from
//! `orchestrator` so the sequencing/status-tracking module stays free of any
//! concrete storage or parser wiring.
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use codetrace_core::{
    ids, Edge, EdgeKind, Node, NodeId, NodeKind, Package, PackageId, Result, Source,
    UnresolvedReference, Workspace,
};
use tokio::task::JoinSet;
use tracing::debug;

use crate::change_detector::{self, ChangeDetectInput};
use crate::crawler::{self, CrawlOptions, CrawledFile};
use crate::embedder::{self, EmbedInput, Embedder};
use crate::graph::{CommitCounts, GraphStore};
use crate::parser::{ParseResult, ParserRegistry};
use crate::resolver::{self, SymbolTable, UnresolvedRaw};
use crate::workspace_detect::{self, WorkspaceInfo};

pub struct SourceIndexInput<'a> {
    pub source: &'a Source,
    pub max_auto_reindex_files: usize,
    pub force: bool,
    /// Bound on concurrent file parses, per §5's bounded worker pool.
    pub worker_pool_size: usize,
}

/// Everything about one source's run that the project-level cross-source
/// resolution pass (run once after every source has been indexed) needs.
#[derive(Debug, Clone, Default)]
pub struct SourceIndexOutcome {
    pub files_crawled: usize,
    pub files_parsed: usize,
    pub parse_failures: usize,
    pub commit: CommitCounts,
    pub current_commit: Option<String>,
    pub current_branch: Option<String>,
    pub workspace_info: Option<WorkspaceInfo>,
    /// file path -> file node id, for this source.
    pub file_nodes: HashMap<String, NodeId>,
    /// Residual unresolved references, kept in memory so cross-source
    /// resolution doesn't need to re-read them back from storage.
    pub unresolved: Vec<UnresolvedRaw>,
}

/// Index one source end to end and commit the result. Returns the
/// per-source outcome the caller feeds into `resolve_project_cross_source`
/// once every source in the project has run.
pub async fn index_source(
    store: &GraphStore,
    embedder: &Embedder,
    input: SourceIndexInput<'_>,
) -> Result<SourceIndexOutcome> {
    let source = input.source;
    let root = Path::new(&source.path);

    let change_input = ChangeDetectInput {
        source_path: root,
        last_indexed_commit: source.last_indexed_commit.as_deref(),
        last_indexed_at: source.last_indexed_at,
        max_auto_reindex_files: input.max_auto_reindex_files,
        force: input.force,
    };
    let mut change_set = change_detector::detect(&change_input);
    if change_set.threshold_exceeded {
        debug!(source = %source.alias, "change set exceeds auto-reindex threshold, forcing full reindex");
        change_set = change_detector::detect(&ChangeDetectInput {
            force: true,
            ..change_input
        });
    }

    let workspace_info = workspace_detect::detect(root);
    let crawl_result = crawler::crawl(root, &CrawlOptions::default()).unwrap_or_default();

    let scoped: Vec<CrawledFile> = if change_set.is_full {
        crawl_result.clone()
    } else {
        let changed: HashSet<&str> = change_set
            .added
            .iter()
            .chain(change_set.modified.iter())
            .map(|s| s.as_str())
            .collect();
        crawl_result
            .iter()
            .filter(|f| changed.contains(f.relative_path.as_str()))
            .cloned()
            .collect()
    };

    let workspace_id = ids::workspace_id(source.project_id, source.id);
    let workspace = Workspace {
        id: workspace_id,
        source_id: source.id,
        kind: workspace_info.kind,
        package_manager: workspace_info.package_manager,
    };

    let packages: Vec<Package> = workspace_info
        .packages
        .iter()
        .map(|p| Package {
            id: ids::package_id(workspace_id, &p.name),
            workspace_id,
            name: p.name.clone(),
            relative_path: p.relative_path.clone(),
            version: p.version.clone(),
            entry_point: p.entry_point.clone(),
        })
        .collect();

    let present_file_paths: Vec<String> = crawl_result.iter().map(|f| f.relative_path.clone()).collect();
    let present_set: HashSet<&str> = present_file_paths.iter().map(|s| s.as_str()).collect();
    let reparsed_set: HashSet<&str> = scoped.iter().map(|f| f.relative_path.as_str()).collect();

    // Seed the symbol table with everything this source already knows about,
    // minus the files we're about to reparse (their truth for this run comes
    // from the fresh parse, not the last commit).
    let stored = store.load_node_lookup(workspace_id).await?;
    let mut table = SymbolTable::default();
    let mut known_file_nodes: HashMap<String, NodeId> = HashMap::new();
    for (id, qualified_name, name, file_path) in stored {
        if !present_set.contains(file_path.as_str()) || reparsed_set.contains(file_path.as_str()) {
            continue;
        }
        if qualified_name == file_path {
            table.by_file_path.insert(file_path.clone(), id);
            known_file_nodes.insert(file_path, id);
        }
        table.by_qualified_name.insert(qualified_name, id);
        table.by_name.insert(name, id);
    }

    let registry = Arc::new(ParserRegistry::new());
    let pool_size = input.worker_pool_size.max(1);
    let parsed_files = parse_files_bounded(Arc::clone(&registry), &scoped, pool_size).await;

    let mut nodes: Vec<Node> = Vec::new();
    let mut raw_edges: Vec<(NodeId, crate::parser::RawEdgeDescriptor)> = Vec::new();
    let mut node_package: HashMap<NodeId, Option<PackageId>> = HashMap::new();
    let mut file_nodes: HashMap<String, NodeId> = HashMap::new();
    let mut parse_failures = 0usize;
    let mut files_parsed = 0usize;

    for (file, outcome) in scoped.iter().zip(parsed_files) {
        let parsed = match outcome {
            FileParseOutcome::Parsed(p) => p,
            FileParseOutcome::Unsupported => continue,
            FileParseOutcome::Failed => {
                parse_failures += 1;
                continue;
            }
        };
        files_parsed += 1;

        let package_id = package_for_file(&file.relative_path, &packages);
        let file_node_id = ids::node_id(source.id, &file.relative_path, &file.relative_path);

        file_nodes.insert(file.relative_path.clone(), file_node_id);
        known_file_nodes.insert(file.relative_path.clone(), file_node_id);
        table.by_file_path.insert(file.relative_path.clone(), file_node_id);
        node_package.insert(file_node_id, package_id);

        nodes.push(Node {
            id: file_node_id,
            workspace_id,
            package_id,
            file_path: file.relative_path.clone(),
            name: file.relative_path.clone(),
            qualified_name: file.relative_path.clone(),
            kind: NodeKind::File,
            language: file.extension.clone(),
            signature: None,
            start_line: 1,
            end_line: 1,
            source_text: String::new(),
            docstring: None,
            body_hash: embedder::body_hash(&file.relative_path),
            embedding: None,
            updated_at: Utc::now(),
        });

        let mut descriptor_ids: HashMap<String, NodeId> = HashMap::new();
        for descriptor in &parsed.nodes {
            let node_id = ids::node_id(source.id, &file.relative_path, &descriptor.qualified_name);
            descriptor_ids.insert(descriptor.qualified_name.clone(), node_id);
            table.by_qualified_name.insert(descriptor.qualified_name.clone(), node_id);
            table.by_name.insert(descriptor.name.clone(), node_id);
            node_package.insert(node_id, package_id);

            nodes.push(Node {
                id: node_id,
                workspace_id,
                package_id,
                file_path: file.relative_path.clone(),
                name: descriptor.name.clone(),
                qualified_name: descriptor.qualified_name.clone(),
                kind: descriptor.kind,
                language: descriptor.language.clone(),
                signature: descriptor.signature.clone(),
                start_line: descriptor.start_line,
                end_line: descriptor.end_line,
                source_text: descriptor.source_text.clone(),
                docstring: descriptor.docstring.clone(),
                body_hash: embedder::body_hash(
                    &embedder::prepare_text(&EmbedInput {
                        qualified_name: descriptor.qualified_name.clone(),
                        signature: descriptor.signature.clone(),
                        docstring: descriptor.docstring.clone(),
                        source_text: descriptor.source_text.clone(),
                    })
                    .text,
                ),
                embedding: None,
                updated_at: Utc::now(),
            });
        }

        for edge in parsed.edges {
            // The degenerate file -> "<module>" contains edge carries no
            // resolvable target; every real symbol already gets its own
            // file -> qualified_name contains edge below it in the list.
            if edge.kind == EdgeKind::Contains && edge.target == "<module>" {
                continue;
            }
            let source_node = if edge.source == "<module>" || edge.source == file.relative_path {
                file_node_id
            } else {
                descriptor_ids.get(&edge.source).copied().unwrap_or(file_node_id)
            };
            raw_edges.push((source_node, edge));
        }
    }

    let outcome = resolver::resolve_intra_source(&raw_edges, &table, &workspace_info);

    let mut edges: Vec<Edge> = outcome
        .resolved
        .iter()
        .map(|r| Edge {
            id: ids::edge_id(r.source_node, r.target_node, r.kind),
            source_node: r.source_node,
            target_node: r.target_node,
            kind: r.kind,
            weight: r.kind.weight(),
            line: r.line,
        })
        .collect();

    // Package-level depends_on edges, derived from resolved import edges
    // whose endpoints fall in different packages (computed here rather than
    // trusting the resolver's package_dependencies field, which only ever
    // sees the synthetic "<module>" source string and so cannot tell which
    // package an import came from). `edges` rows connect nodes, not packages,
    // so each package is represented by one anchor node: its entry point's
    // file node when known, falling back to any file node seen for it.
    let mut package_anchor: HashMap<PackageId, NodeId> = HashMap::new();
    for pkg in &packages {
        if let Some(entry) = &pkg.entry_point {
            if let Some(id) = known_file_nodes.get(entry).or_else(|| file_nodes.get(entry)) {
                package_anchor.insert(pkg.id, *id);
            }
        }
    }
    for node in &nodes {
        if node.kind != NodeKind::File {
            continue;
        }
        if let Some(pkg_id) = node.package_id {
            package_anchor.entry(pkg_id).or_insert(node.id);
        }
    }

    let mut package_edges: HashSet<(PackageId, PackageId)> = HashSet::new();
    for r in &outcome.resolved {
        if r.kind != EdgeKind::Imports {
            continue;
        }
        let (Some(from_pkg), Some(to_pkg)) = (
            node_package.get(&r.source_node).copied().flatten(),
            node_package.get(&r.target_node).copied().flatten(),
        ) else {
            continue;
        };
        if from_pkg != to_pkg {
            package_edges.insert((from_pkg, to_pkg));
        }
    }
    for (from_pkg, to_pkg) in package_edges {
        let (Some(&from_node), Some(&to_node)) = (package_anchor.get(&from_pkg), package_anchor.get(&to_pkg)) else {
            debug!(?from_pkg, ?to_pkg, "skipping package depends_on edge, no anchor node for one or both packages");
            continue;
        };
        edges.push(Edge {
            id: ids::edge_id(from_node, to_node, EdgeKind::DependsOn),
            source_node: from_node,
            target_node: to_node,
            kind: EdgeKind::DependsOn,
            weight: EdgeKind::DependsOn.weight(),
            line: None,
        });
    }

    let unresolved: Vec<UnresolvedReference> = outcome
        .unresolved
        .iter()
        .map(|u| UnresolvedReference {
            id: ids::unresolved_id(u.node_id, &u.raw_text, u.kind),
            node_id: u.node_id,
            raw_text: u.raw_text.clone(),
            kind: u.kind,
            line: u.line,
        })
        .collect();

    let previous_embeddings = store.load_embedding_state(workspace_id).await?;
    let embed_inputs: Vec<EmbedInput> = nodes
        .iter()
        .filter(|n| n.kind != NodeKind::File)
        .map(|n| EmbedInput {
            qualified_name: n.qualified_name.clone(),
            signature: n.signature.clone(),
            docstring: n.docstring.clone(),
            source_text: n.source_text.clone(),
        })
        .collect();
    let embeddings = embedder.embed_changed(&embed_inputs, &previous_embeddings).await?;
    for node in &mut nodes {
        if let Some(vector) = embeddings.get(&node.qualified_name) {
            node.embedding = Some(vector.clone());
        }
    }

    let counts = store
        .commit(&workspace, &packages, &nodes, &edges, &unresolved, &present_file_paths)
        .await?;

    known_file_nodes.extend(file_nodes);

    Ok(SourceIndexOutcome {
        files_crawled: crawl_result.len(),
        files_parsed,
        parse_failures,
        commit: counts,
        current_commit: change_set.current_commit,
        current_branch: change_set.current_branch,
        workspace_info: Some(workspace_info),
        file_nodes: known_file_nodes,
        unresolved: outcome.unresolved,
    })
}

enum FileParseOutcome {
    Unsupported,
    Failed,
    Parsed(ParseResult),
}

/// Parse every file in `scoped` through the registry, at most `pool_size`
/// files in flight at once (§5's bounded parser worker pool). Tree-sitter
/// parsing is CPU-bound, so each parse runs on a blocking-pool thread; a
/// semaphore permit, not the blocking pool itself, is what bounds
/// concurrency, since the blocking pool is sized independently by the
/// runtime. Returns outcomes in the same order as `scoped`.
async fn parse_files_bounded(
    registry: Arc<ParserRegistry>,
    scoped: &[CrawledFile],
    pool_size: usize,
) -> Vec<FileParseOutcome> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(pool_size));
    let mut joins = JoinSet::new();

    for (index, file) in scoped.iter().enumerate() {
        if !registry.supports_file(&file.absolute_path) {
            continue;
        }
        let registry = Arc::clone(&registry);
        let semaphore = Arc::clone(&semaphore);
        let absolute_path = file.absolute_path.clone();
        let relative_path = file.relative_path.clone();
        joins.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let parsed = tokio::task::spawn_blocking(move || {
                let bytes = std::fs::read(&absolute_path).ok()?;
                registry.parse(&relative_path, &bytes).ok()
            })
            .await
            .unwrap_or(None);
            (index, parsed)
        });
    }

    let mut outcomes: Vec<FileParseOutcome> = scoped.iter().map(|_| FileParseOutcome::Unsupported).collect();
    while let Some(result) = joins.join_next().await {
        let (index, parsed) = result.expect("parse task panicked");
        outcomes[index] = match parsed {
            Some(p) => FileParseOutcome::Parsed(p),
            None => FileParseOutcome::Failed,
        };
    }
    outcomes
}

/// Longest-relative-path-prefix match against the workspace's detected
/// packages; `"."` (the standalone fallback package) matches everything.
fn package_for_file(relative_path: &str, packages: &[Package]) -> Option<PackageId> {
    packages
        .iter()
        .filter(|p| {
            p.relative_path == "."
                || relative_path == p.relative_path
                || relative_path.starts_with(&format!("{}/", p.relative_path))
        })
        .max_by_key(|p| p.relative_path.len())
        .map(|p| p.id)
}

/// Run cross-source resolution for a project: match every source's residual
/// unresolved imports against every other source's alias map and file node
/// table, write the newly resolved edges, and drop the now-stale unresolved
/// rows. Returns the count of edges resolved this way.
pub async fn resolve_project_cross_source(
    store: &GraphStore,
    outcomes: &[(Source, SourceIndexOutcome)],
) -> Result<usize> {
    let mut resolved_count = 0;

    for (i, (_, outcome)) in outcomes.iter().enumerate() {
        if outcome.unresolved.is_empty() {
            continue;
        }

        let others: Vec<(WorkspaceInfo, HashMap<String, NodeId>)> = outcomes
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .filter_map(|(_, (_, other))| {
                other
                    .workspace_info
                    .clone()
                    .map(|info| (info, other.file_nodes.clone()))
            })
            .collect();

        for u in &outcome.unresolved {
            let resolved = resolver::resolve_cross_source(std::slice::from_ref(u), &others);
            let Some(r) = resolved.into_iter().next() else { continue };

            let edge = Edge {
                id: ids::edge_id(r.source_node, r.target_node, r.kind),
                source_node: r.source_node,
                target_node: r.target_node,
                kind: r.kind,
                weight: r.kind.weight(),
                line: r.line,
            };
            store.upsert_edge(&edge).await?;
            store
                .delete_unresolved(u.node_id, &u.raw_text, &u.kind.to_string())
                .await?;
            resolved_count += 1;
        }
    }

    Ok(resolved_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pkg(relative_path: &str) -> Package {
        Package {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: relative_path.to_string(),
            relative_path: relative_path.to_string(),
            version: None,
            entry_point: None,
        }
    }

    #[test]
    fn package_for_file_picks_longest_matching_prefix() {
        let packages = vec![pkg("."), pkg("packages/core"), pkg("packages/core/util")];
        let hit = package_for_file("packages/core/util/format.ts", &packages).unwrap();
        assert_eq!(hit, packages[2].id);
    }

    #[test]
    fn package_for_file_falls_back_to_standalone_root() {
        let packages = vec![pkg(".")];
        let hit = package_for_file("src/main.go", &packages).unwrap();
        assert_eq!(hit, packages[0].id);
    }

    #[test]
    fn package_for_file_returns_none_without_a_match() {
        let packages = vec![pkg("packages/core")];
        assert!(package_for_file("apps/web/index.ts", &packages).is_none());
    }

    fn crawled(dir: &std::path::Path, relative_path: &str, contents: &str) -> CrawledFile {
        let absolute_path = dir.join(relative_path);
        std::fs::write(&absolute_path, contents).unwrap();
        CrawledFile {
            absolute_path,
            relative_path: relative_path.to_string(),
            extension: relative_path.rsplit('.').next().unwrap_or_default().to_string(),
            size: contents.len() as u64,
        }
    }

    #[tokio::test]
    async fn parse_files_bounded_skips_unsupported_and_counts_failures_separately() {
        let dir = tempfile::tempdir().unwrap();
        let good_a = crawled(dir.path(), "a.ts", "export const a = 1;");
        let good_b = crawled(dir.path(), "b.ts", "export const b = 2;");
        let unsupported = crawled(dir.path(), "README.md", "docs");
        let missing = CrawledFile {
            absolute_path: dir.path().join("missing.ts"),
            relative_path: "missing.ts".to_string(),
            extension: "ts".to_string(),
            size: 0,
        };

        let scoped = vec![good_a, unsupported, good_b, missing];
        let registry = Arc::new(ParserRegistry::new());
        let outcomes = parse_files_bounded(registry, &scoped, 2).await;

        assert_eq!(outcomes.len(), 4);
        assert!(matches!(outcomes[0], FileParseOutcome::Parsed(_)));
        assert!(matches!(outcomes[1], FileParseOutcome::Unsupported));
        assert!(matches!(outcomes[2], FileParseOutcome::Parsed(_)));
        assert!(matches!(outcomes[3], FileParseOutcome::Failed));
    }
}
