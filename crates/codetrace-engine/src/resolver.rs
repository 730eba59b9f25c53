//! Import Resolver (component E).
//!
//! Two phases. Intra-source resolution rewrites raw import/call edges
//! against a workspace's package alias map, tsconfig path map, and relative
//! path rules, into resolved node-to-node edges plus a residual unresolved
//! list. Cross-source resolution (run once per project, after every source
//! has been indexed) matches remaining unresolved references against other
//! sources' alias maps.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use codetrace_core::{EdgeKind, NodeId};

use crate::parser::RawEdgeDescriptor;
use crate::workspace_detect::WorkspaceInfo;

const RESOLVABLE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "go"];

#[derive(Debug, Clone)]
pub struct ResolvedEdge {
    pub source_node: NodeId,
    pub target_node: NodeId,
    pub kind: EdgeKind,
    pub line: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct UnresolvedRaw {
    pub node_id: NodeId,
    pub raw_text: String,
    pub kind: EdgeKind,
    pub line: Option<u32>,
}

/// A lookup from symbol names (both simple and qualified) and file paths to
/// the deterministic node id that was assigned to them, scoped to one
/// source. Built by the graph builder before calling the resolver.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub by_qualified_name: HashMap<String, NodeId>,
    pub by_name: HashMap<String, NodeId>,
    pub by_file_path: HashMap<String, NodeId>,
}

pub struct ResolveOutcome {
    pub resolved: Vec<ResolvedEdge>,
    pub unresolved: Vec<UnresolvedRaw>,
    /// Synthesized package -> package `depends_on` edges, keyed by package
    /// node id pairs the graph builder already knows how to look up.
    pub package_dependencies: Vec<(String, String)>,
}

/// Resolve the raw edges produced by parsing a single source's changed
/// files, given that source's symbol table and workspace info.
pub fn resolve_intra_source(
    raw_edges: &[(NodeId, RawEdgeDescriptor)],
    table: &SymbolTable,
    workspace: &WorkspaceInfo,
) -> ResolveOutcome {
    let mut resolved = Vec::new();
    let mut unresolved = Vec::new();
    let mut package_dependencies = Vec::new();

    for (source_node, edge) in raw_edges {
        match edge.kind {
            EdgeKind::Calls | EdgeKind::Extends | EdgeKind::Implements | EdgeKind::UsesType | EdgeKind::Contains => {
                if let Some(target) = table
                    .by_qualified_name
                    .get(&edge.target)
                    .or_else(|| table.by_name.get(&edge.target))
                {
                    resolved.push(ResolvedEdge {
                        source_node: *source_node,
                        target_node: *target,
                        kind: edge.kind,
                        line: edge.line,
                    });
                } else {
                    unresolved.push(UnresolvedRaw {
                        node_id: *source_node,
                        raw_text: edge.target.clone(),
                        kind: edge.kind,
                        line: edge.line,
                    });
                }
            }
            EdgeKind::Imports => {
                match resolve_import(&edge.target, &edge.source, table, workspace) {
                    Some(target_node) => {
                        resolved.push(ResolvedEdge {
                            source_node: *source_node,
                            target_node,
                            kind: EdgeKind::Imports,
                            line: edge.line,
                        });
                        if let Some(pkg) = package_for_import(&edge.target, workspace) {
                            package_dependencies.push((edge.source.clone(), pkg));
                        }
                    }
                    None => unresolved.push(UnresolvedRaw {
                        node_id: *source_node,
                        raw_text: edge.target.clone(),
                        kind: EdgeKind::Imports,
                        line: edge.line,
                    }),
                }
            }
            EdgeKind::DependsOn | EdgeKind::Embeds => {
                // Synthesized directly by the graph builder / embedder; not
                // produced as raw edges by parsers.
            }
        }
    }

    ResolveOutcome {
        resolved,
        unresolved,
        package_dependencies,
    }
}

/// Cross-source resolution: match a project's still-unresolved references
/// against every other source's alias map, keyed by file node id in that
/// other source. The project is authoritative scope — cross-project
/// resolution is never attempted.
pub fn resolve_cross_source(
    unresolved: &[UnresolvedRaw],
    other_sources: &[(WorkspaceInfo, HashMap<String, NodeId>)],
) -> Vec<ResolvedEdge> {
    let mut resolved = Vec::new();
    for item in unresolved {
        if item.kind != EdgeKind::Imports {
            continue;
        }
        for (workspace, file_nodes) in other_sources {
            if let Some(entry) = workspace.alias_map.get(&item.raw_text) {
                if let Some(node) = file_nodes.get(entry) {
                    resolved.push(ResolvedEdge {
                        source_node: item.node_id,
                        target_node: *node,
                        kind: EdgeKind::Imports,
                        line: item.line,
                    });
                    break;
                }
            }
        }
    }
    resolved
}

fn resolve_import(
    raw_target: &str,
    importing_file: &str,
    table: &SymbolTable,
    workspace: &WorkspaceInfo,
) -> Option<NodeId> {
    if raw_target.starts_with('.') {
        return resolve_relative_import(raw_target, importing_file, table);
    }

    if let Some(entry) = workspace.tsconfig_alias_map.iter().find_map(|(alias, target)| {
        raw_target.strip_prefix(alias).map(|rest| format!("{target}{rest}"))
    }) {
        return resolve_by_stem(&entry, table);
    }

    if let Some(entry) = workspace.alias_map.get(raw_target) {
        return resolve_by_stem(entry, table);
    }

    // Go import paths: module_path/sub/package maps to a package's relative
    // path recorded in the alias map under the same key.
    None
}

fn resolve_relative_import(raw_target: &str, importing_file: &str, table: &SymbolTable) -> Option<NodeId> {
    let importer_dir = Path::new(importing_file).parent().unwrap_or(Path::new(""));
    let joined = normalize_path(&importer_dir.join(raw_target));
    resolve_by_stem(&joined, table)
}

fn resolve_by_stem(stem: &str, table: &SymbolTable) -> Option<NodeId> {
    if let Some(id) = table.by_file_path.get(stem) {
        return Some(*id);
    }
    for ext in RESOLVABLE_EXTENSIONS {
        let candidate = format!("{stem}.{ext}");
        if let Some(id) = table.by_file_path.get(&candidate) {
            return Some(*id);
        }
        let index_candidate = format!("{stem}/index.{ext}");
        if let Some(id) = table.by_file_path.get(&index_candidate) {
            return Some(*id);
        }
    }
    None
}

fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.components() {
        match comp.as_os_str().to_str() {
            Some(".") => {}
            Some("..") => {
                parts.pop();
            }
            Some(other) => parts.push(other),
            None => {}
        }
    }
    parts.join("/")
}

fn package_for_import(raw_target: &str, workspace: &WorkspaceInfo) -> Option<String> {
    workspace
        .packages
        .iter()
        .find(|p| raw_target == p.name || raw_target.starts_with(&format!("{}/", p.name)))
        .map(|p| p.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codetrace_core::PackageManager::Unknown;
    use codetrace_core::WorkspaceKind::Standalone;
    use uuid::Uuid;

    fn empty_workspace() -> WorkspaceInfo {
        WorkspaceInfo {
            kind: Standalone,
            package_manager: Unknown,
            packages: vec![],
            alias_map: HashMap::new(),
            tsconfig_alias_map: HashMap::new(),
        }
    }

    #[test]
    fn resolves_call_by_qualified_name() {
        let caller = Uuid::new_v4();
        let callee = Uuid::new_v4();
        let mut table = SymbolTable::default();
        table.by_qualified_name.insert("Foo.bar".into(), callee);

        let edges = vec![(
            caller,
            RawEdgeDescriptor {
                source: "Foo.baz".into(),
                target: "Foo.bar".into(),
                kind: EdgeKind::Calls,
                line: Some(10),
            },
        )];

        let outcome = resolve_intra_source(&edges, &table, &empty_workspace());
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.resolved[0].target_node, callee);
    }

    #[test]
    fn unresolved_call_is_collected_not_dropped() {
        let caller = Uuid::new_v4();
        let table = SymbolTable::default();
        let edges = vec![(
            caller,
            RawEdgeDescriptor {
                source: "Foo.baz".into(),
                target: "nonexistent".into(),
                kind: EdgeKind::Calls,
                line: None,
            },
        )];
        let outcome = resolve_intra_source(&edges, &table, &empty_workspace());
        assert!(outcome.resolved.is_empty());
        assert_eq!(outcome.unresolved.len(), 1);
        assert_eq!(outcome.unresolved[0].raw_text, "nonexistent");
    }

    #[test]
    fn resolves_relative_import_to_file_node() {
        let file_a = Uuid::new_v4();
        let file_b = Uuid::new_v4();
        let mut table = SymbolTable::default();
        table.by_file_path.insert("src/a.ts".into(), file_a);
        table.by_file_path.insert("src/b.ts".into(), file_b);

        let edges = vec![(
            file_a,
            RawEdgeDescriptor {
                source: "src/a.ts".into(),
                target: "./b".into(),
                kind: EdgeKind::Imports,
                line: Some(1),
            },
        )];
        let outcome = resolve_intra_source(&edges, &table, &empty_workspace());
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.resolved[0].target_node, file_b);
    }
}
