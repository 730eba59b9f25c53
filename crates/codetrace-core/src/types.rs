use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ── ID types ──
pub type ProjectId = Uuid;
pub type SourceId = Uuid;
pub type WorkspaceId = Uuid;
pub type PackageId = Uuid;
pub type NodeId = Uuid;
pub type EdgeId = Uuid;
pub type UnresolvedRefId = Uuid;

/// A user-visible grouping of one or more sources. Identified by a slug
/// derived from its display name (see [`crate::ids::project_id`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub slug: String,
    pub display_name: String,
    pub settings: serde_json::Value,
}

/// A local directory linked to a project. Identified by
/// `{projectID}/{slug(alias)}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub project_id: ProjectId,
    pub alias: String,
    pub path: String,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_branch: Option<String>,
    pub last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceKind {
    Monorepo,
    Standalone,
    GoWorkspace,
}

impl std::fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Monorepo => "monorepo",
            Self::Standalone => "standalone",
            Self::GoWorkspace => "go-workspace",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkspaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monorepo" => Ok(Self::Monorepo),
            "standalone" => Ok(Self::Standalone),
            "go-workspace" => Ok(Self::GoWorkspace),
            other => Err(format!("unknown WorkspaceKind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Lerna,
    Go,
    Unknown,
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
            Self::Lerna => "lerna",
            Self::Go => "go",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PackageManager {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(Self::Npm),
            "yarn" => Ok(Self::Yarn),
            "pnpm" => Ok(Self::Pnpm),
            "lerna" => Ok(Self::Lerna),
            "go" => Ok(Self::Go),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown PackageManager: {other}")),
        }
    }
}

/// The root detected within a source: one per source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub source_id: SourceId,
    pub kind: WorkspaceKind,
    pub package_manager: PackageManager,
}

/// A unit inside a workspace (npm/yarn/pnpm/lerna package or Go module/sub-package).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub relative_path: String,
    pub version: Option<String>,
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Module,
    File,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Module => "module",
            Self::File => "file",
        };
        write!(f, "{s}")
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "interface" => Ok(Self::Interface),
            "type" => Ok(Self::Type),
            "module" => Ok(Self::Module),
            "file" => Ok(Self::File),
            other => Err(format!("unknown NodeKind: {other}")),
        }
    }
}

/// A code symbol. Identified by `{sourceID}/{filePath}::{qualifiedName}`
/// (see [`crate::ids::node_id`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub workspace_id: WorkspaceId,
    pub package_id: Option<PackageId>,
    pub file_path: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    pub language: String,
    pub signature: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub source_text: String,
    pub docstring: Option<String>,
    pub body_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Contains,
    Imports,
    Calls,
    Extends,
    Implements,
    UsesType,
    DependsOn,
    Embeds,
}

impl EdgeKind {
    /// Structural kinds carry weight 1.0, referential kinds carry weight 0.5.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Contains | Self::Extends | Self::Implements | Self::DependsOn => 1.0,
            Self::Imports | Self::Calls | Self::UsesType | Self::Embeds => 0.5,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Contains => "contains",
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::UsesType => "uses_type",
            Self::DependsOn => "depends_on",
            Self::Embeds => "embeds",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(Self::Contains),
            "imports" => Ok(Self::Imports),
            "calls" => Ok(Self::Calls),
            "extends" => Ok(Self::Extends),
            "implements" => Ok(Self::Implements),
            "uses_type" => Ok(Self::UsesType),
            "depends_on" => Ok(Self::DependsOn),
            "embeds" => Ok(Self::Embeds),
            other => Err(format!("unknown EdgeKind: {other}")),
        }
    }
}

/// A directed, typed relationship between two nodes. Composite identity
/// `(source, target, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_node: NodeId,
    pub target_node: NodeId,
    pub kind: EdgeKind,
    pub weight: f64,
    pub line: Option<u32>,
}

/// A raw import/call the resolver could not map to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub id: UnresolvedRefId,
    pub node_id: NodeId,
    pub raw_text: String,
    pub kind: EdgeKind,
    pub line: Option<u32>,
}
