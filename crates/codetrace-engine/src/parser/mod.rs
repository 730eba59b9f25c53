//! Parser Contract (component D).
//!
//! A parser maps a single file's bytes to a [`ParseResult`]. Parsing is
//! polymorphic over the capability set `parse(filePath, bytes) ->
//! ParseResult`; the rest of the core treats each parser as a black box
//! keyed by file extension, and new languages plug in by implementing
//! [`LanguageParser`] — the pipeline does not know the language.
pub mod go;
pub mod registry;
pub mod typescript;

pub use registry::ParserRegistry;

use codetrace_core::{EdgeKind, NodeKind, Result};

/// A node descriptor produced by a parser, before ID assignment. IDs are
/// assigned deterministically by the graph builder, not the parser.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    pub language: String,
    pub signature: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub source_text: String,
    pub docstring: Option<String>,
}

/// A raw edge descriptor, before import/call resolution. `source` is either
/// a qualified name or a file path (for `contains` edges out of the file
/// node); `target` is either a qualified name or a raw import string.
#[derive(Debug, Clone)]
pub struct RawEdgeDescriptor {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub nodes: Vec<NodeDescriptor>,
    pub edges: Vec<RawEdgeDescriptor>,
}

/// Per-language parser contract. Implementations are independent of one
/// another; the pipeline treats parsing per file as embarrassingly
/// parallel (see the orchestrator's bounded worker pool).
pub trait LanguageParser: Send + Sync {
    /// File extensions (without the leading dot) this parser handles.
    fn extensions(&self) -> &[&str];

    fn parse(&self, file_path: &str, source: &[u8]) -> Result<ParseResult>;
}
