pub mod change_detector;
pub mod context;
pub mod crawler;
pub mod embedder;
pub mod graph;
pub mod index_source;
pub mod orchestrator;
pub mod parser;
pub mod resolver;
pub mod retrieval;
pub mod workspace_detect;

pub use change_detector::{ChangeDetectInput, ChangeSet};
pub use context::{AssembledContext, ContextAssembler, NodeBody};
pub use crawler::{crawl, CrawlOptions, CrawlResult, CrawledFile};
pub use embedder::{EmbedInput, Embedder};
pub use graph::{CommitCounts, GraphStore};
pub use index_source::{index_source, resolve_project_cross_source, SourceIndexInput, SourceIndexOutcome};
pub use orchestrator::{RunOptions, RunRegistry, RunStage, RunStatus};
pub use parser::{LanguageParser, ParseResult, ParserRegistry};
pub use resolver::{resolve_cross_source, resolve_intra_source, SymbolTable};
pub use retrieval::RetrievalEngine;
pub use workspace_detect::WorkspaceInfo;
