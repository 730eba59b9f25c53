use super::{LanguageParser, ParseResult};
use codetrace_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Central registry that maps file extensions to their language parsers.
///
/// Each parser is wrapped in an `Arc` so multiple extensions (e.g. "ts" and
/// "tsx") can share the same parser instance without cloning.
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    /// Create a new registry with the crawler's initial supported set
    /// (TypeScript/JavaScript, Go) registered.
    pub fn new() -> Self {
        let mut parsers: HashMap<String, Arc<dyn LanguageParser>> = HashMap::new();

        let ts = Arc::new(super::typescript::TypeScriptParser::new()) as Arc<dyn LanguageParser>;
        for ext in ts.extensions() {
            parsers.insert(ext.to_string(), Arc::clone(&ts));
        }

        let go = Arc::new(super::go::GoParser::new()) as Arc<dyn LanguageParser>;
        for ext in go.extensions() {
            parsers.insert(ext.to_string(), Arc::clone(&go));
        }

        Self { parsers }
    }

    pub fn supports_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.parsers.contains_key(ext))
            .unwrap_or(false)
    }

    /// Parse a source file, selecting the parser by file extension.
    ///
    /// Returns `Error::UnsupportedLanguage` when no parser is registered for
    /// the extension (or the path has no extension).
    pub fn parse(&self, path: &str, source: &[u8]) -> Result<ParseResult> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::UnsupportedLanguage("no extension".into()))?;

        let parser = self
            .parsers
            .get(ext)
            .ok_or_else(|| Error::UnsupportedLanguage(ext.into()))?;

        parser.parse(path, source)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_initial_extension_set() {
        let reg = ParserRegistry::new();
        for ext in ["ts", "tsx", "js", "jsx", "go"] {
            assert!(reg.supports_file(Path::new(&format!("a.{ext}"))), "expected support for .{ext}");
        }
        assert!(!reg.supports_file(Path::new("a.rs")));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let reg = ParserRegistry::new();
        let err = reg.parse("a.rs", b"fn main() {}").unwrap_err();
        assert!(matches!(err, Error::UnsupportedLanguage(_)));
    }
}
