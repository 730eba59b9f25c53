use super::{LanguageParser, NodeDescriptor, ParseResult, RawEdgeDescriptor};
use codetrace_core::{EdgeKind, Error, NodeKind, Result};
use tree_sitter::{Node, Parser, TreeCursor};

/// TypeScript/JavaScript parser backed by tree-sitter. Handles `.ts`, `.tsx`,
/// `.js`, `.jsx` with the TSX grammar, which is a superset that also parses
/// plain TS/JS.
pub struct TypeScriptParser;

impl TypeScriptParser {
    pub fn new() -> Self {
        Self
    }

    fn create_parser() -> Result<Parser> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TSX.into())
            .map_err(|e| Error::Parse {
                file: String::new(),
                message: format!("failed to load TSX grammar: {e}"),
            })?;
        Ok(parser)
    }

    fn parse_tree(source: &[u8]) -> Result<tree_sitter::Tree> {
        let mut parser = Self::create_parser()?;
        parser.parse(source, None).ok_or_else(|| Error::Parse {
            file: String::new(),
            message: "tree-sitter parse returned None".into(),
        })
    }

    fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
        std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
    }

    fn node_name(node: &Node, source: &[u8]) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| Self::node_text(&n, source).to_string())
    }

    fn node_signature(node: &Node, source: &[u8]) -> Option<String> {
        let text = Self::node_text(node, source);
        text.lines().next().map(|l| l.trim().to_string())
    }

    /// Collect a preceding `/** ... */` or consecutive `//` block as the
    /// docstring, mirroring how doc comments are gathered for other
    /// languages in this pipeline — walk previous siblings while they're
    /// comment nodes.
    fn doc_comments(node: &Node, source: &[u8]) -> Option<String> {
        let mut sibling = node.prev_sibling();
        let mut comments = Vec::new();
        while let Some(prev) = sibling {
            if prev.kind() == "comment" {
                let text = Self::node_text(&prev, source).trim();
                let stripped = text
                    .strip_prefix("/**")
                    .and_then(|s| s.strip_suffix("*/"))
                    .map(|s| {
                        s.lines()
                            .map(|l| l.trim().trim_start_matches('*').trim())
                            .collect::<Vec<_>>()
                            .join("\n")
                            .trim()
                            .to_string()
                    })
                    .or_else(|| {
                        text.strip_prefix("//").map(|s| s.trim().to_string())
                    })
                    .unwrap_or_else(|| text.to_string());
                comments.push(stripped);
                sibling = prev.prev_sibling();
                continue;
            }
            break;
        }
        if comments.is_empty() {
            None
        } else {
            comments.reverse();
            Some(comments.join("\n"))
        }
    }

    fn map_node_kind(kind: &str) -> Option<NodeKind> {
        match kind {
            "function_declaration" | "generator_function_declaration" | "arrow_function" => {
                Some(NodeKind::Function)
            }
            "method_definition" => Some(NodeKind::Method),
            "class_declaration" => Some(NodeKind::Class),
            "interface_declaration" => Some(NodeKind::Interface),
            "type_alias_declaration" => Some(NodeKind::Type),
            "module" | "internal_module" => Some(NodeKind::Module),
            _ => None,
        }
    }

    /// Walk only top-level declarations plus one level into class bodies
    /// for methods, qualifying method names as `Class.method`.
    fn walk_declarations(
        cursor: &mut TreeCursor,
        source: &[u8],
        language: &str,
        out: &mut Vec<NodeDescriptor>,
        edges: &mut Vec<RawEdgeDescriptor>,
        enclosing_class: Option<&str>,
    ) {
        loop {
            let node = cursor.node();
            if let Some(kind) = Self::map_node_kind(node.kind()) {
                if let Some(name) = Self::node_name(&node, source) {
                    let qualified_name = match enclosing_class {
                        Some(class) => format!("{class}.{name}"),
                        None => name.clone(),
                    };
                    out.push(NodeDescriptor {
                        name: name.clone(),
                        qualified_name: qualified_name.clone(),
                        kind,
                        language: language.to_string(),
                        signature: Self::node_signature(&node, source),
                        start_line: node.start_position().row as u32 + 1,
                        end_line: node.end_position().row as u32 + 1,
                        source_text: Self::node_text(&node, source).to_string(),
                        docstring: Self::doc_comments(&node, source),
                    });

                    if kind == NodeKind::Class {
                        if let Some(body) = node.child_by_field_name("body") {
                            let mut child_cursor = body.walk();
                            if child_cursor.goto_first_child() {
                                Self::walk_declarations(
                                    &mut child_cursor,
                                    source,
                                    language,
                                    out,
                                    edges,
                                    Some(&name),
                                );
                            }
                        }
                        if let Some(heritage) = node.child_by_field_name("heritage") {
                            Self::collect_heritage(&heritage, source, &name, edges);
                        }
                    }
                }
            }

            if node.kind() == "import_statement" {
                Self::collect_import(&node, source, edges);
            }

            Self::walk_calls_in(&node, source, enclosing_class, edges);

            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }

    fn collect_heritage(node: &Node, source: &[u8], class_name: &str, edges: &mut Vec<RawEdgeDescriptor>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "extends_clause" || child.kind() == "implements_clause" {
                let kind = if child.kind() == "extends_clause" {
                    EdgeKind::Extends
                } else {
                    EdgeKind::Implements
                };
                let mut inner = child.walk();
                for target in child.children(&mut inner) {
                    if target.kind() == "identifier" || target.kind() == "type_identifier" {
                        edges.push(RawEdgeDescriptor {
                            source: class_name.to_string(),
                            target: Self::node_text(&target, source).to_string(),
                            kind,
                            line: Some(child.start_position().row as u32 + 1),
                        });
                    }
                }
            }
        }
    }

    fn collect_import(node: &Node, source: &[u8], edges: &mut Vec<RawEdgeDescriptor>) {
        if let Some(source_clause) = node.child_by_field_name("source") {
            let raw = Self::node_text(&source_clause, source).trim_matches(|c| c == '"' || c == '\'');
            edges.push(RawEdgeDescriptor {
                source: "<module>".to_string(),
                target: raw.to_string(),
                kind: EdgeKind::Imports,
                line: Some(node.start_position().row as u32 + 1),
            });
        }
    }

    fn walk_calls_in(node: &Node, source: &[u8], caller: Option<&str>, edges: &mut Vec<RawEdgeDescriptor>) {
        let mut stack = vec![*node];
        while let Some(n) = stack.pop() {
            if n.kind() == "call_expression" {
                if let Some(callee) = n.child_by_field_name("function") {
                    let name = match callee.kind() {
                        "member_expression" => callee
                            .child_by_field_name("property")
                            .map(|p| Self::node_text(&p, source).to_string()),
                        _ => Some(Self::node_text(&callee, source).to_string()),
                    };
                    if let Some(name) = name {
                        edges.push(RawEdgeDescriptor {
                            source: caller.unwrap_or("<module>").to_string(),
                            target: name,
                            kind: EdgeKind::Calls,
                            line: Some(n.start_position().row as u32 + 1),
                        });
                    }
                }
            }
            let mut cursor = n.walk();
            if cursor.goto_first_child() {
                loop {
                    stack.push(cursor.node());
                    if !cursor.goto_next_sibling() {
                        break;
                    }
                }
            }
        }
    }
}

impl LanguageParser for TypeScriptParser {
    fn extensions(&self) -> &[&str] {
        &["ts", "tsx", "js", "jsx"]
    }

    fn parse(&self, file_path: &str, source: &[u8]) -> Result<ParseResult> {
        let tree = Self::parse_tree(source).map_err(|_| Error::Parse {
            file: file_path.to_string(),
            message: "failed to parse TypeScript/JavaScript source".into(),
        })?;
        let root = tree.root_node();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        edges.push(RawEdgeDescriptor {
            source: file_path.to_string(),
            target: "<module>".to_string(),
            kind: EdgeKind::Contains,
            line: None,
        });

        let mut cursor = root.walk();
        if cursor.goto_first_child() {
            Self::walk_declarations(&mut cursor, source, "typescript", &mut nodes, &mut edges, None);
        }

        for n in &nodes {
            edges.push(RawEdgeDescriptor {
                source: file_path.to_string(),
                target: n.qualified_name.clone(),
                kind: EdgeKind::Contains,
                line: Some(n.start_line),
            });
        }

        Ok(ParseResult { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_function_and_class_with_method() {
        let src = br#"
/** Adds two numbers. */
function add(a, b) {
    return a + b;
}

class Greeter {
    greet() {
        return add(1, 2);
    }
}
"#;
        let parser = TypeScriptParser::new();
        let result = parser.parse("src/index.ts", src).unwrap();
        let names: Vec<_> = result.nodes.iter().map(|n| n.qualified_name.as_str()).collect();
        assert!(names.contains(&"add"));
        assert!(names.contains(&"Greeter"));
        assert!(names.contains(&"Greeter.greet"));

        let add_node = result.nodes.iter().find(|n| n.qualified_name == "add").unwrap();
        assert_eq!(add_node.docstring.as_deref(), Some("Adds two numbers."));
    }

    #[test]
    fn extracts_import_edge() {
        let src = b"import { readFile } from 'fs';\n";
        let parser = TypeScriptParser::new();
        let result = parser.parse("src/index.ts", src).unwrap();
        assert!(result
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Imports && e.target == "fs"));
    }
}
