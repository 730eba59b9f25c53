use super::{LanguageParser, NodeDescriptor, ParseResult, RawEdgeDescriptor};
use codetrace_core::{EdgeKind, Error, NodeKind, Result};
use tree_sitter::{Node, Parser, TreeCursor};

/// Go parser backed by tree-sitter.
pub struct GoParser;

impl GoParser {
    pub fn new() -> Self {
        Self
    }

    fn create_parser() -> Result<Parser> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| Error::Parse {
                file: String::new(),
                message: format!("failed to load Go grammar: {e}"),
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

    fn node_signature(node: &Node, source: &[u8]) -> Option<String> {
        Self::node_text(node, source).lines().next().map(|l| l.trim().to_string())
    }

    /// Collect consecutive preceding `//` line comments as the doc comment,
    /// matching Go's convention that a doc comment is the unbroken comment
    /// block directly above a declaration.
    fn doc_comments(node: &Node, source: &[u8]) -> Option<String> {
        let mut sibling = node.prev_sibling();
        let mut comments = Vec::new();
        while let Some(prev) = sibling {
            if prev.kind() == "comment" {
                let text = Self::node_text(&prev, source).trim();
                comments.push(text.strip_prefix("//").unwrap_or(text).trim().to_string());
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

    /// Method receiver type, e.g. `func (s *Server) Handle()` -> `Server`.
    fn receiver_type(node: &Node, source: &[u8]) -> Option<String> {
        let receiver = node.child_by_field_name("receiver")?;
        let mut cursor = receiver.walk();
        for param in receiver.children(&mut cursor) {
            if param.kind() == "parameter_declaration" {
                if let Some(ty) = param.child_by_field_name("type") {
                    let text = Self::node_text(&ty, source).trim_start_matches('*');
                    return Some(text.to_string());
                }
            }
        }
        None
    }

    fn walk_top_level(
        cursor: &mut TreeCursor,
        source: &[u8],
        file_path: &str,
        nodes: &mut Vec<NodeDescriptor>,
        edges: &mut Vec<RawEdgeDescriptor>,
    ) {
        loop {
            let node = cursor.node();
            match node.kind() {
                "function_declaration" => {
                    if let Some(name_node) = node.child_by_field_name("name") {
                        let name = Self::node_text(&name_node, source).to_string();
                        nodes.push(NodeDescriptor {
                            name: name.clone(),
                            qualified_name: name,
                            kind: NodeKind::Function,
                            language: "go".to_string(),
                            signature: Self::node_signature(&node, source),
                            start_line: node.start_position().row as u32 + 1,
                            end_line: node.end_position().row as u32 + 1,
                            source_text: Self::node_text(&node, source).to_string(),
                            docstring: Self::doc_comments(&node, source),
                        });
                    }
                }
                "method_declaration" => {
                    if let Some(name_node) = node.child_by_field_name("name") {
                        let method = Self::node_text(&name_node, source).to_string();
                        let qualified_name = match Self::receiver_type(&node, source) {
                            Some(recv) => format!("{recv}.{method}"),
                            None => method.clone(),
                        };
                        nodes.push(NodeDescriptor {
                            name: method,
                            qualified_name,
                            kind: NodeKind::Method,
                            language: "go".to_string(),
                            signature: Self::node_signature(&node, source),
                            start_line: node.start_position().row as u32 + 1,
                            end_line: node.end_position().row as u32 + 1,
                            source_text: Self::node_text(&node, source).to_string(),
                            docstring: Self::doc_comments(&node, source),
                        });
                    }
                }
                "type_declaration" => {
                    Self::collect_type_spec(&node, source, nodes);
                }
                "import_declaration" => {
                    Self::collect_imports(&node, source, edges);
                }
                _ => {}
            }

            Self::walk_calls_in(&node, source, edges);

            if !cursor.goto_next_sibling() {
                break;
            }
        }
        let _ = file_path;
    }

    fn collect_type_spec(node: &Node, source: &[u8], nodes: &mut Vec<NodeDescriptor>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() != "type_spec" {
                continue;
            }
            let Some(name_node) = child.child_by_field_name("name") else { continue };
            let name = Self::node_text(&name_node, source).to_string();
            let kind = child
                .child_by_field_name("type")
                .map(|t| match t.kind() {
                    "interface_type" => NodeKind::Interface,
                    _ => NodeKind::Type,
                })
                .unwrap_or(NodeKind::Type);
            nodes.push(NodeDescriptor {
                name: name.clone(),
                qualified_name: name,
                kind,
                language: "go".to_string(),
                signature: Self::node_signature(&child, source),
                start_line: child.start_position().row as u32 + 1,
                end_line: child.end_position().row as u32 + 1,
                source_text: Self::node_text(&child, source).to_string(),
                docstring: Self::doc_comments(node, source),
            });
        }
    }

    fn collect_imports(node: &Node, source: &[u8], edges: &mut Vec<RawEdgeDescriptor>) {
        let mut stack = vec![*node];
        while let Some(n) = stack.pop() {
            if n.kind() == "interpreted_string_literal" {
                let raw = Self::node_text(&n, source).trim_matches('"');
                edges.push(RawEdgeDescriptor {
                    source: "<module>".to_string(),
                    target: raw.to_string(),
                    kind: EdgeKind::Imports,
                    line: Some(n.start_position().row as u32 + 1),
                });
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

    fn walk_calls_in(node: &Node, source: &[u8], edges: &mut Vec<RawEdgeDescriptor>) {
        let caller = match node.kind() {
            "function_declaration" => node
                .child_by_field_name("name")
                .map(|n| Self::node_text(&n, source).to_string()),
            "method_declaration" => node.child_by_field_name("name").map(|n| {
                let method = Self::node_text(&n, source).to_string();
                match Self::receiver_type(node, source) {
                    Some(recv) => format!("{recv}.{method}"),
                    None => method,
                }
            }),
            _ => None,
        };
        let Some(caller) = caller else { return };

        let mut stack = vec![*node];
        while let Some(n) = stack.pop() {
            if n.kind() == "call_expression" {
                if let Some(func) = n.child_by_field_name("function") {
                    let target = match func.kind() {
                        "selector_expression" => func
                            .child_by_field_name("field")
                            .map(|f| Self::node_text(&f, source).to_string()),
                        _ => Some(Self::node_text(&func, source).to_string()),
                    };
                    if let Some(target) = target {
                        edges.push(RawEdgeDescriptor {
                            source: caller.clone(),
                            target,
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

impl LanguageParser for GoParser {
    fn extensions(&self) -> &[&str] {
        &["go"]
    }

    fn parse(&self, file_path: &str, source: &[u8]) -> Result<ParseResult> {
        let tree = Self::parse_tree(source).map_err(|_| Error::Parse {
            file: file_path.to_string(),
            message: "failed to parse Go source".into(),
        })?;
        let root = tree.root_node();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let mut cursor = root.walk();
        if cursor.goto_first_child() {
            Self::walk_top_level(&mut cursor, source, file_path, &mut nodes, &mut edges);
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
    fn extracts_function_and_method() {
        let src = br#"package main

// Greet returns a greeting.
func Greet(name string) string {
	return "hello " + name
}

type Server struct {
	Name string
}

func (s *Server) Start() {
	Greet(s.Name)
}
"#;
        let parser = GoParser::new();
        let result = parser.parse("main.go", src).unwrap();
        let names: Vec<_> = result.nodes.iter().map(|n| n.qualified_name.as_str()).collect();
        assert!(names.contains(&"Greet"));
        assert!(names.contains(&"Server"));
        assert!(names.contains(&"Server.Start"));

        let greet = result.nodes.iter().find(|n| n.qualified_name == "Greet").unwrap();
        assert_eq!(greet.docstring.as_deref(), Some("Greet returns a greeting."));
    }

    #[test]
    fn extracts_call_edge_with_receiver_qualification() {
        let src = br#"package main

func helper() {}

type T struct{}

func (t *T) Run() {
	helper()
}
"#;
        let parser = GoParser::new();
        let result = parser.parse("x.go", src).unwrap();
        assert!(result
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Calls && e.source == "T.Run" && e.target == "helper"));
    }
}
