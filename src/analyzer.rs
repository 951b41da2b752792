//! Static complexity metrics for JavaScript sources
//!
//! Parses with tree-sitter and walks the syntax tree over an explicit stack,
//! counting logical lines (statements), decision points and dependencies for
//! the whole file and for every function in it.

use crate::error::AnalysisError;
use crate::types::{FileMetrics, FunctionMetrics};
use tree_sitter::{Node, Parser};

/// Language served by [`JsAnalyzer`]
pub const JAVASCRIPT: &str = "javascript";

const ANONYMOUS: &str = "<anonymous>";

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "generator_function",
    "arrow_function",
    "method_definition",
];

const DECLARATION_KINDS: &[&str] = &[
    "lexical_declaration",
    "variable_declaration",
    "function_declaration",
    "generator_function_declaration",
    "class_declaration",
];

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "switch_case",
    "catch_clause",
    "ternary_expression",
];

const LOGICAL_OPERATORS: &[&str] = &["&&", "||", "??"];

/// Computes metrics for the source text of one file
pub trait MetricsAnalyzer: Send {
    /// Language identifier, e.g. `javascript`
    fn language(&self) -> &str;

    /// Analyze `source`; a syntax error is a [`AnalysisError::ParseFailed`]
    fn analyze(&mut self, source: &str) -> Result<FileMetrics, AnalysisError>;
}

/// Analyzer for a language name
pub fn analyzer_for(language: &str) -> Result<Box<dyn MetricsAnalyzer>, AnalysisError> {
    match language.to_ascii_lowercase().as_str() {
        JAVASCRIPT | "js" => Ok(Box::new(JsAnalyzer::new()?)),
        other => Err(AnalysisError::UnsupportedLanguage(other.to_string())),
    }
}

/// tree-sitter based JavaScript analyzer
pub struct JsAnalyzer {
    parser: Parser,
}

impl JsAnalyzer {
    pub fn new() -> Result<Self, AnalysisError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .map_err(|e| AnalysisError::UnsupportedLanguage(format!("{}: {}", JAVASCRIPT, e)))?;
        Ok(Self { parser })
    }
}

impl MetricsAnalyzer for JsAnalyzer {
    fn language(&self) -> &str {
        JAVASCRIPT
    }

    fn analyze(&mut self, source: &str) -> Result<FileMetrics, AnalysisError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| AnalysisError::ParseFailed("parser produced no syntax tree".to_string()))?;
        let root = tree.root_node();

        if root.has_error() {
            return Err(AnalysisError::ParseFailed(describe_first_error(root)));
        }

        Ok(measure(root, source.as_bytes()))
    }
}

fn describe_first_error(root: Node) -> String {
    let mut stack = vec![root];
    let mut deepest = root;
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let what = if node.is_missing() {
                format!("missing '{}'", node.kind())
            } else {
                "unexpected syntax".to_string()
            };
            return describe_at(node, &what);
        }
        deepest = node;

        let mut cursor = node.walk();
        let children: Vec<Node> = node
            .children(&mut cursor)
            .filter(|child| child.has_error() || child.is_missing())
            .collect();
        stack.extend(children.into_iter().rev());
    }

    describe_at(deepest, "unexpected syntax")
}

fn describe_at(node: Node, what: &str) -> String {
    let at = node.start_position();
    format!("Line {}, column {}: {}", at.row + 1, at.column + 1, what)
}

fn measure(root: Node, source: &[u8]) -> FileMetrics {
    let mut file_loc = 0;
    let mut file_decisions = 0;
    let mut dependency_count = 0;
    let mut functions: Vec<FunctionMetrics> = Vec::new();

    // (node, index of the innermost enclosing function)
    let mut stack: Vec<(Node, Option<usize>)> = vec![(root, None)];

    while let Some((node, scope)) = stack.pop() {
        let kind = node.kind();

        if is_statement(node) {
            file_loc += 1;
            if let Some(i) = scope {
                functions[i].loc += 1;
            }
        }

        if is_decision(node) {
            file_decisions += 1;
            if let Some(i) = scope {
                functions[i].cyclomatic += 1;
            }
        }

        if is_dependency(node, source) {
            dependency_count += 1;
        }

        // Keyword tokens share kind names with nodes, e.g. `function`
        let child_scope = if node.is_named() && FUNCTION_KINDS.contains(&kind) {
            functions.push(FunctionMetrics {
                name: function_name(node, source),
                line: node.start_position().row + 1,
                loc: 0,
                cyclomatic: 1,
                params: parameter_count(node),
            });
            Some(functions.len() - 1)
        } else {
            scope
        };

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev().map(|child| (child, child_scope)));
    }

    FileMetrics {
        loc: file_loc,
        cyclomatic: 1 + file_decisions,
        function_count: functions.len(),
        functions,
        dependency_count,
    }
}

fn is_statement(node: Node) -> bool {
    let kind = node.kind();
    if DECLARATION_KINDS.contains(&kind) {
        return true;
    }
    match kind {
        "empty_statement" => false,
        // The wrapped declaration is counted on its own
        "export_statement" => node.child_by_field_name("declaration").is_none(),
        _ => kind.ends_with("_statement"),
    }
}

fn is_decision(node: Node) -> bool {
    let kind = node.kind();
    if BRANCH_KINDS.contains(&kind) {
        return true;
    }
    kind == "binary_expression"
        && node
            .child_by_field_name("operator")
            .is_some_and(|op| LOGICAL_OPERATORS.contains(&op.kind()))
}

fn is_dependency(node: Node, source: &[u8]) -> bool {
    match node.kind() {
        "import_statement" => true,
        "call_expression" => {
            let Some(callee) = node.child_by_field_name("function") else {
                return false;
            };
            match callee.kind() {
                "import" => true,
                "identifier" => {
                    callee.utf8_text(source).is_ok_and(|name| name == "require")
                        && node
                            .child_by_field_name("arguments")
                            .and_then(|args| args.named_child(0))
                            .is_some_and(|arg| arg.kind() == "string")
                }
                _ => false,
            }
        }
        _ => false,
    }
}

fn function_name(node: Node, source: &[u8]) -> String {
    let named = node.child_by_field_name("name").or_else(|| {
        let parent = node.parent()?;
        match parent.kind() {
            "variable_declarator" => parent.child_by_field_name("name"),
            "pair" => parent.child_by_field_name("key"),
            "assignment_expression" => parent.child_by_field_name("left"),
            "public_field_definition" | "field_definition" => {
                parent.child_by_field_name("property")
            }
            _ => None,
        }
    });

    named
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

fn parameter_count(node: Node) -> usize {
    if let Some(params) = node.child_by_field_name("parameters") {
        let mut cursor = params.walk();
        return params
            .named_children(&mut cursor)
            .filter(|child| child.kind() != "comment")
            .count();
    }
    // Arrow functions with a single bare parameter
    usize::from(node.child_by_field_name("parameter").is_some())
}
