//! Tree-sitter based parsing for syntax-aware code chunking
//!
//! Provides parsers for multiple languages and extracts every function and class
//! definition, nested ones included, in document (pre-order) order.

use tree_sitter::{Language, Node, Parser, Tree};

/// Supported languages for tree-sitter parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedLanguage {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
}

/// How a syntax node participates in chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Function,
    Class,
    Other,
}

impl SupportedLanguage {
    /// Get the tree-sitter Language for this language
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SupportedLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            SupportedLanguage::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Classify a grammar node kind as a function, a class-like definition, or neither
    pub fn classify(&self, kind: &str) -> NodeClass {
        match self {
            SupportedLanguage::Rust => match kind {
                "function_item" => NodeClass::Function,
                "struct_item" | "enum_item" | "union_item" | "trait_item" | "impl_item" => NodeClass::Class,
                _ => NodeClass::Other,
            },
            SupportedLanguage::TypeScript | SupportedLanguage::Tsx => match kind {
                "function_declaration" | "generator_function_declaration" | "method_definition" => {
                    NodeClass::Function
                }
                "class_declaration" | "abstract_class_declaration" | "interface_declaration" => {
                    NodeClass::Class
                }
                _ => NodeClass::Other,
            },
            SupportedLanguage::JavaScript => match kind {
                "function_declaration" | "generator_function_declaration" | "method_definition" => {
                    NodeClass::Function
                }
                "class_declaration" => NodeClass::Class,
                _ => NodeClass::Other,
            },
            SupportedLanguage::Python => match kind {
                "function_definition" => NodeClass::Function,
                "class_definition" => NodeClass::Class,
                _ => NodeClass::Other,
            },
            SupportedLanguage::Go => match kind {
                "function_declaration" | "method_declaration" => NodeClass::Function,
                "type_spec" => NodeClass::Class,
                _ => NodeClass::Other,
            },
        }
    }

    /// Detect language from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "rs" => Some(SupportedLanguage::Rust),
            "ts" => Some(SupportedLanguage::TypeScript),
            "tsx" => Some(SupportedLanguage::Tsx),
            "js" | "mjs" | "cjs" => Some(SupportedLanguage::JavaScript),
            "jsx" => Some(SupportedLanguage::JavaScript), // JSX uses JS parser
            "py" => Some(SupportedLanguage::Python),
            "go" => Some(SupportedLanguage::Go),
            _ => None,
        }
    }

    /// Get the language name as a string
    pub fn name(&self) -> &'static str {
        match self {
            SupportedLanguage::Rust => "rust",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::Tsx => "tsx",
            SupportedLanguage::JavaScript => "javascript",
            SupportedLanguage::Python => "python",
            SupportedLanguage::Go => "go",
        }
    }
}

/// A parsed syntax tree with its source
pub struct ParsedSource<'a> {
    pub tree: Tree,
    pub source: &'a str,
    pub language: SupportedLanguage,
}

/// Why a file could not be parsed cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The grammar could not be loaded into the parser
    LanguageUnavailable(String),
    /// The parser produced no tree at all
    NoTree,
    /// The tree contains an error or missing node; the line is 1-indexed
    SyntaxError { line: usize },
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::LanguageUnavailable(reason) => write!(f, "grammar unavailable: {}", reason),
            ParseFailure::NoTree => write!(f, "parser produced no tree"),
            ParseFailure::SyntaxError { line } => write!(f, "syntax error near line {}", line),
        }
    }
}

/// A function or class definition extracted from the syntax tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Function(DefinitionSpan),
    Class(DefinitionSpan),
}

impl Definition {
    pub fn span(&self) -> &DefinitionSpan {
        match self {
            Definition::Function(span) | Definition::Class(span) => span,
        }
    }
}

/// Location and text of one definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSpan {
    /// The grammar node kind (e.g., "function_item", "class_definition")
    pub node_kind: String,
    /// Declared identifier, if the node has one
    pub name: Option<String>,
    /// Start line (0-indexed)
    pub start_line: usize,
    /// End line (0-indexed, inclusive)
    pub end_line: usize,
    /// The full source lines from start_line to end_line
    pub content: String,
}

/// Parse source code with tree-sitter, rejecting trees that contain syntax errors
pub fn parse_source(source: &str, language: SupportedLanguage) -> Result<ParsedSource<'_>, ParseFailure> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| ParseFailure::LanguageUnavailable(e.to_string()))?;

    let tree = parser.parse(source, None).ok_or(ParseFailure::NoTree)?;

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_row(root).map(|row| row + 1).unwrap_or(1);
        return Err(ParseFailure::SyntaxError { line });
    }

    Ok(ParsedSource { tree, source, language })
}

/// Extract all function and class definitions in pre-order
pub fn extract_definitions(parsed: &ParsedSource<'_>) -> Vec<Definition> {
    let lines = LineIndex::new(parsed.source);
    let mut definitions = Vec::new();
    let mut cursor = parsed.tree.root_node().walk();

    loop {
        let node = cursor.node();
        match parsed.language.classify(node.kind()) {
            NodeClass::Function => definitions.push(Definition::Function(span_of(&node, parsed.source, &lines))),
            NodeClass::Class => definitions.push(Definition::Class(span_of(&node, parsed.source, &lines))),
            NodeClass::Other => {}
        }

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return definitions;
            }
        }
    }
}

fn span_of(node: &Node, source: &str, lines: &LineIndex) -> DefinitionSpan {
    let start_line = node.start_position().row;
    let end = node.end_position();
    // A node that swallowed its trailing newline ends at column 0 of the next row
    let end_line = if end.column == 0 && end.row > start_line {
        end.row - 1
    } else {
        end.row
    };

    DefinitionSpan {
        node_kind: node.kind().to_string(),
        name: extract_name(node, source),
        start_line,
        end_line,
        content: lines.slice(source, start_line, end_line).to_string(),
    }
}

/// Extract the name of a definition (function name, class name, etc.)
fn extract_name(node: &Node, source: &str) -> Option<String> {
    // impl blocks have no name field; the implemented type stands in for it
    for field_name in ["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(field_name) {
            return Some(source[name_node.byte_range()].to_string());
        }
    }

    // Fallback: look for first identifier child
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "identifier" | "type_identifier" | "property_identifier") {
            return Some(source[child.byte_range()].to_string());
        }
    }

    None
}

fn first_error_row(root: Node) -> Option<usize> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row);
        }
        // Only descend into subtrees that contain the error
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

/// Byte offsets of line starts, for cutting whole lines out of the source
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// Lines `first..=last` without the final line terminator
    fn slice<'s>(&self, source: &'s str, first: usize, last: usize) -> &'s str {
        let start = self.starts.get(first).copied().unwrap_or(source.len());
        let end = match self.starts.get(last + 1) {
            Some(&next) => next - 1,
            None => source.len(),
        };
        let text = &source[start..end.max(start)];
        text.strip_suffix('\r').unwrap_or(text)
    }
}
