//! Structural extraction backend.
//!
//! Queries file contents with per-language tree-sitter patterns for
//! functions, methods, and type definitions. Parsing is read-only and
//! stateless; a parse failure refuses just that file.
//!
//! Node kinds handled per grammar:
//!
//! - Rust: `function_item`, `struct_item`, `enum_item`, `trait_item`,
//!   `impl_item`, `type_item`, `mod_item`, `const_item`, `static_item`
//! - Python: `function_definition`, `class_definition`,
//!   `decorated_definition`
//! - Go: `function_declaration`, `method_declaration`, `type_spec`
//! - JavaScript/TypeScript: `function_declaration`,
//!   `class_declaration`, `method_definition`, arrow-function
//!   declarators, plus TS `interface_declaration`,
//!   `type_alias_declaration`, `enum_declaration`

use std::collections::HashMap;
use std::path::Path;

use super::SymbolExtractor;
use crate::error::{CodetectError, CodetectResult};
use crate::symbols::scan::ScannedFile;
use crate::types::{Language, Symbol};

/// Extractor that walks tree-sitter ASTs.
pub struct TreeSitterExtractor;

impl TreeSitterExtractor {
    /// Build the extractor. Grammars are compiled in; there is nothing
    /// to probe.
    pub fn new() -> Self {
        Self
    }

    fn extract_file(&self, repo_key: &str, file: &ScannedFile) -> CodetectResult<Vec<Symbol>> {
        let source = std::fs::read(&file.abs_path)?;
        let grammar = grammar_for(file.language, &file.path).ok_or_else(|| {
            CodetectError::Extract {
                path: file.abs_path.clone(),
                message: format!("no grammar for language {}", file.language),
            }
        })?;

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| CodetectError::Extract {
                path: file.abs_path.clone(),
                message: format!("failed to set grammar: {e}"),
            })?;
        let tree = parser.parse(&source, None).ok_or_else(|| CodetectError::Extract {
            path: file.abs_path.clone(),
            message: "parser returned no tree".into(),
        })?;

        let mut raw = Vec::new();
        collect(file.language, tree.root_node(), &source, None, &mut raw);

        Ok(raw
            .into_iter()
            .map(|r| Symbol {
                repo_root: repo_key.to_string(),
                name: r.name,
                kind: r.kind.to_string(),
                path: file.path.clone(),
                line: r.line,
                language: Some(file.language.as_str().to_string()),
                pattern: line_text(&source, r.line).map(|l| l.trim().to_string()),
                scope: r.scope,
                signature: r.signature,
            })
            .collect())
    }
}

impl Default for TreeSitterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SymbolExtractor for TreeSitterExtractor {
    fn name(&self) -> &'static str {
        "structural"
    }

    async fn extract(
        &self,
        repo_root: &Path,
        files: &[ScannedFile],
    ) -> CodetectResult<HashMap<String, Vec<Symbol>>> {
        let repo_key = repo_root.to_string_lossy().to_string();
        let mut out = HashMap::new();
        for file in files {
            if !file.language.has_structural_support() {
                continue;
            }
            match self.extract_file(&repo_key, file) {
                Ok(symbols) => {
                    out.insert(file.path.clone(), symbols);
                }
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "structural extraction failed");
                }
            }
        }
        Ok(out)
    }
}

fn grammar_for(language: Language, path: &str) -> Option<tree_sitter::Language> {
    match language {
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::TypeScript => {
            if path.ends_with(".tsx") {
                Some(tree_sitter_typescript::LANGUAGE_TSX.into())
            } else {
                Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            }
        }
        _ => None,
    }
}

struct RawSymbol {
    name: String,
    kind: &'static str,
    line: u32,
    scope: Option<String>,
    signature: Option<String>,
}

/// Recursively walk the AST, dispatching on per-language node kinds.
///
/// Unrecognised compound nodes are recursed into so definitions nested
/// in blocks are still found.
fn collect(
    language: Language,
    node: tree_sitter::Node<'_>,
    source: &[u8],
    scope: Option<&str>,
    out: &mut Vec<RawSymbol>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let handled = match language {
            Language::Rust => collect_rust(child, source, scope, out),
            Language::Python => collect_python(child, source, scope, out),
            Language::Go => collect_go(child, source, out),
            Language::JavaScript | Language::TypeScript => {
                collect_js_ts(language, child, source, scope, out)
            }
            _ => false,
        };

        if !handled && child.child_count() > 0 && child.kind() != "string_literal" {
            collect(language, child, source, scope, out);
        }
    }
}

fn collect_rust(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    scope: Option<&str>,
    out: &mut Vec<RawSymbol>,
) -> bool {
    match node.kind() {
        // Trait method signatures without a body parse as
        // function_signature_item.
        "function_item" | "function_signature_item" => {
            if let Some(name) = field_text(node, "name", source) {
                let kind = if scope.is_some() { "method" } else { "function" };
                out.push(raw(node, name, kind, scope, field_text(node, "parameters", source)));
            }
            true
        }
        "struct_item" => push_named(node, source, "struct", scope, out),
        "enum_item" => push_named(node, source, "enum", scope, out),
        "type_item" => push_named(node, source, "type", scope, out),
        "const_item" | "static_item" => push_named(node, source, "constant", scope, out),
        "trait_item" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name.clone(), "trait", scope, None));
                if let Some(body) = node.child_by_field_name("body") {
                    collect(Language::Rust, body, source, Some(&name), out);
                }
            }
            true
        }
        "impl_item" => {
            // impl blocks emit no symbol themselves; their methods get
            // the implemented type as scope.
            let type_name = field_text(node, "type", source);
            if let Some(body) = node.child_by_field_name("body") {
                collect(Language::Rust, body, source, type_name.as_deref(), out);
            }
            true
        }
        "mod_item" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name.clone(), "module", scope, None));
                if let Some(body) = node.child_by_field_name("body") {
                    collect(Language::Rust, body, source, scope, out);
                }
            }
            true
        }
        _ => false,
    }
}

fn collect_python(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    scope: Option<&str>,
    out: &mut Vec<RawSymbol>,
) -> bool {
    match node.kind() {
        "function_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                let kind = if scope.is_some() { "method" } else { "function" };
                out.push(raw(node, name, kind, scope, field_text(node, "parameters", source)));
            }
            true
        }
        "class_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name.clone(), "class", scope, None));
                if let Some(body) = node.child_by_field_name("body") {
                    collect(Language::Python, body, source, Some(&name), out);
                }
            }
            true
        }
        "decorated_definition" => {
            if let Some(inner) = node.child_by_field_name("definition") {
                collect_python(inner, source, scope, out);
            }
            true
        }
        _ => false,
    }
}

fn collect_go(node: tree_sitter::Node<'_>, source: &[u8], out: &mut Vec<RawSymbol>) -> bool {
    match node.kind() {
        "function_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name, "function", None, field_text(node, "parameters", source)));
            }
            true
        }
        "method_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                let receiver = field_text(node, "receiver", source);
                out.push(RawSymbol {
                    name,
                    kind: "method",
                    line: node.start_position().row as u32 + 1,
                    scope: receiver,
                    signature: field_text(node, "parameters", source),
                });
            }
            true
        }
        "type_spec" => {
            if let Some(name) = field_text(node, "name", source) {
                let kind = match node.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") => "struct",
                    Some("interface_type") => "interface",
                    _ => "type",
                };
                out.push(raw(node, name, kind, None, None));
            }
            true
        }
        _ => false,
    }
}

fn collect_js_ts(
    language: Language,
    node: tree_sitter::Node<'_>,
    source: &[u8],
    scope: Option<&str>,
    out: &mut Vec<RawSymbol>,
) -> bool {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name, "function", scope, field_text(node, "parameters", source)));
            }
            true
        }
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name.clone(), "class", scope, None));
                if let Some(body) = node.child_by_field_name("body") {
                    collect(language, body, source, Some(&name), out);
                }
            }
            true
        }
        "method_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(raw(node, name, "method", scope, field_text(node, "parameters", source)));
            }
            true
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            for declarator in node.children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let is_function = declarator
                    .child_by_field_name("value")
                    .map(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
                    .unwrap_or(false);
                if is_function {
                    if let Some(name) = field_text(declarator, "name", source) {
                        out.push(raw(declarator, name, "function", scope, None));
                    }
                }
            }
            true
        }
        "interface_declaration" if language == Language::TypeScript => {
            push_named(node, source, "interface", scope, out)
        }
        "type_alias_declaration" if language == Language::TypeScript => {
            push_named(node, source, "type", scope, out)
        }
        "enum_declaration" if language == Language::TypeScript => {
            push_named(node, source, "enum", scope, out)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn raw(
    node: tree_sitter::Node<'_>,
    name: String,
    kind: &'static str,
    scope: Option<&str>,
    signature: Option<String>,
) -> RawSymbol {
    RawSymbol {
        name,
        kind,
        line: node.start_position().row as u32 + 1,
        scope: scope.map(str::to_string),
        signature,
    }
}

fn push_named(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    kind: &'static str,
    scope: Option<&str>,
    out: &mut Vec<RawSymbol>,
) -> bool {
    if let Some(name) = field_text(node, "name", source) {
        out.push(raw(node, name, kind, scope, None));
    }
    true
}

fn field_text(node: tree_sitter::Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, source).to_string())
}

/// Get the text content of a tree-sitter node.
fn node_text<'a>(node: tree_sitter::Node<'_>, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// Text of a 1-indexed source line.
fn line_text(source: &[u8], line: u32) -> Option<String> {
    String::from_utf8_lossy(source)
        .lines()
        .nth(line.saturating_sub(1) as usize)
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, language: Language, source: &str) -> Vec<Symbol> {
        let dir = tempfile::tempdir().expect("tempdir");
        let abs = dir.path().join(path);
        std::fs::write(&abs, source).expect("write");
        let file = ScannedFile {
            path: path.to_string(),
            abs_path: abs,
            language,
            mtime_ns: 0,
            size: source.len() as i64,
        };
        TreeSitterExtractor::new()
            .extract_file("/tmp/repo", &file)
            .expect("extract")
    }

    fn find<'a>(symbols: &'a [Symbol], name: &str) -> &'a Symbol {
        symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {name} not found in {symbols:?}"))
    }

    #[test]
    fn test_rust_functions_and_types() {
        let symbols = parse(
            "lib.rs",
            Language::Rust,
            r#"
pub fn top_level() {}

pub struct Config {
    port: u16,
}

impl Config {
    pub fn new() -> Self {
        Config { port: 8080 }
    }
}

trait Store {
    fn get(&self);
}
"#,
        );
        assert_eq!(find(&symbols, "top_level").kind, "function");
        assert_eq!(find(&symbols, "Config").kind, "struct");
        let new_fn = find(&symbols, "new");
        assert_eq!(new_fn.kind, "method");
        assert_eq!(new_fn.scope.as_deref(), Some("Config"));
        assert_eq!(find(&symbols, "Store").kind, "trait");
        assert_eq!(find(&symbols, "get").kind, "method");
    }

    #[test]
    fn test_rust_line_numbers_are_one_indexed() {
        let symbols = parse("a.rs", Language::Rust, "fn first() {}\nfn second() {}\n");
        assert_eq!(find(&symbols, "first").line, 1);
        assert_eq!(find(&symbols, "second").line, 2);
    }

    #[test]
    fn test_python_classes_and_methods() {
        let symbols = parse(
            "auth.py",
            Language::Python,
            r#"
class AuthService:
    def validate(self, token):
        return bool(token)

def helper():
    pass
"#,
        );
        assert_eq!(find(&symbols, "AuthService").kind, "class");
        let method = find(&symbols, "validate");
        assert_eq!(method.kind, "method");
        assert_eq!(method.scope.as_deref(), Some("AuthService"));
        assert_eq!(find(&symbols, "helper").kind, "function");
    }

    #[test]
    fn test_python_decorated_function() {
        let symbols = parse(
            "app.py",
            Language::Python,
            "@route('/login')\ndef login():\n    pass\n",
        );
        assert_eq!(find(&symbols, "login").kind, "function");
    }

    #[test]
    fn test_go_functions_methods_and_types() {
        let symbols = parse(
            "main.go",
            Language::Go,
            r#"package main

type Server struct{}

type Handler interface{}

func hello() {}

func (s *Server) Serve() {}
"#,
        );
        assert_eq!(find(&symbols, "Server").kind, "struct");
        assert_eq!(find(&symbols, "Handler").kind, "interface");
        assert_eq!(find(&symbols, "hello").kind, "function");
        assert_eq!(find(&symbols, "Serve").kind, "method");
    }

    #[test]
    fn test_typescript_interfaces_and_arrows() {
        let symbols = parse(
            "svc.ts",
            Language::TypeScript,
            r#"
interface User {
    name: string;
}

type Id = string;

export class UserService {
    get(id: Id): User { return { name: id }; }
}

const fetchUser = async (id: Id) => ({ name: id });
"#,
        );
        assert_eq!(find(&symbols, "User").kind, "interface");
        assert_eq!(find(&symbols, "Id").kind, "type");
        assert_eq!(find(&symbols, "UserService").kind, "class");
        assert_eq!(find(&symbols, "get").kind, "method");
        assert_eq!(find(&symbols, "fetchUser").kind, "function");
    }

    #[test]
    fn test_javascript_function_kinds() {
        let symbols = parse(
            "util.js",
            Language::JavaScript,
            "function plain() {}\nconst arrow = () => 1;\n",
        );
        assert_eq!(find(&symbols, "plain").kind, "function");
        assert_eq!(find(&symbols, "arrow").kind, "function");
    }

    #[test]
    fn test_pattern_carries_definition_line() {
        let symbols = parse("p.rs", Language::Rust, "pub fn patterned(x: i32) -> i32 { x }\n");
        let sym = find(&symbols, "patterned");
        assert_eq!(sym.pattern.as_deref(), Some("pub fn patterned(x: i32) -> i32 { x }"));
        assert_eq!(sym.signature.as_deref(), Some("(x: i32)"));
    }

    #[test]
    fn test_empty_file_yields_no_symbols() {
        let symbols = parse("empty.rs", Language::Rust, "");
        assert!(symbols.is_empty());
    }
}
