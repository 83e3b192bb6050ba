//! Per-file structural extraction.
//!
//! Produces a [`ModuleIndex`] for one Python source file: definitions
//! (classes, their direct methods, top-level functions), module-level
//! assignments, canonical one-line import strings, and the merged import
//! block spans. On syntax errors no partial structure is produced; callers
//! degrade to a raw-lines-only index.

use crate::index::parser::ParserError;
use crate::index::pool;
use crate::interval::{merge_spans, LineSpan};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tree_sitter::Node;

/// Gap tolerance (in lines) when merging import statement spans. Keeps one
/// logical import block together across blank lines and comments.
pub const IMPORT_GAP_TOLERANCE: usize = 10;

#[derive(Error, Debug)]
pub enum StructureError {
    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error("source text has syntax errors")]
    Syntax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefKind {
    Function,
    Class,
    Method,
}

/// One definition recorded in a module: a class, one of its direct methods,
/// or a top-level function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub kind: DefKind,
    /// Inclusive 1-based line range of the whole definition.
    pub span: LineSpan,
    /// Source lines covered by `span`.
    pub body: Vec<String>,
    /// For methods, the name of the class that owns them. Never a back
    /// pointer into the definition list, only a name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_class: Option<String>,
    /// `name = value` strings for module-level variables referenced in the
    /// body and never locally (re)assigned there. A syntactic approximation:
    /// no data-flow analysis, no comprehension-scope awareness.
    pub used_globals: Vec<String>,
}

/// Structural record for one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleIndex {
    pub path: String,
    /// Definitions in source order.
    pub definitions: Vec<Definition>,
    /// Canonical one-line import strings (`import x`, `from a import b`).
    pub imports: Vec<String>,
    /// Merged, non-overlapping spans of the import statements.
    pub import_spans: Vec<LineSpan>,
    pub raw_lines: Vec<String>,
}

impl ModuleIndex {
    /// Parse one file's text into a structural record.
    ///
    /// Returns `Err` when the text does not parse cleanly; no partial
    /// structure is returned in that case.
    pub fn parse(path: &str, text: &str) -> Result<Self, StructureError> {
        pool::with_parser(|parser| {
            let parsed = parser.parse_with_source(text)?;
            if parsed.has_errors() {
                return Err(StructureError::Syntax);
            }

            let root = parsed.root_node();
            let raw_lines: Vec<String> = text.lines().map(str::to_string).collect();

            let globals = module_globals(root, text);
            let (imports, import_spans) = module_imports(root, text);
            let definitions = collect_definitions(root, text, &raw_lines, &globals);

            Ok(ModuleIndex {
                path: path.to_string(),
                definitions,
                imports,
                import_spans: merge_spans(import_spans, IMPORT_GAP_TOLERANCE),
                raw_lines,
            })
        })?
    }

    /// Degraded record for files that fail to parse: raw lines only.
    pub fn degraded(path: &str, text: &str) -> Self {
        ModuleIndex {
            path: path.to_string(),
            raw_lines: text.lines().map(str::to_string).collect(),
            ..ModuleIndex::default()
        }
    }

    pub fn line_count(&self) -> usize {
        self.raw_lines.len()
    }

    /// Look up a definition by name. `Class.method` tokens prefer the method
    /// owned by that class; bare names match the first definition in source
    /// order.
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        if let Some((class, method)) = name.rsplit_once('.') {
            if let Some(def) = self.definitions.iter().find(|d| {
                d.kind == DefKind::Method
                    && d.name == method
                    && d.owning_class.as_deref() == Some(class)
            }) {
                return Some(def);
            }
        }
        self.definitions.iter().find(|d| d.name == name)
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

fn node_span(node: Node<'_>) -> LineSpan {
    LineSpan::new(node.start_position().row + 1, node.end_position().row + 1)
}

/// Unwrap `decorated_definition` to the wrapped class/function node.
fn unwrap_decorated(node: Node<'_>) -> Node<'_> {
    if node.kind() == "decorated_definition" {
        if let Some(inner) = node.child_by_field_name("definition") {
            return inner;
        }
    }
    node
}

/// Module-level direct assignments (`name = value`), flattened to a
/// name-to-serialized-value map. Annotated assignments and non-identifier
/// targets are ignored; chained assignments (`a = b = v`) record every name.
fn module_globals(root: Node<'_>, source: &str) -> BTreeMap<String, String> {
    let mut globals = BTreeMap::new();
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let Some(expr) = stmt.named_child(0) else {
            continue;
        };
        if expr.kind() == "assignment" {
            collect_assignment(expr, source, &mut globals);
        }
    }
    globals
}

fn collect_assignment(node: Node<'_>, source: &str, globals: &mut BTreeMap<String, String>) {
    // Annotated assignments (`x: int = 1`) carry a type field and do not
    // count as direct assignments.
    if node.child_by_field_name("type").is_some() {
        return;
    }
    let (Some(left), Some(right)) = (
        node.child_by_field_name("left"),
        node.child_by_field_name("right"),
    ) else {
        return;
    };

    // `a = b = v` nests the next assignment on the right; the serialized
    // value is the innermost right-hand side.
    let mut value = right;
    while value.kind() == "assignment" {
        match value.child_by_field_name("right") {
            Some(inner) => value = inner,
            None => break,
        }
    }

    if left.kind() == "identifier" {
        globals.insert(
            node_text(left, source).to_string(),
            node_text(value, source).to_string(),
        );
    }
    if right.kind() == "assignment" {
        collect_assignment(right, source, globals);
    }
}

/// Canonical import strings and their raw (unmerged) statement spans.
fn module_imports(root: Node<'_>, source: &str) -> (Vec<String>, Vec<LineSpan>) {
    let mut imports = Vec::new();
    let mut spans = Vec::new();

    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        match stmt.kind() {
            "import_statement" => {
                let mut names = stmt.walk();
                for name in stmt.children_by_field_name("name", &mut names) {
                    imports.push(format!("import {}", import_name(name, source)));
                }
                spans.push(node_span(stmt));
            }
            "import_from_statement" | "future_import_statement" => {
                let module = stmt
                    .child_by_field_name("module_name")
                    .map(|m| node_text(m, source).to_string())
                    .unwrap_or_else(|| "__future__".to_string());

                let mut saw_name = false;
                let mut names = stmt.walk();
                for name in stmt.children_by_field_name("name", &mut names) {
                    imports.push(format!("from {module} import {}", import_name(name, source)));
                    saw_name = true;
                }
                if !saw_name {
                    let mut children = stmt.walk();
                    if stmt
                        .named_children(&mut children)
                        .any(|c| c.kind() == "wildcard_import")
                    {
                        imports.push(format!("from {module} import *"));
                    }
                }
                spans.push(node_span(stmt));
            }
            _ => {}
        }
    }

    (imports, spans)
}

/// The imported name, ignoring any `as` alias (canonical form keeps the
/// original name, matching how the index is queried).
fn import_name<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    if node.kind() == "aliased_import" {
        if let Some(name) = node.child_by_field_name("name") {
            return node_text(name, source);
        }
    }
    node_text(node, source)
}

/// Collect definitions: every class (at any nesting), its direct methods
/// (one nesting level below the class), and each module-level function not
/// already claimed as a method name. Listed in source order.
fn collect_definitions(
    root: Node<'_>,
    source: &str,
    raw_lines: &[String],
    globals: &BTreeMap<String, String>,
) -> Vec<Definition> {
    let mut classes: Vec<Node<'_>> = Vec::new();
    scan_classes(root, &mut classes);

    let mut defs: Vec<Definition> = Vec::new();
    let mut class_methods: BTreeSet<String> = BTreeSet::new();

    for class in &classes {
        let Some(class_name) = class.child_by_field_name("name") else {
            continue;
        };
        let class_name = node_text(class_name, source).to_string();

        defs.push(Definition {
            name: class_name.clone(),
            kind: DefKind::Class,
            span: node_span(*class),
            body: body_lines(node_span(*class), raw_lines),
            owning_class: None,
            used_globals: Vec::new(),
        });

        let Some(body) = class.child_by_field_name("body") else {
            continue;
        };
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            let def = unwrap_decorated(child);
            if def.kind() != "function_definition" {
                continue;
            }
            let Some(name) = def.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name, source).to_string();
            class_methods.insert(name.clone());
            defs.push(Definition {
                name,
                kind: DefKind::Method,
                span: node_span(def),
                body: body_lines(node_span(def), raw_lines),
                owning_class: Some(class_name.clone()),
                used_globals: used_globals(def, source, globals),
            });
        }
    }

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let def = unwrap_decorated(child);
        if def.kind() != "function_definition" {
            continue;
        }
        let Some(name) = def.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name, source).to_string();
        if class_methods.contains(&name) {
            continue;
        }
        defs.push(Definition {
            name,
            kind: DefKind::Function,
            span: node_span(def),
            body: body_lines(node_span(def), raw_lines),
            owning_class: None,
            used_globals: used_globals(def, source, globals),
        });
    }

    defs.sort_by_key(|d| (d.span.start, d.span.end));
    defs
}

fn scan_classes<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    let actual = unwrap_decorated(node);
    if actual.kind() == "class_definition" {
        out.push(actual);
    }
    let mut cursor = actual.walk();
    for child in actual.named_children(&mut cursor) {
        scan_classes(child, out);
    }
}

fn body_lines(span: LineSpan, raw_lines: &[String]) -> Vec<String> {
    let start = span.start.saturating_sub(1).min(raw_lines.len());
    let end = span.end.min(raw_lines.len());
    raw_lines[start..end].to_vec()
}

/// Module-level variables used in a definition body and never locally
/// (re)assigned there, rendered as `name = value`.
fn used_globals(
    def: Node<'_>,
    source: &str,
    globals: &BTreeMap<String, String>,
) -> Vec<String> {
    if globals.is_empty() {
        return Vec::new();
    }

    let mut locals: BTreeSet<String> = BTreeSet::new();
    collect_assigned_names(def, source, &mut locals);

    let mut used = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    walk_identifiers(def, source, &mut |name| {
        if let Some(value) = globals.get(name) {
            if !locals.contains(name) && seen.insert(name) {
                used.push(format!("{name} = {value}"));
            }
        }
    });
    used
}

/// Names that appear as targets of plain, annotated, or augmented
/// assignments anywhere inside the node.
fn collect_assigned_names(node: Node<'_>, source: &str, out: &mut BTreeSet<String>) {
    if matches!(node.kind(), "assignment" | "augmented_assignment") {
        if let Some(left) = node.child_by_field_name("left") {
            if left.kind() == "identifier" {
                out.insert(node_text(left, source).to_string());
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_assigned_names(child, source, out);
    }
}

/// Visit value-position identifiers: skips parameter lists, definition
/// names, attribute names, and keyword-argument names, which are labels
/// rather than variable references.
fn walk_identifiers<'s>(node: Node<'_>, source: &'s str, f: &mut impl FnMut(&'s str)) {
    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        return;
    }
    loop {
        let child = cursor.node();
        let field = cursor.field_name();

        let skip_subtree = matches!(field, Some("parameters"));
        let is_label = child.kind() == "identifier"
            && matches!(
                (node.kind(), field),
                ("function_definition", Some("name"))
                    | ("class_definition", Some("name"))
                    | ("attribute", Some("attribute"))
                    | ("keyword_argument", Some("name"))
            );

        if !skip_subtree {
            if child.kind() == "identifier" && !is_label {
                f(node_text(child, source));
            }
            walk_identifiers(child, source, f);
        }

        if !cursor.goto_next_sibling() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os
import sys

from collections import OrderedDict, defaultdict

LIMIT = 10
NAME = "demo"

class Widget:
    kind = "basic"

    def render(self, out):
        out.write(NAME)

    def resize(self, factor):
        size = LIMIT
        return size * factor

def top(x):
    return x + LIMIT

def shadowed(x):
    LIMIT = 1
    return x + LIMIT
"#;

    fn parse_sample() -> ModuleIndex {
        ModuleIndex::parse("pkg/widget.py", SAMPLE).unwrap()
    }

    #[test]
    fn imports_are_canonical_one_liners() {
        let m = parse_sample();
        assert_eq!(
            m.imports,
            vec![
                "import os",
                "import sys",
                "from collections import OrderedDict",
                "from collections import defaultdict",
            ]
        );
    }

    #[test]
    fn import_spans_merge_across_blank_lines() {
        let m = parse_sample();
        // lines 1, 2 and 4 collapse into one block under gap tolerance 10
        assert_eq!(m.import_spans, vec![LineSpan::new(1, 4)]);
    }

    #[test]
    fn definitions_in_source_order() {
        let m = parse_sample();
        let names: Vec<(&str, DefKind)> = m
            .definitions
            .iter()
            .map(|d| (d.name.as_str(), d.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Widget", DefKind::Class),
                ("render", DefKind::Method),
                ("resize", DefKind::Method),
                ("top", DefKind::Function),
                ("shadowed", DefKind::Function),
            ]
        );
    }

    #[test]
    fn method_records_owning_class() {
        let m = parse_sample();
        let render = m.definition("Widget.render").unwrap();
        assert_eq!(render.kind, DefKind::Method);
        assert_eq!(render.owning_class.as_deref(), Some("Widget"));
    }

    #[test]
    fn used_globals_reported_for_references() {
        let m = parse_sample();
        let render = m.definition("render").unwrap();
        assert_eq!(render.used_globals, vec!["NAME = \"demo\""]);

        let top = m.definition("top").unwrap();
        assert_eq!(top.used_globals, vec!["LIMIT = 10"]);
    }

    #[test]
    fn locally_assigned_name_is_not_a_used_global() {
        let m = parse_sample();
        let shadowed = m.definition("shadowed").unwrap();
        assert!(shadowed.used_globals.is_empty());
    }

    #[test]
    fn used_global_assigned_in_body_is_excluded() {
        let m = parse_sample();
        let resize = m.definition("resize").unwrap();
        // `size` is local; LIMIT is read but also feeds a local, still a use
        assert_eq!(resize.used_globals, vec!["LIMIT = 10"]);
    }

    #[test]
    fn body_lines_match_span() {
        let m = parse_sample();
        let top = m.definition("top").unwrap();
        assert_eq!(top.body.first().map(String::as_str), Some("def top(x):"));
        assert_eq!(top.body.len(), top.span.len());
    }

    #[test]
    fn syntax_error_yields_no_partial_structure() {
        let err = ModuleIndex::parse("bad.py", "def broken(:\n    pass\n");
        assert!(matches!(err, Err(StructureError::Syntax)));
    }

    #[test]
    fn degraded_keeps_raw_lines_only() {
        let m = ModuleIndex::degraded("bad.py", "def broken(:\n    pass\n");
        assert_eq!(m.raw_lines.len(), 2);
        assert!(m.definitions.is_empty());
        assert!(m.imports.is_empty());
    }

    #[test]
    fn function_named_like_method_is_claimed() {
        let text = "class A:\n    def run(self):\n        pass\n\ndef run():\n    pass\n";
        let m = ModuleIndex::parse("a.py", text).unwrap();
        let functions: Vec<&Definition> = m
            .definitions
            .iter()
            .filter(|d| d.kind == DefKind::Function)
            .collect();
        assert!(functions.is_empty());
    }

    #[test]
    fn chained_assignment_records_all_names() {
        let text = "a = b = 3\n\ndef f():\n    return a + b\n";
        let m = ModuleIndex::parse("c.py", text).unwrap();
        let f = m.definition("f").unwrap();
        assert_eq!(f.used_globals, vec!["a = 3", "b = 3"]);
    }
}
