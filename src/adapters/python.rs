//! Python adapter
//!
//! Walks the tree-sitter Python tree. Decorators are reported as
//! annotations; assignments directly in a class body are fields.
//!
//! The grammar accepts some indentation the interpreter rejects, so block
//! indentation is checked against the tree before anything is walked.

use crate::adapter::{Capability, CapabilitySet, LanguageAdapter, NodeKind, ParseError, StructuralNode, StructuralUnit};
use crate::adapters::{children, compact, named_children, parse_tree, simple_name, syntax_error, Source};
use std::path::Path;
use tree_sitter::{Language, Node};

const STANDARD_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "bisect", "collections",
    "concurrent", "configparser", "contextlib", "copy", "csv", "ctypes", "dataclasses", "datetime",
    "decimal", "email", "enum", "errno", "fnmatch", "fractions", "functools", "gc", "getpass",
    "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http", "importlib", "inspect", "io",
    "ipaddress", "itertools", "json", "logging", "math", "multiprocessing", "operator", "os",
    "pathlib", "pickle", "platform", "pprint", "queue", "random", "re", "secrets", "select",
    "shlex", "shutil", "signal", "socket", "sqlite3", "ssl", "stat", "statistics", "string",
    "struct", "subprocess", "sys", "tempfile", "textwrap", "threading", "time", "timeit",
    "traceback", "types", "typing", "unittest", "urllib", "uuid", "warnings", "weakref", "xml",
    "zipfile", "zlib",
];

/// Adapter for `.py` and `.pyi` files
pub struct PythonAdapter {
    language: Language,
    capabilities: CapabilitySet,
}

impl Default for PythonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonAdapter {
    pub fn new() -> Self {
        // No access modifiers or injection styles in Python
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
            capabilities: Capability::ALL
                .into_iter()
                .filter(|c| *c != Capability::ConstructUsage)
                .collect(),
        }
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> &str {
        "python"
    }

    fn extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn parse(&self, path: &Path, text: &str) -> Result<StructuralUnit, ParseError> {
        let tree = parse_tree(&self.language, path, text)?;
        let root = tree.root_node();
        let source = Source::new(text);
        let mut previous = 0;
        if let Some(reason) = indentation_error(root, &source, None, &mut previous) {
            return Err(ParseError::new(path, reason));
        }
        if let Some(reason) = syntax_error(root, &source, "string") {
            return Err(ParseError::new(path, reason));
        }
        let mut walker = Walker {
            source,
            unit: StructuralUnit::new(path, "python"),
            imports: 0,
        };
        walker.visit(root, None);
        Ok(walker.unit.finish())
    }
}

fn indent_width(indent: &str) -> usize {
    let mut width = 0;
    for c in indent.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            '\x0c' => width = 0,
            _ => break,
        }
    }
    width
}

/// Blocks directly owned by a statement, its clauses included
fn blocks<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    for child in named_children(node) {
        if child.kind() == "block" {
            out.push(child);
        } else {
            blocks(child, out);
        }
    }
}

/// Statements of `suite` that start a line must share one indentation,
/// deeper than the line of the `header` (indent, line) opening the block
fn indentation_error(
    suite: Node<'_>,
    source: &Source<'_>,
    header: Option<(usize, usize)>,
    previous: &mut usize,
) -> Option<String> {
    let statements: Vec<Node<'_>> = named_children(suite).collect();
    if let (true, Some((_, opened))) = (statements.is_empty(), header) {
        return Some(format!("expected an indented block after line {}", opened));
    }

    let mut expected = if header.is_none() { Some(0) } else { None };
    for statement in statements.into_iter().filter(|s| !s.is_error()) {
        if let Some(indent) = source.leading_whitespace(statement).map(indent_width) {
            let line = source.start(statement).line;
            match (expected, header) {
                (None, Some((floor, opened))) if indent <= floor => {
                    return Some(format!("expected an indented block after line {}", opened));
                }
                (None, _) => expected = Some(indent),
                (Some(want), _) if indent != want => {
                    return Some(if indent > *previous {
                        format!("unexpected indent at line {}", line)
                    } else {
                        format!("unindent does not match any outer indentation level at line {}", line)
                    });
                }
                (Some(_), _) => {}
            }
            *previous = indent;
        }

        let mut nested = Vec::new();
        blocks(statement, &mut nested);
        for block in nested {
            let opener = block.parent().unwrap_or(statement);
            let floor = indent_width(source.line_indent(opener));
            let opened = source.start(opener).line;
            if let Some(reason) = indentation_error(block, source, Some((floor, opened)), previous) {
                return Some(reason);
            }
        }
    }
    None
}

/// Whether `node` contains a `raise` outside any nested except clause
fn rethrows(node: Node<'_>) -> bool {
    named_children(node).any(|c| match c.kind() {
        "raise_statement" => true,
        "except_clause" | "except_group_clause" => false,
        _ => rethrows(c),
    })
}

/// `pass` and `...` do not count as handling
fn is_placeholder(statement: Node<'_>) -> bool {
    match statement.kind() {
        "pass_statement" => true,
        "expression_statement" => named_children(statement).all(|c| c.kind() == "ellipsis"),
        _ => false,
    }
}

/// The class whose body is being walked
struct Class {
    name: String,
    decorators: Vec<String>,
}

struct Walker<'a> {
    source: Source<'a>,
    unit: StructuralUnit,
    imports: i64,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        self.source.text(node)
    }

    /// `class` is set only for statements directly in a class body
    fn visit(&mut self, node: Node<'_>, class: Option<&Class>) {
        match node.kind() {
            "import_statement" => return self.import(node),
            "import_from_statement" | "future_import_statement" => return self.from_import(node),
            "decorated_definition" => return self.decorated(node, class),
            "class_definition" => return self.class(node, class, Vec::new()),
            "function_definition" => return self.function(node, class, Vec::new()),
            "string" => return self.literal(node),
            "expression_statement" => {
                if let Some(class) = class {
                    self.field(node, class);
                }
            }
            "except_clause" | "except_group_clause" => self.except(node),
            "call" => self.call(node),
            _ => {}
        }
        self.visit_children(node);
    }

    fn visit_children(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            self.visit(child, None);
        }
    }

    fn import_group(path: &str) -> &'static str {
        if path.starts_with('.') {
            return "local";
        }
        let root = path.split('.').next().unwrap_or(path);
        if STANDARD_MODULES.contains(&root) {
            "standard"
        } else {
            "third-party"
        }
    }

    fn push_import(&mut self, node: Node<'_>, end: Node<'_>, path: &str, names: Vec<String>) {
        self.imports += 1;
        let name = names
            .first()
            .cloned()
            .unwrap_or_else(|| simple_name(path).to_string());
        self.unit.push(
            StructuralNode::new(NodeKind::Import, self.source.span_between(node, end))
                .with_text("name", &name)
                .with_text("path", path)
                .with_list("names", names)
                .with_flag("static", false)
                .with_text("import-group", Self::import_group(path))
                .with_number("import-order-position", self.imports),
        );
    }

    /// `import a.b as c, d` is one import per module
    fn import(&mut self, node: Node<'_>) {
        for imported in named_children(node) {
            let module = match imported.kind() {
                "aliased_import" => imported.child_by_field_name("name"),
                _ => Some(imported),
            };
            let Some(module) = module else { continue };
            let path = compact(self.text(module));
            let names = vec![simple_name(&path).to_string()];
            self.push_import(node, imported, &path, names);
        }
    }

    /// `from .pkg import a, b as c`
    fn from_import(&mut self, node: Node<'_>) {
        let path = node
            .child_by_field_name("module_name")
            .map(|m| compact(self.text(m)))
            .unwrap_or_else(|| "__future__".to_string());
        let mut cursor = node.walk();
        let names: Vec<String> = node
            .children_by_field_name("name", &mut cursor)
            .filter_map(|n| match n.kind() {
                "aliased_import" => n.child_by_field_name("name"),
                _ => Some(n),
            })
            .map(|n| compact(self.text(n)))
            .collect();
        self.push_import(node, node, &path, names);
    }

    fn decorated(&mut self, node: Node<'_>, class: Option<&Class>) {
        let mut decorators = Vec::new();
        for decorator in named_children(node).filter(|c| c.kind() == "decorator") {
            if let Some(name) = self.decorator(decorator) {
                decorators.push(name);
            }
            self.visit_children(decorator);
        }
        match node.child_by_field_name("definition") {
            Some(def) if def.kind() == "class_definition" => self.class(def, class, decorators),
            Some(def) => self.function(def, class, decorators),
            None => {}
        }
    }

    /// `@name`, `@a.b` and `@a.b(...)`; other decorator expressions have no name
    fn decorator(&mut self, decorator: Node<'_>) -> Option<String> {
        let expression = named_children(decorator).next()?;
        let target = if expression.kind() == "call" {
            expression.child_by_field_name("function")?
        } else {
            expression
        };
        if !matches!(target.kind(), "identifier" | "attribute") {
            return None;
        }
        let dotted = compact(self.text(target));
        let name = simple_name(&dotted).to_string();
        self.unit.push(
            StructuralNode::new(NodeKind::Annotation, self.source.span_between(decorator, target))
                .with_text("name", &name)
                .with_text("qualified-name", &dotted),
        );
        Some(name)
    }

    fn class(&mut self, node: Node<'_>, owner: Option<&Class>, decorators: Vec<String>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let superclasses = node.child_by_field_name("superclasses");
        let bases: Vec<String> = superclasses
            .map(|s| named_children(s).map(|b| compact(self.text(b))).collect())
            .unwrap_or_default();

        let mut decl = StructuralNode::new(NodeKind::Type, self.source.span_between(node, name))
            .with_text("name", self.text(name))
            .with_text("declaration", "class")
            .with_list("annotations", decorators.clone())
            .with_list("bases", bases);
        if let Some(owner) = owner {
            decl = decl.with_text("owner", &owner.name);
        }
        self.unit.push(decl);

        if let Some(superclasses) = superclasses {
            self.visit_children(superclasses);
        }
        let inner = Class {
            name: self.text(name).to_string(),
            decorators,
        };
        if let Some(body) = node.child_by_field_name("body") {
            for statement in named_children(body) {
                self.visit(statement, Some(&inner));
            }
        }
    }

    fn function(&mut self, node: Node<'_>, owner: Option<&Class>, decorators: Vec<String>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let declared: Vec<Node<'_>> = node
            .child_by_field_name("parameters")
            .map(|p| {
                named_children(p)
                    .filter(|c| !matches!(c.kind(), "keyword_separator" | "positional_separator"))
                    .collect()
            })
            .unwrap_or_default();
        let binds_receiver = owner.is_some()
            && !decorators.iter().any(|d| d == "staticmethod")
            && declared
                .first()
                .is_some_and(|p| matches!(self.parameter_name(*p), "self" | "cls"));
        let count = declared.len() - usize::from(binds_receiver);

        let kind = if owner.is_some() && self.text(name) == "__init__" {
            NodeKind::Constructor
        } else {
            NodeKind::Method
        };
        let is_async = children(node).next().is_some_and(|c| c.kind() == "async");
        let mut function = StructuralNode::new(kind, self.source.span_between(node, name))
            .with_text("name", self.text(name))
            .with_list("annotations", decorators)
            .with_number("parameter-count", count as i64)
            .with_flag("is-async", is_async);
        if let Some(owner) = owner {
            function = function
                .with_text("owner", &owner.name)
                .with_list("owner-annotations", owner.decorators.clone());
        }
        if let Some(returns) = node.child_by_field_name("return_type") {
            function = function.with_text("type", &compact(self.text(returns)));
        }
        self.unit.push(function);

        for part in ["parameters", "return_type", "body"] {
            if let Some(child) = node.child_by_field_name(part) {
                self.visit_children(child);
            }
        }
    }

    fn parameter_name(&self, parameter: Node<'_>) -> &'a str {
        if parameter.kind() == "identifier" {
            return self.text(parameter);
        }
        parameter
            .child_by_field_name("name")
            .or_else(|| named_children(parameter).next())
            .map(|n| self.text(n))
            .unwrap_or("")
    }

    /// Class-level `name = ...` or `name: T = ...`
    fn field(&mut self, statement: Node<'_>, class: &Class) {
        let Some(assignment) = named_children(statement).next().filter(|c| c.kind() == "assignment") else {
            return;
        };
        let Some(left) = assignment
            .child_by_field_name("left")
            .filter(|l| l.kind() == "identifier")
        else {
            return;
        };
        let mut field = StructuralNode::new(NodeKind::Field, self.source.span(left))
            .with_text("name", self.text(left))
            .with_text("owner", &class.name)
            .with_list("owner-annotations", class.decorators.clone());
        if let Some(declared) = assignment.child_by_field_name("type") {
            field = field.with_text("type", &compact(self.text(declared)));
        }
        self.unit.push(field);
    }

    fn exception_types(&self, value: Node<'_>) -> Vec<String> {
        match value.kind() {
            "tuple" | "parenthesized_expression" | "expression_list" => named_children(value)
                .flat_map(|c| self.exception_types(c))
                .collect(),
            "as_pattern" => named_children(value)
                .next()
                .map(|c| self.exception_types(c))
                .unwrap_or_default(),
            _ => vec![simple_name(&compact(self.text(value))).to_string()],
        }
    }

    fn except(&mut self, node: Node<'_>) {
        let value = named_children(node).find(|c| c.kind() != "block");
        let types = value.map(|v| self.exception_types(v)).unwrap_or_default();
        let end = value.or_else(|| children(node).next()).unwrap_or(node);
        let body = named_children(node).filter(|c| c.kind() == "block").last();

        self.unit.push(
            StructuralNode::new(NodeKind::Catch, self.source.span_between(node, end))
                .with_flag("is-bare", types.is_empty())
                .with_list("exception-types", types)
                .with_flag("is-empty", body.is_some_and(|b| named_children(b).all(is_placeholder)))
                .with_flag("rethrows", body.is_some_and(rethrows)),
        );
    }

    /// Value is the raw text between the quotes, escapes untouched
    fn literal(&mut self, node: Node<'_>) {
        let count = node.child_count();
        let close = count.checked_sub(1).and_then(|i| node.child(i));
        let (from, to) = match (node.child(0), close) {
            (Some(open), Some(close)) if count >= 2 => (open.end_byte(), close.start_byte()),
            _ => (node.start_byte(), node.end_byte()),
        };
        let value = self.source.slice(from, to);
        self.unit.push(
            StructuralNode::new(NodeKind::Literal, self.source.span(node))
                .with_text("value", value)
                .with_number("length", value.chars().count() as i64),
        );
    }

    fn call(&mut self, node: Node<'_>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let call = match function.kind() {
            "identifier" => StructuralNode::new(NodeKind::Call, self.source.span_between(function, node))
                .with_text("name", self.text(function)),
            "attribute" => {
                let Some(attribute) = function.child_by_field_name("attribute") else {
                    return;
                };
                let receiver = match function.child_by_field_name("object") {
                    Some(object) if object.kind() == "identifier" => self.text(object),
                    Some(object) if object.kind() == "attribute" => object
                        .child_by_field_name("attribute")
                        .map(|a| self.text(a))
                        .unwrap_or("(expression)"),
                    _ => "(expression)",
                };
                StructuralNode::new(NodeKind::Call, self.source.span_between(attribute, node))
                    .with_text("name", self.text(attribute))
                    .with_text("receiver", receiver)
            }
            _ => return,
        };
        self.unit.push(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AttrValue;

    fn parse(src: &str) -> StructuralUnit {
        PythonAdapter::new().parse(Path::new("svc.py"), src).unwrap()
    }

    fn nodes(unit: &StructuralUnit, kind: NodeKind) -> Vec<&StructuralNode> {
        unit.nodes_of(kind).map(|(_, n)| n).collect()
    }

    const SERVICE: &str = r#"import os
import requests as http, json
from .models import Order, Item
from typing import (
    List,
    Optional,
)

API_TOKEN = "tok_1234"


@dataclass
class OrderService(Base):
    """Order lookups."""
    timeout: int = 30
    retries = 3

    def __init__(self, repo, *, clock=None):
        self.repo = repo

    @staticmethod
    def build(config):
        return OrderService(config.get("repo"))

    async def find(self, order_id) -> Optional[Order]:
        try:
            return await self.repo.fetch(order_id)
        except (KeyError, errors.NotFound) as exc:
            log.warning("missing %s", exc)
            raise
        except:
            pass
        except ValueError: pass
"#;

    #[test]
    fn test_imports() {
        let unit = parse(SERVICE);
        let imports = nodes(&unit, NodeKind::Import);
        let summary: Vec<(String, String)> = imports
            .iter()
            .map(|n| {
                (
                    n.get("path").unwrap().to_string(),
                    n.get("import-group").unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("os".to_string(), "standard".to_string()),
                ("requests".to_string(), "third-party".to_string()),
                ("json".to_string(), "standard".to_string()),
                (".models".to_string(), "local".to_string()),
                ("typing".to_string(), "standard".to_string()),
            ]
        );
        assert_eq!(
            imports[3].get("names"),
            Some(&AttrValue::List(vec!["Order".into(), "Item".into()]))
        );
        assert_eq!(
            imports[4].get("names"),
            Some(&AttrValue::List(vec!["List".into(), "Optional".into()]))
        );
        assert_eq!(imports[4].get("import-order-position"), Some(&AttrValue::Number(5)));
    }

    #[test]
    fn test_class_fields_and_methods() {
        let unit = parse(SERVICE);
        let types = nodes(&unit, NodeKind::Type);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name(), Some("OrderService"));
        assert_eq!(types[0].get("annotations"), Some(&AttrValue::List(vec!["dataclass".into()])));
        assert_eq!(types[0].get("bases"), Some(&AttrValue::List(vec!["Base".into()])));

        let fields = nodes(&unit, NodeKind::Field);
        let names: Vec<_> = fields.iter().filter_map(|n| n.name()).collect();
        assert_eq!(names, vec!["timeout", "retries"]);
        assert_eq!(fields[0].get("type"), Some(&AttrValue::Text("int".into())));

        let ctor = nodes(&unit, NodeKind::Constructor);
        assert_eq!(ctor.len(), 1);
        assert_eq!(ctor[0].get("parameter-count"), Some(&AttrValue::Number(2)));
        assert_eq!(ctor[0].get("owner"), Some(&AttrValue::Text("OrderService".into())));

        let methods = nodes(&unit, NodeKind::Method);
        let names: Vec<_> = methods.iter().filter_map(|n| n.name()).collect();
        assert_eq!(names, vec!["build", "find"]);
        assert_eq!(methods[0].get("parameter-count"), Some(&AttrValue::Number(1)));
        assert_eq!(
            methods[0].get("annotations"),
            Some(&AttrValue::List(vec!["staticmethod".into()]))
        );
        assert_eq!(methods[1].get("is-async"), Some(&AttrValue::Flag(true)));
        assert_eq!(methods[1].get("parameter-count"), Some(&AttrValue::Number(1)));
        assert_eq!(methods[1].get("type"), Some(&AttrValue::Text("Optional[Order]".into())));
    }

    #[test]
    fn test_except_shapes() {
        let unit = parse(SERVICE);
        let catches = nodes(&unit, NodeKind::Catch);
        assert_eq!(catches.len(), 3);

        assert_eq!(
            catches[0].get("exception-types"),
            Some(&AttrValue::List(vec!["KeyError".into(), "NotFound".into()]))
        );
        assert_eq!(catches[0].get("rethrows"), Some(&AttrValue::Flag(true)));
        assert_eq!(catches[0].get("is-empty"), Some(&AttrValue::Flag(false)));

        assert_eq!(catches[1].get("is-bare"), Some(&AttrValue::Flag(true)));
        assert_eq!(catches[1].get("is-empty"), Some(&AttrValue::Flag(true)));

        assert_eq!(catches[2].get("is-bare"), Some(&AttrValue::Flag(false)));
        assert_eq!(catches[2].get("is-empty"), Some(&AttrValue::Flag(true)));
    }

    #[test]
    fn test_literals_and_calls() {
        let unit = parse(SERVICE);
        let values: Vec<String> = nodes(&unit, NodeKind::Literal)
            .iter()
            .map(|n| n.get("value").unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["tok_1234", "Order lookups.", "repo", "missing %s"]);

        let calls: Vec<_> = nodes(&unit, NodeKind::Call)
            .iter()
            .map(|n| {
                (
                    n.name().unwrap_or_default().to_string(),
                    n.get("receiver").map(|r| r.to_string()),
                )
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                ("OrderService".to_string(), None),
                ("get".to_string(), Some("config".to_string())),
                ("fetch".to_string(), Some("repo".to_string())),
                ("warning".to_string(), Some("log".to_string())),
            ]
        );
    }

    #[test]
    fn test_decorators_are_annotations() {
        let unit = parse(SERVICE);
        let names: Vec<_> = nodes(&unit, NodeKind::Annotation)
            .iter()
            .filter_map(|n| n.name())
            .collect();
        assert_eq!(names, vec!["dataclass", "staticmethod"]);
    }

    #[test]
    fn test_nested_blocks_are_not_class_members() {
        let unit = parse("class A:\n    if DEBUG:\n        level = 1\n    def f(self):\n        x = 2\n");
        assert!(nodes(&unit, NodeKind::Field).is_empty());
        assert_eq!(
            nodes(&unit, NodeKind::Method)[0].get("parameter-count"),
            Some(&AttrValue::Number(0))
        );
    }

    #[test]
    fn test_parse_errors() {
        let adapter = PythonAdapter::new();
        let parse = |src: &str| adapter.parse(Path::new("bad.py"), src);

        assert!(parse("x = 'open\n").unwrap_err().reason.contains("unterminated"));
        assert!(parse("s = \"\"\"never closed\n").unwrap_err().reason.contains("unterminated"));
        assert!(parse("f(1, 2\n").is_err());
        assert!(parse("x = 1)\n").is_err());
        assert!(parse("x = 1\n    y = 2\n").unwrap_err().reason.contains("unexpected indent"));
        assert!(parse("if x:\n        a = 1\n    b = 2\n").unwrap_err().reason.contains("unindent"));
        assert!(parse("def f():\n").is_err());
    }

    #[test]
    fn test_continuations() {
        let unit = parse("total = compute(1,\n    2)\nname = 'a' \\\n    'b'\n");
        assert_eq!(nodes(&unit, NodeKind::Call).len(), 1);
        assert_eq!(nodes(&unit, NodeKind::Literal).len(), 2);
    }
}
