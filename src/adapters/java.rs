//! Java adapter
//!
//! Walks the tree-sitter Java tree. Declarations are recognised as members
//! of a type body; calls, string literals, annotations and catch clauses
//! anywhere in the file. No type resolution is attempted: annotation and
//! type names are compared by simple name.

use crate::adapter::{Capability, CapabilitySet, LanguageAdapter, NodeKind, ParseError, StructuralNode, StructuralUnit};
use crate::adapters::{children, compact, named_children, parse_tree, simple_name, syntax_error, Source, INJECTION_ANNOTATIONS};
use std::path::Path;
use tree_sitter::{Language, Node};

const STANDARD_PREFIXES: &[&str] = &["java.", "javax.", "jdk.", "sun.", "com.sun."];

const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
    "annotation_type_declaration",
];

const TYPE_BODIES: &[&str] = &["class_body", "interface_body", "enum_body", "annotation_type_body"];

/// Adapter for `.java` files
pub struct JavaAdapter {
    language: Language,
    capabilities: CapabilitySet,
}

impl Default for JavaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl JavaAdapter {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_java::LANGUAGE.into(),
            capabilities: Capability::ALL.into_iter().collect(),
        }
    }
}

impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> &str {
        "java"
    }

    fn extensions(&self) -> &[&str] {
        &["java"]
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn parse(&self, path: &Path, text: &str) -> Result<StructuralUnit, ParseError> {
        let tree = parse_tree(&self.language, path, text)?;
        let source = Source::new(text);
        if let Some(reason) = syntax_error(tree.root_node(), &source, "string_literal") {
            return Err(ParseError::new(path, reason));
        }
        let mut walker = Walker {
            source,
            unit: StructuralUnit::new(path, "java"),
            package: None,
            imports: 0,
        };
        walker.visit(tree.root_node(), None);
        Ok(walker.unit.finish())
    }
}

/// The type whose body is being walked
struct Owner {
    name: String,
    annotations: Vec<String>,
    /// Record components, the implicit parameters of a compact constructor
    components: Option<i64>,
}

/// Annotations and keywords of a declaration's `modifiers` node
#[derive(Default)]
struct Modifiers {
    annotations: Vec<String>,
    keywords: Vec<String>,
}

impl Modifiers {
    fn of(declaration: Node<'_>, source: &Source<'_>) -> Self {
        let mut modifiers = Self::default();
        let Some(node) = children(declaration).find(|c| c.kind() == "modifiers") else {
            return modifiers;
        };
        for child in children(node).filter(|c| !c.is_extra()) {
            match child.kind() {
                "marker_annotation" | "annotation" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        modifiers
                            .annotations
                            .push(simple_name(&compact(source.text(name))).to_string());
                    }
                }
                _ => modifiers.keywords.push(source.text(child).to_string()),
            }
        }
        modifiers
    }

    fn has(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k == keyword)
    }

    fn visibility(&self) -> &'static str {
        if self.has("public") {
            "public"
        } else if self.has("protected") {
            "protected"
        } else if self.has("private") {
            "private"
        } else {
            "package"
        }
    }

    fn is_injected(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| INJECTION_ANNOTATIONS.contains(&a.as_str()))
    }
}

/// Whether `node` is declared directly in the body of a named type
fn is_member(node: Node<'_>) -> bool {
    let mut body = node.parent();
    if body.is_some_and(|b| b.kind() == "enum_body_declarations") {
        body = body.and_then(|b| b.parent());
    }
    body.filter(|b| TYPE_BODIES.contains(&b.kind()))
        .and_then(|b| b.parent())
        .is_some_and(|d| TYPE_DECLARATIONS.contains(&d.kind()))
}

/// First token after the modifiers: where a declaration's span starts
fn declaration_start(node: Node<'_>) -> Node<'_> {
    children(node)
        .find(|c| c.kind() != "modifiers" && !c.is_extra())
        .unwrap_or(node)
}

/// Delimiters removed; text blocks also lose the rest of their opening line
fn literal_value(raw: &str) -> &str {
    if let Some(inner) = raw.strip_prefix("\"\"\"") {
        let inner = inner.strip_suffix("\"\"\"").unwrap_or(inner);
        return inner.split_once('\n').map(|(_, rest)| rest).unwrap_or(inner);
    }
    let inner = raw.strip_prefix('"').unwrap_or(raw);
    inner.strip_suffix('"').unwrap_or(inner)
}

/// Whether `node` contains a `throw` outside any nested catch clause
fn rethrows(node: Node<'_>) -> bool {
    named_children(node).any(|c| match c.kind() {
        "throw_statement" => true,
        "catch_clause" => false,
        _ => rethrows(c),
    })
}

struct Walker<'a> {
    source: Source<'a>,
    unit: StructuralUnit,
    package: Option<String>,
    imports: i64,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        self.source.text(node)
    }

    fn visit(&mut self, node: Node<'_>, owner: Option<&Owner>) {
        match node.kind() {
            "package_declaration" => {
                self.package = named_children(node)
                    .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"))
                    .map(|c| compact(self.text(c)));
                return;
            }
            "import_declaration" => {
                self.import(node);
                return;
            }
            kind if TYPE_DECLARATIONS.contains(&kind) => {
                self.type_decl(node, owner);
                return;
            }
            "string_literal" => {
                self.literal(node);
                return;
            }
            "field_declaration" | "constant_declaration" if is_member(node) => self.field(node, owner),
            "method_declaration" | "annotation_type_element_declaration" if is_member(node) => {
                self.method(node, owner, NodeKind::Method)
            }
            "constructor_declaration" | "compact_constructor_declaration" if is_member(node) => {
                self.method(node, owner, NodeKind::Constructor)
            }
            "marker_annotation" | "annotation" => self.annotation(node),
            "method_invocation" => self.call(node),
            "object_creation_expression" => self.constructor_call(node),
            "catch_clause" => self.catch(node),
            _ => {}
        }
        for child in named_children(node) {
            self.visit(child, owner);
        }
    }

    fn with_owner(node: StructuralNode, owner: Option<&Owner>) -> StructuralNode {
        match owner {
            Some(owner) => node
                .with_text("owner", &owner.name)
                .with_list("owner-annotations", owner.annotations.clone()),
            None => node,
        }
    }

    fn import(&mut self, node: Node<'_>) {
        let Some(name) = named_children(node).find(|c| matches!(c.kind(), "scoped_identifier" | "identifier")) else {
            return;
        };
        let is_static = children(node).any(|c| c.kind() == "static");
        let mut path = compact(self.text(name));
        if children(node).any(|c| c.kind() == "asterisk") {
            path.push_str(".*");
        }

        self.imports += 1;
        let group = if is_static {
            "static"
        } else {
            self.import_group(&path)
        };
        let import = StructuralNode::new(NodeKind::Import, self.source.span(node))
            .with_text("name", simple_name(path.trim_end_matches(".*")))
            .with_text("path", &path)
            .with_flag("static", is_static)
            .with_text("import-group", group)
            .with_number("import-order-position", self.imports);
        self.unit.push(import);
    }

    fn import_group(&self, path: &str) -> &'static str {
        if STANDARD_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return "standard";
        }
        if let Some(package) = &self.package {
            let root: Vec<&str> = package.split('.').take(2).collect();
            let root = root.join(".");
            if path == root || path.starts_with(&format!("{}.", root)) {
                return "local";
            }
        }
        "third-party"
    }

    fn type_decl(&mut self, node: Node<'_>, owner: Option<&Owner>) {
        let declaration = match node.kind() {
            "class_declaration" => "class",
            "interface_declaration" => "interface",
            "enum_declaration" => "enum",
            "record_declaration" => "record",
            _ => "annotation",
        };
        let modifiers = Modifiers::of(node, &self.source);
        let name = node.child_by_field_name("name");
        let components = node
            .child_by_field_name("parameters")
            .map(|p| named_children(p).filter(|c| c.kind() == "formal_parameter").count() as i64);

        let inner = name.map(|name| {
            let mut decl = StructuralNode::new(
                NodeKind::Type,
                self.source.span_between(declaration_start(node), name),
            )
            .with_text("name", self.text(name))
            .with_text("declaration", declaration)
            .with_list("modifiers", modifiers.keywords.clone())
            .with_flag("is-final", modifiers.has("final"))
            .with_text("visibility", modifiers.visibility())
            .with_list("annotations", modifiers.annotations.clone());
            if let Some(owner) = owner {
                decl = decl.with_text("owner", &owner.name);
            }
            self.unit.push(decl);
            Owner {
                name: self.text(name).to_string(),
                annotations: modifiers.annotations,
                components,
            }
        });

        for child in named_children(node) {
            self.visit(child, inner.as_ref().or(owner));
        }
    }

    /// One field per declarator: `int a = 1, b;` declares two
    fn field(&mut self, node: Node<'_>, owner: Option<&Owner>) {
        let modifiers = Modifiers::of(node, &self.source);
        let field_type = node
            .child_by_field_name("type")
            .map(|t| compact(self.text(t)).replace(',', ", "))
            .unwrap_or_default();
        let start = declaration_start(node);

        let declarators = named_children(node).filter(|c| c.kind() == "variable_declarator");
        for (i, declarator) in declarators.enumerate() {
            let Some(name) = declarator.child_by_field_name("name") else {
                continue;
            };
            let span = if i == 0 {
                self.source.span_between(start, name)
            } else {
                self.source.span(name)
            };
            let mut field = StructuralNode::new(NodeKind::Field, span)
                .with_text("name", self.text(name))
                .with_text("type", &field_type)
                .with_list("modifiers", modifiers.keywords.clone())
                .with_flag("is-final", modifiers.has("final"))
                .with_flag("is-static", modifiers.has("static"))
                .with_text("visibility", modifiers.visibility())
                .with_list("annotations", modifiers.annotations.clone());
            if modifiers.is_injected() {
                field = field.with_text("injection", "field");
            }
            self.unit.push(Self::with_owner(field, owner));
        }
    }

    fn method(&mut self, node: Node<'_>, owner: Option<&Owner>, kind: NodeKind) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let modifiers = Modifiers::of(node, &self.source);
        let parameters = node
            .child_by_field_name("parameters")
            .map(|p| {
                named_children(p)
                    .filter(|c| matches!(c.kind(), "formal_parameter" | "spread_parameter"))
                    .count() as i64
            })
            .or_else(|| owner.and_then(|o| o.components))
            .unwrap_or(0);

        let mut method = StructuralNode::new(kind, self.source.span_between(declaration_start(node), name))
            .with_text("name", self.text(name))
            .with_list("modifiers", modifiers.keywords.clone())
            .with_flag("is-final", modifiers.has("final"))
            .with_flag("is-static", modifiers.has("static"))
            .with_text("visibility", modifiers.visibility())
            .with_list("annotations", modifiers.annotations.clone())
            .with_number("parameter-count", parameters);
        if let Some(returns) = node.child_by_field_name("type") {
            method = method.with_text("type", &compact(self.text(returns)).replace(',', ", "));
        }
        if modifiers.is_injected() {
            let style = if kind == NodeKind::Constructor {
                "constructor"
            } else {
                "setter"
            };
            method = method.with_text("injection", style);
        }
        self.unit.push(Self::with_owner(method, owner));
    }

    fn annotation(&mut self, node: Node<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let qualified = compact(self.text(name));
        self.unit.push(
            StructuralNode::new(NodeKind::Annotation, self.source.span_between(node, name))
                .with_text("name", simple_name(&qualified))
                .with_text("qualified-name", &qualified),
        );
    }

    fn literal(&mut self, node: Node<'_>) {
        let value = literal_value(self.text(node));
        self.unit.push(
            StructuralNode::new(NodeKind::Literal, self.source.span(node))
                .with_text("value", value)
                .with_number("length", value.chars().count() as i64),
        );
    }

    fn call(&mut self, node: Node<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let mut call = StructuralNode::new(NodeKind::Call, self.source.span_between(name, node))
            .with_text("name", self.text(name))
            .with_flag("constructor-call", false);
        if let Some(object) = node.child_by_field_name("object") {
            let receiver = match object.kind() {
                "identifier" | "this" | "super" => self.text(object),
                "field_access" => object
                    .child_by_field_name("field")
                    .map(|f| self.text(f))
                    .unwrap_or("(expression)"),
                "string_literal" => "(literal)",
                _ => "(expression)",
            };
            call = call.with_text("receiver", receiver);
        }
        self.unit.push(call);
    }

    /// `new T(...)`, named by the simple type name without type arguments
    fn constructor_call(&mut self, node: Node<'_>) {
        let Some(created) = node.child_by_field_name("type") else {
            return;
        };
        let base = if created.kind() == "generic_type" {
            named_children(created).next().unwrap_or(created)
        } else {
            created
        };
        let name = compact(self.text(base));
        self.unit.push(
            StructuralNode::new(NodeKind::Call, self.source.span_between(created, node))
                .with_text("name", simple_name(&name))
                .with_flag("constructor-call", true),
        );
    }

    fn catch(&mut self, node: Node<'_>) {
        let parameter = named_children(node).find(|c| c.kind() == "catch_formal_parameter");
        let types: Vec<String> = parameter
            .and_then(|p| named_children(p).find(|c| c.kind() == "catch_type"))
            .map(|t| {
                named_children(t)
                    .map(|ty| simple_name(&compact(self.text(ty))).to_string())
                    .collect()
            })
            .unwrap_or_default();
        let end = children(node)
            .find(|c| c.kind() == ")")
            .or(parameter)
            .unwrap_or(node);
        let body = node.child_by_field_name("body");

        self.unit.push(
            StructuralNode::new(NodeKind::Catch, self.source.span_between(node, end))
                .with_list("exception-types", types)
                .with_flag("is-empty", body.is_some_and(|b| named_children(b).next().is_none()))
                .with_flag("rethrows", body.is_some_and(rethrows)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AttrValue;

    fn parse(src: &str) -> StructuralUnit {
        JavaAdapter::new().parse(Path::new("Svc.java"), src).unwrap()
    }

    fn nodes(unit: &StructuralUnit, kind: NodeKind) -> Vec<&StructuralNode> {
        unit.nodes_of(kind).map(|(_, n)| n).collect()
    }

    const SERVICE: &str = r#"package com.acme.orders;

import java.util.List;
import org.springframework.stereotype.Service;
import com.acme.orders.model.Order;
import static java.util.Objects.requireNonNull;

@Service
public class OrderService {
    @Autowired
    private OrderRepository repository;

    private final Clock clock;
    private static final String API_KEY = "sk_live_0123456789", OTHER = "x";

    @Inject
    public OrderService(Clock clock, Map<String, List<Order>> index) {
        this.clock = requireNonNull(clock);
    }

    public List<Order> find(String id) throws IOException {
        try {
            return repository.findAll(id);
        } catch (IllegalStateException | java.io.UncheckedIOException e) {
        } catch (RuntimeException ex) {
            log.warn("failed", ex);
            throw ex;
        }
        return List.of();
    }
}
"#;

    #[test]
    fn test_imports() {
        let unit = parse(SERVICE);
        let imports = nodes(&unit, NodeKind::Import);
        let groups: Vec<String> = imports
            .iter()
            .map(|n| n.get("import-group").unwrap().to_string())
            .collect();
        assert_eq!(groups, vec!["standard", "third-party", "local", "static"]);
        assert_eq!(imports[1].get("path"), Some(&AttrValue::Text("org.springframework.stereotype.Service".into())));
        assert_eq!(imports[3].get("import-order-position"), Some(&AttrValue::Number(4)));
        assert_eq!(imports[0].name(), Some("List"));
    }

    #[test]
    fn test_wildcard_import() {
        let unit = parse("package com.acme.app;\nimport com.acme.util.*;\n");
        let imports = nodes(&unit, NodeKind::Import);
        assert_eq!(imports[0].get("path"), Some(&AttrValue::Text("com.acme.util.*".into())));
        assert_eq!(imports[0].name(), Some("util"));
        assert_eq!(imports[0].get("import-group"), Some(&AttrValue::Text("local".into())));
    }

    #[test]
    fn test_type_and_fields() {
        let unit = parse(SERVICE);
        let types = nodes(&unit, NodeKind::Type);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name(), Some("OrderService"));
        assert_eq!(types[0].get("annotations"), Some(&AttrValue::List(vec!["Service".into()])));
        assert_eq!(types[0].span.start.line, 9);

        let fields = nodes(&unit, NodeKind::Field);
        let names: Vec<_> = fields.iter().filter_map(|n| n.name()).collect();
        assert_eq!(names, vec!["repository", "clock", "API_KEY", "OTHER"]);
        assert_eq!(fields[0].get("injection"), Some(&AttrValue::Text("field".into())));
        assert_eq!(fields[0].span.start.line, 11);
        assert!(fields[1].get("injection").is_none());
        assert_eq!(fields[1].get("is-final"), Some(&AttrValue::Flag(true)));
        assert_eq!(fields[2].get("is-static"), Some(&AttrValue::Flag(true)));
        assert_eq!(fields[2].get("type"), Some(&AttrValue::Text("String".into())));
        assert_eq!(fields[0].get("owner"), Some(&AttrValue::Text("OrderService".into())));
        assert_eq!(
            fields[0].get("owner-annotations"),
            Some(&AttrValue::List(vec!["Service".into()]))
        );
    }

    #[test]
    fn test_constructor_and_methods() {
        let unit = parse(SERVICE);
        let ctors = nodes(&unit, NodeKind::Constructor);
        assert_eq!(ctors.len(), 1);
        assert_eq!(ctors[0].get("parameter-count"), Some(&AttrValue::Number(2)));
        assert_eq!(ctors[0].get("injection"), Some(&AttrValue::Text("constructor".into())));

        let methods = nodes(&unit, NodeKind::Method);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].name(), Some("find"));
        assert_eq!(methods[0].get("type"), Some(&AttrValue::Text("List<Order>".into())));
        assert_eq!(methods[0].get("parameter-count"), Some(&AttrValue::Number(1)));
    }

    #[test]
    fn test_record_compact_constructor() {
        let unit = parse("record Point(int x, int y) {\n    Point {\n    }\n}\n");
        let types = nodes(&unit, NodeKind::Type);
        assert_eq!(types[0].get("declaration"), Some(&AttrValue::Text("record".into())));
        let ctors = nodes(&unit, NodeKind::Constructor);
        assert_eq!(ctors.len(), 1);
        assert_eq!(ctors[0].get("parameter-count"), Some(&AttrValue::Number(2)));
    }

    #[test]
    fn test_literals_and_calls() {
        let unit = parse(SERVICE);
        let literals = nodes(&unit, NodeKind::Literal);
        let values: Vec<String> = literals
            .iter()
            .map(|n| n.get("value").unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["sk_live_0123456789", "x", "failed"]);
        assert_eq!(literals[0].get("length"), Some(&AttrValue::Number(18)));
        assert_eq!(literals[0].span.start.line, 14);

        let calls: Vec<(String, Option<String>)> = nodes(&unit, NodeKind::Call)
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
                ("requireNonNull".to_string(), None),
                ("findAll".to_string(), Some("repository".to_string())),
                ("warn".to_string(), Some("log".to_string())),
                ("of".to_string(), Some("List".to_string())),
            ]
        );
    }

    #[test]
    fn test_text_blocks_and_escapes() {
        let unit = parse("class T {\n    String a = \"\"\"\n  hello\n  \"\"\";\n    String b = \"s\\\"x\";\n}\n");
        let values: Vec<String> = nodes(&unit, NodeKind::Literal)
            .iter()
            .map(|n| n.get("value").unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["  hello\n  ", "s\\\"x"]);
    }

    #[test]
    fn test_catch_shapes() {
        let unit = parse(SERVICE);
        let catches = nodes(&unit, NodeKind::Catch);
        assert_eq!(catches.len(), 2);
        assert_eq!(
            catches[0].get("exception-types"),
            Some(&AttrValue::List(vec![
                "IllegalStateException".into(),
                "UncheckedIOException".into()
            ]))
        );
        assert_eq!(catches[0].get("is-empty"), Some(&AttrValue::Flag(true)));
        assert_eq!(catches[0].get("rethrows"), Some(&AttrValue::Flag(false)));
        assert_eq!(catches[1].get("is-empty"), Some(&AttrValue::Flag(false)));
        assert_eq!(catches[1].get("rethrows"), Some(&AttrValue::Flag(true)));
    }

    #[test]
    fn test_comment_only_catch_is_empty() {
        let unit = parse("class T {\n    void f() {\n        try { g(); } catch (Exception e) {\n            // ignored\n        }\n    }\n}\n");
        let catches = nodes(&unit, NodeKind::Catch);
        assert_eq!(catches[0].get("is-empty"), Some(&AttrValue::Flag(true)));
    }

    #[test]
    fn test_annotations_are_nodes() {
        let unit = parse(SERVICE);
        let names: Vec<_> = nodes(&unit, NodeKind::Annotation)
            .iter()
            .filter_map(|n| n.name())
            .collect();
        assert_eq!(names, vec!["Service", "Autowired", "Inject"]);
    }

    #[test]
    fn test_enum_and_nested_types() {
        let src = r#"
enum Color {
    RED("r"), GREEN("g");
    private final String code;
    Color(String code) { this.code = code; }
}
class Outer {
    static class Inner { int x; }
    void run() {
        Runnable r = new Runnable() {
            public void run() { go(); }
        };
    }
}
"#;
        let unit = parse(src);
        let types: Vec<_> = nodes(&unit, NodeKind::Type).iter().filter_map(|n| n.name()).collect();
        assert_eq!(types, vec!["Color", "Outer", "Inner"]);
        let inner = nodes(&unit, NodeKind::Type)[2];
        assert_eq!(inner.get("owner"), Some(&AttrValue::Text("Outer".into())));

        let fields = nodes(&unit, NodeKind::Field);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].get("owner"), Some(&AttrValue::Text("Inner".into())));
        assert_eq!(nodes(&unit, NodeKind::Constructor).len(), 1);

        let calls: Vec<_> = nodes(&unit, NodeKind::Call).iter().filter_map(|n| n.name()).collect();
        assert_eq!(calls, vec!["Runnable", "go"]);
        let literals: Vec<_> = nodes(&unit, NodeKind::Literal)
            .iter()
            .map(|n| n.get("value").unwrap().to_string())
            .collect();
        assert_eq!(literals, vec!["r", "g"]);
    }

    #[test]
    fn test_parse_errors() {
        let adapter = JavaAdapter::new();
        let err = adapter
            .parse(Path::new("Bad.java"), "class A { String s = \"open; }")
            .unwrap_err();
        assert_eq!(err.file, Path::new("Bad.java"));
        assert!(err.reason.contains("unterminated string"));
        assert!(adapter.parse(Path::new("Bad.java"), "class A {").is_err());
        assert!(adapter.parse(Path::new("Bad.java"), "class A { void f() { int x = ; } }").is_err());
    }
}
