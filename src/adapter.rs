//! Language adapters: turn raw source text into structural units
//!
//! Every supported language provides a [`LanguageAdapter`]. Adapters are
//! lexical/structural only; they never type-check. What a given adapter can
//! answer is advertised through its [`CapabilitySet`], which the registry
//! uses to reject rules the language cannot evaluate.

use crate::finding::Span;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error during parsing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {reason}", file.display())]
pub struct ParseError {
    pub file: PathBuf,
    pub reason: String,
}

impl ParseError {
    pub fn new(file: &Path, reason: impl Into<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Kind of a structural node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Import,
    Type,
    Field,
    Method,
    Constructor,
    Annotation,
    Call,
    Literal,
    Catch,
}

impl NodeKind {
    /// Capability an adapter needs to produce nodes of this kind
    pub fn capability(&self) -> Capability {
        match self {
            NodeKind::Import => Capability::ImportGrouping,
            NodeKind::Type | NodeKind::Field | NodeKind::Method | NodeKind::Constructor => {
                Capability::Declarations
            }
            NodeKind::Annotation => Capability::AnnotationPresence,
            NodeKind::Call => Capability::CallUsage,
            NodeKind::Literal => Capability::LiteralInspection,
            NodeKind::Catch => Capability::ExceptionHandlingShape,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Import => "import",
            NodeKind::Type => "type",
            NodeKind::Field => "field",
            NodeKind::Method => "method",
            NodeKind::Constructor => "constructor",
            NodeKind::Annotation => "annotation",
            NodeKind::Call => "call",
            NodeKind::Literal => "literal",
            NodeKind::Catch => "catch",
        };
        write!(f, "{}", s)
    }
}

/// Predicate kinds an adapter can evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Types, fields, methods and constructors
    Declarations,
    /// Annotations / decorators on declarations
    AnnotationPresence,
    /// Pattern checks on declared names
    NamingConvention,
    /// Import statements and their grouping
    ImportGrouping,
    /// Modifiers and injection style (constructor vs. field injection)
    ConstructUsage,
    /// Shape of catch / except blocks
    ExceptionHandlingShape,
    /// String literal contents
    LiteralInspection,
    /// Call sites
    CallUsage,
    /// Source-order relations between nodes
    NodeOrdering,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Capability; 9] = [
        Capability::Declarations,
        Capability::AnnotationPresence,
        Capability::NamingConvention,
        Capability::ImportGrouping,
        Capability::ConstructUsage,
        Capability::ExceptionHandlingShape,
        Capability::LiteralInspection,
        Capability::CallUsage,
        Capability::NodeOrdering,
    ];

    /// Capability implied by reading a well-known attribute
    ///
    /// Attributes outside this vocabulary need no capability; adapters may
    /// attach extra attributes freely.
    pub fn for_attribute(attribute: &str) -> Option<Capability> {
        match attribute {
            "annotations" | "owner-annotations" => Some(Capability::AnnotationPresence),
            "import-group" | "import-order-position" | "path" | "static" => {
                Some(Capability::ImportGrouping)
            }
            "injection" | "modifiers" | "is-final" | "is-static" | "visibility" => {
                Some(Capability::ConstructUsage)
            }
            "exception-types" | "is-empty" | "rethrows" | "is-bare" => {
                Some(Capability::ExceptionHandlingShape)
            }
            "value" | "length" => Some(Capability::LiteralInspection),
            "receiver" => Some(Capability::CallUsage),
            "owner" | "parameter-count" | "declaration" | "type" => {
                Some(Capability::Declarations)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Declarations => "declarations",
            Capability::AnnotationPresence => "annotation-presence",
            Capability::NamingConvention => "naming-convention",
            Capability::ImportGrouping => "import-grouping",
            Capability::ConstructUsage => "construct-usage",
            Capability::ExceptionHandlingShape => "exception-handling-shape",
            Capability::LiteralInspection => "literal-inspection",
            Capability::CallUsage => "call-usage",
            Capability::NodeOrdering => "node-ordering",
        };
        write!(f, "{}", s)
    }
}

/// Set of capabilities
pub type CapabilitySet = BTreeSet<Capability>;

/// Value of a node attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Flag(bool),
    Number(i64),
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    /// String forms used for equality and pattern checks
    pub fn texts(&self) -> Vec<String> {
        match self {
            AttrValue::Flag(b) => vec![b.to_string()],
            AttrValue::Number(n) => vec![n.to_string()],
            AttrValue::Text(s) => vec![s.clone()],
            AttrValue::List(items) => items.clone(),
        }
    }

    /// Whether the attribute counts as present
    ///
    /// A `false` flag or an empty list is treated like a missing attribute.
    pub fn is_present(&self) -> bool {
        match self {
            AttrValue::Flag(b) => *b,
            AttrValue::List(items) => !items.is_empty(),
            _ => true,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::List(items) => write!(f, "{}", items.join(", ")),
            other => write!(f, "{}", other.texts().join("")),
        }
    }
}

/// A node of a structural unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralNode {
    pub kind: NodeKind,
    pub span: Span,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl StructuralNode {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            span,
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute (builder style)
    pub fn with(mut self, key: &str, value: AttrValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_text(self, key: &str, value: &str) -> Self {
        self.with(key, AttrValue::Text(value.to_string()))
    }

    pub fn with_flag(self, key: &str, value: bool) -> Self {
        self.with(key, AttrValue::Flag(value))
    }

    pub fn with_list(self, key: &str, values: Vec<String>) -> Self {
        self.with(key, AttrValue::List(values))
    }

    pub fn with_number(self, key: &str, value: i64) -> Self {
        self.with(key, AttrValue::Number(value))
    }

    /// Get attribute value
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    /// Declared name, when the node has one
    pub fn name(&self) -> Option<&str> {
        match self.attributes.get("name") {
            Some(AttrValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// The parsed form of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralUnit {
    pub file: PathBuf,
    pub language: String,
    /// Nodes in source order
    pub nodes: Vec<StructuralNode>,
}

impl StructuralUnit {
    pub fn new(file: &Path, language: &str) -> Self {
        Self {
            file: file.to_path_buf(),
            language: language.to_string(),
            nodes: Vec::new(),
        }
    }

    /// Append a node; call [`StructuralUnit::finish`] once all nodes are in
    pub fn push(&mut self, node: StructuralNode) {
        self.nodes.push(node);
    }

    /// Put nodes into source order (stable for equal starts)
    pub fn finish(mut self) -> Self {
        self.nodes.sort_by(|a, b| a.span.start.cmp(&b.span.start));
        self
    }

    /// Nodes of a given kind
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = (usize, &StructuralNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.kind == kind)
    }
}

/// Adapter trait for language-specific parsing
pub trait LanguageAdapter: Send + Sync {
    /// Language tag (e.g., "java", "python")
    fn language(&self) -> &str;

    /// File extensions this adapter handles (without dot)
    fn extensions(&self) -> &[&str];

    /// Predicate kinds this adapter can evaluate
    fn capabilities(&self) -> &CapabilitySet;

    /// Parse file content into a structural unit
    fn parse(&self, path: &Path, text: &str) -> Result<StructuralUnit, ParseError>;
}

/// Registered adapters, addressable by language tag and by extension
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    by_language: HashMap<String, Arc<dyn LanguageAdapter>>,
    by_extension: HashMap<String, String>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Java and Python adapters
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::adapters::java::JavaAdapter::new()));
        registry.register(Arc::new(crate::adapters::python::PythonAdapter::new()));
        registry
    }

    /// Register an adapter (replaces one with the same language tag)
    pub fn register(&mut self, adapter: Arc<dyn LanguageAdapter>) {
        let language = adapter.language().to_lowercase();
        for ext in adapter.extensions() {
            self.by_extension
                .insert(ext.to_lowercase(), language.clone());
        }
        self.by_language.insert(language, adapter);
    }

    /// Adapter for a language tag
    pub fn get(&self, language: &str) -> Option<Arc<dyn LanguageAdapter>> {
        self.by_language.get(&language.to_lowercase()).cloned()
    }

    /// Language tag for a path, by extension
    pub fn language_for_path(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension.get(&ext).map(|s| s.as_str())
    }

    /// Resolve the adapter for a file: declared tag first, extension second
    pub fn resolve(&self, path: &Path, declared: Option<&str>) -> Option<Arc<dyn LanguageAdapter>> {
        match declared {
            Some(tag) => self.get(tag),
            None => self.get(self.language_for_path(path)?),
        }
    }

    /// Known language tags, sorted
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.by_language.keys().cloned().collect();
        langs.sort();
        langs
    }

    /// Capability set per language
    pub fn capabilities(&self) -> BTreeMap<String, CapabilitySet> {
        self.by_language
            .iter()
            .map(|(lang, adapter)| (lang.clone(), adapter.capabilities().clone()))
            .collect()
    }

    /// All extensions handled by registered adapters
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Position;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(Path::new("Foo.java"), "unterminated string literal");
        assert_eq!(format!("{}", err), "Foo.java: unterminated string literal");
    }

    #[test]
    fn test_attr_presence() {
        assert!(!AttrValue::Flag(false).is_present());
        assert!(AttrValue::Flag(true).is_present());
        assert!(!AttrValue::List(vec![]).is_present());
        assert!(AttrValue::Text(String::new()).is_present());
    }

    #[test]
    fn test_unit_finish_orders_nodes() {
        let mut unit = StructuralUnit::new(Path::new("a.py"), "python");
        unit.push(StructuralNode::new(
            NodeKind::Literal,
            Span::new(Position::new(4, 1), Position::new(4, 3)),
        ));
        unit.push(StructuralNode::new(
            NodeKind::Import,
            Span::new(Position::new(1, 1), Position::new(1, 9)),
        ));
        let unit = unit.finish();
        assert_eq!(unit.nodes[0].kind, NodeKind::Import);
        assert_eq!(unit.nodes_of(NodeKind::Literal).count(), 1);
    }

    #[test]
    fn test_registry_resolution() {
        let registry = AdapterRegistry::with_builtin();
        assert_eq!(registry.languages(), vec!["java", "python"]);
        assert_eq!(
            registry.language_for_path(Path::new("src/Main.JAVA")),
            Some("java")
        );
        assert!(registry.resolve(Path::new("x.txt"), None).is_none());
        let py = registry
            .resolve(Path::new("x.txt"), Some("python"))
            .unwrap();
        assert_eq!(py.language(), "python");
    }

    #[test]
    fn test_attribute_capabilities() {
        assert_eq!(
            Capability::for_attribute("injection"),
            Some(Capability::ConstructUsage)
        );
        assert_eq!(Capability::for_attribute("custom-tag"), None);
        assert_eq!(NodeKind::Catch.capability(), Capability::ExceptionHandlingShape);
    }
}
