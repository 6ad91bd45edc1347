//! Built-in language adapters
//!
//! Both adapters parse with tree-sitter and walk the concrete syntax tree
//! into [`StructuralNode`](crate::adapter::StructuralNode)s. A tree holding
//! ERROR or MISSING nodes is never walked: the first problem is reported
//! as a [`ParseError`] instead.

pub mod java;
pub mod python;

use crate::adapter::ParseError;
use crate::finding::{Position, Span};
use std::path::Path;
use tree_sitter::{Language, Node, Parser, Tree};

/// Annotation names that mark a dependency as container-injected
pub(crate) const INJECTION_ANNOTATIONS: &[&str] = &["Autowired", "Inject", "Resource"];

/// Token kinds that close a string node
const STRING_CLOSERS: &[&str] = &["\"", "\"\"\"", "'", "string_end"];

/// Last segment of a dotted name (`javax.inject.Inject` -> `Inject`)
pub(crate) fn simple_name(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

/// `text` with all whitespace removed
pub(crate) fn compact(text: &str) -> String {
    text.split_whitespace().collect()
}

/// Parse `text` with a fresh parser; parsers are not shared between threads
pub(crate) fn parse_tree(language: &Language, path: &Path, text: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| ParseError::new(path, format!("grammar unavailable: {}", e)))?;
    parser
        .parse(text, None)
        .ok_or_else(|| ParseError::new(path, "parser produced no tree"))
}

pub(crate) fn children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    (0..node.child_count()).filter_map(move |i| node.child(i))
}

/// Named children, comments excluded
pub(crate) fn named_children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    (0..node.named_child_count())
        .filter_map(move |i| node.named_child(i))
        .filter(|c| !c.is_extra())
}

/// Source text with tree-sitter byte offsets mapped to 1-based positions
pub(crate) struct Source<'a> {
    text: &'a str,
}

impl<'a> Source<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self { text }
    }

    pub(crate) fn text(&self, node: Node<'_>) -> &'a str {
        self.slice(node.start_byte(), node.end_byte())
    }

    pub(crate) fn slice(&self, from: usize, to: usize) -> &'a str {
        self.text.get(from..to).unwrap_or("")
    }

    /// Columns count characters, not bytes
    fn position(&self, byte: usize, column_bytes: usize, row: usize) -> Position {
        let line_start = byte.saturating_sub(column_bytes);
        let column = self.slice(line_start, byte).chars().count();
        Position::new(row + 1, column + 1)
    }

    pub(crate) fn start(&self, node: Node<'_>) -> Position {
        let point = node.start_position();
        self.position(node.start_byte(), point.column, point.row)
    }

    pub(crate) fn end(&self, node: Node<'_>) -> Position {
        let point = node.end_position();
        self.position(node.end_byte(), point.column, point.row)
    }

    pub(crate) fn span(&self, node: Node<'_>) -> Span {
        Span::new(self.start(node), self.end(node))
    }

    /// Span from the start of `from` to the end of `to`
    pub(crate) fn span_between(&self, from: Node<'_>, to: Node<'_>) -> Span {
        Span::new(self.start(from), self.end(to))
    }

    /// Whitespace before `node` on its line, or `None` if other text precedes it
    pub(crate) fn leading_whitespace(&self, node: Node<'_>) -> Option<&'a str> {
        let line_start = node.start_byte().saturating_sub(node.start_position().column);
        let prefix = self.slice(line_start, node.start_byte());
        prefix
            .chars()
            .all(|c| matches!(c, ' ' | '\t' | '\x0c'))
            .then_some(prefix)
    }

    /// Indentation of the line `node` starts on
    pub(crate) fn line_indent(&self, node: Node<'_>) -> &'a str {
        let line_start = node.start_byte().saturating_sub(node.start_position().column);
        let line = self.slice(line_start, node.start_byte());
        let end = line
            .find(|c: char| !matches!(c, ' ' | '\t' | '\x0c'))
            .unwrap_or(line.len());
        &line[..end]
    }
}

/// Describe the first problem in a tree with errors, `None` for a clean tree
///
/// Unterminated strings are reported ahead of any other problem; the
/// grammar tends to recover from them somewhere far from the opening quote.
pub(crate) fn syntax_error(root: Node<'_>, source: &Source<'_>, string_kind: &str) -> Option<String> {
    if !root.has_error() {
        return None;
    }
    let mut problems = Vec::new();
    collect_problems(root, &mut problems);
    let mut strings = Vec::new();
    collect_kind(root, string_kind, &mut strings);

    if let Some(open) = strings.iter().find(|s| !is_closed(**s)) {
        return Some(unterminated(source.text(*open), source.start(*open)));
    }
    for problem in &problems {
        if problem.is_missing() {
            if let Some(parent) = problem.parent().filter(|p| p.kind() == string_kind) {
                return Some(unterminated(source.text(parent), source.start(parent)));
            }
            if STRING_CLOSERS.contains(&problem.kind()) {
                return Some(unterminated("", source.start(*problem)));
            }
        } else if has_open_quote(source.text(*problem)) {
            return Some(unterminated(source.text(*problem), source.start(*problem)));
        }
    }

    let Some(first) = problems.first() else {
        return Some(format!("syntax error at {}", source.span(root)));
    };
    let at = source.span(*first);
    if first.is_missing() {
        let kind = first.kind();
        return Some(if matches!(kind, ")" | "]" | "}") {
            format!("unclosed bracket, expected '{}' at {}", kind, at)
        } else {
            format!("expected '{}' at {}", kind, at)
        });
    }
    let snippet: String = source
        .text(*first)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .chars()
        .take(24)
        .collect();
    Some(if snippet.is_empty() {
        format!("syntax error at {}", at)
    } else {
        format!("unexpected '{}' at {}", snippet, at)
    })
}

fn collect_problems<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    if node.is_error() || node.is_missing() {
        out.push(node);
        return;
    }
    for child in children(node).filter(|c| c.has_error()) {
        collect_problems(child, out);
    }
}

fn collect_kind<'t>(node: Node<'t>, kind: &str, out: &mut Vec<Node<'t>>) {
    if node.kind() == kind {
        out.push(node);
    }
    for child in children(node) {
        collect_kind(child, kind, out);
    }
}

fn is_closed(string: Node<'_>) -> bool {
    let count = string.child_count();
    count >= 2
        && string
            .child(count - 1)
            .is_some_and(|last| !last.is_missing() && STRING_CLOSERS.contains(&last.kind()))
}

/// An odd number of unescaped quotes of either kind
fn has_open_quote(text: &str) -> bool {
    let mut double = 0usize;
    let mut single = 0usize;
    let mut escaped = false;
    for c in text.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => double += 1,
            '\'' => single += 1,
            _ => {}
        }
    }
    double % 2 == 1 || single % 2 == 1
}

fn unterminated(text: &str, at: Position) -> String {
    let triple = text
        .find(['"', '\''])
        .and_then(|i| text.get(i..i + 3))
        .is_some_and(|q| q == "\"\"\"" || q == "'''");
    let what = if triple {
        "triple-quoted string"
    } else {
        "string literal"
    };
    format!("unterminated {} at {}:{}", what, at.line, at.column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("javax.inject.Inject"), "Inject");
        assert_eq!(simple_name("Inject"), "Inject");
    }

    #[test]
    fn test_open_quotes() {
        assert!(has_open_quote("\"open;"));
        assert!(!has_open_quote("\"a\\\"b\""));
        assert!(!has_open_quote("'x' \"y\""));
    }

    #[test]
    fn test_unterminated_wording() {
        let at = Position::new(2, 5);
        assert_eq!(unterminated("\"open", at), "unterminated string literal at 2:5");
        assert_eq!(
            unterminated("b'''never", at),
            "unterminated triple-quoted string at 2:5"
        );
    }

    #[test]
    fn test_positions_count_characters() {
        let text = "é = 1\nab";
        let language: Language = tree_sitter_python::LANGUAGE.into();
        let tree = parse_tree(&language, Path::new("x.py"), text).unwrap();
        let source = Source::new(text);
        let root = tree.root_node();
        let last = named_children(root).last().unwrap();
        assert_eq!(source.start(last), Position::new(2, 1));
        let first = named_children(root).next().unwrap();
        assert_eq!(source.end(first), Position::new(1, 6));
    }
}
