//! Declarative predicate language
//!
//! Two layers:
//! - [`Condition`]: checks on a single structural node (kind, attribute
//!   presence, equality, regex match) combined with `all` / `any` / `not`.
//! - [`Predicate`]: checks on a whole unit: quantifiers over nodes of one
//!   kind (`every`, `at-least-one`), source ordering (`order`) and `all` /
//!   `any` / `not` over predicates.
//!
//! There is no other control flow: evaluation always terminates and never
//! depends on another rule's outcome.
//!
//! ```yaml
//! predicate:
//!   kind: every
//!   node: field
//!   require:
//!     kind: not
//!     condition: { kind: equals, attribute: injection, value: field }
//! ```

use crate::adapter::{Capability, CapabilitySet, NodeKind};
use serde::{Deserialize, Serialize};

/// Check evaluated against one node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Condition {
    /// Node kind equality
    Is { node: NodeKind },
    /// Attribute is present (and not a false flag / empty list)
    Has { attribute: String },
    /// Attribute is absent
    Lacks { attribute: String },
    /// Attribute equals a value (any element, for lists)
    Equals { attribute: String, value: String },
    /// Attribute matches a regex (any element, for lists)
    Matches { attribute: String, pattern: String },
    All { of: Vec<Condition> },
    Any { of: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn has(attribute: &str) -> Self {
        Condition::Has {
            attribute: attribute.to_string(),
        }
    }

    pub fn lacks(attribute: &str) -> Self {
        Condition::Lacks {
            attribute: attribute.to_string(),
        }
    }

    pub fn equals(attribute: &str, value: &str) -> Self {
        Condition::Equals {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    pub fn matches(attribute: &str, pattern: &str) -> Self {
        Condition::Matches {
            attribute: attribute.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    /// A compound with no operands anywhere in the tree
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::All { of } | Condition::Any { of } => {
                of.is_empty() || of.iter().any(Condition::is_empty)
            }
            Condition::Not { condition } => condition.is_empty(),
            _ => false,
        }
    }

    fn collect_capabilities(&self, caps: &mut CapabilitySet) {
        match self {
            Condition::Is { node } => {
                caps.insert(node.capability());
            }
            Condition::Has { attribute }
            | Condition::Lacks { attribute }
            | Condition::Equals { attribute, .. } => {
                caps.extend(Capability::for_attribute(attribute));
            }
            Condition::Matches { attribute, .. } => {
                caps.extend(Capability::for_attribute(attribute));
                if attribute == "name" {
                    caps.insert(Capability::NamingConvention);
                }
            }
            Condition::All { of } | Condition::Any { of } => {
                for c in of {
                    c.collect_capabilities(caps);
                }
            }
            Condition::Not { condition } => condition.collect_capabilities(caps),
        }
    }
}

/// Nodes of one kind, optionally narrowed by a condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    pub node: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
}

impl Selector {
    pub fn new(node: NodeKind) -> Self {
        Self { node, when: None }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }
}

/// Check evaluated against a whole structural unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Predicate {
    /// For every selected node, `require` must hold (vacuously true when none)
    Every {
        node: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
        require: Condition,
    },
    /// At least one selected node must satisfy `require`
    AtLeastOne {
        node: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Condition>,
        require: Condition,
    },
    /// Every node selected by `before` precedes every node selected by `after`
    Order { before: Selector, after: Selector },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn every(node: NodeKind, require: Condition) -> Self {
        Predicate::Every {
            node,
            when: None,
            require,
        }
    }

    pub fn at_least_one(node: NodeKind, require: Condition) -> Self {
        Predicate::AtLeastOne {
            node,
            when: None,
            require,
        }
    }

    pub fn order(before: Selector, after: Selector) -> Self {
        Predicate::Order { before, after }
    }

    /// A compound with no operands anywhere in the tree
    pub fn is_empty(&self) -> bool {
        match self {
            Predicate::Every { when, require, .. } | Predicate::AtLeastOne { when, require, .. } => {
                require.is_empty() || when.as_ref().is_some_and(Condition::is_empty)
            }
            Predicate::Order { before, after } => {
                before.when.as_ref().is_some_and(Condition::is_empty)
                    || after.when.as_ref().is_some_and(Condition::is_empty)
            }
            Predicate::All { of } | Predicate::Any { of } => {
                of.is_empty() || of.iter().any(Predicate::is_empty)
            }
            Predicate::Not { predicate } => predicate.is_empty(),
        }
    }

    /// Capabilities an adapter must have to evaluate this predicate
    pub fn required_capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::new();
        self.collect_capabilities(&mut caps);
        caps
    }

    fn collect_capabilities(&self, caps: &mut CapabilitySet) {
        match self {
            Predicate::Every { node, when, require }
            | Predicate::AtLeastOne { node, when, require } => {
                caps.insert(node.capability());
                if let Some(w) = when {
                    w.collect_capabilities(caps);
                }
                require.collect_capabilities(caps);
            }
            Predicate::Order { before, after } => {
                caps.insert(Capability::NodeOrdering);
                for sel in [before, after] {
                    caps.insert(sel.node.capability());
                    if let Some(w) = &sel.when {
                        w.collect_capabilities(caps);
                    }
                }
            }
            Predicate::All { of } | Predicate::Any { of } => {
                for p in of {
                    p.collect_capabilities(caps);
                }
            }
            Predicate::Not { predicate } => predicate.collect_capabilities(caps),
        }
    }
}
