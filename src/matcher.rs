//! Matcher engine: evaluates an effective policy against a structural unit
//!
//! Each rule is evaluated on its own; a rule never sees another rule's
//! result. A failing predicate produces one finding per counter-example
//! node, or a single file-level finding when the failure has no node to
//! point at (an `at-least-one` over a file lacking the construct).

use crate::adapter::{StructuralNode, StructuralUnit};
use crate::finding::{sort_findings, Finding, Span};
use crate::predicate::{Condition, Predicate, Selector};
use crate::registry::EffectivePolicy;
use crate::rule::Rule;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

static ATTRIBUTE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{attributes\.([^}]+)\}").expect("placeholder pattern is valid")
});

/// A rule that could not be evaluated for one file
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rule '{rule_id}' failed on {}: {reason}", file.display())]
pub struct RuleEvaluationError {
    pub rule_id: String,
    pub file: PathBuf,
    pub reason: String,
}

/// Result of evaluating a predicate over a unit
///
/// `support` holds nodes that make the predicate true, `counter` nodes that
/// make it false. `not` swaps the two.
#[derive(Debug, Default)]
struct Outcome {
    holds: bool,
    support: BTreeSet<usize>,
    counter: BTreeSet<usize>,
}

/// Stateless evaluator shared by all worker threads
#[derive(Debug, Default, Clone, Copy)]
pub struct MatcherEngine;

impl MatcherEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every rule of `policy` against `unit`
    ///
    /// Evaluation errors are isolated per rule: the failing rule yields an
    /// evaluation-error finding and the remaining rules still run.
    pub fn evaluate(&self, unit: &StructuralUnit, policy: &EffectivePolicy) -> Vec<Finding> {
        let mut findings = Vec::new();

        for rule in &policy.rules {
            match self.evaluate_rule(rule, unit) {
                Ok(mut found) => findings.append(&mut found),
                Err(err) => {
                    log::warn!("{}", err);
                    findings.push(Finding::evaluation_error(
                        &err.rule_id,
                        err.file.clone(),
                        &err.reason,
                    ));
                }
            }
        }

        sort_findings(&mut findings);
        findings
    }

    /// Evaluate a single rule
    pub fn evaluate_rule(
        &self,
        rule: &Rule,
        unit: &StructuralUnit,
    ) -> Result<Vec<Finding>, RuleEvaluationError> {
        let mut evaluator = Evaluator::new(unit);
        let outcome = evaluator
            .predicate(&rule.predicate)
            .map_err(|reason| RuleEvaluationError {
                rule_id: rule.id.clone(),
                file: unit.file.clone(),
                reason,
            })?;

        if outcome.holds {
            return Ok(Vec::new());
        }

        if outcome.counter.is_empty() {
            let message = format_message(&rule.message, rule, None);
            return Ok(vec![Finding::new(
                &rule.id,
                unit.file.clone(),
                Span::file_start(),
                rule.severity,
                &message,
            )]);
        }

        Ok(outcome
            .counter
            .iter()
            .map(|&idx| {
                let node = &unit.nodes[idx];
                let message = format_message(&rule.message, rule, Some(node));
                Finding::new(&rule.id, unit.file.clone(), node.span, rule.severity, &message)
            })
            .collect())
    }
}

/// Per-rule evaluation state
struct Evaluator<'a> {
    unit: &'a StructuralUnit,
    patterns: HashMap<String, Regex>,
}

impl<'a> Evaluator<'a> {
    fn new(unit: &'a StructuralUnit) -> Self {
        Self {
            unit,
            patterns: HashMap::new(),
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<Outcome, String> {
        match predicate {
            Predicate::Every {
                node,
                when,
                require,
            } => {
                let selected = self.select(&Selector {
                    node: *node,
                    when: when.clone(),
                })?;
                let mut outcome = Outcome::default();
                for idx in selected {
                    if self.condition(require, &self.unit.nodes[idx])? {
                        outcome.support.insert(idx);
                    } else {
                        outcome.counter.insert(idx);
                    }
                }
                outcome.holds = outcome.counter.is_empty();
                Ok(outcome)
            }

            Predicate::AtLeastOne {
                node,
                when,
                require,
            } => {
                let selected = self.select(&Selector {
                    node: *node,
                    when: when.clone(),
                })?;
                let mut outcome = Outcome::default();
                for idx in selected {
                    if self.condition(require, &self.unit.nodes[idx])? {
                        outcome.support.insert(idx);
                    }
                }
                // Absence is reported against the file, not the nodes seen
                outcome.holds = !outcome.support.is_empty();
                Ok(outcome)
            }

            Predicate::Order { before, after } => {
                let befores = self.select(before)?;
                let afters = self.select(after)?;
                let mut outcome = Outcome::default();

                let first_after = afters
                    .iter()
                    .map(|&idx| self.unit.nodes[idx].span.start)
                    .min();
                for idx in befores {
                    let start = self.unit.nodes[idx].span.start;
                    match first_after {
                        Some(limit) if start > limit => {
                            outcome.counter.insert(idx);
                        }
                        _ => {
                            outcome.support.insert(idx);
                        }
                    }
                }
                outcome.holds = outcome.counter.is_empty();
                Ok(outcome)
            }

            Predicate::All { of } => {
                let mut outcome = Outcome {
                    holds: true,
                    ..Outcome::default()
                };
                for p in of {
                    let child = self.predicate(p)?;
                    outcome.support.extend(child.support);
                    if !child.holds {
                        outcome.holds = false;
                        outcome.counter.extend(child.counter);
                    }
                }
                Ok(outcome)
            }

            Predicate::Any { of } => {
                let mut outcome = Outcome::default();
                for p in of {
                    let child = self.predicate(p)?;
                    if child.holds {
                        outcome.holds = true;
                        outcome.support.extend(child.support);
                    } else {
                        outcome.counter.extend(child.counter);
                    }
                }
                if outcome.holds {
                    outcome.counter.clear();
                }
                Ok(outcome)
            }

            Predicate::Not { predicate } => {
                let child = self.predicate(predicate)?;
                Ok(Outcome {
                    holds: !child.holds,
                    support: child.counter,
                    counter: child.support,
                })
            }
        }
    }

    /// Indices of the nodes a selector picks, in source order
    fn select(&mut self, selector: &Selector) -> Result<Vec<usize>, String> {
        let mut picked = Vec::new();
        for (idx, node) in self.unit.nodes_of(selector.node) {
            let keep = match &selector.when {
                Some(cond) => self.condition(cond, node)?,
                None => true,
            };
            if keep {
                picked.push(idx);
            }
        }
        Ok(picked)
    }

    fn condition(&mut self, condition: &Condition, node: &StructuralNode) -> Result<bool, String> {
        match condition {
            Condition::Is { node: kind } => Ok(node.kind == *kind),

            Condition::Has { attribute } => {
                check_attribute_ref(attribute)?;
                Ok(node.get(attribute).is_some_and(|v| v.is_present()))
            }

            Condition::Lacks { attribute } => {
                check_attribute_ref(attribute)?;
                Ok(!node.get(attribute).is_some_and(|v| v.is_present()))
            }

            Condition::Equals { attribute, value } => {
                check_attribute_ref(attribute)?;
                Ok(node
                    .get(attribute)
                    .is_some_and(|v| v.texts().iter().any(|t| t == value)))
            }

            Condition::Matches { attribute, pattern } => {
                check_attribute_ref(attribute)?;
                let re = self.pattern(pattern)?;
                Ok(node
                    .get(attribute)
                    .is_some_and(|v| v.texts().iter().any(|t| re.is_match(t))))
            }

            // Every operand is evaluated so that defects surface on every file
            Condition::All { of } => {
                let results = of
                    .iter()
                    .map(|c| self.condition(c, node))
                    .collect::<Result<Vec<bool>, String>>()?;
                Ok(results.into_iter().all(|b| b))
            }

            Condition::Any { of } => {
                let results = of
                    .iter()
                    .map(|c| self.condition(c, node))
                    .collect::<Result<Vec<bool>, String>>()?;
                Ok(results.into_iter().any(|b| b))
            }

            Condition::Not { condition } => Ok(!self.condition(condition, node)?),
        }
    }

    fn pattern(&mut self, pattern: &str) -> Result<Regex, String> {
        if let Some(re) = self.patterns.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
        self.patterns.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

/// Attribute names are `[A-Za-z0-9_.-]+`
fn check_attribute_ref(attribute: &str) -> Result<(), String> {
    let valid = !attribute.is_empty()
        && attribute
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(format!("malformed attribute reference '{}'", attribute))
    }
}

/// Format a message template with node values
fn format_message(template: &str, rule: &Rule, node: Option<&StructuralNode>) -> String {
    let result = ATTRIBUTE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            node.and_then(|n| n.get(&caps[1]))
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(unknown)".to_string())
        })
        .to_string();

    let name = node.and_then(|n| n.name()).unwrap_or("(unknown)");
    let kind = node
        .map(|n| n.kind.to_string())
        .unwrap_or_else(|| "file".to_string());

    result
        .replace("{name}", name)
        .replace("{kind}", &kind)
        .replace("{rule}", &rule.id)
}
