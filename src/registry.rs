//! Rule registry: merges rule sets into one effective policy per language
//!
//! Merge order:
//! 1. Universal rules apply to every language, language rules to their own.
//! 2. On an id collision the language-specific rule wins over the universal one.
//! 3. Between equally specific rules, the rule set later in the explicit
//!    precedence order wins. Load order never matters.
//!
//! Rules that need a capability the language's adapter lacks are excluded
//! from that language's policy and recorded as [`RuleRejection`]s so a run
//! never reports "clean" for something it could not check.

use crate::adapter::{Capability, CapabilitySet};
use crate::finding::{Severity, PARSE_ERROR_RULE_ID};
use crate::rule::{Rule, RuleLoadError, RuleSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Identity of a built policy
///
/// `serial` increases whenever the registry inputs change; `fingerprint`
/// is a digest of those inputs, stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub serial: u64,
    pub fingerprint: String,
}

impl std::fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = &self.fingerprint[..self.fingerprint.len().min(12)];
        write!(f, "v{} ({})", self.serial, short)
    }
}

/// Configuration-level adjustments applied while building
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleOverrides {
    /// Rule ids removed from every policy
    pub disabled: BTreeSet<String>,
    /// Severity replacements by rule id
    pub severity: BTreeMap<String, Severity>,
}

/// A rule excluded from a language's policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRejection {
    pub rule_id: String,
    pub language: String,
    pub missing: Vec<Capability>,
}

impl std::fmt::Display for RuleRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let missing: Vec<String> = self.missing.iter().map(|c| c.to_string()).collect();
        write!(
            f,
            "rule '{}' cannot be evaluated for {}: missing {}",
            self.rule_id,
            self.language,
            missing.join(", ")
        )
    }
}

/// Conflict-resolved rules applied to one language
#[derive(Debug)]
pub struct EffectivePolicy {
    pub language: String,
    pub version: PolicyVersion,
    /// Winning rules, sorted by id
    pub rules: Vec<Arc<Rule>>,
    pub rejected: Vec<RuleRejection>,
}

impl EffectivePolicy {
    /// Get a rule by id
    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules
            .binary_search_by(|r| r.id.as_str().cmp(rule_id))
            .ok()
            .map(|idx| self.rules[idx].as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Effective policies for every known language, built in one pass
#[derive(Debug, Clone)]
pub struct PolicySet {
    pub version: PolicyVersion,
    policies: BTreeMap<String, Arc<EffectivePolicy>>,
}

impl PolicySet {
    /// Policy for a language tag
    pub fn for_language(&self, language: &str) -> Option<Arc<EffectivePolicy>> {
        self.policies.get(language).cloned()
    }

    /// Languages with a policy, sorted
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(|s| s.as_str())
    }

    /// Rejections across all languages
    pub fn rejections(&self) -> Vec<RuleRejection> {
        self.policies
            .values()
            .flat_map(|p| p.rejected.iter().cloned())
            .collect()
    }
}

/// Builds policy sets from rule sets, tracking the version across builds
#[derive(Debug, Default)]
pub struct RuleRegistry {
    precedence: Vec<String>,
    overrides: RuleOverrides,
    serial: u64,
    last_fingerprint: Option<String>,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    rule_sets: Vec<&'a RuleSet>,
    precedence: &'a [String],
    overrides: &'a RuleOverrides,
}

impl RuleRegistry {
    /// Create a registry with an explicit precedence order (earliest first)
    pub fn new(precedence: Vec<String>) -> Self {
        Self {
            precedence,
            ..Self::default()
        }
    }

    /// Precedence order for a build over `rule_sets`
    ///
    /// An explicit order always wins. Without one, a single loaded set is
    /// its own order; several sets get no order at all, so the build fails
    /// with [`RuleLoadError::MissingPrecedence`] instead of ranking them by
    /// the order their files happened to load in.
    pub fn precedence_for(explicit: Option<Vec<String>>, rule_sets: &[RuleSet]) -> Vec<String> {
        match (explicit, rule_sets) {
            (Some(order), _) => order,
            (None, [only]) => vec![only.name.clone()],
            (None, _) => Vec::new(),
        }
    }

    /// Set configuration overrides
    pub fn with_overrides(mut self, overrides: RuleOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Replace the precedence order; the next build gets a new version
    pub fn set_precedence(&mut self, precedence: Vec<String>) {
        self.precedence = precedence;
    }

    /// Replace the overrides; the next build gets a new version
    pub fn set_overrides(&mut self, overrides: RuleOverrides) {
        self.overrides = overrides;
    }

    /// Current precedence order
    pub fn precedence(&self) -> &[String] {
        &self.precedence
    }

    /// Build the effective policy of every language in `capabilities`
    ///
    /// Fails on the first configuration defect; no partial policy is
    /// returned.
    pub fn build(
        &mut self,
        rule_sets: &[RuleSet],
        capabilities: &BTreeMap<String, CapabilitySet>,
    ) -> Result<PolicySet, RuleLoadError> {
        let rank = self.precedence_ranks(rule_sets)?;
        let validated = self.validate(rule_sets)?;
        let version = self.next_version(rule_sets);

        let known: HashSet<&str> = capabilities.keys().map(|s| s.as_str()).collect();
        for set in rule_sets {
            if let crate::rule::Scope::Language(tag) = &set.scope {
                if !known.contains(tag.as_str()) {
                    log::warn!(
                        "Rule set '{}' targets language '{}' which has no adapter",
                        set.name,
                        tag
                    );
                }
            }
        }

        let mut policies = BTreeMap::new();
        for (language, caps) in capabilities {
            let policy = resolve_language(language, caps, &validated, &rank, &version);
            log::debug!(
                "Policy {} for {}: {} rule(s), {} rejected",
                version,
                language,
                policy.rules.len(),
                policy.rejected.len()
            );
            policies.insert(language.clone(), Arc::new(policy));
        }

        Ok(PolicySet { version, policies })
    }

    /// Position of every rule set in the precedence order
    fn precedence_ranks(&self, rule_sets: &[RuleSet]) -> Result<HashMap<String, usize>, RuleLoadError> {
        let mut names = HashSet::new();
        for set in rule_sets {
            if !names.insert(set.name.as_str()) {
                return Err(RuleLoadError::DuplicateRuleSet(set.name.clone()));
            }
        }

        let mut rank = HashMap::new();
        for (idx, name) in self.precedence.iter().enumerate() {
            if !names.contains(name.as_str()) {
                return Err(RuleLoadError::UnknownRuleSet(name.clone()));
            }
            if rank.insert(name.clone(), idx).is_some() {
                return Err(RuleLoadError::DuplicatePrecedence(name.clone()));
            }
        }

        for set in rule_sets {
            if !rank.contains_key(&set.name) {
                return Err(RuleLoadError::MissingPrecedence(set.name.clone()));
            }
        }

        Ok(rank)
    }

    /// Validate every definition and apply overrides
    fn validate(&self, rule_sets: &[RuleSet]) -> Result<Vec<(String, Arc<Rule>)>, RuleLoadError> {
        let mut rules = Vec::new();

        for set in rule_sets {
            let mut seen = HashSet::new();
            for def in &set.rules {
                if def.id == PARSE_ERROR_RULE_ID {
                    return Err(RuleLoadError::ReservedRuleId {
                        rule_set: set.name.clone(),
                        rule_id: def.id.clone(),
                    });
                }
                if !seen.insert(def.id.as_str()) {
                    return Err(RuleLoadError::DuplicateRule {
                        rule_set: set.name.clone(),
                        rule_id: def.id.clone(),
                    });
                }

                let predicate = match &def.predicate {
                    Some(p) if !p.is_empty() => p.clone(),
                    _ => {
                        return Err(RuleLoadError::EmptyPredicate {
                            rule_set: set.name.clone(),
                            rule_id: def.id.clone(),
                        })
                    }
                };

                let severity: Severity =
                    def.severity
                        .parse()
                        .map_err(|_| RuleLoadError::InvalidSeverity {
                            rule_set: set.name.clone(),
                            rule_id: def.id.clone(),
                            severity: def.severity.clone(),
                        })?;

                if self.overrides.disabled.contains(&def.id) {
                    continue;
                }

                let severity = self
                    .overrides
                    .severity
                    .get(&def.id)
                    .copied()
                    .unwrap_or(severity);

                rules.push((
                    set.name.clone(),
                    Arc::new(Rule {
                        id: def.id.clone(),
                        scope: set.scope.clone(),
                        category: def.category.clone(),
                        severity,
                        predicate,
                        message: def.message.clone(),
                        rationale: def.rationale.clone(),
                        origin: set.name.clone(),
                    }),
                ));
            }
        }

        Ok(rules)
    }

    /// Version for this build: bumped only when the inputs changed
    fn next_version(&mut self, rule_sets: &[RuleSet]) -> PolicyVersion {
        let mut sorted: Vec<&RuleSet> = rule_sets.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let input = FingerprintInput {
            rule_sets: sorted,
            precedence: &self.precedence,
            overrides: &self.overrides,
        };
        let json = serde_json::to_vec(&input).unwrap_or_default();
        let fingerprint = format!("{:x}", Sha256::digest(&json));

        if self.last_fingerprint.as_deref() != Some(fingerprint.as_str()) {
            self.serial += 1;
            self.last_fingerprint = Some(fingerprint.clone());
        }

        PolicyVersion {
            serial: self.serial,
            fingerprint,
        }
    }
}

/// Resolve id collisions and capability gaps for one language
fn resolve_language(
    language: &str,
    caps: &CapabilitySet,
    rules: &[(String, Arc<Rule>)],
    rank: &HashMap<String, usize>,
    version: &PolicyVersion,
) -> EffectivePolicy {
    let mut winners: BTreeMap<&str, ((u8, usize), &Arc<Rule>)> = BTreeMap::new();

    for (set_name, rule) in rules {
        if !rule.scope.applies_to(language) {
            continue;
        }
        let key = (rule.scope.specificity(), rank.get(set_name).copied().unwrap_or(0));
        match winners.get(rule.id.as_str()) {
            Some((existing, _)) if *existing >= key => {}
            _ => {
                winners.insert(rule.id.as_str(), (key, rule));
            }
        }
    }

    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for (_, (_, rule)) in winners {
        let missing: Vec<Capability> = rule
            .predicate
            .required_capabilities()
            .difference(caps)
            .copied()
            .collect();
        if missing.is_empty() {
            kept.push(Arc::clone(rule));
        } else {
            let rejection = RuleRejection {
                rule_id: rule.id.clone(),
                language: language.to_string(),
                missing,
            };
            log::warn!("Rejected {}", rejection);
            rejected.push(rejection);
        }
    }

    EffectivePolicy {
        language: language.to_string(),
        version: version.clone(),
        rules: kept,
        rejected,
    }
}
