//! Config-driven runs over files on disk

use conform::adapter::AdapterRegistry;
use conform::cache::FindingCache;
use conform::config::Config;
use conform::registry::RuleRegistry;
use conform::rule::{load_rule_sets, RuleLoadError};
use conform::session::{EvaluationSession, SourceFile};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const COMMON: &str = r#"
name: common
scope: common
rules:
  - id: NAME-001
    severity: warning
    message: "Type '{name}' should be PascalCase"
    predicate:
      kind: every
      node: type
      require: { kind: matches, attribute: name, pattern: "^[A-Z][A-Za-z0-9]*$" }
  - id: EXC-001
    severity: error
    message: "Empty handler for {attributes.exception-types}"
    predicate:
      kind: every
      node: catch
      require: { kind: lacks, attribute: is-empty }
"#;

const PYTHON: &str = r#"
name: python
scope: python
rules:
  - id: NAME-001
    severity: info
    message: "Class '{name}' should be PascalCase"
    predicate:
      kind: every
      node: type
      require: { kind: matches, attribute: name, pattern: "^_?[A-Z]" }
  - id: IMP-001
    severity: warning
    message: "Standard library imports go first"
    predicate:
      kind: order
      before: { node: import, when: { kind: equals, attribute: import-group, value: standard } }
      after: { node: import, when: { kind: equals, attribute: import-group, value: third-party } }
"#;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "rules/common.yaml", COMMON);
    write(dir.path(), "rules/python.yaml", PYTHON);
    write(
        dir.path(),
        "conform.yaml",
        "rules:\n  sets: [rules]\n  precedence: [common, python]\nengine:\n  jobs: 2\n",
    );
    write(
        dir.path(),
        "src/handlers.py",
        "import requests\nimport os\n\nclass handler:\n    def run(self):\n        try:\n            requests.get(os.environ['URL'])\n        except ValueError:\n            pass\n",
    );
    write(
        dir.path(),
        "src/Worker.java",
        "public class worker {\n    void run() {\n        try { go(); } catch (Exception e) { }\n    }\n}\n",
    );
    dir
}

fn run(dir: &Path, cache: Option<Arc<FindingCache>>) -> conform::Report {
    let config = Config::load(&Config::discover(dir).unwrap()).unwrap();
    let sets = load_rule_sets(&config.rules.sets).unwrap();
    let adapters = AdapterRegistry::with_builtin();
    let policies = RuleRegistry::new(config.rules.precedence.clone())
        .with_overrides(config.rule_overrides())
        .build(&sets, &adapters.capabilities())
        .unwrap();

    let mut session = EvaluationSession::new(adapters, policies).with_options(config.session_options());
    if let Some(cache) = cache {
        session = session.with_cache(cache);
    }
    session.evaluate(vec![
        SourceFile::read(&dir.join("src/handlers.py")).unwrap(),
        SourceFile::read(&dir.join("src/Worker.java")).unwrap(),
    ])
}

#[test]
fn test_language_rules_override_universal_ones() {
    let dir = workspace();
    let report = run(dir.path(), None);

    let python: Vec<(&str, String)> = report.files[0]
        .findings
        .iter()
        .map(|f| (f.rule_id.as_str(), f.severity.to_string()))
        .collect();
    assert_eq!(
        python,
        vec![
            ("IMP-001", "warning".to_string()),
            ("NAME-001", "info".to_string()),
            ("EXC-001", "error".to_string()),
        ]
    );

    let java: Vec<&str> = report.files[1]
        .findings
        .iter()
        .map(|f| f.rule_id.as_str())
        .collect();
    assert_eq!(java, vec!["NAME-001", "EXC-001"]);
    assert_eq!(report.files[1].findings[0].severity.to_string(), "warning");
    assert_eq!(
        report.files[1].findings[1].message,
        "Empty handler for Exception"
    );
}

#[test]
fn test_config_overrides_apply() {
    let dir = workspace();
    write(
        dir.path(),
        "conform.yaml",
        "rules:\n  sets: [rules]\n  precedence: [common, python]\n  disabled: [EXC-001]\n  severity:\n    IMP-001: error\n",
    );
    let report = run(dir.path(), None);

    assert!(report.findings().all(|f| f.rule_id != "EXC-001"));
    let imp = report.findings().find(|f| f.rule_id == "IMP-001").unwrap();
    assert_eq!(imp.severity, conform::Severity::Error);
}

#[test]
fn test_cache_survives_restart() {
    let dir = workspace();
    let cache_path = dir.path().join("cache/cache.json");

    let cache = Arc::new(FindingCache::load_or_new(&cache_path, 32));
    let first = run(dir.path(), Some(Arc::clone(&cache)));
    cache.save(&cache_path).unwrap();

    let reloaded = Arc::new(FindingCache::load(&cache_path, 32).unwrap());
    let second = run(dir.path(), Some(reloaded));
    assert_eq!(second.stats.cache_hits, 2);
    for (a, b) in first.files.iter().zip(&second.files) {
        assert_eq!(a.findings, b.findings);
    }
}

#[test]
fn test_missing_precedence_is_fatal() {
    let dir = workspace();
    let config = Config::load(&dir.path().join("conform.yaml")).unwrap();
    let sets = load_rule_sets(&config.rules.sets).unwrap();
    let adapters = AdapterRegistry::with_builtin();

    let err = RuleRegistry::new(vec!["common".to_string()])
        .build(&sets, &adapters.capabilities())
        .unwrap_err();
    assert!(matches!(err, RuleLoadError::MissingPrecedence(name) if name == "python"));
}

const TEAM_OVERRIDE: &str = r#"
name: team-override
scope: java
rules:
  - id: R
    severity: error
    message: "from team-override"
    predicate: { kind: every, node: type, require: { kind: has, attribute: name } }
"#;

const BASELINE: &str = r#"
name: baseline
scope: java
rules:
  - id: R
    severity: info
    message: "from baseline"
    predicate: { kind: every, node: type, require: { kind: has, attribute: name } }
"#;

#[test]
fn test_file_order_never_ranks_rule_sets() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "rules/a.yaml", TEAM_OVERRIDE);
    write(dir.path(), "rules/b.yaml", BASELINE);
    let adapters = AdapterRegistry::with_builtin();

    let sets = load_rule_sets(&[dir.path().join("rules")]).unwrap();
    let precedence = RuleRegistry::precedence_for(None, &sets);
    assert!(precedence.is_empty());
    let err = RuleRegistry::new(precedence)
        .build(&sets, &adapters.capabilities())
        .unwrap_err();
    assert!(matches!(err, RuleLoadError::MissingPrecedence(_)));

    // Renaming a file changes load order but not the outcome
    fs::rename(dir.path().join("rules/a.yaml"), dir.path().join("rules/c.yaml")).unwrap();
    let renamed = load_rule_sets(&[dir.path().join("rules")]).unwrap();
    assert!(RuleRegistry::precedence_for(None, &renamed).is_empty());

    // An explicit order decides regardless of file names
    let order = vec!["baseline".to_string(), "team-override".to_string()];
    let policies = RuleRegistry::new(RuleRegistry::precedence_for(Some(order), &renamed))
        .build(&renamed, &adapters.capabilities())
        .unwrap();
    let java = policies.for_language("java").unwrap();
    assert_eq!(java.get("R").unwrap().message, "from team-override");
}

#[test]
fn test_single_rule_set_needs_no_precedence() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "rules/baseline.yaml", BASELINE);
    let sets = load_rule_sets(&[dir.path().join("rules")]).unwrap();

    let precedence = RuleRegistry::precedence_for(None, &sets);
    assert_eq!(precedence, vec!["baseline".to_string()]);
    assert!(RuleRegistry::new(precedence)
        .build(&sets, &AdapterRegistry::with_builtin().capabilities())
        .is_ok());
}

#[test]
fn test_malformed_rule_document_is_fatal() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bad.yaml", "name: bad\nscope: java\nrules: [ {id: X-1 ");
    let err = load_rule_sets(&[dir.path().join("bad.yaml")]).unwrap_err();
    assert!(matches!(err, RuleLoadError::Parse { .. }));
}
