//! Conform CLI - rule-compliance engine for multi-language coding conventions

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use conform::adapter::AdapterRegistry;
use conform::cache::FindingCache;
use conform::config::{ColorMode, Config, OutputFormat};
use conform::output::formatter_for;
use conform::registry::{PolicySet, RuleRegistry};
use conform::rule::load_rule_sets;
use conform::session::{EvaluationSession, SourceFile};
use conform::watch::watch_and_run;
use conform::Severity;
use glob::glob;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "conform",
    version,
    about = "Rule-compliance engine for coding conventions",
    long_about = "Checks Java and Python sources against scoped, declarative convention rule sets."
)]
struct Cli {
    /// Files, directories or glob patterns to check
    files: Vec<String>,

    /// Rule-set files or directories, in load order
    #[arg(short, long)]
    rules: Vec<PathBuf>,

    /// Rule-set names, lowest precedence first (comma-separated)
    #[arg(long, value_delimiter = ',')]
    precedence: Option<Vec<String>>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Treat every file as this language instead of using its extension
    #[arg(long)]
    language: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Disable specific rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    disable: Option<Vec<String>>,

    /// Enable the finding cache
    #[arg(long, conflicts_with = "no_cache")]
    cache: bool,

    /// Disable the finding cache
    #[arg(long)]
    no_cache: bool,

    /// Show statistics
    #[arg(long)]
    stats: bool,

    /// List the effective rules per language and exit
    #[arg(long)]
    list_rules: bool,

    /// Watch files and re-evaluate on changes
    #[arg(long, short = 'w')]
    watch: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_default().context("Failed to load config")?,
    };

    let format = cli.format.map(|f| match f {
        Format::Text => OutputFormat::Text,
        Format::Json => OutputFormat::Json,
    });
    let cache = if cli.cache {
        Some(true)
    } else if cli.no_cache {
        Some(false)
    } else {
        None
    };
    config.merge_cli(format, Some(cli.verbose), cli.jobs, cache, cli.disable.clone());
    if cli.stats {
        config.output.statistics = true;
    }
    if cli.no_color {
        config.output.color = ColorMode::Never;
    }
    match config.output.color {
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Auto => {}
    }

    let adapters = AdapterRegistry::with_builtin();
    let policies = build_policies(&cli, &config, &adapters)?;

    if cli.list_rules {
        print_rules(&policies);
        return Ok(0);
    }

    if cli.files.is_empty() {
        bail!("No files specified (try '--help')");
    }
    let paths = collect_files(&cli.files, &config, cli.watch)?;
    if paths.is_empty() {
        bail!("No files found to check");
    }
    if config.output.verbose {
        eprintln!("Checking {} file(s) against policy {}", paths.len(), policies.version);
    }

    let files = read_files(&paths, cli.language.as_deref());

    let cache_file = config.cache_file();
    let cache = cache_file
        .as_ref()
        .map(|path| Arc::new(FindingCache::load_or_new(path, config.engine.cache_capacity)));

    let mut session =
        EvaluationSession::new(adapters.clone(), policies).with_options(config.session_options());
    if let Some(cache) = &cache {
        session = session.with_cache(Arc::clone(cache));
    }

    let colored = config.output.color != ColorMode::Never;
    let formatter = formatter_for(config.output.format, colored, config.output.statistics);

    if cli.watch {
        let roots = watch_roots(&cli.files);
        watch_and_run(&mut session, files, &roots, &adapters.extensions(), |report| {
            print!("{}", formatter.format(report));
        })
        .context("File watcher failed")?;
        return Ok(0);
    }

    let report = session.evaluate(files);
    print!("{}", formatter.format(&report));

    if let (Some(cache), Some(path)) = (&cache, &cache_file) {
        if let Err(e) = cache.save(path) {
            log::warn!("Could not save cache: {}", e);
        }
    }

    Ok(report.exit_code())
}

/// Load rule sets and build the policy set
fn build_policies(cli: &Cli, config: &Config, adapters: &AdapterRegistry) -> Result<PolicySet> {
    let mut sources = cli.rules.clone();
    for set in &config.rules.sets {
        if !sources.contains(set) {
            sources.push(set.clone());
        }
    }
    if sources.is_empty() {
        bail!("No rule sets given (use --rules or 'rules.sets' in the config file)");
    }

    let rule_sets = load_rule_sets(&sources)?;

    let explicit = cli.precedence.clone().or_else(|| {
        (!config.rules.precedence.is_empty()).then(|| config.rules.precedence.clone())
    });
    let precedence = RuleRegistry::precedence_for(explicit, &rule_sets);

    let mut registry = RuleRegistry::new(precedence).with_overrides(config.rule_overrides());
    let policies = registry.build(&rule_sets, &adapters.capabilities())?;

    for rejection in policies.rejections() {
        log::warn!("{}", rejection);
    }
    Ok(policies)
}

/// Expand patterns and directories into a sorted, de-duplicated file list
fn collect_files(patterns: &[String], config: &Config, absolute: bool) -> Result<Vec<PathBuf>> {
    let filter = config.files.filter()?;
    let mut files = Vec::new();

    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_dir() {
            let nested = path.join("**").join("*");
            let nested = nested.to_string_lossy();
            for entry in glob(&nested)
                .with_context(|| format!("Invalid directory '{}'", pattern))?
                .flatten()
            {
                if entry.is_file() && filter.accepts(&entry) {
                    files.push(entry);
                }
            }
        } else {
            let mut matched = false;
            for entry in glob(pattern)
                .with_context(|| format!("Invalid pattern '{}'", pattern))?
                .flatten()
            {
                if entry.is_file() {
                    matched = true;
                    files.push(entry);
                }
            }
            if !matched {
                log::warn!("No files match '{}'", pattern);
            }
        }
    }

    // Watch events carry absolute paths
    if absolute {
        files = files
            .into_iter()
            .map(|f| f.canonicalize().unwrap_or(f))
            .collect();
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn read_files(paths: &[PathBuf], language: Option<&str>) -> Vec<SourceFile> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match SourceFile::read(path) {
            Ok(file) => files.push(match language {
                Some(tag) => file.with_language(tag),
                None => file,
            }),
            Err(e) => eprintln!(
                "{}: could not read {}: {}",
                "warning".yellow(),
                path.display(),
                e
            ),
        }
    }
    files
}

/// Existing paths named on the command line, for the watcher
fn watch_roots(patterns: &[String]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = patterns
        .iter()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .map(|p| p.canonicalize().unwrap_or(p))
        .collect();
    if roots.is_empty() {
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
    }
    roots
}

fn print_rules(policies: &PolicySet) {
    println!("{} {}", "Policy".bold(), policies.version);
    for language in policies.languages() {
        let Some(policy) = policies.for_language(language) else {
            continue;
        };
        println!();
        println!("  {} ({} rules):", language.cyan(), policy.rules.len());
        for rule in &policy.rules {
            let severity = match rule.severity {
                Severity::Error => "error".red(),
                Severity::Warning => "warning".yellow(),
                Severity::Info => "info".blue(),
            };
            println!(
                "    {} [{}] ({}) from {}",
                rule.id.cyan(),
                severity,
                rule.category,
                rule.origin
            );
            if !rule.rationale.is_empty() {
                println!("      {}", rule.rationale);
            }
        }
        for rejection in &policy.rejected {
            println!("    {} {}", "rejected".yellow(), rejection);
        }
    }
}
