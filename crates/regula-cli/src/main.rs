//! regula: command line front end for regula-core.
//!
//! Commands:
//! - regula evaluate <RULE>... --facts <FILE>
//! - regula verify <RULE> [--source <FILE>] [--sources <LIBRARY>] [--tiers 0,1,2]
//! - regula drift <RULE>... [--sources <LIBRARY>]
//!
//! Results are printed to stdout as JSON. Logs go to stderr, filtered by
//! `REGULA_LOG` (default `warn`).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use regula_core::rule::read_document;
use regula_core::{
    check_rule_drift, ConsistencyStatus, DecisionEngine, Facts, Rule, SourceLibrary,
    SourceLookup, VerificationConfig, VerificationOrchestrator, VerificationRequest,
};

/// Exit code when verification finds the rule inconsistent or drift is found
const FINDINGS_EXIT: u8 = 2;

/// Regula: evaluate regulatory rules and verify their consistency
#[derive(Parser, Debug)]
#[command(name = "regula")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate rules against scenario facts
    Evaluate {
        /// Rule files (YAML or JSON)
        #[arg(required = true)]
        rules: Vec<PathBuf>,

        /// Facts file: a YAML or JSON mapping
        #[arg(long)]
        facts: PathBuf,

        /// Only evaluate rules with these ids
        #[arg(long = "rule-id")]
        rule_ids: Vec<String>,
    },

    /// Verify a rule's consistency with its source text
    Verify {
        /// Rule file (YAML or JSON)
        rule: PathBuf,

        /// Plain-text file holding the cited legal passage
        #[arg(long)]
        source: Option<PathBuf>,

        /// Source library (YAML mapping of `document:article` to text)
        #[arg(long)]
        sources: Option<PathBuf>,

        /// Related rule files for cross-rule checks
        #[arg(long)]
        related: Vec<PathBuf>,

        /// Tiers to run, e.g. `0,1,4` (default: from config)
        #[arg(long, value_delimiter = ',')]
        tiers: Vec<u8>,

        /// Stop after the first tier that fails
        #[arg(long)]
        fail_fast: bool,

        /// Verification config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the consistency block back into the rule file
        #[arg(long)]
        write: bool,
    },

    /// Check stored rules for drift
    Drift {
        /// Rule files; a missing file is reported as a missing rule
        #[arg(required = true)]
        rules: Vec<PathBuf>,

        /// Source library used to resolve citations
        #[arg(long)]
        sources: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr subscriber, filtered by `REGULA_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("REGULA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Evaluate {
            rules,
            facts,
            rule_ids,
        } => {
            let rules = load_rules(&rules)?;
            let facts = load_facts(&facts)?;
            let filter = (!rule_ids.is_empty()).then_some(rule_ids.as_slice());
            let results = DecisionEngine::new().evaluate_all(&rules, &facts, filter);
            print_json(&results, cli.pretty)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Verify {
            rule,
            source,
            sources,
            related,
            tiers,
            fail_fast,
            config,
            write,
        } => {
            let config = match config {
                Some(path) => VerificationConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => VerificationConfig::default(),
            };
            let mut orchestrator = VerificationOrchestrator::new(config);
            if let Some(library) = load_library(sources.as_deref())? {
                orchestrator = orchestrator.with_lookup(Arc::new(library));
            }

            let source_text = source
                .as_ref()
                .map(|path| {
                    fs::read_to_string(path)
                        .with_context(|| format!("reading source {}", path.display()))
                })
                .transpose()?;
            let related = load_rules(&related)?;
            let document =
                read_document(&rule).with_context(|| format!("reading rule {}", rule.display()))?;

            let block = match Rule::from_value(&document) {
                Ok(mut parsed) => {
                    let mut request = VerificationRequest::new(&parsed)
                        .document(&document)
                        .related_rules(&related);
                    request.source_text = source_text.as_deref();
                    if !tiers.is_empty() {
                        request = request.tiers(&tiers);
                    }
                    if fail_fast {
                        request = request.fail_fast(true);
                    }
                    let block = orchestrator.verify(request)?;

                    if write {
                        parsed.write_consistency(block.clone());
                        write_rule(&rule, &parsed)?;
                        info!(path = %rule.display(), "consistency block written");
                    }
                    block
                }
                Err(e) => {
                    warn!(
                        path = %rule.display(),
                        error = %e,
                        "rule does not parse, running tier 0 only"
                    );
                    if write {
                        bail!("cannot write back to {}: {}", rule.display(), e);
                    }
                    orchestrator.verify_document(&document, source_text.as_deref(), &related)?
                }
            };

            print_json(&block, cli.pretty)?;
            if block.summary.status == ConsistencyStatus::Inconsistent {
                Ok(ExitCode::from(FINDINGS_EXIT))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Command::Drift { rules, sources } => {
            let library = load_library(sources.as_deref())?;
            let lookup = library.as_ref().map(|l| l as &dyn SourceLookup);

            let mut results = Vec::new();
            for path in &rules {
                let document = if path.exists() {
                    let document = read_document(path)
                        .with_context(|| format!("reading rule {}", path.display()))?;
                    Some(document)
                } else {
                    None
                };
                let rule_id = document
                    .as_ref()
                    .and_then(document_id)
                    .unwrap_or_else(|| file_stem(path));
                results.push(check_rule_drift(&rule_id, document.as_ref(), lookup));
            }

            print_json(&results, cli.pretty)?;
            if results.iter().any(|r| r.has_drift) {
                Ok(ExitCode::from(FINDINGS_EXIT))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn load_rules(paths: &[PathBuf]) -> Result<Vec<Rule>> {
    paths
        .iter()
        .map(|path| {
            Rule::from_file(path).with_context(|| format!("loading rule {}", path.display()))
        })
        .collect()
}

fn load_facts(path: &Path) -> Result<Facts> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading facts {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing facts {}", path.display()))?;
    match value {
        Value::Object(facts) => Ok(facts),
        _ => bail!("facts file {} must contain a mapping", path.display()),
    }
}

fn load_library(path: Option<&Path>) -> Result<Option<SourceLibrary>> {
    path.map(|p| {
        SourceLibrary::from_file(p)
            .with_context(|| format!("loading source library {}", p.display()))
    })
    .transpose()
}

fn write_rule(path: &Path, rule: &Rule) -> Result<()> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let contents = if is_json {
        serde_json::to_string_pretty(rule)?
    } else {
        serde_yaml::to_string(rule)?
    };
    fs::write(path, contents).with_context(|| format!("writing rule {}", path.display()))
}

fn document_id(document: &Value) -> Option<String> {
    document
        .get("id")
        .or_else(|| document.get("rule_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}
