use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use core_types::config::{self, AppConfig};
use percolator::{Engine, NormalizedFilter, logging};
use serde::Serialize;
use serde_json::Value;

/// Debug / scripting CLI for Percolator filters.
///
/// JSON arguments are either inline JSON or `@path` to read a file.
#[derive(Parser, Debug)]
#[command(name = "percolator-cli", version, about = "Percolator filter debugging tool")]
struct Cli {
    /// Config file (defaults to $PERCOLATOR_CONFIG or config/percolator.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that a filter is valid.
    Validate {
        filter: String,
    },
    /// Print the canonical form and id of a filter.
    Normalize {
        filter: String,
        #[arg(short, long, default_value = "index")]
        index: String,
        #[arg(short, long, default_value = "collection")]
        collection: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Register filters from a JSON array and test one document against them.
    Test {
        /// JSON array of filters.
        #[arg(short, long)]
        filters: String,
        /// Document to test.
        document: String,
        /// Document id, readable by filters as `_id`.
        #[arg(long)]
        id: Option<String>,
        #[arg(short, long, default_value = "index")]
        index: String,
        #[arg(short, long, default_value = "collection")]
        collection: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct TestReport {
    registered: Vec<String>,
    matched: Vec<usize>,
    ids: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;
    logging::init_tracing_with_config(&cfg.logging);
    let engine = Engine::from_config(&cfg)?;

    match cli.command {
        Commands::Validate { filter } => {
            let raw = read_json(&filter)?;
            match engine.validate(&raw) {
                Ok(()) => println!("{}", style("valid").green()),
                Err(err) => {
                    println!("{} {err}", style("invalid:").red());
                    std::process::exit(1);
                }
            }
        }
        Commands::Normalize {
            filter,
            index,
            collection,
            json,
        } => {
            let raw = read_json(&filter)?;
            let normalized = engine.normalize(&index, &collection, &raw)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&normalized)?);
            } else {
                print_normalized(&normalized)?;
            }
        }
        Commands::Test {
            filters,
            document,
            id,
            index,
            collection,
            json,
        } => {
            let report = run_test(&engine, &filters, &document, id.as_deref(), &index, &collection)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_test_report(&report);
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => config::load_config(Some(path.as_path()))
            .with_context(|| format!("load config {}", path.display())),
        None => config::load_config(None),
    }
}

fn read_json(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {path}"))?,
        None => arg.to_owned(),
    };
    serde_json::from_str(&text).context("parse JSON argument")
}

fn run_test(
    engine: &Engine,
    filters: &str,
    document: &str,
    id: Option<&str>,
    index: &str,
    collection: &str,
) -> Result<TestReport> {
    let Value::Array(filters) = read_json(filters)? else {
        bail!("--filters must be a JSON array");
    };
    let mut registered = Vec::with_capacity(filters.len());
    for (pos, filter) in filters.iter().enumerate() {
        let registration = engine
            .register(index, collection, filter)
            .with_context(|| format!("filter #{pos}"))?;
        registered.push(registration.id.to_string());
    }

    let doc = read_json(document)?;
    let ids = engine.test(index, collection, &doc, id)?;
    let matched: Vec<usize> = registered
        .iter()
        .enumerate()
        .filter(|(_, rid)| ids.iter().any(|m| m.as_str() == rid.as_str()))
        .map(|(pos, _)| pos)
        .collect();
    Ok(TestReport {
        registered,
        matched,
        ids: ids.iter().map(ToString::to_string).collect(),
    })
}

fn print_normalized(normalized: &NormalizedFilter) -> Result<()> {
    println!("{} {}", style("id:").cyan(), normalized.id());
    println!(
        "{} {}/{}",
        style("namespace:").cyan(),
        normalized.index(),
        normalized.collection()
    );
    if normalized.dnf().is_nothing() {
        println!("{}", style("never matches").yellow());
        return Ok(());
    }
    println!("{}", style("clauses:").cyan());
    for (i, clause) in normalized.dnf().clauses().iter().enumerate() {
        if clause.is_empty() {
            println!("{:3}. {}", i + 1, style("<always>").green());
            continue;
        }
        let mut rendered = Vec::with_capacity(clause.len());
        for lit in clause {
            let predicate = serde_json::to_string(&lit.predicate)?;
            rendered.push(format!("{} {predicate}", lit.keyword()));
        }
        println!("{:3}. {}", i + 1, rendered.join(" AND "));
    }
    Ok(())
}

fn print_test_report(report: &TestReport) {
    for (pos, id) in report.registered.iter().enumerate() {
        let marker = if report.matched.contains(&pos) {
            style("match").green()
        } else {
            style("-----").dim()
        };
        println!("{marker} #{pos:<3} {id}");
    }
    println!(
        "{}",
        style(format!(
            "{} / {} filters matched",
            report.ids.len(),
            report.registered.len()
        ))
        .cyan()
    );
}
