use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nova_test_usage::{
    read_trace_file, IndexStats, StoreCompaction, TestUsageConfig, TestUsageIndex,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nova", version, about = "Nova CLI (test usage index)")]
struct Cli {
    /// Log level (`info`, `debug`, ...) or `EnvFilter` directives; merged with `RUST_LOG`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record and query which tests exercise which methods
    TestUsage(TestUsageArgs),
}

#[derive(Args)]
struct TestUsageArgs {
    #[command(subcommand)]
    command: TestUsageCommand,
}

#[derive(Subcommand)]
enum TestUsageCommand {
    /// Apply JSON trace files (one trace object or an array of them per file)
    Ingest(IngestArgs),
    /// List the tests known to exercise a method
    Tests(TestsArgs),
    /// Print the latest recorded usage of a test
    Usage(UsageArgs),
    /// Export the whole index as JSON
    Dump(DumpArgs),
    /// Print the size of every structure of the index
    Stats(StatsArgs),
    /// Rewrite the stores without superseded records
    Compact(CompactArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// Index directory
    #[arg(long)]
    index: PathBuf,
    /// TOML file with index settings
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct IngestArgs {
    #[command(flatten)]
    index: IndexArgs,
    /// Trace files to apply, in order
    #[arg(required = true)]
    traces: Vec<PathBuf>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TestsArgs {
    #[command(flatten)]
    index: IndexArgs,
    /// Fully qualified class name
    class: String,
    /// Method name
    method: String,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct UsageArgs {
    #[command(flatten)]
    index: IndexArgs,
    /// Test name as reported in its trace
    test: String,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DumpArgs {
    #[command(flatten)]
    index: IndexArgs,
}

#[derive(Args)]
struct StatsArgs {
    #[command(flatten)]
    index: IndexArgs,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CompactArgs {
    #[command(flatten)]
    index: IndexArgs,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct IngestReport {
    files: usize,
    traces: usize,
    changed: usize,
}

#[derive(Serialize)]
struct MethodTests<'a> {
    class: &'a str,
    method: &'a str,
    tests: Vec<String>,
    modules: Vec<String>,
}

#[derive(Serialize)]
struct TestUsage<'a> {
    test: &'a str,
    usage: Option<BTreeMap<String, BTreeSet<String>>>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::TestUsage(args) => run_test_usage(args.command),
    }
}

fn run_test_usage(command: TestUsageCommand) -> Result<i32> {
    match command {
        TestUsageCommand::Ingest(args) => {
            let index = open_writer(&args.index)?;
            let mut report = IngestReport {
                files: 0,
                traces: 0,
                changed: 0,
            };
            for path in &args.traces {
                let traces = read_trace_file(path)
                    .with_context(|| format!("failed to read traces from {}", path.display()))?;
                for trace in &traces {
                    if index.update_from_trace(trace)? {
                        report.changed += 1;
                    }
                }
                report.files += 1;
                report.traces += traces.len();
            }
            index.dispose()?;

            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "ingested {} traces from {} files ({} changed)",
                    report.traces, report.files, report.changed
                );
            }
            Ok(0)
        }
        TestUsageCommand::Tests(args) => {
            let index = open_reader(&args.index)?;
            let result = MethodTests {
                class: &args.class,
                method: &args.method,
                tests: index.tests_for_method(&args.class, &args.method)?,
                modules: index.modules_for_method(&args.class, &args.method)?,
            };
            index.dispose()?;

            if args.json {
                print_json(&result)?;
            } else {
                for test in &result.tests {
                    println!("{test}");
                }
            }
            Ok(0)
        }
        TestUsageCommand::Usage(args) => {
            let index = open_reader(&args.index)?;
            let result = TestUsage {
                test: &args.test,
                usage: index.usage_of_test(&args.test)?,
            };
            index.dispose()?;

            if args.json {
                print_json(&result)?;
            } else if let Some(usage) = &result.usage {
                for (class, methods) in usage {
                    for method in methods {
                        println!("{class}#{method}");
                    }
                }
            } else {
                println!("usage: no trace recorded for {}", result.test);
            }
            Ok(0)
        }
        TestUsageCommand::Dump(args) => {
            let index = open_reader(&args.index)?;
            let dump = index.dump()?;
            index.dispose()?;
            print_json(&dump)?;
            Ok(0)
        }
        TestUsageCommand::Stats(args) => {
            let index = open_reader(&args.index)?;
            let stats = index.stats()?;
            index.dispose()?;

            if args.json {
                print_json(&stats)?;
            } else {
                print_stats(&stats);
            }
            Ok(0)
        }
        TestUsageCommand::Compact(args) => {
            let index = open_writer(&args.index)?;
            let reports = index.compact()?;
            index.dispose()?;

            if args.json {
                print_json(&reports)?;
            } else {
                print_compaction(&reports);
            }
            Ok(0)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TestUsageConfig> {
    let config = match path {
        Some(path) => TestUsageConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TestUsageConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn open_writer(args: &IndexArgs) -> Result<TestUsageIndex> {
    let config = load_config(args.config.as_deref())?;
    TestUsageIndex::open_with_config(&args.index, config)
        .with_context(|| format!("failed to open test usage index {}", args.index.display()))
}

fn open_reader(args: &IndexArgs) -> Result<TestUsageIndex> {
    let config = load_config(args.config.as_deref())?;
    TestUsageIndex::open_read_only_with_config(&args.index, config)
        .with_context(|| format!("failed to open test usage index {}", args.index.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_stats(stats: &IndexStats) {
    println!("test usage index:");
    println!("  dir: {}", stats.dir.display());
    println!("  version: {}", stats.version);
    for structure in stats.names.iter().chain(&stats.stores) {
        println!("  {}:", structure.file);
        println!("    entries: {}", structure.entries);
        println!("    bytes: {}", structure.log_bytes);
    }
}

fn print_compaction(reports: &[StoreCompaction]) {
    for report in reports {
        println!(
            "{}: {} -> {} bytes ({} keys)",
            report.file, report.before_bytes, report.after_bytes, report.keys
        );
    }
}

fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}

fn normalize_level_directives(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "warn".to_owned();
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "trace" => "trace".to_owned(),
        "debug" => "debug".to_owned(),
        "info" => "info".to_owned(),
        "warn" | "warning" => "warn".to_owned(),
        "error" => "error".to_owned(),
        // Anything else is treated as an `EnvFilter` directive string.
        _ => trimmed.to_owned(),
    }
}

/// `--log-level` directives with `RUST_LOG` appended, so `RUST_LOG` wins on conflicts.
fn env_filter(level: &str) -> EnvFilter {
    let env_directives = std::env::var("RUST_LOG")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty());
    let cli_directives = normalize_level_directives(level);

    let fallback = || {
        EnvFilter::default().add_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
    };
    match env_directives {
        Some(env_directives) => EnvFilter::try_new(format!("{cli_directives},{env_directives}"))
            .or_else(|_| EnvFilter::try_new(env_directives))
            .or_else(|_| EnvFilter::try_new(&cli_directives))
            .unwrap_or_else(|_| fallback()),
        None => EnvFilter::try_new(&cli_directives).unwrap_or_else(|_| fallback()),
    }
}
