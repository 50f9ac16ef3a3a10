use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use prwarden_core::{Credential, DiffDocument, OutputFormat, WardenConfig, WardenError};
use prwarden_difflens::filter::DiffFilter;
use prwarden_difflens::parser::parse_unified_diff;
use prwarden_review::client::ReviewClient;
use prwarden_review::github::{GitHubClient, PullRequestRef};
use prwarden_review::llm::LlmClient;
use prwarden_review::pipeline::{
    read_diff, write_artifact, DiffSource, ReviewPipeline, RunContext,
};

const CONFIG_FILE: &str = ".prwarden.toml";

#[derive(Parser)]
#[command(
    name = "prwarden",
    version,
    about = "Pull request review bot",
    long_about = "prwarden computes the diff of a pull request against its base branch,\n\
                   has an LLM review it, and posts one Markdown report as a PR comment.\n\n\
                   Examples:\n  \
                     prwarden review                         Review HEAD against main and comment\n  \
                     prwarden review --dry-run               Only write review.md\n  \
                     prwarden review --pr octo/app#12        Comment on an explicit pull request\n  \
                     prwarden diff --format json             Show the parsed diff\n  \
                     prwarden init                           Write a default .prwarden.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .prwarden.toml)
    #[arg(long, global = true, env = "PRWARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Review the pull request and publish the report
    #[command(long_about = "Review the pull request and publish the report.\n\n\
        Acquires the diff against the base branch, sends it to the analysis service\n\
        in bounded chunks, writes the Markdown report and posts it as one comment.\n\
        The API key is read from the environment variable named by llm.api_key_env\n\
        (falling back to PRWARDEN_API_KEY); it is never accepted on the command line.\n\n\
        Exit status: 0 success (also when some chunks could not be analyzed),\n\
        1 configuration or I/O error, 2 diff unavailable, 3 API key rejected,\n\
        4 publishing failed.")]
    Review {
        #[command(flatten)]
        source: SourceArgs,

        /// Where to save the acquired diff
        #[arg(long, env = "PRWARDEN_DIFF_PATH")]
        diff_out: Option<PathBuf>,

        /// Where to write the Markdown report
        #[arg(long, env = "PRWARDEN_REPORT_PATH")]
        output: Option<PathBuf>,

        /// Pull request to comment on (owner/repo#N); defaults to the GitHub Actions event
        #[arg(long, env = "PRWARDEN_PR")]
        pr: Option<String>,

        /// Write the report but do not publish it
        #[arg(long)]
        dry_run: bool,

        /// Chunk size limit in bytes
        #[arg(long, env = "PRWARDEN_MAX_CHUNK_BYTES")]
        max_chunk_bytes: Option<usize>,

        /// Extra attempts after a transient analysis failure
        #[arg(long, env = "PRWARDEN_RETRY_COUNT")]
        retry_count: Option<u32>,

        /// Initial backoff between attempts in milliseconds
        #[arg(long, env = "PRWARDEN_RETRY_BACKOFF_MS")]
        retry_backoff_ms: Option<u64>,

        /// Chunks analyzed in parallel
        #[arg(long, env = "PRWARDEN_CONCURRENCY")]
        concurrency: Option<usize>,
    },
    /// Acquire and parse the diff without analyzing it
    #[command(long_about = "Acquire and parse the diff without analyzing it.\n\n\
        Prints one line per changed file, or the whole parsed diff as JSON.\n\n\
        Examples:\n  prwarden diff --base develop\n  prwarden diff --diff-file pr.patch --format json")]
    Diff {
        #[command(flatten)]
        source: SourceArgs,

        /// Where to save the acquired diff
        #[arg(long)]
        diff_out: Option<PathBuf>,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Create a default .prwarden.toml in the current directory
    Init,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Repository working directory
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Base branch the pull request targets
    #[arg(long, env = "PRWARDEN_BASE_BRANCH")]
    base: Option<String>,

    /// Read a unified diff from this file instead of git
    #[arg(long)]
    diff_file: Option<PathBuf>,
}

impl SourceArgs {
    fn diff_source(&self, config: &WardenConfig) -> DiffSource {
        match &self.diff_file {
            Some(path) => DiffSource::File(path.clone()),
            None => DiffSource::Git {
                workdir: self.repo.clone(),
                base_branch: config.review.base_branch.clone(),
            },
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# prwarden configuration

[llm]
# provider = "openai"  # or "ollama"; other OpenAI-compatible servers use "openai" with base_url
# model = "gpt-4o"
# base_url = "https://api.openai.com"
# Environment variable holding the API key (never put the key itself here)
# api_key_env = "OPENAI_API_KEY"
# timeout_secs = 120

[review]
# base_branch = "main"
# max_chunk_bytes = 48000
# max_findings = 10
# retry_count = 2
# retry_backoff_ms = 1000
# concurrency = 4
# skip_patterns = ["*.min.js", "fixtures/**"]

[output]
# diff_path = "diff.txt"
# report_path = "review.md"
"#;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }));
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,prwarden=debug,prwarden_core=debug,prwarden_difflens=debug,prwarden_review=debug"
    } else {
        "warn,prwarden=info,prwarden_difflens=info,prwarden_review=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), WardenError> {
    match cli.command {
        Command::Init => init_config(Path::new(CONFIG_FILE)),
        Command::Review {
            source,
            diff_out,
            output,
            pr,
            dry_run,
            max_chunk_bytes,
            retry_count,
            retry_backoff_ms,
            concurrency,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(base) = &source.base {
                config.review.base_branch = base.clone();
            }
            if let Some(path) = diff_out {
                config.output.diff_path = path;
            }
            if let Some(path) = output {
                config.output.report_path = path;
            }
            if let Some(v) = max_chunk_bytes {
                config.review.max_chunk_bytes = v;
            }
            if let Some(v) = retry_count {
                config.review.retry_count = v;
            }
            if let Some(v) = retry_backoff_ms {
                config.review.retry_backoff_ms = v;
            }
            if let Some(v) = concurrency {
                config.review.concurrency = v;
            }
            config.validate()?;
            review(&config, &source, pr, dry_run).await
        }
        Command::Diff {
            source,
            diff_out,
            format,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(base) = &source.base {
                config.review.base_branch = base.clone();
            }
            let text = read_diff(&source.diff_source(&config)).await?;
            if let Some(path) = diff_out {
                write_artifact(&path, &text).await?;
            }
            let doc = parse_unified_diff(&text)?;
            let filter = DiffFilter::from_config(&config.review)?;
            print_diff_summary(&doc, &filter, format)
        }
    }
}

async fn review(
    config: &WardenConfig,
    source: &SourceArgs,
    pr: Option<String>,
    dry_run: bool,
) -> Result<(), WardenError> {
    let (poster, target) = if dry_run {
        (None, None)
    } else {
        let target = match pr {
            Some(pr) => Some(pr.parse::<PullRequestRef>()?),
            None => PullRequestRef::from_actions_env()?,
        };
        (Some(GitHubClient::new(None)?), target)
    };

    let ctx = RunContext {
        diff_source: source.diff_source(config),
        diff_path: Some(config.output.diff_path.clone()),
        report_path: config.output.report_path.clone(),
        credential: resolve_credential(config),
        target,
    };

    let client = ReviewClient::new(LlmClient::new(&config.llm)?, &config.review)?;
    let summary = ReviewPipeline::new(client, poster).run(&ctx).await?;

    println!(
        "Report written to {} ({} findings, {} of {} chunks unavailable)",
        summary.report_path.display(),
        summary.stats.findings,
        summary.stats.degraded_chunks,
        summary.stats.chunks,
    );
    match &ctx.target {
        Some(target) if summary.published => println!("Published to {target}"),
        _ => println!("Not published (dry run)"),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<WardenConfig, WardenError> {
    match path {
        Some(path) => WardenConfig::from_file(path),
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                WardenConfig::from_file(default_path)
            } else {
                debug!("no {CONFIG_FILE}, using defaults");
                Ok(WardenConfig::default())
            }
        }
    }
}

/// Read the API key from the variable named by `llm.api_key_env`, then
/// from the fallback variable. Blank values count as unset.
fn resolve_credential(config: &WardenConfig) -> Option<Credential> {
    [
        config.llm.api_key_env.as_str(),
        prwarden_core::FALLBACK_API_KEY_ENV,
    ]
    .iter()
    .filter_map(|name| std::env::var(name).ok())
    .map(Credential::new)
    .find(|key| !key.is_blank())
    .or_else(|| {
        warn!(
            env = %config.llm.api_key_env,
            "no API key in the environment; only empty diffs can be reviewed"
        );
        None
    })
}

fn init_config(path: &Path) -> Result<(), WardenError> {
    if path.exists() {
        return Err(WardenError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("Created {} with default configuration", path.display());
    Ok(())
}

fn print_diff_summary(
    doc: &DiffDocument,
    filter: &DiffFilter,
    format: OutputFormat,
) -> Result<(), WardenError> {
    let skipped = filter.partition(doc).skipped;
    match format {
        OutputFormat::Json => {
            let files: Vec<serde_json::Value> = doc
                .files
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "path": f.path,
                        "oldPath": f.old_path,
                        "kind": f.kind,
                        "hunks": f.hunks.len(),
                        "changedLines": f.changed_lines(),
                        "binary": f.binary,
                        "skipped": skipped
                            .iter()
                            .find(|s| s.path == f.path)
                            .map(|s| s.reason.to_string()),
                    })
                })
                .collect();
            let out = serde_json::json!({ "bytes": doc.byte_len(), "files": files });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if doc.is_empty() {
                println!("No changes.");
                return Ok(());
            }
            for f in &doc.files {
                let path = match &f.old_path {
                    Some(old) => format!("{} -> {}", old.display(), f.path.display()),
                    None => f.path.display().to_string(),
                };
                let note = skipped
                    .iter()
                    .find(|s| s.path == f.path)
                    .map(|s| format!("  [skipped: {}]", s.reason))
                    .unwrap_or_default();
                println!(
                    "{:<9} {path}  ({} hunks, {} lines){note}",
                    f.kind.to_string(),
                    f.hunks.len(),
                    f.changed_lines(),
                );
            }
            println!(
                "\n{} files, {} bytes, {} skipped from analysis",
                doc.files.len(),
                doc.byte_len(),
                skipped.len()
            );
        }
    }
    Ok(())
}
