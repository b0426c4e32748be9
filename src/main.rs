use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use code_packer::config::{self, ConfigLayer, DiffLayer, ResolvedConfig};
use code_packer::diff::{self, DiffOutcome};
use code_packer::pack;
use code_packer::profiles::ProfileManager;
use code_packer::vcs::{GitCli, VersionControl};
use code_packer::PackerError;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tiktoken_rs::p50k_base;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Packs source trees and branch diffs into single annotated text files.",
    long_about = "Concatenates the files of a directory into one annotated text file, or writes a \
                  readable diff report between two git branches. Both honor include/exclude globs."
)]
struct Args {
    /// Workspace root. Relative paths in the configuration resolve against it.
    #[arg(short = 'C', long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file. Defaults to .codepacker.toml, then .vscode/code-packer.json.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print verbose output during processing.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the p50k tokenizer for the final token count instead of a word count.
    #[arg(long, global = true)]
    tokens: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Concatenate matching files into one output file.
    Pack(PackArgs),
    /// Write a diff report between two branches.
    Diff(DiffArgs),
    /// List local and remote branches of the workspace repository.
    Branches,
    /// List available pattern profiles and their descriptions.
    Profiles,
    /// Print the resolved configuration as JSON.
    Config,
}

#[derive(clap::Args, Debug, Default)]
struct FilterArgs {
    /// Use a built-in or configured pattern profile.
    #[arg(short, long)]
    profile: Option<String>,

    /// Exclusion patterns, comma-separated or repeated. Replace the configured ones.
    #[arg(short, long, value_delimiter = ',')]
    exclude: Option<Vec<String>>,

    /// Inclusion patterns, comma-separated or repeated. Replace the configured ones.
    #[arg(short, long, value_delimiter = ',')]
    include: Option<Vec<String>>,
}

#[derive(clap::Args, Debug)]
struct PackArgs {
    /// Directory to pack, relative to the workspace root.
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Output file, relative to the workspace root.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    filters: FilterArgs,

    /// Skip files ignored by .gitignore and .ignore files.
    #[arg(long)]
    respect_gitignore: bool,

    /// Follow symbolic links while walking.
    #[arg(long)]
    follow_symlinks: bool,
}

#[derive(clap::Args, Debug)]
struct DiffArgs {
    /// Branch or ref on the old side of the diff.
    source_branch: Option<String>,

    /// Branch or ref on the new side of the diff.
    target_branch: Option<String>,

    /// Output file, relative to the workspace root.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    filters: FilterArgs,

    /// Include binary files as size-only stanzas instead of skipping them.
    #[arg(long)]
    include_binary: bool,

    /// Include editor metadata and packer config files.
    #[arg(long)]
    include_meta: bool,

    /// Skip files larger than this many kilobytes.
    #[arg(long)]
    max_file_size_kb: Option<u64>,
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

fn filter_layer(filters: &FilterArgs) -> ConfigLayer {
    ConfigLayer {
        profile: filters.profile.clone(),
        exclusion_patterns: filters.exclude.clone(),
        inclusion_patterns: filters.include.clone(),
        ..ConfigLayer::default()
    }
}

/// Values given explicitly on the command line.
fn cli_layer(args: &Args) -> ConfigLayer {
    let base = ConfigLayer {
        debug: flag(args.verbose),
        ..ConfigLayer::default()
    };
    let command = match &args.command {
        Commands::Pack(pack) => ConfigLayer {
            source_directory: pack.source.clone(),
            output_file: pack.output.clone(),
            respect_gitignore: flag(pack.respect_gitignore),
            follow_symlinks: flag(pack.follow_symlinks),
            ..filter_layer(&pack.filters)
        },
        Commands::Diff(diff) => ConfigLayer {
            diff: Some(DiffLayer {
                source_branch: diff.source_branch.clone(),
                target_branch: diff.target_branch.clone(),
                output_file: diff.output.clone(),
                include_binary_files: flag(diff.include_binary),
                include_meta_files: flag(diff.include_meta),
                max_file_size_kb: diff.max_file_size_kb,
            }),
            ..filter_layer(&diff.filters)
        },
        _ => ConfigLayer::default(),
    };
    base.overlay(command)
}

/// Defaults that only the invoked command knows about, such as the diff
/// output name derived from the branch pair.
fn call_site_layer(user: &ConfigLayer) -> ConfigLayer {
    let diff = user.diff.clone().unwrap_or_default();
    match (diff.source_branch, diff.target_branch) {
        (Some(source), Some(target)) => ConfigLayer {
            diff: Some(DiffLayer {
                output_file: Some(PathBuf::from(config::default_diff_output(&source, &target))),
                ..DiffLayer::default()
            }),
            ..ConfigLayer::default()
        },
        _ => ConfigLayer::default(),
    }
}

fn resolve_config(args: &Args, workspace_root: &Path) -> Result<ResolvedConfig> {
    let file_layer = config::load_config(&args.config, workspace_root)?.unwrap_or_default();
    let user = file_layer.overlay(cli_layer(args));
    let call_site = call_site_layer(&user);
    let resolved = config::merge(ConfigLayer::builtin(workspace_root), call_site, user)
        .resolve(workspace_root)?;
    Ok(resolved)
}

fn level_filter(debug: bool) -> LevelFilter {
    if debug { LevelFilter::DEBUG } else { LevelFilter::INFO }
}

/// Installs the stderr subscriber. The returned handle raises the level once
/// the configuration file has been read.
fn init_tracing(debug: bool) -> reload::Handle<LevelFilter, Registry> {
    let (filter, handle) = reload::Layer::new(level_filter(debug));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr),
        )
        .init();
    handle
}

fn count_tokens(text: &str, use_tokenizer: bool) -> Result<usize> {
    if use_tokenizer {
        let bpe = p50k_base().context("Failed to load the p50k tokenizer")?;
        Ok(bpe.encode_with_special_tokens(text).len())
    } else {
        Ok(text.split_whitespace().count())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = init_tracing(args.verbose);

    let workspace_root = fs::canonicalize(&args.workspace)
        .map_err(|_| PackerError::NoWorkspaceRoot(args.workspace.clone()))?;
    let resolved = resolve_config(&args, &workspace_root)?;
    if resolved.debug != args.verbose {
        log_level
            .reload(level_filter(resolved.debug))
            .context("Failed to adjust the log level")?;
    }
    debug!(
        "Resolved configuration: {}",
        serde_json::to_string_pretty(&resolved)?
    );

    match &args.command {
        Commands::Pack(_) => {
            let job = resolved.directory_job();
            let outcome = pack::pack(&job)?;
            println!("Code packed successfully. Output file: {}", outcome.output_path.display());

            // Final summary printed to stderr to not interfere with stdout piping
            eprintln!("\n--- Processing Complete ---");
            eprintln!("Files included: {}", outcome.included);
            eprintln!("Files excluded: {}", outcome.excluded);
            for (path, reason) in &outcome.failures {
                eprintln!("  - {}: {}", path, reason);
            }
            eprintln!("Approximate token count: {}", count_tokens(&outcome.text, args.tokens)?);
        }
        Commands::Diff(_) => {
            let job = resolved.diff_job()?;
            let vcs = GitCli::discover(&workspace_root)?;
            match diff::generate_diff(&vcs, &job, Utc::now())? {
                DiffOutcome::Written(report) => {
                    println!("Diff written to: {}", report.output_path.display());
                    eprintln!("\n--- Processing Complete ---");
                    eprint!("{}", diff::summary_line(report.files, report.totals));
                    eprintln!("Skipped: {}, errors: {}", report.skipped, report.errors);
                    eprintln!("Approximate token count: {}", count_tokens(&report.text, args.tokens)?);
                }
                DiffOutcome::NoChanges => {
                    println!(
                        "No differences found between {} and {}",
                        job.source_branch, job.target_branch
                    );
                }
                DiffOutcome::AllFiltered => {
                    println!("No changed files matched the configured patterns");
                }
            }
        }
        Commands::Branches => {
            let vcs = GitCli::discover(&workspace_root)?;
            debug!("Listing branches of {}", vcs.root().display());
            for branch in vcs.list_branches()? {
                println!("{}", branch);
            }
        }
        Commands::Profiles => list_profiles(&ProfileManager::new(Some(resolved.custom_profiles.clone()))),
        Commands::Config => println!("{}", serde_json::to_string_pretty(&resolved)?),
    }

    Ok(())
}

fn list_profiles(manager: &ProfileManager) {
    println!("Available Profiles:");
    for (name, description) in manager.list_all() {
        println!("  - {}: {}", name, description);
        if let Some(profile) = manager.resolve(&name) {
            if !profile.inclusion_patterns.is_empty() {
                println!("    Includes: {}", profile.inclusion_patterns.join(", "));
            }
            if !profile.exclusion_patterns.is_empty() {
                println!("    Excludes: {}", profile.exclusion_patterns.join(", "));
            }
        }
        println!();
    }
}
