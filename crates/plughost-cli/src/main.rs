//! Command-line interface for the plughost plugin loader.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plughost_core::discovery::plugin_name;
use plughost_core::{
    discover, metadata, ImageHandle, NativeImageLoader, PluginHost, PluginSummary, PluginsConfig,
};
use serde::Serialize;

/// plughost - discover and load native plugins.
#[derive(Parser, Debug)]
#[command(name = "plughost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// TOML file with a [plugins] table.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Plugin directory; replaces the configured path. Repeatable.
    #[arg(short, long, global = true)]
    path: Vec<PathBuf>,

    /// Only consider plugins whose name matches (prefix or glob).
    #[arg(long, global = true)]
    name_filter: Option<String>,

    /// Version the host advertises to plugins.
    #[arg(long, global = true, env = "PLUGHOST_HOST_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    host_version: String,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List plugin files on the search path without loading them.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show the registration metadata of one plugin file.
    Info {
        /// Path to the plugin file.
        #[arg(required = true)]
        path: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Load every eligible plugin and show the outcome per plugin.
    Load {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match &args.command {
        Command::List { json } => list_plugins(&args, *json),
        Command::Info { path, json } => show_plugin_info(path, *json),
        Command::Load { json } => load_plugins(&args, *json),
    }
}

fn init_logging(verbose: bool) {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var("PLUGHOST_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("plughost_core={0},plughost={0}", default_level))
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Configuration from `--config`, then command-line overrides.
fn build_config(args: &Args) -> Result<PluginsConfig> {
    let mut config = match &args.config {
        Some(path) => PluginsConfig::from_file(path)?,
        None => PluginsConfig::new(),
    };
    if !args.path.is_empty() {
        config.path = args.path.clone();
    }
    if let Some(filter) = &args.name_filter {
        config.name_filter = Some(filter.clone());
    }
    config.validate()?;
    Ok(config)
}

#[derive(Serialize)]
struct CandidateLine {
    name: String,
    path: PathBuf,
    shadowed: bool,
}

fn list_plugins(args: &Args, json: bool) -> Result<()> {
    let config = build_config(args)?;
    let resolver = plughost_core::ConfigResolver::new(&config)?;
    let candidates = discover(&config.search_paths(), resolver.name_filter());

    if json {
        let lines: Vec<_> = candidates
            .into_iter()
            .map(|c| CandidateLine {
                name: c.name,
                path: c.path,
                shadowed: c.shadowed,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    println!("Discovered Plugins");
    println!("==================\n");
    if candidates.is_empty() {
        println!("No plugins found.");
        println!("Search path:");
        for dir in config.search_paths() {
            println!("  {}", dir.display());
        }
        return Ok(());
    }
    for candidate in &candidates {
        let note = if candidate.shadowed { " (shadowed)" } else { "" };
        println!("  {}{}", candidate.name, note);
        println!("        Path: {}", candidate.path.display());
    }
    println!("\nTotal: {} plugin file(s)", candidates.len());
    Ok(())
}

fn show_plugin_info(path: &Path, json: bool) -> Result<()> {
    let name = plugin_name(path)
        .with_context(|| format!("Cannot derive plugin name from {}", path.display()))?;
    let image = ImageHandle::open(&NativeImageLoader::new(), path, false)?;
    let meta = metadata::read(&name, &image)
        .with_context(|| format!("Invalid registration record in {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meta)?);
        return Ok(());
    }

    println!("Plugin Information");
    println!("==================\n");
    println!("Name:             {}", meta.name);
    println!("Version:          {}", meta.version);
    println!("Requires host:    {}", or_dash(&meta.version_required));
    println!("Overrides:        {}", or_dash(&meta.overrides));
    println!("Early init:       {}", or_dash(meta.early_init.as_deref().unwrap_or("")));
    println!("Description:      {}", or_dash(meta.description.as_deref().unwrap_or("")));
    println!("Default disabled: {}", meta.default_disabled);
    println!("Deep bind:        {}", meta.deep_bind);
    println!("Path:             {}", path.display());
    Ok(())
}

fn load_plugins(args: &Args, json: bool) -> Result<()> {
    let config = build_config(args)?;
    let host = PluginHost::new(config, &args.host_version)?;
    let report = host.load_new_plugins()?;
    let summaries = host.summaries();

    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            report: plughost_core::LoadReport,
            plugins: &'a [PluginSummary],
        }
        let output = Output {
            report,
            plugins: &summaries,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_table(&summaries);
    println!(
        "\n{} loaded, {} disabled, {} overridden, {} version mismatch, {} failed",
        report.loaded, report.disabled, report.overridden, report.version_mismatch, report.failed
    );
    if args.verbose {
        for summary in summaries.iter().filter(|s| s.error.is_some()) {
            println!(
                "  {}: {}",
                summary.name,
                summary.error.as_deref().unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn print_table(summaries: &[PluginSummary]) {
    if summaries.is_empty() {
        println!("No plugins.");
        return;
    }

    let labels: Vec<String> = summaries.iter().map(outcome_label).collect();
    let name_width = column_width(summaries.iter().map(|s| s.name.as_str()), "Plugin");
    let outcome_width = column_width(labels.iter().map(String::as_str), "Status");
    let version_width = column_width(summaries.iter().map(|s| s.version.as_str()), "Version");

    println!(
        "{:<name_width$}  {:<outcome_width$}  {:<version_width$}  Description",
        "Plugin", "Status", "Version"
    );
    for (summary, label) in summaries.iter().zip(&labels) {
        println!(
            "{:<name_width$}  {:<outcome_width$}  {:<version_width$}  {}",
            summary.name, label, summary.version, summary.description
        );
    }
}

fn outcome_label(summary: &PluginSummary) -> String {
    match &summary.overridden_by {
        Some(by) => format!("{} by {}", summary.outcome, by),
        None => summary.outcome.to_string(),
    }
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values.map(str::len).fold(header.len(), usize::max)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
