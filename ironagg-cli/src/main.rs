use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ironagg_core::logging::{self, LogLevel};
use ironagg_core::{
    run_sharded, Document, GroupCoordinator, GroupOptions, GroupSpec, MergeCoordinator,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ironagg")]
#[command(about = "IronAgg CLI - run $group stages over JSON documents")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides IRONAGG_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a $group stage and print the results
    Group {
        #[command(flatten)]
        stage: StageArgs,
        /// Split the input into this many contiguous shards and merge their partials
        #[arg(long, default_value_t = 1)]
        shards: usize,
        /// Print the explain output instead of the results
        #[arg(long)]
        explain: bool,
    },
    /// Run a $group stage and print shard-side partial results
    Partials {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// Merge partial result files (one per shard, in shard order)
    Merge {
        /// $group stage specification (JSON file)
        #[arg(long)]
        spec: PathBuf,
        /// Partial result files produced by `partials`
        #[arg(required = true)]
        partials: Vec<PathBuf>,
    },
}

#[derive(Args)]
struct StageArgs {
    /// $group stage specification (JSON file)
    #[arg(long)]
    spec: PathBuf,
    /// Input documents: a JSON array or one document per line
    #[arg(long)]
    input: PathBuf,
    /// Options file: {"maxMemoryBytes", "allowDiskUse", "spillDir", "shareSortKeys"}
    #[arg(long)]
    options: Option<PathBuf>,
    /// Memory budget in bytes
    #[arg(long)]
    max_memory: Option<usize>,
    /// Spill to disk when the memory budget is exceeded
    #[arg(long)]
    allow_disk_use: bool,
    /// Directory for spill files (default: system temp dir)
    #[arg(long)]
    spill_dir: Option<PathBuf>,
    /// Disable the shared sort key optimization
    #[arg(long)]
    no_share_sort_keys: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Group {
            stage,
            shards,
            explain,
        } => run_group(&stage, shards, explain),
        Commands::Partials { stage } => run_partials(&stage),
        Commands::Merge { spec, partials } => merge_partials(&spec, &partials),
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    logging::init_from_env();
    if let Some(raw) = level {
        let level = LogLevel::parse(raw)
            .ok_or_else(|| anyhow::anyhow!("Unknown log level: {}", raw))?;
        logging::set_log_level(level);
    }
    Ok(())
}

/// Run the stage, single node or sharded
fn run_group(stage: &StageArgs, shards: usize, explain: bool) -> Result<()> {
    let spec = load_spec(&stage.spec)?;
    let options = load_options(stage)?;
    let docs = load_documents(&stage.input)?;

    if explain {
        let mut coordinator =
            GroupCoordinator::new(&spec, options).context("Failed to build $group stage")?;
        coordinator
            .consume_all(docs)
            .context("Failed to run $group stage")?;
        let explain = serde_json::to_string_pretty(&coordinator.explain())
            .context("Failed to serialize explain output")?;
        println!("{}", explain);
        return Ok(());
    }

    let results = if shards > 1 {
        let per_shard = docs.len().div_ceil(shards).max(1);
        let split: Vec<Vec<Document>> = docs.chunks(per_shard).map(|c| c.to_vec()).collect();
        run_sharded(&spec, &options, split).context("Failed to run sharded $group stage")?
    } else {
        let mut coordinator =
            GroupCoordinator::new(&spec, options).context("Failed to build $group stage")?;
        coordinator
            .consume_all(docs)
            .context("Failed to run $group stage")?;
        coordinator.finish().context("Failed to finish $group stage")?
    };

    print_documents(&results)
}

fn run_partials(stage: &StageArgs) -> Result<()> {
    let spec = load_spec(&stage.spec)?;
    let options = load_options(stage)?;
    let docs = load_documents(&stage.input)?;

    let mut coordinator =
        GroupCoordinator::new(&spec, options).context("Failed to build $group stage")?;
    coordinator
        .consume_all(docs)
        .context("Failed to run $group stage")?;
    let partials = coordinator
        .finish_partials()
        .context("Failed to produce partial results")?;
    print_documents(&partials)
}

fn merge_partials(spec_path: &Path, files: &[PathBuf]) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let mut merger = MergeCoordinator::new(&spec).context("Failed to build $group stage")?;

    for file in files {
        let partials = load_documents(file)?;
        merger
            .consume_shard(&partials)
            .with_context(|| format!("Failed to merge partials from: {}", file.display()))?;
    }

    print_documents(&merger.finish())
}

fn load_spec(path: &Path) -> Result<GroupSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec: {}", path.display()))?;
    let json: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in spec: {}", path.display()))?;
    GroupSpec::from_json(&json)
        .with_context(|| format!("Invalid $group stage in: {}", path.display()))
}

/// Options file first, then command-line flags on top
fn load_options(stage: &StageArgs) -> Result<GroupOptions> {
    let mut options = match &stage.options {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read options: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid options in: {}", path.display()))?
        }
        None => GroupOptions::new(),
    };

    if let Some(bytes) = stage.max_memory {
        options = options.with_max_memory_bytes(bytes);
    }
    if stage.allow_disk_use {
        options = options.with_allow_disk_use(true);
    }
    if let Some(dir) = &stage.spill_dir {
        options = options.with_spill_dir(dir.clone());
    }
    if stage.no_share_sort_keys {
        options = options.with_share_sort_keys(false);
    }
    Ok(options)
}

/// Read a JSON array of documents, or JSON lines
fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let values: Vec<Value> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in file: {}", path.display()))?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("Invalid JSON on line {} of {}", number + 1, path.display())
                })
            })
            .collect::<Result<_>>()?
    };

    values
        .iter()
        .map(|value| {
            Document::from_json(value)
                .with_context(|| format!("Invalid document in: {}", path.display()))
        })
        .collect()
}

fn print_documents(docs: &[Document]) -> Result<()> {
    for doc in docs {
        let line =
            serde_json::to_string(&doc.to_json()).with_context(|| "Failed to serialize result")?;
        println!("{}", line);
    }
    Ok(())
}
