use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use pattern_patch::{
    DocumentStore, FsStore, LoaderConfig, MemoryStore, Patch, PatchOptions, PatchOutcome,
    RenderContext, TrimMode,
};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pattern-patch")]
#[command(about = "Apply and revert regex-anchored text patches", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding named patch descriptors
    #[arg(long, global = true, env = "PATTERN_PATCH_DIR")]
    patch_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a patch to one or more files
    Apply(RunArgs),

    /// Revert an append or prepend patch from one or more files
    Revert(RunArgs),

    /// Show a patch descriptor
    Show {
        /// Descriptor path, or name within the patch directory
        patch: String,
    },

    /// List named patches in the patch directory
    List,
}

#[derive(Args)]
struct RunArgs {
    /// Descriptor path, or name within the patch directory
    patch: String,

    /// Files to patch
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Template variable, repeatable
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Character offset at which matching starts
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Dry run - show what would be changed without modifying files
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show unified diff of changes
    #[arg(short, long)]
    diff: bool,

    /// Drop a newline directly following a template tag
    #[arg(long)]
    trim_newlines: bool,
}

#[derive(Clone, Copy)]
enum Direction {
    Apply,
    Revert,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("PATTERN_PATCH_LOG").unwrap_or_else(|_| EnvFilter::new("off"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let loader = LoaderConfig {
        patch_dir: cli.patch_dir,
        ..LoaderConfig::default()
    };

    match cli.command {
        Commands::Apply(args) => cmd_run(&loader, args, Direction::Apply),
        Commands::Revert(args) => cmd_run(&loader, args, Direction::Revert),
        Commands::Show { patch } => cmd_show(&loader, &patch),
        Commands::List => cmd_list(&loader),
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn cmd_run(loader: &LoaderConfig, args: RunArgs, direction: Direction) -> Result<()> {
    let trim_mode = if args.trim_newlines {
        TrimMode::TrimTagNewline
    } else {
        TrimMode::Keep
    };
    let loader = loader.clone().with_trim_mode(trim_mode);
    let patch = loader
        .resolve(&args.patch)
        .with_context(|| format!("failed to load patch '{}'", args.patch))?;

    let context: RenderContext = args.vars.into_iter().collect();
    let renderer = loader.renderer();
    let options = PatchOptions::new(&renderer, &context).with_offset(args.offset);

    // Run against an in-memory copy so a failure part way leaves disk alone
    let mut fs_store = FsStore;
    let mut staged = MemoryStore::new();
    for file in &args.files {
        let contents = fs_store
            .read(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        staged.insert(file.clone(), contents);
    }
    let originals = staged.clone();

    let outcomes = run_patch(&patch, &mut staged, &args.files, &options, direction)?;

    if args.dry_run {
        println!("{}", "[DRY RUN - no files will be modified]".cyan());
    }

    let mut changed = 0;
    for outcome in &outcomes {
        let path = outcome.path();
        match outcome {
            PatchOutcome::Patched { .. } => {
                changed += 1;
                let verb = match (direction, args.dry_run) {
                    (Direction::Apply, true) => "Would patch",
                    (Direction::Apply, false) => "Patched",
                    (Direction::Revert, true) => "Would revert",
                    (Direction::Revert, false) => "Reverted",
                };
                println!("{} {} {}", "✓".green(), verb, path.display());

                let before = originals.get(path).unwrap_or_default();
                let after = staged.get(path).unwrap_or_default();
                if args.diff {
                    display_diff(path, before, after);
                }
                if !args.dry_run {
                    fs_store
                        .write(path, after)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
            }
            PatchOutcome::Unchanged { .. } => {
                println!("{} Unchanged {}", "⊙".yellow(), path.display());
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} changed", format!("{}", changed).green());
    println!(
        "  {} unchanged",
        format!("{}", outcomes.len() - changed).yellow()
    );

    Ok(())
}

fn run_patch(
    patch: &Patch,
    store: &mut MemoryStore,
    files: &[PathBuf],
    options: &PatchOptions<'_>,
    direction: Direction,
) -> Result<Vec<PatchOutcome>> {
    let outcomes = match direction {
        Direction::Apply => patch.apply_to(store, files, options)?,
        Direction::Revert => patch.revert_to(store, files, options)?,
    };
    Ok(outcomes)
}

fn cmd_show(loader: &LoaderConfig, reference: &str) -> Result<()> {
    let patch = loader
        .resolve(reference)
        .with_context(|| format!("failed to load patch '{}'", reference))?;

    println!("{}", reference.bold());
    println!("  pattern:   {}", patch.pattern().as_str());
    println!("  mode:      {}", patch.mode());
    println!("  global:    {}", patch.scope().is_global());
    if let Some(path) = patch.text_file() {
        println!("  text_file: {}", path.display());
    }
    println!("  text:      {:?}", patch.text());
    Ok(())
}

fn cmd_list(loader: &LoaderConfig) -> Result<()> {
    let files = loader.list_patches()?;
    if files.is_empty() {
        println!("{}", "No patches found".yellow());
        return Ok(());
    }

    for file in files {
        let name = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        match pattern_patch::load_from_path(&file) {
            Ok(patch) => println!(
                "{} {} ({}{})",
                "•".cyan(),
                name,
                patch.mode(),
                if patch.scope().is_global() {
                    ", global"
                } else {
                    ""
                }
            ),
            Err(e) => eprintln!("{} {}: {}", "✗".red(), name, e),
        }
    }
    Ok(())
}
