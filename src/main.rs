//! tomecat - merge and rewrite EPUB books

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tomecat::{
    Cancellation, MergeOptions, Merger, RewriteOptions, RewriteRule, RewriteScope, Rewriter,
    Volume, expand_directories, expand_list_files,
};

#[derive(Parser)]
#[command(name = "tomecat")]
#[command(version, about = "Merge EPUB volumes and rewrite EPUB content", long_about = None)]
#[command(after_help = "EXAMPLES:
    tomecat merge -o saga.epub vol1.epub vol2.epub      Merge two volumes
    tomecat merge --dir ./volumes -t \"The Saga\"          Merge every EPUB in a directory
    tomecat rewrite book.epub --find Colour --replace Color
    tomecat info book.epub                              Show book metadata")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug details
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Merge two or more EPUB volumes into one book
    Merge(MergeArgs),
    /// Apply find/replace rules to an EPUB
    Rewrite(RewriteArgs),
    /// Show book metadata
    Info {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

#[derive(Args)]
struct MergeArgs {
    /// Volumes in reading order
    #[arg(value_name = "INPUTS")]
    inputs: Vec<PathBuf>,

    /// Output EPUB path
    #[arg(short, long, default_value = "merged.epub")]
    out: PathBuf,

    /// Override the merged title
    #[arg(short, long)]
    title: Option<String>,

    /// Override the merged language (default: first volume's)
    #[arg(long)]
    lang: Option<String>,

    /// Author credit; repeat for several
    #[arg(short, long = "creator")]
    creators: Vec<String>,

    /// Text file listing volume paths, one per line; repeatable
    #[arg(long = "list", value_name = "FILE")]
    lists: Vec<PathBuf>,

    /// Directory to scan for EPUB files; repeatable
    #[arg(long = "dir", value_name = "DIR")]
    dirs: Vec<PathBuf>,
}

#[derive(Args)]
struct RewriteArgs {
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output path (default: rewrite in place)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// What to rewrite
    #[arg(long, value_enum, default_value_t = RewriteScope::Body)]
    scope: RewriteScope,

    /// Literal text to find
    #[arg(long, requires = "replace")]
    find: Option<String>,

    /// Replacement text
    #[arg(long, requires = "find")]
    replace: Option<String>,

    /// Limit --find to elements matching this CSS selector; repeatable
    #[arg(long = "selector", requires = "find")]
    selectors: Vec<String>,

    /// JSON file with an array of {"find", "replace", "selectors"} rules
    #[arg(long, value_name = "FILE.json")]
    rules: Option<PathBuf>,

    /// Report matches without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print statistics as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let result = match cli.command {
        Command::Merge(args) => merge(args, cli.quiet),
        Command::Rewrite(args) => rewrite(args, cli.quiet),
        Command::Info { input } => show_info(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn merge(args: MergeArgs, quiet: bool) -> Result<(), String> {
    let mut files = args.inputs;
    files.extend(expand_list_files(&args.lists).map_err(|e| format!("list {e}"))?);
    files.extend(expand_directories(&args.dirs).map_err(|e| format!("dir {e}"))?);

    let mut options = MergeOptions::new(args.out).with_creators(args.creators);
    options.title = args.title;
    options.language = args.lang;

    let summary = Merger::new(options)
        .merge(&files)
        .map_err(|e| e.to_string())?;

    if !quiet {
        println!(
            "Merged {} volumes into {} ({} spine items)",
            summary.volumes,
            summary.output.display(),
            summary.spine_items
        );
    }
    Ok(())
}

fn rewrite(args: RewriteArgs, quiet: bool) -> Result<(), String> {
    let mut rules: Vec<RewriteRule> = Vec::new();
    if let Some(path) = &args.rules {
        let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let from_file: Vec<RewriteRule> =
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?;
        rules.extend(from_file);
    }
    if let (Some(find), Some(replace)) = (args.find, args.replace) {
        let mut rule = RewriteRule::new(find, replace);
        rule.selectors = args.selectors;
        rules.push(rule);
    }
    if rules.is_empty() {
        return Err("no rules: pass --find/--replace or --rules".to_string());
    }

    let mut options = RewriteOptions::new(rules)
        .with_scope(args.scope)
        .with_dry_run(args.dry_run);
    if let Some(out) = args.out {
        options = options.with_out_path(out);
    }

    let stats = Rewriter::new(options)
        .rewrite(&args.input)
        .map_err(|e| e.to_string())?;

    if args.json {
        let json = serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?;
        println!("{json}");
    } else if !quiet {
        for file in &stats.files {
            println!("{}: {} matches", file.path, file.matches);
        }
        let verb = if args.dry_run { "to change" } else { "changed" };
        println!(
            "{} matches, {} files {}",
            stats.matches, stats.files_changed, verb
        );
    }
    Ok(())
}

fn show_info(path: &Path) -> Result<(), String> {
    let volume = Volume::load(0, path, &Cancellation::new()).map_err(|e| e.to_string())?;
    let package = &volume.package;
    let meta = &package.metadata;

    println!("File: {}", path.display());
    println!("Title: {}", volume.display_name);
    let creators: Vec<&str> = meta.creators.iter().map(|c| c.value.as_str()).collect();
    if !creators.is_empty() {
        println!("Creators: {}", creators.join(", "));
    }
    if let Some(language) = meta.first_language() {
        println!("Language: {language}");
    }
    if let Some(identifier) = package.unique_identifier_value() {
        println!("Identifier: {identifier}");
    }
    println!("Spine items: {}", package.spine.itemrefs.len());
    println!("Manifest items: {}", package.manifest.items.len());
    println!(
        "TOC entries: {}",
        volume.nav.iter().map(|item| item.count()).sum::<usize>()
    );
    if let Some(cover) = &volume.cover_id {
        println!("Cover: {cover}");
    }

    Ok(())
}
