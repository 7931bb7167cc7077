//! `imgrecon` command line: normalize, resolve, or run the full pipeline.

use std::path::PathBuf;

use imgrecon::config;
use imgrecon::dedup::DedupMode;
use imgrecon::logging;
use imgrecon::pipeline::{self, PipelineOptions, RunPaths, SourcePaths};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(command) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let options = &command.options;
    let dedup_mode = if options.drop_any_dupes {
        DedupMode::AnyDuplicate
    } else {
        DedupMode::PerKind
    };
    let context = logging::RunContext {
        command: command.kind.as_str(),
        dry_run: options.dry_run,
        dedup_mode,
    };
    match logging::init(&context) {
        Ok(Some(log_path)) => tracing::info!(log_file = %log_path.display(), "Logging initialized"),
        Ok(None) => {}
        Err(err) => eprintln!("Logging disabled: {err}"),
    }
    let _run = logging::run_span(&context).entered();
    let config = config::load_or_default(options.config.as_deref())
        .map_err(|err| err.to_string())?;
    let out_dir = options
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.reports.out_dir));
    match command.kind {
        CommandKind::Normalize => {
            let stats = pipeline::run_normalize(&options.sources, &config, &out_dir)
                .map_err(|err| err.to_string())?;
            println!(
                "Normalized {} rows into {} references ({} invalid user ids)",
                stats.rows_read, stats.references, stats.invalid_user_ids
            );
        }
        CommandKind::Resolve => {
            let uploads = required(&options.uploads, "--uploads")?;
            let summary = pipeline::run_resolve(&options.sources, &uploads, &config, &out_dir)
                .map_err(|err| err.to_string())?;
            println!(
                "Resolved {} references, {} missing, {} ambiguous choices",
                summary.resolved, summary.missing, summary.ambiguous_choices
            );
        }
        CommandKind::Run => {
            let paths = RunPaths {
                uploads: required(&options.uploads, "--uploads")?,
                media: required(&options.media, "--media")?,
                db: required(&options.db, "--db")?,
                out_dir: out_dir.clone(),
            };
            let run_options = PipelineOptions {
                dry_run: options.dry_run,
                dedup_mode,
                web_fallback: options.web_fallback,
            };
            let summary = pipeline::run(&options.sources, &paths, &config, &run_options)
                .map_err(|err| err.to_string())?;
            println!(
                "{}{} inserted, {} deleted, {} moved, {} collisions, {} duplicates removed, {} missing",
                if summary.dry_run { "[dry-run] " } else { "" },
                summary.inserts,
                summary.deletes,
                summary.updates,
                summary.collisions,
                summary.duplicates_removed,
                summary.missing
            );
        }
    }
    println!("Reports written to {}", out_dir.display());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Normalize,
    Resolve,
    Run,
}

impl CommandKind {
    fn as_str(self) -> &'static str {
        match self {
            CommandKind::Normalize => "normalize",
            CommandKind::Resolve => "resolve",
            CommandKind::Run => "run",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CliOptions {
    sources: SourcePaths,
    uploads: Option<PathBuf>,
    media: Option<PathBuf>,
    db: Option<PathBuf>,
    out: Option<PathBuf>,
    config: Option<PathBuf>,
    dry_run: bool,
    drop_any_dupes: bool,
    web_fallback: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Command {
    kind: CommandKind,
    options: CliOptions,
}

fn parse_args(args: Vec<String>) -> Result<Option<Command>, String> {
    let Some(first) = args.first() else {
        return Err(help_text());
    };
    let kind = match first.as_str() {
        "-h" | "--help" => {
            println!("{}", help_text());
            return Ok(None);
        }
        "normalize" => CommandKind::Normalize,
        "resolve" => CommandKind::Resolve,
        "run" => CommandKind::Run,
        unknown => return Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    };
    let mut options = CliOptions::default();
    let mut idx = 1usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--csv" => options.sources.csv.push(next_path(&args, &mut idx, "--csv")?),
            "--wp-posts" => options.sources.wp_posts = Some(next_path(&args, &mut idx, "--wp-posts")?),
            "--wp-postmeta" => {
                options.sources.wp_postmeta = Some(next_path(&args, &mut idx, "--wp-postmeta")?)
            }
            "--uploads" => options.uploads = Some(next_path(&args, &mut idx, "--uploads")?),
            "--media" => options.media = Some(next_path(&args, &mut idx, "--media")?),
            "--db" => options.db = Some(next_path(&args, &mut idx, "--db")?),
            "--out" => options.out = Some(next_path(&args, &mut idx, "--out")?),
            "--config" => options.config = Some(next_path(&args, &mut idx, "--config")?),
            "--dry-run" if kind == CommandKind::Run => options.dry_run = true,
            "--drop-any-dupes" if kind == CommandKind::Run => options.drop_any_dupes = true,
            "--web-fallback" if kind == CommandKind::Run => options.web_fallback = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    if options.sources.csv.is_empty() && options.sources.wp_posts.is_none() {
        return Err(format!("At least one --csv or --wp-posts is required\n\n{}", help_text()));
    }
    if options.sources.wp_postmeta.is_some() && options.sources.wp_posts.is_none() {
        return Err("--wp-postmeta requires --wp-posts".to_string());
    }
    Ok(Some(Command { kind, options }))
}

fn next_path(args: &[String], idx: &mut usize, name: &str) -> Result<PathBuf, String> {
    let value = args
        .get(*idx + 1)
        .ok_or_else(|| format!("{name} requires a value"))?;
    *idx += 1;
    Ok(PathBuf::from(value))
}

fn required(value: &Option<PathBuf>, name: &str) -> Result<PathBuf, String> {
    value.clone().ok_or_else(|| format!("{name} is required"))
}

fn help_text() -> String {
    [
        "imgrecon",
        "",
        "Usage:",
        "  imgrecon normalize --csv <path>... [--wp-posts <p> --wp-postmeta <p>] [--out <dir>] [--config <toml>]",
        "  imgrecon resolve   --csv <path>... --uploads <dir> [--wp-posts <p> --wp-postmeta <p>] [--out <dir>] [--config <toml>]",
        "  imgrecon run       --csv <path>... --uploads <dir> --media <dir> --db <path>",
        "                     [--wp-posts <p> --wp-postmeta <p>] [--out <dir>] [--dry-run]",
        "                     [--drop-any-dupes] [--web-fallback] [--config <toml>]",
        "",
        "Options:",
        "  --csv <path>          Spreadsheet export; repeat for several sources",
        "  --wp-posts <path>     CMS posts table export (attachments)",
        "  --wp-postmeta <path>  CMS post-meta table export",
        "  --uploads <dir>       Read-only legacy uploads tree",
        "  --media <dir>         Managed media store",
        "  --db <path>           Image store database",
        "  --out <dir>           Report directory (default from config: reports)",
        "  --config <path>       TOML config (default: <app dir>/config.toml)",
        "  --dry-run             Plan every change, write only reports",
        "  --drop-any-dupes      Remove repeated content across all kinds of a user",
        "  --web-fallback        Fetch unresolved URLs over the network",
        "  -h, --help            Show help",
    ]
    .join("\n")
}
