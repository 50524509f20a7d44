use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use picscribe::config::Config;
use picscribe::db::{Photo, SearchHit};
use picscribe::llm::create_provider;
use picscribe::logging;
use picscribe::project::{open_project, ImportReport, Project};
use picscribe::scanner::{FolderSource, ImportSource, PathListSource};

enum Command {
    Open,
    Import(Vec<PathBuf>),
    Status,
    Search(String),
    Edit(i64, String),
    Restore(i64),
}

struct Args {
    command: Command,
    project_dir: PathBuf,
    config_path: Option<PathBuf>,
    wait: bool,
    json: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut wait = false;
    let mut json = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("picscribe {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--wait" | "-w" => wait = true,
            "--json" => json = true,
            arg if arg.starts_with('-') && arg.len() > 1 => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    match parse_command(positional) {
        Ok((command, project_dir)) => Args {
            command,
            project_dir,
            config_path,
            wait,
            json,
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

fn parse_command(positional: Vec<String>) -> Result<(Command, PathBuf)> {
    let mut rest = positional.into_iter();
    let name = rest.next().ok_or_else(|| anyhow!("missing command"))?;
    let project_dir = PathBuf::from(rest.next().ok_or_else(|| anyhow!("missing project directory"))?);
    let rest: Vec<String> = rest.collect();

    let command = match name.as_str() {
        "open" => Command::Open,
        "import" => {
            if rest.is_empty() {
                bail!("import needs at least one file or folder");
            }
            Command::Import(rest.into_iter().map(PathBuf::from).collect())
        }
        "status" => Command::Status,
        "search" => Command::Search(rest.join(" ")),
        "edit" => {
            let (id, text) = rest.split_first().ok_or_else(|| anyhow!("edit needs a photo id"))?;
            Command::Edit(parse_id(id)?, text.join(" "))
        }
        "restore" => {
            let id = rest.first().ok_or_else(|| anyhow!("restore needs a photo id"))?;
            Command::Restore(parse_id(id)?)
        }
        other => bail!("unknown command '{}'", other),
    };
    Ok((command, project_dir))
}

fn parse_id(s: &str) -> Result<i64> {
    s.parse().with_context(|| format!("'{}' is not a photo id", s))
}

fn print_help() {
    println!(
        r#"picscribe - AI-described, searchable photo catalogs

USAGE:
    picscribe [OPTIONS] <COMMAND> <PROJECT_DIR> [ARGS]

COMMANDS:
    open <dir>                      Open or create a project and resume pending work
    import <dir> <file|folder>...   Add images to the project
    status <dir>                    List photos and their description status
    search <dir> <term>             Search descriptions
    edit <dir> <id> <text>          Replace a description (the original is kept)
    restore <dir> <id>              Bring back the original description

OPTIONS:
    --config, -c PATH   Path to config file
    --wait, -w          Wait until every queued photo has been described
    --json              Print results as JSON
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PICSCRIBE_CONFIG    Path to config file (overrides default location)
    PICSCRIBE_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/picscribe/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(None);

    // Load configuration
    let config_path = resolve_config_path(args.config_path.as_deref());
    let config = Config::load_from(&config_path)?;
    if let Err(e) = config.validate() {
        eprintln!("Warning: {} (check {})", e, config_path.display());
    }

    // Only open and import resume enrichment
    let provider = Arc::from(create_provider(&config.api));
    let opened = match args.command {
        Command::Open | Command::Import(_) => open_project(&args.project_dir, provider)?,
        _ => Project::open_idle(&args.project_dir, provider)?,
    };
    let project = opened.project;

    let result = run(&args, &config, &project, opened.photos);

    if args.wait {
        project.wait_idle();
    }
    project.close();
    result
}

/// `--config` wins over `PICSCRIBE_CONFIG` and the default location.
fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map(Path::to_path_buf).unwrap_or_else(Config::config_path)
}

fn run(args: &Args, config: &Config, project: &Project, photos: Vec<Photo>) -> Result<()> {
    match &args.command {
        Command::Open => {
            let counts = project.status_counts()?;
            if args.json {
                return print_json(&photos);
            }
            println!(
                "{}: {} photos ({} completed, {} pending, {} failed)",
                project.dir().display(),
                counts.total(),
                counts.completed,
                counts.pending + counts.processing,
                counts.failed
            );
        }
        Command::Import(paths) => {
            let mut files = Vec::new();
            let mut report = ImportReport::default();
            for path in paths {
                if path.is_dir() {
                    merge(&mut report, project.import(&FolderSource::with_config(path, &config.import))?);
                } else {
                    files.push(path.clone());
                }
            }
            if !files.is_empty() {
                let source: &dyn ImportSource = &PathListSource::new(files);
                merge(&mut report, project.import(source)?);
            }

            if args.json {
                return print_json(&report.imported);
            }
            println!(
                "Imported {} photos, {} already in the catalog",
                report.imported.len(),
                report.already_present.len()
            );
            for (path, reason) in &report.failed {
                println!("  skipped {}: {}", path.display(), reason);
            }
        }
        Command::Status => {
            let photos = project.list_status()?;
            if args.json {
                return print_json(&photos);
            }
            for photo in &photos {
                print_photo(photo);
            }
        }
        Command::Search(term) => {
            let hits = project.search(term)?;
            if args.json {
                return print_json(&hits);
            }
            for SearchHit { photo, highlighted } in &hits {
                println!("{:>6}  {}", photo.id, photo.file_path);
                if let Some(text) = highlighted {
                    println!("        {}", text);
                }
            }
        }
        Command::Edit(id, text) => {
            let photo = project.edit(*id, text)?;
            if args.json {
                return print_json(&photo);
            }
            print_photo(&photo);
        }
        Command::Restore(id) => {
            let photo = project.restore(*id)?;
            if args.json {
                return print_json(&photo);
            }
            print_photo(&photo);
        }
    }
    Ok(())
}

fn merge(into: &mut ImportReport, from: ImportReport) {
    into.imported.extend(from.imported);
    into.already_present.extend(from.already_present);
    into.failed.extend(from.failed);
}

fn print_photo(photo: &Photo) {
    println!(
        "{:>6}  {:<10}  {}  {}{}",
        photo.id,
        photo.status.as_str(),
        photo.taken_at,
        photo.file_path,
        if photo.is_edited { "  (edited)" } else { "" }
    );
    if let Some(description) = &photo.description_ai {
        println!("        {}", description);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
