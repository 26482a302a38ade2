use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;
use whisk_contracts::credentials::{CredentialStore, Credentials, StoredCredentials};
use whisk_contracts::events::{EventWriter, TaskEvent};
use whisk_contracts::folders::{FolderIndex, ReferenceCategory, ReferenceEntry};
use whisk_contracts::references::plan_references;
use whisk_contracts::runs::summary::{write_summary, RunSummary};
use whisk_contracts::settings::AspectRatio;
use whisk_engine::{
    Authenticator, DryrunAuthenticator, DryrunService, ImageService, PromptTask, Session,
    SessionAuthenticator, TaskOrchestrator, WhiskConfig, WhiskService,
};

mod console;

const EXIT_IMAGES_FAILED: i32 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "autowhisk",
    version,
    about = "Folder-matched batch image generation for Whisk"
)]
struct Cli {
    /// Directory holding KARAKTER/, MEKAN/ and STIL/ (default: current directory).
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    /// JSON config file (default: <base-dir>/autowhisk.json when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// Use the offline service instead of the network.
    #[arg(long, global = true)]
    dryrun: bool,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Login(LoginArgs),
    Folders,
    Match(MatchArgs),
    Run(RunArgs),
    Console(ConsoleArgs),
}

#[derive(Debug, Parser)]
struct LoginArgs {
    /// Cookie text, or `@path` to read it from a file.
    #[arg(long)]
    cookie: String,
}

#[derive(Debug, Parser)]
struct MatchArgs {
    #[arg(long)]
    prompt: String,
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Text file with one prompt per line.
    #[arg(long)]
    prompts: PathBuf,
    #[arg(long)]
    count: Option<usize>,
    #[arg(long)]
    ratio: Option<AspectRatio>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ConsoleArgs {
    /// Prompts to load before the first command.
    #[arg(long)]
    prompts: Option<PathBuf>,
    #[arg(long)]
    count: Option<usize>,
    #[arg(long)]
    ratio: Option<AspectRatio>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("autowhisk error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = load_config(&cli)?;
    match cli.command {
        Command::Login(args) => run_login(&config, args, cli.dryrun),
        Command::Folders => run_folders(&config),
        Command::Match(args) => run_match(&config, args),
        Command::Run(args) => {
            apply_overrides(&mut config, args.count, args.ratio)?;
            run_batch(&config, args, cli.dryrun)
        }
        Command::Console(args) => {
            apply_overrides(&mut config, args.count, args.ratio)?;
            console::run_console(&config, args.prompts.as_deref(), cli.dryrun)?;
            Ok(0)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<WhiskConfig> {
    let base_dir = match cli.base_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let mut config = WhiskConfig::load(&base_dir, cli.config.as_deref())
        .with_context(|| format!("failed to load configuration for {}", base_dir.display()))?;
    if let Some(output_dir) = cli.output_dir.clone() {
        config.output_dir = output_dir;
    }
    Ok(config)
}

fn apply_overrides(
    config: &mut WhiskConfig,
    count: Option<usize>,
    ratio: Option<AspectRatio>,
) -> Result<()> {
    if let Some(count) = count {
        config.image_count = count;
    }
    if let Some(ratio) = ratio {
        config.aspect_ratio = ratio;
    }
    config.validate()?;
    Ok(())
}

fn read_cookie_arg(raw: &str) -> Result<String> {
    match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path.trim())
            .with_context(|| format!("failed reading cookie file {}", path.trim())),
        None => Ok(raw.to_string()),
    }
}

fn format_expiry(expires_at: Option<i64>) -> String {
    expires_at
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn credential_store() -> Result<CredentialStore> {
    CredentialStore::default_path()
        .map(CredentialStore::new)
        .context("no user data directory available for the saved session")
}

fn run_login(config: &WhiskConfig, args: LoginArgs, dryrun: bool) -> Result<i32> {
    let raw = read_cookie_arg(&args.cookie)?;
    let credentials = if dryrun {
        DryrunAuthenticator.authenticate(&raw)?
    } else {
        SessionAuthenticator::new(config.endpoints()).authenticate(&raw)?
    };
    println!(
        "Session valid. Token expires: {}",
        format_expiry(credentials.expires_at)
    );
    if dryrun {
        println!("Dryrun: session not saved.");
        return Ok(0);
    }
    let store = credential_store()?;
    store.save(&StoredCredentials {
        cookie: raw.trim().to_string(),
        token: credentials.access_token,
    })?;
    println!("Saved to {}", store.path().display());
    Ok(0)
}

/// Credentials for a run: the saved cookie is validated again so the token is
/// fresh; when that fails the saved token is used as is.
fn session_credentials(config: &WhiskConfig) -> Result<Credentials> {
    let store = credential_store()?;
    let Some(stored) = store.load() else {
        bail!("no saved session; run `autowhisk login --cookie ...` first");
    };
    match SessionAuthenticator::new(config.endpoints()).authenticate(&stored.cookie) {
        Ok(credentials) => {
            store.save(&StoredCredentials {
                cookie: stored.cookie.clone(),
                token: credentials.access_token.clone(),
            })?;
            println!(
                "Session valid. Token expires: {}",
                format_expiry(credentials.expires_at)
            );
            Ok(credentials)
        }
        Err(err) => {
            tracing::warn!(error = %err, "session refresh failed, using saved token");
            Credentials::from_stored(&stored)
                .context("saved session has no token; run `autowhisk login` again")
        }
    }
}

fn build_service(config: &WhiskConfig, dryrun: bool) -> Result<Arc<dyn ImageService>> {
    if dryrun {
        return Ok(Arc::new(DryrunService));
    }
    let credentials = session_credentials(config)?;
    Ok(Arc::new(WhiskService::new(
        config.endpoints(),
        credentials,
        config.request_timeout(),
    )))
}

/// Creates missing reference folders and scans them.
fn prepare_folders(config: &WhiskConfig) -> Result<FolderIndex> {
    let layout = config.folder_layout();
    for dir in layout.create_missing()? {
        println!("Created {}", dir.display());
    }
    Ok(FolderIndex::scan(&layout))
}

fn folder_status_lines(index: &FolderIndex) -> Vec<String> {
    let mut lines = index
        .status()
        .into_iter()
        .map(|status| {
            let label = status
                .dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| status.dir.display().to_string());
            if status.exists {
                format!("{label}: found {} files", status.files)
            } else {
                format!("{label}: not found")
            }
        })
        .collect::<Vec<String>>();
    match index.style() {
        Some(style) => lines.push(format!("Style for this run: {}", style.filename)),
        None => lines.push("Style for this run: none".to_string()),
    }
    lines
}

fn run_folders(config: &WhiskConfig) -> Result<i32> {
    let index = prepare_folders(config)?;
    for line in folder_status_lines(&index) {
        println!("{line}");
    }
    Ok(0)
}

fn run_match(config: &WhiskConfig, args: MatchArgs) -> Result<i32> {
    let index = FolderIndex::scan(&config.folder_layout());
    let plan = plan_references(
        &args.prompt,
        index.characters(),
        index.scenes(),
        index.style(),
    );
    println!(
        "{}: {}",
        ReferenceCategory::Character,
        non_empty_or(names(&plan.characters), "none")
    );
    println!(
        "{}: {}",
        ReferenceCategory::Scene,
        plan.scene
            .map(|entry| entry.filename.clone())
            .unwrap_or_else(|| "none".to_string())
    );
    if !plan.dropped_scenes.is_empty() {
        println!("ignored scenes: {}", names(&plan.dropped_scenes));
    }
    println!(
        "{}: {}",
        ReferenceCategory::Style,
        plan.style
            .map(|entry| format!("{} (attached once uploaded)", entry.filename))
            .unwrap_or_else(|| "none".to_string())
    );
    Ok(0)
}

fn names(entries: &[&ReferenceEntry]) -> String {
    entries
        .iter()
        .map(|entry| entry.filename.clone())
        .collect::<Vec<String>>()
        .join(", ")
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// One prompt per line; lines are trimmed and blank lines skipped.
fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading prompts from {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn prepare_style(session: &mut Session) {
    match session.prepare_style() {
        Ok(Some(_)) => {
            if let Some(style) = session.index().style() {
                println!("Style uploaded: {}", style.filename);
            }
        }
        Ok(None) => {}
        Err(err) => println!(
            "Style upload failed ({}); continuing without style",
            err.short_reason()
        ),
    }
}

fn new_event_writer(path: PathBuf) -> EventWriter {
    EventWriter::new(path, uuid::Uuid::new_v4().to_string())
}

fn summary_extra(config: &WhiskConfig, service: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert(
        "output_dir".to_string(),
        json!(config.output_dir.to_string_lossy()),
    );
    extra.insert("service".to_string(), json!(service));
    extra.insert("image_count".to_string(), json!(config.image_count));
    extra.insert(
        "aspect_ratio".to_string(),
        json!(config.aspect_ratio.to_string()),
    );
    extra
}

fn print_summary(summary: &RunSummary) {
    let tally = &summary.tally;
    println!(
        "Run {}: {} rows done ({} failed), {} images saved, {} images failed",
        summary.run_id,
        tally.tasks_completed,
        tally.tasks_failed,
        tally.images_succeeded,
        tally.images_failed
    );
}

pub(crate) fn describe_event(event: &TaskEvent) -> String {
    match event {
        TaskEvent::RunStarted { run_id, queued } => {
            format!("Run {run_id} started, {queued} rows queued")
        }
        TaskEvent::ReferencesResolved {
            row,
            references,
            dropped_scenes,
        } => {
            let mut text = if references.is_empty() {
                format!("[row {}] no references, prompt only", row + 1)
            } else {
                let listed = references
                    .iter()
                    .map(|reference| format!("{} ({})", reference.caption, reference.category))
                    .collect::<Vec<String>>()
                    .join(", ");
                format!("[row {}] references: {listed}", row + 1)
            };
            if !dropped_scenes.is_empty() {
                text.push_str(&format!("; ignored scenes: {}", dropped_scenes.join(", ")));
            }
            text
        }
        TaskEvent::ImageStarted {
            row,
            image_index,
            total,
        } => format!("[row {}] image {} generating ({total} requested)", row + 1, image_index + 1),
        TaskEvent::ImageSucceeded {
            row,
            image_index,
            path,
        } => format!("[row {}] image {} saved: {}", row + 1, image_index + 1, path.display()),
        TaskEvent::ImageFailed {
            row,
            image_index,
            reason,
            ..
        } => format!("[row {}] image {} failed: {reason}", row + 1, image_index + 1),
        TaskEvent::TaskFailed { row, reason, .. } => format!("[row {}] failed: {reason}", row + 1),
        TaskEvent::TaskCompleted {
            row,
            succeeded,
            failed,
        } => format!("[row {}] done: {succeeded} saved, {failed} failed", row + 1),
        TaskEvent::AllDone => "All done".to_string(),
    }
}

fn run_batch(config: &WhiskConfig, args: RunArgs, dryrun: bool) -> Result<i32> {
    let prompts = read_prompts(&args.prompts)?;
    if prompts.is_empty() {
        bail!("no prompts in {}", args.prompts.display());
    }
    let index = prepare_folders(config)?;
    let service = build_service(config, dryrun)?;
    let service_name = service.name().to_string();
    let mut session = Session::new(service, index);
    prepare_style(&mut session);

    let mut orchestrator = TaskOrchestrator::new(session, config.orchestrator_config());
    let handle = orchestrator.handle();
    for (row, prompt) in prompts.iter().enumerate() {
        handle.enqueue(PromptTask::all_images(row, prompt.as_str(), config.image_count));
    }

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| config.output_dir.join("events.jsonl"));
    let (tx, rx) = mpsc::channel();
    orchestrator.start(tx, Some(new_event_writer(events_path)))?;

    let mut rows_done = 0usize;
    while rows_done < prompts.len() {
        let Ok(event) = rx.recv() else {
            break;
        };
        println!("{}", describe_event(&event));
        match event {
            TaskEvent::TaskCompleted { .. } => rows_done += 1,
            TaskEvent::AllDone => break,
            _ => {}
        }
    }

    let summary = orchestrator
        .stop()
        .context("orchestrator worker exited without a summary")?;
    for event in rx.try_iter() {
        if event != TaskEvent::AllDone {
            println!("{}", describe_event(&event));
        }
    }
    write_summary(
        &config.output_dir.join("summary.json"),
        &summary,
        Some(&summary_extra(config, &service_name)),
    )?;
    print_summary(&summary);
    Ok(if summary.tally.all_succeeded() {
        0
    } else {
        EXIT_IMAGES_FAILED
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use whisk_contracts::events::TaskEvent;
    use whisk_contracts::folders::ReferenceCategory;
    use whisk_contracts::references::ResolvedReference;

    use super::{describe_event, format_expiry, read_cookie_arg, read_prompts};

    #[test]
    fn prompts_file_skips_blank_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prompts.txt");
        std::fs::write(&path, "  Ahmet parkta  \n\n\r\nAyşe denizde\n   \n")?;
        assert_eq!(read_prompts(&path)?, vec!["Ahmet parkta", "Ayşe denizde"]);
        Ok(())
    }

    #[test]
    fn cookie_arg_reads_file_with_at_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cookie.txt");
        std::fs::write(&path, "eyToken\n")?;
        assert_eq!(read_cookie_arg(&format!("@{}", path.display()))?, "eyToken\n");
        assert_eq!(read_cookie_arg("a=1")?, "a=1");
        Ok(())
    }

    #[test]
    fn expiry_formats_or_reports_unknown() {
        assert_eq!(format_expiry(None), "Unknown");
        assert_eq!(format_expiry(Some(i64::MAX)), "Unknown");
        assert_eq!(format_expiry(Some(1_760_000_000)).len(), "2025-10-09 08:53".len());
    }

    #[test]
    fn events_describe_one_based_rows() {
        let resolved = TaskEvent::ReferencesResolved {
            row: 0,
            references: vec![ResolvedReference {
                caption: "ahmet".to_string(),
                category: ReferenceCategory::Character,
                media_id: "m1".to_string(),
            }],
            dropped_scenes: vec!["Plaj.jpg".to_string()],
        };
        assert_eq!(
            describe_event(&resolved),
            "[row 1] references: ahmet (character); ignored scenes: Plaj.jpg"
        );
        assert_eq!(
            describe_event(&TaskEvent::ImageSucceeded {
                row: 2,
                image_index: 0,
                path: PathBuf::from("out/3_x_1.jpg"),
            }),
            "[row 3] image 1 saved: out/3_x_1.jpg"
        );
        assert_eq!(
            describe_event(&TaskEvent::TaskFailed {
                row: 1,
                reason: "Upload failed: HTTP 403".to_string(),
                detail: String::new(),
            }),
            "[row 2] failed: Upload failed: HTTP 403"
        );
    }
}
