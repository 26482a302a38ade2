use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use whisk_contracts::console::{parse_command, OperatorCommand, CONSOLE_HELP_COMMANDS};
use whisk_contracts::events::TaskEvent;
use whisk_contracts::runs::summary::write_summary;
use whisk_engine::{PromptTask, RunState, Session, TaskOrchestrator, WhiskConfig};

use super::{
    build_service, describe_event, folder_status_lines, new_event_writer, prepare_folders,
    prepare_style, print_summary, read_prompts, summary_extra,
};

/// What the console knows about one prompt row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RowProgress {
    prompt: String,
    requested: usize,
    saved: usize,
    failed_images: Vec<usize>,
    failure: Option<String>,
    done: bool,
}

impl RowProgress {
    fn new(prompt: String, requested: usize) -> Self {
        Self {
            prompt,
            requested,
            ..Self::default()
        }
    }

    fn status_label(&self) -> String {
        if let Some(reason) = &self.failure {
            return format!("failed: {reason}");
        }
        if self.done {
            return format!("done, {} saved, {} failed", self.saved, self.failed_images.len());
        }
        if self.saved > 0 || !self.failed_images.is_empty() {
            return format!("{}/{} saved", self.saved, self.requested);
        }
        "queued".to_string()
    }
}

type Rows = Arc<Mutex<Vec<RowProgress>>>;

fn lock_rows(rows: &Rows) -> MutexGuard<'_, Vec<RowProgress>> {
    rows.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_event(rows: &mut [RowProgress], event: &TaskEvent) {
    let Some(progress) = event.row().and_then(|row| rows.get_mut(row)) else {
        return;
    };
    match event {
        TaskEvent::ReferencesResolved { .. } => {
            progress.failure = None;
            progress.done = false;
        }
        TaskEvent::ImageSucceeded { image_index, .. } => {
            progress.saved += 1;
            progress.failed_images.retain(|index| index != image_index);
        }
        TaskEvent::ImageFailed { image_index, .. } => {
            if !progress.failed_images.contains(image_index) {
                progress.failed_images.push(*image_index);
            }
        }
        TaskEvent::TaskFailed { reason, .. } => progress.failure = Some(reason.clone()),
        TaskEvent::TaskCompleted { .. } => progress.done = true,
        _ => {}
    }
}

/// Prints events as they arrive and folds them into the row table.
fn spawn_printer(events: Receiver<TaskEvent>, rows: Rows) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("autowhisk-events".to_string())
        .spawn(move || {
            for event in events {
                apply_event(&mut lock_rows(&rows), &event);
                println!("{}", describe_event(&event));
                if event == TaskEvent::AllDone {
                    break;
                }
            }
        })?;
    Ok(handle)
}

#[derive(Debug, PartialEq, Eq)]
enum Retry {
    Queued(PromptTask),
    /// The row's last attempt is still queued or running.
    Unfinished,
    NoSuchRow,
}

/// `/retry` runs the whole row again with the image count it was added with.
/// Only finished rows can be retried.
fn retry_task(rows: &mut [RowProgress], row: usize) -> Retry {
    let Some(progress) = rows.get_mut(row) else {
        return Retry::NoSuchRow;
    };
    if !progress.done {
        return Retry::Unfinished;
    }
    let task = PromptTask::all_images(row, progress.prompt.clone(), progress.requested);
    *progress = RowProgress::new(progress.prompt.clone(), progress.requested);
    Retry::Queued(task)
}

struct Console {
    config: WhiskConfig,
    service_name: String,
    orchestrator: TaskOrchestrator,
    rows: Rows,
    printer: Option<JoinHandle<()>>,
}

impl Console {
    fn add_prompt(&mut self, prompt: String) {
        let row = {
            let mut rows = lock_rows(&self.rows);
            rows.push(RowProgress::new(prompt.clone(), self.config.image_count));
            rows.len() - 1
        };
        self.orchestrator.handle().enqueue(PromptTask::all_images(
            row,
            prompt,
            self.config.image_count,
        ));
        println!("Row {} added", row + 1);
    }

    fn is_active(&self) -> bool {
        matches!(
            self.orchestrator.state(),
            RunState::Running | RunState::Paused | RunState::Stopping
        )
    }

    fn start(&mut self) -> Result<()> {
        if self.is_active() {
            println!("Already running.");
            return Ok(());
        }
        if self.orchestrator.handle().queued() == 0 {
            println!("Nothing queued. Add prompts or /import a file first.");
            return Ok(());
        }
        self.join_printer();
        let (tx, rx) = mpsc::channel();
        let writer = new_event_writer(self.config.output_dir.join("events.jsonl"));
        self.orchestrator.start(tx, Some(writer))?;
        self.printer = Some(spawn_printer(rx, Arc::clone(&self.rows))?);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(summary) = self.orchestrator.stop() else {
            println!("Not running.");
            return Ok(());
        };
        self.join_printer();
        write_summary(
            &self.config.output_dir.join("summary.json"),
            &summary,
            Some(&summary_extra(&self.config, &self.service_name)),
        )?;
        print_summary(&summary);
        Ok(())
    }

    fn join_printer(&mut self) {
        if let Some(printer) = self.printer.take() {
            if printer.join().is_err() {
                tracing::warn!("event printer thread panicked");
            }
        }
    }

    fn retry(&mut self, row: usize) {
        let task = retry_task(&mut lock_rows(&self.rows), row);
        match task {
            Retry::Queued(task) => {
                let images = task.image_indices.len();
                self.orchestrator.handle().retry(task);
                println!("Row {} queued again ({images} images)", row + 1);
                if !self.is_active() {
                    println!("Use /start to run it.");
                }
            }
            Retry::Unfinished => println!("Row {} has not finished yet", row + 1),
            Retry::NoSuchRow => println!("No row {}", row + 1),
        }
    }

    fn rescan(&mut self) {
        if self.is_active() {
            self.orchestrator.handle().request_rescan();
            println!("Folders will be rescanned before the next row.");
            return;
        }
        if let Some(session) = self.orchestrator.session_mut() {
            session.rescan();
            if session.style_media_id().is_none() {
                prepare_style(session);
            }
            for line in folder_status_lines(session.index()) {
                println!("{line}");
            }
        }
    }

    fn import(&mut self, path: &str) -> Result<()> {
        let prompts = read_prompts(Path::new(path))?;
        let imported = prompts.len();
        for prompt in prompts {
            self.add_prompt(prompt);
        }
        println!("Imported {imported} prompts from {path}");
        Ok(())
    }

    fn print_status(&self) {
        let handle = self.orchestrator.handle();
        println!(
            "State: {:?}, {} rows queued, {} images per row, ratio {}",
            handle.state(),
            handle.queued(),
            self.config.image_count,
            self.orchestrator.config().aspect_ratio.label()
        );
        for (row, progress) in lock_rows(&self.rows).iter().enumerate() {
            println!("{:>3}. {}  [{}]", row + 1, progress.prompt, progress.status_label());
        }
    }
}

pub(crate) fn run_console(config: &WhiskConfig, prompts: Option<&Path>, dryrun: bool) -> Result<()> {
    let index = prepare_folders(config)?;
    for line in folder_status_lines(&index) {
        println!("{line}");
    }
    let service = build_service(config, dryrun)?;
    let service_name = service.name().to_string();
    let mut session = Session::new(service, index);
    prepare_style(&mut session);

    let mut console = Console {
        config: config.clone(),
        service_name,
        orchestrator: TaskOrchestrator::new(session, config.orchestrator_config()),
        rows: Arc::new(Mutex::new(Vec::new())),
        printer: None,
    };
    if let Some(path) = prompts {
        console.import(&path.to_string_lossy())?;
    }
    println!("Type a prompt to add a row, or /help for commands.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_command(&line) {
            OperatorCommand::Noop => {}
            OperatorCommand::Help => println!("Commands: {}", CONSOLE_HELP_COMMANDS.join(", ")),
            OperatorCommand::Start => console.start()?,
            OperatorCommand::Pause => {
                if !console.orchestrator.handle().pause() {
                    println!("Not running.");
                }
            }
            OperatorCommand::Resume => {
                if !console.orchestrator.handle().resume() {
                    println!("Not paused.");
                }
            }
            OperatorCommand::Stop => console.stop()?,
            OperatorCommand::Status => console.print_status(),
            OperatorCommand::Rescan => console.rescan(),
            OperatorCommand::Retry { row } => console.retry(row),
            OperatorCommand::Import { path } => {
                if let Err(err) = console.import(&path) {
                    println!("Import failed: {err:#}");
                }
            }
            OperatorCommand::Count { count } => {
                console.config.image_count = count;
                println!("Images per row: {count} (rows added from now on)");
            }
            OperatorCommand::Ratio { ratio } => {
                console.orchestrator.config_mut().aspect_ratio = ratio;
                console.config.aspect_ratio = ratio;
                if console.is_active() {
                    println!("Aspect ratio: {} (applies at the next /start)", ratio.label());
                } else {
                    println!("Aspect ratio: {}", ratio.label());
                }
            }
            OperatorCommand::AddPrompt { prompt } => console.add_prompt(prompt),
            OperatorCommand::Invalid { message, .. } => println!("{message}"),
            OperatorCommand::Quit => break,
        }
    }

    if console.is_active() {
        console.stop()?;
    }
    console.join_printer();
    Ok(())
}
