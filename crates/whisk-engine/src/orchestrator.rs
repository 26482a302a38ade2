use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context};
use rand::Rng;
use whisk_contracts::events::{EventWriter, TaskEvent};
use whisk_contracts::runs::summary::{now_utc_iso, RunSummary, RunTally};
use whisk_contracts::settings::{AspectRatio, ImageModelSettings};

use crate::error::EngineError;
use crate::output::persist_image;
use crate::service::GenerateRequest;
use crate::session::Session;

pub const MAX_SEED: u32 = 2_147_483_647;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl RunState {
    fn is_halting(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run state shared between the operator surface and the worker. Every wait
/// the worker makes goes through this condvar so stop wakes it at once.
#[derive(Debug)]
pub struct RunControl {
    state: Mutex<RunState>,
    changed: Condvar,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            changed: Condvar::new(),
        }
    }
}

impl RunControl {
    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    fn transition(&self, from: &[RunState], to: RunState) -> bool {
        let mut state = lock(&self.state);
        if !from.contains(&state) {
            return false;
        }
        *state = to;
        self.changed.notify_all();
        true
    }

    pub fn pause(&self) -> bool {
        self.transition(&[RunState::Running], RunState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(&[RunState::Paused], RunState::Running)
    }

    pub fn request_stop(&self) -> bool {
        self.transition(&[RunState::Running, RunState::Paused], RunState::Stopping)
    }

    fn begin(&self) -> bool {
        self.transition(&[RunState::Idle, RunState::Stopped], RunState::Running)
    }

    fn mark_stopped(&self) {
        let mut state = lock(&self.state);
        *state = RunState::Stopped;
        self.changed.notify_all();
    }

    /// Blocks while paused. Returns `false` once a stop was requested.
    pub fn wait_while_paused(&self) -> bool {
        let state = lock(&self.state);
        let state = self
            .changed
            .wait_while(state, |state| *state == RunState::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        !state.is_halting()
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns `false`
    /// when stopped.
    pub fn sleep_interruptible(&self, duration: Duration) -> bool {
        let state = lock(&self.state);
        if duration.is_zero() {
            return !state.is_halting();
        }
        let (state, _) = self
            .changed
            .wait_timeout_while(state, duration, |state| !state.is_halting())
            .unwrap_or_else(PoisonError::into_inner);
        !state.is_halting()
    }
}

/// One prompt row and the image indices still to generate for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTask {
    pub row: usize,
    pub prompt: String,
    pub image_indices: Vec<usize>,
}

impl PromptTask {
    pub fn new(row: usize, prompt: impl Into<String>, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut image_indices = indices.into_iter().collect::<Vec<usize>>();
        image_indices.sort_unstable();
        image_indices.dedup();
        Self {
            row,
            prompt: prompt.into(),
            image_indices,
        }
    }

    pub fn all_images(row: usize, prompt: impl Into<String>, count: usize) -> Self {
        Self::new(row, prompt, 0..count)
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<PromptTask>>,
    available: Condvar,
}

impl TaskQueue {
    pub fn push(&self, task: PromptTask) -> usize {
        let mut tasks = lock(&self.tasks);
        tasks.push_back(task);
        self.available.notify_one();
        tasks.len()
    }

    fn push_front(&self, task: PromptTask) {
        lock(&self.tasks).push_front(task);
    }

    /// Waits at most `timeout` for a task. A wake-up without work returns
    /// `None` so the caller can re-check the run state.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<PromptTask> {
        let mut tasks = lock(&self.tasks);
        if tasks.is_empty() {
            tasks = self
                .available
                .wait_timeout(tasks, timeout)
                .map(|(tasks, _)| tasks)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    fn wake_all(&self) {
        let _tasks = lock(&self.tasks);
        self.available.notify_all();
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub output_dir: PathBuf,
    pub aspect_ratio: AspectRatio,
    /// Pause after every generation attempt.
    pub request_delay: Duration,
    pub dequeue_timeout: Duration,
    /// Pause after every finished row.
    pub task_cooldown: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    control: RunControl,
    queue: TaskQueue,
    rescan_requested: AtomicBool,
}

/// Cloneable remote control for a [`TaskOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    shared: Arc<Shared>,
}

impl OrchestratorHandle {
    /// Appends a task; returns the queue length.
    pub fn enqueue(&self, task: PromptTask) -> usize {
        tracing::debug!(row = task.row, images = task.image_indices.len(), "task queued");
        self.shared.queue.push(task)
    }

    /// Queues a row again. References are resolved afresh when it runs.
    pub fn retry(&self, task: PromptTask) -> usize {
        tracing::info!(row = task.row, "row queued for retry");
        self.shared.queue.push(task)
    }

    pub fn pause(&self) -> bool {
        self.shared.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.shared.control.resume()
    }

    pub fn request_stop(&self) -> bool {
        let requested = self.shared.control.request_stop();
        self.shared.queue.wake_all();
        requested
    }

    /// The worker rescans the reference folders before its next task.
    pub fn request_rescan(&self) {
        self.shared.rescan_requested.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> RunState {
        self.shared.control.state()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

struct WorkerExit {
    session: Session,
    summary: RunSummary,
}

/// Owns the worker thread. Between runs it keeps the [`Session`], so the
/// upload cache carries over to the next start.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    config: OrchestratorConfig,
    session: Option<Session>,
    worker: Option<JoinHandle<WorkerExit>>,
}

impl TaskOrchestrator {
    pub fn new(session: Session, config: OrchestratorConfig) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            config,
            session: Some(session),
            worker: None,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> RunState {
        self.shared.control.state()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Settings for the next start; ignored by a run already in progress.
    pub fn config_mut(&mut self) -> &mut OrchestratorConfig {
        &mut self.config
    }

    /// The session while no worker holds it.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn start(
        &mut self,
        events: Sender<TaskEvent>,
        writer: Option<EventWriter>,
    ) -> anyhow::Result<String> {
        if matches!(self.state(), RunState::Running | RunState::Paused) {
            bail!("a run is already in progress");
        }
        self.join();
        let Some(session) = self.session.take() else {
            bail!("session was lost when the previous worker failed");
        };
        if !self.shared.control.begin() {
            self.session = Some(session);
            bail!("run could not be started from state {:?}", self.state());
        }

        let run_id = writer
            .as_ref()
            .map(|writer| writer.run_id().to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            session,
            sink: EventSink {
                events,
                writer,
                tally: RunTally::default(),
            },
        };
        let thread_run_id = run_id.clone();
        let spawned = thread::Builder::new()
            .name("whisk-orchestrator".to_string())
            .spawn(move || worker.run(thread_run_id))
            .context("failed to spawn orchestrator worker");
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                tracing::info!(run_id = %run_id, queued = self.shared.queue.len(), "run started");
                Ok(run_id)
            }
            Err(err) => {
                self.shared.control.mark_stopped();
                Err(err)
            }
        }
    }

    /// Requests a stop and waits for the worker. The in-flight call, if any,
    /// finishes and is reported first.
    pub fn stop(&mut self) -> Option<RunSummary> {
        self.handle().request_stop();
        self.join()
    }

    /// Waits for a worker that is already stopping or stopped.
    fn join(&mut self) -> Option<RunSummary> {
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(exit) => {
                self.session = Some(exit.session);
                Some(exit.summary)
            }
            Err(_) => {
                tracing::error!("orchestrator worker panicked");
                self.shared.control.mark_stopped();
                None
            }
        }
    }
}

impl Drop for TaskOrchestrator {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

struct EventSink {
    events: Sender<TaskEvent>,
    writer: Option<EventWriter>,
    tally: RunTally,
}

impl EventSink {
    fn emit(&mut self, event: TaskEvent) {
        self.tally.record(&event);
        if let Some(writer) = self.writer.as_ref() {
            if let Err(err) = writer.emit(&event) {
                tracing::warn!(error = %err, "failed to append event log");
            }
        }
        // The receiver may be gone when the operator surface exited first.
        let _ = self.events.send(event);
    }
}

struct Worker {
    shared: Arc<Shared>,
    config: OrchestratorConfig,
    session: Session,
    sink: EventSink,
}

impl Worker {
    fn run(mut self, run_id: String) -> WorkerExit {
        let started_at = now_utc_iso();
        self.sink.emit(TaskEvent::RunStarted {
            run_id: run_id.clone(),
            queued: self.shared.queue.len(),
        });

        loop {
            if !self.shared.control.wait_while_paused() {
                break;
            }
            let Some(task) = self.shared.queue.pop_timeout(self.config.dequeue_timeout) else {
                continue;
            };
            // A pause or stop may have arrived during the dequeue wait.
            if !self.shared.control.wait_while_paused() {
                self.shared.queue.push_front(task);
                break;
            }
            if self.shared.rescan_requested.swap(false, Ordering::SeqCst) {
                self.session.rescan();
            }
            self.run_task(&task);
            if !self.shared.control.sleep_interruptible(self.config.task_cooldown) {
                break;
            }
        }

        self.shared.control.mark_stopped();
        self.sink.emit(TaskEvent::AllDone);
        tracing::info!(run_id = %run_id, tally = ?self.sink.tally, "run stopped");
        WorkerExit {
            summary: RunSummary {
                run_id,
                started_at,
                finished_at: now_utc_iso(),
                tally: self.sink.tally.clone(),
            },
            session: self.session,
        }
    }

    fn run_task(&mut self, task: &PromptTask) {
        let row = task.row;
        let resolution = match self.session.resolve(&task.prompt) {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::warn!(row, error = %err, "reference preparation failed");
                self.sink.emit(TaskEvent::TaskFailed {
                    row,
                    reason: err.short_reason(),
                    detail: err.detail(),
                });
                self.sink.emit(TaskEvent::TaskCompleted {
                    row,
                    succeeded: 0,
                    failed: 0,
                });
                return;
            }
        };
        let references = resolution.references;
        self.sink.emit(TaskEvent::ReferencesResolved {
            row,
            references: references.clone(),
            dropped_scenes: resolution.dropped_scenes,
        });

        let settings = ImageModelSettings::new(self.config.aspect_ratio).for_references(references.len());
        let total = task.image_indices.len();
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut rng = rand::thread_rng();

        for &image_index in &task.image_indices {
            if !self.shared.control.wait_while_paused() {
                tracing::info!(row, image_index, "stop requested, skipping remaining images");
                break;
            }
            self.sink.emit(TaskEvent::ImageStarted {
                row,
                image_index,
                total,
            });
            let request = GenerateRequest {
                prompt: task.prompt.clone(),
                seed: rng.gen_range(1..=MAX_SEED),
                settings,
                references: references.clone(),
            };
            let outcome = self
                .session
                .service()
                .generate(&request)
                .and_then(|image| {
                    persist_image(&self.config.output_dir, row, &task.prompt, image_index, &image.bytes)
                        .map_err(EngineError::from)
                });
            match outcome {
                Ok(path) => {
                    succeeded += 1;
                    self.sink.emit(TaskEvent::ImageSucceeded {
                        row,
                        image_index,
                        path,
                    });
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(row, image_index, error = %err, "image generation failed");
                    self.sink.emit(TaskEvent::ImageFailed {
                        row,
                        image_index,
                        reason: err.short_reason(),
                        detail: err.detail(),
                    });
                }
            }
            if !self.shared.control.sleep_interruptible(self.config.request_delay) {
                break;
            }
        }

        self.sink.emit(TaskEvent::TaskCompleted {
            row,
            succeeded,
            failed,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use whisk_contracts::events::{EventWriter, TaskEvent};
    use whisk_contracts::folders::{FolderIndex, FolderLayout};
    use whisk_contracts::settings::{AspectRatio, ImageModel};

    use super::{
        OrchestratorConfig, OrchestratorHandle, PromptTask, RunControl, RunState, TaskOrchestrator,
        MAX_SEED,
    };
    use crate::error::{EngineError, GenerationFailure, Result};
    use crate::service::{GenerateRequest, GeneratedImage, ImageService, ImageUpload, UploadedMedia};
    use crate::session::Session;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct StubService {
        requests: Mutex<Vec<GenerateRequest>>,
        uploads: AtomicUsize,
        fail_uploads: bool,
        fail_generate_call: Option<usize>,
        stop_on_call: Option<usize>,
        handle: Mutex<Option<OrchestratorHandle>>,
    }

    impl StubService {
        fn prompts(&self) -> Vec<String> {
            self.requests
                .lock()
                .map(|requests| requests.iter().map(|request| request.prompt.clone()).collect())
                .unwrap_or_default()
        }

        fn requests(&self) -> Vec<GenerateRequest> {
            self.requests
                .lock()
                .map(|requests| requests.clone())
                .unwrap_or_default()
        }
    }

    impl ImageService for StubService {
        fn name(&self) -> &str {
            "stub"
        }

        fn caption(&self, _upload: &ImageUpload<'_>) -> Result<String> {
            Ok("caption".to_string())
        }

        fn upload(&self, upload: &ImageUpload<'_>) -> Result<UploadedMedia> {
            let count = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_uploads {
                return Err(EngineError::Upload("HTTP 403".to_string()));
            }
            Ok(UploadedMedia {
                media_id: format!("{}-{count}", upload.category),
            })
        }

        fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
            let call = {
                let mut requests = self
                    .requests
                    .lock()
                    .map_err(|_| EngineError::Config("stub lock poisoned".to_string()))?;
                requests.push(request.clone());
                requests.len()
            };
            if self.stop_on_call == Some(call) {
                if let Ok(handle) = self.handle.lock() {
                    if let Some(handle) = handle.as_ref() {
                        handle.request_stop();
                    }
                }
            }
            if self.fail_generate_call == Some(call) {
                return Err(GenerationFailure::HttpStatus(500).into());
            }
            Ok(GeneratedImage {
                bytes: b"jpeg".to_vec(),
            })
        }
    }

    fn test_config(output_dir: &Path) -> OrchestratorConfig {
        OrchestratorConfig {
            output_dir: output_dir.to_path_buf(),
            aspect_ratio: AspectRatio::Square,
            request_delay: Duration::ZERO,
            dequeue_timeout: Duration::from_millis(20),
            task_cooldown: Duration::ZERO,
        }
    }

    fn orchestrator(base: &Path, service: Arc<StubService>) -> TaskOrchestrator {
        let index = FolderIndex::scan(&FolderLayout::under(base));
        let session = Session::new(service, index);
        TaskOrchestrator::new(session, test_config(&base.join("out")))
    }

    /// Collects events until `completed` rows have finished.
    fn wait_for_rows(rx: &Receiver<TaskEvent>, completed: usize) -> anyhow::Result<Vec<TaskEvent>> {
        let mut events = Vec::new();
        let mut done = 0usize;
        while done < completed {
            let event = rx.recv_timeout(WAIT)?;
            if matches!(event, TaskEvent::TaskCompleted { .. }) {
                done += 1;
            }
            events.push(event);
        }
        Ok(events)
    }

    fn completed_rows(events: &[TaskEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|event| match event {
                TaskEvent::TaskCompleted { row, .. } => Some(*row),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn prompt_task_sorts_and_dedups_indices() {
        let task = PromptTask::new(3, "x", [2, 0, 2, 1]);
        assert_eq!(task.image_indices, vec![0, 1, 2]);
        assert_eq!(PromptTask::all_images(0, "x", 4).image_indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn run_control_transitions() {
        let control = RunControl::default();
        assert!(!control.pause());
        assert!(control.begin());
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.resume());
        assert!(control.request_stop());
        assert_eq!(control.state(), RunState::Stopping);
        assert!(!control.wait_while_paused());
        assert!(!control.sleep_interruptible(Duration::from_secs(30)));
    }

    #[test]
    fn tasks_run_in_fifo_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(StubService::default());
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();
        for (row, prompt) in ["A", "B", "C"].into_iter().enumerate() {
            handle.enqueue(PromptTask::all_images(row, prompt, 1));
        }

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        let events = wait_for_rows(&rx, 3)?;
        let summary = orchestrator.stop().ok_or_else(|| anyhow::anyhow!("no summary"))?;

        assert_eq!(service.prompts(), vec!["A", "B", "C"]);
        assert_eq!(completed_rows(&events), vec![0, 1, 2]);
        assert_eq!(summary.tally.images_succeeded, 3);
        assert!(summary.tally.all_succeeded());
        assert_eq!(orchestrator.state(), RunState::Stopped);

        let trailing = rx.iter().collect::<Vec<TaskEvent>>();
        assert_eq!(trailing, vec![TaskEvent::AllDone]);
        Ok(())
    }

    #[test]
    fn stop_prevents_further_generation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(StubService {
            stop_on_call: Some(2),
            ..StubService::default()
        });
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();
        if let Ok(mut slot) = service.handle.lock() {
            *slot = Some(handle.clone());
        }
        handle.enqueue(PromptTask::all_images(0, "deniz", 4));
        handle.enqueue(PromptTask::all_images(1, "orman", 4));

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(WAIT)?;
            let done = event == TaskEvent::AllDone;
            events.push(event);
            if done {
                break;
            }
        }
        orchestrator.stop();
        events.extend(rx.iter());

        assert_eq!(service.requests().len(), 2);
        assert_eq!(
            events.iter().filter(|event| **event == TaskEvent::AllDone).count(),
            1
        );
        assert!(events.contains(&TaskEvent::TaskCompleted {
            row: 0,
            succeeded: 2,
            failed: 0,
        }));
        assert_eq!(completed_rows(&events), vec![0]);
        assert_eq!(handle.queued(), 1);
        Ok(())
    }

    #[test]
    fn failed_image_does_not_abort_row() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(StubService {
            fail_generate_call: Some(2),
            ..StubService::default()
        });
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        orchestrator
            .handle()
            .enqueue(PromptTask::all_images(0, "kedi", 3));

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        let events = wait_for_rows(&rx, 1)?;
        let summary = orchestrator.stop().ok_or_else(|| anyhow::anyhow!("no summary"))?;

        assert!(events.contains(&TaskEvent::ImageFailed {
            row: 0,
            image_index: 1,
            reason: "HTTP 500".to_string(),
            detail: "HTTP 500".to_string(),
        }));
        assert!(events.contains(&TaskEvent::TaskCompleted {
            row: 0,
            succeeded: 2,
            failed: 1,
        }));
        let saved = events
            .iter()
            .filter_map(|event| match event {
                TaskEvent::ImageSucceeded { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|path| path.is_file()));
        assert_eq!(summary.tally.images_failed, 1);
        assert!(!summary.tally.all_succeeded());
        Ok(())
    }

    #[test]
    fn upload_failure_fails_whole_row() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::create_dir_all(temp.path().join("KARAKTER"))?;
        std::fs::write(temp.path().join("KARAKTER").join("Ahmet.jpg"), b"a")?;
        let service = Arc::new(StubService {
            fail_uploads: true,
            ..StubService::default()
        });
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();
        handle.enqueue(PromptTask::all_images(0, "Ahmet yürüyor", 2));
        handle.enqueue(PromptTask::all_images(1, "boş sokak", 1));

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        let events = wait_for_rows(&rx, 2)?;
        orchestrator.stop();

        assert!(events.contains(&TaskEvent::TaskFailed {
            row: 0,
            reason: "Upload failed: HTTP 403".to_string(),
            detail: "Upload failed: HTTP 403".to_string(),
        }));
        assert_eq!(service.prompts(), vec!["boş sokak"]);
        assert_eq!(completed_rows(&events), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn retry_picks_up_new_reference_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(StubService::default());
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();
        handle.enqueue(PromptTask::all_images(0, "Ayşe bahçede", 1));

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        wait_for_rows(&rx, 1)?;

        std::fs::create_dir_all(temp.path().join("KARAKTER"))?;
        std::fs::write(temp.path().join("KARAKTER").join("Ayşe.png"), b"a")?;
        handle.request_rescan();
        handle.retry(PromptTask::all_images(0, "Ayşe bahçede", 1));
        let events = wait_for_rows(&rx, 1)?;
        orchestrator.stop();

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].references.is_empty());
        assert_eq!(requests[0].settings.image_model, ImageModel::R2i);
        assert_eq!(requests[1].references.len(), 1);
        assert_eq!(requests[1].references[0].caption, "ayse");
        assert_eq!(requests[1].settings.image_model, ImageModel::GemPix);
        assert!(requests
            .iter()
            .all(|request| (1..=MAX_SEED).contains(&request.seed)));
        assert!(events
            .iter()
            .any(|event| matches!(event, TaskEvent::ReferencesResolved { references, .. } if references.len() == 1)));
        Ok(())
    }

    #[test]
    fn pause_holds_images_until_resume() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(StubService::default());
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        assert!(handle.pause());
        handle.enqueue(PromptTask::all_images(0, "gece", 1));
        std::thread::sleep(Duration::from_millis(100));
        let early = rx.try_iter().collect::<Vec<TaskEvent>>();
        assert!(!early
            .iter()
            .any(|event| matches!(event, TaskEvent::ImageStarted { .. })));
        assert!(service.requests().is_empty());

        assert!(handle.resume());
        wait_for_rows(&rx, 1)?;
        orchestrator.stop();
        assert_eq!(service.prompts(), vec!["gece"]);
        Ok(())
    }

    #[test]
    fn stop_while_paused_keeps_row_queued() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::create_dir_all(temp.path().join("KARAKTER"))?;
        std::fs::write(temp.path().join("KARAKTER").join("Ahmet.jpg"), b"a")?;
        let service = Arc::new(StubService::default());
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();

        let (tx, rx) = mpsc::channel();
        orchestrator.start(tx, None)?;
        assert!(handle.pause());
        handle.enqueue(PromptTask::all_images(0, "Ahmet koşuyor", 2));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(service.uploads.load(Ordering::SeqCst), 0);
        assert!(service.requests().is_empty());

        orchestrator.stop();
        let events = rx.iter().collect::<Vec<TaskEvent>>();
        assert_eq!(service.uploads.load(Ordering::SeqCst), 0);
        assert!(service.requests().is_empty());
        assert!(completed_rows(&events).is_empty());
        assert_eq!(
            events.iter().filter(|event| **event == TaskEvent::AllDone).count(),
            1
        );
        assert_eq!(handle.queued(), 1);
        Ok(())
    }

    #[test]
    fn events_are_logged_and_session_survives_restart() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::create_dir_all(temp.path().join("MEKAN"))?;
        std::fs::write(temp.path().join("MEKAN").join("Park.jpg"), b"p")?;
        let service = Arc::new(StubService::default());
        let mut orchestrator = orchestrator(temp.path(), Arc::clone(&service));
        let handle = orchestrator.handle();
        let events_path = temp.path().join("out").join("events.jsonl");

        for round in 0..2 {
            handle.enqueue(PromptTask::all_images(round, "parkta", 1));
            let (tx, rx) = mpsc::channel();
            orchestrator.start(tx, Some(EventWriter::new(&events_path, format!("run-{round}"))))?;
            wait_for_rows(&rx, 1)?;
            orchestrator.stop();
        }

        assert_eq!(service.uploads.load(Ordering::SeqCst), 1);
        let raw = std::fs::read_to_string(&events_path)?;
        let types = raw
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line))
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|value| value["type"].as_str().map(str::to_string))
            .collect::<Vec<String>>();
        assert_eq!(types.iter().filter(|kind| *kind == "run_started").count(), 2);
        assert_eq!(types.iter().filter(|kind| *kind == "all_done").count(), 2);
        Ok(())
    }
}
