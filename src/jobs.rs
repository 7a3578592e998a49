use crate::command::build_download_args;
use crate::config::DownloadConfig;
use crate::events::{DownloadEvents, JobEvent, ProgressEvent, ProgressUpdate};
use crate::logging;
use crate::paths::AppPaths;
use crate::scrape::{LineScraper, ScrapePatterns};
use crate::{cmd, tools, EngineError, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const EVENT_QUEUE_CAPACITY: usize = 256;
const EVENT_POLL_TIMEOUT_MS: u64 = 1000;
const SLOT_WAIT_MS: u64 = 50;
// Staggers process start; provides no ordering guarantee.
const JOB_LAUNCH_STAGGER_MS: u64 = 500;
const MAX_ERROR_DISPLAY_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One user-requested download: a target URL plus the configuration
/// snapshot taken at enqueue time.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub config: DownloadConfig,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
}

/// Tracks every job the dispatcher knows about. Owned by the consumer loop;
/// all mutation happens on that one thread, so no lock is needed.
#[derive(Debug, Default)]
pub struct JobRegistry {
    records: HashMap<String, JobRecord>,
}

impl JobRegistry {
    fn insert(&mut self, job: Job) {
        self.records.insert(
            job.id.clone(),
            JobRecord {
                job,
                status: JobStatus::Queued,
            },
        );
    }

    fn mark_running(&mut self, job_id: &str) {
        if let Some(record) = self.records.get_mut(job_id) {
            if record.status == JobStatus::Queued {
                record.status = JobStatus::Running;
            }
        }
    }

    fn mark_terminal(&mut self, job_id: &str, status: JobStatus) {
        if let Some(record) = self.records.get_mut(job_id) {
            // Terminal states are final; no re-entry.
            if !record.status.is_terminal() {
                record.status = status;
            }
        }
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.records.get(job_id).map(|r| r.status)
    }

    pub fn records(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }
}

pub struct JobOutcome {
    pub title: String,
}

pub struct JobFailure {
    pub title: String,
    pub message: String,
}

enum QueueMessage {
    Started { job_id: String },
    Event(JobEvent),
}

/// Producer side handed to a running job. Only non-terminal events can be
/// pushed here; the worker wrapper emits the single terminal event after
/// the runner returns.
pub struct JobEventSink {
    job_id: String,
    tx: SyncSender<QueueMessage>,
}

impl JobEventSink {
    pub fn status(&self, message: &str) {
        self.send(ProgressEvent::Status {
            message: message.to_string(),
        });
    }

    pub fn log(&self, line: &str) {
        self.send(ProgressEvent::Log {
            message: line.to_string(),
        });
    }

    pub fn progress(&self, update: ProgressUpdate) {
        self.send(ProgressEvent::Progress(update));
    }

    fn send(&self, payload: ProgressEvent) {
        // A send failure means the consumer is gone; nothing to report to.
        let _ = self.tx.send(QueueMessage::Event(JobEvent {
            job_id: self.job_id.clone(),
            payload,
        }));
    }
}

/// The seam between dispatch and the external tool. Production uses
/// [`YtDlpRunner`]; tests substitute stubs.
pub trait JobRunner: Send + Sync + 'static {
    fn run(
        &self,
        paths: &AppPaths,
        job: &Job,
        sink: &JobEventSink,
    ) -> std::result::Result<JobOutcome, JobFailure>;
}

/// Spawns yt-dlp for one job and scrapes its stdout line by line.
pub struct YtDlpRunner {
    patterns: ScrapePatterns,
    ffmpeg_available: bool,
}

impl YtDlpRunner {
    pub fn new(patterns: ScrapePatterns, ffmpeg_available: bool) -> Self {
        Self {
            patterns,
            ffmpeg_available,
        }
    }
}

impl JobRunner for YtDlpRunner {
    fn run(
        &self,
        paths: &AppPaths,
        job: &Job,
        sink: &JobEventSink,
    ) -> std::result::Result<JobOutcome, JobFailure> {
        sink.status(&format!("Starting download for: {}", job.url));

        let mut args = build_download_args(&job.config, &paths.archive_path(), self.ffmpeg_available);
        args.push(job.url.clone());
        logging::log_info(paths, &format!("executing yt-dlp {}", args.join(" ")));

        let mut scraper = LineScraper::new(self.patterns.clone());

        let mut child = cmd::command("yt-dlp")
            .args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| JobFailure {
                title: scraper.best_title(),
                message: match e.kind() {
                    std::io::ErrorKind::NotFound => "yt-dlp is not installed".to_string(),
                    _ => format!("failed to start yt-dlp: {e}"),
                },
            })?;

        // Drain stderr on its own thread so a chatty tool can't deadlock
        // the stdout pipe.
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                sink.log(trimmed);
                if let Some(update) = scraper.observe(trimmed) {
                    sink.progress(update);
                }
            }
        }

        let status = child.wait().map_err(|e| JobFailure {
            title: scraper.best_title(),
            message: format!("failed to wait for yt-dlp: {e}"),
        })?;

        let stderr_text = stderr_handle
            .and_then(|h| h.join().ok())
            .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
            .unwrap_or_default();

        if status.success() {
            logging::log_info(paths, &format!("download completed: {}", job.url));
            Ok(JobOutcome {
                title: scraper.best_title(),
            })
        } else {
            logging::log_error(
                paths,
                &format!("yt-dlp failed for {} (code={:?})", job.url, status.code()),
            );
            Err(JobFailure {
                title: scraper.best_title(),
                message: truncate_for_display(&stderr_text, MAX_ERROR_DISPLAY_CHARS),
            })
        }
    }
}

#[derive(Debug)]
pub struct DispatcherHandle {
    pub job_ids: Vec<String>,
    scheduler: thread::JoinHandle<()>,
    consumer: thread::JoinHandle<JobRegistry>,
}

impl DispatcherHandle {
    /// Blocks until every job reached a terminal state and the event queue
    /// drained, then hands back the final registry.
    pub fn join(self) -> JobRegistry {
        let _ = self.scheduler.join();
        match self.consumer.join() {
            Ok(registry) => registry,
            // A panicking handler must not look like "no jobs ran".
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Enqueues one download job per URL and runs them through yt-dlp under the
/// configured concurrency cap.
pub fn start_downloads(
    paths: &AppPaths,
    config: &DownloadConfig,
    urls: Vec<String>,
    handler: Box<dyn DownloadEvents>,
) -> Result<DispatcherHandle> {
    if !tools::ytdlp_status(paths).available {
        return Err(EngineError::ExternalToolMissing {
            tool: "yt-dlp".to_string(),
        });
    }
    let ffmpeg_available = tools::ffmpeg_status(paths).available;
    let runner = Arc::new(YtDlpRunner::new(ScrapePatterns::default(), ffmpeg_available));
    start_downloads_with_runner(paths, config, urls, handler, runner)
}

/// Same as [`start_downloads`] but with an injected runner; no tool probing
/// happens here.
pub fn start_downloads_with_runner(
    paths: &AppPaths,
    config: &DownloadConfig,
    urls: Vec<String>,
    handler: Box<dyn DownloadEvents>,
    runner: Arc<dyn JobRunner>,
) -> Result<DispatcherHandle> {
    start_downloads_inner(
        paths,
        config,
        urls,
        handler,
        runner,
        Duration::from_millis(JOB_LAUNCH_STAGGER_MS),
    )
}

fn start_downloads_inner(
    paths: &AppPaths,
    config: &DownloadConfig,
    urls: Vec<String>,
    handler: Box<dyn DownloadEvents>,
    runner: Arc<dyn JobRunner>,
    launch_stagger: Duration,
) -> Result<DispatcherHandle> {
    config.validate()?;
    if urls.is_empty() {
        return Err(EngineError::InvalidConfig(
            "no URLs to download".to_string(),
        ));
    }

    let jobs: Vec<Job> = urls
        .into_iter()
        .map(|url| Job {
            id: Uuid::new_v4().to_string(),
            url,
            config: config.clone(),
        })
        .collect();
    let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();

    logging::log_info(
        paths,
        &format!(
            "starting downloads: jobs={}, max_concurrent={}",
            jobs.len(),
            config.max_concurrent_jobs
        ),
    );

    let mut registry = JobRegistry::default();
    for job in &jobs {
        registry.insert(job.clone());
    }

    let (tx, rx) = sync_channel::<QueueMessage>(EVENT_QUEUE_CAPACITY);

    let max_concurrent = config.max_concurrent_jobs;
    let scheduler_paths = paths.clone();
    let scheduler = thread::spawn(move || {
        scheduler_loop(
            scheduler_paths,
            jobs,
            runner,
            tx,
            max_concurrent,
            launch_stagger,
        );
    });

    let consumer_paths = paths.clone();
    let consumer = thread::spawn(move || consumer_loop(consumer_paths, registry, rx, handler));

    Ok(DispatcherHandle {
        job_ids,
        scheduler,
        consumer,
    })
}

fn scheduler_loop(
    paths: AppPaths,
    jobs: Vec<Job>,
    runner: Arc<dyn JobRunner>,
    tx: SyncSender<QueueMessage>,
    max_concurrent: usize,
    launch_stagger: Duration,
) {
    let running = Arc::new(AtomicUsize::new(0));
    let mut queue: VecDeque<Job> = jobs.into();

    while let Some(job) = queue.pop_front() {
        while running.load(Ordering::SeqCst) >= max_concurrent {
            thread::sleep(Duration::from_millis(SLOT_WAIT_MS));
        }

        running.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(QueueMessage::Started {
            job_id: job.id.clone(),
        });

        let worker_paths = paths.clone();
        let worker_runner = runner.clone();
        let worker_tx = tx.clone();
        let worker_running = running.clone();
        thread::spawn(move || {
            let sink = JobEventSink {
                job_id: job.id.clone(),
                tx: worker_tx.clone(),
            };
            // Exactly one terminal event per job, derived from the runner's
            // return value rather than anything the process printed.
            let payload = match worker_runner.run(&worker_paths, &job, &sink) {
                Ok(outcome) => ProgressEvent::Complete {
                    title: outcome.title,
                },
                Err(failure) => ProgressEvent::Error {
                    title: failure.title,
                    message: failure.message,
                },
            };
            let _ = worker_tx.send(QueueMessage::Event(JobEvent {
                job_id: job.id,
                payload,
            }));
            worker_running.fetch_sub(1, Ordering::SeqCst);
        });

        thread::sleep(launch_stagger);
    }
    // Dropping the scheduler's sender lets the consumer observe disconnect
    // once the last worker clone is gone.
}

fn consumer_loop(
    paths: AppPaths,
    mut registry: JobRegistry,
    rx: Receiver<QueueMessage>,
    mut handler: Box<dyn DownloadEvents>,
) -> JobRegistry {
    loop {
        match rx.recv_timeout(Duration::from_millis(EVENT_POLL_TIMEOUT_MS)) {
            Ok(message) => {
                dispatch_message(&paths, &mut registry, handler.as_mut(), message)
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    registry
}

fn dispatch_message(
    paths: &AppPaths,
    registry: &mut JobRegistry,
    handler: &mut dyn DownloadEvents,
    message: QueueMessage,
) {
    match message {
        QueueMessage::Started { job_id } => {
            registry.mark_running(&job_id);
        }
        QueueMessage::Event(JobEvent { job_id, payload }) => match payload {
            ProgressEvent::Status { message } => handler.on_status(&job_id, &message),
            ProgressEvent::Log { message } => handler.on_log(&job_id, &message),
            ProgressEvent::Progress(update) => handler.on_progress(&job_id, &update),
            ProgressEvent::Complete { title } => {
                registry.mark_terminal(&job_id, JobStatus::Completed);
                handler.on_complete(&job_id, &title);
            }
            ProgressEvent::Error { title, message } => {
                registry.mark_terminal(&job_id, JobStatus::Failed);
                logging::log_error(paths, &format!("job {job_id} failed: {message}"));
                handler.on_error(&job_id, &title, &message);
            }
        },
    }
}

fn truncate_for_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_config(dir: &std::path::Path, max_concurrent_jobs: usize) -> DownloadConfig {
        DownloadConfig {
            output_dir: Some(dir.to_path_buf()),
            max_concurrent_jobs,
            ..DownloadConfig::default()
        }
    }

    /// Runner that tracks its own peak concurrency and optionally fails
    /// for URLs containing "fail".
    struct StubRunner {
        active: AtomicUsize,
        peak: AtomicUsize,
        work_ms: u64,
    }

    impl StubRunner {
        fn new(work_ms: u64) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                work_ms,
            }
        }

        fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl JobRunner for StubRunner {
        fn run(
            &self,
            _paths: &AppPaths,
            job: &Job,
            sink: &JobEventSink,
        ) -> std::result::Result<JobOutcome, JobFailure> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            sink.status(&format!("Starting download for: {}", job.url));
            for step in 1..=3 {
                sink.progress(ProgressUpdate {
                    percent: step as f64 * 25.0,
                    total_size: "10.00MiB".to_string(),
                    speed: "1.00MiB/s".to_string(),
                    eta: "00:05".to_string(),
                    title: job.url.clone(),
                    ext: "mkv".to_string(),
                });
            }
            thread::sleep(Duration::from_millis(self.work_ms));

            self.active.fetch_sub(1, Ordering::SeqCst);
            if job.url.contains("fail") {
                Err(JobFailure {
                    title: job.url.clone(),
                    message: "simulated nonzero exit".to_string(),
                })
            } else {
                Ok(JobOutcome {
                    title: job.url.clone(),
                })
            }
        }
    }

    #[derive(Default)]
    struct Recorded {
        terminals: HashMap<String, usize>,
        progress_percents: HashMap<String, Vec<f64>>,
        completed_titles: Vec<String>,
        errors: Vec<(String, String)>,
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl DownloadEvents for RecordingHandler {
        fn on_progress(&mut self, job_id: &str, update: &ProgressUpdate) {
            self.recorded
                .lock()
                .unwrap()
                .progress_percents
                .entry(job_id.to_string())
                .or_default()
                .push(update.percent);
        }

        fn on_complete(&mut self, job_id: &str, title: &str) {
            let mut recorded = self.recorded.lock().unwrap();
            *recorded.terminals.entry(job_id.to_string()).or_default() += 1;
            recorded.completed_titles.push(title.to_string());
        }

        fn on_error(&mut self, job_id: &str, _title: &str, message: &str) {
            let mut recorded = self.recorded.lock().unwrap();
            *recorded.terminals.entry(job_id.to_string()).or_default() += 1;
            recorded.errors.push((job_id.to_string(), message.to_string()));
        }
    }

    fn run_dispatch(
        urls: Vec<String>,
        max_concurrent_jobs: usize,
        runner: Arc<StubRunner>,
    ) -> (JobRegistry, Arc<Mutex<Recorded>>, Vec<String>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let config = test_config(dir.path(), max_concurrent_jobs);

        let handler = RecordingHandler::default();
        let recorded = handler.recorded.clone();

        // A short stagger keeps the tests fast while still overlapping jobs.
        let handle = start_downloads_inner(
            &paths,
            &config,
            urls,
            Box::new(handler),
            runner,
            Duration::from_millis(2),
        )
        .expect("start");
        let job_ids = handle.job_ids.clone();
        let registry = handle.join();
        (registry, recorded, job_ids)
    }

    #[test]
    fn concurrency_cap_is_never_exceeded() {
        let runner = Arc::new(StubRunner::new(120));
        let urls: Vec<String> = (0..8).map(|i| format!("https://youtu.be/v{i}")).collect();
        let (registry, _, _) = run_dispatch(urls, 3, runner.clone());

        assert!(
            runner.peak_concurrency() <= 3,
            "peak concurrency {} exceeded cap",
            runner.peak_concurrency()
        );
        assert_eq!(registry.count_with_status(JobStatus::Completed), 8);
    }

    #[test]
    fn cap_of_one_serializes_jobs() {
        let runner = Arc::new(StubRunner::new(40));
        let urls: Vec<String> = (0..4).map(|i| format!("https://youtu.be/v{i}")).collect();
        let (_, _, _) = run_dispatch(urls, 1, runner.clone());
        assert_eq!(runner.peak_concurrency(), 1);
    }

    #[test]
    fn exactly_one_terminal_event_per_job() {
        let runner = Arc::new(StubRunner::new(20));
        let urls = vec![
            "https://youtu.be/ok1".to_string(),
            "https://youtu.be/fail1".to_string(),
            "https://youtu.be/ok2".to_string(),
        ];
        let (_, recorded, job_ids) = run_dispatch(urls, 2, runner);

        let recorded = recorded.lock().unwrap();
        for job_id in &job_ids {
            assert_eq!(
                recorded.terminals.get(job_id).copied(),
                Some(1),
                "job {job_id} must emit exactly one terminal event"
            );
        }
    }

    #[test]
    fn failed_job_is_isolated_and_reported_with_message() {
        let runner = Arc::new(StubRunner::new(20));
        let urls = vec![
            "https://youtu.be/ok1".to_string(),
            "https://youtu.be/fail1".to_string(),
        ];
        let (registry, recorded, _) = run_dispatch(urls, 2, runner);

        assert_eq!(registry.count_with_status(JobStatus::Completed), 1);
        assert_eq!(registry.count_with_status(JobStatus::Failed), 1);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.errors.len(), 1);
        assert_eq!(recorded.errors[0].1, "simulated nonzero exit");
    }

    #[test]
    fn per_job_progress_order_is_preserved() {
        let runner = Arc::new(StubRunner::new(10));
        let urls: Vec<String> = (0..3).map(|i| format!("https://youtu.be/v{i}")).collect();
        let (_, recorded, job_ids) = run_dispatch(urls, 3, runner);

        let recorded = recorded.lock().unwrap();
        for job_id in &job_ids {
            let percents = recorded
                .progress_percents
                .get(job_id)
                .expect("progress seen");
            assert_eq!(percents, &vec![25.0, 50.0, 75.0]);
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let config = DownloadConfig::default(); // no output_dir

        let err = start_downloads_with_runner(
            &paths,
            &config,
            vec!["https://youtu.be/abc".to_string()],
            Box::new(RecordingHandler::default()),
            Arc::new(StubRunner::new(1)),
        )
        .expect_err("must fail");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn empty_url_list_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let config = test_config(dir.path(), 2);

        let err = start_downloads_with_runner(
            &paths,
            &config,
            Vec::new(),
            Box::new(RecordingHandler::default()),
            Arc::new(StubRunner::new(1)),
        )
        .expect_err("must fail");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn completion_carries_the_runner_title() {
        // The stub reports the URL as the title.
        let runner = Arc::new(StubRunner::new(10));
        let urls = vec!["https://youtu.be/ok1".to_string()];
        let (registry, recorded, job_ids) = run_dispatch(urls, 1, runner);

        assert_eq!(registry.status(&job_ids[0]), Some(JobStatus::Completed));
        let recorded = recorded.lock().unwrap();
        assert_eq!(
            recorded.completed_titles,
            vec!["https://youtu.be/ok1".to_string()]
        );
    }

    #[test]
    fn handler_panic_surfaces_through_join() {
        struct PanickingHandler;
        impl DownloadEvents for PanickingHandler {
            fn on_complete(&mut self, _job_id: &str, _title: &str) {
                panic!("handler failure");
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let config = test_config(dir.path(), 1);

        let handle = start_downloads_inner(
            &paths,
            &config,
            vec!["https://youtu.be/abc".to_string()],
            Box::new(PanickingHandler),
            Arc::new(StubRunner::new(1)),
            Duration::from_millis(2),
        )
        .expect("start");

        let joined = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.join()));
        assert!(joined.is_err(), "handler panic must propagate to join");
    }

    #[test]
    fn registry_transitions_end_in_terminal_states_only() {
        let runner = Arc::new(StubRunner::new(10));
        let urls: Vec<String> = (0..5).map(|i| format!("https://youtu.be/v{i}")).collect();
        let (registry, _, job_ids) = run_dispatch(urls, 2, runner);

        for job_id in &job_ids {
            let status = registry.status(job_id).expect("known job");
            assert!(status.is_terminal(), "job {job_id} ended as {status:?}");
        }
    }

    #[test]
    fn truncate_for_display_caps_long_errors() {
        let long = "x".repeat(2 * MAX_ERROR_DISPLAY_CHARS);
        let shown = truncate_for_display(&long, MAX_ERROR_DISPLAY_CHARS);
        assert_eq!(shown.chars().count(), MAX_ERROR_DISPLAY_CHARS + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(truncate_for_display("short", MAX_ERROR_DISPLAY_CHARS), "short");
    }
}
