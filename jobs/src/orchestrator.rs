//! Job Orchestrator: drives one run from raw parameters to its `end` event.
//!
//! A run moves through `building → running → (capturing-result)? → done`.
//! Anything that fails before the first child process starts ends the run
//! without spawning; everything after that is reported as events and the
//! run still terminates with exactly one `end`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::apply::{ApplyError, ApplyOutcome, apply_parameters};
use crate::channel::{EventSink, event_channel};
use crate::core::classifier::{LineTag, ResultCapture, classify};
use crate::core::command::{Argv, display_argv};
use crate::core::event::{Event, RunStatus};
use crate::core::progress::ProgressTracker;
use crate::core::types::{JobClass, JobRequest, RunParams};
use crate::errors::ValidationError;
use crate::exit_codes;
use crate::io::config::JobsConfig;
use crate::io::git::Git;
use crate::io::pairs::read_pair_whitelist;
use crate::io::process::{CommandSpec, ProcessHandle, ProcessLauncher, UNKNOWN_EXIT};
use crate::io::recorder::{LogPolicy, RunRecorder};
use crate::io::strategy_files::list_parameter_files;
use crate::io::workdirs::{is_listed, normalize, read_workdirs};
use crate::registry::RunRegistry;

/// How long a cancelled child may keep producing output before it is abandoned.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// What the caller learns once a run has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Unset when the request was rejected before a run id was assigned.
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub exit_code: i32,
    pub log_path: Option<PathBuf>,
}

/// Shared entry point for every run. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Orchestrator<L> {
    config: Arc<JobsConfig>,
    launcher: L,
    registry: RunRegistry,
    cancel_grace: Duration,
}

impl<L: ProcessLauncher> Orchestrator<L> {
    pub fn new(config: Arc<JobsConfig>, launcher: L, registry: RunRegistry) -> Self {
        Self {
            config,
            launcher,
            registry,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run in a background task and hand back the event stream.
    ///
    /// Dropping the receiver does not stop the run.
    pub fn start(self: &Arc<Self>, params: RunParams) -> mpsc::UnboundedReceiver<Event>
    where
        L: 'static,
    {
        let (sink, rx) = event_channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(params, sink).await;
        });
        rx
    }

    /// Execute one run to completion, pushing its events into `sink`.
    #[instrument(skip_all, fields(class = %params.class))]
    pub async fn run(&self, params: RunParams, mut sink: EventSink) -> RunSummary {
        let now = Local::now().naive_local();

        let plan = match self.plan(&params, now) {
            Ok(plan) => plan,
            Err(e) => return reject(&mut sink, None, &format!("{e:#}")),
        };
        let class = plan.request.class;
        let run_id = format!("{}_{}", class.slug(), now.format("%Y%m%d_%H%M%S_%3f"));

        let lease = match self.registry.try_acquire(class, &run_id) {
            Ok(lease) => lease,
            Err(conflict) => return reject(&mut sink, Some(run_id), &conflict.to_string()),
        };

        let header = format!("CMD> {}", plan.command_text);
        let recorder = match RunRecorder::create(
            &self.config.log_dir(),
            &run_id,
            &header,
            LogPolicy::for_class(class),
        ) {
            Ok(recorder) => recorder,
            Err(e) => {
                drop(lease);
                return reject(&mut sink, Some(run_id), &format!("{e:#}"));
            }
        };

        info!(%run_id, log = %recorder.path().display(), "run started");
        let log_name = recorder.name();
        let log_path = recorder.path().to_path_buf();
        let total_steps = plan.total_steps();
        sink.send(Event::Meta {
            run_id: run_id.clone(),
            log_name: log_name.clone(),
            log_path: log_path.display().to_string(),
            command: plan.command_text.clone(),
            cwd: self.config.project_dir.display().to_string(),
            total_steps,
        });
        sink.send(Event::line(header));

        let mut run = Run {
            class,
            cwd: &self.config.project_dir,
            launcher: &self.launcher,
            sink,
            recorder,
            cancel: lease.cancel_token(),
            forward_lines: self.config.stream.forward_lines,
            cancel_grace: self.cancel_grace,
            phase: Phase::Building,
        };
        let finish = run.execute(plan, now).await;
        run.enter(Phase::Done);
        if finish.status == RunStatus::Cancelled {
            run.recorder.note(LineTag::Warning, "run cancelled");
        }

        drop(lease);
        info!(%run_id, status = ?finish.status, exit_code = finish.exit_code, "run finished");
        run.sink.send(Event::End {
            status: finish.status,
            exit_code: finish.exit_code,
            log_name: Some(log_name),
            log_path: Some(log_path.display().to_string()),
            total_steps,
        });

        RunSummary {
            run_id: Some(run_id),
            status: finish.status,
            exit_code: finish.exit_code,
            log_path: Some(log_path),
        }
    }

    /// Validate the request against the project and decide the work.
    fn plan(&self, params: &RunParams, now: NaiveDateTime) -> Result<Plan> {
        let cfg = &self.config;
        let request = JobRequest::from_params(params, &cfg.request_defaults(now.date()))?;
        let builder = cfg.command_builder();

        let plan = match request.class {
            JobClass::DataFetch => {
                let pairs = read_pair_whitelist(&cfg.exchange_config());
                let resolutions = builder.resolutions(&request);
                let tracker = ProgressTracker::for_fetch(pairs.len(), resolutions.len());
                debug!(
                    pairs = pairs.len(),
                    resolutions = resolutions.len(),
                    total = tracker.total(),
                    "data-fetch planned"
                );
                let steps = resolutions.into_iter().zip(builder.build(&request)).collect();
                Plan {
                    command_text: format!(
                        "{} -m freqtrade download-data (multi-resolution)",
                        builder.python
                    ),
                    work: Work::Fetch { steps, tracker },
                    request,
                }
            }
            JobClass::Backtest | JobClass::BacktestFixedWindow | JobClass::ParameterSearch => {
                let argv = builder
                    .build(&request)
                    .into_iter()
                    .next()
                    .context("no command built for request")?;
                let mut command_text = display_argv(&argv);
                if request.class != JobClass::ParameterSearch
                    && let Some(file) = &request.backtest_params
                {
                    let known = list_parameter_files(&cfg.strategies_dir())?;
                    if !known.iter().any(|name| name == file) {
                        return Err(ValidationError::UnknownParameterFile(file.clone()).into());
                    }
                    command_text.push_str(&format!(" [params: {file}]"));
                }
                Plan {
                    command_text,
                    work: Work::Single { argv },
                    request,
                }
            }
            JobClass::ApplyParameters => Plan {
                command_text: format!(
                    "APPLY {} <= {}",
                    request.default_params_file(),
                    request.apply_params.as_deref().unwrap_or("(none)")
                ),
                work: Work::Apply {
                    dir: cfg.strategies_dir(),
                },
                request,
            },
            JobClass::Publish => {
                let workdir = match &request.workdir {
                    Some(dir) => {
                        let listed = read_workdirs(&cfg.workdirs_file(), &cfg.project_dir)?;
                        if !is_listed(&listed, dir, &cfg.project_dir) {
                            let dir = dir.display().to_string();
                            return Err(ValidationError::UnlistedWorkdir(dir).into());
                        }
                        Some(normalize(&cfg.resolve(dir)))
                    }
                    None => None,
                };
                let command_text = match &workdir {
                    Some(dir) => format!("git publish in {}", dir.display()),
                    None => "git publish (no working directory)".to_string(),
                };
                let steps = workdir
                    .as_ref()
                    .map(|dir| Git::new(dir).publish_steps(&cfg.publish.commit_prefix, now))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|step| (step.name, step.argv))
                    .collect();
                Plan {
                    command_text,
                    work: Work::Publish {
                        steps,
                        abort_on_failure: cfg.publish.abort_on_step_failure,
                    },
                    request,
                }
            }
        };
        Ok(plan)
    }
}

/// Emit the two events of a run that never started.
fn reject(sink: &mut EventSink, run_id: Option<String>, message: &str) -> RunSummary {
    warn!(reason = message, "run rejected");
    sink.send(Event::error(message));
    sink.send(Event::End {
        status: RunStatus::Failure,
        exit_code: exit_codes::FAILURE,
        log_name: None,
        log_path: None,
        total_steps: None,
    });
    RunSummary {
        run_id,
        status: RunStatus::Failure,
        exit_code: exit_codes::FAILURE,
        log_path: None,
    }
}

struct Plan {
    request: JobRequest,
    command_text: String,
    work: Work,
}

impl Plan {
    fn total_steps(&self) -> Option<u64> {
        match &self.work {
            Work::Fetch { tracker, .. } => Some(tracker.total()),
            _ => None,
        }
    }
}

enum Work {
    /// One process per resolution, in order.
    Fetch {
        steps: Vec<(String, Argv)>,
        tracker: ProgressTracker,
    },
    Single {
        argv: Argv,
    },
    Apply {
        dir: PathBuf,
    },
    Publish {
        steps: Vec<(&'static str, Argv)>,
        abort_on_failure: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    Running,
    CapturingResult,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Finish {
    status: RunStatus,
    exit_code: i32,
}

impl Finish {
    fn from_code(code: i32) -> Self {
        let status = if code == exit_codes::OK {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };
        Self {
            status,
            exit_code: code,
        }
    }

    fn success() -> Self {
        Self::from_code(exit_codes::OK)
    }

    fn failure() -> Self {
        Self::from_code(exit_codes::FAILURE)
    }

    fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            exit_code: exit_codes::CANCELLED,
        }
    }
}

/// How one child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Exited(i32),
    SpawnFailed,
    Cancelled,
}

/// Mutable state private to one run.
struct Run<'a, L> {
    class: JobClass,
    cwd: &'a Path,
    launcher: &'a L,
    sink: EventSink,
    recorder: RunRecorder,
    cancel: CancellationToken,
    forward_lines: bool,
    cancel_grace: Duration,
    phase: Phase,
}

impl<L: ProcessLauncher> Run<'_, L> {
    async fn execute(&mut self, plan: Plan, now: NaiveDateTime) -> Finish {
        match plan.work {
            Work::Fetch { steps, tracker } => self.fetch(steps, tracker).await,
            Work::Single { argv } => self.single(argv).await,
            Work::Apply { dir } => self.apply(&dir, &plan.request, now),
            Work::Publish {
                steps,
                abort_on_failure,
            } => self.publish(steps, abort_on_failure).await,
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "run phase");
            self.phase = phase;
        }
    }

    async fn fetch(
        &mut self,
        steps: Vec<(String, Argv)>,
        mut tracker: ProgressTracker,
    ) -> Finish {
        if tracker.is_empty() {
            self.warn("no pairs or resolutions: nothing to fetch");
            return Finish::success();
        }
        for (resolution, argv) in steps {
            match self.drive(argv, Some(&mut tracker), None).await {
                StepOutcome::Exited(0) => {}
                StepOutcome::Exited(code) => {
                    self.warn(&format!(
                        "fetch of {resolution} exited with code {code}, continuing"
                    ));
                }
                StepOutcome::SpawnFailed => return Finish::failure(),
                StepOutcome::Cancelled => return Finish::cancelled(),
            }
        }
        Finish::success()
    }

    async fn single(&mut self, argv: Argv) -> Finish {
        let mut capture = ResultCapture::new(self.class);
        match self.drive(argv, None, Some(&mut capture)).await {
            StepOutcome::Exited(code) => {
                if let Some(block) = capture.finish() {
                    self.sink.send(Event::Result { text: block });
                }
                Finish::from_code(code)
            }
            StepOutcome::SpawnFailed => Finish::failure(),
            StepOutcome::Cancelled => Finish::cancelled(),
        }
    }

    fn apply(&mut self, dir: &Path, request: &JobRequest, now: NaiveDateTime) -> Finish {
        if self.cancel.is_cancelled() {
            return Finish::cancelled();
        }
        self.enter(Phase::Running);
        match apply_parameters(dir, &request.strategy, request.apply_params.as_deref(), now) {
            Ok(ApplyOutcome::Unchanged { target }) => {
                self.warn(&format!(
                    "{} is already the default for {}: nothing applied",
                    file_name(&target),
                    request.strategy
                ));
                Finish::success()
            }
            Ok(ApplyOutcome::Applied {
                source,
                target,
                backup,
            }) => {
                if let Some(backup) = backup {
                    self.narrate(&format!(
                        "{} moved to {}",
                        file_name(&target),
                        file_name(&backup)
                    ));
                }
                self.narrate(&format!(
                    "{} applied as {}",
                    file_name(&source),
                    file_name(&target)
                ));
                Finish::success()
            }
            Err(ApplyError::Filesystem { source, backup }) => {
                self.error(&source.to_string());
                if let Some(backup) = backup {
                    self.warn(&format!("previous default kept at {}", backup.display()));
                }
                Finish::failure()
            }
            Err(e) => {
                self.error(&e.to_string());
                Finish::failure()
            }
        }
    }

    async fn publish(
        &mut self,
        steps: Vec<(&'static str, Argv)>,
        abort_on_failure: bool,
    ) -> Finish {
        if steps.is_empty() {
            self.warn("no working directory selected");
            return Finish::failure();
        }
        let mut failed = false;
        for (name, argv) in steps {
            match self.drive(argv, None, None).await {
                StepOutcome::Exited(0) => {}
                StepOutcome::Exited(code) => {
                    failed = true;
                    if abort_on_failure {
                        self.warn(&format!(
                            "{name} exited with code {code}, skipping remaining steps"
                        ));
                        break;
                    }
                    self.warn(&format!("{name} exited with code {code}"));
                }
                StepOutcome::SpawnFailed => return Finish::failure(),
                StepOutcome::Cancelled => return Finish::cancelled(),
            }
        }
        if failed {
            Finish::failure()
        } else {
            Finish::success()
        }
    }

    /// Run one child process to completion, handling each line as it arrives.
    async fn drive(
        &mut self,
        argv: Argv,
        mut tracker: Option<&mut ProgressTracker>,
        mut capture: Option<&mut ResultCapture>,
    ) -> StepOutcome {
        if self.cancel.is_cancelled() {
            return StepOutcome::Cancelled;
        }
        let spec = CommandSpec::new(argv, self.cwd);
        let mut handle = match self.launcher.launch(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                self.error(&e.to_string());
                return StepOutcome::SpawnFailed;
            }
        };
        self.enter(Phase::Running);

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.drain_cancelled(&mut handle).await;
                    return StepOutcome::Cancelled;
                }
                line = handle.next_line() => match line {
                    Some(line) => {
                        self.handle_line(line, tracker.as_deref_mut(), capture.as_deref_mut());
                    }
                    None => break,
                },
            }
        }

        let code = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.drain_cancelled(&mut handle).await;
                return StepOutcome::Cancelled;
            }
            code = handle.wait() => code,
        };
        debug!(exit_code = code, command = %spec.display(), "step finished");
        StepOutcome::Exited(code)
    }

    fn handle_line(
        &mut self,
        line: String,
        tracker: Option<&mut ProgressTracker>,
        capture: Option<&mut ResultCapture>,
    ) {
        let tag = classify(&line);
        self.recorder.record_line(&line, tag);

        if let Some(tracker) = tracker
            && let Some(progress) = tracker.observe(&line)
        {
            self.sink.send(Event::Progress {
                current: progress.current,
                total: progress.total,
            });
        }
        if let Some(capture) = capture
            && capture.observe(&line)
        {
            self.enter(Phase::CapturingResult);
        }

        match tag {
            LineTag::Warning => self.sink.send(Event::warning(line)),
            LineTag::Error => self.sink.send(Event::error(line)),
            LineTag::Normal if self.forward_lines => self.sink.send(Event::line(line)),
            LineTag::Normal => {}
        }
    }

    /// Kill the child and record whatever it still prints, without events.
    async fn drain_cancelled(&mut self, handle: &mut ProcessHandle) {
        handle.kill();
        let recorder = &mut self.recorder;
        let drained = tokio::time::timeout(self.cancel_grace, async {
            while let Some(line) = handle.next_line().await {
                let tag = classify(&line);
                recorder.record_line(&line, tag);
            }
            handle.wait().await
        })
        .await;
        match drained {
            Ok(code) => debug!(exit_code = code, "cancelled child exited"),
            Err(_) => warn!(
                grace_ms = self.cancel_grace.as_millis() as u64,
                exit_code = UNKNOWN_EXIT,
                "cancelled child still running after grace period"
            ),
        }
    }

    fn narrate(&mut self, message: &str) {
        self.recorder.note(LineTag::Normal, message);
        self.sink.send(Event::line(message));
    }

    fn warn(&mut self, message: &str) {
        self.recorder.note(LineTag::Warning, message);
        self.sink.send(Event::warning(message));
    }

    fn error(&mut self, message: &str) {
        self.recorder.note(LineTag::Error, message);
        self.sink.send(Event::error(message));
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_maps_codes_to_status() {
        assert_eq!(Finish::from_code(0).status, RunStatus::Success);
        assert_eq!(Finish::from_code(2).status, RunStatus::Failure);
        assert_eq!(Finish::from_code(2).exit_code, 2);
        assert_eq!(Finish::cancelled().exit_code, 130);
    }
}
