//! Build session: interprets a [`Builder`] tree.
//!
//! The walk is depth-first and strictly sequential. A failing node fails its
//! enclosing composite, whose remaining children are skipped; cleanup
//! children and `on_cancel` handlers still run, shielded from cancellation.
//! Every `run` starts with an empty [`EnvironmentContext`].

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::builder::{Builder, BuilderKind, Condition, ExecSpec};
use crate::config::SessionConfig;
use crate::console::ConsoleSink;
use crate::env::EnvironmentContext;
use crate::error::BuildError;
use crate::obs;
use crate::result::{BuildReport, JobResult, StepRecord, StepStatus};

/// Prefix of lines the session itself writes to the console.
pub const CONSOLE_PREFIX: &str = "[cdagent]";

/// How long to keep reading a finished command's output before detaching.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Raises cancellation for the session it was taken from.
///
/// Cancellation is sticky: once raised, the current and every later `run` on
/// that session end as [`JobResult::Cancelled`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Executes builder trees against one console.
pub struct BuildSession {
    console: ConsoleSink,
    config: SessionConfig,
    cancel: Arc<watch::Sender<bool>>,
}

impl BuildSession {
    pub fn new(console: ConsoleSink) -> Self {
        Self::with_config(console, SessionConfig::default())
    }

    pub fn with_config(console: ConsoleSink, config: SessionConfig) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            console,
            config,
            cancel: Arc::new(tx),
        }
    }

    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Execute `root` and return its terminal result.
    pub async fn build(&self, root: Builder) -> JobResult {
        self.run(root).await.result
    }

    /// Execute `root` and return the full report.
    pub async fn run(&self, root: Builder) -> BuildReport {
        let session_id = Uuid::new_v4();
        let start = Instant::now();

        // Registered up front so output produced before a secret's own leaf
        // runs is masked too.
        for secret in root.secrets() {
            self.console.add_secret(&secret);
        }

        let mut executor = Executor {
            session_id,
            console: &self.console,
            config: &self.config,
            env: EnvironmentContext::new(),
            cancel: self.cancel.subscribe(),
            shielded: 0,
            steps: Vec::new(),
            first_error: None,
        };

        let span = obs::session_span(&session_id);
        let root_label = self.console.redact(&root.label());
        let outcome = async {
            obs::emit_session_started(&session_id, &root_label);
            executor.execute(&root, 0).await
        }
        .instrument(span)
        .await;

        let result = match outcome {
            Outcome::Passed => JobResult::Passed,
            Outcome::Failed => JobResult::Failed,
            Outcome::Cancelled => {
                self.console
                    .append(format!("{CONSOLE_PREFIX} Build cancelled."));
                JobResult::Cancelled
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_session_finished(&session_id, result, duration_ms);

        BuildReport {
            session_id,
            result,
            duration_ms,
            steps: executor.steps,
            error: executor.first_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Passed,
    Failed,
    Cancelled,
}

impl From<Outcome> for StepStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Passed => StepStatus::Passed,
            Outcome::Failed => StepStatus::Failed,
            Outcome::Cancelled => StepStatus::Cancelled,
        }
    }
}

/// Why a running command was interrupted.
enum Interrupt {
    Timeout(u64),
    Cancelled,
}

/// State of one tree walk.
struct Executor<'s> {
    session_id: Uuid,
    console: &'s ConsoleSink,
    config: &'s SessionConfig,
    env: EnvironmentContext,
    cancel: watch::Receiver<bool>,
    /// Depth of cleanup / on-cancel handlers currently running.
    shielded: usize,
    steps: Vec<StepRecord>,
    first_error: Option<String>,
}

impl<'s> Executor<'s> {
    fn cancelled(&self) -> bool {
        self.shielded == 0 && *self.cancel.borrow()
    }

    fn record(&mut self, depth: usize, node: &Builder, status: StepStatus) -> usize {
        let label = self.console.redact(&node.label());
        self.steps.push(StepRecord {
            depth,
            label,
            status,
        });
        self.steps.len() - 1
    }

    fn fail(&mut self, err: BuildError) -> Outcome {
        let message = self.console.redact(&err.to_string());
        self.console
            .append(format!("{CONSOLE_PREFIX} Error: {message}"));
        if self.first_error.is_none() {
            self.first_error = Some(message);
        }
        Outcome::Failed
    }

    fn execute<'a>(&'a mut self, node: &'a Builder, depth: usize) -> BoxFuture<'a, Outcome> {
        async move {
            if self.cancelled() {
                self.record(depth, node, StepStatus::Skipped);
                return Outcome::Cancelled;
            }

            let index = self.record(depth, node, StepStatus::Passed);
            let outcome = match &node.kind {
                BuilderKind::Exec(spec) => self.run_exec(spec).await,
                BuilderKind::Mkdirs { path } => self.mkdirs(path).await,
                BuilderKind::Delete { path } => match delete_path(path).await {
                    Ok(()) => Outcome::Passed,
                    Err(source) => self.fail(BuildError::fs("delete", path, source)),
                },
                BuilderKind::CleanDir { path, keep } => self.clean_dir(path, keep).await,
                BuilderKind::Copy { from, to } => match tokio::fs::copy(from, to).await {
                    Ok(_) => Outcome::Passed,
                    Err(source) => self.fail(BuildError::fs("copy", from, source)),
                },
                BuilderKind::Export {
                    name,
                    value,
                    secret,
                } => {
                    self.export(name, value, *secret);
                    Outcome::Passed
                }
                BuilderKind::Secret { value } => {
                    self.console.add_secret(value);
                    Outcome::Passed
                }
                BuilderKind::Echo { text } => {
                    self.console.append(text);
                    Outcome::Passed
                }
                BuilderKind::Fail { message } => self.fail(BuildError::Explicit(message.clone())),
                BuilderKind::Compose { children, cleanup } => {
                    self.compose(children, cleanup, depth).await
                }
                BuilderKind::Conditional {
                    condition,
                    then,
                    otherwise,
                } => match self.evaluate(condition).await {
                    Ok(true) => self.execute(then, depth + 1).await,
                    Ok(false) => match otherwise {
                        Some(branch) => self.execute(branch, depth + 1).await,
                        None => Outcome::Passed,
                    },
                    Err(outcome) => outcome,
                },
            };

            if outcome == Outcome::Cancelled {
                if let Some(handler) = &node.on_cancel {
                    self.shielded += 1;
                    self.execute(handler, depth + 1).await;
                    self.shielded -= 1;
                }
            }

            self.steps[index].status = outcome.into();
            obs::emit_step_finished(&self.session_id, &self.steps[index].label, outcome.into());
            outcome
        }
        .boxed()
    }

    async fn compose(&mut self, children: &[Builder], cleanup: &[Builder], depth: usize) -> Outcome {
        let mut outcome = Outcome::Passed;

        for (i, child) in children.iter().enumerate() {
            let child_outcome = self.execute(child, depth + 1).await;
            if child_outcome != Outcome::Passed {
                outcome = child_outcome;
                for skipped in &children[i + 1..] {
                    self.record(depth + 1, skipped, StepStatus::Skipped);
                }
                break;
            }
        }
        // A cancel raised during the last child is not seen by any later
        // node entry.
        if outcome == Outcome::Passed && self.cancelled() {
            outcome = Outcome::Cancelled;
        }

        self.shielded += 1;
        for step in cleanup {
            let cleanup_outcome = self.execute(step, depth + 1).await;
            if outcome == Outcome::Passed && cleanup_outcome == Outcome::Failed {
                outcome = Outcome::Failed;
            }
        }
        self.shielded -= 1;

        outcome
    }

    fn export(&mut self, name: &str, value: &str, secret: bool) {
        let outcome = self.env.set(name, value, secret);
        // The flag sticks to the name, so a plain override of a secret
        // variable is still masked.
        if self.env.get(name).is_some_and(|v| v.is_secret()) {
            self.console.add_secret(value);
        }
        if let Some(line) = self.env.announcement(name, outcome) {
            self.console.append(line);
        }
    }

    async fn mkdirs(&mut self, path: &Path) -> Outcome {
        match tokio::fs::create_dir_all(path).await {
            Ok(()) => Outcome::Passed,
            Err(source) => self.fail(BuildError::fs("create directory", path, source)),
        }
    }

    async fn clean_dir(&mut self, path: &Path, keep: &[String]) -> Outcome {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Outcome::Passed,
            Err(source) => return self.fail(BuildError::fs("list directory", path, source)),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => return self.fail(BuildError::fs("list directory", path, source)),
            };
            let name = entry.file_name();
            if keep.iter().any(|k| name.to_str() == Some(k.as_str())) {
                continue;
            }
            let entry_path = entry.path();
            debug!(path = %entry_path.display(), "removing stray entry");
            if let Err(source) = delete_path(&entry_path).await {
                return self.fail(BuildError::Cleanup {
                    path: entry_path,
                    source,
                });
            }
        }
        Outcome::Passed
    }

    fn command(&self, spec: &ExecSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).envs(self.env.iter());
        if let Some(dir) = spec.working_dir.as_ref().or(self.config.working_dir.as_ref()) {
            command.current_dir(dir);
        }
        command
    }

    /// `Err` carries the outcome when the condition command was interrupted.
    async fn evaluate(&mut self, condition: &Condition) -> Result<bool, Outcome> {
        match condition {
            Condition::Exists { path } => Ok(tokio::fs::symlink_metadata(path).await.is_ok()),
            Condition::Missing { path } => Ok(tokio::fs::symlink_metadata(path).await.is_err()),
            Condition::OutputEquals { exec, expected } => {
                let mut command = self.command(exec);
                command.stdin(Stdio::null()).kill_on_drop(true);

                let timeout_secs = exec.timeout_secs.unwrap_or(self.config.command_timeout_secs);
                let output = tokio::select! {
                    output = command.output() => output,
                    _ = deadline(timeout_secs) => {
                        return Err(self.interrupted(&exec.program, Interrupt::Timeout(timeout_secs)));
                    }
                    _ = wait_for_cancel(self.cancel.clone(), self.shielded > 0) => {
                        return Err(self.interrupted(&exec.program, Interrupt::Cancelled));
                    }
                };
                match output {
                    Ok(out) => Ok(out.status.success()
                        && String::from_utf8_lossy(&out.stdout).trim() == expected.trim()),
                    Err(e) => {
                        debug!(program = %exec.program, error = %e, "condition command failed to start");
                        Ok(false)
                    }
                }
            }
        }
    }

    fn interrupted(&mut self, program: &str, interrupt: Interrupt) -> Outcome {
        match interrupt {
            Interrupt::Timeout(secs) => self.fail(BuildError::Timeout {
                program: program.to_string(),
                timeout_secs: secs,
            }),
            Interrupt::Cancelled => {
                let label = self.console.redact(program);
                obs::emit_session_cancelled(&self.session_id, &label);
                self.console
                    .append(format!("{CONSOLE_PREFIX} Terminated '{label}' on cancel."));
                Outcome::Cancelled
            }
        }
    }

    async fn run_exec(&mut self, spec: &ExecSpec) -> Outcome {
        let mut command = self.command(spec);
        command
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %spec.program, working_dir = ?spec.working_dir, "spawning process");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return self.fail(BuildError::Spawn {
                    program: spec.program.clone(),
                    source,
                })
            }
        };

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            // Written from a task so a child that prints before reading
            // cannot deadlock against us.
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let mut pumps: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_lines(stdout, self.console.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_lines(stderr, self.console.clone())));
        }

        let timeout_secs = spec.timeout_secs.unwrap_or(self.config.command_timeout_secs);
        let expired = deadline(timeout_secs);
        let cancelled = wait_for_cancel(self.cancel.clone(), self.shielded > 0);
        tokio::pin!(expired, cancelled);

        let waited = tokio::select! {
            status = child.wait() => Ok(status),
            _ = &mut expired => Err(Interrupt::Timeout(timeout_secs)),
            _ = &mut cancelled => Err(Interrupt::Cancelled),
        };

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                abort_all(pumps);
                return self.fail(BuildError::Process {
                    program: spec.program.clone(),
                    source,
                });
            }
            Err(interrupt) => {
                if let Err(e) = child.kill().await {
                    debug!(program = %spec.program, error = %e, "kill failed");
                }
                abort_all(pumps);
                return self.interrupted(&spec.program, interrupt);
            }
        };

        // Background processes started by the command can hold the pipes
        // open long after it exits.
        let drained = tokio::select! {
            _ = drain(&mut pumps) => Ok(()),
            _ = tokio::time::sleep(PIPE_DRAIN_GRACE) => {
                debug!(program = %spec.program, "output pipes still open after exit, detaching");
                Ok(())
            }
            _ = &mut expired => Err(Interrupt::Timeout(timeout_secs)),
            _ = &mut cancelled => Err(Interrupt::Cancelled),
        };
        abort_all(pumps);
        if let Err(interrupt) = drained {
            return self.interrupted(&spec.program, interrupt);
        }

        if status.success() {
            Outcome::Passed
        } else {
            self.fail(BuildError::CommandFailed {
                program: spec.program.clone(),
                exit_code: status.code(),
            })
        }
    }
}

/// Sleeps for `timeout_secs`. Zero means no limit.
async fn deadline(timeout_secs: u64) {
    if timeout_secs > 0 {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
    } else {
        std::future::pending::<()>().await;
    }
}

/// Resolves once cancellation is raised. Never resolves when shielded.
async fn wait_for_cancel(mut rx: watch::Receiver<bool>, shielded: bool) {
    if shielded {
        return std::future::pending().await;
    }
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Copy lines from a child pipe into the console, decoding lossily.
async fn pump_lines<R>(reader: R, console: ConsoleSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                console.append(line.trim_end_matches(&['\n', '\r'][..]));
            }
        }
    }
}

async fn drain(pumps: &mut [JoinHandle<()>]) {
    for pump in pumps.iter_mut() {
        let _ = pump.await;
    }
}

fn abort_all(pumps: Vec<JoinHandle<()>>) {
    for pump in pumps {
        pump.abort();
    }
}

/// Remove a file, symlink or directory tree. Missing paths are not an error.
async fn delete_path(path: &Path) -> std::io::Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}
