use crate::config::{EngineConfig, RetryPolicy};
use crate::graph::TaskGraph;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use weavecore::storage::Area;
use weavecore::{
    Arguments, CommandOutput, CommandRunner, CommandSpec, DispatchError, EventBus,
    ExecutionEvent, SharedStorage, State, StatusStore, StorageError, TaskId, WeaveError,
};

/// One unit of execution concurrency: a local core or one declared core of
/// a remote node.
#[derive(Clone)]
pub struct Slot {
    pub label: String,
    pub runner: Arc<dyn CommandRunner>,
}

impl Slot {
    pub fn new(label: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            label: label.into(),
            runner,
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("label", &self.label)
            .field("runner", &self.runner.describe())
            .finish()
    }
}

/// Everything a single run owns.
pub struct RunContext {
    pub run_id: String,
    /// Storage rooted at the run directory.
    pub storage: SharedStorage,
    pub status: StatusStore,
    pub arguments: Arguments,
    pub cancellation: CancellationToken,
    pub events: Arc<EventBus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: String,
    /// The direct dependency that did not reach `done`.
    pub blocked_by: String,
    /// The failed task at the root of the chain.
    pub root_cause: String,
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub succeeded: bool,
    pub cancelled: bool,
    pub completed: Vec<String>,
    pub failed: Vec<FailedTask>,
    pub blocked: Vec<BlockedTask>,
    /// Tasks left pending because the run was cancelled before they started.
    pub not_started: Vec<String>,
    pub modules: BTreeMap<String, State>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Progress {
    Pending,
    Running,
    Done,
    Failed(String),
    Blocked { blocked_by: String, root_cause: String },
}

struct Finished {
    outcome: Result<CommandOutput, DispatchError>,
    slot: String,
    command: String,
    attempts: u32,
    duration_ms: u64,
}

/// Drives a task graph to completion over a fixed pool of slots.
pub struct WorkflowExecutor {
    slots: Vec<Slot>,
    config: EngineConfig,
}

impl WorkflowExecutor {
    pub fn new(slots: Vec<Slot>, config: EngineConfig) -> Self {
        Self { slots, config }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Execute every task in `graph`, writing each transition to the run's
    /// status area.
    ///
    /// Task failures are reported in the returned `RunReport`. Only storage
    /// failures, or an empty slot pool, make this return `Err`; in-flight
    /// tasks are cancelled and drained first, then marked `failed`.
    pub async fn run(&self, graph: &TaskGraph, ctx: &RunContext) -> Result<RunReport, WeaveError> {
        if self.slots.is_empty() {
            return Err(WeaveError::Execution("no execution slots available".to_string()));
        }

        let start_time = Instant::now();
        ctx.events.emit(ExecutionEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            total_tasks: graph.len(),
            slots: self.slots.len(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Starting run {}: {} tasks on {} slots",
            ctx.run_id,
            graph.len(),
            self.slots.len()
        );

        let mut run = RunState::new(graph, ctx);
        let result = self.drive(&mut run).await;

        // Storage failures abort the run, but the coordinator still waits
        // for every in-flight command so nothing outlives `run`.
        if let Err(e) = result {
            tracing::error!("Run {} aborted: {}", ctx.run_id, e);
            ctx.cancellation.cancel();
            while run.in_flight.next().await.is_some() {}
            run.abort(&e);
            return Err(e.into());
        }

        run.finalize_modules()?;

        let report = run.report(start_time.elapsed().as_millis() as u64);
        ctx.events.emit(ExecutionEvent::RunCompleted {
            run_id: ctx.run_id.clone(),
            success: report.succeeded,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Run {} finished: {} done, {} failed, {} blocked in {}ms",
            ctx.run_id,
            report.completed.len(),
            report.failed.len(),
            report.blocked.len(),
            report.duration_ms
        );
        Ok(report)
    }

    async fn drive(&self, run: &mut RunState<'_>) -> Result<(), StorageError> {
        let mut free: Vec<usize> = (0..self.slots.len()).rev().collect();

        loop {
            if !run.ctx.cancellation.is_cancelled() {
                for idx in run.eligible() {
                    let Some(slot) = free.pop() else { break };
                    self.dispatch(run, idx, slot)?;
                }
            }

            let Some((idx, slot, joined)) = run.in_flight.next().await else {
                break;
            };
            free.push(slot);

            let finished = joined.unwrap_or_else(|e| Finished {
                outcome: Err(DispatchError::Spawn(format!("task join error: {}", e))),
                slot: self.slots[slot].label.clone(),
                command: String::new(),
                attempts: 0,
                duration_ms: 0,
            });
            run.complete(idx, finished)?;
        }
        Ok(())
    }

    fn dispatch(&self, run: &mut RunState<'_>, idx: NodeIndex, slot_index: usize) -> Result<(), StorageError> {
        let slot = &self.slots[slot_index];
        let ctx = run.ctx;
        let graph = run.graph;
        let task = graph.task(idx);
        let task_id = task.id.to_string();
        let mapping = slot.runner.path_mapping();
        let translate = |path: &Path| match mapping {
            Some(mapping) => mapping.translate(path),
            None => path.to_path_buf(),
        };

        let working_dir = translate(&ctx.storage.ensure_dir(Area::Results, &task_id)?);
        let rendered = graph.render_command(idx, &ctx.arguments, |dep: &TaskId| {
            ctx.storage
                .resolve(Area::Results, &dep.to_string())
                .ok()
                .map(|dir| translate(&dir.join("stdout.log")).display().to_string())
        });

        run.progress[idx.index()] = Progress::Running;
        run.start_module(idx)?;
        ctx.status.write(
            &task_id,
            State::Running,
            &format!("Running on {}", slot.label),
        )?;

        let command = match rendered {
            Ok(command) => command,
            Err(unresolved) => {
                let tokens: Vec<&str> = unresolved.iter().map(|p| p.token()).collect();
                let error = format!("unresolved placeholders: {}", tokens.join(", "));
                let finished = Finished {
                    outcome: Err(DispatchError::Spawn(error)),
                    slot: slot.label.clone(),
                    command: task.command.clone(),
                    attempts: 0,
                    duration_ms: 0,
                };
                run.in_flight.push(
                    async move { Ok::<_, tokio::task::JoinError>(finished) }
                    .map(move |joined| (idx, slot_index, joined))
                    .boxed(),
                );
                return Ok(());
            }
        };

        tracing::info!("Dispatching {} to {}: {}", task_id, slot.label, command);
        ctx.events.emit(ExecutionEvent::TaskStarted {
            run_id: ctx.run_id.clone(),
            task_id: task_id.clone(),
            slot: slot.label.clone(),
            timestamp: Utc::now(),
        });

        let label = slot.label.clone();
        let attempt = Attempt {
            runner: Arc::clone(&slot.runner),
            spec: CommandSpec {
                task_id,
                command: command.clone(),
                working_dir,
            },
            timeout: self.config.task_timeout(),
            retry: self.config.retry.clone(),
            cancellation: ctx.cancellation.clone(),
            events: Arc::clone(&ctx.events),
            run_id: ctx.run_id.clone(),
        };
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let (outcome, attempts) = attempt.run().await;
            Finished {
                outcome,
                slot: label,
                command,
                attempts,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        });
        run.in_flight
            .push(handle.map(move |joined| (idx, slot_index, joined)).boxed());
        Ok(())
    }
}

type InFlight = futures::future::BoxFuture<
    'static,
    (NodeIndex, usize, Result<Finished, tokio::task::JoinError>),
>;

/// Coordinator-side bookkeeping. Only the coordinator touches it, so state
/// transitions are serialized.
struct RunState<'a> {
    graph: &'a TaskGraph,
    ctx: &'a RunContext,
    progress: Vec<Progress>,
    modules: Vec<State>,
    module_of: Vec<usize>,
    in_flight: FuturesUnordered<InFlight>,
}

impl<'a> RunState<'a> {
    fn new(graph: &'a TaskGraph, ctx: &'a RunContext) -> Self {
        let mut module_of = vec![0; graph.len()];
        for (position, module) in graph.modules().iter().enumerate() {
            for idx in &module.tasks {
                module_of[idx.index()] = position;
            }
        }
        Self {
            graph,
            ctx,
            progress: vec![Progress::Pending; graph.len()],
            modules: vec![State::Pending; graph.modules().len()],
            module_of,
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Pending tasks whose dependencies are all done, in graph order.
    fn eligible(&self) -> Vec<NodeIndex> {
        self.graph
            .task_indices()
            .filter(|idx| self.progress[idx.index()] == Progress::Pending)
            .filter(|idx| {
                self.graph
                    .dependencies(*idx)
                    .all(|dep| self.progress[dep.index()] == Progress::Done)
            })
            .collect()
    }

    fn start_module(&mut self, idx: NodeIndex) -> Result<(), StorageError> {
        let position = self.module_of[idx.index()];
        if self.modules[position] == State::Pending {
            let name = &self.graph.modules()[position].name;
            self.ctx
                .status
                .write(name, State::Running, &format!("Module {} is running", name))?;
            self.modules[position] = State::Running;
        }
        Ok(())
    }

    fn finish_module(&mut self, position: usize, state: State, body: &str) -> Result<(), StorageError> {
        if self.modules[position].is_terminal() {
            return Ok(());
        }
        let name = self.graph.modules()[position].name.clone();
        self.ctx.status.write(&name, state, body)?;
        self.modules[position] = state;
        match state {
            State::Failed => tracing::warn!("Module {} failed", name),
            _ => tracing::info!("Module {} finished", name),
        }
        self.ctx.events.emit(ExecutionEvent::ModuleFinished {
            run_id: self.ctx.run_id.clone(),
            module: name,
            state,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn complete(&mut self, idx: NodeIndex, finished: Finished) -> Result<(), StorageError> {
        let task_id = self.graph.task(idx).id.to_string();
        self.write_log(&task_id, &finished)?;
        let error = match finished.outcome {
            Ok(output) if output.success() => {
                self.write_artifacts(&task_id, &output)?;
                self.ctx.status.write(&task_id, State::Done, output.summary())?;
                self.progress[idx.index()] = Progress::Done;
                tracing::info!("Task {} completed in {}ms", task_id, finished.duration_ms);
                self.ctx.events.emit(ExecutionEvent::TaskCompleted {
                    run_id: self.ctx.run_id.clone(),
                    task_id,
                    duration_ms: finished.duration_ms,
                    timestamp: Utc::now(),
                });
                self.check_module_done(idx)?;
                return Ok(());
            }
            Ok(output) => {
                self.write_artifacts(&task_id, &output)?;
                output.failure_text()
            }
            Err(DispatchError::Cancelled) => "cancelled".to_string(),
            Err(e) => e.to_string(),
        };
        self.fail(idx, error)
    }

    fn write_artifacts(&self, task_id: &str, output: &CommandOutput) -> Result<(), StorageError> {
        let dir = self.ctx.storage.ensure_dir(Area::Results, task_id)?;
        for (file, content) in [("stdout.log", &output.stdout), ("stderr.log", &output.stderr)] {
            let path = dir.join(file);
            std::fs::write(&path, content).map_err(|e| StorageError::io(&path, e))?;
        }
        Ok(())
    }

    /// `logs/<id>.log`: how the task was run, independent of its output.
    fn write_log(&self, task_id: &str, finished: &Finished) -> Result<(), StorageError> {
        self.ctx.storage.ensure(Area::Logs)?;
        let path = self.ctx.storage.resolve(Area::Logs, &format!("{}.log", task_id))?;
        let exit_code = match &finished.outcome {
            Ok(CommandOutput { exit_code: Some(code), .. }) => code.to_string(),
            _ => "none".to_string(),
        };
        let result = match &finished.outcome {
            Ok(output) if output.success() => "done".to_string(),
            Ok(output) => format!("failed: {}", output.failure_text()),
            Err(e) => format!("failed: {}", e),
        };
        let log = format!(
            "task: {}\nslot: {}\ncommand: {}\nattempts: {}\nexit_code: {}\nduration_ms: {}\nresult: {}\n",
            task_id,
            finished.slot,
            finished.command,
            finished.attempts,
            exit_code,
            finished.duration_ms,
            result
        );
        std::fs::write(&path, log).map_err(|e| StorageError::io(&path, e))
    }

    fn check_module_done(&mut self, idx: NodeIndex) -> Result<(), StorageError> {
        let position = self.module_of[idx.index()];
        let module = &self.graph.modules()[position];
        if module
            .tasks
            .iter()
            .all(|t| self.progress[t.index()] == Progress::Done)
        {
            let body = format!("Module {} completed: {} tasks done", module.name, module.tasks.len());
            self.finish_module(position, State::Done, &body)?;
        }
        Ok(())
    }

    fn fail(&mut self, idx: NodeIndex, error: String) -> Result<(), StorageError> {
        let task_id = self.graph.task(idx).id.to_string();
        self.ctx.status.write(&task_id, State::Failed, &error)?;
        self.progress[idx.index()] = Progress::Failed(error.clone());
        tracing::error!("Task {} failed: {}", task_id, error);
        self.ctx.events.emit(ExecutionEvent::TaskFailed {
            run_id: self.ctx.run_id.clone(),
            task_id: task_id.clone(),
            error,
            timestamp: Utc::now(),
        });

        let position = self.module_of[idx.index()];
        let body = format!("Module {} failed: task {} failed", self.graph.modules()[position].name, task_id);
        self.finish_module(position, State::Failed, &body)?;
        self.block_dependents(idx)
    }

    /// Record every transitive dependent of a failed task as blocked. Their
    /// state stays `pending`; only the body changes.
    fn block_dependents(&mut self, failed: NodeIndex) -> Result<(), StorageError> {
        let root_cause = self.graph.task(failed).id.to_string();
        let mut queue = VecDeque::from([failed]);

        while let Some(current) = queue.pop_front() {
            let current_id = self.graph.task(current).id.to_string();
            let dependents: Vec<NodeIndex> = self.graph.dependents(current).collect();
            for dependent in dependents {
                if self.progress[dependent.index()] != Progress::Pending {
                    continue;
                }
                let task_id = self.graph.task(dependent).id.to_string();
                let body = if current == failed {
                    format!("Blocked: dependency {} failed", root_cause)
                } else {
                    format!("Blocked: dependency {} never ran ({} failed)", current_id, root_cause)
                };
                self.ctx.status.write(&task_id, State::Pending, &body)?;
                tracing::warn!("Task {} blocked by {}", task_id, current_id);
                self.ctx.events.emit(ExecutionEvent::TaskBlocked {
                    run_id: self.ctx.run_id.clone(),
                    task_id,
                    blocked_by: current_id.clone(),
                    timestamp: Utc::now(),
                });
                self.progress[dependent.index()] = Progress::Blocked {
                    blocked_by: current_id.clone(),
                    root_cause: root_cause.clone(),
                };
                queue.push_back(dependent);
            }
        }
        Ok(())
    }

    /// Close out modules that can no longer change so every module is
    /// terminal when the run returns.
    fn finalize_modules(&mut self) -> Result<(), StorageError> {
        for position in 0..self.modules.len() {
            if self.modules[position].is_terminal() {
                continue;
            }
            let module = &self.graph.modules()[position];
            let stuck: Vec<String> = module
                .tasks
                .iter()
                .filter(|t| self.progress[t.index()] != Progress::Done)
                .map(|t| self.graph.task(*t).id.to_string())
                .collect();
            let reason = if self.ctx.cancellation.is_cancelled() {
                "run cancelled"
            } else {
                "blocked"
            };
            let body = format!(
                "Module {} did not complete ({}): {}",
                module.name,
                reason,
                stuck.join(", ")
            );
            self.finish_module(position, State::Failed, &body)?;
        }
        Ok(())
    }

    /// Best effort after a storage failure: nothing the run touched may stay
    /// `running`. Write errors here are only logged.
    fn abort(&mut self, cause: &StorageError) {
        let body = format!("aborted: {}", cause);
        for idx in self.graph.task_indices() {
            if self.progress[idx.index()] != Progress::Running {
                continue;
            }
            let task_id = self.graph.task(idx).id.to_string();
            if let Err(e) = self.ctx.status.write(&task_id, State::Failed, &body) {
                tracing::warn!("Could not mark {} failed: {}", task_id, e);
            }
            self.progress[idx.index()] = Progress::Failed(body.clone());
        }
        for (position, module) in self.graph.modules().iter().enumerate() {
            if self.modules[position] != State::Running {
                continue;
            }
            if let Err(e) = self.ctx.status.write(&module.name, State::Failed, &body) {
                tracing::warn!("Could not mark module {} failed: {}", module.name, e);
            }
            self.modules[position] = State::Failed;
        }
    }

    fn report(&self, duration_ms: u64) -> RunReport {
        let mut report = RunReport {
            run_id: self.ctx.run_id.clone(),
            succeeded: false,
            cancelled: self.ctx.cancellation.is_cancelled(),
            completed: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            not_started: Vec::new(),
            modules: BTreeMap::new(),
            duration_ms,
        };
        for idx in self.graph.task_indices() {
            let task_id = self.graph.task(idx).id.to_string();
            match &self.progress[idx.index()] {
                Progress::Done => report.completed.push(task_id),
                Progress::Failed(error) => report.failed.push(FailedTask {
                    task_id,
                    error: error.clone(),
                }),
                Progress::Blocked {
                    blocked_by,
                    root_cause,
                } => report.blocked.push(BlockedTask {
                    task_id,
                    blocked_by: blocked_by.clone(),
                    root_cause: root_cause.clone(),
                }),
                Progress::Pending | Progress::Running => report.not_started.push(task_id),
            }
        }
        for (position, module) in self.graph.modules().iter().enumerate() {
            report.modules.insert(module.name.clone(), self.modules[position]);
        }
        report.succeeded = !report.cancelled && report.modules.values().all(|s| *s == State::Done);
        report
    }
}

/// One task's trip through a slot, including retries.
struct Attempt {
    runner: Arc<dyn CommandRunner>,
    spec: CommandSpec,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    cancellation: CancellationToken,
    events: Arc<EventBus>,
    run_id: String,
}

impl Attempt {
    /// Returns the final outcome and the number of attempts started.
    async fn run(self) -> (Result<CommandOutput, DispatchError>, u32) {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                _ = self.cancellation.cancelled() => return (Err(DispatchError::Cancelled), attempt),
                result = self.once() => result,
            };
            let error = match &result {
                Ok(output) if output.success() => None,
                Ok(output) => Some(output.failure_text()),
                Err(e) => Some(e.to_string()),
            };
            let Some(error) = error else { return (result, attempt) };
            if attempt >= self.retry.max_attempts {
                return (result, attempt);
            }

            tracing::warn!(
                "Task {} attempt {}/{} failed: {}",
                self.spec.task_id,
                attempt,
                self.retry.max_attempts,
                error
            );
            self.events.emit(ExecutionEvent::TaskRetrying {
                run_id: self.run_id.clone(),
                task_id: self.spec.task_id.clone(),
                attempt,
                error,
                timestamp: Utc::now(),
            });
            tokio::select! {
                _ = self.cancellation.cancelled() => return (Err(DispatchError::Cancelled), attempt),
                _ = tokio::time::sleep(self.retry.delay_after(attempt)) => {}
            }
            attempt += 1;
        }
    }

    /// A single attempt. Dropping the runner future on timeout stops the
    /// command.
    async fn once(&self) -> Result<CommandOutput, DispatchError> {
        let future = self.runner.run(self.spec.clone());
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .unwrap_or(Err(DispatchError::Timeout {
                    seconds: limit.as_secs(),
                })),
            None => future.await,
        }
    }
}
