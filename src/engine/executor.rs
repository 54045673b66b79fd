//! Run executor.
//!
//! Drives one run at a time through its step state machine: topological
//! order, per-step retries with backoff, journal-first writes, cooperative
//! cancellation. Every transition is appended to the journal before the run
//! store snapshot is refreshed, so the journal is the commit point and the
//! store is a derived projection of it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::engine::clock::{Clock, SystemClock};
use crate::engine::retry;
use crate::error::{Error, Result};
use crate::journal::{Event, EventJournal};
use crate::metrics;
use crate::observer::RunObserver;
use crate::runner::StepRegistry;
use crate::store::{
    NodeExecution, Run, RunPatch, RunStatus, RunStore, RunSummary, StepStatus,
};
use crate::workflow::{graph, Edge, Node, Params, Trigger};

/// Registry that tracks per-run cancellation signals.
///
/// Callers cancel a run between step executions; the executor checks the
/// signal before starting each node, never mid-node. A node already running
/// settles on its own before the run can settle cancelled.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    signals: Arc<tokio::sync::Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and return its cancellation signal.
    pub async fn register(&self, run_id: &str) -> Arc<AtomicBool> {
        let signal = Arc::new(AtomicBool::new(false));
        self.signals
            .lock()
            .await
            .insert(run_id.to_string(), signal.clone());
        signal
    }

    /// Request cancellation for a specific run. Returns false if the run is
    /// not tracked (e.g. already finished).
    pub async fn request_cancel(&self, run_id: &str) -> bool {
        if let Some(signal) = self.signals.lock().await.get(run_id) {
            signal.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Request cancellation for every tracked run (graceful shutdown path).
    pub async fn cancel_all(&self) {
        for signal in self.signals.lock().await.values() {
            signal.store(true, Ordering::SeqCst);
        }
    }

    /// Unregister a run (called when its execution settles).
    pub async fn unregister(&self, run_id: &str) {
        self.signals.lock().await.remove(run_id);
    }
}

/// Workflow run executor.
pub struct RunExecutor {
    registry: StepRegistry,
    store: Arc<RunStore>,
    journal: Arc<EventJournal>,
    observer: Option<RunObserver>,
    clock: Arc<dyn Clock>,
    cancels: CancelRegistry,
    /// Pause inserted between journaled step log lines.
    log_pace: Duration,
}

impl RunExecutor {
    /// Create a new executor.
    pub fn new(registry: StepRegistry, store: Arc<RunStore>, journal: Arc<EventJournal>) -> Self {
        Self {
            registry,
            store,
            journal,
            observer: None,
            clock: Arc::new(SystemClock),
            cancels: CancelRegistry::new(),
            log_pace: Duration::ZERO,
        }
    }

    /// Attach an observer for run lifecycle callbacks.
    pub fn with_observer(mut self, observer: RunObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the clock (tests use a manual clock to skip backoff sleeps).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a cancellation registry with other executors.
    pub fn with_cancel_registry(mut self, cancels: CancelRegistry) -> Self {
        self.cancels = cancels;
        self
    }

    /// Pace journaled log lines (zero disables pacing).
    pub fn with_log_pace(mut self, pace: Duration) -> Self {
        self.log_pace = pace;
        self
    }

    /// The cancellation registry used by this executor.
    pub fn cancel_registry(&self) -> CancelRegistry {
        self.cancels.clone()
    }

    /// Request cancellation of a run started by this executor.
    pub async fn cancel_run(&self, run_id: &str) -> bool {
        self.cancels.request_cancel(run_id).await
    }

    /// Execute a workflow run to completion.
    ///
    /// Sorts the graph, drives every node in order, and returns the settled
    /// run. A cyclic graph produces a run that is already failed, carrying a
    /// single synthetic error event; other validation failures (unknown edge
    /// endpoints, duplicate ids) are returned as errors with no run created.
    #[instrument(
        name = "run.execute",
        skip(self, nodes, edges, inputs),
        fields(
            workflow_id = %workflow_id,
            workflow_name = %workflow_name,
            trigger = %trigger,
            run_id = tracing::field::Empty,
        )
    )]
    pub async fn start_run(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        nodes: Vec<Node>,
        edges: &[Edge],
        trigger: Trigger,
        inputs: Params,
    ) -> Result<Run> {
        let ordered = match graph::sort(&nodes, edges) {
            Ok(ordered) => ordered,
            Err(Error::Cycle { node }) => {
                return Ok(self.fail_on_cycle(workflow_id, workflow_name, nodes, trigger, inputs, node));
            }
            Err(e) => return Err(e),
        };

        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());
        info!(
            "Starting run {} of workflow '{}' ({} nodes)",
            run_id,
            workflow_name,
            ordered.len()
        );

        let started_at = self.clock.now();
        let steps: Vec<NodeExecution> = ordered.iter().map(NodeExecution::pending).collect();
        let mut run = Run {
            run_id: run_id.clone(),
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: RunStatus::Running,
            trigger,
            started_at,
            ended_at: None,
            nodes: ordered,
            steps,
            events: Vec::new(),
            inputs,
            outputs: None,
            summary: None,
        };

        self.store.add_run(run.clone());
        metrics::inc_active_runs();
        if let Some(observer) = &self.observer {
            observer.on_start(&run_id);
        }

        let cancel_signal = self.cancels.register(&run_id).await;
        let parents = parent_map(edges);

        let mut cancelled = false;
        let mut blocked: HashSet<String> = HashSet::new();

        for idx in 0..run.nodes.len() {
            if cancel_signal.load(Ordering::SeqCst) {
                info!("Run {} cancelled; remaining nodes stay pending", run_id);
                cancelled = true;
                break;
            }

            let node = run.nodes[idx].clone();

            // A node whose dependency failed (or was itself skipped) never
            // starts: it stays pending with no events.
            let parent_blocked = parents
                .get(node.id.as_str())
                .map(|ps| ps.iter().any(|p| blocked.contains(p.as_str())))
                .unwrap_or(false);
            if parent_blocked {
                debug!("Skipping node '{}': upstream dependency failed", node.id);
                blocked.insert(node.id.clone());
                continue;
            }

            let succeeded = self.drive_step(&run_id, &node, idx, &mut run).await?;
            if !succeeded {
                blocked.insert(node.id.clone());
            }
        }

        self.cancels.unregister(&run_id).await;
        self.finalize(run, cancelled)
    }

    /// Execute a run of exactly one node (the "run step only" path).
    pub async fn run_single_step(
        &self,
        node: Node,
        trigger: Trigger,
        inputs: Params,
    ) -> Result<Run> {
        let workflow_id = format!("single-step:{}", node.id);
        let workflow_name = node.title.clone();
        self.start_run(&workflow_id, &workflow_name, vec![node], &[], trigger, inputs)
            .await
    }

    /// Re-enter the retry branch for an already-failed step of a stored run.
    ///
    /// Only the named step is re-driven; the other steps keep their settled
    /// state. The run re-opens to running for the duration and then settles
    /// again: success only when every step is now successful.
    pub async fn retry_step(&self, run_id: &str, node_id: &str) -> Result<Run> {
        let mut run = self
            .store
            .get_run(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;

        let idx = run
            .steps
            .iter()
            .position(|s| s.node_id == node_id)
            .ok_or_else(|| Error::StepNotFound(node_id.to_string()))?;

        if run.steps[idx].status != StepStatus::Error {
            return Err(Error::Execution(format!(
                "Cannot retry step '{}': status is '{}', expected 'error'",
                node_id, run.steps[idx].status
            )));
        }

        let node = run
            .get_node(node_id)
            .cloned()
            .ok_or_else(|| Error::StepNotFound(node_id.to_string()))?;

        info!("Retrying step '{}' of run {}", node_id, run_id);
        metrics::inc_active_runs();
        run.status = RunStatus::Running;
        self.push_snapshot(&run)?;

        // The manual retry is itself an attempt: journal it before
        // re-driving the step.
        let attempt = run.steps[idx].retry_count + 1;
        run.steps[idx].retry_count = attempt;
        let retry_event = Event::retry(node_id, self.clock.now(), attempt);
        self.emit(run_id, &mut run.events, retry_event);
        metrics::record_retry(&node.app);

        self.drive_step(run_id, &node, idx, &mut run).await?;
        self.finalize(run, false)
    }

    /// Drive one node through `running → {success | error}`, retrying per
    /// its policy. Returns whether the step settled successfully.
    async fn drive_step(
        &self,
        run_id: &str,
        node: &Node,
        idx: usize,
        run: &mut Run,
    ) -> Result<bool> {
        let mut exec = run.steps[idx].clone();
        let started = self.clock.now();
        exec.status = StepStatus::Running;
        exec.start_time = Some(started);
        exec.end_time = None;
        exec.error = None;

        self.emit(run_id, &mut run.events, Event::started(&node.id, started));
        run.steps[idx] = exec.clone();
        self.push_snapshot(run)?;

        loop {
            match self.registry.execute(node).await {
                Ok(output) => {
                    for line in &output.logs {
                        let event = Event::log(&node.id, self.clock.now(), line.clone());
                        self.emit(run_id, &mut run.events, event);
                        if !self.log_pace.is_zero() {
                            self.clock.sleep(self.log_pace).await;
                        }
                    }

                    let now = self.clock.now();
                    self.emit(
                        run_id,
                        &mut run.events,
                        Event::success(&node.id, now, output.data.clone()),
                    );

                    exec.status = StepStatus::Success;
                    exec.end_time = Some(now);
                    exec.duration_ms = Some(millis_between(started, now));
                    exec.output = Some(output.data);
                    exec.error = None;

                    info!("Step '{}' completed successfully", node.id);
                    metrics::record_step(&node.app, "success");
                    metrics::record_step_duration(
                        Duration::from_millis(millis_between(started, now).max(0) as u64),
                        &node.app,
                    );

                    run.steps[idx] = exec;
                    self.push_snapshot(run)?;
                    return Ok(true);
                }
                Err(e) => {
                    let now = self.clock.now();
                    self.emit(
                        run_id,
                        &mut run.events,
                        Event::error(&node.id, now, e.to_string()),
                    );

                    let next_attempt = exec.retry_count + 1;
                    match node.retry.as_ref() {
                        Some(cfg) if retry::should_retry(next_attempt, cfg.max_attempts) => {
                            let delay = retry::delay_for(next_attempt, cfg);
                            warn!(
                                "Step '{}' attempt {}/{} failed: {}. Retrying in {:?}",
                                node.id, next_attempt, cfg.max_attempts, e, delay
                            );
                            self.clock.sleep(delay).await;

                            exec.retry_count = next_attempt;
                            let event = Event::retry(&node.id, self.clock.now(), next_attempt);
                            self.emit(run_id, &mut run.events, event);
                            metrics::record_retry(&node.app);

                            run.steps[idx] = exec.clone();
                            self.push_snapshot(run)?;
                        }
                        _ => {
                            error!(
                                "Step '{}' failed after {} attempt(s): {}",
                                node.id,
                                exec.retry_count + 1,
                                e
                            );

                            exec.status = StepStatus::Error;
                            exec.end_time = Some(now);
                            exec.duration_ms = Some(millis_between(started, now));
                            exec.error = Some(e.to_string());

                            metrics::record_step(&node.app, "error");
                            metrics::record_step_duration(
                                Duration::from_millis(millis_between(started, now).max(0) as u64),
                                &node.app,
                            );

                            run.steps[idx] = exec;
                            self.push_snapshot(run)?;
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    /// Journal-first event write: append, notify observers, mirror onto the
    /// run's event projection.
    fn emit(&self, run_id: &str, events: &mut Vec<Event>, event: Event) {
        self.journal.append(run_id, event.clone());
        if let Some(observer) = &self.observer {
            observer.on_progress(run_id, &event);
        }
        events.push(event);
    }

    /// Refresh the store's snapshot of a run in flight.
    fn push_snapshot(&self, run: &Run) -> Result<()> {
        self.store.update_run(
            &run.run_id,
            RunPatch {
                status: Some(run.status),
                steps: Some(run.steps.clone()),
                events: Some(run.events.clone()),
                ..Default::default()
            },
        )
    }

    /// Settle the run: compute the final status, summary, and outputs, and
    /// write the last snapshot.
    fn finalize(&self, mut run: Run, cancelled: bool) -> Result<Run> {
        let ended_at = self.clock.now();
        let any_error = run.steps.iter().any(|s| s.status == StepStatus::Error);
        let all_success = run.steps.iter().all(|s| s.status == StepStatus::Success);

        run.status = if cancelled {
            RunStatus::Cancelled
        } else if any_error {
            RunStatus::Failed
        } else if all_success {
            RunStatus::Success
        } else {
            // No errors but steps never started: a prior failure's
            // dependents retried out of order. The run is still not whole.
            RunStatus::Failed
        };
        run.ended_at = Some(ended_at);
        run.outputs = run
            .steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Success)
            .and_then(|s| s.output.clone());

        let duration_ms = millis_between(run.started_at, ended_at);
        run.summary = Some(RunSummary::from_steps(&run.steps, duration_ms));

        metrics::dec_active_runs();
        metrics::record_run(&run.status.to_string(), &run.trigger.to_string());
        metrics::record_run_duration(
            Duration::from_millis(duration_ms.max(0) as u64),
            &run.workflow_name,
        );

        self.store.update_run(
            &run.run_id,
            RunPatch {
                status: Some(run.status),
                ended_at: Some(ended_at),
                steps: Some(run.steps.clone()),
                events: Some(run.events.clone()),
                outputs: run.outputs.clone(),
                summary: run.summary.clone(),
            },
        )?;

        if let Some(observer) = &self.observer {
            observer.on_complete(&run.run_id, &run.status.to_string());
        }

        info!(
            "Run {} settled with status {} ({}ms)",
            run.run_id, run.status, duration_ms
        );
        Ok(run)
    }

    /// Build the immediately-failed run a cyclic graph produces.
    fn fail_on_cycle(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        nodes: Vec<Node>,
        trigger: Trigger,
        inputs: Params,
        cycle_node: String,
    ) -> Run {
        let run_id = Uuid::new_v4().to_string();
        let message = Error::Cycle {
            node: cycle_node.clone(),
        }
        .to_string();
        error!("Run {} of '{}' rejected: {}", run_id, workflow_name, message);

        let now = self.clock.now();
        let event = Event::error(&cycle_node, now, message.clone());
        self.journal.append(&run_id, event.clone());

        let steps: Vec<NodeExecution> = nodes.iter().map(NodeExecution::pending).collect();
        let mut summary = RunSummary::from_steps(&steps, 0);
        summary.first_error = Some(message.clone());

        let run = Run {
            run_id: run_id.clone(),
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: RunStatus::Failed,
            trigger,
            started_at: now,
            ended_at: Some(now),
            nodes,
            steps,
            events: vec![event],
            inputs,
            outputs: None,
            summary: Some(summary),
        };

        self.store.add_run(run.clone());
        metrics::record_run("failed", &trigger.to_string());
        if let Some(observer) = &self.observer {
            observer.on_error(&message);
        }
        run
    }
}

/// Direct dependencies per node, from the edge set.
fn parent_map(edges: &[Edge]) -> HashMap<String, Vec<String>> {
    let mut parents: HashMap<String, Vec<String>> = HashMap::new();
    for edge in edges {
        parents
            .entry(edge.target.clone())
            .or_default()
            .push(edge.source.clone());
    }
    parents
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds()
}
