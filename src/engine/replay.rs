//! Replay of historical runs.
//!
//! A replay builds a new run from a stored run's step sequence without
//! re-invoking any step handler: recorded outcomes are reproduced (and
//! selectively altered) deterministically. Timestamps are re-based to "now"
//! with each step's original duration preserved, and the replay publishes
//! the same journal events and observer callbacks as a live run, so the
//! only distinguishing mark is the trigger.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing::{info, instrument, Span};
use uuid::Uuid;

use crate::engine::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::journal::{Event, EventJournal, EventType};
use crate::metrics;
use crate::observer::RunObserver;
use crate::store::{NodeExecution, Run, RunPatch, RunStatus, RunStore, RunSummary, StepStatus};
use crate::workflow::{Params, Trigger};

/// Knobs for a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Replay only from this step onward (by node id).
    pub start_step_id: Option<String>,
    /// Overlaid onto the original run's inputs.
    pub param_overrides: Option<Params>,
    /// Coerce originally-failed steps to success.
    pub skip_failures: bool,
    /// Force the last replayed step to fail.
    pub force_fail: bool,
}

/// Replays stored runs through the live-run callback surface.
pub struct ReplayEngine {
    store: Arc<RunStore>,
    journal: Arc<EventJournal>,
    observer: Option<RunObserver>,
    clock: Arc<dyn Clock>,
}

impl ReplayEngine {
    pub fn new(store: Arc<RunStore>, journal: Arc<EventJournal>) -> Self {
        Self {
            store,
            journal,
            observer: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Attach an observer for run lifecycle callbacks.
    pub fn with_observer(mut self, observer: RunObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replay a stored run, returning the new run.
    ///
    /// Fails with `Error::ReplayTarget` before any run record is created if
    /// `start_step_id` names a step the original run does not have.
    #[instrument(
        name = "run.replay",
        skip(self, original, options),
        fields(original_run_id = %original.run_id, run_id = tracing::field::Empty)
    )]
    pub async fn replay(&self, original: &Run, options: ReplayOptions) -> Result<Run> {
        let start_index = match &options.start_step_id {
            Some(step_id) => original
                .steps
                .iter()
                .position(|s| s.node_id == *step_id)
                .ok_or_else(|| Error::ReplayTarget(step_id.clone()))?,
            None => 0,
        };

        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());
        info!(
            "Replaying run {} as {} from step index {}",
            original.run_id, run_id, start_index
        );

        let mut inputs = original.inputs.clone();
        if let Some(overrides) = &options.param_overrides {
            inputs.merge(overrides);
        }

        let started_at = self.clock.now();
        let slice = &original.steps[start_index..];
        let last_index = slice.len().saturating_sub(1);

        // Derive the replayed step records up front; events are emitted
        // per-step below so observers see the same cadence as a live run.
        let mut steps: Vec<NodeExecution> = Vec::with_capacity(slice.len());
        let mut cursor = started_at;
        for (i, step) in slice.iter().enumerate() {
            let mut replayed = step.clone();

            if options.force_fail && i == last_index {
                replayed.status = StepStatus::Error;
                replayed.error = Some("Forced failure".to_string());
            } else if options.skip_failures && step.status == StepStatus::Error {
                replayed.status = StepStatus::Success;
                replayed.error = None;
            }

            if replayed.status.is_terminal() {
                let duration = ChronoDuration::milliseconds(step.duration_ms.unwrap_or(0));
                replayed.start_time = Some(cursor);
                replayed.end_time = Some(cursor + duration);
                replayed.duration_ms = Some(duration.num_milliseconds());
                cursor += duration;
            } else {
                // Steps the original never started stay untouched.
                replayed.start_time = None;
                replayed.end_time = None;
                replayed.duration_ms = None;
            }

            steps.push(replayed);
        }

        let nodes = slice
            .iter()
            .filter_map(|s| original.get_node(&s.node_id).cloned())
            .collect();

        let mut run = Run {
            run_id: run_id.clone(),
            workflow_id: original.workflow_id.clone(),
            workflow_name: original.workflow_name.clone(),
            status: RunStatus::Running,
            trigger: Trigger::Manual,
            started_at,
            ended_at: None,
            nodes,
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

        let original_logs: Vec<&Event> = original
            .events
            .iter()
            .filter(|e| e.event_type == EventType::NodeLog)
            .collect();

        for idx in 0..run.steps.len() {
            let step = run.steps[idx].clone();
            if !step.status.is_terminal() {
                continue;
            }
            let step_started = step.start_time.unwrap_or(started_at);
            let step_ended = step.end_time.unwrap_or(step_started);

            self.emit(&run_id, &mut run.events, Event::started(&step.node_id, step_started));
            for log in original_logs.iter().filter(|e| e.node_id == step.node_id) {
                if let Some(line) = &log.log {
                    self.emit(
                        &run_id,
                        &mut run.events,
                        Event::log(&step.node_id, step_started, line.clone()),
                    );
                }
            }
            let terminal = match step.status {
                StepStatus::Success => Event::success(
                    &step.node_id,
                    step_ended,
                    step.output.clone().unwrap_or(serde_json::Value::Null),
                ),
                _ => Event::error(
                    &step.node_id,
                    step_ended,
                    step.error.clone().unwrap_or_else(|| "Step failed".to_string()),
                ),
            };
            self.emit(&run_id, &mut run.events, terminal);

            self.store.update_run(
                &run_id,
                RunPatch {
                    steps: Some(run.steps.clone()),
                    events: Some(run.events.clone()),
                    ..Default::default()
                },
            )?;
        }

        let all_success = run.steps.iter().all(|s| s.status == StepStatus::Success);
        run.status = if all_success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        run.ended_at = Some(cursor);
        run.outputs = run
            .steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Success)
            .and_then(|s| s.output.clone());
        run.summary = Some(RunSummary::from_steps(
            &run.steps,
            (cursor - started_at).num_milliseconds(),
        ));

        metrics::dec_active_runs();
        metrics::record_run(&run.status.to_string(), &run.trigger.to_string());

        self.store.update_run(
            &run_id,
            RunPatch {
                status: Some(run.status),
                ended_at: run.ended_at,
                steps: Some(run.steps.clone()),
                events: Some(run.events.clone()),
                outputs: run.outputs.clone(),
                summary: run.summary.clone(),
            },
        )?;

        if let Some(observer) = &self.observer {
            observer.on_complete(&run_id, &run.status.to_string());
        }

        info!("Replay {} settled with status {}", run_id, run.status);
        Ok(run)
    }

    fn emit(&self, run_id: &str, events: &mut Vec<Event>, event: Event) {
        self.journal.append(run_id, event.clone());
        if let Some(observer) = &self.observer {
            observer.on_progress(run_id, &event);
        }
        events.push(event);
    }
}
