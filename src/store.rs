//! Run records and the in-memory run store.
//!
//! The store is a derived projection of the journal: executors write every
//! transition to the journal first, then mirror the current snapshot here.
//! Intermediate snapshots double as the live progress view, which is why
//! `update_run` replaces the whole `steps` sequence instead of merging it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::journal::Event;
use crate::workflow::{Node, Params, Trigger};

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal runs are immutable (except for the explicit step-retry path).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Per-step status, mirroring the step state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Execution record for one node of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub node_title: String,
    pub app: String,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub output: Option<Value>,
}

impl NodeExecution {
    /// Fresh record in `pending`, created when the run starts.
    pub fn pending(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            node_title: node.title.clone(),
            app: node.app.clone(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            retry_count: 0,
            error: None,
            output: None,
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Immutable node snapshot supplied at run start, in execution order.
    /// Kept so a failed step can be retried without resupplying the graph.
    pub nodes: Vec<Node>,
    /// One record per node, in execution order.
    pub steps: Vec<NodeExecution>,
    /// Journal projection for this run, in append order.
    pub events: Vec<Event>,
    pub inputs: Params,
    pub outputs: Option<Value>,
    pub summary: Option<RunSummary>,
}

impl Run {
    /// Find a step record by node id.
    pub fn get_step(&self, node_id: &str) -> Option<&NodeExecution> {
        self.steps.iter().find(|s| s.node_id == node_id)
    }

    /// Find a node definition by id.
    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub steps_total: u32,
    pub steps_succeeded: u32,
    pub steps_failed: u32,
    pub retries: u32,
    pub duration_ms: i64,
    /// First failure message, when any step failed.
    pub first_error: Option<String>,
}

impl RunSummary {
    /// Compute a summary from the run's final step records.
    pub fn from_steps(steps: &[NodeExecution], duration_ms: i64) -> Self {
        Self {
            steps_total: steps.len() as u32,
            steps_succeeded: steps.iter().filter(|s| s.status == StepStatus::Success).count()
                as u32,
            steps_failed: steps.iter().filter(|s| s.status == StepStatus::Error).count() as u32,
            retries: steps.iter().map(|s| s.retry_count).sum(),
            duration_ms,
            first_error: steps
                .iter()
                .filter(|s| s.status == StepStatus::Error)
                .find_map(|s| s.error.clone()),
        }
    }
}

/// Partial update applied by `RunStore::update_run`.
///
/// Shallow merge: present fields replace the stored value wholesale. In
/// particular `steps` is the full sequence, never an append.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub ended_at: Option<DateTime<Utc>>,
    pub steps: Option<Vec<NodeExecution>>,
    pub events: Option<Vec<Event>>,
    pub outputs: Option<Value>,
    pub summary: Option<RunSummary>,
}

/// Query filters for run history.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub trigger: Option<Trigger>,
    /// Substring match on run id, workflow name, or first error.
    pub search: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// In-memory collection of run records, keyed by run id.
///
/// Writes for a given run are serialized by the per-key entry lock; runs for
/// different ids never contend on a shared lock.
#[derive(Default)]
pub struct RunStore {
    runs: DashMap<String, Run>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new run record.
    pub fn add_run(&self, run: Run) {
        self.runs.insert(run.run_id.clone(), run);
    }

    /// Apply a shallow-merge patch to a stored run.
    pub fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<()> {
        let mut entry = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;

        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(ended_at) = patch.ended_at {
            entry.ended_at = Some(ended_at);
        }
        if let Some(steps) = patch.steps {
            entry.steps = steps;
        }
        if let Some(events) = patch.events {
            entry.events = events;
        }
        if let Some(outputs) = patch.outputs {
            entry.outputs = Some(outputs);
        }
        if let Some(summary) = patch.summary {
            entry.summary = Some(summary);
        }
        Ok(())
    }

    /// Get a run by id.
    pub fn get_run(&self, run_id: &str) -> Option<Run> {
        self.runs.get(run_id).map(|entry| entry.clone())
    }

    /// List runs matching a filter, newest first.
    pub fn list_runs(&self, filter: &RunFilter) -> Vec<Run> {
        let mut matched: Vec<Run> = self
            .runs
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();

        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn matches(run: &Run, filter: &RunFilter) -> bool {
        if let Some(workflow_id) = &filter.workflow_id {
            if run.workflow_id != *workflow_id {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if run.status != status {
                return false;
            }
        }
        if let Some(trigger) = filter.trigger {
            if run.trigger != trigger {
                return false;
            }
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            let in_error = run
                .summary
                .as_ref()
                .and_then(|s| s.first_error.as_deref())
                .map(|e| e.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !run.run_id.to_lowercase().contains(&needle)
                && !run.workflow_name.to_lowercase().contains(&needle)
                && !in_error
            {
                return false;
            }
        }
        if let Some(after) = filter.started_after {
            if run.started_at < after {
                return false;
            }
        }
        if let Some(before) = filter.started_before {
            if run.started_at > before {
                return false;
            }
        }
        true
    }

    /// Export the selected runs as a string artifact.
    ///
    /// JSON carries the full run documents; CSV is one row per step across
    /// the selected runs. No I/O happens here; the caller decides where the
    /// artifact goes.
    pub fn export_runs(&self, run_ids: &[String], format: ExportFormat) -> Result<String> {
        let mut runs = Vec::with_capacity(run_ids.len());
        for run_id in run_ids {
            runs.push(
                self.get_run(run_id)
                    .ok_or_else(|| Error::RunNotFound(run_id.clone()))?,
            );
        }

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&runs)?),
            ExportFormat::Csv => {
                let mut out = String::from("runId,workflowName,stepTitle,status,durationMs\n");
                for run in &runs {
                    for step in &run.steps {
                        out.push_str(&format!(
                            "{},{},{},{},{}\n",
                            csv_field(&run.run_id),
                            csv_field(&run.workflow_name),
                            csv_field(&step.node_title),
                            step.status,
                            step.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
                        ));
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run(run_id: &str, workflow: &str, status: RunStatus) -> Run {
        let node = Node::new("step-1", "First step", "slack");
        let mut step = NodeExecution::pending(&node);
        step.status = StepStatus::Success;
        step.duration_ms = Some(120);

        Run {
            run_id: run_id.to_string(),
            workflow_id: format!("wf-{}", workflow),
            workflow_name: workflow.to_string(),
            status,
            trigger: Trigger::Manual,
            started_at: Utc::now(),
            ended_at: None,
            nodes: vec![node],
            steps: vec![step],
            events: Vec::new(),
            inputs: Params::new(),
            outputs: None,
            summary: None,
        }
    }

    #[test]
    fn test_add_get_update() {
        let store = RunStore::new();
        store.add_run(sample_run("run-1", "orders", RunStatus::Running));

        store
            .update_run(
                "run-1",
                RunPatch {
                    status: Some(RunStatus::Success),
                    outputs: Some(json!({"done": true})),
                    ..Default::default()
                },
            )
            .unwrap();

        let run = store.get_run("run-1").unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs.unwrap()["done"], true);
        // Untouched fields survive the shallow merge.
        assert_eq!(run.steps.len(), 1);
    }

    #[test]
    fn test_update_missing_run() {
        let store = RunStore::new();
        let err = store.update_run("ghost", RunPatch::default()).unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_FOUND");
    }

    #[test]
    fn test_list_filters_by_workflow_and_status() {
        let store = RunStore::new();
        store.add_run(sample_run("run-1", "orders", RunStatus::Success));
        store.add_run(sample_run("run-2", "orders", RunStatus::Failed));
        store.add_run(sample_run("run-3", "billing", RunStatus::Success));

        let filter = RunFilter {
            workflow_id: Some("wf-orders".to_string()),
            status: Some(RunStatus::Success),
            ..Default::default()
        };
        let runs = store.list_runs(&filter);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-1");
    }

    #[test]
    fn test_list_search_and_pagination() {
        let store = RunStore::new();
        for i in 0..5 {
            store.add_run(sample_run(&format!("run-{}", i), "orders", RunStatus::Success));
        }

        let page = store.list_runs(&RunFilter {
            search: Some("orders".to_string()),
            limit: Some(2),
            offset: 2,
            ..Default::default()
        });
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_export_csv_one_row_per_step() {
        let store = RunStore::new();
        store.add_run(sample_run("run-1", "orders", RunStatus::Success));
        store.add_run(sample_run("run-2", "billing, misc", RunStatus::Success));

        let csv = store
            .export_runs(
                &["run-1".to_string(), "run-2".to_string()],
                ExportFormat::Csv,
            )
            .unwrap();

        let lines: Vec<&str> = csv.trim_end().lines().collect();
        assert_eq!(lines[0], "runId,workflowName,stepTitle,status,durationMs");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("run-1,orders,First step,success,120"));
        // Comma-bearing fields are quoted.
        assert!(lines[2].contains("\"billing, misc\""));
    }

    #[test]
    fn test_export_json_full_documents() {
        let store = RunStore::new();
        store.add_run(sample_run("run-1", "orders", RunStatus::Success));

        let json = store
            .export_runs(&["run-1".to_string()], ExportFormat::Json)
            .unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["run_id"], "run-1");
        assert_eq!(parsed[0]["steps"][0]["node_title"], "First step");
    }

    #[test]
    fn test_export_unknown_run() {
        let store = RunStore::new();
        let err = store
            .export_runs(&["ghost".to_string()], ExportFormat::Json)
            .unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_FOUND");
    }
}
