//! flowrun - deterministic workflow run engine
//!
//! flowrun executes a directed graph of automation steps as an ordered run:
//! topological scheduling, a per-step state machine with retry/backoff, an
//! append-only event journal, and a replay mode that reproduces (and
//! selectively alters) a historical run deterministically.
//!
//! ## Key pieces
//!
//! - **Graph ordering**: Kahn topological sort with input-order tie-break,
//!   so the same definition always runs in the same order
//! - **Step handlers**: a pluggable [`runner::StepRunner`] table keyed by
//!   app tag; fixtures for demos and tests, real integrations in deployments
//! - **Journal-first writes**: every transition hits the journal before the
//!   run store snapshot, so the journal is the durable timeline
//! - **Replay**: re-base a stored run to "now", slice it, override inputs,
//!   or force outcomes, through the same callback surface as a live run
//!
//! ## Example
//!
//! ```yaml
//! id: wf-orders
//! name: order-notification
//!
//! nodes:
//!   - id: fetch-orders
//!     title: Fetch new orders
//!     app: sheets
//!     params:
//!       range: "Orders!A1:F100"
//!
//!   - id: notify
//!     title: Post to channel
//!     app: slack
//!     params:
//!       channel: "#orders"
//!     retry:
//!       max_attempts: 3
//!       base_delay_ms: 500
//!       backoff: exponential
//!
//! edges:
//!   - source: fetch-orders
//!     target: notify
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod metrics;
pub mod observer;
pub mod runner;
pub mod store;
pub mod workflow;

pub use engine::{CancelRegistry, ReplayEngine, ReplayOptions, RunExecutor};
pub use error::{Error, Result};
pub use journal::{Event, EventJournal, EventType, ServerLog};
pub use observer::{ObserverEvent, RunObserver};
pub use runner::{StepOutput, StepRegistry, StepRunner};
pub use store::{ExportFormat, NodeExecution, Run, RunFilter, RunStatus, RunStore, StepStatus};
pub use workflow::{Edge, Node, Params, Trigger, Workflow};
