//! A few tagged tasks on the Tokio context, paused and cancelled in bulk.
//!
//! Run with `RUST_LOG=cadence_scheduler=debug` to watch the state machine.

use std::time::Duration;

use cadence_core::{logging, CadenceConfig};
use cadence_scheduler::{Interval, Schedule, Task, TaskCenter, TokioContext};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CadenceConfig::load(None)?;
    logging::init(&config.logging)?;
    cadence_scheduler::apply_config(&config);

    let ctx = TokioContext::try_current()?;
    let center = TaskCenter::new();

    let heartbeat = Task::with_center(
        Schedule::every(Interval::milliseconds(500)),
        &ctx,
        |task| info!(count = task.execution_count(), "heartbeat"),
        &center,
    );
    let report = Task::with_center(
        Schedule::after_repeating(Interval::seconds(1), Interval::seconds(2)),
        &ctx,
        |task| info!(at = ?task.last_execution(), "report"),
        &center,
    );
    center.add_tag(&heartbeat, "periodic");
    center.add_tag(&report, "periodic");

    tokio::time::sleep(Duration::from_secs(3)).await;
    info!(paused = center.suspend_by_tag("periodic"), "pausing");
    tokio::time::sleep(Duration::from_secs(2)).await;
    center.resume_by_tag("periodic");
    tokio::time::sleep(Duration::from_secs(2)).await;
    center.cancel_by_tag("periodic");

    info!(
        heartbeats = heartbeat.execution_count(),
        reports = report.execution_count(),
        "done"
    );
    Ok(())
}
