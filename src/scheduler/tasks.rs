use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::relay::Relay;
use crate::scheduler::Scheduler;

/// Register the poll job and the heartbeat.
///
/// The first poll cycle runs right away, the rest on every `poll_interval`.
pub async fn register_builtin_tasks(
    scheduler: &mut Scheduler,
    relay: Arc<Relay>,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    let poll_relay = Arc::clone(&relay);
    scheduler.add_interval_job(poll_interval, "poll-messages", move || {
        let relay = Arc::clone(&poll_relay);
        Box::pin(async move {
            relay.run_cycle().await;
        })
    })?;

    // Hourly heartbeat with the current cursor
    scheduler
        .add_cron_job("0 0 * * * *", "heartbeat", move || {
            let relay = Arc::clone(&relay);
            Box::pin(async move {
                info!("Heartbeat: relay is alive (cursor {})", relay.cursor().await);
            })
        })
        .await?;

    Ok(())
}
