use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::services::{AbortFlag, BackfillService, RunSummary};
use crate::source::{CursorSource, ReadingSink, StationSource};
use crate::trend::DeltaSampler;

/// Re-run the backfill every `interval` until `abort` is set
///
/// The first run starts immediately. Each run resumes from the stored
/// cursors, so a tick that finds nothing missing is cheap.
#[instrument(skip(service, abort, on_summary), fields(interval_secs = interval.as_secs()))]
pub async fn start_backfill_scheduler<St, Cu, Si, S, F>(
    mut service: BackfillService<St, Cu, Si, S>,
    interval: Duration,
    abort: AbortFlag,
    mut on_summary: F,
) -> usize
where
    St: StationSource,
    Cu: CursorSource,
    Si: ReadingSink,
    S: DeltaSampler,
    F: FnMut(&RunSummary),
{
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Backfill scheduler started with {}s interval", interval.as_secs());

    let mut runs = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = abort.aborted() => break,
        }
        debug!("Scheduler tick - starting backfill");

        match service.run(Utc::now()).await {
            Ok(summary) => {
                runs += 1;
                if summary.inserted() > 0 {
                    info!("Stored {} new readings", summary.inserted());
                } else {
                    debug!("No missing intervals");
                }
                on_summary(&summary);
                if summary.aborted {
                    break;
                }
            }
            Err(e) => {
                error!("Backfill run failed: {}", e);
            }
        }
    }

    info!(runs, "Backfill scheduler stopped");
    runs
}
