use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::{CachePopulationJob, RunOutcome};
use crate::provider::{FeedbackSource, Registry};
use crate::store::SummaryStore;

/// Next daily tick at `run_at` (UTC) strictly after `now`.
pub fn next_run(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Spawns the daily cache population loop. With `run_on_start` the first run
/// happens immediately.
pub fn start<S, R, F>(
    job: Arc<CachePopulationJob<S, R, F>>,
    run_at: NaiveTime,
    run_on_start: bool,
) -> JoinHandle<()>
where
    S: SummaryStore + 'static,
    R: Registry + 'static,
    F: FeedbackSource + 'static,
{
    tokio::spawn(async move {
        if run_on_start {
            run_once(&job).await;
        }

        loop {
            let now = Utc::now();
            let next = next_run(now, run_at);
            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));
            info!(next_run = %next, "scheduled summary cache population");

            tokio::time::sleep(wait).await;
            run_once(&job).await;
        }
    })
}

async fn run_once<S, R, F>(job: &CachePopulationJob<S, R, F>)
where
    S: SummaryStore,
    R: Registry,
    F: FeedbackSource,
{
    info!("running summary cache population");
    match job.run().await {
        Ok(RunOutcome::Completed(report)) => info!(
            run_id = %report.run_id,
            documents_written = report.documents_written,
            failures = report.failures.len(),
            "summary cache population finished"
        ),
        Ok(RunOutcome::Skipped) => {}
        Err(err) => error!(error = %err, "summary cache population failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let run_at = NaiveTime::from_hms_opt(6, 30, 0).unwrap();

        let early = Utc.with_ymd_and_hms(2023, 5, 2, 4, 0, 0).unwrap();
        assert_eq!(next_run(early, run_at), Utc.with_ymd_and_hms(2023, 5, 2, 6, 30, 0).unwrap());

        let late = Utc.with_ymd_and_hms(2023, 5, 2, 6, 30, 0).unwrap();
        assert_eq!(next_run(late, run_at), Utc.with_ymd_and_hms(2023, 5, 3, 6, 30, 0).unwrap());
    }
}
