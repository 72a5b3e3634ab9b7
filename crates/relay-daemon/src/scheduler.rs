//! Wall-clock cron-like trigger for the daily catalog refresh. Fires at
//! `04:59` JST; re-entrant calls (the trigger firing again while a refresh
//! is still running) are a no-op, per design.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Asia::Tokyo;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::catalog::CatalogFetcher;

/// Six-field cron (seconds included, `cron` crate's native format):
/// second=0, minute=59, hour=4, every day/month/weekday.
const DAILY_REFRESH_CRON: &str = "0 59 4 * * *";

pub struct Scheduler {
    refreshing: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the loop task that sleeps until the next `04:59 JST` boundary,
    /// runs `refresh_daily`, then re-evaluates. Returns a handle the caller
    /// can `.abort()` on shutdown.
    pub fn spawn_daily_refresh(
        &self,
        fetcher: Arc<CatalogFetcher>,
        area_ids: Vec<String>,
    ) -> JoinHandle<()> {
        let refreshing = self.refreshing.clone();
        let schedule = Schedule::from_str(DAILY_REFRESH_CRON).expect("cron expression is valid");

        tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&Tokyo);
                let Some(next) = schedule.after(&now).next() else {
                    warn!("scheduler: cron schedule produced no next fire time, stopping");
                    return;
                };

                let sleep_for = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
                tokio::time::sleep(sleep_for).await;

                if refreshing.swap(true, Ordering::SeqCst) {
                    info!("scheduler: refresh already in progress, skipping this tick");
                    continue;
                }

                info!("scheduler: running daily catalog refresh");
                if let Err(e) = fetcher.refresh_daily(&area_ids).await {
                    warn!("scheduler: daily refresh failed: {e}");
                }
                refreshing.store(false, Ordering::SeqCst);
            }
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_expression_parses() {
        Schedule::from_str(DAILY_REFRESH_CRON).expect("valid cron expression");
    }
}
