use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::AppState;

use super::{run_sweeps, Sweep, SweepReport};

/// Periodic trigger for the automation sweeps.
pub struct AutomationWorker {
    state: Arc<AppState>,
    sweeps: Vec<Arc<dyn Sweep>>,
    interval: Duration,
}

impl AutomationWorker {
    pub fn new(state: Arc<AppState>, sweeps: Vec<Arc<dyn Sweep>>, interval: Duration) -> Self {
        Self {
            state,
            sweeps,
            interval,
        }
    }

    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            sweeps = self.sweeps.len(),
            "automation worker started"
        );
        loop {
            self.tick().await;
            sleep(self.interval).await;
        }
    }

    pub async fn tick(&self) -> SweepReport {
        let report = run_sweeps(self.state.clone(), &self.sweeps, Utc::now().naive_utc()).await;
        if report.failed.is_empty() {
            info!(total = report.total(), results = ?report.results, "automation pass finished");
        } else {
            warn!(failed = ?report.failed, results = ?report.results, "automation pass finished with failures");
        }
        report
    }
}
