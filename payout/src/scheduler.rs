//! Daily payout ticker

use crate::engine::PayoutEngine;
use chrono::Utc;
use fleet_core::RepeatingTask;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// How often the engine checks whether a payout is due
pub const PAYOUT_CHECK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

pub fn start_scheduled_payout(engine: Arc<PayoutEngine>) -> RepeatingTask {
    start_scheduled_payout_every(engine, PAYOUT_CHECK_PERIOD)
}

pub fn start_scheduled_payout_every(engine: Arc<PayoutEngine>, period: Duration) -> RepeatingTask {
    RepeatingTask::spawn("payout-scheduler", period, move || {
        let engine = engine.clone();
        async move {
            // a triggered run is detached and logs its own outcome
            if let Err(e) = engine.check_for_payout(Utc::now()) {
                error!(error = %e, "unable to calculate days since last payout");
            }
        }
        .boxed()
    })
}
