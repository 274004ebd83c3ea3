//! Request outcome ledger and per-node statistics

use crate::error::Result;
use chrono::{DateTime, Utc};
use fleet_core::{NodeId, Record, Repos};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Success and failure counts of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub successful_requests: u64,
    pub failed_requests: u64,
}

#[derive(Clone)]
pub struct RequestRecorder {
    repos: Repos,
}

impl RequestRecorder {
    pub fn new(repos: Repos) -> Self {
        RequestRecorder { repos }
    }

    /// Append the outcome of a routed request. Never fails the caller.
    pub fn record_outcome(&self, node_id: &str, success: bool) {
        self.record_outcome_at(node_id, success, Utc::now());
    }

    pub fn record_outcome_at(&self, node_id: &str, success: bool, timestamp: DateTime<Utc>) {
        let record = Record {
            node_id: node_id.to_string(),
            success,
            timestamp,
        };
        if let Err(e) = self.repos.records.save(&record) {
            warn!(node = %node_id, success, error = %e, "failed to save request record");
        }
    }

    pub fn count_successful(&self) -> Result<u64> {
        Ok(self.repos.records.count_successful_requests()?)
    }

    pub fn count_failed(&self) -> Result<u64> {
        Ok(self.repos.records.count_failed_requests()?)
    }

    /// Per-node counts over `(last payout, now]`.
    ///
    /// Without any payout the whole ledger up to `now` is counted.
    pub fn statistics_since_last_payout(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<NodeId, NodeStats>> {
        let since = match self.repos.payouts.find_latest_payout() {
            Ok(payout) => payout.timestamp,
            Err(e) if e.is_not_found() => DateTime::<Utc>::MIN_UTC,
            Err(e) => return Err(e.into()),
        };
        self.statistics_between(since, now)
    }

    pub fn statistics_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<NodeId, NodeStats>> {
        let mut stats: BTreeMap<NodeId, NodeStats> = BTreeMap::new();
        for record in self.repos.records.find_in_interval(from, to)? {
            let entry = stats.entry(record.node_id).or_default();
            if record.success {
                entry.successful_requests += 1;
            } else {
                entry.failed_requests += 1;
            }
        }
        Ok(stats)
    }
}
