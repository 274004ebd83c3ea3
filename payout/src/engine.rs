//! Payout engine
//!
//! Evaluates the request ledger since the last payout, splits the reward
//! pool and hands the transfers to a [`TransferExecutor`]. Only transfers
//! that actually completed end up in the saved [`Payout`].

use crate::config::PayoutConfig;
use crate::display::{display_transactions_status, display_transfer_error};
use crate::distribution::{calculate_distribution, Distribution};
use crate::error::{PayoutError, Result};
use crate::transfer::{
    Payee, Recipient, TransferDetail, TransferError, TransferExecutor, TransferLog,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_core::{Amount, FeeRate, NodeId, Payout, Repos};
use fleet_nodes::RequestRecorder;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of one payout run
#[derive(Debug, Clone)]
pub struct PayoutReport {
    pub distribution: Distribution,
    pub transfers: Vec<TransferDetail>,
    /// Saved record, present when at least one transfer completed
    pub payout: Option<Payout>,
    /// Non-fatal transfer failure; `transfers` holds what went through
    pub error: Option<TransferError>,
}

/// Result of a scheduled check
#[derive(Debug)]
pub enum PayoutCheck {
    Triggered(JoinHandle<Result<PayoutReport>>),
    NotDue {
        last_payout: DateTime<Utc>,
        remaining_days: i64,
    },
    AlreadyRunning,
}

struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PayoutEngine {
    repos: Repos,
    config: PayoutConfig,
    fee: FeeRate,
    executor: Arc<dyn TransferExecutor>,
    running: Arc<AtomicBool>,
}

impl PayoutEngine {
    pub fn new(
        repos: Repos,
        config: PayoutConfig,
        fee: FeeRate,
        executor: Arc<dyn TransferExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(PayoutEngine {
            repos,
            config,
            fee,
            executor,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &PayoutConfig {
        &self.config
    }

    pub fn fee(&self) -> FeeRate {
        self.fee
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn try_start(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(Arc::clone(&self.running)))
    }

    /// Save a zero-amount payout if none exists yet, so scheduling has a
    /// starting point. Returns whether an anchor was written.
    pub fn ensure_anchor(&self, now: DateTime<Utc>) -> Result<bool> {
        ensure_anchor(&self.repos, now)
    }

    /// Whole days elapsed since the last payout, rounded down
    pub fn days_since_last_payout(&self, now: DateTime<Utc>) -> Result<(i64, DateTime<Utc>)> {
        let last = self.repos.payouts.find_latest_payout()?.timestamp;
        Ok(((now - last).num_days().max(0), last))
    }

    pub fn next_payout_date(&self) -> Result<DateTime<Utc>> {
        next_payout_date(&self.repos, self.config.interval_days)
    }

    /// Start a payout run in the background when the interval has elapsed.
    /// Never waits for the run itself.
    pub fn check_for_payout(self: &Arc<Self>, now: DateTime<Utc>) -> Result<PayoutCheck> {
        let (days, last_payout) = self.days_since_last_payout(now)?;
        let interval = self.config.interval_days as i64;

        if days < interval {
            let remaining_days = interval - days;
            info!(
                last_payout = %last_payout.format("%Y-%B-%d"),
                remaining_days,
                "payout not due yet"
            );
            return Ok(PayoutCheck::NotDue {
                last_payout,
                remaining_days,
            });
        }

        let Some(guard) = self.try_start() else {
            warn!("previous payout still running, skipping");
            return Ok(PayoutCheck::AlreadyRunning);
        };

        info!(days_since_last_payout = days, "starting automatic payout");
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = engine.execute(now).await;
            drop(guard);
            match &result {
                Ok(report) => match &report.error {
                    Some(e) => error!(error = %e, "payout finished with errors"),
                    None => info!(transfers = report.transfers.len(), "payout execution finished"),
                },
                Err(e) => error!(error = %e, "unable to execute payout"),
            }
            result
        });
        Ok(PayoutCheck::Triggered(handle))
    }

    /// Run one payout for the window ending at `now`
    pub async fn run_payout(&self, now: DateTime<Utc>) -> Result<PayoutReport> {
        let _guard = self.try_start().ok_or(PayoutError::AlreadyRunning)?;
        self.execute(now).await
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<PayoutReport> {
        let stats = RequestRecorder::new(self.repos.clone()).statistics_since_last_payout(now)?;
        let successful: BTreeMap<NodeId, u64> = stats
            .into_iter()
            .map(|(id, s)| (id, s.successful_requests))
            .collect();
        let distribution = calculate_distribution(self.config.total_reward, self.fee, &successful);

        if distribution.is_empty() {
            info!("no successful requests since last payout, nothing to distribute");
            return Ok(PayoutReport {
                distribution,
                transfers: Vec::new(),
                payout: None,
                error: None,
            });
        }

        let recipients = self.recipients(&distribution)?;
        let timeout = self.config.transfer_timeout;
        let log = TransferLog::new();
        let result = match tokio::time::timeout(
            timeout,
            self.executor
                .execute_payout(&self.config.credential, &recipients, &log),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // the run is dropped here, whatever it reported is already on chain
                let seen = log.snapshot();
                if seen.is_empty() {
                    return Err(PayoutError::Timeout(timeout));
                }
                warn!(completed = seen.len(), "transfer run timed out");
                Err(TransferError::partial(
                    format!("transfer run timed out after {}s", timeout.as_secs()),
                    seen,
                ))
            }
        };

        let (transfers, error) = match result {
            Ok(details) => (details, None),
            Err(e) => (e.completed.clone(), Some(e)),
        };

        if !transfers.is_empty() {
            display_transactions_status(&transfers);
        }
        if let Some(e) = &error {
            display_transfer_error(e);
        }

        let payout = if transfers.is_empty() {
            None
        } else {
            let payout = self.executed_payout(now, &distribution, &transfers);
            self.repos.payouts.save(&payout)?;
            info!(
                nodes = payout.distribution.len(),
                lb_fee = %payout.lb_fee,
                distributed = %payout.distributed(),
                "payout saved"
            );
            Some(payout)
        };

        Ok(PayoutReport {
            distribution,
            transfers,
            payout,
            error,
        })
    }

    fn recipients(&self, distribution: &Distribution) -> Result<Vec<Recipient>> {
        let mut recipients = Vec::with_capacity(distribution.shares.len() + 1);

        if let Some(fee_address) = &self.config.fee_address {
            if !distribution.lb_fee.is_zero() {
                recipients.push(Recipient {
                    payee: Payee::LoadBalancerFee,
                    address: fee_address.clone(),
                    amount: distribution.lb_fee,
                });
            }
        }

        for (node_id, amount) in &distribution.shares {
            if amount.is_zero() {
                continue;
            }
            match self.repos.nodes.find_by_id(node_id) {
                Ok(node) => recipients.push(Recipient {
                    payee: Payee::Node {
                        id: node_id.clone(),
                    },
                    address: node.payout_address,
                    amount: *amount,
                }),
                Err(e) if e.is_not_found() => {
                    warn!(node = %node_id, "node with recorded traffic no longer exists, skipping")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(recipients)
    }

    fn executed_payout(
        &self,
        now: DateTime<Utc>,
        distribution: &Distribution,
        transfers: &[TransferDetail],
    ) -> Payout {
        let mut paid: BTreeMap<NodeId, Amount> = BTreeMap::new();
        let mut fee_paid = Amount::ZERO;
        for transfer in transfers {
            match &transfer.payee {
                Payee::Node { id } => {
                    let entry = paid.entry(id.clone()).or_default();
                    *entry = entry.saturating_add(transfer.amount);
                }
                Payee::LoadBalancerFee => fee_paid = fee_paid.saturating_add(transfer.amount),
            }
        }

        // without a fee address the fee never leaves the load balancer wallet
        let lb_fee = match self.config.fee_address {
            Some(_) => fee_paid,
            None => distribution.lb_fee,
        };

        Payout {
            timestamp: now,
            total_reward: distribution.total_reward,
            lb_fee,
            distribution: paid,
            transactions: transfers.iter().map(|t| t.tx_hash.clone()).collect(),
        }
    }
}

/// Write the first payout anchor. It sits just before the earliest recorded
/// request, so traffic served before payouts were configured is still paid
/// by the first run. Without any traffic the anchor is `now`.
pub fn ensure_anchor(repos: &Repos, now: DateTime<Utc>) -> Result<bool> {
    match repos.payouts.find_latest_payout() {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => {
            let earliest = repos
                .records
                .find_in_interval(DateTime::<Utc>::MIN_UTC, now)?
                .into_iter()
                .map(|r| r.timestamp)
                .min();
            let anchor = match earliest {
                Some(first) => first - ChronoDuration::milliseconds(1),
                None => now,
            };
            repos.payouts.save(&Payout::anchor(anchor))?;
            info!(timestamp = %anchor, "saved initial payout anchor");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Date of the next scheduled payout: last payout plus the interval
pub fn next_payout_date(repos: &Repos, interval_days: u32) -> Result<DateTime<Utc>> {
    let last = repos.payouts.find_latest_payout()?;
    Ok(last.timestamp + ChronoDuration::days(interval_days as i64))
}
