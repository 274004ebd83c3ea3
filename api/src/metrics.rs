//! Prometheus metrics
//!
//! All metrics live in one explicitly built [`FleetMetrics`] registry. The
//! values are refreshed by background pollers over the repositories, each on
//! its own interval.

use chrono::Utc;
use fleet_core::{Amount, FeeRate, RepeatingTask, Repos};
use fleet_nodes::RequestRecorder;
use fleet_payout::{calculate_distribution, next_payout_date};
use futures::FutureExt;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub const FEE_STATS_INTERVAL_ENV: &str = "PROM_FEE_STATS_INTERVAL";
pub const NODE_STATS_INTERVAL_ENV: &str = "PROM_NODE_STATS_INTERVAL";
pub const REQUEST_STATS_INTERVAL_ENV: &str = "PROM_REQUEST_STATS_INTERVAL";
pub const PAYOUT_STATS_INTERVAL_ENV: &str = "PROM_PAYOUT_STATS_INTERVAL";

const NEXT_PAYOUT_DATE_FORMAT: &str = "%a, %b %-d %Y.";
const PAYOUT_DATE_FORMAT: &str = "%Y-%B-%d";

/// Distribution share gauges are computed on this reference pool
const REFERENCE_REWARD: u64 = 100;

type Labels = Vec<(String, String)>;
type FloatGauge = Gauge<f64, AtomicU64>;

/// Parse `15s`, `1m`, `12h` style durations
pub fn parse_interval(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (number, multiplier) = if let Some(n) = value.strip_suffix('s') {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3600)
    } else {
        return None;
    };
    let secs = number.parse::<u64>().ok()?.checked_mul(multiplier)?;
    (secs > 0).then_some(Duration::from_secs(secs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub fee_stats: Duration,
    pub node_stats: Duration,
    pub request_stats: Duration,
    pub payout_stats: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        PollIntervals {
            fee_stats: Duration::from_secs(12 * 60 * 60),
            node_stats: Duration::from_secs(15),
            request_stats: Duration::from_secs(15),
            payout_stats: Duration::from_secs(60),
        }
    }
}

impl PollIntervals {
    /// Defaults overridden by the `PROM_*_INTERVAL` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str, default: Duration| match lookup(key) {
            Some(raw) => parse_interval(&raw).unwrap_or_else(|| {
                warn!(variable = key, value = %raw, "invalid interval, using default");
                default
            }),
            None => default,
        };

        PollIntervals {
            fee_stats: read(FEE_STATS_INTERVAL_ENV, defaults.fee_stats),
            node_stats: read(NODE_STATS_INTERVAL_ENV, defaults.node_stats),
            request_stats: read(REQUEST_STATS_INTERVAL_ENV, defaults.request_stats),
            payout_stats: read(PAYOUT_STATS_INTERVAL_ENV, defaults.payout_stats),
        }
    }
}

pub struct FleetMetrics {
    registry: Registry,
    active_nodes: Gauge,
    penalized_nodes: Gauge,
    successful_requests: Gauge,
    failed_requests: Gauge,
    payout_distribution: Family<Labels, FloatGauge>,
    payout_date: Family<Labels, Gauge>,
    lb_payout_fee: Family<Labels, FloatGauge>,
    lb_payout_fee_total: FloatGauge,
}

impl FleetMetrics {
    pub fn new(fee: FeeRate) -> Self {
        let mut registry = Registry::with_prefix("fleetlb");

        registry.register(
            "version",
            "Version of the load balancer",
            Info::new(vec![(
                "fleetlb_version".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            )]),
        );

        let fee_percentage: Family<Labels, FloatGauge> = Family::default();
        registry.register(
            "lb_payout_fee_total_percentage",
            "Percentage of the reward that goes to the load balancer",
            fee_percentage.clone(),
        );
        fee_percentage
            .get_or_create(&vec![(
                "lb_fee".to_string(),
                format!("{}%", fee.as_fraction() * 100.0),
            )])
            .set(fee.as_fraction());

        let active_nodes = Gauge::default();
        registry.register(
            "number_of_active_nodes",
            "The total number of active nodes serving requests",
            active_nodes.clone(),
        );
        let penalized_nodes = Gauge::default();
        registry.register(
            "number_of_penalized_nodes",
            "The total number of nodes which are on cooldown",
            penalized_nodes.clone(),
        );
        let successful_requests = Gauge::default();
        registry.register(
            "number_of_successful_requests",
            "The total number of successful requests served",
            successful_requests.clone(),
        );
        let failed_requests = Gauge::default();
        registry.register(
            "number_of_failed_requests",
            "The total number of failed requests",
            failed_requests.clone(),
        );
        let payout_distribution = Family::default();
        registry.register(
            "payout_distribution",
            "Share of a reward of 100 each node would receive right now",
            payout_distribution.clone(),
        );
        let payout_date = Family::default();
        registry.register(
            "payout_date",
            "Date of the next scheduled payout",
            payout_date.clone(),
        );
        let lb_payout_fee = Family::default();
        registry.register(
            "lb_payout_fee",
            "Load balancer fee of each payout",
            lb_payout_fee.clone(),
        );
        let lb_payout_fee_total = FloatGauge::default();
        registry.register(
            "lb_payout_fee_total",
            "Total fee collected by the load balancer",
            lb_payout_fee_total.clone(),
        );

        FleetMetrics {
            registry,
            active_nodes,
            penalized_nodes,
            successful_requests,
            failed_requests,
            payout_distribution,
            payout_date,
            lb_payout_fee,
            lb_payout_fee_total,
        }
    }

    /// OpenMetrics text exposition
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    pub fn refresh_node_stats(&self, repos: &Repos) {
        match repos.nodes.get_all_active_nodes() {
            Ok(nodes) => {
                self.active_nodes.set(nodes.len() as i64);
            }
            Err(e) => error!(error = %e, "failed to count active nodes"),
        }
        match repos.nodes.get_penalized_nodes() {
            Ok(nodes) => {
                self.penalized_nodes.set(nodes.len() as i64);
            }
            Err(e) => error!(error = %e, "failed to count penalized nodes"),
        }
    }

    pub fn refresh_request_stats(&self, repos: &Repos) {
        match repos.records.count_successful_requests() {
            Ok(count) => {
                self.successful_requests.set(count as i64);
            }
            Err(e) => error!(error = %e, "failed to count successful requests"),
        }
        match repos.records.count_failed_requests() {
            Ok(count) => {
                self.failed_requests.set(count as i64);
            }
            Err(e) => error!(error = %e, "failed to count failed requests"),
        }
    }

    pub fn refresh_payout_distribution(&self, repos: &Repos, fee: FeeRate) {
        let stats = match RequestRecorder::new(repos.clone()).statistics_since_last_payout(Utc::now())
        {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "failed recording payout distribution");
                return;
            }
        };
        let successful: BTreeMap<_, _> = stats
            .into_iter()
            .map(|(id, s)| (id, s.successful_requests))
            .collect();
        let distribution =
            calculate_distribution(Amount::from_tokens(REFERENCE_REWARD), fee, &successful);

        self.payout_distribution.clear();
        for (node_id, share) in distribution.shares {
            self.payout_distribution
                .get_or_create(&vec![("node".to_string(), node_id)])
                .set(share.as_tokens_f64());
        }
    }

    pub fn refresh_payout_date(&self, repos: &Repos, interval_days: Option<u32>) {
        let label = match interval_days.map(|days| next_payout_date(repos, days)) {
            Some(Ok(date)) => date.format(NEXT_PAYOUT_DATE_FORMAT).to_string(),
            Some(Err(e)) => {
                warn!(error = %e, "failed to compute next payout date");
                return;
            }
            None => "Scheduled payout not configured".to_string(),
        };
        self.payout_date.clear();
        self.payout_date
            .get_or_create(&vec![("date".to_string(), label)])
            .set(1);
    }

    pub fn refresh_fee_stats(&self, repos: &Repos) {
        let payouts = match repos.payouts.get_all() {
            Ok(payouts) => payouts,
            Err(e) => {
                error!(error = %e, "failed recording payout fee stats");
                return;
            }
        };
        let mut total = Amount::ZERO;
        for payout in payouts {
            if !payout.lb_fee.is_zero() {
                self.lb_payout_fee
                    .get_or_create(&vec![(
                        "date".to_string(),
                        payout.timestamp.format(PAYOUT_DATE_FORMAT).to_string(),
                    )])
                    .set(payout.lb_fee.as_tokens_f64());
            }
            total = total.saturating_add(payout.lb_fee);
        }
        self.lb_payout_fee_total.set(total.as_tokens_f64());
    }
}

/// Read-only inputs of the metrics pollers
#[derive(Clone)]
pub struct MetricsSources {
    pub repos: Repos,
    pub fee: FeeRate,
    pub payout_interval_days: Option<u32>,
}

/// Start one repeating poller per metric group. Every group is refreshed
/// once right away.
pub fn start_pollers(
    metrics: Arc<FleetMetrics>,
    sources: MetricsSources,
    intervals: PollIntervals,
) -> Vec<RepeatingTask> {
    metrics.refresh_node_stats(&sources.repos);
    metrics.refresh_request_stats(&sources.repos);
    metrics.refresh_payout_distribution(&sources.repos, sources.fee);
    metrics.refresh_payout_date(&sources.repos, sources.payout_interval_days);
    metrics.refresh_fee_stats(&sources.repos);

    let poller = |name: &str, period: Duration, refresh: fn(&FleetMetrics, &MetricsSources)| {
        let metrics = metrics.clone();
        let sources = sources.clone();
        RepeatingTask::spawn(name, period, move || {
            let metrics = metrics.clone();
            let sources = sources.clone();
            async move { refresh(&metrics, &sources) }.boxed()
        })
    };

    vec![
        poller("metrics-nodes", intervals.node_stats, |m, s| {
            m.refresh_node_stats(&s.repos)
        }),
        poller("metrics-requests", intervals.request_stats, |m, s| {
            m.refresh_request_stats(&s.repos)
        }),
        poller("metrics-distribution", intervals.payout_stats, |m, s| {
            m.refresh_payout_distribution(&s.repos, s.fee)
        }),
        poller("metrics-payout-date", intervals.fee_stats, |m, s| {
            m.refresh_payout_date(&s.repos, s.payout_interval_days)
        }),
        poller("metrics-fees", intervals.fee_stats, |m, s| {
            m.refresh_fee_stats(&s.repos)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use fleet_core::{Node, NodeStatus, Payout, Record};

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("15s"), Some(Duration::from_secs(15)));
        assert_eq!(parse_interval("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_interval("12h"), Some(Duration::from_secs(43200)));
        assert_eq!(parse_interval("0s"), None);
        assert_eq!(parse_interval("10"), None);
        assert_eq!(parse_interval("fast"), None);
        assert_eq!(parse_interval(""), None);
    }

    #[test]
    fn test_intervals_from_lookup() {
        let intervals = PollIntervals::from_lookup(|key| match key {
            NODE_STATS_INTERVAL_ENV => Some("5s".to_string()),
            PAYOUT_STATS_INTERVAL_ENV => Some("garbage".to_string()),
            _ => None,
        });
        assert_eq!(intervals.node_stats, Duration::from_secs(5));
        assert_eq!(intervals.payout_stats, Duration::from_secs(60));
        assert_eq!(intervals.fee_stats, Duration::from_secs(12 * 3600));
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        let metrics = FleetMetrics::new(FeeRate::from_fraction(0.1).unwrap());
        let text = metrics.encode().unwrap();
        assert!(text.contains("fleetlb_version_info"));
        assert!(text.contains("fleetlb_number_of_active_nodes"));
        assert!(text.contains("lb_fee=\"10%\""));
    }

    #[test]
    fn test_refresh_from_repositories() {
        let repos = Repos::in_memory();
        let mut active = Node::new("a", "addr-a");
        active.status = NodeStatus::Active;
        let mut penalized = Node::new("b", "addr-b");
        penalized.status = NodeStatus::Penalized;
        repos.nodes.save(&active).unwrap();
        repos.nodes.save(&penalized).unwrap();

        let now = Utc::now();
        let mut payout = Payout::anchor(now - ChronoDuration::days(2));
        payout.lb_fee = Amount::from_tokens(10);
        repos.payouts.save(&payout).unwrap();
        for (node, success) in [("a", true), ("a", true), ("b", true), ("b", false)] {
            repos
                .records
                .save(&Record {
                    node_id: node.to_string(),
                    success,
                    timestamp: now - ChronoDuration::hours(1),
                })
                .unwrap();
        }

        let fee = FeeRate::from_fraction(0.1).unwrap();
        let metrics = FleetMetrics::new(fee);
        metrics.refresh_node_stats(&repos);
        metrics.refresh_request_stats(&repos);
        metrics.refresh_payout_distribution(&repos, fee);
        metrics.refresh_payout_date(&repos, Some(7));
        metrics.refresh_fee_stats(&repos);

        assert_eq!(metrics.active_nodes.get(), 1);
        assert_eq!(metrics.penalized_nodes.get(), 1);
        assert_eq!(metrics.successful_requests.get(), 3);
        assert_eq!(metrics.failed_requests.get(), 1);
        assert_eq!(metrics.lb_payout_fee_total.get(), 10.0);

        let a_share = metrics
            .payout_distribution
            .get_or_create(&vec![("node".to_string(), "a".to_string())])
            .get();
        assert_eq!(a_share, 60.0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("fleetlb_payout_date{date="));
    }

    #[test]
    fn test_payout_date_without_schedule() {
        let metrics = FleetMetrics::new(FeeRate::default());
        metrics.refresh_payout_date(&Repos::in_memory(), None);
        let text = metrics.encode().unwrap();
        assert!(text.contains("Scheduled payout not configured"));
    }
}
