use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_core::{Amount, FeeRate, Node, Payout, Record, Repos};
use fleet_payout::{
    ensure_anchor, next_payout_date, start_scheduled_payout, Credential, Payee, PayoutCheck,
    PayoutConfig, PayoutEngine, PayoutError, Recipient, TransferDetail, TransferError,
    TransferExecutor, TransferLog,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

enum Behavior {
    Succeed,
    /// Only the first `n` recipients go through
    FailAfter(usize),
    Hang,
    /// The first `n` recipients go through, then the run never finishes
    HangAfter(usize),
    WaitFor(Arc<Notify>),
}

struct MockExecutor {
    behavior: Behavior,
    calls: Mutex<Vec<Vec<Recipient>>>,
    notify: Option<mpsc::UnboundedSender<()>>,
}

impl MockExecutor {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(MockExecutor {
            behavior,
            calls: Mutex::new(Vec::new()),
            notify: None,
        })
    }

    fn detail(recipient: &Recipient, index: usize) -> TransferDetail {
        TransferDetail {
            payee: recipient.payee.clone(),
            address: recipient.address.clone(),
            amount: recipient.amount,
            tx_hash: format!("0x{:04}", index),
        }
    }
}

#[async_trait]
impl TransferExecutor for MockExecutor {
    async fn execute_payout(
        &self,
        _credential: &Credential,
        recipients: &[Recipient],
        log: &TransferLog,
    ) -> Result<Vec<TransferDetail>, TransferError> {
        self.calls.lock().push(recipients.to_vec());
        if let Some(tx) = &self.notify {
            let _ = tx.send(());
        }

        let details: Vec<TransferDetail> = recipients
            .iter()
            .enumerate()
            .map(|(i, r)| Self::detail(r, i))
            .collect();

        let sent = match &self.behavior {
            Behavior::FailAfter(n) | Behavior::HangAfter(n) => *n,
            Behavior::Hang => 0,
            _ => details.len(),
        };
        for detail in details.iter().take(sent) {
            log.record(detail.clone());
        }

        match &self.behavior {
            Behavior::Succeed => Ok(details),
            Behavior::FailAfter(n) => {
                let failed = &recipients[*n];
                Err(TransferError::partial(
                    format!("transfer to {} failed", failed.address),
                    details.into_iter().take(*n).collect(),
                ))
            }
            Behavior::Hang | Behavior::HangAfter(_) => {
                std::future::pending::<()>().await;
                Ok(details)
            }
            Behavior::WaitFor(notify) => {
                notify.notified().await;
                Ok(details)
            }
        }
    }
}

fn repos_with_nodes() -> Repos {
    let repos = Repos::in_memory();
    repos.nodes.save(&Node::new("A", "addr-a")).unwrap();
    repos.nodes.save(&Node::new("B", "addr-b")).unwrap();
    repos
}

fn record(repos: &Repos, node: &str, success: bool, at: DateTime<Utc>) {
    repos
        .records
        .save(&Record {
            node_id: node.to_string(),
            success,
            timestamp: at,
        })
        .unwrap();
}

/// Last payout five days ago; A served 3 requests and B one since then
fn traffic(repos: &Repos, now: DateTime<Utc>) {
    repos
        .payouts
        .save(&Payout::anchor(now - ChronoDuration::days(5)))
        .unwrap();
    let at = now - ChronoDuration::days(1);
    for _ in 0..3 {
        record(repos, "A", true, at);
    }
    record(repos, "B", true, at);
    record(repos, "B", false, at);
}

fn config(interval_days: u32) -> PayoutConfig {
    PayoutConfig::new(
        interval_days,
        Amount::from_tokens(100),
        "lb-addr",
        Credential::new("secret"),
    )
}

fn engine(repos: &Repos, config: PayoutConfig, executor: Arc<MockExecutor>) -> Arc<PayoutEngine> {
    Arc::new(
        PayoutEngine::new(
            repos.clone(),
            config,
            FeeRate::from_fraction(0.1).unwrap(),
            executor,
        )
        .unwrap(),
    )
}

fn tokens(s: &str) -> Amount {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_payout_triggers_when_interval_elapsed() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let executor = MockExecutor::new(Behavior::Succeed);
    let engine = engine(&repos, config(5), executor.clone());

    let handle = match engine.check_for_payout(now).unwrap() {
        PayoutCheck::Triggered(handle) => handle,
        other => panic!("expected a payout run, got {:?}", other),
    };
    let report = handle.await.unwrap().unwrap();

    assert!(report.error.is_none());
    assert_eq!(executor.calls.lock().len(), 1);
    let payout = report.payout.unwrap();
    assert_eq!(payout.distribution["A"], tokens("67.5"));
    assert_eq!(payout.distribution["B"], tokens("22.5"));
    assert_eq!(payout.lb_fee, tokens("10"));
    assert_eq!(repos.payouts.find_latest_payout().unwrap(), payout);
}

#[tokio::test]
async fn test_payout_not_due_reports_remaining_days() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let executor = MockExecutor::new(Behavior::Succeed);
    let engine = engine(&repos, config(6), executor.clone());

    match engine.check_for_payout(now).unwrap() {
        PayoutCheck::NotDue { remaining_days, .. } => assert_eq!(remaining_days, 1),
        other => panic!("expected not due, got {:?}", other),
    }
    assert!(executor.calls.lock().is_empty());
}

#[tokio::test]
async fn test_fee_address_receives_fee_transfer() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let executor = MockExecutor::new(Behavior::Succeed);
    let engine = engine(&repos, config(5).with_fee_address("fee-addr"), executor.clone());

    let report = engine.run_payout(now).await.unwrap();

    let calls = executor.calls.lock();
    let recipients = &calls[0];
    assert_eq!(recipients[0].payee, Payee::LoadBalancerFee);
    assert_eq!(recipients[0].address, "fee-addr");
    assert_eq!(recipients[0].amount, tokens("10"));
    assert_eq!(recipients.len(), 3);
    assert_eq!(report.payout.unwrap().lb_fee, tokens("10"));
}

#[tokio::test]
async fn test_partial_payout_saves_only_executed_transfers() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    // A is paid, the transfer to B fails
    let executor = MockExecutor::new(Behavior::FailAfter(1));
    let engine = engine(&repos, config(5), executor);

    let report = engine.run_payout(now).await.unwrap();

    let error = report.error.unwrap();
    assert!(error.message.contains("addr-b"));
    assert_eq!(report.transfers.len(), 1);
    assert_eq!(report.transfers[0].address, "addr-a");

    let saved = repos.payouts.find_latest_payout().unwrap();
    assert_eq!(saved.timestamp, now);
    assert_eq!(saved.distribution.len(), 1);
    assert_eq!(saved.distribution["A"], tokens("67.5"));
    assert!(!saved.distribution.contains_key("B"));
    assert_eq!(saved.total_reward, Amount::from_tokens(100));
}

#[tokio::test]
async fn test_failed_payout_saves_nothing() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let executor = MockExecutor::new(Behavior::FailAfter(0));
    let engine = engine(&repos, config(5), executor);

    let report = engine.run_payout(now).await.unwrap();
    assert!(report.error.is_some());
    assert!(report.payout.is_none());
    assert_eq!(repos.payouts.get_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_traffic_makes_no_transfers() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    repos
        .payouts
        .save(&Payout::anchor(now - ChronoDuration::days(7)))
        .unwrap();
    record(&repos, "A", false, now - ChronoDuration::days(1));
    let executor = MockExecutor::new(Behavior::Succeed);
    let engine = engine(&repos, config(5), executor.clone());

    let report = engine.run_payout(now).await.unwrap();
    assert!(report.distribution.is_empty());
    assert!(report.payout.is_none());
    assert!(report.error.is_none());
    assert!(executor.calls.lock().is_empty());
}

#[tokio::test]
async fn test_overlapping_runs_are_refused() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let release = Arc::new(Notify::new());
    let executor = MockExecutor::new(Behavior::WaitFor(release.clone()));
    let engine = engine(&repos, config(5), executor);

    let handle = match engine.check_for_payout(now).unwrap() {
        PayoutCheck::Triggered(handle) => handle,
        other => panic!("expected a payout run, got {:?}", other),
    };
    assert!(matches!(
        engine.check_for_payout(now).unwrap(),
        PayoutCheck::AlreadyRunning
    ));
    assert!(matches!(
        engine.run_payout(now).await,
        Err(PayoutError::AlreadyRunning)
    ));

    release.notify_one();
    handle.await.unwrap().unwrap();
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_transfer_timeout() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let executor = MockExecutor::new(Behavior::Hang);
    let engine = engine(
        &repos,
        config(5).with_transfer_timeout(Duration::from_secs(600)),
        executor,
    );

    let result = engine.run_payout(now).await;
    assert!(matches!(result, Err(PayoutError::Timeout(_))));
    assert!(!engine.is_running());
    assert_eq!(repos.payouts.get_all().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_broadcast_saves_reported_transfers() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let executor = MockExecutor::new(Behavior::HangAfter(1));
    let engine = engine(
        &repos,
        config(5).with_transfer_timeout(Duration::from_secs(600)),
        executor.clone(),
    );

    let report = engine.run_payout(now).await.unwrap();
    let error = report.error.unwrap();
    assert!(error.message.contains("timed out"));
    assert_eq!(error.completed.len(), 1);

    let saved = repos.payouts.find_latest_payout().unwrap();
    assert_eq!(saved.timestamp, now);
    assert_eq!(saved.distribution.len(), 1);
    assert_eq!(saved.distribution["A"], tokens("67.5"));
    assert_eq!(saved.transactions, vec!["0x0000".to_string()]);

    // the window is closed, A is not paid twice
    let later = now + ChronoDuration::minutes(30);
    let rerun = engine.run_payout(later).await.unwrap();
    assert!(rerun.distribution.is_empty());
    assert_eq!(executor.calls.lock().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_transfer_program_is_not_paid_twice() {
    use fleet_payout::ScriptTransfer;

    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let detail = r#"{"payee":{"kind":"node","id":"A"},"address":"addr-a","amount":67500000000000,"tx_hash":"0xa"}"#;
    let script = format!("cat > /dev/null; echo '{}'; sleep 30", detail);
    let executor = Arc::new(ScriptTransfer::new("/bin/sh").with_args(["-c", script.as_str()]));
    let engine = Arc::new(
        PayoutEngine::new(
            repos.clone(),
            config(5).with_transfer_timeout(Duration::from_secs(1)),
            FeeRate::from_fraction(0.1).unwrap(),
            executor,
        )
        .unwrap(),
    );

    let report = engine.run_payout(now).await.unwrap();
    assert!(report.error.is_some());
    let saved = report.payout.unwrap();
    assert_eq!(saved.distribution["A"], tokens("67.5"));
    assert!(!saved.distribution.contains_key("B"));
    assert_eq!(saved.transactions, vec!["0xa".to_string()]);

    let rerun = engine
        .run_payout(now + ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert!(rerun.distribution.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_checks_daily() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    traffic(&repos, now);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let executor = Arc::new(MockExecutor {
        behavior: Behavior::Succeed,
        calls: Mutex::new(Vec::new()),
        notify: Some(tx),
    });
    let engine = engine(&repos, config(5), executor.clone());

    let task = start_scheduled_payout(engine);
    assert!(executor.calls.lock().is_empty());

    tokio::time::timeout(Duration::from_secs(25 * 60 * 60), rx.recv())
        .await
        .expect("payout should run on the first daily tick")
        .unwrap();
    assert_eq!(executor.calls.lock().len(), 1);

    task.shutdown().await;
}

#[test]
fn test_anchor_and_next_payout_date() {
    let repos = Repos::in_memory();
    let now = Utc::now();

    assert!(ensure_anchor(&repos, now).unwrap());
    assert!(!ensure_anchor(&repos, now + ChronoDuration::days(1)).unwrap());

    let anchor = repos.payouts.find_latest_payout().unwrap();
    assert_eq!(anchor.timestamp, now);
    assert!(anchor.distributed().is_zero());
    assert_eq!(
        next_payout_date(&repos, 7).unwrap(),
        now + ChronoDuration::days(7)
    );
}

#[tokio::test]
async fn test_anchor_covers_traffic_recorded_before_it() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    let served = now - ChronoDuration::hours(2);
    record(&repos, "A", true, served);
    record(&repos, "B", true, now - ChronoDuration::hours(1));

    assert!(ensure_anchor(&repos, now).unwrap());
    let anchor = repos.payouts.find_latest_payout().unwrap();
    assert!(anchor.timestamp < served);

    let executor = MockExecutor::new(Behavior::Succeed);
    let engine = engine(&repos, config(5), executor.clone());
    let report = engine.run_payout(now).await.unwrap();

    let payout = report.payout.unwrap();
    assert_eq!(payout.distribution["A"], tokens("45"));
    assert_eq!(payout.distribution["B"], tokens("45"));
    assert_eq!(executor.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_payout_without_history_pays_all_traffic() {
    let repos = repos_with_nodes();
    let now = Utc::now();
    record(&repos, "A", true, now - ChronoDuration::days(30));
    let executor = MockExecutor::new(Behavior::Succeed);
    let engine = engine(&repos, config(5), executor);

    let report = engine.run_payout(now).await.unwrap();
    assert_eq!(report.payout.unwrap().distribution["A"], tokens("90"));
    assert_eq!(repos.payouts.get_all().unwrap().len(), 1);
}
