use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bolao::dezena;
use crate::bolao::matcher::PoolSummary;
use crate::db::models::{Draw, Pool, PoolDraw};
use crate::db::Database;
use crate::lottery::DrawSource;
use crate::notify::{message, Links, Mailer};

/// Counters for a single poll tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// External API calls made
    pub fetches: usize,
    /// Draws inserted or corrected
    pub stored: usize,
    /// Subscribers successfully notified
    pub notified: usize,
    /// Subscribers whose mail failed (retried next tick)
    pub failed: usize,
}

/// Keeps local draws in sync with the lottery API and notifies subscribers
/// once their pool's concurso is known.
pub struct DrawPoller {
    db: Database,
    source: Arc<dyn DrawSource>,
    mailer: Arc<dyn Mailer>,
    links: Links,
    poll_interval: Duration,
}

/// Owner of a running poller task. Dropping it also stops the task.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal shutdown and wait for the current tick to finish
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("Draw poller task panicked")?;
        Ok(())
    }
}

impl DrawPoller {
    pub fn new(
        db: Database,
        source: Arc<dyn DrawSource>,
        mailer: Arc<dyn Mailer>,
        links: Links,
        poll_interval: Duration,
    ) -> Self {
        DrawPoller {
            db,
            source,
            mailer,
            links,
            poll_interval,
        }
    }

    /// Spawn the polling loop. Each tick is independent: failures are
    /// logged and the next tick runs as usual.
    pub fn start(self) -> PollerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!(
                "Draw poller started (source={}, mailer={}, interval={:?})",
                self.source.name(),
                self.mailer.name(),
                self.poll_interval
            );
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.poll_once().await;
                        debug!("Poll tick finished: {:?}", report);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Draw poller stopped");
        });
        PollerHandle { shutdown, task }
    }

    /// One poll tick: fetch when some pool is waiting on a draw, store it,
    /// then notify every verified subscriber still owed a result.
    pub async fn poll_once(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut handled = HashSet::new();

        match self.db.list_pools_missing_draw() {
            Ok(pending) if pending.is_empty() => {
                debug!("No pools waiting for a draw, skipping fetch");
            }
            Ok(pending) => {
                self.fetch_pending(&pending, &mut handled, &mut report).await;
            }
            Err(e) => {
                error!("Failed to list pools waiting for a draw: {:#}", e);
                return report;
            }
        }

        if let Err(e) = self.notify_resolved(&handled, &mut report).await {
            error!("Notification sweep failed: {:#}", e);
        }
        report
    }

    async fn fetch_pending(
        &self,
        pending: &[Pool],
        handled: &mut HashSet<i64>,
        report: &mut TickReport,
    ) {
        info!("{} pool(s) waiting for a draw, fetching latest result", pending.len());

        report.fetches += 1;
        let latest = match self.source.fetch_latest().await {
            Ok(f) => f,
            Err(e) => {
                warn!("Fetching latest draw from {} failed: {:#}", self.source.name(), e);
                return;
            }
        };
        info!(
            "Latest draw is concurso {} ({}); next is {} on {}",
            latest.draw.number, latest.draw.date, latest.next_draw, latest.next_draw_date
        );
        let latest_number = latest.draw.number;
        self.store_and_notify(latest.draw, handled, report).await;

        // Targets below the latest concurso were already drawn and will never
        // show up as "latest" again, so fetch them by number.
        let past_targets: BTreeSet<i64> = pending
            .iter()
            .map(|p| p.target_draw)
            .filter(|&t| t < latest_number)
            .collect();
        for target in past_targets {
            report.fetches += 1;
            match self.source.fetch_draw(target).await {
                Ok(f) if f.draw.number == target => {
                    self.store_and_notify(f.draw, handled, report).await;
                }
                Ok(f) => warn!(
                    "Asked {} for concurso {} but got {}",
                    self.source.name(),
                    target,
                    f.draw.number
                ),
                Err(e) => warn!("Fetching concurso {} failed: {:#}", target, e),
            }
        }
    }

    async fn store_and_notify(
        &self,
        draw: Draw,
        handled: &mut HashSet<i64>,
        report: &mut TickReport,
    ) {
        // Also keeps the sweep away from this concurso when the write fails
        handled.insert(draw.number);
        match self.db.upsert_draw(&draw) {
            Ok(true) => {
                info!("Stored draw {}: {}", draw.number, dezena::display(&draw.numbers));
                report.stored += 1;
            }
            Ok(false) => debug!("Draw {} unchanged", draw.number),
            Err(e) => {
                error!("Failed to store draw {}: {:#}", draw.number, e);
                return;
            }
        }

        let pools = match self.db.list_pools_for_draw(draw.number) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to list pools for draw {}: {:#}", draw.number, e);
                return;
            }
        };
        for pool in pools {
            let pool_id = pool.id.clone();
            if let Err(e) = self.notify_pool(pool, &draw, report).await {
                error!("Error notifying pool {}: {:#}", pool_id, e);
            }
        }
    }

    /// Retry sweep over every resolved pool, local data only. Picks up mail
    /// failures from earlier ticks and draws entered by hand.
    async fn notify_resolved(&self, handled: &HashSet<i64>, report: &mut TickReport) -> Result<()> {
        for pool in self.db.list_resolved_pools()? {
            if handled.contains(&pool.target_draw) {
                continue;
            }
            let draw = match self.db.pool_draw(&pool)? {
                PoolDraw::Resolved(draw) => draw,
                PoolDraw::Pending { .. } => continue,
            };
            let pool_id = pool.id.clone();
            if let Err(e) = self.notify_pool(pool, &draw, report).await {
                error!("Error notifying pool {}: {:#}", pool_id, e);
            }
        }
        Ok(())
    }

    async fn notify_pool(&self, pool: Pool, draw: &Draw, report: &mut TickReport) -> Result<()> {
        let subscribers = self
            .db
            .list_verified_subscribers_pending_notification(&pool.id, draw.number)?;
        if subscribers.is_empty() {
            return Ok(());
        }

        let games = self.db.list_games(&pool.id)?;
        let summary = PoolSummary::build(pool, PoolDraw::Resolved(draw.clone()), games);
        info!(
            "Notifying {} subscriber(s) of pool {} about concurso {} (best: {:?}, achievement: {:?})",
            subscribers.len(),
            summary.pool.id,
            draw.number,
            summary.max_hits,
            summary.achievement
        );

        for subscriber in subscribers {
            let msg = message::draw_result(&summary, draw, &subscriber.email, &self.links)?;
            match self.mailer.send(&msg).await {
                Ok(()) => {
                    // A failure here only means a duplicate mail next tick
                    if let Err(e) = self.db.mark_notified(subscriber.id, draw.number) {
                        error!("Failed to mark subscriber {} notified: {:#}", subscriber.id, e);
                    } else {
                        report.notified += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "Mail to {} about concurso {} failed: {:#}",
                        subscriber.email, draw.number, e
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Subscriber;
    use crate::lottery::provider::FetchedDraw;
    use crate::notify::MailMessage;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DRAWN: [&str; 6] = ["04", "08", "15", "16", "23", "42"];

    fn fetched(number: i64, values: &[&str]) -> FetchedDraw {
        FetchedDraw {
            draw: Draw {
                number,
                numbers: dezena::parse_draw(values).unwrap(),
                date: "30/03/2024".into(),
                updated_at: Utc::now(),
            },
            next_draw: number + 1,
            next_draw_date: "02/04/2024".into(),
        }
    }

    #[derive(Default)]
    struct MockSource {
        latest: Mutex<Option<FetchedDraw>>,
        by_number: Mutex<HashMap<i64, FetchedDraw>>,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn with_latest(draw: FetchedDraw) -> Arc<Self> {
            let source = MockSource::default();
            *source.latest.lock().unwrap() = Some(draw);
            Arc::new(source)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DrawSource for MockSource {
        async fn fetch_latest(&self) -> Result<FetchedDraw> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.latest
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }

        async fn fetch_draw(&self, number: i64) -> Result<FetchedDraw> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.by_number
                .lock()
                .unwrap()
                .get(&number)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found"))
        }

        fn name(&self) -> &str {
            "MockSource"
        }
    }

    #[derive(Default)]
    struct MockMailer {
        sent: Mutex<Vec<MailMessage>>,
        failing: Mutex<HashSet<String>>,
    }

    impl MockMailer {
        fn sent_to(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, message: &MailMessage) -> Result<()> {
            if self.failing.lock().unwrap().contains(&message.to) {
                anyhow::bail!("mail API error 503");
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "MockMailer"
        }
    }

    fn poller(db: &Database, source: Arc<MockSource>, mailer: Arc<MockMailer>) -> DrawPoller {
        DrawPoller::new(
            db.clone(),
            source,
            mailer,
            Links::new("https://bolao.example.com").unwrap(),
            Duration::from_millis(10),
        )
    }

    fn verified(db: &Database, pool_id: &str, email: &str) -> Subscriber {
        let sub = db.subscribe(pool_id, email).unwrap();
        db.verify_subscriber(sub.verify_token.as_deref().unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_pending_pools_means_no_fetch() {
        let db = Database::open_in_memory().unwrap();
        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report, TickReport::default());
        assert_eq!(source.calls(), 0);

        // A resolved pool does not trigger a fetch either
        db.create_pool(None, 2700).unwrap();
        db.upsert_draw(&fetched(2700, &DRAWN).draw).unwrap();
        poller.poll_once().await;
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_poll_stores_draw_and_notifies_verified() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(Some("Firma"), 2700).unwrap();
        db.add_game(&pool.id, &pool.edit_token, &DRAWN).unwrap();
        verified(&db, &pool.id, "ana@example.com");
        db.subscribe(&pool.id, "bia@example.com").unwrap();

        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report.fetches, 1);
        assert_eq!(report.stored, 1);
        assert_eq!(report.notified, 1);
        assert!(db.get_draw(2700).unwrap().is_some());
        assert_eq!(mailer.sent_to(), vec!["ana@example.com".to_string()]);
        assert!(mailer.sent.lock().unwrap()[0].subject.contains("SENA"));

        // Second tick: pool resolved, nothing owed
        let report = poller.poll_once().await;
        assert_eq!(report, TickReport::default());
        assert_eq!(source.calls(), 1);
        assert_eq!(mailer.sent_to().len(), 1);
    }

    #[tokio::test]
    async fn test_latest_for_other_draw_keeps_pool_pending() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(None, 2701).unwrap();
        verified(&db, &pool.id, "ana@example.com");

        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(
            db.pool_draw(&pool).unwrap(),
            PoolDraw::Pending { target: 2701 }
        );
        assert!(mailer.sent_to().is_empty());
    }

    #[tokio::test]
    async fn test_notified_subscriber_is_not_renotified() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(None, 100).unwrap();
        let sub = verified(&db, &pool.id, "ana@example.com");
        db.mark_notified(sub.id, 100).unwrap();
        db.upsert_draw(&fetched(100, &DRAWN).draw).unwrap();

        let source = MockSource::with_latest(fetched(101, &DRAWN));
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        // Draw 100 processed again: nothing sent
        poller.poll_once().await;
        assert!(mailer.sent_to().is_empty());

        // Pool moves on to 101: notified once 101 is fetched
        db.set_target_draw(&pool.id, &pool.edit_token, 101).unwrap();
        let report = poller.poll_once().await;
        assert_eq!(report.notified, 1);
        assert_eq!(mailer.sent_to(), vec!["ana@example.com".to_string()]);
        assert_eq!(
            db.list_subscribers(&pool.id).unwrap()[0].last_notified_draw,
            Some(101)
        );
    }

    #[tokio::test]
    async fn test_mail_failure_is_retried_next_tick() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(None, 2700).unwrap();
        verified(&db, &pool.id, "ana@example.com");
        verified(&db, &pool.id, "bia@example.com");

        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        let mailer = Arc::new(MockMailer::default());
        mailer
            .failing
            .lock()
            .unwrap()
            .insert("ana@example.com".into());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report.notified, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(mailer.sent_to(), vec!["bia@example.com".to_string()]);

        let subs = db.list_subscribers(&pool.id).unwrap();
        assert_eq!(subs[0].last_notified_draw, None);
        assert_eq!(subs[1].last_notified_draw, Some(2700));

        mailer.failing.lock().unwrap().clear();
        let report = poller.poll_once().await;
        assert_eq!(report.fetches, 0);
        assert_eq!(report.notified, 1);
        assert_eq!(source.calls(), 1);
        assert_eq!(
            mailer.sent_to(),
            vec!["bia@example.com".to_string(), "ana@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(None, 2700).unwrap();
        let source = Arc::new(MockSource::default());
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report.fetches, 1);
        assert_eq!(report.stored, 0);
        assert_eq!(
            db.pool_draw(&pool).unwrap(),
            PoolDraw::Pending { target: 2700 }
        );

        // Next tick recovers
        *source.latest.lock().unwrap() = Some(fetched(2700, &DRAWN));
        let report = poller.poll_once().await;
        assert_eq!(report.stored, 1);
        assert!(matches!(db.pool_draw(&pool).unwrap(), PoolDraw::Resolved(_)));
    }

    #[tokio::test]
    async fn test_failed_draw_write_skips_notification() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(None, 2700).unwrap();
        verified(&db, &pool.id, "ana@example.com");
        db.reject_draw_writes(true).unwrap();

        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(
            report,
            TickReport {
                fetches: 1,
                ..TickReport::default()
            }
        );
        assert!(mailer.sent_to().is_empty());
        assert!(db.get_draw(2700).unwrap().is_none());

        // Storage is back: the next tick stores and notifies
        db.reject_draw_writes(false).unwrap();
        let report = poller.poll_once().await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(mailer.sent_to(), vec!["ana@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_past_targets_are_fetched_by_number() {
        let db = Database::open_in_memory().unwrap();
        let old = db.create_pool(None, 2690).unwrap();
        let future = db.create_pool(None, 2705).unwrap();
        verified(&db, &old.id, "ana@example.com");

        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        source
            .by_number
            .lock()
            .unwrap()
            .insert(2690, fetched(2690, &["01", "02", "03", "04", "05", "06"]));
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report.fetches, 2);
        assert_eq!(report.stored, 2);
        assert_eq!(report.notified, 1);
        assert!(matches!(db.pool_draw(&old).unwrap(), PoolDraw::Resolved(_)));
        assert_eq!(
            db.pool_draw(&future).unwrap(),
            PoolDraw::Pending { target: 2705 }
        );
    }

    #[tokio::test]
    async fn test_manual_draw_is_announced_by_sweep() {
        let db = Database::open_in_memory().unwrap();
        let pool = db.create_pool(None, 2700).unwrap();
        verified(&db, &pool.id, "ana@example.com");
        db.upsert_draw(&fetched(2700, &DRAWN).draw).unwrap();

        let source = Arc::new(MockSource::default());
        let mailer = Arc::new(MockMailer::default());
        let poller = poller(&db, source.clone(), mailer.clone());

        let report = poller.poll_once().await;
        assert_eq!(report.notified, 1);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let db = Database::open_in_memory().unwrap();
        db.create_pool(None, 2700).unwrap();
        let source = MockSource::with_latest(fetched(2700, &DRAWN));
        let mailer = Arc::new(MockMailer::default());

        let handle = poller(&db, source.clone(), mailer).start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        assert!(source.calls() >= 1);
        assert!(db.get_draw(2700).unwrap().is_some());
    }
}
