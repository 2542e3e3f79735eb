use crate::poller::{AccountPoller, PollSummary, poll_all_accounts};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs a polling cycle over all accounts, then sleeps, until stopped.
pub struct Scheduler {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    pollers: Vec<AccountPoller>,
    interval: Duration,
    retry_backoff: Duration,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(pollers: Vec<AccountPoller>, interval: Duration, retry_backoff: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pollers,
                interval,
                retry_backoff,
                running: AtomicBool::new(false),
                stop_tx,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run the loop on the current task until [`Scheduler::stop`] is called.
    /// Returns at once if a loop is already running.
    pub async fn start(&self) {
        if !self.is_running() {
            self.inner.stop_tx.send_replace(false);
        }
        Arc::clone(&self.inner).run().await;
    }

    /// Spawn the loop and return. A second call while the loop is alive
    /// does nothing.
    pub fn start_background(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("Scheduler already running in background");
            return;
        }
        self.inner.stop_tx.send_replace(false);
        *task = Some(tokio::spawn(Arc::clone(&self.inner).run()));
    }

    /// Ask the loop to stop and wait for it. The cycle in progress finishes
    /// its current account first.
    pub async fn stop(&self) {
        self.inner.stop_tx.send_replace(true);

        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    /// One immediate cycle outside the loop.
    pub async fn poll_now(&self) -> PollSummary {
        poll_all_accounts(&self.inner.pollers).await
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        let mut stop_rx = self.stop_tx.subscribe();

        info!(
            accounts = self.pollers.len(),
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        while !*stop_rx.borrow() {
            let summary = self.cycle().await;
            info!(
                parsed = summary.parsed_count,
                new_vacancies = ?summary.new_vacancy_titles,
                failed = ?summary.failed_accounts,
                "Cycle finished"
            );

            let delay = if summary.has_failures() {
                self.retry_backoff
            } else {
                self.interval
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.wait_for(|stop| *stop) => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
    }

    /// Like [`poll_all_accounts`], but gives up between accounts once a
    /// stop was requested.
    async fn cycle(&self) -> PollSummary {
        let mut total = PollSummary::default();
        for poller in &self.pollers {
            if *self.stop_tx.borrow() {
                info!(account = poller.account_id(), "Stop requested, ending cycle early");
                break;
            }
            debug!(account = poller.account_id(), "Polling account");
            total.merge(poller.poll_once().await);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::memory::{InMemoryMailbox, html_message};
    use crate::processor::IngestSettings;
    use crate::store::Store;

    fn scheduler(mailbox: Arc<InMemoryMailbox>, interval: u64, backoff: u64) -> Scheduler {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let settings = Arc::new(IngestSettings::default());
        let pollers = vec![AccountPoller::new("acc1", mailbox, store, settings)];
        Scheduler::new(pollers, Duration::from_secs(interval), Duration::from_secs(backoff))
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_polls_each_interval() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        let scheduler = scheduler(mailbox.clone(), 60, 5);

        scheduler.start_background();
        scheduler.start_background();
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        // Cycles at 0s, 60s and 120s.
        assert_eq!(mailbox.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_uses_backoff() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.set_fail_listing(true);
        let scheduler = scheduler(mailbox.clone(), 60, 5);

        scheduler.start_background();
        tokio::time::sleep(Duration::from_secs(12)).await;
        scheduler.stop().await;

        // Cycles at 0s, 5s and 10s.
        assert_eq!(mailbox.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        let scheduler = scheduler(mailbox.clone(), 60, 5);

        scheduler.start_background();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.stop().await;
        scheduler.start_background();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_running());
        scheduler.stop().await;

        assert_eq!(mailbox.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let scheduler = scheduler(Arc::new(InMemoryMailbox::new()), 60, 5);
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_poll_now() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.add_message(html_message(
            "m1",
            "noreply@somon.tj",
            "Отклик на вакансию - QA",
            "<p>Имя: A</p>",
        ));
        let scheduler = scheduler(mailbox.clone(), 60, 5);

        let summary = scheduler.poll_now().await;
        assert_eq!(summary.parsed_count, 1);
        assert_eq!(summary.new_vacancy_titles, vec!["QA".to_string()]);
        assert!(!scheduler.is_running());
    }
}
