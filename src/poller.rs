use crate::config::Config;
use crate::gmail_hub;
use crate::mail::MailClient;
use crate::processor::{IngestSettings, MessageProcessor, ProcessOutcome};
use crate::store::Store;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Totals for one polling cycle, over one or many accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Messages that became application rows.
    pub parsed_count: usize,
    /// Distinct vacancies created during the cycle, in creation order.
    pub new_vacancy_titles: Vec<String>,
    /// Accounts whose message listing failed.
    pub failed_accounts: Vec<String>,
}

impl PollSummary {
    fn record(&mut self, outcome: &ProcessOutcome) {
        if !outcome.success() {
            return;
        }
        self.parsed_count += 1;
        if let (true, Some(title)) = (outcome.created_new_vacancy(), outcome.vacancy_title()) {
            self.push_title(title.to_string());
        }
    }

    fn push_title(&mut self, title: String) {
        if !self.new_vacancy_titles.contains(&title) {
            self.new_vacancy_titles.push(title);
        }
    }

    pub fn merge(&mut self, other: PollSummary) {
        self.parsed_count += other.parsed_count;
        for title in other.new_vacancy_titles {
            self.push_title(title);
        }
        self.failed_accounts.extend(other.failed_accounts);
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_accounts.is_empty()
    }
}

/// Polls the vendor notifications of a single mailbox.
pub struct AccountPoller {
    account_id: String,
    mail: Arc<dyn MailClient>,
    store: Arc<Store>,
    settings: Arc<IngestSettings>,
}

impl AccountPoller {
    pub fn new(
        account_id: impl Into<String>,
        mail: Arc<dyn MailClient>,
        store: Arc<Store>,
        settings: Arc<IngestSettings>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            mail,
            store,
            settings,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// One pass over every matching message. A failing message never stops
    /// the pass; a failing listing marks the account as failed.
    pub async fn poll_once(&self) -> PollSummary {
        let mut summary = PollSummary::default();

        let query = self.settings.vendor.search_query();
        let ids = match self.mail.list_messages(&query).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(account = %self.account_id, error = %e, "Failed to list messages");
                summary.failed_accounts.push(self.account_id.clone());
                return summary;
            }
        };
        info!(account = %self.account_id, count = ids.len(), "Found vendor messages");

        let processor = MessageProcessor::new(self.mail.as_ref(), &self.store, &self.settings, &self.account_id);
        for id in &ids {
            let outcome = processor.process(id).await;
            summary.record(&outcome);
        }

        info!(
            account = %self.account_id,
            parsed = summary.parsed_count,
            new_vacancies = summary.new_vacancy_titles.len(),
            "Poll complete"
        );
        summary
    }
}

/// Poll every account in order and merge the results.
pub async fn poll_all_accounts(pollers: &[AccountPoller]) -> PollSummary {
    let mut total = PollSummary::default();
    for poller in pollers {
        total.merge(poller.poll_once().await);
    }
    total
}

/// Build a poller for each enabled account. Accounts whose mailbox client
/// cannot be built are logged and left out.
pub async fn connect_enabled_accounts(cfg: &Config, store: Arc<Store>, force_refresh: bool) -> Vec<AccountPoller> {
    let settings = Arc::new(IngestSettings::from_config(cfg));
    let mut pollers = Vec::new();

    for account in cfg.enabled_accounts() {
        match gmail_hub::connect(account, force_refresh).await {
            Ok(client) => pollers.push(AccountPoller::new(
                account.id.clone(),
                Arc::new(client),
                Arc::clone(&store),
                Arc::clone(&settings),
            )),
            Err(e) => warn!(account = %account.id, error = %e, "Skipping account"),
        }
    }

    info!(connected = pollers.len(), "Accounts ready");
    pollers
}
