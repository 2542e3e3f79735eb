use crate::config::{AttachmentLinkConfig, Config, VendorConfig};
use crate::error::{IngestError, Result};
use crate::extract::{self, AttachmentRef};
use crate::mail::{MailClient, rendered_body};
use crate::store::{NewApplication, NewVacancy, Store};
use std::path::{Path, PathBuf};
use tracing::{Instrument, error, info, info_span, warn};

/// Stored in place of a name the body did not yield.
pub const UNKNOWN_APPLICANT: &str = "Unknown";

/// Result of handling one message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Stored {
        created_new_vacancy: bool,
        vacancy_title: Option<String>,
    },
    /// An application row already holds this message id.
    AlreadyProcessed,
    /// The application was soft-deleted and must not come back.
    Deleted,
    /// Not a vendor notification.
    Filtered,
    Failed,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Stored { .. })
    }

    pub fn created_new_vacancy(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::Stored {
                created_new_vacancy: true,
                ..
            }
        )
    }

    pub fn vacancy_title(&self) -> Option<&str> {
        match self {
            ProcessOutcome::Stored { vacancy_title, .. } => vacancy_title.as_deref(),
            _ => None,
        }
    }
}

/// The slice of [`Config`] that message handling needs.
#[derive(Debug, Clone, Default)]
pub struct IngestSettings {
    pub vendor: VendorConfig,
    pub links: AttachmentLinkConfig,
    pub downloads_dir: PathBuf,
}

impl IngestSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            vendor: cfg.vendor.clone(),
            links: cfg.attachment_links.clone(),
            downloads_dir: cfg.downloads_dir.clone(),
        }
    }
}

/// Turns one vendor notification into at most one application row.
pub struct MessageProcessor<'a> {
    mail: &'a dyn MailClient,
    store: &'a Store,
    settings: &'a IngestSettings,
    account_id: &'a str,
}

impl<'a> MessageProcessor<'a> {
    pub fn new(
        mail: &'a dyn MailClient,
        store: &'a Store,
        settings: &'a IngestSettings,
        account_id: &'a str,
    ) -> Self {
        Self {
            mail,
            store,
            settings,
            account_id,
        }
    }

    /// Never fails: every error is logged and reported as
    /// [`ProcessOutcome::Failed`].
    pub async fn process(&self, message_id: &str) -> ProcessOutcome {
        let span = info_span!("message", account = %self.account_id, id = %message_id);
        async {
            match self.try_process(message_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Processing failed");
                    ProcessOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_process(&self, message_id: &str) -> Result<ProcessOutcome> {
        // Checked before any network traffic.
        if let Some(existing) = self.store.find_application_by_message_id(message_id)? {
            if existing.state.is_deleted() {
                info!(application_id = existing.id, "Application was deleted, skipping");
                return Ok(ProcessOutcome::Deleted);
            }
            info!(application_id = existing.id, "Already processed");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let msg = self.mail.get_message(message_id).await?;
        let vendor = &self.settings.vendor;
        if !msg.sender().contains(&vendor.sender) || !msg.subject().starts_with(&vendor.subject_prefix) {
            info!(from = %msg.sender(), subject = %msg.subject(), "Not a vendor notification");
            return Ok(ProcessOutcome::Filtered);
        }

        let body = rendered_body(&msg.payload);
        let contact = body.as_deref().map(extract::extract).unwrap_or_default();
        let attachment = extract::locate(body.as_deref(), &msg.payload, &msg.id, &self.settings.links);

        let name = contact
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_APPLICANT.to_string());

        let file_path = match &attachment {
            AttachmentRef {
                attachment_id: Some(attachment_id),
                filename: Some(filename),
                ..
            } => self.download_resume(&msg.id, attachment_id, filename, &name).await,
            _ => None,
        };

        let title = extract::vacancy_title(msg.subject(), &vendor.subject_prefix);
        let vacancy = title.as_deref().map(|t| NewVacancy {
            title: t,
            description: vendor.describe_vacancy(t),
            account_id: Some(self.account_id),
        });

        let application = NewApplication {
            message_id: msg.id.clone(),
            name,
            email: contact.email,
            phone: contact.phone,
            message: contact.message,
            file_path,
            file_url: attachment.url,
            attachment_filename: attachment.filename,
        };

        let stored = match self.store.insert_application(&application, vacancy.as_ref()) {
            Ok(stored) => stored,
            Err(IngestError::Duplicate(_)) => {
                info!("Application already exists");
                return Ok(ProcessOutcome::AlreadyProcessed);
            }
            Err(e) if vacancy.is_some() => {
                // Keep the applicant even if the vacancy could not be resolved.
                warn!(error = %e, vacancy = ?title, "Vacancy resolution failed, storing without vacancy");
                match self.store.insert_application(&application, None) {
                    Ok(stored) => stored,
                    Err(IngestError::Duplicate(_)) => return Ok(ProcessOutcome::AlreadyProcessed),
                    Err(e) => return Ok(self.store_failed(&e, &application, title.as_deref())),
                }
            }
            Err(e) => return Ok(self.store_failed(&e, &application, title.as_deref())),
        };

        let vacancy_title = stored.vacancy_id.and(title);
        info!(
            application_id = stored.application_id,
            name = %application.name,
            vacancy = ?vacancy_title,
            new_vacancy = stored.created_new_vacancy,
            "Application saved"
        );
        Ok(ProcessOutcome::Stored {
            created_new_vacancy: stored.created_new_vacancy,
            vacancy_title,
        })
    }

    fn store_failed(&self, e: &IngestError, application: &NewApplication, title: Option<&str>) -> ProcessOutcome {
        error!(
            error = %e,
            name = %application.name,
            email = ?application.email,
            phone = ?application.phone,
            vacancy = ?title,
            "Failed to store application"
        );
        ProcessOutcome::Failed
    }

    /// Fetch the attachment bytes and write them under the downloads
    /// directory. Failures are logged and leave the path empty.
    async fn download_resume(
        &self,
        message_id: &str,
        attachment_id: &str,
        filename: &str,
        applicant: &str,
    ) -> Option<String> {
        let Some(filename) = Path::new(filename).file_name() else {
            warn!(filename, "Attachment has no usable file name");
            return None;
        };
        let filename = filename.to_string_lossy();

        let bytes = match self.mail.get_attachment(message_id, attachment_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, attachment_id, "Failed to download resume");
                return None;
            }
        };

        let dir = &self.settings.downloads_dir;
        let path = dir.join(format!("{}_{}", extract::safe_file_stem(applicant), filename));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &bytes).await
        };
        match written.await {
            Ok(()) => {
                info!(path = %path.display(), bytes = bytes.len(), "Resume saved");
                Some(path.to_string_lossy().into_owned())
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to write resume");
                None
            }
        }
    }
}
