pub mod config;
pub mod error;
pub mod extract;
pub mod gmail_hub;
pub mod mail;
pub mod poller;
pub mod processor;
pub mod refresh;
pub mod scheduler;
pub mod store;
pub mod token_store;

pub use error::{IngestError, Result};
pub use poller::{AccountPoller, PollSummary, poll_all_accounts};
pub use processor::{IngestSettings, MessageProcessor, ProcessOutcome};
pub use scheduler::Scheduler;
pub use store::Store;
