//! Command implementations behind the CLI handlers.

pub mod mq;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;
use refinery_core::config::DEFAULT_CONFIG_PATH;
use refinery_core::ticket::TicketStore;
use refinery_core::{
    MailboxNotifier, MergeQueueProcessor, Notifier, RefineryManager, RigConfig,
    SourceControlAdapter, SqliteTicketStore,
};

/// Load the rig config. An explicitly named file must exist; the default
/// location may be absent, in which case defaults apply.
pub fn load_config(matches: &ArgMatches) -> Result<RigConfig> {
    match matches.get_one::<String>("config") {
        Some(path) => RigConfig::load(Path::new(path)).context("loading config"),
        None => RigConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH))
            .context("loading config"),
    }
}

/// Store, adapter and notifier for one rig, wired from its config.
pub struct Services {
    pub store: Arc<dyn TicketStore>,
    pub adapter: Arc<dyn SourceControlAdapter>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    pub async fn connect(config: &RigConfig) -> Result<Self> {
        let store = SqliteTicketStore::connect(&config.db_path)
            .await
            .with_context(|| format!("opening ticket database {}", config.db_path.display()))?;
        let store: Arc<dyn TicketStore> = Arc::new(store);
        let adapter = config.adapter.create(config);
        let notifier: Arc<dyn Notifier> = Arc::new(MailboxNotifier::new(config.mailbox_dir.clone()));
        Ok(Self {
            store,
            adapter,
            notifier,
        })
    }

    pub fn manager(&self) -> RefineryManager {
        RefineryManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.adapter),
            Arc::clone(&self.notifier),
        )
    }

    pub fn processor(&self) -> MergeQueueProcessor {
        MergeQueueProcessor::new(Arc::clone(&self.store), Arc::clone(&self.adapter))
    }
}
