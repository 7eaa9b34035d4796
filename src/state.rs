use std::sync::Arc;
use std::time::Duration;

use teloxide::Bot;
use tracing::warn;
use url::Url;

use crate::billing::transaction::TransactionManager;
use crate::config::CONFIG;
use crate::db::database::Database;
use crate::generation::http::HttpImageGenerator;
use crate::generation::ImageGenerator;
use crate::media::aggregator::MediaGroupAggregator;
use crate::media::fetch::{ArtifactFetcher, HttpArtifactFetcher};
use crate::session::menu::MenuSynchronizer;
use crate::session::recovery::StaleRecovery;
use crate::session::store::SessionStore;
use crate::transport::telegram::TelegramTransport;
use crate::transport::Transport;

/// Business knobs the handlers read; a copy of the relevant config values.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub generation_cost: i64,
    pub starting_credits: i64,
    pub exempt_user_ids: Vec<i64>,
    pub admin_user_ids: Vec<i64>,
}

impl WorkflowSettings {
    pub fn from_config() -> Self {
        Self {
            generation_cost: CONFIG.generation_cost,
            starting_credits: CONFIG.starting_credits,
            exempt_user_ids: CONFIG.exempt_user_ids.clone(),
            admin_user_ids: CONFIG.admin_user_ids.clone(),
        }
    }

    pub fn is_exempt(&self, user_id: i64) -> bool {
        self.exempt_user_ids.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub generator: Arc<dyn ImageGenerator>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
}

pub struct Timings {
    pub media_group_window: Duration,
    pub media_group_retention: Duration,
    pub generation_timeout: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub sessions: SessionStore,
    pub transport: Arc<dyn Transport>,
    pub menu: Arc<MenuSynchronizer>,
    pub recovery: Arc<StaleRecovery>,
    pub media_groups: Arc<MediaGroupAggregator>,
    pub transactions: Arc<TransactionManager>,
    pub generator: Arc<dyn ImageGenerator>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub settings: WorkflowSettings,
}

impl AppState {
    pub fn new(db: Database, bot: Bot) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(
            bot,
            CONFIG.bot_token.clone(),
            CONFIG.telegram_request_timeout(),
        ));
        let generator: Arc<dyn ImageGenerator> = Arc::new(HttpImageGenerator::new(
            CONFIG.generation_endpoint.clone(),
            CONFIG.generation_api_key.clone(),
            CONFIG.generation_timeout(),
        ));
        let banner = CONFIG
            .menu_banner_url
            .as_deref()
            .and_then(|value| match Url::parse(value) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!("Ignoring invalid MENU_BANNER_URL '{value}': {err}");
                    None
                }
            });

        Self::assemble(
            db,
            Collaborators {
                transport,
                generator,
                fetcher: Arc::new(HttpArtifactFetcher),
            },
            WorkflowSettings::from_config(),
            Timings {
                media_group_window: CONFIG.media_group_window(),
                media_group_retention: CONFIG.media_group_retention(),
                // Room for the backend's own timeout to fire first.
                generation_timeout: CONFIG.generation_timeout() + Duration::from_secs(10),
            },
            banner,
        )
    }

    pub fn assemble(
        db: Database,
        collaborators: Collaborators,
        settings: WorkflowSettings,
        timings: Timings,
        banner: Option<Url>,
    ) -> Self {
        let sessions = SessionStore::new();
        let menu = Arc::new(MenuSynchronizer::new(
            db.clone(),
            sessions.clone(),
            collaborators.transport.clone(),
            banner,
        ));
        let recovery = Arc::new(StaleRecovery::new(
            db.clone(),
            sessions.clone(),
            menu.clone(),
        ));
        let transactions = Arc::new(TransactionManager::new(
            db.clone(),
            collaborators.transport.clone(),
            collaborators.fetcher.clone(),
            timings.generation_timeout,
        ));

        AppState {
            db,
            sessions,
            transport: collaborators.transport,
            menu,
            recovery,
            media_groups: Arc::new(MediaGroupAggregator::new(
                timings.media_group_window,
                timings.media_group_retention,
            )),
            transactions,
            generator: collaborators.generator,
            fetcher: collaborators.fetcher,
            settings,
        }
    }
}
