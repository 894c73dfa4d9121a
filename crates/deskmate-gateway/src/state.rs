use std::path::Path;
use std::sync::Arc;

use deskmate_agents::{
    Credential, GeminiBinder, ModelBinder, RotationState, StoreFeed, Supervisor, workplace_registry,
};
use deskmate_common::Result;
use deskmate_config::AppConfig;
use deskmate_db::{ConversationStore, NudgeStore, WorkplaceStore};
use tokio::sync::Mutex;
use tracing::info;

/// The three stores, each with its own connection to the same database file.
#[derive(Clone)]
pub struct Stores {
    pub conversations: Arc<Mutex<ConversationStore>>,
    pub workplace: Arc<Mutex<WorkplaceStore>>,
    pub nudges: Arc<Mutex<NudgeStore>>,
}

impl Stores {
    pub fn open(db_path: &Path) -> Result<Self> {
        let stores = Self {
            conversations: Arc::new(Mutex::new(ConversationStore::open(db_path)?)),
            workplace: Arc::new(Mutex::new(WorkplaceStore::open(db_path)?)),
            nudges: Arc::new(Mutex::new(NudgeStore::open(db_path)?)),
        };
        info!("opened database at {}", db_path.display());
        Ok(stores)
    }
}

/// Shared application state for the gateway.
pub struct AppState {
    pub config: AppConfig,
    pub supervisor: Supervisor,
    pub stores: Stores,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the supervisor against Gemini.
    pub fn new(config: AppConfig, stores: Stores) -> Result<Self> {
        let binder = Arc::new(GeminiBinder::new(config.llm.base_url.clone()));
        Self::with_binder(config, stores, binder)
    }

    pub fn with_binder(config: AppConfig, stores: Stores, binder: Arc<dyn ModelBinder>) -> Result<Self> {
        config.validate()?;

        let models: Vec<String> = config
            .llm
            .models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        let credentials: Vec<Credential> = config
            .llm
            .api_key_list()
            .into_iter()
            .map(Credential::new)
            .collect();
        let rotation = Arc::new(RotationState::new(models, credentials)?);
        info!(
            "model rotation: {} model(s) x {} key(s)",
            rotation.models().len(),
            rotation.credential_count()
        );

        let registry = Arc::new(workplace_registry(
            Arc::clone(&stores.workplace),
            Arc::clone(&stores.nudges),
        ));
        let feed = Arc::new(StoreFeed::new(Arc::clone(&stores.nudges)));
        let supervisor = Supervisor::new(&config.agent, rotation, binder, registry, feed)?;

        Ok(Self {
            config,
            supervisor,
            stores,
        })
    }
}
