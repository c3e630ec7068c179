use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{Result, RunnelError};
use crate::config::Config;
use crate::engine::{Cache, Options};
use crate::fetcher::{HttpClient, ReqwestClient};
use crate::store::{KvStore, SqliteStore};

pub struct AppContext {
    pub config: Config,
    pub cache: Arc<Cache>,
}

impl AppContext {
    pub fn new(db_path: Option<PathBuf>, config: Config) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };
        let store: Arc<dyn KvStore> = Arc::new(SqliteStore::new(&db_path)?);
        Self::with_store(store, config)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store: Arc<dyn KvStore> = Arc::new(SqliteStore::in_memory()?);
        Self::with_store(store, config)
    }

    fn with_store(store: Arc<dyn KvStore>, config: Config) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(
            config.http.timeout(),
            &config.http.user_agent,
        )?);
        let cache = Arc::new(Cache::new(store, http, Options::from(&config)));
        Ok(Self { config, cache })
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| RunnelError::Config("Could not find data directory".into()))?;
        let runnel_dir = data_dir.join("runnel");
        std::fs::create_dir_all(&runnel_dir)?;
        Ok(runnel_dir.join("runnel.db"))
    }
}
