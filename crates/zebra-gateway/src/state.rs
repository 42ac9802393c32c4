use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, info};
use zebra_common::Result;
use zebra_config::AppConfig;
use zebra_db::{Database, SearchEngine, SearchSession, StorageHandle};

/// Search session used when a request does not name one.
pub const DEFAULT_SEARCH_SESSION: &str = "default";

pub struct SearchSlot {
    pub session: Arc<SearchSession>,
    last_used: u64,
}

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: AppConfig,
    pub storage: StorageHandle,
    /// Paginated searches, keyed by the caller-chosen session name.
    pub searches: DashMap<String, SearchSlot>,
    clock: AtomicU64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let storage = StorageHandle::new(config.storage.clone());
        Self {
            config,
            storage,
            searches: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    pub async fn database(&self) -> Result<Arc<Database>> {
        self.storage.get().await
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// The named search session, created on first use. Creating one past
    /// `search.max_sessions` evicts the least recently used session.
    pub fn search_session(&self, key: &str, db: &Arc<Database>) -> Arc<SearchSession> {
        if let Some(session) = self.existing_search_session(key) {
            return session;
        }

        while self.searches.len() >= self.config.search.max_sessions.max(1) {
            if !self.evict_idlest() {
                break;
            }
        }

        let entry = self.searches.entry(key.to_string()).or_insert_with(|| {
            info!("new search session: {key}");
            let engine = SearchEngine::new(Arc::clone(db), self.config.search.page_size);
            SearchSlot {
                session: Arc::new(SearchSession::new(Arc::new(engine))),
                last_used: self.tick(),
            }
        });
        Arc::clone(&entry.session)
    }

    pub fn existing_search_session(&self, key: &str) -> Option<Arc<SearchSession>> {
        let mut slot = self.searches.get_mut(key)?;
        slot.last_used = self.tick();
        Some(Arc::clone(&slot.session))
    }

    pub fn remove_search_session(&self, key: &str) {
        if self.searches.remove(key).is_some() {
            debug!("search session closed: {key}");
        }
    }

    fn evict_idlest(&self) -> bool {
        let idlest = self
            .searches
            .iter()
            .min_by_key(|slot| slot.last_used)
            .map(|slot| slot.key().clone());

        match idlest {
            Some(key) => {
                info!("evicting idle search session: {key}");
                self.searches.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Drop every search session, e.g. after storage was reopened.
    pub fn reset_searches(&self) {
        self.searches.clear();
    }
}

pub type SharedState = Arc<AppState>;
