//! Relevance-ranked full-text search over conversation titles and content, with
//! incremental "load more" sessions.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use zebra_common::{Conversation, Error, Result, Source};

use crate::engine::Database;
use crate::row::{CONVERSATION_COLUMNS, CONVERSATION_COLUMNS_C, rows_to_conversations};
use crate::value::SqlValue;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Stateless page queries against the FTS index.
pub struct SearchEngine {
    db: Arc<Database>,
    page_size: usize,
}

impl SearchEngine {
    pub fn new(db: Arc<Database>, page_size: usize) -> Self {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self { db, page_size }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// One page of results. A query with searchable terms runs `MATCH` ordered by
    /// rank; otherwise a source filter alone lists that source newest first.
    pub async fn page(
        &self,
        query: &str,
        source: Option<&Source>,
        offset: usize,
    ) -> Result<Vec<Conversation>> {
        let source_param: SqlValue = source.map(Source::as_str).into();

        let rows = match to_match_expression(query) {
            Some(expression) => {
                debug!("full-text search `{expression}` offset={offset}");
                self.db
                    .execute(
                        &format!(
                            "SELECT {CONVERSATION_COLUMNS_C}
                             FROM conversations_fts_idx
                             JOIN conversations c
                               ON c.id = conversations_fts_idx.rowid_original_conversations
                             WHERE conversations_fts_idx MATCH ?1
                               AND (?2 IS NULL OR c.source = ?2)
                             ORDER BY conversations_fts_idx.rank, c.updated_at DESC
                             LIMIT ?3 OFFSET ?4"
                        ),
                        vec![
                            expression.into(),
                            source_param,
                            self.page_size.into(),
                            offset.into(),
                        ],
                    )
                    .await?
            }
            None if source.is_some() => {
                self.db
                    .execute(
                        &format!(
                            "SELECT {CONVERSATION_COLUMNS}
                             FROM conversations
                             WHERE source = ?1
                             ORDER BY updated_at DESC, id ASC
                             LIMIT ?2 OFFSET ?3"
                        ),
                        vec![source_param, self.page_size.into(), offset.into()],
                    )
                    .await?
            }
            None => return Ok(Vec::new()),
        };

        rows_to_conversations(rows)
    }
}

/// Turn free text into an FTS5 expression that cannot be a syntax error: every
/// whitespace-separated token becomes a quoted phrase, a trailing `*` keeps prefix
/// matching, and tokens are AND-ed. Returns `None` when nothing searchable remains.
pub fn to_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter_map(|raw| {
            let (body, prefix) = match raw.strip_suffix('*') {
                Some(body) => (body, true),
                None => (raw, false),
            };
            if !body.chars().any(char::is_alphanumeric) {
                return None;
            }

            let escaped = body.replace('"', "\"\"");
            Some(if prefix {
                format!("\"{escaped}\"*")
            } else {
                format!("\"{escaped}\"")
            })
        })
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub conversations: Vec<Conversation>,
    pub has_more: bool,
    /// Offset the next `load_more` will start from.
    pub offset: usize,
}

/// Observable session state, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub query: String,
    pub source: Option<Source>,
    pub offset: usize,
    pub loading: bool,
    pub has_more: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    query: String,
    source: Option<Source>,
    offset: usize,
    loading: bool,
    has_more: bool,
    /// Bumped by every `new_search`; fetches tagged with an older value are stale.
    generation: u64,
}

impl SessionState {
    fn is_active(&self) -> bool {
        !self.query.is_empty() || self.source.is_some()
    }
}

/// One paginated search interaction. Safe to share between tasks: a second
/// `load_more` while one is in flight is a no-op, and `new_search` supersedes
/// anything still running.
pub struct SearchSession {
    engine: Arc<SearchEngine>,
    state: Mutex<SessionState>,
}

impl SearchSession {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self {
            engine,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("search session lock poisoned".into()))
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        let state = self.state()?;
        Ok(SessionSnapshot {
            query: state.query.clone(),
            source: state.source.clone(),
            offset: state.offset,
            loading: state.loading,
            has_more: state.has_more,
        })
    }

    /// Start a new search from offset zero. An empty query with no source ends the
    /// session and returns an empty page.
    pub async fn new_search(&self, query: &str, source: Option<Source>) -> Result<SearchPage> {
        let query = query.trim().to_string();
        let generation = {
            let mut state = self.state()?;
            state.generation += 1;
            state.query = query.clone();
            state.source = source.clone();
            state.offset = 0;

            if !state.is_active() {
                state.loading = false;
                state.has_more = false;
                debug!("search session cleared");
                return Ok(SearchPage::default());
            }

            state.loading = true;
            state.has_more = true;
            state.generation
        };

        Ok(self
            .fetch(generation, &query, source.as_ref(), 0)
            .await?
            .unwrap_or_default())
    }

    /// Fetch the next page of the active session. Returns `None` without touching
    /// the database when a fetch is already running, the results are exhausted, or
    /// no session is active.
    pub async fn load_more(&self) -> Result<Option<SearchPage>> {
        let (generation, query, source, offset) = {
            let mut state = self.state()?;
            if state.loading || !state.has_more || !state.is_active() {
                debug!(
                    loading = state.loading,
                    has_more = state.has_more,
                    "load_more ignored"
                );
                return Ok(None);
            }
            state.loading = true;
            (
                state.generation,
                state.query.clone(),
                state.source.clone(),
                state.offset,
            )
        };

        self.fetch(generation, &query, source.as_ref(), offset)
            .await
    }

    /// Run one page query and fold it into the state, unless a newer search has
    /// taken over in the meantime (then the result is dropped and `None` returned).
    async fn fetch(
        &self,
        generation: u64,
        query: &str,
        source: Option<&Source>,
        offset: usize,
    ) -> Result<Option<SearchPage>> {
        let mut in_flight = InFlight {
            session: self,
            generation,
            settled: false,
        };
        let outcome = self.engine.page(query, source, offset).await;
        in_flight.settled = true;

        let mut state = self.state()?;
        if state.generation != generation {
            debug!("discarding superseded search page");
            return Ok(None);
        }
        state.loading = false;

        match outcome {
            Ok(conversations) => {
                state.offset += conversations.len();
                state.has_more = conversations.len() == self.engine.page_size();
                Ok(Some(SearchPage {
                    conversations,
                    has_more: state.has_more,
                    offset: state.offset,
                }))
            }
            Err(e) => {
                state.has_more = false;
                Err(e)
            }
        }
    }
}

/// Clears the loading flag if a fetch future is dropped before it settles.
struct InFlight<'a> {
    session: &'a SearchSession,
    generation: u64,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut state) = self.session.state.lock() {
            if state.generation == self.generation {
                state.loading = false;
            }
        }
    }
}
