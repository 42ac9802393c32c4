//! Request/reply protocol shared by the HTTP, WebSocket and stdio transports.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zebra_common::{Conversation, Error, Result, Source};
use zebra_config::ExecutionStrategy;
use zebra_db::{
    ConversationStore, FreshnessProbe, HandleStatus, ImageStore, Rows, SchemaReport, SqlValue,
    schema,
};

use crate::state::{AppState, DEFAULT_SEARCH_SESSION};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    SaveConversation {
        conversation: Conversation,
    },
    SaveConversations {
        conversations: Vec<Conversation>,
    },
    GetConversations {
        #[serde(default = "default_list_limit")]
        limit: usize,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        source: Option<String>,
    },
    GetConversation {
        id: String,
    },
    DeleteConversation {
        id: String,
    },
    ExecuteQuery {
        sql: String,
        #[serde(default)]
        params: Vec<SqlValue>,
    },
    SaveImage {
        filename: String,
        /// Base64 encoded bytes.
        data: String,
    },
    GetImage {
        filename: String,
    },
    GetImages,
    NewSearch {
        #[serde(default)]
        query: String,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        session: Option<String>,
    },
    LoadMore {
        #[serde(default)]
        session: Option<String>,
    },
    CheckFreshness {
        candidates: Vec<FreshnessProbe>,
    },
    Status,
    RetryInit,
}

fn default_list_limit() -> usize {
    50
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveConversation { .. } => "SAVE_CONVERSATION",
            Self::SaveConversations { .. } => "SAVE_CONVERSATIONS",
            Self::GetConversations { .. } => "GET_CONVERSATIONS",
            Self::GetConversation { .. } => "GET_CONVERSATION",
            Self::DeleteConversation { .. } => "DELETE_CONVERSATION",
            Self::ExecuteQuery { .. } => "EXECUTE_QUERY",
            Self::SaveImage { .. } => "SAVE_IMAGE",
            Self::GetImage { .. } => "GET_IMAGE",
            Self::GetImages => "GET_IMAGES",
            Self::NewSearch { .. } => "NEW_SEARCH",
            Self::LoadMore { .. } => "LOAD_MORE",
            Self::CheckFreshness { .. } => "CHECK_FRESHNESS",
            Self::Status => "STATUS",
            Self::RetryInit => "RETRY_INIT",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub storage: HandleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaReport>,
    pub search_sessions: usize,
}

/// Success payloads. Each variant's fields are merged into the top-level reply.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Result {
        result: bool,
    },
    Conversations {
        conversations: Vec<Conversation>,
    },
    Conversation {
        conversation: Option<Conversation>,
    },
    Rows {
        rows: Rows,
    },
    Image {
        data: Option<String>,
    },
    Images {
        filenames: Vec<String>,
    },
    Page {
        conversations: Vec<Conversation>,
        has_more: bool,
        session: String,
    },
    Freshness {
        stale_ids: Vec<String>,
    },
    Status(StatusReport),
}

/// Wire envelope: `{"success": true, ...reply}` or `{"success": false, "error": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(flatten)]
    pub reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(reply: Reply) -> Self {
        Self {
            success: true,
            reply: Some(reply),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            reply: None,
            error: Some(message.into()),
        }
    }
}

/// Parse one raw request and run it. Malformed input becomes an error reply.
pub async fn dispatch_text(state: &AppState, raw: &str) -> RpcResponse {
    match serde_json::from_str::<Request>(raw) {
        Ok(request) => dispatch(state, request).await,
        Err(e) => {
            warn!("rejected malformed request: {e}");
            RpcResponse::err(format!("invalid request: {e}"))
        }
    }
}

pub async fn dispatch(state: &AppState, request: Request) -> RpcResponse {
    let kind = request.kind();
    debug!("dispatching {kind}");
    match handle(state, request).await {
        Ok(reply) => RpcResponse::ok(reply),
        Err(e) => {
            warn!("{kind} failed: {e}");
            RpcResponse::err(e.to_string())
        }
    }
}

async fn handle(state: &AppState, request: Request) -> Result<Reply> {
    match request {
        Request::SaveConversation { conversation } => {
            let store = ConversationStore::new(state.database().await?);
            Ok(Reply::Result {
                result: store.upsert_one(&conversation).await?,
            })
        }
        Request::SaveConversations { conversations } => {
            let store = ConversationStore::new(state.database().await?);
            Ok(Reply::Result {
                result: store.upsert_many(&conversations).await?,
            })
        }
        Request::GetConversations {
            limit,
            offset,
            source,
        } => {
            let store = ConversationStore::new(state.database().await?);
            let source = Source::parse_filter(source.as_deref());
            Ok(Reply::Conversations {
                conversations: store.list(limit, offset, source.as_ref()).await?,
            })
        }
        Request::GetConversation { id } => {
            let store = ConversationStore::new(state.database().await?);
            Ok(Reply::Conversation {
                conversation: store.get_by_id(&id).await?,
            })
        }
        Request::DeleteConversation { id } => {
            let store = ConversationStore::new(state.database().await?);
            Ok(Reply::Result {
                result: store.delete_by_id(&id).await?,
            })
        }
        Request::ExecuteQuery { sql, params } => {
            let store = ConversationStore::new(state.database().await?);
            Ok(Reply::Rows {
                rows: store.raw_query(&sql, params).await?,
            })
        }
        Request::SaveImage { filename, data } => {
            let bytes = BASE64
                .decode(data.as_bytes())
                .map_err(|e| Error::Other(format!("image data is not valid base64: {e}")))?;
            let images = ImageStore::new(state.database().await?);
            Ok(Reply::Result {
                result: images.save(&filename, bytes).await?,
            })
        }
        Request::GetImage { filename } => {
            let images = ImageStore::new(state.database().await?);
            Ok(Reply::Image {
                data: images.get(&filename).await?.map(|b| BASE64.encode(b)),
            })
        }
        Request::GetImages => {
            let images = ImageStore::new(state.database().await?);
            Ok(Reply::Images {
                filenames: images.list().await?,
            })
        }
        Request::NewSearch {
            query,
            source,
            session,
        } => {
            let db = state.database().await?;
            let key = session.unwrap_or_else(|| DEFAULT_SEARCH_SESSION.to_string());
            let source = Source::parse_filter(source.as_deref());
            if query.trim().is_empty() && source.is_none() {
                state.remove_search_session(&key);
                return Ok(Reply::Page {
                    conversations: Vec::new(),
                    has_more: false,
                    session: key,
                });
            }

            let search = state.search_session(&key, &db);
            let page = search.new_search(&query, source).await?;
            Ok(Reply::Page {
                conversations: page.conversations,
                has_more: page.has_more,
                session: key,
            })
        }
        Request::LoadMore { session } => {
            let key = session.unwrap_or_else(|| DEFAULT_SEARCH_SESSION.to_string());
            let Some(search) = state.existing_search_session(&key) else {
                return Ok(Reply::Page {
                    conversations: Vec::new(),
                    has_more: false,
                    session: key,
                });
            };

            match search.load_more().await? {
                Some(page) => Ok(Reply::Page {
                    conversations: page.conversations,
                    has_more: page.has_more,
                    session: key,
                }),
                None => Ok(Reply::Page {
                    conversations: Vec::new(),
                    has_more: search.snapshot()?.has_more,
                    session: key,
                }),
            }
        }
        Request::CheckFreshness { candidates } => {
            let store = ConversationStore::new(state.database().await?);
            Ok(Reply::Freshness {
                stale_ids: store.stale_ids(&candidates).await?,
            })
        }
        Request::Status => Ok(Reply::Status(status(state).await?)),
        Request::RetryInit => {
            state.storage.retry().await?;
            state.reset_searches();
            info!("storage available after retry");
            Ok(Reply::Result { result: true })
        }
    }
}

/// Storage lifecycle plus, when the database is open, counts and schema health.
pub async fn status(state: &AppState) -> Result<StatusReport> {
    let storage = state.storage.status().await;
    let mut report = StatusReport {
        storage: storage.clone(),
        strategy: None,
        location: None,
        conversations: None,
        latest_updated_at: None,
        images: None,
        schema: None,
        search_sessions: state.searches.len(),
    };

    if storage != HandleStatus::Ready {
        return Ok(report);
    }

    let db = state.database().await?;
    report.strategy = Some(db.strategy());
    report.location = Some(db.location().to_string());
    let store = ConversationStore::new(db.clone());
    report.conversations = Some(store.count(None).await?);
    report.latest_updated_at = store.latest_updated_at(None).await?;
    report.images = Some(ImageStore::new(db.clone()).list().await?.len());
    report.schema = Some(schema::verify(&db).await?);
    Ok(report)
}
