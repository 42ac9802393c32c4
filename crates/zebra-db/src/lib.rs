pub mod conversation_store;
pub mod engine;
pub mod handle;
pub mod image_store;
pub mod row;
pub mod schema;
pub mod search;
pub mod transaction;
pub mod value;

pub use conversation_store::{ConversationStore, FreshnessProbe};
pub use engine::{Database, InProcessBackend, StorageBackend, WorkerBackend};
pub use handle::{HandleStatus, StorageHandle};
pub use image_store::ImageStore;
pub use row::ConversationRow;
pub use schema::SchemaReport;
pub use search::{SearchEngine, SearchPage, SearchSession, SessionSnapshot};
pub use transaction::Transaction;
pub use value::{Rows, SqlValue};
