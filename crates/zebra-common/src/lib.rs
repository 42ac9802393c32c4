pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{Author, Conversation, DEFAULT_TITLE, Message};
pub use types::Source;
